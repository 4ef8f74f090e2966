use crate::config::{Config, ConfigError, ConfigResult};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// 配置管理器
///
/// Configuration is read once at startup and never changes afterwards.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// 加载配置文件
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::InvalidPath(format!(
                "Config file not found: {:?}",
                path
            )));
        }

        info!("Loading config from {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let content = Self::expand_env_vars(&content)?;
        let config: Config = serde_json::from_str(&content)?;

        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }

    /// Load the file if it exists, otherwise start from defaults.
    ///
    /// The command line may supply the whole bridge configuration, so a
    /// missing file is not an error here. Validation is left to the caller
    /// once overrides have been applied.
    pub async fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::load(path).await
        } else {
            debug!("Config file {:?} not found, using defaults", path);
            Ok(Self::new(Config::default(), path.to_path_buf()))
        }
    }

    /// 获取默认配置路径 (~/.wsbridge/config.json)
    pub fn default_config_path() -> ConfigResult<PathBuf> {
        crate::default_config_path()
            .ok_or_else(|| ConfigError::InvalidPath("Could not find home directory".to_string()))
    }

    pub fn new(config: Config, path: PathBuf) -> Self {
        Self { path, config }
    }

    pub fn get(&self) -> &Config {
        &self.config
    }

    /// Apply in-place overrides (command line flags) before validation.
    pub fn update<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Config),
    {
        f(&mut self.config);
    }

    /// Consume the manager and hand out the validated configuration.
    pub fn into_validated(self) -> ConfigResult<Config> {
        Self::validate(&self.config)?;
        Ok(self.config)
    }

    /// 验证配置
    pub fn validate(config: &Config) -> ConfigResult<()> {
        if config.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port cannot be 0".to_string(),
            ));
        }

        config.bridge.interval_duration()?;

        if config.bridge.backend_host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "backend host (first value) must be specified".to_string(),
            ));
        }

        if config.bridge.backend_paths.is_empty() {
            return Err(ConfigError::Validation(
                "backend paths (second value and onwards) must have at least one entry"
                    .to_string(),
            ));
        }

        if let Some(bad) = config
            .bridge
            .backend_paths
            .iter()
            .find(|p| !p.starts_with('/'))
        {
            return Err(ConfigError::Validation(format!(
                "backend path must start with '/': {}",
                bad
            )));
        }

        Ok(())
    }

    /// 展开环境变量 ${VAR} 或 ${VAR:-default}
    fn expand_env_vars(content: &str) -> ConfigResult<String> {
        static ENV_VAR: OnceLock<Regex> = OnceLock::new();
        let re = ENV_VAR.get_or_init(|| {
            Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid")
        });

        let mut missing = None;
        let expanded = re.replace_all(content, |cap: &regex::Captures<'_>| {
            let var_expr = &cap[1];

            // 处理 ${VAR:-default} 语法
            let (var_name, default_value) = match var_expr.split_once(":-") {
                Some((name, default)) => (name, Some(default)),
                None => (var_expr, None),
            };

            match (std::env::var(var_name), default_value) {
                (Ok(val), _) => val,
                (Err(_), Some(default)) => default.to_string(),
                (Err(_), None) => {
                    missing.get_or_insert_with(|| var_name.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(name) => Err(ConfigError::EnvVarNotFound(name)),
            None => Ok(expanded.into_owned()),
        }
    }

    /// 获取配置文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }
}
