//! 结构化日志初始化
//!
//! 基于 tracing-subscriber 构建：EnvFilter 加 fmt 输出层（文本或 JSON）。

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wsbridge_config::LoggingConfig;

#[derive(thiserror::Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

/// 构建环境过滤器
///
/// Precedence for the base level: explicit `level_override`, then `RUST_LOG`,
/// then the configured level. Per-module directives from the config are
/// always layered on top.
pub fn build_filter(
    config: &LoggingConfig,
    level_override: Option<&str>,
) -> Result<EnvFilter, LoggingError> {
    let mut filter = match level_override {
        Some(level) => EnvFilter::try_new(level)
            .map_err(|e| LoggingError::InvalidFilter(format!("{}: {}", level, e)))?,
        None => match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(config.level.to_string())
                .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?,
        },
    };

    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| LoggingError::InvalidFilter(format!("{}: {}", directive, e)))?,
        );
    }

    Ok(filter)
}

/// 初始化日志系统
pub fn init_logging(config: &LoggingConfig, level_override: Option<&str>) -> Result<(), LoggingError> {
    let filter = build_filter(config, level_override)?;
    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true);
        registry
            .with(layer)
            .try_init()
            .map_err(|e| LoggingError::Init(e.to_string()))?;
    } else {
        let layer = tracing_subscriber::fmt::layer().with_target(true);
        registry
            .with(layer)
            .try_init()
            .map_err(|e| LoggingError::Init(e.to_string()))?;
    }

    tracing::debug!(level = %config.level, json = config.json, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsbridge_config::LogLevel;

    #[test]
    fn test_override_wins() {
        let config = LoggingConfig {
            level: LogLevel::Error,
            ..Default::default()
        };
        let filter = build_filter(&config, Some("trace")).unwrap();
        assert!(filter.to_string().contains("trace"));
    }

    #[test]
    fn test_module_levels_added() {
        let mut config = LoggingConfig::default();
        config
            .module_levels
            .insert("wsbridge_gateway".to_string(), "debug".to_string());

        let filter = build_filter(&config, Some("info")).unwrap();
        assert!(filter.to_string().contains("wsbridge_gateway=debug"));
    }

    #[test]
    fn test_bad_module_directive_rejected() {
        let mut config = LoggingConfig::default();
        config
            .module_levels
            .insert("wsbridge_gateway".to_string(), "loud".to_string());

        let err = build_filter(&config, Some("info")).unwrap_err();
        assert!(matches!(err, LoggingError::InvalidFilter(_)));
    }
}
