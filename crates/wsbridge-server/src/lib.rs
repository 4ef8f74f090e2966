//! Host process for the WebSocket bridge
//!
//! Wires the configuration file, logging and the bridge middleware into an
//! axum server. The `echo-backend` binary is a demo backend to bridge to.

pub mod logging;
pub mod server;

pub use logging::{init_logging, LoggingError};
pub use server::{bridge_from_config, router, run_server};
