pub mod config;

pub use config::{ConfigError, LauncherConfig, LauncherConfigBuilder};
