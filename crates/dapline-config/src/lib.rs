//! dapline-config — TOML configuration for the DAP session engine.
//!
//! Built-in defaults, an optional file overlay deep-merged on top, and
//! validation of the result.

pub mod config;
pub mod error;
pub mod load;
pub mod merge;
pub mod validate;

// Re-export key types for convenience.
pub use config::{Config, LogConfig, LogLevel, PolicySetting, RoleSetting, SessionSection};
pub use error::ConfigError;
pub use load::{load_config, load_from_str};
pub use merge::merge_configs;
pub use validate::validate;
