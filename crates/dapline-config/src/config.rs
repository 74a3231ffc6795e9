use std::time::Duration;

use dapline_session::{Role, SequencePolicy, SessionConfig};
use serde::{Deserialize, Serialize};

/// Which side of the protocol the engine speaks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSetting {
    /// The development tool side.
    Client,
    /// The debug adapter side (default for the binary).
    #[default]
    Adapter,
}

impl From<RoleSetting> for Role {
    fn from(setting: RoleSetting) -> Self {
        match setting {
            RoleSetting::Client => Role::Client,
            RoleSetting::Adapter => Role::Adapter,
        }
    }
}

/// How lifecycle violations are handled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySetting {
    /// Reject illegal messages.
    #[default]
    Strict,
    /// Hold illegal events until they become legal; still refuse illegal requests.
    Lenient,
}

impl From<PolicySetting> for SequencePolicy {
    fn from(setting: PolicySetting) -> Self {
        match setting {
            PolicySetting::Strict => SequencePolicy::Strict,
            PolicySetting::Lenient => SequencePolicy::Lenient,
        }
    }
}

/// Log verbosity level.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debug messages.
    Debug,
    /// Informational messages (default).
    #[default]
    Info,
    /// Warnings only.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// The level as an `EnvFilter` directive.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Logging settings.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Verbosity level.
    #[serde(default)]
    pub level: LogLevel,
}

/// Session engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSection {
    /// Protocol side.
    #[serde(default)]
    pub role: RoleSetting,
    /// Sequence policy.
    #[serde(default)]
    pub policy: PolicySetting,
    /// Largest inbound frame in bytes (1 KiB to 1 GiB).
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u64,
    /// Deadline for self-issued requests, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Deadline for `disconnect`/`terminate` acknowledgement, in milliseconds.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Capacity of the outbound frame queue (1 to 65536).
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: u64,
    /// Emit `initialized` right after a successful `initialize` response.
    #[serde(default = "default_true")]
    pub auto_initialized: bool,
}

fn default_max_frame_bytes() -> u64 {
    dapline_proto::DEFAULT_MAX_FRAME_BYTES as u64
}
fn default_request_timeout_ms() -> u64 {
    dapline_session::engine::REQUEST_TIMEOUT_SECS * 1000
}
fn default_shutdown_timeout_ms() -> u64 {
    dapline_session::engine::SHUTDOWN_TIMEOUT_SECS * 1000
}
fn default_outbound_queue() -> u64 {
    dapline_session::engine::OUTBOUND_QUEUE as u64
}
fn default_true() -> bool {
    true
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            role: RoleSetting::default(),
            policy: PolicySetting::default(),
            max_frame_bytes: default_max_frame_bytes(),
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            outbound_queue: default_outbound_queue(),
            auto_initialized: true,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Session engine settings.
    #[serde(default)]
    pub session: SessionSection,
    /// Logging settings.
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Engine settings for [`dapline_session::Session::spawn`].
    ///
    /// Assumes the config passed validation; out-of-range sizes saturate.
    pub fn session_config(&self) -> SessionConfig {
        let s = &self.session;
        SessionConfig {
            role: s.role.into(),
            policy: s.policy.into(),
            max_frame_bytes: usize::try_from(s.max_frame_bytes).unwrap_or(usize::MAX),
            request_timeout: Duration::from_millis(s.request_timeout_ms),
            shutdown_timeout: Duration::from_millis(s.shutdown_timeout_ms),
            outbound_queue: usize::try_from(s.outbound_queue).unwrap_or(usize::MAX),
            auto_initialized: s.auto_initialized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.session.role, RoleSetting::Adapter);
        assert_eq!(cfg.session.policy, PolicySetting::Strict);
        assert_eq!(cfg.session.max_frame_bytes, 16 * 1024 * 1024);
        assert_eq!(cfg.session.request_timeout_ms, 10_000);
        assert_eq!(cfg.session.shutdown_timeout_ms, 5_000);
        assert_eq!(cfg.session.outbound_queue, 64);
        assert!(cfg.session.auto_initialized);
        assert_eq!(cfg.log.level, LogLevel::Info);
    }

    #[test]
    fn session_config_conversion() {
        let mut cfg = Config::default();
        cfg.session.role = RoleSetting::Client;
        cfg.session.policy = PolicySetting::Lenient;
        cfg.session.request_timeout_ms = 250;
        let session = cfg.session_config();
        assert_eq!(session.role, Role::Client);
        assert_eq!(session.policy, SequencePolicy::Lenient);
        assert_eq!(session.request_timeout, Duration::from_millis(250));
        assert_eq!(session.max_frame_bytes, 16 * 1024 * 1024);
        assert!(session.auto_initialized);
    }

    #[test]
    fn deserialize_partial_toml() {
        let cfg: Config = toml::from_str("[session]\npolicy = \"lenient\"\n").unwrap();
        assert_eq!(cfg.session.policy, PolicySetting::Lenient);
        assert_eq!(cfg.session.role, RoleSetting::Adapter);
        assert_eq!(cfg.session.outbound_queue, 64);
    }

    #[test]
    fn log_level_filter_directives() {
        assert_eq!(LogLevel::Trace.as_filter(), "trace");
        assert_eq!(LogLevel::default().as_filter(), "info");
        assert_eq!(LogLevel::Error.as_filter(), "error");
    }

    #[test]
    fn config_serde_roundtrip() {
        let cfg = Config::default();
        let text = toml::to_string(&cfg).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(cfg, back);
    }
}
