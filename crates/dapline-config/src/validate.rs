use crate::config::Config;
use crate::error::ConfigError;

const MIN_FRAME_BYTES: u64 = 1024;
const MAX_FRAME_BYTES: u64 = 1024 * 1024 * 1024;
const MAX_OUTBOUND_QUEUE: u64 = 65_536;

/// Validate a [`Config`], returning all detected violations.
///
/// Returns `Ok(())` when the config is valid, or `Err` with a
/// vector of every validation error found.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let session = &config.session;

    if !(MIN_FRAME_BYTES..=MAX_FRAME_BYTES).contains(&session.max_frame_bytes) {
        errors.push(ConfigError::Validation {
            field: "session.max_frame_bytes".to_string(),
            message: format!(
                "must be {MIN_FRAME_BYTES}..={MAX_FRAME_BYTES}, got {}",
                session.max_frame_bytes
            ),
        });
    }

    if session.request_timeout_ms == 0 {
        errors.push(ConfigError::Validation {
            field: "session.request_timeout_ms".to_string(),
            message: "must be greater than 0".to_string(),
        });
    }

    if session.shutdown_timeout_ms == 0 {
        errors.push(ConfigError::Validation {
            field: "session.shutdown_timeout_ms".to_string(),
            message: "must be greater than 0".to_string(),
        });
    }

    if !(1..=MAX_OUTBOUND_QUEUE).contains(&session.outbound_queue) {
        errors.push(ConfigError::Validation {
            field: "session.outbound_queue".to_string(),
            message: format!(
                "must be 1..={MAX_OUTBOUND_QUEUE}, got {}",
                session.outbound_queue
            ),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
