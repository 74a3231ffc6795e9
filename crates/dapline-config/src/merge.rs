use crate::config::Config;
use crate::error::ConfigError;

/// Lay a TOML fragment over a base [`Config`].
///
/// Keys the overlay sets win; the rest keep their `base` value, so a
/// partial `[session]` section leaves its sibling keys alone. Keys the
/// config does not know are skipped with a warning naming their dotted
/// path.
pub fn merge_configs(base: &Config, overlay_toml: &str) -> Result<Config, ConfigError> {
    let base_str = toml::to_string(base).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let mut base_val: toml::Value =
        toml::from_str(&base_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let overlay_val: toml::Value =
        toml::from_str(overlay_toml).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let mut unknown = Vec::new();
    overlay(&mut base_val, &overlay_val, "", &mut unknown);
    for key in &unknown {
        tracing::warn!("ignoring unknown config key `{}`", key);
    }

    base_val
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))
}

/// Copy `top` into `slot`, descending into sections. `path` is the dotted
/// name of `slot`; keys missing from `slot` are collected in `unknown`.
fn overlay(slot: &mut toml::Value, top: &toml::Value, path: &str, unknown: &mut Vec<String>) {
    match (slot, top) {
        (toml::Value::Table(section), toml::Value::Table(entries)) => {
            for (key, value) in entries {
                let dotted = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                match section.get_mut(key) {
                    Some(current) => overlay(current, value, &dotted, unknown),
                    None => unknown.push(dotted),
                }
            }
        }
        (slot, top) => *slot = top.clone(),
    }
}
