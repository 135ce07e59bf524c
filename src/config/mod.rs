use crate::diff::{MatchConfig, Score};
use crate::tree::{MacroDenylist, MacroMode};
use std::path::PathBuf;

pub const DEFAULT_BACKUP_DIR: &str = ".adf_backups";
pub const DEFAULT_RETENTION_LIMIT: usize = 10;

pub const ENV_BACKUP_DIR: &str = "ADF_ROUNDTRIP_BACKUP_DIR";
pub const ENV_BACKUP_RETENTION: &str = "ADF_ROUNDTRIP_BACKUP_RETENTION";
pub const ENV_SAFE_MODE: &str = "ADF_ROUNDTRIP_SAFE_MODE";
pub const ENV_MIN_OVERLAP: &str = "ADF_ROUNDTRIP_MIN_OVERLAP";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: expected {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Settings for an edit session. Built once and passed explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundtripConfig {
    pub backup_dir: PathBuf,
    /// Backups kept per document after each new one.
    pub retention_limit: usize,
    /// When false, sessions default to including macro bodies.
    pub safe_mode: bool,
    pub matching: MatchConfig,
    pub denylist: MacroDenylist,
}

impl Default for RoundtripConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            retention_limit: DEFAULT_RETENTION_LIMIT,
            safe_mode: true,
            matching: MatchConfig::default(),
            denylist: MacroDenylist::default(),
        }
    }
}

impl RoundtripConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the
    /// `ADF_ROUNDTRIP_*` variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_BACKUP_DIR).filter(|dir| !dir.trim().is_empty()) {
            config.backup_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_BACKUP_RETENTION) {
            config.retention_limit = match value.trim().parse::<usize>() {
                Ok(limit) if limit > 0 => limit,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: ENV_BACKUP_RETENTION,
                        value,
                        expected: "a positive integer",
                    });
                }
            };
        }
        if let Some(value) = lookup(ENV_SAFE_MODE) {
            config.safe_mode = parse_bool(&value).ok_or(ConfigError::Invalid {
                var: ENV_SAFE_MODE,
                value: value.clone(),
                expected: "true or false",
            })?;
        }
        if let Some(value) = lookup(ENV_MIN_OVERLAP) {
            config.matching.min_overlap = match value.trim().parse::<f64>() {
                Ok(ratio) if (0.0..=1.0).contains(&ratio) => Score::from_ratio(ratio),
                _ => {
                    return Err(ConfigError::Invalid {
                        var: ENV_MIN_OVERLAP,
                        value,
                        expected: "a ratio between 0 and 1",
                    });
                }
            };
        }
        Ok(config)
    }

    pub fn macro_mode(&self) -> MacroMode {
        if self.safe_mode {
            MacroMode::Safe
        } else {
            MacroMode::IncludeBodies
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RoundtripConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RoundtripConfig::default());
        assert_eq!(config.retention_limit, 10);
        assert_eq!(config.matching.min_overlap, Score(3000));
        assert_eq!(config.macro_mode(), MacroMode::Safe);
    }

    #[test]
    fn test_overrides() {
        let config = RoundtripConfig::from_lookup(lookup(&[
            (ENV_BACKUP_DIR, "/var/backups/adf"),
            (ENV_BACKUP_RETENTION, "3"),
            (ENV_SAFE_MODE, "off"),
            (ENV_MIN_OVERLAP, "0.5"),
        ]))
        .unwrap();
        assert_eq!(config.backup_dir, PathBuf::from("/var/backups/adf"));
        assert_eq!(config.retention_limit, 3);
        assert_eq!(config.macro_mode(), MacroMode::IncludeBodies);
        assert_eq!(config.matching.min_overlap, Score(5000));
    }

    #[test]
    fn test_rejects_bad_values() {
        for (var, value) in [
            (ENV_BACKUP_RETENTION, "0"),
            (ENV_BACKUP_RETENTION, "ten"),
            (ENV_SAFE_MODE, "maybe"),
            (ENV_MIN_OVERLAP, "1.5"),
        ] {
            let err = RoundtripConfig::from_lookup(lookup(&[(var, value)])).unwrap_err();
            let ConfigError::Invalid { var: got, .. } = err;
            assert_eq!(got, var);
        }
    }
}
