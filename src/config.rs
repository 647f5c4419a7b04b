use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identifier Service settings.
///
/// Both fields are optional; absent or unusable values fall back to the
/// defaults in [`crate::IdGenerator`]. The length is signed so that a
/// non-positive value coming from a config file is representable and can be
/// recovered from instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdConfig {
    pub alphabet: Option<String>,
    pub length: Option<i64>,
}

/// Engine settings, typically deserialized from a TOML file at process start.
///
/// ```toml
/// step_timeout_ms = 30000
///
/// [id]
/// alphabet = "0123456789abcdef"
/// length = 24
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub id: IdConfig,
    /// Maximum time a single step may take to cross its barrier. Absent
    /// means no limit.
    pub step_timeout_ms: Option<u64>,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load configuration from a TOML file.
    ///
    /// Configuration problems are never fatal: a missing or malformed file
    /// yields the default configuration with a warning.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("couldn't read config file {}: {err}", path.display());
                return Self::default();
            }
        };

        match Self::from_toml_str(&text) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("couldn't parse config file {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_full_config() {
        let config = EngineConfig::from_toml_str(
            r#"
            step_timeout_ms = 500

            [id]
            alphabet = "xyz"
            length = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.step_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(config.id.alphabet.as_deref(), Some("xyz"));
        assert_eq!(config.id.length, Some(4));
    }

    #[test]
    fn empty_config_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.step_timeout(), None);
    }

    #[test]
    fn load_falls_back_on_missing_file() {
        let config = EngineConfig::load("/does/not/exist.toml");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn load_falls_back_on_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "step_timeout_ms = \"oops").unwrap();

        let config = EngineConfig::load(file.path());
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn load_reads_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[id]\nlength = 32").unwrap();

        let config = EngineConfig::load(file.path());
        assert_eq!(config.id.length, Some(32));
    }
}
