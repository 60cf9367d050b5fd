//! Configuration module: layered loading and validation.
//!
//! # Module Structure
//!
//! - `loader`: reads the TOML document, environment variables and CLI overrides
//! - `validator`: password policy, value syntax, ranges and cross-field conflicts
//!
//! # Configuration Flow
//!
//! 1. Built-in defaults seed the merged table
//! 2. The optional TOML document overrides defaults
//! 3. `STAGEHAND_*` environment variables override the document
//! 4. `--set key=value` CLI overrides win over everything
//! 5. Every key is checked against the schema (unknown keys are rejected)
//! 6. The merged table is validated and frozen into a [`Configuration`]

pub mod loader;
pub mod validator;

use crate::error::ConfigError;
use crate::models::Configuration;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Prefix of recognized environment variables.
pub const ENV_PREFIX: &str = "STAGEHAND_";

/// Value kind of a schema entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Hostname,
    Email,
    Account,
    Path,
    Secret,
    Flag,
    Integer { min: i64, max: i64 },
    Choice(&'static [&'static str]),
}

impl SettingKind {
    pub fn describe(&self) -> &'static str {
        match self {
            SettingKind::Integer { .. } => "an integer",
            SettingKind::Flag => "a boolean",
            _ => "a string",
        }
    }
}

/// Built-in default for a schema entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    Required,
    Text(&'static str),
    Integer(i64),
    Flag(bool),
}

impl Fallback {
    fn to_value(self) -> Option<toml::Value> {
        match self {
            Fallback::Required => None,
            Fallback::Text(s) => Some(toml::Value::String(s.to_string())),
            Fallback::Integer(n) => Some(toml::Value::Integer(n)),
            Fallback::Flag(b) => Some(toml::Value::Boolean(b)),
        }
    }
}

/// One recognized configuration key.
#[derive(Debug, Clone, Copy)]
pub struct Setting {
    pub key: &'static str,
    pub kind: SettingKind,
    pub fallback: Fallback,
}

const PORT: SettingKind = SettingKind::Integer { min: 1, max: 65535 };

/// The complete configuration schema.
pub const SETTINGS: &[Setting] = &[
    Setting { key: "domain", kind: SettingKind::Hostname, fallback: Fallback::Required },
    Setting { key: "admin_email", kind: SettingKind::Email, fallback: Fallback::Required },
    Setting { key: "admin_password", kind: SettingKind::Secret, fallback: Fallback::Required },
    Setting { key: "database_password", kind: SettingKind::Secret, fallback: Fallback::Required },
    Setting {
        key: "environment",
        kind: SettingKind::Choice(&["development", "staging", "production"]),
        fallback: Fallback::Text("production"),
    },
    Setting { key: "service_user", kind: SettingKind::Account, fallback: Fallback::Text("stagehand") },
    Setting { key: "service_group", kind: SettingKind::Account, fallback: Fallback::Text("stagehand") },
    Setting { key: "install_dir", kind: SettingKind::Path, fallback: Fallback::Text("/opt/stagehand") },
    Setting { key: "http_port", kind: PORT, fallback: Fallback::Integer(80) },
    Setting { key: "https_port", kind: PORT, fallback: Fallback::Integer(443) },
    Setting { key: "enable_tls", kind: SettingKind::Flag, fallback: Fallback::Flag(true) },
    Setting { key: "enable_backups", kind: SettingKind::Flag, fallback: Fallback::Flag(true) },
    Setting {
        key: "min_disk_gib",
        kind: SettingKind::Integer { min: 1, max: 100_000 },
        fallback: Fallback::Integer(20),
    },
    Setting {
        key: "min_memory_gib",
        kind: SettingKind::Integer { min: 1, max: 4096 },
        fallback: Fallback::Integer(4),
    },
    Setting {
        key: "retry_attempts",
        kind: SettingKind::Integer { min: 1, max: 10 },
        fallback: Fallback::Integer(3),
    },
    Setting {
        key: "retry_base_delay_secs",
        kind: SettingKind::Integer { min: 0, max: 300 },
        fallback: Fallback::Integer(2),
    },
    Setting {
        key: "elevation_tool",
        kind: SettingKind::Choice(&["sudo", "pkexec"]),
        fallback: Fallback::Text("sudo"),
    },
];

/// Look up a schema entry by key.
pub fn lookup_setting(key: &str) -> Option<&'static Setting> {
    SETTINGS.iter().find(|s| s.key == key)
}

/// Where a configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layer {
    Defaults,
    File(PathBuf),
    Environment,
    Cli,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Defaults => f.write_str("defaults"),
            Layer::File(path) => write!(f, "file {}", path.display()),
            Layer::Environment => f.write_str("environment"),
            Layer::Cli => f.write_str("command line"),
        }
    }
}

/// Inputs to [`ConfigStore::load`].
///
/// Environment variables are passed in rather than read from the process so
/// loading stays a pure transform over its inputs.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub file: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub overrides: Vec<(String, String)>,
}

impl ConfigSources {
    /// Sources for a real run: the given file and overrides plus the process environment.
    pub fn from_process(file: Option<PathBuf>, overrides: Vec<(String, String)>) -> Self {
        ConfigSources {
            file,
            env: std::env::vars().collect(),
            overrides,
        }
    }
}

/// Layered configuration loader.
pub struct ConfigStore;

impl ConfigStore {
    /// Merge all layers and validate the result.
    pub fn load(sources: &ConfigSources) -> Result<Configuration, ConfigError> {
        let mut merged: BTreeMap<&'static str, (toml::Value, Layer)> = BTreeMap::new();

        for setting in SETTINGS {
            if let Some(value) = setting.fallback.to_value() {
                merged.insert(setting.key, (value, Layer::Defaults));
            }
        }

        if let Some(path) = &sources.file {
            let layer = Layer::File(path.clone());
            let table = loader::read_config_file(path)?;
            for (key, value) in table {
                let setting = lookup_setting(&key).ok_or_else(|| ConfigError::UnknownKey {
                    key: key.clone(),
                    layer: layer.to_string(),
                })?;
                loader::check_document_type(setting.key, setting.kind, &value, &layer)?;
                merged.insert(setting.key, (value, layer.clone()));
            }
            log::info!("[Config] Loaded configuration document {}", path.display());
        }

        let env_overrides = loader::environment_overrides(sources.env.iter().cloned())?;
        Self::apply_strings(&mut merged, env_overrides, Layer::Environment)?;
        Self::apply_strings(&mut merged, sources.overrides.iter().cloned(), Layer::Cli)?;

        for setting in SETTINGS {
            let (value, layer) = merged
                .get(setting.key)
                .ok_or_else(|| ConfigError::MissingField(setting.key.to_string()))?;
            validator::validate_value(setting.key, setting.kind, value, layer)?;
        }

        let table: toml::Table = merged
            .into_iter()
            .map(|(key, (value, _))| (key.to_string(), value))
            .collect();
        let config: Configuration =
            toml::Value::Table(table)
                .try_into()
                .map_err(|e: toml::de::Error| ConfigError::InvalidValue {
                    key: "<configuration>".to_string(),
                    layer: "merged".to_string(),
                    reason: e.to_string(),
                })?;

        validator::detect_conflicts(&config)?;

        log::info!(
            "[Config] ✓ Configuration validated (domain={}, environment={}, install_dir={})",
            config.domain,
            config.environment.as_str(),
            config.install_dir.display()
        );
        Ok(config)
    }

    fn apply_strings<I>(
        merged: &mut BTreeMap<&'static str, (toml::Value, Layer)>,
        pairs: I,
        layer: Layer,
    ) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, raw) in pairs {
            let setting = lookup_setting(&key).ok_or_else(|| ConfigError::UnknownKey {
                key: key.clone(),
                layer: layer.to_string(),
            })?;
            let value = loader::coerce(setting.key, setting.kind, &raw, &layer)?;
            merged.insert(setting.key, (value, layer.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ElevationTool, Environment};
    use std::fs;
    use tempfile::TempDir;

    fn required_overrides() -> Vec<(String, String)> {
        vec![
            ("domain".into(), "app.example.com".into()),
            ("admin_email".into(), "ops@example.com".into()),
            ("admin_password".into(), "ValidPass123!".into()),
            ("database_password".into(), "DbSecret456#x".into()),
        ]
    }

    #[test]
    fn test_defaults_fill_optional_settings() {
        let sources = ConfigSources {
            overrides: required_overrides(),
            ..Default::default()
        };
        let config = ConfigStore::load(&sources).unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.http_port, 80);
        assert_eq!(config.https_port, 443);
        assert_eq!(config.service_user, "stagehand");
        assert_eq!(config.elevation_tool, ElevationTool::Sudo);
        assert_eq!(config.retry_attempts, 3);
    }

    #[test]
    fn test_missing_required_field() {
        let mut overrides = required_overrides();
        overrides.retain(|(k, _)| k != "domain");
        let sources = ConfigSources {
            overrides,
            ..Default::default()
        };
        let err = ConfigStore::load(&sources).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref k) if k == "domain"));
    }

    #[test]
    fn test_layer_precedence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stagehand.toml");
        fs::write(&path, "http_port = 8000\nhttps_port = 8443\nretry_attempts = 5\n").unwrap();

        let mut overrides = required_overrides();
        overrides.push(("retry_attempts".into(), "7".into()));
        let sources = ConfigSources {
            file: Some(path),
            env: vec![
                ("STAGEHAND_HTTP_PORT".into(), "8001".into()),
                ("STAGEHAND_RETRY_ATTEMPTS".into(), "6".into()),
            ],
            overrides,
        };

        let config = ConfigStore::load(&sources).unwrap();
        // file < env
        assert_eq!(config.http_port, 8001);
        // file only
        assert_eq!(config.https_port, 8443);
        // file < env < cli
        assert_eq!(config.retry_attempts, 7);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stagehand.toml");
        fs::write(&path, "htp_port = 8000\n").unwrap();

        let sources = ConfigSources {
            file: Some(path),
            overrides: required_overrides(),
            ..Default::default()
        };
        let err = ConfigStore::load(&sources).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { ref key, .. } if key == "htp_port"));
    }

    #[test]
    fn test_unknown_cli_key_rejected() {
        let mut overrides = required_overrides();
        overrides.push(("verbosity".into(), "3".into()));
        let sources = ConfigSources {
            overrides,
            ..Default::default()
        };
        assert!(matches!(
            ConfigStore::load(&sources),
            Err(ConfigError::UnknownKey { .. })
        ));
    }

    #[test]
    fn test_weak_password_reports_rule() {
        let mut overrides = required_overrides();
        overrides.push(("admin_password".into(), "alllowercase123!".into()));
        let sources = ConfigSources {
            overrides,
            ..Default::default()
        };
        match ConfigStore::load(&sources) {
            Err(ConfigError::WeakPassword { key, reason }) => {
                assert_eq!(key, "admin_password");
                assert!(reason.contains("uppercase"));
            }
            other => panic!("expected WeakPassword, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_port() {
        let mut overrides = required_overrides();
        overrides.push(("http_port".into(), "70000".into()));
        let sources = ConfigSources {
            overrides,
            ..Default::default()
        };
        assert!(matches!(
            ConfigStore::load(&sources),
            Err(ConfigError::OutOfRange { value: 70000, .. })
        ));
    }

    #[test]
    fn test_document_type_mismatch_names_file_layer() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stagehand.toml");
        fs::write(&path, "enable_tls = \"sometimes\"\n").unwrap();

        let sources = ConfigSources {
            file: Some(path),
            overrides: required_overrides(),
            ..Default::default()
        };
        let err = ConfigStore::load(&sources).unwrap_err();
        assert!(err.to_string().contains("file "));
    }

    #[test]
    fn test_every_setting_maps_to_configuration_field() {
        // Defaults plus required values must deserialize; a schema key with no
        // struct field would be rejected by deny_unknown_fields.
        let sources = ConfigSources {
            overrides: required_overrides(),
            ..Default::default()
        };
        assert!(ConfigStore::load(&sources).is_ok());
        assert_eq!(SETTINGS.len(), 17);
    }
}
