//! Config layer readers: TOML document, environment variables, CLI overrides.

use crate::config::{lookup_setting, Layer, SettingKind, ENV_PREFIX};
use crate::error::ConfigError;
use std::fs;
use std::path::Path;

/// Read and parse the declarative configuration document.
pub fn read_config_file(path: &Path) -> Result<toml::Table, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(path.display().to_string())
        } else {
            ConfigError::IoError(e)
        }
    })?;

    content
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::InvalidToml {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Select prefixed variables and map them to schema keys.
///
/// `STAGEHAND_HTTP_PORT=8080` becomes `("http_port", "8080")`. A prefixed
/// variable that names no known key is an error, not silently ignored.
pub fn environment_overrides<I>(vars: I) -> Result<Vec<(String, String)>, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut overrides = Vec::new();
    for (name, value) in vars {
        let Some(suffix) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let key = suffix.to_ascii_lowercase();
        if lookup_setting(&key).is_none() {
            return Err(ConfigError::UnknownKey {
                key: name,
                layer: Layer::Environment.to_string(),
            });
        }
        overrides.push((key, value));
    }
    // Deterministic order regardless of process environment ordering
    overrides.sort();
    Ok(overrides)
}

/// Parse a `key=value` CLI override.
pub fn parse_override(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in override '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Convert a string-typed value (env or CLI) into the schema's TOML type.
pub fn coerce(key: &str, kind: SettingKind, raw: &str, layer: &Layer) -> Result<toml::Value, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        key: key.to_string(),
        layer: layer.to_string(),
        reason,
    };

    match kind {
        SettingKind::Integer { .. } => raw
            .trim()
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|_| invalid(format!("'{}' is not an integer", raw))),
        SettingKind::Flag => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(toml::Value::Boolean(true)),
            "false" | "no" | "0" | "off" => Ok(toml::Value::Boolean(false)),
            _ => Err(invalid(format!("'{}' is not a boolean", raw))),
        },
        // Secrets are taken verbatim; surrounding whitespace may be intentional
        SettingKind::Secret => Ok(toml::Value::String(raw.to_string())),
        _ => Ok(toml::Value::String(raw.trim().to_string())),
    }
}

/// Check that a value from the TOML document has the schema's TOML type.
pub fn check_document_type(key: &str, kind: SettingKind, value: &toml::Value, layer: &Layer) -> Result<(), ConfigError> {
    let matches = match kind {
        SettingKind::Integer { .. } => value.is_integer(),
        SettingKind::Flag => value.is_bool(),
        _ => value.is_str(),
    };
    if matches {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            layer: layer.to_string(),
            reason: format!("expected {}, found {}", kind.describe(), value.type_str()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_read_config_file_missing() {
        let result = read_config_file(Path::new("/nonexistent/stagehand.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_read_config_file_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"domain = = \"x\"").unwrap();

        let result = read_config_file(&path);
        assert!(matches!(result, Err(ConfigError::InvalidToml { .. })));
    }

    #[test]
    fn test_environment_overrides_maps_prefixed_keys() {
        let vars = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("STAGEHAND_HTTP_PORT".to_string(), "8080".to_string()),
            ("STAGEHAND_DOMAIN".to_string(), "a.example.com".to_string()),
        ];
        let overrides = environment_overrides(vars).unwrap();
        assert_eq!(
            overrides,
            vec![
                ("domain".to_string(), "a.example.com".to_string()),
                ("http_port".to_string(), "8080".to_string()),
            ]
        );
    }

    #[test]
    fn test_environment_overrides_rejects_unknown_key() {
        let vars = vec![("STAGEHAND_COLOUR".to_string(), "blue".to_string())];
        let err = environment_overrides(vars).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { ref key, .. } if key == "STAGEHAND_COLOUR"));
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(
            parse_override("http_port=8080").unwrap(),
            ("http_port".to_string(), "8080".to_string())
        );
        // Only the first '=' splits; values may contain '='
        assert_eq!(
            parse_override("admin_password=Ab1!Ab1!Ab1!==").unwrap().1,
            "Ab1!Ab1!Ab1!=="
        );
        assert!(parse_override("no-equals").is_err());
        assert!(parse_override("=value").is_err());
    }

    #[test]
    fn test_coerce_by_kind() {
        let layer = Layer::Cli;
        assert_eq!(
            coerce("http_port", SettingKind::Integer { min: 1, max: 65535 }, "8080", &layer).unwrap(),
            toml::Value::Integer(8080)
        );
        assert_eq!(
            coerce("enable_tls", SettingKind::Flag, "no", &layer).unwrap(),
            toml::Value::Boolean(false)
        );
        // Numeric-looking secrets stay strings
        assert_eq!(
            coerce("admin_password", SettingKind::Secret, "123456789012", &layer).unwrap(),
            toml::Value::String("123456789012".to_string())
        );
        assert!(coerce("http_port", SettingKind::Integer { min: 1, max: 65535 }, "eighty", &layer).is_err());
    }

    #[test]
    fn test_check_document_type_mismatch() {
        let err = check_document_type(
            "http_port",
            SettingKind::Integer { min: 1, max: 65535 },
            &toml::Value::String("80".into()),
            &Layer::Defaults,
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected an integer"));
    }
}
