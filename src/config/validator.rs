//! Config validation: password policy, value syntax, ranges and conflicts.

use crate::config::{Layer, SettingKind};
use crate::error::ConfigError;
use crate::models::Configuration;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Characters accepted by the special-character rule of the password policy.
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*()-_=+[]{};:,.<>?/~";

/// Minimum password length, counted in characters.
pub const MIN_PASSWORD_LENGTH: usize = 12;

static HOSTNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*$")
        .expect("hostname regex is valid")
});

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+$")
        .expect("email regex is valid")
});

static ACCOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("account regex is valid"));

/// A single rule of the password policy, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordRule {
    MinLength,
    Uppercase,
    Lowercase,
    Digit,
    Special,
}

impl fmt::Display for PasswordRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordRule::MinLength => write!(
                f,
                "must be at least {} characters long",
                MIN_PASSWORD_LENGTH
            ),
            PasswordRule::Uppercase => f.write_str("must contain at least one uppercase letter"),
            PasswordRule::Lowercase => f.write_str("must contain at least one lowercase letter"),
            PasswordRule::Digit => f.write_str("must contain at least one digit"),
            PasswordRule::Special => write!(
                f,
                "must contain at least one special character from {}",
                SPECIAL_CHARACTERS
            ),
        }
    }
}

/// Check a candidate secret against the password policy.
///
/// Returns the first unmet rule so callers can report actionable feedback.
pub fn check_password(candidate: &str) -> Result<(), PasswordRule> {
    if candidate.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(PasswordRule::MinLength);
    }
    if !candidate.chars().any(|c| c.is_uppercase()) {
        return Err(PasswordRule::Uppercase);
    }
    if !candidate.chars().any(|c| c.is_lowercase()) {
        return Err(PasswordRule::Lowercase);
    }
    if !candidate.chars().any(|c| c.is_ascii_digit()) {
        return Err(PasswordRule::Digit);
    }
    if !candidate.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
        return Err(PasswordRule::Special);
    }
    Ok(())
}

/// Validate one merged value against its schema kind.
///
/// `layer` names where the value came from, for error messages.
pub fn validate_value(
    key: &str,
    kind: SettingKind,
    value: &toml::Value,
    layer: &Layer,
) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        key: key.to_string(),
        layer: layer.to_string(),
        reason,
    };

    match kind {
        SettingKind::Integer { min, max } => {
            let n = value
                .as_integer()
                .ok_or_else(|| invalid("expected an integer".to_string()))?;
            if n < min || n > max {
                return Err(ConfigError::OutOfRange {
                    key: key.to_string(),
                    value: n,
                    min,
                    max,
                });
            }
        }
        SettingKind::Flag => {
            value
                .as_bool()
                .ok_or_else(|| invalid("expected true or false".to_string()))?;
        }
        SettingKind::Choice(options) => {
            let s = value
                .as_str()
                .ok_or_else(|| invalid("expected a string".to_string()))?;
            if !options.contains(&s) {
                return Err(invalid(format!(
                    "'{}' is not one of: {}",
                    s,
                    options.join(", ")
                )));
            }
        }
        SettingKind::Secret => {
            let s = value
                .as_str()
                .ok_or_else(|| invalid("expected a string".to_string()))?;
            check_password(s).map_err(|rule| ConfigError::WeakPassword {
                key: key.to_string(),
                reason: rule.to_string(),
            })?;
        }
        SettingKind::Path => {
            let s = value
                .as_str()
                .ok_or_else(|| invalid("expected a path string".to_string()))?;
            if !s.starts_with('/') {
                return Err(invalid(format!("'{}' must be an absolute path", s)));
            }
        }
        SettingKind::Hostname => {
            let s = value
                .as_str()
                .ok_or_else(|| invalid("expected a string".to_string()))?;
            if s.len() > 253 || !HOSTNAME_RE.is_match(s) {
                return Err(invalid(format!("'{}' is not a valid hostname", s)));
            }
        }
        SettingKind::Email => {
            let s = value
                .as_str()
                .ok_or_else(|| invalid("expected a string".to_string()))?;
            if !EMAIL_RE.is_match(s) {
                return Err(invalid(format!("'{}' is not a valid email address", s)));
            }
        }
        SettingKind::Account => {
            let s = value
                .as_str()
                .ok_or_else(|| invalid("expected a string".to_string()))?;
            if !ACCOUNT_RE.is_match(s) {
                return Err(invalid(format!(
                    "'{}' is not a valid system account name",
                    s
                )));
            }
        }
    }

    Ok(())
}

/// Detect cross-field conflicts on an otherwise valid configuration.
///
/// The two ports must differ even with TLS disabled: both are rendered into
/// the service environment and the container stack publishes both.
pub fn detect_conflicts(config: &Configuration) -> Result<(), ConfigError> {
    if config.http_port == config.https_port {
        return Err(ConfigError::ConflictDetected(format!(
            "http_port and https_port are both {}",
            config.http_port
        )));
    }

    if config.admin_password == config.database_password {
        return Err(ConfigError::ConflictDetected(
            "admin_password and database_password must differ".to_string(),
        ));
    }

    Ok(())
}
