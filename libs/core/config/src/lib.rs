pub mod server;
pub mod tracing;

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },

    #[error("Invalid configuration for '{key}': {details}")]
    Invalid { key: String, details: String },
}

/// Application environment (dev = local/kind, prod = full k8s)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Helper to load and parse environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load and parse environment variable or return error.
///
/// Empty values are treated the same as unset ones.
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

/// Parse an optional environment variable into `T`, falling back to `default`
/// when the variable is unset.
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Read an optional environment variable, treating empty values as unset
pub fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Development);
            assert!(env.is_development());
            assert!(!env.is_production());
        });
    }

    #[test]
    fn test_environment_production_case_insensitive() {
        temp_env::with_var("APP_ENV", Some("PRODUCTION"), || {
            assert_eq!(Environment::from_env(), Environment::Production);
        });

        temp_env::with_var("APP_ENV", Some("staging"), || {
            assert_eq!(Environment::from_env(), Environment::Development);
        });
    }

    #[test]
    fn test_env_required_rejects_empty_values() {
        temp_env::with_var("PRICE_TEST_REQUIRED", Some("  "), || {
            let err = env_required("PRICE_TEST_REQUIRED").unwrap_err();
            assert!(err.to_string().contains("PRICE_TEST_REQUIRED"));
        });

        temp_env::with_var("PRICE_TEST_REQUIRED", Some("value"), || {
            assert_eq!(env_required("PRICE_TEST_REQUIRED").unwrap(), "value");
        });
    }

    #[test]
    fn test_env_parse_uses_default_when_unset() {
        temp_env::with_var_unset("PRICE_TEST_LIMIT", || {
            let limit: usize = env_parse("PRICE_TEST_LIMIT", 10).unwrap();
            assert_eq!(limit, 10);
        });
    }

    #[test]
    fn test_env_parse_reports_key_on_failure() {
        temp_env::with_var("PRICE_TEST_LIMIT", Some("ten"), || {
            let err = env_parse::<usize>("PRICE_TEST_LIMIT", 10).unwrap_err();
            assert!(err.to_string().contains("PRICE_TEST_LIMIT"));
        });

        temp_env::with_var("PRICE_TEST_FLAG", Some(" false "), || {
            assert!(!env_parse("PRICE_TEST_FLAG", true).unwrap());
        });
    }

    #[test]
    fn test_env_optional_filters_empty() {
        temp_env::with_var("PRICE_TEST_OPTIONAL", Some(""), || {
            assert_eq!(env_optional("PRICE_TEST_OPTIONAL"), None);
        });
        temp_env::with_var("PRICE_TEST_OPTIONAL", Some("/tmp/seed.json"), || {
            assert_eq!(
                env_optional("PRICE_TEST_OPTIONAL").as_deref(),
                Some("/tmp/seed.json")
            );
        });
    }
}
