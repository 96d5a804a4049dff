use crate::errors::{NotificationError, NotificationResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const KEY_LOG_LEVEL: &str = "LOG_LEVEL";
const KEY_ENABLE_PUSH: &str = "ENABLE_PUSH_NOTIFICATIONS";
const KEY_TOPIC_ENDPOINT: &str = "TOPIC_ENDPOINT";
const KEY_TOPIC_AUTHORIZATION: &str = "TOPIC_AUTHORIZATION";
const KEY_TOPIC_TIMEOUT_SECS: &str = "TOPIC_TIMEOUT_SECS";
const KEY_STORE_PATH: &str = "STORE_PATH";

const ENV_SELECTOR: &str = "SILICA_NOTIFICATIONS_ENV";
const ENV_MAPPINGS: [(&str, &str); 6] = [
    ("SILICA_LOG_LEVEL", KEY_LOG_LEVEL),
    ("SILICA_ENABLE_PUSH", KEY_ENABLE_PUSH),
    ("SILICA_TOPIC_ENDPOINT", KEY_TOPIC_ENDPOINT),
    ("SILICA_TOPIC_AUTHORIZATION", KEY_TOPIC_AUTHORIZATION),
    ("SILICA_TOPIC_TIMEOUT_SECS", KEY_TOPIC_TIMEOUT_SECS),
    ("SILICA_NOTIFICATIONS_STORE", KEY_STORE_PATH),
];

/// Deployment environment; selects configuration defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" | "testing" => Environment::Test,
            _ => Environment::Development,
        }
    }
}

/// Notification subsystem configuration
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    environment: Environment,
    config_map: HashMap<String, String>,
}

impl NotificationConfig {
    /// Defaults for `environment` without environment-variable overrides.
    pub fn new(environment: Environment) -> Self {
        let mut config = NotificationConfig {
            environment,
            config_map: HashMap::new(),
        };
        config.load_defaults();
        config
    }

    /// Environment from `SILICA_NOTIFICATIONS_ENV`, then `SILICA_*` overrides.
    pub fn from_env() -> NotificationResult<Self> {
        let environment = std::env::var(ENV_SELECTOR)
            .map(|value| Environment::parse(&value))
            .unwrap_or(Environment::Development);
        Self::from_environment(environment)
    }

    pub fn from_environment(environment: Environment) -> NotificationResult<Self> {
        let mut config = Self::new(environment);
        let overrides = ENV_MAPPINGS
            .iter()
            .filter_map(|(var, _)| std::env::var(var).ok().map(|value| (*var, value)));
        config.apply_overrides(overrides);
        config.validate_required_configs()?;
        log::info!(
            "Notification configuration initialized for {:?} environment",
            config.environment
        );
        Ok(config)
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.config_map.get(key)
    }

    pub fn get_required(&self, key: &str) -> NotificationResult<&String> {
        self.config_map.get(key).ok_or_else(|| {
            NotificationError::ValidationError(format!("Required config key '{}' not found", key))
        })
    }

    pub fn get_bool_with_default(&self, key: &str, default: bool) -> NotificationResult<bool> {
        match self.config_map.get(key) {
            Some(value) => parse_bool_flag(value, key),
            None => Ok(default),
        }
    }

    pub fn get_u32_with_default(&self, key: &str, default: u32) -> NotificationResult<u32> {
        match self.config_map.get(key) {
            Some(value) => parse_u32_value(value, key),
            None => Ok(default),
        }
    }

    /// Set a configuration value (for testing purposes)
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.config_map.insert(key.into(), value.into());
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn push_enabled(&self) -> NotificationResult<bool> {
        self.get_bool_with_default(KEY_ENABLE_PUSH, false)
    }

    pub fn topic_endpoint(&self) -> NotificationResult<&str> {
        self.get_required(KEY_TOPIC_ENDPOINT).map(String::as_str)
    }

    pub fn topic_authorization(&self) -> Option<&str> {
        self.get(KEY_TOPIC_AUTHORIZATION).map(String::as_str)
    }

    pub fn request_timeout(&self) -> NotificationResult<Duration> {
        let seconds = self.get_u32_with_default(KEY_TOPIC_TIMEOUT_SECS, 30)?;
        Ok(Duration::from_secs(u64::from(seconds.clamp(1, 300))))
    }

    pub fn store_path(&self) -> NotificationResult<PathBuf> {
        self.get_required(KEY_STORE_PATH).map(PathBuf::from)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.get(KEY_LOG_LEVEL)
            .and_then(|level| level.parse().ok())
            .unwrap_or(log::LevelFilter::Info)
    }

    /// Checks the keys the selected environment cannot run without.
    pub fn validate_required_configs(&self) -> NotificationResult<()> {
        let mut required_keys = vec![KEY_LOG_LEVEL, KEY_ENABLE_PUSH, KEY_STORE_PATH];
        if self.push_enabled()? {
            required_keys.push(KEY_TOPIC_ENDPOINT);
        }
        if self.environment == Environment::Production && self.push_enabled()? {
            required_keys.push(KEY_TOPIC_AUTHORIZATION);
        }

        for key in required_keys {
            if !self.config_map.contains_key(key) {
                return Err(NotificationError::ValidationError(format!(
                    "Required configuration key '{}' is missing for {} environment",
                    key,
                    format!("{:?}", self.environment).to_lowercase()
                )));
            }
        }

        self.request_timeout()?;
        Ok(())
    }

    fn load_defaults(&mut self) {
        let defaults: &[(&str, &str)] = match self.environment {
            Environment::Production => &[
                (KEY_LOG_LEVEL, "INFO"),
                (KEY_ENABLE_PUSH, "true"),
                (KEY_TOPIC_ENDPOINT, "https://iid.googleapis.com"),
                (KEY_TOPIC_TIMEOUT_SECS, "30"),
                (KEY_STORE_PATH, "notifications.store"),
            ],
            Environment::Development => &[
                (KEY_LOG_LEVEL, "DEBUG"),
                (KEY_ENABLE_PUSH, "false"),
                (KEY_TOPIC_ENDPOINT, "http://localhost:8085"),
                (KEY_TOPIC_TIMEOUT_SECS, "10"),
                (KEY_STORE_PATH, "notifications.dev.store"),
            ],
            Environment::Test => &[
                (KEY_LOG_LEVEL, "WARN"),
                (KEY_ENABLE_PUSH, "false"),
                (KEY_TOPIC_TIMEOUT_SECS, "2"),
                (KEY_STORE_PATH, "notifications.test.store"),
            ],
        };

        for (key, value) in defaults {
            self.config_map.insert(key.to_string(), value.to_string());
        }
    }

    fn apply_overrides<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (&'static str, String)>,
    {
        for (env_var, value) in overrides {
            let Some((_, config_key)) = ENV_MAPPINGS.iter().find(|(var, _)| *var == env_var)
            else {
                continue;
            };

            if value.trim().is_empty() {
                log::warn!("Environment variable {} is empty", env_var);
                continue;
            }

            if value.chars().any(|c| c.is_control()) {
                log::warn!(
                    "Environment variable {} contains control characters, ignoring",
                    env_var
                );
                continue;
            }

            self.config_map.insert(config_key.to_string(), value);
            log::debug!(
                "Loaded configuration {} from environment variable {}",
                config_key,
                env_var
            );
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self::new(Environment::Development)
    }
}

fn parse_bool_flag(value: &str, key: &str) -> NotificationResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(NotificationError::ValidationError(format!(
            "Invalid boolean value '{}' for key '{}'",
            value, key
        ))),
    }
}

fn parse_u32_value(value: &str, key: &str) -> NotificationResult<u32> {
    value.trim().parse::<u32>().map_err(|_| {
        NotificationError::ValidationError(format!(
            "Invalid numeric value '{}' for key '{}'",
            value, key
        ))
    })
}
