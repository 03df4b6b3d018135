//! Runtime settings for queues and reallocation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_DELAY};
use crate::errors::{Error, Result};

/// Deployment environment the engine runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Test,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(Error::InvalidConfigValue(format!(
                "unknown environment '{}'",
                other
            ))),
        }
    }
}

/// Batching limits shared by every throttled queue of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_batch_size: usize,
    /// `None` disables the debounce timer; the queue then only flushes on size or on demand.
    pub max_delay: Option<Duration>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_delay: Some(DEFAULT_MAX_DELAY),
        }
    }
}

impl QueueSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfigValue(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Kill-switch for the reallocation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReallocationSettings {
    pub environment: Environment,
    /// Explicit opt-in required before reallocation may run in production.
    pub allow_in_production: bool,
}

impl ReallocationSettings {
    /// Returns whether reallocation may run in the configured environment.
    pub fn is_enabled(&self) -> bool {
        self.environment != Environment::Production || self.allow_in_production
    }
}

/// All engine settings, built once at boot.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub environment: Environment,
    pub queues: QueueSettings,
    pub reallocation: ReallocationSettings,
    /// Timezone used to compute the due offset of cached balances.
    pub timezone: Tz,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            queues: QueueSettings::default(),
            reallocation: ReallocationSettings::default(),
            timezone: chrono_tz::Europe::Brussels,
        }
    }
}

impl LedgerSettings {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            reallocation: ReallocationSettings {
                environment,
                allow_in_production: false,
            },
            ..Self::default()
        }
    }

    pub fn with_queues(mut self, queues: QueueSettings) -> Self {
        self.queues = queues;
        self
    }

    pub fn allow_reallocation_in_production(mut self, allow: bool) -> Self {
        self.reallocation.allow_in_production = allow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert_eq!(" Dev ".parse::<Environment>().unwrap(), Environment::Development);
        assert!("moon".parse::<Environment>().is_err());
    }

    #[test]
    fn test_reallocation_gate() {
        let settings = LedgerSettings::new(Environment::Production);
        assert!(!settings.reallocation.is_enabled());

        let settings = settings.allow_reallocation_in_production(true);
        assert!(settings.reallocation.is_enabled());

        assert!(LedgerSettings::new(Environment::Staging)
            .reallocation
            .is_enabled());
    }

    #[test]
    fn test_queue_settings_reject_zero_batch() {
        let settings = QueueSettings {
            max_batch_size: 0,
            max_delay: None,
        };
        assert!(settings.validate().is_err());
        assert!(QueueSettings::default().validate().is_ok());
    }
}
