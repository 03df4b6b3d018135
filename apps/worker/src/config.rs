use std::time::Duration;

use chrono_tz::Tz;
use ledgerkeep_core::settings::{Environment, LedgerSettings, QueueSettings};
use ledgerkeep_core::{Error, Result};

pub struct Config {
    pub db_path: String,
    pub environment: Environment,
    pub queue_max_batch_size: usize,
    /// Zero disables the debounce timer.
    pub queue_max_delay: Duration,
    pub allow_reallocation_in_production: bool,
    pub sweep_interval: Duration,
    pub timezone: Tz,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads every setting through `lookup`; missing keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("LEDGER_DB_PATH").unwrap_or_else(|| "./db/ledger.db".into());
        let environment = lookup("LEDGER_ENVIRONMENT")
            .map(|value| value.parse::<Environment>())
            .transpose()?
            .unwrap_or_default();
        let queue_max_batch_size = parse_or(&lookup, "LEDGER_QUEUE_MAX_BATCH_SIZE", 100usize)?;
        let max_delay_ms = parse_or(&lookup, "LEDGER_QUEUE_MAX_DELAY_MS", 10_000u64)?;
        let allow_reallocation_in_production =
            parse_or(&lookup, "LEDGER_ALLOW_REALLOCATION_IN_PRODUCTION", false)?;
        let sweep_secs = parse_or(&lookup, "LEDGER_SWEEP_INTERVAL_SECS", 3600u64)?;
        if sweep_secs == 0 {
            return Err(Error::InvalidConfigValue(
                "LEDGER_SWEEP_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }
        let timezone = lookup("LEDGER_TIMEZONE")
            .map(|value| {
                value.trim().parse::<Tz>().map_err(|_| {
                    Error::InvalidConfigValue(format!("LEDGER_TIMEZONE: unknown timezone '{}'", value))
                })
            })
            .transpose()?
            .unwrap_or(chrono_tz::Europe::Brussels);

        let config = Self {
            db_path,
            environment,
            queue_max_batch_size,
            queue_max_delay: Duration::from_millis(max_delay_ms),
            allow_reallocation_in_production,
            sweep_interval: Duration::from_secs(sweep_secs),
            timezone,
        };
        config.queue_settings().validate()?;
        Ok(config)
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            max_batch_size: self.queue_max_batch_size,
            max_delay: (!self.queue_max_delay.is_zero()).then_some(self.queue_max_delay),
        }
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        let mut settings = LedgerSettings::new(self.environment)
            .with_queues(self.queue_settings())
            .allow_reallocation_in_production(self.allow_reallocation_in_production);
        settings.timezone = self.timezone;
        settings
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| Error::InvalidConfigValue(format!("{}: cannot parse '{}'", key, raw))),
    }
}
