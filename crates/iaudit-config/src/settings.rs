use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// Resolved configuration for the aggregator and verifier binaries. *Where*
/// these values come from (secret manager, cloud metadata, a `.env` file) is
/// out of scope; this struct only holds the resolved result.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Identifies which deployment raw notifications are attributed to.
    pub deployment: String,
    pub database_url: String,
    pub amqp_url: String,
    /// Durable topic exchange verified exists are republished to.
    pub publish_exchange: String,
    /// Routing keys to publish to. Empty means "use the original envelope's
    /// routing key" (§4.I default).
    pub publish_routing_keys: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Settings {
            deployment: env_or("IAUDIT_DEPLOYMENT", "default"),
            database_url: require_env("IAUDIT_DATABASE_URL")?,
            amqp_url: env_or("IAUDIT_AMQP_URL", "amqp://127.0.0.1:5672/%2f"),
            publish_exchange: env_or("IAUDIT_PUBLISH_EXCHANGE", "monitor"),
            publish_routing_keys: env::var("IAUDIT_PUBLISH_ROUTING_KEYS")
                .ok()
                .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }
}

/// Verifier CLI tick/settle parameters, kept separate from `Settings` since
/// they're also settable from CLI flags (§6) which take precedence over env.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleUnits {
    Seconds,
    Minutes,
    Hours,
}

impl SettleUnits {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s {
            "seconds" => Ok(SettleUnits::Seconds),
            "minutes" => Ok(SettleUnits::Minutes),
            "hours" => Ok(SettleUnits::Hours),
            other => Err(ConfigError::InvalidVar {
                var: "settle_units".into(),
                message: format!("unrecognized unit '{other}', expected seconds|minutes|hours"),
            }),
        }
    }

    pub fn to_duration(self, amount: i64) -> Duration {
        let secs = match self {
            SettleUnits::Seconds => amount,
            SettleUnits::Minutes => amount * 60,
            SettleUnits::Hours => amount * 3600,
        };
        Duration::from_secs(secs.max(0) as u64)
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVar(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settle_units_converts_minutes_to_seconds() {
        assert_eq!(SettleUnits::Minutes.to_duration(10), Duration::from_secs(600));
    }

    #[test]
    fn settle_units_converts_hours_to_seconds() {
        assert_eq!(SettleUnits::Hours.to_duration(2), Duration::from_secs(7200));
    }

    #[test]
    fn settle_units_rejects_unknown_unit() {
        assert!(SettleUnits::parse("fortnights").is_err());
    }
}
