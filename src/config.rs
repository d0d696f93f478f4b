use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{anyhow, Context};
use log::{info, warn};

use crate::attendance::DEFAULT_LATE_THRESHOLD;
use crate::auth::DEFAULT_SESSION_DAYS;
use crate::clock::WallTime;
use crate::credentials::DEFAULT_HASH_ROUNDS;

pub const MAX_SESSION_DAYS: i64 = 365;
/// One week.
pub const MAX_PURGE_MINUTES: u64 = 7 * 24 * 60;

pub struct Config {
    pub addr: SocketAddr,
    pub database_url: Option<String>,
    pub token_secret: Option<String>,
    pub session_days: i64,
    pub late_threshold: WallTime,
    pub hash_rounds: u32,
    pub admin_password: String,
    pub purge_minutes: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("addr", &self.addr)
            .field("database", &self.database_url.is_some())
            .field("session_days", &self.session_days)
            .field("late_threshold", &self.late_threshold)
            .field("hash_rounds", &self.hash_rounds)
            .field("purge_minutes", &self.purge_minutes)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            addr: try_load(&lookup, "ROLLCALL_ADDR", "127.0.0.1:3000")?,
            database_url: optional(&lookup, "DATABASE_URL"),
            token_secret: optional(&lookup, "ROLLCALL_TOKEN_SECRET"),
            session_days: try_load(&lookup, "ROLLCALL_SESSION_DAYS", &DEFAULT_SESSION_DAYS.to_string())?,
            late_threshold: try_load(&lookup, "ROLLCALL_LATE_THRESHOLD", DEFAULT_LATE_THRESHOLD)?,
            hash_rounds: try_load(&lookup, "ROLLCALL_HASH_ROUNDS", &DEFAULT_HASH_ROUNDS.to_string())?,
            admin_password: try_load(&lookup, "ROLLCALL_ADMIN_PASSWORD", "admin123")?,
            purge_minutes: try_load(&lookup, "ROLLCALL_PURGE_MINUTES", "60")?,
        };

        if !(1..=MAX_SESSION_DAYS).contains(&config.session_days) {
            return Err(anyhow!(
                "ROLLCALL_SESSION_DAYS must be between 1 and {MAX_SESSION_DAYS}"
            ));
        }
        if config.purge_minutes > MAX_PURGE_MINUTES {
            return Err(anyhow!(
                "ROLLCALL_PURGE_MINUTES must be at most {MAX_PURGE_MINUTES}"
            ));
        }
        if config.hash_rounds == 0 {
            return Err(anyhow!("ROLLCALL_HASH_ROUNDS must be positive"));
        }
        Ok(config)
    }
}

fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).filter(|v| !v.trim().is_empty());
    if value.is_none() {
        warn!("Environment variable {key} not found");
    }
    value
}

fn try_load<F, T>(lookup: &F, key: &str, default: &str) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.trim()
        .parse()
        .map_err(|e| anyhow!("{e}"))
        .with_context(|| format!("Invalid {key} value"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.addr, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(config.session_days, 7);
        assert_eq!(config.late_threshold.to_string(), "08:00");
        assert_eq!(config.hash_rounds, DEFAULT_HASH_ROUNDS);
        assert!(config.database_url.is_none());
        assert!(config.token_secret.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("ROLLCALL_ADDR", "0.0.0.0:8080"),
            ("ROLLCALL_LATE_THRESHOLD", "07:30"),
            ("DATABASE_URL", "postgres://localhost/rollcall"),
            ("ROLLCALL_PURGE_MINUTES", "0"),
        ]))
        .unwrap();
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.late_threshold.to_string(), "07:30");
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/rollcall"));
        assert_eq!(config.purge_minutes, 0);
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(Config::from_lookup(lookup(&[("ROLLCALL_LATE_THRESHOLD", "8am")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ROLLCALL_SESSION_DAYS", "0")])).is_err());
    }

    #[test]
    fn oversized_durations_are_rejected() {
        assert!(Config::from_lookup(lookup(&[("ROLLCALL_SESSION_DAYS", "9223372036854775807")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ROLLCALL_SESSION_DAYS", "366")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ROLLCALL_PURGE_MINUTES", "18446744073709551615")])).is_err());
        assert!(Config::from_lookup(lookup(&[("ROLLCALL_PURGE_MINUTES", "10081")])).is_err());

        let config = Config::from_lookup(lookup(&[
            ("ROLLCALL_SESSION_DAYS", "365"),
            ("ROLLCALL_PURGE_MINUTES", "10080"),
        ]))
        .unwrap();
        assert_eq!(config.session_days, MAX_SESSION_DAYS);
        assert_eq!(config.purge_minutes, MAX_PURGE_MINUTES);
    }
}
