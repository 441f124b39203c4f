//! Runtime settings read from `CASHBOOK_*` environment variables.

use std::path::PathBuf;

use chrono::{FixedOffset, Local, Offset};
use thiserror::Error;

use crate::period::WeekStart;

pub const DEFAULT_DB_PATH: &str = "cashbook.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_addr: String,
    pub week_start: WeekStart,
    /// Zone that calendar windows are evaluated in.
    pub utc_offset: FixedOffset,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DB_PATH),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            week_start: WeekStart::default(),
            utc_offset: Local::now().offset().fix(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unset keys keep their defaults;
    /// set-but-invalid keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(path) = lookup("CASHBOOK_DB") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(addr) = lookup("CASHBOOK_BIND") {
            config.bind_addr = addr;
        }
        if let Some(raw) = lookup("CASHBOOK_WEEK_START") {
            config.week_start = raw.parse().map_err(|e: crate::period::UnknownWeekStart| {
                ConfigError::Invalid {
                    var: "CASHBOOK_WEEK_START",
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(raw) = lookup("CASHBOOK_UTC_OFFSET") {
            config.utc_offset = parse_utc_offset(&raw).ok_or_else(|| ConfigError::Invalid {
                var: "CASHBOOK_UTC_OFFSET",
                reason: format!("expected +HH:MM or -HH:MM, got '{raw}'"),
            })?;
        }

        Ok(config)
    }
}

/// Parses `Z`, `+HH:MM`, `-HH:MM` or `±HHMM`.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(config.week_start, WeekStart::Sunday);
    }

    #[test]
    fn test_reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("CASHBOOK_DB", "/tmp/ledger.db"),
            ("CASHBOOK_BIND", "127.0.0.1:8080"),
            ("CASHBOOK_WEEK_START", "Monday"),
            ("CASHBOOK_UTC_OFFSET", "-05:00"),
        ]))
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/ledger.db"));
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.week_start, WeekStart::Monday);
        assert_eq!(config.utc_offset, FixedOffset::west_opt(5 * 3600).unwrap());
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let err = Config::from_lookup(lookup(&[("CASHBOOK_WEEK_START", "friday")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "CASHBOOK_WEEK_START", .. }));

        let err = Config::from_lookup(lookup(&[("CASHBOOK_UTC_OFFSET", "5")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "CASHBOOK_UTC_OFFSET", .. }));
    }

    #[test]
    fn test_parse_utc_offset_forms() {
        assert_eq!(parse_utc_offset("Z"), FixedOffset::east_opt(0));
        assert_eq!(parse_utc_offset("+0530"), FixedOffset::east_opt(5 * 3600 + 1800));
        assert_eq!(parse_utc_offset("+09:00"), FixedOffset::east_opt(9 * 3600));
        assert_eq!(parse_utc_offset("-03:30"), FixedOffset::west_opt(3 * 3600 + 1800));
        assert_eq!(parse_utc_offset("+25:00"), None);
        assert_eq!(parse_utc_offset("+05:75"), None);
        assert_eq!(parse_utc_offset(""), None);
    }
}
