use std::path::PathBuf;
use std::time::Duration;
use warden_core::debounce::{
    DebounceConfig, DEFAULT_KNOWN_COOLDOWN, DEFAULT_MATCH_THRESHOLD, DEFAULT_UNKNOWN_COOLDOWN,
};

const DEFAULT_RETENTION_DAYS: u32 = 7;
const DEFAULT_TICK_INTERVAL_MS: u64 = 30;
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Engine configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Path to the SQLite audit ledger.
    pub db_path: PathBuf,
    /// Maximum match distance for a face to count as known.
    pub match_threshold: f32,
    /// Cooldown between two emitted events for the same subject.
    pub known_cooldown: Duration,
    /// Cooldown between two emitted unknown-face events.
    pub unknown_cooldown: Duration,
    /// Default trailing window for statistics and export, in days.
    pub ledger_retention_days: u32,
    /// Delay between two frame-processing ticks.
    pub tick_interval: Duration,
}

impl Config {
    /// Load configuration from `WARDEN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("warden");

        let db_path = lookup("WARDEN_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("audit.db"));

        let config = Self {
            db_path,
            match_threshold: parse_or(&lookup, "WARDEN_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD)
                .filter(|t: &f32| t.is_finite())
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            known_cooldown: cooldown(&lookup, "WARDEN_KNOWN_COOLDOWN_SECS", DEFAULT_KNOWN_COOLDOWN),
            unknown_cooldown: cooldown(
                &lookup,
                "WARDEN_UNKNOWN_COOLDOWN_SECS",
                DEFAULT_UNKNOWN_COOLDOWN,
            ),
            ledger_retention_days: parse_or(
                &lookup,
                "WARDEN_LEDGER_RETENTION_DAYS",
                DEFAULT_RETENTION_DAYS,
            )
            .unwrap_or(DEFAULT_RETENTION_DAYS),
            tick_interval: Duration::from_millis(
                parse_or(&lookup, "WARDEN_TICK_INTERVAL_MS", DEFAULT_TICK_INTERVAL_MS)
                    .unwrap_or(DEFAULT_TICK_INTERVAL_MS),
            ),
        };

        if config.unknown_cooldown < config.known_cooldown {
            tracing::warn!(
                known = ?config.known_cooldown,
                unknown = ?config.unknown_cooldown,
                "unknown-face cooldown is shorter than known-face cooldown"
            );
        }
        config
    }

    pub fn debounce(&self) -> DebounceConfig {
        DebounceConfig {
            match_threshold: self.match_threshold,
            known_cooldown: self.known_cooldown,
            unknown_cooldown: self.unknown_cooldown,
        }
    }

    /// Default window for statistics and export.
    pub fn retention_window(&self) -> Duration {
        days(self.ledger_retention_days)
    }
}

/// Whole days as a duration.
pub fn days(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * SECS_PER_DAY)
}

/// Parsed value, or `Some(default)` when the key is unset. `None` only when
/// the key is set but unparsable, so callers can fall back explicitly.
fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Option<T> {
    match lookup(key) {
        None => Some(default),
        Some(raw) => {
            let parsed = raw.trim().parse().ok();
            if parsed.is_none() {
                tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            }
            parsed
        }
    }
}

/// Non-negative, finite seconds as a duration.
fn cooldown(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    parse_or(lookup, key, default.as_secs_f64())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[("HOME", "/home/op")]);
        assert_eq!(c.match_threshold, 0.6);
        assert_eq!(c.known_cooldown, Duration::from_secs(3));
        assert_eq!(c.unknown_cooldown, Duration::from_secs(5));
        assert_eq!(c.ledger_retention_days, 7);
        assert_eq!(c.tick_interval, Duration::from_millis(30));
        assert_eq!(c.db_path, PathBuf::from("/home/op/.local/share/warden/audit.db"));
        assert_eq!(c.retention_window(), Duration::from_secs(7 * 86_400));
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("XDG_DATA_HOME", "/data"),
            ("WARDEN_MATCH_THRESHOLD", "0.45"),
            ("WARDEN_KNOWN_COOLDOWN_SECS", "1.5"),
            ("WARDEN_UNKNOWN_COOLDOWN_SECS", "10"),
            ("WARDEN_LEDGER_RETENTION_DAYS", "30"),
            ("WARDEN_TICK_INTERVAL_MS", "100"),
        ]);
        assert_eq!(c.db_path, PathBuf::from("/data/warden/audit.db"));
        assert_eq!(c.match_threshold, 0.45);
        assert_eq!(c.known_cooldown, Duration::from_millis(1500));
        assert_eq!(c.unknown_cooldown, Duration::from_secs(10));
        assert_eq!(c.ledger_retention_days, 30);
        assert_eq!(c.debounce().known_cooldown, Duration::from_millis(1500));

        let explicit = config(&[("WARDEN_DB_PATH", "/var/lib/warden.db")]);
        assert_eq!(explicit.db_path, PathBuf::from("/var/lib/warden.db"));
    }

    #[rstest]
    #[case("WARDEN_MATCH_THRESHOLD", "NaN")]
    #[case("WARDEN_MATCH_THRESHOLD", "close")]
    #[case("WARDEN_KNOWN_COOLDOWN_SECS", "-2")]
    #[case("WARDEN_UNKNOWN_COOLDOWN_SECS", "soon")]
    #[case("WARDEN_LEDGER_RETENTION_DAYS", "-1")]
    #[case("WARDEN_TICK_INTERVAL_MS", "1.5")]
    fn test_invalid_value_falls_back(#[case] key: &str, #[case] value: &str) {
        assert_eq!(config(&[(key, value)]), config(&[]));
    }

    #[test]
    fn test_unknown_shorter_than_known_is_kept() {
        let c = config(&[
            ("WARDEN_KNOWN_COOLDOWN_SECS", "4"),
            ("WARDEN_UNKNOWN_COOLDOWN_SECS", "1"),
        ]);
        assert_eq!(c.unknown_cooldown, Duration::from_secs(1));
    }
}
