//! Recorder Configuration Settings
//!
//! Configuration types for the market recorder, loaded from environment
//! variables. Optional values that fail to parse fall back to defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::event::EventKind;
use crate::infrastructure::pipeline::PipelineSettings;

/// Feed subscription and replay settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// Symbols to subscribe to.
    pub symbols: Vec<String>,
    /// Event kinds to subscribe to.
    pub kinds: Vec<EventKind>,
    /// Deliver the current snapshot on subscribe.
    pub first_push: bool,
    /// NDJSON file replayed as the feed.
    pub replay_path: PathBuf,
    /// Delay between replayed lines.
    pub replay_pace: Duration,
}

/// SQLite settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    /// Database file.
    pub db_path: PathBuf,
    /// Busy timeout applied to every connection.
    pub busy_timeout: Duration,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/market.db"),
            busy_timeout: Duration::from_secs(10),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { metrics_port: 9090 }
    }
}

/// Complete recorder configuration.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Feed settings.
    pub feed: FeedSettings,
    /// Storage settings.
    pub storage: StorageSettings,
    /// Pipeline tuning.
    pub pipeline: PipelineSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl RecorderConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or a
    /// pipeline bound is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`RecorderConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let symbols: Vec<String> = env
            .required("RECORDER_SYMBOLS")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if symbols.is_empty() {
            return Err(ConfigError::EmptyValue("RECORDER_SYMBOLS".to_string()));
        }

        let feed = FeedSettings {
            symbols,
            kinds: EventKind::all().to_vec(),
            first_push: env.parse_bool("RECORDER_FIRST_PUSH", true),
            replay_path: PathBuf::from(env.required("RECORDER_FEED_REPLAY_PATH")?),
            replay_pace: env.duration_millis("RECORDER_REPLAY_PACE_MS", Duration::ZERO),
        };

        let storage_defaults = StorageSettings::default();
        let storage = StorageSettings {
            db_path: env
                .get("RECORDER_DB_PATH")
                .map_or(storage_defaults.db_path, PathBuf::from),
            busy_timeout: env
                .duration_secs("RECORDER_DB_BUSY_TIMEOUT_SECS", storage_defaults.busy_timeout),
        };

        let pipeline_defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            queue_capacity: env.parse("RECORDER_QUEUE_CAPACITY", pipeline_defaults.queue_capacity),
            poll_interval: env
                .duration_millis("RECORDER_POLL_INTERVAL_MS", pipeline_defaults.poll_interval),
            records_per_connection: env.parse(
                "RECORDER_RECORDS_PER_CONNECTION",
                pipeline_defaults.records_per_connection,
            ),
            sentinel_timeout: env.duration_millis(
                "RECORDER_SENTINEL_TIMEOUT_MS",
                pipeline_defaults.sentinel_timeout,
            ),
            shutdown_timeout: env.duration_secs(
                "RECORDER_SHUTDOWN_TIMEOUT_SECS",
                pipeline_defaults.shutdown_timeout,
            ),
            cancel_grace: pipeline_defaults.cancel_grace,
        };
        let zero_bounds = [
            ("RECORDER_QUEUE_CAPACITY", pipeline.queue_capacity == 0),
            ("RECORDER_POLL_INTERVAL_MS", pipeline.poll_interval.is_zero()),
            ("RECORDER_RECORDS_PER_CONNECTION", pipeline.records_per_connection == 0),
            ("RECORDER_SHUTDOWN_TIMEOUT_SECS", pipeline.shutdown_timeout.is_zero()),
        ];
        if let Some((key, _)) = zero_bounds.into_iter().find(|(_, zero)| *zero) {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let server = ServerSettings {
            metrics_port: env.parse("RECORDER_METRICS_PORT", ServerSettings::default().metrics_port),
        };

        Ok(Self {
            feed,
            storage,
            pipeline,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable parsed but is out of range.
    #[error("environment variable {key} is invalid: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn parse_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map_or(default, |v| match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => default,
            })
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use test_case::test_case;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<RecorderConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RecorderConfig::from_lookup(|key| map.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("RECORDER_SYMBOLS", "700.HK"),
        ("RECORDER_FEED_REPLAY_PATH", "feed.ndjson"),
    ];

    #[test]
    fn defaults_apply() {
        let config = load(&REQUIRED).unwrap();

        assert_eq!(config.feed.symbols, vec!["700.HK"]);
        assert_eq!(config.feed.kinds, EventKind::all().to_vec());
        assert!(config.feed.first_push);
        assert_eq!(config.storage.db_path, PathBuf::from("./data/market.db"));
        assert_eq!(config.storage.busy_timeout, Duration::from_secs(10));
        assert_eq!(config.pipeline.queue_capacity, 10_000);
        assert_eq!(config.pipeline.poll_interval, Duration::from_secs(1));
        assert_eq!(config.pipeline.records_per_connection, 1);
        assert_eq!(config.pipeline.sentinel_timeout, Duration::from_secs(5));
        assert_eq!(config.pipeline.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.server.metrics_port, 9090);
    }

    #[test]
    fn overrides_apply() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("RECORDER_SYMBOLS", " AAPL , MSFT,, "),
            ("RECORDER_FIRST_PUSH", "false"),
            ("RECORDER_DB_PATH", "/tmp/x.db"),
            ("RECORDER_QUEUE_CAPACITY", "64"),
            ("RECORDER_POLL_INTERVAL_MS", "250"),
            ("RECORDER_RECORDS_PER_CONNECTION", "8"),
            ("RECORDER_SHUTDOWN_TIMEOUT_SECS", "3"),
            ("RECORDER_METRICS_PORT", "0"),
        ]);
        let config = load(&vars).unwrap();

        assert_eq!(config.feed.symbols, vec!["AAPL", "MSFT"]);
        assert!(!config.feed.first_push);
        assert_eq!(config.storage.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.pipeline.queue_capacity, 64);
        assert_eq!(config.pipeline.poll_interval, Duration::from_millis(250));
        assert_eq!(config.pipeline.records_per_connection, 8);
        assert_eq!(config.pipeline.shutdown_timeout, Duration::from_secs(3));
        assert_eq!(config.server.metrics_port, 0);
    }

    #[test]
    fn unparseable_optional_falls_back() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("RECORDER_QUEUE_CAPACITY", "lots"));
        let config = load(&vars).unwrap();
        assert_eq!(config.pipeline.queue_capacity, 10_000);
    }

    #[test]
    fn missing_symbols() {
        let err = load(&[("RECORDER_FEED_REPLAY_PATH", "f")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(key) if key == "RECORDER_SYMBOLS"));
    }

    #[test_case("" ; "empty")]
    #[test_case(" , ," ; "only separators")]
    fn empty_symbols(value: &str) {
        let err = load(&[
            ("RECORDER_SYMBOLS", value),
            ("RECORDER_FEED_REPLAY_PATH", "f"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }

    #[test_case("RECORDER_QUEUE_CAPACITY" ; "queue capacity")]
    #[test_case("RECORDER_RECORDS_PER_CONNECTION" ; "records per connection")]
    #[test_case("RECORDER_POLL_INTERVAL_MS" ; "poll interval")]
    #[test_case("RECORDER_SHUTDOWN_TIMEOUT_SECS" ; "shutdown timeout")]
    fn zero_bounds_rejected(key: &str) {
        let mut vars = REQUIRED.to_vec();
        vars.push((key, "0"));
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: k, .. } if k == key));
    }

    #[test_case("yes", true)]
    #[test_case("0", false)]
    #[test_case("maybe", true ; "unknown keeps default")]
    fn first_push_parsing(value: &str, expected: bool) {
        let mut vars = REQUIRED.to_vec();
        vars.push(("RECORDER_FIRST_PUSH", value));
        assert_eq!(load(&vars).unwrap().feed.first_push, expected);
    }
}
