//! Run configuration for Strand.
//!
//! Raw options are loaded from multiple sources with the following
//! priority:
//! 1. Environment variables (highest priority)
//! 2. Project-local `strand.toml` file
//! 3. User config `~/.config/strand/config.toml`
//! 4. Built-in defaults (lowest priority)
//!
//! Raw [`RunOptions`] are then validated into a [`Configuration`]; every
//! validation failure is a typed [`ConfigError`] raised before any test
//! runs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod defaults;

pub use defaults::*;

use crate::event::{Event, EventHandler};
use crate::filter::TestFilter;

/// Configuration errors. These fail fast: a run never starts from a
/// malformed configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid filter pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Unrecognized repeat-until value {0:?} (expected \"pass\" or \"fail\")")]
    UnknownRepeatUntil(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// When a case keeps repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContinuationCondition {
    /// Repeat as long as the previous iteration recorded an issue; stop as
    /// soon as an iteration passes.
    WhileIssueRecorded,
    /// Repeat as long as the previous iteration passed; stop as soon as an
    /// iteration records an issue.
    UntilIssueRecorded,
}

/// How many times, and under what stopping condition, each case runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepetitionPolicy {
    /// Upper bound on iterations; at least 1.
    pub maximum_iteration_count: usize,
    /// With no condition, exactly `maximum_iteration_count` iterations run
    /// unconditionally.
    pub continuation_condition: Option<ContinuationCondition>,
}

impl Default for RepetitionPolicy {
    fn default() -> Self {
        Self {
            maximum_iteration_count: DEFAULT_MAXIMUM_ITERATION_COUNT,
            continuation_condition: None,
        }
    }
}

impl RepetitionPolicy {
    /// Run each case exactly once.
    pub fn once() -> Self {
        Self::default()
    }

    /// Run each case exactly `count` times (clamped to at least 1).
    pub fn repeating(count: usize) -> Self {
        Self {
            maximum_iteration_count: count.max(1),
            continuation_condition: None,
        }
    }

    /// Repeat until an iteration passes, up to `maximum` iterations.
    pub fn while_issue_recorded(maximum: usize) -> Self {
        Self {
            maximum_iteration_count: maximum.max(1),
            continuation_condition: Some(ContinuationCondition::WhileIssueRecorded),
        }
    }

    /// Repeat until an iteration records an issue, up to `maximum`.
    pub fn until_issue_recorded(maximum: usize) -> Self {
        Self {
            maximum_iteration_count: maximum.max(1),
            continuation_condition: Some(ContinuationCondition::UntilIssueRecorded),
        }
    }
}

/// Per-run settings consumed by the plan builder and the runner.
///
/// Constructed once per run; read-only during execution.
#[derive(Clone)]
pub struct Configuration {
    pub parallelization_enabled: bool,
    pub default_test_time_limit: Option<Duration>,
    pub maximum_test_time_limit: Option<Duration>,
    pub test_time_limit_granularity: Duration,
    pub repetition_policy: RepetitionPolicy,
    pub test_filter: TestFilter,
    pub event_handler: EventHandler,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            parallelization_enabled: DEFAULT_PARALLELIZATION_ENABLED,
            default_test_time_limit: None,
            maximum_test_time_limit: None,
            test_time_limit_granularity: DEFAULT_TIME_LIMIT_GRANULARITY,
            repetition_policy: RepetitionPolicy::default(),
            test_filter: TestFilter::new(),
            event_handler: crate::event::discarding_handler(),
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("parallelization_enabled", &self.parallelization_enabled)
            .field("default_test_time_limit", &self.default_test_time_limit)
            .field("maximum_test_time_limit", &self.maximum_test_time_limit)
            .field(
                "test_time_limit_granularity",
                &self.test_time_limit_granularity,
            )
            .field("repetition_policy", &self.repetition_policy)
            .field("test_filter", &self.test_filter)
            .finish()
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables concurrent execution of eligible steps.
    pub fn parallelized(mut self, enabled: bool) -> Self {
        self.parallelization_enabled = enabled;
        self
    }

    /// Time limit applied to tests that declare none of their own.
    pub fn default_time_limit(mut self, limit: Duration) -> Self {
        self.default_test_time_limit = Some(limit);
        self
    }

    /// Upper bound clamping every declared or default time limit.
    pub fn maximum_time_limit(mut self, limit: Duration) -> Self {
        self.maximum_test_time_limit = Some(limit);
        self
    }

    /// Granularity that resolved time limits are rounded up to.
    pub fn time_limit_granularity(mut self, granularity: Duration) -> Self {
        self.test_time_limit_granularity = granularity;
        self
    }

    pub fn repetition_policy(mut self, policy: RepetitionPolicy) -> Self {
        self.repetition_policy = policy;
        self
    }

    pub fn filter(mut self, filter: TestFilter) -> Self {
        self.test_filter = filter;
        self
    }

    /// Installs the event handler. It may be invoked concurrently from
    /// every task running a parallelized step.
    pub fn on_event<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.event_handler = std::sync::Arc::new(handler);
        self
    }
}

/// Raw, serializable run options as read from files and the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RunOptions {
    /// Whether eligible steps run concurrently.
    pub parallel: bool,

    /// Maximum iteration count per case.
    pub repetitions: Option<usize>,

    /// `"pass"` or `"fail"`; anything else fails configuration.
    pub repeat_until: Option<String>,

    /// Time limit for tests that declare none, in seconds.
    pub default_time_limit_secs: Option<u64>,

    /// Upper bound on any test's time limit, in seconds.
    pub maximum_time_limit_secs: Option<u64>,

    /// Granularity time limits are rounded up to, in seconds.
    pub time_limit_granularity_secs: Option<u64>,

    /// Regex over display names selecting tests to run.
    pub filter: Option<String>,

    /// Regex over display names excluding tests from the run.
    pub skip: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            parallel: DEFAULT_PARALLELIZATION_ENABLED,
            repetitions: None,
            repeat_until: None,
            default_time_limit_secs: None,
            maximum_time_limit_secs: None,
            time_limit_granularity_secs: None,
            filter: None,
            skip: None,
        }
    }
}

impl RunOptions {
    /// Loads options from default locations.
    ///
    /// Searches in order:
    /// 1. `./strand.toml` (project local)
    /// 2. `~/.config/strand/config.toml` (user config)
    /// 3. Falls back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        if Path::new(CONFIG_FILE_NAME).exists() {
            return Self::from_file(CONFIG_FILE_NAME);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(USER_CONFIG_DIR).join(USER_CONFIG_FILE);
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        let mut options = Self::default();
        options.apply_env_overrides();
        Ok(options)
    }

    /// Loads options from a specific file, then applies env overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut options: RunOptions = toml::from_str(&content)?;
        options.apply_env_overrides();
        Ok(options)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(parallel) = std::env::var("STRAND_PARALLEL") {
            if let Ok(value) = parallel.parse() {
                self.parallel = value;
            }
        }
        if let Ok(repetitions) = std::env::var("STRAND_REPETITIONS") {
            if let Ok(value) = repetitions.parse() {
                self.repetitions = Some(value);
            }
        }
        if let Ok(repeat_until) = std::env::var("STRAND_REPEAT_UNTIL") {
            self.repeat_until = Some(repeat_until);
        }
        if let Ok(filter) = std::env::var("STRAND_FILTER") {
            self.filter = Some(filter);
        }
        if let Ok(skip) = std::env::var("STRAND_SKIP") {
            self.skip = Some(skip);
        }
        if let Ok(limit) = std::env::var("STRAND_DEFAULT_TIME_LIMIT_SECS") {
            if let Ok(value) = limit.parse() {
                self.default_time_limit_secs = Some(value);
            }
        }
        if let Ok(limit) = std::env::var("STRAND_MAXIMUM_TIME_LIMIT_SECS") {
            if let Ok(value) = limit.parse() {
                self.maximum_time_limit_secs = Some(value);
            }
        }
    }

    /// Resolves the repetition policy from `repetitions`/`repeat-until`.
    pub fn repetition_policy(&self) -> Result<RepetitionPolicy, ConfigError> {
        let continuation_condition = match self.repeat_until.as_deref() {
            None => None,
            Some("pass") => Some(ContinuationCondition::WhileIssueRecorded),
            Some("fail") => Some(ContinuationCondition::UntilIssueRecorded),
            Some(other) => return Err(ConfigError::UnknownRepeatUntil(other.to_string())),
        };

        let maximum_iteration_count = match (self.repetitions, continuation_condition) {
            (Some(0), _) => {
                return Err(ConfigError::Invalid(
                    "repetitions must be at least 1".to_string(),
                ))
            }
            (Some(count), _) => count,
            // A bare repeat-until keeps going until its condition stops it.
            (None, Some(_)) => usize::MAX,
            (None, None) => DEFAULT_MAXIMUM_ITERATION_COUNT,
        };

        Ok(RepetitionPolicy {
            maximum_iteration_count,
            continuation_condition,
        })
    }

    /// Validates the raw options into a run [`Configuration`].
    pub fn into_configuration(
        self,
        event_handler: EventHandler,
    ) -> Result<Configuration, ConfigError> {
        let repetition_policy = self.repetition_policy()?;

        let mut test_filter = TestFilter::new();
        if let Some(pattern) = &self.filter {
            test_filter = test_filter.pattern(pattern)?;
        }
        if let Some(pattern) = &self.skip {
            test_filter = test_filter.skip_pattern(pattern)?;
        }

        let test_time_limit_granularity = match self.time_limit_granularity_secs {
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "time-limit-granularity-secs must be positive".to_string(),
                ))
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_TIME_LIMIT_GRANULARITY,
        };

        Ok(Configuration {
            parallelization_enabled: self.parallel,
            default_test_time_limit: self.default_time_limit_secs.map(Duration::from_secs),
            maximum_test_time_limit: self.maximum_time_limit_secs.map(Duration::from_secs),
            test_time_limit_granularity,
            repetition_policy,
            test_filter,
            event_handler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::discarding_handler;
    use std::io::Write;
    use std::sync::{Mutex, OnceLock};

    // Environment variables are process-global; tests that set or read
    // STRAND_* variables serialize on this lock.
    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn test_default_configuration() {
        let config = Configuration::default();
        assert!(config.parallelization_enabled);
        assert_eq!(
            config.test_time_limit_granularity,
            DEFAULT_TIME_LIMIT_GRANULARITY
        );
        assert_eq!(config.repetition_policy.maximum_iteration_count, 1);
        assert_eq!(config.repetition_policy.continuation_condition, None);
    }

    #[test]
    fn test_repetitions_alone() {
        let options = RunOptions {
            repetitions: Some(2468),
            ..RunOptions::default()
        };
        let policy = options.repetition_policy().unwrap();
        assert_eq!(policy.maximum_iteration_count, 2468);
        assert_eq!(policy.continuation_condition, None);
    }

    #[test]
    fn test_repeat_until_pass() {
        let options = RunOptions {
            repeat_until: Some("pass".to_string()),
            ..RunOptions::default()
        };
        let policy = options.repetition_policy().unwrap();
        assert_eq!(policy.maximum_iteration_count, usize::MAX);
        assert_eq!(
            policy.continuation_condition,
            Some(ContinuationCondition::WhileIssueRecorded)
        );
    }

    #[test]
    fn test_repeat_until_fail() {
        let options = RunOptions {
            repeat_until: Some("fail".to_string()),
            repetitions: Some(10),
            ..RunOptions::default()
        };
        let policy = options.repetition_policy().unwrap();
        assert_eq!(policy.maximum_iteration_count, 10);
        assert_eq!(
            policy.continuation_condition,
            Some(ContinuationCondition::UntilIssueRecorded)
        );
    }

    #[test]
    fn test_unrecognized_repeat_until_fails() {
        let options = RunOptions {
            repeat_until: Some("sometimes".to_string()),
            ..RunOptions::default()
        };
        assert!(matches!(
            options.repetition_policy(),
            Err(ConfigError::UnknownRepeatUntil(_))
        ));
        assert!(options
            .into_configuration(discarding_handler())
            .is_err());
    }

    #[test]
    fn test_zero_repetitions_fails() {
        let options = RunOptions {
            repetitions: Some(0),
            ..RunOptions::default()
        };
        assert!(matches!(
            options.repetition_policy(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_zero_granularity_fails() {
        let options = RunOptions {
            time_limit_granularity_secs: Some(0),
            ..RunOptions::default()
        };
        assert!(options
            .into_configuration(discarding_handler())
            .is_err());
    }

    #[test]
    fn test_invalid_filter_pattern_fails_fast() {
        let options = RunOptions {
            filter: Some("([unclosed".to_string()),
            ..RunOptions::default()
        };
        assert!(matches!(
            options.into_configuration(discarding_handler()),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_options_from_toml_file() {
        let _guard = env_lock().lock().unwrap_or_else(|p| p.into_inner());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
parallel = false
repetitions = 3
repeat-until = "fail"
default-time-limit-secs = 30
filter = "smoke"
"#
        )
        .unwrap();

        let options = RunOptions::from_file(file.path()).unwrap();
        assert!(!options.parallel);
        assert_eq!(options.repetitions, Some(3));
        assert_eq!(options.repeat_until.as_deref(), Some("fail"));
        assert_eq!(options.default_time_limit_secs, Some(30));
        assert_eq!(options.filter.as_deref(), Some("smoke"));

        let config = options.into_configuration(discarding_handler()).unwrap();
        assert!(!config.parallelization_enabled);
        assert_eq!(
            config.default_test_time_limit,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_env_overrides_win_over_file_values() {
        let _guard = env_lock().lock().unwrap_or_else(|p| p.into_inner());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
parallel = false
repetitions = 2
"#
        )
        .unwrap();

        std::env::set_var("STRAND_PARALLEL", "true");
        std::env::set_var("STRAND_REPEAT_UNTIL", "pass");
        let options = RunOptions::from_file(file.path());
        std::env::remove_var("STRAND_PARALLEL");
        std::env::remove_var("STRAND_REPEAT_UNTIL");

        let options = options.unwrap();
        assert!(options.parallel);
        assert_eq!(options.repeat_until.as_deref(), Some("pass"));
        // File values without an override survive.
        assert_eq!(options.repetitions, Some(2));
    }

    #[test]
    fn test_unparseable_env_override_is_ignored() {
        let _guard = env_lock().lock().unwrap_or_else(|p| p.into_inner());

        std::env::set_var("STRAND_REPETITIONS", "several");
        let mut options = RunOptions::default();
        options.apply_env_overrides();
        std::env::remove_var("STRAND_REPETITIONS");

        assert_eq!(options.repetitions, None);
    }

    #[test]
    fn test_unparseable_toml_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "parallel = maybe").unwrap();
        assert!(matches!(
            RunOptions::from_file(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_builder_style_configuration() {
        let config = Configuration::new()
            .parallelized(false)
            .default_time_limit(Duration::from_secs(5))
            .maximum_time_limit(Duration::from_secs(60))
            .time_limit_granularity(Duration::from_secs(1))
            .repetition_policy(RepetitionPolicy::repeating(4));
        assert!(!config.parallelization_enabled);
        assert_eq!(config.repetition_policy.maximum_iteration_count, 4);
    }
}
