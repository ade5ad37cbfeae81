use regex::Regex;
use std::fmt;
use std::sync::Arc;

use crate::config::ConfigError;
use crate::test::Test;

/// Selects which tests take part in a run.
///
/// Hidden tests are always excluded unless the filter explicitly opts in
/// (internal use only). Include pattern, skip pattern, and the arbitrary
/// predicate are all ANDed together.
#[derive(Clone, Default)]
pub struct TestFilter {
    include_hidden: bool,
    include: Option<Regex>,
    skip: Option<Regex>,
    predicate: Option<Arc<dyn Fn(&Test) -> bool + Send + Sync>>,
}

impl fmt::Debug for TestFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestFilter")
            .field("include_hidden", &self.include_hidden)
            .field("include", &self.include.as_ref().map(Regex::as_str))
            .field("skip", &self.skip.as_ref().map(Regex::as_str))
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl TestFilter {
    /// The default filter: excludes only hidden tests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the run to tests whose display name matches `pattern`.
    ///
    /// An unparseable pattern is a configuration failure, surfaced before
    /// any test runs.
    pub fn pattern(mut self, pattern: &str) -> Result<Self, ConfigError> {
        self.include = Some(compile(pattern)?);
        Ok(self)
    }

    /// Excludes tests whose display name matches `pattern`.
    pub fn skip_pattern(mut self, pattern: &str) -> Result<Self, ConfigError> {
        self.skip = Some(compile(pattern)?);
        Ok(self)
    }

    /// ANDs an arbitrary predicate into the filter.
    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Test) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Opts hidden tests back in. Intended for the engine's own internal
    /// runs, not for user-facing configuration.
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Whether `test` takes part in the run.
    pub fn matches(&self, test: &Test) -> bool {
        if test.is_hidden && !self.include_hidden {
            return false;
        }
        let name = test.display_name.as_str();
        if let Some(include) = &self.include {
            if !include.is_match(name) {
                return false;
            }
        }
        if let Some(skip) = &self.skip {
            if skip.is_match(name) {
                return false;
            }
        }
        if let Some(predicate) = &self.predicate {
            if !predicate(test) {
                return false;
            }
        }
        true
    }
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}
