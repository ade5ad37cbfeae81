use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cases::CaseResult;
use crate::test::Test;

/// The rest of a custom-execution composition: either the next wrapper or
/// the case body itself. A wrapper that never awaits it prevents the body
/// (and every inner wrapper) from running.
pub type Continuation = BoxFuture<'static, CaseResult>;

/// Wraps the execution of every case of a test.
///
/// Wrappers compose in declared order: the first declared trait is the
/// outermost. An error returned instead of invoking the continuation is
/// recorded against the test's current case.
#[async_trait]
pub trait CustomExecution: Send + Sync {
    async fn execute(&self, next: Continuation) -> CaseResult;
}

/// A gating predicate: decides at planning time whether a test runs.
#[derive(Clone)]
pub struct Condition {
    predicate: Arc<dyn Fn(&Test) -> bool + Send + Sync>,
    comment: String,
}

impl Condition {
    /// Enabled when `predicate` returns true.
    pub fn enabled_if<F>(comment: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Test) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            comment: comment.into(),
        }
    }

    /// Skipped when `predicate` returns true.
    pub fn skip_when<F>(comment: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Test) -> bool + Send + Sync + 'static,
    {
        Self::enabled_if(comment, move |test| !predicate(test))
    }

    /// Unconditionally disabled.
    pub fn disabled(comment: impl Into<String>) -> Self {
        Self::enabled_if(comment, |_| false)
    }

    pub fn is_enabled(&self, test: &Test) -> bool {
        (self.predicate)(test)
    }

    /// The skip reason reported when this condition disables a test.
    pub fn comment(&self) -> &str {
        &self.comment
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("comment", &self.comment)
            .finish()
    }
}

/// A behavioral modifier attached to a test or suite.
///
/// The capability set is closed: gate, time-limit, serialize, or wrap.
/// Multiple traits on one test compose; declaration order is preserved.
#[derive(Clone)]
pub enum TestTrait {
    /// Gates execution; the first disabling condition wins.
    Conditional(Condition),
    /// Caps the running time of each of the test's cases.
    TimeLimit(Duration),
    /// Forces this test and all descendants to run serially.
    Serializing,
    /// Wraps execution of each case.
    CustomExecution(Arc<dyn CustomExecution>),
}

impl fmt::Debug for TestTrait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestTrait::Conditional(c) => f.debug_tuple("Conditional").field(c).finish(),
            TestTrait::TimeLimit(d) => f.debug_tuple("TimeLimit").field(d).finish(),
            TestTrait::Serializing => write!(f, "Serializing"),
            TestTrait::CustomExecution(_) => write!(f, "CustomExecution"),
        }
    }
}

/// Evaluates all conditional traits in declared order; returns the skip
/// reason of the first disabling one, if any.
pub fn disabled_reason(test: &Test) -> Option<String> {
    test.traits.iter().find_map(|t| match t {
        TestTrait::Conditional(condition) if !condition.is_enabled(test) => {
            Some(condition.comment().to_string())
        }
        _ => None,
    })
}

/// Whether the test itself carries a serializing trait. Ancestor
/// serialization is applied by the plan builder's downward propagation.
pub fn is_serializing(test: &Test) -> bool {
    test.traits
        .iter()
        .any(|t| matches!(t, TestTrait::Serializing))
}

/// The tightest time limit declared directly on the test, if any.
pub fn declared_time_limit(test: &Test) -> Option<Duration> {
    test.traits
        .iter()
        .filter_map(|t| match t {
            TestTrait::TimeLimit(d) => Some(*d),
            _ => None,
        })
        .min()
}

/// Resolves the enforceable time limit for one test.
///
/// The declared (or inherited) limit is clamped down to the configured
/// maximum; with no declared limit the default applies (also clamped);
/// with only a maximum configured, the maximum itself is the limit. The
/// result is rounded up to a positive multiple of the granularity. With
/// none of the three set there is no enforced limit.
pub fn resolve_time_limit(
    declared: Option<Duration>,
    default: Option<Duration>,
    maximum: Option<Duration>,
    granularity: Duration,
) -> Option<Duration> {
    let base = match (declared.or(default), maximum) {
        (Some(limit), Some(max)) => Some(limit.min(max)),
        (Some(limit), None) => Some(limit),
        (None, Some(max)) => Some(max),
        (None, None) => None,
    };
    base.map(|limit| round_up_to_granularity(limit, granularity))
}

/// Rounds `limit` up to the nearest positive multiple of `granularity`.
pub fn round_up_to_granularity(limit: Duration, granularity: Duration) -> Duration {
    if granularity.is_zero() {
        return limit;
    }
    let g = granularity.as_nanos();
    let n = limit.as_nanos();
    let multiples = ((n + g - 1) / g).max(1);
    let nanos = u64::try_from(multiples.saturating_mul(g)).unwrap_or(u64::MAX);
    Duration::from_nanos(nanos)
}

/// Composes the test's custom-execution traits around `body`, first
/// declared outermost, into a single continuation.
pub fn wrap_body(test: &Test, body: Continuation) -> Continuation {
    let wrappers: Vec<Arc<dyn CustomExecution>> = test
        .traits
        .iter()
        .filter_map(|t| match t {
            TestTrait::CustomExecution(w) => Some(Arc::clone(w)),
            _ => None,
        })
        .collect();

    let mut next = body;
    for wrapper in wrappers.into_iter().rev() {
        next = Box::pin(async move { wrapper.execute(next).await });
    }
    next
}
