use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;
use thiserror::Error;

use crate::cases::CaseId;
use crate::clock::Timestamp;
use crate::test::{SourceLocation, TestId};

/// An error raised by a test body or a custom-execution wrapper.
///
/// Returning one of these aborts the remainder of the current case's body;
/// the runner records it as an [`Issue`] of the carried kind. Sibling
/// cases and tests are unaffected.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TestFailure {
    pub message: String,
    pub location: Option<SourceLocation>,
    pub kind: IssueKind,
}

impl TestFailure {
    /// A failure recorded as a caught error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            kind: IssueKind::ErrorCaught,
        }
    }

    /// A failure recorded as a failed (required) expectation.
    pub fn expectation(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            kind: IssueKind::ExpectationFailed,
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

/// Classification of a recorded issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    /// An assertion evaluated false.
    ExpectationFailed,
    /// The test body or a wrapper raised an uncaught error.
    ErrorCaught,
    /// The resolved time limit elapsed and the case was cancelled.
    TimeLimitExceeded,
    /// A failure in the engine or its configuration, not in a test.
    SystemFailure,
}

/// A recorded failure (or known-failure occurrence) during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    /// Human-readable messages describing the issue.
    pub comments: Vec<String>,
    pub location: Option<SourceLocation>,
    /// Known issues were pre-declared as expected; they are delivered as
    /// [`EventKind::KnownIssueRecorded`] and do not fail the case.
    pub known: bool,
}

impl Issue {
    pub fn new(kind: IssueKind, comment: impl Into<String>) -> Self {
        Self {
            kind,
            comments: vec![comment.into()],
            location: None,
            known: false,
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comments.push(comment.into());
        self
    }

    /// Marks this issue as a known (expected) one.
    pub fn known(mut self) -> Self {
        self.known = true;
        self
    }

    /// Whether this issue counts as a failure of its case.
    pub fn is_failure(&self) -> bool {
        !self.known
    }
}

/// The lifecycle notification variants emitted by the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    RunStarted,
    TestStarted,
    TestCaseStarted,
    IssueRecorded(Issue),
    KnownIssueRecorded(Issue),
    TestCaseEnded,
    TestEnded,
    TestSkipped { reason: String },
    RunEnded,
}

impl EventKind {
    /// Stable name for recorders and logs.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::RunStarted => "runStarted",
            EventKind::TestStarted => "testStarted",
            EventKind::TestCaseStarted => "testCaseStarted",
            EventKind::IssueRecorded(_) => "issueRecorded",
            EventKind::KnownIssueRecorded(_) => "knownIssueRecorded",
            EventKind::TestCaseEnded => "testCaseEnded",
            EventKind::TestEnded => "testEnded",
            EventKind::TestSkipped { .. } => "testSkipped",
            EventKind::RunEnded => "runEnded",
        }
    }
}

/// An immutable, timestamped lifecycle notification.
///
/// Within one test case, `TestCaseStarted` always precedes any issue
/// events, which precede `TestCaseEnded`; `TestStarted`/`TestEnded`
/// bracket all of a test's case events; `RunStarted` is the first event
/// of a run and `RunEnded` the last.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: Timestamp,
    pub test_id: Option<TestId>,
    pub case_id: Option<CaseId>,
}

impl Event {
    /// An event with no test/case attribution (run lifecycle).
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Timestamp::now(),
            test_id: None,
            case_id: None,
        }
    }

    /// An event attributed to a test.
    pub fn for_test(kind: EventKind, test_id: TestId) -> Self {
        Self {
            test_id: Some(test_id),
            ..Self::new(kind)
        }
    }

    /// An event attributed to one case of a test.
    pub fn for_case(kind: EventKind, test_id: TestId, case_id: CaseId) -> Self {
        Self {
            test_id: Some(test_id),
            case_id: Some(case_id),
            ..Self::new(kind)
        }
    }
}

// Serialize-only: recorders consume events, they never construct them.
// The monotonic timestamp half has no serialized form; the wall reading
// is emitted instead.
impl Serialize for Event {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let has_payload = matches!(
            self.kind,
            EventKind::IssueRecorded(_)
                | EventKind::KnownIssueRecorded(_)
                | EventKind::TestSkipped { .. }
        );
        let mut state =
            serializer.serialize_struct("Event", 4 + has_payload as usize)?;
        state.serialize_field("kind", self.kind.name())?;
        match &self.kind {
            EventKind::IssueRecorded(issue) | EventKind::KnownIssueRecorded(issue) => {
                state.serialize_field("issue", issue)?;
            }
            EventKind::TestSkipped { reason } => {
                state.serialize_field("reason", reason)?;
            }
            _ => {}
        }
        state.serialize_field("timestamp", &self.timestamp.wall())?;
        state.serialize_field("testId", &self.test_id)?;
        state.serialize_field("caseId", &self.case_id)?;
        state.end()
    }
}

/// Consumes events as they are emitted.
///
/// The runner invokes the handler concurrently from every task running a
/// parallelized step; implementations must tolerate concurrent invocation
/// and keep any shared accumulators behind their own synchronization.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// A handler that discards every event.
pub fn discarding_handler() -> EventHandler {
    Arc::new(|_| {})
}
