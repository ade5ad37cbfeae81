use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cases::{CaseId, CaseResult};
use crate::event::{Event, EventHandler, EventKind, Issue, IssueKind, TestFailure};
use crate::test::TestId;

tokio::task_local! {
    static CURRENT_CASE: CaseContext;
}

/// Ambient identification of the case currently executing.
///
/// Scoped strictly to the lifetime of one case iteration, so issues
/// raised by arbitrarily nested work are attributed to the correct
/// test/case without the test author threading anything through.
#[derive(Clone)]
pub struct CaseContext {
    test_id: TestId,
    case_id: CaseId,
    handler: EventHandler,
    failures: Arc<AtomicUsize>,
}

impl CaseContext {
    pub(crate) fn new(test_id: TestId, case_id: CaseId, handler: EventHandler) -> Self {
        Self {
            test_id,
            case_id,
            handler,
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn test_id(&self) -> &TestId {
        &self.test_id
    }

    pub fn case_id(&self) -> &CaseId {
        &self.case_id
    }

    /// Shared failure count for the current iteration; survives the
    /// iteration's future being cancelled.
    pub(crate) fn failure_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.failures)
    }

    /// Records an issue against this case and delivers the event.
    pub fn record(&self, issue: Issue) {
        let kind = if issue.known {
            EventKind::KnownIssueRecorded(issue)
        } else {
            self.failures.fetch_add(1, Ordering::SeqCst);
            EventKind::IssueRecorded(issue)
        };
        (self.handler)(&Event::for_case(
            kind,
            self.test_id.clone(),
            self.case_id.clone(),
        ));
    }
}

/// Runs `future` with `context` as the ambient current case.
pub(crate) async fn scope<F>(context: CaseContext, future: F) -> F::Output
where
    F: Future,
{
    CURRENT_CASE.scope(context, future).await
}

/// The ambient current case, if the caller is running inside one.
pub fn current_case() -> Option<CaseContext> {
    CURRENT_CASE.try_with(|context| context.clone()).ok()
}

/// Records an issue against the ambient current case.
///
/// Returns false (and drops the issue) when called outside any case.
pub fn record_issue(issue: Issue) -> bool {
    match current_case() {
        Some(context) => {
            context.record(issue);
            true
        }
        None => false,
    }
}

/// Records an issue pre-declared as expected. It is delivered as
/// `knownIssueRecorded` and does not fail the case.
pub fn record_known_issue(issue: Issue) -> bool {
    record_issue(issue.known())
}

/// Records an expectation-failed issue when `condition` is false.
///
/// Non-fatal: the case continues either way. Returns the condition so
/// callers can branch on it.
pub fn expect(condition: bool, comment: &str) -> bool {
    if !condition {
        record_issue(Issue::new(
            IssueKind::ExpectationFailed,
            format!("expectation failed: {comment}"),
        ));
    }
    condition
}

/// Fails the case when `condition` is false.
///
/// The returned error aborts the remainder of the case body (propagate it
/// with `?`); sibling cases and tests are unaffected.
pub fn require(condition: bool, comment: &str) -> CaseResult {
    if condition {
        Ok(())
    } else {
        Err(TestFailure::expectation(format!(
            "required expectation failed: {comment}"
        )))
    }
}
