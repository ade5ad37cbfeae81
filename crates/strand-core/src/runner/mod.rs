//! Executes a [`Plan`]: walks the resolved step tree, fanning out one
//! task per concurrently-eligible step and fanning back in before each
//! parent completes, so no work outlives its step.

mod context;

pub use context::{
    current_case, expect, record_issue, record_known_issue, require, CaseContext,
};

use futures::future::BoxFuture;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cases::TestCase;
use crate::config::{Configuration, ContinuationCondition};
use crate::event::{Event, EventKind, Issue, IssueKind};
use crate::planning::{Action, Plan, PlanStep};
use crate::traits;

/// Runs every step of a plan to completion.
///
/// All per-test failures are funneled into events; [`Runner::run`] itself
/// never fails. A run always emits `RunEnded`, even when every test
/// failed — only malformed configuration (rejected before a `Runner`
/// exists) prevents a run from starting.
pub struct Runner {
    plan: Arc<Plan>,
    config: Arc<Configuration>,
}

impl Runner {
    pub fn new(plan: Plan, config: Configuration) -> Self {
        Self {
            plan: Arc::new(plan),
            config: Arc::new(config),
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Executes the plan. Completes only once every leaf test has
    /// finished all repetitions of all its cases.
    pub async fn run(self) {
        debug!(steps = self.plan.len(), "run started");
        emit(&self.config, Event::new(EventKind::RunStarted));

        let root = self.plan.graph().root();
        let parallelized = self.config.parallelization_enabled;
        run_children(
            Arc::clone(&self.plan),
            Arc::clone(&self.config),
            root,
            parallelized,
        )
        .await;

        emit(&self.config, Event::new(EventKind::RunEnded));
        debug!("run ended");
    }
}

fn emit(config: &Configuration, event: Event) {
    (config.event_handler)(&event);
}

/// Recurses into one step. Boxed so suites of arbitrary depth recurse
/// through spawned tasks.
fn run_step(
    plan: Arc<Plan>,
    config: Arc<Configuration>,
    index: usize,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        // Every non-root plan node carries a step; filtered and
        // unregistered ancestors are inserted during planning.
        let Some(step) = plan.graph().value_of(index).cloned() else {
            return;
        };
        if step.test.is_suite() {
            // Suites emit no events of their own.
            let parallelized = step.parallelized;
            run_children(plan, config, index, parallelized).await;
        } else {
            run_test(config, step).await;
        }
    })
}

/// Fan-out/fan-in over a node's children: concurrent tasks when the
/// parent step is parallelized, strict declared order otherwise.
async fn run_children(
    plan: Arc<Plan>,
    config: Arc<Configuration>,
    index: usize,
    parallelized: bool,
) {
    let children: Vec<usize> = plan.graph().children_of(index).to_vec();
    if parallelized {
        let mut tasks = JoinSet::new();
        for child in children {
            tasks.spawn(run_step(Arc::clone(&plan), Arc::clone(&config), child));
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(error) = result {
                warn!(%error, "step task failed");
            }
        }
    } else {
        for child in children {
            run_step(Arc::clone(&plan), Arc::clone(&config), child).await;
        }
    }
}

/// Executes one leaf step: skip, or bracket all of its cases with
/// `TestStarted`/`TestEnded`.
async fn run_test(config: Arc<Configuration>, step: PlanStep) {
    let test_id = step.test.id.clone();

    if let Action::Skip(reason) = &step.action {
        emit(
            &config,
            Event::for_test(
                EventKind::TestSkipped {
                    reason: reason.message().to_string(),
                },
                test_id,
            ),
        );
        return;
    }

    emit(
        &config,
        Event::for_test(EventKind::TestStarted, test_id.clone()),
    );

    let parallelized = step.parallelized;
    let step = Arc::new(step);
    let cases = step.test.cases();

    if parallelized && cases.len() > 1 {
        let mut tasks = JoinSet::new();
        for case in cases {
            tasks.spawn(run_case(Arc::clone(&config), Arc::clone(&step), case));
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(error) = result {
                warn!(%error, "case task failed");
            }
        }
    } else {
        for case in cases {
            run_case(Arc::clone(&config), Arc::clone(&step), case).await;
        }
    }

    emit(&config, Event::for_test(EventKind::TestEnded, test_id));
}

/// Executes one case: the repetition policy drives the trait-wrapped
/// body between the case's start/end events.
async fn run_case(config: Arc<Configuration>, step: Arc<PlanStep>, case: TestCase) {
    let test_id = step.test.id.clone();
    emit(
        &config,
        Event::for_case(EventKind::TestCaseStarted, test_id.clone(), case.id.clone()),
    );

    let policy = config.repetition_policy;
    let mut iteration = 0usize;
    loop {
        iteration += 1;
        let failures = run_iteration(&config, &step, &case).await;
        if iteration >= policy.maximum_iteration_count {
            break;
        }
        match policy.continuation_condition {
            None => {}
            Some(ContinuationCondition::WhileIssueRecorded) if failures == 0 => break,
            Some(ContinuationCondition::UntilIssueRecorded) if failures > 0 => break,
            Some(_) => {}
        }
    }

    emit(
        &config,
        Event::for_case(EventKind::TestCaseEnded, test_id, case.id.clone()),
    );
}

/// Runs one iteration of a case under the ambient context and the
/// resolved time limit. Returns the number of failures it recorded.
async fn run_iteration(
    config: &Arc<Configuration>,
    step: &PlanStep,
    case: &TestCase,
) -> usize {
    let ctx = CaseContext::new(
        step.test.id.clone(),
        case.id.clone(),
        Arc::clone(&config.event_handler),
    );
    let failures = ctx.failure_counter();

    let body = traits::wrap_body(&step.test, case.invoke());
    let scoped = context::scope(ctx, body);

    let outcome = match step.time_limit {
        Some(limit) => match timeout(limit, scoped).await {
            Ok(result) => result,
            Err(_) => {
                // The deadline elapsed first: the in-flight body was
                // dropped (cancelled). The case counts as completed.
                failures.fetch_add(1, Ordering::SeqCst);
                let issue = Issue::new(
                    IssueKind::TimeLimitExceeded,
                    format!("time limit of {limit:?} exceeded"),
                );
                emit(
                    config,
                    Event::for_case(
                        EventKind::IssueRecorded(issue),
                        step.test.id.clone(),
                        case.id.clone(),
                    ),
                );
                Ok(())
            }
        },
        None => scoped.await,
    };

    if let Err(failure) = outcome {
        failures.fetch_add(1, Ordering::SeqCst);
        let mut issue = Issue::new(failure.kind, failure.message);
        if let Some(location) = failure.location {
            issue = issue.with_location(location);
        }
        emit(
            config,
            Event::for_case(
                EventKind::IssueRecorded(issue),
                step.test.id.clone(),
                case.id.clone(),
            ),
        );
    }

    failures.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cases::CaseGenerator;
    use crate::config::RepetitionPolicy;
    use crate::event::{EventHandler, TestFailure};
    use crate::test::{Parameter, SourceLocation, Test, TestId};
    use crate::traits::{Condition, Continuation, CustomExecution, TestTrait};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex;
    use std::time::Duration;

    fn loc(line: u32) -> SourceLocation {
        SourceLocation::new("tests.rs", line, 1)
    }

    fn collector() -> (EventHandler, Arc<Mutex<Vec<Event>>>) {
        let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let handler: EventHandler =
            Arc::new(move |event: &Event| sink.lock().unwrap().push(event.clone()));
        (handler, events)
    }

    fn event_names(events: &[Event]) -> Vec<&'static str> {
        events.iter().map(|e| e.kind.name()).collect()
    }

    async fn run_all(tests: Vec<Test>, config: Configuration) {
        let plan = Plan::new(tests, &config);
        Runner::new(plan, config).run().await;
    }

    #[tokio::test]
    async fn test_single_passing_test_event_sequence() {
        let (handler, events) = collector();
        let config = Configuration::new().on_event(move |e| handler(e));
        let tests = vec![Test::new(TestId::new(["t"]), loc(1), || async { Ok(()) })];
        run_all(tests, config).await;

        assert_eq!(
            event_names(&events.lock().unwrap()),
            vec![
                "runStarted",
                "testStarted",
                "testCaseStarted",
                "testCaseEnded",
                "testEnded",
                "runEnded",
            ]
        );
    }

    #[tokio::test]
    async fn test_skipped_test_emits_only_test_skipped() {
        let (handler, events) = collector();
        let config = Configuration::new().on_event(move |e| handler(e));
        let tests = vec![Test::new(TestId::new(["t"]), loc(1), || async {
            panic!("skipped test must not execute")
        })
        .with_trait(TestTrait::Conditional(Condition::disabled("not today")))];
        run_all(tests, config).await;

        let events = events.lock().unwrap();
        assert_eq!(
            event_names(&events),
            vec!["runStarted", "testSkipped", "runEnded"]
        );
        match &events[1].kind {
            EventKind::TestSkipped { reason } => assert_eq!(reason, "not today"),
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_serialized_cases_record_issues_in_order() {
        const CASES: usize = 10_000;

        let (handler, events) = collector();
        let config = Configuration::new()
            .parallelized(true)
            .on_event(move |e| handler(e));

        let generator = CaseGenerator::from_collection(
            &[Parameter::new(0, "i")],
            0..CASES,
            |i| async move {
                record_issue(Issue::new(IssueKind::ExpectationFailed, i.to_string()));
                Ok(())
            },
        );
        let tests = vec![
            Test::suite(TestId::new(["s"]), loc(1)).with_trait(TestTrait::Serializing),
            Test::parameterized(
                TestId::new(["s", "t"]),
                loc(2),
                vec![Parameter::new(0, "i")],
                generator,
            ),
        ];
        run_all(tests, config).await;

        let indices: Vec<usize> = events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::IssueRecorded(issue) => issue.comments[0].parse().ok(),
                _ => None,
            })
            .collect();
        assert_eq!(indices.len(), CASES);
        assert!(
            indices.windows(2).all(|w| w[0] < w[1]),
            "issue delivery order must be strictly increasing"
        );
    }

    struct RefusesToRun;

    #[async_trait]
    impl CustomExecution for RefusesToRun {
        async fn execute(&self, _next: Continuation) -> crate::cases::CaseResult {
            Err(TestFailure::new("wrapper refused"))
        }
    }

    #[tokio::test]
    async fn test_wrapper_error_prevents_body_and_records_one_issue() {
        let (handler, events) = collector();
        let config = Configuration::new().on_event(move |e| handler(e));

        let ran = Arc::new(AtomicBool::new(false));
        let body_ran = Arc::clone(&ran);
        let tests = vec![Test::new(TestId::new(["t"]), loc(1), move || {
            let body_ran = Arc::clone(&body_ran);
            async move {
                body_ran.store(true, Ordering::SeqCst);
                Ok(())
            }
        })
        .with_trait(TestTrait::CustomExecution(Arc::new(RefusesToRun)))];
        run_all(tests, config).await;

        assert!(!ran.load(Ordering::SeqCst), "body must never execute");

        let events = events.lock().unwrap();
        let issues: Vec<&Issue> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::IssueRecorded(issue) => Some(issue),
                _ => None,
            })
            .collect();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::ErrorCaught);
        assert_eq!(issues[0].comments[0], "wrapper refused");
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_limit_cancels_the_case() {
        let (handler, events) = collector();
        let config = Configuration::new()
            .parallelized(false)
            .default_time_limit(Duration::from_secs(1))
            .time_limit_granularity(Duration::from_secs(1))
            .on_event(move |e| handler(e));

        let finished = Arc::new(AtomicBool::new(false));
        let body_finished = Arc::clone(&finished);
        let tests = vec![Test::new(TestId::new(["slow"]), loc(1), move || {
            let body_finished = Arc::clone(&body_finished);
            async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                body_finished.store(true, Ordering::SeqCst);
                Ok(())
            }
        })];
        run_all(tests, config).await;

        assert!(!finished.load(Ordering::SeqCst), "body must be cancelled");

        let events = events.lock().unwrap();
        assert_eq!(
            event_names(&events),
            vec![
                "runStarted",
                "testStarted",
                "testCaseStarted",
                "issueRecorded",
                "testCaseEnded",
                "testEnded",
                "runEnded",
            ]
        );
        match &events[3].kind {
            EventKind::IssueRecorded(issue) => {
                assert_eq!(issue.kind, IssueKind::TimeLimitExceeded)
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unconditional_repetitions_run_to_the_maximum() {
        let (handler, _events) = collector();
        let config = Configuration::new()
            .repetition_policy(RepetitionPolicy::repeating(3))
            .on_event(move |e| handler(e));

        let invocations = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&invocations);
        let tests = vec![Test::new(TestId::new(["t"]), loc(1), move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })];
        run_all(tests, config).await;

        assert_eq!(invocations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_while_issue_recorded_stops_once_an_iteration_passes() {
        let (handler, events) = collector();
        let config = Configuration::new()
            .repetition_policy(RepetitionPolicy::while_issue_recorded(10))
            .on_event(move |e| handler(e));

        let invocations = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&invocations);
        let tests = vec![Test::new(TestId::new(["flaky"]), loc(1), move || {
            let seen = Arc::clone(&seen);
            async move {
                // Fails twice, then passes.
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestFailure::new("not yet"))
                } else {
                    Ok(())
                }
            }
        })];
        run_all(tests, config).await;

        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        // One started/ended pair brackets all iterations.
        let names = event_names(&events.lock().unwrap());
        assert_eq!(names.iter().filter(|n| **n == "testCaseStarted").count(), 1);
        assert_eq!(names.iter().filter(|n| **n == "testCaseEnded").count(), 1);
    }

    #[tokio::test]
    async fn test_until_issue_recorded_stops_at_first_failure() {
        let (handler, _events) = collector();
        let config = Configuration::new()
            .repetition_policy(RepetitionPolicy::until_issue_recorded(10))
            .on_event(move |e| handler(e));

        let invocations = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&invocations);
        let tests = vec![Test::new(TestId::new(["wears-out"]), loc(1), move || {
            let seen = Arc::clone(&seen);
            async move {
                // Passes twice, fails on the third run.
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(())
                } else {
                    Err(TestFailure::new("gave out"))
                }
            }
        })];
        run_all(tests, config).await;

        assert_eq!(invocations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failing_test_does_not_stop_the_run() {
        let (handler, events) = collector();
        let config = Configuration::new()
            .parallelized(false)
            .on_event(move |e| handler(e));

        let tests = vec![
            Test::new(TestId::new(["fails"]), loc(1), || async {
                Err(TestFailure::new("broken"))
            }),
            Test::new(TestId::new(["passes"]), loc(2), || async { Ok(()) }),
        ];
        run_all(tests, config).await;

        let events = events.lock().unwrap();
        let names = event_names(&events);
        assert_eq!(names.last(), Some(&"runEnded"));
        assert_eq!(names.iter().filter(|n| **n == "testEnded").count(), 2);
        assert_eq!(names.iter().filter(|n| **n == "issueRecorded").count(), 1);
    }

    #[tokio::test]
    async fn test_known_issue_does_not_fail_the_case() {
        let (handler, events) = collector();
        let config = Configuration::new()
            .repetition_policy(RepetitionPolicy::until_issue_recorded(3))
            .on_event(move |e| handler(e));

        let invocations = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&invocations);
        let tests = vec![Test::new(TestId::new(["t"]), loc(1), move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                record_known_issue(Issue::new(IssueKind::ErrorCaught, "expected wart"));
                Ok(())
            }
        })];
        run_all(tests, config).await;

        // A known issue never satisfies until-issue-recorded, so all
        // three iterations run.
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        let names = event_names(&events.lock().unwrap());
        assert_eq!(
            names.iter().filter(|n| **n == "knownIssueRecorded").count(),
            3
        );
        assert_eq!(names.iter().filter(|n| **n == "issueRecorded").count(), 0);
    }

    #[tokio::test]
    async fn test_synthesized_ancestor_suites_are_traversed() {
        let (handler, events) = collector();
        let config = Configuration::new()
            .parallelized(false)
            .on_event(move |e| handler(e));

        // Only the leaf is registered; its ancestor suites come from
        // plan synthesis and must still be walked through.
        let tests = vec![Test::new(TestId::new(["a", "b", "c", "t"]), loc(1), || async {
            Ok(())
        })];
        run_all(tests, config).await;

        let events = events.lock().unwrap();
        assert_eq!(
            event_names(&events),
            vec![
                "runStarted",
                "testStarted",
                "testCaseStarted",
                "testCaseEnded",
                "testEnded",
                "runEnded",
            ]
        );
        assert_eq!(
            events[1].test_id,
            Some(TestId::new(["a", "b", "c", "t"]))
        );
    }

    #[tokio::test]
    async fn test_parameterized_cases_each_get_their_own_events() {
        let (handler, events) = collector();
        let config = Configuration::new()
            .parallelized(false)
            .on_event(move |e| handler(e));

        let generator = CaseGenerator::from_collection(
            &[Parameter::new(0, "n")],
            vec![1, 2, 3],
            |_n| async { Ok(()) },
        );
        let tests = vec![Test::parameterized(
            TestId::new(["p"]),
            loc(1),
            vec![Parameter::new(0, "n")],
            generator,
        )];
        run_all(tests, config).await;

        let names = event_names(&events.lock().unwrap());
        assert_eq!(names.iter().filter(|n| **n == "testStarted").count(), 1);
        assert_eq!(names.iter().filter(|n| **n == "testCaseStarted").count(), 3);
        assert_eq!(names.iter().filter(|n| **n == "testCaseEnded").count(), 3);
        assert_eq!(names.iter().filter(|n| **n == "testEnded").count(), 1);
    }

    #[tokio::test]
    async fn test_case_events_bracket_issues_under_parallel_fanout() {
        let (handler, events) = collector();
        let config = Configuration::new()
            .parallelized(true)
            .on_event(move |e| handler(e));

        let generator = CaseGenerator::from_collection(
            &[Parameter::new(0, "n")],
            0..50,
            |n: i32| async move {
                record_issue(Issue::new(IssueKind::ExpectationFailed, n.to_string()));
                Ok(())
            },
        );
        let tests = vec![Test::parameterized(
            TestId::new(["p"]),
            loc(1),
            vec![Parameter::new(0, "n")],
            generator,
        )];
        run_all(tests, config).await;

        // Per-case bracketing holds even with unspecified interleaving:
        // every issue lands between its own case's start and end.
        let events = events.lock().unwrap();
        for (i, event) in events.iter().enumerate() {
            if let EventKind::IssueRecorded(_) = &event.kind {
                let case = event.case_id.clone().unwrap();
                let started = events[..i].iter().any(|e| {
                    matches!(e.kind, EventKind::TestCaseStarted)
                        && e.case_id.as_ref() == Some(&case)
                });
                let ended_before = events[..i].iter().any(|e| {
                    matches!(e.kind, EventKind::TestCaseEnded)
                        && e.case_id.as_ref() == Some(&case)
                });
                assert!(started && !ended_before);
            }
        }
    }
}
