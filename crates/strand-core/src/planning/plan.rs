use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;

use crate::config::Configuration;
use crate::graph::Graph;
use crate::test::{Test, TestId};
use crate::traits;

/// Why a step was resolved to skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The test was excluded by the run's filter. Recorded on ancestor
    /// suites inserted only for structural completeness; does not
    /// propagate to their (passing) descendants.
    Filtered,
    /// A conditional trait disabled the test. Propagates to all
    /// descendants.
    Disabled(String),
}

impl SkipReason {
    pub fn message(&self) -> &str {
        match self {
            SkipReason::Filtered => "filtered",
            SkipReason::Disabled(reason) => reason,
        }
    }
}

/// What the runner does with a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Run,
    Skip(SkipReason),
}

impl Action {
    pub fn is_run(&self) -> bool {
        matches!(self, Action::Run)
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Action::Skip(_))
    }
}

/// One node of the resolved execution tree.
#[derive(Debug, Clone)]
pub struct PlanStep {
    pub test: Test,
    pub action: Action,
    /// Effective flag: false if this step or any ancestor serializes, or
    /// if the run disables parallelization. Monotonic down every ancestor
    /// chain: never re-enabled below a disabling ancestor.
    pub parallelized: bool,
    /// The enforceable per-case time limit, fully resolved (inheritance,
    /// maximum clamp, default fallback, granularity round-up).
    pub time_limit: Option<Duration>,
    /// Limit declared on this test or inherited from an ancestor, before
    /// clamping and rounding.
    pub(crate) declared_time_limit: Option<Duration>,
    /// Declaration order, used to order sibling steps.
    pub(crate) ordinal: usize,
}

/// The resolved, immutable tree of executable steps derived from the
/// registered tests, their traits, and the run configuration.
///
/// Immutable once built; inspection ([`Plan::steps`], [`Plan::dump`]) has
/// no side effects.
#[derive(Debug, Clone)]
pub struct Plan {
    graph: Graph<String, PlanStep>,
}

impl Plan {
    /// Builds the plan for `tests` under `config`.
    ///
    /// Tests excluded by the filter are dropped; ancestor suites needed to
    /// reach a surviving test are inserted even when they themselves were
    /// filtered out, marked `Skip(Filtered)`. Serialization constraints,
    /// disabling conditions on suites, and declared time limits propagate
    /// downward; children are ordered by declaration order.
    pub fn new(tests: Vec<Test>, config: &Configuration) -> Self {
        let selected: Vec<bool> = tests
            .iter()
            .map(|t| config.test_filter.matches(t))
            .collect();

        // Every prefix path required to reach a selected test, with the
        // smallest ordinal of any selected test beneath it.
        let mut needed: HashMap<Vec<String>, usize> = HashMap::new();
        for (ordinal, test) in tests.iter().enumerate() {
            if !selected[ordinal] {
                continue;
            }
            let segments = test.id.segments();
            for depth in 1..=segments.len() {
                needed
                    .entry(segments[..depth].to_vec())
                    .and_modify(|o| *o = (*o).min(ordinal))
                    .or_insert(ordinal);
            }
        }

        let mut graph: Graph<String, PlanStep> = Graph::new();
        let mut inserted: HashSet<Vec<String>> = HashSet::new();

        for (ordinal, test) in tests.into_iter().enumerate() {
            let path = test.id.segments().to_vec();
            if selected[ordinal] {
                let step = Self::resolve(test, ordinal, config);
                inserted.insert(path.clone());
                graph.insert(&path, step);
            } else if test.is_suite() && needed.contains_key(&path) {
                // Present for structure only; its own gating is moot, but
                // serialization and time limits still flow to descendants.
                let mut step = Self::resolve(test, ordinal, config);
                step.action = Action::Skip(SkipReason::Filtered);
                inserted.insert(path.clone());
                graph.insert(&path, step);
            }
        }

        // Ancestors never registered at all become synthetic suites.
        let mut missing: Vec<(Vec<String>, usize)> = needed
            .into_iter()
            .filter(|(path, _)| !inserted.contains(path))
            .collect();
        missing.sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        for (path, ordinal) in missing {
            // Leaf paths always correspond to a registered test; only
            // suite levels can be missing.
            if graph.get(&path).is_some() {
                continue;
            }
            let id = TestId::new(path.clone());
            let location = crate::test::SourceLocation::new("<synthesized>", 0, 0);
            let test = Test::suite(id, location);
            let mut step = Self::resolve(test, ordinal, config);
            step.ordinal = ordinal;
            graph.insert(&path, step);
        }

        // Inherited effects flow top-down in one pass: a disabling
        // ancestor skips its descendants, serialization is monotonic, and
        // a declared time limit applies to nested tests unless overridden.
        graph.propagate_down(|parent, child| {
            let Some(parent) = parent else { return };
            child.parallelized = child.parallelized && parent.parallelized;
            if child.declared_time_limit.is_none() {
                child.declared_time_limit = parent.declared_time_limit;
            }
            if let Action::Skip(SkipReason::Disabled(reason)) = &parent.action {
                if !matches!(child.action, Action::Skip(SkipReason::Disabled(_))) {
                    child.action = Action::Skip(SkipReason::Disabled(reason.clone()));
                }
            }
        });

        let default = config.default_test_time_limit;
        let maximum = config.maximum_test_time_limit;
        let granularity = config.test_time_limit_granularity;
        graph.for_each_value_mut(|step| {
            step.time_limit = traits::resolve_time_limit(
                step.declared_time_limit,
                default,
                maximum,
                granularity,
            );
        });

        graph.sort_children_by(|a, b| {
            a.ordinal
                .cmp(&b.ordinal)
                .then_with(|| a.test.location.cmp(&b.test.location))
                .then_with(|| a.test.id.cmp(&b.test.id))
        });

        debug!(steps = graph.len(), "built execution plan");
        Self { graph }
    }

    /// Resolves one test's own step, before downward propagation.
    fn resolve(test: Test, ordinal: usize, config: &Configuration) -> PlanStep {
        let action = match traits::disabled_reason(&test) {
            Some(reason) => Action::Skip(SkipReason::Disabled(reason)),
            None => Action::Run,
        };
        let parallelized =
            config.parallelization_enabled && !traits::is_serializing(&test);
        let declared_time_limit = traits::declared_time_limit(&test);
        PlanStep {
            test,
            action,
            parallelized,
            time_limit: None,
            declared_time_limit,
            ordinal,
        }
    }

    /// The steps in traversal order (depth-first, declaration order at
    /// each level).
    pub fn steps(&self) -> Vec<(TestId, &PlanStep)> {
        self.graph
            .traverse()
            .into_iter()
            .map(|(path, step)| (TestId::new(path), step))
            .collect()
    }

    /// The step for a specific test, if it is part of the plan.
    pub fn step(&self, id: &TestId) -> Option<&PlanStep> {
        self.graph.get(id.segments())
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub(crate) fn graph(&self) -> &Graph<String, PlanStep> {
        &self.graph
    }

    /// Renders the plan for diagnostics: one row per step, in traversal
    /// order, with the resolved action and concurrency mode.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (path, step) in self.graph.traverse() {
            let indent = "  ".repeat(path.len().saturating_sub(1));
            let action = match &step.action {
                Action::Run => "run".to_string(),
                Action::Skip(reason) => format!("skip: {}", reason.message()),
            };
            let mode = if step.parallelized { "parallel" } else { "serial" };
            let _ = writeln!(out, "{indent}{} [{action}] [{mode}]", path.join("::"));
        }
        out
    }
}
