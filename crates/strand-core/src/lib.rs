//! Strand is an engine for declaring and executing async test suites.
//!
//! A run happens in two phases. First, declared tests are resolved into a
//! [`Plan`]: filters select tests, suite hierarchy is reconstructed,
//! traits and configuration settle each step's concurrency eligibility,
//! skip status, and time limit. Then a [`Runner`] executes the plan under
//! structured concurrency, emitting a timestamped [`Event`] stream that
//! observers consume through the configured handler.
//!
//! ```no_run
//! use strand_core::{Configuration, Plan, Runner, Test, TestId};
//! use strand_core::test::SourceLocation;
//!
//! # async fn demo() {
//! let tests = vec![Test::new(
//!     TestId::new(["math", "addition"]),
//!     SourceLocation::new("math.rs", 12, 1),
//!     || async {
//!         strand_core::runner::require(2 + 2 == 4, "arithmetic holds")?;
//!         Ok(())
//!     },
//! )];
//!
//! let config = Configuration::new().on_event(|event| {
//!     println!("{} {:?}", event.kind.name(), event.test_id);
//! });
//! let plan = Plan::new(tests, &config);
//! Runner::new(plan, config).run().await;
//! # }
//! ```

pub mod cases;
pub mod clock;
pub mod config;
pub mod event;
pub mod filter;
pub mod graph;
pub mod planning;
pub mod registry;
pub mod runner;
pub mod traits;

pub use cases::{Argument, CaseGenerator, CaseId, CaseResult, TestCase};
pub use clock::Timestamp;
pub use config::{
    ConfigError, Configuration, ContinuationCondition, RepetitionPolicy, RunOptions,
};
pub use event::{Event, EventHandler, EventKind, Issue, IssueKind, TestFailure};
pub use filter::TestFilter;
pub use graph::Graph;
pub use planning::{Action, Plan, PlanStep, SkipReason};
pub use registry::TestRegistry;
pub use runner::{
    current_case, expect, record_issue, record_known_issue, require, CaseContext, Runner,
};
pub use test::{Parameter, SourceLocation, Test, TestId};
pub use traits::{Condition, Continuation, CustomExecution, TestTrait};
