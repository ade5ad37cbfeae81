mod plan;

pub use plan::{Action, Plan, PlanStep, SkipReason};
