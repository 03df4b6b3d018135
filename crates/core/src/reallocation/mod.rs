//! Reallocation module - merges duplicate balance items and moves credit onto open items.

mod match_rules;
mod planner;
mod reallocation_model;
mod reallocation_service;
mod reallocation_traits;



pub use match_rules::{MatchRule, MATCH_RULES};
pub use planner::{plan_merges, ReallocationPlanner};
pub use reallocation_model::{
    AcceptedMatch, MergePlan, ReallocationOutcome, ReallocationPlan, ReallocationSummary,
};
pub use reallocation_service::PaymentReallocationService;
pub use reallocation_traits::PaymentReallocationServiceTrait;
