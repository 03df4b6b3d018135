//! Reallocation plans and outcomes.

use serde::{Deserialize, Serialize};

use crate::balances::{JoinRowChange, NewBalanceItemPayment};

/// Join rows of `from_ids` to be moved onto `into_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub into_id: String,
    pub from_ids: Vec<String>,
}

/// A pairing accepted by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedMatch {
    pub negative_id: String,
    pub positive_id: String,
    /// Amount that moved from the negative to the positive item.
    pub amount: i64,
    /// Index into [`super::MATCH_RULES`].
    pub rule: usize,
    pub negative_remaining: i64,
    pub positive_remaining: i64,
    /// Existing rows were moved rather than credit created.
    pub rewrote_rows: bool,
}

/// Everything a reallocation will write, computed before the first write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReallocationPlan {
    /// Whether all credit and all open amounts of the entity cancel out.
    pub can_reach_zero: bool,
    pub row_changes: Vec<JoinRowChange>,
    /// Signed credit per balance item, in first-touched order.
    pub credits: Vec<(String, i64)>,
    pub matches: Vec<AcceptedMatch>,
    /// Items whose open amount changed.
    pub touched_ids: Vec<String>,
}

impl ReallocationPlan {
    pub fn is_empty(&self) -> bool {
        self.row_changes.is_empty() && self.credits.is_empty()
    }

    pub fn credit_total(&self) -> i64 {
        self.credits.iter().map(|(_, amount)| amount).sum()
    }

    /// Rows of the reallocation payment. Items whose credit nets to zero get none.
    pub fn credit_rows(&self, organization_id: &str) -> Vec<NewBalanceItemPayment> {
        self.credits
            .iter()
            .filter(|(_, amount)| *amount != 0)
            .map(|(balance_item_id, amount)| NewBalanceItemPayment {
                organization_id: organization_id.to_string(),
                balance_item_id: balance_item_id.clone(),
                price: *amount,
            })
            .collect()
    }

    pub(crate) fn add_credit(&mut self, balance_item_id: &str, amount: i64) {
        match self
            .credits
            .iter_mut()
            .find(|(id, _)| id == balance_item_id)
        {
            Some((_, total)) => *total += amount,
            None => self.credits.push((balance_item_id.to_string(), amount)),
        }
    }
}

/// What a reallocation run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReallocationSummary {
    pub merged_items: usize,
    pub moved_rows: usize,
    pub matches: usize,
    pub reallocation_payment_id: Option<String>,
    pub updated_items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReallocationOutcome {
    /// Refused by the configured environment.
    Disabled,
    NothingToDo,
    Completed(ReallocationSummary),
}
