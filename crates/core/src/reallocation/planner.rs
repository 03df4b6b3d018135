//! Pure planning of merges, row swaps and reallocation credit for one entity.

use std::collections::HashSet;

use log::debug;
use uuid::Uuid;

use super::match_rules::{MatchRule, MATCH_RULES};
use super::reallocation_model::{AcceptedMatch, MergePlan, ReallocationPlan};
use crate::balances::{
    relations_match, BalanceItem, BalanceItemPayment, BalanceItemPaymentDetail, BalanceItemStatus,
    JoinRowChange,
};
use crate::constants::MERGE_RELATION_TOLERANCE;

/// Finds non-Due duplicates whose payments belong on a Due item.
///
/// `items` are all outstanding items of the entity, `overdue` the subset past
/// its due date. Only overdue items are merged, but any Due twin in `items`
/// makes the target ambiguous and blocks the merge.
pub fn plan_merges(items: &[BalanceItem], overdue: &[BalanceItem]) -> Vec<MergePlan> {
    let similar = |a: &BalanceItem, b: &BalanceItem| {
        a.id != b.id
            && a.item_type == b.item_type
            && relations_match(&a.relations, &b.relations, MERGE_RELATION_TOLERANCE)
    };

    let mut merged: HashSet<&str> = HashSet::new();
    let mut plans = Vec::new();

    for target in overdue
        .iter()
        .filter(|item| item.status == BalanceItemStatus::Due)
    {
        let has_due_twin = items
            .iter()
            .any(|other| other.status == BalanceItemStatus::Due && similar(other, target));
        if has_due_twin {
            debug!("Not merging into {}: another Due item matches", target.id);
            continue;
        }

        let sources: Vec<&BalanceItem> = overdue
            .iter()
            .filter(|other| {
                other.status != BalanceItemStatus::Due
                    && (other.price_paid != 0 || other.price_pending != 0)
                    && !merged.contains(other.id.as_str())
                    && similar(other, target)
            })
            .collect();
        if sources.is_empty() {
            continue;
        }

        merged.extend(sources.iter().map(|source| source.id.as_str()));
        plans.push(MergePlan {
            into_id: target.id.clone(),
            from_ids: sources.iter().map(|source| source.id.clone()).collect(),
        });
    }
    plans
}

/// An item with the part of its open amount not yet reallocated.
#[derive(Debug, Clone)]
struct Candidate {
    item: BalanceItem,
    remaining: i64,
}

impl Candidate {
    fn new(item: BalanceItem) -> Self {
        let remaining = item.price_open;
        Self { item, remaining }
    }

    fn changed(&self) -> bool {
        self.remaining != self.item.price_open
    }
}

#[derive(Debug, Clone, Copy)]
struct SwapPass {
    exact_only: bool,
    split: bool,
}

/// Moves exact fits first, then any fitting row, then splits rows that are too large.
const SWAP_PASSES: [SwapPass; 3] = [
    SwapPass {
        exact_only: true,
        split: false,
    },
    SwapPass {
        exact_only: false,
        split: false,
    },
    SwapPass {
        exact_only: false,
        split: true,
    },
];

/// Greedy pairing of credit (negative open amounts) with open amounts of one entity.
///
/// The planner never writes. It records every row edit and credit entry in a
/// [`ReallocationPlan`] that the caller persists once the plan is complete.
pub struct ReallocationPlanner {
    negatives: Vec<Candidate>,
    positives: Vec<Candidate>,
    /// Rows of payments that may be moved, in load order.
    rows: Vec<BalanceItemPayment>,
    plan: ReallocationPlan,
}

impl ReallocationPlanner {
    pub fn new(items: Vec<BalanceItem>, rows: Vec<BalanceItemPaymentDetail>) -> Self {
        let mut negatives = Vec::new();
        let mut positives = Vec::new();
        for item in items {
            if item.price_open < 0 {
                negatives.push(Candidate::new(item));
            } else if item.price_open > 0 {
                positives.push(Candidate::new(item));
            }
        }

        let negative_total: i64 = negatives.iter().map(|c| c.remaining).sum();
        let positive_total: i64 = positives.iter().map(|c| c.remaining).sum();

        Self {
            negatives,
            positives,
            rows: rows
                .into_iter()
                .filter(BalanceItemPaymentDetail::is_movable)
                .map(|detail| detail.row)
                .collect(),
            plan: ReallocationPlan {
                can_reach_zero: negative_total == -positive_total,
                ..ReallocationPlan::default()
            },
        }
    }

    pub fn plan(mut self) -> ReallocationPlan {
        if self.negatives.is_empty() || self.positives.is_empty() {
            return self.plan;
        }

        for (index, rule) in MATCH_RULES.iter().enumerate() {
            self.run_rule(index, rule);
        }

        self.plan.touched_ids = self
            .negatives
            .iter()
            .chain(self.positives.iter())
            .filter(|candidate| candidate.changed())
            .map(|candidate| candidate.item.id.clone())
            .collect();
        self.plan
    }

    fn run_rule(&mut self, index: usize, rule: &MatchRule) {
        // Largest credit first.
        self.negatives.sort_by_key(|candidate| candidate.remaining);
        // Earliest due first, items without a due date before all others, then largest.
        self.positives.sort_by(|a, b| {
            a.item
                .due_at
                .cmp(&b.item.due_at)
                .then(b.remaining.cmp(&a.remaining))
        });

        for n in 0..self.negatives.len() {
            let negative = &self.negatives[n];
            if negative.remaining >= 0 {
                continue;
            }

            let can_reach_zero = self.plan.can_reach_zero;
            let found = self.positives.iter().position(|positive| {
                positive.remaining > 0
                    && rule.matches(
                        &negative.item,
                        negative.remaining,
                        &positive.item,
                        positive.remaining,
                    )
                    && (rule.rewrite_rows
                        || can_reach_zero
                        || positive.remaining == -negative.remaining)
            });
            let Some(p) = found else {
                continue;
            };

            if rule.rewrite_rows {
                self.swap(n, p, index);
            } else {
                self.credit(n, p, index);
            }
        }
    }

    fn credit(&mut self, n: usize, p: usize, rule: usize) {
        let negative = &mut self.negatives[n];
        let positive = &mut self.positives[p];
        let amount = positive.remaining.min(-negative.remaining);

        self.plan.matches.push(AcceptedMatch {
            negative_id: negative.item.id.clone(),
            positive_id: positive.item.id.clone(),
            amount,
            rule,
            negative_remaining: negative.remaining,
            positive_remaining: positive.remaining,
            rewrote_rows: false,
        });

        negative.remaining += amount;
        positive.remaining -= amount;
        self.plan.add_credit(&negative.item.id, -amount);
        self.plan.add_credit(&positive.item.id, amount);
    }

    fn swap(&mut self, n: usize, p: usize, rule: usize) {
        let negative_id = self.negatives[n].item.id.clone();
        let positive_id = self.positives[p].item.id.clone();
        let indices: Vec<usize> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.balance_item_id == negative_id || row.balance_item_id == positive_id)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return;
        }

        let negative_before = self.negatives[n].remaining;
        let positive_before = self.positives[p].remaining;
        for pass in SWAP_PASSES {
            self.swap_pass(&indices, n, p, pass);
        }

        let amount = self.negatives[n].remaining - negative_before;
        if amount != 0 {
            self.plan.matches.push(AcceptedMatch {
                negative_id,
                positive_id,
                amount,
                rule,
                negative_remaining: negative_before,
                positive_remaining: positive_before,
                rewrote_rows: true,
            });
        }
    }

    fn swap_pass(&mut self, indices: &[usize], n: usize, p: usize, pass: SwapPass) {
        let negative_id = self.negatives[n].item.id.clone();
        let positive_id = self.positives[p].item.id.clone();

        for &i in indices {
            if self.negatives[n].remaining >= 0 || self.positives[p].remaining <= 0 {
                return;
            }
            let negative_remaining = self.negatives[n].remaining;
            let positive_remaining = self.positives[p].remaining;
            let price = self.rows[i].price;

            // Refunds on the open item belong on the credit item, and payments
            // on the credit item belong on the open item.
            let (to, moved) = if self.rows[i].balance_item_id == positive_id {
                if price >= 0 {
                    continue;
                }
                let fits = price >= negative_remaining && price >= -positive_remaining;
                let exact = price == negative_remaining || price == -positive_remaining;
                let split = -(-negative_remaining).min(positive_remaining);
                (&negative_id, self.move_row(i, &negative_id, pass, fits, exact, split))
            } else {
                if price <= 0 {
                    continue;
                }
                let fits = price <= -negative_remaining && price <= positive_remaining;
                let exact = price == -negative_remaining || price == positive_remaining;
                let split = (-negative_remaining).min(positive_remaining);
                (&positive_id, self.move_row(i, &positive_id, pass, fits, exact, split))
            };
            let Some(moved) = moved else {
                continue;
            };

            // A row moved onto the credit item lowers its paid amount, and the other way round.
            let delta = if to == &negative_id { -moved } else { moved };
            self.negatives[n].remaining += delta;
            self.positives[p].remaining -= delta;
        }
    }

    /// Re-points or splits row `i` towards `to`. Returns the price that moved.
    fn move_row(
        &mut self,
        i: usize,
        to: &str,
        pass: SwapPass,
        fits: bool,
        exact: bool,
        split_price: i64,
    ) -> Option<i64> {
        if fits {
            if pass.exact_only && !exact {
                return None;
            }
            let row = &mut self.rows[i];
            row.balance_item_id = to.to_string();
            self.plan.row_changes.push(JoinRowChange::Reassign {
                row_id: row.id.clone(),
                balance_item_id: to.to_string(),
            });
            return Some(row.price);
        }
        if !pass.split {
            return None;
        }

        let row = &mut self.rows[i];
        row.price -= split_price;
        let new_row = BalanceItemPayment {
            id: Uuid::new_v4().to_string(),
            organization_id: row.organization_id.clone(),
            balance_item_id: to.to_string(),
            payment_id: row.payment_id.clone(),
            price: split_price,
        };
        self.plan.row_changes.push(JoinRowChange::Split {
            row_id: row.id.clone(),
            remaining_price: row.price,
            new_row: new_row.clone(),
        });
        // Later swaps of other pairs see the new fragment.
        self.rows.push(new_row);
        Some(split_price)
    }
}
