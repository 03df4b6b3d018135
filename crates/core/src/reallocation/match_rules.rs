//! Ordered matching rules for pairing credit with open amounts.

use crate::balances::{relations_match, BalanceItem};

/// One tier of the reallocation search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRule {
    pub name: &'static str,
    pub same_type: bool,
    /// Relation mismatches tolerated, or `None` when relations are ignored.
    pub relation_tolerance: Option<usize>,
    /// Only pair items whose remaining amounts cancel out exactly.
    pub exact_amount: bool,
    /// Move existing payment rows instead of creating reallocation credit.
    pub rewrite_rows: bool,
}

impl MatchRule {
    const fn new(
        name: &'static str,
        same_type: bool,
        relation_tolerance: Option<usize>,
        exact_amount: bool,
        rewrite_rows: bool,
    ) -> Self {
        Self {
            name,
            same_type,
            relation_tolerance,
            exact_amount,
            rewrite_rows,
        }
    }

    /// Whether a negative item with `negative_remaining` may be paired with a
    /// positive item with `positive_remaining` under this rule.
    pub fn matches(
        &self,
        negative: &BalanceItem,
        negative_remaining: i64,
        positive: &BalanceItem,
        positive_remaining: i64,
    ) -> bool {
        if self.exact_amount && positive_remaining != -negative_remaining {
            return false;
        }
        if self.same_type && positive.item_type != negative.item_type {
            return false;
        }
        match self.relation_tolerance {
            Some(tolerance) => relations_match(&positive.relations, &negative.relations, tolerance),
            None => true,
        }
    }
}

/// Tiers from most to least specific. Every negative item is tried against
/// each tier before moving on to the next one.
pub const MATCH_RULES: [MatchRule; 12] = [
    MatchRule::new("same relations, exact, rewrite", true, Some(0), true, true),
    MatchRule::new("same relations, exact", true, Some(0), true, false),
    MatchRule::new("same relations, rewrite", true, Some(0), false, true),
    MatchRule::new("same relations", true, Some(0), false, false),
    MatchRule::new("one relation differs, exact", true, Some(1), true, false),
    MatchRule::new("one relation differs", true, Some(1), false, false),
    MatchRule::new("two relations differ, exact", true, Some(2), true, false),
    MatchRule::new("two relations differ", true, Some(2), false, false),
    MatchRule::new("same type, exact", true, None, true, false),
    MatchRule::new("exact", false, None, true, false),
    MatchRule::new("same type", true, None, false, false),
    MatchRule::new("any", false, None, false, false),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balances::test_support::{item, registration_relations};
    use crate::balances::BalanceItemType;

    #[test]
    fn test_rules_run_from_specific_to_generic() {
        assert!(MATCH_RULES[0].rewrite_rows && MATCH_RULES[0].exact_amount);
        assert!(MATCH_RULES[2].rewrite_rows && !MATCH_RULES[2].exact_amount);
        assert_eq!(
            MATCH_RULES.iter().filter(|rule| rule.rewrite_rows).count(),
            2
        );
        let last = MATCH_RULES[MATCH_RULES.len() - 1];
        assert!(!last.same_type && last.relation_tolerance.is_none() && !last.exact_amount);
    }

    #[test]
    fn test_exact_rules_need_cancelling_amounts() {
        let mut negative = item("n", 3000);
        negative.relations = registration_relations("defaultprice");
        let mut positive = item("p", 3000);
        positive.relations = registration_relations("defaultprice");

        assert!(MATCH_RULES[0].matches(&negative, -3000, &positive, 3000));
        assert!(!MATCH_RULES[0].matches(&negative, -3000, &positive, 2000));
        assert!(MATCH_RULES[2].matches(&negative, -3000, &positive, 2000));
    }

    #[test]
    fn test_type_and_relation_filters() {
        let mut negative = item("n", 3000);
        negative.relations = registration_relations("defaultprice");
        let mut positive = item("p", 3000);
        positive.relations = registration_relations("price2");

        assert!(!MATCH_RULES[3].matches(&negative, -3000, &positive, 3000));
        assert!(MATCH_RULES[5].matches(&negative, -3000, &positive, 3000));

        positive.item_type = BalanceItemType::Order;
        assert!(!MATCH_RULES[5].matches(&negative, -3000, &positive, 3000));
        assert!(!MATCH_RULES[8].matches(&negative, -3000, &positive, 3000));
        assert!(MATCH_RULES[9].matches(&negative, -3000, &positive, 3000));
        assert!(MATCH_RULES[11].matches(&negative, -3000, &positive, 100));
    }
}
