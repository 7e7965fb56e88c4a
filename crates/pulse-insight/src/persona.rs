//! Persona rule table.
//!
//! Each category belongs to the first rule whose keyword occurs in its
//! identifier. A rule's share is the spend of its categories over total
//! spend. The winner is the highest share meeting its threshold, ties going
//! to table order. Discount-driven and fallback personas apply only when no
//! category rule qualifies.

use pulse_model::CategoryStat;

pub const BARGAIN_PERSONA: &str = "Bargain Hunter";
pub const FALLBACK_PERSONA: &str = "Explorer";
pub const NEWCOMER_PERSONA: &str = "Newcomer";

pub const CATEGORY_SHARE_THRESHOLD: f64 = 0.40;
pub const BARGAIN_DISCOUNT_RATIO: f64 = 0.25;

#[derive(Debug, Clone, Copy)]
pub struct PersonaRule {
    pub persona: &'static str,
    pub keywords: &'static [&'static str],
    pub min_share: f64,
}

pub const PERSONA_RULES: &[PersonaRule] = &[
    PersonaRule {
        persona: "Family Man",
        keywords: &["kid", "child", "baby", "toddler", "toy", "school", "infant"],
        min_share: CATEGORY_SHARE_THRESHOLD,
    },
    PersonaRule {
        persona: "Green Flag",
        keywords: &["organic", "eco", "sustainable", "vegan", "green", "recycled"],
        min_share: CATEGORY_SHARE_THRESHOLD,
    },
    PersonaRule {
        persona: "Tech Enthusiast",
        keywords: &["tech", "electronic", "gadget", "computer", "phone", "gaming"],
        min_share: CATEGORY_SHARE_THRESHOLD,
    },
    PersonaRule {
        persona: "Trendsetter",
        keywords: &[
            "fashion", "apparel", "clothing", "shoe", "footwear", "accessor", "jewel", "beauty",
        ],
        min_share: CATEGORY_SHARE_THRESHOLD,
    },
    PersonaRule {
        persona: "Home Curator",
        keywords: &["home", "furniture", "decor", "kitchen", "garden"],
        min_share: CATEGORY_SHARE_THRESHOLD,
    },
    PersonaRule {
        persona: "Foodie",
        keywords: &["grocery", "food", "snack", "beverage", "coffee", "bakery"],
        min_share: CATEGORY_SHARE_THRESHOLD,
    },
];

/// Index of the first rule claiming `category`.
pub fn rule_for(category: &str) -> Option<usize> {
    let category = category.to_ascii_lowercase();
    PERSONA_RULES
        .iter()
        .position(|rule| rule.keywords.iter().any(|k| category.contains(k)))
}

/// Assign a persona from ranked category stats and the discount ratio.
pub fn assign(categories: &[CategoryStat], total_spend_cents: i64, discount_ratio: f64) -> &'static str {
    if categories.is_empty() {
        return NEWCOMER_PERSONA;
    }

    let mut spend = vec![0i64; PERSONA_RULES.len()];
    for stat in categories {
        if let Some(idx) = rule_for(&stat.category) {
            spend[idx] += stat.spend_cents;
        }
    }

    let mut best: Option<(usize, f64)> = None;
    if total_spend_cents > 0 {
        for (idx, rule) in PERSONA_RULES.iter().enumerate() {
            let share = spend[idx] as f64 / total_spend_cents as f64;
            if share < rule.min_share {
                continue;
            }
            // Strictly greater keeps the earlier rule on ties.
            if best.map_or(true, |(_, s)| share > s) {
                best = Some((idx, share));
            }
        }
    }

    match best {
        Some((idx, _)) => PERSONA_RULES[idx].persona,
        None if discount_ratio >= BARGAIN_DISCOUNT_RATIO => BARGAIN_PERSONA,
        None => FALLBACK_PERSONA,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn stat(category: &str, spend_cents: i64) -> CategoryStat {
        CategoryStat {
            category: category.to_string(),
            count: 1,
            spend_cents,
            last_purchase_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_first_keyword_rule_claims_category() {
        // "kids-clothing" matches both Family Man and Trendsetter keywords.
        assert_eq!(rule_for("kids-clothing"), Some(0));
        assert_eq!(rule_for("Organic Snacks"), Some(1));
        assert_eq!(rule_for("hardware"), None);
    }

    #[test]
    fn test_kids_clothing_is_family_man() {
        let cats = vec![stat("kids-clothing", 5000)];
        assert_eq!(assign(&cats, 5000, 0.0), "Family Man");
    }

    #[test]
    fn test_highest_share_wins() {
        let cats = vec![stat("electronics", 6000), stat("toys", 4000)];
        assert_eq!(assign(&cats, 10_000, 0.0), "Tech Enthusiast");
    }

    #[test]
    fn test_ties_go_to_table_order() {
        let cats = vec![stat("coffee", 5000), stat("toys", 5000)];
        assert_eq!(assign(&cats, 10_000, 0.0), "Family Man");
    }

    #[test]
    fn test_bargain_and_fallback() {
        let cats = vec![stat("hardware", 3000), stat("toys", 1000), stat("coffee", 1000)];
        assert_eq!(assign(&cats, 5000, 0.3), BARGAIN_PERSONA);
        assert_eq!(assign(&cats, 5000, 0.1), FALLBACK_PERSONA);
        assert_eq!(assign(&[], 0, 0.9), NEWCOMER_PERSONA);
    }
}
