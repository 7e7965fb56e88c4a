//! Property-based tests for the insight pipeline
//!
//! 1. Summaries are a pure function of their rows
//! 2. Summary invariants (ranking, palette, persona) always hold
//! 3. Success priors stay on the 0–100 scale
//! 4. Scores are always clamped into range
//! 5. Rendered prompts respect the byte budget or fail loudly

use chrono::{Duration, TimeZone, Utc};
use pulse_insight::persona::{self, PERSONA_RULES};
use pulse_insight::validate::clamp_score;
use pulse_insight::voice::success_prior;
use pulse_insight::{summarize, PromptAssembler, PromptError, PromptLimits};
use pulse_model::{BehaviorWindow, OutcomeCounts, TransactionEvent};
use pulse_storage::JoinedRows;
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn window() -> BehaviorWindow {
    BehaviorWindow::trailing(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(), 12).unwrap()
}

fn category_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("toys".to_string()),
        Just("kids-clothing".to_string()),
        Just("electronics".to_string()),
        Just("organic-produce".to_string()),
        Just("coffee".to_string()),
        Just("hardware".to_string()),
        "[a-z]{3,8}",
    ]
}

fn tag_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("red".to_string()),
        Just("blue".to_string()),
        Just("green".to_string()),
        Just("pink".to_string()),
        "[a-z]{3,6}",
    ]
}

fn event_strategy() -> impl Strategy<Value = TransactionEvent> {
    (
        0i64..360,
        category_strategy(),
        1i64..50_000,
        1u32..5,
        0i64..500,
        prop::collection::vec(tag_strategy(), 0..3),
    )
        .prop_map(|(days_back, category, amount_cents, quantity, discount_cents, mut tags)| {
            tags.sort();
            tags.dedup();
            TransactionEvent {
                transaction_id: Some(format!("t{days_back}-{amount_cents}")),
                customer_id: "c1".to_string(),
                occurred_at: window().end - Duration::days(days_back + 1),
                category,
                amount_cents,
                quantity,
                discount_cents: discount_cents.min(amount_cents),
                tags,
            }
        })
}

fn rows_strategy() -> impl Strategy<Value = JoinedRows> {
    prop::collection::vec(event_strategy(), 0..40).prop_map(|mut transactions| {
        transactions.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then(a.transaction_id.cmp(&b.transaction_id))
        });
        JoinedRows {
            transactions,
            ..JoinedRows::default()
        }
    })
}

// ============================================================================
// Summary properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn summary_is_deterministic(rows in rows_strategy()) {
        let a = summarize("c1", window(), &rows, 20);
        let b = summarize("c1", window(), &rows, 20);
        prop_assert_eq!(serde_json::to_vec(&a).unwrap(), serde_json::to_vec(&b).unwrap());
    }

    #[test]
    fn summary_invariants_hold(rows in rows_strategy()) {
        let summary = summarize("c1", window(), &rows, 20);

        prop_assert_eq!(summary.insufficient_data, rows.transactions.is_empty());
        prop_assert!(summary.palette.len() <= 3);
        prop_assert!(summary.recent_transactions.len() <= 20);
        prop_assert!((0.0..=1.0).contains(&summary.metrics.discount_ratio));
        prop_assert_eq!(
            summary.categories.iter().map(|c| c.spend_cents).sum::<i64>(),
            summary.total_spend_cents
        );
        for pair in summary.categories.windows(2) {
            prop_assert!(pair[0].spend_cents >= pair[1].spend_cents);
        }

        let known: Vec<&str> = PERSONA_RULES
            .iter()
            .map(|r| r.persona)
            .chain([persona::BARGAIN_PERSONA, persona::FALLBACK_PERSONA, persona::NEWCOMER_PERSONA])
            .collect();
        prop_assert!(known.contains(&summary.persona.as_str()));
    }

    #[test]
    fn prior_stays_in_range(sent in 0u64..50, read in 0u64..50, unsent in 0u64..50) {
        let prior = success_prior(&OutcomeCounts { sent, read, unsent });
        prop_assert!((0.0..=100.0).contains(&prior));
    }

    #[test]
    fn score_always_clamped(score in prop::num::f64::NORMAL | prop::num::f64::ZERO) {
        let clamped = clamp_score(score);
        prop_assert!(clamped <= 100);
        if (0.0..=100.0).contains(&score) {
            prop_assert!((f64::from(clamped) - score).abs() <= 0.5);
        }
    }

    #[test]
    fn prompt_fits_budget_or_errors(rows in rows_strategy(), max in 600usize..6000) {
        let summary = summarize("c1", window(), &rows, 20);
        let assembler = PromptAssembler::new(PromptLimits {
            max_input_bytes: max,
            ..PromptLimits::default()
        });
        match assembler.vibe(&summary) {
            Ok(prompt) => prop_assert!(prompt.byte_len() <= max),
            Err(err) => prop_assert!(matches!(err, PromptError::TooLarge { .. }), "unexpected error"),
        }
    }
}
