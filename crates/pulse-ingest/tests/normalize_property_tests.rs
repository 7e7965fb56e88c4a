//! Property tests for the normalizer: every row is accounted for exactly once,
//! and accepted records always satisfy the canonical invariants.

use proptest::prelude::*;
use pulse_ingest::{normalize_transactions, RawRecord};
use serde_json::{json, Value};

fn field_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-1000i64..100_000).prop_map(Value::from),
        (0.0f64..5000.0).prop_map(|f| json!(f)),
        "[a-z0-9 |,-]{0,12}".prop_map(Value::from),
        Just(json!("2024-11-05 08:15:00")),
        Just(json!("2024-11-05")),
    ]
}

fn raw_row() -> impl Strategy<Value = RawRecord> {
    (
        field_value(),
        field_value(),
        field_value(),
        field_value(),
        field_value(),
        field_value(),
    )
        .prop_map(|(cid, date, category, price, qty, tags)| {
            let mut row = RawRecord::new();
            row.insert("cid".into(), cid);
            row.insert("sales_date".into(), date);
            row.insert("item_category".into(), category);
            row.insert("sales_price".into(), price);
            row.insert("quantity".into(), qty);
            row.insert("colors".into(), tags);
            row
        })
}

proptest! {
    #[test]
    fn every_row_is_accepted_or_excluded(rows in prop::collection::vec(raw_row(), 0..40)) {
        let out = normalize_transactions(&rows);
        prop_assert_eq!(out.records.len(), out.report.accepted);
        prop_assert_eq!(out.report.accepted + out.report.excluded_count(), rows.len());

        let mut last_index = None;
        for exclusion in &out.report.excluded {
            prop_assert!(exclusion.index < rows.len());
            prop_assert!(last_index.map_or(true, |prev| exclusion.index > prev));
            last_index = Some(exclusion.index);
        }
    }

    #[test]
    fn accepted_records_are_canonical(rows in prop::collection::vec(raw_row(), 0..40)) {
        for tx in normalize_transactions(&rows).records {
            prop_assert!(!tx.customer_id.is_empty());
            prop_assert!(!tx.category.is_empty());
            prop_assert_eq!(tx.category.to_lowercase(), tx.category.clone());
            prop_assert!(tx.amount_cents >= 0);
            prop_assert!(tx.discount_cents >= 0);
            for tag in &tx.tags {
                prop_assert_eq!(tag.trim(), tag.as_str());
                prop_assert!(!tag.is_empty());
            }
        }
    }
}
