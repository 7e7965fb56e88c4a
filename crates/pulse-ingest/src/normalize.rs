//! Record normalization
//!
//! Raw rows (column name -> JSON value) become canonical records. A row whose
//! required field is missing or unparseable is excluded and the batch goes on;
//! an unparseable optional field is dropped to its default. Column names are
//! matched case-insensitively against each field's aliases, and columns no
//! field claims are ignored.

use crate::schema::{entity_spec, Entity, EntitySpec};
use crate::value::{self, FieldResult};
use pulse_model::{CampaignText, CustomerRecord, Outcome, TransactionEvent};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub type RawRecord = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exclusion {
    /// Position of the row in the input batch.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub accepted: usize,
    pub excluded: Vec<Exclusion>,
}

impl NormalizeReport {
    pub fn excluded_count(&self) -> usize {
        self.excluded.len()
    }
}

#[derive(Debug, Clone)]
pub struct Normalized<T> {
    pub records: Vec<T>,
    pub report: NormalizeReport,
}

pub fn normalize_transactions(rows: &[RawRecord]) -> Normalized<TransactionEvent> {
    normalize_batch(Entity::Transaction, rows, transaction)
}

pub fn normalize_customers(rows: &[RawRecord]) -> Normalized<CustomerRecord> {
    normalize_batch(Entity::Customer, rows, customer)
}

pub fn normalize_campaigns(rows: &[RawRecord]) -> Normalized<CampaignText> {
    normalize_batch(Entity::Campaign, rows, campaign)
}

fn normalize_batch<T>(
    entity: Entity,
    rows: &[RawRecord],
    convert: fn(&Fields<'_>) -> FieldResult<T>,
) -> Normalized<T> {
    let spec = entity_spec(entity);
    let mut records = Vec::with_capacity(rows.len());
    let mut report = NormalizeReport::default();

    for (index, row) in rows.iter().enumerate() {
        match convert(&Fields { spec, row }) {
            Ok(record) => records.push(record),
            Err(reason) => report.excluded.push(Exclusion { index, reason }),
        }
    }
    report.accepted = records.len();

    if report.excluded.is_empty() {
        tracing::debug!(entity = %entity, accepted = report.accepted, excluded = 0, "normalized batch");
    } else {
        tracing::warn!(
            entity = %entity,
            accepted = report.accepted,
            excluded = report.excluded.len(),
            first_reason = %report.excluded[0].reason,
            "excluded invalid records"
        );
    }

    Normalized { records, report }
}

/// Alias-aware view over one raw row.
struct Fields<'a> {
    spec: &'static EntitySpec,
    row: &'a RawRecord,
}

impl<'a> Fields<'a> {
    fn get(&self, field: &str) -> Option<&'a Value> {
        let spec = self.spec.field(field)?;
        spec.aliases.iter().find_map(|alias| {
            self.row
                .iter()
                .find(|(k, v)| k.eq_ignore_ascii_case(alias) && !v.is_null())
                .map(|(_, v)| v)
        })
    }

    fn required<T>(&self, field: &str, parse: fn(&Value) -> FieldResult<T>) -> FieldResult<T> {
        let raw = self
            .get(field)
            .ok_or_else(|| format!("missing required field {field}"))?;
        parse(raw).map_err(|e| format!("{field}: {e}"))
    }

    fn optional<T>(&self, field: &str, parse: fn(&Value) -> FieldResult<T>) -> Option<T> {
        self.get(field).and_then(|raw| parse(raw).ok())
    }
}

fn transaction(f: &Fields<'_>) -> FieldResult<TransactionEvent> {
    let unit_price = f.required("unit_price", value::cents)?;
    if unit_price < 0 {
        return Err(format!("unit_price: negative amount {unit_price}"));
    }
    let quantity = f.optional("quantity", value::count).unwrap_or(1);
    let discount = f.optional("discount", value::cents).unwrap_or(0).max(0);

    Ok(TransactionEvent {
        transaction_id: f.optional("transaction_id", value::text),
        customer_id: f.required("customer_id", value::text)?,
        occurred_at: f.required("occurred_at", value::timestamp)?,
        category: f.required("category", value::text)?.to_lowercase(),
        amount_cents: unit_price.saturating_mul(i64::from(quantity)),
        quantity,
        discount_cents: discount.saturating_mul(i64::from(quantity)),
        tags: f.optional("tags", value::tags).unwrap_or_default(),
    })
}

fn customer(f: &Fields<'_>) -> FieldResult<CustomerRecord> {
    Ok(CustomerRecord {
        customer_id: f.required("customer_id", value::text)?,
        first_name: f.optional("first_name", value::text),
        last_name: f.optional("last_name", value::text),
        gender: f.optional("gender", value::text),
        city: f.optional("city", value::text),
        birth_date: f.optional("birth_date", value::date),
        loyalty_member: f.optional("loyalty_member", value::flag).unwrap_or(false),
        lifetime_value_cents: f.optional("lifetime_value", value::cents),
        created_at: f.optional("created_at", value::timestamp),
    })
}

fn campaign(f: &Fields<'_>) -> FieldResult<CampaignText> {
    Ok(CampaignText {
        campaign_id: f.required("campaign_id", value::text)?,
        brand_id: f.required("brand_id", value::text)?,
        body: f.required("body", value::text)?,
        outcome: f.required("outcome", outcome)?,
        sent_at: f.required("sent_at", value::timestamp)?,
    })
}

fn outcome(raw: &Value) -> FieldResult<Outcome> {
    value::text(raw)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> RawRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_transaction_aliases_and_line_totals() {
        let rows = vec![row(&[
            ("CID", json!("20186130")),
            ("sales_id", json!(7)),
            ("sales_date", json!("2025-01-02 10:00:00")),
            ("item_category", json!("Kids-Clothing")),
            ("sales_price", json!("12.50")),
            ("quantity", json!(2)),
            ("discount", json!(1.25)),
            ("colors", json!("Yellow|teal")),
            ("store_code", json!("S-01")),
        ])];
        let out = normalize_transactions(&rows);
        assert_eq!(out.report.accepted, 1);
        let tx = &out.records[0];
        assert_eq!(tx.customer_id, "20186130");
        assert_eq!(tx.transaction_id.as_deref(), Some("7"));
        assert_eq!(tx.category, "kids-clothing");
        assert_eq!(tx.amount_cents, 2500);
        assert_eq!(tx.discount_cents, 250);
        assert_eq!(tx.tags, vec!["yellow", "teal"]);
    }

    #[test]
    fn test_invalid_rows_excluded_batch_continues() {
        let good = row(&[
            ("customer_id", json!("c1")),
            ("occurred_at", json!("2025-01-02")),
            ("category", json!("toys")),
            ("unit_price", json!(5)),
        ]);
        let missing_price = row(&[
            ("customer_id", json!("c1")),
            ("occurred_at", json!("2025-01-02")),
            ("category", json!("toys")),
        ]);
        let bad_date = row(&[
            ("customer_id", json!("c1")),
            ("occurred_at", json!("soon")),
            ("category", json!("toys")),
            ("unit_price", json!(5)),
        ]);
        let null_customer = row(&[
            ("customer_id", Value::Null),
            ("occurred_at", json!("2025-01-02")),
            ("category", json!("toys")),
            ("unit_price", json!(5)),
        ]);

        let out = normalize_transactions(&[missing_price, good, bad_date, null_customer]);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.report.accepted, 1);
        assert_eq!(out.report.excluded_count(), 3);
        assert_eq!(out.report.excluded[0].index, 0);
        assert!(out.report.excluded[0].reason.contains("unit_price"));
        assert!(out.report.excluded[1].reason.contains("occurred_at"));
        assert_eq!(out.records[0].quantity, 1);
    }

    #[test]
    fn test_customer_optional_fields_degrade() {
        let rows = vec![row(&[
            ("cid", json!(42)),
            ("first_name", json!("Dana")),
            ("birth_day", json!("not a date")),
            ("loyalty_customer", json!("yes")),
            ("created_date", json!("2023-05-01")),
        ])];
        let out = normalize_customers(&rows);
        let c = &out.records[0];
        assert_eq!(c.customer_id, "42");
        assert_eq!(c.birth_date, None);
        assert!(c.loyalty_member);
        assert!(c.created_at.is_some());
    }

    #[test]
    fn test_campaign_outcome_aliases() {
        let rows = vec![
            row(&[
                ("campaign_id", json!("cmp-1")),
                ("brand", json!("acme")),
                ("message", json!("Shop now!")),
                ("status", json!("opened")),
                ("sent_at", json!("2025-02-01T09:00:00Z")),
            ]),
            row(&[
                ("campaign_id", json!("cmp-2")),
                ("brand", json!("acme")),
                ("message", json!("Hello")),
                ("status", json!("exploded")),
                ("sent_at", json!("2025-02-01T09:00:00Z")),
            ]),
        ];
        let out = normalize_campaigns(&rows);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].outcome, Outcome::Read);
        assert!(out.report.excluded[0].reason.contains("outcome"));
    }
}
