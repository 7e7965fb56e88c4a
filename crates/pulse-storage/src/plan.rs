//! Deferred query plans
//!
//! Building a plan only renders SQL and collects bound parameters; nothing
//! touches the source until `execute`. Column names come from the resolved
//! schema, and every selected column is aliased to `<side>__<canonical>` so the
//! executor can split joined rows back into per-entity raw records.

use crate::pool::SourcePool;
use crate::{quote_ident, SourceError};
use pulse_ingest::{
    normalize_campaigns, normalize_customers, normalize_transactions, Exclusion,
    NormalizeReport, RawRecord, ResolvedSchema, ResolvedTable,
};
use pulse_model::{BehaviorWindow, CampaignText, CustomerRecord, TransactionEvent};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;
use std::collections::BTreeMap;

const TX_PREFIX: &str = "t__";
const CUSTOMER_PREFIX: &str = "c__";
const WINDOW_PARAMS: usize = 4;

// ============================================================================
// Join plan
// ============================================================================

/// Transactions LEFT JOIN customers on the customer identifier, scoped to a
/// set of customers and a behavior window.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlan {
    sql: String,
    params: Vec<String>,
    window: BehaviorWindow,
}

/// Result of one join evaluation.
#[derive(Debug, Clone, Default)]
pub struct JoinedRows {
    /// In-window transactions, ordered by (occurred_at, transaction_id).
    pub transactions: Vec<TransactionEvent>,
    /// Customer metadata keyed by identifier. Absent when the join found no row.
    pub customers: BTreeMap<String, CustomerRecord>,
    /// Rows that failed normalization.
    pub report: NormalizeReport,
    /// Valid transactions the SQL window predicate let through but the exact
    /// window check dropped (timestamps SQLite cannot interpret).
    pub outside_window: usize,
}

impl JoinPlan {
    pub fn build(
        schema: &ResolvedSchema,
        customer_ids: &[String],
        window: BehaviorWindow,
    ) -> Result<Self, SourceError> {
        if customer_ids.is_empty() {
            return Err(SourceError::EmptyScope);
        }
        let tx = &schema.transactions;
        let customers = &schema.customers;
        let tx_key = required_column(tx, "customer_id")?;
        let tx_time = required_column(tx, "occurred_at")?;
        let customer_key = required_column(customers, "customer_id")?;

        let mut select = select_list("t", TX_PREFIX, tx);
        select.extend(select_list("c", CUSTOMER_PREFIX, customers));

        let mut params = customer_ids.to_vec();
        params.sort();
        params.dedup();

        let placeholders = (1..=params.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let window_sql = window_predicate(&format!("t.{}", quote_ident(tx_time)), params.len() + 1);
        params.extend(window_params(&window));

        let sql = format!(
            "SELECT {} FROM {} AS t LEFT JOIN {} AS c ON CAST(c.{} AS TEXT) = CAST(t.{} AS TEXT) \
             WHERE CAST(t.{} AS TEXT) IN ({}) AND {}",
            select.join(", "),
            quote_ident(&tx.table),
            quote_ident(&customers.table),
            quote_ident(customer_key),
            quote_ident(tx_key),
            quote_ident(tx_key),
            placeholders,
            window_sql,
        );

        Ok(Self {
            sql,
            params,
            window,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Customer identifiers (sorted, deduplicated) followed by the four window
    /// bounds: start and end as UTC text, then as epoch seconds.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn window(&self) -> &BehaviorWindow {
        &self.window
    }

    /// Evaluate the plan on a blocking worker.
    pub async fn execute(self, pool: &SourcePool) -> Result<JoinedRows, SourceError> {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || self.execute_blocking(&pool))
            .await
            .map_err(|e| SourceError::Join(e.to_string()))?
    }

    pub fn execute_blocking(&self, pool: &SourcePool) -> Result<JoinedRows, SourceError> {
        let rows = pool.with_connection(|conn| query_rows(conn, &self.sql, &self.params))?;

        let mut tx_rows = Vec::with_capacity(rows.len());
        let mut customer_rows: BTreeMap<String, RawRecord> = BTreeMap::new();
        for row in rows {
            let (tx_row, customer_row) = split_row(row);
            if let Some(id) = customer_row.get("customer_id").and_then(id_string) {
                customer_rows.entry(id).or_insert(customer_row);
            }
            tx_rows.push(tx_row);
        }

        let normalized = normalize_transactions(&tx_rows);
        let customer_batch: Vec<RawRecord> = customer_rows.into_values().collect();
        let customers = normalize_customers(&customer_batch);

        // The SQL filter is a superset; the exact half-open window applies here.
        let total = normalized.records.len();
        let mut transactions: Vec<TransactionEvent> = normalized
            .records
            .into_iter()
            .filter(|tx| self.window.contains(tx.occurred_at))
            .collect();
        transactions.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
        let outside_window = total - transactions.len();

        let mut report = normalized.report;
        report.excluded.extend(customers.report.excluded.into_iter().map(|e| Exclusion {
            reason: format!("customer row: {}", e.reason),
            ..e
        }));

        tracing::debug!(
            customers = self.params.len() - WINDOW_PARAMS,
            transactions = transactions.len(),
            outside_window,
            excluded = report.excluded.len(),
            "join plan evaluated"
        );

        Ok(JoinedRows {
            transactions,
            customers: customers
                .records
                .into_iter()
                .map(|c| (c.customer_id.clone(), c))
                .collect(),
            report,
            outside_window,
        })
    }
}

// ============================================================================
// Campaign plan
// ============================================================================

/// Latest campaign texts of one brand.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignPlan {
    sql: String,
    brand_id: String,
    limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CampaignRows {
    /// Ordered by sent_at descending, then campaign_id ascending; at most `limit`.
    pub texts: Vec<CampaignText>,
    pub report: NormalizeReport,
}

impl CampaignPlan {
    pub fn build(schema: &ResolvedSchema, brand_id: &str, limit: usize) -> Result<Self, SourceError> {
        let campaigns = schema.campaigns.as_ref().ok_or(SourceError::NoCampaignTable)?;
        let brand_col = required_column(campaigns, "brand_id")?;
        let sql = format!(
            "SELECT {} FROM {} AS m WHERE CAST(m.{} AS TEXT) = ?",
            select_list("m", "", campaigns).join(", "),
            quote_ident(&campaigns.table),
            quote_ident(brand_col),
        );
        Ok(Self {
            sql,
            brand_id: brand_id.to_string(),
            limit,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn brand_id(&self) -> &str {
        &self.brand_id
    }

    pub async fn execute(self, pool: &SourcePool) -> Result<CampaignRows, SourceError> {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || self.execute_blocking(&pool))
            .await
            .map_err(|e| SourceError::Join(e.to_string()))?
    }

    pub fn execute_blocking(&self, pool: &SourcePool) -> Result<CampaignRows, SourceError> {
        let params = [self.brand_id.clone()];
        let rows = pool.with_connection(|conn| query_rows(conn, &self.sql, &params))?;
        let normalized = normalize_campaigns(&rows);

        let mut texts = normalized.records;
        texts.sort_by(|a, b| {
            b.sent_at
                .cmp(&a.sent_at)
                .then_with(|| a.campaign_id.cmp(&b.campaign_id))
        });
        texts.truncate(self.limit);

        Ok(CampaignRows {
            texts,
            report: normalized.report,
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Window filter on a timestamp column, using numbered parameters starting at
/// `first`. The bounds are inclusive on both ends, a superset of the exact
/// half-open window. Text SQLite cannot parse (and NULL) is kept, so the
/// normalizer still sees and counts it.
fn window_predicate(column: &str, first: usize) -> String {
    let (start, end, start_epoch, end_epoch) = (first, first + 1, first + 2, first + 3);
    format!(
        "({column} IS NULL \
         OR (typeof({column}) IN ('integer', 'real') \
             AND {column} >= CAST(?{start_epoch} AS INTEGER) AND {column} <= CAST(?{end_epoch} AS INTEGER)) \
         OR (typeof({column}) NOT IN ('integer', 'real') AND julianday({column}) IS NULL) \
         OR (typeof({column}) NOT IN ('integer', 'real') \
             AND julianday({column}) >= julianday(?{start}) AND julianday({column}) <= julianday(?{end})))"
    )
}

fn window_params(window: &BehaviorWindow) -> [String; WINDOW_PARAMS] {
    const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
    [
        window.start.format(FORMAT).to_string(),
        window.end.format(FORMAT).to_string(),
        window.start.timestamp().to_string(),
        (window.end.timestamp() + 1).to_string(),
    ]
}

fn required_column<'a>(
    table: &'a ResolvedTable,
    field: &'static str,
) -> Result<&'a str, SourceError> {
    table.column(field).ok_or_else(|| {
        SourceError::Schema(pulse_ingest::SchemaError::MissingColumn {
            table: table.table.clone(),
            field,
            accepted: "a resolved column".to_string(),
        })
    })
}

fn select_list(alias: &str, prefix: &str, table: &ResolvedTable) -> Vec<String> {
    table
        .columns
        .iter()
        .map(|(canonical, source)| {
            format!(
                "{alias}.{} AS {}",
                quote_ident(source),
                quote_ident(&format!("{prefix}{canonical}"))
            )
        })
        .collect()
}

fn query_rows(conn: &Connection, sql: &str, params: &[String]) -> Result<Vec<RawRecord>, SourceError> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = RawRecord::new();
        for (idx, name) in names.iter().enumerate() {
            record.insert(name.clone(), json_value(row.get_ref(idx)?));
        }
        out.push(record);
    }
    Ok(out)
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn split_row(row: RawRecord) -> (RawRecord, RawRecord) {
    let mut tx = RawRecord::new();
    let mut customer = RawRecord::new();
    for (key, value) in row {
        if let Some(field) = key.strip_prefix(TX_PREFIX) {
            tx.insert(field.to_string(), value);
        } else if let Some(field) = key.strip_prefix(CUSTOMER_PREFIX) {
            customer.insert(field.to_string(), value);
        }
    }
    (tx, customer)
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
