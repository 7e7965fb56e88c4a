//! Source schema discovery and record normalization
//!
//! Maps heterogeneous relational sources onto one canonical, versioned shape:
//! - DDL (from the live catalog or a file) -> [`SqlSchema`]
//! - [`SqlSchema`] + canonical field specs -> [`ResolvedSchema`] (or a fatal
//!   configuration error when a required column family is missing)
//! - raw rows -> canonical records, with invalid rows excluded and counted

pub mod ddl;
pub mod normalize;
pub mod schema;
pub mod value;

pub use ddl::{parse_sql_ddl, ColumnDef, SqlSchema, TableDef};
pub use normalize::{
    normalize_campaigns, normalize_customers, normalize_transactions, Exclusion, NormalizeReport,
    Normalized, RawRecord,
};
pub use schema::{
    entity_spec, resolve, Entity, EntitySpec, FieldSpec, ResolvedSchema, ResolvedTable,
};

use pulse_model::PulseError;
use thiserror::Error;

/// Schema-level failures. All of them are fatal configuration problems.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    #[error("failed to parse DDL: {0}")]
    Parse(String),

    #[error("source declares no tables")]
    Empty,

    #[error("no {entity} table found (accepted names: {accepted})")]
    MissingTable { entity: Entity, accepted: String },

    #[error("table {table} has no column for required field {field} (accepted: {accepted})")]
    MissingColumn {
        table: String,
        field: &'static str,
        accepted: String,
    },
}

impl From<SchemaError> for PulseError {
    fn from(err: SchemaError) -> Self {
        PulseError::Configuration(err.to_string())
    }
}
