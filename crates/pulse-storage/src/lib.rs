//! Optic Pulse relational source
//!
//! ```text
//!   SourceConfig ──► SourcePool (read-only SQLite connections, resolved schema)
//!                        │
//!   JoinPlan / CampaignPlan (built without I/O, inspectable SQL)
//!                        │ execute()  (spawn_blocking)
//!                        ▼
//!   canonical records + normalization report
//! ```
//!
//! The pool never writes. Plans are request-scoped values; the pool is shared
//! across requests behind an `Arc`.

pub mod plan;
pub mod pool;

pub use plan::{CampaignPlan, CampaignRows, JoinPlan, JoinedRows};
pub use pool::{catalog_ddl, discover_schema, SourceConfig, SourcePool};

use pulse_ingest::SchemaError;
use pulse_model::PulseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("source has no campaign table")]
    NoCampaignTable,

    #[error("plan needs at least one identifier")]
    EmptyScope,

    #[error("pool needs at least one connection")]
    NoConnections,

    #[error("source pool is shut down")]
    Closed,

    #[error("query task failed: {0}")]
    Join(String),
}

impl From<SourceError> for PulseError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Schema(schema) => schema.into(),
            SourceError::NoCampaignTable => PulseError::DataUnavailable(err.to_string()),
            SourceError::EmptyScope => PulseError::InvalidRequest(err.to_string()),
            other => PulseError::Source(other.to_string()),
        }
    }
}

/// Double-quote an SQL identifier.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
