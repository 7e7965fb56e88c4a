//! Pooled, read-only SQLite connections.

use crate::SourceError;
use parking_lot::Mutex;
use pulse_ingest::{parse_sql_ddl, resolve, ResolvedSchema, SqlSchema};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// SQLite database holding customers, transactions and campaigns
    pub database_path: PathBuf,
    /// Number of pooled connections
    pub pool_size: usize,
    /// Optional DDL file used instead of the live catalog for schema discovery
    pub ddl_path: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./pulse.db"),
            pool_size: 4,
            ddl_path: None,
        }
    }
}

impl SourceConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Default::default()
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_ddl(mut self, ddl_path: impl Into<PathBuf>) -> Self {
        self.ddl_path = Some(ddl_path.into());
        self
    }
}

/// Shared handle to the relational source. Cloning is cheap.
#[derive(Clone)]
pub struct SourcePool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    slots: Vec<Mutex<Option<Connection>>>,
    next: AtomicUsize,
    closed: AtomicBool,
    schema: ResolvedSchema,
    label: String,
}

impl std::fmt::Debug for SourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcePool")
            .field("source", &self.inner.label)
            .field("connections", &self.inner.slots.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SourcePool {
    /// Open `pool_size` read-only connections and resolve the source schema.
    ///
    /// An incompatible schema fails here, before any request is served.
    pub fn open(config: &SourceConfig) -> Result<Self, SourceError> {
        let size = config.pool_size.max(1);
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;

        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            connections.push(Connection::open_with_flags(&config.database_path, flags)?);
        }

        let ddl = match &config.ddl_path {
            Some(path) => read_ddl_file(path)?,
            None => catalog_ddl(&connections[0])?,
        };
        let label = config.database_path.display().to_string();
        Self::assemble(connections, &ddl, label)
    }

    /// Wrap already-open connections (e.g. in-memory fixtures). Each one is
    /// switched to `query_only`.
    pub fn from_connections(connections: Vec<Connection>) -> Result<Self, SourceError> {
        let Some(first) = connections.first() else {
            return Err(SourceError::NoConnections);
        };
        let ddl = catalog_ddl(first)?;
        for conn in &connections {
            conn.pragma_update(None, "query_only", true)?;
        }
        Self::assemble(connections, &ddl, "<connections>".to_string())
    }

    fn assemble(connections: Vec<Connection>, ddl: &str, label: String) -> Result<Self, SourceError> {
        let schema = resolve(&parse_sql_ddl(ddl)?)?;
        tracing::info!(
            source = %label,
            connections = connections.len(),
            customers = %schema.customers.table,
            transactions = %schema.transactions.table,
            campaigns = schema.campaigns.as_ref().map(|c| c.table.as_str()).unwrap_or("-"),
            "source pool ready"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                slots: connections.into_iter().map(|c| Mutex::new(Some(c))).collect(),
                next: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                schema,
                label,
            }),
        })
    }

    pub fn schema(&self) -> &ResolvedSchema {
        &self.inner.schema
    }

    pub fn size(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Run `f` on the first idle connection, scanning in round-robin order from
    /// a rotating start. Blocks on the start slot only when every slot is busy.
    pub fn with_connection<R>(
        &self,
        f: impl FnOnce(&Connection) -> Result<R, SourceError>,
    ) -> Result<R, SourceError> {
        if self.is_closed() {
            return Err(SourceError::Closed);
        }
        let slots = &self.inner.slots;
        let start = self.inner.next.fetch_add(1, Ordering::Relaxed) % slots.len();
        let guard = (0..slots.len())
            .find_map(|offset| slots[(start + offset) % slots.len()].try_lock())
            .unwrap_or_else(|| slots[start].lock());
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(SourceError::Closed),
        }
    }

    /// Close every connection. Later calls to [`with_connection`] fail with
    /// [`SourceError::Closed`]; calling it twice is harmless.
    ///
    /// [`with_connection`]: SourcePool::with_connection
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for slot in &self.inner.slots {
            if let Some(conn) = slot.lock().take() {
                if let Err((_, err)) = conn.close() {
                    tracing::warn!(source = %self.inner.label, error = %err, "failed to close connection");
                }
            }
        }
        tracing::info!(source = %self.inner.label, "source pool shut down");
    }
}

/// `CREATE TABLE` statements stored in the SQLite catalog.
pub fn catalog_ddl(conn: &Connection) -> Result<String, SourceError> {
    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master \
         WHERE type = 'table' AND sql IS NOT NULL AND name NOT LIKE 'sqlite_%' \
         ORDER BY name",
    )?;
    let statements = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(statements.join(";\n"))
}

/// Discover the source schema without building a pool.
pub fn discover_schema(config: &SourceConfig) -> Result<SqlSchema, SourceError> {
    let ddl = match &config.ddl_path {
        Some(path) => read_ddl_file(path)?,
        None => {
            let conn = Connection::open_with_flags(
                &config.database_path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
            )?;
            catalog_ddl(&conn)?
        }
    };
    Ok(parse_sql_ddl(&ddl)?)
}

fn read_ddl_file(path: &Path) -> Result<String, SourceError> {
    std::fs::read_to_string(path).map_err(|e| SourceError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
