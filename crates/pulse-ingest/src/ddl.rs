//! DDL parsing
//!
//! Extracts table and column structure from `CREATE TABLE` statements. Other
//! statements (indexes, views, triggers) are skipped.

use crate::SchemaError;
use serde::Serialize;
use sqlparser::ast::{ColumnOption, ObjectName, Statement, TableConstraint};
use sqlparser::dialect::{GenericDialect, SQLiteDialect};
use sqlparser::parser::Parser;

/// Discovered source schema.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SqlSchema {
    pub tables: Vec<TableDef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

impl SqlSchema {
    /// Table lookup, case-insensitive.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Parse SQL DDL and extract the table structure.
///
/// Tries the generic dialect first and falls back to SQLite's, which accepts
/// catalog-only syntax such as `AUTOINCREMENT` and `WITHOUT ROWID`.
pub fn parse_sql_ddl(sql: &str) -> Result<SqlSchema, SchemaError> {
    let statements = match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => statements,
        Err(generic_err) => Parser::parse_sql(&SQLiteDialect {}, sql)
            .map_err(|_| SchemaError::Parse(generic_err.to_string()))?,
    };

    let mut schema = SqlSchema::default();

    for stmt in statements {
        if let Statement::CreateTable {
            name,
            columns: sql_columns,
            constraints: sql_constraints,
            ..
        } = stmt
        {
            let mut columns = Vec::with_capacity(sql_columns.len());
            let mut primary_key = Vec::new();

            for col in &sql_columns {
                let mut nullable = true;
                for opt in &col.options {
                    match &opt.option {
                        ColumnOption::NotNull => nullable = false,
                        ColumnOption::Unique { is_primary: true, .. } => {
                            nullable = false;
                            primary_key.push(col.name.value.clone());
                        }
                        _ => {}
                    }
                }
                columns.push(ColumnDef {
                    name: col.name.value.clone(),
                    data_type: col.data_type.to_string(),
                    nullable,
                });
            }

            for constraint in &sql_constraints {
                if let TableConstraint::Unique {
                    columns: pk_cols,
                    is_primary: true,
                    ..
                } = constraint
                {
                    primary_key = pk_cols.iter().map(|c| c.value.clone()).collect();
                }
            }

            schema.tables.push(TableDef {
                name: unqualified(&name),
                columns,
                primary_key,
            });
        }
    }

    if schema.tables.is_empty() {
        return Err(SchemaError::Empty);
    }
    Ok(schema)
}

/// Last identifier of a possibly schema-qualified name, without quotes.
fn unqualified(name: &ObjectName) -> String {
    name.0
        .last()
        .map(|ident| ident.value.clone())
        .unwrap_or_else(|| name.to_string())
}
