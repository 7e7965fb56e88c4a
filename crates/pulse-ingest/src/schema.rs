//! Canonical field specs and source schema resolution
//!
//! Every canonical field lists the source column names it accepts. Resolution
//! picks, per entity, the first table whose name matches one of the entity's
//! table aliases and, per field, the first alias present in that table.

use crate::ddl::SqlSchema;
use crate::SchemaError;
use pulse_model::SCHEMA_VERSION;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Customer,
    Transaction,
    Campaign,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Customer => "customer",
            Entity::Transaction => "transaction",
            Entity::Campaign => "campaign",
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub required: bool,
}

const fn required(name: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec {
        name,
        aliases,
        required: true,
    }
}

const fn optional(name: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec {
        name,
        aliases,
        required: false,
    }
}

#[derive(Debug)]
pub struct EntitySpec {
    pub entity: Entity,
    pub table_aliases: &'static [&'static str],
    pub fields: &'static [FieldSpec],
}

impl EntitySpec {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// ============================================================================
// Canonical field sets (SCHEMA_VERSION 1)
// ============================================================================

static CUSTOMER: EntitySpec = EntitySpec {
    entity: Entity::Customer,
    table_aliases: &["customers", "contacts", "customer", "users"],
    fields: &[
        required("customer_id", &["customer_id", "cid", "user_id"]),
        optional("first_name", &["first_name", "firstname", "given_name"]),
        optional("last_name", &["last_name", "lastname", "surname", "family_name"]),
        optional("gender", &["gender", "sex"]),
        optional("city", &["city", "town"]),
        optional("birth_date", &["birth_date", "birth_day", "birthday", "dob"]),
        optional("loyalty_member", &["loyalty_member", "loyalty_customer", "is_loyalty", "loyalty"]),
        optional("lifetime_value", &["lifetime_value", "ltv", "clv"]),
        optional("created_at", &["created_at", "created_date", "signup_date"]),
    ],
};

static TRANSACTION: EntitySpec = EntitySpec {
    entity: Entity::Transaction,
    table_aliases: &["transactions", "sales", "orders", "purchases"],
    fields: &[
        required("customer_id", &["customer_id", "cid", "user_id"]),
        optional("transaction_id", &["transaction_id", "sales_id", "order_id", "id"]),
        required(
            "occurred_at",
            &["occurred_at", "sales_date", "transaction_date", "purchase_date", "order_date"],
        ),
        required(
            "category",
            &["category", "item_category", "product_category", "department"],
        ),
        required("unit_price", &["unit_price", "sales_price", "price", "amount"]),
        optional("quantity", &["quantity", "qty"]),
        optional("discount", &["discount", "discount_amount"]),
        optional("tags", &["tags", "colors", "color", "attributes"]),
    ],
};

static CAMPAIGN: EntitySpec = EntitySpec {
    entity: Entity::Campaign,
    table_aliases: &["campaigns", "campaign_texts", "campaign_messages"],
    fields: &[
        required("campaign_id", &["campaign_id", "id"]),
        required("brand_id", &["brand_id", "brand"]),
        required("body", &["body", "text", "message", "content"]),
        required("outcome", &["outcome", "status", "event_type"]),
        required("sent_at", &["sent_at", "sent_date", "event_date", "created_at"]),
    ],
};

pub fn entity_spec(entity: Entity) -> &'static EntitySpec {
    match entity {
        Entity::Customer => &CUSTOMER,
        Entity::Transaction => &TRANSACTION,
        Entity::Campaign => &CAMPAIGN,
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// One source table mapped onto an entity's canonical fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedTable {
    pub entity: Entity,
    pub table: String,
    /// canonical field -> source column
    pub columns: BTreeMap<&'static str, String>,
}

impl ResolvedTable {
    pub fn column(&self, field: &str) -> Option<&str> {
        self.columns.get(field).map(String::as_str)
    }
}

/// The source mapped onto the canonical shape.
///
/// Customers and transactions are required; the campaign table is optional
/// because brand-voice requests may carry their own texts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedSchema {
    pub version: u32,
    pub customers: ResolvedTable,
    pub transactions: ResolvedTable,
    pub campaigns: Option<ResolvedTable>,
}

/// Resolve a discovered schema against the canonical field sets.
pub fn resolve(schema: &SqlSchema) -> Result<ResolvedSchema, SchemaError> {
    if schema.tables.is_empty() {
        return Err(SchemaError::Empty);
    }
    let customers = resolve_entity(schema, &CUSTOMER)?.ok_or_else(|| missing_table(&CUSTOMER))?;
    let transactions =
        resolve_entity(schema, &TRANSACTION)?.ok_or_else(|| missing_table(&TRANSACTION))?;
    let campaigns = resolve_entity(schema, &CAMPAIGN)?;

    Ok(ResolvedSchema {
        version: SCHEMA_VERSION,
        customers,
        transactions,
        campaigns,
    })
}

fn resolve_entity(
    schema: &SqlSchema,
    spec: &EntitySpec,
) -> Result<Option<ResolvedTable>, SchemaError> {
    let Some(table) = spec.table_aliases.iter().find_map(|alias| schema.table(alias)) else {
        return Ok(None);
    };

    let mut columns = BTreeMap::new();
    for field in spec.fields {
        match field.aliases.iter().find_map(|alias| table.column(alias)) {
            Some(col) => {
                columns.insert(field.name, col.name.clone());
            }
            None if field.required => {
                return Err(SchemaError::MissingColumn {
                    table: table.name.clone(),
                    field: field.name,
                    accepted: field.aliases.join(" | "),
                });
            }
            None => {}
        }
    }

    Ok(Some(ResolvedTable {
        entity: spec.entity,
        table: table.name.clone(),
        columns,
    }))
}

fn missing_table(spec: &EntitySpec) -> SchemaError {
    SchemaError::MissingTable {
        entity: spec.entity,
        accepted: spec.table_aliases.join(" | "),
    }
}
