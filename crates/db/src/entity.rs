//! Entity snapshots read straight from application tables.

use std::collections::HashMap;

use async_trait::async_trait;
use cadence_core::engine::{CollaboratorError, EntityAccessor};
use cadence_core::types::DbId;
use serde_json::Value;
use sqlx::PgPool;

/// Raised when an entity table mapping cannot be parsed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EntityTableError {
    #[error("Malformed entity table entry '{0}', expected 'type:table'")]
    Malformed(String),

    #[error("Invalid table name '{0}'")]
    InvalidTable(String),
}

/// Whether `name` is a plain, optionally schema-qualified SQL identifier.
fn is_identifier(name: &str) -> bool {
    let part_ok = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2 && parts.iter().all(|p| part_ok(p))
}

/// Parse a `type:table` list such as `post:posts,campaign:campaigns`.
pub fn parse_entity_tables(spec: &str) -> Result<HashMap<String, String>, EntityTableError> {
    let mut tables = HashMap::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (entity_type, table) = entry
            .split_once(':')
            .map(|(t, n)| (t.trim(), n.trim()))
            .filter(|(t, n)| !t.is_empty() && !n.is_empty())
            .ok_or_else(|| EntityTableError::Malformed(entry.to_string()))?;
        if !is_identifier(table) {
            return Err(EntityTableError::InvalidTable(table.to_string()));
        }
        tables.insert(entity_type.to_string(), table.to_string());
    }
    Ok(tables)
}

/// [`EntityAccessor`] that snapshots a row as JSON with `row_to_json`.
///
/// Only tables registered at construction are ever queried. Unknown entity
/// types and missing rows both yield an empty object. Tables carrying a
/// `workspace_id` column are scoped to the caller's workspace.
#[derive(Debug, Clone)]
pub struct PgEntityAccessor {
    pool: PgPool,
    tables: HashMap<String, String>,
}

impl PgEntityAccessor {
    pub fn new(pool: PgPool, tables: HashMap<String, String>) -> Self {
        Self { pool, tables }
    }

    /// Build from a `type:table` list; see [`parse_entity_tables`].
    pub fn from_spec(pool: PgPool, spec: &str) -> Result<Self, EntityTableError> {
        Ok(Self::new(pool, parse_entity_tables(spec)?))
    }

    pub fn table_for(&self, entity_type: &str) -> Option<&str> {
        self.tables.get(entity_type).map(String::as_str)
    }
}

#[async_trait]
impl EntityAccessor for PgEntityAccessor {
    async fn fetch(
        &self,
        workspace_id: DbId,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Value, CollaboratorError> {
        let Some(table) = self.table_for(entity_type) else {
            tracing::debug!(entity_type, "No table registered for entity type");
            return Ok(Value::Object(Default::default()));
        };

        // `table` was validated as an identifier when the map was built.
        let query = format!(
            "SELECT row_to_json(t)::jsonb FROM {table} t \
             WHERE t.id::text = $1 \
               AND COALESCE(to_jsonb(t)->>'workspace_id', $2::text) = $2::text"
        );
        let snapshot = sqlx::query_scalar::<_, Value>(&query)
            .bind(entity_id)
            .bind(workspace_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(snapshot.unwrap_or_else(|| Value::Object(Default::default())))
    }
}
