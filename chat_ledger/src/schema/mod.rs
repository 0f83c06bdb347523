//! Table schema loading from TOML documents.
//!
//! Sessions author their tables declaratively; the session layer hands the
//! document here and gets back ready [`Table`] values (or a diagnosable
//! error, never a panic).

use serde::Deserialize;
use thiserror::Error;

use crate::database::{AiRules, Column, ColumnType, LiveLinkConfig, Table};

/// Errors produced while loading a schema document.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid schema document: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("table \"{table}\" declares no columns")]
    NoColumns { table: String },

    #[error("table \"{table}\" column \"{label}\" has unknown type \"{kind}\"")]
    UnknownColumnType {
        table: String,
        label: String,
        kind: String,
    },

    #[error("table \"{table}\" live link key column {key_column} is out of range")]
    KeyColumnOutOfRange { table: String, key_column: usize },
}

#[derive(Debug, Deserialize)]
struct SchemaDoc {
    #[serde(default)]
    table: Vec<TableDef>,
}

#[derive(Debug, Deserialize)]
struct TableDef {
    name: String,
    #[serde(default)]
    description: String,
    columns: Vec<ColumnDef>,
    #[serde(default)]
    rules: RulesDef,
    live_link: Option<LiveLinkDef>,
}

#[derive(Debug, Deserialize)]
struct ColumnDef {
    label: String,
    #[serde(rename = "type", default = "default_column_type")]
    kind: String,
}

fn default_column_type() -> String {
    "text".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct RulesDef {
    init: Option<String>,
    insert: Option<String>,
    update: Option<String>,
    delete: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LiveLinkDef {
    #[serde(default = "default_enabled")]
    enabled: bool,
    key_column: usize,
}

fn default_enabled() -> bool {
    true
}

/// Parse a TOML schema document into tables.
pub fn load_schema(doc: &str) -> Result<Vec<Table>, SchemaError> {
    let doc: SchemaDoc = toml::from_str(doc)?;
    doc.table.into_iter().map(build_table).collect()
}

fn build_table(def: TableDef) -> Result<Table, SchemaError> {
    if def.columns.is_empty() {
        return Err(SchemaError::NoColumns { table: def.name });
    }

    let mut columns = Vec::with_capacity(def.columns.len());
    for column in def.columns {
        let column_type = match column.kind.as_str() {
            "text" => ColumnType::Text,
            "number" => ColumnType::Number,
            "bool" => ColumnType::Bool,
            other => {
                return Err(SchemaError::UnknownColumnType {
                    table: def.name,
                    label: column.label,
                    kind: other.to_string(),
                })
            }
        };
        columns.push(Column::new(column.label, column_type));
    }

    let mut table = Table::new(def.name)
        .with_description(def.description)
        .with_columns(columns)
        .with_rules(AiRules {
            init: def.rules.init,
            insert: def.rules.insert,
            update: def.rules.update,
            delete: def.rules.delete,
        });

    if let Some(link) = def.live_link {
        if link.key_column >= table.columns.len() {
            return Err(SchemaError::KeyColumnOutOfRange {
                table: table.name,
                key_column: link.key_column,
            });
        }
        table.live_link = Some(LiveLinkConfig {
            enabled: link.enabled,
            key_column: link.key_column,
        });
    }

    Ok(table)
}
