//! Database model - tables, typed cells, and permanent row identities.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique, permanent identifier for a database row.
///
/// Minted exactly once at insert and never reused. A `RowId` is the only
/// address that stays valid across turns; a position inside a rendered view
/// is valid only within the one generation cycle that consumed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowId(pub Uuid);

impl RowId {
    /// Mint a new random row ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for RowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId(pub Uuid);

impl TableId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }
}

impl Default for TableId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cell value types stored in table rows.
///
/// A closed set of primitives; free-form generator payloads are coerced
/// into one of these at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    /// The blank cell: empty text. Unspecified columns hold this.
    pub fn blank() -> Self {
        CellValue::Text(String::new())
    }

    /// True only for empty text; any other value counts as content.
    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.is_empty())
    }

    /// JSON representation used when rendering rows for the generator.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Text(s) => serde_json::Value::String(s.clone()),
            CellValue::Int(n) => serde_json::Value::from(*n),
            CellValue::Float(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            CellValue::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Int(n) => write!(f, "{}", n),
            CellValue::Float(n) => write!(f, "{}", n),
            CellValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Column data types declared in a table schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Text,
    Number,
    Bool,
}

impl ColumnType {
    /// Lowercase name shown in the schema legend of the hybrid view.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Number => "number",
            ColumnType::Bool => "bool",
        }
    }
}

/// An ordered, labeled, typed column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub label: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(label: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            label: label.into(),
            column_type,
        }
    }

    pub fn text(label: impl Into<String>) -> Self {
        Self::new(label, ColumnType::Text)
    }

    pub fn number(label: impl Into<String>) -> Self {
        Self::new(label, ColumnType::Number)
    }

    pub fn boolean(label: impl Into<String>) -> Self {
        Self::new(label, ColumnType::Bool)
    }
}

/// Free-text guidance shown to the generator for each operation.
///
/// Hints only; nothing here is mechanically enforced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AiRules {
    pub init: Option<String>,
    pub insert: Option<String>,
    pub update: Option<String>,
    pub delete: Option<String>,
}

impl AiRules {
    pub fn is_empty(&self) -> bool {
        self.init.is_none() && self.insert.is_none() && self.update.is_none() && self.delete.is_none()
    }
}

/// Configuration mirroring a table into the lorebook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveLinkConfig {
    pub enabled: bool,
    /// Index of the column whose value becomes the trigger key.
    pub key_column: usize,
}

/// A single row: a permanent identity plus positionally-typed cells.
///
/// `cells[k]` maps to `columns[k]` of the owning table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    pub cells: Vec<CellValue>,
}

impl Row {
    /// Create a row with a freshly minted identity.
    pub fn new(cells: Vec<CellValue>) -> Self {
        Self {
            id: RowId::new(),
            cells,
        }
    }

    pub fn cell(&self, index: usize) -> Option<&CellValue> {
        self.cells.get(index)
    }

    /// First non-blank cell, used when a human-readable handle is needed.
    pub fn display_cell(&self) -> Option<&CellValue> {
        self.cells.iter().find(|cell| !cell.is_blank())
    }
}

/// A table in the session database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub description: String,
    pub columns: Vec<Column>,
    pub ai_rules: AiRules,
    pub live_link: Option<LiveLinkConfig>,
    pub rows: Vec<Row>,
}

impl Table {
    /// Create a new empty table with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TableId::new(),
            name: name.into(),
            description: String::new(),
            columns: Vec::new(),
            ai_rules: AiRules::default(),
            live_link: None,
            rows: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_columns(mut self, columns: impl IntoIterator<Item = Column>) -> Self {
        self.columns.extend(columns);
        self
    }

    pub fn with_rules(mut self, rules: AiRules) -> Self {
        self.ai_rules = rules;
        self
    }

    /// Mirror this table into the lorebook, keyed by the given column.
    pub fn with_live_link(mut self, key_column: usize) -> Self {
        self.live_link = Some(LiveLinkConfig {
            enabled: true,
            key_column,
        });
        self
    }

    pub fn live_link_enabled(&self) -> bool {
        self.live_link.as_ref().map(|l| l.enabled).unwrap_or(false)
    }

    pub fn find_row(&self, id: RowId) -> Option<&Row> {
        self.rows.iter().find(|row| row.id == id)
    }

    pub fn find_row_mut(&mut self, id: RowId) -> Option<&mut Row> {
        self.rows.iter_mut().find(|row| row.id == id)
    }

    /// Canonical position of a row, independent of any rendered view.
    pub fn row_position(&self, id: RowId) -> Option<usize> {
        self.rows.iter().position(|row| row.id == id)
    }
}

/// The complete structured state of one chat session.
///
/// Mutated only through [`crate::mutation`]; every apply produces a fresh
/// value the caller swaps in whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredDatabase {
    /// Schema version of this database value.
    pub version: u32,

    /// Session-wide free-text rules shown to the generator.
    pub global_rules: String,

    pub tables: Vec<Table>,

    /// Logical clock bumped once per applied mutation batch.
    pub revision: u64,
}

impl StructuredDatabase {
    pub fn new() -> Self {
        Self {
            version: 1,
            global_rules: String::new(),
            tables: Vec::new(),
            revision: 0,
        }
    }

    pub fn with_global_rules(mut self, rules: impl Into<String>) -> Self {
        self.global_rules = rules.into();
        self
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn add_table(&mut self, table: Table) -> TableId {
        let id = table.id;
        self.tables.push(table);
        id
    }

    pub fn table(&self, index: usize) -> Option<&Table> {
        self.tables.get(index)
    }

    pub fn table_mut(&mut self, index: usize) -> Option<&mut Table> {
        self.tables.get_mut(index)
    }

    pub fn find_row(&self, table_index: usize, row_id: RowId) -> Option<&Row> {
        self.table(table_index)?.find_row(row_id)
    }
}

impl Default for StructuredDatabase {
    fn default() -> Self {
        Self::new()
    }
}
