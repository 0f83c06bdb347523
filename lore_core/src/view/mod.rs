//! Snapshot/View Builder - renders the database for the generator and
//! records the identity of every row it shows.
//!
//! The snapshot is the arena/index pattern's translation table: canonical
//! rows live in the database addressed by permanent [`RowId`]; the
//! snapshot maps one cycle's view-relative positions back to those ids and
//! never outlives the generation cycle it served.

use std::collections::HashSet;

use chat_ledger::{AiRules, RowId, StructuredDatabase, Table};

use crate::livelink::live_link_uid;
use crate::lorebook::KnowledgeEntry;

/// Ordered row identities behind one rendered view.
///
/// `tables[i][j]` is the identity of what the generator perceives as row
/// `j` of table `i`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewSnapshot {
    pub tables: Vec<Vec<RowId>>,
}

impl ViewSnapshot {
    /// Translate a view position into a permanent row identity.
    pub fn resolve(&self, table_index: usize, view_row_index: usize) -> Option<RowId> {
        self.tables.get(table_index)?.get(view_row_index).copied()
    }
}

/// One generation cycle's view of the database.
#[derive(Debug, Clone)]
pub struct DatabaseView {
    /// The filtered database actually shown.
    pub database: StructuredDatabase,

    /// Bit-exact textual rendering for the prompt.
    pub hybrid_text: String,

    /// Row identities in rendered order.
    pub snapshot: ViewSnapshot,
}

/// Build the view for one turn.
///
/// Live-linked tables keep only rows whose derived entry uid is in the
/// active set; every other table passes through unfiltered.
pub fn build_view(db: &StructuredDatabase, active: &[KnowledgeEntry]) -> DatabaseView {
    let active_uids: HashSet<&str> = active.iter().map(|e| e.uid.as_str()).collect();

    let mut database = db.clone();
    for table in &mut database.tables {
        if table.live_link_enabled() {
            let table_id = table.id;
            table
                .rows
                .retain(|row| active_uids.contains(live_link_uid(table_id, row.id).as_str()));
        }
    }

    let snapshot = ViewSnapshot {
        tables: database
            .tables
            .iter()
            .map(|table| table.rows.iter().map(|row| row.id).collect())
            .collect(),
    };
    let hybrid_text = render_hybrid(&database);

    DatabaseView {
        database,
        hybrid_text,
        snapshot,
    }
}

fn render_hybrid(db: &StructuredDatabase) -> String {
    let mut out = String::new();
    for (index, table) in db.tables.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        render_table(&mut out, index, table);
    }
    out
}

fn render_table(out: &mut String, index: usize, table: &Table) {
    out.push_str(&format!("[[DB_TABLE_{}]] {}\n", index, table.name));
    if !table.description.is_empty() {
        out.push_str(&format!("> DESC: {}\n", table.description));
    }
    let rules = render_rules(&table.ai_rules);
    if !rules.is_empty() {
        out.push_str(&format!("> RULES: {}\n", rules));
    }
    out.push_str("> SCHEMA:\n");
    for (position, column) in table.columns.iter().enumerate() {
        out.push_str(&format!(
            "  [\"{}\"] {} ({})\n",
            position,
            column.label,
            column.column_type.as_str()
        ));
    }
    out.push_str("> DATA:\n");
    if table.rows.is_empty() {
        out.push_str("  (empty — needs initialization)\n");
        return;
    }
    out.push_str("[\n");
    let last = table.rows.len() - 1;
    for (position, row) in table.rows.iter().enumerate() {
        let cells: Vec<serde_json::Value> = row.cells.iter().map(|cell| cell.to_json()).collect();
        let line = serde_json::Value::Array(cells).to_string();
        out.push_str(&line);
        if position < last {
            out.push(',');
        }
        out.push('\n');
    }
    out.push_str("]\n");
}

/// Only hints actually present appear, in fixed operation order.
fn render_rules(rules: &AiRules) -> String {
    let mut parts = Vec::new();
    if let Some(init) = &rules.init {
        parts.push(format!("[Init: {}]", init));
    }
    if let Some(insert) = &rules.insert {
        parts.push(format!("[Insert: {}]", insert));
    }
    if let Some(update) = &rules.update {
        parts.push(format!("[Update: {}]", update));
    }
    if let Some(delete) = &rules.delete {
        parts.push(format!("[Delete: {}]", delete));
    }
    parts.join(" ")
}
