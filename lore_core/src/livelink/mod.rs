//! Live-Link Synchronizer - regenerates row-derived lore entries.
//!
//! Every live-linked table row becomes one lorebook entry. Regeneration is
//! wholesale: the new set replaces the previous generation in the corpus
//! the next activation scan reads, closing the per-turn loop.

use chat_ledger::{Row, RowId, StructuredDatabase, Table, TableId};

use crate::lorebook::{EntryOrigin, KnowledgeEntry};

/// Derived uid of the entry mirroring one row.
///
/// Deterministic in `(table_id, row_id)`, so activation state keyed by uid
/// survives any number of regenerations.
pub fn live_link_uid(table_id: TableId, row_id: RowId) -> String {
    format!("{}:{}", table_id, row_id)
}

/// Regenerate the full Live-Link entry set from the database.
///
/// Rows whose key cell is blank produce nothing; they have no trigger to
/// match on.
pub fn sync_entries(db: &StructuredDatabase) -> Vec<KnowledgeEntry> {
    let mut entries = Vec::new();
    for table in &db.tables {
        let Some(link) = &table.live_link else {
            continue;
        };
        if !link.enabled {
            continue;
        }
        for row in &table.rows {
            let Some(key) = row.cell(link.key_column) else {
                continue;
            };
            if key.is_blank() {
                continue;
            }
            entries.push(
                KnowledgeEntry::new(render_content(table, row))
                    .with_uid(live_link_uid(table.id, row.id))
                    .with_keys([key.to_string()])
                    .with_origin(EntryOrigin::LiveLink),
            );
        }
    }
    entries
}

/// Field-list rendering of the non-blank cells of a row.
fn render_content(table: &Table, row: &Row) -> String {
    let mut lines = Vec::new();
    for (position, column) in table.columns.iter().enumerate() {
        if let Some(cell) = row.cell(position) {
            if !cell.is_blank() {
                lines.push(format!("{}: {}", column.label, cell));
            }
        }
    }
    lines.join("\n")
}
