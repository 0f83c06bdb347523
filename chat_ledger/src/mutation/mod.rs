//! Typed mutations and their application against the canonical database.
//!
//! Commands arrive from a generator that only ever saw a filtered,
//! turn-stale view of the data, so application is defensive throughout:
//! rows are re-located by permanent id, never by view position, and a
//! command that cannot be applied is dropped and logged while the rest of
//! the batch still goes through.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::database::{CellValue, Row, RowId, StructuredDatabase};

/// A single typed mutation against the session database.
///
/// `row_id` is resolved from the view snapshot at parse time and is the
/// authoritative address; `view_row_index` is kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutationCommand {
    Insert {
        table_index: usize,
        values: BTreeMap<usize, CellValue>,
    },
    Update {
        table_index: usize,
        view_row_index: usize,
        row_id: Option<RowId>,
        values: BTreeMap<usize, CellValue>,
    },
    Delete {
        table_index: usize,
        view_row_index: usize,
        row_id: Option<RowId>,
    },
}

impl MutationCommand {
    pub fn table_index(&self) -> usize {
        match self {
            MutationCommand::Insert { table_index, .. }
            | MutationCommand::Update { table_index, .. }
            | MutationCommand::Delete { table_index, .. } => *table_index,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            MutationCommand::Insert { .. } => "insert",
            MutationCommand::Update { .. } => "update",
            MutationCommand::Delete { .. } => "delete",
        }
    }
}

/// Why a command was dropped instead of applied.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SkipReason {
    #[error("no table at index {index}")]
    UnknownTable { index: usize },

    #[error("view row {view_row_index} of table {table_index} did not resolve to a row id")]
    UnresolvedRow {
        table_index: usize,
        view_row_index: usize,
    },

    #[error("row {row_id} no longer exists")]
    RowNotFound { row_id: RowId },
}

/// One entry in the audit trail of an applied batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChangeRecord {
    Inserted {
        table_index: usize,
        row_id: RowId,
    },
    Updated {
        table_index: usize,
        row_id: RowId,
        /// Column indices that actually changed.
        columns: Vec<usize>,
    },
    Deleted {
        table_index: usize,
        row_id: RowId,
    },
    Skipped {
        command: MutationCommand,
        reason: SkipReason,
    },
}

impl ChangeRecord {
    pub fn is_skip(&self) -> bool {
        matches!(self, ChangeRecord::Skipped { .. })
    }
}

/// The result of applying a mutation batch.
///
/// The database inside is a complete new value; the caller swaps it in
/// whole, so no reader ever observes a partially-applied batch.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub database: StructuredDatabase,
    /// Human-readable notification lines, one per visible change.
    pub notices: Vec<String>,
    pub log: Vec<ChangeRecord>,
}

impl ApplyOutcome {
    pub fn applied(&self) -> usize {
        self.log.iter().filter(|record| !record.is_skip()).count()
    }

    pub fn skipped(&self) -> usize {
        self.log.iter().filter(|record| record.is_skip()).count()
    }
}

impl StructuredDatabase {
    /// Apply a batch of commands, producing a new database value.
    ///
    /// Commands are independent: one that cannot be applied is dropped and
    /// recorded as [`ChangeRecord::Skipped`], and the rest of the batch
    /// still applies.
    pub fn apply(&self, commands: &[MutationCommand]) -> ApplyOutcome {
        let mut database = self.clone();
        let mut notices = Vec::new();
        let mut log = Vec::new();

        for command in commands {
            match apply_one(&mut database, command, &mut notices) {
                Ok(record) => log.push(record),
                Err(reason) => {
                    warn!(verb = command.verb(), %reason, "dropping unapplicable command");
                    log.push(ChangeRecord::Skipped {
                        command: command.clone(),
                        reason,
                    });
                }
            }
        }

        if log.iter().any(|record| !record.is_skip()) {
            database.revision += 1;
        }

        ApplyOutcome {
            database,
            notices,
            log,
        }
    }
}

fn apply_one(
    database: &mut StructuredDatabase,
    command: &MutationCommand,
    notices: &mut Vec<String>,
) -> Result<ChangeRecord, SkipReason> {
    match command {
        MutationCommand::Insert {
            table_index,
            values,
        } => {
            let table = database
                .table_mut(*table_index)
                .ok_or(SkipReason::UnknownTable {
                    index: *table_index,
                })?;

            let width = table.columns.len();
            let mut cells = vec![CellValue::blank(); width];
            for (&column, value) in values {
                // Column indices beyond the declared schema are ignored.
                if column < width {
                    cells[column] = value.clone();
                }
            }

            let row = Row::new(cells);
            let row_id = row.id;
            match row.display_cell() {
                Some(cell) => notices.push(format!("{}: added \"{}\"", table.name, cell)),
                None => notices.push(format!("{}: added a row", table.name)),
            }
            table.rows.push(row);

            Ok(ChangeRecord::Inserted {
                table_index: *table_index,
                row_id,
            })
        }

        MutationCommand::Update {
            table_index,
            view_row_index,
            row_id,
            values,
        } => {
            let table = database
                .table_mut(*table_index)
                .ok_or(SkipReason::UnknownTable {
                    index: *table_index,
                })?;

            let row_id = row_id.ok_or(SkipReason::UnresolvedRow {
                table_index: *table_index,
                view_row_index: *view_row_index,
            })?;

            // Re-locate by permanent id. The view position may be a turn
            // stale, and the row may be gone entirely.
            let position = table
                .row_position(row_id)
                .ok_or(SkipReason::RowNotFound { row_id })?;

            let width = table.columns.len();
            let mut changed = Vec::new();
            for (&column, value) in values {
                if column >= width {
                    continue;
                }
                let before = table.rows[position].cells[column].clone();
                if before == *value {
                    continue;
                }
                table.rows[position].cells[column] = value.clone();
                if !looks_like_timestamp(&table.columns[column].label) {
                    notices.push(format!(
                        "{}: {} → {}",
                        table.columns[column].label, before, value
                    ));
                }
                changed.push(column);
            }

            Ok(ChangeRecord::Updated {
                table_index: *table_index,
                row_id,
                columns: changed,
            })
        }

        MutationCommand::Delete {
            table_index,
            view_row_index,
            row_id,
        } => {
            let table = database
                .table_mut(*table_index)
                .ok_or(SkipReason::UnknownTable {
                    index: *table_index,
                })?;

            let row_id = row_id.ok_or(SkipReason::UnresolvedRow {
                table_index: *table_index,
                view_row_index: *view_row_index,
            })?;

            let position = table
                .row_position(row_id)
                .ok_or(SkipReason::RowNotFound { row_id })?;

            let row = table.rows.remove(position);
            let handle = row
                .display_cell()
                .map(|cell| cell.to_string())
                .unwrap_or_else(|| row.id.to_string());
            notices.push(format!("{}: removed \"{}\"", table.name, handle));

            Ok(ChangeRecord::Deleted {
                table_index: *table_index,
                row_id,
            })
        }
    }
}

/// Columns whose churn is not worth narrating to the user.
fn looks_like_timestamp(label: &str) -> bool {
    let lower = label.to_lowercase();
    ["time", "date", "updated"].iter().any(|hint| lower.contains(hint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Column, Table};

    fn two_column_db() -> StructuredDatabase {
        StructuredDatabase::new().with_table(
            Table::new("Items").with_columns([Column::text("Name"), Column::number("Count")]),
        )
    }

    fn insert(table_index: usize, values: &[(usize, CellValue)]) -> MutationCommand {
        MutationCommand::Insert {
            table_index,
            values: values.iter().cloned().collect(),
        }
    }

    #[test]
    fn test_insert_sizes_row_to_schema() {
        let db = two_column_db();
        let outcome = db.apply(&[insert(0, &[(0, CellValue::text("Sword"))])]);

        let row = &outcome.database.tables[0].rows[0];
        assert_eq!(row.cells.len(), 2);
        assert_eq!(row.cells[0], CellValue::text("Sword"));
        assert!(row.cells[1].is_blank());
    }

    #[test]
    fn test_insert_ignores_unknown_columns() {
        let db = two_column_db();
        let outcome = db.apply(&[insert(
            0,
            &[(0, CellValue::text("Sword")), (7, CellValue::Int(9))],
        )]);

        assert_eq!(outcome.database.tables[0].rows[0].cells.len(), 2);
        assert_eq!(outcome.applied(), 1);
    }

    #[test]
    fn test_row_id_stable_across_updates() {
        let db = two_column_db();
        let outcome = db.apply(&[insert(0, &[(0, CellValue::text("Sword"))])]);
        let id = outcome.database.tables[0].rows[0].id;

        let outcome = outcome.database.apply(&[MutationCommand::Update {
            table_index: 0,
            view_row_index: 0,
            row_id: Some(id),
            values: [(1, CellValue::Int(10))].into_iter().collect(),
        }]);

        let row = &outcome.database.tables[0].rows[0];
        assert_eq!(row.id, id);
        assert_eq!(row.cells[1], CellValue::Int(10));
    }

    #[test]
    fn test_update_addresses_by_id_not_position() {
        // Three rows; the command claims view row 0 but carries the id of
        // the last canonical row. The last row must change, not row 0.
        let db = two_column_db();
        let outcome = db.apply(&[
            insert(0, &[(0, CellValue::text("a"))]),
            insert(0, &[(0, CellValue::text("b"))]),
            insert(0, &[(0, CellValue::text("c"))]),
        ]);
        let db = outcome.database;
        let last_id = db.tables[0].rows[2].id;

        let outcome = db.apply(&[MutationCommand::Update {
            table_index: 0,
            view_row_index: 0,
            row_id: Some(last_id),
            values: [(1, CellValue::Int(42))].into_iter().collect(),
        }]);

        assert!(outcome.database.tables[0].rows[0].cells[1].is_blank());
        assert_eq!(outcome.database.tables[0].rows[2].cells[1], CellValue::Int(42));
    }

    #[test]
    fn test_dangling_row_id_dropped() {
        let db = two_column_db();
        let outcome = db.apply(&[insert(0, &[(0, CellValue::text("a"))])]);
        let db = outcome.database;
        let before = db.clone();

        let outcome = db.apply(&[MutationCommand::Update {
            table_index: 0,
            view_row_index: 0,
            row_id: Some(RowId::new()),
            values: [(0, CellValue::text("ghost"))].into_iter().collect(),
        }]);

        assert_eq!(outcome.applied(), 0);
        assert_eq!(outcome.skipped(), 1);
        assert_eq!(
            outcome.database.tables[0].rows[0].cells,
            before.tables[0].rows[0].cells
        );
    }

    #[test]
    fn test_unresolved_row_dropped() {
        let db = two_column_db();
        let outcome = db.apply(&[MutationCommand::Delete {
            table_index: 0,
            view_row_index: 5,
            row_id: None,
        }]);

        assert_eq!(outcome.applied(), 0);
        assert!(matches!(
            outcome.log[0],
            ChangeRecord::Skipped {
                reason: SkipReason::UnresolvedRow { view_row_index: 5, .. },
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_table_dropped() {
        let db = two_column_db();
        let outcome = db.apply(&[insert(9, &[(0, CellValue::text("x"))])]);
        assert_eq!(outcome.applied(), 0);
        assert_eq!(outcome.skipped(), 1);
    }

    #[test]
    fn test_one_failure_never_aborts_batch() {
        let db = two_column_db();
        let outcome = db.apply(&[
            insert(9, &[(0, CellValue::text("bad"))]),
            insert(0, &[(0, CellValue::text("good"))]),
        ]);

        assert_eq!(outcome.applied(), 1);
        assert_eq!(outcome.skipped(), 1);
        assert_eq!(outcome.database.tables[0].rows.len(), 1);
    }

    #[test]
    fn test_delete_then_stale_update_in_one_batch() {
        let db = two_column_db();
        let outcome = db.apply(&[insert(0, &[(0, CellValue::text("doomed"))])]);
        let db = outcome.database;
        let id = db.tables[0].rows[0].id;

        let outcome = db.apply(&[
            MutationCommand::Delete {
                table_index: 0,
                view_row_index: 0,
                row_id: Some(id),
            },
            MutationCommand::Update {
                table_index: 0,
                view_row_index: 0,
                row_id: Some(id),
                values: [(0, CellValue::text("late"))].into_iter().collect(),
            },
        ]);

        assert_eq!(outcome.applied(), 1);
        assert_eq!(outcome.skipped(), 1);
        assert!(outcome.database.tables[0].rows.is_empty());
    }

    #[test]
    fn test_update_notices_and_timestamp_suppression() {
        let db = StructuredDatabase::new().with_table(
            Table::new("Quests")
                .with_columns([Column::text("Name"), Column::text("Last Updated")]),
        );
        let outcome = db.apply(&[insert(0, &[(0, CellValue::text("Rescue"))])]);
        let db = outcome.database;
        let id = db.tables[0].rows[0].id;

        let outcome = db.apply(&[MutationCommand::Update {
            table_index: 0,
            view_row_index: 0,
            row_id: Some(id),
            values: [
                (0, CellValue::text("Rescue the smith")),
                (1, CellValue::text("turn 9")),
            ]
            .into_iter()
            .collect(),
        }]);

        // Both columns changed, but only the non-timestamp one is narrated.
        assert_eq!(outcome.notices.len(), 1);
        assert_eq!(outcome.notices[0], "Name: Rescue → Rescue the smith");
        assert!(matches!(
            &outcome.log[0],
            ChangeRecord::Updated { columns, .. } if columns.len() == 2
        ));
    }

    #[test]
    fn test_unchanged_column_not_narrated() {
        let db = two_column_db();
        let outcome = db.apply(&[insert(0, &[(0, CellValue::text("Sword"))])]);
        let db = outcome.database;
        let id = db.tables[0].rows[0].id;

        let outcome = db.apply(&[MutationCommand::Update {
            table_index: 0,
            view_row_index: 0,
            row_id: Some(id),
            values: [(0, CellValue::text("Sword"))].into_iter().collect(),
        }]);

        assert!(outcome.notices.is_empty());
    }

    #[test]
    fn test_revision_bumps_once_per_applied_batch() {
        let db = two_column_db();
        assert_eq!(db.revision, 0);

        let outcome = db.apply(&[
            insert(0, &[(0, CellValue::text("a"))]),
            insert(0, &[(0, CellValue::text("b"))]),
        ]);
        assert_eq!(outcome.database.revision, 1);

        // A batch where nothing applied leaves the stamp alone.
        let outcome = outcome.database.apply(&[insert(9, &[])]);
        assert_eq!(outcome.database.revision, 1);
    }

    #[test]
    fn test_delete_notice_uses_display_cell() {
        let db = two_column_db();
        let outcome = db.apply(&[insert(0, &[(1, CellValue::Int(3))])]);
        let db = outcome.database;
        let id = db.tables[0].rows[0].id;

        let outcome = db.apply(&[MutationCommand::Delete {
            table_index: 0,
            view_row_index: 0,
            row_id: Some(id),
        }]);

        // Column 0 was blank, so the first non-blank cell is the count.
        assert_eq!(outcome.notices.last().unwrap(), "Items: removed \"3\"");
    }
}
