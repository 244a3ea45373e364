//! Post-load sequence synchronization.
//!
//! Identity values are copied verbatim, so after the data load each backing
//! sequence must be moved past the largest loaded value or the first insert
//! would collide.

use crate::error::Result;
use crate::script::sink::ScriptSink;

/// Largest identity value seen per sequence, accumulated during the data
/// phase.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    records: Vec<SequenceRecord>,
}

/// One sequence and the highest identity value loaded through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    /// Output sequence name.
    pub name: String,

    /// Output table name, for log context.
    pub table: String,

    /// Output name of the identity column.
    pub column: String,

    /// Largest loaded value. None when the table had no rows.
    pub max_value: Option<i64>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished table's sequence state.
    pub fn record(&mut self, name: String, table: String, column: String, max_value: Option<i64>) {
        self.records.push(SequenceRecord {
            name,
            table,
            column,
            max_value,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Emit one RESTART per sequence that loaded at least one row. A
    /// freshly created sequence already starts at 1, so empty tables need
    /// nothing.
    pub fn emit(&self, sink: &mut dyn ScriptSink) -> Result<()> {
        let loaded: Vec<(&SequenceRecord, i64)> = self
            .records
            .iter()
            .filter_map(|r| r.max_value.map(|m| (r, m)))
            .collect();
        if loaded.is_empty() {
            return Ok(());
        }
        sink.section("UPDATING SEQUENCE START VALUES")?;
        for (record, max_value) in loaded {
            sink.write_line(&format!(
                "ALTER SEQUENCE {} RESTART WITH {};",
                record.name,
                max_value + 1
            ))?;
        }
        Ok(())
    }
}
