//! The script generator: wires catalog, plan, row stream and emitters into
//! one ordered run.
//!
//! Output order is fixed so every script replays the same way: database
//! preamble, schemas, sequences, tables, primary keys, data, sequence
//! restarts, foreign keys, indexes. Constraints that reference data come
//! strictly after the data exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::catalog::Catalog;
use crate::config::ScriptOptions;
use crate::error::{Result, ScriptError};
use crate::script::copy::CopyWriter;
use crate::script::ddl;
use crate::script::plan::ScriptPlan;
use crate::script::sequence::SequenceTracker;
use crate::script::sink::{Progress, ScriptSink};
use crate::source::RowSource;

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptReport {
    /// Final status: "completed" or "cancelled".
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Tables written.
    pub tables_written: usize,

    /// Rows written across all tables.
    pub rows_written: u64,

    /// Sequences created and synchronized.
    pub sequences_written: usize,
}

impl ScriptReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Drives one script generation run.
pub struct ScriptGenerator {
    options: ScriptOptions,
}

impl ScriptGenerator {
    pub fn new(mut options: ScriptOptions) -> Result<Self> {
        options.validate()?;
        // A limit of zero means no limit at all.
        if options.row_limit == Some(0) {
            options.row_limit = None;
        }
        Ok(Self { options })
    }

    /// Generate the whole script into `sink`.
    ///
    /// The catalog is expected to already exclude nothing; exclusion
    /// happens during planning. Cancellation is checked between tables, so
    /// a SIGINT takes effect at the next table boundary.
    pub async fn generate(
        &self,
        catalog: &Catalog,
        rows: &dyn RowSource,
        sink: &mut dyn ScriptSink,
        progress: &mut dyn Progress,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<ScriptReport> {
        let started_at = Utc::now();
        let cancel = cancel.unwrap_or_else(|| {
            let (_, rx) = watch::channel(false);
            rx
        });

        progress.stage("planning script");
        let plan = ScriptPlan::build(catalog, &self.options)?;
        info!(
            "Planned script for {}: {} tables, {} sequences",
            plan.database,
            plan.tables.len(),
            plan.tables.iter().filter(|t| t.sequence.is_some()).count()
        );

        progress.stage("writing database preamble");
        ddl::emit_preamble(&plan, sink)?;
        progress.stage("writing schemas");
        ddl::emit_schemas(&plan, sink)?;
        progress.stage("writing sequences");
        ddl::emit_sequences(&plan, sink)?;
        progress.stage("writing tables");
        ddl::emit_tables(&plan, sink)?;
        progress.stage("writing primary keys");
        ddl::emit_primary_keys(&plan, sink)?;

        progress.stage("writing data");
        let mut tracker = SequenceTracker::new();
        let mut rows_written = 0u64;
        let total = plan.tables.len();
        if total > 0 {
            sink.section("INSERT DATA")?;
            sink.write_line("")?;
        }

        for (i, table) in plan.tables.iter().enumerate() {
            if *cancel.borrow() {
                return Err(ScriptError::Cancelled);
            }

            let source_table = catalog
                .tables()
                .find(|t| t.schema == table.source_schema && t.name == table.source_name)
                .ok_or_else(|| {
                    ScriptError::Catalog(format!(
                        "planned table {} missing from catalog",
                        table.source_full_name()
                    ))
                })?;

            let mut receiver = rows.read_table(source_table, self.options.row_limit);
            let mut writer = CopyWriter::new(table, sink, self.options.row_limit);

            while let Some(batch) = receiver.recv().await {
                let batch = batch?;
                let want_more = writer.write_batch(&batch)?;
                if batch.is_last || !want_more {
                    break;
                }
            }
            drop(receiver);

            let (table_rows, max_identity) = writer.finish()?;
            rows_written += table_rows;
            if let Some(seq) = &table.sequence {
                tracker.record(
                    seq.name.clone(),
                    table.output_name.clone(),
                    table.columns[seq.column_index].output_name.clone(),
                    max_identity,
                );
            }
            progress.table_done(&table.output_name, table_rows, i + 1, total);
        }

        progress.stage("writing sequence start values");
        let sequences_written = plan
            .tables
            .iter()
            .filter(|t| t.sequence.is_some())
            .count();
        tracker.emit(sink)?;

        progress.stage("writing foreign key constraints");
        ddl::emit_foreign_keys(&plan, sink)?;
        progress.stage("writing indexes");
        ddl::emit_indexes(&plan, sink)?;

        sink.finish()?;

        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        info!(
            "Script complete: {} tables, {} rows in {:.1}s",
            total, rows_written, duration_seconds
        );

        Ok(ScriptReport {
            status: "completed".to_string(),
            duration_seconds,
            started_at,
            completed_at,
            tables_written: total,
            rows_written,
            sequences_written,
        })
    }
}
