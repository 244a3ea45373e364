//! COPY block emission.
//!
//! Each table becomes one `COPY ... FROM stdin;` block in PostgreSQL text
//! format: tab-separated fields, `\N` for NULL, a `\.` terminator. A table
//! with no rows still gets its block so the script shape does not depend on
//! the data.

use crate::error::{Result, ScriptError};
use crate::script::plan::TablePlan;
use crate::script::sink::ScriptSink;
use crate::value::{Batch, SqlValue};

/// Streaming writer for one table's COPY block.
///
/// Feed batches in arrival order, then call [`CopyWriter::finish`]. The row
/// limit and identity maximum are tracked here so the caller only moves
/// batches.
pub struct CopyWriter<'a> {
    table: &'a TablePlan,
    sink: &'a mut dyn ScriptSink,
    row_limit: Option<u64>,
    rows_written: u64,
    max_identity: Option<i64>,
    header_written: bool,
}

impl<'a> CopyWriter<'a> {
    pub fn new(
        table: &'a TablePlan,
        sink: &'a mut dyn ScriptSink,
        row_limit: Option<u64>,
    ) -> Self {
        Self {
            table,
            sink,
            row_limit,
            rows_written: 0,
            max_identity: None,
            header_written: false,
        }
    }

    /// Write a batch of rows. Returns false once the row limit is reached,
    /// at which point the caller should stop feeding rows.
    pub fn write_batch(&mut self, batch: &Batch) -> Result<bool> {
        for row in &batch.rows {
            if self
                .row_limit
                .is_some_and(|limit| self.rows_written >= limit)
            {
                return Ok(false);
            }
            self.write_row(row)?;
        }
        Ok(self
            .row_limit
            .is_none_or(|limit| self.rows_written < limit))
    }

    fn write_row(&mut self, row: &[SqlValue]) -> Result<()> {
        if !self.header_written {
            self.write_header()?;
        }

        if let Some(seq) = &self.table.sequence {
            if let Some(v) = row.get(seq.column_index).and_then(SqlValue::as_i64) {
                self.max_identity = Some(self.max_identity.map_or(v, |m| m.max(v)));
            }
        }

        let table_name = self.table.source_full_name();
        let mut line = String::new();
        for (i, value) in row.iter().enumerate() {
            if i > 0 {
                line.push('\t');
            }
            line.push_str(&value_to_text(&table_name, value)?);
        }
        self.sink.write_line(&line)?;
        self.rows_written += 1;
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        let columns: Vec<&str> = self
            .table
            .columns
            .iter()
            .map(|c| c.output_name.as_str())
            .collect();
        self.sink.write_line("\\echo")?;
        self.sink.write_line(&format!(
            "\\echo Importing table [{}]",
            self.table.output_name
        ))?;
        self.sink.write_line("\\echo")?;
        self.sink.write_line(&format!(
            "COPY {} ({}) FROM stdin;",
            self.table.output_name,
            columns.join(", ")
        ))?;
        self.header_written = true;
        Ok(())
    }

    /// Terminate the block and return (rows written, identity maximum).
    /// Emits the header even when no rows arrived.
    pub fn finish(mut self) -> Result<(u64, Option<i64>)> {
        if !self.header_written {
            self.write_header()?;
        }
        self.sink.write_line("\\.")?;
        self.sink.write_line("")?;
        Ok((self.rows_written, self.max_identity))
    }
}

/// Render one value in COPY text format.
fn value_to_text(table: &str, value: &SqlValue) -> Result<String> {
    let text = match value {
        SqlValue::Null => "\\N".to_string(),
        SqlValue::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        SqlValue::I16(i) => i.to_string(),
        SqlValue::I32(i) => i.to_string(),
        SqlValue::I64(i) => i.to_string(),
        SqlValue::F32(f) => f.to_string(),
        SqlValue::F64(f) => f.to_string(),
        SqlValue::Text(s) => escape_copy_text(table, s)?,
        SqlValue::Bytes(b) => format!("\\\\x{}", hex::encode(b)),
        SqlValue::Uuid(u) => u.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        SqlValue::DateTimeOffset(dto) => dto.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string(),
        SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
    };
    Ok(text)
}

/// Escape text for PostgreSQL COPY. NUL bytes cannot be represented in
/// COPY text at all, so they fail the run rather than corrupt the block.
fn escape_copy_text(table: &str, s: &str) -> Result<String> {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\0' => {
                return Err(ScriptError::encoding(
                    table,
                    "text value contains a NUL byte",
                ))
            }
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::plan::{ColumnPlan, SequencePlan, TablePlan};
    use crate::script::sink::WriterSink;

    fn posts_table(with_sequence: bool) -> TablePlan {
        TablePlan {
            source_schema: "dbo".into(),
            source_name: "Posts".into(),
            output_name: "posts".into(),
            columns: vec![
                ColumnPlan {
                    source_name: "Id".into(),
                    output_name: "id".into(),
                    target_type: "integer".into(),
                    not_null: true,
                    default: None,
                },
                ColumnPlan {
                    source_name: "Title".into(),
                    output_name: "title".into(),
                    target_type: "text".into(),
                    not_null: false,
                    default: None,
                },
            ],
            primary_key: vec!["id".into()],
            sequence: with_sequence.then(|| SequencePlan {
                name: "posts_seq".into(),
                column_index: 0,
            }),
            foreign_keys: vec![],
            indexes: vec![],
        }
    }

    fn run(
        table: &TablePlan,
        batches: Vec<Batch>,
        limit: Option<u64>,
    ) -> (String, u64, Option<i64>) {
        let mut sink = WriterSink::new(Vec::new());
        let mut writer = CopyWriter::new(table, &mut sink, limit);
        for batch in &batches {
            if !writer.write_batch(batch).unwrap() {
                break;
            }
        }
        let (rows, max) = writer.finish().unwrap();
        sink.finish().unwrap();
        (
            String::from_utf8(sink.into_inner().unwrap()).unwrap(),
            rows,
            max,
        )
    }

    #[test]
    fn block_has_header_rows_and_terminator() {
        let table = posts_table(false);
        let batch = Batch::new(vec![
            vec![SqlValue::I32(1), "First post".into()],
            vec![SqlValue::I32(2), SqlValue::Null],
        ]);
        let (out, rows, _) = run(&table, vec![batch], None);
        assert_eq!(rows, 2);
        assert!(out.contains("\\echo Importing table [posts]"));
        assert!(out.contains("COPY posts (id, title) FROM stdin;"));
        assert!(out.contains("1\tFirst post\n"));
        assert!(out.contains("2\t\\N\n"));
        assert!(out.ends_with("\\.\n\n"));
    }

    #[test]
    fn empty_table_still_gets_a_block() {
        let table = posts_table(false);
        let (out, rows, _) = run(&table, vec![Batch::empty_final()], None);
        assert_eq!(rows, 0);
        assert!(out.contains("COPY posts (id, title) FROM stdin;"));
        assert!(out.contains("\\."));
    }

    #[test]
    fn control_characters_are_escaped() {
        let table = posts_table(false);
        let batch = Batch::new(vec![vec![
            SqlValue::I32(1),
            "a\tb\nc\rd\\e".into(),
        ]]);
        let (out, _, _) = run(&table, vec![batch], None);
        assert!(out.contains("1\ta\\tb\\nc\\rd\\\\e\n"));
    }

    #[test]
    fn nul_byte_fails_the_run() {
        let table = posts_table(false);
        let mut sink = WriterSink::new(Vec::new());
        let mut writer = CopyWriter::new(&table, &mut sink, None);
        let batch = Batch::new(vec![vec![SqlValue::I32(1), "bad\0value".into()]]);
        let err = writer.write_batch(&batch).unwrap_err();
        assert!(matches!(err, ScriptError::Encoding { .. }));
    }

    #[test]
    fn row_limit_caps_output() {
        let table = posts_table(false);
        let batches = vec![
            Batch::new(vec![
                vec![SqlValue::I32(1), "a".into()],
                vec![SqlValue::I32(2), "b".into()],
            ]),
            Batch::new(vec![vec![SqlValue::I32(3), "c".into()]]),
        ];
        let (out, rows, _) = run(&table, batches, Some(2));
        assert_eq!(rows, 2);
        assert!(!out.contains("3\tc"));
    }

    #[test]
    fn identity_maximum_is_tracked() {
        let table = posts_table(true);
        let batch = Batch::new(vec![
            vec![SqlValue::I32(7), "a".into()],
            vec![SqlValue::I32(41), "b".into()],
            vec![SqlValue::I32(12), "c".into()],
        ]);
        let (_, _, max) = run(&table, vec![batch], None);
        assert_eq!(max, Some(41));
    }

    #[test]
    fn bytes_render_as_hex_bytea() {
        let table = posts_table(false);
        let batch = Batch::new(vec![vec![
            SqlValue::I32(1),
            SqlValue::Bytes(vec![0xde, 0xad]),
        ]]);
        let (out, _, _) = run(&table, vec![batch], None);
        assert!(out.contains("1\t\\\\xdead\n"));
    }

    #[test]
    fn booleans_render_as_t_f() {
        assert_eq!(value_to_text("t", &SqlValue::Bool(true)).unwrap(), "t");
        assert_eq!(value_to_text("t", &SqlValue::Bool(false)).unwrap(), "f");
    }
}
