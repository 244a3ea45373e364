//! Output abstractions for the generated script.

use std::io::{self, BufWriter, Write};

use tracing::info;

use crate::error::Result;

/// Line-oriented destination for script text.
///
/// Emitters only ever append whole lines, which keeps COPY blocks exact: a
/// row is one line, whatever bytes it contains.
pub trait ScriptSink {
    /// Append one line, terminated by a newline.
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Flush buffered output. Called once after the last line.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Append a section banner comment.
    fn section(&mut self, comment: &str) -> Result<()> {
        self.write_line("")?;
        self.write_line("--")?;
        self.write_line(&format!("-- {}", comment))
    }
}

/// Sink backed by any [`io::Write`], buffered.
pub struct WriterSink<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}

impl<W: Write> ScriptSink for WriterSink<W> {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Progress reporting, decoupled from output so a run writing the script to
/// stdout can still report progress on stderr.
pub trait Progress {
    /// A named phase has started.
    fn stage(&mut self, message: &str);

    /// A table's data has been written.
    fn table_done(&mut self, table: &str, rows: u64, index: usize, total: usize);
}

/// Progress via the tracing subscriber.
pub struct LogProgress;

impl Progress for LogProgress {
    fn stage(&mut self, message: &str) {
        info!("{}", message);
    }

    fn table_done(&mut self, table: &str, rows: u64, index: usize, total: usize) {
        info!("[{}/{}] {}: {} rows", index, total, table, rows);
    }
}

/// Discards all progress events.
pub struct NullProgress;

impl Progress for NullProgress {
    fn stage(&mut self, _message: &str) {}

    fn table_done(&mut self, _table: &str, _rows: u64, _index: usize, _total: usize) {}
}
