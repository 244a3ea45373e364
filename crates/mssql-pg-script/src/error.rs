//! Error types for script generation.

use thiserror::Error;

/// Main error type for script generation. Every variant is fatal: a partial
/// script would silently drop objects or rows, so generation stops at the
/// first failure.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// Configuration error (invalid flags, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] tiberius::error::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Catalog introspection returned something inconsistent
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Two identifiers collapsed to the same name after renaming
    #[error("Name collision: {kind} \"{first}\" and \"{second}\" both map to \"{renamed}\"")]
    NameCollision {
        kind: String,
        first: String,
        second: String,
        renamed: String,
    },

    /// Column type with no PostgreSQL mapping
    #[error("Unsupported type {data_type} on column {table}.{column}")]
    UnsupportedType {
        table: String,
        column: String,
        data_type: String,
    },

    /// Reading rows failed partway through a table
    #[error("Row read failed for table {table}: {message}")]
    RowRead { table: String, message: String },

    /// A value cannot be represented in COPY text format
    #[error("Encoding failed for table {table}: {message}")]
    Encoding { table: String, message: String },

    /// IO error (writing the script)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generation was cancelled (SIGINT, etc.)
    #[error("Script generation cancelled")]
    Cancelled,
}

impl ScriptError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        ScriptError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a RowRead error
    pub fn row_read(table: impl Into<String>, message: impl Into<String>) -> Self {
        ScriptError::RowRead {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an Encoding error
    pub fn encoding(table: impl Into<String>, message: impl Into<String>) -> Self {
        ScriptError::Encoding {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an UnsupportedType error
    pub fn unsupported_type(
        table: impl Into<String>,
        column: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        ScriptError::UnsupportedType {
            table: table.into(),
            column: column.into(),
            data_type: data_type.into(),
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        // Add error chain for wrapped errors
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Process exit code for this error, so scripted callers can tell
    /// a cancelled run apart from a failed one.
    pub fn exit_code(&self) -> u8 {
        match self {
            ScriptError::Config(_) => 2,
            ScriptError::Cancelled => 130,
            _ => 1,
        }
    }
}

/// Result type alias for script generation.
pub type Result<T> = std::result::Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collision_message_names_both_identifiers() {
        let err = ScriptError::NameCollision {
            kind: "column".into(),
            first: "UserID".into(),
            second: "user_id".into(),
            renamed: "user_id".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("UserID"));
        assert!(msg.contains("user_id"));
    }

    #[test]
    fn detailed_format_includes_io_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = ScriptError::Io(io);
        let detail = err.format_detailed();
        assert!(detail.starts_with("Error: IO error"));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ScriptError::Config("x".into()).exit_code(), 2);
        assert_eq!(ScriptError::Cancelled.exit_code(), 130);
        assert_eq!(ScriptError::Catalog("x".into()).exit_code(), 1);
    }
}
