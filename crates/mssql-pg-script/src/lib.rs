//! # mssql-pg-script
//!
//! Convert a Microsoft SQL Server database into a single replayable
//! PostgreSQL psql script, with:
//!
//! - **Schema conversion**: tables, primary keys, foreign keys, indexes
//!   and identity-backed sequences, emitted in dependency-safe order
//! - **Bulk data** as COPY FROM stdin text blocks
//! - **Identifier rewriting** from CamelCase to snake_case, with collision
//!   detection
//! - **Type mapping** between MSSQL and PostgreSQL
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::collections::BTreeSet;
//! use mssql_pg_script::{MssqlPool, ScriptGenerator, ScriptOptions, SourceConfig};
//! use mssql_pg_script::script::sink::{LogProgress, WriterSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = SourceConfig {
//!         host: "db.example.com".into(),
//!         port: 1433,
//!         database: "Northwind".into(),
//!         user: "reader".into(),
//!         password: "secret".into(),
//!         encrypt: "true".into(),
//!         trust_server_cert: false,
//!     };
//!     let options = ScriptOptions {
//!         destination_database: "northwind".into(),
//!         exclude_schemas: BTreeSet::new(),
//!         underscore_identifiers: true,
//!         row_limit: None,
//!     };
//!
//!     let pool = MssqlPool::new(source).await?;
//!     let catalog = pool.read_catalog(&options.exclude_schemas).await?;
//!     let mut sink = WriterSink::new(std::fs::File::create("northwind.sql")?);
//!     let generator = ScriptGenerator::new(options)?;
//!     let report = generator
//!         .generate(&catalog, &pool, &mut sink, &mut LogProgress, None)
//!         .await?;
//!     println!("Wrote {} rows", report.rows_written);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod generator;
pub mod identifier;
pub mod script;
pub mod source;
pub mod typemap;
pub mod value;

// Re-exports for convenient access
pub use catalog::{Catalog, Column, Table};
pub use config::{ScriptOptions, SourceConfig};
pub use error::{Result, ScriptError};
pub use generator::{ScriptGenerator, ScriptReport};
pub use script::sink::{LogProgress, NullProgress, Progress, ScriptSink, WriterSink};
pub use source::{MssqlPool, RowSource};
pub use value::{Batch, SqlValue};
