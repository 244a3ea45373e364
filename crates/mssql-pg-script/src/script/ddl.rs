//! DDL emission: everything in the script except the data itself.
//!
//! Pre-data sections run in dependency order: the database preamble, then
//! schemas, then sequences (column defaults reference them), then tables,
//! then primary keys. Foreign keys and indexes wait until after the data so
//! the bulk load is unconstrained and a capped run still replays.

use crate::error::Result;
use crate::script::plan::{ScriptPlan, TablePlan};
use crate::script::sink::ScriptSink;

/// Emit the database preamble: reconnect, drop, recreate, extension.
pub fn emit_preamble(plan: &ScriptPlan, sink: &mut dyn ScriptSink) -> Result<()> {
    sink.section("PREPARE DATABASE")?;
    sink.write_line("")?;
    sink.write_line("\\connect postgres")?;
    sink.write_line(&format!("drop database if exists {};", plan.database))?;
    sink.write_line(&format!("create database {};", plan.database))?;
    sink.write_line(&format!("\\connect {}", plan.database))?;
    sink.write_line("")?;
    sink.write_line("CREATE EXTENSION \"uuid-ossp\";")?;
    Ok(())
}

/// Emit CREATE SCHEMA statements.
pub fn emit_schemas(plan: &ScriptPlan, sink: &mut dyn ScriptSink) -> Result<()> {
    if plan.schemas.is_empty() {
        return Ok(());
    }
    sink.section("CREATE SCHEMAS")?;
    for schema in &plan.schemas {
        sink.write_line(&format!("CREATE SCHEMA {};", schema))?;
    }
    Ok(())
}

/// Emit CREATE SEQUENCE statements for every identity column.
pub fn emit_sequences(plan: &ScriptPlan, sink: &mut dyn ScriptSink) -> Result<()> {
    let sequences: Vec<&str> = plan
        .tables
        .iter()
        .filter_map(|t| t.sequence.as_ref())
        .map(|s| s.name.as_str())
        .collect();
    if sequences.is_empty() {
        return Ok(());
    }
    sink.section("CREATING SEQUENCES")?;
    for name in sequences {
        sink.write_line(&format!("CREATE SEQUENCE {};", name))?;
    }
    Ok(())
}

/// Emit CREATE TABLE statements, skeleton only.
pub fn emit_tables(plan: &ScriptPlan, sink: &mut dyn ScriptSink) -> Result<()> {
    if plan.tables.is_empty() {
        return Ok(());
    }
    sink.section("CREATE TABLES")?;
    for table in &plan.tables {
        emit_table(table, sink)?;
    }
    Ok(())
}

fn emit_table(table: &TablePlan, sink: &mut dyn ScriptSink) -> Result<()> {
    sink.write_line(&format!("CREATE TABLE {} (", table.output_name))?;
    let count = table.columns.len();
    for (i, column) in table.columns.iter().enumerate() {
        let mut def = format!("{} {}", column.output_name, column.target_type);
        if column.not_null {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        if i + 1 < count {
            def.push(',');
        }
        sink.write_line(&format!("    {}", def))?;
    }
    sink.write_line(");")?;
    sink.write_line("")?;
    Ok(())
}

/// Emit ALTER TABLE ADD PRIMARY KEY, after every table exists.
pub fn emit_primary_keys(plan: &ScriptPlan, sink: &mut dyn ScriptSink) -> Result<()> {
    let with_pk: Vec<&TablePlan> = plan
        .tables
        .iter()
        .filter(|t| !t.primary_key.is_empty())
        .collect();
    if with_pk.is_empty() {
        return Ok(());
    }
    sink.section("CREATE PRIMARY KEYS")?;
    for table in with_pk {
        sink.write_line(&format!(
            "ALTER TABLE {} ADD PRIMARY KEY ({});",
            table.output_name,
            table.primary_key.join(", ")
        ))?;
    }
    Ok(())
}

/// Emit ALTER TABLE ADD FOREIGN KEY, after the data load.
pub fn emit_foreign_keys(plan: &ScriptPlan, sink: &mut dyn ScriptSink) -> Result<()> {
    if plan.tables.iter().all(|t| t.foreign_keys.is_empty()) {
        return Ok(());
    }
    sink.section("CREATE REFERENTIAL CONSTRAINTS")?;
    for table in &plan.tables {
        for fk in &table.foreign_keys {
            sink.write_line(&format!(
                "ALTER TABLE {} ADD FOREIGN KEY ({}) REFERENCES {} ({});",
                table.output_name,
                fk.columns.join(", "),
                fk.ref_table,
                fk.ref_columns.join(", ")
            ))?;
        }
    }
    Ok(())
}

/// Emit CREATE INDEX statements, after the data load.
pub fn emit_indexes(plan: &ScriptPlan, sink: &mut dyn ScriptSink) -> Result<()> {
    if plan.tables.iter().all(|t| t.indexes.is_empty()) {
        return Ok(());
    }
    sink.section("CREATING INDEXES")?;
    for table in &plan.tables {
        for index in &table.indexes {
            let unique = if index.is_unique { "UNIQUE " } else { "" };
            sink.write_line(&format!(
                "CREATE {}INDEX {} ON {} ({});",
                unique,
                index.name,
                table.output_name,
                index.columns.join(", ")
            ))?;
        }
    }
    Ok(())
}
