//! Resolution of the catalog into a fully named, fully typed script plan.
//!
//! All renaming, type mapping and default translation happens here, before
//! a single line of output exists. Anything that can fail a run fails
//! during planning; the emitters that follow only format.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tracing::warn;

use crate::catalog::Catalog;
use crate::config::ScriptOptions;
use crate::error::Result;
use crate::identifier::{self, RenameMap};
use crate::typemap;

/// Everything the emitters need, with source names kept alongside output
/// names so rows can still be read from the original tables.
#[derive(Debug)]
pub struct ScriptPlan {
    /// Destination database name.
    pub database: String,

    /// Output schema names needing CREATE SCHEMA (dbo maps to public and
    /// needs none).
    pub schemas: Vec<String>,

    /// Tables in emission order.
    pub tables: Vec<TablePlan>,
}

/// One table, resolved.
#[derive(Debug)]
pub struct TablePlan {
    /// Source schema name, for reading rows.
    pub source_schema: String,

    /// Source table name, for reading rows.
    pub source_name: String,

    /// Qualified output name as it appears in the script.
    pub output_name: String,

    /// Columns in ordinal order.
    pub columns: Vec<ColumnPlan>,

    /// Primary key output column names, in key order.
    pub primary_key: Vec<String>,

    /// Backing sequence for the identity column, if any.
    pub sequence: Option<SequencePlan>,

    /// Foreign keys whose referenced table is part of the plan.
    pub foreign_keys: Vec<ForeignKeyPlan>,

    /// Indexes to create after data load.
    pub indexes: Vec<IndexPlan>,
}

impl TablePlan {
    /// Source-side qualified name, for error messages and queries.
    pub fn source_full_name(&self) -> String {
        format!("{}.{}", self.source_schema, self.source_name)
    }
}

/// One column, resolved.
#[derive(Debug)]
pub struct ColumnPlan {
    /// Source column name, for reading rows.
    pub source_name: String,

    /// Output column name.
    pub output_name: String,

    /// PostgreSQL type.
    pub target_type: String,

    /// Emit NOT NULL.
    pub not_null: bool,

    /// Fully rendered DEFAULT expression, if any.
    pub default: Option<String>,
}

/// Identity column sequence.
#[derive(Debug)]
pub struct SequencePlan {
    /// Output sequence name (table name plus `_seq`).
    pub name: String,

    /// Position of the identity column within the table's columns.
    pub column_index: usize,
}

/// One foreign key, resolved to output names.
#[derive(Debug)]
pub struct ForeignKeyPlan {
    /// Referencing output column names.
    pub columns: Vec<String>,

    /// Referenced output table name.
    pub ref_table: String,

    /// Referenced output column names.
    pub ref_columns: Vec<String>,
}

/// One index, resolved to output names.
#[derive(Debug)]
pub struct IndexPlan {
    /// Output index name.
    pub name: String,

    /// Output column names.
    pub columns: Vec<String>,

    /// Emit CREATE UNIQUE INDEX.
    pub is_unique: bool,
}

impl ScriptPlan {
    /// Resolve a catalog against the run options.
    ///
    /// Excluded schemas are dropped here, before rename collision checks,
    /// so names in excluded schemas can never fail a run.
    pub fn build(catalog: &Catalog, options: &ScriptOptions) -> Result<Self> {
        let filtered = Catalog {
            database: catalog.database.clone(),
            schemas: catalog
                .schemas
                .iter()
                .filter(|s| !options.exclude_schemas.contains(&s.name))
                .cloned()
                .collect(),
        };

        let renames = RenameMap::build(&filtered, options.underscore_identifiers)?;

        let schemas = filtered
            .schemas
            .iter()
            .filter(|s| s.name != "dbo")
            .map(|s| renames.schema(&s.name))
            .collect();

        let mut tables = Vec::with_capacity(filtered.table_count());
        let mut index_names: HashMap<String, u32> = HashMap::new();
        for schema in &filtered.schemas {
            for table in &schema.tables {
                let source_full = table.full_name();
                let mut columns = Vec::with_capacity(table.columns.len());
                let mut sequence = None;

                for (idx, column) in table.columns.iter().enumerate() {
                    let mapped = typemap::map_column(&source_full, column)?;

                    if mapped.needs_sequence && sequence.is_none() {
                        sequence = Some(SequencePlan {
                            name: renames.sequence(&schema.name, &table.name),
                            column_index: idx,
                        });
                    }

                    let default = match &column.default {
                        Some(expr) => typemap::translate_default(&mapped.target_type, expr),
                        None if mapped.needs_sequence => {
                            let seq = renames.sequence(&schema.name, &table.name);
                            Some(format!("nextval('{}')", seq))
                        }
                        None => None,
                    };

                    columns.push(ColumnPlan {
                        source_name: column.name.clone(),
                        output_name: renames.column(&schema.name, &table.name, &column.name),
                        target_type: mapped.target_type,
                        not_null: !column.is_nullable,
                        default,
                    });
                }

                let primary_key = table
                    .primary_key
                    .iter()
                    .map(|c| renames.column(&schema.name, &table.name, c))
                    .collect();

                let mut foreign_keys = Vec::new();
                for fk in &table.foreign_keys {
                    let ref_in_plan = filtered
                        .schemas
                        .iter()
                        .any(|s| {
                            s.name == fk.ref_schema
                                && s.tables.iter().any(|t| t.name == fk.ref_table)
                        });
                    if !ref_in_plan {
                        warn!(
                            "dropping foreign key {} on {}: referenced table {}.{} is not in the script",
                            fk.name, source_full, fk.ref_schema, fk.ref_table
                        );
                        continue;
                    }
                    foreign_keys.push(ForeignKeyPlan {
                        columns: fk
                            .columns
                            .iter()
                            .map(|c| renames.column(&schema.name, &table.name, c))
                            .collect(),
                        ref_table: renames.table(&fk.ref_schema, &fk.ref_table),
                        ref_columns: fk
                            .ref_columns
                            .iter()
                            .map(|c| renames.column(&fk.ref_schema, &fk.ref_table, c))
                            .collect(),
                    });
                }

                let indexes = table
                    .indexes
                    .iter()
                    .map(|idx| IndexPlan {
                        name: next_index_name(
                            &mut index_names,
                            &table.name,
                            options.underscore_identifiers,
                        ),
                        columns: idx
                            .columns
                            .iter()
                            .map(|c| renames.column(&schema.name, &table.name, c))
                            .collect(),
                        is_unique: idx.is_unique,
                    })
                    .collect();

                tables.push(TablePlan {
                    source_schema: schema.name.clone(),
                    source_name: table.name.clone(),
                    output_name: renames.table(&schema.name, &table.name),
                    columns,
                    primary_key,
                    sequence,
                    foreign_keys,
                    indexes,
                });
            }
        }

        Ok(ScriptPlan {
            database: options.destination_database.clone(),
            schemas,
            tables,
        })
    }
}

/// Output index name, derived from the table name.
///
/// MSSQL index names are unique per table but PostgreSQL requires
/// uniqueness per schema, so repeat uses of a base name get a numeric
/// suffix (second use is 2, then 3, and so on).
fn next_index_name(
    seen: &mut HashMap<String, u32>,
    table_name: &str,
    underscore_identifiers: bool,
) -> String {
    let base = format!("index_{}", table_name);
    let full = match seen.entry(base.clone()) {
        Entry::Occupied(mut entry) => {
            let count = entry.get_mut();
            *count = if *count == 0 { 2 } else { *count + 1 };
            format!("{}{}", base, count)
        }
        Entry::Vacant(entry) => {
            entry.insert(0);
            base
        }
    };
    identifier::translate_name(&full, underscore_identifiers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, ForeignKey, Index, Schema, Table};
    use crate::error::ScriptError;
    use std::collections::BTreeSet;

    fn column(name: &str, data_type: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: data_type.to_string(),
            max_length: 0,
            precision: 0,
            scale: 0,
            is_nullable: true,
            is_identity: false,
            default: None,
            ordinal_pos: 1,
        }
    }

    fn identity(name: &str) -> Column {
        Column {
            is_identity: true,
            is_nullable: false,
            ..column(name, "int")
        }
    }

    fn options() -> ScriptOptions {
        ScriptOptions {
            destination_database: "forum".into(),
            exclude_schemas: BTreeSet::new(),
            underscore_identifiers: true,
            row_limit: None,
        }
    }

    fn forum_catalog() -> Catalog {
        Catalog {
            database: "Forum".into(),
            schemas: vec![
                Schema {
                    name: "dbo".into(),
                    tables: vec![Table {
                        schema: "dbo".into(),
                        name: "Posts".into(),
                        columns: vec![identity("Id"), column("OwnerUserId", "int")],
                        primary_key: vec!["Id".into()],
                        indexes: vec![],
                        foreign_keys: vec![ForeignKey {
                            name: "FK_Posts_Users".into(),
                            columns: vec!["OwnerUserId".into()],
                            ref_schema: "dbo".into(),
                            ref_table: "Users".into(),
                            ref_columns: vec!["Id".into()],
                        }],
                    }],
                },
                Schema {
                    name: "audit".into(),
                    tables: vec![Table {
                        schema: "audit".into(),
                        name: "ChangeLog".into(),
                        columns: vec![column("Entry", "nvarchar")],
                        primary_key: vec![],
                        indexes: vec![],
                        foreign_keys: vec![],
                    }],
                },
            ],
        }
    }

    fn with_users(mut catalog: Catalog) -> Catalog {
        catalog.schemas[0].tables.push(Table {
            schema: "dbo".into(),
            name: "Users".into(),
            columns: vec![identity("Id")],
            primary_key: vec!["Id".into()],
            indexes: vec![],
            foreign_keys: vec![],
        });
        catalog
    }

    #[test]
    fn dbo_needs_no_create_schema() {
        let plan = ScriptPlan::build(&with_users(forum_catalog()), &options()).unwrap();
        assert_eq!(plan.schemas, vec!["audit".to_string()]);
    }

    #[test]
    fn identity_column_gets_sequence_and_default() {
        let plan = ScriptPlan::build(&with_users(forum_catalog()), &options()).unwrap();
        let posts = &plan.tables[0];
        assert_eq!(posts.output_name, "posts");
        let seq = posts.sequence.as_ref().unwrap();
        assert_eq!(seq.name, "posts_seq");
        assert_eq!(seq.column_index, 0);
        assert_eq!(
            posts.columns[0].default.as_deref(),
            Some("nextval('posts_seq')")
        );
    }

    #[test]
    fn fk_to_missing_table_is_dropped() {
        // Users is absent, so the Posts foreign key cannot resolve
        let plan = ScriptPlan::build(&forum_catalog(), &options()).unwrap();
        assert!(plan.tables[0].foreign_keys.is_empty());
    }

    #[test]
    fn fk_resolves_to_output_names() {
        let plan = ScriptPlan::build(&with_users(forum_catalog()), &options()).unwrap();
        let fk = &plan.tables[0].foreign_keys[0];
        assert_eq!(fk.columns, vec!["owner_user_id".to_string()]);
        assert_eq!(fk.ref_table, "users");
        assert_eq!(fk.ref_columns, vec!["id".to_string()]);
    }

    #[test]
    fn index_names_are_unique_across_the_plan() {
        let ix = |name: &str| Index {
            name: name.into(),
            columns: vec!["Id".into()],
            is_unique: false,
        };
        let mut catalog = with_users(forum_catalog());
        // IX_Covering appears on both tables, legal in MSSQL
        catalog.schemas[0].tables[0].indexes = vec![ix("IX_Covering"), ix("IX_Owner")];
        catalog.schemas[0].tables[1].indexes = vec![ix("IX_Covering")];

        let plan = ScriptPlan::build(&catalog, &options()).unwrap();
        let names: Vec<&str> = plan
            .tables
            .iter()
            .flat_map(|t| t.indexes.iter().map(|i| i.name.as_str()))
            .collect();
        assert_eq!(names, vec!["index_posts", "index_posts2", "index_users"]);
    }

    #[test]
    fn sequence_name_clashing_with_table_fails_the_plan() {
        let mut catalog = with_users(forum_catalog());
        catalog.schemas[0].tables.push(Table {
            schema: "dbo".into(),
            name: "PostsSeq".into(),
            columns: vec![column("Entry", "nvarchar")],
            primary_key: vec![],
            indexes: vec![],
            foreign_keys: vec![],
        });
        let err = ScriptPlan::build(&catalog, &options()).unwrap_err();
        assert!(matches!(err, ScriptError::NameCollision { .. }));
    }

    #[test]
    fn excluded_schema_is_skipped() {
        let mut opts = options();
        opts.exclude_schemas.insert("audit".into());
        let plan = ScriptPlan::build(&with_users(forum_catalog()), &opts).unwrap();
        assert!(plan.schemas.is_empty());
        assert_eq!(plan.tables.len(), 2);
    }
}
