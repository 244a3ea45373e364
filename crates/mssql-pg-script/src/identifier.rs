//! Identifier translation for PostgreSQL output.
//!
//! Source names pass through two independent steps: an optional
//! CamelCase to snake_case rewrite, and quoting/truncation so the result is
//! always a legal PostgreSQL identifier. Rewritten names can collide
//! ("UserID" and "user_id" both become "user_id"); collisions are detected
//! up front and abort the run rather than producing a script that silently
//! merges columns.

use std::collections::HashMap;

use crate::catalog::Catalog;
use crate::error::{Result, ScriptError};
use crate::typemap;

/// PostgreSQL truncates identifiers beyond this many bytes.
const MAX_IDENT_LEN: usize = 63;

/// Words that must be quoted even though they contain no special characters.
const RESERVED_WORDS: &[&str] = &["left", "constraint", "order", "group"];

/// Characters that force an identifier into double quotes.
const SPECIAL_CHARS: &[char] = &[
    ' ', '.', '-', '&', '/', '(', ')', '\\', '?', '\'', '"',
];

/// What kind of object an identifier names. Collision scopes differ per
/// kind: schemas are global, tables are per schema, columns per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Schema,
    Table,
    Column,
    Sequence,
}

impl NameKind {
    fn label(self) -> &'static str {
        match self {
            NameKind::Schema => "schema",
            NameKind::Table => "table",
            NameKind::Column => "column",
            NameKind::Sequence => "sequence of table",
        }
    }
}

/// Rewrite a CamelCase name to snake_case.
///
/// An underscore is inserted before a capital that begins a lowercase run
/// ("HTTPServer" keeps the acronym together) and between a lowercase letter
/// or digit and a capital. Repeated underscores collapse, so the transform
/// is idempotent.
pub fn underscore(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_ascii_uppercase() {
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            let prev = chars[i - 1];
            let prev_is_lower_or_digit = prev.is_ascii_lowercase() || prev.is_ascii_digit();
            if next_is_lower || prev_is_lower_or_digit {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }

    while out.contains("__") {
        out = out.replace("__", "_");
    }

    out
}

/// Check whether a name needs double quotes in PostgreSQL.
fn needs_quoting(name: &str) -> bool {
    name.contains(SPECIAL_CHARS)
        || name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit() || c == '$')
        || RESERVED_WORDS.contains(&name.to_lowercase().as_str())
}

/// Translate a single identifier into its output form.
///
/// Names that need quoting are wrapped in double quotes as-is (the
/// snake_case rewrite never applies inside quotes, where the original
/// spelling is already exact). Everything is truncated to PostgreSQL's
/// identifier limit.
pub fn translate_name(name: &str, underscore_identifiers: bool) -> String {
    if needs_quoting(name) {
        // The byte cap applies to the escaped payload, so a doubled quote
        // is never split and the quoted result stays within the limit.
        let mut payload = String::new();
        for c in name.chars() {
            let width = if c == '"' { 2 } else { c.len_utf8() };
            if payload.len() + width > MAX_IDENT_LEN - 2 {
                break;
            }
            if c == '"' {
                payload.push_str("\"\"");
            } else {
                payload.push(c);
            }
        }
        format!("\"{}\"", payload)
    } else {
        let mut renamed = if underscore_identifiers {
            underscore(name)
        } else {
            name.to_string()
        };
        if renamed.len() > MAX_IDENT_LEN {
            let mut end = MAX_IDENT_LEN;
            while !renamed.is_char_boundary(end) {
                end -= 1;
            }
            renamed.truncate(end);
        }
        renamed
    }
}

/// Output name for a table, qualified by schema unless it lives in dbo
/// (dbo objects land in public, which needs no prefix).
pub fn qualified_table_name(schema: &str, table: &str, underscore_identifiers: bool) -> String {
    if schema == "dbo" {
        translate_name(table, underscore_identifiers)
    } else {
        format!(
            "{}.{}",
            translate_name(schema, underscore_identifiers),
            translate_name(table, underscore_identifiers)
        )
    }
}

/// Precomputed source-to-output name lookup for a whole catalog.
///
/// Built once before any script output. Construction fails on the first
/// collision, so by the time anything is emitted every rename is known to
/// be unambiguous.
#[derive(Debug)]
pub struct RenameMap {
    underscore_identifiers: bool,
    /// (schema, table) -> qualified output table name.
    tables: HashMap<(String, String), String>,
    /// (schema, table, column) -> output column name.
    columns: HashMap<(String, String, String), String>,
}

impl RenameMap {
    /// Walk the catalog and translate every schema, table and column name,
    /// checking each scope for collisions.
    pub fn build(catalog: &Catalog, underscore_identifiers: bool) -> Result<Self> {
        let mut map = RenameMap {
            underscore_identifiers,
            tables: HashMap::new(),
            columns: HashMap::new(),
        };

        let mut seen_schemas: HashMap<String, String> = HashMap::new();
        for schema in &catalog.schemas {
            let renamed = translate_name(&schema.name, underscore_identifiers);
            check_collision(
                &mut seen_schemas,
                NameKind::Schema,
                &schema.name,
                renamed,
            )?;

            let mut seen_tables: HashMap<String, String> = HashMap::new();
            for table in &schema.tables {
                let renamed = translate_name(&table.name, underscore_identifiers);
                check_collision(&mut seen_tables, NameKind::Table, &table.name, renamed.clone())?;

                // Sequences live in the same relation namespace as tables,
                // so derived sequence names join the table scope.
                let has_sequence = table
                    .identity_column()
                    .is_some_and(|c| typemap::is_integer_family(&c.data_type));
                if has_sequence {
                    check_collision(
                        &mut seen_tables,
                        NameKind::Sequence,
                        &table.name,
                        seq_suffix(&renamed),
                    )?;
                }

                let qualified =
                    qualified_table_name(&schema.name, &table.name, underscore_identifiers);
                map.tables
                    .insert((schema.name.clone(), table.name.clone()), qualified);

                let mut seen_columns: HashMap<String, String> = HashMap::new();
                for column in &table.columns {
                    let renamed = translate_name(&column.name, underscore_identifiers);
                    check_collision(
                        &mut seen_columns,
                        NameKind::Column,
                        &column.name,
                        renamed.clone(),
                    )?;
                    map.columns.insert(
                        (schema.name.clone(), table.name.clone(), column.name.clone()),
                        renamed,
                    );
                }
            }
        }

        Ok(map)
    }

    /// Output schema name.
    pub fn schema(&self, schema: &str) -> String {
        translate_name(schema, self.underscore_identifiers)
    }

    /// Qualified output table name. Falls back to direct translation for
    /// tables referenced but not captured (a foreign key into an excluded
    /// schema, say).
    pub fn table(&self, schema: &str, table: &str) -> String {
        self.tables
            .get(&(schema.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_else(|| {
                qualified_table_name(schema, table, self.underscore_identifiers)
            })
    }

    /// Output column name.
    pub fn column(&self, schema: &str, table: &str, column: &str) -> String {
        self.columns
            .get(&(schema.to_string(), table.to_string(), column.to_string()))
            .cloned()
            .unwrap_or_else(|| translate_name(column, self.underscore_identifiers))
    }

    /// Sequence name for an identity column: the table's output name with a
    /// `_seq` suffix.
    pub fn sequence(&self, schema: &str, table: &str) -> String {
        seq_suffix(&self.table(schema, table))
    }
}

/// Append `_seq`. Quoted names keep the suffix inside the quotes.
fn seq_suffix(name: &str) -> String {
    match name.strip_suffix('"') {
        Some(body) => format!("{}_seq\"", body),
        None => format!("{}_seq", name),
    }
}

fn check_collision(
    seen: &mut HashMap<String, String>,
    kind: NameKind,
    original: &str,
    renamed: String,
) -> Result<()> {
    if let Some(first) = seen.get(&renamed) {
        return Err(ScriptError::NameCollision {
            kind: kind.label().to_string(),
            first: first.clone(),
            second: original.to_string(),
            renamed,
        });
    }
    seen.insert(renamed, original.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, Schema, Table};

    fn column(name: &str) -> Column {
        Column {
            name: name.to_string(),
            data_type: "int".to_string(),
            max_length: 0,
            precision: 0,
            scale: 0,
            is_nullable: true,
            is_identity: false,
            default: None,
            ordinal_pos: 1,
        }
    }

    fn catalog_with_columns(names: &[&str]) -> Catalog {
        Catalog {
            database: "Forum".into(),
            schemas: vec![Schema {
                name: "dbo".into(),
                tables: vec![Table {
                    schema: "dbo".into(),
                    name: "Posts".into(),
                    columns: names.iter().map(|n| column(n)).collect(),
                    primary_key: vec![],
                    indexes: vec![],
                    foreign_keys: vec![],
                }],
            }],
        }
    }

    #[test]
    fn underscore_basic() {
        assert_eq!(underscore("CreationDate"), "creation_date");
        assert_eq!(underscore("OwnerUserId"), "owner_user_id");
        assert_eq!(underscore("Id"), "id");
    }

    #[test]
    fn underscore_acronyms_stay_together() {
        assert_eq!(underscore("HTTPServer"), "http_server");
        assert_eq!(underscore("UserID"), "user_id");
        assert_eq!(underscore("ParseHTML"), "parse_html");
    }

    #[test]
    fn underscore_digit_boundaries() {
        assert_eq!(underscore("Data2Json"), "data2_json");
        assert_eq!(underscore("Address1"), "address1");
    }

    #[test]
    fn underscore_is_idempotent() {
        for name in ["CreationDate", "HTTPServer", "UserID", "already_snake"] {
            let once = underscore(name);
            assert_eq!(underscore(&once), once);
        }
    }

    #[test]
    fn underscore_collapses_runs() {
        assert_eq!(underscore("Already_Snake"), "already_snake");
    }

    #[test]
    fn reserved_words_get_quoted() {
        assert_eq!(translate_name("Order", false), "\"Order\"");
        assert_eq!(translate_name("left", false), "\"left\"");
        assert_eq!(translate_name("Orders", false), "Orders");
    }

    #[test]
    fn special_chars_get_quoted() {
        assert_eq!(translate_name("Unit Price", false), "\"Unit Price\"");
        assert_eq!(translate_name("P&L", false), "\"P&L\"");
        assert_eq!(translate_name("1stColumn", false), "\"1stColumn\"");
    }

    #[test]
    fn quoted_names_are_not_underscored() {
        assert_eq!(translate_name("Unit Price", true), "\"Unit Price\"");
    }

    #[test]
    fn long_names_truncate() {
        let long = "C".repeat(80);
        assert_eq!(translate_name(&long, false).chars().count(), 63);
        let quoted = format!("Long Name {}", "x".repeat(80));
        // 61 bytes of payload plus two quotes
        assert_eq!(translate_name(&quoted, false).chars().count(), 63);
    }

    #[test]
    fn truncation_counts_bytes_not_chars() {
        let wide = "Ä".repeat(80);
        let out = translate_name(&wide, false);
        assert!(out.len() <= 63);
        assert_eq!(out.chars().count(), 31);

        // Escaped quotes double in width, so the payload shrinks to fit
        let quoted = format!("He said \"{}\"", "x".repeat(80));
        let out = translate_name(&quoted, false);
        assert!(out.len() <= 63);
        assert_eq!(out.matches('"').count() % 2, 0);
    }

    #[test]
    fn dbo_tables_are_unqualified() {
        assert_eq!(qualified_table_name("dbo", "Posts", true), "posts");
        assert_eq!(
            qualified_table_name("Sales", "OrderItems", true),
            "sales.order_items"
        );
    }

    #[test]
    fn rename_map_resolves_names() {
        let catalog = catalog_with_columns(&["Id", "OwnerUserId"]);
        let map = RenameMap::build(&catalog, true).unwrap();
        assert_eq!(map.table("dbo", "Posts"), "posts");
        assert_eq!(map.column("dbo", "Posts", "OwnerUserId"), "owner_user_id");
        assert_eq!(map.sequence("dbo", "Posts"), "posts_seq");
    }

    #[test]
    fn sequence_name_stays_inside_quotes() {
        let catalog = Catalog {
            database: "Forum".into(),
            schemas: vec![Schema {
                name: "dbo".into(),
                tables: vec![Table {
                    schema: "dbo".into(),
                    name: "Order".into(),
                    columns: vec![],
                    primary_key: vec![],
                    indexes: vec![],
                    foreign_keys: vec![],
                }],
            }],
        };
        let map = RenameMap::build(&catalog, false).unwrap();
        assert_eq!(map.sequence("dbo", "Order"), "\"Order_seq\"");
    }

    #[test]
    fn sequence_name_collision_with_table_is_fatal() {
        let mut id = column("Id");
        id.is_identity = true;
        let table = |name: &str, columns: Vec<Column>| Table {
            schema: "dbo".into(),
            name: name.into(),
            columns,
            primary_key: vec![],
            indexes: vec![],
            foreign_keys: vec![],
        };
        // Posts owns sequence posts_seq; PostsSeq renames to the same
        let catalog = Catalog {
            database: "Forum".into(),
            schemas: vec![Schema {
                name: "dbo".into(),
                tables: vec![
                    table("Posts", vec![id.clone()]),
                    table("PostsSeq", vec![column("Id")]),
                ],
            }],
        };
        let err = RenameMap::build(&catalog, true).unwrap_err();
        match err {
            ScriptError::NameCollision { renamed, .. } => assert_eq!(renamed, "posts_seq"),
            other => panic!("expected NameCollision, got {other:?}"),
        }

        // Same collision with the table first and the sequence second
        let catalog = Catalog {
            database: "Forum".into(),
            schemas: vec![Schema {
                name: "dbo".into(),
                tables: vec![
                    table("PostsSeq", vec![column("Id")]),
                    table("Posts", vec![id]),
                ],
            }],
        };
        assert!(RenameMap::build(&catalog, true).is_err());
    }

    #[test]
    fn column_collision_is_fatal() {
        let catalog = catalog_with_columns(&["UserID", "user_id"]);
        let err = RenameMap::build(&catalog, true).unwrap_err();
        match err {
            ScriptError::NameCollision { renamed, .. } => assert_eq!(renamed, "user_id"),
            other => panic!("expected NameCollision, got {other:?}"),
        }
    }

    #[test]
    fn no_collision_without_underscore_option() {
        let catalog = catalog_with_columns(&["UserID", "user_id"]);
        assert!(RenameMap::build(&catalog, false).is_ok());
    }
}
