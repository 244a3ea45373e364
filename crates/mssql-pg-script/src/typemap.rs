//! Type mapping between MSSQL and PostgreSQL.

use tracing::warn;

use crate::catalog::Column;
use crate::error::{Result, ScriptError};

/// Output type for a column, plus whether an identity column of this type
/// gets a backing sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    /// PostgreSQL type name as written into the script.
    pub target_type: String,

    /// True when the column is an identity over an integer family type.
    pub needs_sequence: bool,
}

/// Map a column's declared type to PostgreSQL.
///
/// Unknown types are fatal: a silent fallback would load data into a column
/// that cannot hold it, so the closed list below is the whole contract.
/// `table` is only used for the error message.
pub fn map_column(table: &str, column: &Column) -> Result<ColumnType> {
    let target_type = map_base_type(
        &column.data_type,
        column.max_length,
        column.precision,
        column.scale,
    )
    .ok_or_else(|| {
        ScriptError::unsupported_type(table, &column.name, &column.data_type)
    })?;

    let integer_family = is_integer_family(&column.data_type);
    let needs_sequence = column.is_identity && integer_family;
    if column.is_identity && !integer_family {
        warn!(
            "identity column {}.{} has non-integer type {}, no sequence will be created",
            table, column.name, column.data_type
        );
    }

    Ok(ColumnType {
        target_type,
        needs_sequence,
    })
}

/// Integer family types. An identity column over one of these gets a
/// backing sequence; anything else cannot.
pub fn is_integer_family(data_type: &str) -> bool {
    matches!(
        data_type.to_lowercase().as_str(),
        "tinyint" | "smallint" | "int" | "bigint"
    )
}

/// Map an MSSQL data type name to PostgreSQL. Returns None for types with
/// no mapping.
fn map_base_type(mssql_type: &str, max_length: i32, precision: i32, scale: i32) -> Option<String> {
    let mapped = match mssql_type.to_lowercase().as_str() {
        // Boolean
        "bit" => "boolean".to_string(),

        // Integer types
        "tinyint" => "smallint".to_string(),
        "smallint" => "smallint".to_string(),
        "int" => "integer".to_string(),
        "bigint" => "bigint".to_string(),

        // Decimal/numeric
        "decimal" | "numeric" => {
            if precision > 0 {
                format!("numeric({},{})", precision, scale)
            } else {
                "numeric".to_string()
            }
        }
        "money" => "numeric(19,4)".to_string(),
        "smallmoney" => "numeric(10,4)".to_string(),

        // Floating point
        "float" => "double precision".to_string(),
        "real" => "real".to_string(),

        // String types
        "char" | "nchar" => {
            if max_length > 0 && max_length <= 10485760 {
                format!("char({})", max_length)
            } else {
                "text".to_string()
            }
        }
        "varchar" | "nvarchar" => {
            if max_length == -1 {
                "text".to_string()
            } else if max_length > 0 && max_length <= 10485760 {
                format!("varchar({})", max_length)
            } else {
                "text".to_string()
            }
        }
        "text" | "ntext" => "text".to_string(),

        // Binary types
        "binary" | "varbinary" | "image" => "bytea".to_string(),

        // Date/time types
        "date" => "date".to_string(),
        "time" => "time".to_string(),
        "datetime" | "datetime2" | "smalldatetime" => "timestamp".to_string(),
        "datetimeoffset" => "timestamptz".to_string(),

        // GUID
        "uniqueidentifier" => "uuid".to_string(),

        // XML
        "xml" => "xml".to_string(),

        // System name type, an nvarchar(128) underneath
        "sysname" => "varchar(128)".to_string(),

        // Row versions are opaque 8-byte values
        "timestamp" | "rowversion" => "bytea".to_string(),

        // Spatial types carry over as their text representation
        "geometry" | "geography" => "text".to_string(),

        _ => return None,
    };
    Some(mapped)
}

/// Translate an MSSQL column DEFAULT expression into PostgreSQL.
///
/// Returns None when the default carries no information (empty, bare NULL).
/// MSSQL wraps defaults in one or more layers of parentheses; those are
/// stripped before the expression is rewritten per target type.
pub fn translate_default(target_type: &str, default: &str) -> Option<String> {
    let mut expr = default.to_lowercase().trim().to_string();
    if expr.is_empty() {
        return None;
    }

    while expr.starts_with('(') && expr.ends_with(')') {
        expr = expr[1..expr.len() - 1].trim().to_string();
    }

    if expr == "null" {
        return None;
    }

    if target_type == "boolean" {
        if expr == "1" {
            return Some("true".to_string());
        }
        if expr == "0" {
            return Some("false".to_string());
        }
    }

    if matches!(target_type, "timestamp" | "timestamptz" | "date" | "time") {
        if expr == "getdate()" || expr == "sysdatetime()" {
            return Some("now()".to_string());
        }
    }

    if target_type == "uuid" && expr == "newid()" {
        return Some("uuid_generate_v4()".to_string());
    }

    // Unicode string literals lose their N prefix
    if (target_type.starts_with("varchar")
        || target_type.starts_with("char")
        || target_type == "text")
        && expr.starts_with("n'")
    {
        return Some(expr[1..].to_string());
    }

    Some(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(data_type: &str, max_length: i32, precision: i32, scale: i32) -> Column {
        Column {
            name: "Value".to_string(),
            data_type: data_type.to_string(),
            max_length,
            precision,
            scale,
            is_nullable: true,
            is_identity: false,
            default: None,
            ordinal_pos: 1,
        }
    }

    fn mapped(data_type: &str, max_length: i32, precision: i32, scale: i32) -> String {
        map_column("dbo.T", &column(data_type, max_length, precision, scale))
            .unwrap()
            .target_type
    }

    #[test]
    fn integer_types() {
        assert_eq!(mapped("int", 0, 0, 0), "integer");
        assert_eq!(mapped("bigint", 0, 0, 0), "bigint");
        assert_eq!(mapped("smallint", 0, 0, 0), "smallint");
        assert_eq!(mapped("tinyint", 0, 0, 0), "smallint");
    }

    #[test]
    fn string_types() {
        assert_eq!(mapped("varchar", 100, 0, 0), "varchar(100)");
        assert_eq!(mapped("varchar", -1, 0, 0), "text");
        assert_eq!(mapped("nvarchar", 255, 0, 0), "varchar(255)");
        assert_eq!(mapped("ntext", 0, 0, 0), "text");
    }

    #[test]
    fn decimal_types() {
        assert_eq!(mapped("decimal", 0, 18, 2), "numeric(18,2)");
        assert_eq!(mapped("money", 0, 0, 0), "numeric(19,4)");
    }

    #[test]
    fn datetime_types() {
        assert_eq!(mapped("datetime", 0, 0, 0), "timestamp");
        assert_eq!(mapped("datetime2", 0, 0, 0), "timestamp");
        assert_eq!(mapped("datetimeoffset", 0, 0, 0), "timestamptz");
        assert_eq!(mapped("date", 0, 0, 0), "date");
    }

    #[test]
    fn special_types() {
        assert_eq!(mapped("uniqueidentifier", 0, 0, 0), "uuid");
        assert_eq!(mapped("bit", 0, 0, 0), "boolean");
        assert_eq!(mapped("varbinary", 0, 0, 0), "bytea");
    }

    #[test]
    fn oddball_types_have_homes() {
        assert_eq!(mapped("sysname", 0, 0, 0), "varchar(128)");
        assert_eq!(mapped("timestamp", 0, 0, 0), "bytea");
        assert_eq!(mapped("geography", 0, 0, 0), "text");
    }

    #[test]
    fn unknown_type_is_fatal() {
        let err = map_column("dbo.Shapes", &column("hierarchyid", 0, 0, 0)).unwrap_err();
        match err {
            ScriptError::UnsupportedType {
                table,
                column,
                data_type,
            } => {
                assert_eq!(table, "dbo.Shapes");
                assert_eq!(column, "Value");
                assert_eq!(data_type, "hierarchyid");
            }
            other => panic!("expected UnsupportedType, got {other:?}"),
        }
    }

    #[test]
    fn identity_int_needs_sequence() {
        let mut col = column("int", 0, 0, 0);
        col.is_identity = true;
        assert!(map_column("dbo.T", &col).unwrap().needs_sequence);
    }

    #[test]
    fn identity_decimal_gets_no_sequence() {
        let mut col = column("decimal", 0, 18, 0);
        col.is_identity = true;
        assert!(!map_column("dbo.T", &col).unwrap().needs_sequence);
    }

    #[test]
    fn default_paren_stripping() {
        assert_eq!(
            translate_default("integer", "((0))"),
            Some("0".to_string())
        );
        assert_eq!(translate_default("integer", "(NULL)"), None);
        assert_eq!(translate_default("integer", "  "), None);
    }

    #[test]
    fn default_functions() {
        assert_eq!(
            translate_default("timestamp", "(getdate())"),
            Some("now()".to_string())
        );
        assert_eq!(
            translate_default("uuid", "(newid())"),
            Some("uuid_generate_v4()".to_string())
        );
    }

    #[test]
    fn default_boolean_literals() {
        assert_eq!(translate_default("boolean", "((1))"), Some("true".to_string()));
        assert_eq!(translate_default("boolean", "((0))"), Some("false".to_string()));
    }

    #[test]
    fn default_unicode_prefix_dropped() {
        assert_eq!(
            translate_default("varchar(50)", "(N'pending')"),
            Some("'pending'".to_string())
        );
    }
}
