//! SQL text builders. Identifiers are always quoted and literal values are
//! rendered through [`SqlValue`], so table and column names coming from file
//! names can't change the statement's shape.

use std::fmt;

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a PostgreSQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedTable {
    pub schema: String,
    pub table: String,
}

impl QualifiedTable {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for QualifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Text(v) => f.write_str(&quote_literal(v)),
            SqlValue::Null => f.write_str("NULL"),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int(value.into())
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

/// `column = value` in an UPDATE's SET list.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnAssignment {
    pub column: String,
    pub value: SqlValue,
}

impl ColumnAssignment {
    pub fn new(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ColumnAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", quote_ident(&self.column), self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// General purpose b-tree.
    BTree,
    /// GiST, for geometry columns.
    Spatial,
}

impl IndexKind {
    fn method(self) -> &'static str {
        match self {
            IndexKind::BTree => "BTREE",
            IndexKind::Spatial => "GIST",
        }
    }
}

pub fn index_name(table: &QualifiedTable, column: &str) -> String {
    format!("idx_{}_{}", table.table, column).to_lowercase()
}

pub fn create_index_sql(table: &QualifiedTable, column: &str, kind: IndexKind) -> String {
    format!(
        "CREATE INDEX {} ON {} USING {} ({})",
        quote_ident(&index_name(table, column)),
        table,
        kind.method(),
        quote_ident(column)
    )
}

/// Indexes on one column of a table, looked up in the catalog.
pub const INDEX_LOOKUP_SQL: &str = r#"
SELECT i.relname::text AS index_name
FROM pg_index ix
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_class t ON t.oid = ix.indrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
WHERE lower(n.nspname) = lower($1)
  AND lower(t.relname) = lower($2)
  AND lower(a.attname) = lower($3)
"#;

pub const TABLE_EXISTS_SQL: &str =
    "SELECT count(*) FROM information_schema.tables WHERE table_schema::text = $1 AND table_name::text = $2";

pub const COLUMNS_SQL: &str = "SELECT column_name::text FROM information_schema.columns \
     WHERE table_schema::text = $1 AND table_name::text = $2 ORDER BY ordinal_position";

pub const BASE_TABLES_SQL: &str = "SELECT table_name::text FROM information_schema.tables \
     WHERE table_schema::text = $1 AND table_type = 'BASE TABLE'";

pub fn update_all_sql(table: &QualifiedTable, assignments: &[ColumnAssignment]) -> String {
    let set_list = assignments
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("UPDATE {table} SET {set_list}")
}

pub fn drop_table_sql(table: &QualifiedTable, cascade: bool) -> String {
    let mut sql = format!("DROP TABLE IF EXISTS {table}");
    if cascade {
        sql.push_str(" CASCADE");
    }
    sql
}
