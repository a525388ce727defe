//! The storage seam used by bulk loading.

use tracing::debug;

use super::connection::DatabaseConnection;
use super::sql::{self, ColumnAssignment, IndexKind, QualifiedTable};
use crate::error::Result;

/// Minimal statement surface the partition loader needs. Implemented by
/// [`DatabaseConnection`]; tests substitute in-memory stores.
pub trait SpatialStore {
    /// Run a statement in its own transaction and return the affected rows.
    fn execute(&mut self, statement: &str) -> Result<u64>;

    fn table_exists(&mut self, table: &QualifiedTable) -> Result<bool>;

    /// Names of indexes covering `column` of `table`.
    fn index_names(&mut self, table: &QualifiedTable, column: &str) -> Result<Vec<String>>;

    fn has_index_on(&mut self, table: &QualifiedTable, column: &str) -> Result<bool> {
        Ok(!self.index_names(table, column)?.is_empty())
    }

    /// Create an index unless one already covers the column. Returns whether
    /// an index was created.
    fn create_index(&mut self, table: &QualifiedTable, column: &str, kind: IndexKind) -> Result<bool> {
        let existing = self.index_names(table, column)?;
        if !existing.is_empty() {
            debug!(table = %table, column, existing = ?existing, "DATABASE: index already present");
            return Ok(false);
        }
        self.execute(&sql::create_index_sql(table, column, kind))?;
        Ok(true)
    }

    /// Set constant column values on every row of `table`.
    fn update_all(&mut self, table: &QualifiedTable, assignments: &[ColumnAssignment]) -> Result<u64> {
        if assignments.is_empty() {
            return Ok(0);
        }
        self.execute(&sql::update_all_sql(table, assignments))
    }
}

impl SpatialStore for DatabaseConnection {
    fn execute(&mut self, statement: &str) -> Result<u64> {
        self.run_sql(statement)
    }

    fn table_exists(&mut self, table: &QualifiedTable) -> Result<bool> {
        DatabaseConnection::table_exists(self, table)
    }

    fn index_names(&mut self, table: &QualifiedTable, column: &str) -> Result<Vec<String>> {
        DatabaseConnection::index_names(self, table, column)
    }
}
