//! Synchronous PostgreSQL connection for OS worker threads.

use sqlx::{Connection, PgConnection, Postgres};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, trace};

use super::sql::{self, quote_ident, quote_literal, IndexKind, QualifiedTable};
use crate::config::DatabaseConfig;
use crate::error::{PipelineError, Result};

const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// One exclusive connection. Statements run in autocommit mode, so each
/// `run_sql` call is its own transaction.
pub struct DatabaseConnection {
    runtime: Runtime,
    connection: PgConnection,
}

impl std::fmt::Debug for DatabaseConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConnection").finish_non_exhaustive()
    }
}

impl DatabaseConnection {
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PipelineError::database("start connection runtime", sqlx::Error::Io(e)))?;

        let options = config.connect_options();
        let timeout = config.connect_timeout();
        let connected = runtime.block_on(async {
            tokio::time::timeout(timeout, PgConnection::connect_with(&options)).await
        });

        let connection = match connected {
            Ok(result) => result.map_err(|e| PipelineError::database("connect", e))?,
            Err(_) => {
                let timed_out = io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no connection after {}s", timeout.as_secs()),
                );
                return Err(PipelineError::database("connect", sqlx::Error::Io(timed_out)));
            }
        };

        Ok(Self { runtime, connection })
    }

    /// Execute one or more statements, returning the affected row count.
    pub fn run_sql(&mut self, statement: &str) -> Result<u64> {
        trace!(sql = statement, "DATABASE: run_sql");
        let result = self
            .runtime
            .block_on(sqlx::raw_sql(statement).execute(&mut self.connection))
            .map_err(|e| PipelineError::database(summarize(statement), e))?;

        let rows = result.rows_affected();
        if rows > 1 {
            trace!(rows, "DATABASE: rows affected");
        }
        Ok(rows)
    }

    /// First column of every row, with `$n` parameters bound in order.
    pub fn fetch_strings(&mut self, statement: &str, params: &[&str]) -> Result<Vec<String>> {
        let mut query = sqlx::query_scalar::<Postgres, String>(statement);
        for param in params {
            query = query.bind(param.to_string());
        }
        self.runtime
            .block_on(query.fetch_all(&mut self.connection))
            .map_err(|e| PipelineError::database(summarize(statement), e))
    }

    /// First column of the first row, `None` for no rows or NULL.
    pub fn fetch_scalar_i64(&mut self, statement: &str, params: &[&str]) -> Result<Option<i64>> {
        let mut query = sqlx::query_scalar::<Postgres, Option<i64>>(statement);
        for param in params {
            query = query.bind(param.to_string());
        }
        let row = self
            .runtime
            .block_on(query.fetch_optional(&mut self.connection))
            .map_err(|e| PipelineError::database(summarize(statement), e))?;
        Ok(row.flatten())
    }

    pub fn create_schema(&mut self, schema: &str, comment: Option<&str>) -> Result<()> {
        self.run_sql(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)))?;
        if let Some(comment) = comment {
            self.run_sql(&format!(
                "COMMENT ON SCHEMA {} IS {}",
                quote_ident(schema),
                quote_literal(comment)
            ))?;
        }
        Ok(())
    }

    pub fn table_exists(&mut self, table: &QualifiedTable) -> Result<bool> {
        let count = self.fetch_scalar_i64(sql::TABLE_EXISTS_SQL, &[&table.schema, &table.table])?;
        Ok(count.unwrap_or(0) > 0)
    }

    pub fn drop_table(&mut self, table: &QualifiedTable, cascade: bool) -> Result<()> {
        self.run_sql(&sql::drop_table_sql(table, cascade)).map(|_| ())
    }

    /// Drop every base table in the schema, then the schema itself.
    pub fn drop_schema(&mut self, schema: &str) -> Result<()> {
        let tables = self.fetch_strings(sql::BASE_TABLES_SQL, &[schema])?;
        debug!(schema, tables = tables.len(), "DATABASE: dropping schema");
        for table in tables {
            self.drop_table(&QualifiedTable::new(schema, table), true)?;
        }
        self.run_sql(&format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(schema)))
            .map(|_| ())
    }

    /// Row count, or `None` when the table does not exist.
    pub fn row_count(&mut self, table: &QualifiedTable) -> Result<Option<i64>> {
        if !self.table_exists(table)? {
            return Ok(None);
        }
        self.fetch_scalar_i64(&format!("SELECT count(*) FROM {table}"), &[])
    }

    pub fn columns(&mut self, table: &QualifiedTable) -> Result<Vec<String>> {
        self.fetch_strings(sql::COLUMNS_SQL, &[&table.schema, &table.table])
    }

    /// `column_type` is a type expression such as `integer` or `geometry(Polygon, 4326)`.
    pub fn add_column_if_absent(&mut self, table: &QualifiedTable, column: &str, column_type: &str) -> Result<()> {
        self.run_sql(&format!(
            "ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {} {column_type}",
            quote_ident(column)
        ))
        .map(|_| ())
    }

    pub fn index_names(&mut self, table: &QualifiedTable, column: &str) -> Result<Vec<String>> {
        self.fetch_strings(sql::INDEX_LOOKUP_SQL, &[&table.schema, &table.table, column])
    }

    /// Stream a CSV file into `table` through `COPY ... FROM STDIN`.
    pub fn copy_csv(&mut self, table: &QualifiedTable, columns: &[&str], path: &Path, header: bool) -> Result<u64> {
        let column_list = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        let statement =
            format!("COPY {table} ({column_list}) FROM STDIN WITH (FORMAT csv, DELIMITER ',', HEADER {header})");

        let mut file = File::open(path).map_err(|e| PipelineError::io("open csv", path, e))?;

        let Self { runtime, connection } = self;
        let copied = runtime.block_on(async {
            let mut copy = connection.copy_in_raw(&statement).await?;
            let mut buffer = vec![0u8; COPY_CHUNK_BYTES];
            loop {
                let read = file.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                copy.send(&buffer[..read]).await?;
            }
            copy.finish().await
        });

        let rows = copied.map_err(|e| PipelineError::database(format!("copy {}", path.display()), e))?;
        info!(table = %table, rows, source = %path.display(), "📥 DATABASE: Copied CSV");
        Ok(rows)
    }

    /// Load a zonal statistics summary (`feature_id, square_count, square_sum`,
    /// no header) into a freshly created table.
    pub fn import_zonal_stats_csv(&mut self, table: &QualifiedTable, path: &Path, comment: Option<&str>) -> Result<u64> {
        let comment = format!("raw data from the csv file. {}", comment.unwrap_or_default());
        self.drop_table(table, false)?;
        self.run_sql(&format!(
            "CREATE TABLE {table} (
                feature_id INT PRIMARY KEY,
                square_count INT,
                square_sum DOUBLE PRECISION
            );
            COMMENT ON TABLE {table} IS {};
            COMMENT ON COLUMN {table}.feature_id IS 'matches id column from feature class';
            COMMENT ON COLUMN {table}.square_count IS 'How many raster squares were counted (even if they had no data)';
            COMMENT ON COLUMN {table}.square_sum IS 'Sum of intersecting raster squares';",
            quote_literal(&comment)
        ))?;
        self.copy_csv(table, &["feature_id", "square_count", "square_sum"], path, false)
    }

    /// Create the index unless any index already covers `column`.
    pub fn create_index(&mut self, table: &QualifiedTable, column: &str, kind: IndexKind) -> Result<bool> {
        super::store::SpatialStore::create_index(self, table, column, kind)
    }

    pub fn close(self) -> Result<()> {
        let Self { runtime, connection } = self;
        runtime
            .block_on(connection.close())
            .map_err(|e| PipelineError::database("close", e))
    }
}

/// Short operation label for errors: the first line of the statement.
fn summarize(statement: &str) -> String {
    let line = statement.trim().lines().next().unwrap_or_default();
    match line.char_indices().nth(80) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize_keeps_first_line() {
        assert_eq!(summarize("\n  SELECT 1\nFROM t"), "SELECT 1");
        let long = "x".repeat(200);
        assert_eq!(summarize(&long).len(), 83);
    }

    /// Needs a reachable PostgreSQL configured through `PIPELINE__DATABASE__*`.
    #[test]
    #[ignore]
    fn test_schema_round_trip_against_live_database() {
        let config = crate::config::ConfigLoader::new().load().unwrap();
        let mut conn = DatabaseConnection::connect(&config.database).unwrap();
        conn.create_schema("pipeline_core_test", Some("scratch")).unwrap();
        let table = QualifiedTable::new("pipeline_core_test", "t");
        conn.run_sql(&format!("CREATE TABLE {table} (id int)")).unwrap();
        assert_eq!(conn.row_count(&table).unwrap(), Some(0));
        conn.add_column_if_absent(&table, "level", "integer").unwrap();
        conn.add_column_if_absent(&table, "level", "integer").unwrap();
        assert_eq!(conn.columns(&table).unwrap(), vec!["id", "level"]);
        assert!(conn.create_index(&table, "id", IndexKind::BTree).unwrap());
        assert!(!conn.create_index(&table, "id", IndexKind::BTree).unwrap());
        conn.drop_schema("pipeline_core_test").unwrap();
        assert_eq!(conn.row_count(&table).unwrap(), None);
        conn.close().unwrap();
    }
}
