//! In-memory stand-ins for the database and the bulk-copy tool.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use geo_pipeline::database::{ConnectionFactory, QualifiedTable, SpatialStore};
use geo_pipeline::error::{PipelineError, Result};
use geo_pipeline::partition::BulkCopier;

#[derive(Debug, Default, Clone)]
pub struct FakeTable {
    /// Value of the chunk-key CHECK constraint, if any.
    pub check: Option<i64>,
    /// Chunk key of every row, `None` until stamped.
    pub rows: Vec<Option<i64>>,
    pub indexes: Vec<String>,
}

/// A shared "database" that understands just enough of the statements the
/// loader emits.
#[derive(Debug, Default)]
pub struct FakeDatabase {
    pub tables: HashMap<String, FakeTable>,
    pub statements: Vec<String>,
}

pub type SharedDatabase = Arc<Mutex<FakeDatabase>>;

fn between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let to = text[from..].find(end)? + from;
    Some(&text[from..to])
}

impl FakeDatabase {
    pub fn shared() -> SharedDatabase {
        Arc::new(Mutex::new(FakeDatabase::default()))
    }

    fn apply(&mut self, statement: &str) -> anyhow::Result<u64> {
        self.statements.push(statement.to_string());

        if statement.starts_with("CREATE SCHEMA") || statement.starts_with("DROP") {
            return Ok(0);
        }
        if let Some(rest) = statement.strip_prefix("CREATE TABLE ") {
            let name = rest.split(" (").next().unwrap_or_default().to_string();
            anyhow::ensure!(!self.tables.contains_key(&name), "relation {name} already exists");
            let check = between(rest, "\"chunk_number\" = ", ")").map(str::parse).transpose()?;
            self.tables.insert(name, FakeTable { check, ..FakeTable::default() });
            return Ok(0);
        }
        if statement.starts_with("UPDATE ") {
            let name = between(statement, "UPDATE ", " SET").unwrap_or_default();
            let set_list = statement.split(" SET ").nth(1).unwrap_or_default();
            let key: i64 = between(&format!("{set_list},"), "\"chunk_number\" = ", ",")
                .ok_or_else(|| anyhow::anyhow!("update without chunk key"))?
                .parse()?;
            let table = self
                .tables
                .get_mut(name)
                .ok_or_else(|| anyhow::anyhow!("relation {name} does not exist"))?;
            if let Some(check) = table.check {
                anyhow::ensure!(check == key, "new row for {name} violates check constraint");
            }
            for row in &mut table.rows {
                *row = Some(key);
            }
            return Ok(table.rows.len() as u64);
        }
        if statement.starts_with("CREATE INDEX ") {
            let index = between(statement, "CREATE INDEX \"", "\"").unwrap_or_default().to_string();
            let name = between(statement, " ON ", " USING").unwrap_or_default();
            let table = self
                .tables
                .get_mut(name)
                .ok_or_else(|| anyhow::anyhow!("relation {name} does not exist"))?;
            table.indexes.push(index);
            return Ok(0);
        }
        anyhow::bail!("unsupported statement: {statement}")
    }
}

/// One "connection" to the shared fake database.
#[derive(Debug, Clone)]
pub struct FakeStore {
    pub db: SharedDatabase,
}

impl SpatialStore for FakeStore {
    fn execute(&mut self, statement: &str) -> Result<u64> {
        self.db
            .lock()
            .apply(statement)
            .map_err(|e| PipelineError::configuration(format!("fake database: {e}")))
    }

    fn table_exists(&mut self, table: &QualifiedTable) -> Result<bool> {
        Ok(self.db.lock().tables.contains_key(&table.to_string()))
    }

    fn index_names(&mut self, table: &QualifiedTable, _column: &str) -> Result<Vec<String>> {
        Ok(self
            .db
            .lock()
            .tables
            .get(&table.to_string())
            .map(|t| t.indexes.clone())
            .unwrap_or_default())
    }
}

/// Hands out [`FakeStore`]s and counts opens and closes.
#[derive(Debug)]
pub struct FakeConnectionFactory {
    pub db: SharedDatabase,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub fail_connect: bool,
}

impl FakeConnectionFactory {
    pub fn new(db: SharedDatabase) -> Self {
        Self {
            db,
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            fail_connect: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_connect: true,
            ..Self::new(FakeDatabase::shared())
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for FakeConnectionFactory {
    type Connection = FakeStore;

    fn connect(&self) -> Result<FakeStore> {
        if self.fail_connect {
            return Err(PipelineError::configuration("fake database unavailable"));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeStore { db: Arc::clone(&self.db) })
    }

    fn close(&self, _connection: FakeStore) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// "Copies" one unstamped row per line of the source file into the target.
#[derive(Debug)]
pub struct LineCopier {
    pub db: SharedDatabase,
}

impl BulkCopier for LineCopier {
    fn copy(&self, source: &Path, target: &QualifiedTable) -> Result<()> {
        let text = std::fs::read_to_string(source).map_err(|e| PipelineError::io("read chunk", source, e))?;
        let mut db = self.db.lock();
        let table = db
            .tables
            .get_mut(&target.to_string())
            .ok_or_else(|| PipelineError::configuration(format!("{target} does not exist")))?;
        table.rows.extend(text.lines().map(|_| None));
        Ok(())
    }
}
