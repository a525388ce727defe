//! # Partitioned Bulk Loading
//!
//! Independently produced chunk files are loaded into child tables that
//! inherit a parent table's columns. Each child carries a
//! `CHECK (chunk_number = <key>)` constraint, so concurrent imports write to
//! disjoint tables and queries against the parent can prune partitions.
//!
//! ## Import flow
//!
//! 1. Create the parent table and the partition schema.
//! 2. Discover chunk files, skipping files too small to hold any feature.
//! 3. Create one constrained child table per chunk on the admin connection.
//! 4. Fan the chunk imports out over a [`WorkerPool`], one exclusive
//!    connection per worker. Each import bulk-copies the file, stamps the
//!    chunk key (and any extra constant columns) on every loaded row, then
//!    creates the spatial index once the data is in.

mod copier;

pub use copier::{BulkCopier, Ogr2OgrCopier};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ExecutionConfig;
use crate::constants::{columns, EMPTY_CHUNK_MAX_BYTES};
use crate::database::sql::quote_ident;
use crate::database::{ColumnAssignment, ConnectionFactory, IndexKind, QualifiedTable, SpatialStore};
use crate::error::{PipelineError, Result};
use crate::execution::{PoolSummary, TaskQueue, WorkerPool, WorkerPoolConfig};

/// Column definitions of the settlement parent table.
pub const SETTLEMENT_PARENT_COLUMNS: &str = "orig_fid int,
    shape Geometry(MultiPolygon, 4326) NOT NULL,
    grid_index int,
    chunk_number int,
    level smallint";

const LEVEL_DIR_PREFIX: &str = "chunks_level_";
const CHUNK_FILE_PREFIX: &str = "chunk_";
const CHUNK_FILE_EXTENSION: &str = "fgb";

/// One chunk to import.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub chunk_key: i64,
    pub source: PathBuf,
    pub table: QualifiedTable,
    /// Constant columns set alongside the chunk key after the copy.
    pub extra_columns: Vec<ColumnAssignment>,
}

impl Partition {
    pub fn new(chunk_key: i64, source: impl Into<PathBuf>, table: QualifiedTable) -> Self {
        Self {
            chunk_key,
            source: source.into(),
            table,
            extra_columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, assignment: ColumnAssignment) -> Self {
        self.extra_columns.push(assignment);
        self
    }

    fn assignments(&self) -> Vec<ColumnAssignment> {
        let mut assignments = vec![ColumnAssignment::new(columns::CHUNK_KEY, self.chunk_key)];
        assignments.extend(self.extra_columns.iter().cloned());
        assignments
    }
}

#[derive(Debug)]
pub struct PartitionedBulkLoader<B> {
    parent: QualifiedTable,
    partition_schema: String,
    parent_columns: String,
    copier: Arc<B>,
    empty_chunk_max_bytes: u64,
    pool: WorkerPoolConfig,
}

impl<B> Clone for PartitionedBulkLoader<B> {
    fn clone(&self) -> Self {
        Self {
            parent: self.parent.clone(),
            partition_schema: self.partition_schema.clone(),
            parent_columns: self.parent_columns.clone(),
            copier: Arc::clone(&self.copier),
            empty_chunk_max_bytes: self.empty_chunk_max_bytes,
            pool: self.pool.clone(),
        }
    }
}

impl<B: BulkCopier + 'static> PartitionedBulkLoader<B> {
    pub fn new(parent: QualifiedTable, partition_schema: impl Into<String>, copier: Arc<B>) -> Self {
        let pool_name = format!("import-{}", parent.table);
        Self {
            parent,
            partition_schema: partition_schema.into(),
            parent_columns: SETTLEMENT_PARENT_COLUMNS.to_string(),
            copier,
            empty_chunk_max_bytes: EMPTY_CHUNK_MAX_BYTES,
            pool: WorkerPoolConfig::new(pool_name, crate::constants::DEFAULT_IMPORT_WORKERS),
        }
    }

    /// Worker count, pool timing and small-chunk threshold from the execution config.
    pub fn from_execution(
        parent: QualifiedTable,
        partition_schema: impl Into<String>,
        copier: Arc<B>,
        execution: &ExecutionConfig,
    ) -> Self {
        let mut loader = Self::new(parent, partition_schema, copier);
        loader.pool = WorkerPoolConfig::from_execution(loader.pool.name.clone(), execution)
            .with_max_workers(execution.import_workers);
        loader.empty_chunk_max_bytes = execution.empty_chunk_max_bytes;
        loader
    }

    /// SQL column definitions of the parent table. Must include the chunk
    /// key and geometry columns.
    pub fn with_parent_columns(mut self, definitions: impl Into<String>) -> Self {
        self.parent_columns = definitions.into();
        self
    }

    pub fn with_pool_config(mut self, pool: WorkerPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_empty_chunk_max_bytes(mut self, bytes: u64) -> Self {
        self.empty_chunk_max_bytes = bytes;
        self
    }

    pub fn parent(&self) -> &QualifiedTable {
        &self.parent
    }

    pub fn pool_config(&self) -> &WorkerPoolConfig {
        &self.pool
    }

    pub fn partition_schema(&self) -> &str {
        &self.partition_schema
    }

    /// Create both schemas and the parent table. Returns false when the
    /// parent already exists, meaning an earlier run completed the import.
    pub fn create_parent_table<S: SpatialStore + ?Sized>(&self, store: &mut S) -> Result<bool> {
        if store.table_exists(&self.parent)? {
            info!("{} already exists", self.parent);
            return Ok(false);
        }
        for schema in [&self.parent.schema, &self.partition_schema] {
            store.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)))?;
        }
        store.execute(&format!("CREATE TABLE {} (\n    {}\n)", self.parent, self.parent_columns))?;
        info!(parent = %self.parent, "🗂️ PARTITION: Created parent table");
        Ok(true)
    }

    /// Create the partition's child table, constrained to its chunk key.
    pub fn create_partition<S: SpatialStore + ?Sized>(&self, store: &mut S, partition: &Partition) -> Result<()> {
        store.execute(&format!(
            "CREATE TABLE {} (\n    CHECK ({} = {})\n) INHERITS ({})",
            partition.table,
            quote_ident(columns::CHUNK_KEY),
            partition.chunk_key,
            self.parent
        ))?;
        Ok(())
    }

    /// Load one chunk into its pre-created child table, stamp the chunk key
    /// and extra columns, then index the geometry column if not yet indexed.
    pub fn import_chunk<S: SpatialStore + ?Sized>(&self, store: &mut S, partition: &Partition) -> Result<()> {
        debug!(
            chunk = partition.chunk_key,
            table = %partition.table,
            source = %partition.source.display(),
            "PARTITION: importing chunk"
        );
        self.copier.copy(&partition.source, &partition.table)?;
        store.update_all(&partition.table, &partition.assignments())?;
        store.create_index(&partition.table, columns::GEOMETRY, IndexKind::Spatial)?;
        Ok(())
    }

    /// Chunk files under `chunks_level_<n>` directories of `root`, each
    /// tagged with `level = n` and loaded into `level_<n>_chunk_<k>`.
    pub fn discover_partitions(&self, root: &Path) -> Result<Vec<Partition>> {
        let mut partitions = Vec::new();
        for entry in read_dir_sorted(root)? {
            let Some(level) = entry
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix(LEVEL_DIR_PREFIX))
                .and_then(|level| level.parse::<i64>().ok())
            else {
                continue;
            };
            if !entry.is_dir() {
                continue;
            }
            for chunk in self.discover_chunks(&entry, Some(level))? {
                partitions.push(chunk);
            }
        }
        Ok(partitions)
    }

    /// Chunk files directly inside `dir`. Without a level the child table is
    /// named after the file stem.
    pub fn discover_chunks(&self, dir: &Path, level: Option<i64>) -> Result<Vec<Partition>> {
        let mut partitions = Vec::new();
        let mut skipped = 0usize;

        for path in read_dir_sorted(dir)? {
            let Some((stem, chunk_key)) = chunk_file_key(&path) else {
                continue;
            };
            let size = fs::metadata(&path)
                .map_err(|e| PipelineError::io("stat chunk", &path, e))?
                .len();
            // Empty chunk files still hold a spatial index header.
            if size <= self.empty_chunk_max_bytes {
                skipped += 1;
                continue;
            }

            let partition = match level {
                Some(level) => Partition::new(
                    chunk_key,
                    &path,
                    QualifiedTable::new(&self.partition_schema, format!("level_{level}_{stem}")),
                )
                .with_column(ColumnAssignment::new(columns::LEVEL, level)),
                None => Partition::new(chunk_key, &path, QualifiedTable::new(&self.partition_schema, stem)),
            };
            partitions.push(partition);
        }

        debug!(
            dir = %dir.display(),
            found = partitions.len(),
            skipped,
            "PARTITION: discovered chunks"
        );
        Ok(partitions)
    }

    /// Create every child table on `admin`, then import all chunks in
    /// parallel with one connection per worker.
    pub fn import_all<S, F>(&self, admin: &mut S, partitions: Vec<Partition>, factory: Arc<F>) -> Result<PoolSummary>
    where
        S: SpatialStore + ?Sized,
        F: ConnectionFactory + 'static,
        F::Connection: SpatialStore,
    {
        for partition in &partitions {
            self.create_partition(admin, partition)?;
        }

        let total = partitions.len();
        let queue = TaskQueue::<F::Connection>::new();
        for partition in partitions {
            let loader = self.clone();
            queue.push(move |connection: &mut F::Connection| {
                loader.import_chunk(connection, &partition)?;
                Ok(())
            });
        }

        info!(
            parent = %self.parent,
            partitions = total,
            workers = self.pool.max_workers,
            "📥 PARTITION: Importing chunks"
        );
        WorkerPool::new(self.pool.clone()).run_with_connections(queue, Some(total), factory)
    }

    /// Drop the partition schema and the parent table with its children.
    pub fn clean<S: SpatialStore + ?Sized>(&self, store: &mut S) -> Result<()> {
        store.execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(&self.partition_schema)))?;
        store.execute(&format!("DROP TABLE IF EXISTS {} CASCADE", self.parent))?;
        info!(parent = %self.parent, schema = %self.partition_schema, "🧹 PARTITION: Cleaned");
        Ok(())
    }

    /// The whole flow for one chunk directory tree. Returns `None` when the
    /// parent table already existed and nothing was imported.
    pub fn load_directory<S, F>(
        &self,
        admin: &mut S,
        root: &Path,
        clean: bool,
        factory: Arc<F>,
    ) -> Result<Option<PoolSummary>>
    where
        S: SpatialStore + ?Sized,
        F: ConnectionFactory + 'static,
        F::Connection: SpatialStore,
    {
        if clean {
            self.clean(admin)?;
        }
        if !self.create_parent_table(admin)? {
            return Ok(None);
        }
        let partitions = self.discover_partitions(root)?;
        self.import_all(admin, partitions, factory).map(Some)
    }
}

/// `chunk_<k>.fgb` → (`chunk_<k>`, k)
fn chunk_file_key(path: &Path) -> Option<(String, i64)> {
    if path.extension().and_then(|e| e.to_str()) != Some(CHUNK_FILE_EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let key = stem.strip_prefix(CHUNK_FILE_PREFIX)?.parse().ok()?;
    Some((stem.to_string(), key))
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| PipelineError::io("list directory", dir, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        paths.push(entry.map_err(|e| PipelineError::io("list directory", dir, e))?.path());
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoCopy;

    impl BulkCopier for NoCopy {
        fn copy(&self, _source: &Path, _target: &QualifiedTable) -> Result<()> {
            Ok(())
        }
    }

    fn loader() -> PartitionedBulkLoader<NoCopy> {
        PartitionedBulkLoader::new(QualifiedTable::new("tza", "settlements"), "tza_slices", Arc::new(NoCopy))
            .with_empty_chunk_max_bytes(10)
    }

    fn write(path: &Path, bytes: usize) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![b'x'; bytes]).unwrap();
    }

    #[test]
    fn test_chunk_file_key() {
        assert_eq!(chunk_file_key(Path::new("/a/chunk_12.fgb")), Some(("chunk_12".to_string(), 12)));
        assert_eq!(chunk_file_key(Path::new("/a/chunk_12.txt")), None);
        assert_eq!(chunk_file_key(Path::new("/a/chunk_x.fgb")), None);
    }

    #[test]
    fn test_discover_partitions_by_level() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("chunks_level_1/chunk_0.fgb"), 100);
        write(&dir.path().join("chunks_level_1/chunk_1.fgb"), 10);
        write(&dir.path().join("chunks_level_2/chunk_5.fgb"), 100);
        write(&dir.path().join("chunks_level_2/notes.txt"), 100);
        write(&dir.path().join("other/chunk_9.fgb"), 100);

        let partitions = loader().discover_partitions(dir.path()).unwrap();
        let tables: Vec<_> = partitions.iter().map(|p| p.table.table.as_str()).collect();
        assert_eq!(tables, ["level_1_chunk_0", "level_2_chunk_5"]);
        assert_eq!(partitions[1].chunk_key, 5);
        assert_eq!(partitions[1].extra_columns, vec![ColumnAssignment::new("level", 2)]);
        assert!(partitions.iter().all(|p| p.table.schema == "tza_slices"));
    }

    #[test]
    fn test_flat_discovery_uses_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("chunk_3.fgb"), 100);
        let partitions = loader().discover_chunks(dir.path(), None).unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].table.table, "chunk_3");
        assert!(partitions[0].extra_columns.is_empty());
    }

    #[test]
    fn test_import_pool_sized_by_import_workers() {
        let execution = ExecutionConfig {
            max_workers: 16,
            import_workers: 2,
            poll_interval_ms: 7,
            empty_chunk_max_bytes: 1024,
            ..Default::default()
        };
        let loader = PartitionedBulkLoader::from_execution(
            QualifiedTable::new("tza", "settlements"),
            "tza_slices",
            Arc::new(NoCopy),
            &execution,
        );
        assert_eq!(loader.pool_config().max_workers, 2);
        assert_eq!(loader.pool_config().poll_interval, std::time::Duration::from_millis(7));
        assert_eq!(loader.pool_config().name, "import-settlements");
        assert_eq!(loader.empty_chunk_max_bytes, 1024);
    }

    #[test]
    fn test_assignments_start_with_chunk_key() {
        let partition = Partition::new(4, "/x/chunk_4.fgb", QualifiedTable::new("s", "t"))
            .with_column(ColumnAssignment::new("level", 1));
        let assignments = partition.assignments();
        assert_eq!(assignments[0], ColumnAssignment::new("chunk_number", 4));
        assert_eq!(assignments.len(), 2);
    }
}
