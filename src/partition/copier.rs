//! Bulk file-to-table copy through an external tool.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::DatabaseConfig;
use crate::database::QualifiedTable;
use crate::error::Result;
use crate::execution::CommandLine;

/// Loads one vector file into an existing table using the backend's native
/// bulk path.
pub trait BulkCopier: Send + Sync {
    fn copy(&self, source: &Path, target: &QualifiedTable) -> Result<()>;
}

/// `ogr2ogr` with `PG_USE_COPY`, appending into the pre-created child table.
/// The password travels in `PGPASSWORD`, never on the command line.
#[derive(Clone)]
pub struct Ogr2OgrCopier {
    program: String,
    connection_string: String,
    password: String,
    working_dir: Option<PathBuf>,
}

impl fmt::Debug for Ogr2OgrCopier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ogr2OgrCopier")
            .field("program", &self.program)
            .field("connection_string", &self.connection_string)
            .field("password", &"***")
            .field("working_dir", &self.working_dir)
            .finish()
    }
}

impl Ogr2OgrCopier {
    pub fn new(database: &DatabaseConfig) -> Self {
        Self {
            program: "ogr2ogr".to_string(),
            connection_string: database.ogr_connection_string(),
            password: database.password.clone(),
            working_dir: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn command(&self, source: &Path, target: &QualifiedTable) -> CommandLine {
        let command = CommandLine::new(&self.program)
            .args(["--config", "PG_USE_COPY", "YES", "-f", "PostgreSQL", "-append"])
            .arg(&self.connection_string)
            .arg("-nln")
            .arg(format!("{}.{}", target.schema, target.table))
            .path_arg(source);
        let command = if self.password.is_empty() {
            command
        } else {
            command.env("PGPASSWORD", &self.password)
        };
        match &self.working_dir {
            Some(dir) => command.current_dir(dir),
            None => command,
        }
    }
}

impl BulkCopier for Ogr2OgrCopier {
    fn copy(&self, source: &Path, target: &QualifiedTable) -> Result<()> {
        self.command(source, target).run_streaming()?;
        Ok(())
    }
}
