//! # Database Module
//!
//! Storage backend access for pipeline steps and pool workers.
//!
//! Every worker owns exactly one [`DatabaseConnection`] for its whole life;
//! connections are never pooled or shared between threads. A connection
//! carries its own current-thread runtime so blocking OS workers can drive
//! `sqlx` directly.
//!
//! ## Components
//!
//! - [`connection`]: the synchronous connection wrapper and its operations
//! - [`sql`]: identifier quoting and statement builders
//! - [`store`]: the [`SpatialStore`] seam used by the partition loader

pub mod connection;
pub mod sql;
pub mod store;

use tracing::{debug, warn};

use crate::config::DatabaseConfig;
use crate::error::Result;

pub use connection::DatabaseConnection;
pub use sql::{quote_ident, ColumnAssignment, IndexKind, QualifiedTable, SqlValue};
pub use store::SpatialStore;

/// Creates and releases exclusive per-worker connections.
pub trait ConnectionFactory: Send + Sync {
    type Connection: Send + 'static;

    fn connect(&self) -> Result<Self::Connection>;

    fn close(&self, connection: Self::Connection) -> Result<()>;
}

/// Opens PostgreSQL connections from the `database` config section.
#[derive(Debug, Clone)]
pub struct PgConnectionFactory {
    config: DatabaseConfig,
}

impl PgConnectionFactory {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }
}

impl ConnectionFactory for PgConnectionFactory {
    type Connection = DatabaseConnection;

    fn connect(&self) -> Result<DatabaseConnection> {
        debug!(
            host = %self.config.host,
            port = self.config.port,
            database = %self.config.database,
            "🔌 DATABASE: Opening connection"
        );
        DatabaseConnection::connect(&self.config)
    }

    fn close(&self, connection: DatabaseConnection) -> Result<()> {
        connection.close().inspect_err(|e| {
            warn!(error = %e, "DATABASE: Error closing connection");
        })
    }
}
