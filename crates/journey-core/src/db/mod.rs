//! Database operations and SQLite management for the journey engine.
//!
//! Each unit of work opens its own [`Database`]; the engine runs these calls
//! on the blocking thread pool. Queries are grouped per table.

use std::{path::Path, time::Duration};

use rusqlite::Connection;

use crate::error::{DatabaseResultExt, Result};

pub mod contact_queries;
pub mod enrollment_queries;
pub mod execution_queries;
pub mod journey_queries;
pub mod migrations;
pub mod step_queries;
pub mod utils;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Database connection and operations handler.
pub struct Database {
    connection: Connection,
}

impl Database {
    /// Opens the database, switches it to WAL and initializes the schema.
    ///
    /// Run once before handing out connections; [`Database::connect`] is the
    /// per-call counterpart.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Self::connect(path)?;
        db.enable_wal()?;
        db.initialize_schema()?;
        Ok(db)
    }

    /// Opens a connection to an initialized database.
    pub fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let connection = Connection::open(path).db_context("Failed to open database connection")?;
        connection
            .busy_timeout(BUSY_TIMEOUT)
            .db_context("Failed to set busy timeout")?;
        connection
            .execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")
            .db_context("Failed to configure connection")?;

        Ok(Self { connection })
    }
}
