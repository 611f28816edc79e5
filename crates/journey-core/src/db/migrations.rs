//! Database schema initialization.

use crate::error::{DatabaseResultExt, Result};

impl super::Database {
    /// Switches the database file to write-ahead logging so readers never
    /// block the writer. The mode is stored in the file.
    pub(super) fn enable_wal(&self) -> Result<()> {
        let mode: String = self
            .connection
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .db_context("Failed to enable WAL")?;
        if !mode.eq_ignore_ascii_case("wal") {
            log::warn!("Database journal mode is '{mode}', not WAL");
        }
        Ok(())
    }

    /// Initializes the database schema using the embedded SQL file.
    pub(super) fn initialize_schema(&self) -> Result<()> {
        let schema_sql = include_str!("../../assets/schema.sql");
        self.connection
            .execute_batch(schema_sql)
            .db_context("Failed to initialize database schema")
    }
}
