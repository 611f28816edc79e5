//! Builder for creating and configuring Engine instances.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::task;

use super::{Engine, EngineConfig};
use crate::{
    collaborators::{CompletionProvider, DisabledCompletion, DisabledEmailSender, EmailSender},
    db::Database,
    error::{JourneyError, Result},
};

/// Builder for creating and configuring Engine instances.
#[derive(Debug, Clone)]
pub struct EngineBuilder {
    database_path: Option<PathBuf>,
    email: Option<Arc<dyn EmailSender>>,
    ai: Option<Arc<dyn CompletionProvider>>,
    config: EngineConfig,
}

impl EngineBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            database_path: None,
            email: None,
            ai: None,
            config: EngineConfig::default(),
        }
    }

    /// Sets a custom database file path.
    ///
    /// If not specified, uses XDG Base Directory specification:
    /// `$XDG_DATA_HOME/journey/journey.db` or `~/.local/share/journey/journey.db`
    pub fn with_database_path<P: AsRef<Path>>(mut self, path: Option<P>) -> Self {
        if let Some(path) = path {
            self.database_path = Some(path.as_ref().to_path_buf());
        }
        self
    }

    /// Sets the email sender used by `send_email` steps. Without one, email
    /// steps fail.
    pub fn with_email_sender(mut self, sender: Arc<dyn EmailSender>) -> Self {
        self.email = Some(sender);
        self
    }

    /// Sets the completion provider used by `ai_decision` steps. Without one,
    /// decisions fall back to their first option.
    pub fn with_completion_provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.ai = Some(provider);
        self
    }

    pub fn with_sweep_batch_size(mut self, size: usize) -> Self {
        self.config.sweep_batch_size = size.max(1);
        self
    }

    pub fn with_max_steps_per_run(mut self, steps: usize) -> Self {
        self.config.max_steps_per_run = steps.max(1);
        self
    }

    pub fn with_lease_seconds(mut self, seconds: u64) -> Self {
        self.config.lease_seconds = seconds.max(1);
        self
    }

    /// Builds the configured engine instance.
    ///
    /// # Errors
    ///
    /// Returns `JourneyError::FileSystem` if the database directory cannot be
    /// created.
    /// Returns `JourneyError::Database` if switching the database to WAL or
    /// initializing the schema fails. Both happen here once; engine calls
    /// only open connections.
    pub async fn build(self) -> Result<Engine> {
        let db_path = match self.database_path {
            Some(path) => path,
            None => Self::default_database_path()?,
        };

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| JourneyError::FileSystem {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let db_path_clone = db_path.clone();
        task::spawn_blocking(move || {
            let _db = Database::new(&db_path_clone)?;
            Ok::<(), JourneyError>(())
        })
        .await
        .map_err(JourneyError::join)??;

        log::debug!("Journey database ready at {}", db_path.display());

        Ok(Engine::new(
            db_path,
            self.email.unwrap_or_else(|| Arc::new(DisabledEmailSender)),
            self.ai.unwrap_or_else(|| Arc::new(DisabledCompletion)),
            self.config,
        ))
    }

    /// Returns the default database path following XDG Base Directory
    /// specification.
    fn default_database_path() -> Result<PathBuf> {
        xdg::BaseDirectories::with_prefix("journey")
            .place_data_file("journey.db")
            .map_err(|e| JourneyError::XdgDirectory(e.to_string()))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
