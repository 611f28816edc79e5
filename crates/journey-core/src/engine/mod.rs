//! High-level engine API for building journeys and running enrollments.
//!
//! The [`Engine`] is the single entry point used by the CLI and the RPC
//! endpoint. Every call is request-scoped: it reloads what it needs from the
//! database, does its work, and keeps nothing in memory between calls.
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │   Operations    │    │     Runner      │    │    Database     │
//! │ (journey_ops,   │───▶│ (runner,        │───▶│   (via db/)     │
//! │  contact_ops)   │    │  dispatch)      │    │                 │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!   Builder & CRUD       Step execution          Data Persistence
//! ```
//!
//! ## Submodules
//!
//! - [`builder`]: Factory for [`Engine`] instances with collaborators and
//!   limits
//! - [`journey_ops`]: Journey and step editing, validation, activation
//! - [`contact_ops`]: Contacts, activities and enrollment queries
//! - [`runner`]: Enrollment, the step loop and the scheduled sweep
//! - [`triggers`]: Trigger event matching
//! - `dispatch`: Per-step-type effects
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use journey_core::{
//!     EngineBuilder,
//!     params::{CreateContact, CreateJourney, CreateStep, EnrollContact, Id},
//!     models::TriggerType,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = EngineBuilder::new()
//!     .with_database_path(Some("/tmp/journeys.db"))
//!     .build()
//!     .await?;
//!
//! let journey = engine
//!     .create_journey(&CreateJourney {
//!         company_id: "acme".into(),
//!         name: "Welcome".into(),
//!         description: None,
//!         trigger_type: TriggerType::Manual,
//!         trigger_conditions: serde_json::Value::Null,
//!         allow_re_enrollment: false,
//!     })
//!     .await?;
//!
//! engine
//!     .create_step(&CreateStep {
//!         journey_id: journey.id,
//!         name: "Done".into(),
//!         step_type: "exit".into(),
//!         config: serde_json::Value::Null,
//!         position: None,
//!         canvas_x: None,
//!         canvas_y: None,
//!     })
//!     .await?;
//! engine.activate_journey(&Id { id: journey.id }).await?;
//!
//! let contact = engine
//!     .create_contact(&CreateContact {
//!         company_id: "acme".into(),
//!         email: Some("ada@example.com".into()),
//!         ..Default::default()
//!     })
//!     .await?;
//!
//! let enrollment = engine
//!     .enroll_contact(&EnrollContact {
//!         journey_id: journey.id,
//!         contact_id: contact.id,
//!         ..Default::default()
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::{path::PathBuf, sync::Arc};

use tokio::task;

use crate::{
    collaborators::{CompletionProvider, EmailSender},
    db::Database,
    error::{JourneyError, Result},
};

pub mod builder;
pub mod contact_ops;
mod dispatch;
pub mod journey_ops;
pub mod runner;
pub mod triggers;

#[cfg(test)]
mod tests;

pub use builder::EngineBuilder;
pub use runner::{SweepItem, SweepReport};
pub use triggers::TriggerMatch;

/// Runtime limits of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum scheduled executions resumed by one sweep
    pub sweep_batch_size: usize,
    /// Maximum steps one ProcessStep call runs before yielding
    pub max_steps_per_run: usize,
    /// Lifetime of an enrollment processing lease
    pub lease_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_batch_size: 50,
            max_steps_per_run: 250,
            lease_seconds: 300,
        }
    }
}

/// Main engine interface for journeys, contacts and enrollments.
#[derive(Debug, Clone)]
pub struct Engine {
    pub(crate) db_path: PathBuf,
    pub(crate) email: Arc<dyn EmailSender>,
    pub(crate) ai: Arc<dyn CompletionProvider>,
    pub(crate) config: EngineConfig,
}

impl Engine {
    pub(crate) fn new(
        db_path: PathBuf,
        email: Arc<dyn EmailSender>,
        ai: Arc<dyn CompletionProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db_path,
            email,
            ai,
            config,
        }
    }

    /// Runtime limits this engine was built with.
    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Runs `f` against a fresh connection on the blocking thread pool. The
    /// schema was initialized once by [`EngineBuilder::build`].
    pub(crate) async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        task::spawn_blocking(move || {
            let mut db = Database::connect(&db_path)?;
            f(&mut db)
        })
        .await
        .map_err(JourneyError::join)?
    }
}
