//! Core library for the journey automation engine.
//!
//! A journey is a graph of typed steps (emails, delays, conditions, AI
//! decisions, CRM mutations) that contacts are enrolled into. This crate
//! stores journeys, contacts and enrollments in SQLite, validates journey
//! graphs, and runs enrollments step by step, parking them on delays until a
//! periodic sweep resumes them.
//!
//! # Layout
//!
//! - [`engine`]: The [`Engine`] API used by every interface
//! - [`models`]: Journeys, steps, enrollments, executions, contacts
//! - [`params`]: Interface-neutral operation parameters and the RPC request
//! - [`db`]: SQLite persistence
//! - [`validator`], [`conditions`], [`template`]: Pure graph and step logic
//! - [`collaborators`]: Email and AI completion services
//! - [`display`]: Markdown formatting of models and results
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use journey_core::{EngineBuilder, params::{Id, ListJourneys}};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = EngineBuilder::new()
//!     .with_database_path(Some("journeys.db"))
//!     .build()
//!     .await?;
//!
//! let journeys = engine.list_journeys(&ListJourneys::default()).await?;
//! for journey in &journeys {
//!     let report = engine.validate_journey(&Id { id: journey.id }).await?;
//!     println!("{}: {}", journey.name, report);
//! }
//!
//! // Resume delays that are due
//! let report = engine.process_scheduled_executions(jiff::Timestamp::now()).await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod conditions;
pub mod db;
pub mod display;
pub mod engine;
pub mod error;
pub mod models;
pub mod params;
pub mod template;
pub mod validator;

// Re-export commonly used types
pub use collaborators::{
    CompletionProvider, EmailSender, HttpEmailConfig, HttpEmailSender, OpenAiCompletion,
    OpenAiConfig,
};
pub use db::Database;
pub use display::{CreateResult, DeleteResult, LocalDateTime, StatusChange, UpdateResult};
pub use engine::{Engine, EngineBuilder, EngineConfig, SweepReport, TriggerMatch};
pub use error::{JourneyError, Result};
pub use models::{
    Contact, Enrollment, EnrollmentStatus, ExecutionStatus, Journey, JourneyStatus, JourneyStep,
    StepExecution, StepKind, TriggerType,
};
pub use params::{EngineCommand, EngineRequest};
pub use validator::ValidationReport;
