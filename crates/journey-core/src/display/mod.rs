//! Display formatting for journeys, enrollments and operation results.
//!
//! Domain models implement [`std::fmt::Display`] directly (see [`models`]);
//! collections and operation outcomes are wrapped in newtypes so that every
//! interface prints the same markdown.
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │  Domain Models  │    │ Wrappers &      │    │   Formatted     │
//! │ (Journey, ...)  │───▶│ Result Types    │───▶│    Output       │
//! │                 │    │                 │    │ (Terminal/JSON) │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`collections`]: Collection wrappers (Journeys, Steps, Enrollments, ...)
//! - [`results`]: Operation results (CreateResult, UpdateResult, DeleteResult,
//!   StatusChange)
//! - [`models`]: Display implementations for domain models and reports, plus
//!   [`LocalDateTime`]
//!
//! ## Usage Examples
//!
//! ```rust
//! use journey_core::display::Journeys;
//!
//! assert_eq!(Journeys(vec![]).to_string(), "No journeys found.\n");
//! ```

pub mod collections;
pub mod models;
pub mod results;

pub use collections::{Activities, Contacts, Enrollments, Journeys, Steps, TriggerMatches};
pub use models::LocalDateTime;
pub use results::{CreateResult, DeleteResult, StatusChange, UpdateResult};
