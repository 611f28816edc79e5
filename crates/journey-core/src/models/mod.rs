//! Data models for journeys, steps, enrollments and contacts.
//!
//! These are the records the engine reads and writes. Display
//! implementations live in [`crate::display::models`] so that presentation
//! stays apart from the data structures.
//!
//! # Examples
//!
//! ```rust
//! use journey_core::models::{DelayUnit, StepKind};
//!
//! let kind: StepKind = serde_json::from_value(serde_json::json!({
//!     "step_type": "delay",
//!     "amount": 2,
//!     "unit": "days",
//! }))
//! .unwrap();
//!
//! assert_eq!(kind, StepKind::Delay { amount: 2, unit: DelayUnit::Days });
//! assert_eq!(kind.step_type(), "delay");
//! ```

pub mod contact;
pub mod enrollment;
pub mod journey;
pub mod requests;
pub mod status;
pub mod step;
pub mod trigger;


pub use contact::{Activity, Contact};
pub use enrollment::{Enrollment, StepExecution};
pub use journey::Journey;
pub use requests::{NewActivity, NewContact, NewJourney, NewStep, UpdateJourneyRequest, UpdateStepRequest};
pub use status::{EnrollmentStatus, ExecutionStatus, JourneyStatus};
pub use step::{DecisionOption, DelayUnit, EdgePort, JourneyStep, Operator, Predicate, StepKind};
pub use trigger::{TriggerRule, TriggerType};
