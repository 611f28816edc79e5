//! Enrollment and step execution models.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{EnrollmentStatus, ExecutionStatus};

/// One contact's run through one journey.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Enrollment {
    pub id: u64,
    pub journey_id: u64,
    pub contact_id: u64,
    pub company_id: String,

    /// Step to run next; `None` means no further step
    pub current_step_id: Option<u64>,

    pub status: EnrollmentStatus,

    /// How the contact entered the journey (`manual`, `trigger:tag_added`, ...)
    pub source: String,

    /// Trigger payload plus values accumulated by executed steps
    #[serde(default)]
    pub context: Map<String, Value>,

    pub steps_completed: u64,
    pub emails_sent: u64,

    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,

    /// Execution history, oldest first (lazy-loaded)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub executions: Vec<StepExecution>,
}

/// One attempt to run a step for an enrollment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepExecution {
    pub id: u64,
    pub enrollment_id: u64,
    pub step_id: u64,
    pub status: ExecutionStatus,

    /// When a parked delay becomes due
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<Timestamp>,

    /// Step-specific result payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub retry_count: u32,

    /// Message id returned by the email sender
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_message_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<Timestamp>,

    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
