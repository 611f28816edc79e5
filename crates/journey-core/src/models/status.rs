//! Status enumerations for journeys, enrollments and step executions.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a journey definition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JourneyStatus {
    /// Being edited; does not accept enrollments
    #[default]
    Draft,

    /// Validated and accepting enrollments
    Active,

    /// Temporarily not accepting enrollments
    Paused,
}

impl FromStr for JourneyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(JourneyStatus::Draft),
            "active" => Ok(JourneyStatus::Active),
            "paused" => Ok(JourneyStatus::Paused),
            _ => Err(format!("Invalid journey status: {s}")),
        }
    }
}

impl JourneyStatus {
    /// Convert to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyStatus::Draft => "draft",
            JourneyStatus::Active => "active",
            JourneyStatus::Paused => "paused",
        }
    }
}

/// Status of one contact's run through a journey.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Paused,
    Failed,
}

impl FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(EnrollmentStatus::Active),
            "completed" => Ok(EnrollmentStatus::Completed),
            "paused" => Ok(EnrollmentStatus::Paused),
            "failed" => Ok(EnrollmentStatus::Failed),
            _ => Err(format!("Invalid enrollment status: {s}")),
        }
    }
}

impl EnrollmentStatus {
    /// Convert to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Paused => "paused",
            EnrollmentStatus::Failed => "failed",
        }
    }

    /// Get status with consistent icon formatting for display.
    ///
    /// ```rust
    /// use journey_core::models::EnrollmentStatus;
    ///
    /// assert_eq!(EnrollmentStatus::Completed.with_icon(), "✓ Completed");
    /// assert_eq!(EnrollmentStatus::Active.with_icon(), "➤ Active");
    /// ```
    pub fn with_icon(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "➤ Active",
            EnrollmentStatus::Completed => "✓ Completed",
            EnrollmentStatus::Paused => "‖ Paused",
            EnrollmentStatus::Failed => "✗ Failed",
        }
    }
}

/// Status of a single step execution attempt.
///
/// `Pending → Executing → Executed | Failed | Scheduled`; a scheduled
/// execution becomes `Executed` when the sweep resumes it, and a failed one
/// goes back to `Executing` when retried.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Executing,
    Executed,
    Failed,
    Scheduled,
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ExecutionStatus::Pending),
            "executing" => Ok(ExecutionStatus::Executing),
            "executed" => Ok(ExecutionStatus::Executed),
            "failed" => Ok(ExecutionStatus::Failed),
            "scheduled" => Ok(ExecutionStatus::Scheduled),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}

impl ExecutionStatus {
    /// Convert to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::Executed => "executed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Scheduled => "scheduled",
        }
    }

    /// Get status with consistent icon formatting for display.
    pub fn with_icon(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "○ Pending",
            ExecutionStatus::Executing => "➤ Executing",
            ExecutionStatus::Executed => "✓ Executed",
            ExecutionStatus::Failed => "✗ Failed",
            ExecutionStatus::Scheduled => "◷ Scheduled",
        }
    }
}
