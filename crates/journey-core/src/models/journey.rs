//! Journey definition model.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::{JourneyStatus, JourneyStep, TriggerRule};

/// A named workflow owned by a company.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Journey {
    /// Unique identifier for the journey
    pub id: u64,

    /// Owning tenant
    pub company_id: String,

    pub name: String,

    pub description: Option<String>,

    /// Lifecycle status (draft, active or paused)
    #[serde(default)]
    pub status: JourneyStatus,

    /// Trigger type and conditions
    #[serde(flatten)]
    pub trigger: TriggerRule,

    /// Whether a contact may hold more than one active enrollment
    #[serde(default)]
    pub allow_re_enrollment: bool,

    /// Number of enrollments ever created
    pub total_enrolled: u64,

    /// Timestamp when the journey was created (UTC)
    pub created_at: Timestamp,

    /// Timestamp when the journey was last modified (UTC)
    pub updated_at: Timestamp,

    /// Steps ordered by position (lazy-loaded)
    #[serde(default)]
    pub steps: Vec<JourneyStep>,
}

impl Journey {
    /// The entry step: the one with the lowest position.
    pub fn entry_step(&self) -> Option<&JourneyStep> {
        self.steps.iter().min_by_key(|s| (s.position, s.id))
    }

    /// Looks up one of this journey's steps.
    pub fn step(&self, step_id: u64) -> Option<&JourneyStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}
