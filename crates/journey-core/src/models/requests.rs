//! Validated request types for creating and updating models.

use serde_json::{Map, Value};

use super::{StepKind, TriggerRule};

/// A step to be inserted into a journey.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub journey_id: u64,
    pub name: String,
    pub kind: StepKind,
    /// Explicit position; appended after the last step when `None`
    pub position: Option<u32>,
    pub canvas_x: f64,
    pub canvas_y: f64,
}

/// Partial update of a step; `None` keeps the stored value.
#[derive(Debug, Default, Clone)]
pub struct UpdateStepRequest {
    pub name: Option<String>,
    pub kind: Option<StepKind>,
    pub position: Option<u32>,
    pub canvas: Option<(f64, f64)>,
}

impl UpdateStepRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.kind.is_none() && self.position.is_none() && self.canvas.is_none()
    }
}

/// A journey to be created in `draft` status.
#[derive(Debug, Clone)]
pub struct NewJourney {
    pub company_id: String,
    pub name: String,
    pub description: Option<String>,
    pub trigger: TriggerRule,
    pub allow_re_enrollment: bool,
}

/// Partial update of a journey; `None` keeps the stored value.
#[derive(Debug, Default, Clone)]
pub struct UpdateJourneyRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger: Option<TriggerRule>,
    pub allow_re_enrollment: Option<bool>,
}

/// A contact to be created.
#[derive(Debug, Default, Clone)]
pub struct NewContact {
    pub company_id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub lifecycle_stage: Option<String>,
    pub tags: Vec<String>,
    pub custom_fields: Map<String, Value>,
}

/// An activity to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub company_id: String,
    pub contact_id: u64,
    pub activity_type: String,
    pub subject: String,
    pub description: Option<String>,
}
