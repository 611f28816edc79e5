//! Parameter structures for journey engine operations.
//!
//! These are shared by every interface (CLI, HTTP endpoint) and carry no
//! framework derives beyond serde and, with the `schema` feature, JSON
//! Schema. Interface layers wrap or convert into them; the engine validates
//! them into the request types in [`crate::models::requests`].
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │   CLI Args      │    │  RPC envelope   │    │  Core Params    │
//! │  (clap derives) │───▶│ (EngineRequest) │───▶│ (this module)   │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//! ```

#[cfg(feature = "schema")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{JourneyError, Result},
    models::{NewContact, NewJourney, StepKind, TriggerRule, TriggerType},
};

/// Generic parameters for operations requiring just an ID.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct Id {
    /// The ID of the resource to operate on
    pub id: u64,
}

/// Parameters for creating a journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct CreateJourney {
    /// Owning company
    pub company_id: String,
    pub name: String,
    pub description: Option<String>,
    /// Event type that enrolls contacts automatically
    #[serde(default = "manual_trigger")]
    pub trigger_type: TriggerType,
    /// Trigger-specific conditions; absent fields match anything
    #[serde(default)]
    pub trigger_conditions: Value,
    #[serde(default)]
    pub allow_re_enrollment: bool,
}

fn manual_trigger() -> TriggerType {
    TriggerType::Manual
}

impl TryFrom<&CreateJourney> for NewJourney {
    type Error = JourneyError;

    fn try_from(params: &CreateJourney) -> Result<Self> {
        if params.name.trim().is_empty() {
            return Err(JourneyError::invalid_input("name").with_reason("Name cannot be empty"));
        }
        if params.company_id.trim().is_empty() {
            return Err(
                JourneyError::invalid_input("company_id").with_reason("Company cannot be empty")
            );
        }
        Ok(NewJourney {
            company_id: params.company_id.clone(),
            name: params.name.trim().to_string(),
            description: params.description.clone(),
            trigger: trigger_rule(params.trigger_type, params.trigger_conditions.clone())?,
            allow_re_enrollment: params.allow_re_enrollment,
        })
    }
}

/// Builds a trigger rule, reporting malformed conditions as invalid input.
pub fn trigger_rule(trigger_type: TriggerType, conditions: Value) -> Result<TriggerRule> {
    TriggerRule::from_parts(trigger_type, conditions).map_err(|e| {
        JourneyError::invalid_input("trigger_conditions").with_reason(format!(
            "Invalid conditions for {} trigger: {e}",
            trigger_type.as_str()
        ))
    })
}

/// Parameters for updating a journey. Absent fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct UpdateJourney {
    pub id: u64,
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger_type: Option<TriggerType>,
    /// Replaces the trigger conditions; applies to the new trigger type when
    /// one is given, the current one otherwise
    pub trigger_conditions: Option<Value>,
    pub allow_re_enrollment: Option<bool>,
}

/// Parameters for listing journeys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct ListJourneys {
    pub company_id: Option<String>,
    /// Filter by status (draft, active, paused)
    pub status: Option<String>,
}

/// Parameters for adding a step to a journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct CreateStep {
    pub journey_id: u64,
    pub name: String,
    /// Step type, e.g. `send_email`, `delay`, `condition`
    pub step_type: String,
    /// Type-specific configuration
    #[serde(default)]
    pub config: Value,
    /// Explicit position; appended after the last step when absent
    pub position: Option<u32>,
    pub canvas_x: Option<f64>,
    pub canvas_y: Option<f64>,
}

/// Parameters for updating a step. Absent fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct UpdateStep {
    pub id: u64,
    pub name: Option<String>,
    /// New step type; requires `config` unless the current config fits it
    pub step_type: Option<String>,
    pub config: Option<Value>,
    pub position: Option<u32>,
    pub canvas_x: Option<f64>,
    pub canvas_y: Option<f64>,
}

/// Parameters for wiring one outgoing port of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct ConnectSteps {
    pub from_step_id: u64,
    /// `next`, `true`, `false` or `option:<key>`
    pub port: String,
    /// Target step; absent disconnects the port
    pub to_step_id: Option<u64>,
}

/// Parses a step type and its configuration into a [`StepKind`].
pub fn step_kind(step_type: &str, config: Value) -> Result<StepKind> {
    let mut object = match config {
        Value::Null => Map::new(),
        Value::Object(object) => object,
        other => {
            return Err(JourneyError::invalid_input("config")
                .with_reason(format!("Step config must be an object, got {other}")))
        }
    };
    object.insert("step_type".into(), Value::from(step_type));

    serde_json::from_value(Value::Object(object)).map_err(|e| {
        JourneyError::invalid_input("config")
            .with_reason(format!("Invalid {step_type} step config: {e}"))
    })
}

/// Parameters for creating a contact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct CreateContact {
    pub company_id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub lifecycle_stage: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
}

impl From<&CreateContact> for NewContact {
    fn from(params: &CreateContact) -> Self {
        NewContact {
            company_id: params.company_id.clone(),
            email: params.email.clone(),
            first_name: params.first_name.clone(),
            last_name: params.last_name.clone(),
            lifecycle_stage: params.lifecycle_stage.clone(),
            tags: params.tags.clone(),
            custom_fields: params.custom_fields.clone(),
        }
    }
}

/// Parameters for listing a company's contacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct ListContacts {
    pub company_id: String,
}

/// Parameters for enrolling a contact into a journey.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct EnrollContact {
    pub journey_id: u64,
    pub contact_id: u64,
    /// Initial enrollment context, available to templates
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Enrollment source; `manual` when absent
    pub source: Option<String>,
}

/// Parameters for evaluating trigger journeys against an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct CheckTriggers {
    pub trigger_type: TriggerType,
    /// Event payload; must carry `company_id` and `contact_id`
    #[serde(default)]
    pub trigger_data: Map<String, Value>,
}

/// Parameters for listing enrollments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
pub struct ListEnrollments {
    pub journey_id: Option<u64>,
    pub contact_id: Option<u64>,
    /// Filter by status (active, completed, paused, failed)
    pub status: Option<String>,
}

/// Request body accepted by the engine's RPC endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct EngineRequest {
    /// `enroll_contact`, `process_step`, `process_scheduled` or
    /// `trigger_check`
    pub action: String,
    pub enrollment_id: Option<u64>,
    pub journey_id: Option<u64>,
    pub contact_id: Option<u64>,
    pub context: Option<Map<String, Value>>,
    pub trigger_type: Option<String>,
    pub trigger_data: Option<Map<String, Value>>,
}

/// A validated RPC request.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    EnrollContact(EnrollContact),
    ProcessStep(Id),
    ProcessScheduled,
    TriggerCheck(CheckTriggers),
}

fn required<T>(value: Option<T>, field: &str, action: &str) -> Result<T> {
    value.ok_or_else(|| {
        JourneyError::invalid_input(field).with_reason(format!("Required for action '{action}'"))
    })
}

impl TryFrom<EngineRequest> for EngineCommand {
    type Error = JourneyError;

    fn try_from(request: EngineRequest) -> Result<Self> {
        let action = request.action.as_str();
        match action {
            "enroll_contact" => Ok(EngineCommand::EnrollContact(EnrollContact {
                journey_id: required(request.journey_id, "journeyId", action)?,
                contact_id: required(request.contact_id, "contactId", action)?,
                context: request.context.unwrap_or_default(),
                source: None,
            })),
            "process_step" => Ok(EngineCommand::ProcessStep(Id {
                id: required(request.enrollment_id, "enrollmentId", action)?,
            })),
            "process_scheduled" => Ok(EngineCommand::ProcessScheduled),
            "trigger_check" => {
                let raw = required(request.trigger_type, "triggerType", action)?;
                let trigger_type = raw.parse::<TriggerType>().map_err(|e| {
                    JourneyError::invalid_input("triggerType").with_reason(e)
                })?;
                Ok(EngineCommand::TriggerCheck(CheckTriggers {
                    trigger_type,
                    trigger_data: request.trigger_data.unwrap_or_default(),
                }))
            }
            other => Err(JourneyError::invalid_input("action")
                .with_reason(format!("Unknown action: {other}"))),
        }
    }
}
