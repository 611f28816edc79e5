//! Journey step model and the per-variant step configuration.

use std::{fmt, str::FromStr};

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Represents one node of a journey's workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JourneyStep {
    /// Unique identifier for the step
    pub id: u64,

    /// ID of the owning journey
    pub journey_id: u64,

    /// Display name shown in the builder
    pub name: String,

    /// Ordering position; the lowest position is the entry step
    pub position: u32,

    /// Canvas coordinates used by the visual builder
    #[serde(default)]
    pub canvas_x: f64,
    #[serde(default)]
    pub canvas_y: f64,

    /// Variant-specific configuration
    #[serde(flatten)]
    pub kind: StepKind,

    /// Linear successor for non-branching steps
    pub next_step_id: Option<u64>,

    /// Target when a condition passes
    pub condition_true_step_id: Option<u64>,

    /// Target when a condition fails
    pub condition_false_step_id: Option<u64>,

    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,

    /// Timestamp when the step was created (UTC)
    pub created_at: Timestamp,

    /// Timestamp when the step was last updated (UTC)
    pub updated_at: Timestamp,
}

impl JourneyStep {
    /// Every step id this step can hand control to, in declaration order.
    pub fn outgoing_targets(&self) -> Vec<u64> {
        let mut targets: Vec<u64> = [
            self.next_step_id,
            self.condition_true_step_id,
            self.condition_false_step_id,
        ]
        .into_iter()
        .flatten()
        .collect();

        if let StepKind::AiDecision { options, .. } = &self.kind {
            targets.extend(options.iter().filter_map(|o| o.step_id));
        }
        targets
    }
}

/// Step configuration, keyed by step type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum StepKind {
    /// Render and send an email to the enrolled contact
    SendEmail { subject: String, body: String },
    /// Park the enrollment until the sweep resumes it
    Delay { amount: u32, unit: DelayUnit },
    /// Branch on a conjunction of predicates over the contact record
    Condition { conditions: Vec<Predicate> },
    /// Branch on an answer chosen by the completion provider
    AiDecision {
        prompt: String,
        options: Vec<DecisionOption>,
    },
    /// Write fields on the contact record
    UpdateContact { fields: Map<String, Value> },
    /// Add tags to the contact's tag set
    AddTag { tags: Vec<String> },
    /// Remove tags from the contact's tag set
    RemoveTag { tags: Vec<String> },
    /// Record a CRM activity for the contact
    CreateActivity {
        activity_type: String,
        subject: String,
        #[serde(default)]
        description: Option<String>,
    },
    /// Complete the enrollment
    Exit {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl StepKind {
    /// Database/wire name of the variant.
    pub fn step_type(&self) -> &'static str {
        match self {
            StepKind::SendEmail { .. } => "send_email",
            StepKind::Delay { .. } => "delay",
            StepKind::Condition { .. } => "condition",
            StepKind::AiDecision { .. } => "ai_decision",
            StepKind::UpdateContact { .. } => "update_contact",
            StepKind::AddTag { .. } => "add_tag",
            StepKind::RemoveTag { .. } => "remove_tag",
            StepKind::CreateActivity { .. } => "create_activity",
            StepKind::Exit { .. } => "exit",
        }
    }

    /// Branching steps route through branch targets instead of `next_step_id`.
    pub fn is_branching(&self) -> bool {
        matches!(self, StepKind::Condition { .. } | StepKind::AiDecision { .. })
    }
}

/// Unit of a delay step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DelayUnit {
    #[serde(alias = "minute")]
    Minutes,
    #[serde(alias = "hour")]
    Hours,
    #[serde(alias = "day")]
    Days,
    #[serde(alias = "week")]
    Weeks,
}

impl DelayUnit {
    /// Length of one unit in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            DelayUnit::Minutes => 60,
            DelayUnit::Hours => 60 * 60,
            DelayUnit::Days => 24 * 60 * 60,
            DelayUnit::Weeks => 7 * 24 * 60 * 60,
        }
    }

    /// Duration of `amount` units.
    pub fn duration(&self, amount: u32) -> SignedDuration {
        SignedDuration::from_secs(i64::from(amount) * self.seconds())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DelayUnit::Minutes => "minutes",
            DelayUnit::Hours => "hours",
            DelayUnit::Days => "days",
            DelayUnit::Weeks => "weeks",
        }
    }
}

/// A single condition predicate evaluated against the contact record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

/// Comparison operators available to condition steps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    IsSet,
    IsNotSet,
}

/// One answer an AI decision step may take, and where it leads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionOption {
    pub key: String,
    pub step_id: Option<u64>,
}

/// Outgoing edge slot of a step, as addressed by the builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EdgePort {
    Next,
    True,
    False,
    Option(String),
}

impl FromStr for EdgePort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "next" => Ok(EdgePort::Next),
            "true" => Ok(EdgePort::True),
            "false" => Ok(EdgePort::False),
            other => match other.strip_prefix("option:") {
                Some(key) if !key.is_empty() => Ok(EdgePort::Option(key.to_string())),
                _ => Err(format!(
                    "Invalid edge port: {s} (expected next, true, false or option:<key>)"
                )),
            },
        }
    }
}

impl TryFrom<String> for EdgePort {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EdgePort> for String {
    fn from(port: EdgePort) -> Self {
        port.to_string()
    }
}

impl fmt::Display for EdgePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgePort::Next => write!(f, "next"),
            EdgePort::True => write!(f, "true"),
            EdgePort::False => write!(f, "false"),
            EdgePort::Option(key) => write!(f, "option:{key}"),
        }
    }
}
