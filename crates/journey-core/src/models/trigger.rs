//! Journey triggers: which external events enroll contacts automatically.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::template::value_number;

/// Kind of event that can start a journey.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    LifecycleChange,
    TagAdded,
    DealCreated,
    DealStageChanged,
    ContactCreated,
    FormSubmitted,
    Manual,
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lifecycle_change" => Ok(TriggerType::LifecycleChange),
            "tag_added" => Ok(TriggerType::TagAdded),
            "deal_created" => Ok(TriggerType::DealCreated),
            "deal_stage_changed" => Ok(TriggerType::DealStageChanged),
            "contact_created" => Ok(TriggerType::ContactCreated),
            "form_submitted" => Ok(TriggerType::FormSubmitted),
            "manual" => Ok(TriggerType::Manual),
            _ => Err(format!("Invalid trigger type: {s}")),
        }
    }
}

impl TriggerType {
    /// Convert to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::LifecycleChange => "lifecycle_change",
            TriggerType::TagAdded => "tag_added",
            TriggerType::DealCreated => "deal_created",
            TriggerType::DealStageChanged => "deal_stage_changed",
            TriggerType::ContactCreated => "contact_created",
            TriggerType::FormSubmitted => "form_submitted",
            TriggerType::Manual => "manual",
        }
    }
}

/// A trigger type together with its conditions.
///
/// Every condition field is optional; an absent field matches any event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "trigger_type",
    content = "trigger_conditions",
    rename_all = "snake_case"
)]
pub enum TriggerRule {
    LifecycleChange {
        from_stage: Option<String>,
        to_stage: Option<String>,
    },
    TagAdded {
        #[serde(default)]
        tags: Vec<String>,
    },
    DealCreated {
        pipeline_id: Option<String>,
        min_value: Option<f64>,
    },
    DealStageChanged {
        pipeline_id: Option<String>,
        stage: Option<String>,
    },
    ContactCreated {
        source: Option<String>,
    },
    FormSubmitted {
        form_id: Option<String>,
    },
    Manual {},
}

impl Default for TriggerRule {
    fn default() -> Self {
        TriggerRule::Manual {}
    }
}

impl TriggerRule {
    /// Builds a rule from its stored parts. A `null` conditions value is
    /// treated as "no conditions".
    pub fn from_parts(trigger_type: TriggerType, conditions: Value) -> serde_json::Result<Self> {
        let conditions = if conditions.is_null() {
            json!({})
        } else {
            conditions
        };
        serde_json::from_value(json!({
            "trigger_type": trigger_type.as_str(),
            "trigger_conditions": conditions,
        }))
    }

    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerRule::LifecycleChange { .. } => TriggerType::LifecycleChange,
            TriggerRule::TagAdded { .. } => TriggerType::TagAdded,
            TriggerRule::DealCreated { .. } => TriggerType::DealCreated,
            TriggerRule::DealStageChanged { .. } => TriggerType::DealStageChanged,
            TriggerRule::ContactCreated { .. } => TriggerType::ContactCreated,
            TriggerRule::FormSubmitted { .. } => TriggerType::FormSubmitted,
            TriggerRule::Manual {} => TriggerType::Manual,
        }
    }

    /// The conditions object as stored alongside the trigger type.
    pub fn conditions(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("trigger_conditions").map(Value::take))
            .unwrap_or_else(|| json!({}))
    }

    /// Evaluates the rule against an incoming trigger payload.
    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        match self {
            TriggerRule::LifecycleChange {
                from_stage,
                to_stage,
            } => {
                expect_eq(from_stage, data, "previous_stage")
                    && expect_eq(to_stage, data, "new_stage")
            }
            TriggerRule::TagAdded { tags } => {
                tags.is_empty()
                    || text(data, "tag").is_some_and(|tag| tags.iter().any(|t| *t == tag))
            }
            TriggerRule::DealCreated {
                pipeline_id,
                min_value,
            } => {
                let value_ok = match min_value {
                    Some(min) => data
                        .get("value")
                        .and_then(value_number)
                        .is_some_and(|value| value >= *min),
                    None => true,
                };
                value_ok && expect_eq(pipeline_id, data, "pipeline_id")
            }
            TriggerRule::DealStageChanged { pipeline_id, stage } => {
                expect_eq(pipeline_id, data, "pipeline_id") && expect_eq(stage, data, "new_stage")
            }
            TriggerRule::ContactCreated { source } => expect_eq(source, data, "source"),
            TriggerRule::FormSubmitted { form_id } => expect_eq(form_id, data, "form_id"),
            // Manual journeys are only entered through an explicit enroll call
            TriggerRule::Manual {} => false,
        }
    }
}

fn expect_eq(expected: &Option<String>, data: &Map<String, Value>, key: &str) -> bool {
    match expected {
        Some(expected) => text(data, key).is_some_and(|actual| actual == *expected),
        None => true,
    }
}

/// String form of a payload field; numbers and booleans are accepted so
/// numeric ids compare against their configured text.
fn text(data: &Map<String, Value>, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
