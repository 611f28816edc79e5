//! Trigger event matching.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Engine;
use crate::{
    error::{JourneyError, Result},
    models::EnrollmentStatus,
    params::{CheckTriggers, EnrollContact},
    template::value_text,
};

/// Outcome of enrolling a contact into one matching journey.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerMatch {
    pub journey_id: u64,
    pub journey_name: String,
    pub enrolled: bool,
    pub enrollment_id: Option<u64>,
    pub status: Option<EnrollmentStatus>,
    pub error: Option<String>,
}

impl Engine {
    /// Enrolls the event's contact into every active journey of its company
    /// whose trigger matches the event.
    ///
    /// Per-journey failures (duplicate enrollment, failing first step) are
    /// logged and reported in the returned list.
    ///
    /// # Errors
    ///
    /// Returns `JourneyError::InvalidInput` when the payload lacks
    /// `company_id` or `contact_id`.
    pub async fn check_triggers(&self, params: &CheckTriggers) -> Result<Vec<TriggerMatch>> {
        let data = &params.trigger_data;
        let trigger_type = params.trigger_type;
        let company_id = company_id(data)?;
        let contact_id = contact_id(data)?;

        let company = company_id.clone();
        let journeys = self
            .with_db(move |db| db.find_triggered_journeys(&company, trigger_type))
            .await?;

        let mut matches = Vec::new();
        for journey in journeys.into_iter().filter(|j| j.trigger.matches(data)) {
            let enroll = EnrollContact {
                journey_id: journey.id,
                contact_id,
                context: data.clone(),
                source: Some(format!("trigger:{}", trigger_type.as_str())),
            };

            let result = match self.enroll_contact(&enroll).await {
                Ok(enrollment) => TriggerMatch {
                    journey_id: journey.id,
                    journey_name: journey.name,
                    enrolled: true,
                    enrollment_id: Some(enrollment.id),
                    status: Some(enrollment.status),
                    error: None,
                },
                Err(e) => {
                    log::warn!(
                        "Trigger {} could not enroll contact {contact_id} into journey {}: {e}",
                        trigger_type.as_str(),
                        journey.id
                    );
                    TriggerMatch {
                        journey_id: journey.id,
                        journey_name: journey.name,
                        enrolled: false,
                        enrollment_id: None,
                        status: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            matches.push(result);
        }

        log::info!(
            "Trigger {} for contact {contact_id} in company {company_id} matched {} journeys",
            trigger_type.as_str(),
            matches.len()
        );
        Ok(matches)
    }
}

fn company_id(data: &Map<String, Value>) -> Result<String> {
    match data.get("company_id") {
        Some(value @ (Value::String(_) | Value::Number(_))) => {
            let text = value_text(value);
            if text.trim().is_empty() {
                Err(missing("company_id"))
            } else {
                Ok(text)
            }
        }
        _ => Err(missing("company_id")),
    }
}

fn contact_id(data: &Map<String, Value>) -> Result<u64> {
    let id = match data.get("contact_id") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    id.ok_or_else(|| missing("contact_id"))
}

fn missing(field: &str) -> JourneyError {
    JourneyError::invalid_input(format!("trigger_data.{field}"))
        .with_reason("Trigger data must carry a company and a contact id")
}
