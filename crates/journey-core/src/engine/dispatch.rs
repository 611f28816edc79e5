//! Per-step-type effects.
//!
//! Dispatch receives an immutable snapshot of the step, the contact and the
//! enrollment context, performs the step's side effect and returns a
//! [`StepOutcome`]. It never touches the enrollment or execution rows; the
//! runner records the outcome.

use jiff::Timestamp;
use serde_json::{json, Map, Value};

use super::Engine;
use crate::{
    collaborators::{ChatMessage, EmailMessage},
    conditions,
    error::{JourneyError, Result},
    models::{Contact, DecisionOption, DelayUnit, JourneyStep, NewActivity, StepKind},
    template::{render, FieldView},
};

/// Snapshot a step runs against.
#[derive(Debug, Clone, Copy)]
pub(super) struct StepInput<'a> {
    pub step: &'a JourneyStep,
    pub contact: &'a Contact,
    pub context: &'a Map<String, Value>,
    pub now: Timestamp,
}

/// Where the enrollment goes after a step.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Transition {
    /// Move to the given step; `None` completes the enrollment
    Advance(Option<u64>),
    /// Wait for the sweep
    Park { until: Timestamp },
    /// Complete the enrollment
    Exit,
}

#[derive(Debug, Clone)]
pub(super) struct StepOutcome {
    pub result: Value,
    pub transition: Transition,
    /// Keys merged into the enrollment context
    pub context: Map<String, Value>,
    pub email_message_id: Option<String>,
    pub emails_sent: u64,
}

impl StepOutcome {
    fn advance(result: Value, next: Option<u64>) -> Self {
        Self {
            result,
            transition: Transition::Advance(next),
            context: Map::new(),
            email_message_id: None,
            emails_sent: 0,
        }
    }
}

impl Engine {
    pub(super) async fn dispatch(&self, input: StepInput<'_>) -> Result<StepOutcome> {
        let StepInput {
            step,
            contact,
            context,
            now,
        } = input;
        let fields = contact.fields();
        let view = FieldView::new(&fields, context);

        match &step.kind {
            StepKind::SendEmail { subject, body } => {
                self.send_email(step, contact, render(subject, view), render(body, view))
                    .await
            }
            StepKind::Delay { amount, unit } => park(*amount, *unit, now),
            StepKind::Condition { conditions } => {
                let outcome = conditions::evaluate(conditions, &fields);
                let next = if outcome.passed {
                    step.condition_true_step_id
                } else {
                    step.condition_false_step_id
                };
                log::debug!(
                    "Condition step {} evaluated to {} for contact {}",
                    step.id,
                    outcome.passed,
                    contact.id
                );
                Ok(StepOutcome::advance(serde_json::to_value(&outcome)?, next))
            }
            StepKind::AiDecision { prompt, options } => {
                self.decide(step, options, render(prompt, view)).await
            }
            StepKind::UpdateContact { fields: updates } => {
                let rendered: Map<String, Value> = updates
                    .iter()
                    .map(|(key, value)| {
                        let value = match value {
                            Value::String(s) => Value::String(render(s, view)),
                            other => other.clone(),
                        };
                        (key.clone(), value)
                    })
                    .collect();

                let contact_id = contact.id;
                let keys: Vec<String> = rendered.keys().cloned().collect();
                self.with_db(move |db| db.update_contact_fields(contact_id, &rendered))
                    .await?;

                Ok(StepOutcome::advance(
                    json!({ "updated_fields": keys }),
                    step.next_step_id,
                ))
            }
            StepKind::AddTag { tags } => {
                let (contact_id, tags) = (contact.id, tags.clone());
                let (updated, added) = self
                    .with_db(move |db| db.add_contact_tags(contact_id, &tags))
                    .await?;
                Ok(StepOutcome::advance(
                    json!({ "added": added, "tags": updated.ai_tags }),
                    step.next_step_id,
                ))
            }
            StepKind::RemoveTag { tags } => {
                let (contact_id, tags) = (contact.id, tags.clone());
                let (updated, removed) = self
                    .with_db(move |db| db.remove_contact_tags(contact_id, &tags))
                    .await?;
                Ok(StepOutcome::advance(
                    json!({ "removed": removed, "tags": updated.ai_tags }),
                    step.next_step_id,
                ))
            }
            StepKind::CreateActivity {
                activity_type,
                subject,
                description,
            } => {
                let request = NewActivity {
                    company_id: contact.company_id.clone(),
                    contact_id: contact.id,
                    activity_type: activity_type.clone(),
                    subject: render(subject, view),
                    description: description.as_deref().map(|d| render(d, view)),
                };
                let activity = self.with_db(move |db| db.create_activity(&request)).await?;
                Ok(StepOutcome::advance(
                    json!({ "activity_id": activity.id, "activity_type": activity.activity_type }),
                    step.next_step_id,
                ))
            }
            StepKind::Exit { reason } => Ok(StepOutcome {
                result: json!({ "reason": reason }),
                transition: Transition::Exit,
                context: Map::new(),
                email_message_id: None,
                emails_sent: 0,
            }),
        }
    }

    async fn send_email(
        &self,
        step: &JourneyStep,
        contact: &Contact,
        subject: String,
        html_content: String,
    ) -> Result<StepOutcome> {
        let to = contact
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .ok_or_else(|| {
                JourneyError::invalid_input("email")
                    .with_reason(format!("Contact {} has no email address", contact.id))
            })?;

        let message = EmailMessage {
            to: to.to_string(),
            subject,
            html_content,
            recipient_name: contact.display_name(),
        };
        let message_id = self.email.send(&message).await?;
        log::debug!(
            "Sent email '{}' to contact {} ({message_id})",
            message.subject,
            contact.id
        );

        Ok(StepOutcome {
            result: json!({
                "message_id": message_id,
                "to": message.to,
                "subject": message.subject,
            }),
            transition: Transition::Advance(step.next_step_id),
            context: Map::new(),
            email_message_id: Some(message_id),
            emails_sent: 1,
        })
    }

    /// Asks the completion provider to pick an option. Provider failures and
    /// unknown answers fall back to the first option.
    async fn decide(
        &self,
        step: &JourneyStep,
        options: &[DecisionOption],
        prompt: String,
    ) -> Result<StepOutcome> {
        let first = options.first().ok_or_else(|| {
            JourneyError::invalid_input("options")
                .with_reason(format!("AI decision step {} has no options", step.id))
        })?;
        let keys: Vec<&str> = options.iter().map(|o| o.key.as_str()).collect();
        let messages = [
            ChatMessage::system(format!(
                "You route contacts through a marketing journey. Reply with exactly one of \
                 these options and nothing else: {}",
                keys.join(", ")
            )),
            ChatMessage::user(prompt),
        ];

        let (chosen, response, error) = match self.ai.complete(&messages).await {
            Ok(answer) => match match_option(options, &answer) {
                Some(option) => (option, Some(answer), None),
                None => {
                    let error = format!("Unrecognised answer '{answer}'");
                    (first, Some(answer), Some(error))
                }
            },
            Err(e) => (first, None, Some(e.to_string())),
        };

        if let Some(error) = &error {
            log::warn!(
                "AI decision step {} fell back to option '{}': {error}",
                step.id,
                first.key
            );
        }

        let mut context = Map::new();
        context.insert("ai_decision".into(), Value::from(chosen.key.clone()));

        Ok(StepOutcome {
            result: json!({
                "decision": chosen.key,
                "response": response,
                "fallback": error.is_some(),
                "error": error,
            }),
            transition: Transition::Advance(chosen.step_id),
            context,
            email_message_id: None,
            emails_sent: 0,
        })
    }
}

fn park(amount: u32, unit: DelayUnit, now: Timestamp) -> Result<StepOutcome> {
    if amount == 0 {
        return Err(JourneyError::invalid_input("amount").with_reason("Delay must be positive"));
    }
    let until = now.checked_add(unit.duration(amount)).map_err(|e| {
        JourneyError::invalid_input("amount").with_reason(format!("Delay out of range: {e}"))
    })?;

    Ok(StepOutcome {
        result: json!({
            "amount": amount,
            "unit": unit.as_str(),
            "scheduled_for": until.to_string(),
        }),
        transition: Transition::Park { until },
        context: Map::new(),
        email_message_id: None,
        emails_sent: 0,
    })
}

/// Matches a completion answer against option keys, ignoring case, quotes
/// and trailing punctuation.
fn match_option<'a>(options: &'a [DecisionOption], answer: &str) -> Option<&'a DecisionOption> {
    let normalized = answer
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.' | '!') || c.is_whitespace())
        .to_lowercase();
    options
        .iter()
        .find(|option| option.key.to_lowercase() == normalized)
}
