//! Display implementations for domain models and engine reports.
//!
//! All output is markdown: journeys and enrollments render as `#` documents,
//! steps and executions as `###` sections, list items as `##` summaries.

use std::fmt;

use jiff::{tz::TimeZone, Timestamp};

use crate::{
    engine::{SweepItem, SweepReport, TriggerMatch},
    models::{
        Activity, Contact, Enrollment, EnrollmentStatus, ExecutionStatus, Journey, JourneyStatus,
        JourneyStep, StepExecution, StepKind, TriggerType,
    },
    template::value_text,
    validator::ValidationReport,
};

/// Timestamp shown in the system timezone as `YYYY-MM-DD HH:MM:SS TZ`.
pub struct LocalDateTime<'a>(pub &'a Timestamp);

impl fmt::Display for LocalDateTime<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let zoned = self.0.to_zoned(TimeZone::system());
        write!(f, "{}", zoned.strftime("%Y-%m-%d %H:%M:%S %Z"))
    }
}

impl fmt::Display for JourneyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn fmt_trigger(journey: &Journey) -> String {
    let conditions = journey.trigger.conditions();
    let has_conditions = conditions
        .as_object()
        .is_some_and(|c| c.values().any(|v| !v.is_null() && v != &serde_json::json!([])));
    if has_conditions {
        format!("{} {conditions}", journey.trigger.trigger_type())
    } else {
        journey.trigger.trigger_type().to_string()
    }
}

impl fmt::Display for Journey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# {}. {}", self.id, self.name)?;
        writeln!(f)?;

        writeln!(f, "- Company: {}", self.company_id)?;
        writeln!(f, "- Status: {}", self.status)?;
        writeln!(f, "- Trigger: {}", fmt_trigger(self))?;
        if self.allow_re_enrollment {
            writeln!(f, "- Re-enrollment: allowed")?;
        }
        writeln!(f, "- Enrolled: {}", self.total_enrolled)?;
        writeln!(f, "- Created: {}", LocalDateTime(&self.created_at))?;
        writeln!(f, "- Updated: {}", LocalDateTime(&self.updated_at))?;

        if let Some(desc) = &self.description {
            writeln!(f)?;
            writeln!(f, "{desc}")?;
        }

        if self.steps.is_empty() {
            writeln!(f, "\nNo steps in this journey.")?;
        } else {
            writeln!(f, "\n## Steps")?;
            writeln!(f)?;
            for step in &self.steps {
                write!(f, "{step}")?;
            }
        }

        Ok(())
    }
}

pub(crate) fn fmt_journey_summary(journey: &Journey, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "## {} (ID: {})", journey.name, journey.id)?;
    writeln!(f)?;
    writeln!(f, "- **Status**: {}", journey.status)?;
    writeln!(f, "- **Company**: {}", journey.company_id)?;
    writeln!(f, "- **Trigger**: {}", fmt_trigger(journey))?;
    writeln!(f, "- **Enrolled**: {}", journey.total_enrolled)?;
    if let Some(desc) = &journey.description {
        writeln!(f, "- **Description**: {desc}")?;
    }
    writeln!(f)
}

fn fmt_target(target: Option<u64>) -> String {
    target.map_or_else(|| "end".to_string(), |id| format!("step {id}"))
}

impl JourneyStep {
    fn fmt_config(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StepKind::SendEmail { subject, .. } => writeln!(f, "- Subject: {subject}"),
            StepKind::Delay { amount, unit } => {
                writeln!(f, "- Wait: {amount} {}", unit.as_str())
            }
            StepKind::Condition { conditions } => {
                for predicate in conditions {
                    let operator = serde_json::to_value(predicate.operator)
                        .map(|v| value_text(&v))
                        .unwrap_or_default();
                    if predicate.value.is_null() {
                        writeln!(f, "- If: `{}` {operator}", predicate.field)?;
                    } else {
                        writeln!(
                            f,
                            "- If: `{}` {operator} {}",
                            predicate.field,
                            value_text(&predicate.value)
                        )?;
                    }
                }
                writeln!(f, "- True: {}", fmt_target(self.condition_true_step_id))?;
                writeln!(f, "- False: {}", fmt_target(self.condition_false_step_id))
            }
            StepKind::AiDecision { prompt, options } => {
                writeln!(f, "- Prompt: {prompt}")?;
                for option in options {
                    writeln!(f, "- Option `{}`: {}", option.key, fmt_target(option.step_id))?;
                }
                Ok(())
            }
            StepKind::UpdateContact { fields } => {
                for (key, value) in fields {
                    writeln!(f, "- Set `{key}`: {}", value_text(value))?;
                }
                Ok(())
            }
            StepKind::AddTag { tags } => writeln!(f, "- Add tags: {}", tags.join(", ")),
            StepKind::RemoveTag { tags } => writeln!(f, "- Remove tags: {}", tags.join(", ")),
            StepKind::CreateActivity {
                activity_type,
                subject,
                ..
            } => writeln!(f, "- Activity: {activity_type}: {subject}"),
            StepKind::Exit { reason } => match reason {
                Some(reason) => writeln!(f, "- Reason: {reason}"),
                None => Ok(()),
            },
        }
    }
}

impl fmt::Display for JourneyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "### {}. {} (`{}`, ID: {})",
            self.position,
            self.name,
            self.kind.step_type(),
            self.id
        )?;
        writeln!(f)?;

        self.fmt_config(f)?;
        if !self.kind.is_branching() && !matches!(self.kind, StepKind::Exit { .. }) {
            writeln!(f, "- Next: {}", fmt_target(self.next_step_id))?;
        }
        if self.total_executions > 0 {
            writeln!(
                f,
                "- Runs: {} ({} ok, {} failed)",
                self.total_executions, self.successful_executions, self.failed_executions
            )?;
        }
        writeln!(f)
    }
}

impl fmt::Display for Enrollment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Enrollment {}", self.id)?;
        writeln!(f)?;
        fmt_enrollment_fields(self, f)?;

        if !self.context.is_empty() {
            writeln!(f, "\n## Context")?;
            writeln!(f)?;
            for (key, value) in &self.context {
                writeln!(f, "- `{key}`: {}", value_text(value))?;
            }
        }

        if !self.executions.is_empty() {
            writeln!(f, "\n## Executions")?;
            writeln!(f)?;
            for execution in &self.executions {
                write!(f, "{execution}")?;
            }
        }
        Ok(())
    }
}

fn fmt_enrollment_fields(enrollment: &Enrollment, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "- Status: {}", enrollment.status.with_icon())?;
    writeln!(f, "- Journey: {}", enrollment.journey_id)?;
    writeln!(f, "- Contact: {}", enrollment.contact_id)?;
    match (enrollment.status, enrollment.current_step_id) {
        (EnrollmentStatus::Active, Some(step_id)) => writeln!(f, "- Current step: {step_id}")?,
        (EnrollmentStatus::Active, None) => writeln!(f, "- Current step: none")?,
        _ => {}
    }
    writeln!(f, "- Source: {}", enrollment.source)?;
    writeln!(
        f,
        "- Progress: {} steps, {} emails",
        enrollment.steps_completed, enrollment.emails_sent
    )?;
    writeln!(f, "- Started: {}", LocalDateTime(&enrollment.started_at))?;
    if let Some(completed_at) = &enrollment.completed_at {
        writeln!(f, "- Completed: {}", LocalDateTime(completed_at))?;
    }
    Ok(())
}

pub(crate) fn fmt_enrollment_summary(
    enrollment: &Enrollment,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    writeln!(f, "## Enrollment {}", enrollment.id)?;
    writeln!(f)?;
    fmt_enrollment_fields(enrollment, f)?;
    writeln!(f)
}

impl fmt::Display for StepExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "### Step {} ({})",
            self.step_id,
            self.status.with_icon()
        )?;
        writeln!(f)?;
        writeln!(f, "- Execution: {}", self.id)?;
        if let Some(scheduled_for) = &self.scheduled_for {
            writeln!(f, "- Scheduled for: {}", LocalDateTime(scheduled_for))?;
        }
        if let Some(executed_at) = &self.executed_at {
            writeln!(f, "- Executed: {}", LocalDateTime(executed_at))?;
        }
        if self.retry_count > 0 {
            writeln!(f, "- Retries: {}", self.retry_count)?;
        }
        if let Some(error) = &self.error_message {
            writeln!(f, "- Error: {error}")?;
        }
        if let Some(result) = &self.result {
            writeln!(f, "- Result: `{result}`")?;
        }
        writeln!(f)
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "## {} (ID: {})", self.display_name(), self.id)?;
        writeln!(f)?;
        writeln!(f, "- **Company**: {}", self.company_id)?;
        if let Some(email) = &self.email {
            writeln!(f, "- **Email**: {email}")?;
        }
        if let Some(stage) = &self.lifecycle_stage {
            writeln!(f, "- **Lifecycle stage**: {stage}")?;
        }
        if let Some(score) = self.lead_score {
            writeln!(f, "- **Lead score**: {score}")?;
        }
        if !self.ai_tags.is_empty() {
            writeln!(f, "- **Tags**: {}", self.ai_tags.join(", "))?;
        }
        for (key, value) in &self.custom_fields {
            writeln!(f, "- **{key}**: {}", value_text(value))?;
        }
        writeln!(f)
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "- {} **{}**: {}",
            LocalDateTime(&self.created_at),
            self.activity_type,
            self.subject
        )?;
        if let Some(description) = &self.description {
            writeln!(f, "  {description}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid {
            writeln!(f, "Journey is valid.")?;
        } else {
            writeln!(f, "Journey is not valid.")?;
        }

        if !self.errors.is_empty() {
            writeln!(f, "\n## Errors")?;
            writeln!(f)?;
            for error in &self.errors {
                writeln!(f, "- {error}")?;
            }
        }
        if !self.warnings.is_empty() {
            writeln!(f, "\n## Warnings")?;
            writeln!(f)?;
            for warning in &self.warnings {
                writeln!(f, "- {warning}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for SweepItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.execution_id {
            Some(id) => write!(f, "- Execution {id} (enrollment {}): ", self.enrollment_id)?,
            None => write!(f, "- Enrollment {}: ", self.enrollment_id)?,
        }
        match (&self.status, &self.error) {
            (Some(status), _) if self.success => writeln!(f, "{}", status.with_icon()),
            (_, error) => writeln!(f, "✗ {}", error.as_deref().unwrap_or("failed")),
        }
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Resumed {} enrollments ({} succeeded, {} failed)",
            self.processed, self.succeeded, self.failed
        )?;
        if !self.items.is_empty() {
            writeln!(f)?;
            for item in &self.items {
                write!(f, "{item}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for TriggerMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.enrollment_id, self.status) {
            (Some(enrollment_id), Some(status)) if self.enrolled => writeln!(
                f,
                "- {} (ID: {}): enrollment {enrollment_id}, {}",
                self.journey_name,
                self.journey_id,
                status.with_icon()
            ),
            _ => writeln!(
                f,
                "- {} (ID: {}): not enrolled, {}",
                self.journey_name,
                self.journey_id,
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
