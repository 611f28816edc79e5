//! Result wrapper types for displaying operation outcomes.
//!
//! Create, update and delete results print a one-line confirmation naming
//! the resource followed by the resource itself.

use std::fmt;

use crate::models::{Contact, Journey, JourneyStatus, JourneyStep};

/// Wrapper type for displaying the result of create operations.
///
/// # Examples
///
/// ```rust
/// use journey_core::{
///     display::CreateResult,
///     models::{Journey, JourneyStatus, TriggerRule},
/// };
/// use jiff::Timestamp;
///
/// let journey = Journey {
///     id: 1,
///     company_id: "acme".to_string(),
///     name: "Welcome series".to_string(),
///     description: None,
///     status: JourneyStatus::Draft,
///     trigger: TriggerRule::default(),
///     allow_re_enrollment: false,
///     total_enrolled: 0,
///     created_at: Timestamp::now(),
///     updated_at: Timestamp::now(),
///     steps: vec![],
/// };
///
/// let output = CreateResult::new(journey).to_string();
/// assert!(output.contains("Created journey with ID: 1"));
/// ```
pub struct CreateResult<T> {
    pub resource: T,
}

impl<T> CreateResult<T> {
    /// Create a new CreateResult wrapper.
    pub fn new(resource: T) -> Self {
        Self { resource }
    }
}

impl fmt::Display for CreateResult<Journey> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Created journey with ID: {}", self.resource.id)?;
        writeln!(f)?;
        write!(f, "{}", self.resource)
    }
}

impl fmt::Display for CreateResult<JourneyStep> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Created step with ID: {}", self.resource.id)?;
        writeln!(f)?;
        write!(f, "{}", self.resource)
    }
}

impl fmt::Display for CreateResult<Contact> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Created contact with ID: {}", self.resource.id)?;
        writeln!(f)?;
        write!(f, "{}", self.resource)
    }
}

/// Wrapper type for displaying the result of update operations, optionally
/// listing the changes made.
pub struct UpdateResult<T> {
    pub resource: T,
    pub changes: Vec<String>,
}

impl<T> UpdateResult<T> {
    /// Create a new UpdateResult wrapper.
    pub fn new(resource: T) -> Self {
        Self {
            resource,
            changes: Vec::new(),
        }
    }

    /// Create an UpdateResult with a list of changes made.
    pub fn with_changes(resource: T, changes: Vec<String>) -> Self {
        Self { resource, changes }
    }

    fn fmt_changes(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.changes.is_empty() {
            writeln!(f)?;
            writeln!(f, "Changes made:")?;
            for change in &self.changes {
                writeln!(f, "- {change}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for UpdateResult<Journey> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Updated journey with ID: {}", self.resource.id)?;
        self.fmt_changes(f)?;
        writeln!(f)?;
        write!(f, "{}", self.resource)
    }
}

impl fmt::Display for UpdateResult<JourneyStep> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Updated step with ID: {}", self.resource.id)?;
        self.fmt_changes(f)?;
        writeln!(f)?;
        write!(f, "{}", self.resource)
    }
}

/// Wrapper type for displaying the result of delete operations.
pub struct DeleteResult<T> {
    pub resource: T,
}

impl<T> DeleteResult<T> {
    /// Create a new DeleteResult wrapper.
    pub fn new(resource: T) -> Self {
        Self { resource }
    }
}

impl fmt::Display for DeleteResult<Journey> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Deleted journey '{}' (ID: {})",
            self.resource.name, self.resource.id
        )
    }
}

impl fmt::Display for DeleteResult<JourneyStep> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Deleted step '{}' (ID: {})",
            self.resource.name, self.resource.id
        )
    }
}

/// Confirmation printed after a journey changes status.
pub struct StatusChange {
    pub journey: Journey,
}

impl StatusChange {
    pub fn new(journey: Journey) -> Self {
        Self { journey }
    }
}

impl fmt::Display for StatusChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Journey { id, name, .. } = &self.journey;
        match self.journey.status {
            JourneyStatus::Active => writeln!(f, "Journey '{name}' (ID: {id}) is active."),
            JourneyStatus::Paused => writeln!(
                f,
                "Journey '{name}' (ID: {id}) is paused. Enrolled contacts keep running."
            ),
            JourneyStatus::Draft => writeln!(f, "Journey '{name}' (ID: {id}) is a draft."),
        }
    }
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;

    use super::*;
    use crate::models::TriggerRule;

    fn journey(status: JourneyStatus) -> Journey {
        Journey {
            id: 4,
            company_id: "acme".to_string(),
            name: "Winback".to_string(),
            description: None,
            status,
            trigger: TriggerRule::default(),
            allow_re_enrollment: false,
            total_enrolled: 0,
            created_at: Timestamp::UNIX_EPOCH,
            updated_at: Timestamp::UNIX_EPOCH,
            steps: vec![],
        }
    }

    #[test]
    fn test_status_change_names_new_status() {
        let active = StatusChange::new(journey(JourneyStatus::Active)).to_string();
        assert_eq!(active, "Journey 'Winback' (ID: 4) is active.\n");

        let paused = StatusChange::new(journey(JourneyStatus::Paused)).to_string();
        assert!(paused.contains("is paused"));
        assert!(paused.contains("keep running"));
    }

    #[test]
    fn test_update_result_lists_changes() {
        let output = UpdateResult::with_changes(
            journey(JourneyStatus::Draft),
            vec!["name to 'Winback'".to_string()],
        )
        .to_string();

        assert!(output.starts_with("Updated journey with ID: 4\n"));
        assert!(output.contains("Changes made:\n- name to 'Winback'\n"));
        assert!(output.contains("# 4. Winback"));
    }
}
