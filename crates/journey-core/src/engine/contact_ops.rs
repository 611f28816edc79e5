//! Contact, activity and enrollment queries for the Engine.

use super::Engine;
use crate::{
    error::{JourneyError, Result},
    models::{Activity, Contact, Enrollment, EnrollmentStatus, NewContact},
    params::{CreateContact, Id, ListContacts, ListEnrollments},
};

impl Engine {
    /// Creates a contact. Tags are deduplicated.
    pub async fn create_contact(&self, params: &CreateContact) -> Result<Contact> {
        let request = NewContact::from(params);
        self.with_db(move |db| db.create_contact(&request)).await
    }

    pub async fn get_contact(&self, params: &Id) -> Result<Option<Contact>> {
        let contact_id = params.id;
        self.with_db(move |db| db.get_contact(contact_id)).await
    }

    pub async fn list_contacts(&self, params: &ListContacts) -> Result<Vec<Contact>> {
        let company_id = params.company_id.clone();
        self.with_db(move |db| db.list_contacts(&company_id)).await
    }

    /// Activities recorded for a contact, oldest first.
    pub async fn list_activities(&self, params: &Id) -> Result<Vec<Activity>> {
        let contact_id = params.id;
        self.with_db(move |db| db.list_activities(contact_id)).await
    }

    /// Retrieves an enrollment with its execution history.
    pub async fn get_enrollment(&self, params: &Id) -> Result<Option<Enrollment>> {
        match self.load_enrollment(params.id).await {
            Ok(enrollment) => Ok(Some(enrollment)),
            Err(JourneyError::NotFound {
                entity: "Enrollment",
                ..
            }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn list_enrollments(&self, params: &ListEnrollments) -> Result<Vec<Enrollment>> {
        let journey_id = params.journey_id;
        let contact_id = params.contact_id;
        let status = params
            .status
            .as_deref()
            .map(str::parse::<EnrollmentStatus>)
            .transpose()
            .map_err(|e| JourneyError::invalid_input("status").with_reason(e))?;

        self.with_db(move |db| db.list_enrollments(journey_id, contact_id, status))
            .await
    }
}
