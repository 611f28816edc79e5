//! Contact and activity queries.

use jiff::Timestamp;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::{Map, Value};

use super::utils::{format_timestamp, get_id, get_json, get_timestamp};
use crate::{
    error::{DatabaseResultExt, JourneyError, Result},
    models::{Activity, Contact, NewActivity, NewContact},
};

const CONTACT_COLUMNS: &str = "id, company_id, email, first_name, last_name, phone, company_name, lifecycle_stage, lead_score, ai_tags, custom_fields, created_at, updated_at";
const INSERT_CONTACT_SQL: &str = "INSERT INTO contacts (company_id, email, first_name, last_name, lifecycle_stage, ai_tags, custom_fields, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)";
const UPDATE_CONTACT_SQL: &str = "UPDATE contacts SET email = ?1, first_name = ?2, last_name = ?3, phone = ?4, company_name = ?5, lifecycle_stage = ?6, lead_score = ?7, ai_tags = ?8, custom_fields = ?9, updated_at = ?10 WHERE id = ?11";
const INSERT_ACTIVITY_SQL: &str = "INSERT INTO activities (company_id, contact_id, activity_type, subject, description, ai_generated, created_at) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)";
const SELECT_ACTIVITIES_SQL: &str = "SELECT id, company_id, contact_id, activity_type, subject, description, ai_generated, created_at FROM activities WHERE contact_id = ?1 ORDER BY id";

impl super::Database {
    fn build_contact_from_row(row: &rusqlite::Row) -> rusqlite::Result<Contact> {
        Ok(Contact {
            id: get_id(row, 0)?,
            company_id: row.get(1)?,
            email: row.get(2)?,
            first_name: row.get(3)?,
            last_name: row.get(4)?,
            phone: row.get(5)?,
            company_name: row.get(6)?,
            lifecycle_stage: row.get(7)?,
            lead_score: row.get(8)?,
            ai_tags: get_json(row, 9)?,
            custom_fields: get_json(row, 10)?,
            created_at: get_timestamp(row, 11)?,
            updated_at: get_timestamp(row, 12)?,
        })
    }

    fn build_activity_from_row(row: &rusqlite::Row) -> rusqlite::Result<Activity> {
        Ok(Activity {
            id: get_id(row, 0)?,
            company_id: row.get(1)?,
            contact_id: get_id(row, 2)?,
            activity_type: row.get(3)?,
            subject: row.get(4)?,
            description: row.get(5)?,
            ai_generated: row.get(6)?,
            created_at: get_timestamp(row, 7)?,
        })
    }

    /// Creates a contact. Tags are deduplicated on the way in.
    pub fn create_contact(&self, request: &NewContact) -> Result<Contact> {
        if request.company_id.trim().is_empty() {
            return Err(JourneyError::invalid_input("company_id").with_reason("Company is required"));
        }

        let now = Timestamp::now();
        let mut contact = Contact {
            id: 0,
            company_id: request.company_id.clone(),
            email: request.email.clone(),
            first_name: request.first_name.clone(),
            last_name: request.last_name.clone(),
            phone: None,
            company_name: None,
            lifecycle_stage: request.lifecycle_stage.clone(),
            lead_score: None,
            ai_tags: Vec::new(),
            custom_fields: request.custom_fields.clone(),
            created_at: now,
            updated_at: now,
        };
        contact.add_tags(&request.tags);

        self.connection
            .execute(
                INSERT_CONTACT_SQL,
                params![
                    contact.company_id,
                    contact.email,
                    contact.first_name,
                    contact.last_name,
                    contact.lifecycle_stage,
                    serde_json::to_string(&contact.ai_tags)?,
                    serde_json::to_string(&contact.custom_fields)?,
                    format_timestamp(now),
                ],
            )
            .db_context("Failed to insert contact")?;

        contact.id = self.connection.last_insert_rowid() as u64;
        Ok(contact)
    }

    /// Retrieves a contact by ID.
    pub fn get_contact(&self, id: u64) -> Result<Option<Contact>> {
        self.connection
            .query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                params![id as i64],
                Self::build_contact_from_row,
            )
            .optional()
            .db_context("Failed to get contact")
    }

    /// Lists a company's contacts by ID.
    pub fn list_contacts(&self, company_id: &str) -> Result<Vec<Contact>> {
        let mut stmt = self
            .connection
            .prepare(&format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts WHERE company_id = ?1 ORDER BY id"
            ))
            .db_context("Failed to prepare query")?;

        let contacts = stmt
            .query_map(params![company_id], Self::build_contact_from_row)
            .db_context("Failed to query contacts")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .db_context("Failed to fetch contacts")?;

        Ok(contacts)
    }

    /// Set-union of `tags` into the stored contact's tags. Returns the
    /// updated contact and the tags that were actually added.
    pub fn add_contact_tags(&mut self, id: u64, tags: &[String]) -> Result<(Contact, Vec<String>)> {
        self.modify_contact(id, |contact| {
            let added = contact.add_tags(tags);
            Ok((!added.is_empty(), added))
        })
    }

    /// Set-difference of `tags` from the stored contact's tags. Returns the
    /// updated contact and the tags that were actually removed.
    pub fn remove_contact_tags(
        &mut self,
        id: u64,
        tags: &[String],
    ) -> Result<(Contact, Vec<String>)> {
        self.modify_contact(id, |contact| {
            let removed = contact.remove_tags(tags);
            Ok((!removed.is_empty(), removed))
        })
    }

    /// Applies field updates to the stored contact. Unknown keys land in
    /// `custom_fields`.
    pub fn update_contact_fields(&mut self, id: u64, fields: &Map<String, Value>) -> Result<Contact> {
        self.modify_contact(id, |contact| {
            contact
                .apply_updates(fields)
                .map_err(|reason| JourneyError::invalid_input("fields").with_reason(reason))?;
            Ok((true, ()))
        })
        .map(|(contact, ())| contact)
    }

    /// Re-reads the contact and applies `change` inside one `IMMEDIATE`
    /// transaction, so concurrent changes to the same contact serialize
    /// instead of overwriting each other. `change` reports whether it
    /// modified anything; untouched contacts are not written.
    fn modify_contact<T>(
        &mut self,
        id: u64,
        change: impl FnOnce(&mut Contact) -> Result<(bool, T)>,
    ) -> Result<(Contact, T)> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .db_context("Failed to begin transaction")?;

        let mut contact = tx
            .query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                params![id as i64],
                Self::build_contact_from_row,
            )
            .optional()
            .db_context("Failed to get contact")?
            .ok_or(JourneyError::NotFound {
                entity: "Contact",
                id,
            })?;

        let (changed, outcome) = change(&mut contact)?;
        if changed {
            contact.updated_at = Timestamp::now();
            Self::write_contact(&tx, &contact)?;
        }

        tx.commit().db_context("Failed to commit transaction")?;
        Ok((contact, outcome))
    }

    fn write_contact(conn: &Connection, contact: &Contact) -> Result<()> {
        conn.execute(
            UPDATE_CONTACT_SQL,
            params![
                contact.email,
                contact.first_name,
                contact.last_name,
                contact.phone,
                contact.company_name,
                contact.lifecycle_stage,
                contact.lead_score,
                serde_json::to_string(&contact.ai_tags)?,
                serde_json::to_string(&contact.custom_fields)?,
                format_timestamp(contact.updated_at),
                contact.id as i64
            ],
        )
        .db_context("Failed to update contact")?;
        Ok(())
    }

    /// Records an activity generated by a journey step.
    pub fn create_activity(&self, request: &NewActivity) -> Result<Activity> {
        let now = Timestamp::now();
        self.connection
            .execute(
                INSERT_ACTIVITY_SQL,
                params![
                    request.company_id,
                    request.contact_id as i64,
                    request.activity_type,
                    request.subject,
                    request.description,
                    format_timestamp(now),
                ],
            )
            .db_context("Failed to insert activity")?;

        Ok(Activity {
            id: self.connection.last_insert_rowid() as u64,
            company_id: request.company_id.clone(),
            contact_id: request.contact_id,
            activity_type: request.activity_type.clone(),
            subject: request.subject.clone(),
            description: request.description.clone(),
            ai_generated: true,
            created_at: now,
        })
    }

    /// Activities recorded for a contact, oldest first.
    pub fn list_activities(&self, contact_id: u64) -> Result<Vec<Activity>> {
        let mut stmt = self
            .connection
            .prepare(SELECT_ACTIVITIES_SQL)
            .db_context("Failed to prepare query")?;

        let activities = stmt
            .query_map(params![contact_id as i64], Self::build_activity_from_row)
            .db_context("Failed to query activities")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .db_context("Failed to fetch activities")?;

        Ok(activities)
    }
}
