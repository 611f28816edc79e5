//! Journey CRUD operations and queries.

use jiff::Timestamp;
use rusqlite::{params, types::Type, Connection, OptionalExtension};

use super::utils::{format_timestamp, get_id, get_json, get_parsed, get_timestamp};
use crate::{
    error::{DatabaseResultExt, NotFoundExt, Result},
    models::{Journey, JourneyStatus, NewJourney, TriggerRule, TriggerType, UpdateJourneyRequest},
};

const JOURNEY_COLUMNS: &str = "id, company_id, name, description, status, trigger_type, trigger_conditions, allow_re_enrollment, total_enrolled, created_at, updated_at";
const INSERT_JOURNEY_SQL: &str = "INSERT INTO journeys (company_id, name, description, status, trigger_type, trigger_conditions, allow_re_enrollment, total_enrolled, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)";
const UPDATE_JOURNEY_SQL: &str = "UPDATE journeys SET name = ?1, description = ?2, trigger_type = ?3, trigger_conditions = ?4, allow_re_enrollment = ?5, updated_at = ?6 WHERE id = ?7";
const UPDATE_JOURNEY_STATUS_SQL: &str =
    "UPDATE journeys SET status = ?1, updated_at = ?2 WHERE id = ?3";
const DELETE_JOURNEY_SQL: &str = "DELETE FROM journeys WHERE id = ?1";
const TOUCH_JOURNEY_SQL: &str = "UPDATE journeys SET updated_at = ?1 WHERE id = ?2";

impl super::Database {
    /// Helper function to construct a Journey from a database row
    pub(super) fn build_journey_from_row(row: &rusqlite::Row) -> rusqlite::Result<Journey> {
        let trigger_type: TriggerType = get_parsed(row, 5)?;
        let conditions: serde_json::Value = get_json(row, 6)?;
        let trigger = TriggerRule::from_parts(trigger_type, conditions)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

        Ok(Journey {
            id: get_id(row, 0)?,
            company_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            status: get_parsed(row, 4)?,
            trigger,
            allow_re_enrollment: row.get(7)?,
            total_enrolled: row.get::<_, i64>(8)? as u64,
            created_at: get_timestamp(row, 9)?,
            updated_at: get_timestamp(row, 10)?,
            steps: Vec::new(),
        })
    }

    /// Creates a journey in `draft` status.
    pub fn create_journey(&self, request: &NewJourney) -> Result<Journey> {
        let now = Timestamp::now();
        let conditions = serde_json::to_string(&request.trigger.conditions())?;

        self.connection
            .execute(
                INSERT_JOURNEY_SQL,
                params![
                    request.company_id,
                    request.name,
                    request.description,
                    JourneyStatus::Draft.as_str(),
                    request.trigger.trigger_type().as_str(),
                    conditions,
                    request.allow_re_enrollment,
                    format_timestamp(now),
                ],
            )
            .db_context("Failed to insert journey")?;

        Ok(Journey {
            id: self.connection.last_insert_rowid() as u64,
            company_id: request.company_id.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            status: JourneyStatus::Draft,
            trigger: request.trigger.clone(),
            allow_re_enrollment: request.allow_re_enrollment,
            total_enrolled: 0,
            created_at: now,
            updated_at: now,
            steps: Vec::new(),
        })
    }

    /// Retrieves a journey by ID, without its steps.
    pub fn get_journey(&self, id: u64) -> Result<Option<Journey>> {
        self.connection
            .query_row(
                &format!("SELECT {JOURNEY_COLUMNS} FROM journeys WHERE id = ?1"),
                params![id as i64],
                Self::build_journey_from_row,
            )
            .optional()
            .db_context("Failed to get journey")
    }

    /// Lists journeys, optionally filtered by company and status, newest
    /// first.
    pub fn list_journeys(
        &self,
        company_id: Option<&str>,
        status: Option<JourneyStatus>,
    ) -> Result<Vec<Journey>> {
        let sql = format!(
            "SELECT {JOURNEY_COLUMNS} FROM journeys \
             WHERE (?1 IS NULL OR company_id = ?1) AND (?2 IS NULL OR status = ?2) \
             ORDER BY updated_at DESC, id DESC"
        );
        let mut stmt = self
            .connection
            .prepare(&sql)
            .db_context("Failed to prepare query")?;

        let journeys = stmt
            .query_map(
                params![company_id, status.map(|s| s.as_str())],
                Self::build_journey_from_row,
            )
            .db_context("Failed to query journeys")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .db_context("Failed to fetch journeys")?;

        Ok(journeys)
    }

    /// Active journeys of a company listening for the given trigger type.
    pub fn find_triggered_journeys(
        &self,
        company_id: &str,
        trigger_type: TriggerType,
    ) -> Result<Vec<Journey>> {
        let sql = format!(
            "SELECT {JOURNEY_COLUMNS} FROM journeys \
             WHERE company_id = ?1 AND trigger_type = ?2 AND status = 'active' ORDER BY id"
        );
        let mut stmt = self
            .connection
            .prepare(&sql)
            .db_context("Failed to prepare query")?;

        let journeys = stmt
            .query_map(
                params![company_id, trigger_type.as_str()],
                Self::build_journey_from_row,
            )
            .db_context("Failed to query triggered journeys")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .db_context("Failed to fetch triggered journeys")?;

        Ok(journeys)
    }

    /// Applies a partial update and returns the stored journey.
    pub fn update_journey(&mut self, id: u64, request: UpdateJourneyRequest) -> Result<Journey> {
        let tx = self
            .connection
            .transaction()
            .db_context("Failed to begin transaction")?;

        let current = tx
            .query_row(
                &format!("SELECT {JOURNEY_COLUMNS} FROM journeys WHERE id = ?1"),
                params![id as i64],
                Self::build_journey_from_row,
            )
            .or_not_found("Journey", id, "Failed to get current journey")?;

        let name = request.name.unwrap_or(current.name);
        let description = request.description.or(current.description);
        let trigger = request.trigger.unwrap_or(current.trigger);
        let allow_re_enrollment = request
            .allow_re_enrollment
            .unwrap_or(current.allow_re_enrollment);
        let now_str = format_timestamp(Timestamp::now());

        tx.execute(
            UPDATE_JOURNEY_SQL,
            params![
                name,
                description,
                trigger.trigger_type().as_str(),
                serde_json::to_string(&trigger.conditions())?,
                allow_re_enrollment,
                now_str,
                id as i64
            ],
        )
        .db_context("Failed to update journey")?;

        let updated = tx
            .query_row(
                &format!("SELECT {JOURNEY_COLUMNS} FROM journeys WHERE id = ?1"),
                params![id as i64],
                Self::build_journey_from_row,
            )
            .db_context("Failed to reload journey")?;

        tx.commit().db_context("Failed to commit transaction")?;
        Ok(updated)
    }

    /// Sets the journey status. Returns false when the journey is missing.
    pub fn set_journey_status(&self, id: u64, status: JourneyStatus) -> Result<bool> {
        let rows = self
            .connection
            .execute(
                UPDATE_JOURNEY_STATUS_SQL,
                params![
                    status.as_str(),
                    format_timestamp(Timestamp::now()),
                    id as i64
                ],
            )
            .db_context("Failed to update journey status")?;
        Ok(rows > 0)
    }

    /// Deletes a journey with its steps and enrollments.
    pub fn delete_journey(&self, id: u64) -> Result<bool> {
        let rows = self
            .connection
            .execute(DELETE_JOURNEY_SQL, params![id as i64])
            .db_context("Failed to delete journey")?;
        Ok(rows > 0)
    }

    pub(super) fn touch_journey(conn: &Connection, id: u64, now: &str) -> Result<()> {
        conn.execute(TOUCH_JOURNEY_SQL, params![now, id as i64])
            .db_context("Failed to update journey timestamp")?;
        Ok(())
    }
}
