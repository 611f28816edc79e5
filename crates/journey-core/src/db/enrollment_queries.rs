//! Enrollment creation, progress updates and processing leases.

use jiff::Timestamp;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::{Map, Value};

use super::{
    execution_queries::INSERT_EXECUTION_SQL,
    utils::{
        format_timestamp, get_id, get_json, get_optional_id, get_optional_timestamp, get_parsed,
        get_timestamp,
    },
};
use crate::{
    error::{DatabaseResultExt, JourneyError, Result},
    models::{Enrollment, EnrollmentStatus, ExecutionStatus, Journey},
};

const ENROLLMENT_COLUMNS: &str = "id, journey_id, contact_id, company_id, current_step_id, status, source, context, steps_completed, emails_sent, started_at, completed_at, updated_at";
const CHECK_ACTIVE_ENROLLMENT_SQL: &str = "SELECT EXISTS(SELECT 1 FROM journey_enrollments WHERE journey_id = ?1 AND contact_id = ?2 AND status = 'active')";
const INSERT_ENROLLMENT_SQL: &str = "INSERT INTO journey_enrollments (journey_id, contact_id, company_id, current_step_id, status, source, context, steps_completed, emails_sent, started_at, updated_at) VALUES (?1, ?2, ?3, ?4, 'active', ?5, ?6, 0, 0, ?7, ?7)";
const INCREMENT_TOTAL_ENROLLED_SQL: &str =
    "UPDATE journeys SET total_enrolled = total_enrolled + 1 WHERE id = ?1";
const UPDATE_PROGRESS_SQL: &str = "UPDATE journey_enrollments SET current_step_id = ?1, context = COALESCE(?2, context), steps_completed = steps_completed + ?3, emails_sent = emails_sent + ?4, status = CASE WHEN ?5 THEN 'completed' ELSE status END, completed_at = CASE WHEN ?5 THEN ?6 ELSE completed_at END, updated_at = ?6 WHERE id = ?7";
const ACQUIRE_LEASE_SQL: &str = "UPDATE journey_enrollments SET lease_token = ?1, lease_expires_at = ?2 WHERE id = ?3 AND (lease_token IS NULL OR lease_expires_at IS NULL OR lease_expires_at <= ?4)";
const RENEW_LEASE_SQL: &str =
    "UPDATE journey_enrollments SET lease_expires_at = ?1 WHERE id = ?2 AND lease_token = ?3";
const CHECK_LEASE_SQL: &str = "SELECT EXISTS(SELECT 1 FROM journey_enrollments WHERE id = ?1 AND lease_token = ?2)";
const RELEASE_LEASE_SQL: &str = "UPDATE journey_enrollments SET lease_token = NULL, lease_expires_at = NULL WHERE id = ?1 AND lease_token = ?2";
const SELECT_STALLED_SQL: &str = "SELECT e.id, (SELECT x.id FROM journey_step_executions x WHERE x.enrollment_id = e.id AND x.step_id = e.current_step_id AND x.status IN ('pending', 'executing') ORDER BY x.id DESC LIMIT 1) FROM journey_enrollments e WHERE e.status = 'active' AND e.current_step_id IS NOT NULL AND (e.lease_token IS NULL OR e.lease_expires_at IS NULL OR e.lease_expires_at <= ?1) AND e.updated_at <= ?2 AND NOT EXISTS (SELECT 1 FROM journey_step_executions x WHERE x.enrollment_id = e.id AND x.step_id = e.current_step_id AND x.status IN ('scheduled', 'failed')) ORDER BY e.updated_at, e.id LIMIT ?3";
const CHECK_ACTIVE_AT_STEP_SQL: &str = "SELECT COUNT(*) FROM journey_enrollments WHERE current_step_id = ?1 AND status = 'active'";

/// Pointer, context and counter changes applied to an enrollment after a
/// step finishes. Counters are deltas.
#[derive(Debug, Default, Clone)]
pub struct EnrollmentProgress<'a> {
    pub current_step_id: Option<u64>,
    /// Replacement context; `None` keeps the stored one
    pub context: Option<&'a Map<String, Value>>,
    pub steps_completed: u64,
    pub emails_sent: u64,
    /// Marks the enrollment completed
    pub completed: bool,
}

/// An active enrollment that nobody is running and that is not waiting on a
/// delay or a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalledEnrollment {
    pub enrollment_id: u64,
    /// Open execution of the current step, if one was created
    pub execution_id: Option<u64>,
}

impl super::Database {
    pub(super) fn build_enrollment_from_row(row: &rusqlite::Row) -> rusqlite::Result<Enrollment> {
        Ok(Enrollment {
            id: get_id(row, 0)?,
            journey_id: get_id(row, 1)?,
            contact_id: get_id(row, 2)?,
            company_id: row.get(3)?,
            current_step_id: get_optional_id(row, 4)?,
            status: get_parsed(row, 5)?,
            source: row.get(6)?,
            context: get_json(row, 7)?,
            steps_completed: row.get::<_, i64>(8)? as u64,
            emails_sent: row.get::<_, i64>(9)? as u64,
            started_at: get_timestamp(row, 10)?,
            completed_at: get_optional_timestamp(row, 11)?,
            updated_at: get_timestamp(row, 12)?,
            executions: Vec::new(),
        })
    }

    /// Creates an enrollment pointed at `entry_step_id` together with its
    /// first pending execution, and bumps the journey's enrollment total.
    ///
    /// The duplicate check and the insert share one `IMMEDIATE` transaction,
    /// so two concurrent enrollments of the same contact cannot both pass.
    pub fn create_enrollment(
        &mut self,
        journey: &Journey,
        contact_id: u64,
        entry_step_id: Option<u64>,
        context: &Map<String, Value>,
        source: &str,
    ) -> Result<Enrollment> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .db_context("Failed to begin transaction")?;

        if !journey.allow_re_enrollment {
            let already_active: bool = tx
                .query_row(
                    CHECK_ACTIVE_ENROLLMENT_SQL,
                    params![journey.id as i64, contact_id as i64],
                    |row| row.get(0),
                )
                .db_context("Failed to check existing enrollments")?;
            if already_active {
                return Err(JourneyError::conflict(format!(
                    "Contact {contact_id} is already enrolled in journey {}",
                    journey.id
                )));
            }
        }

        let now_str = format_timestamp(Timestamp::now());
        tx.execute(
            INSERT_ENROLLMENT_SQL,
            params![
                journey.id as i64,
                contact_id as i64,
                journey.company_id,
                entry_step_id.map(|id| id as i64),
                source,
                serde_json::to_string(context)?,
                now_str
            ],
        )
        .db_context("Failed to insert enrollment")?;
        let id = tx.last_insert_rowid() as u64;

        if let Some(step_id) = entry_step_id {
            tx.execute(
                INSERT_EXECUTION_SQL,
                params![
                    id as i64,
                    step_id as i64,
                    ExecutionStatus::Pending.as_str(),
                    now_str
                ],
            )
            .db_context("Failed to insert first execution")?;
        }

        tx.execute(INCREMENT_TOTAL_ENROLLED_SQL, params![journey.id as i64])
            .db_context("Failed to update enrollment total")?;

        let enrollment = tx
            .query_row(
                &format!("SELECT {ENROLLMENT_COLUMNS} FROM journey_enrollments WHERE id = ?1"),
                params![id as i64],
                Self::build_enrollment_from_row,
            )
            .db_context("Failed to reload enrollment")?;

        tx.commit().db_context("Failed to commit transaction")?;
        Ok(enrollment)
    }

    /// Retrieves an enrollment by ID, without its executions.
    pub fn get_enrollment(&self, id: u64) -> Result<Option<Enrollment>> {
        self.connection
            .query_row(
                &format!("SELECT {ENROLLMENT_COLUMNS} FROM journey_enrollments WHERE id = ?1"),
                params![id as i64],
                Self::build_enrollment_from_row,
            )
            .optional()
            .db_context("Failed to get enrollment")
    }

    /// Lists enrollments filtered by journey, contact and status.
    pub fn list_enrollments(
        &self,
        journey_id: Option<u64>,
        contact_id: Option<u64>,
        status: Option<EnrollmentStatus>,
    ) -> Result<Vec<Enrollment>> {
        let sql = format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM journey_enrollments \
             WHERE (?1 IS NULL OR journey_id = ?1) AND (?2 IS NULL OR contact_id = ?2) \
             AND (?3 IS NULL OR status = ?3) ORDER BY id"
        );
        let mut stmt = self
            .connection
            .prepare(&sql)
            .db_context("Failed to prepare query")?;

        let enrollments = stmt
            .query_map(
                params![
                    journey_id.map(|id| id as i64),
                    contact_id.map(|id| id as i64),
                    status.map(|s| s.as_str())
                ],
                Self::build_enrollment_from_row,
            )
            .db_context("Failed to query enrollments")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .db_context("Failed to fetch enrollments")?;

        Ok(enrollments)
    }

    /// Applies step progress to an enrollment with atomic counter increments.
    pub fn update_enrollment_progress(
        &self,
        enrollment_id: u64,
        progress: &EnrollmentProgress<'_>,
    ) -> Result<()> {
        Self::apply_progress(&self.connection, enrollment_id, progress)
    }

    pub(super) fn apply_progress(
        conn: &Connection,
        enrollment_id: u64,
        progress: &EnrollmentProgress<'_>,
    ) -> Result<()> {
        let context = progress.context.map(serde_json::to_string).transpose()?;
        let rows = conn
            .execute(
                UPDATE_PROGRESS_SQL,
                params![
                    progress.current_step_id.map(|id| id as i64),
                    context,
                    progress.steps_completed as i64,
                    progress.emails_sent as i64,
                    progress.completed,
                    format_timestamp(Timestamp::now()),
                    enrollment_id as i64
                ],
            )
            .db_context("Failed to update enrollment")?;

        if rows == 0 {
            return Err(JourneyError::NotFound {
                entity: "Enrollment",
                id: enrollment_id,
            });
        }
        Ok(())
    }

    /// Takes the processing lease if it is free or expired. Returns false
    /// when another holder owns a live lease.
    pub fn acquire_lease(
        &self,
        enrollment_id: u64,
        token: &str,
        now: Timestamp,
        expires_at: Timestamp,
    ) -> Result<bool> {
        let rows = self
            .connection
            .execute(
                ACQUIRE_LEASE_SQL,
                params![
                    token,
                    format_timestamp(expires_at),
                    enrollment_id as i64,
                    format_timestamp(now)
                ],
            )
            .db_context("Failed to acquire enrollment lease")?;
        Ok(rows > 0)
    }

    /// Pushes the lease expiry out to `expires_at`. Returns false when
    /// `token` no longer holds the lease.
    pub fn renew_lease(&self, enrollment_id: u64, token: &str, expires_at: Timestamp) -> Result<bool> {
        let rows = self
            .connection
            .execute(
                RENEW_LEASE_SQL,
                params![format_timestamp(expires_at), enrollment_id as i64, token],
            )
            .db_context("Failed to renew enrollment lease")?;
        Ok(rows > 0)
    }

    /// Fails with `JourneyError::Conflict` unless `token` holds the
    /// enrollment's lease. Run inside the write transaction it guards.
    pub(super) fn ensure_lease(conn: &Connection, enrollment_id: u64, token: &str) -> Result<()> {
        let held: bool = conn
            .query_row(CHECK_LEASE_SQL, params![enrollment_id as i64, token], |row| {
                row.get(0)
            })
            .db_context("Failed to check enrollment lease")?;
        if held {
            Ok(())
        } else {
            Err(JourneyError::conflict(format!(
                "Enrollment {enrollment_id} lease was taken over by another worker"
            )))
        }
    }

    /// Releases the lease if `token` still holds it.
    pub fn release_lease(&self, enrollment_id: u64, token: &str) -> Result<()> {
        self.connection
            .execute(RELEASE_LEASE_SQL, params![enrollment_id as i64, token])
            .db_context("Failed to release enrollment lease")?;
        Ok(())
    }

    /// Active enrollments left mid-journey: current step set, no live lease,
    /// no scheduled or failed execution at that step, and untouched since
    /// `idle_since`. A caller that stored an enrollment and then failed before
    /// running it leaves one behind.
    pub fn stalled_enrollments(
        &self,
        now: Timestamp,
        idle_since: Timestamp,
        limit: usize,
    ) -> Result<Vec<StalledEnrollment>> {
        let mut stmt = self
            .connection
            .prepare(SELECT_STALLED_SQL)
            .db_context("Failed to prepare query")?;

        let stalled = stmt
            .query_map(
                params![
                    format_timestamp(now),
                    format_timestamp(idle_since),
                    limit as i64
                ],
                |row| {
                    Ok(StalledEnrollment {
                        enrollment_id: get_id(row, 0)?,
                        execution_id: get_optional_id(row, 1)?,
                    })
                },
            )
            .db_context("Failed to query stalled enrollments")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .db_context("Failed to fetch stalled enrollments")?;

        Ok(stalled)
    }

    /// Number of active enrollments currently parked on or headed for a step.
    pub fn count_active_at_step(&self, step_id: u64) -> Result<u64> {
        self.connection
            .query_row(CHECK_ACTIVE_AT_STEP_SQL, params![step_id as i64], |row| {
                row.get::<_, i64>(0)
            })
            .map(|count| count as u64)
            .db_context("Failed to count enrollments at step")
    }
}
