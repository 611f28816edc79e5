//! Step execution bookkeeping.
//!
//! Every state change of an execution row that has knock-on effects (step
//! counters, enrollment progress) happens in one transaction here. Writes
//! made on behalf of a running enrollment take the caller's lease token and
//! are refused once another worker has taken the lease over.

use jiff::Timestamp;
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::Value;

use super::{
    enrollment_queries::EnrollmentProgress,
    utils::{
        format_timestamp, get_id, get_optional_json, get_optional_timestamp, get_parsed,
        get_timestamp,
    },
};
use crate::{
    error::{DatabaseResultExt, JourneyError, Result},
    models::{ExecutionStatus, StepExecution},
};

const EXECUTION_COLUMNS: &str = "id, enrollment_id, step_id, status, scheduled_for, result, error_message, retry_count, email_message_id, executed_at, created_at, updated_at";
pub(super) const INSERT_EXECUTION_SQL: &str = "INSERT INTO journey_step_executions (enrollment_id, step_id, status, retry_count, created_at, updated_at) VALUES (?1, ?2, ?3, 0, ?4, ?4)";
const SELECT_OPEN_EXECUTION_SQL: &str = "SELECT id, enrollment_id, step_id, status, scheduled_for, result, error_message, retry_count, email_message_id, executed_at, created_at, updated_at FROM journey_step_executions WHERE enrollment_id = ?1 AND step_id = ?2 AND status IN ('pending', 'executing', 'failed', 'scheduled') ORDER BY id DESC LIMIT 1";
const MARK_EXECUTING_SQL: &str =
    "UPDATE journey_step_executions SET status = 'executing', updated_at = ?1 WHERE id = ?2";
const MARK_EXECUTED_SQL: &str = "UPDATE journey_step_executions SET status = 'executed', result = COALESCE(?1, result), email_message_id = COALESCE(?2, email_message_id), error_message = NULL, executed_at = ?3, updated_at = ?3 WHERE id = ?4";
const MARK_SCHEDULED_SQL: &str = "UPDATE journey_step_executions SET status = 'scheduled', scheduled_for = ?1, result = ?2, error_message = NULL, updated_at = ?3 WHERE id = ?4";
const MARK_FAILED_SQL: &str = "UPDATE journey_step_executions SET status = 'failed', error_message = ?1, retry_count = retry_count + 1, updated_at = ?2 WHERE id = ?3";
const RESUME_SCHEDULED_SQL: &str = "UPDATE journey_step_executions SET status = 'executed', executed_at = ?1, updated_at = ?1 WHERE id = ?2 AND status = 'scheduled'";
const SELECT_DUE_SQL: &str = "SELECT x.id, x.enrollment_id, x.step_id, x.status, x.scheduled_for, x.result, x.error_message, x.retry_count, x.email_message_id, x.executed_at, x.created_at, x.updated_at FROM journey_step_executions x JOIN journey_enrollments e ON e.id = x.enrollment_id WHERE x.status = 'scheduled' AND x.scheduled_for <= ?1 AND e.status = 'active' ORDER BY x.scheduled_for, x.id LIMIT ?2";

/// What a successful step writes to its execution row.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRecord<'a> {
    pub result: Option<&'a Value>,
    pub email_message_id: Option<&'a str>,
}

impl super::Database {
    fn build_execution_from_row(row: &rusqlite::Row) -> rusqlite::Result<StepExecution> {
        Ok(StepExecution {
            id: get_id(row, 0)?,
            enrollment_id: get_id(row, 1)?,
            step_id: get_id(row, 2)?,
            status: get_parsed(row, 3)?,
            scheduled_for: get_optional_timestamp(row, 4)?,
            result: get_optional_json(row, 5)?,
            error_message: row.get(6)?,
            retry_count: row.get::<_, i64>(7)? as u32,
            email_message_id: row.get(8)?,
            executed_at: get_optional_timestamp(row, 9)?,
            created_at: get_timestamp(row, 10)?,
            updated_at: get_timestamp(row, 11)?,
        })
    }

    /// Execution history of an enrollment, oldest first.
    pub fn get_executions(&self, enrollment_id: u64) -> Result<Vec<StepExecution>> {
        let mut stmt = self
            .connection
            .prepare(&format!(
                "SELECT {EXECUTION_COLUMNS} FROM journey_step_executions WHERE enrollment_id = ?1 ORDER BY id"
            ))
            .db_context("Failed to prepare query")?;

        let executions = stmt
            .query_map(params![enrollment_id as i64], Self::build_execution_from_row)
            .db_context("Failed to query executions")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .db_context("Failed to fetch executions")?;

        Ok(executions)
    }

    /// Retrieves a single execution by its ID.
    pub fn get_execution(&self, id: u64) -> Result<Option<StepExecution>> {
        self.connection
            .query_row(
                &format!("SELECT {EXECUTION_COLUMNS} FROM journey_step_executions WHERE id = ?1"),
                params![id as i64],
                Self::build_execution_from_row,
            )
            .optional()
            .db_context("Failed to get execution")
    }

    /// The latest unfinished execution of `step_id` for an enrollment, if any.
    pub fn find_open_execution(
        &self,
        enrollment_id: u64,
        step_id: u64,
    ) -> Result<Option<StepExecution>> {
        self.connection
            .query_row(
                SELECT_OPEN_EXECUTION_SQL,
                params![enrollment_id as i64, step_id as i64],
                Self::build_execution_from_row,
            )
            .optional()
            .db_context("Failed to find open execution")
    }

    /// Inserts a pending execution.
    pub fn create_execution(&self, enrollment_id: u64, step_id: u64) -> Result<StepExecution> {
        let now_str = format_timestamp(Timestamp::now());
        self.connection
            .execute(
                INSERT_EXECUTION_SQL,
                params![
                    enrollment_id as i64,
                    step_id as i64,
                    ExecutionStatus::Pending.as_str(),
                    now_str
                ],
            )
            .db_context("Failed to insert execution")?;

        let id = self.connection.last_insert_rowid() as u64;
        self.get_execution(id)?.ok_or(JourneyError::NotFound {
            entity: "Execution",
            id,
        })
    }

    pub fn mark_executing(&self, execution_id: u64) -> Result<()> {
        self.connection
            .execute(
                MARK_EXECUTING_SQL,
                params![format_timestamp(Timestamp::now()), execution_id as i64],
            )
            .db_context("Failed to mark execution as executing")?;
        Ok(())
    }

    /// Records a successful step: execution `executed`, step success counter,
    /// enrollment progress.
    pub fn complete_execution(
        &mut self,
        execution: &StepExecution,
        lease: &str,
        record: ExecutionRecord<'_>,
        progress: &EnrollmentProgress<'_>,
    ) -> Result<()> {
        let tx = self.leased_transaction(execution.enrollment_id, lease)?;

        let result = record.result.map(serde_json::to_string).transpose()?;
        tx.execute(
            MARK_EXECUTED_SQL,
            params![
                result,
                record.email_message_id,
                format_timestamp(Timestamp::now()),
                execution.id as i64
            ],
        )
        .db_context("Failed to mark execution as executed")?;

        Self::record_attempt(&tx, execution.step_id, true)?;
        Self::apply_progress(&tx, execution.enrollment_id, progress)?;

        tx.commit().db_context("Failed to commit transaction")
    }

    /// Parks a delay execution until `scheduled_for`.
    pub fn schedule_execution(
        &mut self,
        execution: &StepExecution,
        lease: &str,
        scheduled_for: Timestamp,
        result: &Value,
    ) -> Result<()> {
        let tx = self.leased_transaction(execution.enrollment_id, lease)?;
        tx.execute(
            MARK_SCHEDULED_SQL,
            params![
                format_timestamp(scheduled_for),
                serde_json::to_string(result)?,
                format_timestamp(Timestamp::now()),
                execution.id as i64
            ],
        )
        .db_context("Failed to schedule execution")?;
        tx.commit().db_context("Failed to commit transaction")
    }

    /// Records a failed attempt on the execution and the step's counters.
    pub fn fail_execution(
        &mut self,
        execution: &StepExecution,
        lease: &str,
        message: &str,
    ) -> Result<()> {
        let tx = self.leased_transaction(execution.enrollment_id, lease)?;

        tx.execute(
            MARK_FAILED_SQL,
            params![
                message,
                format_timestamp(Timestamp::now()),
                execution.id as i64
            ],
        )
        .db_context("Failed to mark execution as failed")?;
        Self::record_attempt(&tx, execution.step_id, false)?;

        tx.commit().db_context("Failed to commit transaction")
    }

    /// Opens an `IMMEDIATE` transaction after checking that `lease` still
    /// holds the enrollment.
    fn leased_transaction(&mut self, enrollment_id: u64, lease: &str) -> Result<Transaction<'_>> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .db_context("Failed to begin transaction")?;
        Self::ensure_lease(&tx, enrollment_id, lease)?;
        Ok(tx)
    }

    /// Scheduled executions due at `now`, oldest first.
    pub fn due_scheduled_executions(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<StepExecution>> {
        let mut stmt = self
            .connection
            .prepare(SELECT_DUE_SQL)
            .db_context("Failed to prepare query")?;

        let executions = stmt
            .query_map(
                params![format_timestamp(now), limit as i64],
                Self::build_execution_from_row,
            )
            .db_context("Failed to query scheduled executions")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .db_context("Failed to fetch scheduled executions")?;

        Ok(executions)
    }

    /// Completes a parked delay and applies the enrollment progress. Returns
    /// false when the execution was no longer scheduled.
    pub fn resume_scheduled_execution(
        &mut self,
        execution: &StepExecution,
        lease: &str,
        progress: &EnrollmentProgress<'_>,
    ) -> Result<bool> {
        let tx = self.leased_transaction(execution.enrollment_id, lease)?;

        let rows = tx
            .execute(
                RESUME_SCHEDULED_SQL,
                params![format_timestamp(Timestamp::now()), execution.id as i64],
            )
            .db_context("Failed to resume scheduled execution")?;
        if rows == 0 {
            return Ok(false);
        }

        Self::record_attempt(&tx, execution.step_id, true)?;
        Self::apply_progress(&tx, execution.enrollment_id, progress)?;

        tx.commit().db_context("Failed to commit transaction")?;
        Ok(true)
    }
}
