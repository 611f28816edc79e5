//! Step CRUD operations, edge wiring and execution counters.

use jiff::Timestamp;
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use serde_json::Value;

use super::utils::{format_timestamp, get_id, get_optional_id, get_timestamp};
use crate::{
    error::{DatabaseResultExt, JourneyError, NotFoundExt, Result},
    models::{EdgePort, JourneyStep, NewStep, StepKind, UpdateStepRequest},
};

const STEP_COLUMNS: &str = "id, journey_id, name, position, canvas_x, canvas_y, step_type, step_config, next_step_id, condition_true_step_id, condition_false_step_id, total_executions, successful_executions, failed_executions, created_at, updated_at";
const CHECK_JOURNEY_EXISTS_SQL: &str = "SELECT EXISTS(SELECT 1 FROM journeys WHERE id = ?1)";
const GET_NEXT_POSITION_SQL: &str =
    "SELECT COALESCE(MAX(position), -1) + 1 FROM journey_steps WHERE journey_id = ?1";
const INSERT_STEP_SQL: &str = "INSERT INTO journey_steps (journey_id, name, position, canvas_x, canvas_y, step_type, step_config, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)";
const UPDATE_STEP_SQL: &str = "UPDATE journey_steps SET name = ?1, position = ?2, canvas_x = ?3, canvas_y = ?4, step_type = ?5, step_config = ?6, updated_at = ?7 WHERE id = ?8";
const UPDATE_STEP_CONFIG_SQL: &str =
    "UPDATE journey_steps SET step_config = ?1, updated_at = ?2 WHERE id = ?3";
const DELETE_STEP_SQL: &str = "DELETE FROM journey_steps WHERE id = ?1";
const INCREMENT_SUCCESS_SQL: &str = "UPDATE journey_steps SET total_executions = total_executions + 1, successful_executions = successful_executions + 1 WHERE id = ?1";
const INCREMENT_FAILURE_SQL: &str = "UPDATE journey_steps SET total_executions = total_executions + 1, failed_executions = failed_executions + 1 WHERE id = ?1";

/// Splits a step kind into its stored `(step_type, step_config)` columns.
fn encode_kind(kind: &StepKind) -> Result<(&'static str, String)> {
    let mut value = serde_json::to_value(kind)?;
    if let Some(object) = value.as_object_mut() {
        object.remove("step_type");
    }
    Ok((kind.step_type(), serde_json::to_string(&value)?))
}

fn decode_kind(step_type: &str, config: &str) -> serde_json::Result<StepKind> {
    let mut value: Value = serde_json::from_str(config)?;
    if let Some(object) = value.as_object_mut() {
        object.insert("step_type".into(), Value::from(step_type));
    }
    serde_json::from_value(value)
}

impl super::Database {
    /// Helper function to construct a JourneyStep from a database row
    fn build_step_from_row(row: &rusqlite::Row) -> rusqlite::Result<JourneyStep> {
        let step_type: String = row.get(6)?;
        let config: String = row.get(7)?;
        let kind = decode_kind(&step_type, &config)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

        Ok(JourneyStep {
            id: get_id(row, 0)?,
            journey_id: get_id(row, 1)?,
            name: row.get(2)?,
            position: row.get::<_, i64>(3)? as u32,
            canvas_x: row.get(4)?,
            canvas_y: row.get(5)?,
            kind,
            next_step_id: get_optional_id(row, 8)?,
            condition_true_step_id: get_optional_id(row, 9)?,
            condition_false_step_id: get_optional_id(row, 10)?,
            total_executions: row.get::<_, i64>(11)? as u64,
            successful_executions: row.get::<_, i64>(12)? as u64,
            failed_executions: row.get::<_, i64>(13)? as u64,
            created_at: get_timestamp(row, 14)?,
            updated_at: get_timestamp(row, 15)?,
        })
    }

    fn query_step(conn: &Connection, step_id: u64) -> Result<JourneyStep> {
        conn.query_row(
            &format!("SELECT {STEP_COLUMNS} FROM journey_steps WHERE id = ?1"),
            params![step_id as i64],
            Self::build_step_from_row,
        )
        .or_not_found("Step", step_id, "Failed to get step")
    }

    /// Adds a step to a journey, appended after the last position unless an
    /// explicit position is requested.
    pub fn add_step(&mut self, request: &NewStep) -> Result<JourneyStep> {
        let (step_type, config) = encode_kind(&request.kind)?;
        let tx = self
            .connection
            .transaction()
            .db_context("Failed to begin transaction")?;

        let journey_exists: bool = tx
            .query_row(
                CHECK_JOURNEY_EXISTS_SQL,
                params![request.journey_id as i64],
                |row| row.get(0),
            )
            .db_context("Failed to check journey existence")?;
        if !journey_exists {
            return Err(JourneyError::NotFound {
                entity: "Journey",
                id: request.journey_id,
            });
        }

        let position = match request.position {
            Some(position) => i64::from(position),
            None => tx
                .query_row(
                    GET_NEXT_POSITION_SQL,
                    params![request.journey_id as i64],
                    |row| row.get(0),
                )
                .db_context("Failed to get next step position")?,
        };

        let now_str = format_timestamp(Timestamp::now());
        tx.execute(
            INSERT_STEP_SQL,
            params![
                request.journey_id as i64,
                request.name,
                position,
                request.canvas_x,
                request.canvas_y,
                step_type,
                config,
                now_str
            ],
        )
        .db_context("Failed to insert step")?;
        let id = tx.last_insert_rowid() as u64;

        Self::touch_journey(&tx, request.journey_id, &now_str)?;
        let step = Self::query_step(&tx, id)?;
        tx.commit().db_context("Failed to commit transaction")?;

        Ok(step)
    }

    /// Retrieves all steps of a journey ordered by position.
    pub fn get_steps(&self, journey_id: u64) -> Result<Vec<JourneyStep>> {
        let mut stmt = self
            .connection
            .prepare(&format!(
                "SELECT {STEP_COLUMNS} FROM journey_steps WHERE journey_id = ?1 ORDER BY position, id"
            ))
            .db_context("Failed to prepare query")?;

        let steps = stmt
            .query_map(params![journey_id as i64], Self::build_step_from_row)
            .db_context("Failed to query steps")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .db_context("Failed to fetch steps")?;

        Ok(steps)
    }

    /// Retrieves a single step by its ID.
    pub fn get_step(&self, step_id: u64) -> Result<Option<JourneyStep>> {
        self.connection
            .query_row(
                &format!("SELECT {STEP_COLUMNS} FROM journey_steps WHERE id = ?1"),
                params![step_id as i64],
                Self::build_step_from_row,
            )
            .optional()
            .db_context("Failed to get step")
    }

    /// Applies a partial update and returns the stored step.
    pub fn update_step(&mut self, step_id: u64, request: UpdateStepRequest) -> Result<JourneyStep> {
        let tx = self
            .connection
            .transaction()
            .db_context("Failed to begin transaction")?;

        let current = Self::query_step(&tx, step_id)?;
        if request.is_empty() {
            return Ok(current);
        }

        let name = request.name.unwrap_or(current.name);
        let position = request.position.unwrap_or(current.position);
        let (canvas_x, canvas_y) = request.canvas.unwrap_or((current.canvas_x, current.canvas_y));
        let kind = request.kind.unwrap_or(current.kind);
        let (step_type, config) = encode_kind(&kind)?;
        let now_str = format_timestamp(Timestamp::now());

        tx.execute(
            UPDATE_STEP_SQL,
            params![
                name,
                i64::from(position),
                canvas_x,
                canvas_y,
                step_type,
                config,
                now_str,
                step_id as i64
            ],
        )
        .db_context("Failed to update step")?;

        // True/false targets only exist on condition steps
        if !matches!(kind, StepKind::Condition { .. }) {
            tx.execute(
                "UPDATE journey_steps SET condition_true_step_id = NULL, condition_false_step_id = NULL WHERE id = ?1",
                params![step_id as i64],
            )
            .db_context("Failed to clear branch targets")?;
        }

        Self::touch_journey(&tx, current.journey_id, &now_str)?;
        let step = Self::query_step(&tx, step_id)?;
        tx.commit().db_context("Failed to commit transaction")?;

        Ok(step)
    }

    /// Points one outgoing port of a step at `target`, or clears it when
    /// `target` is `None`. The target must belong to the same journey.
    pub fn connect_steps(
        &mut self,
        step_id: u64,
        port: &EdgePort,
        target: Option<u64>,
    ) -> Result<JourneyStep> {
        let tx = self
            .connection
            .transaction()
            .db_context("Failed to begin transaction")?;

        let mut step = Self::query_step(&tx, step_id)?;

        if let Some(target_id) = target {
            let target_step = Self::query_step(&tx, target_id)?;
            if target_step.journey_id != step.journey_id {
                return Err(JourneyError::invalid_input("to_step_id").with_reason(format!(
                    "Step {target_id} belongs to journey {}, not journey {}",
                    target_step.journey_id, step.journey_id
                )));
            }
            if target_id == step_id {
                return Err(JourneyError::invalid_input("to_step_id")
                    .with_reason("A step cannot connect to itself"));
            }
        }

        let now_str = format_timestamp(Timestamp::now());
        let target_param = target.map(|id| id as i64);

        match port {
            EdgePort::Next => {
                tx.execute(
                    "UPDATE journey_steps SET next_step_id = ?1, updated_at = ?2 WHERE id = ?3",
                    params![target_param, now_str, step_id as i64],
                )
                .db_context("Failed to update next step")?;
            }
            EdgePort::True | EdgePort::False => {
                if !matches!(step.kind, StepKind::Condition { .. }) {
                    return Err(JourneyError::invalid_input("port").with_reason(format!(
                        "Port '{port}' is only available on condition steps, step {step_id} is {}",
                        step.kind.step_type()
                    )));
                }
                let sql = if *port == EdgePort::True {
                    "UPDATE journey_steps SET condition_true_step_id = ?1, updated_at = ?2 WHERE id = ?3"
                } else {
                    "UPDATE journey_steps SET condition_false_step_id = ?1, updated_at = ?2 WHERE id = ?3"
                };
                tx.execute(sql, params![target_param, now_str, step_id as i64])
                    .db_context("Failed to update branch target")?;
            }
            EdgePort::Option(key) => {
                let StepKind::AiDecision { options, .. } = &mut step.kind else {
                    return Err(JourneyError::invalid_input("port").with_reason(format!(
                        "Port '{port}' is only available on ai_decision steps"
                    )));
                };
                let option = options
                    .iter_mut()
                    .find(|o| o.key == *key)
                    .ok_or_else(|| {
                        JourneyError::invalid_input("port")
                            .with_reason(format!("Step {step_id} has no option '{key}'"))
                    })?;
                option.step_id = target;

                let (_, config) = encode_kind(&step.kind)?;
                tx.execute(
                    UPDATE_STEP_CONFIG_SQL,
                    params![config, now_str, step_id as i64],
                )
                .db_context("Failed to update decision options")?;
            }
        }

        Self::touch_journey(&tx, step.journey_id, &now_str)?;
        let step = Self::query_step(&tx, step_id)?;
        tx.commit().db_context("Failed to commit transaction")?;

        Ok(step)
    }

    /// Removes a step. Column edges pointing at it are cleared by the schema;
    /// decision options pointing at it are cleared here.
    pub fn delete_step(&mut self, step_id: u64) -> Result<JourneyStep> {
        let tx = self
            .connection
            .transaction()
            .db_context("Failed to begin transaction")?;

        let step = Self::query_step(&tx, step_id)?;
        tx.execute(DELETE_STEP_SQL, params![step_id as i64])
            .db_context("Failed to delete step")?;

        let now_str = format_timestamp(Timestamp::now());
        let mut stmt = tx
            .prepare(&format!(
                "SELECT {STEP_COLUMNS} FROM journey_steps WHERE journey_id = ?1 AND step_type = 'ai_decision'"
            ))
            .db_context("Failed to prepare query")?;
        let siblings = stmt
            .query_map(params![step.journey_id as i64], Self::build_step_from_row)
            .db_context("Failed to query decision steps")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .db_context("Failed to fetch decision steps")?;
        drop(stmt);

        for mut sibling in siblings {
            let StepKind::AiDecision { options, .. } = &mut sibling.kind else {
                continue;
            };
            let mut changed = false;
            for option in options.iter_mut().filter(|o| o.step_id == Some(step_id)) {
                option.step_id = None;
                changed = true;
            }
            if changed {
                let (_, config) = encode_kind(&sibling.kind)?;
                tx.execute(
                    UPDATE_STEP_CONFIG_SQL,
                    params![config, now_str, sibling.id as i64],
                )
                .db_context("Failed to clear decision option")?;
            }
        }

        Self::touch_journey(&tx, step.journey_id, &now_str)?;
        tx.commit().db_context("Failed to commit transaction")?;

        Ok(step)
    }

    /// Atomically bumps a step's execution counters for one attempt.
    pub(super) fn record_attempt(
        conn: &Connection,
        step_id: u64,
        succeeded: bool,
    ) -> Result<()> {
        let sql = if succeeded {
            INCREMENT_SUCCESS_SQL
        } else {
            INCREMENT_FAILURE_SQL
        };
        conn.execute(sql, params![step_id as i64])
            .db_context("Failed to update step counters")?;
        Ok(())
    }
}
