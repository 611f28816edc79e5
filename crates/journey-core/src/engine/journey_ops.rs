//! Journey and step operations for the Engine.
//!
//! Steps can only be edited while their journey is not active. Activation
//! runs the validator and refuses journeys with structural errors.

use serde_json::Value;

use super::Engine;
use crate::{
    db::Database,
    error::{JourneyError, Result},
    models::{
        EdgePort, Journey, JourneyStatus, JourneyStep, NewJourney, NewStep, StepKind,
        UpdateJourneyRequest, UpdateStepRequest,
    },
    params::{
        step_kind, trigger_rule, ConnectSteps, CreateJourney, CreateStep, Id, ListJourneys,
        UpdateJourney, UpdateStep,
    },
    validator::{validate, ValidationReport},
};

impl Engine {
    /// Creates a journey in `draft` status.
    pub async fn create_journey(&self, params: &CreateJourney) -> Result<Journey> {
        let request = NewJourney::try_from(params)?;
        let journey = self.with_db(move |db| db.create_journey(&request)).await?;
        log::info!("Created journey {} '{}'", journey.id, journey.name);
        Ok(journey)
    }

    /// Retrieves a journey with its steps ordered by position.
    pub async fn get_journey(&self, params: &Id) -> Result<Option<Journey>> {
        let journey_id = params.id;
        self.with_db(move |db| load_journey(db, journey_id)).await
    }

    /// Lists journeys, newest first.
    pub async fn list_journeys(&self, params: &ListJourneys) -> Result<Vec<Journey>> {
        let company_id = params.company_id.clone();
        let status = params
            .status
            .as_deref()
            .map(str::parse::<JourneyStatus>)
            .transpose()
            .map_err(|e| JourneyError::invalid_input("status").with_reason(e))?;

        self.with_db(move |db| db.list_journeys(company_id.as_deref(), status))
            .await
    }

    /// Updates a journey's name, description, trigger or re-enrollment flag.
    pub async fn update_journey(&self, params: &UpdateJourney) -> Result<Journey> {
        if params.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(JourneyError::invalid_input("name").with_reason("Name cannot be empty"));
        }

        let params = params.clone();
        self.with_db(move |db| {
            let current = db.get_journey(params.id)?.ok_or(JourneyError::NotFound {
                entity: "Journey",
                id: params.id,
            })?;

            let trigger = if params.trigger_type.is_some() || params.trigger_conditions.is_some() {
                let trigger_type = params
                    .trigger_type
                    .unwrap_or_else(|| current.trigger.trigger_type());
                let conditions = match params.trigger_conditions {
                    Some(conditions) => conditions,
                    None if trigger_type == current.trigger.trigger_type() => {
                        current.trigger.conditions()
                    }
                    None => Value::Null,
                };
                Some(trigger_rule(trigger_type, conditions)?)
            } else {
                None
            };

            let mut journey = db.update_journey(
                params.id,
                UpdateJourneyRequest {
                    name: params.name.map(|n| n.trim().to_string()),
                    description: params.description,
                    trigger,
                    allow_re_enrollment: params.allow_re_enrollment,
                },
            )?;
            journey.steps = db.get_steps(journey.id)?;
            Ok(journey)
        })
        .await
    }

    /// Deletes a journey with its steps and enrollments. Returns the deleted
    /// journey, or `None` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns `JourneyError::Conflict` for active journeys.
    pub async fn delete_journey(&self, params: &Id) -> Result<Option<Journey>> {
        let journey_id = params.id;
        self.with_db(move |db| {
            let Some(journey) = load_journey(db, journey_id)? else {
                return Ok(None);
            };
            if journey.status == JourneyStatus::Active {
                return Err(JourneyError::conflict(format!(
                    "Journey {journey_id} is active; pause it before deleting"
                )));
            }
            db.delete_journey(journey_id)?;
            log::info!("Deleted journey {journey_id} '{}'", journey.name);
            Ok(Some(journey))
        })
        .await
    }

    /// Validates a journey's step graph without changing it.
    pub async fn validate_journey(&self, params: &Id) -> Result<ValidationReport> {
        let journey = self.require_journey(params.id).await?;
        Ok(validate(&journey.steps))
    }

    /// Activates a draft or paused journey after validating it. Activating an
    /// active journey returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns `JourneyError::Validation` with the validator's errors.
    pub async fn activate_journey(&self, params: &Id) -> Result<Journey> {
        let journey_id = params.id;
        self.with_db(move |db| {
            let journey = load_journey(db, journey_id)?.ok_or(JourneyError::NotFound {
                entity: "Journey",
                id: journey_id,
            })?;
            if journey.status == JourneyStatus::Active {
                return Ok(journey);
            }

            let report = validate(&journey.steps).into_result()?;
            for warning in &report.warnings {
                log::warn!("Journey {journey_id}: {warning}");
            }

            db.set_journey_status(journey_id, JourneyStatus::Active)?;
            log::info!("Activated journey {journey_id} '{}'", journey.name);
            load_journey(db, journey_id)?.ok_or(JourneyError::NotFound {
                entity: "Journey",
                id: journey_id,
            })
        })
        .await
    }

    /// Pauses an active journey. Enrollments already running continue; new
    /// enrollments are refused.
    pub async fn pause_journey(&self, params: &Id) -> Result<Journey> {
        let journey_id = params.id;
        self.with_db(move |db| {
            let journey = db.get_journey(journey_id)?.ok_or(JourneyError::NotFound {
                entity: "Journey",
                id: journey_id,
            })?;
            if journey.status != JourneyStatus::Active {
                return Err(JourneyError::conflict(format!(
                    "Journey {journey_id} is {}, only active journeys can be paused",
                    journey.status.as_str()
                )));
            }

            db.set_journey_status(journey_id, JourneyStatus::Paused)?;
            log::info!("Paused journey {journey_id} '{}'", journey.name);
            load_journey(db, journey_id)?.ok_or(JourneyError::NotFound {
                entity: "Journey",
                id: journey_id,
            })
        })
        .await
    }

    /// Adds a step to a journey.
    pub async fn create_step(&self, params: &CreateStep) -> Result<JourneyStep> {
        if params.name.trim().is_empty() {
            return Err(JourneyError::invalid_input("name").with_reason("Name cannot be empty"));
        }
        let request = NewStep {
            journey_id: params.journey_id,
            name: params.name.trim().to_string(),
            kind: step_kind(&params.step_type, params.config.clone())?,
            position: params.position,
            canvas_x: params.canvas_x.unwrap_or_default(),
            canvas_y: params.canvas_y.unwrap_or_default(),
        };

        self.with_db(move |db| {
            ensure_editable(db, request.journey_id)?;
            db.add_step(&request)
        })
        .await
    }

    /// Updates a step's name, type, configuration, position or canvas
    /// coordinates.
    pub async fn update_step(&self, params: &UpdateStep) -> Result<JourneyStep> {
        let params = params.clone();
        self.with_db(move |db| {
            let current = db.get_step(params.id)?.ok_or(JourneyError::NotFound {
                entity: "Step",
                id: params.id,
            })?;
            ensure_editable(db, current.journey_id)?;

            let kind = if params.step_type.is_some() || params.config.is_some() {
                let step_type = params
                    .step_type
                    .unwrap_or_else(|| current.kind.step_type().to_string());
                let config = match params.config {
                    Some(config) => config,
                    None => step_config(&current.kind)?,
                };
                Some(step_kind(&step_type, config)?)
            } else {
                None
            };

            let canvas = match (params.canvas_x, params.canvas_y) {
                (None, None) => None,
                (x, y) => Some((
                    x.unwrap_or(current.canvas_x),
                    y.unwrap_or(current.canvas_y),
                )),
            };

            db.update_step(
                params.id,
                UpdateStepRequest {
                    name: params.name.map(|n| n.trim().to_string()),
                    kind,
                    position: params.position,
                    canvas,
                },
            )
        })
        .await
    }

    /// Connects one outgoing port of a step to another step of the same
    /// journey, or disconnects it.
    pub async fn connect_steps(&self, params: &ConnectSteps) -> Result<JourneyStep> {
        let port: EdgePort = params
            .port
            .parse()
            .map_err(|e: String| JourneyError::invalid_input("port").with_reason(e))?;
        let from = params.from_step_id;
        let to = params.to_step_id;

        self.with_db(move |db| {
            let step = db.get_step(from)?.ok_or(JourneyError::NotFound {
                entity: "Step",
                id: from,
            })?;
            ensure_editable(db, step.journey_id)?;
            db.connect_steps(from, &port, to)
        })
        .await
    }

    /// Deletes a step. Edges pointing at it are cleared.
    ///
    /// # Errors
    ///
    /// Returns `JourneyError::Conflict` when the journey is active or an
    /// active enrollment currently sits on the step.
    pub async fn delete_step(&self, params: &Id) -> Result<JourneyStep> {
        let step_id = params.id;
        self.with_db(move |db| {
            let step = db.get_step(step_id)?.ok_or(JourneyError::NotFound {
                entity: "Step",
                id: step_id,
            })?;
            ensure_editable(db, step.journey_id)?;

            let waiting = db.count_active_at_step(step_id)?;
            if waiting > 0 {
                return Err(JourneyError::conflict(format!(
                    "Step {step_id} is the current step of {waiting} active enrollments"
                )));
            }
            db.delete_step(step_id)
        })
        .await
    }

    async fn require_journey(&self, journey_id: u64) -> Result<Journey> {
        self.with_db(move |db| load_journey(db, journey_id))
            .await?
            .ok_or(JourneyError::NotFound {
                entity: "Journey",
                id: journey_id,
            })
    }
}

fn load_journey(db: &Database, journey_id: u64) -> Result<Option<Journey>> {
    let Some(mut journey) = db.get_journey(journey_id)? else {
        return Ok(None);
    };
    journey.steps = db.get_steps(journey_id)?;
    Ok(Some(journey))
}

fn ensure_editable(db: &Database, journey_id: u64) -> Result<Journey> {
    let journey = db.get_journey(journey_id)?.ok_or(JourneyError::NotFound {
        entity: "Journey",
        id: journey_id,
    })?;
    if journey.status == JourneyStatus::Active {
        return Err(JourneyError::conflict(format!(
            "Journey {journey_id} is active; pause it before editing steps"
        )));
    }
    Ok(journey)
}

/// The type-specific configuration of a step, without its type tag.
fn step_config(kind: &StepKind) -> Result<Value> {
    let mut value = serde_json::to_value(kind)?;
    if let Some(object) = value.as_object_mut() {
        object.remove("step_type");
    }
    Ok(value)
}
