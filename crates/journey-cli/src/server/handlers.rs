use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use jiff::Timestamp;
use journey_core::{Engine, EngineCommand, EngineRequest, JourneyError};
use log::debug;
use serde::Serialize;
use serde_json::{json, Value};

use super::errors::ApiError;

type ApiResult = Result<Json<Value>, ApiError>;

fn success<T: Serialize>(data: &T) -> ApiResult {
    let data = serde_json::to_value(data).map_err(JourneyError::from)?;
    Ok(Json(json!({ "success": true, "data": data })))
}

/// Dispatches one RPC action to the engine.
pub async fn rpc(
    State(engine): State<Engine>,
    payload: Result<Json<EngineRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    debug!("RPC action '{}'", request.action);

    match EngineCommand::try_from(request)? {
        EngineCommand::EnrollContact(params) => success(&engine.enroll_contact(&params).await?),
        EngineCommand::ProcessStep(params) => success(&engine.process_step(&params).await?),
        EngineCommand::ProcessScheduled => {
            success(&engine.process_scheduled_executions(Timestamp::now()).await?)
        }
        EngineCommand::TriggerCheck(params) => success(&engine.check_triggers(&params).await?),
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
