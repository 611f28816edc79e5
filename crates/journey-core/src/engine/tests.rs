//! Tests for the engine module.

use serde_json::{json, Value};
use tempfile::TempDir;

use super::*;
use crate::{
    db::Database,
    models::{EnrollmentStatus, Journey, JourneyStatus, JourneyStep, TriggerType},
    params::{
        ConnectSteps, CreateContact, CreateJourney, CreateStep, EnrollContact, Id, ListJourneys,
        UpdateJourney, UpdateStep,
    },
};

/// Helper function to create a test engine
async fn create_test_engine() -> (TempDir, Engine) {
    create_engine_with(EngineBuilder::new()).await
}

async fn create_engine_with(builder: EngineBuilder) -> (TempDir, Engine) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let engine = builder
        .with_database_path(Some(&db_path))
        .build()
        .await
        .expect("Failed to create engine");
    (temp_dir, engine)
}

async fn create_journey(engine: &Engine, name: &str) -> Journey {
    engine
        .create_journey(&CreateJourney {
            company_id: "acme".to_string(),
            name: name.to_string(),
            description: None,
            trigger_type: TriggerType::Manual,
            trigger_conditions: Value::Null,
            allow_re_enrollment: false,
        })
        .await
        .expect("Failed to create journey")
}

async fn add_step(engine: &Engine, journey_id: u64, step_type: &str, config: Value) -> JourneyStep {
    engine
        .create_step(&CreateStep {
            journey_id,
            name: step_type.to_string(),
            step_type: step_type.to_string(),
            config,
            position: None,
            canvas_x: None,
            canvas_y: None,
        })
        .await
        .expect("Failed to create step")
}

async fn connect(engine: &Engine, from: u64, port: &str, to: Option<u64>) -> JourneyStep {
    engine
        .connect_steps(&ConnectSteps {
            from_step_id: from,
            port: port.to_string(),
            to_step_id: to,
        })
        .await
        .expect("Failed to connect steps")
}

async fn create_contact(engine: &Engine) -> u64 {
    engine
        .create_contact(&CreateContact {
            company_id: "acme".to_string(),
            email: Some("ada@example.com".to_string()),
            first_name: Some("Ada".to_string()),
            ..Default::default()
        })
        .await
        .expect("Failed to create contact")
        .id
}

#[tokio::test]
async fn test_create_journey_starts_in_draft() {
    let (_temp_dir, engine) = create_test_engine().await;
    let journey = create_journey(&engine, "Welcome").await;

    assert_eq!(journey.status, JourneyStatus::Draft);
    assert_eq!(journey.total_enrolled, 0);

    let listed = engine
        .list_journeys(&ListJourneys {
            company_id: Some("acme".to_string()),
            status: Some("draft".to_string()),
        })
        .await
        .expect("Failed to list journeys");
    assert_eq!(listed.len(), 1);

    let err = engine
        .list_journeys(&ListJourneys {
            company_id: None,
            status: Some("archived".to_string()),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, JourneyError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_activate_refuses_empty_journey() {
    let (_temp_dir, engine) = create_test_engine().await;
    let journey = create_journey(&engine, "Empty").await;

    let err = engine
        .activate_journey(&Id { id: journey.id })
        .await
        .unwrap_err();
    let JourneyError::Validation { errors } = err else {
        panic!("expected a validation error");
    };
    assert_eq!(errors, vec!["Journey has no steps".to_string()]);

    let stored = engine.get_journey(&Id { id: journey.id }).await.unwrap().unwrap();
    assert_eq!(stored.status, JourneyStatus::Draft);
}

#[tokio::test]
async fn test_step_edits_require_inactive_journey() {
    let (_temp_dir, engine) = create_test_engine().await;
    let journey = create_journey(&engine, "Locked").await;
    let exit = add_step(&engine, journey.id, "exit", Value::Null).await;

    engine.activate_journey(&Id { id: journey.id }).await.unwrap();

    let err = engine
        .create_step(&CreateStep {
            journey_id: journey.id,
            name: "Late".to_string(),
            step_type: "exit".to_string(),
            config: Value::Null,
            position: None,
            canvas_x: None,
            canvas_y: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, JourneyError::Conflict { .. }));

    let err = engine.delete_step(&Id { id: exit.id }).await.unwrap_err();
    assert!(matches!(err, JourneyError::Conflict { .. }));

    let err = engine.delete_journey(&Id { id: journey.id }).await.unwrap_err();
    assert!(matches!(err, JourneyError::Conflict { .. }));

    let paused = engine.pause_journey(&Id { id: journey.id }).await.unwrap();
    assert_eq!(paused.status, JourneyStatus::Paused);
    add_step(&engine, journey.id, "exit", Value::Null).await;
}

#[tokio::test]
async fn test_pause_requires_active_journey() {
    let (_temp_dir, engine) = create_test_engine().await;
    let journey = create_journey(&engine, "Draft").await;

    let err = engine.pause_journey(&Id { id: journey.id }).await.unwrap_err();
    assert!(matches!(err, JourneyError::Conflict { .. }));
}

#[tokio::test]
async fn test_update_step_keeps_config_when_only_renaming() {
    let (_temp_dir, engine) = create_test_engine().await;
    let journey = create_journey(&engine, "Edits").await;
    let delay = add_step(&engine, journey.id, "delay", json!({"amount": 2, "unit": "days"})).await;

    let renamed = engine
        .update_step(&UpdateStep {
            id: delay.id,
            name: Some("Wait two days".to_string()),
            canvas_x: Some(120.0),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(renamed.name, "Wait two days");
    assert_eq!(renamed.kind, delay.kind);
    assert_eq!((renamed.canvas_x, renamed.canvas_y), (120.0, 0.0));

    let retyped = engine
        .update_step(&UpdateStep {
            id: delay.id,
            step_type: Some("add_tag".to_string()),
            config: Some(json!({"tags": ["waited"]})),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(retyped.kind.step_type(), "add_tag");

    let err = engine
        .update_step(&UpdateStep {
            id: delay.id,
            step_type: Some("send_email".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, JourneyError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_connect_steps_validates_ports_and_targets() {
    let (_temp_dir, engine) = create_test_engine().await;
    let journey = create_journey(&engine, "Graph").await;
    let other = create_journey(&engine, "Other").await;
    let tag = add_step(&engine, journey.id, "add_tag", json!({"tags": ["a"]})).await;
    let foreign = add_step(&engine, other.id, "exit", Value::Null).await;

    let err = engine
        .connect_steps(&ConnectSteps {
            from_step_id: tag.id,
            port: "next".to_string(),
            to_step_id: Some(foreign.id),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, JourneyError::InvalidInput { .. }));

    let err = engine
        .connect_steps(&ConnectSteps {
            from_step_id: tag.id,
            port: "sideways".to_string(),
            to_step_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, JourneyError::InvalidInput { field, .. } if field == "port"));

    let err = engine
        .connect_steps(&ConnectSteps {
            from_step_id: tag.id,
            port: "true".to_string(),
            to_step_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, JourneyError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_update_journey_switches_trigger() {
    let (_temp_dir, engine) = create_test_engine().await;
    let journey = create_journey(&engine, "Triggers").await;

    let updated = engine
        .update_journey(&UpdateJourney {
            id: journey.id,
            trigger_type: Some(TriggerType::TagAdded),
            trigger_conditions: Some(json!({"tags": ["vip"]})),
            allow_re_enrollment: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(updated.trigger.trigger_type(), TriggerType::TagAdded);
    assert!(updated.allow_re_enrollment);

    let renamed = engine
        .update_journey(&UpdateJourney {
            id: journey.id,
            name: Some("VIP welcome".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(renamed.trigger, updated.trigger);
}

#[tokio::test]
async fn test_delete_step_with_waiting_enrollment_conflicts() {
    let (_temp_dir, engine) = create_test_engine().await;
    let journey = create_journey(&engine, "Waiting").await;
    let delay = add_step(&engine, journey.id, "delay", json!({"amount": 1, "unit": "hours"})).await;
    let exit = add_step(&engine, journey.id, "exit", Value::Null).await;
    connect(&engine, delay.id, "next", Some(exit.id)).await;
    engine.activate_journey(&Id { id: journey.id }).await.unwrap();

    let contact_id = create_contact(&engine).await;
    let enrollment = engine
        .enroll_contact(&EnrollContact {
            journey_id: journey.id,
            contact_id,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(enrollment.current_step_id, Some(delay.id));

    engine.pause_journey(&Id { id: journey.id }).await.unwrap();
    let err = engine.delete_step(&Id { id: delay.id }).await.unwrap_err();
    assert!(matches!(err, JourneyError::Conflict { .. }));

    let deleted = engine.delete_step(&Id { id: exit.id }).await.unwrap();
    assert_eq!(deleted.id, exit.id);
}

#[tokio::test]
async fn test_process_step_refuses_held_lease() {
    let (_temp_dir, engine) = create_test_engine().await;
    let journey = create_journey(&engine, "Leased").await;
    let delay = add_step(&engine, journey.id, "delay", json!({"amount": 1, "unit": "days"})).await;
    let exit = add_step(&engine, journey.id, "exit", Value::Null).await;
    connect(&engine, delay.id, "next", Some(exit.id)).await;
    engine.activate_journey(&Id { id: journey.id }).await.unwrap();

    let contact_id = create_contact(&engine).await;
    let enrollment = engine
        .enroll_contact(&EnrollContact {
            journey_id: journey.id,
            contact_id,
            ..Default::default()
        })
        .await
        .unwrap();

    let now = jiff::Timestamp::now();
    let db = Database::new(&engine.db_path).unwrap();
    let held = db
        .acquire_lease(
            enrollment.id,
            "other-worker",
            now,
            now.checked_add(jiff::SignedDuration::from_secs(60)).unwrap(),
        )
        .unwrap();
    assert!(held);

    let err = engine
        .process_step(&Id { id: enrollment.id })
        .await
        .unwrap_err();
    assert!(matches!(err, JourneyError::Conflict { .. }));

    db.release_lease(enrollment.id, "other-worker").unwrap();
    let resumed = engine.process_step(&Id { id: enrollment.id }).await.unwrap();
    assert_eq!(resumed.status, EnrollmentStatus::Active);
}

#[tokio::test]
async fn test_step_limit_yields_and_resumes() {
    let (_temp_dir, engine) =
        create_engine_with(EngineBuilder::new().with_max_steps_per_run(1)).await;
    let journey = create_journey(&engine, "Limited").await;
    let tag = add_step(&engine, journey.id, "add_tag", json!({"tags": ["seen"]})).await;
    let exit = add_step(&engine, journey.id, "exit", Value::Null).await;
    connect(&engine, tag.id, "next", Some(exit.id)).await;
    engine.activate_journey(&Id { id: journey.id }).await.unwrap();

    let contact_id = create_contact(&engine).await;
    let enrollment = engine
        .enroll_contact(&EnrollContact {
            journey_id: journey.id,
            contact_id,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(enrollment.status, EnrollmentStatus::Active);
    assert_eq!(enrollment.current_step_id, Some(exit.id));

    let finished = engine.process_step(&Id { id: enrollment.id }).await.unwrap();
    assert_eq!(finished.status, EnrollmentStatus::Completed);
    assert_eq!(finished.steps_completed, 1);
}
