mod common;

use std::time::Duration;

use common::{
    add_step, connect, create_contact, create_journey, create_test_engine,
    create_test_engine_with, linear_journey, ScriptedCompletion,
};
use jiff::{SignedDuration, Timestamp};
use journey_core::{
    models::{EnrollmentStatus, ExecutionStatus, TriggerType},
    params::{CheckTriggers, CreateContact, EnrollContact, Id, ListEnrollments},
    Database, EngineBuilder, JourneyError,
};
use serde_json::{json, Map, Value};

fn enroll(journey_id: u64, contact_id: u64) -> EnrollContact {
    EnrollContact {
        journey_id,
        contact_id,
        ..Default::default()
    }
}

fn payload(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_condition_without_both_branches_cannot_activate() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let journey = create_journey(&t.engine, TriggerType::Manual, Value::Null).await;
    let check = add_step(
        &t.engine,
        journey.id,
        "Is customer",
        "condition",
        json!({"conditions": [{"field": "lifecycle_stage", "operator": "equals", "value": "customer"}]}),
    )
    .await;
    let tag = add_step(&t.engine, journey.id, "Tag", "add_tag", json!({"tags": ["vip"]})).await;
    connect(&t.engine, check.id, "true", tag.id).await;

    let err = t
        .engine
        .activate_journey(&Id { id: journey.id })
        .await
        .unwrap_err();
    match err {
        JourneyError::Validation { errors } => {
            assert!(errors.iter().any(|e| e.contains("missing its false branch")));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_email_delay_exit_scenario() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let (journey, steps) = linear_journey(
        &t.engine,
        &[
            (
                "send_email",
                json!({"subject": "Welcome {{first_name}}", "body": "<p>Hi {{first_name}}, from {{campaign}}</p>"}),
            ),
            ("delay", json!({"amount": 1, "unit": "days"})),
            ("exit", json!({"reason": "done"})),
        ],
    )
    .await;
    let contact_id = create_contact(&t.engine, None).await;

    let before = Timestamp::now();
    let enrollment = t
        .engine
        .enroll_contact(&EnrollContact {
            journey_id: journey.id,
            contact_id,
            context: payload(json!({"campaign": "spring"})),
            source: None,
        })
        .await
        .expect("Failed to enroll");

    assert_eq!(enrollment.status, EnrollmentStatus::Active);
    assert_eq!(enrollment.source, "manual");
    assert_eq!(enrollment.emails_sent, 1);
    assert_eq!(enrollment.steps_completed, 1);
    assert_eq!(enrollment.current_step_id, Some(steps[1].id));

    let sent = t.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ada@example.com");
    assert_eq!(sent[0].subject, "Welcome Ada");
    assert_eq!(sent[0].html_content, "<p>Hi Ada, from spring</p>");
    assert_eq!(sent[0].recipient_name, "Ada Lovelace");

    let email_execution = &enrollment.executions[0];
    assert_eq!(email_execution.status, ExecutionStatus::Executed);
    assert_eq!(email_execution.email_message_id.as_deref(), Some("msg-1"));

    let delay = &enrollment.executions[1];
    assert_eq!(delay.status, ExecutionStatus::Scheduled);
    let due = delay.scheduled_for.expect("delay must be scheduled");
    assert!(due > before + SignedDuration::from_hours(23));

    // Nothing is due yet
    let report = t
        .engine
        .process_scheduled_executions(Timestamp::now())
        .await
        .expect("Failed to sweep");
    assert_eq!(report.processed, 0);

    let later = Timestamp::now() + SignedDuration::from_hours(25);
    let report = t
        .engine
        .process_scheduled_executions(later)
        .await
        .expect("Failed to sweep");
    assert_eq!(report.processed, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.items[0].status, Some(EnrollmentStatus::Completed));

    let done = t
        .engine
        .get_enrollment(&Id { id: enrollment.id })
        .await
        .expect("Failed to load enrollment")
        .expect("Enrollment should exist");
    assert_eq!(done.status, EnrollmentStatus::Completed);
    assert_eq!(done.steps_completed, 2);
    assert_eq!(done.emails_sent, 1);
    assert_eq!(done.current_step_id, Some(steps[2].id));
    assert!(done.completed_at.is_some());
    assert!(done
        .executions
        .iter()
        .all(|x| x.status == ExecutionStatus::Executed));

    // Step counters follow the executions
    let journey = t
        .engine
        .get_journey(&Id { id: journey.id })
        .await
        .expect("Failed to load journey")
        .expect("Journey should exist");
    assert_eq!(journey.total_enrolled, 1);
    assert!(journey.steps.iter().all(|s| s.successful_executions == 1));
}

#[tokio::test]
async fn test_delay_leaves_pointer_on_delay_step() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let (journey, steps) = linear_journey(
        &t.engine,
        &[
            ("delay", json!({"amount": 2, "unit": "hours"})),
            ("add_tag", json!({"tags": ["waited"]})),
        ],
    )
    .await;
    let contact_id = create_contact(&t.engine, None).await;

    let enrollment = t
        .engine
        .enroll_contact(&enroll(journey.id, contact_id))
        .await
        .expect("Failed to enroll");
    assert_eq!(enrollment.current_step_id, Some(steps[0].id));
    assert_eq!(enrollment.steps_completed, 0);

    // Processing again before the delay is due changes nothing
    let again = t
        .engine
        .process_step(&Id { id: enrollment.id })
        .await
        .expect("Failed to process");
    assert_eq!(again.current_step_id, Some(steps[0].id));
    assert_eq!(again.executions.len(), 1);

    // Processing past the due time resumes inline
    let resumed = t
        .engine
        .process_enrollment(enrollment.id, Timestamp::now() + SignedDuration::from_hours(3))
        .await
        .expect("Failed to process");
    assert_eq!(resumed.status, EnrollmentStatus::Completed);
    assert_eq!(resumed.steps_completed, 2);

    let contact = t
        .engine
        .get_contact(&Id { id: contact_id })
        .await
        .expect("Failed to load contact")
        .expect("Contact should exist");
    assert_eq!(contact.ai_tags, vec!["waited".to_string()]);
}

#[tokio::test]
async fn test_processing_finished_enrollment_is_a_no_op() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let (journey, _) = linear_journey(&t.engine, &[("exit", json!({}))]).await;
    let contact_id = create_contact(&t.engine, None).await;

    let enrollment = t
        .engine
        .enroll_contact(&enroll(journey.id, contact_id))
        .await
        .expect("Failed to enroll");
    assert_eq!(enrollment.status, EnrollmentStatus::Completed);
    assert_eq!(enrollment.steps_completed, 0);

    let again = t
        .engine
        .process_step(&Id { id: enrollment.id })
        .await
        .expect("Failed to process");
    assert_eq!(again, enrollment);
}

#[tokio::test]
async fn test_condition_routes_by_lifecycle_stage() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let journey = create_journey(&t.engine, TriggerType::Manual, Value::Null).await;
    let check = add_step(
        &t.engine,
        journey.id,
        "Is customer",
        "condition",
        json!({"conditions": [{"field": "lifecycle_stage", "operator": "equals", "value": "customer"}]}),
    )
    .await;
    let vip = add_step(&t.engine, journey.id, "VIP", "add_tag", json!({"tags": ["vip"]})).await;
    let nurture = add_step(
        &t.engine,
        journey.id,
        "Nurture",
        "add_tag",
        json!({"tags": ["nurture"]}),
    )
    .await;
    connect(&t.engine, check.id, "true", vip.id).await;
    connect(&t.engine, check.id, "false", nurture.id).await;
    t.engine
        .activate_journey(&Id { id: journey.id })
        .await
        .expect("Failed to activate");

    for (stage, expected) in [("customer", "vip"), ("lead", "nurture")] {
        let contact_id = create_contact(&t.engine, Some(stage)).await;
        let enrollment = t
            .engine
            .enroll_contact(&enroll(journey.id, contact_id))
            .await
            .expect("Failed to enroll");
        assert_eq!(enrollment.status, EnrollmentStatus::Completed);
        assert_eq!(enrollment.steps_completed, 2);

        let condition_result = enrollment.executions[0]
            .result
            .as_ref()
            .expect("condition result");
        assert_eq!(condition_result["passed"], json!(stage == "customer"));

        let contact = t
            .engine
            .get_contact(&Id { id: contact_id })
            .await
            .expect("Failed to load contact")
            .expect("Contact should exist");
        assert_eq!(contact.ai_tags, vec![expected.to_string()]);
    }
}

#[tokio::test]
async fn test_add_tag_keeps_tags_unique() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let (journey, _) = linear_journey(
        &t.engine,
        &[
            ("add_tag", json!({"tags": ["engaged"]})),
            ("add_tag", json!({"tags": ["engaged", "warm"]})),
            ("remove_tag", json!({"tags": ["warm", "missing"]})),
        ],
    )
    .await;
    let contact_id = create_contact(&t.engine, None).await;

    let enrollment = t
        .engine
        .enroll_contact(&enroll(journey.id, contact_id))
        .await
        .expect("Failed to enroll");
    assert_eq!(enrollment.status, EnrollmentStatus::Completed);
    assert_eq!(enrollment.steps_completed, 3);

    let second = enrollment.executions[1].result.as_ref().expect("tag result");
    assert_eq!(second["added"], json!(["warm"]));
    let third = enrollment.executions[2].result.as_ref().expect("tag result");
    assert_eq!(third["removed"], json!(["warm"]));

    let contact = t
        .engine
        .get_contact(&Id { id: contact_id })
        .await
        .expect("Failed to load contact")
        .expect("Contact should exist");
    assert_eq!(contact.ai_tags, vec!["engaged".to_string()]);
}

async fn ai_journey(t: &common::TestEngine) -> (u64, u64, u64) {
    let journey = create_journey(&t.engine, TriggerType::Manual, Value::Null).await;
    let decide = add_step(
        &t.engine,
        journey.id,
        "Route",
        "ai_decision",
        json!({
            "prompt": "Is {{first_name}} ready for sales?",
            "options": [{"key": "nurture"}, {"key": "sales"}]
        }),
    )
    .await;
    let nurture = add_step(
        &t.engine,
        journey.id,
        "Nurture",
        "add_tag",
        json!({"tags": ["nurture"]}),
    )
    .await;
    let sales = add_step(&t.engine, journey.id, "Sales", "add_tag", json!({"tags": ["sales"]})).await;
    connect(&t.engine, decide.id, "option:nurture", nurture.id).await;
    connect(&t.engine, decide.id, "option:sales", sales.id).await;
    t.engine
        .activate_journey(&Id { id: journey.id })
        .await
        .expect("Failed to activate");
    (journey.id, nurture.id, sales.id)
}

#[tokio::test]
async fn test_ai_decision_follows_chosen_option() {
    let t = create_test_engine(ScriptedCompletion::answering("Sales.")).await;
    let (journey_id, _, sales_id) = ai_journey(&t).await;
    let contact_id = create_contact(&t.engine, None).await;

    let enrollment = t
        .engine
        .enroll_contact(&enroll(journey_id, contact_id))
        .await
        .expect("Failed to enroll");

    assert_eq!(enrollment.status, EnrollmentStatus::Completed);
    assert_eq!(enrollment.executions[1].step_id, sales_id);
    assert_eq!(enrollment.context["ai_decision"], "sales");

    let result = enrollment.executions[0].result.as_ref().expect("decision");
    assert_eq!(result["decision"], "sales");
    assert_eq!(result["fallback"], false);
}

#[tokio::test]
async fn test_ai_failure_falls_back_to_first_option() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let (journey_id, nurture_id, _) = ai_journey(&t).await;
    let contact_id = create_contact(&t.engine, None).await;

    let enrollment = t
        .engine
        .enroll_contact(&enroll(journey_id, contact_id))
        .await
        .expect("Failed to enroll");

    assert_eq!(enrollment.status, EnrollmentStatus::Completed);
    assert_eq!(enrollment.executions[0].status, ExecutionStatus::Executed);
    assert_eq!(enrollment.executions[1].step_id, nurture_id);
    assert_eq!(enrollment.context["ai_decision"], "nurture");

    let result = enrollment.executions[0].result.as_ref().expect("decision");
    assert_eq!(result["fallback"], true);
    assert!(result["error"]
        .as_str()
        .is_some_and(|e| e.contains("model overloaded")));
}

#[tokio::test]
async fn test_ai_prompt_is_rendered_and_lists_options() {
    let t = create_test_engine(ScriptedCompletion::answering("nurture")).await;
    let (journey_id, nurture_id, _) = ai_journey(&t).await;
    let contact_id = create_contact(&t.engine, None).await;

    let enrollment = t
        .engine
        .enroll_contact(&enroll(journey_id, contact_id))
        .await
        .expect("Failed to enroll");
    assert_eq!(enrollment.executions[1].step_id, nurture_id);

    let prompts = t.ai.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0][0].content.contains("nurture, sales"));
    assert_eq!(prompts[0][1].content, "Is Ada ready for sales?");
}

#[tokio::test]
async fn test_trigger_enrolls_matching_contacts() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let journey = create_journey(
        &t.engine,
        TriggerType::TagAdded,
        json!({"tags": ["webinar"]}),
    )
    .await;
    add_step(&t.engine, journey.id, "Wait", "delay", json!({"amount": 1, "unit": "hours"})).await;
    t.engine
        .activate_journey(&Id { id: journey.id })
        .await
        .expect("Failed to activate");
    let contact_id = create_contact(&t.engine, None).await;

    let check = |tag: &str| CheckTriggers {
        trigger_type: TriggerType::TagAdded,
        trigger_data: payload(json!({"company_id": "acme", "contact_id": contact_id, "tag": tag})),
    };

    let none = t
        .engine
        .check_triggers(&check("newsletter"))
        .await
        .expect("Failed to check triggers");
    assert!(none.is_empty());

    let matches = t
        .engine
        .check_triggers(&check("webinar"))
        .await
        .expect("Failed to check triggers");
    assert_eq!(matches.len(), 1);
    assert!(matches[0].enrolled);
    assert_eq!(matches[0].status, Some(EnrollmentStatus::Active));

    let enrollment = t
        .engine
        .get_enrollment(&Id {
            id: matches[0].enrollment_id.expect("enrollment id"),
        })
        .await
        .expect("Failed to load enrollment")
        .expect("Enrollment should exist");
    assert_eq!(enrollment.source, "trigger:tag_added");
    assert_eq!(enrollment.context["tag"], "webinar");

    // Still active in the journey, so the second event is refused
    let duplicate = t
        .engine
        .check_triggers(&check("webinar"))
        .await
        .expect("Failed to check triggers");
    assert_eq!(duplicate.len(), 1);
    assert!(!duplicate[0].enrolled);
    assert!(duplicate[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("already enrolled")));

    // Other companies never match
    let foreign = t
        .engine
        .check_triggers(&CheckTriggers {
            trigger_type: TriggerType::TagAdded,
            trigger_data: payload(json!({"company_id": "globex", "contact_id": contact_id, "tag": "webinar"})),
        })
        .await
        .expect("Failed to check triggers");
    assert!(foreign.is_empty());
}

#[tokio::test]
async fn test_trigger_requires_company_and_contact() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let err = t
        .engine
        .check_triggers(&CheckTriggers {
            trigger_type: TriggerType::ContactCreated,
            trigger_data: payload(json!({"contact_id": 1})),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, JourneyError::InvalidInput { ref field, .. } if field == "trigger_data.company_id"));
}

#[tokio::test]
async fn test_duplicate_enrollment_respects_re_enrollment_flag() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let (journey, _) = linear_journey(
        &t.engine,
        &[("delay", json!({"amount": 1, "unit": "weeks"}))],
    )
    .await;
    let contact_id = create_contact(&t.engine, None).await;

    t.engine
        .enroll_contact(&enroll(journey.id, contact_id))
        .await
        .expect("Failed to enroll");
    let err = t
        .engine
        .enroll_contact(&enroll(journey.id, contact_id))
        .await
        .unwrap_err();
    assert!(matches!(err, JourneyError::Conflict { .. }));

    t.engine
        .pause_journey(&Id { id: journey.id })
        .await
        .expect("Failed to pause");
    t.engine
        .update_journey(&journey_core::params::UpdateJourney {
            id: journey.id,
            allow_re_enrollment: Some(true),
            ..Default::default()
        })
        .await
        .expect("Failed to update");
    t.engine
        .activate_journey(&Id { id: journey.id })
        .await
        .expect("Failed to activate");

    t.engine
        .enroll_contact(&enroll(journey.id, contact_id))
        .await
        .expect("Re-enrollment should be allowed");
    let enrollments = t
        .engine
        .list_enrollments(&ListEnrollments {
            journey_id: Some(journey.id),
            ..Default::default()
        })
        .await
        .expect("Failed to list");
    assert_eq!(enrollments.len(), 2);
}

#[tokio::test]
async fn test_enroll_requires_active_journey_and_same_company() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let draft = create_journey(&t.engine, TriggerType::Manual, Value::Null).await;
    let contact_id = create_contact(&t.engine, None).await;

    let err = t
        .engine
        .enroll_contact(&enroll(draft.id, contact_id))
        .await
        .unwrap_err();
    assert!(matches!(err, JourneyError::NotFound { entity: "Active journey", .. }));

    let (journey, _) = linear_journey(&t.engine, &[("exit", json!({}))]).await;
    let outsider = t
        .engine
        .create_contact(&CreateContact {
            company_id: "globex".to_string(),
            email: Some("bob@example.com".to_string()),
            ..Default::default()
        })
        .await
        .expect("Failed to create contact");
    let err = t
        .engine
        .enroll_contact(&enroll(journey.id, outsider.id))
        .await
        .unwrap_err();
    assert!(matches!(err, JourneyError::NotFound { entity: "Contact", .. }));
}

#[tokio::test]
async fn test_failed_email_is_retried_on_next_run() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let (journey, steps) = linear_journey(
        &t.engine,
        &[(
            "send_email",
            json!({"subject": "Hello", "body": "<p>Hello</p>"}),
        )],
    )
    .await;
    let contact_id = create_contact(&t.engine, None).await;
    t.email.set_failing(true);

    let err = t
        .engine
        .enroll_contact(&enroll(journey.id, contact_id))
        .await
        .unwrap_err();
    match &err {
        JourneyError::Execution { step_id, message } => {
            assert_eq!(*step_id, steps[0].id);
            assert!(message.contains("mailbox unavailable"));
        }
        other => panic!("expected execution error, got {other:?}"),
    }

    let enrollments = t
        .engine
        .list_enrollments(&ListEnrollments {
            contact_id: Some(contact_id),
            ..Default::default()
        })
        .await
        .expect("Failed to list");
    let enrollment_id = enrollments[0].id;
    let failed = t
        .engine
        .get_enrollment(&Id { id: enrollment_id })
        .await
        .expect("Failed to load")
        .expect("Enrollment should exist");
    assert_eq!(failed.status, EnrollmentStatus::Active);
    assert_eq!(failed.executions.len(), 1);
    assert_eq!(failed.executions[0].status, ExecutionStatus::Failed);
    assert_eq!(failed.executions[0].retry_count, 1);

    assert!(t.engine.process_step(&Id { id: enrollment_id }).await.is_err());

    t.email.set_failing(false);
    let done = t
        .engine
        .process_step(&Id { id: enrollment_id })
        .await
        .expect("Retry should succeed");
    assert_eq!(done.status, EnrollmentStatus::Completed);
    assert_eq!(done.emails_sent, 1);
    assert_eq!(done.executions.len(), 1);
    assert_eq!(done.executions[0].status, ExecutionStatus::Executed);
    assert_eq!(done.executions[0].retry_count, 2);
    assert_eq!(t.email.sent().len(), 1);
}

#[tokio::test]
async fn test_update_contact_and_activity_render_templates() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let (journey, _) = linear_journey(
        &t.engine,
        &[
            (
                "update_contact",
                json!({"fields": {"lifecycle_stage": "mql", "lead_score": 40, "referrer": "{{campaign}}"}}),
            ),
            (
                "create_activity",
                json!({"activity_type": "note", "subject": "{{first_name}} is now {{lifecycle_stage}}"}),
            ),
        ],
    )
    .await;
    let contact_id = create_contact(&t.engine, Some("lead")).await;

    let enrollment = t
        .engine
        .enroll_contact(&EnrollContact {
            journey_id: journey.id,
            contact_id,
            context: payload(json!({"campaign": "spring"})),
            source: Some("import".to_string()),
        })
        .await
        .expect("Failed to enroll");
    assert_eq!(enrollment.status, EnrollmentStatus::Completed);
    assert_eq!(enrollment.source, "import");

    let contact = t
        .engine
        .get_contact(&Id { id: contact_id })
        .await
        .expect("Failed to load contact")
        .expect("Contact should exist");
    assert_eq!(contact.lifecycle_stage.as_deref(), Some("mql"));
    assert_eq!(contact.lead_score, Some(40));
    assert_eq!(contact.custom_fields["referrer"], "spring");

    let activities = t
        .engine
        .list_activities(&Id { id: contact_id })
        .await
        .expect("Failed to list activities");
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].activity_type, "note");
    assert_eq!(activities[0].subject, "Ada is now mql");
    assert!(activities[0].ai_generated);
}

#[tokio::test]
async fn test_sweep_isolates_failing_items() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let (journey, _) = linear_journey(
        &t.engine,
        &[
            ("delay", json!({"amount": 10, "unit": "minutes"})),
            ("send_email", json!({"subject": "Hi", "body": "<p>Hi</p>"})),
        ],
    )
    .await;

    let no_email = t
        .engine
        .create_contact(&CreateContact {
            company_id: "acme".to_string(),
            first_name: Some("Nobody".to_string()),
            ..Default::default()
        })
        .await
        .expect("Failed to create contact");
    let with_email = create_contact(&t.engine, None).await;

    let broken = t
        .engine
        .enroll_contact(&enroll(journey.id, no_email.id))
        .await
        .expect("Failed to enroll");
    let healthy = t
        .engine
        .enroll_contact(&enroll(journey.id, with_email))
        .await
        .expect("Failed to enroll");

    let report = t
        .engine
        .process_scheduled_executions(Timestamp::now() + SignedDuration::from_hours(1))
        .await
        .expect("Sweep should not fail as a whole");
    assert_eq!(report.processed, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);

    let failed = report
        .items
        .iter()
        .find(|item| item.enrollment_id == broken.id)
        .expect("broken item");
    assert!(!failed.success);
    assert!(failed.error.as_deref().is_some_and(|e| e.contains("email")));

    let ok = report
        .items
        .iter()
        .find(|item| item.enrollment_id == healthy.id)
        .expect("healthy item");
    assert_eq!(ok.status, Some(EnrollmentStatus::Completed));

    // The failed delay was resumed, so a second sweep finds nothing
    let report = t
        .engine
        .process_scheduled_executions(Timestamp::now() + SignedDuration::from_hours(2))
        .await
        .expect("Failed to sweep");
    assert_eq!(report.processed, 0);
}

#[tokio::test]
async fn test_sweep_respects_batch_size() {
    let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let engine = EngineBuilder::new()
        .with_database_path(Some(temp_dir.path().join("test.db")))
        .with_sweep_batch_size(2)
        .build()
        .await
        .expect("Failed to create engine");
    let (journey, _) = linear_journey(
        &engine,
        &[
            ("delay", json!({"amount": 1, "unit": "minutes"})),
            ("add_tag", json!({"tags": ["swept"]})),
        ],
    )
    .await;
    for _ in 0..3 {
        let contact_id = create_contact(&engine, None).await;
        engine
            .enroll_contact(&enroll(journey.id, contact_id))
            .await
            .expect("Failed to enroll");
    }

    let later = Timestamp::now() + SignedDuration::from_mins(5);
    let first = engine
        .process_scheduled_executions(later)
        .await
        .expect("Failed to sweep");
    assert_eq!(first.processed, 2);
    let second = engine
        .process_scheduled_executions(later)
        .await
        .expect("Failed to sweep");
    assert_eq!(second.processed, 1);
    assert_eq!(second.succeeded, 1);
}

#[tokio::test]
async fn test_paused_journey_refuses_new_enrollments_but_sweeps_existing() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let (journey, _) = linear_journey(
        &t.engine,
        &[
            ("delay", json!({"amount": 1, "unit": "hours"})),
            ("exit", json!({"reason": "finished"})),
        ],
    )
    .await;
    let first = create_contact(&t.engine, None).await;
    let second = create_contact(&t.engine, None).await;
    let enrollment = t
        .engine
        .enroll_contact(&enroll(journey.id, first))
        .await
        .expect("Failed to enroll");

    t.engine
        .pause_journey(&Id { id: journey.id })
        .await
        .expect("Failed to pause");
    let err = t
        .engine
        .enroll_contact(&enroll(journey.id, second))
        .await
        .unwrap_err();
    assert!(matches!(err, JourneyError::NotFound { .. }));

    let report = t
        .engine
        .process_scheduled_executions(Timestamp::now() + SignedDuration::from_hours(2))
        .await
        .expect("Failed to sweep");
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].enrollment_id, enrollment.id);
    assert_eq!(report.items[0].status, Some(EnrollmentStatus::Completed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_journeys_keep_every_tag() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let mut journey_ids = Vec::new();
    for tag in ["a", "b"] {
        let (journey, _) = linear_journey(
            &t.engine,
            &[("add_tag", json!({"tags": [tag]})), ("exit", Value::Null)],
        )
        .await;
        journey_ids.push(journey.id);
    }

    let mut contact_ids = Vec::new();
    for _ in 0..50 {
        contact_ids.push(create_contact(&t.engine, None).await);
    }

    let mut tasks = Vec::new();
    for &contact_id in &contact_ids {
        for &journey_id in &journey_ids {
            let engine = t.engine.clone();
            tasks.push(tokio::spawn(async move {
                engine.enroll_contact(&enroll(journey_id, contact_id)).await
            }));
        }
    }
    for task in tasks {
        let enrollment = task.await.expect("task panicked").expect("Failed to enroll");
        assert_eq!(enrollment.status, EnrollmentStatus::Completed);
    }

    for contact_id in contact_ids {
        let contact = t
            .engine
            .get_contact(&Id { id: contact_id })
            .await
            .unwrap()
            .unwrap();
        let mut tags = contact.ai_tags.clone();
        tags.sort();
        assert_eq!(tags, vec!["a", "b"], "contact {contact_id} lost a tag");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_step_keeps_its_lease() {
    let t = create_test_engine_with(
        EngineBuilder::new().with_lease_seconds(1),
        ScriptedCompletion::failing(),
    )
    .await;
    t.email.set_delay(Duration::from_millis(1500));
    let (journey, _) = linear_journey(
        &t.engine,
        &[
            ("send_email", json!({"subject": "Hi", "body": "Hello"})),
            ("exit", Value::Null),
        ],
    )
    .await;
    let contact_id = create_contact(&t.engine, None).await;

    let (engine, journey_id) = (t.engine.clone(), journey.id);
    let first =
        tokio::spawn(async move { engine.enroll_contact(&enroll(journey_id, contact_id)).await });

    // Past the one second lease while the email is still being sent
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let enrollments = t
        .engine
        .list_enrollments(&ListEnrollments {
            journey_id: Some(journey.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(enrollments.len(), 1);

    let err = t
        .engine
        .process_step(&Id { id: enrollments[0].id })
        .await
        .unwrap_err();
    assert!(matches!(err, JourneyError::Conflict { .. }), "{err:?}");

    let enrollment = first.await.expect("task panicked").unwrap();
    assert_eq!(enrollment.status, EnrollmentStatus::Completed);
    assert_eq!(enrollment.emails_sent, 1);
    assert_eq!(t.email.sent().len(), 1);
}

#[tokio::test]
async fn test_sweep_runs_enrollment_stored_without_a_run() {
    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let (journey, steps) = linear_journey(
        &t.engine,
        &[("add_tag", json!({"tags": ["vip"]})), ("exit", Value::Null)],
    )
    .await;
    let contact_id = create_contact(&t.engine, None).await;

    // Stored the way enroll_contact stores it, then left unrun
    let mut db = Database::new(t.temp_dir.path().join("test.db")).expect("Failed to open db");
    let stored = db
        .create_enrollment(&journey, contact_id, Some(steps[0].id), &Map::new(), "manual")
        .expect("Failed to store enrollment");

    let report = t
        .engine
        .process_scheduled_executions(Timestamp::now())
        .await
        .expect("Failed to sweep");
    assert_eq!(report.processed, 0, "fresh enrollments are left to their caller");

    let report = t
        .engine
        .process_scheduled_executions(Timestamp::now() + SignedDuration::from_mins(5))
        .await
        .expect("Failed to sweep");
    assert_eq!(report.processed, 1);
    assert_eq!(report.items[0].enrollment_id, stored.id);
    assert!(report.items[0].execution_id.is_some());
    assert_eq!(report.items[0].status, Some(EnrollmentStatus::Completed));

    let contact = t
        .engine
        .get_contact(&Id { id: contact_id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(contact.ai_tags, vec!["vip"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_enrollments_all_finish() {
    const CONTACTS: usize = 300;

    let t = create_test_engine(ScriptedCompletion::failing()).await;
    let (journey, _) = linear_journey(
        &t.engine,
        &[("add_tag", json!({"tags": ["vip"]})), ("exit", Value::Null)],
    )
    .await;
    let mut contact_ids = Vec::new();
    for _ in 0..CONTACTS {
        contact_ids.push(create_contact(&t.engine, None).await);
    }

    let tasks: Vec<_> = contact_ids
        .iter()
        .map(|&contact_id| {
            let (engine, journey_id) = (t.engine.clone(), journey.id);
            tokio::spawn(async move {
                let result = engine.enroll_contact(&enroll(journey_id, contact_id)).await;
                (contact_id, result)
            })
        })
        .collect();

    let mut unenrolled = Vec::new();
    for task in tasks {
        let (contact_id, result) = task.await.expect("task panicked");
        match result {
            Ok(_) => {}
            // Nothing was stored, so enrolling again must be possible
            Err(e) if e.is_busy() => unenrolled.push(contact_id),
            Err(e) => panic!("enrolling contact {contact_id} failed: {e:?}"),
        }
    }
    for contact_id in unenrolled {
        t.engine
            .enroll_contact(&enroll(journey.id, contact_id))
            .await
            .expect("Failed to enroll again");
    }

    // Anything stored but not run is finished by the sweep
    for _ in 0..10 {
        let report = t
            .engine
            .process_scheduled_executions(Timestamp::now() + SignedDuration::from_mins(5))
            .await
            .expect("Failed to sweep");
        if report.processed == 0 {
            break;
        }
    }

    let enrollments = t
        .engine
        .list_enrollments(&ListEnrollments {
            journey_id: Some(journey.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(enrollments.len(), CONTACTS);
    let unfinished: Vec<u64> = enrollments
        .iter()
        .filter(|e| e.status != EnrollmentStatus::Completed)
        .map(|e| e.id)
        .collect();
    assert!(unfinished.is_empty(), "enrollments left unfinished: {unfinished:?}");

    for contact_id in contact_ids {
        let contact = t
            .engine
            .get_contact(&Id { id: contact_id })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contact.ai_tags, vec!["vip"], "contact {contact_id}");
    }

    let journey = t
        .engine
        .get_journey(&Id { id: journey.id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(journey.total_enrolled, CONTACTS as u64);
}
