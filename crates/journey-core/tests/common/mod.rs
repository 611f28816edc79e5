#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use journey_core::{
    collaborators::{ChatMessage, CompletionProvider, EmailMessage, EmailSender},
    models::{Journey, JourneyStep, TriggerType},
    params::{ConnectSteps, CreateContact, CreateJourney, CreateStep, Id},
    Engine, EngineBuilder, JourneyError, Result,
};
use serde_json::Value;
use tempfile::TempDir;

/// Email sender that records every message and can be switched to failing
/// or slowed down.
#[derive(Debug, Default)]
pub struct RecordingEmail {
    pub sent: Mutex<Vec<EmailMessage>>,
    pub failing: AtomicBool,
    pub delay: Mutex<Duration>,
}

impl RecordingEmail {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().expect("email log poisoned").clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes every send take `delay` before it is delivered.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("email delay poisoned") = delay;
    }
}

#[async_trait]
impl EmailSender for RecordingEmail {
    async fn send(&self, message: &EmailMessage) -> Result<String> {
        let delay = *self.delay.lock().expect("email delay poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(JourneyError::collaborator("email", "mailbox unavailable"));
        }
        let mut sent = self.sent.lock().expect("email log poisoned");
        sent.push(message.clone());
        Ok(format!("msg-{}", sent.len()))
    }
}

/// Completion provider with a fixed answer, or a failure when `None`.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    pub answer: Option<String>,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedCompletion {
    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().expect("prompt log poisoned").clone()
    }

    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            prompts: Mutex::default(),
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.prompts
            .lock()
            .expect("prompt log poisoned")
            .push(messages.to_vec());
        self.answer
            .clone()
            .ok_or_else(|| JourneyError::collaborator("completion", "model overloaded"))
    }
}

pub struct TestEngine {
    pub temp_dir: TempDir,
    pub engine: Engine,
    pub email: Arc<RecordingEmail>,
    pub ai: Arc<ScriptedCompletion>,
}

/// Helper function to create a test engine with a recording email sender
/// and the given completion provider.
pub async fn create_test_engine(ai: ScriptedCompletion) -> TestEngine {
    create_test_engine_with(EngineBuilder::new(), ai).await
}

/// Same as [`create_test_engine`] on top of a builder carrying custom limits.
pub async fn create_test_engine_with(builder: EngineBuilder, ai: ScriptedCompletion) -> TestEngine {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let email = Arc::new(RecordingEmail::default());
    let ai = Arc::new(ai);
    let engine = builder
        .with_database_path(Some(&db_path))
        .with_email_sender(email.clone())
        .with_completion_provider(ai.clone())
        .build()
        .await
        .expect("Failed to create engine");
    TestEngine {
        temp_dir,
        engine,
        email,
        ai,
    }
}

pub async fn create_journey(engine: &Engine, trigger_type: TriggerType, conditions: Value) -> Journey {
    engine
        .create_journey(&CreateJourney {
            company_id: "acme".to_string(),
            name: "Test journey".to_string(),
            description: None,
            trigger_type,
            trigger_conditions: conditions,
            allow_re_enrollment: false,
        })
        .await
        .expect("Failed to create journey")
}

pub async fn add_step(
    engine: &Engine,
    journey_id: u64,
    name: &str,
    step_type: &str,
    config: Value,
) -> JourneyStep {
    engine
        .create_step(&CreateStep {
            journey_id,
            name: name.to_string(),
            step_type: step_type.to_string(),
            config,
            position: None,
            canvas_x: None,
            canvas_y: None,
        })
        .await
        .expect("Failed to create step")
}

pub async fn connect(engine: &Engine, from: u64, port: &str, to: u64) {
    engine
        .connect_steps(&ConnectSteps {
            from_step_id: from,
            port: port.to_string(),
            to_step_id: Some(to),
        })
        .await
        .expect("Failed to connect steps");
}

/// Adds the given linear steps, links each to the next, and activates the
/// journey.
pub async fn linear_journey(engine: &Engine, steps: &[(&str, Value)]) -> (Journey, Vec<JourneyStep>) {
    let journey = create_journey(engine, TriggerType::Manual, Value::Null).await;
    let mut created = Vec::new();
    for (step_type, config) in steps {
        created.push(add_step(engine, journey.id, step_type, step_type, config.clone()).await);
    }
    for pair in created.windows(2) {
        connect(engine, pair[0].id, "next", pair[1].id).await;
    }
    let journey = engine
        .activate_journey(&Id { id: journey.id })
        .await
        .expect("Failed to activate journey");
    let steps = journey.steps.clone();
    (journey, steps)
}

pub async fn create_contact(engine: &Engine, lifecycle_stage: Option<&str>) -> u64 {
    engine
        .create_contact(&CreateContact {
            company_id: "acme".to_string(),
            email: Some("ada@example.com".to_string()),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            lifecycle_stage: lifecycle_stage.map(String::from),
            ..Default::default()
        })
        .await
        .expect("Failed to create contact")
        .id
}
