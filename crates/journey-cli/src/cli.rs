//! Command-line argument structures and their handlers.
//!
//! Argument structs carry the clap derives and convert into the core
//! parameter types, so core params stay free of CLI concerns:
//!
//! ```text
//! User Input → CLI Args (clap) → Core Params → Engine
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use jiff::Timestamp;
use journey_core::{
    display::{
        Activities, Contacts, CreateResult, DeleteResult, Enrollments, Journeys, StatusChange,
        TriggerMatches, UpdateResult,
    },
    models::TriggerType,
    params::*,
    Engine,
};
use serde_json::{Map, Value};

use crate::renderer::TerminalRenderer;

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))
}

fn parse_json_object(raw: &str) -> Result<Map<String, Value>, String> {
    match parse_json(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(format!("expected a JSON object, got {other}")),
    }
}

// ============================================================================
// Journeys
// ============================================================================

#[derive(Args)]
pub struct CreateJourneyArgs {
    /// Name of the journey
    pub name: String,
    /// Owning company
    #[arg(long)]
    pub company: String,
    #[arg(short, long)]
    pub description: Option<String>,
    /// Event type that enrolls contacts automatically
    #[arg(long, default_value = "manual")]
    pub trigger: TriggerType,
    /// Trigger conditions as a JSON object
    #[arg(long, value_parser = parse_json)]
    pub conditions: Option<Value>,
    /// Let a contact hold more than one active enrollment
    #[arg(long)]
    pub allow_re_enrollment: bool,
}

impl From<CreateJourneyArgs> for CreateJourney {
    fn from(val: CreateJourneyArgs) -> Self {
        CreateJourney {
            company_id: val.company,
            name: val.name,
            description: val.description,
            trigger_type: val.trigger,
            trigger_conditions: val.conditions.unwrap_or(Value::Null),
            allow_re_enrollment: val.allow_re_enrollment,
        }
    }
}

#[derive(Args)]
pub struct ListJourneysArgs {
    #[arg(long)]
    pub company: Option<String>,
    /// Only journeys in this status (draft, active, paused)
    #[arg(long)]
    pub status: Option<String>,
}

impl From<ListJourneysArgs> for ListJourneys {
    fn from(val: ListJourneysArgs) -> Self {
        ListJourneys {
            company_id: val.company,
            status: val.status,
        }
    }
}

#[derive(Args)]
pub struct UpdateJourneyArgs {
    pub id: u64,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(short, long)]
    pub description: Option<String>,
    #[arg(long)]
    pub trigger: Option<TriggerType>,
    /// Trigger conditions as a JSON object
    #[arg(long, value_parser = parse_json)]
    pub conditions: Option<Value>,
    #[arg(long)]
    pub allow_re_enrollment: Option<bool>,
}

impl UpdateJourneyArgs {
    fn changes(&self) -> Vec<String> {
        let mut changes = Vec::new();
        if let Some(name) = &self.name {
            changes.push(format!("name to '{name}'"));
        }
        if self.description.is_some() {
            changes.push("description".to_string());
        }
        if let Some(trigger) = self.trigger {
            changes.push(format!("trigger to {trigger}"));
        }
        if self.conditions.is_some() {
            changes.push("trigger conditions".to_string());
        }
        if let Some(allow) = self.allow_re_enrollment {
            changes.push(format!("re-enrollment to {allow}"));
        }
        changes
    }
}

impl From<UpdateJourneyArgs> for UpdateJourney {
    fn from(val: UpdateJourneyArgs) -> Self {
        UpdateJourney {
            id: val.id,
            name: val.name,
            description: val.description,
            trigger_type: val.trigger,
            trigger_conditions: val.conditions,
            allow_re_enrollment: val.allow_re_enrollment,
        }
    }
}

#[derive(Args)]
pub struct IdArgs {
    pub id: u64,
}

impl From<IdArgs> for Id {
    fn from(val: IdArgs) -> Self {
        Id { id: val.id }
    }
}

#[derive(Subcommand)]
pub enum JourneyCommands {
    /// Create a draft journey
    #[command(alias = "c")]
    Create(CreateJourneyArgs),
    /// List journeys
    #[command(alias = "l")]
    List(ListJourneysArgs),
    /// Show a journey with its steps
    #[command(alias = "s")]
    Show(IdArgs),
    /// Update name, description, trigger or re-enrollment
    #[command(alias = "u")]
    Update(UpdateJourneyArgs),
    /// Delete a journey with its steps and enrollments
    Delete(IdArgs),
    /// Check a journey graph without changing it
    #[command(alias = "v")]
    Validate(IdArgs),
    /// Validate and activate a journey
    Activate(IdArgs),
    /// Pause an active journey
    Pause(IdArgs),
}

// ============================================================================
// Steps
// ============================================================================

#[derive(Args)]
pub struct AddStepArgs {
    /// Journey to add the step to
    pub journey_id: u64,
    /// Display name of the step
    pub name: String,
    /// send_email, delay, condition, ai_decision, update_contact, add_tag,
    /// remove_tag, create_activity or exit
    #[arg(long = "type")]
    pub step_type: String,
    /// Step configuration as a JSON object
    #[arg(long, value_parser = parse_json)]
    pub config: Option<Value>,
    /// Explicit position; appended after the last step otherwise
    #[arg(long)]
    pub position: Option<u32>,
    #[arg(long)]
    pub x: Option<f64>,
    #[arg(long)]
    pub y: Option<f64>,
}

impl From<AddStepArgs> for CreateStep {
    fn from(val: AddStepArgs) -> Self {
        CreateStep {
            journey_id: val.journey_id,
            name: val.name,
            step_type: val.step_type,
            config: val.config.unwrap_or(Value::Null),
            position: val.position,
            canvas_x: val.x,
            canvas_y: val.y,
        }
    }
}

#[derive(Args)]
pub struct UpdateStepArgs {
    pub id: u64,
    #[arg(long)]
    pub name: Option<String>,
    /// New step type; requires a matching --config
    #[arg(long = "type")]
    pub step_type: Option<String>,
    #[arg(long, value_parser = parse_json)]
    pub config: Option<Value>,
    #[arg(long)]
    pub position: Option<u32>,
    #[arg(long)]
    pub x: Option<f64>,
    #[arg(long)]
    pub y: Option<f64>,
}

impl UpdateStepArgs {
    fn changes(&self) -> Vec<String> {
        let mut changes = Vec::new();
        if let Some(name) = &self.name {
            changes.push(format!("name to '{name}'"));
        }
        if let Some(step_type) = &self.step_type {
            changes.push(format!("type to {step_type}"));
        }
        if self.config.is_some() {
            changes.push("configuration".to_string());
        }
        if let Some(position) = self.position {
            changes.push(format!("position to {position}"));
        }
        if self.x.is_some() || self.y.is_some() {
            changes.push("canvas position".to_string());
        }
        changes
    }
}

impl From<UpdateStepArgs> for UpdateStep {
    fn from(val: UpdateStepArgs) -> Self {
        UpdateStep {
            id: val.id,
            name: val.name,
            step_type: val.step_type,
            config: val.config,
            position: val.position,
            canvas_x: val.x,
            canvas_y: val.y,
        }
    }
}

#[derive(Args)]
pub struct ConnectStepsArgs {
    pub from_step_id: u64,
    /// next, true, false or option:<key>
    pub port: String,
    /// Target step; omit to disconnect the port
    pub to_step_id: Option<u64>,
}

impl From<ConnectStepsArgs> for ConnectSteps {
    fn from(val: ConnectStepsArgs) -> Self {
        ConnectSteps {
            from_step_id: val.from_step_id,
            port: val.port,
            to_step_id: val.to_step_id,
        }
    }
}

#[derive(Subcommand)]
pub enum StepCommands {
    /// Add a step to a journey
    #[command(alias = "a")]
    Add(AddStepArgs),
    /// Update a step's name, type, configuration or layout
    #[command(alias = "u")]
    Update(UpdateStepArgs),
    /// Point a step's outgoing port at another step
    Connect(ConnectStepsArgs),
    /// Delete a step
    Delete(IdArgs),
}

// ============================================================================
// Contacts and enrollments
// ============================================================================

#[derive(Args)]
pub struct CreateContactArgs {
    #[arg(long)]
    pub company: String,
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub first_name: Option<String>,
    #[arg(long)]
    pub last_name: Option<String>,
    #[arg(long)]
    pub stage: Option<String>,
    /// Tag to add; repeatable
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    /// Custom fields as a JSON object
    #[arg(long, value_parser = parse_json_object)]
    pub fields: Option<Map<String, Value>>,
}

impl From<CreateContactArgs> for CreateContact {
    fn from(val: CreateContactArgs) -> Self {
        CreateContact {
            company_id: val.company,
            email: val.email,
            first_name: val.first_name,
            last_name: val.last_name,
            lifecycle_stage: val.stage,
            tags: val.tags,
            custom_fields: val.fields.unwrap_or_default(),
        }
    }
}

#[derive(Args)]
pub struct ListContactsArgs {
    #[arg(long)]
    pub company: String,
}

#[derive(Subcommand)]
pub enum ContactCommands {
    /// Create a contact
    #[command(alias = "c")]
    Create(CreateContactArgs),
    /// Show a contact
    #[command(alias = "s")]
    Show(IdArgs),
    /// List a company's contacts
    #[command(alias = "l")]
    List(ListContactsArgs),
    /// List activities recorded for a contact
    Activities(IdArgs),
}

#[derive(Args)]
pub struct ListEnrollmentsArgs {
    #[arg(long)]
    pub journey: Option<u64>,
    #[arg(long)]
    pub contact: Option<u64>,
    /// Only enrollments in this status (active, completed, paused, failed)
    #[arg(long)]
    pub status: Option<String>,
}

impl From<ListEnrollmentsArgs> for ListEnrollments {
    fn from(val: ListEnrollmentsArgs) -> Self {
        ListEnrollments {
            journey_id: val.journey,
            contact_id: val.contact,
            status: val.status,
        }
    }
}

#[derive(Subcommand)]
pub enum EnrollmentCommands {
    /// Show an enrollment with its execution history
    #[command(alias = "s")]
    Show(IdArgs),
    /// List enrollments
    #[command(alias = "l")]
    List(ListEnrollmentsArgs),
}

// ============================================================================
// Engine actions
// ============================================================================

#[derive(Args)]
pub struct EnrollArgs {
    pub journey_id: u64,
    pub contact_id: u64,
    /// Initial enrollment context as a JSON object
    #[arg(long, value_parser = parse_json_object)]
    pub context: Option<Map<String, Value>>,
    /// Enrollment source recorded on the enrollment
    #[arg(long)]
    pub source: Option<String>,
}

impl From<EnrollArgs> for EnrollContact {
    fn from(val: EnrollArgs) -> Self {
        EnrollContact {
            journey_id: val.journey_id,
            contact_id: val.contact_id,
            context: val.context.unwrap_or_default(),
            source: val.source,
        }
    }
}

#[derive(Args)]
pub struct ProcessArgs {
    pub enrollment_id: u64,
}

#[derive(Args)]
pub struct SweepArgs {
    /// Treat this RFC 3339 instant as now
    #[arg(long)]
    pub at: Option<Timestamp>,
}

#[derive(Args)]
pub struct TriggerArgs {
    /// lifecycle_change, tag_added, deal_created, deal_stage_changed,
    /// contact_created or form_submitted
    pub trigger_type: TriggerType,
    /// Event payload as a JSON object; must carry company_id and contact_id
    #[arg(long, value_parser = parse_json_object)]
    pub data: Map<String, Value>,
}

impl From<TriggerArgs> for CheckTriggers {
    fn from(val: TriggerArgs) -> Self {
        CheckTriggers {
            trigger_type: val.trigger_type,
            trigger_data: val.data,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Runs CLI commands against the engine and renders their output.
pub struct Cli {
    engine: Engine,
    renderer: TerminalRenderer,
}

impl Cli {
    pub fn new(engine: Engine, renderer: TerminalRenderer) -> Self {
        Self { engine, renderer }
    }

    fn print(&self, output: impl ToString) -> Result<()> {
        self.renderer.render(&output.to_string())
    }

    pub async fn handle_journey_command(&self, command: JourneyCommands) -> Result<()> {
        match command {
            JourneyCommands::Create(args) => {
                let journey = self
                    .engine
                    .create_journey(&args.into())
                    .await
                    .context("Failed to create journey")?;
                self.print(CreateResult::new(journey))
            }
            JourneyCommands::List(args) => self.list_journeys(&args.into()).await,
            JourneyCommands::Show(args) => {
                let id = args.id;
                let journey = self
                    .engine
                    .get_journey(&args.into())
                    .await
                    .context("Failed to get journey")?
                    .ok_or_else(|| anyhow!("Journey with ID {id} not found"))?;
                self.print(journey)
            }
            JourneyCommands::Update(args) => {
                let changes = args.changes();
                let journey = self
                    .engine
                    .update_journey(&args.into())
                    .await
                    .context("Failed to update journey")?;
                self.print(UpdateResult::with_changes(journey, changes))
            }
            JourneyCommands::Delete(args) => {
                let id = args.id;
                match self
                    .engine
                    .delete_journey(&args.into())
                    .await
                    .context("Failed to delete journey")?
                {
                    Some(journey) => self.print(DeleteResult::new(journey)),
                    None => Err(anyhow!("Journey with ID {id} not found")),
                }
            }
            JourneyCommands::Validate(args) => {
                let report = self
                    .engine
                    .validate_journey(&args.into())
                    .await
                    .context("Failed to validate journey")?;
                self.print(report)
            }
            JourneyCommands::Activate(args) => {
                let journey = self
                    .engine
                    .activate_journey(&args.into())
                    .await
                    .context("Failed to activate journey")?;
                self.print(StatusChange::new(journey))
            }
            JourneyCommands::Pause(args) => {
                let journey = self
                    .engine
                    .pause_journey(&args.into())
                    .await
                    .context("Failed to pause journey")?;
                self.print(StatusChange::new(journey))
            }
        }
    }

    /// Lists journeys. Also the default command.
    pub async fn list_journeys(&self, params: &ListJourneys) -> Result<()> {
        let journeys = self
            .engine
            .list_journeys(params)
            .await
            .context("Failed to list journeys")?;
        self.print(Journeys::from(journeys))
    }

    pub async fn handle_step_command(&self, command: StepCommands) -> Result<()> {
        match command {
            StepCommands::Add(args) => {
                let step = self
                    .engine
                    .create_step(&args.into())
                    .await
                    .context("Failed to add step")?;
                self.print(CreateResult::new(step))
            }
            StepCommands::Update(args) => {
                let changes = args.changes();
                let step = self
                    .engine
                    .update_step(&args.into())
                    .await
                    .context("Failed to update step")?;
                self.print(UpdateResult::with_changes(step, changes))
            }
            StepCommands::Connect(args) => {
                let port = args.port.clone();
                let step = self
                    .engine
                    .connect_steps(&args.into())
                    .await
                    .context("Failed to connect steps")?;
                self.print(UpdateResult::with_changes(step, vec![format!("port {port}")]))
            }
            StepCommands::Delete(args) => {
                let step = self
                    .engine
                    .delete_step(&args.into())
                    .await
                    .context("Failed to delete step")?;
                self.print(DeleteResult::new(step))
            }
        }
    }

    pub async fn handle_contact_command(&self, command: ContactCommands) -> Result<()> {
        match command {
            ContactCommands::Create(args) => {
                let contact = self
                    .engine
                    .create_contact(&args.into())
                    .await
                    .context("Failed to create contact")?;
                self.print(CreateResult::new(contact))
            }
            ContactCommands::Show(args) => {
                let id = args.id;
                let contact = self
                    .engine
                    .get_contact(&args.into())
                    .await
                    .context("Failed to get contact")?
                    .ok_or_else(|| anyhow!("Contact with ID {id} not found"))?;
                self.print(contact)
            }
            ContactCommands::List(args) => {
                let contacts = self
                    .engine
                    .list_contacts(&ListContacts {
                        company_id: args.company,
                    })
                    .await
                    .context("Failed to list contacts")?;
                self.print(Contacts(contacts))
            }
            ContactCommands::Activities(args) => {
                let activities = self
                    .engine
                    .list_activities(&args.into())
                    .await
                    .context("Failed to list activities")?;
                self.print(Activities(activities))
            }
        }
    }

    pub async fn handle_enrollment_command(&self, command: EnrollmentCommands) -> Result<()> {
        match command {
            EnrollmentCommands::Show(args) => {
                let id = args.id;
                let enrollment = self
                    .engine
                    .get_enrollment(&args.into())
                    .await
                    .context("Failed to get enrollment")?
                    .ok_or_else(|| anyhow!("Enrollment with ID {id} not found"))?;
                self.print(enrollment)
            }
            EnrollmentCommands::List(args) => {
                let enrollments = self
                    .engine
                    .list_enrollments(&args.into())
                    .await
                    .context("Failed to list enrollments")?;
                self.print(Enrollments::from(enrollments))
            }
        }
    }

    pub async fn enroll(&self, args: EnrollArgs) -> Result<()> {
        let enrollment = self
            .engine
            .enroll_contact(&args.into())
            .await
            .context("Failed to enroll contact")?;
        self.print(enrollment)
    }

    pub async fn process(&self, args: ProcessArgs) -> Result<()> {
        let enrollment = self
            .engine
            .process_step(&Id {
                id: args.enrollment_id,
            })
            .await
            .context("Failed to process enrollment")?;
        self.print(enrollment)
    }

    pub async fn sweep(&self, args: SweepArgs) -> Result<()> {
        let now = args.at.unwrap_or_else(Timestamp::now);
        let report = self
            .engine
            .process_scheduled_executions(now)
            .await
            .context("Failed to process scheduled executions")?;
        self.print(report)
    }

    pub async fn trigger(&self, args: TriggerArgs) -> Result<()> {
        let matches = self
            .engine
            .check_triggers(&args.into())
            .await
            .context("Failed to check triggers")?;
        self.print(TriggerMatches(matches))
    }
}
