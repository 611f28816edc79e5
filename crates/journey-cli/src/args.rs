use std::{net::SocketAddr, path::PathBuf};

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::cli::{
    ContactCommands, EnrollArgs, EnrollmentCommands, JourneyCommands, ProcessArgs, StepCommands,
    SweepArgs, TriggerArgs,
};

/// Marketing journey automation engine
///
/// Journeys are graphs of email, delay, condition, AI decision and CRM steps.
/// Contacts are enrolled manually or by trigger events and run through the
/// steps; delays park them until a sweep resumes them. The engine is driven
/// from this CLI or through its JSON HTTP endpoint (`journey serve`).
#[derive(Parser)]
#[command(version, about, name = "journey")]
pub struct Args {
    /// Path to the SQLite database file. Defaults to
    /// $XDG_DATA_HOME/journey/journey.db
    #[arg(long, global = true, env = "JOURNEY_DATABASE_FILE")]
    pub database_file: Option<PathBuf>,

    /// Disable colored output and use plain text
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(flatten)]
    pub email: EmailOptions,

    #[command(flatten)]
    pub ai: AiOptions,

    #[command(flatten)]
    pub limits: LimitOptions,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Transactional email API used by `send_email` steps.
#[derive(ClapArgs)]
pub struct EmailOptions {
    /// Endpoint accepting one JSON POST per email
    #[arg(long, global = true, env = "EMAIL_API_URL")]
    pub email_api_url: Option<String>,

    #[arg(long, global = true, env = "EMAIL_API_KEY", hide_env_values = true)]
    pub email_api_key: Option<String>,

    /// Sender address
    #[arg(long, global = true, env = "EMAIL_FROM")]
    pub email_from: Option<String>,

    /// Sender display name
    #[arg(long, global = true, env = "EMAIL_FROM_NAME")]
    pub email_from_name: Option<String>,
}

/// OpenAI-compatible completion API used by `ai_decision` steps.
#[derive(ClapArgs)]
pub struct AiOptions {
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, global = true, env = "OPENAI_MODEL")]
    pub openai_model: Option<String>,

    #[arg(long, global = true, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,
}

/// Engine runtime limits.
#[derive(ClapArgs)]
pub struct LimitOptions {
    /// Maximum scheduled executions resumed per sweep
    #[arg(long, global = true, env = "JOURNEY_SWEEP_BATCH_SIZE")]
    pub sweep_batch_size: Option<usize>,

    /// Maximum steps one enrollment runs per invocation
    #[arg(long, global = true, env = "JOURNEY_MAX_STEPS_PER_RUN")]
    pub max_steps_per_run: Option<usize>,

    /// Seconds an enrollment processing lease stays valid
    #[arg(long, global = true, env = "JOURNEY_LEASE_SECONDS")]
    pub lease_seconds: Option<u64>,
}

/// Available commands for the journey CLI
///
/// - `journey`, `step`: build and manage journey graphs
/// - `contact`, `enrollment`: inspect CRM contacts and their enrollments
/// - `enroll`, `process`, `sweep`, `trigger`: drive the engine
/// - `serve`: run the HTTP endpoint
/// - `schema`: print the JSON Schema of the endpoint's request body
#[derive(Subcommand)]
pub enum Commands {
    /// Manage journeys
    #[command(alias = "j")]
    Journey {
        #[command(subcommand)]
        command: JourneyCommands,
    },
    /// Manage steps within journeys
    #[command(alias = "s")]
    Step {
        #[command(subcommand)]
        command: StepCommands,
    },
    /// Manage contacts
    #[command(alias = "c")]
    Contact {
        #[command(subcommand)]
        command: ContactCommands,
    },
    /// Inspect enrollments
    #[command(alias = "e")]
    Enrollment {
        #[command(subcommand)]
        command: EnrollmentCommands,
    },
    /// Enroll a contact into an active journey and run it
    Enroll(EnrollArgs),
    /// Continue an enrollment from its current step
    Process(ProcessArgs),
    /// Resume delays that are due
    Sweep(SweepArgs),
    /// Enroll a contact into every journey matching a trigger event
    Trigger(TriggerArgs),
    /// Start the HTTP endpoint
    Serve(ServeArgs),
    /// Print the JSON Schema of the endpoint request body
    Schema,
}

#[derive(ClapArgs)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080", env = "JOURNEY_LISTEN")]
    pub listen: SocketAddr,

    /// Run a sweep every N seconds in the background (disabled when unset)
    #[arg(long, env = "JOURNEY_SWEEP_INTERVAL")]
    pub sweep_interval: Option<u64>,
}
