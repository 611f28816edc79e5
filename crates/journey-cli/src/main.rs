//! Journey CLI Application
//!
//! Command-line interface and HTTP endpoint for the journey automation engine.

mod args;
mod cli;
mod renderer;
mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use args::{AiOptions, Args, Commands, EmailOptions, LimitOptions};
use clap::Parser;
use cli::Cli;
use journey_core::{
    collaborators::REQUEST_TIMEOUT, params::ListJourneys, EngineBuilder, EngineRequest,
    HttpEmailConfig, HttpEmailSender, OpenAiCompletion, OpenAiConfig,
};
use log::{info, warn};
use renderer::TerminalRenderer;
use Commands::*;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let Args {
        database_file,
        no_color,
        email,
        ai,
        limits,
        command,
    } = Args::parse();

    let mut builder = EngineBuilder::new().with_database_path(database_file);
    if let Some(sender) = email_sender(email)? {
        builder = builder.with_email_sender(Arc::new(sender));
    }
    if let Some(completion) = completion_provider(ai)? {
        builder = builder.with_completion_provider(Arc::new(completion));
    }
    let engine = apply_limits(builder, &limits)
        .build()
        .await
        .context("Failed to initialize engine")?;

    let renderer = TerminalRenderer::new(!no_color);

    info!("Journey engine started");

    match command {
        Some(Journey { command }) => {
            Cli::new(engine, renderer)
                .handle_journey_command(command)
                .await
        }
        Some(Step { command }) => Cli::new(engine, renderer).handle_step_command(command).await,
        Some(Contact { command }) => {
            Cli::new(engine, renderer)
                .handle_contact_command(command)
                .await
        }
        Some(Enrollment { command }) => {
            Cli::new(engine, renderer)
                .handle_enrollment_command(command)
                .await
        }
        Some(Enroll(args)) => Cli::new(engine, renderer).enroll(args).await,
        Some(Process(args)) => Cli::new(engine, renderer).process(args).await,
        Some(Sweep(args)) => Cli::new(engine, renderer).sweep(args).await,
        Some(Trigger(args)) => Cli::new(engine, renderer).trigger(args).await,
        Some(Serve(args)) => {
            info!("Starting journey HTTP endpoint on {}", args.listen);
            server::run(engine, args).await.context("HTTP endpoint failed")
        }
        Some(Schema) => {
            let schema = schemars::schema_for!(EngineRequest);
            let json =
                serde_json::to_string_pretty(&schema).context("Failed to serialize schema")?;
            println!("{json}");
            Ok(())
        }
        None => {
            Cli::new(engine, renderer)
                .list_journeys(&ListJourneys::default())
                .await
        }
    }
}

/// Builds the email sender when the API url, key and sender address are all
/// configured.
fn email_sender(options: EmailOptions) -> Result<Option<HttpEmailSender>> {
    match (options.email_api_url, options.email_api_key, options.email_from) {
        (Some(api_url), Some(api_key), Some(from_email)) => {
            let sender = HttpEmailSender::new(HttpEmailConfig {
                api_url,
                api_key,
                from_email,
                from_name: options.email_from_name,
                timeout: REQUEST_TIMEOUT,
            })?;
            Ok(Some(sender))
        }
        (None, None, None) => Ok(None),
        _ => {
            warn!("Email API partially configured; send_email steps will fail");
            Ok(None)
        }
    }
}

fn completion_provider(options: AiOptions) -> Result<Option<OpenAiCompletion>> {
    let Some(api_key) = options.openai_api_key else {
        return Ok(None);
    };
    let mut config = OpenAiConfig::new(api_key);
    if let Some(model) = options.openai_model {
        config.model = model;
    }
    if let Some(base_url) = options.openai_base_url {
        config.base_url = base_url;
    }
    Ok(Some(OpenAiCompletion::new(config)?))
}

fn apply_limits(mut builder: EngineBuilder, limits: &LimitOptions) -> EngineBuilder {
    if let Some(size) = limits.sweep_batch_size {
        builder = builder.with_sweep_batch_size(size);
    }
    if let Some(steps) = limits.max_steps_per_run {
        builder = builder.with_max_steps_per_run(steps);
    }
    if let Some(seconds) = limits.lease_seconds {
        builder = builder.with_lease_seconds(seconds);
    }
    builder
}
