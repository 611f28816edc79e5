//! Enrollment, the step loop and the scheduled sweep.
//!
//! [`Engine::process_step`] drives one enrollment forward as far as it can:
//! it runs steps one after another until the enrollment completes, parks on
//! a delay, fails, or hits the per-run step limit. Each enrollment is
//! guarded by a processing lease so two callers never drive it at once. The
//! lease is renewed before every step and kept alive while a step's side
//! effect is in flight; every execution write checks it is still held.
//!
//! The sweep resumes due delays and also picks up enrollments that were left
//! mid-journey with nobody running them, such as a stored enrollment whose
//! first run hit a locked database.

use std::{collections::HashSet, future::Future, time::Duration};

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{
    dispatch::{StepInput, StepOutcome, Transition},
    Engine,
};
use crate::{
    db::{
        enrollment_queries::{EnrollmentProgress, StalledEnrollment},
        execution_queries::ExecutionRecord,
        Database,
    },
    error::{JourneyError, Result},
    models::{
        Contact, Enrollment, EnrollmentStatus, ExecutionStatus, JourneyStatus, JourneyStep,
        StepExecution,
    },
    params::{EnrollContact, Id},
};

/// How long an unleased active enrollment must sit untouched before the
/// sweep treats it as stalled.
const STALL_GRACE: SignedDuration = SignedDuration::from_secs(60);

/// Result of resuming one enrollment during a sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepItem {
    /// Execution the sweep resumed; `None` for a stalled enrollment whose
    /// current step has no execution yet
    pub execution_id: Option<u64>,
    pub enrollment_id: u64,
    pub success: bool,
    /// Enrollment status after processing, when it got that far
    pub status: Option<EnrollmentStatus>,
    pub error: Option<String>,
}

/// Outcome of one sweep over due scheduled executions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SweepReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<SweepItem>,
}

impl SweepReport {
    fn record(
        &mut self,
        execution_id: Option<u64>,
        enrollment_id: u64,
        outcome: Result<Enrollment>,
    ) {
        let item = match outcome {
            Ok(enrollment) => SweepItem {
                execution_id,
                enrollment_id,
                success: true,
                status: Some(enrollment.status),
                error: None,
            },
            Err(e) => {
                log::warn!("Failed to resume enrollment {enrollment_id}: {e}");
                SweepItem {
                    execution_id,
                    enrollment_id,
                    success: false,
                    status: None,
                    error: Some(e.to_string()),
                }
            }
        };

        self.processed += 1;
        if item.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.items.push(item);
    }
}

/// Everything one loop iteration needs, loaded in a single unit of work.
struct StepState {
    enrollment: Enrollment,
    step: JourneyStep,
    contact: Contact,
    execution: StepExecution,
}

enum Flow {
    Continue,
    Stop,
}

impl Engine {
    /// Enrolls a contact into an active journey and runs it as far as it
    /// goes.
    ///
    /// # Errors
    ///
    /// Returns `JourneyError::NotFound` when the journey is missing or not
    /// active, or the contact does not exist in the journey's company.
    /// Returns `JourneyError::Conflict` when the contact already has an
    /// active enrollment and the journey does not allow re-enrollment.
    /// Returns `JourneyError::Execution` when the first run fails a step.
    /// When the first run cannot start because the database is locked or
    /// another worker holds the lease, the stored enrollment is returned
    /// still `active` and the next sweep runs it.
    pub async fn enroll_contact(&self, params: &EnrollContact) -> Result<Enrollment> {
        let journey_id = params.journey_id;
        let contact_id = params.contact_id;
        let context = params.context.clone();
        let source = params.source.clone().unwrap_or_else(|| "manual".to_string());

        let enrollment = self
            .with_db(move |db| {
                let mut journey = db
                    .get_journey(journey_id)?
                    .filter(|j| j.status == JourneyStatus::Active)
                    .ok_or(JourneyError::NotFound {
                        entity: "Active journey",
                        id: journey_id,
                    })?;
                let contact = db
                    .get_contact(contact_id)?
                    .filter(|c| c.company_id == journey.company_id)
                    .ok_or(JourneyError::NotFound {
                        entity: "Contact",
                        id: contact_id,
                    })?;

                journey.steps = db.get_steps(journey_id)?;
                let entry_step_id = journey.entry_step().map(|s| s.id);
                db.create_enrollment(&journey, contact.id, entry_step_id, &context, &source)
            })
            .await?;

        log::info!(
            "Enrolled contact {contact_id} into journey {journey_id} (enrollment {})",
            enrollment.id
        );

        match self.process_enrollment(enrollment.id, Timestamp::now()).await {
            Err(e) if e.is_busy() || matches!(e, JourneyError::Conflict { .. }) => {
                // Stored but not run; the sweep picks it up as stalled
                log::warn!(
                    "Enrollment {} stored but not run yet: {e}",
                    enrollment.id
                );
                Ok(self.load_enrollment(enrollment.id).await.unwrap_or(enrollment))
            }
            run => run,
        }
    }

    /// Runs an enrollment from its current step.
    ///
    /// Non-active enrollments are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `JourneyError::Conflict` when another caller holds the
    /// enrollment's lease or takes it over mid-run, and
    /// `JourneyError::Execution` when a step fails.
    pub async fn process_step(&self, params: &Id) -> Result<Enrollment> {
        self.process_enrollment(params.id, Timestamp::now()).await
    }

    /// Runs an enrollment treating `now` as the current time for delay
    /// scheduling and due checks.
    pub async fn process_enrollment(&self, enrollment_id: u64, now: Timestamp) -> Result<Enrollment> {
        let enrollment = self.load_enrollment(enrollment_id).await?;
        if enrollment.status != EnrollmentStatus::Active {
            log::debug!(
                "Enrollment {enrollment_id} is {}, nothing to process",
                enrollment.status.as_str()
            );
            return Ok(enrollment);
        }

        let token = Uuid::new_v4().to_string();
        self.acquire_lease(enrollment_id, token.clone()).await?;
        let run = self.run_steps(enrollment_id, &token, now).await;
        let released = self
            .with_db(move |db| db.release_lease(enrollment_id, &token))
            .await;
        run?;
        released?;

        self.load_enrollment(enrollment_id).await
    }

    /// Resumes every scheduled execution due at `now`, then stalled
    /// enrollments, up to the configured batch size in total, and continues
    /// each enrollment. A failing item never stops the batch.
    pub async fn process_scheduled_executions(&self, now: Timestamp) -> Result<SweepReport> {
        let limit = self.config.sweep_batch_size;
        let due = self
            .with_db(move |db| db.due_scheduled_executions(now, limit))
            .await?;

        let mut report = SweepReport::default();
        let mut seen = HashSet::new();
        for execution in due {
            let (execution_id, enrollment_id) = (execution.id, execution.enrollment_id);
            seen.insert(enrollment_id);
            let outcome = self.resume_execution(execution, now).await;
            report.record(Some(execution_id), enrollment_id, outcome);
        }

        let remaining = limit.saturating_sub(report.processed);
        if remaining > 0 {
            for stalled in self.stalled_enrollments(now, remaining).await? {
                let StalledEnrollment {
                    enrollment_id,
                    execution_id,
                } = stalled;
                if !seen.insert(enrollment_id) {
                    continue;
                }
                log::info!("Resuming stalled enrollment {enrollment_id}");
                let outcome = self.process_enrollment(enrollment_id, now).await;
                report.record(execution_id, enrollment_id, outcome);
            }
        }

        log::info!(
            "Sweep resumed {} enrollments ({} succeeded, {} failed)",
            report.processed,
            report.succeeded,
            report.failed
        );
        Ok(report)
    }

    /// Stalled enrollments as of `now`. Leases are judged on the wall clock
    /// so a sweep run with a later `now` never steals a live lease.
    async fn stalled_enrollments(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> Result<Vec<StalledEnrollment>> {
        let idle_since = now.checked_sub(STALL_GRACE).map_err(|e| {
            JourneyError::invalid_input("now").with_reason(format!("Sweep time out of range: {e}"))
        })?;
        self.with_db(move |db| db.stalled_enrollments(Timestamp::now(), idle_since, limit))
            .await
    }

    async fn resume_execution(&self, execution: StepExecution, now: Timestamp) -> Result<Enrollment> {
        let enrollment_id = execution.enrollment_id;
        let execution_id = execution.id;
        let token = Uuid::new_v4().to_string();
        self.acquire_lease(enrollment_id, token.clone()).await?;

        let lease = token.clone();
        let resumed = self
            .with_db(move |db| {
                let step = db.get_step(execution.step_id)?.ok_or(JourneyError::NotFound {
                    entity: "Step",
                    id: execution.step_id,
                })?;
                let next = step.next_step_id;
                db.resume_scheduled_execution(
                    &execution,
                    &lease,
                    &EnrollmentProgress {
                        current_step_id: next,
                        steps_completed: 1,
                        completed: next.is_none(),
                        ..Default::default()
                    },
                )
            })
            .await;
        let released = self
            .with_db(move |db| db.release_lease(enrollment_id, &token))
            .await;

        if !resumed? {
            return Err(JourneyError::conflict(format!(
                "Execution {execution_id} is no longer scheduled"
            )));
        }
        released?;

        self.process_enrollment(enrollment_id, now).await
    }

    async fn acquire_lease(&self, enrollment_id: u64, token: String) -> Result<()> {
        let lease_seconds = self.config.lease_seconds;
        self.with_db(move |db| {
            let now = Timestamp::now();
            let expires_at = lease_expiry(now, lease_seconds)?;
            if db.acquire_lease(enrollment_id, &token, now, expires_at)? {
                Ok(())
            } else {
                Err(JourneyError::conflict(format!(
                    "Enrollment {enrollment_id} is being processed by another worker"
                )))
            }
        })
        .await
    }

    /// Extends the lease held by `token` by a full lease period.
    ///
    /// # Errors
    ///
    /// Returns `JourneyError::Conflict` when another worker has taken the
    /// lease over.
    async fn renew_lease(&self, enrollment_id: u64, token: &str) -> Result<()> {
        let lease_seconds = self.config.lease_seconds;
        let token = token.to_string();
        self.with_db(move |db| {
            let expires_at = lease_expiry(Timestamp::now(), lease_seconds)?;
            if db.renew_lease(enrollment_id, &token, expires_at)? {
                Ok(())
            } else {
                Err(JourneyError::conflict(format!(
                    "Enrollment {enrollment_id} lease was taken over by another worker"
                )))
            }
        })
        .await
    }

    /// Drives `work` to completion while renewing the lease every third of
    /// its lifetime. Losing the lease drops `work`.
    async fn hold_lease<F: Future>(
        &self,
        enrollment_id: u64,
        token: &str,
        work: F,
    ) -> Result<F::Output> {
        let period = (Duration::from_secs(self.config.lease_seconds) / 3)
            .max(Duration::from_millis(100));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        tokio::pin!(work);

        loop {
            tokio::select! {
                output = &mut work => return Ok(output),
                _ = heartbeat.tick() => self.renew_lease(enrollment_id, token).await?,
            }
        }
    }

    /// Loads an enrollment with its execution history.
    pub(crate) async fn load_enrollment(&self, enrollment_id: u64) -> Result<Enrollment> {
        self.with_db(move |db| {
            let mut enrollment = db.get_enrollment(enrollment_id)?.ok_or(JourneyError::NotFound {
                entity: "Enrollment",
                id: enrollment_id,
            })?;
            enrollment.executions = db.get_executions(enrollment_id)?;
            Ok(enrollment)
        })
        .await
    }

    async fn run_steps(&self, enrollment_id: u64, token: &str, now: Timestamp) -> Result<()> {
        for _ in 0..self.config.max_steps_per_run {
            self.renew_lease(enrollment_id, token).await?;
            let Some(state) = self
                .with_db(move |db| load_step_state(db, enrollment_id))
                .await?
            else {
                return Ok(());
            };

            if state.execution.status == ExecutionStatus::Scheduled {
                match state.execution.scheduled_for {
                    Some(due) if due > now => {
                        log::debug!("Enrollment {enrollment_id} is waiting until {due}");
                        return Ok(());
                    }
                    _ => {
                        self.resume_inline(state, token).await?;
                        continue;
                    }
                }
            }

            let execution_id = state.execution.id;
            self.with_db(move |db| db.mark_executing(execution_id))
                .await?;
            log::debug!(
                "Running step {} ({}) for enrollment {enrollment_id}",
                state.step.id,
                state.step.kind.step_type()
            );

            let work = self.dispatch(StepInput {
                step: &state.step,
                contact: &state.contact,
                context: &state.enrollment.context,
                now,
            });
            let dispatched = self.hold_lease(enrollment_id, token, work).await?;

            match dispatched {
                Ok(outcome) => {
                    if let Flow::Stop = self.record_outcome(state, outcome, token).await? {
                        return Ok(());
                    }
                }
                Err(e) if e.is_busy() => {
                    // Lock contention is not a step failure; the execution
                    // stays open for the sweep
                    log::warn!(
                        "Step {} for enrollment {enrollment_id} hit a locked database: {e}",
                        state.step.id
                    );
                    return Err(e);
                }
                Err(e) => {
                    let step_id = state.step.id;
                    let message = e.to_string();
                    log::warn!("Step {step_id} failed for enrollment {enrollment_id}: {message}");

                    let (failed, lease) = (message.clone(), token.to_string());
                    self.with_db(move |db| db.fail_execution(&state.execution, &lease, &failed))
                        .await?;
                    return Err(JourneyError::Execution { step_id, message });
                }
            }
        }

        log::info!(
            "Enrollment {enrollment_id} reached the limit of {} steps per run",
            self.config.max_steps_per_run
        );
        Ok(())
    }

    /// Completes a due delay found while walking the enrollment.
    async fn resume_inline(&self, state: StepState, token: &str) -> Result<()> {
        let next = state.step.next_step_id;
        let lease = token.to_string();
        self.with_db(move |db| {
            db.resume_scheduled_execution(
                &state.execution,
                &lease,
                &EnrollmentProgress {
                    current_step_id: next,
                    steps_completed: 1,
                    completed: next.is_none(),
                    ..Default::default()
                },
            )
            .map(|_| ())
        })
        .await
    }

    async fn record_outcome(
        &self,
        state: StepState,
        outcome: StepOutcome,
        token: &str,
    ) -> Result<Flow> {
        let StepOutcome {
            result,
            transition,
            context: additions,
            email_message_id,
            emails_sent,
        } = outcome;
        let StepState {
            enrollment,
            step,
            execution,
            ..
        } = state;

        let context = merge_context(enrollment.context, additions);
        let lease = token.to_string();

        match transition {
            Transition::Advance(next) => {
                self.with_db(move |db| {
                    db.complete_execution(
                        &execution,
                        &lease,
                        ExecutionRecord {
                            result: Some(&result),
                            email_message_id: email_message_id.as_deref(),
                        },
                        &EnrollmentProgress {
                            current_step_id: next,
                            context: context.as_ref(),
                            steps_completed: 1,
                            emails_sent,
                            completed: next.is_none(),
                        },
                    )
                })
                .await?;

                match next {
                    Some(next) => {
                        log::debug!("Enrollment {} moved to step {next}", enrollment.id);
                        Ok(Flow::Continue)
                    }
                    None => {
                        log::info!(
                            "Enrollment {} completed after step {}",
                            enrollment.id,
                            step.id
                        );
                        Ok(Flow::Stop)
                    }
                }
            }
            Transition::Park { until } => {
                self.with_db(move |db| db.schedule_execution(&execution, &lease, until, &result))
                    .await?;
                log::debug!(
                    "Enrollment {} parked on step {} until {until}",
                    enrollment.id,
                    step.id
                );
                Ok(Flow::Stop)
            }
            Transition::Exit => {
                let step_id = step.id;
                self.with_db(move |db| {
                    db.complete_execution(
                        &execution,
                        &lease,
                        ExecutionRecord {
                            result: Some(&result),
                            email_message_id: None,
                        },
                        &EnrollmentProgress {
                            current_step_id: Some(step_id),
                            context: context.as_ref(),
                            completed: true,
                            ..Default::default()
                        },
                    )
                })
                .await?;
                log::info!("Enrollment {} exited at step {step_id}", enrollment.id);
                Ok(Flow::Stop)
            }
        }
    }
}

/// Loads the enrollment's current step, contact and open execution.
/// Returns `None` when there is nothing left to run, completing the
/// enrollment if its pointer is empty.
fn load_step_state(db: &mut Database, enrollment_id: u64) -> Result<Option<StepState>> {
    let enrollment = db.get_enrollment(enrollment_id)?.ok_or(JourneyError::NotFound {
        entity: "Enrollment",
        id: enrollment_id,
    })?;
    if enrollment.status != EnrollmentStatus::Active {
        return Ok(None);
    }

    let Some(step_id) = enrollment.current_step_id else {
        db.update_enrollment_progress(
            enrollment_id,
            &EnrollmentProgress {
                completed: true,
                ..Default::default()
            },
        )?;
        log::info!("Enrollment {enrollment_id} completed with no further steps");
        return Ok(None);
    };

    let step = db
        .get_step(step_id)?
        .filter(|s| s.journey_id == enrollment.journey_id)
        .ok_or(JourneyError::NotFound {
            entity: "Step",
            id: step_id,
        })?;
    let contact = db.get_contact(enrollment.contact_id)?.ok_or(JourneyError::NotFound {
        entity: "Contact",
        id: enrollment.contact_id,
    })?;
    let execution = match db.find_open_execution(enrollment_id, step_id)? {
        Some(execution) => execution,
        None => db.create_execution(enrollment_id, step_id)?,
    };

    Ok(Some(StepState {
        enrollment,
        step,
        contact,
        execution,
    }))
}

fn lease_expiry(now: Timestamp, lease_seconds: u64) -> Result<Timestamp> {
    let lease = SignedDuration::from_secs(i64::try_from(lease_seconds).unwrap_or(i64::MAX));
    now.checked_add(lease).map_err(|e| JourneyError::Configuration {
        message: format!("Invalid lease duration: {e}"),
    })
}

/// New context value with the step's additions merged in. `None` when the
/// step added nothing.
fn merge_context(
    mut context: Map<String, Value>,
    additions: Map<String, Value>,
) -> Option<Map<String, Value>> {
    if additions.is_empty() {
        return None;
    }
    context.extend(additions);
    Some(context)
}
