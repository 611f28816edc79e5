//! Structural validation of a journey's step graph.
//!
//! A journey may only be activated when [`validate`] reports no errors.
//! Warnings describe graphs that run but probably do not do what the author
//! meant.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{
    error::{JourneyError, Result},
    models::{JourneyStep, StepKind},
};

/// Result of validating a journey.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Converts a failing report into [`JourneyError::Validation`].
    pub fn into_result(self) -> Result<Self> {
        if self.valid {
            Ok(self)
        } else {
            Err(JourneyError::Validation {
                errors: self.errors,
            })
        }
    }
}

fn label(step: &JourneyStep) -> String {
    format!("Step '{}' ({})", step.name, step.id)
}

/// Validates the step graph of one journey.
pub fn validate(steps: &[JourneyStep]) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if steps.is_empty() {
        errors.push("Journey has no steps".to_string());
        return ValidationReport {
            valid: false,
            errors,
            warnings,
        };
    }

    let ids: HashSet<u64> = steps.iter().map(|s| s.id).collect();

    let lowest = steps.iter().map(|s| s.position).min().unwrap_or_default();
    let entries: Vec<&JourneyStep> = steps.iter().filter(|s| s.position == lowest).collect();
    if entries.len() > 1 {
        let names: Vec<String> = entries.iter().map(|s| label(s)).collect();
        errors.push(format!(
            "Journey must have exactly one entry step, found {} at position {lowest}: {}",
            entries.len(),
            names.join(", ")
        ));
    }

    for step in steps {
        check_edges(step, &ids, &mut errors);
        check_config(step, &mut errors, &mut warnings);
    }

    if let [entry] = entries.as_slice() {
        let reachable = reachable_from(entry.id, steps);
        for step in steps.iter().filter(|s| !reachable.contains(&s.id)) {
            errors.push(format!("{} is unreachable from the entry step", label(step)));
        }
    }

    let looping = steps_in_undelayed_cycles(steps, &ids);
    if !looping.is_empty() {
        let names: Vec<String> = steps
            .iter()
            .filter(|s| looping.contains(&s.id))
            .map(label)
            .collect();
        errors.push(format!(
            "Loop without a delay step through: {}",
            names.join(", ")
        ));
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn check_edges(step: &JourneyStep, ids: &HashSet<u64>, errors: &mut Vec<String>) {
    for target in step.outgoing_targets() {
        if target == step.id {
            errors.push(format!("{} points at itself", label(step)));
        } else if !ids.contains(&target) {
            errors.push(format!(
                "{} references step {target}, which is not part of this journey",
                label(step)
            ));
        }
    }
}

fn check_config(step: &JourneyStep, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let name = label(step);
    let has_branch_targets =
        step.condition_true_step_id.is_some() || step.condition_false_step_id.is_some();

    if has_branch_targets && !matches!(step.kind, StepKind::Condition { .. }) {
        errors.push(format!(
            "{name} is a {} step but has condition branch targets",
            step.kind.step_type()
        ));
    }

    match &step.kind {
        StepKind::SendEmail { subject, body } => {
            if subject.trim().is_empty() {
                errors.push(format!("{name} has an empty email subject"));
            }
            if body.trim().is_empty() {
                errors.push(format!("{name} has an empty email body"));
            }
        }
        StepKind::Delay { amount, .. } => {
            if *amount == 0 {
                errors.push(format!("{name} has a delay amount of zero"));
            }
        }
        StepKind::Condition { conditions } => {
            if step.condition_true_step_id.is_none() {
                errors.push(format!("{name} is missing its true branch target"));
            }
            if step.condition_false_step_id.is_none() {
                errors.push(format!("{name} is missing its false branch target"));
            }
            if conditions.is_empty() {
                warnings.push(format!("{name} has no predicates and always passes"));
            }
            if step.next_step_id.is_some() {
                warnings.push(format!("{name} has a next step, which branching ignores"));
            }
        }
        StepKind::AiDecision { prompt, options } => {
            if options.is_empty() {
                errors.push(format!("{name} has no decision options"));
            }
            let mut seen = HashSet::new();
            for option in options {
                if option.key.trim().is_empty() {
                    errors.push(format!("{name} has a decision option with an empty key"));
                } else if !seen.insert(option.key.as_str()) {
                    errors.push(format!("{name} repeats decision option '{}'", option.key));
                }
                if option.step_id.is_none() {
                    errors.push(format!(
                        "{name} decision option '{}' has no target step",
                        option.key
                    ));
                }
            }
            if prompt.trim().is_empty() {
                warnings.push(format!("{name} has an empty prompt"));
            }
            if step.next_step_id.is_some() {
                warnings.push(format!("{name} has a next step, which branching ignores"));
            }
        }
        StepKind::UpdateContact { fields } => {
            if fields.is_empty() {
                errors.push(format!("{name} has no fields to update"));
            }
        }
        StepKind::AddTag { tags } | StepKind::RemoveTag { tags } => {
            if tags.iter().all(|t| t.trim().is_empty()) {
                errors.push(format!("{name} has no tags"));
            }
        }
        StepKind::CreateActivity {
            activity_type,
            subject,
            ..
        } => {
            if activity_type.trim().is_empty() || subject.trim().is_empty() {
                errors.push(format!("{name} needs an activity type and subject"));
            }
        }
        StepKind::Exit { .. } => {
            if step.next_step_id.is_some() {
                warnings.push(format!("{name} is an exit step; its next step is never used"));
            }
        }
    }

    let terminal = matches!(step.kind, StepKind::Exit { .. }) || step.kind.is_branching();
    if !terminal && step.next_step_id.is_none() {
        warnings.push(format!(
            "{name} has no next step; enrollments complete after it"
        ));
    }
}

/// Edges the engine can actually follow out of each step.
fn edges(steps: &[JourneyStep]) -> HashMap<u64, Vec<u64>> {
    steps
        .iter()
        .map(|s| {
            let targets = match &s.kind {
                StepKind::Exit { .. } => Vec::new(),
                StepKind::Condition { .. } => [s.condition_true_step_id, s.condition_false_step_id]
                    .into_iter()
                    .flatten()
                    .collect(),
                StepKind::AiDecision { options, .. } => {
                    options.iter().filter_map(|o| o.step_id).collect()
                }
                _ => s.next_step_id.into_iter().collect(),
            };
            (s.id, targets)
        })
        .collect()
}

fn reachable_from(entry: u64, steps: &[JourneyStep]) -> HashSet<u64> {
    let graph = edges(steps);
    let mut seen = HashSet::from([entry]);
    let mut queue = VecDeque::from([entry]);

    while let Some(id) = queue.pop_front() {
        for target in graph.get(&id).into_iter().flatten() {
            if seen.insert(*target) {
                queue.push_back(*target);
            }
        }
    }
    seen
}

/// Steps that sit on, or between, cycles made only of non-delay steps.
///
/// Delay steps are removed from the graph, then nodes without incoming and
/// without outgoing edges are peeled off until nothing changes; whatever
/// remains lies on a cycle.
fn steps_in_undelayed_cycles(steps: &[JourneyStep], ids: &HashSet<u64>) -> HashSet<u64> {
    let delays: HashSet<u64> = steps
        .iter()
        .filter(|s| matches!(s.kind, StepKind::Delay { .. }))
        .map(|s| s.id)
        .collect();

    let mut graph: HashMap<u64, HashSet<u64>> = edges(steps)
        .into_iter()
        .filter(|(id, _)| !delays.contains(id))
        .map(|(id, targets)| {
            let targets = targets
                .into_iter()
                .filter(|t| *t != id && ids.contains(t) && !delays.contains(t))
                .collect();
            (id, targets)
        })
        .collect();

    loop {
        let with_incoming: HashSet<u64> = graph.values().flatten().copied().collect();
        let before = graph.len();
        graph.retain(|id, targets| !targets.is_empty() && with_incoming.contains(id));
        let remaining: HashSet<u64> = graph.keys().copied().collect();
        for targets in graph.values_mut() {
            targets.retain(|t| remaining.contains(t));
        }
        if graph.len() == before {
            break;
        }
    }

    graph.into_keys().collect()
}
