use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::error::ProvisionError;

/// One unit of desired state.
///
/// `check` is the precondition: true means the state already holds and the
/// action is skipped. `verify` is the postcondition and runs in both cases;
/// applying a step twice must produce the same end state.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self) -> Result<bool, ProvisionError>;

    async fn apply(&self) -> Result<(), ProvisionError>;

    async fn verify(&self) -> Result<bool, ProvisionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Applied,
    AlreadySatisfied,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub name: String,
    pub status: StepStatus,
}

#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<StepOutcome>,
}

/// A run that stopped early. Carries the outcomes of the steps that did
/// complete so a caller can show what was done before the abort; because
/// every step is idempotent, re-running the whole list resumes safely.
#[derive(Debug, Error)]
#[error("step '{step}' failed: {source}")]
pub struct StepFailure {
    pub step: String,
    pub completed: Vec<StepOutcome>,
    #[source]
    pub source: ProvisionError,
}

impl From<StepFailure> for ProvisionError {
    fn from(failure: StepFailure) -> Self {
        ProvisionError::Step {
            step: failure.step,
            source: Box::new(failure.source),
        }
    }
}

/// Executes steps in order, stopping at the first step that errors or whose
/// postcondition does not hold. No rollback: the report says how far the run
/// got.
///
/// # Errors
/// Returns `StepFailure` naming the failing step.
pub async fn run_steps(steps: &[Box<dyn Step>]) -> Result<RunReport, StepFailure> {
    let mut report = RunReport::default();

    for step in steps {
        let name = step.name();

        let satisfied = match step.check().await {
            Ok(satisfied) => satisfied,
            Err(source) => return Err(fail(name, &report, source)),
        };

        if satisfied {
            info!(step = name, "already satisfied");
        } else {
            info!(step = name, "applying");
            if let Err(source) = step.apply().await {
                return Err(fail(name, &report, source));
            }
        }

        match step.verify().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(fail(
                    name,
                    &report,
                    ProvisionError::VerificationFailed {
                        diagnostic: format!(
                            "postcondition for '{name}' does not hold after {}",
                            if satisfied { "skip" } else { "apply" }
                        ),
                    },
                ));
            }
            Err(source) => return Err(fail(name, &report, source)),
        }

        report.outcomes.push(StepOutcome {
            name: name.to_string(),
            status: if satisfied {
                StepStatus::AlreadySatisfied
            } else {
                StepStatus::Applied
            },
        });
    }

    Ok(report)
}

fn fail(step: &str, report: &RunReport, source: ProvisionError) -> StepFailure {
    error!(step, "step failed: {source}");
    StepFailure {
        step: step.to_string(),
        completed: report.outcomes.clone(),
        source,
    }
}
