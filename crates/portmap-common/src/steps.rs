//! Ordered multi-step operations with per-step failure policy.
//!
//! A ruleset change is usually several commands in a row with no
//! transaction around them. Each step is tagged [`StepPolicy::Fatal`] or
//! [`StepPolicy::BestEffort`]; [`StepPlan::run`] executes them strictly in
//! order, stops at the first fatal failure, and records best-effort
//! failures as warnings.
//!
//! # Example
//!
//! ```ignore
//! let report = StepPlan::new()
//!     .fatal("add dnat rule", async { add_dnat().await })
//!     .best_effort("add masquerade rule", async { add_masquerade().await })
//!     .run()
//!     .await?;
//! for warning in &report.warnings {
//!     tracing::warn!("{}", warning);
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::{PortMapError, PortMapResult};

type StepFuture<'a> = Pin<Box<dyn Future<Output = PortMapResult<()>> + Send + 'a>>;

/// What a step failure means for the whole operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// Failure aborts the operation; later steps do not run.
    Fatal,
    /// Failure is logged and recorded; later steps still run.
    BestEffort,
}

/// A best-effort step that failed.
#[derive(Debug)]
pub struct StepWarning {
    /// The step name.
    pub step: &'static str,
    /// Why it failed.
    pub error: PortMapError,
}

impl fmt::Display for StepWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.error)
    }
}

/// Outcome of a plan that did not hit a fatal failure.
#[derive(Debug, Default)]
pub struct StepReport {
    /// Names of the steps that succeeded, in order.
    pub completed: Vec<&'static str>,
    /// Best-effort steps that failed, in order.
    pub warnings: Vec<StepWarning>,
}

impl StepReport {
    /// Returns true if every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

struct Step<'a> {
    name: &'static str,
    policy: StepPolicy,
    action: StepFuture<'a>,
}

/// An ordered list of steps.
///
/// Futures are lazy, so a step's commands are not issued until every step
/// before it has finished.
#[derive(Default)]
pub struct StepPlan<'a> {
    steps: Vec<Step<'a>>,
}

impl<'a> StepPlan<'a> {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Appends a step whose failure aborts the plan.
    pub fn fatal<F>(self, name: &'static str, action: F) -> Self
    where
        F: Future<Output = PortMapResult<()>> + Send + 'a,
    {
        self.push(name, StepPolicy::Fatal, action)
    }

    /// Appends a step whose failure is only recorded.
    pub fn best_effort<F>(self, name: &'static str, action: F) -> Self
    where
        F: Future<Output = PortMapResult<()>> + Send + 'a,
    {
        self.push(name, StepPolicy::BestEffort, action)
    }

    /// Appends a step with an explicit policy.
    pub fn push<F>(mut self, name: &'static str, policy: StepPolicy, action: F) -> Self
    where
        F: Future<Output = PortMapResult<()>> + Send + 'a,
    {
        self.steps.push(Step {
            name,
            policy,
            action: Box::pin(action),
        });
        self
    }

    /// Returns the number of steps in the plan.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs the steps in order.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing [`StepPolicy::Fatal`] step.
    pub async fn run(self) -> PortMapResult<StepReport> {
        let mut report = StepReport::default();

        for step in self.steps {
            match step.action.await {
                Ok(()) => report.completed.push(step.name),
                Err(error) => match step.policy {
                    StepPolicy::Fatal => {
                        tracing::error!(step = step.name, error = %error, "Fatal step failed");
                        return Err(error);
                    }
                    StepPolicy::BestEffort => {
                        tracing::warn!(step = step.name, error = %error, "Best-effort step failed, continuing");
                        report.warnings.push(StepWarning {
                            step: step.name,
                            error,
                        });
                    }
                },
            }
        }

        Ok(report)
    }
}
