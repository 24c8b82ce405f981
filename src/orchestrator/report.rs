//! Run reports.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

use crate::error::RunError;

use super::context::RunPhase;

/// Outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// The remote operation reached a successful terminal state.
    Succeeded,
    /// The remote operation failed; the run was aborted.
    Failed,
    /// The step never ran because an earlier step failed.
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Record of a single step.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    /// Step index; the resource group is step 1.
    pub index: usize,
    /// Human-readable description.
    pub description: String,
    /// Outcome.
    pub status: StepStatus,
    /// Lines describing what the step observed or produced.
    pub detail: Vec<String>,
    /// Wall time spent on the step.
    pub duration_ms: u64,
}

/// Outcome of the teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TeardownRecord {
    /// The resource group was deleted.
    Deleted {
        /// Name of the deleted group.
        name: String,
    },
    /// Nothing was created, so nothing was deleted.
    NotProvisioned,
    /// The delete call failed; the group may still exist.
    Failed {
        /// Error message.
        message: String,
    },
}

/// Summary of a complete run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// Identifier of the run.
    pub run_id: Uuid,
    /// Fingerprint of the plan that was run.
    pub plan_fingerprint: String,
    /// Physical name of the resource group.
    pub resource_group: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the teardown finished.
    pub finished_at: DateTime<Utc>,
    /// Phases visited, in order.
    pub phases: Vec<RunPhase>,
    /// Every step of the plan, including the resource group.
    pub steps: Vec<StepRecord>,
    /// The error that aborted the run.
    #[serde(serialize_with = "serialize_failure")]
    pub failure: Option<RunError>,
    /// Teardown outcome.
    pub teardown: TeardownRecord,
}

fn serialize_failure<S: Serializer>(
    failure: &Option<RunError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match failure {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl RunReport {
    /// Returns `Ok` if every step succeeded, or the error that aborted the run.
    ///
    /// # Errors
    ///
    /// Returns the step failure that aborted the run.
    pub const fn result(&self) -> Result<(), &RunError> {
        match &self.failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Returns the number of steps with `status`.
    #[must_use]
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Returns true if the resource group is known to be gone.
    #[must_use]
    pub const fn cleaned_up(&self) -> bool {
        !matches!(self.teardown, TeardownRecord::Failed { .. })
    }

    /// Returns the total run time in seconds.
    #[must_use]
    pub fn elapsed_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} on {}", self.run_id, self.resource_group)?;
        for step in &self.steps {
            writeln!(f, "  {}. {} [{}]", step.index, step.description, step.status)?;
            for line in &step.detail {
                writeln!(f, "       {line}")?;
            }
        }
        if let Some(failure) = &self.failure {
            writeln!(f, "Aborted: {failure}")?;
        }
        match &self.teardown {
            TeardownRecord::Deleted { name } => write!(f, "Deleted resource group {name}"),
            TeardownRecord::NotProvisioned => write!(f, "{}", RunError::NotProvisioned),
            TeardownRecord::Failed { message } => write!(f, "Teardown failed: {message}"),
        }
    }
}
