//! Error types for the vnet provisioner.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, planning, Azure Resource Manager calls, and the
//! orchestrated run itself.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the vnet provisioner.
#[derive(Debug, Error)]
pub enum VnetError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Azure Resource Manager errors.
    #[error("Azure error: {0}")]
    Azure(#[from] AzureError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Run-level errors raised by the orchestrator.
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The plan file was not found.
    #[error("Plan file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The plan file could not be parsed.
    #[error("Failed to parse plan: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Plan validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Azure Resource Manager errors.
#[derive(Debug, Error)]
pub enum AzureError {
    /// Token acquisition or authorization failed.
    #[error("Azure authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("ARM request failed: {status} {code} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// ARM error code.
        code: String,
        /// Error message from the API.
        message: String,
    },

    /// Throttled by ARM.
    #[error("ARM request throttled, retry after {retry_after_secs} seconds")]
    Throttled {
        /// Seconds the service asked us to wait.
        retry_after_secs: u64,
    },

    /// Resource not found.
    #[error("Resource not found: {resource_id}")]
    NotFound {
        /// ID of the missing resource.
        resource_id: String,
    },

    /// Network error.
    #[error("Network error communicating with Azure: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the API.
    #[error("Invalid response from ARM: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// A long-running operation reached a non-successful terminal state.
    #[error("Operation on {resource_id} ended with status {status}: {message}")]
    OperationFailed {
        /// Resource the operation targeted.
        resource_id: String,
        /// Terminal status reported by ARM.
        status: String,
        /// Error message reported by ARM.
        message: String,
    },

    /// Timeout waiting for a long-running operation.
    #[error("Timeout waiting for operation on {resource_id}")]
    Timeout {
        /// Resource the operation targeted.
        resource_id: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Plan has no steps.
    #[error("Plan is empty: no steps defined")]
    EmptyPlan,

    /// A resource name is declared twice.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Type of resource.
        resource_type: String,
        /// The duplicated name.
        name: String,
    },

    /// A step references a resource no earlier step creates.
    #[error("Step {step} references unknown {resource_type} '{reference}'")]
    UnresolvedReference {
        /// Index of the referencing step.
        step: usize,
        /// Type of the referenced resource.
        resource_type: String,
        /// The logical name that could not be resolved.
        reference: String,
    },

    /// A step references a resource that is only created later.
    #[error("Step {step} references '{reference}' before step {defined_at} creates it")]
    ForwardReference {
        /// Index of the referencing step.
        step: usize,
        /// The referenced logical name.
        reference: String,
        /// Index of the step that creates it.
        defined_at: usize,
    },
}

/// Errors surfaced by an orchestrated run.
#[derive(Debug, Error)]
pub enum RunError {
    /// A remote create, update or delete call failed.
    #[error("Step {index} ({description}) failed: {source}")]
    StepFailure {
        /// Index of the failed step; the resource group is 1, the teardown is 0.
        index: usize,
        /// Human-readable description of the step.
        description: String,
        /// Underlying cause.
        #[source]
        source: Box<VnetError>,
    },

    /// Cleanup was attempted but nothing was ever provisioned.
    #[error("Did not create any resources in Azure. No clean up is necessary")]
    NotProvisioned,
}

/// Result type alias for vnet provisioner operations.
pub type Result<T> = std::result::Result<T, VnetError>;

impl VnetError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl AzureError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Creates an invalid response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

impl RunError {
    /// Wraps a step's error into a [`RunError::StepFailure`].
    #[must_use]
    pub fn step_failure(index: usize, description: impl Into<String>, source: VnetError) -> Self {
        Self::StepFailure {
            index,
            description: description.into(),
            source: Box::new(source),
        }
    }

    /// Returns true for errors that need no operator attention.
    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::NotProvisioned)
    }
}
