//! Plan parser for loading plan files and credentials.
//!
//! This module handles loading plans from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result, VnetError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::{AzureCredentials, PlanConfig};

/// The sample plan shipped with the binary.
pub const BUILTIN_PLAN: &str = include_str!("../../templates/vnet.plan.yaml");

/// Parser for loading plans.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new plan parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving the `.env` file.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a plan from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<PlanConfig> {
        let path = path.as_ref();
        info!("Loading plan from: {}", path.display());

        if !path.exists() {
            return Err(VnetError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            VnetError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a plan from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<PlanConfig> {
        debug!("Parsing YAML plan");

        let config: PlanConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            VnetError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed plan for resource group {} with {} steps",
            config.resource_group.name,
            config.steps.len()
        );
        Ok(config)
    }

    /// Loads a plan with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<PlanConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Parses the built-in sample plan with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the built-in plan does not parse.
    pub fn builtin_with_env(&self) -> Result<PlanConfig> {
        info!("No plan file found, using the built-in sample plan");
        let mut config = self.parse_yaml(BUILTIN_PLAN, None)?;
        Self::apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Applies environment variable overrides to the plan.
    fn apply_env_overrides(config: &mut PlanConfig) {
        if let Ok(location) = std::env::var("VNET_LOCATION") {
            debug!("Overriding location from environment");
            config.location = location;
        }

        if let Ok(name) = std::env::var("VNET_RESOURCE_GROUP") {
            debug!("Overriding resource_group.name from environment");
            config.resource_group.name = name;
        }

        if let Ok(endpoint) = std::env::var("VNET_MANAGEMENT_ENDPOINT") {
            debug!("Overriding azure.management_endpoint from environment");
            config.azure.management_endpoint = endpoint;
        }

        if let Ok(host) = std::env::var("VNET_AUTHORITY_HOST") {
            debug!("Overriding azure.authority_host from environment");
            config.azure.authority_host = host;
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                VnetError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Reads the service principal credentials from the environment.
    ///
    /// Each variable may also be given with an `AZURE_` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing variable.
    pub fn load_credentials() -> Result<AzureCredentials> {
        Ok(AzureCredentials {
            client_id: credential_var("CLIENT_ID")?,
            client_secret: credential_var("CLIENT_SECRET")?,
            tenant_id: credential_var("TENANT_ID")?,
            subscription_id: credential_var("SUBSCRIPTION_ID")?,
        })
    }
}

fn credential_var(name: &str) -> Result<String> {
    std::env::var(name)
        .or_else(|_| std::env::var(format!("AZURE_{name}")))
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            VnetError::Config(ConfigError::MissingEnvVar {
                name: name.to_string(),
            })
        })
}

/// Default plan file names to search for.
pub const DEFAULT_PLAN_FILES: &[&str] = &["vnet.plan.yaml", "vnet.plan.yml"];

/// Finds the plan file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if `start_dir` does not exist or no plan file is found.
pub fn find_plan_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    // A relative start such as "." has no parents to pop.
    let mut current = start.canonicalize()?;

    loop {
        for filename in DEFAULT_PLAN_FILES {
            let plan_path = current.join(filename);
            if plan_path.exists() {
                info!("Found plan file: {}", plan_path.display());
                return Ok(plan_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(VnetError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_PLAN_FILES[0]),
    }))
}
