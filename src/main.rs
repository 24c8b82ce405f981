//! vnet-provisioner CLI entrypoint.
//!
//! This is the main entrypoint for the vnet-provisioner command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use vnet_provisioner::azure::ArmClient;
use vnet_provisioner::cli::{Cli, Commands, OutputFormat, OutputFormatter};
use vnet_provisioner::config::{
    find_plan_file, ConfigParser, ConfigValidator, PlanConfig, DEFAULT_PLAN_FILES,
};
use vnet_provisioner::error::Result;
use vnet_provisioner::orchestrator::Orchestrator;
use vnet_provisioner::planner::{NameGenerator, ProvisioningPlan};

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
///
/// Always exits with success: failures are logged and reported, never
/// turned into a process failure.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose, cli.output == OutputFormat::Json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create async runtime: {e}");
            return ExitCode::SUCCESS;
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        error!("{e}");
    }

    ExitCode::SUCCESS
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins unless `--verbose` is given.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command() {
        Commands::Run => cmd_run(cli.config.as_deref(), &formatter).await,
        Commands::Plan => cmd_plan(cli.config.as_deref(), &formatter),
        Commands::Validate { warnings } => {
            cmd_validate(cli.config.as_deref(), warnings, &formatter)
        }
        Commands::Init { path, force } => cmd_init(&path, force),
    }
}

/// Provision the plan and tear it down again.
async fn cmd_run(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let config = load_plan_config(config_path)?;
    let plan = build_plan(&config)?;

    let credentials = ConfigParser::load_credentials()?;
    let client = ArmClient::new(&credentials, &config.azure)?;

    let orchestrator = Orchestrator::new(&client);
    let report = orchestrator.run(&plan).await;

    println!("{}", formatter.format_report(&report));

    if let Err(e) = report.result() {
        error!("Run {} aborted: {e}", report.run_id);
    }
    if !report.cleaned_up() {
        warn!(
            "Resource group {} may still exist; delete it manually",
            report.resource_group
        );
    }

    Ok(())
}

/// Show the resolved plan.
fn cmd_plan(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let config = load_plan_config(config_path)?;
    let plan = build_plan(&config)?;

    println!("{}", formatter.format_plan(&plan));
    Ok(())
}

/// Validate the plan file.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = read_plan_config(config_path)?;

    let result = ConfigValidator::new().check(&config);
    println!("{}", formatter.format_validation(&config, &result, show_warnings));

    if result.is_valid() {
        // References are only checked when the plan is built.
        let names = NameGenerator::new(config.randomize_names);
        ProvisioningPlan::from_config(&config, &names)?;
        info!("Plan is valid");
    }

    Ok(())
}

/// Write a template plan and `.env.example`.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing plan in: {}", path.display());

    let plan_path = path.join(DEFAULT_PLAN_FILES[0]);
    let env_path = path.join(".env.example");

    // Check if files exist
    if !force && plan_path.exists() {
        warn!("Plan file already exists: {}", plan_path.display());
        warn!("Use --force to overwrite.");
        return Ok(());
    }

    // Create directory if needed
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    let plan_template = include_str!("../templates/vnet.plan.yaml");
    std::fs::write(&plan_path, plan_template)?;
    eprintln!("Created: {}", plan_path.display());

    let env_template = include_str!("../templates/.env.example");
    std::fs::write(&env_path, env_template)?;
    eprintln!("Created: {}", env_path.display());

    eprintln!("\nNext steps:");
    eprintln!("  1. Copy .env.example to .env and fill in your service principal");
    eprintln!("  2. Edit {} with your network layout", DEFAULT_PLAN_FILES[0]);
    eprintln!("  3. Run 'vnet-provisioner validate' to check the plan");
    eprintln!("  4. Run 'vnet-provisioner plan' to see what will be created");
    eprintln!("  5. Run 'vnet-provisioner run' to provision and tear down");

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the plan file path, if one can be found.
fn resolve_plan_path(config_path: Option<&Path>) -> Option<PathBuf> {
    config_path
        .map(Path::to_path_buf)
        .or_else(|| find_plan_file(".").ok())
}

/// Loads `.env` and the plan with environment overrides applied.
///
/// Falls back to the built-in sample plan when no plan file is found.
fn read_plan_config(config_path: Option<&Path>) -> Result<PlanConfig> {
    match resolve_plan_path(config_path) {
        Some(plan_file) => {
            debug!("Loading plan from: {}", plan_file.display());
            let parser = ConfigParser::new()
                .with_base_path(plan_file.parent().unwrap_or_else(|| Path::new(".")));
            parser.load_dotenv()?;
            parser.load_with_env(&plan_file)
        }
        None => {
            let parser = ConfigParser::new();
            parser.load_dotenv()?;
            parser.builtin_with_env()
        }
    }
}

/// Loads and validates the plan.
fn load_plan_config(config_path: Option<&Path>) -> Result<PlanConfig> {
    let config = read_plan_config(config_path)?;

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Ok(config)
}

/// Resolves physical names and step order.
fn build_plan(config: &PlanConfig) -> Result<ProvisioningPlan> {
    let names = NameGenerator::new(config.randomize_names);
    let plan = ProvisioningPlan::from_config(config, &names)?;
    debug!("Plan {} has {} steps", plan.fingerprint, plan.step_count());
    Ok(plan)
}
