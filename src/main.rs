//! testweave - hook-driven test orchestration CLI
//!
//! Loads a catalog file, resolves settings (flag > environment > config
//! file > default), runs the session and exits with its status code.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};

use testweave::catalog::CatalogFile;
use testweave::cli::{self, Args};
use testweave::config::{print_env_help, EnvConfig, SessionConfig};
use testweave::hooks::{HookRegistry, Plugin};
use testweave::models::ExitStatus;
use testweave::output::{OutputFormat, ResultFormatter};
use testweave::plugins::builtin_plugins;
use testweave::results::SessionReport;
use testweave::shard::{ShardMethod, ShardSelector};
use testweave::utils::{init_logger, LogLevel};
use testweave::{OrchestratorError, SessionOrchestrator};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let env = EnvConfig::load();

    let verbose = args.verbose || env.verbose.unwrap_or(false);
    init_logger(LogLevel::resolve(args.log_level.as_deref(), verbose));

    match dispatch(args.command, &env).await {
        Ok(status) => ExitCode::from(status.code()),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
            let status = e
                .downcast_ref::<OrchestratorError>()
                .map(OrchestratorError::exit_status)
                .unwrap_or(ExitStatus::ConfigurationError);
            ExitCode::from(status.code())
        }
    }
}

async fn dispatch(command: cli::Command, env: &EnvConfig) -> Result<ExitStatus> {
    match command {
        cli::Command::Run(run_args) => run_session(run_args, env).await,
        cli::Command::List(list_args) => list_plan(list_args, env),
        cli::Command::Shard(shard_args) => show_shards(shard_args),
        cli::Command::Schema => {
            let schema = schemars::schema_for!(SessionReport);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(ExitStatus::Ok)
        }
        cli::Command::Env { show } => {
            print_env_help();
            if show {
                println!();
                env.print_summary();
            }
            Ok(ExitStatus::Ok)
        }
        cli::Command::Config(config_args) => manage_config(config_args, env),
    }
}

/// Resolve settings: flag > environment variable > config file > default
fn resolve_config(args: &cli::SessionArgs, env: &EnvConfig) -> Result<SessionConfig> {
    let path = args
        .config
        .clone()
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));
    let mut config = match path {
        Some(path) => SessionConfig::load(&path)?,
        None => SessionConfig::load_default()?,
    };
    config.apply_env(env);

    if let Some(environment) = &args.environment {
        config.environment = environment.clone();
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(delay) = args.retry_delay {
        config.retry_delay_secs = delay;
    }
    if args.retry_all {
        config.retry_all = true;
    }
    if args.distributed_mode {
        config.distributed = true;
    }
    if let Some(node_index) = args.node_index {
        config.node_index = node_index;
    }
    if let Some(total_nodes) = args.total_nodes {
        config.total_nodes = total_nodes;
    }
    if let Some(method) = &args.shard_method {
        config.shard_method = method.parse()?;
    }
    for raw in &args.vars {
        let (key, value) = cli::parse_var(raw)
            .ok_or_else(|| anyhow::anyhow!("Expected KEY=VALUE, got: {raw}"))?;
        config.vars.insert(key, value);
    }

    config.validate()?;
    Ok(config)
}

fn formatter(format: &str, no_color: bool) -> Result<ResultFormatter> {
    let format: OutputFormat = format.parse()?;
    let formatter = ResultFormatter::new(format);
    Ok(if no_color { formatter.no_color() } else { formatter })
}

/// Orchestrator with the catalog's parameter table and the built-in plugins
fn prepare(catalog_file: &CatalogFile, config: &SessionConfig) -> Result<SessionOrchestrator> {
    let params = catalog_file.param_table();
    let builtins = builtin_plugins();
    let orchestrator =
        SessionOrchestrator::new(config.clone(), Arc::new(catalog_file.script_book()))
            .with_plugin(&params)?
            .with_plugins(builtins.iter().map(|p| &**p as &dyn Plugin))?;
    Ok(orchestrator)
}

async fn run_session(args: cli::RunArgs, env: &EnvConfig) -> Result<ExitStatus> {
    let mut config = resolve_config(&args.session, env)?;
    if args.export_results {
        config.export_results = true;
    }
    if let Some(path) = args.results_path {
        config.results_path = path;
    }
    if args.generate_retry_report {
        config.generate_retry_report = true;
    }
    if let Some(path) = args.retry_report_path {
        config.retry_report_path = path;
    }
    if let Some(path) = args.csv {
        config.csv_path = Some(path);
    }

    let formatter = formatter(&args.session.format, args.session.no_color)?;
    let catalog_file = CatalogFile::load(&args.session.catalog)?;
    let orchestrator = prepare(&catalog_file, &config)?;

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Stop requested, finishing the current item");
            token.cancel();
        }
    });

    let outcome = orchestrator.run_builder(catalog_file.builder()).await?;

    if formatter.format() == OutputFormat::Table {
        for report in outcome.aggregator.reports() {
            println!("{}", formatter.format_item(report));
        }
    }
    println!(
        "{}",
        formatter.format_session(&outcome.report, &outcome.aggregator, &outcome.summary_lines)
    );

    let written = outcome
        .write_reports(&config)
        .context("Failed to write reports")?;
    for path in written {
        eprintln!("✓ Report written: {}", path.display());
    }

    Ok(outcome.exit_status)
}

fn list_plan(args: cli::ListArgs, env: &EnvConfig) -> Result<ExitStatus> {
    let config = resolve_config(&args.session, env)?;
    let formatter = formatter(&args.session.format, args.session.no_color)?;
    let catalog_file = CatalogFile::load(&args.session.catalog)?;
    let orchestrator = prepare(&catalog_file, &config)?;

    let mut state = orchestrator.start()?;
    let catalog = orchestrator.build_catalog(catalog_file.builder(), &mut state)?;
    let plan = orchestrator.plan(&catalog, &mut state)?;
    print!("{}", formatter.format_plan(&plan.selected));
    if !plan.deselected.is_empty()
        && !matches!(formatter.format(), OutputFormat::Json | OutputFormat::JsonPretty)
    {
        println!("{} items deselected (assigned to other nodes)", plan.deselected.len());
    }
    Ok(ExitStatus::Ok)
}

fn show_shards(args: cli::ShardArgs) -> Result<ExitStatus> {
    let method: ShardMethod = args.shard_method.parse()?;
    let formatter = formatter(&args.format, true)?;

    let catalog_file = CatalogFile::load(&args.catalog)?;
    let mut registry = HookRegistry::new();
    registry.load_plugin(&catalog_file.param_table())?;
    let catalog = catalog_file.builder().build_with(&registry)?;

    let selector = ShardSelector::new(0, args.total_nodes)?.with_method(method);
    print!("{}", formatter.format_partition(&selector.partition(&catalog)));
    Ok(ExitStatus::Ok)
}

fn manage_config(args: cli::ConfigArgs, env: &EnvConfig) -> Result<ExitStatus> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            if output.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    output.display()
                );
            }
            SessionConfig::example().save(&output)?;
            println!("✓ Configuration file created: {}", output.display());
        }

        cli::ConfigAction::Show { format } => {
            let mut config = match &env.config_file {
                Some(path) => SessionConfig::load(path)?,
                None => SessionConfig::load_default()?,
            };
            config.apply_env(env);
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Validate { file } => {
            let path = file
                .or_else(SessionConfig::find)
                .unwrap_or_else(|| PathBuf::from("./testweave.yaml"));

            match SessionConfig::load(&path) {
                Ok(_) => println!("✓ Configuration file is valid: {}", path.display()),
                Err(e) => {
                    println!("✗ Configuration file is invalid: {}", path.display());
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }
    Ok(ExitStatus::Ok)
}
