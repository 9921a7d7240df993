use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relboard::{init_engine, init_tracing, CountService, HttpMsearchClient, JsonObjectSource};
use relboard_config::RelboardConfig;
use relboard_core::{
    compute_groups, with_virtual_reverses, DashboardGroup, DashboardStateStore, LogNotifier,
    SavedObjectSource,
};
use serde_json::json;

/// Relational dashboard state, join filters and live counts
#[derive(Parser)]
#[command(name = "relboard")]
#[command(version)]
#[command(about = "Relational dashboard state, join filters and live counts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(clap::Args)]
struct Inputs {
    /// Saved objects (dashboards, searches, groups, index patterns,
    /// relations, buttons) as one JSON document
    #[arg(short, long, value_name = "FILE")]
    objects: PathBuf,

    /// Persisted dashboard state, either the JSON blob or its URL parameter
    #[arg(short, long, value_name = "FILE")]
    state: Option<PathBuf>,

    /// Dashboard currently open
    #[arg(short, long, value_name = "ID")]
    dashboard: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the dashboard tab groups
    Groups {
        #[command(flatten)]
        inputs: Inputs,
    },
    /// Print the count query of a dashboard
    Query {
        #[command(flatten)]
        inputs: Inputs,
    },
    /// Fetch tab and relational button counts from the backend
    Counts {
        #[command(flatten)]
        inputs: Inputs,

        /// Also count every button in the reverse direction
        #[arg(long)]
        symmetric: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RelboardConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RelboardConfig::load().context("Failed to load configuration")?,
    };
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    init_tracing(&config.log);

    match cli.command {
        Commands::Groups { inputs } => run_groups(&inputs),
        Commands::Query { inputs } => run_query(&config, &inputs),
        Commands::Counts { inputs, symmetric } => run_counts(config, &inputs, symmetric),
    }
}

fn load_store(path: Option<&Path>) -> Result<DashboardStateStore> {
    let Some(path) = path else {
        return Ok(DashboardStateStore::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state: {}", path.display()))?;
    let content = content.trim();
    let store = if content.starts_with('{') {
        DashboardStateStore::from_blob(content)
    } else {
        DashboardStateStore::from_url_param(content)
    };
    store.with_context(|| format!("Failed to decode state: {}", path.display()))
}

fn groups(
    objects: &JsonObjectSource,
    store: &DashboardStateStore,
    dashboard: Option<&str>,
) -> Result<Vec<DashboardGroup>> {
    let groups = compute_groups(
        &objects.find_groups()?,
        &objects.find_dashboards()?,
        dashboard,
        store,
        &LogNotifier,
    )?;
    Ok(groups)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_groups(inputs: &Inputs) -> Result<()> {
    let objects = JsonObjectSource::load(&inputs.objects)?;
    let store = load_store(inputs.state.as_deref())?;
    print_json(&groups(&objects, &store, inputs.dashboard.as_deref())?)
}

fn run_query(config: &RelboardConfig, inputs: &Inputs) -> Result<()> {
    let dashboard = inputs
        .dashboard
        .as_deref()
        .context("--dashboard is required for query")?;
    let objects = JsonObjectSource::load(&inputs.objects)?;
    let store = load_store(inputs.state.as_deref())?;

    // Nothing is sent; the client only completes the service.
    let client = Arc::new(HttpMsearchClient::new(&config.backend)?);
    let service = CountService::from_objects(init_engine(config, client)?, objects)?;

    match service.dashboard_query(&store, dashboard)? {
        Some(query) => print_json(&json!({
            "indices": query.indices,
            "header": query.header(),
            "body": query.body,
        })),
        None => anyhow::bail!("Dashboard '{}' has no saved search to count against", dashboard),
    }
}

fn run_counts(config: RelboardConfig, inputs: &Inputs, symmetric: bool) -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_counts(config, inputs, symmetric))
}

async fn async_counts(config: RelboardConfig, inputs: &Inputs, symmetric: bool) -> Result<()> {
    let objects = JsonObjectSource::load(&inputs.objects)?;
    let store = load_store(inputs.state.as_deref())?;
    let mut groups = groups(&objects, &store, inputs.dashboard.as_deref())?;
    let buttons = with_virtual_reverses(&objects.buttons, symmetric);

    let client = Arc::new(HttpMsearchClient::new(&config.backend)?);
    let service = CountService::from_objects(init_engine(&config, client)?, objects)?;
    service.update_all(&store, &groups, &buttons)?;

    // Every attempt may run into the request timeout.
    let attempts = 1 + config
        .counts
        .tabs
        .retry_on_error
        .max(config.counts.buttons.retry_on_error);
    let budget = config.backend.timeout() * attempts + Duration::from_secs(1);
    if !service.wait_idle(budget).await {
        tracing::warn!(
            budget_secs = budget.as_secs(),
            "Counts still pending, printing partial results"
        );
    }

    service.apply_counts(&mut groups);
    let outcomes = service.outcomes();
    let button_counts: Vec<_> = buttons
        .iter()
        .map(|button| {
            json!({
                "button": button,
                "outcome": outcomes.get(&button.count_id()),
            })
        })
        .collect();
    print_json(&json!({ "groups": groups, "buttons": button_counts }))
}
