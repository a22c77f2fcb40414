use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use icebreaker_catalog::{StaticMetadataProvider, VolumeEstimator};
use icebreaker_core::{Config, Dialect, FailureKind, FailureRecord, ModelEntry, Report, Severity, Venue};
use icebreaker_dbt::DbtProject;
use icebreaker_engine::{
    CostHistory, ExecutionPlan, ExecutionPlanner, FailureHistory, RoutingEngine, RunContext,
    SyncCollaborator, SyncLedger,
};
use icebreaker_sql::{CompatibilityRegistry, Transpiler};

const DEFAULT_CONFIG: &str = "icebreaker.toml";
const SIZES_FILE: &str = "table_sizes.json";
const STALE_STATS_DAYS: i64 = 7;

/// Icebreaker - route dbt models between a local engine and the cloud warehouse
#[derive(Parser)]
#[command(name = "icebreaker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: icebreaker.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to dbt manifest.json
    #[arg(short = 'f', long, global = true, default_value = "target/manifest.json")]
    manifest: PathBuf,

    /// Table size snapshot (default: <state_dir>/table_sizes.json)
    #[arg(long, global = true)]
    sizes: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route every model in the manifest and write a run report
    Route {
        /// Output file for report.json
        #[arg(short, long, default_value = "icebreaker-report.json")]
        output: PathBuf,

        /// Write transpiled SQL for local models into this directory
        #[arg(long)]
        sql_dir: Option<PathBuf>,
    },

    /// Show every gate evaluated for one model
    Explain {
        /// Model name (short name or unique_id)
        model: String,
    },

    /// Translate Snowflake SQL for DuckDB
    Transpile {
        /// SQL text (reads --file when omitted)
        sql: Option<String>,

        /// Read SQL from a file
        #[arg(long, conflicts_with = "sql")]
        file: Option<PathBuf>,

        /// Source dialect (default from config)
        #[arg(long)]
        from: Option<Dialect>,

        /// Target dialect (default from config)
        #[arg(long)]
        to: Option<Dialect>,
    },

    /// Inspect or edit the local failure history
    Failures {
        #[command(subcommand)]
        action: FailureAction,
    },

    /// Inspect or edit the sync ledger
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
}

#[derive(Subcommand)]
enum FailureAction {
    /// List failure records
    List {
        /// Include resolved records
        #[arg(long)]
        all: bool,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a local failure for a model
    Record {
        model: String,

        /// OOM, TIMEOUT, UNSUPPORTED_CONSTRUCT or RUNTIME_ERROR
        kind: FailureKind,

        #[arg(long)]
        detail: Option<String>,
    },

    /// Clear unresolved failures so the model can run locally again
    Clear { model: String },
}

#[derive(Subcommand)]
enum SyncAction {
    /// Show the last venue and sync state per model
    Status,

    /// Mark a cloud output as replicated locally
    Mark { model: String },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref(), cli.verbose)?;

    match cli.command {
        Commands::Route { output, sql_dir } => {
            route_command(&config, &cli.manifest, cli.sizes.as_deref(), &output, sql_dir.as_deref(), cli.verbose)
        }
        Commands::Explain { model } => {
            explain_command(&config, &cli.manifest, cli.sizes.as_deref(), &model, cli.verbose)
        }
        Commands::Transpile { sql, file, from, to } => {
            transpile_command(&config, sql, file.as_deref(), from, to, cli.verbose)
        }
        Commands::Failures { action } => failures_command(&config, &cli.manifest, action),
        Commands::Sync { action } => sync_command(&config, &cli.manifest, action),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn load_config(path: Option<&Path>, verbose: bool) -> Result<Config> {
    let config = if let Some(config_path) = path {
        Config::from_file(config_path)?
    } else if Path::new(DEFAULT_CONFIG).exists() {
        Config::from_file(Path::new(DEFAULT_CONFIG))?
    } else {
        if verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };
    Ok(config)
}

fn load_project(manifest_path: &Path) -> Result<DbtProject> {
    if !manifest_path.exists() {
        return Err(anyhow::anyhow!(
            "Manifest not found at {}. Run 'dbt compile' first.",
            manifest_path.display()
        ));
    }
    Ok(DbtProject::load(manifest_path)?)
}

/// Wire the registry, state stores and metadata provider into a planner
fn build_planner(
    config: &Config,
    project: &DbtProject,
    sizes: Option<&Path>,
    verbose: bool,
) -> Result<ExecutionPlanner> {
    let mut registry = CompatibilityRegistry::from_config(config)?;
    if let Some(home) = project.home_database() {
        registry.add_local_catalog(&home);
    }
    let registry = Arc::new(registry);

    let state_dir = config.state_path();
    let failures = Arc::new(FailureHistory::open(&state_dir)?);
    for record in failures.recovered() {
        eprintln!(
            "{} {} was still running when the last run stopped; recorded as {}",
            "⚠".yellow(),
            record.model_id.bold(),
            record.kind
        );
    }

    let ledger: Arc<dyn SyncCollaborator> = Arc::new(SyncLedger::open(&state_dir)?);
    let cost = CostHistory::load(&state_dir)?;
    if verbose && !cost.is_empty() && cost.is_stale(chrono::Duration::days(STALE_STATS_DAYS)) {
        eprintln!("{}", "Cloud statistics are older than a week".yellow());
    }

    let mut engine = RoutingEngine::from_config(Arc::clone(&registry), config)
        .with_failures(failures)
        .with_sync(ledger)
        .with_cost_history(cost);

    let sizes_path = sizes.map(Path::to_path_buf).unwrap_or_else(|| state_dir.join(SIZES_FILE));
    if sizes_path.exists() {
        let provider = StaticMetadataProvider::from_file(&sizes_path)?;
        if verbose {
            eprintln!(
                "Loaded sizes for {} tables from {}",
                provider.table_count(),
                sizes_path.display()
            );
        }
        engine = engine.with_estimator(VolumeEstimator::new(Arc::new(provider)));
    } else if sizes.is_some() {
        return Err(anyhow::anyhow!("Table size snapshot not found at {}", sizes_path.display()));
    } else if verbose {
        eprintln!("{}", "No table size snapshot, skipping the Data Volume gate".yellow());
    }

    let transpiler = Transpiler::from_config(registry, &config.transpile);
    Ok(ExecutionPlanner::new(engine, transpiler)
        .with_dialects(config.transpile.source, config.transpile.target))
}

fn route_command(
    config: &Config,
    manifest_path: &Path,
    sizes: Option<&Path>,
    output: &Path,
    sql_dir: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    println!("{}", "Icebreaker - Routing Models".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    let project = load_project(manifest_path)?;
    let models = project.models_with_overrides(&config.overrides)?;
    println!("Routing {} models from {}", models.len(), manifest_path.display());
    println!();

    let planner = build_planner(config, &project, sizes, verbose)?;
    if let Some(dir) = sql_dir {
        std::fs::create_dir_all(dir)?;
    }

    let run = RunContext::new();
    let mut report = Report::new();

    println!("{:<40} {:<6} {:<28} {}", "MODEL".bold(), "VENUE".bold(), "GATE".bold(), "REASON".bold());
    for model in &models {
        let plan = planner.plan(&run, model)?;
        let decision = planner.engine().route(model, &run);

        let venue = match decision.venue {
            Venue::Local => "LOCAL".green(),
            Venue::Cloud => "CLOUD".cyan(),
        };
        let gate = decision.gate_label();
        let gate = if decision.escalated { gate.yellow() } else { gate.normal() };
        println!("{:<40} {:<6} {:<28} {}", model.name(), venue, gate, decision.reason);

        for note in decision.advisories() {
            println!("{:<40} {} {}", "", "⚠".yellow(), note.yellow());
        }

        if let (Some(dir), ExecutionPlan::Local { sql, .. }) = (sql_dir, &plan) {
            std::fs::write(dir.join(format!("{}.sql", model.name())), sql)?;
        }

        report.add_model(ModelEntry::from_decision(&model.id, &decision).with_applied(plan.applied().to_vec()));
    }

    let mut diagnostics = planner.engine().crash_diagnostics();
    diagnostics.extend(run.diagnostics());
    for diagnostic in diagnostics {
        let impact = diagnostic
            .model
            .as_deref()
            .map(|id| project.graph.downstream(id))
            .unwrap_or_default();
        report.add_diagnostic(diagnostic.with_impact(impact));
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
    println!(
        "{} models: {} local, {} cloud ({} escalated) - {:.0}% local",
        report.summary.total_models,
        report.summary.local.to_string().green(),
        report.summary.cloud.to_string().cyan(),
        report.summary.escalated,
        report.summary.local_share_pct
    );

    if !report.diagnostics.is_empty() {
        println!();
        for diagnostic in &report.diagnostics {
            let label = match diagnostic.severity {
                Severity::Error => "error".red().bold(),
                Severity::Warn => "warning".yellow().bold(),
                Severity::Info => "info".blue(),
            };
            println!("{}: {}", label, diagnostic);
            if verbose {
                if let Some(suggestion) = &diagnostic.suggestion {
                    println!("  {} {}", "help:".bold(), suggestion);
                }
                if !diagnostic.impact.is_empty() {
                    println!("  {} {}", "impact:".bold(), diagnostic.impact.join(", "));
                }
            }
        }
    }

    report.save_to_file(output)?;
    println!();
    println!("{} Report written to {}", "✓".green(), output.display());

    Ok(())
}

fn explain_command(
    config: &Config,
    manifest_path: &Path,
    sizes: Option<&Path>,
    model_name: &str,
    verbose: bool,
) -> Result<()> {
    let project = load_project(manifest_path)?;
    let models = project.models_with_overrides(&config.overrides)?;
    let target_id = resolve_model_id(&project, model_name)
        .ok_or_else(|| anyhow::anyhow!("Model '{}' not found in manifest", model_name))?;

    let planner = build_planner(config, &project, sizes, verbose)?;
    let run = RunContext::new();

    // Upstream models must be planned first so the Dependencies gate sees their venues
    let upstream = project.graph.upstream(&target_id);
    for model in models.iter().filter(|m| upstream.contains(&m.id)) {
        planner.plan(&run, model)?;
    }

    let model = models
        .iter()
        .find(|m| m.id == target_id)
        .ok_or_else(|| anyhow::anyhow!("'{}' is not a routable model", model_name))?;
    planner.plan(&run, model)?;

    let explanation = planner.engine().explain(model, &run);
    println!("{}", format!("Routing explanation for {}", model.name()).bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    print!("{}", explanation);

    let diagnostics: Vec<_> = run
        .diagnostics()
        .into_iter()
        .filter(|d| d.model.as_deref() == Some(model.id.as_str()))
        .collect();
    if !diagnostics.is_empty() {
        println!("Diagnostics:");
        for diagnostic in diagnostics {
            println!("  {}", diagnostic);
        }
    }

    Ok(())
}

fn transpile_command(
    config: &Config,
    sql: Option<String>,
    file: Option<&Path>,
    from: Option<Dialect>,
    to: Option<Dialect>,
    verbose: bool,
) -> Result<()> {
    let sql = match (sql, file) {
        (Some(sql), _) => sql,
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?,
        (None, None) => return Err(anyhow::anyhow!("Pass SQL text or --file <path>")),
    };

    let registry = Arc::new(CompatibilityRegistry::from_config(config)?);
    let transpiler = Transpiler::from_config(registry, &config.transpile);
    let source = from.unwrap_or(config.transpile.source);
    let target = to.unwrap_or(config.transpile.target);

    let result = transpiler.transpile(&sql, source, target)?;

    if !result.is_success() {
        eprintln!("{}", "Cannot run locally:".red().bold());
        for construct in &result.unsupported {
            eprintln!("  {} {}", "✗".red(), construct);
        }
        return Err(anyhow::anyhow!(
            "{} unsupported construct(s): {}",
            result.unsupported.len(),
            result.unsupported_summary()
        ));
    }

    println!("{}", result.sql);
    if verbose && !result.applied.is_empty() {
        eprintln!("{} {}", "applied:".green(), result.applied.join(", "));
    }

    Ok(())
}

fn failures_command(config: &Config, manifest_path: &Path, action: FailureAction) -> Result<()> {
    let failures = FailureHistory::open(&config.state_path())?;

    match action {
        FailureAction::List { all, json } => {
            let records: Vec<_> = failures
                .records()
                .into_iter()
                .filter(|r| all || r.is_unresolved())
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
                return Ok(());
            }

            if records.is_empty() {
                println!("{} No unresolved failures", "✓".green());
                return Ok(());
            }
            for record in records {
                let status = if record.is_unresolved() { "pinned".red() } else { "cleared".green() };
                println!("{:<40} {:<8} {}", record.model_id, status, record);
            }
        }
        FailureAction::Record { model, kind, detail } => {
            let model_id = resolve_or_keep(manifest_path, &model);
            let mut record = FailureRecord::new(&model_id, kind);
            if let Some(detail) = detail {
                record = record.with_detail(detail);
            }
            failures.record_failure(record)?;
            println!("{} {} pinned to the cloud ({})", "⚠".yellow(), model_id.bold(), kind);
        }
        FailureAction::Clear { model } => {
            let model_id = resolve_or_keep(manifest_path, &model);
            let cleared = failures.clear(&model_id)?;
            if cleared == 0 {
                println!("No unresolved failures for {}", model_id);
            } else {
                println!("{} Cleared {} failure(s) for {}", "✓".green(), cleared, model_id.bold());
            }
        }
    }

    Ok(())
}

fn sync_command(config: &Config, manifest_path: &Path, action: SyncAction) -> Result<()> {
    let ledger = SyncLedger::open(&config.state_path())?;

    match action {
        SyncAction::Status => {
            let entries = ledger.entries();
            if entries.is_empty() {
                println!("No executions recorded");
                return Ok(());
            }
            for (model_id, entry) in entries {
                let state = if entry.pending {
                    "pending".yellow()
                } else if entry.materialized_locally {
                    "local".green()
                } else {
                    "cloud".normal()
                };
                println!(
                    "{:<40} {:<6} {:<8} {:>8} {}",
                    model_id,
                    entry.venue,
                    state,
                    format!("{:.1}s", entry.duration_seconds),
                    entry.updated_at.to_rfc3339()
                );
            }
        }
        SyncAction::Mark { model } => {
            let model_id = resolve_or_keep(manifest_path, &model);
            if ledger.mark_synced(&model_id)? {
                println!("{} {} is available locally", "✓".green(), model_id.bold());
            } else {
                println!("{} has no pending cloud output", model_id);
            }
        }
    }

    Ok(())
}

fn resolve_model_id(project: &DbtProject, name: &str) -> Option<String> {
    if project.manifest.get_node(name).is_some() {
        return Some(name.to_string());
    }
    project.manifest.find_model(name).map(|node| node.unique_id.clone())
}

/// Resolve a short name when a manifest is available, otherwise use it as given
fn resolve_or_keep(manifest_path: &Path, name: &str) -> String {
    if !manifest_path.exists() {
        return name.to_string();
    }
    match DbtProject::load(manifest_path) {
        Ok(project) => resolve_model_id(&project, name).unwrap_or_else(|| name.to_string()),
        Err(e) => {
            tracing::debug!(error = %e, "manifest unavailable, using model name as given");
            name.to_string()
        }
    }
}
