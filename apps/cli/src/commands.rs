//! CLI command definitions, routing, and tracing setup.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use reportharvest_core::{
    BatchSummary, ItemOutcome, PayloadCatalog, ProgressReporter, run_materialize, run_resolve,
    run_trigger,
};
use reportharvest_shared::{AppConfig, init_config, load_config};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ReportHarvest: CRM report exports into a shared spreadsheet.
#[derive(Parser)]
#[command(
    name = "reportharvest",
    version,
    about = "Trigger CRM report exports, resolve their delivery emails, and load the tables into a spreadsheet.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.reportharvest/reportharvest.toml).
    #[arg(long, env = "REPORTHARVEST_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// CRM portal (account) id.
    #[arg(long, env = "HUBSPOT_PORTAL_ID", global = true)]
    pub portal_id: Option<String>,

    /// Target spreadsheet id.
    #[arg(long, env = "SPREADSHEET_ID", global = true)]
    pub spreadsheet_id: Option<String>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Queue an export for every catalog report.
    Trigger,

    /// Find delivery notifications and write the hand-off file.
    Resolve {
        /// Also pick up notifications already marked processed.
        #[arg(long)]
        include_processed: bool,
    },

    /// Download, decode and upload every record in the hand-off file.
    Materialize,

    /// Resolve then materialize in one go.
    Run {
        /// Also pick up notifications already marked processed.
        #[arg(long)]
        include_processed: bool,
    },

    /// Export payload catalog management.
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Payload catalog subcommands.
#[derive(Subcommand)]
pub(crate) enum CatalogAction {
    /// List stored export payloads.
    List,
    /// Add or replace a payload, keyed by its exportName.
    Add {
        /// JSON file holding the payload (reads stdin when omitted).
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Check the report catalog against the stored payloads.
    Check,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file from the template.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "reportharvest=info",
        1 => "reportharvest=debug",
        _ => "reportharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    // `config init` must work before any config file exists.
    if let Command::Config {
        action: ConfigAction::Init,
    } = cli.command
    {
        return cmd_config_init(cli.config.as_deref());
    }

    let config = resolved_config(&cli)?;

    match cli.command {
        Command::Trigger => cmd_trigger(&config).await,
        Command::Resolve { include_processed } => cmd_resolve(&config, include_processed).await,
        Command::Materialize => cmd_materialize(&config).await,
        Command::Run { include_processed } => cmd_run(&config, include_processed).await,
        Command::Catalog { action } => match action {
            CatalogAction::List => cmd_catalog_list(&config),
            CatalogAction::Add { file } => cmd_catalog_add(&config, file.as_deref()),
            CatalogAction::Check => cmd_catalog_check(&config),
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(cli.config.as_deref()),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

fn resolved_config(cli: &Cli) -> Result<AppConfig> {
    let config = load_config(cli.config.as_deref())?;
    Ok(config.with_overrides(cli.portal_id.as_deref(), cli.spreadsheet_id.as_deref()))
}

fn exit_code(summaries: &[&BatchSummary]) -> ExitCode {
    if summaries.iter().all(|s| s.is_success()) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

// ---------------------------------------------------------------------------
// Stage commands
// ---------------------------------------------------------------------------

async fn cmd_trigger(config: &AppConfig) -> Result<ExitCode> {
    info!(reports = config.reports.len(), "triggering exports");
    let summary = run_trigger(config, &CliProgress::new()).await?;
    print_summary(&summary);
    Ok(exit_code(&[&summary]))
}

async fn cmd_resolve(config: &AppConfig, include_processed: bool) -> Result<ExitCode> {
    info!(include_processed, "resolving notifications");
    let summary = run_resolve(config, include_processed, &CliProgress::new()).await?;
    print_summary(&summary);
    println!("  Hand-off: {}", config.paths.handoff.display());
    println!();
    Ok(exit_code(&[&summary]))
}

async fn cmd_materialize(config: &AppConfig) -> Result<ExitCode> {
    info!(handoff = %config.paths.handoff.display(), "materializing records");
    let summary = run_materialize(config, &CliProgress::new()).await?;
    print_summary(&summary);
    Ok(exit_code(&[&summary]))
}

async fn cmd_run(config: &AppConfig, include_processed: bool) -> Result<ExitCode> {
    let resolved = run_resolve(config, include_processed, &CliProgress::new()).await?;
    print_summary(&resolved);

    let materialized = run_materialize(config, &CliProgress::new()).await?;
    print_summary(&materialized);

    Ok(exit_code(&[&resolved, &materialized]))
}

fn print_summary(summary: &BatchSummary) {
    println!();
    println!("  {} finished in {:.1}s", summary.stage, summary.elapsed.as_secs_f64());
    println!("  Succeeded: {}", summary.succeeded());
    println!("  Missing:   {}", summary.missing());
    println!("  Failed:    {}", summary.failed());
    println!();
}

// ---------------------------------------------------------------------------
// Catalog commands
// ---------------------------------------------------------------------------

fn cmd_catalog_list(config: &AppConfig) -> Result<ExitCode> {
    let catalog = PayloadCatalog::load(&config.paths.payloads)?;

    if catalog.is_empty() {
        println!("No payloads in {}", config.paths.payloads.display());
        return Ok(ExitCode::SUCCESS);
    }

    for (name, _) in catalog.iter() {
        match config.reports.iter().find(|r| r.name == name) {
            Some(report) => println!("  {name}  ->  {}", report.destination),
            None => println!("  {name}  (not in catalog)"),
        }
    }
    println!();
    println!("  {} payload(s) in {}", catalog.len(), config.paths.payloads.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_catalog_add(config: &AppConfig, file: Option<&Path>) -> Result<ExitCode> {
    let input = match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| eyre!("cannot read {}: {e}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let payload: serde_json::Value =
        serde_json::from_str(&input).map_err(|e| eyre!("invalid payload JSON: {e}"))?;
    if !payload.is_object() {
        return Err(eyre!("payload must be a JSON object"));
    }

    let path = &config.paths.payloads;
    let mut catalog = PayloadCatalog::load_or_default(path)?;
    let name = catalog.add(payload)?;
    catalog.save(path)?;

    println!("Added: {name}");
    println!("Saved {} payload(s) to {}", catalog.len(), path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_catalog_check(config: &AppConfig) -> Result<ExitCode> {
    config.validate_catalog()?;
    let catalog = PayloadCatalog::load(&config.paths.payloads)?;
    let check = catalog.check(&config.reports);

    for name in &check.missing {
        println!("  error: no payload for '{name}'");
    }
    for name in &check.not_object {
        println!("  error: payload for '{name}' is not a JSON object");
    }
    for (name, export_name) in &check.name_mismatch {
        println!("  warning: payload for '{name}' has exportName '{export_name}'");
    }
    for name in &check.unreferenced {
        println!("  warning: payload '{name}' is not referenced by any report");
    }

    if check.is_ok() {
        println!("  Catalog OK: {} report(s)", config.reports.len());
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init(explicit: Option<&Path>) -> Result<ExitCode> {
    let path = init_config(explicit)?;
    println!("Config initialized at: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_show(config: &AppConfig) -> Result<ExitCode> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter: a bar per stage, one line per item.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, name: &str, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_prefix(name.to_string());
        self.bar.enable_steady_tick(std::time::Duration::from_millis(80));
    }

    fn item(&self, name: &str, outcome: &ItemOutcome, current: usize, _total: usize) {
        let mark = match outcome {
            ItemOutcome::Done { .. } => "ok  ",
            ItemOutcome::Missing { .. } => "--  ",
            ItemOutcome::Failed { .. } => "FAIL",
        };
        self.bar.println(format!("  {mark} {name:<45} {outcome}"));
        self.bar.set_position(current as u64);
        self.bar.set_message(name.to_string());
    }

    fn done(&self, _summary: &BatchSummary) {
        self.bar.finish_and_clear();
    }
}
