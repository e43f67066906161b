//! idmerge command-line tool.
//!
//! Provides subcommands for importing identities into the registry,
//! inspecting and locking individuals, viewing the audit log, and generating /
//! validating configuration files.

mod render;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use idmerge_core::config::AppConfig;
use idmerge_core::connector;
use idmerge_core::db::Database;
use idmerge_core::import::Importer;
use idmerge_core::models::CanonicalId;
use idmerge_core::IdentityRegistry;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// idmerge command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "idmerge",
    version,
    about = "Import identities and reconcile them into individuals"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./idmerge.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides the config file;
    /// `RUST_LOG` overrides both.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./idmerge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Import candidate individuals from a file.
    Import {
        /// Connector backend: json or toml. Defaults to `import.backend`.
        #[arg(short, long)]
        backend: Option<String>,

        /// Input file. Defaults to `import.source`.
        path: Option<PathBuf>,

        /// Print the full import report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show an individual with its identities and enrollments.
    Show {
        /// Canonical id of the individual.
        canonical_id: String,
    },

    /// Lock an individual so imports never merge it away.
    Lock {
        /// Canonical id of the individual.
        canonical_id: String,
    },

    /// Remove the lock from an individual.
    Unlock {
        /// Canonical id of the individual.
        canonical_id: String,
    },

    /// Show recent audit log entries.
    Audit {
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("Error: {:#}", e)));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => {
            init_tracing(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_init(&output)
        }
        Commands::Validate => {
            init_tracing(cli.log_level.as_deref().unwrap_or("warn"));
            cmd_validate(&cli.config)
        }
        command => {
            // Everything else needs the config and the registry.
            let config = AppConfig::load_and_validate(&cli.config)
                .context("failed to load configuration file")?;
            init_tracing(cli.log_level.as_deref().unwrap_or(&config.logging.level));
            let db = open_database(&config)?;

            match command {
                Commands::Import {
                    backend,
                    path,
                    json,
                } => cmd_import(&db, &config, backend, path, json),
                Commands::Show { canonical_id } => cmd_show(&db, &canonical_id),
                Commands::Lock { canonical_id } => cmd_lock(&db, &canonical_id, true),
                Commands::Unlock { canonical_id } => cmd_lock(&db, &canonical_id, false),
                Commands::Audit { limit } => cmd_audit(&db, limit),
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let db_path = config.database_path();
    debug!(path = %db_path.display(), "opening registry");
    let db = Database::new(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    db.initialize().context("failed to initialize database")?;
    Ok(db)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# idmerge configuration

[registry]
# Directory holding the registry database (default: the platform data dir).
# data_dir = "/var/lib/idmerge"
db_file = "idmerge.db"

[logging]
# trace, debug, info, warn, error
level = "warn"

[import]
# Connector backend: json or toml.
backend = "json"
# Input used when `idmerge import` is given no path.
# source = "./individuals.json"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Default configuration written to {}", output.display()))
    );
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file (registry location, import backend)");
    println!(
        "  2. Validate with: idmerge validate --config {}",
        output.display()
    );
    println!(
        "  3. Import with:   idmerge import --config {} <individuals.json>",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config = AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    match config.validate() {
        Ok(()) => {
            println!("  [OK] All fields are valid");
        }
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Database      : {}", config.database_path().display());
    println!("  Log level     : {}", config.logging.level);
    println!("  Import backend: {}", config.import.backend);
    println!(
        "  Import source : {}",
        config
            .import
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not set".to_string())
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_import(
    db: &Database,
    config: &AppConfig,
    backend: Option<String>,
    path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let backend = backend.unwrap_or_else(|| config.import.backend.clone());
    let path = path
        .or_else(|| config.import.source.clone())
        .context("no input given: pass a path or set import.source")?;

    let source = connector::from_name(&backend, path)?;

    let spinner = if json {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.blue} {msg}")
                .context("invalid progress template")?
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.set_message(format!("Importing ({} backend)...", backend));
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    };

    let result = Importer::new(db).import_identities(source.as_ref());
    spinner.finish_and_clear();
    let report = result.context("import failed")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        );
    } else {
        render::print_report(&report);
    }

    Ok(())
}

fn cmd_show(db: &Database, canonical_id: &str) -> Result<()> {
    let individual = db
        .find_individual(&CanonicalId::new(canonical_id))
        .with_context(|| format!("cannot show individual '{}'", canonical_id))?;
    render::print_individual(&individual);
    Ok(())
}

fn cmd_lock(db: &Database, canonical_id: &str, locked: bool) -> Result<()> {
    let id = CanonicalId::new(canonical_id);
    let individual = if locked {
        db.lock(&id)
    } else {
        db.unlock(&id)
    }
    .with_context(|| format!("cannot update lock on '{}'", canonical_id))?;

    let verb = if locked { "locked" } else { "unlocked" };
    println!(
        "{}",
        style::success(&format!("Individual {} {}", individual.canonical_id, verb))
    );
    Ok(())
}

fn cmd_audit(db: &Database, limit: u32) -> Result<()> {
    let entries = db
        .list_audit_log(limit)
        .context("failed to list audit entries")?;

    if entries.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }

    println!();
    println!("{}", style::header("Audit Log"));
    println!();
    render::print_audit(&entries);
    println!();
    println!("{}", style::dim(&format!("{} entries shown", entries.len())));

    Ok(())
}
