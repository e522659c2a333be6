//! camsync command-line management tool.
//!
//! Provides subcommands for seeding and inspecting models, managing user
//! workspaces, merging them back, answering merge conflicts, viewing the
//! merge log, and generating / validating configuration files.

mod report;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use camsync_core::config::{AppConfig, LoggingConfig};
use camsync_core::conflict::ResolutionSet;
use camsync_core::db::Database;
use camsync_core::models::{CameraCollection, CameraRecord, Fields};
use camsync_core::{MergeEngine, MergeOutcome};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// camsync command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "camsync",
    version,
    about = "Manage camera models, user workspaces and merges"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "/etc/camsync/config.toml")]
    config: PathBuf,

    /// Override the configured log level.
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
        #[arg(short, long, default_value = "./camsync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Create and inspect models.
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Manage user workspaces.
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },

    /// Merge a workspace back into its model.
    Merge {
        model: Uuid,

        #[arg(short, long, default_value_t = Uuid::nil())]
        user: Uuid,

        /// Print the JSON response instead of a table.
        #[arg(long)]
        json: bool,

        /// Compute the merge without committing it.
        #[arg(long)]
        preview: bool,

        /// On conflicts, write a resolution file prefilled with the
        /// workspace values.
        #[arg(long)]
        template: Option<PathBuf>,
    },

    /// Answer the current conflicts of a workspace and publish the result.
    Resolve {
        model: Uuid,

        #[arg(short, long, default_value_t = Uuid::nil())]
        user: Uuid,

        /// JSON file with the resolution set.
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show recent merge log entries.
    History {
        /// Only show entries for this model.
        #[arg(short, long)]
        model: Option<Uuid>,

        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

#[derive(Subcommand, Debug)]
enum ModelAction {
    /// Create a model, optionally seeded with cameras from a JSON file.
    Create {
        #[arg(short, long)]
        name: String,

        #[arg(long)]
        cameras: Option<PathBuf>,
    },
    /// Show a model and its cameras.
    Show {
        id: Uuid,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum WorkspaceAction {
    /// Fork a model into a new workspace.
    Create {
        model: Uuid,

        #[arg(short, long, default_value_t = Uuid::nil())]
        user: Uuid,
    },
    /// Show a workspace and its cameras.
    Show {
        model: Uuid,

        #[arg(short, long, default_value_t = Uuid::nil())]
        user: Uuid,

        #[arg(long)]
        json: bool,
    },
    /// Discard a workspace.
    Delete {
        model: Uuid,

        #[arg(short, long, default_value_t = Uuid::nil())]
        user: Uuid,
    },
    /// Insert or replace a camera from a JSON file.
    PutCamera {
        model: Uuid,

        camera_id: String,

        #[arg(short, long, default_value_t = Uuid::nil())]
        user: Uuid,

        #[arg(short, long)]
        file: PathBuf,
    },
    /// Remove a camera.
    RemoveCamera {
        model: Uuid,

        camera_id: String,

        #[arg(short, long, default_value_t = Uuid::nil())]
        user: Uuid,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = log_level(cli.log_level.as_deref(), &cli.config);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_target(false)
        .without_time()
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        command => {
            let config = load_config(&cli.config)?;
            let db = open_database(&config)?;
            let engine = MergeEngine::new(db, &config.merge);

            match command {
                Commands::Model { action } => cmd_model(engine.store(), action),
                Commands::Workspace { action } => cmd_workspace(&engine, action),
                Commands::Merge {
                    model,
                    user,
                    json,
                    preview,
                    template,
                } => cmd_merge(&engine, model, user, json, preview, template.as_deref()),
                Commands::Resolve { model, user, file } => cmd_resolve(&engine, model, user, &file),
                Commands::History { model, limit } => cmd_history(engine.store(), model, limit),
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// `--log-level`, else the configured level, else the built-in default.
fn log_level(flag: Option<&str>, config_path: &Path) -> String {
    flag.map(str::to_string).unwrap_or_else(|| {
        AppConfig::load_from_file(config_path)
            .map(|c| c.logging.level)
            .unwrap_or_else(|_| LoggingConfig::default().level)
    })
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_validate(path).context("failed to load configuration file")
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let db_path = config.database_path();
    tracing::debug!(path = %db_path.display(), "opening database");
    let db = Database::open(&db_path, config.storage.busy_timeout_ms)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    db.initialize().context("failed to initialize database")?;
    Ok(db)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to encode JSON")?
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    let body = toml::to_string_pretty(&AppConfig::default())
        .context("failed to render default configuration")?;
    let contents = format!(
        "# camsync configuration\n# {} overrides storage.data_dir.\n\n{}",
        camsync_core::config::DATA_DIR_ENV,
        body
    );
    std::fs::write(output, contents).context("failed to write config file")?;

    println!("{}", style::success(&format!("Default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Point storage.data_dir at a writable directory");
    println!("  2. Validate with: camsync validate --config {}", output.display());
    println!(
        "  3. Create a model: camsync --config {} model create --name <NAME>",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config.apply_env_overrides();

    match config.validate() {
        Ok(()) => println!("  [OK] All values are valid"),
        Err(e) => {
            println!("  {}", style::error(&format!("Validation error: {}", e)));
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("{}", style::header("Configuration summary:"));
    println!("  Database       : {}", config.database_path().display());
    println!("  Busy timeout   : {}ms", config.storage.busy_timeout_ms);
    println!("  Commit retries : {}", config.merge.commit_retries);
    println!("  Log level      : {}", config.logging.level);
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_model(db: &Database, action: ModelAction) -> Result<()> {
    match action {
        ModelAction::Create { name, cameras } => {
            let cameras: CameraCollection = match cameras {
                Some(path) => read_json(&path)?,
                None => CameraCollection::new(),
            };
            let model = db
                .insert_model(&name, &cameras)
                .context("failed to create model")?;
            println!(
                "{}",
                style::success(&format!(
                    "Model '{}' created with {} camera(s)",
                    model.name,
                    model.cameras.len()
                ))
            );
            println!("  ID: {}", model.id);
            Ok(())
        }

        ModelAction::Show { id, json } => {
            let model = db
                .get_model(id, Fields::CAMERAS)
                .context("database error")?
                .ok_or_else(|| anyhow::anyhow!("model '{}' not found", id))?;

            if json {
                return print_json(&model);
            }

            println!("{}", style::header(&format!("Model: {}", model.name)));
            println!("  ID      : {}", model.id);
            println!("  Version : {}", model.version);
            println!();
            if model.cameras.is_empty() {
                println!("{}", style::dim("No cameras."));
            } else {
                println!("{}", report::camera_table(&model.cameras));
            }
            Ok(())
        }
    }
}

fn cmd_workspace(engine: &MergeEngine<Database>, action: WorkspaceAction) -> Result<()> {
    let db = engine.store();
    match action {
        WorkspaceAction::Create { model, user } => {
            let ws = engine
                .create_workspace(model, user)
                .context("failed to create workspace")?;
            println!(
                "{}",
                style::success(&format!(
                    "Workspace created at model version {} with {} camera(s)",
                    ws.base_version,
                    ws.cameras.len()
                ))
            );
            Ok(())
        }

        WorkspaceAction::Show { model, user, json } => {
            let ws = db
                .get_workspace(model, user, Fields::CAMERAS)
                .context("database error")?
                .ok_or_else(|| anyhow::anyhow!("no workspace for model {} and user {}", model, user))?;

            if json {
                return print_json(&ws);
            }

            println!("{}", style::header("Workspace"));
            println!("  Model        : {}", ws.model_id);
            println!("  User         : {}", ws.user_id);
            println!("  Generation   : {}", ws.generation);
            println!("  Version      : {}", ws.version);
            println!("  Base version : {}", ws.base_version);
            println!(
                "  Local edits  : {}",
                if ws.is_pristine() { "none" } else { "yes" }
            );
            println!("  Updated at   : {}", ws.updated_at.to_rfc3339());
            println!();
            if ws.cameras.is_empty() {
                println!("{}", style::dim("No cameras."));
            } else {
                println!("{}", report::camera_table(&ws.cameras));
            }
            Ok(())
        }

        WorkspaceAction::Delete { model, user } => {
            if engine
                .delete_workspace(model, user)
                .context("failed to delete workspace")?
            {
                println!("{}", style::success("Workspace deleted"));
            } else {
                println!("{}", style::warn("No workspace to delete"));
            }
            Ok(())
        }

        WorkspaceAction::PutCamera {
            model,
            camera_id,
            user,
            file,
        } => {
            let camera: CameraRecord = read_json(&file)?;
            let version = db
                .upsert_workspace_camera(model, user, &camera_id, &camera)
                .context("failed to store camera")?;
            println!(
                "{}",
                style::success(&format!("Camera '{}' saved (workspace version {})", camera_id, version))
            );
            Ok(())
        }

        WorkspaceAction::RemoveCamera {
            model,
            camera_id,
            user,
        } => {
            match db
                .remove_workspace_camera(model, user, &camera_id)
                .context("failed to remove camera")?
            {
                Some(version) => println!(
                    "{}",
                    style::success(&format!(
                        "Camera '{}' removed (workspace version {})",
                        camera_id, version
                    ))
                ),
                None => println!("{}", style::warn(&format!("No camera '{}' in workspace", camera_id))),
            }
            Ok(())
        }
    }
}

fn cmd_merge(
    engine: &MergeEngine<Database>,
    model: Uuid,
    user: Uuid,
    json: bool,
    preview: bool,
    template: Option<&Path>,
) -> Result<()> {
    let outcome = if preview {
        let report = engine
            .preview(model, user)
            .context("failed to compute merge preview")?;
        if report.is_clean() {
            if json {
                return print_json(&report);
            }
            println!(
                "{}",
                style::success(&format!("Merge would be clean ({} camera(s))", report.merged.len()))
            );
            return Ok(());
        }
        MergeOutcome::Conflicted(report)
    } else {
        engine.merge(model, user).context("merge failed")?
    };

    if json {
        print_json(&outcome.response())?;
    } else {
        match &outcome {
            MergeOutcome::NoChanges => println!("{}", style::dim("Workspace has no local changes.")),
            MergeOutcome::FastForward { .. } | MergeOutcome::Merged { .. } => {
                println!("{}", style::success(&format!("Workspace {}", outcome)))
            }
            MergeOutcome::Conflicted(report) => {
                println!(
                    "{}",
                    style::warn(&format!(
                        "{} conflicting field(s), nothing was committed",
                        report.conflict_count()
                    ))
                );
                println!("{}", report::conflict_table(report));
            }
        }
    }

    if let (MergeOutcome::Conflicted(report), Some(path)) = (&outcome, template) {
        let answers = report::resolution_template(report);
        let text = serde_json::to_string_pretty(&answers).context("failed to encode template")?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write {}", path.display()))?;
        if !json {
            println!();
            println!("Resolution template written to {}", path.display());
            println!(
                "Edit it, then run: camsync resolve {} --user {} --file {}",
                model,
                user,
                path.display()
            );
        }
    }

    Ok(())
}

fn cmd_resolve(engine: &MergeEngine<Database>, model: Uuid, user: Uuid, file: &Path) -> Result<()> {
    let answers: ResolutionSet = read_json(file)?;
    let outcome = engine
        .resolve(model, user, &answers)
        .context("resolution rejected")?;
    println!(
        "{}",
        style::success(&format!(
            "Conflicts resolved, model is now at version {}; workspace closed",
            outcome.version
        ))
    );
    Ok(())
}

fn cmd_history(db: &Database, model: Option<Uuid>, limit: u32) -> Result<()> {
    let entries = db
        .list_merge_log(model, limit)
        .context("failed to list merge log")?;

    if entries.is_empty() {
        println!("No merge log entries found.");
        return Ok(());
    }

    println!("{}", report::history_table(&entries));
    println!("{} entries shown", entries.len());
    Ok(())
}
