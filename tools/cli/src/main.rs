//! CloudFS CLI - Command line interface for cloud storage operations.
//!
//! This tool drives the storage facade against the synced container or the
//! remote drive, mostly for inspecting and debugging a user's cloud data.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use cloudfs_app::{BackendKind, CloudStorage, CloudStorageConfig, FileKind, Scope};

#[derive(Parser)]
#[command(name = "cloudfs")]
#[command(about = "CloudFS - Scope-partitioned cloud storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Backend to use: "native" or "drive".
    #[arg(long, global = true)]
    provider: Option<BackendKind>,

    /// Scope paths resolve under: "documents" or "appdata".
    #[arg(short, long, global = true, default_value = "documents")]
    scope: Scope,

    /// Synced container directory for the native backend.
    #[arg(long, global = true)]
    container: Option<PathBuf>,

    /// Drive access token.
    #[arg(long, global = true, env = "CLOUDFS_DRIVE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a path exists.
    Exists { path: String },

    /// Show kind, size and modification time of a path.
    Stat { path: String },

    /// Create a directory (the parent must exist).
    Mkdir { path: String },

    /// Print a file, or save it locally.
    Read {
        path: String,

        /// Write to this local file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Create or overwrite a file.
    Write {
        path: String,

        /// Content given inline.
        #[arg(short, long, conflicts_with = "input")]
        text: Option<String>,

        /// Local file to upload; stdin when neither is given.
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Append to a file, creating it when absent.
    Append {
        path: String,

        #[arg(short, long, conflicts_with = "input")]
        text: Option<String>,

        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Remove a file or an empty directory.
    Rm { path: String },

    /// Remove a directory.
    Rmdir {
        path: String,

        /// Remove everything below it as well.
        #[arg(short, long)]
        recursive: bool,
    },

    /// List a directory.
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Scan every scope for duplicate names.
    Duplicates,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let storage = open_storage(&cli)?;
    let scope = cli.scope;

    match cli.command {
        Commands::Exists { path } => cmd_exists(&storage, &path, scope).await,

        Commands::Stat { path } => cmd_stat(&storage, &path, scope).await,

        Commands::Mkdir { path } => {
            storage
                .mkdir(&path, scope)
                .await
                .with_context(|| format!("Failed to create {}", path))?;
            info!("Created directory {}", path);
            Ok(())
        }

        Commands::Read { path, output } => cmd_read(&storage, &path, scope, output.as_deref()).await,

        Commands::Write { path, text, input } => {
            let content = read_input(text, input.as_deref()).await?;
            storage
                .write_file(&path, scope, &content)
                .await
                .with_context(|| format!("Failed to write {}", path))?;
            info!("Wrote {} bytes to {}", content.len(), path);
            Ok(())
        }

        Commands::Append { path, text, input } => {
            let content = read_input(text, input.as_deref()).await?;
            storage
                .append_file(&path, scope, &content)
                .await
                .with_context(|| format!("Failed to append to {}", path))?;
            Ok(())
        }

        Commands::Rm { path } => {
            storage
                .unlink(&path, scope)
                .await
                .with_context(|| format!("Failed to remove {}", path))?;
            Ok(())
        }

        Commands::Rmdir { path, recursive } => {
            storage
                .rmdir(&path, scope, recursive)
                .await
                .with_context(|| format!("Failed to remove directory {}", path))?;
            Ok(())
        }

        Commands::Ls { path } => cmd_ls(&storage, &path, scope).await,

        Commands::Duplicates => cmd_duplicates(&storage).await,
    }
}

/// Default container when none is configured.
fn default_container() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context("No data directory on this platform")?;
    Ok(data_dir.join("cloudfs").join("container"))
}

/// Build the facade from the config file and command-line overrides.
fn open_storage(cli: &Cli) -> Result<CloudStorage> {
    let mut config = match &cli.config {
        Some(path) => CloudStorageConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CloudStorageConfig::default(),
    };

    if let Some(provider) = cli.provider {
        config.provider = Some(provider);
    }
    if let Some(container) = &cli.container {
        config.native.container = Some(container.clone());
    }
    if config.native.container.is_none() {
        let container = default_container()?;
        std::fs::create_dir_all(&container)
            .with_context(|| format!("Failed to create {}", container.display()))?;
        config.native.container = Some(container);
    }

    let storage = CloudStorage::new(config).context("Failed to set up cloud storage")?;
    if let Some(token) = &cli.token {
        storage.set_credential(token.as_str());
    }

    debug!(
        "Using {} backend, scope {}",
        storage.provider(),
        cli.scope
    );
    Ok(storage)
}

async fn read_input(text: Option<String>, input: Option<&Path>) -> Result<Vec<u8>> {
    if let Some(text) = text {
        return Ok(text.into_bytes());
    }

    match input {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut content = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut content)
                .await
                .context("Failed to read stdin")?;
            Ok(content)
        }
    }
}

async fn cmd_exists(storage: &CloudStorage, path: &str, scope: Scope) -> Result<()> {
    let exists = storage
        .exists(path, scope)
        .await
        .with_context(|| format!("Failed to check {}", path))?;
    println!("{}", exists);
    Ok(())
}

async fn cmd_stat(storage: &CloudStorage, path: &str, scope: Scope) -> Result<()> {
    let stat = storage
        .stat(path, scope)
        .await
        .with_context(|| format!("Failed to stat {}", path))?;

    println!("{}", serde_json::to_string_pretty(&stat)?);
    Ok(())
}

async fn cmd_read(
    storage: &CloudStorage,
    path: &str,
    scope: Scope,
    output: Option<&Path>,
) -> Result<()> {
    let content = storage
        .read_file(path, scope)
        .await
        .with_context(|| format!("Failed to read {}", path))?;

    match output {
        Some(dest) => {
            tokio::fs::write(dest, &content)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            info!("Saved {} bytes to {}", content.len(), dest.display());
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&content).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

async fn cmd_ls(storage: &CloudStorage, path: &str, scope: Scope) -> Result<()> {
    let mut entries = storage
        .read_dir(path, scope)
        .await
        .with_context(|| format!("Failed to list {}", path))?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    for entry in entries {
        let marker = if entry.kind == FileKind::Directory { "/" } else { "" };
        println!("{}{}", entry.name, marker);
    }
    Ok(())
}

async fn cmd_duplicates(storage: &CloudStorage) -> Result<()> {
    let report = storage.scan_all_duplicates().await;
    if report.failures > 0 {
        anyhow::bail!(
            "Duplicate scan failed for {} of {} scopes",
            report.failures,
            Scope::ALL.len()
        );
    }

    let groups = storage.duplicates();
    if groups.is_empty() {
        println!("No duplicate names.");
        return Ok(());
    }

    for group in groups {
        println!("{}:{}", group.scope, group.path);
        for id in group.ids {
            println!("  {}", id);
        }
    }
    Ok(())
}
