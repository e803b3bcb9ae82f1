//! Command-line host for artisync.
//!
//! Batches are read from a JSON file:
//!
//! ```json
//! {
//!   "integration_id": "user-tools",
//!   "revision": "4f2a9c1",
//!   "source_url": "https://github.com/acme/tools",
//!   "operations": [
//!     { "op": "create", "source_path": "skills/fmt/SKILL.md", "kind": "skill",
//!       "destination": "skills/fmt/SKILL.md", "content": "..." },
//!     { "op": "delete", "source_path": "agents/old.md", "kind": "agent",
//!       "destination": "agents/old.md" },
//!     { "op": "rename", "previous_source": "commands/a.md",
//!       "source_path": "commands/b.md", "kind": "command",
//!       "from": "commands/a.md", "destination": "commands/b.md", "content": "..." }
//!   ]
//! }
//! ```

use anyhow::Context;
use artisync::registry::IntegrationRecord;
use artisync::{ArtifactKind, Batch, Fingerprint, Scope, SyncConfig, SyncEngine};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Transactional artifact sync.
#[derive(Parser)]
#[command(name = "artisync", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Registry scope.
    #[arg(short, long, default_value = "user")]
    scope: Scope,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show what a batch would do without writing anything.
    Plan {
        /// Approved root directory.
        root: PathBuf,
        /// Batch JSON file.
        batch: PathBuf,
    },
    /// Apply a batch as one transaction.
    Apply {
        root: PathBuf,
        batch: PathBuf,
        /// Abort on any conflict instead of skipping it.
        #[arg(long)]
        strict: bool,
    },
    /// List registered integrations.
    List,
    /// Forget an integration. Its files stay on disk.
    Unregister {
        id: String,
        /// Approved root (defaults to `~/.claude`).
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Repair a corrupt registry.
    Recover {
        /// Start over with an empty registry instead of the last good copy.
        #[arg(long)]
        reset: bool,
        /// Approved root (defaults to `~/.claude`).
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

#[derive(Deserialize)]
struct BatchFile {
    integration_id: String,
    revision: String,
    #[serde(default)]
    source_url: Option<String>,
    operations: Vec<OperationEntry>,
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum OperationEntry {
    Create {
        source_path: String,
        kind: ArtifactKind,
        destination: PathBuf,
        content: String,
    },
    Update {
        source_path: String,
        kind: ArtifactKind,
        destination: PathBuf,
        content: String,
        #[serde(default)]
        expected_prior: Option<Fingerprint>,
    },
    Delete {
        source_path: String,
        kind: ArtifactKind,
        destination: PathBuf,
        #[serde(default)]
        expected_prior: Option<Fingerprint>,
    },
    Rename {
        previous_source: String,
        source_path: String,
        kind: ArtifactKind,
        from: PathBuf,
        destination: PathBuf,
        content: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("artisync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(artisync::dirs::config_file);
    let config = SyncConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    match cli.command {
        Command::Plan { root, batch } => {
            let (engine, batch, _) = open(&root, &batch, cli.scope, config)?;
            let report = engine.plan(&batch)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Apply {
            root,
            batch,
            strict,
        } => {
            let (engine, batch, source_url) = open(&root, &batch, cli.scope, config)?;
            if let Some(url) = source_url {
                engine.register_integration(IntegrationRecord::new(
                    batch.integration_id.clone(),
                    &url,
                    cli.scope,
                ))?;
            }
            let report = engine.apply(&batch, strict)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_committed() {
                anyhow::bail!("transaction rolled back");
            }
        }
        Command::List => {
            let store = artisync::RegistryStore::for_scope(&config.data_dir(), cli.scope);
            let registry = store.load_or_default()?;
            if registry.integrations.is_empty() {
                println!("no integrations registered");
            }
            for integration in registry.integrations.values() {
                println!(
                    "{}\t{}\t{}\t{} artifacts",
                    integration.id,
                    integration.source_url,
                    integration.last_revision.as_deref().unwrap_or("-"),
                    integration.artifacts.len()
                );
            }
        }
        Command::Unregister { id, root } => {
            let engine = SyncEngine::open(&root_or_default(root)?, cli.scope, config)?;
            let removed = engine.unregister_integration(&id)?;
            println!("unregistered {} ({} artifacts)", removed.id, removed.artifacts.len());
        }
        Command::Recover { reset, root } => {
            let engine = SyncEngine::open(&root_or_default(root)?, cli.scope, config)?;
            let registry = if reset {
                engine.reinitialize_registry()?
            } else {
                engine.recover_registry()?
            };
            println!(
                "registry {} holds {} integrations",
                engine.store().path().display(),
                registry.integrations.len()
            );
        }
    }
    Ok(())
}

fn root_or_default(root: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    match root {
        Some(root) => Ok(root),
        None => artisync::dirs::default_user_root().context("cannot determine home directory"),
    }
}

fn open(
    root: &Path,
    batch_path: &Path,
    scope: Scope,
    config: SyncConfig,
) -> anyhow::Result<(SyncEngine, Batch, Option<String>)> {
    let text = std::fs::read_to_string(batch_path)
        .with_context(|| format!("reading {}", batch_path.display()))?;
    let file: BatchFile = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", batch_path.display()))?;

    let mut builder = Batch::builder(file.integration_id, file.revision);
    for entry in file.operations {
        builder = match entry {
            OperationEntry::Create {
                source_path,
                kind,
                destination,
                content,
            } => builder.create(source_path, kind, destination, content),
            OperationEntry::Update {
                source_path,
                kind,
                destination,
                content,
                expected_prior,
            } => builder.update(source_path, kind, destination, content, expected_prior),
            OperationEntry::Delete {
                source_path,
                kind,
                destination,
                expected_prior,
            } => builder.delete(source_path, kind, destination, expected_prior),
            OperationEntry::Rename {
                previous_source,
                source_path,
                kind,
                from,
                destination,
                content,
            } => builder.rename(previous_source, source_path, kind, from, destination, content),
        };
    }
    let batch = builder.build()?;
    let engine = SyncEngine::open(root, scope, config)?;
    Ok((engine, batch, file.source_url))
}
