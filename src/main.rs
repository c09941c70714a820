//! # podreplace
//!
//! Command-line front end for the pod replacement engine.
//!
//! ## Usage
//!
//! ```bash
//! # Replace the pod selected by a spec file
//! podreplace replace -f replace.yaml --images images.yaml
//!
//! # Undo the replacement
//! podreplace revert -f replace.yaml --namespace dev
//! ```
//!
//! `replace.yaml` holds one replacement spec:
//!
//! ```yaml
//! labelSelector:
//!   app: web
//! containerName: api
//! replaceImage: loftsh/devspace-dev:latest
//! patches:
//!   - op: add
//!     path: /spec/containers/0/command
//!     value: ["sleep", "infinity"]
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use pod_replacer::{
    ConfigImageResolver, EngineConfig, PodReplacer, ReplaceOutcome, ReplacementSpec,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Development pod replacement for Kubernetes workloads
#[derive(Parser)]
#[command(name = "podreplace")]
#[command(
    about = "Replace workload pods with development copies and revert them",
    long_about = None,
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_GIT_HASH"), " ", env!("BUILD_DATETIME"), ")")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace (overrides the replacement spec and PODREPLACE_DEFAULT_NAMESPACE)
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Kubernetes context to use
    #[arg(short, long, global = true)]
    context: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the selected pod, or verify an existing replacement is current
    Replace {
        /// Replacement spec (YAML)
        #[arg(short = 'f', long = "file")]
        spec: PathBuf,

        /// Image config used to resolve imageName and replaceImage (YAML)
        #[arg(long)]
        images: Option<PathBuf>,
    },
    /// Delete the replacement pod and scale its parent back up
    Revert {
        /// Replacement spec (YAML)
        #[arg(short = 'f', long = "file")]
        spec: PathBuf,

        /// Image config used to resolve imageName (YAML)
        #[arg(long)]
        images: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    init_tracing();

    let cli = Cli::parse();
    let (spec_path, images_path) = match &cli.command {
        Commands::Replace { spec, images } | Commands::Revert { spec, images } => {
            (spec.as_path(), images.as_deref())
        }
    };

    let mut spec = load_spec(spec_path)?;
    if let Some(namespace) = cli.namespace.clone() {
        spec.namespace = Some(namespace);
    }
    let images = load_images(images_path)?;

    let client = create_client(cli.context.as_deref())
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")?;
    let replacer = PodReplacer::with_client(client, Arc::new(images), EngineConfig::from_env());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    match cli.command {
        Commands::Replace { .. } => {
            match replacer
                .replace_pod(&spec, &cancel)
                .await
                .context("Failed to replace pod")?
            {
                ReplaceOutcome::Unchanged { pod } => {
                    println!("✅ Replaced pod {pod} is up to date");
                }
                ReplaceOutcome::Replaced {
                    original,
                    replacement,
                    parent,
                } => {
                    println!("✅ Replaced pod {original} with {replacement} (scaled down {parent})");
                }
            }
        }
        Commands::Revert { .. } => {
            match replacer
                .revert_replace_pod(&spec, &cancel)
                .await
                .context("Failed to revert replaced pod")?
            {
                Some(reverted) => println!("✅ Reverted replaced pod {}", reverted.name()),
                None => println!("No replaced pod found"),
            }
        }
    }

    Ok(())
}

/// Human readable logs by default, JSON when `LOG_FORMAT=json`
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pod_replacer=info,podreplace=info".into());

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_spec(path: &Path) -> Result<ReplacementSpec> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read spec file {}", path.display()))?;
    ReplacementSpec::from_yaml(&raw)
        .with_context(|| format!("Failed to parse spec file {}", path.display()))
}

fn load_images(path: Option<&Path>) -> Result<ConfigImageResolver> {
    let Some(path) = path else {
        return Ok(ConfigImageResolver::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read image config {}", path.display()))?;
    ConfigImageResolver::from_yaml(&raw)
        .with_context(|| format!("Failed to parse image config {}", path.display()))
}

async fn create_client(context: Option<&str>) -> Result<Client> {
    let Some(context) = context else {
        return Ok(Client::try_default().await?);
    };

    info!(context, "Using kube context");
    let kubeconfig = Kubeconfig::read().context("Failed to read kubeconfig")?;
    let options = KubeConfigOptions {
        context: Some(context.to_string()),
        ..Default::default()
    };
    let config = Config::from_custom_kubeconfig(kubeconfig, &options).await?;
    Ok(Client::try_from(config)?)
}
