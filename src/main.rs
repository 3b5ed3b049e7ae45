//! # credrotate
//!
//! Sidecar binary: loads and validates the declarative config, wires the
//! provider and store sets, runs one reconciliation pass against the
//! persisted state, and saves the state back.
//!
//! Intended to be invoked periodically (cron, CI job, scheduled Lambda);
//! each invocation is one pass and the state backend carries memory
//! between them.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info};

use credrotate::backend::{FileBackend, S3Backend, StateBackend};
use credrotate::clock::SystemClock;
use credrotate::duration::parse_duration;
use credrotate::provider::{
    ArtifactoryProvider, GithubProvider, Provider, RandomProvider, StsProvider,
};
use credrotate::store::{
    FileStore, InprocessStore, SecretStore, SecretsManagerStore, SsmStore,
};
use credrotate::{Config, Reconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StateBackendKind {
    File,
    S3,
}

#[derive(Debug, Parser)]
#[command(name = "credrotate", about = "Provision and rotate short-lived credentials")]
struct Args {
    /// Path to the YAML config file
    #[arg(long, env = "CREDROTATE_CONFIG", default_value = "config.yml")]
    config: PathBuf,

    /// Where the state document is persisted
    #[arg(long, value_enum, default_value = "file", env = "CREDROTATE_STATE_BACKEND")]
    state_backend: StateBackendKind,

    /// Path of the state file (file backend)
    #[arg(long, default_value = "state.json", env = "CREDROTATE_STATE_FILE")]
    state_file: PathBuf,

    /// Bucket holding the state object (s3 backend)
    #[arg(long, env = "CREDROTATE_S3_BUCKET")]
    s3_bucket: Option<String>,

    /// Key of the state object (s3 backend)
    #[arg(long, env = "CREDROTATE_S3_KEY")]
    s3_key: Option<String>,

    /// How long before expiration credentials are rotated (e.g. 10m, 1h, 7d)
    #[arg(long, default_value = "10m", env = "CREDROTATE_ROTATION_WINDOW")]
    rotation_window: String,

    /// Lifetime of credentials minted by the random provider
    #[arg(long, default_value = "7d", env = "CREDROTATE_RANDOM_LIFETIME")]
    random_lifetime: String,

    /// Root directory for the file store
    #[arg(long, default_value = "secrets", env = "CREDROTATE_SECRETS_DIR")]
    secrets_dir: PathBuf,

    /// GitHub App ID; enables the github provider together with the key
    #[arg(long, env = "CREDROTATE_GITHUB_APP_ID")]
    github_app_id: Option<u64>,

    /// Path to the GitHub App RS256 private key (PEM)
    #[arg(long, env = "CREDROTATE_GITHUB_PRIVATE_KEY_FILE")]
    github_private_key_file: Option<PathBuf>,

    /// Artifactory base URL; enables the artifactory provider together
    /// with the admin token
    #[arg(long, env = "CREDROTATE_ARTIFACTORY_URL")]
    artifactory_url: Option<String>,

    /// Artifactory admin token
    #[arg(long, env = "CREDROTATE_ARTIFACTORY_TOKEN", hide_env_values = true)]
    artifactory_token: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    async fn backend(&self) -> Result<Box<dyn StateBackend>> {
        match self.state_backend {
            StateBackendKind::File => Ok(Box::new(FileBackend::new(&self.state_file))),
            StateBackendKind::S3 => {
                let bucket = self
                    .s3_bucket
                    .as_ref()
                    .context("--s3-bucket is required with the s3 state backend")?;
                let key = self
                    .s3_key
                    .as_ref()
                    .context("--s3-key is required with the s3 state backend")?;
                Ok(Box::new(S3Backend::from_env(bucket, key).await))
            }
        }
    }

    async fn providers(&self) -> Result<Vec<Arc<dyn Provider>>> {
        let random_lifetime =
            parse_duration(&self.random_lifetime).context("invalid --random-lifetime")?;
        let mut providers: Vec<Arc<dyn Provider>> = vec![
            Arc::new(RandomProvider::new(random_lifetime)),
            Arc::new(StsProvider::from_env().await),
        ];

        match (&self.github_app_id, &self.github_private_key_file) {
            (Some(app_id), Some(key_file)) => {
                let private_key = tokio::fs::read_to_string(key_file)
                    .await
                    .with_context(|| format!("failed to read {}", key_file.display()))?;
                providers.push(Arc::new(GithubProvider::new(*app_id, private_key)));
            }
            (None, None) => {}
            _ => anyhow::bail!(
                "--github-app-id and --github-private-key-file must be set together"
            ),
        }

        match (&self.artifactory_url, &self.artifactory_token) {
            (Some(url), Some(token)) => {
                providers.push(Arc::new(ArtifactoryProvider::new(url, token)));
            }
            (None, None) => {}
            _ => anyhow::bail!("--artifactory-url and --artifactory-token must be set together"),
        }

        Ok(providers)
    }

    async fn stores(&self) -> Vec<Arc<dyn SecretStore>> {
        vec![
            Arc::new(InprocessStore::new()),
            Arc::new(FileStore::new(&self.secrets_dir)),
            Arc::new(SecretsManagerStore::from_env().await),
            Arc::new(SsmStore::from_env().await),
        ]
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if args.debug {
                    tracing_subscriber::EnvFilter::new("debug")
                } else {
                    tracing_subscriber::EnvFilter::new("info")
                }
            }),
        )
        .init();

    let raw = tokio::fs::read_to_string(&args.config)
        .await
        .with_context(|| format!("failed to read {}", args.config.display()))?;
    let config: Config =
        serde_yaml::from_str(&raw).context("failed to parse configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let rotation_window =
        parse_duration(&args.rotation_window).context("invalid --rotation-window")?;

    let reconciler = Reconciler::new(
        args.providers().await?,
        args.stores().await,
        rotation_window,
        Arc::new(SystemClock),
    )?;

    let backend = args.backend().await?;
    let mut state = backend.load().await?;

    let outcome = reconciler.process(&config.namespace, &config, &mut state).await;

    // Save whatever progress was made, even on a failed pass, so the next
    // pass picks up where this one stopped.
    backend.save(&state).await?;

    match outcome {
        Ok(()) => {
            info!(namespace = %config.namespace, "pass complete");
            Ok(())
        }
        Err(e) => {
            error!(namespace = %config.namespace, "pass failed: {e}");
            Err(e.into())
        }
    }
}
