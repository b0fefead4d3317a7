//! # SEWCTL CLI
//!
//! Command-line interface for the Secret Expiry Watcher.
//!
//! Runs the same scan, evaluation, discovery and restart logic as the controller, one shot,
//! against the current kubeconfig context.
//!
//! ## Usage
//!
//! ```bash
//! # Show annotated Secrets and their expiry
//! sewctl list --namespace payments
//!
//! # Run one scan without restarting anything
//! sewctl scan --dry-run
//!
//! # Check how an expiry value is interpreted
//! sewctl evaluate 3600 --created-at 2025-01-01T00:00:00Z
//!
//! # Show which workloads mount a Secret
//! sewctl consumers --namespace payments --secret db-creds
//!
//! # Rollout-restart a Deployment with conflict retries
//! sewctl restart --namespace payments --deployment api
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use secret_expiry_watcher::config::ControllerConfig;
use secret_expiry_watcher::controller::{
    ClusterClient, ConsumerResolver, Credential, ExpiryEvaluator, KubeClusterClient, NaiveZone,
    RestartOrchestrator, ScanCycle,
};
use secret_expiry_watcher::runtime::{create_client, install_crypto_provider};
use std::sync::Arc;

/// Secret Expiry Watcher CLI
#[derive(Parser)]
#[command(name = "sewctl")]
#[command(about = "Secret Expiry Watcher CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Expiry annotation key (defaults to EXPIRY_ANNOTATION_KEY or secret-watcher.expiry)
    #[arg(short, long, global = true)]
    annotation_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List Secrets carrying the expiry annotation
    List {
        /// Namespace to list Secrets in (defaults to all namespaces)
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Run one scan cycle and print the report as JSON
    Scan {
        /// Namespace to scan (defaults to all namespaces)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Resolve consumers but do not restart anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Show how an expiry annotation value is interpreted
    Evaluate {
        /// Raw annotation value
        value: String,

        /// Secret creation time (RFC 3339), needed for relative values
        #[arg(long)]
        created_at: Option<DateTime<Utc>>,

        /// Evaluate against this instant instead of now (RFC 3339)
        #[arg(long)]
        now: Option<DateTime<Utc>>,

        /// Read zone-less timestamps in the local zone instead of UTC
        #[arg(long)]
        local: bool,
    },
    /// Show the workloads that mount a Secret
    Consumers {
        #[arg(short, long)]
        namespace: String,

        /// Name of the Secret
        #[arg(short, long)]
        secret: String,
    },
    /// Rollout-restart a Deployment
    Restart {
        #[arg(short, long)]
        namespace: String,

        #[arg(short, long)]
        deployment: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sewctl=info,secret_expiry_watcher=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ControllerConfig::from_env();
    if let Some(key) = cli.annotation_key {
        config.expiry_annotation_key = key;
    }

    match cli.command {
        Commands::Evaluate {
            value,
            created_at,
            now,
            local,
        } => {
            let zone = if local { NaiveZone::Local } else { config.naive_zone };
            evaluate_command(&value, created_at, now.unwrap_or_else(Utc::now), zone)
        }
        Commands::List { namespace } => {
            let cluster = connect(&config).await?;
            list_command(cluster.as_ref(), &config, namespace.as_deref()).await
        }
        Commands::Scan { namespace, dry_run } => {
            config.namespace_scope = namespace.or(config.namespace_scope);
            config.dry_run |= dry_run;
            let cluster = connect(&config).await?;
            scan_command(cluster, &config).await
        }
        Commands::Consumers { namespace, secret } => {
            let cluster = connect(&config).await?;
            let consumers = ConsumerResolver::new(cluster)
                .resolve(&namespace, &secret)
                .await;
            println!("{}", serde_json::to_string_pretty(&consumers)?);
            Ok(())
        }
        Commands::Restart {
            namespace,
            deployment,
        } => {
            let cluster = connect(&config).await?;
            let restarted_at = RestartOrchestrator::new(cluster, config.retry_policy())
                .restart(&namespace, &deployment)
                .await
                .with_context(|| format!("Failed to restart Deployment '{namespace}/{deployment}'"))?;
            println!("✅ Restarted Deployment {namespace}/{deployment}");
            println!("   restartedAt: {}", restarted_at.to_rfc3339());
            Ok(())
        }
    }
}

async fn connect(config: &ControllerConfig) -> Result<Arc<dyn ClusterClient>> {
    install_crypto_provider();
    let client = create_client()
        .await
        .context("Ensure kubeconfig is configured.")?;
    Ok(Arc::new(KubeClusterClient::new(client, config.request_timeout())))
}

fn evaluate_command(
    value: &str,
    created_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    zone: NaiveZone,
) -> Result<()> {
    let expiry = ExpiryEvaluator::new(zone)
        .resolve(value, created_at)
        .context("Expiry value not recognized")?;

    println!("Value:      {value}");
    println!("Format:     {:?}", expiry.format);
    println!("Expires at: {}", expiry.expires_at.to_rfc3339());
    println!("Now:        {}", now.to_rfc3339());
    println!("Expired:    {}", expiry.is_expired(now));
    Ok(())
}

async fn list_command(
    cluster: &dyn ClusterClient,
    config: &ControllerConfig,
    namespace: Option<&str>,
) -> Result<()> {
    let secrets = cluster
        .list_secrets(namespace)
        .await
        .context("Failed to list Secrets")?;

    let evaluator = ExpiryEvaluator::new(config.naive_zone);
    let now = Utc::now();
    let credentials: Vec<Credential> = secrets
        .iter()
        .filter_map(Credential::from_secret)
        .filter(|c| c.expiry_value(&config.expiry_annotation_key).is_some())
        .collect();

    if credentials.is_empty() {
        println!(
            "No Secrets annotated with '{}' found.",
            config.expiry_annotation_key
        );
        return Ok(());
    }

    println!(
        "\n{:<20} {:<30} {:<28} {:<10}",
        "NAMESPACE", "NAME", "EXPIRES AT", "EXPIRED"
    );
    println!("{}", "-".repeat(90));

    for credential in &credentials {
        let Some(record) = evaluator.record(credential, &config.expiry_annotation_key, now) else {
            continue;
        };
        let (expires_at, expired) = match &record.expiry {
            Ok(expiry) => (expiry.expires_at.to_rfc3339(), record.expired.to_string()),
            Err(e) => (format!("invalid: {e}"), "-".to_string()),
        };
        println!(
            "{:<20} {:<30} {:<28} {:<10}",
            credential.key.namespace, credential.key.name, expires_at, expired
        );
    }

    Ok(())
}

async fn scan_command(cluster: Arc<dyn ClusterClient>, config: &ControllerConfig) -> Result<()> {
    let scan = ScanCycle::new(cluster, config);
    let report = scan.run(Utc::now()).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(error) = report.list_error {
        anyhow::bail!("Failed to list Secrets: {error}");
    }
    Ok(())
}
