use std::fmt::Display;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sitehost::config::Settings;
use sitehost::engine::deploy::{app_labels, app_selector};
use sitehost::engine::{
    await_build, await_deploy, deploy, start_build, stop_build, stream_logs, teardown, touch,
    LogFrame, WatchOutcome,
};
use sitehost::gateway::KubeGateway;
use sitehost::telemetry::init_tracing;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (TOML); flags below override it
    #[arg(long, global = true, env = "SITEHOST_CONFIG")]
    config: Option<PathBuf>,

    /// Namespace workloads are created in
    #[arg(long, global = true, env = "NAMESPACE")]
    namespace: Option<String>,

    /// Container registry host
    #[arg(long, global = true, env = "REGISTRY")]
    registry: Option<String>,

    /// Registry project images are pushed under
    #[arg(long, global = true, env = "PROJECT_NAME")]
    project: Option<String>,

    /// Base64 `user:password` for the registry
    #[arg(long, global = true, env = "BASE64_CREDENTIALS", hide_env_values = true)]
    registry_credentials: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a site's uploaded bundle into an image
    Build { site_id: String },
    /// Create the site's deployment and service and wait for the rollout
    Deploy {
        site_id: String,
        /// Replica count, defaults to the configured value
        #[arg(long)]
        replicas: Option<i32>,
    },
    /// Restart the site's pods without changing the image
    Redeploy { site_id: String },
    /// Delete the site's deployment and service
    Teardown { site_id: String },
    /// Stream logs from every pod of the site
    Logs { site_id: String },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Commands::Version = args.command {
        println!("sitehost v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    init_tracing(args.log_json);
    let settings = load_settings(&args)?;

    let client = kube::Client::try_default()
        .await
        .context("Failed to connect to Kubernetes")?;
    info!("Connected to Kubernetes cluster");
    let gateway = KubeGateway::new(client, settings.namespace.clone());

    match args.command {
        Commands::Build { site_id } => {
            let image = settings.image_name(&site_id);
            start_build(&gateway, &settings, &site_id, &image).await?;
            let outcome = await_build(&gateway, &site_id, settings.build_timeout()).await;
            if let Err(e) = stop_build(&gateway, &settings).await {
                warn!("Could not delete build pod: {}", e);
            }
            report("build", &site_id, outcome)
        }
        Commands::Deploy { site_id, replicas } => {
            let replicas = replicas.unwrap_or(settings.replicas);
            let image = settings.image_name(&site_id);
            deploy(
                &gateway,
                &settings,
                &site_id,
                &app_labels(&site_id),
                &image,
                replicas,
            )
            .await?;
            let outcome = await_deploy(&gateway, &site_id, settings.deploy_timeout()).await;
            report("deploy", &site_id, outcome)
        }
        Commands::Redeploy { site_id } => {
            touch(&gateway, &site_id).await?;
            let outcome = await_deploy(&gateway, &site_id, settings.deploy_timeout()).await;
            report("redeploy", &site_id, outcome)
        }
        Commands::Teardown { site_id } => {
            teardown(&gateway, &site_id, &settings.service_name(&site_id)).await?;
            println!("teardown {site_id}: done");
            Ok(())
        }
        Commands::Logs { site_id } => {
            let (tx, rx) = mpsc::channel(64);
            let printer = tokio::spawn(print_frames(rx));
            let summary = stream_logs(&gateway, &settings, &app_selector(&site_id), tx).await?;
            printer.await.context("Log printer failed")??;
            for e in &summary.errors {
                warn!("{}", e);
            }
            info!("{} frames from {} pods", summary.frames, summary.pods);
            Ok(())
        }
        Commands::Version => Ok(()),
    }
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    if let Some(namespace) = &args.namespace {
        settings.namespace = namespace.clone();
    }
    if let Some(registry) = &args.registry {
        settings.registry = registry.clone();
    }
    if let Some(project) = &args.project {
        settings.project = project.clone();
    }
    if let Some(credentials) = &args.registry_credentials {
        settings.registry_credentials = credentials.clone();
    }
    settings.validate()?;
    Ok(settings)
}

fn report<S: Display>(action: &str, site_id: &str, outcome: WatchOutcome<S>) -> anyhow::Result<()> {
    if let Some(e) = outcome.error {
        return Err(e).with_context(|| format!("{action} {site_id}: outcome undetermined"));
    }
    match outcome.status {
        Some(status) if outcome.reason.is_empty() => println!("{action} {site_id}: {status}"),
        Some(status) => println!("{action} {site_id}: {status} ({})", outcome.reason),
        None => println!("{action} {site_id}: no status"),
    }
    Ok(())
}

async fn print_frames(mut rx: mpsc::Receiver<LogFrame>) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(frame) = rx.recv().await {
        stdout.write_all(frame.to_sse().as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}
