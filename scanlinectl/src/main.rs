mod cli;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use scanline_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use scanline_core::{ScanRegistry, ScanSupervisor};
use scanline_model::{ScanId, ScanSnapshot, ScanStatus};
use serde::Serialize;
use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command, RunArgs};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let ConfigLoad { config, warnings } =
        ConfigLoader::with_options(ConfigLoaderOptions {
            config_path: cli.config.clone(),
            env_file: cli.env_file.clone(),
        })
        .load()
        .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = config.metadata.config_path.as_ref() {
        info!(path = %path.display(), "configuration loaded");
    }
    for warning in warnings.iter() {
        match warning.hint.as_deref() {
            Some(hint) => warn!(hint, "{}", warning.message),
            None => warn!("{}", warning.message),
        }
    }

    let supervisor = build_supervisor(&config)?;

    match cli.command {
        Command::Run(args) => run_scan(&supervisor, args).await,
        Command::Status { scan_id } => {
            let snapshot = supervisor
                .status(&ScanId::from(scan_id))
                .await
                .context("scan lookup failed")?;
            print_json(&snapshot)
        }
        Command::Results { scan_id } => {
            let results = supervisor
                .results(&ScanId::from(scan_id))
                .await
                .context("scan lookup failed")?;
            print_json(&results)
        }
        Command::List => print_json(&supervisor.list().await),
        Command::Version => {
            let tool = supervisor.tool().await.context("scanner not available")?;
            match tool.version().await {
                Some(version) => {
                    println!("{version}");
                    Ok(())
                }
                None => bail!("{} did not report a version", tool.display()),
            }
        }
    }
}

fn build_supervisor(config: &Config) -> anyhow::Result<ScanSupervisor> {
    let vocabulary = config
        .vocabulary()
        .context("invalid workflow patterns")?;
    let registry = ScanRegistry::new(config.report_archive());
    Ok(ScanSupervisor::new(
        registry,
        vocabulary,
        config.supervisor_settings(),
    ))
}

async fn run_scan(supervisor: &ScanSupervisor, args: RunArgs) -> anyhow::Result<()> {
    let scan_id = supervisor
        .start(args.scan_config())
        .await
        .context("failed to start scan")?;
    info!(scan_id = %scan_id, "Scan started");

    let snapshot = follow(supervisor, &scan_id, args.poll).await?;

    if let Some(format) = args.workflow_format {
        let exported = supervisor
            .export(&scan_id, format.as_str())
            .context("failed to export workflow graph")?;
        match args.workflow_out.as_deref() {
            Some(path) => write_export(path, &exported).await?,
            None => println!("{exported}"),
        }
    }

    let results = supervisor.results(&scan_id).await?;
    print_json(&results)?;

    match snapshot.status {
        ScanStatus::Completed => Ok(()),
        ScanStatus::Cancelled => bail!("scan {} was cancelled", scan_id),
        _ => bail!(
            "scan {} failed: {}",
            scan_id,
            snapshot.error_message.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Polls until the scan is terminal, logging progress as it changes.
async fn follow(
    supervisor: &ScanSupervisor,
    scan_id: &ScanId,
    poll: Duration,
) -> anyhow::Result<ScanSnapshot> {
    let mut ticker = interval(poll);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut last_reported: Option<(Option<String>, u32, u64, u64)> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = supervisor.status(scan_id).await?;
                let current = (
                    snapshot.current_probe.clone(),
                    snapshot.progress.round() as u32,
                    snapshot.passed,
                    snapshot.failed,
                );
                if last_reported.as_ref() != Some(&current) {
                    info!(
                        scan_id = %scan_id,
                        status = %snapshot.status,
                        probe = snapshot.current_probe.as_deref().unwrap_or("-"),
                        "{:>3.0}% | probes {}/{} | passed {} failed {}",
                        snapshot.progress,
                        snapshot.completed_probes,
                        snapshot.total_probes,
                        snapshot.passed,
                        snapshot.failed,
                    );
                    last_reported = Some(current);
                }
                if snapshot.status.is_terminal() {
                    return Ok(snapshot);
                }
            }
            signal = &mut ctrl_c, if !interrupted => {
                signal.context("failed to listen for Ctrl-C")?;
                interrupted = true;
                warn!(scan_id = %scan_id, "Interrupted, cancelling scan");
                if !supervisor.cancel(scan_id).await {
                    warn!(scan_id = %scan_id, "Scan had already finished");
                }
            }
        }
    }
}

async fn write_export(path: &Path, contents: &str) -> anyhow::Result<()> {
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "workflow graph written");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{json}");
    Ok(())
}
