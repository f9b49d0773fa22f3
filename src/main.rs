//! Segment Recorder CLI
//!
//! Records a stream or file into segments, serves the JSON relay protocol on
//! stdin/stdout, and recovers recordings left in the buffered store.

use anyhow::Context;
use clap::{Parser, Subcommand};
use segment_recorder::capture::SourceLocator;
use segment_recorder::commands::recording::{
    self, handle_relay_message, RecorderState, StartOptions,
};
use segment_recorder::recorder::{SessionOutcome, SessionRegistry, SessionServices};
use segment_recorder::settings::{self, Settings};
use segment_recorder::storage::BufferedStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(name = "segment-recorder")]
#[command(about = "Segmented live-stream recorder with storage failover", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, env = "SEGMENT_RECORDER_SETTINGS", default_value = "segment-recorder.toml")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one target until Ctrl-C or the total duration elapses
    Record {
        /// Stream URL or file path; defaults to the settings file's target
        target: Option<String>,

        /// Segment length in milliseconds
        #[arg(long)]
        segment_interval_ms: Option<u64>,

        /// Total session length in milliseconds
        #[arg(long)]
        total_duration_ms: Option<u64>,

        /// Send the assembled recording to the local endpoint
        #[arg(long)]
        send_full_local: bool,

        /// Send each segment to the local endpoint
        #[arg(long)]
        send_segments_local: bool,

        /// Send the assembled recording to the remote bot
        #[arg(long)]
        send_full_remote: bool,

        /// Send each segment to the remote bot
        #[arg(long)]
        send_segments_remote: bool,
    },
    /// Serve relay commands as JSON lines on stdin, replies and notifications on stdout
    Relay,
    /// Write a settings file with default values
    InitSettings {
        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },
    /// List or export segments left in the buffered store
    Recover {
        /// Only list leftover sessions
        #[arg(long, default_value = "false")]
        list: bool,

        /// Keep buffered rows after exporting
        #[arg(long, default_value = "false")]
        keep: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = settings::load_or_default(&cli.settings)
        .with_context(|| format!("Failed to load settings from {}", cli.settings.display()))?;
    segment_recorder::init_tracing(&settings.logging.level);
    tracing::info!("Starting Segment Recorder v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Record {
            target,
            segment_interval_ms,
            total_duration_ms,
            send_full_local,
            send_segments_local,
            send_full_remote,
            send_segments_remote,
        } => {
            let options = StartOptions {
                target_locator: target,
                segment_interval_ms,
                total_duration_ms,
                send_full_to_local: send_full_local.then_some(true),
                send_segments_to_local: send_segments_local.then_some(true),
                send_full_to_remote: send_full_remote.then_some(true),
                send_segments_to_remote: send_segments_remote.then_some(true),
                ..Default::default()
            };
            record(&settings, options).await
        }
        Commands::Relay => relay(&settings).await,
        Commands::InitSettings { force } => init_settings(&cli.settings, force),
        Commands::Recover { list, keep } => recover(&settings, list, keep).await,
    }
}

fn recorder_state(settings: &Settings) -> anyhow::Result<RecorderState> {
    let sources = Arc::new(SourceLocator::new());
    let services = SessionServices::from_settings(settings, sources.clone())
        .context("Failed to set up delivery client")?;
    Ok(RecorderState::new(
        SessionRegistry::new(services),
        settings.session.clone(),
        sources,
    ))
}

async fn record(settings: &Settings, options: StartOptions) -> anyhow::Result<()> {
    let state = recorder_state(settings)?;
    let handle = recording::start_recording(&state, options).await?;

    tokio::select! {
        _ = handle.wait() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Interrupted, stopping session");
            handle.stop();
        }
    }

    match handle.wait().await {
        Some(SessionOutcome::Finished(summary)) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Some(SessionOutcome::Failed(failure)) => Err(anyhow::anyhow!("{}", failure)),
        None => Err(anyhow::anyhow!("session task ended without an outcome")),
    }
}

async fn relay(settings: &Settings) -> anyhow::Result<()> {
    let state = recorder_state(settings)?;
    let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    let mut notifications = recording::subscribe_notifications(&state);
    let notify_tx = out_tx.clone();
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(event) => {
                    if let Ok(line) = serde_json::to_string(&event) {
                        if notify_tx.send(line).is_err() {
                            break;
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Relay dropped {} notifications", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_relay_message(&state, &line).await;
        if out_tx.send(reply).is_err() {
            break;
        }
    }

    tracing::info!("Relay input closed, stopping sessions");
    state.registry.shutdown().await;
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

fn init_settings(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists, use --force to overwrite", path.display());
    }
    settings::save(&Settings::default(), path)?;
    println!("Wrote default settings to {}", path.display());
    Ok(())
}

async fn recover(settings: &Settings, list: bool, keep: bool) -> anyhow::Result<()> {
    let store = BufferedStore::open(&settings.storage.database_path)
        .await
        .context("Failed to open buffered store")?;

    let pending = store.pending_sessions().await?;
    if pending.is_empty() {
        println!("No leftover segments");
        return Ok(());
    }

    for session in pending {
        println!(
            "{}  {}  {} segments  {} bytes  since {}",
            session.session_id,
            session.target,
            session.segment_count,
            session.total_bytes,
            session.first_segment_at
        );
        if list {
            continue;
        }
        if let Some(path) = store
            .export_session(
                &session.session_id,
                &settings.storage.downloads_dir,
                &settings.capture.file_extension,
                !keep,
            )
            .await?
        {
            println!("  -> {}", path.display());
        }
    }

    store.close().await;
    Ok(())
}
