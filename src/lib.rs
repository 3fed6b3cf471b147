pub mod config;
pub mod errors;
pub mod monitor;
pub mod perception;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;

use crate::config::AppConfig;
use crate::errors::GridWatchResult;
use crate::monitor::event_bus::MonitorEvent;
use crate::monitor::session::WatchSession;
use crate::monitor::state::{snapshot_to_json, CaptureStatus};
use crate::perception::matcher::TemplateMatcher;
use crate::perception::screenshot::{ImageSequence, ScreenCapture};
use crate::perception::traits::FrameProvider;

/// Watch the configured monitor (or replay the image files given on the
/// command line) until Ctrl-C or the end of the frame stream.
pub async fn run() -> GridWatchResult<()> {
    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load config; using defaults");
            AppConfig::default()
        }
    };

    let matcher = Arc::new(TemplateMatcher::new(
        config.match_config(),
        config.matching.catalog.clone(),
    ));
    let loaded = matcher.load_assets().await;
    if loaded == 0 {
        tracing::warn!("no reference images loaded; changed cells will keep raw captures");
    }

    let provider = frame_provider(&config)?;
    let mut session = WatchSession::new(&config, matcher)?;
    let mut events = session.subscribe();
    let mut cells = session.cells();
    session.start(provider).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut health = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupt received, stopping");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            changed = cells.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(path) = config.output.snapshot_path.as_ref() else {
                    continue;
                };
                let json = snapshot_to_json(&cells.borrow_and_update())?;
                if let Err(e) = tokio::fs::write(path, json).await {
                    tracing::warn!(path = %path.display(), error = %e, "failed to write snapshot");
                }
            }
            _ = health.tick() => {
                if session.check_stream().await? {
                    break;
                }
            }
        }
    }

    session.stop().await?;
    Ok(())
}

/// Image files on the command line replace live capture.
fn frame_provider(config: &AppConfig) -> GridWatchResult<Box<dyn FrameProvider>> {
    let paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        return Ok(Box::new(ScreenCapture::probe(config.capture.monitor_index)?));
    }
    tracing::info!(frames = paths.len(), "replaying image files");
    Ok(Box::new(ImageSequence::from_paths(&paths)?.ending()))
}

fn log_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::CellChanged { state, diff } => match &state.asset_id {
            Some(asset) => tracing::info!(row = state.row, col = state.col, diff, %asset, "cell identified"),
            None => tracing::info!(row = state.row, col = state.col, diff, "cell changed (unidentified)"),
        },
        MonitorEvent::TickFailed { reason, .. } => tracing::warn!(%reason, "tick failed"),
        MonitorEvent::Reset => tracing::debug!("cell states cleared"),
        MonitorEvent::StatusChanged { status } => match status {
            CaptureStatus::Error { message } => tracing::error!(%message, "capture error"),
            other => tracing::info!(status = ?other, "capture status changed"),
        },
    }
}
