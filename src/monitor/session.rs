use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::config::AppConfig;
use crate::errors::{GridWatchError, GridWatchResult};
use crate::monitor::engine::{DetectionEngine, EngineConfig};
use crate::monitor::event_bus::{EventBus, MonitorEvent};
use crate::monitor::sampler::{FrameSampler, SamplerExit, SamplerHandle, SamplerParts, SamplerSettings};
use crate::monitor::state::{CaptureStatus, CellSnapshot};
use crate::perception::change_detector::ChangeConfig;
use crate::perception::grid::GridConfig;
use crate::perception::matcher::TemplateMatcher;
use crate::perception::traits::FrameProvider;

/// Owns the grid, the sampler lifecycle and the outward channels.
///
/// The provider and engine live inside the sampler while it runs and are
/// parked here otherwise. Every transition that stops sampling also clears
/// all baselines and cell states.
pub struct WatchSession {
    grid_tx: watch::Sender<GridConfig>,
    cells_tx: Arc<watch::Sender<CellSnapshot>>,
    bus: EventBus,
    settings: SamplerSettings,
    engine_config: EngineConfig,
    change_config: ChangeConfig,
    matcher: Arc<TemplateMatcher>,
    engine: Option<DetectionEngine>,
    provider: Option<Box<dyn FrameProvider>>,
    sampler: Option<SamplerHandle>,
    status: CaptureStatus,
}

impl WatchSession {
    pub fn new(config: &AppConfig, matcher: Arc<TemplateMatcher>) -> GridWatchResult<Self> {
        Self::from_parts(
            config.grid.clone(),
            config.engine_config(),
            config.change_config(),
            config.sampler_settings(),
            matcher,
        )
    }

    pub fn from_parts(
        grid: GridConfig,
        engine_config: EngineConfig,
        change_config: ChangeConfig,
        settings: SamplerSettings,
        matcher: Arc<TemplateMatcher>,
    ) -> GridWatchResult<Self> {
        grid.validate()?;
        let (grid_tx, _) = watch::channel(grid);
        let (cells_tx, _) = watch::channel(CellSnapshot::new());
        Ok(Self {
            grid_tx,
            cells_tx: Arc::new(cells_tx),
            bus: EventBus::default(),
            settings,
            engine_config,
            change_config,
            matcher,
            engine: None,
            provider: None,
            sampler: None,
            status: CaptureStatus::Idle,
        })
    }

    // ── Observation ─────────────────────────────────────────────────────────

    pub fn status(&self) -> &CaptureStatus {
        &self.status
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.bus.subscribe()
    }

    pub fn cells(&self) -> watch::Receiver<CellSnapshot> {
        self.cells_tx.subscribe()
    }

    pub fn grid(&self) -> GridConfig {
        self.grid_tx.borrow().clone()
    }

    pub fn is_sampling(&self) -> bool {
        self.sampler.is_some()
    }

    // ── Grid editing ────────────────────────────────────────────────────────

    /// Apply `edit` to a copy of the grid and publish it if it is valid.
    /// A running sampler picks it up on its next frame.
    pub fn update_grid<F>(&self, edit: F) -> GridWatchResult<GridConfig>
    where
        F: FnOnce(&mut GridConfig),
    {
        let mut grid = self.grid();
        edit(&mut grid);
        grid.validate()?;
        self.grid_tx.send_replace(grid.clone());
        tracing::debug!(rows = grid.rows, cols = grid.cols, "grid updated");
        Ok(grid)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Start sampling from `provider`, replacing any previous one.
    pub async fn start(&mut self, provider: Box<dyn FrameProvider>) -> GridWatchResult<()> {
        self.halt().await?;
        tracing::info!(source = %provider.describe(), "starting capture");
        self.provider = Some(provider);
        self.resume()
    }

    pub async fn stop(&mut self) -> GridWatchResult<()> {
        self.halt().await?;
        self.provider = None;
        self.set_status(CaptureStatus::Idle);
        Ok(())
    }

    /// Pause sampling while the grid is being positioned.
    pub async fn enter_calibration(&mut self) -> GridWatchResult<()> {
        self.halt().await?;
        self.set_status(CaptureStatus::Calibrating);
        Ok(())
    }

    /// Resume with fresh baselines, or go idle if there is nothing to resume.
    pub async fn exit_calibration(&mut self) -> GridWatchResult<()> {
        if self.status != CaptureStatus::Calibrating {
            return Ok(());
        }
        if self.provider.is_some() {
            self.resume()
        } else {
            self.set_status(CaptureStatus::Idle);
            Ok(())
        }
    }

    /// Collect a sampler that exited by itself. Returns `true` if the frame
    /// stream ended.
    pub async fn check_stream(&mut self) -> GridWatchResult<bool> {
        if !self.sampler.as_ref().is_some_and(SamplerHandle::is_finished) {
            return Ok(false);
        }
        let Some(handle) = self.sampler.take() else {
            return Ok(false);
        };
        let exit = self.park(handle.join().await);
        self.clear();
        self.provider = None;
        let message = match exit {
            Some(SamplerExit::StreamEnded) => "capture stream ended".to_string(),
            Some(SamplerExit::Cancelled) => "capture cancelled".to_string(),
            None => "sampler task failed".to_string(),
        };
        tracing::warn!(%message, "sampling stopped");
        self.set_status(CaptureStatus::Error { message });
        Ok(true)
    }

    fn resume(&mut self) -> GridWatchResult<()> {
        let provider = self
            .provider
            .take()
            .ok_or_else(|| GridWatchError::Capture("no frame provider".into()))?;
        let engine = self.engine.take().unwrap_or_else(|| {
            DetectionEngine::new(
                self.engine_config.clone(),
                self.change_config.clone(),
                Arc::clone(&self.matcher),
            )
        });
        let handle = FrameSampler::spawn(
            SamplerParts { provider, engine },
            self.grid_tx.subscribe(),
            Arc::clone(&self.cells_tx),
            self.bus.clone(),
            self.settings.clone(),
        );
        self.sampler = Some(handle);
        self.set_status(CaptureStatus::Active);
        Ok(())
    }

    /// Stop the sampler if one is running, then clear all detection state.
    async fn halt(&mut self) -> GridWatchResult<()> {
        if let Some(handle) = self.sampler.take() {
            self.park(handle.cancel().await);
        }
        self.clear();
        Ok(())
    }

    /// Take the provider and engine back from an exited sampler. A sampler
    /// that panicked loses both; the engine is rebuilt on the next resume.
    fn park(
        &mut self,
        joined: GridWatchResult<(SamplerParts, SamplerExit)>,
    ) -> Option<SamplerExit> {
        match joined {
            Ok((parts, exit)) => {
                self.provider = Some(parts.provider);
                self.engine = Some(parts.engine);
                Some(exit)
            }
            Err(e) => {
                tracing::error!(error = %e, "sampler did not shut down cleanly");
                None
            }
        }
    }

    fn clear(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.reset();
        }
        self.cells_tx.send_replace(CellSnapshot::new());
        self.bus.send(MonitorEvent::Reset);
    }

    fn set_status(&mut self, status: CaptureStatus) {
        if self.status == status {
            return;
        }
        tracing::info!(?status, "capture status");
        self.status = status.clone();
        self.bus.send(MonitorEvent::StatusChanged { status });
    }
}
