/// Background sampling loop.
///
/// A fast timer drives the loop; [`TickThrottle`] caps how often a frame is
/// actually pulled and processed. The loop owns the frame provider and the
/// detection engine and hands both back when it exits, so the caller decides
/// what to reset.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::errors::{GridWatchError, GridWatchResult};
use crate::monitor::engine::DetectionEngine;
use crate::monitor::event_bus::{EventBus, MonitorEvent};
use crate::monitor::loop_control::TickThrottle;
use crate::monitor::state::CellSnapshot;
use crate::perception::frame::Frame;
use crate::perception::grid::GridConfig;
use crate::perception::traits::FrameProvider;

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    /// Period of the driving timer.
    pub tick_interval: Duration,
    /// Minimum time between two processed frames.
    pub min_scan_interval: Duration,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(16),
            min_scan_interval: Duration::from_millis(100),
        }
    }
}

/// What the sampler owns while it runs.
pub struct SamplerParts {
    pub provider: Box<dyn FrameProvider>,
    pub engine: DetectionEngine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerExit {
    Cancelled,
    StreamEnded,
}

pub struct SamplerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<(SamplerParts, SamplerExit)>,
}

impl SamplerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop and wait for it. Once this returns no further
    /// cell state or event is published by the loop.
    pub async fn cancel(self) -> GridWatchResult<(SamplerParts, SamplerExit)> {
        let _ = self.stop_tx.send(true);
        self.join().await
    }

    /// Wait for the loop to exit on its own.
    pub async fn join(self) -> GridWatchResult<(SamplerParts, SamplerExit)> {
        self.task.await.map_err(|e| {
            if e.is_cancelled() {
                GridWatchError::Cancelled
            } else {
                GridWatchError::Capture(format!("sampler task failed: {e}"))
            }
        })
    }
}

pub struct FrameSampler {
    provider: Box<dyn FrameProvider>,
    engine: DetectionEngine,
    grid_rx: watch::Receiver<GridConfig>,
    cells_tx: Arc<watch::Sender<CellSnapshot>>,
    bus: EventBus,
    settings: SamplerSettings,
    stop_rx: watch::Receiver<bool>,
}

impl FrameSampler {
    pub fn spawn(
        parts: SamplerParts,
        grid_rx: watch::Receiver<GridConfig>,
        cells_tx: Arc<watch::Sender<CellSnapshot>>,
        bus: EventBus,
        settings: SamplerSettings,
    ) -> SamplerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let sampler = FrameSampler {
            provider: parts.provider,
            engine: parts.engine,
            grid_rx,
            cells_tx,
            bus,
            settings,
            stop_rx,
        };
        SamplerHandle {
            stop_tx,
            task: tokio::spawn(sampler.run()),
        }
    }

    fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    async fn run(mut self) -> (SamplerParts, SamplerExit) {
        let mut interval = tokio::time::interval(self.settings.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut throttle = TickThrottle::new(self.settings.min_scan_interval);
        tracing::info!(source = %self.provider.describe(), "frame sampler started");

        let exit = loop {
            tokio::select! {
                biased;
                _ = self.stop_rx.changed() => break SamplerExit::Cancelled,
                _ = interval.tick() => {}
            }
            if self.is_stopped() {
                break SamplerExit::Cancelled;
            }
            if !throttle.should_process(Instant::now().into_std()) {
                continue;
            }

            let next = tokio::select! {
                biased;
                _ = self.stop_rx.changed() => break SamplerExit::Cancelled,
                next = self.provider.next_frame() => next,
            };
            match next {
                Ok(Some(frame)) => {
                    if self.is_stopped() {
                        break SamplerExit::Cancelled;
                    }
                    self.process(&frame);
                }
                Ok(None) => break SamplerExit::StreamEnded,
                Err(e) => {
                    tracing::warn!(error = %e, "frame acquisition failed");
                    self.report_failure(e.to_string());
                }
            }
        };

        tracing::info!(?exit, "frame sampler stopped");
        let parts = SamplerParts {
            provider: self.provider,
            engine: self.engine,
        };
        (parts, exit)
    }

    fn process(&mut self, frame: &Frame) {
        let grid = self.grid_rx.borrow().clone();
        if let Err(e) = grid.validate() {
            tracing::warn!(error = %e, "skipping frame with invalid grid");
            return;
        }

        match self.engine.process_frame(frame, &grid) {
            Ok(changes) if changes.is_empty() => {}
            Ok(changes) => {
                for change in changes {
                    self.bus.send(MonitorEvent::CellChanged {
                        state: change.state,
                        diff: change.diff,
                    });
                }
                self.cells_tx.send_replace(self.engine.store().snapshot());
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame processing failed");
                self.report_failure(e.to_string());
            }
        }
    }

    fn report_failure(&self, reason: String) {
        self.bus.send(MonitorEvent::TickFailed {
            reason,
            timestamp: chrono::Utc::now(),
        });
    }
}
