use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::monitor::state::{CaptureStatus, CellState};
use crate::perception::grid::MAX_GRID_DIM;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MonitorEvent {
    /// A cell differs from its baseline; `state` is what was recorded.
    CellChanged {
        state: CellState,
        diff: f64,
    },
    /// A tick was abandoned; the next one proceeds normally.
    TickFailed {
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    /// Baselines and cell states were cleared.
    Reset,
    StatusChanged {
        status: CaptureStatus,
    },
}

/// Fan-out of monitor events to any number of presentation layers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn send(&self, msg: MonitorEvent) {
        let _ = self.tx.send(msg);
    }
}

/// Room for two full ticks of changes on the largest grid plus lifecycle
/// events, so a subscriber that is one tick behind does not lag.
pub const DEFAULT_CAPACITY: usize = 2 * (MAX_GRID_DIM * MAX_GRID_DIM) as usize + 16;

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
