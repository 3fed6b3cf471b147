use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::GridWatchResult;
use crate::perception::types::CellId;

/// Lifecycle of a watch session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CaptureStatus {
    Idle,
    Active,
    Calibrating,
    Error { message: String },
}

/// Latest detection result for one cell, as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellState {
    pub row: u32,
    pub col: u32,
    /// Matched asset image path, or a JPEG data URL of the raw capture.
    pub image_source: String,
    /// Set when the capture was identified against the catalog.
    pub asset_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub type CellSnapshot = BTreeMap<CellId, CellState>;

/// Serialise a snapshot keyed by `"{row}-{col}"`.
pub fn snapshot_to_json(snapshot: &CellSnapshot) -> GridWatchResult<String> {
    let keyed: BTreeMap<String, &CellState> = snapshot
        .iter()
        .map(|(id, state)| (id.to_string(), state))
        .collect();
    Ok(serde_json::to_string_pretty(&keyed)?)
}

#[derive(Debug, Default)]
pub struct CellStateStore {
    cells: CellSnapshot,
}

impl CellStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or wholly replace the entry for `(row, col)`.
    pub fn update(
        &mut self,
        row: u32,
        col: u32,
        image_source: String,
        asset_id: Option<String>,
    ) -> &CellState {
        let id = CellId::new(row, col);
        let state = CellState {
            row,
            col,
            image_source,
            asset_id,
            timestamp: Utc::now(),
        };
        self.cells.insert(id, state);
        &self.cells[&id]
    }

    pub fn get(&self, id: CellId) -> Option<&CellState> {
        self.cells.get(&id)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn reset(&mut self) {
        self.cells.clear();
    }

    pub fn snapshot(&self) -> CellSnapshot {
        self.cells.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_replaces_wholesale() {
        let mut store = CellStateStore::new();
        store.update(1, 2, "blops/162.webp".into(), Some("162".into()));
        let first = store.get(CellId::new(1, 2)).unwrap().timestamp;

        let state = store.update(1, 2, "data:image/jpeg;base64,AAA".into(), None).clone();
        assert_eq!(store.len(), 1);
        assert_eq!(state.asset_id, None);
        assert_eq!(state.image_source, "data:image/jpeg;base64,AAA");
        assert!(state.timestamp >= first);
    }

    #[test]
    fn test_reset_empties_store() {
        let mut store = CellStateStore::new();
        store.update(0, 0, "a".into(), None);
        store.update(0, 1, "b".into(), None);
        store.reset();
        assert!(store.is_empty());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_json_is_keyed_by_cell_id() {
        let mut store = CellStateStore::new();
        store.update(3, 1, "royal_blops/645.webp".into(), Some("645".into()));
        let json: serde_json::Value = serde_json::from_str(&snapshot_to_json(&store.snapshot()).unwrap()).unwrap();
        assert_eq!(json["3-1"]["asset_id"], "645");
        assert_eq!(json["3-1"]["row"], 3);
    }

    #[test]
    fn test_status_serde_shape() {
        let json = serde_json::to_value(CaptureStatus::Error { message: "gone".into() }).unwrap();
        assert_eq!(json["state"], "error");
        assert_eq!(json["message"], "gone");
    }
}
