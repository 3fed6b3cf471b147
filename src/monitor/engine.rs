/// Per-frame detection pass: project every cell, sample it, classify it
/// against its baseline, and identify what appeared in the cells that changed.
use std::sync::Arc;

use image::RgbaImage;

use crate::errors::GridWatchResult;
use crate::monitor::state::{CellState, CellStateStore};
use crate::perception::change_detector::{ChangeConfig, ChangeDetector, Observation};
use crate::perception::frame::encode_jpeg_data_url;
use crate::perception::grid::{project_cell_center, CellProjection, GridConfig};
use crate::perception::matcher::TemplateMatcher;
use crate::perception::traits::FrameSource;
use crate::perception::types::CellId;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Side of the square patch sampled at each cell centre.
    pub sample_size: u32,
    /// JPEG quality (1-100) for raw captures of unidentified cells.
    pub capture_jpeg_quality: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_size: 10,
            capture_jpeg_quality: 80,
        }
    }
}

/// One cell classified as changed during a frame.
#[derive(Debug, Clone)]
pub struct CellChange {
    pub state: CellState,
    pub diff: f64,
}

pub struct DetectionEngine {
    config: EngineConfig,
    detector: ChangeDetector,
    matcher: Arc<TemplateMatcher>,
    store: CellStateStore,
}

impl DetectionEngine {
    pub fn new(config: EngineConfig, change: ChangeConfig, matcher: Arc<TemplateMatcher>) -> Self {
        Self {
            config,
            detector: ChangeDetector::new(change),
            matcher,
            store: CellStateStore::new(),
        }
    }

    pub fn store(&self) -> &CellStateStore {
        &self.store
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn matcher(&self) -> &Arc<TemplateMatcher> {
        &self.matcher
    }

    /// Clear every baseline and every recorded cell state.
    pub fn reset(&mut self) {
        self.detector.reset();
        self.store.reset();
        tracing::debug!("detection state cleared");
    }

    /// Run one detection pass over `source`.
    ///
    /// A source with no pixels yet is skipped without touching any state.
    /// Sampling happens for every cell before any baseline is stored, so a
    /// failed extraction leaves the engine exactly as it was.
    pub fn process_frame(
        &mut self,
        source: &dyn FrameSource,
        grid: &GridConfig,
    ) -> GridWatchResult<Vec<CellChange>> {
        let dims = source.dimensions();
        if !dims.is_ready() {
            tracing::trace!("frame not ready, skipping");
            return Ok(Vec::new());
        }

        let size = self.config.sample_size;
        let mut samples: Vec<(CellId, CellProjection, RgbaImage)> =
            Vec::with_capacity(grid.cell_count());
        for cell in grid.cells() {
            let projection = project_cell_center(grid, dims, cell.row, cell.col);
            let sample = source.extract(&projection.sample_rect(size), size, size)?;
            samples.push((cell, projection, sample));
        }

        let mut changes = Vec::new();
        for (cell, projection, sample) in samples {
            let diff = match self.detector.observe(cell, &sample) {
                Observation::Changed { diff } => diff,
                Observation::BaselineStored | Observation::Unchanged { .. } => continue,
            };
            let Some((image_source, asset_id)) = self.identify(source, &projection, cell) else {
                continue;
            };
            let state = self
                .store
                .update(cell.row, cell.col, image_source, asset_id)
                .clone();
            tracing::debug!(cell = %cell, diff, asset = ?state.asset_id, "cell changed");
            changes.push(CellChange { state, diff });
        }
        Ok(changes)
    }

    /// Image source and asset id for a changed cell: the matched asset if
    /// there is one, otherwise a JPEG capture of the whole cell.
    fn identify(
        &self,
        source: &dyn FrameSource,
        projection: &CellProjection,
        cell: CellId,
    ) -> Option<(String, Option<String>)> {
        let rect = projection.capture_rect();
        match self.matcher.find_match(source, &rect) {
            Ok(Some(asset)) => return Some((asset.image_path, Some(asset.id))),
            Ok(None) => {}
            Err(e) => tracing::warn!(cell = %cell, error = %e, "matching failed; keeping raw capture"),
        }

        let out_w = rect.width.round().max(1.0) as u32;
        let out_h = rect.height.round().max(1.0) as u32;
        let encoded = source
            .extract(&rect, out_w, out_h)
            .and_then(|raw| encode_jpeg_data_url(&raw, self.config.capture_jpeg_quality));
        match encoded {
            Ok(url) => Some((url, None)),
            Err(e) => {
                tracing::warn!(cell = %cell, error = %e, "raw capture failed");
                None
            }
        }
    }
}
