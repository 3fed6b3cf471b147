/// Calibrated board grid and its projection onto source-frame pixels.
///
/// The grid is stored in percent of the frame so it survives resolution
/// changes of the capture source. Two angles describe how the board sits in
/// the picture:
///   - `rotation_z`: in-plane rotation about the grid centre (degrees)
///   - `rotation_x`: tilt away from the viewer (degrees)
///
/// The tilt is modelled as a cosine squash of the vertical offset from the
/// grid centre. This is an approximation of foreshortening, not a projective
/// transform; capture sizing uses the same squash so geometry and capture
/// rectangles stay consistent.
use serde::{Deserialize, Serialize};

use crate::errors::{GridWatchError, GridWatchResult};
use crate::perception::types::{CaptureRect, CellId, FrameDimensions, PercentPoint};

/// Smallest width/height of the calibrated frame, in percent.
pub const MIN_EXTENT_PERCENT: f64 = 5.0;
pub const MIN_GRID_DIM: u32 = 2;
/// Upper bound used by the calibration setters.
pub const MAX_GRID_DIM: u32 = 10;
pub const ROTATION_Z_RANGE: (f64, f64) = (-90.0, 90.0);
pub const ROTATION_X_RANGE: (f64, f64) = (0.0, 80.0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_rows")]
    pub rows: u32,
    #[serde(default = "default_cols")]
    pub cols: u32,
    #[serde(default = "default_top_left")]
    pub top_left: PercentPoint,
    #[serde(default = "default_bottom_right")]
    pub bottom_right: PercentPoint,
    /// In-plane rotation in degrees, `[-90, 90]`.
    #[serde(default)]
    pub rotation_z: f64,
    /// Tilt away from the viewer in degrees, `[0, 80]`.
    #[serde(default)]
    pub rotation_x: f64,
}

fn default_rows() -> u32 {
    6
}

fn default_cols() -> u32 {
    4
}

fn default_top_left() -> PercentPoint {
    PercentPoint::new(10.0, 10.0)
}

fn default_bottom_right() -> PercentPoint {
    PercentPoint::new(90.0, 90.0)
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: default_rows(),
            cols: default_cols(),
            top_left: default_top_left(),
            bottom_right: default_bottom_right(),
            rotation_z: 0.0,
            rotation_x: 0.0,
        }
    }
}

/// Where a cell lands in the source frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellProjection {
    pub center_x: f64,
    pub center_y: f64,
    pub capture_w: f64,
    pub capture_h: f64,
}

impl CellProjection {
    /// Full-cell capture rectangle centred on the projected point.
    pub fn capture_rect(&self) -> CaptureRect {
        CaptureRect::centered(self.center_x, self.center_y, self.capture_w, self.capture_h)
    }

    /// Square `size` × `size` sample rectangle centred on the projected point.
    pub fn sample_rect(&self, size: u32) -> CaptureRect {
        let s = size as f64;
        CaptureRect::centered(self.center_x, self.center_y, s, s)
    }
}

impl GridConfig {
    /// Check every calibration invariant.
    pub fn validate(&self) -> GridWatchResult<()> {
        let dims = MIN_GRID_DIM..=MAX_GRID_DIM;
        if !dims.contains(&self.rows) || !dims.contains(&self.cols) {
            return Err(GridWatchError::InvalidGrid(format!(
                "grid must be between {MIN_GRID_DIM}x{MIN_GRID_DIM} and {MAX_GRID_DIM}x{MAX_GRID_DIM}, got {}x{}",
                self.rows, self.cols
            )));
        }
        for (name, p) in [("top_left", self.top_left), ("bottom_right", self.bottom_right)] {
            if !(0.0..=100.0).contains(&p.x) || !(0.0..=100.0).contains(&p.y) {
                return Err(GridWatchError::InvalidGrid(format!(
                    "{name} ({}, {}) outside [0, 100]",
                    p.x, p.y
                )));
            }
        }
        if self.top_left.x + MIN_EXTENT_PERCENT > self.bottom_right.x
            || self.top_left.y + MIN_EXTENT_PERCENT > self.bottom_right.y
        {
            return Err(GridWatchError::InvalidGrid(format!(
                "grid extent below {MIN_EXTENT_PERCENT}%: ({}, {}) -> ({}, {})",
                self.top_left.x, self.top_left.y, self.bottom_right.x, self.bottom_right.y
            )));
        }
        if !(ROTATION_Z_RANGE.0..=ROTATION_Z_RANGE.1).contains(&self.rotation_z) {
            return Err(GridWatchError::InvalidGrid(format!(
                "rotation_z {} outside [{}, {}]",
                self.rotation_z, ROTATION_Z_RANGE.0, ROTATION_Z_RANGE.1
            )));
        }
        if !(ROTATION_X_RANGE.0..=ROTATION_X_RANGE.1).contains(&self.rotation_x) {
            return Err(GridWatchError::InvalidGrid(format!(
                "rotation_x {} outside [{}, {}]",
                self.rotation_x, ROTATION_X_RANGE.0, ROTATION_X_RANGE.1
            )));
        }
        Ok(())
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.cols).map(move |col| CellId::new(row, col)))
    }

    pub fn cell_count(&self) -> usize {
        (self.rows * self.cols) as usize
    }

    // ── Calibration ─────────────────────────────────────────────────────────

    pub fn set_rows(&mut self, rows: u32) {
        self.rows = rows.clamp(MIN_GRID_DIM, MAX_GRID_DIM);
    }

    pub fn set_cols(&mut self, cols: u32) {
        self.cols = cols.clamp(MIN_GRID_DIM, MAX_GRID_DIM);
    }

    /// Move the top-left corner without letting it cross the bottom-right one.
    pub fn set_top_left(&mut self, p: PercentPoint) {
        self.top_left = PercentPoint::new(
            p.x.min(self.bottom_right.x - MIN_EXTENT_PERCENT).clamp(0.0, 100.0),
            p.y.min(self.bottom_right.y - MIN_EXTENT_PERCENT).clamp(0.0, 100.0),
        );
    }

    /// Move the bottom-right corner without letting it cross the top-left one.
    pub fn set_bottom_right(&mut self, p: PercentPoint) {
        self.bottom_right = PercentPoint::new(
            p.x.max(self.top_left.x + MIN_EXTENT_PERCENT).clamp(0.0, 100.0),
            p.y.max(self.top_left.y + MIN_EXTENT_PERCENT).clamp(0.0, 100.0),
        );
    }

    /// Shift the whole frame by `(dx, dy)` percent, keeping its size and
    /// staying inside the picture.
    pub fn translate(&mut self, dx: f64, dy: f64) {
        let width = self.bottom_right.x - self.top_left.x;
        let height = self.bottom_right.y - self.top_left.y;
        let x = (self.top_left.x + dx).clamp(0.0, 100.0 - width);
        let y = (self.top_left.y + dy).clamp(0.0, 100.0 - height);
        self.top_left = PercentPoint::new(x, y);
        self.bottom_right = PercentPoint::new(x + width, y + height);
    }

    pub fn set_rotation_z(&mut self, degrees: f64) {
        self.rotation_z = degrees.clamp(ROTATION_Z_RANGE.0, ROTATION_Z_RANGE.1);
    }

    pub fn set_rotation_x(&mut self, degrees: f64) {
        self.rotation_x = degrees.clamp(ROTATION_X_RANGE.0, ROTATION_X_RANGE.1);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Cell rectangle in percent of the grid area: `(left, top, width, height)`.
    /// Used by overlays that draw inside the calibrated frame.
    pub fn cell_overlay_percent(&self, row: u32, col: u32) -> (f64, f64, f64, f64) {
        let cell_w = 100.0 / self.cols.max(1) as f64;
        let cell_h = 100.0 / self.rows.max(1) as f64;
        (col as f64 * cell_w, row as f64 * cell_h, cell_w, cell_h)
    }
}

// ── Projection ──────────────────────────────────────────────────────────────

/// Map grid cell `(row, col)` to its centre and capture size in frame pixels.
pub fn project_cell_center(
    config: &GridConfig,
    dims: FrameDimensions,
    row: u32,
    col: u32,
) -> CellProjection {
    let (w, h) = (dims.width as f64, dims.height as f64);

    let start_x = config.top_left.x / 100.0 * w;
    let start_y = config.top_left.y / 100.0 * h;
    let end_x = config.bottom_right.x / 100.0 * w;
    let end_y = config.bottom_right.y / 100.0 * h;

    let grid_w = end_x - start_x;
    let grid_h = end_y - start_y;
    let cell_w = grid_w / config.cols.max(1) as f64;
    let cell_h = grid_h / config.rows.max(1) as f64;

    let ux = start_x + (col as f64 + 0.5) * cell_w;
    let uy = start_y + (row as f64 + 0.5) * cell_h;

    let squash = config.rotation_x.to_radians().cos();

    // Zero angles bypass the transform so the result is bit-exact.
    let (center_x, center_y) = if config.rotation_z == 0.0 && config.rotation_x == 0.0 {
        (ux, uy)
    } else {
        let gcx = start_x + grid_w / 2.0;
        let gcy = start_y + grid_h / 2.0;
        let (dx, dy) = (ux - gcx, uy - gcy);
        let (sin, cos) = config.rotation_z.to_radians().sin_cos();
        let rx = dx * cos - dy * sin;
        let ry = dx * sin + dy * cos;
        (gcx + rx, gcy + ry * squash)
    };

    CellProjection {
        center_x,
        center_y,
        capture_w: cell_w,
        capture_h: cell_h * squash,
    }
}
