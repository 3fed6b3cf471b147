use std::collections::hash_map::Entry;
use std::collections::HashMap;

use image::RgbaImage;

use crate::perception::types::CellId;

#[derive(Debug, Clone)]
pub struct ChangeConfig {
    /// Mean summed RGB difference above which a cell counts as changed.
    pub change_threshold: f64,
}

impl Default for ChangeConfig {
    fn default() -> Self {
        Self {
            change_threshold: 40.0,
        }
    }
}

/// Per-cell lifecycle. A cell never moves back towards `Unseen` except
/// through [`ChangeDetector::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellPhase {
    Unseen,
    Baseline,
    Changed,
}

/// Outcome of feeding one sample to the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// First sample since reset; stored as the baseline.
    BaselineStored,
    /// Compared against the baseline and stayed within the threshold.
    Unchanged { diff: f64 },
    /// Compared against the baseline and exceeded the threshold.
    Changed { diff: f64 },
}

impl Observation {
    pub fn is_change(&self) -> bool {
        matches!(self, Observation::Changed { .. })
    }
}

struct CellRecord {
    baseline: RgbaImage,
    changed: bool,
}

/// Baseline store plus the pixel-difference classifier.
pub struct ChangeDetector {
    config: ChangeConfig,
    cells: HashMap<CellId, CellRecord>,
}

impl ChangeDetector {
    pub fn new(config: ChangeConfig) -> Self {
        Self {
            config,
            cells: HashMap::new(),
        }
    }

    pub fn with_default() -> Self {
        Self::new(ChangeConfig::default())
    }

    pub fn reset(&mut self) {
        self.cells.clear();
    }

    pub fn phase(&self, cell: CellId) -> CellPhase {
        match self.cells.get(&cell) {
            None => CellPhase::Unseen,
            Some(r) if r.changed => CellPhase::Changed,
            Some(_) => CellPhase::Baseline,
        }
    }

    pub fn tracked_cells(&self) -> usize {
        self.cells.len()
    }

    /// Classify `sample` for `cell`. The first sample after a reset becomes
    /// the baseline and is never compared.
    pub fn observe(&mut self, cell: CellId, sample: &RgbaImage) -> Observation {
        let record = match self.cells.entry(cell) {
            Entry::Vacant(slot) => {
                slot.insert(CellRecord {
                    baseline: sample.clone(),
                    changed: false,
                });
                return Observation::BaselineStored;
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        let diff = pixel_difference(&record.baseline, sample);
        if diff > self.config.change_threshold {
            if !record.changed {
                tracing::debug!(cell = %cell, diff, "cell changed from baseline");
            }
            record.changed = true;
            Observation::Changed { diff }
        } else {
            Observation::Unchanged { diff }
        }
    }
}

/// Mean over pixels of `|ΔR| + |ΔG| + |ΔB|`; alpha is ignored.
/// Buffers of different sizes are compared over their common prefix.
pub fn pixel_difference(a: &RgbaImage, b: &RgbaImage) -> f64 {
    let mut total: u64 = 0;
    let mut count: u64 = 0;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        total += pa[0].abs_diff(pb[0]) as u64;
        total += pa[1].abs_diff(pb[1]) as u64;
        total += pa[2].abs_diff(pb[2]) as u64;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    total as f64 / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn sample_from_fn(seed: u32) -> RgbaImage {
        RgbaImage::from_fn(10, 10, |x, y| {
            let v = (x * 17 + y * 31 + seed * 7) % 200;
            Rgba([v as u8, (v / 2) as u8, (255 - v) as u8, (v % 256) as u8])
        })
    }

    fn shifted(src: &RgbaImage, k: u8) -> RgbaImage {
        let mut out = src.clone();
        for p in out.pixels_mut() {
            p[0] = p[0].saturating_add(k);
            p[1] = p[1].saturating_add(k);
            p[2] = p[2].saturating_add(k);
        }
        out
    }

    #[test]
    fn test_difference_zero_and_symmetric() {
        let a = sample_from_fn(1);
        let b = sample_from_fn(5);
        assert_eq!(pixel_difference(&a, &a), 0.0);
        assert_eq!(pixel_difference(&a, &b), pixel_difference(&b, &a));
    }

    #[test]
    fn test_uniform_offset() {
        let a = RgbaImage::from_pixel(10, 10, Rgba([40, 80, 120, 255]));
        let b = shifted(&a, 20);
        let diff = pixel_difference(&a, &b);
        assert!((diff - 60.0).abs() < 1e-9);
        // Per-channel mean recovers the offset itself.
        assert!((diff / 3.0 - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_alpha_is_ignored() {
        let a = RgbaImage::from_pixel(4, 4, Rgba([10, 10, 10, 0]));
        let b = RgbaImage::from_pixel(4, 4, Rgba([10, 10, 10, 255]));
        assert_eq!(pixel_difference(&a, &b), 0.0);
    }

    #[test]
    fn test_first_sample_never_changes() {
        let mut det = ChangeDetector::with_default();
        let cell = CellId::new(0, 0);
        let wild = RgbaImage::from_pixel(10, 10, Rgba([255, 0, 255, 255]));
        assert_eq!(det.phase(cell), CellPhase::Unseen);
        assert_eq!(det.observe(cell, &wild), Observation::BaselineStored);
        assert_eq!(det.phase(cell), CellPhase::Baseline);
    }

    #[test]
    fn test_change_is_sticky_until_reset() {
        let mut det = ChangeDetector::with_default();
        let cell = CellId::new(1, 2);
        let closed = RgbaImage::from_pixel(10, 10, Rgba([50, 50, 50, 255]));
        let open = shifted(&closed, 30);

        det.observe(cell, &closed);
        assert!(matches!(det.observe(cell, &closed), Observation::Unchanged { diff } if diff == 0.0));

        let seen = det.observe(cell, &open);
        assert!(seen.is_change());
        assert_eq!(det.phase(cell), CellPhase::Changed);

        // Back to the closed picture: no event, but still flagged.
        assert!(!det.observe(cell, &closed).is_change());
        assert_eq!(det.phase(cell), CellPhase::Changed);

        det.reset();
        assert_eq!(det.phase(cell), CellPhase::Unseen);
        assert_eq!(det.tracked_cells(), 0);
    }

    #[test]
    fn test_baseline_not_overwritten() {
        let mut det = ChangeDetector::with_default();
        let cell = CellId::new(0, 1);
        let closed = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        let drift = RgbaImage::from_pixel(10, 10, Rgba([10, 10, 10, 255]));
        let far = RgbaImage::from_pixel(10, 10, Rgba([14, 14, 14, 255]));
        det.observe(cell, &closed);
        // Both compared against the first sample, which is never replaced.
        assert!(!det.observe(cell, &drift).is_change());
        assert!(det.observe(cell, &far).is_change());
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut det = ChangeDetector::new(ChangeConfig { change_threshold: 45.0 });
        let cell = CellId::new(0, 0);
        let base = RgbaImage::from_pixel(2, 2, Rgba([100, 100, 100, 255]));
        det.observe(cell, &base);
        assert!(!det.observe(cell, &shifted(&base, 15)).is_change());
        assert!(det.observe(cell, &shifted(&base, 16)).is_change());
    }
}
