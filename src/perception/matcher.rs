/// Nearest-template matcher over a small, fixed monster catalog.
///
/// Every reference is normalised once to `compare_size` × `compare_size`
/// RGBA. A capture is resized to the same size and compared pixel by pixel,
/// skipping reference pixels whose alpha is at or below `alpha_cutoff` so
/// only the monster's visible silhouette contributes. The closest reference
/// wins (first in catalog order on ties) if its distance is within
/// `match_threshold`.
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::future::join_all;
use image::imageops::FilterType;
use image::RgbaImage;
use tokio::sync::OnceCell;

use crate::errors::{GridWatchError, GridWatchResult};
use crate::perception::catalog::MonsterAsset;
use crate::perception::traits::FrameSource;
use crate::perception::types::CaptureRect;

/// Distance reported for a reference with no opaque pixel to compare.
pub const MAX_DISTANCE: f64 = 255.0;

#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub compare_size: u32,
    pub alpha_cutoff: u8,
    pub match_threshold: f64,
    /// Root for relative catalog image paths.
    pub assets_dir: PathBuf,
    /// Upper bound for reading one reference image, local or remote.
    pub fetch_timeout: Duration,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            compare_size: 64,
            alpha_cutoff: 50,
            match_threshold: 65.0,
            assets_dir: PathBuf::from("assets"),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedReference {
    pub asset: MonsterAsset,
    pub pixels: RgbaImage,
}

pub struct TemplateMatcher {
    config: MatchConfig,
    catalog: Vec<MonsterAsset>,
    references: OnceCell<Vec<LoadedReference>>,
    http: reqwest::Client,
}

impl TemplateMatcher {
    pub fn new(config: MatchConfig, catalog: Vec<MonsterAsset>) -> Self {
        Self {
            config,
            catalog,
            references: OnceCell::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Build a matcher whose references are already normalised.
    pub fn with_references(config: MatchConfig, references: Vec<LoadedReference>) -> Self {
        let catalog = references.iter().map(|r| r.asset.clone()).collect();
        Self {
            config,
            catalog,
            references: OnceCell::new_with(Some(references)),
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.references.initialized()
    }

    pub fn reference_count(&self) -> usize {
        self.references.get().map_or(0, Vec::len)
    }

    // ── Loading ─────────────────────────────────────────────────────────────

    /// Fetch and normalise every catalog image exactly once. Concurrent and
    /// repeated calls share the single load. Returns the number of usable
    /// references; assets that fail are logged and left out.
    pub async fn load_assets(&self) -> usize {
        self.references
            .get_or_init(|| self.fetch_all())
            .await
            .len()
    }

    async fn fetch_all(&self) -> Vec<LoadedReference> {
        let loads = self.catalog.iter().map(|asset| async move {
            match self.fetch_one(asset).await {
                Ok(reference) => Some(reference),
                Err(e) => {
                    tracing::warn!(asset = %asset.id, path = %asset.image_path, error = %e, "failed to load monster reference");
                    None
                }
            }
        });
        // join_all keeps catalog order, which the tie-break relies on.
        let references: Vec<LoadedReference> = join_all(loads).await.into_iter().flatten().collect();
        tracing::info!(
            loaded = references.len(),
            total = self.catalog.len(),
            "monster references loaded"
        );
        references
    }

    async fn fetch_one(&self, asset: &MonsterAsset) -> GridWatchResult<LoadedReference> {
        let limit = self.config.fetch_timeout;
        let bytes = tokio::time::timeout(limit, self.fetch_bytes(asset))
            .await
            .map_err(|_| {
                GridWatchError::Asset(format!(
                    "{} not received within {} ms",
                    asset.image_path,
                    limit.as_millis()
                ))
            })??;
        let pixels = normalize_reference(&bytes, self.config.compare_size)?;
        Ok(LoadedReference {
            asset: asset.clone(),
            pixels,
        })
    }

    async fn fetch_bytes(&self, asset: &MonsterAsset) -> GridWatchResult<Vec<u8>> {
        let bytes = if is_remote(&asset.image_path) {
            self.http
                .get(&asset.image_path)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?
                .to_vec()
        } else {
            let path = resolve_path(&self.config.assets_dir, &asset.image_path);
            tokio::fs::read(&path).await.map_err(|e| {
                GridWatchError::Asset(format!("read {}: {e}", path.display()))
            })?
        };
        Ok(bytes)
    }

    // ── Matching ────────────────────────────────────────────────────────────

    /// Identify the content of `rect` in `source`. `Ok(None)` when nothing is
    /// close enough or when no reference has been loaded yet.
    pub fn find_match(
        &self,
        source: &dyn FrameSource,
        rect: &CaptureRect,
    ) -> GridWatchResult<Option<MonsterAsset>> {
        if self.reference_count() == 0 {
            return Ok(None);
        }
        let size = self.config.compare_size;
        let captured = source.extract(rect, size, size)?;
        Ok(self.best_match(&captured).map(|(asset, _)| asset.clone()))
    }

    /// Nearest reference to an already-normalised capture, with its distance,
    /// if it passes the match threshold.
    pub fn best_match(&self, captured: &RgbaImage) -> Option<(&MonsterAsset, f64)> {
        let references = self.references.get()?;
        let mut best: Option<(&LoadedReference, f64)> = None;
        for reference in references {
            let d = masked_distance(captured, &reference.pixels, self.config.alpha_cutoff);
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((reference, d));
            }
        }

        let (reference, distance) = best?;
        tracing::trace!(asset = %reference.asset.id, distance, "closest reference");
        if distance <= self.config.match_threshold {
            Some((&reference.asset, distance))
        } else {
            None
        }
    }
}

/// Mean of `(|ΔR| + |ΔG| + |ΔB|) / 3` over reference pixels whose alpha
/// exceeds `alpha_cutoff`; [`MAX_DISTANCE`] if there are none.
pub fn masked_distance(captured: &RgbaImage, reference: &RgbaImage, alpha_cutoff: u8) -> f64 {
    let mut total = 0.0;
    let mut compared: u64 = 0;
    for (c, r) in captured.pixels().zip(reference.pixels()) {
        if r[3] <= alpha_cutoff {
            continue;
        }
        let sum = c[0].abs_diff(r[0]) as u32 + c[1].abs_diff(r[1]) as u32 + c[2].abs_diff(r[2]) as u32;
        total += sum as f64 / 3.0;
        compared += 1;
    }
    if compared == 0 {
        return MAX_DISTANCE;
    }
    total / compared as f64
}

/// Decode an encoded image and resize it to the comparison square.
pub fn normalize_reference(bytes: &[u8], compare_size: u32) -> GridWatchResult<RgbaImage> {
    let img = image::load_from_memory(bytes)?;
    Ok(img
        .resize_exact(compare_size, compare_size, FilterType::Triangle)
        .to_rgba8())
}

fn is_remote(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

fn resolve_path(root: &Path, image_path: &str) -> PathBuf {
    let p = Path::new(image_path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::catalog::MonsterCategory;
    use crate::perception::frame::Frame;
    use image::Rgba;

    const SIZE: u32 = 64;

    fn config() -> MatchConfig {
        MatchConfig {
            compare_size: SIZE,
            ..MatchConfig::default()
        }
    }

    fn asset(id: &str) -> MonsterAsset {
        MonsterAsset::new(id, MonsterCategory::Blop)
    }

    fn solid(v: u8, a: u8) -> RgbaImage {
        RgbaImage::from_pixel(SIZE, SIZE, Rgba([v, v, v, a]))
    }

    /// Opaque disc on a transparent background.
    fn disc(r: u8, g: u8, b: u8) -> RgbaImage {
        RgbaImage::from_fn(SIZE, SIZE, |x, y| {
            let dx = x as i32 - 32;
            let dy = y as i32 - 32;
            if dx * dx + dy * dy < 20 * 20 {
                Rgba([r, g, b, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }

    fn reference(id: &str, pixels: RgbaImage) -> LoadedReference {
        LoadedReference {
            asset: asset(id),
            pixels,
        }
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        let img = disc(200, 40, 90);
        assert_eq!(masked_distance(&img, &img, 50), 0.0);
    }

    #[test]
    fn test_transparent_reference_is_disqualified() {
        let captured = solid(10, 255);
        assert_eq!(masked_distance(&captured, &solid(10, 0), 50), MAX_DISTANCE);
    }

    #[test]
    fn test_alpha_cutoff_is_exclusive() {
        let captured = solid(0, 255);
        // alpha 50 is background, alpha 51 counts
        assert_eq!(masked_distance(&captured, &solid(90, 50), 50), MAX_DISTANCE);
        assert_eq!(masked_distance(&captured, &solid(90, 51), 50), 90.0);
    }

    #[test]
    fn test_background_pixels_do_not_count() {
        let reference = disc(100, 100, 100);
        let mut captured = disc(100, 100, 100);
        // Paint the background of the capture; the distance must not move.
        for p in captured.pixels_mut() {
            if p[3] == 0 {
                *p = Rgba([255, 0, 0, 255]);
            }
        }
        assert_eq!(masked_distance(&captured, &reference, 50), 0.0);
    }

    #[test]
    fn test_self_match_selects_unique_asset() {
        let matcher = TemplateMatcher::with_references(
            config(),
            vec![
                reference("red", disc(220, 20, 20)),
                reference("green", disc(20, 220, 20)),
                reference("blue", disc(20, 20, 220)),
            ],
        );
        let (found, d) = matcher.best_match(&disc(20, 220, 20)).unwrap();
        assert_eq!(found.id, "green");
        assert_eq!(d, 0.0);
    }

    #[test]
    fn test_tie_goes_to_catalog_order() {
        let matcher = TemplateMatcher::with_references(
            config(),
            vec![reference("first", solid(80, 255)), reference("second", solid(80, 255))],
        );
        let (found, _) = matcher.best_match(&solid(80, 255)).unwrap();
        assert_eq!(found.id, "first");
    }

    #[test]
    fn test_threshold_boundary() {
        let matcher = TemplateMatcher::with_references(config(), vec![reference("m", solid(100, 255))]);
        let (_, d) = matcher.best_match(&solid(165, 255)).expect("65 must be accepted");
        assert_eq!(d, 65.0);
        assert!(matcher.best_match(&solid(166, 255)).is_none());
    }

    #[test]
    fn test_no_match_before_loading() {
        let matcher = TemplateMatcher::new(config(), vec![asset("162")]);
        let frame = Frame::new(solid(100, 255));
        let rect = CaptureRect::new(0.0, 0.0, 64.0, 64.0);
        assert!(!matcher.is_loaded());
        assert!(matcher.find_match(&frame, &rect).unwrap().is_none());
    }

    #[test]
    fn test_find_match_in_frame_region() {
        let matcher = TemplateMatcher::with_references(
            config(),
            vec![
                reference("dark", disc(30, 30, 30)),
                reference("light", disc(230, 230, 230)),
            ],
        );
        // Board with the light monster drawn at 2x scale in its top-left quadrant.
        let mut board = RgbaImage::from_pixel(256, 256, Rgba([0, 0, 0, 255]));
        let big = image::imageops::resize(&disc(230, 230, 230), 128, 128, FilterType::Nearest);
        image::imageops::overlay(&mut board, &big, 0, 0);
        let frame = Frame::new(board);

        let found = matcher
            .find_match(&frame, &CaptureRect::new(0.0, 0.0, 128.0, 128.0))
            .unwrap()
            .expect("light monster should match");
        assert_eq!(found.id, "light");
    }

    fn write_png(dir: &Path, rel: &str, img: &RgbaImage) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        img.save(&path).unwrap();
    }

    #[tokio::test]
    async fn test_load_assets_skips_failures_and_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("gridwatch_assets_{}", std::process::id()));
        write_png(&dir, "blops/a.png", &disc(10, 200, 10));
        write_png(&dir, "blops/c.png", &solid(120, 255));
        std::fs::create_dir_all(dir.join("blops")).unwrap();
        std::fs::write(dir.join("blops/corrupt.png"), b"not an image").unwrap();

        let catalog = vec![
            MonsterAsset { id: "a".into(), category: MonsterCategory::Blop, image_path: "blops/a.png".into() },
            MonsterAsset { id: "b".into(), category: MonsterCategory::Blop, image_path: "blops/missing.png".into() },
            MonsterAsset { id: "bad".into(), category: MonsterCategory::Blop, image_path: "blops/corrupt.png".into() },
            MonsterAsset { id: "c".into(), category: MonsterCategory::Blop, image_path: "blops/c.png".into() },
        ];
        let matcher = TemplateMatcher::new(
            MatchConfig { assets_dir: dir.clone(), ..config() },
            catalog,
        );

        let (first, second) = tokio::join!(matcher.load_assets(), matcher.load_assets());
        assert_eq!((first, second), (2, 2));
        assert!(matcher.is_loaded());
        assert_eq!(matcher.load_assets().await, 2);

        // Order is preserved and the normalised buffer matches its own source.
        let (found, d) = matcher.best_match(&solid(120, 255)).unwrap();
        assert_eq!(found.id, "c");
        assert_eq!(d, 0.0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_stalled_remote_asset_is_skipped() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let dir = std::env::temp_dir().join(format!("gridwatch_stall_{}", std::process::id()));
        write_png(&dir, "blops/ok.png", &solid(70, 255));
        let catalog = vec![
            MonsterAsset { id: "slow".into(), category: MonsterCategory::Blop, image_path: format!("http://{addr}/slow.png") },
            MonsterAsset { id: "ok".into(), category: MonsterCategory::Blop, image_path: "blops/ok.png".into() },
        ];
        let matcher = TemplateMatcher::new(
            MatchConfig {
                assets_dir: dir.clone(),
                fetch_timeout: Duration::from_millis(200),
                ..config()
            },
            catalog,
        );

        let loaded = tokio::time::timeout(Duration::from_secs(5), matcher.load_assets())
            .await
            .expect("a stalled asset must not block loading");
        assert_eq!(loaded, 1);
        let (found, _) = matcher.best_match(&solid(70, 255)).unwrap();
        assert_eq!(found.id, "ok");

        server.abort();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
