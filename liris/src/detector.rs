//! Element detection: turning a screen capture plus a profile's detection
//! spec into a bounding region for each interface element.
//!
//! Two strategies, selected explicitly: a calibrated fixed position (fast,
//! deterministic, brittle against layout changes) guarded by a cheap
//! consistency check, and contour detection over a color-range mask (robust,
//! heuristic). The calibrated path never invokes the vision scan.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, instrument, trace};

use crate::errors::AutomationError;
use crate::profile::{CalibratedPosition, ColorRange, DetectionSpec, ElementKind};
use crate::types::{Capture, Point, Region};

const DEFAULT_MIN_AREA: u32 = 100;

/// Luminance spread below which a region is considered visually empty (a
/// uniform patch of pixels is never a real widget).
const EMPTY_SPREAD: u8 = 8;

/// Candidate selection policy for contour detection.
///
/// The tie-break rule is deliberately configurable rather than fixed: the
/// default keeps candidates inside the element kind's typical aspect-ratio
/// band, picks the largest area, and breaks area ties by distance to the
/// element's previous known position (screen center on first run). When no
/// candidate falls in the band, the largest surviving contour wins outright.
#[derive(Debug, Clone)]
pub struct TieBreakPolicy {
    pub min_area: u32,
    aspect_bands: BTreeMap<ElementKind, (f32, f32)>,
}

impl Default for TieBreakPolicy {
    fn default() -> Self {
        let mut aspect_bands = BTreeMap::new();
        // Width/height bands observed on the supported chat UIs
        aspect_bands.insert(ElementKind::PromptField, (2.0, 40.0));
        aspect_bands.insert(ElementKind::SubmitButton, (0.5, 2.0));
        aspect_bands.insert(ElementKind::ResponseArea, (0.8, 20.0));
        aspect_bands.insert(ElementKind::NewChatButton, (0.5, 4.0));
        Self {
            min_area: DEFAULT_MIN_AREA,
            aspect_bands,
        }
    }
}

impl TieBreakPolicy {
    pub fn aspect_band(&self, kind: ElementKind) -> Option<(f32, f32)> {
        self.aspect_bands.get(&kind).copied()
    }

    pub fn set_aspect_band(&mut self, kind: ElementKind, band: (f32, f32)) {
        self.aspect_bands.insert(kind, band);
    }
}

/// A connected region of in-range pixels.
#[derive(Debug, Clone, Copy)]
pub struct Contour {
    pub region: Region,
    /// Number of mask pixels in the component, not the bounding-box area.
    pub area: u32,
}

pub struct ElementDetector {
    policy: TieBreakPolicy,
    /// Last accepted center per element, used as the tie-break anchor.
    previous: Mutex<BTreeMap<ElementKind, Point>>,
    scans: AtomicU64,
}

impl ElementDetector {
    pub fn new(policy: TieBreakPolicy) -> Self {
        Self {
            policy,
            previous: Mutex::new(BTreeMap::new()),
            scans: AtomicU64::new(0),
        }
    }

    /// Number of vision scans performed so far. Stays flat while calibrated
    /// positions keep passing their consistency check.
    pub fn scans_performed(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Resolve `kind` to a screen region.
    ///
    /// A calibrated position that passes its consistency check is returned
    /// directly; otherwise contour detection runs over the capture. Fails
    /// with `ElementNotFound` when no candidate survives the minimum-area
    /// filter; callers treat that as retryable with a fresh capture.
    #[instrument(skip(self, capture, spec, calibrated), fields(element = %kind))]
    pub fn detect(
        &self,
        capture: &Capture,
        kind: ElementKind,
        spec: &DetectionSpec,
        calibrated: Option<&CalibratedPosition>,
    ) -> Result<Region, AutomationError> {
        if let Some(position) = calibrated {
            let region = position.region();
            if self.calibration_consistent(capture, &region) {
                trace!(?region, "calibrated position passed consistency check");
                self.remember(kind, region.center());
                return Ok(region);
            }
            debug!(?region, "calibrated position stale, falling back to detection");
        }

        self.scans.fetch_add(1, Ordering::Relaxed);
        let min_area = spec.min_area.unwrap_or(self.policy.min_area);
        let contours = find_contours(capture, &spec.color_range, min_area);
        if contours.is_empty() {
            return Err(AutomationError::ElementNotFound(format!(
                "no contour of area >= {min_area} matched the color range for '{kind}'"
            )));
        }

        let anchor = self
            .previous
            .lock()
            .expect("detector anchor lock poisoned")
            .get(&kind)
            .copied()
            .unwrap_or_else(|| capture.bounds().center());
        let best = self.pick(&contours, kind, anchor);
        debug!(region = ?best.region, area = best.area, "element detected");
        self.remember(kind, best.region.center());
        Ok(best.region)
    }

    fn remember(&self, kind: ElementKind, center: Point) {
        self.previous
            .lock()
            .expect("detector anchor lock poisoned")
            .insert(kind, center);
    }

    /// Cheap check that a previously calibrated region is still plausible:
    /// inside the capture and not a uniform patch of pixels.
    fn calibration_consistent(&self, capture: &Capture, region: &Region) -> bool {
        if !region.within(&capture.bounds()) {
            return false;
        }
        match capture.crop(region) {
            Some(cropped) => !visually_empty(&cropped),
            None => false,
        }
    }

    fn pick(&self, contours: &[Contour], kind: ElementKind, anchor: Point) -> Contour {
        let in_band: Vec<&Contour> = match self.policy.aspect_band(kind) {
            Some((lo, hi)) => contours
                .iter()
                .filter(|c| {
                    let ratio = c.region.aspect_ratio();
                    ratio >= lo && ratio <= hi
                })
                .collect(),
            None => contours.iter().collect(),
        };
        // Out-of-band shapes are a weaker signal than no candidate at all
        let pool: Vec<&Contour> = if in_band.is_empty() {
            contours.iter().collect()
        } else {
            in_band
        };
        **pool
            .iter()
            .max_by(|a, b| {
                a.area.cmp(&b.area).then_with(|| {
                    // larger distance sorts lower so the closest wins
                    b.region
                        .center()
                        .distance_sq(anchor)
                        .cmp(&a.region.center().distance_sq(anchor))
                })
            })
            .expect("pool is non-empty")
    }
}

impl Default for ElementDetector {
    fn default() -> Self {
        Self::new(TieBreakPolicy::default())
    }
}

/// Whether a cropped capture is a near-uniform patch (luminance spread below
/// [`EMPTY_SPREAD`]).
fn visually_empty(capture: &Capture) -> bool {
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for px in capture.image.pixels() {
        let [r, g, b, _] = px.0;
        // integer BT.601 luma
        let luma = ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8;
        min = min.min(luma);
        max = max.max(luma);
        if max - min >= EMPTY_SPREAD {
            return false;
        }
    }
    true
}

/// Threshold the capture to the color range and collect connected components
/// (4-connectivity) above `min_area`, as bounding boxes in screen coordinates.
fn find_contours(capture: &Capture, range: &ColorRange, min_area: u32) -> Vec<Contour> {
    let width = capture.image.width() as usize;
    let height = capture.image.height() as usize;
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let mut mask = vec![false; width * height];
    for (x, y, px) in capture.image.enumerate_pixels() {
        let [r, g, b, _] = px.0;
        if range.contains([r, g, b]) {
            mask[y as usize * width + x as usize] = true;
        }
    }

    let mut visited = vec![false; width * height];
    let mut contours = Vec::new();
    let mut stack = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }
        let mut area = 0u32;
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        visited[start] = true;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            let x = idx % width;
            let y = idx / width;
            area += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            let mut push = |nidx: usize| {
                if mask[nidx] && !visited[nidx] {
                    visited[nidx] = true;
                    stack.push(nidx);
                }
            };
            if x > 0 {
                push(idx - 1);
            }
            if x + 1 < width {
                push(idx + 1);
            }
            if y > 0 {
                push(idx - width);
            }
            if y + 1 < height {
                push(idx + width);
            }
        }
        if area >= min_area {
            contours.push(Contour {
                region: Region::new(
                    capture.origin.x + min_x as i32,
                    capture.origin.y + min_y as i32,
                    (max_x - min_x + 1) as u32,
                    (max_y - min_y + 1) as u32,
                ),
                area,
            });
        }
    }
    contours
}
