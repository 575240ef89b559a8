//! Response extraction: waiting for the response area to finish rendering,
//! then turning its pixels into text.
//!
//! A structural fingerprint of the settled region gates a cheaper extraction
//! path: while the fingerprint matches the cached one, a structural provider
//! (when wired) is trusted; otherwise a fresh recognition pass runs and the
//! cache is rewritten.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument, trace, warn};

use crate::driver::InputGate;
use crate::errors::AutomationError;
use crate::profile::{ExtractionConfig, ExtractionMethod};
use crate::providers::{ScreenCapture, StructuralExtractor, TextRecognizer};
use crate::types::{Capture, Region};

/// Settle-wait pacing, bounded and configurable per profile.
#[derive(Debug, Clone, Copy)]
pub struct SettleConfig {
    /// Grace period before the first capture, letting rendering start.
    pub initial_delay: Duration,
    /// Interval between consecutive stability checks.
    pub check_interval: Duration,
    /// Extra wait cycles granted while the content keeps changing; beyond
    /// this the partial result is surfaced with the truncated flag.
    pub max_extra_cycles: u32,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1500),
            check_interval: Duration::from_millis(500),
            max_extra_cycles: 6,
        }
    }
}

/// Result of one extraction pass.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub cache: ExtractionConfig,
    /// Set when the response was still rendering after the wait budget; the
    /// text is a degraded success, not an error.
    pub truncated: bool,
}

pub struct ResponseExtractor {
    capture: Arc<dyn ScreenCapture>,
    recognizer: Arc<dyn TextRecognizer>,
    structural: Option<Arc<dyn StructuralExtractor>>,
    gate: InputGate,
    settle: SettleConfig,
}

impl ResponseExtractor {
    pub fn new(
        capture: Arc<dyn ScreenCapture>,
        recognizer: Arc<dyn TextRecognizer>,
        gate: InputGate,
    ) -> Self {
        Self {
            capture,
            recognizer,
            structural: None,
            gate,
            settle: SettleConfig::default(),
        }
    }

    pub fn with_structural(mut self, structural: Arc<dyn StructuralExtractor>) -> Self {
        self.structural = Some(structural);
        self
    }

    pub fn with_settle(mut self, settle: SettleConfig) -> Self {
        self.settle = settle;
        self
    }

    /// Capture the response region once, holding the input gate only for the
    /// capture itself.
    async fn capture_once(&self, region: &Region) -> Result<Capture, AutomationError> {
        let _guard = self.gate.acquire().await;
        self.capture.capture_region(region)
    }

    /// Wait for `region` to stop changing, then extract its text.
    ///
    /// Content still changing between two settle checks means the platform is
    /// still generating; each change grants one more wait cycle up to the
    /// configured budget, after which the partial content is extracted and
    /// flagged truncated.
    #[instrument(skip(self, region, cache))]
    pub async fn extract(
        &self,
        region: &Region,
        cache: Option<&ExtractionConfig>,
    ) -> Result<Extraction, AutomationError> {
        tokio::time::sleep(self.settle.initial_delay).await;

        let mut capture = self.capture_once(region).await?;
        let mut last_hash = capture.content_hash();
        let mut truncated = false;
        let mut cycles = 0u32;
        loop {
            tokio::time::sleep(self.settle.check_interval).await;
            let next = self.capture_once(region).await?;
            let hash = next.content_hash();
            capture = next;
            if hash == last_hash {
                break;
            }
            trace!(cycles, "response area still changing");
            last_hash = hash;
            cycles += 1;
            if cycles >= self.settle.max_extra_cycles {
                debug!("settle budget exhausted, surfacing partial response");
                truncated = true;
                break;
            }
        }

        let fingerprint = structure_fingerprint(&capture);
        let (raw, method) = self.read_text(&capture, cache, &fingerprint).await?;
        let text = clean_response_text(&raw);
        let sample = text.chars().take(120).collect::<String>();
        let updated = ExtractionConfig {
            method,
            fingerprint,
            sample: (!sample.is_empty()).then_some(sample),
            configured_at: Utc::now(),
        };
        Ok(Extraction {
            text,
            cache: updated,
            truncated,
        })
    }

    /// Structural path when the cached fingerprint still matches and a
    /// provider is wired; recognition over the captured image otherwise.
    async fn read_text(
        &self,
        capture: &Capture,
        cache: Option<&ExtractionConfig>,
        fingerprint: &str,
    ) -> Result<(String, ExtractionMethod), AutomationError> {
        if let (Some(cached), Some(structural)) = (cache, &self.structural) {
            if cached.method == ExtractionMethod::Structural && cached.fingerprint == fingerprint {
                match structural.extract(cached).await {
                    Ok(text) => return Ok((text, ExtractionMethod::Structural)),
                    Err(e) => warn!("structural extraction failed, falling back: {e}"),
                }
            }
        }
        let text = self.recognizer.recognize(capture).await?;
        Ok((text, ExtractionMethod::Recognition))
    }
}

/// Fingerprint of the region's *shape* rather than its exact pixels: a 16x16
/// grid of coarsely quantized luminance. Stable across different response
/// texts in the same layout, different when the platform restructures the
/// area.
pub fn structure_fingerprint(capture: &Capture) -> String {
    const GRID: u32 = 16;
    let width = capture.image.width().max(1);
    let height = capture.image.height().max(1);
    let mut cells = Vec::with_capacity((GRID * GRID) as usize);
    for gy in 0..GRID {
        for gx in 0..GRID {
            let x0 = gx * width / GRID;
            let x1 = ((gx + 1) * width / GRID).max(x0 + 1).min(width);
            let y0 = gy * height / GRID;
            let y1 = ((gy + 1) * height / GRID).max(y0 + 1).min(height);
            let mut sum = 0u64;
            let mut count = 0u64;
            for y in y0..y1 {
                for x in x0..x1 {
                    let [r, g, b, _] = capture.image.get_pixel(x, y).0;
                    sum += ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u64;
                    count += 1;
                }
            }
            let mean = if count == 0 { 0 } else { (sum / count) as u8 };
            // three luminance classes: dark / mid / light
            cells.push(mean / 86);
        }
    }
    blake3::hash(&cells).to_hex().to_string()
}

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("static regex"));
static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```.*?```").expect("static regex"));
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("static regex"));
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.*?)\*").expect("static regex"));
static UNDERLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__(.*?)__").expect("static regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Strip HTML remnants and markdown formatting from recognized text and
/// collapse whitespace.
pub fn clean_response_text(raw: &str) -> String {
    let text = CODE_FENCE.replace_all(raw, "");
    let text = HTML_TAG.replace_all(&text, " ");
    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    let text = BOLD.replace_all(&text, "$1");
    let text = UNDERLINE.replace_all(&text, "$1");
    let text = ITALIC.replace_all(&text, "$1");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}
