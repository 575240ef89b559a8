//! Test support: mock capability providers and profile fixtures shared by the
//! module test suites.

mod controller_tests;
mod extractor_tests;

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveTime;
use image::{Rgba, RgbaImage};

use crate::errors::AutomationError;
use crate::profile::{
    CalibratedPosition, ColorRange, DetectionMethod, DetectionSpec, ElementKind, ElementSpec,
    ErrorDetection, ExtractionConfig, Limits, PlatformProfile,
};
use crate::providers::{
    InputInjector, Key, ScreenCapture, StructuralExtractor, TextRecognizer, WindowBackend,
    WindowInfo,
};
use crate::types::{Capture, Point, Region};

/// A solid-color image.
pub fn solid_image(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}

/// An image with a diagonal luminance gradient, so that any crop of
/// reasonable size is visually non-uniform.
pub fn gradient_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let v = ((x + y) % 256) as u8;
        Rgba([v, v, v, 255])
    })
}

/// Paint `region` of `image` (image-local coordinates) with `color`.
pub fn paint_rect(image: &mut RgbaImage, region: Region, color: [u8; 4]) {
    for y in region.y..region.y + region.height as i32 {
        for x in region.x..region.x + region.width as i32 {
            if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
                image.put_pixel(x as u32, y as u32, Rgba(color));
            }
        }
    }
}

pub fn capture_at_origin(image: RgbaImage) -> Capture {
    Capture::new(image, Point::new(0, 0))
}

/// Screen provider replaying a fixed sequence of frames; the last frame
/// repeats once the sequence is exhausted.
pub struct MockCapture {
    frames: Vec<RgbaImage>,
    cursor: AtomicUsize,
}

impl MockCapture {
    pub fn new(frames: Vec<RgbaImage>) -> Self {
        assert!(!frames.is_empty(), "MockCapture needs at least one frame");
        Self {
            frames,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn single(frame: RgbaImage) -> Self {
        Self::new(vec![frame])
    }

    pub fn captures(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }
}

impl ScreenCapture for MockCapture {
    fn capture_screen(&self) -> Result<Capture, AutomationError> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        let frame = self.frames[i.min(self.frames.len() - 1)].clone();
        Ok(capture_at_origin(frame))
    }
}

/// Input provider that records every operation and can be told to fail a
/// named step.
#[derive(Default)]
pub struct MockInput {
    pub ops: Mutex<Vec<String>>,
    pub fail_on: Mutex<Option<String>>,
    pub fail_once_on: Mutex<Option<String>>,
}

impl MockInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation starting with `op`.
    pub fn fail_on(&self, op: &str) {
        *self.fail_on.lock().unwrap() = Some(op.to_string());
    }

    /// Fail the next operation starting with `op`, then recover.
    pub fn fail_once(&self, op: &str) {
        *self.fail_once_on.lock().unwrap() = Some(op.to_string());
    }

    pub fn recorded(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: String) -> Result<(), AutomationError> {
        let mut once = self.fail_once_on.lock().unwrap();
        if once.as_deref().is_some_and(|t| op.starts_with(t)) {
            once.take();
            return Err(AutomationError::PlatformError(format!("injected: {op}")));
        }
        drop(once);
        let fail = self.fail_on.lock().unwrap();
        if let Some(target) = fail.as_deref() {
            if op.starts_with(target) {
                return Err(AutomationError::PlatformError(format!("injected: {op}")));
            }
        }
        drop(fail);
        self.ops.lock().unwrap().push(op);
        Ok(())
    }
}

fn key_name(key: Key) -> String {
    match key {
        Key::Char(c) => c.to_string(),
        other => format!("{other:?}").to_lowercase(),
    }
}

impl InputInjector for MockInput {
    fn click(&self, x: i32, y: i32) -> Result<(), AutomationError> {
        self.record(format!("click({x},{y})"))
    }

    fn type_text(&self, text: &str) -> Result<(), AutomationError> {
        self.record(format!("type({text})"))
    }

    fn press(&self, key: Key) -> Result<(), AutomationError> {
        self.record(format!("press({})", key_name(key)))
    }

    fn chord(&self, keys: &[Key]) -> Result<(), AutomationError> {
        let names: Vec<String> = keys.iter().map(|k| key_name(*k)).collect();
        self.record(format!("chord({})", names.join("+")))
    }
}

/// Recognizer replaying queued responses; the last one repeats.
pub struct MockRecognizer {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl MockRecognizer {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            last: Mutex::new(String::new()),
        }
    }
}

#[async_trait]
impl TextRecognizer for MockRecognizer {
    async fn recognize(&self, _capture: &Capture) -> Result<String, AutomationError> {
        let mut queue = self.responses.lock().unwrap();
        match queue.pop_front() {
            Some(text) => {
                *self.last.lock().unwrap() = text.clone();
                Ok(text)
            }
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }
}

/// Structural provider returning a fixed text, or failing when told to.
pub struct MockStructural {
    pub text: String,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl MockStructural {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StructuralExtractor for MockStructural {
    async fn extract(&self, _config: &ExtractionConfig) -> Result<String, AutomationError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            Err(AutomationError::PlatformError("bridge gone".to_string()))
        } else {
            Ok(self.text.clone())
        }
    }
}

/// Window backend serving a fixed window list.
pub struct MockWindows {
    pub windows: Vec<WindowInfo>,
    pub focused: Mutex<Vec<u32>>,
}

impl MockWindows {
    pub fn new(windows: Vec<WindowInfo>) -> Self {
        Self {
            windows,
            focused: Mutex::new(Vec::new()),
        }
    }
}

impl WindowBackend for MockWindows {
    fn list_windows(&self) -> Result<Vec<WindowInfo>, AutomationError> {
        Ok(self.windows.clone())
    }

    fn focus(&self, window: &WindowInfo) -> Result<(), AutomationError> {
        self.focused.lock().unwrap().push(window.id);
        Ok(())
    }

    fn capture_window(&self, window: &WindowInfo) -> Result<Capture, AutomationError> {
        Ok(Capture::new(
            gradient_image(window.region.width, window.region.height),
            Point::new(window.region.x, window.region.y),
        ))
    }
}

pub fn window(id: u32, title: &str, app: &str) -> WindowInfo {
    WindowInfo {
        id,
        title: title.to_string(),
        app_name: app.to_string(),
        region: Region::new(0, 0, 800, 600),
        focused: false,
        minimized: false,
    }
}

pub fn detection_spec(lower: [u8; 3], upper: [u8; 3]) -> DetectionSpec {
    DetectionSpec {
        method: DetectionMethod::FindContour,
        color_range: ColorRange { lower, upper },
        min_area: None,
    }
}

fn element_spec(kind: ElementKind) -> ElementSpec {
    ElementSpec {
        element_type: kind.as_str().to_string(),
        placeholder: None,
        detection: detection_spec([150, 150, 150], [255, 255, 255]),
    }
}

pub fn limits(prompts_per_day: u32, cooldown_period: f64) -> Limits {
    Limits {
        tokens_per_prompt: 4096,
        prompts_per_day,
        reset_time: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        cooldown_period,
    }
}

/// A complete in-memory profile with calibrated positions for all four
/// elements, so controller tests never depend on contour detection.
pub fn calibrated_profile(name: &str, patterns: Vec<&str>) -> PlatformProfile {
    let mut interface = BTreeMap::new();
    let mut positions = BTreeMap::new();
    let mut y = 10;
    for kind in ElementKind::ALL {
        interface.insert(kind, element_spec(kind));
        positions.insert(
            kind,
            CalibratedPosition::from_region(Region::new(10, y, 100, 30)),
        );
        y += 40;
    }
    PlatformProfile {
        name: name.to_string(),
        interface,
        limits: limits(100, 0.0),
        error_detection: ErrorDetection {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        },
        browser: None,
        interface_positions: positions,
        extraction_config: None,
    }
}
