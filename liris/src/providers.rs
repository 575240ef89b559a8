//! Capability traits at the boundary between the automation core and the
//! machine it drives.
//!
//! The keyboard, mouse, and screen are global machine-wide resources, so the
//! core never touches them ambiently: every consumer receives these
//! capabilities explicitly and all real use is serialized behind the
//! [`crate::driver::InputGate`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AutomationError;
use crate::profile::ExtractionConfig;
use crate::types::{Capture, Region};

/// Keys the interaction driver needs. Character keys go through
/// [`InputInjector::type_text`]; this enum covers control chords only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Control,
    Shift,
    Alt,
    Enter,
    Tab,
    Delete,
    Escape,
    Char(char),
}

/// A live top-level window as reported by the window backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub id: u32,
    pub title: String,
    pub app_name: String,
    pub region: Region,
    pub focused: bool,
    pub minimized: bool,
}

/// Produces pixel buffers of the screen.
pub trait ScreenCapture: Send + Sync {
    /// Capture the primary monitor.
    fn capture_screen(&self) -> Result<Capture, AutomationError>;

    /// Capture just `region`. The default implementation crops a full-screen
    /// capture; backends with native region capture may override.
    fn capture_region(&self, region: &Region) -> Result<Capture, AutomationError> {
        let full = self.capture_screen()?;
        full.crop(region).ok_or_else(|| {
            AutomationError::ElementNotFound(format!("region {region:?} is outside the screen"))
        })
    }
}

/// Simulates keyboard and mouse input. Implementations act on the real,
/// shared input devices; callers must hold the input gate.
pub trait InputInjector: Send + Sync {
    fn click(&self, x: i32, y: i32) -> Result<(), AutomationError>;
    fn type_text(&self, text: &str) -> Result<(), AutomationError>;
    fn press(&self, key: Key) -> Result<(), AutomationError>;
    /// Press a chord, e.g. `[Control, Char('a')]` to select all.
    fn chord(&self, keys: &[Key]) -> Result<(), AutomationError>;
}

/// Turns a captured image region into text. Recognition internals are a
/// provider concern; the core only consumes this boundary.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, capture: &Capture) -> Result<String, AutomationError>;
}

/// Richer extraction path that reads the response structurally (e.g. through
/// a DOM-side channel) instead of recognizing pixels. Optional; only consulted
/// while the cached structure fingerprint still matches.
#[async_trait]
pub trait StructuralExtractor: Send + Sync {
    async fn extract(&self, config: &ExtractionConfig) -> Result<String, AutomationError>;
}

/// Enumerates and focuses top-level windows.
pub trait WindowBackend: Send + Sync {
    /// All visible top-level windows, in launch order.
    fn list_windows(&self) -> Result<Vec<WindowInfo>, AutomationError>;

    /// Bring `window` to the foreground.
    fn focus(&self, window: &WindowInfo) -> Result<(), AutomationError>;

    /// Capture the pixels of `window`.
    fn capture_window(&self, window: &WindowInfo) -> Result<Capture, AutomationError>;
}

/// Recognizer stub for wiring the pipeline without an OCR provider. Every
/// call fails with `UnsupportedOperation`.
pub struct NullRecognizer;

#[async_trait]
impl TextRecognizer for NullRecognizer {
    async fn recognize(&self, _capture: &Capture) -> Result<String, AutomationError> {
        Err(AutomationError::UnsupportedOperation(
            "no text recognizer configured".to_string(),
        ))
    }
}
