//! Platform profiles: the declarative description of one AI platform's UI
//! layout, detection parameters, rate limits, and browser configuration.
//!
//! Profiles are immutable once loaded and shared read-only across the
//! per-platform state machines. The JSON shape matches the profile files an
//! operator calibrates from the configuration UI, so existing profiles load
//! unchanged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::AutomationError;
use crate::types::{Point, Region};

/// The four interface elements the controller operates on. A profile missing
/// any of them is rejected at load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    PromptField,
    SubmitButton,
    ResponseArea,
    NewChatButton,
}

impl ElementKind {
    pub const ALL: [ElementKind; 4] = [
        ElementKind::PromptField,
        ElementKind::SubmitButton,
        ElementKind::ResponseArea,
        ElementKind::NewChatButton,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::PromptField => "prompt_field",
            ElementKind::SubmitButton => "submit_button",
            ElementKind::ResponseArea => "response_area",
            ElementKind::NewChatButton => "new_chat_button",
        }
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inclusive per-channel color bounds used by contour detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl ColorRange {
    pub fn contains(&self, px: [u8; 3]) -> bool {
        (0..3).all(|c| self.lower[c] <= px[c] && px[c] <= self.upper[c])
    }

    fn validate(&self, element: ElementKind) -> Result<(), AutomationError> {
        for c in 0..3 {
            if self.lower[c] > self.upper[c] {
                return Err(AutomationError::ProfileInvalid(format!(
                    "color range for '{element}' has lower > upper on channel {c}"
                )));
            }
        }
        Ok(())
    }
}

/// How to find an element on screen. Only contour-based color detection is
/// modeled; the wire name `findContour` is kept for profile compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMethod {
    #[serde(rename = "findContour")]
    FindContour,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSpec {
    pub method: DetectionMethod,
    pub color_range: ColorRange,
    /// Minimum contour area in pixels; detector default applies when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_area: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    pub detection: DetectionSpec,
}

fn deserialize_reset_time<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    NaiveTime::parse_from_str(&s, "%H:%M:%S").map_err(serde::de::Error::custom)
}

fn serialize_reset_time<S>(t: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&t.format("%H:%M:%S").to_string())
}

/// Per-platform usage limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub tokens_per_prompt: u32,
    pub prompts_per_day: u32,
    /// Time of day at which the daily prompt counter resets.
    #[serde(
        deserialize_with = "deserialize_reset_time",
        serialize_with = "serialize_reset_time"
    )]
    pub reset_time: NaiveTime,
    /// Seconds to wait between consecutive prompts.
    pub cooldown_period: f64,
}

impl Limits {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_period.max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorDetection {
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Identity of a previously selected window, persisted so later runs can
/// reattach without re-running the selection heuristics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowIdentity {
    pub id: u32,
    pub title: String,
}

/// Browser launch and window-selection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(rename = "type", default = "default_browser_type")]
    pub browser_type: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub fullscreen: bool,
    /// Reuse the persisted window identity when it still resolves.
    #[serde(default)]
    pub remember_window: bool,
    /// Substring matched case-insensitively against window titles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_title_pattern: Option<String>,
    /// 1-based position among this browser's windows, in launch order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_order: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remembered_window: Option<WindowIdentity>,
}

fn default_browser_type() -> String {
    "Chrome".to_string()
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            browser_type: default_browser_type(),
            path: String::new(),
            url: String::new(),
            fullscreen: false,
            remember_window: false,
            window_title_pattern: None,
            window_order: None,
            remembered_window: None,
        }
    }
}

/// Absolute screen position captured during calibration. When present and
/// still consistent with the live capture, it takes precedence over vision
/// detection for that element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibratedPosition {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub center_x: i32,
    pub center_y: i32,
}

impl CalibratedPosition {
    pub fn region(&self) -> Region {
        Region::new(self.x, self.y, self.width, self.height)
    }

    pub fn center(&self) -> Point {
        Point::new(self.center_x, self.center_y)
    }

    pub fn from_region(region: Region) -> Self {
        let c = region.center();
        Self {
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
            center_x: c.x,
            center_y: c.y,
        }
    }
}

/// Which extraction path produced the cached sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Direct structural extraction through a richer channel (e.g. a DOM-side
    /// provider); only valid while the structure fingerprint matches.
    Structural,
    /// Recognition over the captured response image.
    Recognition,
}

/// Cached extraction decision for the response area, keyed by a structural
/// fingerprint of the observed region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub method: ExtractionMethod,
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<String>,
    pub configured_at: DateTime<Utc>,
}

/// Immutable description of one AI platform. See module docs for the JSON
/// shape; `interface` must contain all four [`ElementKind`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub name: String,
    pub interface: BTreeMap<ElementKind, ElementSpec>,
    pub limits: Limits,
    #[serde(default)]
    pub error_detection: ErrorDetection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub interface_positions: BTreeMap<ElementKind, CalibratedPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_config: Option<ExtractionConfig>,
}

impl PlatformProfile {
    /// Parse and validate a profile from JSON text.
    pub fn from_json(json: &str) -> Result<Self, AutomationError> {
        let profile: PlatformProfile = serde_json::from_str(json)
            .map_err(|e| AutomationError::ProfileInvalid(format!("parse error: {e}")))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Load and validate a profile from a JSON file.
    pub fn load(path: &Path) -> Result<Self, AutomationError> {
        debug!("Loading platform profile from {}", path.display());
        let json = std::fs::read_to_string(path).map_err(|e| {
            AutomationError::ProfileInvalid(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Pure validation, no side effects. Rejects profiles the controller
    /// cannot operate on.
    pub fn validate(&self) -> Result<(), AutomationError> {
        if self.name.trim().is_empty() {
            return Err(AutomationError::ProfileInvalid(
                "profile name is empty".to_string(),
            ));
        }
        for kind in ElementKind::ALL {
            let spec = self.interface.get(&kind).ok_or_else(|| {
                AutomationError::ProfileInvalid(format!(
                    "profile '{}' is missing interface element '{kind}'",
                    self.name
                ))
            })?;
            spec.detection.color_range.validate(kind)?;
        }
        if self.limits.cooldown_period < 0.0 {
            return Err(AutomationError::ProfileInvalid(format!(
                "profile '{}' has negative cooldown_period",
                self.name
            )));
        }
        Ok(())
    }

    pub fn element(&self, kind: ElementKind) -> &ElementSpec {
        // validate() guarantees presence of all four kinds
        &self.interface[&kind]
    }

    pub fn calibrated(&self, kind: ElementKind) -> Option<&CalibratedPosition> {
        self.interface_positions.get(&kind)
    }

    pub fn browser(&self) -> BrowserConfig {
        self.browser.clone().unwrap_or_default()
    }
}

/// Directory of `<name>.json` profile files, plus persistence for the
/// per-platform calibration and extraction caches that ride inside them.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn load(&self, name: &str) -> Result<PlatformProfile, AutomationError> {
        PlatformProfile::load(&self.path_for(name))
    }

    /// Load every valid profile in the directory. Invalid files are skipped
    /// with a warning so one bad profile cannot take down the others.
    pub fn load_all(&self) -> Result<BTreeMap<String, Arc<PlatformProfile>>, AutomationError> {
        let mut profiles = BTreeMap::new();
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            AutomationError::Internal(format!("cannot read {}: {e}", self.dir.display()))
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match PlatformProfile::load(&path) {
                Ok(profile) => {
                    profiles.insert(profile.name.clone(), Arc::new(profile));
                }
                Err(e) => warn!("Skipping profile {}: {e}", path.display()),
            }
        }
        info!("Loaded {} platform profile(s)", profiles.len());
        Ok(profiles)
    }

    /// Write a profile back, e.g. after updating calibrated positions or the
    /// extraction cache.
    pub fn save(&self, profile: &PlatformProfile) -> Result<(), AutomationError> {
        profile.validate()?;
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| AutomationError::Internal(format!("cannot create profile dir: {e}")))?;
        let json = serde_json::to_string_pretty(profile)
            .map_err(|e| AutomationError::Internal(format!("serialize profile: {e}")))?;
        let path = self.path_for(&profile.name);
        std::fs::write(&path, json).map_err(|e| {
            AutomationError::Internal(format!("cannot write {}: {e}", path.display()))
        })?;
        debug!("Saved profile '{}' to {}", profile.name, path.display());
        Ok(())
    }
}
