//! Common types shared across the automation pipeline.

use chrono::{DateTime, Local};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A point in absolute screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared distance, enough for nearest-candidate comparisons.
    pub fn distance_sq(&self, other: Point) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        dx * dx + dy * dy
    }
}

/// An axis-aligned rectangle in absolute screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.x + self.width as i32 / 2,
            self.y + self.height as i32 / 2,
        )
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Width over height; 0.0 for degenerate rectangles.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x
            && p.y >= self.y
            && p.x < self.x + self.width as i32
            && p.y < self.y + self.height as i32
    }

    /// Whether `self` lies entirely within `outer`.
    pub fn within(&self, outer: &Region) -> bool {
        self.x >= outer.x
            && self.y >= outer.y
            && self.x + self.width as i32 <= outer.x + outer.width as i32
            && self.y + self.height as i32 <= outer.y + outer.height as i32
    }
}

/// A screen capture plus the screen position of its top-left corner.
///
/// Captures of a single window carry that window's origin so regions stay in
/// absolute screen coordinates throughout the pipeline.
#[derive(Debug, Clone)]
pub struct Capture {
    pub image: RgbaImage,
    pub origin: Point,
}

impl Capture {
    pub fn new(image: RgbaImage, origin: Point) -> Self {
        Self { image, origin }
    }

    /// The screen-space rectangle this capture covers.
    pub fn bounds(&self) -> Region {
        Region::new(
            self.origin.x,
            self.origin.y,
            self.image.width(),
            self.image.height(),
        )
    }

    /// Crop out `region` (screen coordinates), clamped to the capture bounds.
    /// Returns `None` when the region lies entirely outside the capture.
    pub fn crop(&self, region: &Region) -> Option<Capture> {
        let bounds = self.bounds();
        let x0 = region.x.max(bounds.x);
        let y0 = region.y.max(bounds.y);
        let x1 = (region.x + region.width as i32).min(bounds.x + bounds.width as i32);
        let y1 = (region.y + region.height as i32).min(bounds.y + bounds.height as i32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        let sub = image::imageops::crop_imm(
            &self.image,
            (x0 - bounds.x) as u32,
            (y0 - bounds.y) as u32,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        )
        .to_image();
        Some(Capture::new(sub, Point::new(x0, y0)))
    }

    /// Content hash of the raw pixel data. Two captures of the same region
    /// hash equal iff nothing in it changed, which is how settle checks tell
    /// "still rendering" from "done".
    pub fn content_hash(&self) -> blake3::Hash {
        blake3::hash(self.image.as_raw())
    }
}

/// Outcome status of one interaction, as surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionStatus {
    Ok,
    Truncated,
    RateLimited,
    Error,
    Aborted,
}

impl std::fmt::Display for InteractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InteractionStatus::Ok => "ok",
            InteractionStatus::Truncated => "truncated",
            InteractionStatus::RateLimited => "rate_limited",
            InteractionStatus::Error => "error",
            InteractionStatus::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// What `run_interaction` hands back to a dashboard or CLI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionOutcome {
    pub response_text: String,
    pub status: InteractionStatus,
    pub timestamp: DateTime<Local>,
}

/// One completed interaction in a session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: Uuid,
    pub platform: String,
    pub prompt: String,
    pub response: String,
    pub timestamp: DateTime<Local>,
    pub status: InteractionStatus,
}

/// Append-only log of a run. Entries are written once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Local>,
    entries: Vec<InteractionRecord>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Local::now(),
            entries: Vec::new(),
        }
    }

    pub fn append(&mut self, record: InteractionRecord) {
        self.entries.push(record);
    }

    pub fn entries(&self) -> &[InteractionRecord] {
        &self.entries
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a platform's quota position, for status displays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub remaining_today: u32,
    pub next_allowed_at: DateTime<Local>,
}
