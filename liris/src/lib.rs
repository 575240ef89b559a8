//! Profile-driven automation for web AI chat interfaces.
//!
//! The crate drives real browser windows showing platforms like ChatGPT or
//! Claude: it locates the window, finds the prompt field, submit button,
//! response area, and new-chat control by color-contour detection (with a
//! calibrated fast path), types and submits prompts through simulated input,
//! waits for the response to settle, extracts and cleans its text, and
//! classifies platform-side errors, all while honoring per-platform rate
//! limits with a daily reset.
//!
//! Several platforms run concurrently, one sequential state machine each,
//! serialized over the single real keyboard/mouse/screen by a global input
//! gate.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use liris::{AutomationController, DesktopBackend, DesktopInput, NullRecognizer, ProviderSet, ProfileStore};
//!
//! # async fn run() -> Result<(), liris::AutomationError> {
//! let store = ProfileStore::new("profiles");
//! let profiles: Vec<_> = store.load_all()?.into_values().collect();
//!
//! let input = Arc::new(DesktopInput::new());
//! let backend = Arc::new(DesktopBackend::new(input.clone()));
//! let providers = ProviderSet {
//!     windows: backend.clone(),
//!     capture: backend,
//!     input,
//!     recognizer: Arc::new(NullRecognizer),
//!     structural: None,
//! };
//!
//! let controller = AutomationController::new(profiles, providers)?;
//! let outcome = controller.run_interaction("chatgpt", "Summarize Rust's ownership model").await?;
//! println!("[{}] {}", outcome.status, outcome.response_text);
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod controller;
pub mod desktop;
pub mod detector;
pub mod driver;
pub mod errors;
pub mod extractor;
pub mod profile;
pub mod providers;
pub mod quota;
pub mod types;
pub mod window;

pub use classifier::{Classification, ErrorClassifier};
pub use controller::{AutomationController, AutomationState, ProviderSet};
pub use desktop::{DesktopBackend, DesktopInput};
pub use detector::{ElementDetector, TieBreakPolicy};
pub use driver::{InputGate, InteractionDriver, RegionSet, TypingProfile};
pub use errors::AutomationError;
pub use extractor::{Extraction, ResponseExtractor, SettleConfig};
pub use profile::{
    BrowserConfig, CalibratedPosition, ColorRange, ElementKind, ExtractionConfig,
    ExtractionMethod, Limits, PlatformProfile, ProfileStore,
};
pub use providers::{
    InputInjector, Key, NullRecognizer, ScreenCapture, StructuralExtractor, TextRecognizer,
    WindowBackend, WindowInfo,
};
pub use quota::{Admission, QuotaTracker};
pub use types::{
    Capture, InteractionOutcome, InteractionRecord, InteractionStatus, Point, QuotaSnapshot,
    Region, Session,
};
pub use window::{RetryPolicy, WindowLocator};

/// Initialize tracing output for binaries and long-running sessions.
/// Respects `RUST_LOG`, defaulting to `info`. Safe to call more than once.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests;
