//! Window location: finding and focusing the browser window a platform
//! profile targets.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::driver::InputGate;
use crate::errors::AutomationError;
use crate::profile::{BrowserConfig, PlatformProfile};
use crate::providers::{WindowBackend, WindowInfo};

/// Bounded retry with exponential backoff for transient lookups.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay.saturating_mul(1 << attempt.min(16));
        delay.min(self.max_delay)
    }
}

fn browser_keywords(browser_type: &str) -> Vec<&'static str> {
    match browser_type.to_lowercase().as_str() {
        "firefox" => vec!["firefox", "mozilla"],
        "chrome" => vec!["chrome", "chromium"],
        "edge" => vec!["edge"],
        _ => vec![
            "chrome", "chromium", "firefox", "mozilla", "edge", "safari", "opera", "brave",
        ],
    }
}

/// Finds the window a profile targets.
///
/// Selection precedence, per profile: persisted window identity (when
/// `remember_window` is set and the identity still resolves), then title
/// pattern, then nth browser window by launch order.
pub struct WindowLocator {
    backend: Arc<dyn WindowBackend>,
    gate: InputGate,
    retry: RetryPolicy,
}

impl WindowLocator {
    pub fn new(backend: Arc<dyn WindowBackend>, gate: InputGate) -> Self {
        Self {
            backend,
            gate,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Locate and focus the profile's window, retrying with backoff while no
    /// candidate resolves. `WindowNotFound` after the retry budget is
    /// reported to the caller, which may choose to relaunch the browser.
    #[instrument(skip(self, profile), fields(platform = %profile.name))]
    pub async fn locate(&self, profile: &PlatformProfile) -> Result<WindowInfo, AutomationError> {
        let browser = profile.browser();
        for attempt in 0..self.retry.max_attempts {
            match self.select(&browser) {
                Ok(window) => {
                    info!(title = %window.title, "window located");
                    // activation may click into the window, so it runs under
                    // the input gate like all other input simulation
                    {
                        let _guard = self.gate.acquire().await;
                        self.backend.focus(&window)?;
                    }
                    return Ok(window);
                }
                Err(e) if attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(attempt, ?delay, "window not found yet: {e}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!("giving up locating window for '{}'", profile.name);
                    return Err(e);
                }
            }
        }
        Err(AutomationError::WindowNotFound(format!(
            "no window matched for platform '{}'",
            profile.name
        )))
    }

    /// One selection pass over the current window list.
    fn select(&self, browser: &BrowserConfig) -> Result<WindowInfo, AutomationError> {
        let windows = self.backend.list_windows()?;

        // (a) persisted identity, if it still resolves to a live window
        if browser.remember_window {
            if let Some(remembered) = &browser.remembered_window {
                if let Some(window) = windows.iter().find(|w| w.id == remembered.id) {
                    debug!(id = remembered.id, "reattached to remembered window");
                    return Ok(window.clone());
                }
                debug!(id = remembered.id, "remembered window is gone, falling through");
            }
        }

        // (b) title pattern
        if let Some(pattern) = browser
            .window_title_pattern
            .as_deref()
            .filter(|p| !p.trim().is_empty())
        {
            let needle = pattern.to_lowercase();
            if let Some(window) = windows
                .iter()
                .find(|w| w.title.to_lowercase().contains(&needle))
            {
                return Ok(window.clone());
            }
        }

        // (c) nth browser window by launch order (1-based)
        let keywords = browser_keywords(&browser.browser_type);
        let candidates: Vec<&WindowInfo> = windows
            .iter()
            .filter(|w| {
                let title = w.title.to_lowercase();
                let app = w.app_name.to_lowercase();
                keywords.iter().any(|k| title.contains(k) || app.contains(k))
            })
            .collect();
        let order = browser.window_order.unwrap_or(1).max(1);
        candidates
            .get(order - 1)
            .map(|w| (*w).clone())
            .ok_or_else(|| {
                AutomationError::WindowNotFound(format!(
                    "no {} window at position {order} ({} candidate(s))",
                    browser.browser_type,
                    candidates.len()
                ))
            })
    }
}
