//! Interaction driving: the focus, clear, type, submit sequence over the
//! regions the detector resolved.
//!
//! The keyboard, mouse, and screen are one machine-wide resource, so every
//! piece of real input simulation runs behind the shared [`InputGate`]; the
//! per-platform state machines advance independently but serialize here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use rand::Rng;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, instrument};

use crate::errors::AutomationError;
use crate::profile::ElementKind;
use crate::providers::{InputInjector, Key};
use crate::types::Region;

/// Global mutual-exclusion gate over input simulation and screen capture.
///
/// Cloning shares the same underlying lock. Waiting on cooldowns or response
/// rendering must happen *outside* the gate.
#[derive(Clone)]
pub struct InputGate {
    lock: Arc<Mutex<()>>,
}

impl InputGate {
    pub fn new() -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Default for InputGate {
    fn default() -> Self {
        Self::new()
    }
}

/// The resolved screen regions for one platform's four interface elements.
#[derive(Debug, Clone)]
pub struct RegionSet {
    regions: BTreeMap<ElementKind, Region>,
}

impl RegionSet {
    /// All four elements must be present.
    pub fn new(regions: BTreeMap<ElementKind, Region>) -> Result<Self, AutomationError> {
        for kind in ElementKind::ALL {
            if !regions.contains_key(&kind) {
                return Err(AutomationError::ElementNotFound(format!(
                    "region set is missing '{kind}'"
                )));
            }
        }
        Ok(Self { regions })
    }

    pub fn get(&self, kind: ElementKind) -> Region {
        self.regions[&kind]
    }
}

/// Pacing for simulated input. Pauses are jittered so consecutive runs do not
/// land on identical timings.
#[derive(Debug, Clone, Copy)]
pub struct TypingProfile {
    pub base_pause: Duration,
    /// Relative jitter applied to each pause, e.g. 0.2 for +/-20%.
    pub jitter: f64,
}

impl Default for TypingProfile {
    fn default() -> Self {
        Self {
            base_pause: Duration::from_millis(200),
            jitter: 0.2,
        }
    }
}

impl TypingProfile {
    fn jittered(&self) -> Duration {
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((self.base_pause.as_secs_f64() * factor).max(0.01))
    }
}

/// Sequences real input against a platform's interface elements.
pub struct InteractionDriver {
    input: Arc<dyn InputInjector>,
    gate: InputGate,
    typing: TypingProfile,
}

impl InteractionDriver {
    pub fn new(input: Arc<dyn InputInjector>, gate: InputGate) -> Self {
        Self {
            input,
            gate,
            typing: TypingProfile::default(),
        }
    }

    pub fn with_typing(mut self, typing: TypingProfile) -> Self {
        self.typing = typing;
        self
    }

    async fn pause(&self) {
        tokio::time::sleep(self.typing.jittered()).await;
    }

    /// Focus the prompt field, clear it, inject `prompt`, and submit.
    ///
    /// All-or-nothing: a failure at any step aborts the attempt with
    /// `InteractionFailed` before the submit happens, so a partial prompt is
    /// never sent. The caller is responsible for keeping `prompt` within the
    /// platform's token budget; no truncation happens here.
    #[instrument(skip(self, regions, prompt), fields(len = prompt.len()))]
    pub async fn send_prompt(
        &self,
        regions: &RegionSet,
        prompt: &str,
    ) -> Result<DateTime<Local>, AutomationError> {
        let _guard = self.gate.acquire().await;

        let step = |name: &str, e: AutomationError| {
            AutomationError::InteractionFailed(format!("{name}: {e}"))
        };

        let field = regions.get(ElementKind::PromptField).center();
        self.input
            .click(field.x, field.y)
            .map_err(|e| step("focus prompt field", e))?;
        self.pause().await;

        self.input
            .chord(&[Key::Control, Key::Char('a')])
            .map_err(|e| step("select field content", e))?;
        self.input
            .press(Key::Delete)
            .map_err(|e| step("clear field", e))?;
        self.pause().await;

        self.input
            .type_text(prompt)
            .map_err(|e| step("inject prompt", e))?;
        self.pause().await;

        let submit = regions.get(ElementKind::SubmitButton).center();
        self.input
            .click(submit.x, submit.y)
            .map_err(|e| step("submit", e))?;

        let submitted_at = Local::now();
        debug!(%submitted_at, "prompt submitted");
        Ok(submitted_at)
    }

    /// Start a fresh conversation via the platform's new-chat control.
    #[instrument(skip(self, regions))]
    pub async fn new_chat(&self, regions: &RegionSet) -> Result<(), AutomationError> {
        let _guard = self.gate.acquire().await;
        let target = regions.get(ElementKind::NewChatButton).center();
        self.input
            .click(target.x, target.y)
            .map_err(|e| AutomationError::InteractionFailed(format!("new chat: {e}")))?;
        self.pause().await;
        Ok(())
    }
}
