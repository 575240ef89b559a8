//! The automation controller: one sequential state machine per platform,
//! many platforms per session.
//!
//! Every platform advances `Idle, Locating, Detecting, RateCheck, Submitting,
//! AwaitingResponse, Extracting, Classifying` and loops back to `Idle`. It
//! backs off on throttling and moves to `Aborted` after repeated platform
//! errors or exhausted retry budgets. Failures are contained per platform:
//! siblings in a multi-agent session never see them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::classifier::{Classification, ErrorClassifier};
use crate::detector::ElementDetector;
use crate::driver::{InputGate, InteractionDriver, RegionSet};
use crate::errors::AutomationError;
use crate::extractor::{ResponseExtractor, SettleConfig};
use crate::profile::{ElementKind, ExtractionConfig, PlatformProfile};
use crate::providers::{
    InputInjector, ScreenCapture, StructuralExtractor, TextRecognizer, WindowBackend, WindowInfo,
};
use crate::quota::{Admission, QuotaTracker};
use crate::types::{InteractionOutcome, InteractionRecord, InteractionStatus, QuotaSnapshot, Session};
use crate::window::WindowLocator;

/// Consecutive `PlatformError` classifications before a platform is excluded
/// from the remainder of the session.
const MAX_CONSECUTIVE_PLATFORM_ERRORS: u32 = 3;

/// Fresh-capture retries granted to element detection per interaction.
const MAX_DETECTION_RETRIES: u32 = 3;

/// States of one platform's automation machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomationState {
    Idle,
    Locating,
    Detecting,
    RateCheck,
    Submitting,
    AwaitingResponse,
    Extracting,
    Classifying,
    Backoff,
    Aborted,
}

impl std::fmt::Display for AutomationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AutomationState::Idle => "idle",
            AutomationState::Locating => "locating",
            AutomationState::Detecting => "detecting",
            AutomationState::RateCheck => "rate_check",
            AutomationState::Submitting => "submitting",
            AutomationState::AwaitingResponse => "awaiting_response",
            AutomationState::Extracting => "extracting",
            AutomationState::Classifying => "classifying",
            AutomationState::Backoff => "backoff",
            AutomationState::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// The capability providers a controller drives.
#[derive(Clone)]
pub struct ProviderSet {
    pub windows: Arc<dyn WindowBackend>,
    pub capture: Arc<dyn ScreenCapture>,
    pub input: Arc<dyn InputInjector>,
    pub recognizer: Arc<dyn TextRecognizer>,
    pub structural: Option<Arc<dyn StructuralExtractor>>,
}

/// Rough token estimate for quota bookkeeping; whitespace-separated words.
fn estimate_tokens(prompt: &str) -> u64 {
    prompt.split_whitespace().count() as u64
}

/// One platform's sequential state machine. Owns the platform's quota state;
/// shares the global input gate with every other platform.
struct PlatformRunner {
    profile: Arc<PlatformProfile>,
    state: AutomationState,
    quota: QuotaTracker,
    locator: WindowLocator,
    detector: ElementDetector,
    driver: InteractionDriver,
    extractor: ResponseExtractor,
    classifier: ErrorClassifier,
    capture: Arc<dyn ScreenCapture>,
    gate: InputGate,
    abort: watch::Receiver<bool>,
    window: Option<WindowInfo>,
    regions: Option<RegionSet>,
    extraction_cache: Option<ExtractionConfig>,
    consecutive_platform_errors: u32,
    aborted: bool,
}

impl PlatformRunner {
    fn new(
        profile: Arc<PlatformProfile>,
        providers: &ProviderSet,
        gate: InputGate,
        settle: SettleConfig,
        abort: watch::Receiver<bool>,
    ) -> Result<Self, AutomationError> {
        profile.validate()?;
        let quota = QuotaTracker::new(profile.limits.clone(), Local::now())?;
        let classifier = ErrorClassifier::new(profile.error_detection.patterns.clone());
        let mut extractor = ResponseExtractor::new(
            providers.capture.clone(),
            providers.recognizer.clone(),
            gate.clone(),
        )
        .with_settle(settle);
        if let Some(structural) = &providers.structural {
            extractor = extractor.with_structural(structural.clone());
        }
        Ok(Self {
            extraction_cache: profile.extraction_config.clone(),
            profile,
            state: AutomationState::Idle,
            quota,
            locator: WindowLocator::new(providers.windows.clone(), gate.clone()),
            detector: ElementDetector::default(),
            driver: InteractionDriver::new(providers.input.clone(), gate.clone()),
            extractor,
            classifier,
            capture: providers.capture.clone(),
            gate,
            abort,
            window: None,
            regions: None,
            consecutive_platform_errors: 0,
            aborted: false,
        })
    }

    fn check_abort(&self) -> Result<(), AutomationError> {
        if *self.abort.borrow() {
            Err(AutomationError::Cancelled(format!(
                "operator abort during {}",
                self.state
            )))
        } else {
            Ok(())
        }
    }

    /// Sleep that wakes early on operator abort.
    async fn wait(&mut self, duration: Duration) -> Result<(), AutomationError> {
        if duration.is_zero() {
            return self.check_abort();
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.check_abort(),
            _ = self.abort.changed() => Err(AutomationError::Cancelled(format!(
                "operator abort during {}", self.state
            ))),
        }
    }

    fn transition(&mut self, next: AutomationState) -> Result<(), AutomationError> {
        self.check_abort()?;
        debug!(platform = %self.profile.name, from = %self.state, to = %next, "state transition");
        self.state = next;
        Ok(())
    }

    fn abort_platform(&mut self, reason: &str) {
        warn!(platform = %self.profile.name, reason, "platform aborted");
        self.state = AutomationState::Aborted;
        self.aborted = true;
    }

    async fn locate_window(&mut self) -> Result<(), AutomationError> {
        self.transition(AutomationState::Locating)?;
        let window = self.locator.locate(&self.profile).await?;
        self.window = Some(window);
        Ok(())
    }

    /// Detect all four interface elements, retrying with fresh captures.
    async fn detect_regions(&mut self) -> Result<(), AutomationError> {
        self.transition(AutomationState::Detecting)?;
        let mut last_err = None;
        for attempt in 0..MAX_DETECTION_RETRIES {
            self.check_abort()?;
            match self.detect_once().await {
                Ok(regions) => {
                    self.regions = Some(regions);
                    return Ok(());
                }
                Err(e @ AutomationError::ElementNotFound(_)) => {
                    debug!(attempt, "detection retry: {e}");
                    last_err = Some(e);
                    self.wait(Duration::from_millis(300)).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            AutomationError::ElementNotFound("detection retries exhausted".to_string())
        }))
    }

    async fn detect_once(&mut self) -> Result<RegionSet, AutomationError> {
        // captures share the real screen with input simulation, so they are
        // gated like everything else
        let capture = {
            let _guard = self.gate.acquire().await;
            self.capture.capture_screen()?
        };
        let mut regions = BTreeMap::new();
        for kind in ElementKind::ALL {
            let spec = self.profile.element(kind);
            let calibrated = self.profile.calibrated(kind);
            let region =
                self.detector
                    .detect(&capture, kind, &spec.detection, calibrated)?;
            regions.insert(kind, region);
        }
        RegionSet::new(regions)
    }

    /// Block (cancellably) until the rate limiter admits a submission.
    async fn rate_check(&mut self) -> Result<(), AutomationError> {
        loop {
            self.transition(AutomationState::RateCheck)?;
            match self.quota.admit(Local::now()) {
                Admission::Allow => return Ok(()),
                Admission::Wait(duration) => {
                    info!(platform = %self.profile.name, ?duration, "rate limiter wait");
                    self.wait(duration).await?;
                }
            }
        }
    }

    /// Drive one full interaction. Never panics across platforms; all
    /// failures collapse into the returned outcome's status.
    async fn run_interaction(&mut self, prompt: &str) -> InteractionOutcome {
        if self.aborted {
            return outcome("", InteractionStatus::Aborted);
        }
        match self.interaction_cycle(prompt).await {
            Ok(outcome) => outcome,
            Err(AutomationError::Cancelled(_)) => {
                self.abort_platform("operator abort");
                outcome("", InteractionStatus::Aborted)
            }
            Err(e @ (AutomationError::WindowNotFound(_) | AutomationError::ElementNotFound(_))) => {
                self.abort_platform(&e.to_string());
                outcome(&e.to_string(), InteractionStatus::Aborted)
            }
            Err(e) => {
                warn!(platform = %self.profile.name, "interaction failed: {e}");
                outcome(&e.to_string(), InteractionStatus::Error)
            }
        }
    }

    /// Click the platform's new-chat control, locating the window and
    /// elements first when needed.
    async fn new_conversation(&mut self) -> Result<(), AutomationError> {
        if self.aborted {
            return Err(AutomationError::Cancelled(format!(
                "platform '{}' is aborted",
                self.profile.name
            )));
        }
        if self.window.is_none() {
            self.locate_window().await?;
        }
        self.detect_regions().await?;
        let regions = self
            .regions
            .clone()
            .ok_or_else(|| AutomationError::Internal("regions not detected".to_string()))?;
        self.driver.new_chat(&regions).await?;
        self.transition(AutomationState::Idle)
    }

    async fn interaction_cycle(
        &mut self,
        prompt: &str,
    ) -> Result<InteractionOutcome, AutomationError> {
        let budget = self.profile.limits.tokens_per_prompt as u64;
        if estimate_tokens(prompt) > budget {
            return Err(AutomationError::InvalidArgument(format!(
                "prompt exceeds the platform's budget of {budget} tokens"
            )));
        }

        if self.window.is_none() {
            self.locate_window().await?;
        }
        self.detect_regions().await?;

        let mut backed_off = false;
        loop {
            self.rate_check().await?;

            self.transition(AutomationState::Submitting)?;
            let regions = self
                .regions
                .clone()
                .ok_or_else(|| AutomationError::Internal("regions not detected".to_string()))?;
            let submitted_at = match self.driver.send_prompt(&regions, prompt).await {
                Ok(at) => at,
                Err(AutomationError::InteractionFailed(first)) => {
                    // one retry for the whole interaction, then report upward
                    debug!(platform = %self.profile.name, "retrying interaction: {first}");
                    self.detect_regions().await?;
                    self.rate_check().await?;
                    let fresh = self.regions.clone().ok_or_else(|| {
                        AutomationError::Internal("regions not detected".to_string())
                    })?;
                    self.driver.send_prompt(&fresh, prompt).await?
                }
                Err(e) => return Err(e),
            };
            self.quota
                .record_submission(submitted_at, estimate_tokens(prompt));

            self.transition(AutomationState::AwaitingResponse)?;
            self.transition(AutomationState::Extracting)?;
            let response_region = regions.get(ElementKind::ResponseArea);
            let extraction = self
                .extractor
                .extract(&response_region, self.extraction_cache.as_ref())
                .await?;
            self.extraction_cache = Some(extraction.cache.clone());

            self.transition(AutomationState::Classifying)?;
            match self.classifier.classify(&extraction.text) {
                Classification::Ok => {
                    self.consecutive_platform_errors = 0;
                    self.transition(AutomationState::Idle)?;
                    let status = if extraction.truncated {
                        InteractionStatus::Truncated
                    } else {
                        InteractionStatus::Ok
                    };
                    return Ok(outcome(&extraction.text, status));
                }
                Classification::RateLimited { pattern } => {
                    info!(platform = %self.profile.name, %pattern, "platform is throttling");
                    if backed_off {
                        self.transition(AutomationState::Idle)?;
                        return Ok(outcome(&extraction.text, InteractionStatus::RateLimited));
                    }
                    backed_off = true;
                    self.transition(AutomationState::Backoff)?;
                    self.wait(self.profile.limits.cooldown()).await?;
                    // back to RateCheck for one resubmission
                }
                Classification::PlatformError { pattern } => {
                    self.consecutive_platform_errors += 1;
                    warn!(
                        platform = %self.profile.name,
                        %pattern,
                        count = self.consecutive_platform_errors,
                        "platform error detected"
                    );
                    if self.consecutive_platform_errors >= MAX_CONSECUTIVE_PLATFORM_ERRORS {
                        self.abort_platform("repeated platform errors");
                        return Ok(outcome(&extraction.text, InteractionStatus::Aborted));
                    }
                    self.transition(AutomationState::Idle)?;
                    return Ok(outcome(&extraction.text, InteractionStatus::Error));
                }
            }
        }
    }
}

fn outcome(text: &str, status: InteractionStatus) -> InteractionOutcome {
    InteractionOutcome {
        response_text: text.to_string(),
        status,
        timestamp: Local::now(),
    }
}

/// Orchestrates per-platform state machines for a multi-agent session.
///
/// Platforms run concurrently; within one platform interactions are strictly
/// sequential, and all real input/capture serializes on the shared
/// [`InputGate`]. The session log is append-only.
pub struct AutomationController {
    runners: BTreeMap<String, Arc<Mutex<PlatformRunner>>>,
    session: Arc<Mutex<Session>>,
    abort_tx: watch::Sender<bool>,
    gate: InputGate,
}

impl AutomationController {
    pub fn new(
        profiles: Vec<Arc<PlatformProfile>>,
        providers: ProviderSet,
    ) -> Result<Self, AutomationError> {
        Self::with_settle(profiles, providers, SettleConfig::default())
    }

    pub fn with_settle(
        profiles: Vec<Arc<PlatformProfile>>,
        providers: ProviderSet,
        settle: SettleConfig,
    ) -> Result<Self, AutomationError> {
        let (abort_tx, abort_rx) = watch::channel(false);
        let gate = InputGate::new();
        let mut runners = BTreeMap::new();
        for profile in profiles {
            let runner = PlatformRunner::new(
                profile.clone(),
                &providers,
                gate.clone(),
                settle,
                abort_rx.clone(),
            )?;
            runners.insert(profile.name.clone(), Arc::new(Mutex::new(runner)));
        }
        info!(platforms = runners.len(), "automation controller ready");
        Ok(Self {
            runners,
            session: Arc::new(Mutex::new(Session::new())),
            abort_tx,
            gate,
        })
    }

    /// The global input gate, for callers that need to interleave their own
    /// input simulation with a running session.
    pub fn input_gate(&self) -> InputGate {
        self.gate.clone()
    }

    fn runner(&self, platform: &str) -> Result<Arc<Mutex<PlatformRunner>>, AutomationError> {
        self.runners.get(platform).cloned().ok_or_else(|| {
            AutomationError::InvalidArgument(format!("unknown platform '{platform}'"))
        })
    }

    /// Run one prompt against one platform and record the outcome.
    #[instrument(skip(self, prompt))]
    pub async fn run_interaction(
        &self,
        platform: &str,
        prompt: &str,
    ) -> Result<InteractionOutcome, AutomationError> {
        let runner = self.runner(platform)?;
        // the per-runner mutex keeps interactions strictly sequential within
        // one platform while siblings proceed
        let outcome = {
            let mut runner = runner.lock().await;
            runner.run_interaction(prompt).await
        };
        self.session.lock().await.append(InteractionRecord {
            id: Uuid::new_v4(),
            platform: platform.to_string(),
            prompt: prompt.to_string(),
            response: outcome.response_text.clone(),
            timestamp: outcome.timestamp,
            status: outcome.status,
        });
        Ok(outcome)
    }

    /// Fan one prompt out to every platform concurrently and collect each
    /// platform's outcome. A failing platform never disturbs its siblings.
    #[instrument(skip(self, prompt))]
    pub async fn brainstorm(&self, prompt: &str) -> BTreeMap<String, InteractionOutcome> {
        let names: Vec<String> = self.runners.keys().cloned().collect();
        let tasks = names.iter().map(|name| self.run_interaction(name, prompt));
        let results = futures::future::join_all(tasks).await;
        names
            .into_iter()
            .zip(results)
            .map(|(name, result)| {
                let outcome = result.unwrap_or_else(|e| {
                    outcome(&e.to_string(), InteractionStatus::Error)
                });
                (name, outcome)
            })
            .collect()
    }

    /// Start a fresh conversation on `platform`, e.g. between brainstorm
    /// rounds.
    #[instrument(skip(self))]
    pub async fn new_conversation(&self, platform: &str) -> Result<(), AutomationError> {
        let runner = self.runner(platform)?;
        let mut runner = runner.lock().await;
        runner.new_conversation().await
    }

    /// The platform's current extraction cache, for persisting back into its
    /// profile via [`crate::profile::ProfileStore`].
    pub async fn extraction_cache(
        &self,
        platform: &str,
    ) -> Result<Option<ExtractionConfig>, AutomationError> {
        let runner = self.runner(platform)?;
        let runner = runner.lock().await;
        Ok(runner.extraction_cache.clone())
    }

    /// Quota position for a dashboard or CLI layer.
    pub async fn quota_state(&self, platform: &str) -> Result<QuotaSnapshot, AutomationError> {
        let runner = self.runner(platform)?;
        let mut runner = runner.lock().await;
        Ok(runner.quota.snapshot(Local::now()))
    }

    /// Whether a platform has been excluded from the remainder of the run.
    pub async fn is_aborted(&self, platform: &str) -> Result<bool, AutomationError> {
        let runner = self.runner(platform)?;
        let runner = runner.lock().await;
        Ok(runner.aborted)
    }

    /// Operator abort: observed at every suspension point and state
    /// transition; affected machines move to `Aborted` without completing
    /// in-flight work.
    pub fn abort(&self) {
        info!("operator abort signalled");
        let _ = self.abort_tx.send(true);
    }

    /// Snapshot of the append-only session log.
    pub async fn session_log(&self) -> Vec<InteractionRecord> {
        self.session.lock().await.entries().to_vec()
    }
}
