use std::sync::Arc;
use std::time::Duration;

use crate::controller::{AutomationController, ProviderSet};
use crate::errors::AutomationError;
use crate::extractor::SettleConfig;
use crate::tests::{
    calibrated_profile, gradient_image, window, MockCapture, MockInput, MockRecognizer,
    MockWindows,
};
use crate::types::InteractionStatus;

fn fast_settle() -> SettleConfig {
    SettleConfig {
        initial_delay: Duration::from_millis(1),
        check_interval: Duration::from_millis(1),
        max_extra_cycles: 2,
    }
}

struct Harness {
    controller: Arc<AutomationController>,
    input: Arc<MockInput>,
    capture: Arc<MockCapture>,
}

/// A controller over fully mocked providers: one chrome window, a gradient
/// screen that satisfies every calibrated position, and a scripted recognizer.
fn harness(platforms: Vec<(&str, Vec<&str>)>, responses: Vec<&str>) -> Harness {
    let profiles = platforms
        .into_iter()
        .map(|(name, patterns)| calibrated_profile(name, patterns))
        .collect();
    harness_with_profiles(profiles, responses)
}

fn harness_with_profiles(
    profiles: Vec<crate::profile::PlatformProfile>,
    responses: Vec<&str>,
) -> Harness {
    let input = Arc::new(MockInput::new());
    let capture = Arc::new(MockCapture::single(gradient_image(300, 200)));
    let providers = ProviderSet {
        windows: Arc::new(MockWindows::new(vec![window(
            1,
            "AI Chat - Google Chrome",
            "chrome",
        )])),
        capture: capture.clone(),
        input: input.clone(),
        recognizer: Arc::new(MockRecognizer::new(responses)),
        structural: None,
    };
    let profiles = profiles.into_iter().map(Arc::new).collect();
    let controller = AutomationController::with_settle(profiles, providers, fast_settle()).unwrap();
    Harness {
        controller: Arc::new(controller),
        input,
        capture,
    }
}

#[tokio::test(start_paused = true)]
async fn successful_interaction_is_recorded() {
    let h = harness(vec![("alpha", vec![])], vec!["Here is an idea."]);

    let outcome = h.controller.run_interaction("alpha", "brainstorm openers").await.unwrap();
    assert_eq!(outcome.status, InteractionStatus::Ok);
    assert_eq!(outcome.response_text, "Here is an idea.");

    let log = h.controller.session_log().await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].platform, "alpha");
    assert_eq!(log[0].prompt, "brainstorm openers");
    assert_eq!(log[0].status, InteractionStatus::Ok);
}

#[tokio::test(start_paused = true)]
async fn repeated_platform_errors_abort_only_that_platform() {
    let h = harness(
        vec![("alpha", vec!["service is down"]), ("beta", vec![])],
        vec!["The service is down right now."],
    );

    // two strikes leave alpha running
    for _ in 0..2 {
        let outcome = h.controller.run_interaction("alpha", "hi").await.unwrap();
        assert_eq!(outcome.status, InteractionStatus::Error);
    }
    assert!(!h.controller.is_aborted("alpha").await.unwrap());

    // the third aborts it for the rest of the session
    let outcome = h.controller.run_interaction("alpha", "hi").await.unwrap();
    assert_eq!(outcome.status, InteractionStatus::Aborted);
    assert!(h.controller.is_aborted("alpha").await.unwrap());

    let outcome = h.controller.run_interaction("alpha", "hi").await.unwrap();
    assert_eq!(outcome.status, InteractionStatus::Aborted);

    // beta has no error patterns and keeps going
    let outcome = h.controller.run_interaction("beta", "hi").await.unwrap();
    assert_eq!(outcome.status, InteractionStatus::Ok);
    assert!(!h.controller.is_aborted("beta").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn throttling_response_backs_off_and_resubmits_once() {
    let h = harness(
        vec![("alpha", vec!["rate limit"])],
        vec!["Rate limit reached, slow down."],
    );

    let outcome = h.controller.run_interaction("alpha", "hi").await.unwrap();
    assert_eq!(outcome.status, InteractionStatus::RateLimited);

    // exactly two submissions: the original and the one post-backoff retry
    let typed = h
        .input
        .recorded()
        .iter()
        .filter(|op| op.starts_with("type("))
        .count();
    assert_eq!(typed, 2);
}

#[tokio::test(start_paused = true)]
async fn operator_abort_stops_pending_interactions() {
    let h = harness(vec![("alpha", vec![])], vec!["unused"]);

    h.controller.abort();
    let outcome = h.controller.run_interaction("alpha", "hi").await.unwrap();
    assert_eq!(outcome.status, InteractionStatus::Aborted);
    assert!(h.controller.is_aborted("alpha").await.unwrap());

    // nothing was typed into any window
    assert!(h.input.recorded().is_empty());
}

#[tokio::test(start_paused = true)]
async fn brainstorm_fans_out_to_every_platform() {
    let h = harness(
        vec![("alpha", vec![]), ("beta", vec![])],
        vec!["A perfectly fine answer."],
    );

    let outcomes = h.controller.brainstorm("one prompt for all").await;
    assert_eq!(outcomes.len(), 2);
    for (platform, outcome) in &outcomes {
        assert_eq!(
            outcome.status,
            InteractionStatus::Ok,
            "platform {platform} failed"
        );
    }

    let log = h.controller.session_log().await;
    assert_eq!(log.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn oversized_prompt_is_rejected_before_any_input() {
    let h = harness(vec![("alpha", vec![])], vec!["unused"]);

    let long_prompt = "word ".repeat(5000);
    let outcome = h.controller.run_interaction("alpha", &long_prompt).await.unwrap();
    assert_eq!(outcome.status, InteractionStatus::Error);
    assert!(h.input.recorded().is_empty());
}

#[tokio::test(start_paused = true)]
async fn quota_state_tracks_submissions() {
    let h = harness(vec![("alpha", vec![])], vec!["ok then"]);

    let before = h.controller.quota_state("alpha").await.unwrap();
    assert_eq!(before.remaining_today, 100);

    h.controller.run_interaction("alpha", "hi").await.unwrap();
    let after = h.controller.quota_state("alpha").await.unwrap();
    assert_eq!(after.remaining_today, 99);
}

#[tokio::test(start_paused = true)]
async fn failing_interaction_is_retried_once_then_reported() {
    let h = harness(vec![("alpha", vec![])], vec!["unused"]);
    h.input.fail_on("type(");

    let outcome = h.controller.run_interaction("alpha", "hi").await.unwrap();
    assert_eq!(outcome.status, InteractionStatus::Error);
    // one retry only, and the failure does not take the platform down
    let attempts = h
        .input
        .recorded()
        .iter()
        .filter(|op| op.starts_with("chord("))
        .count();
    assert_eq!(attempts, 2);
    assert!(!h.controller.is_aborted("alpha").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn transient_input_failure_recovers_on_the_retry() {
    let h = harness(vec![("alpha", vec![])], vec!["all good"]);
    h.input.fail_once("type(");

    let outcome = h.controller.run_interaction("alpha", "hi").await.unwrap();
    assert_eq!(outcome.status, InteractionStatus::Ok);

    let ops = h.input.recorded();
    // two attempts but only the second typing landed and submitted
    assert_eq!(ops.iter().filter(|op| op.starts_with("chord(")).count(), 2);
    assert_eq!(ops.iter().filter(|op| op.starts_with("type(")).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn held_input_gate_blocks_capture_and_input() {
    let h = harness(vec![("alpha", vec![])], vec!["gated answer"]);

    let gate = h.controller.input_gate();
    let guard = gate.acquire().await;

    let controller = h.controller.clone();
    let running =
        tokio::spawn(async move { controller.run_interaction("alpha", "hi").await });

    // let the interaction run until it parks on the gate
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.capture.captures(), 0);
    assert!(h.input.recorded().is_empty());

    drop(guard);
    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.status, InteractionStatus::Ok);
    assert!(h.capture.captures() > 0);
}

#[tokio::test(start_paused = true)]
async fn abort_interrupts_a_waiting_interaction() {
    let mut profile = calibrated_profile("alpha", vec![]);
    profile.limits.cooldown_period = 30.0;
    let h = harness_with_profiles(vec![profile], vec!["first answer"]);

    let outcome = h.controller.run_interaction("alpha", "hi").await.unwrap();
    assert_eq!(outcome.status, InteractionStatus::Ok);

    // the second interaction parks in the cooldown wait; abort wakes it
    let controller = h.controller.clone();
    let running =
        tokio::spawn(async move { controller.run_interaction("alpha", "again").await });
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    h.controller.abort();

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.status, InteractionStatus::Aborted);
    assert!(h.controller.is_aborted("alpha").await.unwrap());

    // only the first interaction ever reached the keyboard
    let typed = h
        .input
        .recorded()
        .iter()
        .filter(|op| op.starts_with("type("))
        .count();
    assert_eq!(typed, 1);
}

#[tokio::test(start_paused = true)]
async fn new_conversation_clicks_the_new_chat_control() {
    let h = harness(vec![("alpha", vec![])], vec!["unused"]);

    h.controller.new_conversation("alpha").await.unwrap();
    // calibrated new-chat region is (10, 130, 100, 30), center (60, 145)
    assert_eq!(h.input.recorded(), vec!["click(60,145)".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn extraction_cache_is_populated_after_an_interaction() {
    let h = harness(vec![("alpha", vec![])], vec!["cached away"]);

    assert!(h.controller.extraction_cache("alpha").await.unwrap().is_none());
    h.controller.run_interaction("alpha", "hi").await.unwrap();

    let cache = h.controller.extraction_cache("alpha").await.unwrap().unwrap();
    assert_eq!(cache.sample.as_deref(), Some("cached away"));
    assert!(!cache.fingerprint.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unknown_platform_is_an_error() {
    let h = harness(vec![("alpha", vec![])], vec!["unused"]);
    let err = h.controller.run_interaction("nope", "hi").await.unwrap_err();
    assert!(matches!(err, AutomationError::InvalidArgument(_)), "{err}");
}
