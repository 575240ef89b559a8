use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::driver::InputGate;
use crate::extractor::{clean_response_text, structure_fingerprint, ResponseExtractor, SettleConfig};
use crate::profile::{ExtractionConfig, ExtractionMethod};
use crate::providers::NullRecognizer;
use crate::tests::{
    capture_at_origin, gradient_image, solid_image, MockCapture, MockRecognizer, MockStructural,
};
use crate::types::Region;

fn fast_settle() -> SettleConfig {
    SettleConfig {
        initial_delay: Duration::from_millis(1),
        check_interval: Duration::from_millis(1),
        max_extra_cycles: 2,
    }
}

fn region() -> Region {
    Region::new(10, 10, 100, 50)
}

#[tokio::test(start_paused = true)]
async fn extracts_once_the_region_settles() {
    let frame = gradient_image(200, 100);
    let capture = Arc::new(MockCapture::new(vec![frame.clone(), frame]));
    let recognizer = Arc::new(MockRecognizer::new(vec!["The answer is 42."]));
    let extractor = ResponseExtractor::new(capture, recognizer, InputGate::new())
        .with_settle(fast_settle());

    let extraction = extractor.extract(&region(), None).await.unwrap();
    assert_eq!(extraction.text, "The answer is 42.");
    assert!(!extraction.truncated);
    assert_eq!(extraction.cache.method, ExtractionMethod::Recognition);
    assert_eq!(extraction.cache.sample.as_deref(), Some("The answer is 42."));
}

#[tokio::test(start_paused = true)]
async fn still_changing_content_is_flagged_truncated() {
    let a = solid_image(200, 100, [10, 10, 10, 255]);
    let b = gradient_image(200, 100);
    // the region never stabilizes within the two-cycle budget
    let capture = Arc::new(MockCapture::new(vec![a.clone(), b.clone(), a, b]));
    let recognizer = Arc::new(MockRecognizer::new(vec!["partial answ"]));
    let extractor = ResponseExtractor::new(capture, recognizer, InputGate::new())
        .with_settle(fast_settle());

    let extraction = extractor.extract(&region(), None).await.unwrap();
    assert!(extraction.truncated);
    assert_eq!(extraction.text, "partial answ");
}

#[tokio::test(start_paused = true)]
async fn matching_fingerprint_reuses_the_structural_path() {
    let frame = gradient_image(200, 100);
    let settled = capture_at_origin(frame.clone())
        .crop(&region())
        .unwrap();
    let cache = ExtractionConfig {
        method: ExtractionMethod::Structural,
        fingerprint: structure_fingerprint(&settled),
        sample: None,
        configured_at: Utc::now(),
    };

    let capture = Arc::new(MockCapture::single(frame));
    let structural = Arc::new(MockStructural::new("structured text"));
    // a recognizer that errors on use proves the structural path was taken
    let extractor = ResponseExtractor::new(capture, Arc::new(NullRecognizer), InputGate::new())
        .with_structural(structural.clone())
        .with_settle(fast_settle());

    let extraction = extractor.extract(&region(), Some(&cache)).await.unwrap();
    assert_eq!(extraction.text, "structured text");
    assert_eq!(extraction.cache.method, ExtractionMethod::Structural);
    assert_eq!(structural.calls.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn changed_fingerprint_falls_back_to_recognition() {
    let cache = ExtractionConfig {
        method: ExtractionMethod::Structural,
        fingerprint: "0000000000000000".to_string(),
        sample: None,
        configured_at: Utc::now(),
    };

    let capture = Arc::new(MockCapture::single(gradient_image(200, 100)));
    let structural = Arc::new(MockStructural::new("stale structure"));
    let recognizer = Arc::new(MockRecognizer::new(vec!["fresh recognition"]));
    let extractor = ResponseExtractor::new(capture, recognizer, InputGate::new())
        .with_structural(structural.clone())
        .with_settle(fast_settle());

    let extraction = extractor.extract(&region(), Some(&cache)).await.unwrap();
    assert_eq!(extraction.text, "fresh recognition");
    assert_eq!(extraction.cache.method, ExtractionMethod::Recognition);
    assert_eq!(structural.calls.load(std::sync::atomic::Ordering::Relaxed), 0);
}

#[tokio::test(start_paused = true)]
async fn structural_failure_degrades_to_recognition() {
    let frame = gradient_image(200, 100);
    let settled = capture_at_origin(frame.clone())
        .crop(&region())
        .unwrap();
    let cache = ExtractionConfig {
        method: ExtractionMethod::Structural,
        fingerprint: structure_fingerprint(&settled),
        sample: None,
        configured_at: Utc::now(),
    };

    let capture = Arc::new(MockCapture::single(frame));
    let mut structural = MockStructural::new("never seen");
    structural.fail = true;
    let recognizer = Arc::new(MockRecognizer::new(vec!["recognized instead"]));
    let extractor = ResponseExtractor::new(capture, recognizer, InputGate::new())
        .with_structural(Arc::new(structural))
        .with_settle(fast_settle());

    let extraction = extractor.extract(&region(), Some(&cache)).await.unwrap();
    assert_eq!(extraction.text, "recognized instead");
    assert_eq!(extraction.cache.method, ExtractionMethod::Recognition);
}

#[test]
fn fingerprint_is_stable_for_identical_pixels() {
    let a = capture_at_origin(gradient_image(120, 80));
    let b = capture_at_origin(gradient_image(120, 80));
    assert_eq!(structure_fingerprint(&a), structure_fingerprint(&b));
}

#[test]
fn fingerprint_changes_when_the_layout_changes() {
    let a = capture_at_origin(gradient_image(120, 80));
    let b = capture_at_origin(solid_image(120, 80, [240, 240, 240, 255]));
    assert_ne!(structure_fingerprint(&a), structure_fingerprint(&b));
}

#[test]
fn cleaning_strips_markup_and_collapses_whitespace() {
    let raw = "<div>Hello **world**</div>\n\n```rust\nfn main() {}\n```\nDone &amp; dusted.";
    assert_eq!(clean_response_text(raw), "Hello world Done & dusted.");
}

#[test]
fn cleaning_handles_plain_text_unchanged() {
    assert_eq!(clean_response_text("already clean"), "already clean");
}
