//! Integration tests for the sandbox core: validation, error recovery,
//! browser mediation, file capture, isolation and timeout behavior, all
//! against the in-memory automation engine.

use std::time::{Duration, Instant};

use playpen_common::{ExecutionRequest, ExecutionResponse, LogMode};
use playpen_sandbox::{BrowserKind, ResourceLimits};

use playpen_tests::common::{fast_limits, setup_test_logging, test_service, FakeEngine};

fn success(resp: ExecutionResponse) -> playpen_common::SuccessExecutionResponse {
    match resp {
        ExecutionResponse::Success(success) => success,
        ExecutionResponse::Error(err) => panic!("expected success, got error: {}", err.error),
    }
}

fn failure(resp: ExecutionResponse) -> playpen_common::ErroredExecutionResponse {
    match resp {
        ExecutionResponse::Error(err) => err,
        ExecutionResponse::Success(_) => panic!("expected error response"),
    }
}

#[tokio::test]
async fn empty_code_is_rejected_before_execution() {
    setup_test_logging();
    let engine = FakeEngine::new();
    let (service, _public) = test_service(engine.clone(), fast_limits());

    let started = Instant::now();
    let resp = service.execute(ExecutionRequest::new("   ")).await.unwrap();
    let err = failure(resp);

    assert_eq!(err.error, "no code specified");
    assert_eq!(engine.launch_count(), 0);
    // Fast path: no isolate, no timeout clock.
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn sync_throw_produces_well_formed_response() {
    setup_test_logging();
    let engine = FakeEngine::new();
    let (service, _public) = test_service(engine, fast_limits());

    let resp = service
        .execute(ExecutionRequest::new(
            "console.log('before'); throw new Error('kaboom');",
        ))
        .await
        .unwrap();
    let success = success(resp);

    assert_eq!(success.logs.len(), 2);
    assert_eq!(success.logs[0].args[0], "before");
    assert_eq!(success.logs[1].mode, LogMode::Error);
    assert!(success.logs[1].args.join(" ").contains("kaboom"));
}

#[tokio::test]
async fn unclosed_browser_is_force_closed_within_liveness_window() {
    setup_test_logging();
    let engine = FakeEngine::new();
    let limits = fast_limits().with_browser_liveness(Duration::from_millis(200));
    let (service, _public) = test_service(engine.clone(), limits);

    let code = r#"
const pw = require('playwright');
const browser = await pw.chromium.launch();
console.log('launched');
"#;
    let resp = service.execute(ExecutionRequest::new(code)).await.unwrap();
    assert!(resp.is_success());

    let browser = engine.browser(0);
    assert!(browser.connected());
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(!browser.connected());
}

#[tokio::test]
async fn attacker_chosen_path_never_becomes_the_public_location() {
    setup_test_logging();
    let engine = FakeEngine::new();
    let (service, _public) = test_service(engine, fast_limits());

    let code = r#"
const pw = require('playwright');
const browser = await pw.chromium.launch();
const page = await browser.newPage();
await page.screenshot({ path: '/etc/hostname' });
await browser.close();
"#;
    let success = success(service.execute(ExecutionRequest::new(code)).await.unwrap());

    assert_eq!(success.files.len(), 1);
    let file = &success.files[0];
    assert_eq!(file.file_name, "/etc/hostname");
    assert_ne!(file.public_url, "/etc/hostname");
    assert!(!file.public_url.starts_with("/etc"));
    assert!(file.public_url.starts_with("/public/"));
}

#[tokio::test]
async fn concurrent_identical_runs_do_not_share_files() {
    setup_test_logging();
    let engine = FakeEngine::new();
    let (service, _public) = test_service(engine, fast_limits());

    let code = r#"
const pw = require('playwright');
const browser = await pw.firefox.launch();
const page = await browser.newPage();
await page.screenshot({ path: 'shot.png' });
await browser.close();
"#;
    let (a, b) = tokio::join!(
        service.execute(ExecutionRequest::new(code)),
        service.execute(ExecutionRequest::new(code)),
    );
    let a = success(a.unwrap());
    let b = success(b.unwrap());

    assert_eq!(a.files.len(), 1);
    assert_eq!(b.files.len(), 1);
    assert_ne!(a.files[0].public_url, b.files[0].public_url);
}

#[tokio::test]
async fn never_resolving_script_times_out_within_the_deadline() {
    setup_test_logging();
    let engine = FakeEngine::new();
    let limits = ResourceLimits::strict().with_max_duration(Duration::from_secs(2));
    let (service, _public) = test_service(engine, limits);

    let started = Instant::now();
    let resp = service
        .execute(ExecutionRequest::new("await new Promise(() => {});"))
        .await
        .unwrap();
    let err = failure(resp);

    assert_eq!(err.error, "Execution timed out after 2 seconds");
    // Deadline plus a small epsilon, not indefinitely.
    assert!(started.elapsed() < Duration::from_secs(6));
}

#[tokio::test]
async fn timeout_force_closes_launched_browsers() {
    setup_test_logging();
    let engine = FakeEngine::new();
    let limits = ResourceLimits::strict().with_max_duration(Duration::from_secs(2));
    let (service, _public) = test_service(engine.clone(), limits);

    let code = r#"
const pw = require('playwright');
const browser = await pw.chromium.launch();
await new Promise(() => {});
"#;
    let resp = service.execute(ExecutionRequest::new(code)).await.unwrap();
    assert!(!resp.is_success());
    assert!(!engine.browser(0).connected());
}

#[tokio::test]
async fn console_arithmetic_end_to_end() {
    setup_test_logging();
    let engine = FakeEngine::new();
    let (service, _public) = test_service(engine, fast_limits());

    let success = success(
        service
            .execute(ExecutionRequest::new("console.log(1 + 1);"))
            .await
            .unwrap(),
    );
    assert_eq!(success.logs.len(), 1);
    assert_eq!(success.logs[0].args, vec!["2"]);
    assert!(success.files.is_empty());
    assert!(success.duration > 0);
    assert_eq!(success.version, "1.52.0");
}

#[tokio::test]
async fn screenshot_descriptor_has_bridge_assigned_location() {
    setup_test_logging();
    let engine = FakeEngine::new();
    let (service, _public) = test_service(engine.clone(), fast_limits());

    let code = r#"
const pw = require('playwright');
const browser = await pw.webkit.launch();
const page = await browser.newPage();
await page.goto('https://example.com');
await page.screenshot({ path: 'shot.png' });
await browser.close();
"#;
    let success = success(service.execute(ExecutionRequest::new(code)).await.unwrap());

    assert_eq!(success.files.len(), 1);
    assert_eq!(success.files[0].extension, ".png");
    assert_ne!(success.files[0].public_url, "shot.png");
    assert!(success.files[0].public_url.starts_with("/public/"));
    assert_eq!(
        engine.launches.lock().unwrap()[0].kind,
        BrowserKind::Webkit
    );
}

#[tokio::test]
async fn pdf_and_video_flow_through_the_capture_bridge() {
    setup_test_logging();
    let engine = FakeEngine::new();
    let (service, _public) = test_service(engine, fast_limits());

    let code = r#"
const pw = require('playwright');
const { saveVideo } = require('playwright-video');
const browser = await pw.chromium.launch();
const page = await browser.newPage();
const capture = await saveVideo(page, '/tmp/video.mp4');
await page.goto('https://example.com');
await capture.stop();
await page.pdf({ path: 'report.pdf' });
await browser.close();
"#;
    let success = success(service.execute(ExecutionRequest::new(code)).await.unwrap());

    let mut extensions: Vec<&str> = success
        .files
        .iter()
        .map(|f| f.extension.as_str())
        .collect();
    extensions.sort();
    assert_eq!(extensions, vec![".mp4", ".pdf"]);
    for file in &success.files {
        assert!(file.public_url.starts_with("/public/"));
    }
}

#[tokio::test]
async fn unknown_require_fails_with_no_partial_files() {
    setup_test_logging();
    let engine = FakeEngine::new();
    let (service, _public) = test_service(engine.clone(), fast_limits());

    let code = r#"
const pw = require('playwright');
const browser = await pw.chromium.launch();
const page = await browser.newPage();
await page.screenshot({ path: 'shot.png' });
require('not-a-real-package');
"#;
    let err = failure(service.execute(ExecutionRequest::new(code)).await.unwrap());

    assert_eq!(err.error, "Package not-a-real-package not recognized");
    // Failing runs report no files, and their browsers are closed.
    assert!(!engine.browser(0).connected());
}

#[tokio::test]
async fn chromium_launches_carry_the_sandbox_compensation_flag() {
    setup_test_logging();
    let engine = FakeEngine::new();
    let (service, _public) = test_service(engine.clone(), fast_limits());

    let code = r#"
const pw = require('playwright');
const browser = await pw.chromium.launch();
await browser.close();
"#;
    let resp = service.execute(ExecutionRequest::new(code)).await.unwrap();
    assert!(resp.is_success());

    let launches = engine.launches.lock().unwrap();
    assert!(launches[0]
        .options
        .args
        .contains(&"--no-sandbox".to_string()));
}
