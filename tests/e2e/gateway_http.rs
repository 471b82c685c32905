//! End-to-end tests for the gateway HTTP surface: status mapping, share
//! persistence, rate limiting and artifact serving, against a real axum
//! server backed by the in-memory automation engine.

use std::sync::Arc;
use std::time::Duration;

use playpen_gateway::routes::AppState;
use playpen_gateway::{create_router, ShareStore, TurnstileVerifier, WorkerPool};

use playpen_tests::common::{fast_limits, setup_test_logging, test_service, FakeEngine};

struct TestApp {
    base_url: String,
    engine: Arc<FakeEngine>,
    client: reqwest::Client,
    // Kept alive for the duration of the test.
    _public: tempfile::TempDir,
    _data: tempfile::TempDir,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn spawn_app(
    workers: usize,
    queue_depth: usize,
    turnstile: Option<Arc<TurnstileVerifier>>,
) -> TestApp {
    setup_test_logging();

    let engine = FakeEngine::new();
    let (service, public) = test_service(engine.clone(), fast_limits());
    let dispatcher: Arc<dyn playpen_gateway::Dispatcher> =
        Arc::new(WorkerPool::start(service, workers, queue_depth));

    let data = tempfile::tempdir().expect("data dir");
    let store = ShareStore::connect(data.path().join("shares.sqlite").to_str().unwrap())
        .await
        .expect("share store");

    let state = AppState {
        dispatcher,
        store: Arc::new(store),
        turnstile,
    };
    let app = create_router(state, public.path());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server");
    });

    TestApp {
        base_url: format!("http://{addr}"),
        engine,
        client: reqwest::Client::new(),
        _public: public,
        _data: data,
    }
}

#[tokio::test]
async fn health_endpoint_answers_ok() {
    let app = spawn_app(2, 8, None).await;
    let resp = app.client.get(app.url("/api/v1/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn successful_run_returns_structured_success() {
    let app = spawn_app(2, 8, None).await;
    let resp = app
        .client
        .post(app.url("/api/v1/run"))
        .json(&serde_json::json!({ "code": "console.log(1 + 1);" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["version"], "1.52.0");
    assert_eq!(body["logs"][0]["args"][0], "2");
    assert_eq!(body["files"], serde_json::json!([]));
    assert!(body["duration"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn user_error_maps_to_400_with_body() {
    let app = spawn_app(2, 8, None).await;
    let resp = app
        .client
        .post(app.url("/api/v1/run"))
        .json(&serde_json::json!({ "code": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "no code specified");
}

#[tokio::test]
async fn unsupported_language_is_rejected() {
    let app = spawn_app(2, 8, None).await;
    let resp = app
        .client
        .post(app.url("/api/v1/run"))
        .json(&serde_json::json!({ "code": "print(1)", "language": "python" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "language 'python' is not supported");
}

#[tokio::test]
async fn saturated_queue_returns_429() {
    // One worker, queue depth of one: the third concurrent request has
    // nowhere to go.
    let app = spawn_app(1, 1, None).await;
    let blocking = serde_json::json!({ "code": "await new Promise(() => {});" });

    let first = app
        .client
        .post(app.url("/api/v1/run"))
        .json(&blocking)
        .send();
    let first = tokio::spawn(first);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = app
        .client
        .post(app.url("/api/v1/run"))
        .json(&blocking)
        .send();
    let second = tokio::spawn(second);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let third = app
        .client
        .post(app.url("/api/v1/run"))
        .json(&blocking)
        .send()
        .await
        .unwrap();
    assert_eq!(third.status(), 429);

    // The queued requests eventually resolve as timeouts, not crashes.
    assert_eq!(first.await.unwrap().unwrap().status(), 400);
    assert_eq!(second.await.unwrap().unwrap().status(), 400);
}

#[tokio::test]
async fn captured_file_is_served_from_the_public_dir() {
    let app = spawn_app(2, 8, None).await;
    let code = r#"
const pw = require('playwright');
const browser = await pw.chromium.launch();
const page = await browser.newPage();
await page.screenshot({ path: 'shot.png' });
await browser.close();
"#;
    let resp = app
        .client
        .post(app.url("/api/v1/run"))
        .json(&serde_json::json!({ "code": code }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    let public_url = body["files"][0]["publicURL"].as_str().unwrap();
    assert!(public_url.starts_with("/public/"));
    assert!(public_url.ends_with(".png"));

    let artifact = app.client.get(app.url(public_url)).send().await.unwrap();
    assert_eq!(artifact.status(), 200);
    let bytes = artifact.bytes().await.unwrap();
    assert!(bytes.starts_with(b"\x89PNG"));
    assert_eq!(app.engine.launch_count(), 1);
}

#[tokio::test]
async fn share_roundtrip_and_not_found() {
    let app = spawn_app(2, 8, None).await;

    let created: serde_json::Value = app
        .client
        .post(app.url("/api/v1/share/create"))
        .json(&serde_json::json!({ "code": "console.log('shared');" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let key = created["key"].as_str().unwrap();
    assert_eq!(key.len(), 5);

    let fetched: serde_json::Value = app
        .client
        .get(app.url(&format!("/api/v1/share/get/{key}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["code"], "console.log('shared');");

    let missing = app
        .client
        .get(app.url("/api/v1/share/get/zzzzz"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn oversized_share_is_rejected() {
    let app = spawn_app(2, 8, None).await;
    let resp = app
        .client
        .post(app.url("/api/v1/share/create"))
        .json(&serde_json::json!({ "code": "x".repeat(2000) }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn turnstile_gates_run_requests() {
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let verification = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "success": true })),
        )
        .mount(&verification)
        .await;

    let verifier = Arc::new(
        TurnstileVerifier::new("secret".into())
            .with_endpoint(url::Url::parse(&verification.uri()).unwrap()),
    );
    let app = spawn_app(2, 8, Some(verifier)).await;

    // Missing token: rate-limited before any execution.
    let denied = app
        .client
        .post(app.url("/api/v1/run"))
        .json(&serde_json::json!({ "code": "console.log(1);" }))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 429);
    assert_eq!(app.engine.launch_count(), 0);

    // Verified token: request goes through.
    let allowed = app
        .client
        .post(app.url("/api/v1/run"))
        .header("x-turnstile-token", "tok")
        .json(&serde_json::json!({ "code": "console.log(1);" }))
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 200);
}
