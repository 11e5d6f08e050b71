//! Router-level integration tests: auth, rate limiting, validation,
//! idempotency, and status reads against an isolated app instance.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::RwLock;
use tower::ServiceExt; // for `oneshot`

use talentbox::api::state::AppState;
use talentbox::config::Config;
use talentbox::credits::CreditLedger;
use talentbox::model::{Plan, Tenant};
use talentbox::observability::Metrics;
use talentbox::orchestrator::Orchestrator;
use talentbox::queue::{JobBroker, JobQueue};
use talentbox::storage::ObjectStoreGateway;
use talentbox::store::MetadataStore;

struct TestApp {
    router: Router,
    store: MetadataStore,
    _receivers: Vec<tokio::sync::mpsc::Receiver<talentbox::queue::Delivery>>,
    _temp: TempDir,
}

/// Builds a test app with isolated stores and no workers: submitted jobs
/// stay leased so the API surface can be tested deterministically.
async fn build_test_app() -> TestApp {
    let temp = TempDir::new().expect("temp dir");
    let config = Arc::new(Config::default());

    let store = MetadataStore::open(temp.path().join("metadata")).expect("metadata store");
    let credits = CreditLedger::new(store.clone());

    // tenant t1 with a full starter allowance, t0 with nothing left
    credits
        .register_tenant(&Tenant::new("t1", "one@example.com", Plan::Starter))
        .await
        .unwrap();
    let mut broke = Tenant::new("t0", "zero@example.com", Plan::Starter);
    broke.credits_used_this_month = broke.base_credits;
    credits.register_tenant(&broke).await.unwrap();

    store.put_session("token-t1", "t1").unwrap();
    store.put_session("token-t0", "t0").unwrap();

    let storage = ObjectStoreGateway::in_memory();
    let queue = Arc::new(RwLock::new(
        JobQueue::open(temp.path().join("queue"), Duration::from_secs(60), 3).unwrap(),
    ));
    let (broker, receivers) = JobBroker::new(queue, 1, 32);
    let broker = Arc::new(broker);
    let metrics = Arc::new(Metrics::new());

    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        store.clone(),
        credits,
        storage,
        broker.clone(),
        metrics.clone(),
    ));

    let state = AppState::new(config, store.clone(), orchestrator, broker, metrics);
    TestApp {
        router: talentbox::api::build_router(state),
        store,
        _receivers: receivers,
        _temp: temp,
    }
}

fn pdf_bytes() -> Vec<u8> {
    let mut out = b"%PDF-1.4\n1 0 obj << /Type /Page >> endobj\n".to_vec();
    out.extend_from_slice(&[b' '; 256]);
    out.extend_from_slice(b"%%EOF");
    out
}

const BOUNDARY: &str = "talentbox-test-boundary";

fn multipart_body(file_name: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/pdf\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn submit_request(token: Option<&str>, file_name: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/upload/submit")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder
        .body(Body::from(multipart_body(file_name, &pdf_bytes())))
        .unwrap()
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_submit_accepts_valid_pdf() {
    let app = build_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(submit_request(Some("token-t1"), "resume.pdf"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    let job_id = body["job_id"].as_str().unwrap();
    assert!(body["candidate_id"].as_str().is_some());

    let job = app.store.get_job(job_id).unwrap().unwrap();
    assert_eq!(job.tenant_id, "t1");
    assert_eq!(job.file_name, "resume.pdf");
}

#[tokio::test]
async fn test_submit_requires_auth() {
    let app = build_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(submit_request(None, "resume.pdf"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .clone()
        .oneshot(submit_request(Some("bogus-token"), "resume.pdf"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_submit_rejects_dangerous_file_name() {
    let app = build_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(submit_request(Some("token-t1"), "resume.exe.pdf"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["code"], "FILE_VALIDATION");
}

#[tokio::test]
async fn test_submit_rejects_zero_credit_tenant() {
    let app = build_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(submit_request(Some("token-t0"), "resume.pdf"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = response_json(response).await;
    assert_eq!(body["code"], "INSUFFICIENT_CREDITS");
}

#[tokio::test]
async fn test_submit_idempotency_key_replays() {
    let app = build_test_app().await;
    let key = "11111111-2222-3333-4444-555555555555";

    let mut first = submit_request(Some("token-t1"), "resume.pdf");
    first
        .headers_mut()
        .insert("Idempotency-Key", key.parse().unwrap());
    let first = app.router.clone().oneshot(first).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first = response_json(first).await;

    let mut second = submit_request(Some("token-t1"), "resume.pdf");
    second
        .headers_mut()
        .insert("Idempotency-Key", key.parse().unwrap());
    let second = app.router.clone().oneshot(second).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second = response_json(second).await;

    assert_eq!(first["job_id"], second["job_id"]);
    assert_eq!(first["candidate_id"], second["candidate_id"]);
}

#[tokio::test]
async fn test_submit_rejects_malformed_idempotency_key() {
    let app = build_test_app().await;

    let mut request = submit_request(Some("token-t1"), "resume.pdf");
    request
        .headers_mut()
        .insert("Idempotency-Key", "not-a-uuid".parse().unwrap());

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_rate_limit() {
    let app = build_test_app().await;

    // the upload class allows 10/min per tenant
    for i in 0..10 {
        let response = app
            .router
            .clone()
            .oneshot(submit_request(Some("token-t1"), "resume.pdf"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {i} should pass");
    }

    let response = app
        .router
        .clone()
        .oneshot(submit_request(Some("token-t1"), "resume.pdf"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("Retry-After"));
}

#[tokio::test]
async fn test_status_endpoint_and_tenant_isolation() {
    let app = build_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(submit_request(Some("token-t1"), "resume.pdf"))
        .await
        .unwrap();
    let body = response_json(response).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let status = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{job_id}"))
                .header(header::AUTHORIZATION, "Bearer token-t1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::OK);
    let status = response_json(status).await;
    assert_eq!(status["job_id"], job_id.as_str());

    // another tenant cannot see the job
    let foreign = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{job_id}"))
                .header(header::AUTHORIZATION, "Bearer token-t0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

    let missing = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/jobs/does-not-exist")
                .header(header::AUTHORIZATION, "Bearer token-t1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_queued_job() {
    let app = build_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(submit_request(Some("token-t1"), "resume.pdf"))
        .await
        .unwrap();
    let body = response_json(response).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let cancel = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/jobs/{job_id}/cancel"))
                .header(header::AUTHORIZATION, "Bearer token-t1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(cancel.status(), StatusCode::OK);

    let job = app.store.get_job(&job_id).unwrap().unwrap();
    assert_eq!(job.status, talentbox::model::JobStatus::Failed);
    assert_eq!(job.error_code, Some(talentbox::model::ErrorCode::Canceled));

    // canceling twice is a conflict
    let again = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/jobs/{job_id}/cancel"))
                .header(header::AUTHORIZATION, "Bearer token-t1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_staged_json_submit() {
    let app = build_test_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/upload/submit")
        .header(header::AUTHORIZATION, "Bearer token-t1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "storage_path": "uploads/t1/staging/resume.pdf",
                "file_name": "resume.pdf",
                "size": 1024
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    // the staged object does not exist in this isolated app: validation 400
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["code"], "FILE_VALIDATION");
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = build_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["job_broker"], "healthy");
}
