//! 2Captcha protocol handling against an in-process stub service.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::{Value, json};

use player_api::captcha::{
    CaptchaError, CaptchaOutcome, CaptchaPipeline, CaptchaPolicy, LocalSolution, LocalSolver,
    RemoteSolver, SolveTier, TwoCaptchaClient,
};
use player_api::client::build_client;

#[derive(Clone)]
struct Service {
    submissions: Arc<AtomicU32>,
    polls: Arc<AtomicU32>,
    /// Polls answered with the not-ready sentinel before the answer.
    not_ready_polls: u32,
    answer: &'static str,
}

impl Service {
    fn new(not_ready_polls: u32, answer: &'static str) -> Self {
        Self {
            submissions: Arc::new(AtomicU32::new(0)),
            polls: Arc::new(AtomicU32::new(0)),
            not_ready_polls,
            answer,
        }
    }
}

async fn submit(State(service): State<Service>, Form(form): Form<HashMap<String, String>>) -> Json<Value> {
    service.submissions.fetch_add(1, Ordering::SeqCst);
    if form.get("key").map(String::as_str) != Some("test-key") {
        return Json(json!({"status": 0, "request": "ERROR_WRONG_USER_KEY"}));
    }
    assert_eq!(form["method"], "base64");
    assert_eq!(form["json"], "1");
    assert!(!form["body"].is_empty());
    Json(json!({"status": 1, "request": "2122988149"}))
}

async fn result(State(service): State<Service>, Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    match query.get("action").map(String::as_str) {
        Some("getbalance") => Json(json!({"status": 1, "request": "4.2075"})),
        Some("get") => {
            assert_eq!(query["id"], "2122988149");
            let n = service.polls.fetch_add(1, Ordering::SeqCst);
            if n < service.not_ready_polls {
                Json(json!({"status": 0, "request": "CAPCHA_NOT_READY"}))
            } else {
                Json(json!({"status": 1, "request": service.answer}))
            }
        }
        _ => Json(json!({"status": 0, "request": "ERROR_WRONG_ACTION"})),
    }
}

async fn spawn_service(service: Service) -> String {
    let router = Router::new()
        .route("/in.php", post(submit))
        .route("/res.php", get(result))
        .with_state(service);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn remote(base: &str, key: &str, timeout: Duration) -> TwoCaptchaClient {
    let client = build_client(None, Duration::from_secs(5)).unwrap();
    TwoCaptchaClient::new(client, key)
        .with_base_url(base)
        .with_polling(Duration::from_millis(10), timeout)
}

#[tokio::test]
async fn test_solve_polls_until_ready() {
    let service = Service::new(2, "x7yz");
    let base = spawn_service(service.clone()).await;

    let text = remote(&base, "test-key", Duration::from_secs(5))
        .solve("aW1hZ2U=")
        .await
        .unwrap();

    assert_eq!(text, "x7yz");
    assert_eq!(service.submissions.load(Ordering::SeqCst), 1);
    assert_eq!(service.polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_solve_times_out() {
    let service = Service::new(u32::MAX, "never");
    let base = spawn_service(service.clone()).await;

    let result = remote(&base, "test-key", Duration::from_millis(100))
        .solve("aW1hZ2U=")
        .await;

    assert!(matches!(result, Err(CaptchaError::Timeout)));
    assert!(service.polls.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_submit_error_is_reported() {
    let service = Service::new(0, "unused");
    let base = spawn_service(service.clone()).await;

    let result = remote(&base, "wrong-key", Duration::from_secs(1))
        .solve("aW1hZ2U=")
        .await;

    assert!(matches!(result, Err(CaptchaError::Service(ref e)) if e == "ERROR_WRONG_USER_KEY"));
    assert_eq!(service.polls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_balance() {
    let base = spawn_service(Service::new(0, "unused")).await;
    let balance = remote(&base, "test-key", Duration::from_secs(1))
        .balance()
        .await
        .unwrap();
    assert!((balance - 4.2075).abs() < 1e-9);
}

struct AlwaysUnreadable(Arc<AtomicU32>);

#[async_trait]
impl LocalSolver for AlwaysUnreadable {
    async fn solve(&self, _image: &[u8]) -> Result<LocalSolution, CaptchaError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(LocalSolution {
            text: "??".to_string(),
            confidence: 0.1,
        })
    }
}

#[tokio::test]
async fn test_pipeline_escalates_to_service_once_per_challenge() {
    let service = Service::new(1, "k9m2");
    let base = spawn_service(service.clone()).await;
    let local_calls = Arc::new(AtomicU32::new(0));

    let pipeline = CaptchaPipeline::new(
        Box::new(AlwaysUnreadable(local_calls.clone())),
        Some(Box::new(remote(&base, "test-key", Duration::from_secs(5)))),
        CaptchaPolicy::default(),
    );

    let outcome = pipeline.solve(b"captcha-image").await;
    assert_eq!(
        outcome,
        CaptchaOutcome::Solved {
            text: "k9m2".to_string(),
            tier: SolveTier::Remote
        }
    );
    assert_eq!(local_calls.load(Ordering::SeqCst), 4);
    assert_eq!(service.submissions.load(Ordering::SeqCst), 1);

    let balance = pipeline.remote_balance().await.unwrap().unwrap();
    assert!(balance > 0.0);
}
