use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::AppState;
use super::handlers::{chat, health, jobs, models, slack, stop};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub(crate) fn build_api_router(state: AppState) -> Router {
    let mut routes = Router::new()
        .route("/", get(health::root_endpoint))
        .route("/echo/", post(chat::echo_endpoint))
        .route("/chat/", post(chat::chat_endpoint))
        .route("/result/{job_id}", get(chat::result_endpoint))
        .route("/jobs/active", get(jobs::active_jobs_endpoint))
        .route("/jobs/{job_id}/cancel", post(jobs::cancel_job_endpoint))
        .route("/models", get(models::list_models_endpoint))
        .route(
            "/stop",
            get(stop::get_stop_endpoint).post(stop::set_stop_endpoint),
        )
        .route("/logs", get(super::sse_logs_endpoint));

    // Slack authenticates with its own HMAC signature, not CORS.
    if state.slack.is_some() {
        routes = routes.route("/slack/events", post(slack::slack_events_endpoint));
    }

    routes
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::{
        ActiveJobs, ExecutorConfig, Job, JobDispatcher, JobExecutor, ResultReader, WorkerPool,
    };
    use crate::core::llm::SharedBackend;
    use crate::core::store::{JobRecords, MemoryResultStore, SharedStore, StopFlag};
    use crate::core::testing::{RecordingPlatform, ScriptedBackend};
    use crate::interfaces::slack::{SlackChatMode, SlackSettings, WebhookBridge};
    use axum::http::StatusCode;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tower::util::ServiceExt;

    struct TestApp {
        state: AppState,
        queue: Option<mpsc::Receiver<Job>>,
        records: JobRecords,
        stop_flag: StopFlag,
        backend: SharedBackend,
        platform: Arc<RecordingPlatform>,
    }

    impl TestApp {
        fn router(&self) -> Router {
            build_api_router(self.state.clone())
        }

        fn start_workers(&mut self) -> WorkerPool {
            let executor = Arc::new(JobExecutor::new(
                self.backend.clone(),
                self.records.clone(),
                self.stop_flag.clone(),
                self.state.dispatcher.active().clone(),
                ExecutorConfig {
                    backend_timeout: Duration::from_secs(5),
                    system_prompt: None,
                },
            ));
            let mut pool = WorkerPool::new(executor, self.queue.take().unwrap(), 2);
            pool.spawn_workers();
            pool
        }
    }

    fn test_app_with(backend: ScriptedBackend, capacity: usize, with_slack: bool) -> TestApp {
        let store: SharedStore = Arc::new(MemoryResultStore::new());
        let records = JobRecords::new(store.clone(), None);
        let stop_flag = StopFlag::new(store);
        let active = ActiveJobs::new();
        let (tx, rx) = mpsc::channel(capacity);
        let dispatcher = JobDispatcher::new(tx, active.clone(), records.clone(), stop_flag.clone());
        let reader = ResultReader::new(records.clone(), active);
        let backend: SharedBackend = Arc::new(backend);
        let platform = Arc::new(RecordingPlatform::new());
        let slack = with_slack.then(|| {
            let settings = SlackSettings {
                bot_token: "xoxb-test".to_string(),
                signing_secret: None,
                chat_mode: SlackChatMode::Disabled,
                reply_wait: Duration::from_secs(1),
                api_base: "http://unused".to_string(),
            };
            WebhookBridge::new(&settings, platform.clone(), dispatcher.clone(), reader.clone())
        });
        let (log_tx, _) = tokio::sync::broadcast::channel(16);

        TestApp {
            state: AppState {
                dispatcher,
                reader,
                backend: backend.clone(),
                slack,
                log_tx,
                api_port: 8000,
            },
            queue: Some(rx),
            records,
            stop_flag,
            backend,
            platform,
        }
    }

    fn test_app() -> TestApp {
        test_app_with(ScriptedBackend::echoing(), 16, true)
    }

    async fn json_request(
        app: Router,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
            None => Body::empty(),
        };

        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body_bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_slice(&body_bytes).unwrap_or(serde_json::json!({}));
        (status, json)
    }

    async fn poll_until_terminal(app: &TestApp, job_id: &str) -> serde_json::Value {
        for _ in 0..200 {
            let (status, json) =
                json_request(app.router(), Method::GET, &format!("/result/{}", job_id), None).await;
            assert_eq!(status, StatusCode::OK);
            if json["status"] != "processing" {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never settled", job_id);
    }

    #[tokio::test]
    async fn security_headers_present_on_responses() {
        let app = test_app();
        let req = Request::builder()
            .method(Method::GET)
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let resp = app.router().oneshot(req).await.unwrap();

        assert_eq!(
            resp.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(resp.headers().get("x-frame-options").unwrap(), "DENY");
        assert!(resp.headers().get("content-security-policy").is_some());
    }

    #[tokio::test]
    async fn root_says_hello() {
        let app = test_app();
        let (status, json) = json_request(app.router(), Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({ "message": "Hello, World!" }));
    }

    #[tokio::test]
    async fn echo_returns_text_unchanged() {
        let app = test_app();
        let text = "  keep  my   spacing ✨ ";
        let (status, json) = json_request(
            app.router(),
            Method::POST,
            "/echo/",
            Some(serde_json::json!({ "text": text })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["echo"], text);
    }

    #[tokio::test]
    async fn blank_text_is_rejected_on_echo_and_chat() {
        let app = test_app();
        for path in ["/echo/", "/chat/"] {
            let (status, json) = json_request(
                app.router(),
                Method::POST,
                path,
                Some(serde_json::json!({ "text": " \n\t " })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", path);
            assert_eq!(json["error"], "Query cannot be empty");
        }
        assert!(app.state.dispatcher.active().is_empty());
    }

    #[tokio::test]
    async fn malformed_bodies_get_json_errors() {
        let app = test_app();
        for (path, body) in [
            ("/echo/", "{\"txt\": \"hi\"}"),
            ("/chat/", "{\"text\": "),
            ("/stop", "{\"active\": \"maybe\"}"),
        ] {
            let req = Request::builder()
                .method(Method::POST)
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap();
            let resp = app.router().oneshot(req).await.unwrap();
            assert!(resp.status().is_client_error(), "{}", path);
            let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
                .await
                .unwrap();
            let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert!(json["error"].as_str().is_some_and(|e| !e.is_empty()), "{}", path);
        }
        assert!(app.state.dispatcher.active().is_empty());
    }

    #[tokio::test]
    async fn chat_is_accepted_then_completes() {
        let mut app = test_app();
        let mut pool = app.start_workers();

        let (status, json) = json_request(
            app.router(),
            Method::POST,
            "/chat/",
            Some(serde_json::json!({ "text": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(json["status"], "processing");
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let done = poll_until_terminal(&app, &job_id).await;
        assert_eq!(
            done,
            serde_json::json!({ "status": "completed", "response": "reply to: hi" })
        );

        let (_, again) =
            json_request(app.router(), Method::GET, &format!("/result/{}", job_id), None).await;
        assert_eq!(again, done);

        let (_, active) = json_request(app.router(), Method::GET, "/jobs/active", None).await;
        assert_eq!(active["count"], 0);
        pool.stop().await;
    }

    #[tokio::test]
    async fn two_submissions_get_distinct_ids() {
        let mut app = test_app();
        let mut pool = app.start_workers();

        let mut ids = HashSet::new();
        for text in ["first", "second"] {
            let (_, json) = json_request(
                app.router(),
                Method::POST,
                "/chat/",
                Some(serde_json::json!({ "text": text })),
            )
            .await;
            ids.insert(json["job_id"].as_str().unwrap().to_string());
        }
        assert_eq!(ids.len(), 2);

        let mut responses = HashSet::new();
        for id in &ids {
            let done = poll_until_terminal(&app, id).await;
            responses.insert(done["response"].as_str().unwrap().to_string());
        }
        assert!(responses.contains("reply to: first"));
        assert!(responses.contains("reply to: second"));
        pool.stop().await;
    }

    #[tokio::test]
    async fn backend_failure_is_reported_as_failed() {
        let mut app = test_app_with(ScriptedBackend::failing("model overloaded"), 16, false);
        let mut pool = app.start_workers();

        let (_, json) = json_request(
            app.router(),
            Method::POST,
            "/chat/",
            Some(serde_json::json!({ "text": "hi" })),
        )
        .await;
        let done = poll_until_terminal(&app, json["job_id"].as_str().unwrap()).await;
        assert_eq!(done["status"], "failed");
        assert!(done["error"].as_str().unwrap().contains("model overloaded"));
        pool.stop().await;
    }

    #[tokio::test]
    async fn unknown_result_is_processing_and_garbage_id_is_400() {
        let app = test_app();
        let (status, json) = json_request(
            app.router(),
            Method::GET,
            "/result/0123456789abcdef0123456789abcdef",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({ "status": "processing" }));

        let (status, json) =
            json_request(app.router(), Method::GET, "/result/not-a-job", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("not-a-job"));
    }

    #[tokio::test]
    async fn stop_flag_round_trips_and_blocks_chat() {
        let app = test_app();
        let (_, json) = json_request(app.router(), Method::GET, "/stop", None).await;
        assert_eq!(json, serde_json::json!({ "active": false }));

        let (status, json) = json_request(
            app.router(),
            Method::POST,
            "/stop",
            Some(serde_json::json!({ "active": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({ "active": true }));
        assert!(app.stop_flag.is_set().await.unwrap());

        let (status, _) = json_request(
            app.router(),
            Method::POST,
            "/chat/",
            Some(serde_json::json!({ "text": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        json_request(
            app.router(),
            Method::POST,
            "/stop",
            Some(serde_json::json!({ "active": false })),
        )
        .await;
        let (status, _) = json_request(
            app.router(),
            Method::POST,
            "/chat/",
            Some(serde_json::json!({ "text": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn full_queue_answers_503() {
        let app = test_app_with(ScriptedBackend::echoing(), 1, false);
        let body = Some(serde_json::json!({ "text": "hi" }));
        let (first, _) = json_request(app.router(), Method::POST, "/chat/", body.clone()).await;
        let (second, json) = json_request(app.router(), Method::POST, "/chat/", body).await;
        assert_eq!(first, StatusCode::ACCEPTED);
        assert_eq!(second, StatusCode::SERVICE_UNAVAILABLE);
        assert!(json["error"].as_str().unwrap().contains("full"));
    }

    #[tokio::test]
    async fn cancel_marks_queued_job_and_unknown_is_404() {
        let app = test_app();
        let (_, json) = json_request(
            app.router(),
            Method::POST,
            "/chat/",
            Some(serde_json::json!({ "text": "slow" })),
        )
        .await;
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let (_, active) = json_request(app.router(), Method::GET, "/jobs/active", None).await;
        assert_eq!(active["count"], 1);
        assert_eq!(active["jobs"][0]["job_id"], job_id.as_str());
        assert_eq!(active["jobs"][0]["state"], "queued");

        let (status, json) = json_request(
            app.router(),
            Method::POST,
            &format!("/jobs/{}/cancel", job_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "cancelling");

        let (status, _) = json_request(
            app.router(),
            Method::POST,
            "/jobs/0123456789abcdef0123456789abcdef/cancel",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn models_come_from_the_backend() {
        let app = test_app();
        let (status, json) = json_request(app.router(), Method::GET, "/models", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["backend"], "scripted");
        assert_eq!(json["models"][0]["id"], "scripted-1");
    }

    #[tokio::test]
    async fn slack_route_handles_challenge_and_echo() {
        let app = test_app();
        let (status, json) = json_request(
            app.router(),
            Method::POST,
            "/slack/events",
            Some(serde_json::json!({ "type": "url_verification", "challenge": "abc123" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({ "challenge": "abc123" }));

        let (status, json) = json_request(
            app.router(),
            Method::POST,
            "/slack/events",
            Some(serde_json::json!({
                "type": "event_callback",
                "event": { "type": "message", "text": "echo: hello there", "channel": "C9" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({ "status": "ok" }));
        assert_eq!(
            app.platform.posts(),
            vec![("C9".to_string(), "hello there".to_string())]
        );
    }

    #[tokio::test]
    async fn slack_route_is_absent_without_a_bot_token() {
        let app = test_app_with(ScriptedBackend::echoing(), 16, false);
        let (status, _) = json_request(
            app.router(),
            Method::POST,
            "/slack/events",
            Some(serde_json::json!({ "challenge": "abc123" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn method_not_allowed_returns_405() {
        let app = test_app();
        let req = Request::builder()
            .method(Method::GET)
            .uri("/chat/")
            .body(Body::empty())
            .unwrap();
        let resp = app.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
