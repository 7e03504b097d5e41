use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::auth::require_session;
use super::handlers::{
    cache_stats, clear_cache, create_job, cron_presets, dashboard, delete_job, get_job, health,
    job_templates, list_jobs, login, login_form, logout, pause_job, recent_logs, resume_job,
    run_job, status, update_job, update_schedule, update_wallet_counts, wallet_count,
};
use super::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/wallets/count", get(wallet_count))
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/update-wallet-counts", post(update_wallet_counts))
        .route("/jobs/:id", get(get_job).put(update_job).delete(delete_job))
        .route("/jobs/:id/schedule", put(update_schedule))
        .route("/jobs/:id/pause", post(pause_job))
        .route("/jobs/:id/resume", post(resume_job))
        .route("/jobs/:id/run", post(run_job))
        .route("/status", get(status))
        .route("/job-templates", get(job_templates))
        .route("/cron-presets", get(cron_presets))
        .route("/cache/clear", post(clear_cache))
        .route("/cache/stats", get(cache_stats))
        .route("/logs/recent", get(recent_logs));

    Router::new()
        .route("/", get(dashboard))
        .route("/health", get(health))
        .route("/login", get(login_form).post(login))
        .route("/logout", post(logout))
        .nest("/api", api)
        .layer(middleware::from_fn_with_state(state.clone(), require_session))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::{session_token, SESSION_COOKIE};
    use crate::config::{test_settings, Settings};
    use crate::services::cache::TtlCache;
    use crate::services::invoker::HttpAnalysisInvoker;
    use crate::services::jobs::JobService;
    use crate::services::scheduler::{InMemoryJobStore, JobStore};
    use crate::services::wallet::WalletCountResolver;
    use crate::test_support::{spawn_wallet_api, FailingStore, StubServer};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app(settings: Settings) -> (Router, StubServer) {
        let store = InMemoryJobStore::with_demo_jobs("http://127.0.0.1:9/");
        app_with_store(settings, Arc::new(store)).await
    }

    async fn app_with_store(settings: Settings, store: Arc<dyn JobStore>) -> (Router, StubServer) {
        let wallet_api = spawn_wallet_api(StatusCode::OK, r#"{"count": 4821}"#, Duration::ZERO).await;
        let client = reqwest::Client::new();
        let cache = Arc::new(TtlCache::new());
        let resolver = Arc::new(WalletCountResolver::new(
            client.clone(),
            wallet_api.url.clone(),
            Duration::from_secs(2),
            Some(cache.clone()),
            settings.cache_ttls.wallet,
        ));
        let jobs = JobService::new(
            store,
            resolver,
            Arc::new(HttpAnalysisInvoker::new(client, Duration::from_millis(200))),
            Some(cache),
            &settings,
        );
        let state = AppState::new(Arc::new(settings), Arc::new(jobs));
        (create_router(state), wallet_api)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn wallet_count_reports_source_and_url() {
        let (app, wallet_api) = app(test_settings()).await;
        let (status, body) = send(&app, get("/api/wallets/count")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["count"], json!(4821));
        assert_eq!(body["source"], json!("live"));
        assert_eq!(body["api_url"], json!(wallet_api.url));

        let (_, body) = send(&app, get("/api/wallets/count")).await;
        assert_eq!(body["source"], json!("cache"));
        assert_eq!(wallet_api.hit_count(), 1);
    }

    #[tokio::test]
    async fn create_then_fetch_job() {
        let (app, _wallet_api) = app(test_settings()).await;
        let (status, body) = send(
            &app,
            json_request(
                "POST",
                "/api/jobs",
                json!({
                    "id": "base-buy",
                    "network": "base",
                    "analysis_type": "buy",
                    "schedule": "*/15 * * * *",
                    "num_wallets": 10
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["job"]["num_wallets"], json!(4821));
        assert_eq!(body["requested_wallets"], json!(10));

        let (status, body) = send(&app, get("/api/jobs/base-buy")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["job"]["network"], json!("base"));

        let (_, body) = send(&app, get("/api/jobs")).await;
        assert_eq!(body["total"], json!(3));
    }

    #[tokio::test]
    async fn error_statuses_are_mapped() {
        let (app, _wallet_api) = app(test_settings()).await;

        let (status, body) = send(
            &app,
            json_request(
                "PUT",
                "/api/jobs/crypto-buy-analysis-ethereum/schedule",
                json!({ "schedule": "*/15 * * *" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["code"], json!(400));

        let (status, body) = send(&app, get("/api/jobs/ghost")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], json!(404));

        let duplicate = json!({
            "id": "crypto-buy-analysis-ethereum",
            "network": "ethereum",
            "analysis_type": "buy",
            "schedule": "0 * * * *"
        });
        let (status, _) = send(&app, json_request("POST", "/api/jobs", duplicate)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, json_request("POST", "/api/jobs", json!({ "id": 3 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));

        let (status, _) = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/api/cache/clear?domain=bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn run_succeeds_even_when_the_function_is_unreachable() {
        let (app, _wallet_api) = app(test_settings()).await;
        let (status, body) = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/api/jobs/crypto-sell-analysis-ethereum/run")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["wallets_used"], json!(4821));
        assert!(body["invoker_error"].is_string());
    }

    #[tokio::test]
    async fn run_body_overrides_are_validated() {
        let (app, _wallet_api) = app(test_settings()).await;
        let uri = "/api/jobs/crypto-sell-analysis-ethereum/run";

        let typo = json_request("POST", uri, json!({ "days_back": "ten" }));
        let (status, body) = send(&app, typo).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["code"], json!(400));

        let malformed = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"days_back\":"))
            .unwrap();
        let (status, _) = send(&app, malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let fractional = json_request("POST", uri, json!({ "days_back": 0.5 }));
        let (status, body) = send(&app, fractional).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["days_back"], json!(0.5));

        let blank = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("  "))
            .unwrap();
        let (status, body) = send(&app, blank).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
    }

    #[tokio::test]
    async fn scheduler_failures_map_to_bad_gateway() {
        let store =
            FailingStore::new(InMemoryJobStore::with_demo_jobs("http://127.0.0.1:9/")).failing_runs();
        let (app, _wallet_api) = app_with_store(test_settings(), Arc::new(store)).await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/jobs/crypto-sell-analysis-ethereum/run")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["code"], json!(502));
    }

    #[tokio::test]
    async fn refresh_endpoint_updates_stale_jobs() {
        let (app, _wallet_api) = app(test_settings()).await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/jobs/update-wallet-counts")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated"], json!(2));
        assert_eq!(body["wallet_count"], json!(4821));
    }

    #[tokio::test]
    async fn read_views_respond() {
        let (app, _wallet_api) = app(test_settings()).await;

        let (_, body) = send(&app, get("/api/status")).await;
        assert_eq!(body["status"]["total_jobs"], json!(2));
        assert_eq!(body["status"]["backend"], json!("memory"));

        let (_, body) = send(&app, get("/api/job-templates")).await;
        assert_eq!(body["templates"].as_array().unwrap().len(), 4);

        let (_, body) = send(&app, get("/api/cron-presets")).await;
        assert!(!body["presets"].as_array().unwrap().is_empty());

        let (_, body) = send(&app, get("/api/cache/stats")).await;
        assert_eq!(body["cache"]["enabled"], json!(true));

        let (_, body) = send(&app, get("/api/logs/recent")).await;
        assert_eq!(body["log_format"], json!("json"));
    }

    #[tokio::test]
    async fn auth_guards_api_and_dashboard_when_password_is_set() {
        let mut settings = test_settings();
        settings.admin_password = Some("hunter2".to_string());
        let token = session_token(&settings);
        let (app, _wallet_api) = app(settings).await;

        let (status, body) = send(&app, get("/api/jobs")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], json!(401));

        let response = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");

        let (status, _) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);

        let login = Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("username=admin&password=hunter2"))
            .unwrap();
        let response = app.clone().oneshot(login).await.unwrap();
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with(&format!("{}={}", SESSION_COOKIE, token)));

        let authed = Request::builder()
            .uri("/api/jobs")
            .header(header::COOKIE, format!("{}={}", SESSION_COOKIE, token))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, authed).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let mut settings = test_settings();
        settings.admin_password = Some("hunter2".to_string());
        let (app, _wallet_api) = app(settings).await;

        let login = Request::builder()
            .method("POST")
            .uri("/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("username=admin&password=nope"))
            .unwrap();
        let response = app.clone().oneshot(login).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }
}
