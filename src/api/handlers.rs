use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Form, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::{is_authenticated, session_token, verify_credentials, SESSION_COOKIE};
use super::error::ApiError;
use super::state::AppState;
use crate::services::cache::CacheDomain;
use crate::services::cron::CRON_PRESETS;
use crate::types::models::{
    JobCreateRequest, JobExecutionRequest, JobUpdateRequest, ScheduleUpdateRequest,
};

const DASHBOARD_HTML: &str = include_str!("../../static/dashboard.html");
const LOGIN_HTML: &str = include_str!("../../static/login.html");
const SESSION_MAX_AGE_SECS: u64 = 24 * 60 * 60;

type ApiResult = Result<Json<Value>, ApiError>;

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

/// An absent or blank body means "no overrides"; anything else must be a valid request.
fn execution_overrides(payload: &[u8]) -> Result<Option<JobExecutionRequest>, ApiError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(payload)
        .map(Some)
        .map_err(|e| ApiError::Validation(format!("invalid run request: {}", e)))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "status": "healthy",
        "app": state.settings.app_name,
        "version": state.settings.app_version,
        "scheduler_backend": state.jobs.backend(),
        "timestamp": chrono::Utc::now(),
    }))
}

pub async fn dashboard(State(state): State<AppState>) -> Html<String> {
    Html(DASHBOARD_HTML.replace("{{APP_NAME}}", &state.settings.app_name))
}

fn login_page(app_name: &str, error: &str) -> Html<String> {
    Html(
        LOGIN_HTML
            .replace("{{APP_NAME}}", app_name)
            .replace("{{ERROR}}", error),
    )
}

pub async fn login_form(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.settings.auth_enabled() || is_authenticated(&state.settings, &headers) {
        return Redirect::to("/").into_response();
    }
    login_page(&state.settings.app_name, "").into_response()
}

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

pub async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    if !verify_credentials(&state.settings, &form.username, &form.password) {
        tracing::warn!(component = "api", username = %form.username, "Failed login attempt");
        return (
            StatusCode::UNAUTHORIZED,
            login_page(&state.settings.app_name, "Invalid username or password"),
        )
            .into_response();
    }

    tracing::info!(component = "api", username = %form.username, "User logged in");
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        session_token(&state.settings),
        SESSION_MAX_AGE_SECS
    );
    ([(header::SET_COOKIE, cookie)], Redirect::to("/")).into_response()
}

pub async fn logout() -> Response {
    let cookie = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE);
    ([(header::SET_COOKIE, cookie)], Redirect::to("/login")).into_response()
}

pub async fn wallet_count(State(state): State<AppState>) -> Json<Value> {
    let resolver = state.jobs.resolver();
    let started = Instant::now();
    let wallet = resolver.resolve().await;
    Json(json!({
        "success": true,
        "count": wallet.value,
        "source": wallet.source,
        "api_url": resolver.api_url(),
        "retrieved_at": wallet.retrieved_at,
        "duration_ms": started.elapsed().as_millis() as u64,
        "error": wallet.error,
    }))
}

pub async fn list_jobs(State(state): State<AppState>) -> ApiResult {
    let jobs = state.jobs.list_jobs().await?;
    Ok(Json(json!({
        "success": true,
        "total": jobs.len(),
        "jobs": jobs,
    })))
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let job = state.jobs.get_job(&id).await?;
    Ok(Json(json!({ "success": true, "job": job })))
}

pub async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<JobCreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let outcome = state.jobs.create(body(payload)?).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": format!("Job {} created with {} wallets", outcome.job.id, outcome.wallet.value),
            "wallet_count": outcome.wallet.value,
            "wallet_source": outcome.wallet.source,
            "requested_wallets": outcome.requested_wallets,
            "duration_ms": outcome.duration_ms,
            "job": outcome.job,
        })),
    ))
}

pub async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<JobUpdateRequest>, JsonRejection>,
) -> ApiResult {
    let outcome = state.jobs.update(&id, body(payload)?).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Job {} updated", id),
        "wallet_count": outcome.wallet.value,
        "wallet_source": outcome.wallet.source,
        "job": outcome.job,
    })))
}

pub async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ScheduleUpdateRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let outcome = state.jobs.update_schedule(&id, &request.schedule).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Job {} schedule set to {}", id, outcome.job.schedule),
        "wallet_count": outcome.wallet.value,
        "wallet_source": outcome.wallet.source,
        "job": outcome.job,
    })))
}

pub async fn delete_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.jobs.delete(&id).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Job {} deleted", id),
    })))
}

pub async fn pause_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.jobs.pause(&id).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Job {} paused", id),
    })))
}

pub async fn resume_job(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let outcome = state.jobs.resume(&id).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Job {} resumed with {} wallets", id, outcome.wallet.value),
        "wallet_count": outcome.wallet.value,
        "wallet_source": outcome.wallet.source,
        "job": outcome.job,
    })))
}

pub async fn run_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Bytes,
) -> ApiResult {
    let overrides = execution_overrides(&payload)?;
    let outcome = state.jobs.run_now(&id, overrides).await?;
    Ok(Json(json!({
        "success": outcome.scheduler_triggered,
        "message": format!("Job {} triggered with {} wallets", id, outcome.wallet.value),
        "wallets_used": outcome.wallet.value,
        "wallet_source": outcome.wallet.source,
        "days_back": outcome.days_back,
        "result": outcome.result,
        "invoker_error": outcome.invoker_error,
        "function_duration_ms": outcome.function_duration_ms,
        "duration_ms": outcome.duration_ms,
    })))
}

pub async fn update_wallet_counts(State(state): State<AppState>) -> ApiResult {
    let outcome = state.jobs.refresh_all().await?;
    Ok(Json(json!({
        "success": outcome.failed.is_empty(),
        "message": format!(
            "Updated {} of {} jobs to {} wallets",
            outcome.updated, outcome.checked, outcome.wallet.value
        ),
        "updated": outcome.updated,
        "checked": outcome.checked,
        "failed": outcome.failed,
        "wallet_count": outcome.wallet.value,
        "wallet_source": outcome.wallet.source,
    })))
}

pub async fn status(State(state): State<AppState>) -> ApiResult {
    let report = state.jobs.status().await?;
    Ok(Json(json!({
        "success": true,
        "status": report,
        "cache": state.jobs.cache_stats(),
    })))
}

pub async fn job_templates(State(state): State<AppState>) -> Json<Value> {
    let templates = state.jobs.templates().await;
    Json(json!({ "success": true, "templates": templates }))
}

pub async fn cron_presets() -> Json<Value> {
    Json(json!({ "success": true, "presets": CRON_PRESETS }))
}

#[derive(Deserialize)]
pub struct CacheClearParams {
    pub domain: Option<String>,
}

pub async fn clear_cache(
    State(state): State<AppState>,
    Query(params): Query<CacheClearParams>,
) -> ApiResult {
    let domain = params
        .domain
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(str::parse::<CacheDomain>)
        .transpose()
        .map_err(ApiError::Validation)?;

    let cleared = state.jobs.clear_cache(domain);
    let scope = domain.map(|d| d.as_str()).unwrap_or("all");
    tracing::info!(component = "cache", operation = "clear", domain = scope, cleared, "Cache cleared");
    Ok(Json(json!({
        "success": true,
        "message": format!("Cleared {} cache entries ({})", cleared, scope),
        "domain": scope,
        "cleared": cleared,
    })))
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "success": true, "cache": state.jobs.cache_stats() }))
}

pub async fn recent_logs(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "logging_enabled": true,
        "debug_mode": state.settings.debug,
        "log_format": crate::logging::resolve_format(&state.settings).as_str(),
        "log_level": crate::logging::default_level(&state.settings),
        "components": ["wallet_api", "job_scheduler", "cache", "api"],
        "structured_fields": ["component", "operation", "job_id", "count", "source", "duration_ms"],
    }))
}
