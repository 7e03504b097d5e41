use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use sha2::{Digest, Sha256};

use super::error::ApiError;
use super::state::AppState;
use crate::config::Settings;

pub const SESSION_COOKIE: &str = "auth_session";

const OPEN_PATHS: &[&str] = &["/login", "/health"];

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Session token handed out on login; derived from the secret key so a restart keeps sessions valid.
pub fn session_token(settings: &Settings) -> String {
    digest(&format!("authenticated:{}", settings.secret_key))
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Compares fixed-size digests so the comparison time does not depend on the input.
fn same_secret(given: &str, expected: &str) -> bool {
    digest(given)
        .iter()
        .zip(digest(expected).iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

pub fn verify_credentials(settings: &Settings, username: &str, password: &str) -> bool {
    let Some(expected_password) = settings.admin_password.as_deref() else {
        return false;
    };
    let user_ok = same_secret(username, &settings.admin_username);
    let password_ok = same_secret(password, expected_password);
    user_ok && password_ok
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
}

pub fn is_authenticated(settings: &Settings, headers: &HeaderMap) -> bool {
    session_cookie(headers)
        .map(|cookie| same_secret(&cookie, &session_token(settings)))
        .unwrap_or(false)
}

pub async fn require_session(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.settings.auth_enabled() {
        return next.run(request).await;
    }

    let path = request.uri().path();
    if OPEN_PATHS.contains(&path) || is_authenticated(&state.settings, request.headers()) {
        return next.run(request).await;
    }

    tracing::debug!(component = "api", path = %path, "Rejecting unauthenticated request");
    if path.starts_with("/api") {
        ApiError::Unauthorized.into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_settings;
    use axum::http::HeaderValue;

    fn settings() -> Settings {
        let mut settings = test_settings();
        settings.admin_password = Some("hunter2".to_string());
        settings.secret_key = "s3cret".to_string();
        settings
    }

    #[test]
    fn credentials_must_match_both_fields() {
        let settings = settings();
        assert!(verify_credentials(&settings, "admin", "hunter2"));
        assert!(!verify_credentials(&settings, "admin", "hunter3"));
        assert!(!verify_credentials(&settings, "root", "hunter2"));
    }

    #[test]
    fn no_password_means_no_login() {
        let settings = test_settings();
        assert!(!verify_credentials(&settings, "admin", ""));
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let settings = settings();
        let mut headers = HeaderMap::new();
        let cookie = format!("theme=dark; {}={}", SESSION_COOKIE, session_token(&settings));
        headers.insert(header::COOKIE, HeaderValue::from_str(&cookie).unwrap());
        assert!(is_authenticated(&settings, &headers));

        let mut forged = HeaderMap::new();
        forged.insert(header::COOKIE, HeaderValue::from_static("auth_session=authenticated_s3cret"));
        assert!(!is_authenticated(&settings, &forged));
    }
}
