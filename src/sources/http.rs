//! Shared HTTP plumbing for all source adapters.
//!
//! Adapters never call `reqwest` error/status inspection
//! themselves: they go through [`classify_send_error`] and
//! [`classify_status`] so every platform maps failures onto the
//! same [`FetchError`] kinds.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;

use crate::error::FetchError;

/// Maximum length of a response body included in error messages.
const BODY_PREVIEW_LEN: usize = 300;

pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| FetchError::Malformed(format!("client build error: {e}")))
}

/// Maps a failed `send()` onto a fetch error kind.
///
/// Connection failures, timeouts and truncated bodies are
/// transient. Anything else means the request itself was bad.
///
/// The URL is stripped from the message: query strings may carry
/// credentials and the message ends up in logs.
pub fn classify_send_error(e: reqwest::Error) -> FetchError {
    let e = e.without_url();
    if e.is_connect() || e.is_timeout() || e.is_body() || e.is_request() {
        FetchError::Transient(e.to_string())
    } else {
        FetchError::Malformed(e.to_string())
    }
}

/// Maps a non-success HTTP status onto a fetch error kind.
///
/// `reset_at` is only consulted for 429.
pub fn classify_status(status: StatusCode, body: &str, reset_at: DateTime<Utc>) -> FetchError {
    let message = format!("HTTP {}: {}", status.as_u16(), preview(body));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::Unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { reset_at },
        s if s.is_server_error() => FetchError::Transient(message),
        _ => FetchError::Malformed(message),
    }
}

/// Reads a successful response body as JSON.
pub async fn read_json(response: reqwest::Response) -> Result<Value, FetchError> {
    let text = response.text().await.map_err(classify_send_error)?;
    serde_json::from_str(&text)
        .map_err(|e| FetchError::Malformed(format!("invalid JSON ({e}): {}", preview(&text))))
}

pub fn header_str<'a>(headers: &'a reqwest::header::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(BODY_PREVIEW_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

// ------------------------------------------------------------
// Small JSON accessors used by the normalizers
// ------------------------------------------------------------

pub fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

pub fn u64_field(value: &Value, key: &str) -> Option<u64> {
    value.get(key).and_then(Value::as_u64)
}

pub fn u32_field(value: &Value, key: &str) -> Option<u32> {
    u64_field(value, key).and_then(|v| u32::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_unauthorized() {
        let now = Utc::now();
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "", now),
            FetchError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "nope", now),
            FetchError::Unauthorized(_)
        ));
    }

    #[test]
    fn too_many_requests_carries_reset() {
        let reset = Utc::now();
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "", reset),
            FetchError::RateLimited { reset_at: reset }
        );
    }

    #[test]
    fn server_errors_are_transient_client_errors_malformed() {
        let now = Utc::now();
        assert!(classify_status(StatusCode::BAD_GATEWAY, "", now).is_transient());
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad query", now),
            FetchError::Malformed(m) if m.contains("bad query")
        ));
    }

    #[tokio::test]
    async fn send_errors_never_echo_the_url() {
        let client = build_client(5).unwrap();
        let err = client
            .get("http://127.0.0.1:1/me?access_token=SECRET_TOKEN_123")
            .send()
            .await
            .unwrap_err();

        let fetch = classify_send_error(err);
        assert!(fetch.is_transient());
        assert!(!fetch.to_string().contains("SECRET_TOKEN_123"));
        assert!(!fetch.to_string().contains("127.0.0.1"));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let body = "é".repeat(BODY_PREVIEW_LEN + 10);
        assert_eq!(preview(&body).chars().count(), BODY_PREVIEW_LEN);
        assert_eq!(preview("short"), "short");
    }
}
