use catalog_api_models::ErrorBody;
use catalog_engine::EngineError;
use reqwest::StatusCode;

/// Classify a non-2xx response into a server error.
///
/// Prefers the `{ "error": ... }` body, then the trimmed body text.
pub(crate) fn classify_problem(status: StatusCode, body: &[u8]) -> EngineError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .map(|body| body.error.trim().to_string())
        .filter(|message| !message.is_empty())
        .or_else(|| {
            let text = String::from_utf8_lossy(body).trim().to_string();
            (!text.is_empty()).then_some(text)
        })
        .unwrap_or_else(|| format!("request failed with status {}", status.as_u16()));

    EngineError::Server {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(status: StatusCode, body: &str) -> String {
        match classify_problem(status, body.as_bytes()) {
            EngineError::Server { message, .. } => message,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn error_body_is_preferred() {
        assert_eq!(
            message(StatusCode::CONFLICT, r#"{"error":" already liked "}"#),
            "already liked"
        );
    }

    #[test]
    fn plain_text_is_used_when_not_json() {
        assert_eq!(message(StatusCode::BAD_GATEWAY, "upstream down\n"), "upstream down");
        assert_eq!(
            message(StatusCode::BAD_REQUEST, r#"{"detail":"nope"}"#),
            r#"{"detail":"nope"}"#
        );
    }

    #[test]
    fn empty_bodies_fall_back_to_the_status() {
        assert_eq!(
            message(StatusCode::SERVICE_UNAVAILABLE, "  "),
            "request failed with status 503"
        );
        assert_eq!(
            message(StatusCode::NOT_FOUND, r#"{"error":""}"#),
            r#"{"error":""}"#
        );
    }

    #[test]
    fn status_code_is_kept() {
        let err = classify_problem(StatusCode::INTERNAL_SERVER_ERROR, b"");
        assert!(matches!(err, EngineError::Server { status: 500, .. }));
        assert!(err.is_retryable());
    }
}
