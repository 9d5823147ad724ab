use crate::config::ConfigError;
use crate::ledger::router::status_for;
use crate::ledger::LedgerError;
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failures that end a command or a request outside the ledger router's own mapping.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server error: {0}")]
    Server(#[from] axum::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            AppError::Ledger(err) => (status_for(err), err.kind()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        (status, Json(json!({ "error": kind, "message": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_keep_their_http_status() {
        let response = AppError::from(LedgerError::validation("amount must be positive"))
            .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = AppError::from(std::io::Error::other("disk full")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn ledger_messages_are_not_prefixed() {
        let error = AppError::from(LedgerError::invalid_state("student already enrolled"));
        assert_eq!(error.to_string(), "invalid state: student already enrolled");
    }
}
