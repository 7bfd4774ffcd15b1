mod classify;

pub use classify::{capability_message, classify, extract_upstream_message, suggestions_for};

use crate::providers::Modality;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    Quota,
    RateLimit,
    UnsupportedCapability(Modality),
    ModelUnavailable,
    Network,
    Internal,
}

impl ErrorKind {
    pub fn default_status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation | ErrorKind::UnsupportedCapability(_) => StatusCode::BAD_REQUEST,
            ErrorKind::Auth => StatusCode::UNAUTHORIZED,
            ErrorKind::Quota => StatusCode::PAYMENT_REQUIRED,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ModelUnavailable => StatusCode::NOT_FOUND,
            ErrorKind::Network => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ErrorKind::Validation | ErrorKind::UnsupportedCapability(_) => "invalid_request_error",
            ErrorKind::Auth => "authentication_error",
            ErrorKind::Quota => "insufficient_quota",
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::Network => "network_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

/// Upstream failure as received: status plus whatever body came with it.
#[derive(Debug, Clone)]
pub struct UpstreamError {
    pub status: u16,
    pub raw_body: String,
    /// Model the caller asked for, used when phrasing the message.
    pub model: String,
}

impl UpstreamError {
    /// Builds an error from an `error` object found inside an otherwise successful
    /// body or stream frame. A numeric `code` of 400 or above is used as the
    /// status; anything else counts as a bad gateway.
    pub fn from_error_object(error: &Value, model: &str) -> Self {
        let status = error
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok())
            .filter(|code| (400..600).contains(code))
            .unwrap_or(502);
        Self {
            status,
            raw_body: json!({ "error": error }).to_string(),
            model: model.to_owned(),
        }
    }
}

/// Every failure the relay reports, local or upstream, with a message meant for
/// the end user.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub status: StatusCode,
    pub suggested_models: Vec<String>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: kind.default_status(),
            suggested_models: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_suggestions(mut self, models: Vec<String>) -> Self {
        self.suggested_models = models;
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn unsupported(modality: Modality, model: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedCapability(modality),
            capability_message(modality, model),
        )
        .with_suggestions(suggestions_for(modality, model))
    }

    /// Connect, read and timeout failures talking to the upstream.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::new(
                ErrorKind::Network,
                "Request Timed Out: The upstream did not respond in time. Long generations can \
                 take a while; please retry, or pick a faster model.",
            )
            .with_status(StatusCode::REQUEST_TIMEOUT);
        }
        let reason = if err.is_connect() {
            "could not connect to the upstream API"
        } else if err.is_body() || err.is_decode() {
            "the upstream connection dropped while reading the response"
        } else {
            "the upstream request failed"
        };
        Self::new(
            ErrorKind::Network,
            format!(
                "Network Error: {}. Check your internet connection or proxy settings and retry.",
                reason
            ),
        )
    }

    pub fn code(&self) -> String {
        match self.kind {
            ErrorKind::Validation => "invalid_request".to_owned(),
            ErrorKind::Auth => "invalid_api_key".to_owned(),
            ErrorKind::Quota => "insufficient_quota".to_owned(),
            ErrorKind::RateLimit => "rate_limit_exceeded".to_owned(),
            ErrorKind::UnsupportedCapability(modality) => format!("unsupported_{}_input", modality),
            ErrorKind::ModelUnavailable => "model_not_available".to_owned(),
            ErrorKind::Network if self.status == StatusCode::REQUEST_TIMEOUT => {
                "upstream_timeout".to_owned()
            }
            ErrorKind::Network => "upstream_unreachable".to_owned(),
            ErrorKind::Internal => "internal_error".to_owned(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "error": {
                "message": self.message,
                "type": self.kind.error_type(),
                "code": self.code(),
            }
        })
    }
}

impl IntoResponse for ClassifiedError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(kind = ?self.kind, status = self.status.as_u16(), "{}", self.message);
        } else {
            tracing::warn!(kind = ?self.kind, status = self.status.as_u16(), "{}", self.message);
        }
        (self.status, Json(self.to_json())).into_response()
    }
}
