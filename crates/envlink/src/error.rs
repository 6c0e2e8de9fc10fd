// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure taxonomy, raw operation failures, and the error normalizer.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel message servers use to signal an expired access token.
pub const TOKEN_EXPIRED: &str = "Token expired";

/// Cross-cutting failure categories delivered to the global error callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// No response reached the client.
    NetworkError,
    /// 401 outside a refresh-eligible context.
    Unauthorized,
    /// The refresh call failed or no refresh token was available.
    RefreshFailed,
    /// Any other non-2xx or application-level failure.
    ApiError,
}

impl ErrorKind {
    /// Category for a normalized status code.
    pub fn for_status(status: u16) -> Self {
        match status {
            0 => Self::NetworkError,
            401 => Self::Unauthorized,
            _ => Self::ApiError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RefreshFailed => "REFRESH_FAILED",
            Self::ApiError => "API_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context handed once to the global error callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorContext {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    /// The serialized [`NormalizedError`] for operation failures; the raw
    /// transport failure for refresh failures.
    pub error: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub endpoint: String,
    pub method: String,
}

/// The single structured shape every failure is converted into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedError {
    pub success: bool,
    pub status: u16,
    pub message: String,
    pub error: Option<Value>,
    pub path: String,
    pub timestamp: DateTime<Utc>,
}

/// A failed remote operation, as reported by the handler.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationError {
    /// The server answered with a non-success status.
    Response { status: u16, body: Bytes },
    /// No response at all (connect failure, DNS, timeout).
    Network { message: String },
    /// Anything else the handler surfaced.
    Other { status: Option<u16>, message: String, error: Option<Value> },
}

impl OperationError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other { status: None, message: message.into(), error: None }
    }

    /// Transport-level status, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            Self::Network { .. } => None,
            Self::Other { status, .. } => *status,
        }
    }

    /// Human-readable message. For HTTP responses this is the body's
    /// `message` field when present.
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Response { body, .. } => serde_json::from_slice::<Value>(body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned)),
            Self::Network { message } | Self::Other { message, .. } => Some(message.clone()),
        }
    }

    /// Whether this failure signals an expired credential: status 401, or
    /// a message equal to [`TOKEN_EXPIRED`].
    pub fn is_credential_expired(&self) -> bool {
        self.status() == Some(401) || self.message().as_deref() == Some(TOKEN_EXPIRED)
    }

    /// JSON rendering used in [`ErrorContext::error`].
    pub fn to_value(&self) -> Value {
        match self {
            Self::Response { status, body } => {
                let body = serde_json::from_slice::<Value>(body)
                    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()));
                serde_json::json!({ "status": status, "body": body })
            }
            Self::Network { message } => serde_json::json!({ "message": message }),
            Self::Other { status, message, error } => {
                serde_json::json!({ "status": status, "message": message, "error": error })
            }
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response { status, .. } => write!(f, "response returned status {status}"),
            Self::Network { message } => write!(f, "network failure: {message}"),
            Self::Other { message, .. } => f.write_str(message),
        }
    }
}

impl std::error::Error for OperationError {}

/// Normalize a raw failure, stamping fallbacks with the current time.
pub fn normalize(raw: &OperationError, endpoint: &str, method: &str) -> NormalizedError {
    normalize_at(raw, endpoint, method, Utc::now())
}

/// Normalize a raw failure. Deterministic for a given `now`.
pub fn normalize_at(
    raw: &OperationError,
    endpoint: &str,
    method: &str,
    now: DateTime<Utc>,
) -> NormalizedError {
    tracing::debug!(endpoint, method, err = %raw, "normalizing operation failure");
    match raw {
        OperationError::Response { status, body } => match serde_json::from_slice::<Value>(body) {
            Ok(parsed) => from_body(&parsed, *status, endpoint, now),
            Err(_) => NormalizedError {
                success: false,
                status: *status,
                message: "Failed to parse error body".to_owned(),
                error: Some(Value::String(raw.to_string())),
                path: endpoint.to_owned(),
                timestamp: now,
            },
        },
        OperationError::Network { .. } => NormalizedError {
            success: false,
            status: 0,
            message: "Network error".to_owned(),
            error: Some(Value::String(ErrorKind::NetworkError.as_str().to_owned())),
            path: endpoint.to_owned(),
            timestamp: now,
        },
        OperationError::Other { status, message, error } => NormalizedError {
            success: false,
            status: status.unwrap_or(500),
            message: if message.is_empty() { "Unknown error".to_owned() } else { message.clone() },
            error: error.clone().filter(|e| !e.is_null()),
            path: endpoint.to_owned(),
            timestamp: now,
        },
    }
}

/// Map a parsed error envelope, falling back field by field.
fn from_body(body: &Value, transport_status: u16, endpoint: &str, now: DateTime<Utc>) -> NormalizedError {
    NormalizedError {
        success: body.get("success").and_then(Value::as_bool).unwrap_or(false),
        status: body
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(transport_status),
        message: body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Request failed")
            .to_owned(),
        error: body.get("error").filter(|e| !e.is_null()).cloned(),
        path: body.get("path").and_then(Value::as_str).unwrap_or(endpoint).to_owned(),
        timestamp: body.get("timestamp").and_then(parse_timestamp).unwrap_or(now),
    }
}

/// Accept RFC 3339 strings or epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
