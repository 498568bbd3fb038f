// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The error taxonomy for the stream data plane, rendered to the wire
//! envelope `{code, message, details?}` by a single `IntoResponse` impl.
//!
//! Every row in the spec's error table (validation, token, scope, session,
//! stream-state, asset-read, routing) is one variant here. Handlers return
//! `Result<T, GatewayError>` and propagate with `?`; nothing downstream
//! matches on string codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("validation failed")]
    Validation { details: Value },

    #[error("playback token missing")]
    TokenMissing,
    #[error("playback token format invalid")]
    TokenFormatInvalid,
    #[error("playback token signature invalid")]
    TokenSignatureInvalid,
    #[error("playback token payload invalid")]
    TokenPayloadInvalid,
    #[error("playback token expired")]
    TokenExpired,
    #[error("playback token scope mismatch")]
    TokenScopeMismatch,

    #[error("playback session closed")]
    SessionClosed,

    #[error("stream not provisioned")]
    StreamNotFound,
    #[error("stream not ready")]
    StreamNotReady,
    #[error("stream stopped")]
    StreamStopped,

    #[error("manifest not found")]
    ManifestNotFound,
    #[error("segment not found")]
    SegmentNotFound,

    #[error("route not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The stable machine-readable code used both in the wire envelope and
    /// as the `code` label on `nearhome_playback_errors_total`.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } => "VALIDATION_ERROR",
            GatewayError::TokenMissing => "PLAYBACK_TOKEN_MISSING",
            GatewayError::TokenFormatInvalid => "PLAYBACK_TOKEN_FORMAT_INVALID",
            GatewayError::TokenSignatureInvalid => "PLAYBACK_TOKEN_SIGNATURE_INVALID",
            GatewayError::TokenPayloadInvalid => "PLAYBACK_TOKEN_PAYLOAD_INVALID",
            GatewayError::TokenExpired => "PLAYBACK_TOKEN_EXPIRED",
            GatewayError::TokenScopeMismatch => "PLAYBACK_TOKEN_SCOPE_MISMATCH",
            GatewayError::SessionClosed => "PLAYBACK_SESSION_CLOSED",
            GatewayError::StreamNotFound => "PLAYBACK_STREAM_NOT_FOUND",
            GatewayError::StreamNotReady => "PLAYBACK_STREAM_NOT_READY",
            GatewayError::StreamStopped => "PLAYBACK_STREAM_STOPPED",
            GatewayError::ManifestNotFound => "PLAYBACK_MANIFEST_NOT_FOUND",
            GatewayError::SegmentNotFound => "PLAYBACK_SEGMENT_NOT_FOUND",
            GatewayError::NotFound => "NOT_FOUND",
            GatewayError::Internal(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation { .. } => StatusCode::BAD_REQUEST,
            GatewayError::TokenMissing
            | GatewayError::TokenFormatInvalid
            | GatewayError::TokenSignatureInvalid
            | GatewayError::TokenPayloadInvalid
            | GatewayError::TokenExpired
            | GatewayError::SessionClosed => StatusCode::UNAUTHORIZED,
            GatewayError::TokenScopeMismatch => StatusCode::FORBIDDEN,
            GatewayError::StreamNotFound
            | GatewayError::ManifestNotFound
            | GatewayError::SegmentNotFound
            | GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::StreamNotReady => StatusCode::CONFLICT,
            GatewayError::StreamStopped => StatusCode::GONE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            GatewayError::Validation { .. } => "Validation failed".to_string(),
            GatewayError::NotFound => "Route not found".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.message();
        let body = match &self {
            GatewayError::Validation { details } => json!({
                "code": code,
                "message": message,
                "details": details,
            }),
            _ => json!({
                "code": code,
                "message": message,
            }),
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
