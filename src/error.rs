// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Failure of a ride lifecycle operation.
///
/// Every variant carries a short human-readable message for the presentation
/// layer (see [`RideError::user_message`]).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RideError {
    #[error("No authenticated user")]
    Auth,

    #[error("A ride is already active")]
    Conflict,

    #[error("Route reconciliation failed: {0}")]
    Reconciliation(String),

    #[error("Persistence store error: {0}")]
    Persistence(String),

    #[error("Location permission denied")]
    Permission,
}

/// User-facing title and message for a failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserMessage {
    pub title: String,
    pub message: String,
}

impl RideError {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            RideError::Auth => "auth",
            RideError::Conflict => "conflict",
            RideError::Reconciliation(_) => "reconciliation",
            RideError::Persistence(_) => "persistence",
            RideError::Permission => "permission",
        }
    }

    pub fn user_message(&self) -> UserMessage {
        let (title, message) = match self {
            RideError::Auth => (
                "Authentication Error",
                "You must be logged in to start a ride.",
            ),
            RideError::Conflict => (
                "Ride In Progress",
                "You cannot start a new ride while one is active.",
            ),
            RideError::Reconciliation(_) => (
                "Error finishing ride",
                "We couldn't match your route. Please try finishing again.",
            ),
            RideError::Persistence(_) => (
                "Connection problem",
                "We couldn't save your ride. Please try again.",
            ),
            RideError::Permission => (
                "Location unavailable",
                "Location permission is required to find nearby scooters.",
            ),
        };
        UserMessage {
            title: title.to_string(),
            message: message.to_string(),
        }
    }
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Ride(#[from] RideError),
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details, title) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None, None),
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, "not_found", Some(msg.clone()), None)
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()), None)
            }
            AppError::Ride(err) => {
                let status = match err {
                    RideError::Auth => StatusCode::UNAUTHORIZED,
                    RideError::Conflict => StatusCode::CONFLICT,
                    RideError::Reconciliation(_) => StatusCode::BAD_GATEWAY,
                    RideError::Persistence(msg) => {
                        tracing::error!(error = %msg, "Persistence error");
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    RideError::Permission => StatusCode::FORBIDDEN,
                };
                let user = err.user_message();
                (status, err.kind(), Some(user.message), Some(user.title))
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
            title,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
