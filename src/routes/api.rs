// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::error::{AppError, RideError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{Coordinate, PositionSample, Ride, Scooter};
use crate::services::lifecycle::{FinishedRide, RideStatus};
use crate::services::session::Selection;
use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/scooters", get(list_scooters))
        .route("/api/ride", get(get_ride))
        .route("/api/ride/start", post(start_ride))
        .route("/api/ride/finish", post(finish_ride))
        .route("/api/location", post(push_location))
        .route("/api/location/permission", put(set_permission))
        .route(
            "/api/selection",
            get(get_selection).put(select_scooter).delete(clear_selection),
        )
        .route("/api/events", get(events))
        .route("/api/session", delete(sign_out))
}

/// Reject a request body that fails its field rules.
fn validate_body<T: Validate>(body: &T) -> Result<()> {
    body.validate().map_err(|e| {
        let messages: Vec<String> = e
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| match &e.message {
                    Some(m) => m.to_string(),
                    None => format!("invalid {}", field),
                })
            })
            .collect();
        AppError::BadRequest(messages.join(", "))
    })
}

// ─── Scooters ────────────────────────────────────────────────

async fn list_scooters(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Scooter>>> {
    let scooters = tokio::time::timeout(state.config.ride.store_timeout, state.store.list_scooters())
        .await
        .map_err(|_| RideError::Persistence("list_scooters timed out".to_string()))?
        .map_err(|e| RideError::Persistence(e.to_string()))?;

    Ok(Json(scooters))
}

// ─── Ride ────────────────────────────────────────────────────

async fn get_ride(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<RideStatus>> {
    let handle = state.sessions.session(&user.user_id).await?;
    Ok(Json(handle.session.status()))
}

#[derive(Debug, Deserialize, Validate)]
struct StartRideRequest {
    #[validate(range(min = 1, message = "scooter_id must be positive"))]
    scooter_id: i64,
}

async fn start_ride(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<StartRideRequest>,
) -> Result<(StatusCode, Json<Ride>)> {
    validate_body(&req)?;

    let handle = state.sessions.session(&user.user_id).await?;
    let ride = handle.session.start_ride(req.scooter_id).await?;
    Ok((StatusCode::CREATED, Json(ride)))
}

/// Response for finishing a ride.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct FinishRideResponse {
    /// `false` when there was no active ride to finish
    pub finished: bool,
    #[cfg_attr(feature = "binding-generation", ts(type = "unknown"))]
    pub ride: Option<FinishedRide>,
}

async fn finish_ride(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<FinishRideResponse>> {
    let handle = state.sessions.session(&user.user_id).await?;
    let ride = handle.session.finish_ride().await?;
    Ok(Json(FinishRideResponse {
        finished: ride.is_some(),
        ride,
    }))
}

// ─── Location ────────────────────────────────────────────────

#[derive(Debug, Deserialize, Validate)]
struct LocationRequest {
    #[validate(range(min = -180.0, max = 180.0, message = "longitude out of range"))]
    longitude: f64,
    #[validate(range(min = -90.0, max = 90.0, message = "latitude out of range"))]
    latitude: f64,
    #[validate(range(min = 0.0, message = "accuracy must be non-negative"))]
    accuracy: Option<f64>,
    timestamp: Option<DateTime<Utc>>,
}

async fn push_location(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<LocationRequest>,
) -> Result<StatusCode> {
    validate_body(&req)?;

    let sample = PositionSample {
        coordinate: Coordinate::new(req.longitude, req.latitude),
        accuracy: req.accuracy,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
    };

    let handle = state.sessions.session(&user.user_id).await?;
    handle.push_location(sample).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct PermissionRequest {
    granted: bool,
}

async fn set_permission(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<PermissionRequest>,
) -> Result<StatusCode> {
    let handle = state.sessions.session(&user.user_id).await?;
    handle.set_permission(req.granted).await;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Selection ───────────────────────────────────────────────

async fn get_selection(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Selection>> {
    let handle = state.sessions.session(&user.user_id).await?;
    Ok(Json(handle.session.selection()))
}

#[derive(Debug, Deserialize, Validate)]
struct SelectRequest {
    #[validate(range(min = 1, message = "scooter_id must be positive"))]
    scooter_id: i64,
}

async fn select_scooter(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SelectRequest>,
) -> Result<Json<Selection>> {
    validate_body(&req)?;

    let handle = state.sessions.session(&user.user_id).await?;
    let selection = handle.session.select_scooter(req.scooter_id).await?;
    Ok(Json(selection))
}

async fn clear_selection(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Selection>> {
    let handle = state.sessions.session(&user.user_id).await?;
    handle.session.clear_selection().await;
    Ok(Json(handle.session.selection()))
}

// ─── Signals ─────────────────────────────────────────────────

/// Server-sent stream of ride signals for the current user.
async fn events(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let handle = state.sessions.session(&user.user_id).await?;
    let rx = handle.session.signals().subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(signal) => match Event::default().event(signal.name()).json_data(&signal) {
                    Ok(event) => return Some((Ok(event), rx)),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode signal"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Signal stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ─── Session ─────────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SignOutResponse {
    pub signed_out: bool,
}

/// Reset local ride state for the user. An unfinished ride stays open in the
/// store and is picked up again on the next session.
async fn sign_out(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Json<SignOutResponse> {
    let signed_out = state.sessions.remove(&user.user_id).await;
    tracing::info!(user_id = %user.user_id, signed_out, "Sign-out requested");
    Json(SignOutResponse { signed_out })
}
