// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ride records: the typed model and the `rides` table row it is validated from.

use crate::models::{Coordinate, UserId};
use crate::time_utils::{format_utc_rfc3339, parse_utc_rfc3339};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A validated ride.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ride {
    /// Store-assigned ride ID
    pub id: i64,
    /// Owner
    pub user_id: UserId,
    /// Scooter being ridden
    pub scooter_id: i64,
    /// When the ride record was created
    pub started_at: Option<DateTime<Utc>>,
    /// `None` while the ride is active
    pub finished_at: Option<DateTime<Utc>>,
    /// Final route metrics, written on finish
    pub route: Option<RideRoute>,
}

impl Ride {
    pub fn is_active(&self) -> bool {
        self.finished_at.is_none()
    }
}

/// Route metrics recorded when a ride finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRoute {
    pub duration_seconds: f64,
    pub distance_meters: f64,
    pub coordinates: Vec<Coordinate>,
}

/// Values written to a ride by the finish operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RideCompletion {
    pub finished_at: DateTime<Utc>,
    pub route: RideRoute,
}

/// Raw row of the `rides` table.
///
/// Every field is optional so that a malformed row deserializes and can be
/// rejected with a precise reason instead of a serde error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RideRow {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub scooter_id: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default, rename = "routeDuration")]
    pub route_duration: Option<f64>,
    #[serde(default, rename = "routeDistance")]
    pub route_distance: Option<f64>,
    /// JSON-encoded `[[lon, lat], ...]`
    #[serde(default, rename = "routeCoords")]
    pub route_coords: Option<String>,
}

/// Update body sent when a ride finishes.
#[derive(Debug, Clone, Serialize)]
pub struct RideCompletionRow {
    pub finished_at: String,
    #[serde(rename = "routeDuration")]
    pub route_duration: f64,
    #[serde(rename = "routeDistance")]
    pub route_distance: f64,
    #[serde(rename = "routeCoords")]
    pub route_coords: String,
}

impl TryFrom<&RideCompletion> for RideCompletionRow {
    type Error = serde_json::Error;

    fn try_from(completion: &RideCompletion) -> Result<Self, Self::Error> {
        Ok(Self {
            finished_at: format_utc_rfc3339(completion.finished_at),
            route_duration: completion.route.duration_seconds,
            route_distance: completion.route.distance_meters,
            route_coords: serde_json::to_string(&completion.route.coordinates)?,
        })
    }
}

/// Why a ride row was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidRideRow {
    #[error("ride row is missing `{0}`")]
    MissingField(&'static str),

    #[error("ride row has unparseable timestamp `{field}`: {value}")]
    BadTimestamp { field: &'static str, value: String },

    #[error("ride row has undecodable routeCoords: {0}")]
    BadCoordinates(String),
}

impl TryFrom<RideRow> for Ride {
    type Error = InvalidRideRow;

    fn try_from(row: RideRow) -> Result<Self, Self::Error> {
        let id = row.id.ok_or(InvalidRideRow::MissingField("id"))?;
        let user_id = row
            .user_id
            .filter(|u| !u.is_empty())
            .ok_or(InvalidRideRow::MissingField("user_id"))?;
        let scooter_id = row
            .scooter_id
            .ok_or(InvalidRideRow::MissingField("scooter_id"))?;

        let started_at = parse_optional_timestamp("created_at", row.created_at)?;
        let finished_at = parse_optional_timestamp("finished_at", row.finished_at)?;

        let route = match (row.route_duration, row.route_distance) {
            (Some(duration_seconds), Some(distance_meters)) => {
                let coordinates = match row.route_coords.as_deref() {
                    Some(raw) if !raw.is_empty() => serde_json::from_str(raw)
                        .map_err(|e| InvalidRideRow::BadCoordinates(e.to_string()))?,
                    _ => Vec::new(),
                };
                Some(RideRoute {
                    duration_seconds,
                    distance_meters,
                    coordinates,
                })
            }
            _ => None,
        };

        Ok(Ride {
            id,
            user_id: UserId::new(user_id),
            scooter_id,
            started_at,
            finished_at,
            route,
        })
    }
}

fn parse_optional_timestamp(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, InvalidRideRow> {
    match value {
        None => Ok(None),
        Some(v) => parse_utc_rfc3339(&v)
            .map(Some)
            .ok_or(InvalidRideRow::BadTimestamp { field, value: v }),
    }
}
