// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Scooter snapshot as stored in the `scooters` table.

use crate::models::Coordinate;
use serde::{Deserialize, Serialize};

/// Immutable snapshot of a scooter fetched from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scooter {
    /// Scooter ID (primary key)
    pub id: i64,
    /// Longitude in degrees
    #[serde(rename = "long")]
    pub longitude: f64,
    /// Latitude in degrees
    #[serde(rename = "lat")]
    pub latitude: f64,
    /// Battery level (percent), if reported
    #[serde(default)]
    pub battery: Option<f64>,
}

impl Scooter {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.longitude, self.latitude)
    }
}
