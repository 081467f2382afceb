// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Route shape shared by walking directions and map-matching results.

use crate::models::{Coordinate, RideRoute};
use serde::{Deserialize, Serialize};

/// A route returned by the directions or map-matching service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Route geometry, in travel order
    pub coordinates: Vec<Coordinate>,
    /// Travel time in seconds
    pub duration: f64,
    /// Length in meters
    pub distance: f64,
}

impl Route {
    /// A route is usable when it has geometry and finite, non-negative metrics.
    pub fn is_well_formed(&self) -> bool {
        !self.coordinates.is_empty()
            && self.duration.is_finite()
            && self.duration >= 0.0
            && self.distance.is_finite()
            && self.distance >= 0.0
    }
}

impl From<Route> for RideRoute {
    fn from(route: Route) -> Self {
        RideRoute {
            duration_seconds: route.duration,
            distance_meters: route.distance,
            coordinates: route.coordinates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(duration: f64, distance: f64, points: usize) -> Route {
        Route {
            coordinates: (0..points)
                .map(|i| Coordinate::new(i as f64 * 0.001, 0.0))
                .collect(),
            duration,
            distance,
        }
    }

    #[test]
    fn test_well_formed() {
        assert!(route(10.0, 100.0, 2).is_well_formed());
        assert!(route(0.0, 0.0, 1).is_well_formed());
    }

    #[test]
    fn test_malformed() {
        assert!(!route(10.0, 100.0, 0).is_well_formed());
        assert!(!route(-1.0, 100.0, 2).is_well_formed());
        assert!(!route(10.0, f64::NAN, 2).is_well_formed());
    }
}
