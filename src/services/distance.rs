// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Great-circle distance between coordinates.

use crate::models::Coordinate;
use geo::{Distance as _, Haversine, Point};

/// Haversine distance in meters.
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    Haversine.distance(Point::from(a), Point::from(b))
}

/// Total length of a path in meters.
pub fn path_length(path: &[Coordinate]) -> f64 {
    path.windows(2).map(|w| distance(w[0], w[1])).sum()
}
