// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Proximity between the user and the selected scooter.

use crate::models::{Coordinate, Scooter};
use crate::services::distance::distance;

/// Whether `position` is strictly within `threshold_meters` of `scooter`.
///
/// Never nearby when no scooter is selected.
pub fn evaluate(position: Coordinate, scooter: Option<&Scooter>, threshold_meters: f64) -> bool {
    scooter.is_some_and(|s| distance(position, s.coordinate()) < threshold_meters)
}

/// Tracks the selected scooter and the derived "nearby" flag.
///
/// Mutators return `Some(nearby)` only when the flag changed, so callers can
/// emit a signal exactly on transitions.
#[derive(Debug, Clone)]
pub struct ProximityEvaluator {
    threshold_meters: f64,
    selected: Option<Scooter>,
    last_position: Option<Coordinate>,
    nearby: bool,
    enabled: bool,
}

impl ProximityEvaluator {
    pub fn new(threshold_meters: f64) -> Self {
        Self {
            threshold_meters,
            selected: None,
            last_position: None,
            nearby: false,
            enabled: true,
        }
    }

    pub fn threshold_meters(&self) -> f64 {
        self.threshold_meters
    }

    pub fn evaluate(&self, position: Coordinate, scooter: Option<&Scooter>) -> bool {
        evaluate(position, scooter, self.threshold_meters)
    }

    pub fn is_nearby(&self) -> bool {
        self.nearby
    }

    pub fn selected(&self) -> Option<&Scooter> {
        self.selected.as_ref()
    }

    pub fn has_selection(&self) -> bool {
        self.selected.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Select a scooter and re-evaluate against the last known position.
    pub fn select(&mut self, scooter: Scooter) -> Option<bool> {
        self.selected = Some(scooter);
        self.recompute()
    }

    /// Clear the selection; nearby drops to `false`.
    pub fn clear_selection(&mut self) -> Option<bool> {
        self.selected = None;
        self.set_nearby(false)
    }

    /// Feed a new position sample.
    pub fn on_position(&mut self, position: Coordinate) -> Option<bool> {
        if !self.enabled {
            return None;
        }
        self.last_position = Some(position);
        self.recompute()
    }

    /// Location permission was denied: stop evaluating and report not nearby.
    pub fn disable(&mut self) -> Option<bool> {
        self.enabled = false;
        self.last_position = None;
        self.set_nearby(false)
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    fn recompute(&mut self) -> Option<bool> {
        let nearby = match (self.enabled, self.last_position) {
            (true, Some(position)) => self.evaluate(position, self.selected.as_ref()),
            _ => false,
        };
        self.set_nearby(nearby)
    }

    fn set_nearby(&mut self, nearby: bool) -> Option<bool> {
        if self.nearby == nearby {
            return None;
        }
        self.nearby = nearby;
        Some(nearby)
    }
}
