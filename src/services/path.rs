// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ride path accumulation.
//!
//! While a ride is active every position sample is appended to the path and
//! the great-circle distance from the previous sample is added to the running
//! total. A 1 Hz ticker counts elapsed whole seconds independently of the
//! samples. Samples are taken as delivered: no reordering, deduplication or
//! smoothing.

use crate::models::Coordinate;
use crate::services::distance::distance;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Path and metrics captured when a ride stops.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RidePathSnapshot {
    pub path: Vec<Coordinate>,
    pub distance_meters: f64,
    pub duration_seconds: u64,
}

/// Accumulates the GPS path of one ride.
///
/// Starting the accumulator spawns a tokio task, so it must be driven from
/// within a runtime.
#[derive(Debug, Default)]
pub struct RidePathAccumulator {
    path: Vec<Coordinate>,
    last: Option<Coordinate>,
    distance_meters: f64,
    elapsed: Arc<AtomicU64>,
    ticker: Option<JoinHandle<()>>,
}

impl RidePathAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the path and metrics and start counting duration from zero.
    pub fn on_ride_start(&mut self) {
        self.on_ride_resume(Duration::ZERO);
    }

    /// Reset the path and metrics, seeding the duration with `elapsed`.
    ///
    /// Used when re-attaching to a ride that started before this process saw
    /// it; the path itself starts empty.
    pub fn on_ride_resume(&mut self, elapsed: Duration) {
        self.stop_ticker();
        self.path.clear();
        self.last = None;
        self.distance_meters = 0.0;
        self.elapsed = Arc::new(AtomicU64::new(elapsed.as_secs()));
        self.ticker = Some(spawn_ticker(Arc::clone(&self.elapsed)));
    }

    /// Record one position sample. Ignored while no ride is being tracked.
    pub fn on_position_sample(&mut self, position: Coordinate) {
        if !self.is_active() {
            return;
        }
        if let Some(last) = self.last {
            self.distance_meters += distance(last, position);
        }
        self.path.push(position);
        self.last = Some(position);
    }

    /// Stop the ticker and hand back everything accumulated.
    pub fn on_ride_stop(&mut self) -> RidePathSnapshot {
        self.stop_ticker();
        let snapshot = RidePathSnapshot {
            path: std::mem::take(&mut self.path),
            distance_meters: self.distance_meters,
            duration_seconds: self.elapsed.load(Ordering::Relaxed),
        };
        self.last = None;
        self.distance_meters = 0.0;
        snapshot
    }

    /// Current values without stopping.
    pub fn snapshot(&self) -> RidePathSnapshot {
        RidePathSnapshot {
            path: self.path.clone(),
            distance_meters: self.distance_meters,
            duration_seconds: self.elapsed.load(Ordering::Relaxed),
        }
    }

    pub fn is_active(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    pub fn distance_meters(&self) -> f64 {
        self.distance_meters
    }

    pub fn duration_seconds(&self) -> u64 {
        self.elapsed.load(Ordering::Relaxed)
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for RidePathAccumulator {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

fn spawn_ticker(elapsed: Arc<AtomicU64>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            elapsed.fetch_add(1, Ordering::Relaxed);
        }
    })
}
