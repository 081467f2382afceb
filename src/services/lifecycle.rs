// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ride lifecycle: start, track and finish one ride per user.
//!
//! State machine:
//! - `Idle` → `Starting` (insert in flight) → `Active` | back to `Idle`
//! - `Active` → `Finishing` (reconcile + update in flight) → `Idle` | back to `Active`
//! - `Bootstrapping` while an identity change looks up an unfinished ride
//!
//! State lives behind a synchronous mutex that is never held across an
//! await. `Starting` and `Finishing` are reservations taken before any
//! network call, so interleaved start/finish requests observe them and are
//! refused. A reservation whose operation is dropped mid-flight is rolled
//! back by [`Reservation`]'s `Drop`.

use crate::config::RideConfig;
use crate::db::{RideStore, StoreError};
use crate::error::RideError;
use crate::models::{Coordinate, Ride, RideCompletion, RideRoute, Route, UserId};
use crate::services::mapbox::{RouteError, RouteReconciler};
use crate::services::path::{RidePathAccumulator, RidePathSnapshot};
use crate::services::signals::{FailureReason, RideSignal, SignalBus};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Externally visible phase of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RidePhase {
    Idle,
    Bootstrapping,
    Starting,
    Active,
    Finishing,
}

/// Point-in-time view of the lifecycle, including live path metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RideStatus {
    pub phase: RidePhase,
    pub ride: Option<Ride>,
    pub distance_meters: f64,
    pub duration_seconds: u64,
    pub path_points: usize,
}

/// Outcome of a successful finish.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinishedRide {
    pub ride_id: i64,
    pub route: RideRoute,
    /// `false` when the path was too short and local metrics were stored
    pub reconciled: bool,
}

struct ActiveRide {
    ride: Ride,
    accumulator: RidePathAccumulator,
}

enum RideState {
    Idle,
    Bootstrapping,
    Starting,
    Active(ActiveRide),
    Finishing(ActiveRide),
}

impl RideState {
    fn phase(&self) -> RidePhase {
        match self {
            RideState::Idle => RidePhase::Idle,
            RideState::Bootstrapping => RidePhase::Bootstrapping,
            RideState::Starting => RidePhase::Starting,
            RideState::Active(_) => RidePhase::Active,
            RideState::Finishing(_) => RidePhase::Finishing,
        }
    }
}

struct Inner {
    identity: Option<UserId>,
    /// Bumped on every identity change; results of calls begun under an
    /// older epoch are not adopted.
    epoch: u64,
    state: RideState,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Rolls `Starting` back to `Idle` and `Finishing` back to `Active` unless
/// disarmed, as long as the identity has not changed meanwhile.
struct Reservation<'a> {
    inner: &'a Mutex<Inner>,
    epoch: u64,
    armed: bool,
}

impl<'a> Reservation<'a> {
    fn new(inner: &'a Mutex<Inner>, epoch: u64) -> Self {
        Self {
            inner,
            epoch,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = lock(self.inner);
        if inner.epoch != self.epoch {
            return;
        }
        inner.state = match std::mem::replace(&mut inner.state, RideState::Idle) {
            RideState::Starting => RideState::Idle,
            RideState::Finishing(active) => {
                tracing::debug!(ride_id = active.ride.id, "Finish rolled back, ride stays active");
                RideState::Active(active)
            }
            other => other,
        };
    }
}

/// Drives one user's ride from start to finish.
pub struct RideLifecycleManager {
    store: Arc<dyn RideStore>,
    reconciler: Arc<dyn RouteReconciler>,
    signals: SignalBus,
    config: RideConfig,
    inner: Mutex<Inner>,
}

impl RideLifecycleManager {
    pub fn new(
        store: Arc<dyn RideStore>,
        reconciler: Arc<dyn RouteReconciler>,
        signals: SignalBus,
        config: RideConfig,
    ) -> Self {
        Self {
            store,
            reconciler,
            signals,
            config,
            inner: Mutex::new(Inner {
                identity: None,
                epoch: 0,
                state: RideState::Idle,
            }),
        }
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn identity(&self) -> Option<UserId> {
        lock(&self.inner).identity.clone()
    }

    /// Switch to a new identity (or none, on sign-out).
    ///
    /// Local state is reset first. With an identity, the store is asked for
    /// an unfinished ride, which becomes the active ride with its duration
    /// resumed from the ride's start time. Returns the adopted ride, if any.
    ///
    /// Signing out does not finish a ride on the server.
    pub async fn set_identity(&self, user: Option<UserId>) -> Result<Option<Ride>, RideError> {
        let epoch = {
            let mut inner = lock(&self.inner);
            inner.epoch += 1;
            inner.identity = user.clone();
            let next = if user.is_some() {
                RideState::Bootstrapping
            } else {
                RideState::Idle
            };
            match std::mem::replace(&mut inner.state, next) {
                RideState::Active(active) | RideState::Finishing(active) => {
                    tracing::warn!(
                        ride_id = active.ride.id,
                        "Identity changed with a ride in progress; server-side ride left open"
                    );
                }
                _ => {}
            }
            inner.epoch
        };

        let Some(user) = user else {
            tracing::info!("Signed out, ride state reset");
            return Ok(None);
        };

        let result = self
            .store_call("find_active_ride", self.store.find_active_ride(&user))
            .await;

        let mut inner = lock(&self.inner);
        if inner.epoch != epoch {
            tracing::debug!(user_id = %user, "Bootstrap superseded by a newer identity");
            return Ok(None);
        }
        inner.state = RideState::Idle;

        match result? {
            Some(ride) => {
                let elapsed = ride
                    .started_at
                    .and_then(|started| (Utc::now() - started).to_std().ok())
                    .unwrap_or(Duration::ZERO);
                let mut accumulator = RidePathAccumulator::new();
                accumulator.on_ride_resume(elapsed);

                tracing::info!(
                    user_id = %user,
                    ride_id = ride.id,
                    scooter_id = ride.scooter_id,
                    elapsed_secs = elapsed.as_secs(),
                    "Resumed active ride"
                );
                inner.state = RideState::Active(ActiveRide {
                    ride: ride.clone(),
                    accumulator,
                });
                Ok(Some(ride))
            }
            None => {
                tracing::info!(user_id = %user, "No active ride");
                Ok(None)
            }
        }
    }

    /// Start a ride on `scooter_id`.
    ///
    /// Refused with [`RideError::Conflict`] unless idle, without touching
    /// the store.
    pub async fn start_ride(&self, scooter_id: i64) -> Result<Ride, RideError> {
        let (user, epoch) = {
            let mut inner = lock(&self.inner);
            if !matches!(inner.state, RideState::Idle) {
                let phase = inner.state.phase();
                drop(inner);
                tracing::info!(scooter_id, ?phase, "Start refused, ride not idle");
                return Err(self.start_failed(RideError::Conflict));
            }
            let Some(user) = inner.identity.clone() else {
                drop(inner);
                return Err(self.start_failed(RideError::Auth));
            };
            inner.state = RideState::Starting;
            (user, inner.epoch)
        };
        let mut reservation = Reservation::new(&self.inner, epoch);

        let result = self
            .store_call("insert_ride", self.store.insert_ride(&user, scooter_id))
            .await;

        let ride = match result {
            Ok(ride) => ride,
            Err(err) => {
                drop(reservation);
                return Err(self.start_failed(err));
            }
        };

        {
            let mut inner = lock(&self.inner);
            if inner.epoch != epoch {
                reservation.disarm();
                drop(inner);
                tracing::warn!(
                    ride_id = ride.id,
                    "Ride inserted after identity changed; not adopted"
                );
                return Err(self.start_failed(RideError::Auth));
            }

            let mut accumulator = RidePathAccumulator::new();
            accumulator.on_ride_start();
            inner.state = RideState::Active(ActiveRide {
                ride: ride.clone(),
                accumulator,
            });
            reservation.disarm();
        }

        tracing::info!(user_id = %user, ride_id = ride.id, scooter_id, "Ride started");
        self.signals.emit(RideSignal::RideStarted {
            ride_id: ride.id,
            scooter_id,
        });
        Ok(ride)
    }

    /// Finish the active ride.
    ///
    /// Returns `Ok(None)` when there is nothing to finish, including while a
    /// finish is already in flight. Any failure leaves the ride active.
    pub async fn finish_ride(&self) -> Result<Option<FinishedRide>, RideError> {
        let (ride_id, snapshot, epoch) = {
            let mut inner = lock(&self.inner);
            match std::mem::replace(&mut inner.state, RideState::Idle) {
                RideState::Active(active) => {
                    let snapshot = active.accumulator.snapshot();
                    let ride_id = active.ride.id;
                    inner.state = RideState::Finishing(active);
                    (ride_id, snapshot, inner.epoch)
                }
                other => {
                    let phase = other.phase();
                    inner.state = other;
                    tracing::debug!(?phase, "Finish ignored, no active ride");
                    return Ok(None);
                }
            }
        };
        let mut reservation = Reservation::new(&self.inner, epoch);

        let (route, reconciled) = match self.completion_route(&snapshot).await {
            Ok(outcome) => outcome,
            Err(err) => {
                drop(reservation);
                return Err(self.finish_failed(ride_id, err));
            }
        };

        let completion = RideCompletion {
            finished_at: Utc::now(),
            route,
        };
        if let Err(err) = self
            .store_call("update_ride", self.store.update_ride(ride_id, &completion))
            .await
        {
            drop(reservation);
            return Err(self.finish_failed(ride_id, err));
        }

        {
            let mut inner = lock(&self.inner);
            if inner.epoch == epoch {
                if let RideState::Finishing(mut active) =
                    std::mem::replace(&mut inner.state, RideState::Idle)
                {
                    active.accumulator.on_ride_stop();
                }
            }
            reservation.disarm();
        }

        tracing::info!(
            ride_id,
            reconciled,
            duration_secs = completion.route.duration_seconds,
            distance_m = completion.route.distance_meters,
            points = completion.route.coordinates.len(),
            "Ride finished"
        );
        self.signals.emit(RideSignal::RideFinished {
            ride_id,
            duration_seconds: completion.route.duration_seconds,
            distance_meters: completion.route.distance_meters,
        });

        Ok(Some(FinishedRide {
            ride_id,
            route: completion.route,
            reconciled,
        }))
    }

    /// Feed a position sample to the active ride's path, if any.
    pub fn on_position_sample(&self, position: Coordinate) {
        let mut inner = lock(&self.inner);
        if let RideState::Active(active) | RideState::Finishing(active) = &mut inner.state {
            active.accumulator.on_position_sample(position);
        }
    }

    /// Whether position samples are currently needed for a ride.
    pub fn is_tracking(&self) -> bool {
        matches!(
            lock(&self.inner).state,
            RideState::Active(_) | RideState::Finishing(_)
        )
    }

    pub fn phase(&self) -> RidePhase {
        lock(&self.inner).state.phase()
    }

    pub fn status(&self) -> RideStatus {
        let inner = lock(&self.inner);
        match &inner.state {
            RideState::Active(active) | RideState::Finishing(active) => {
                let snapshot = active.accumulator.snapshot();
                RideStatus {
                    phase: inner.state.phase(),
                    ride: Some(active.ride.clone()),
                    distance_meters: snapshot.distance_meters,
                    duration_seconds: snapshot.duration_seconds,
                    path_points: snapshot.path.len(),
                }
            }
            other => RideStatus {
                phase: other.phase(),
                ride: None,
                distance_meters: 0.0,
                duration_seconds: 0,
                path_points: 0,
            },
        }
    }

    /// Route to store for a finished ride: local metrics for short paths,
    /// otherwise the reconciled route.
    async fn completion_route(
        &self,
        snapshot: &RidePathSnapshot,
    ) -> Result<(RideRoute, bool), RideError> {
        if snapshot.path.len() < 2 {
            tracing::debug!(
                points = snapshot.path.len(),
                "Path too short to reconcile, using local metrics"
            );
            let route = RideRoute {
                duration_seconds: snapshot.duration_seconds as f64,
                distance_meters: snapshot.distance_meters,
                coordinates: snapshot.path.clone(),
            };
            return Ok((route, false));
        }

        let route = self.reconcile(&snapshot.path).await?;
        Ok((route.into(), true))
    }

    /// Call the reconciler with a per-attempt timeout, retrying transient
    /// failures with linear backoff.
    async fn reconcile(&self, path: &[Coordinate]) -> Result<Route, RideError> {
        let policy = &self.config.reconcile_retry;
        let mut attempt = 1;

        loop {
            let result =
                match tokio::time::timeout(self.config.reconcile_timeout, self.reconciler.reconcile(path))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(RouteError::Timeout),
                };

            match result {
                Ok(route) if route.is_well_formed() => return Ok(route),
                Ok(route) => {
                    tracing::warn!(
                        points = route.coordinates.len(),
                        duration = route.duration,
                        distance = route.distance,
                        "Reconciler returned an unusable route"
                    );
                    return Err(RideError::Reconciliation(
                        "route has no geometry or invalid metrics".to_string(),
                    ));
                }
                Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    tracing::warn!(
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Reconciliation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "Reconciliation failed");
                    return Err(RideError::Reconciliation(err.to_string()));
                }
            }
        }
    }

    /// Run a store call under the store timeout, mapping every failure to
    /// [`RideError::Persistence`].
    async fn store_call<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, RideError> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                tracing::warn!(op, error = %err, "Store call failed");
                Err(RideError::Persistence(err.to_string()))
            }
            Err(_) => {
                tracing::warn!(
                    op,
                    timeout_secs = self.config.store_timeout.as_secs_f64(),
                    "Store call timed out"
                );
                Err(RideError::Persistence(format!("{} timed out", op)))
            }
        }
    }

    fn start_failed(&self, err: RideError) -> RideError {
        tracing::warn!(kind = err.kind(), error = %err, "Ride start failed");
        self.signals.emit(RideSignal::RideStartFailed {
            reason: FailureReason::from(&err),
        });
        err
    }

    fn finish_failed(&self, ride_id: i64, err: RideError) -> RideError {
        tracing::warn!(ride_id, kind = err.kind(), error = %err, "Ride finish failed");
        self.signals.emit(RideSignal::RideFinishFailed {
            reason: FailureReason::from(&err),
        });
        err
    }
}
