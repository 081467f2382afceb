// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-user ride sessions.
//!
//! A [`RideSession`] is the context object for one signed-in user: it owns
//! the proximity evaluator, the lifecycle manager, the walking preview for
//! the selected scooter and the geolocation subscription. Location samples
//! are delivered by a single pump task, in arrival order, first to the
//! proximity evaluator and then to the ride path.
//!
//! The subscription exists only while something needs it: a selected
//! scooter or a ride in progress.

use crate::config::RideConfig;
use crate::db::RideStore;
use crate::error::{AppError, RideError};
use crate::models::{PositionSample, Ride, Route, Scooter, UserId};
use crate::services::geolocation::{
    GeolocationSource, LocationError, PermissionStatus, PushedGeolocation, Subscription,
};
use crate::services::lifecycle::{FinishedRide, RideLifecycleManager, RideStatus};
use crate::services::mapbox::{DirectionsProvider, RouteReconciler};
use crate::services::proximity::ProximityEvaluator;
use crate::services::signals::{RideSignal, SignalBus};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

/// Backends shared by every session.
#[derive(Clone)]
pub struct RideServices {
    pub store: Arc<dyn RideStore>,
    pub reconciler: Arc<dyn RouteReconciler>,
    pub directions: Arc<dyn DirectionsProvider>,
    pub config: RideConfig,
}

/// The selected scooter as the client sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub scooter: Option<Scooter>,
    pub nearby: bool,
    /// Walking route from the user to the scooter, when one could be fetched
    pub route: Option<Route>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One user's ride engine.
pub struct RideSession {
    user_id: UserId,
    services: RideServices,
    geolocation: Arc<dyn GeolocationSource>,
    signals: SignalBus,
    manager: Arc<RideLifecycleManager>,
    proximity: Arc<Mutex<ProximityEvaluator>>,
    preview: Mutex<Option<Route>>,
    pump: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    bootstrap: OnceCell<()>,
}

impl RideSession {
    pub fn new(
        user_id: UserId,
        services: RideServices,
        geolocation: Arc<dyn GeolocationSource>,
    ) -> Self {
        let signals = SignalBus::new();
        let manager = Arc::new(RideLifecycleManager::new(
            Arc::clone(&services.store),
            Arc::clone(&services.reconciler),
            signals.clone(),
            services.config.clone(),
        ));
        let proximity = Arc::new(Mutex::new(ProximityEvaluator::new(
            services.config.proximity_threshold_meters,
        )));

        Self {
            user_id,
            services,
            geolocation,
            signals,
            manager,
            proximity,
            preview: Mutex::new(None),
            pump: tokio::sync::Mutex::new(None),
            bootstrap: OnceCell::new(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn manager(&self) -> &RideLifecycleManager {
        &self.manager
    }

    /// Attach to the user's unfinished ride, if any. Runs once; a failed
    /// attempt is retried by the next caller.
    pub async fn ensure_bootstrapped(&self) -> Result<(), RideError> {
        self.bootstrap
            .get_or_try_init(|| async {
                self.manager
                    .set_identity(Some(self.user_id.clone()))
                    .await?;
                self.refresh_tracking().await;
                Ok::<(), RideError>(())
            })
            .await?;
        Ok(())
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrap.initialized()
    }

    pub fn status(&self) -> RideStatus {
        self.manager.status()
    }

    pub fn selection(&self) -> Selection {
        let proximity = lock(&self.proximity);
        Selection {
            scooter: proximity.selected().cloned(),
            nearby: proximity.is_nearby(),
            route: lock(&self.preview).clone(),
        }
    }

    pub fn is_nearby(&self) -> bool {
        lock(&self.proximity).is_nearby()
    }

    /// Select a scooter by id, evaluate proximity from the current position
    /// and fetch a walking preview.
    pub async fn select_scooter(&self, scooter_id: i64) -> Result<Selection, AppError> {
        self.ensure_bootstrapped().await?;

        let scooters = match tokio::time::timeout(
            self.services.config.store_timeout,
            self.services.store.list_scooters(),
        )
        .await
        {
            Ok(Ok(scooters)) => scooters,
            Ok(Err(err)) => return Err(RideError::Persistence(err.to_string()).into()),
            Err(_) => {
                return Err(RideError::Persistence("list_scooters timed out".to_string()).into())
            }
        };
        let scooter = scooters
            .into_iter()
            .find(|s| s.id == scooter_id)
            .ok_or_else(|| AppError::NotFound(format!("Scooter {}", scooter_id)))?;

        let current = self.geolocation.current_position().await.ok();
        {
            // The position update and the selection report as one transition.
            let mut proximity = lock(&self.proximity);
            let before = proximity.is_nearby();
            if let Some(sample) = current {
                proximity.on_position(sample.coordinate);
            }
            proximity.select(scooter.clone());
            let after = proximity.is_nearby();
            drop(proximity);
            self.emit_proximity((after != before).then_some(after));
        }
        *lock(&self.preview) = None;

        tracing::info!(user_id = %self.user_id, scooter_id, "Scooter selected");
        self.refresh_tracking().await;

        let preview = match current {
            Some(sample) => self.walking_preview(sample, &scooter).await,
            None => {
                tracing::debug!("No current position, skipping walking preview");
                None
            }
        };
        {
            let still_selected =
                lock(&self.proximity).selected().map(|s| s.id) == Some(scooter_id);
            if still_selected {
                *lock(&self.preview) = preview;
            }
        }

        Ok(self.selection())
    }

    /// Deselect: nearby drops to false and the preview is discarded.
    pub async fn clear_selection(&self) {
        self.reset_selection();
        self.refresh_tracking().await;
    }

    pub async fn start_ride(&self, scooter_id: i64) -> Result<Ride, RideError> {
        self.ensure_bootstrapped().await?;
        let ride = self.manager.start_ride(scooter_id).await?;
        self.refresh_tracking().await;
        Ok(ride)
    }

    /// Finish the active ride; a completed ride also clears the selection.
    pub async fn finish_ride(&self) -> Result<Option<FinishedRide>, RideError> {
        self.ensure_bootstrapped().await?;
        let finished = self.manager.finish_ride().await?;
        if finished.is_some() {
            self.reset_selection();
        }
        self.refresh_tracking().await;
        Ok(finished)
    }

    /// Drop the identity and every piece of local state. The server-side ride,
    /// if any, stays open.
    pub async fn sign_out(&self) {
        if let Err(err) = self.manager.set_identity(None).await {
            tracing::warn!(error = %err, "Sign-out reset failed");
        }
        self.reset_selection();
        self.stop_pump().await;
        tracing::info!(user_id = %self.user_id, "Session signed out");
    }

    /// Start or stop the location subscription to match current needs.
    pub async fn refresh_tracking(&self) {
        let permission = self.geolocation.request_permission().await;
        let needed = self.tracking_needed();

        if permission == PermissionStatus::Denied {
            self.degrade_proximity(needed);
        } else {
            lock(&self.proximity).enable();
        }

        let mut pump = self.pump.lock().await;
        if needed && permission == PermissionStatus::Granted {
            if pump.is_none() {
                match self.geolocation.subscribe() {
                    Ok(subscription) => {
                        *pump = Some(self.spawn_pump(subscription));
                        tracing::info!(user_id = %self.user_id, "Location tracking started");
                    }
                    Err(err) => {
                        tracing::warn!(user_id = %self.user_id, error = %err, "Location subscription failed");
                        if err == LocationError::PermissionDenied {
                            drop(pump);
                            self.degrade_proximity(true);
                        }
                    }
                }
            }
        } else if let Some(handle) = pump.take() {
            handle.abort();
            let _ = handle.await;
            tracing::info!(user_id = %self.user_id, "Location tracking stopped");
        }
    }

    pub async fn is_tracking_location(&self) -> bool {
        self.pump.lock().await.is_some()
    }

    fn tracking_needed(&self) -> bool {
        lock(&self.proximity).has_selection() || self.manager.is_tracking()
    }

    fn spawn_pump(&self, mut subscription: Subscription) -> JoinHandle<()> {
        let proximity = Arc::clone(&self.proximity);
        let manager = Arc::clone(&self.manager);
        let signals = self.signals.clone();

        tokio::spawn(async move {
            while let Some(sample) = subscription.next_sample().await {
                let changed = lock(&proximity).on_position(sample.coordinate);
                if let Some(nearby) = changed {
                    signals.emit(RideSignal::ProximityChanged { nearby });
                }
                manager.on_position_sample(sample.coordinate);
            }
            tracing::debug!("Location source closed");
        })
    }

    async fn stop_pump(&self) {
        if let Some(handle) = self.pump.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    async fn walking_preview(&self, from: PositionSample, scooter: &Scooter) -> Option<Route> {
        let request = self
            .services
            .directions
            .directions(from.coordinate, scooter.coordinate());
        match tokio::time::timeout(self.services.config.reconcile_timeout, request).await {
            Ok(Ok(routes)) => routes.into_iter().next(),
            Ok(Err(err)) => {
                tracing::warn!(scooter_id = scooter.id, error = %err, "Walking directions failed");
                None
            }
            Err(_) => {
                tracing::warn!(scooter_id = scooter.id, "Walking directions timed out");
                None
            }
        }
    }

    fn reset_selection(&self) {
        let changed = lock(&self.proximity).clear_selection();
        self.emit_proximity(changed);
        *lock(&self.preview) = None;
    }

    fn degrade_proximity(&self, needed: bool) {
        let changed = lock(&self.proximity).disable();
        self.emit_proximity(changed);
        if needed {
            tracing::warn!(user_id = %self.user_id, "Location permission denied, proximity disabled");
        }
    }

    fn emit_proximity(&self, changed: Option<bool>) {
        if let Some(nearby) = changed {
            tracing::debug!(user_id = %self.user_id, nearby, "Proximity changed");
            self.signals.emit(RideSignal::ProximityChanged { nearby });
        }
    }
}

impl Drop for RideSession {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.get_mut().take() {
            handle.abort();
        }
    }
}

/// A session together with the client-fed location source behind it.
pub struct SessionHandle {
    pub session: RideSession,
    pub feed: Arc<PushedGeolocation>,
}

impl SessionHandle {
    fn new(user_id: UserId, services: RideServices) -> Self {
        let feed = Arc::new(PushedGeolocation::new());
        let geolocation: Arc<dyn GeolocationSource> = feed.clone();
        Self {
            session: RideSession::new(user_id, services, geolocation),
            feed,
        }
    }

    /// Deliver a sample from the device. Returns once the sample has been
    /// applied to proximity and to the active ride's path.
    ///
    /// The first sample from a device that never reported its permission
    /// counts as a grant.
    pub async fn push_location(&self, sample: PositionSample) -> Result<(), RideError> {
        if self.feed.permission() == PermissionStatus::Undetermined {
            self.feed.set_permission(PermissionStatus::Granted);
            self.session.refresh_tracking().await;
        }
        self.feed
            .publish(sample)
            .await
            .map_err(|_| RideError::Permission)
    }

    pub async fn set_permission(&self, granted: bool) {
        let status = if granted {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        };
        tracing::info!(user_id = %self.session.user_id(), ?status, "Location permission reported");
        self.feed.set_permission(status);
        self.session.refresh_tracking().await;
    }
}

/// Live sessions keyed by user.
pub struct SessionRegistry {
    services: RideServices,
    sessions: DashMap<UserId, Arc<SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(services: RideServices) -> Self {
        Self {
            services,
            sessions: DashMap::new(),
        }
    }

    pub fn services(&self) -> &RideServices {
        &self.services
    }

    /// The user's session, created and bootstrapped on first use.
    pub async fn session(&self, user_id: &UserId) -> Result<Arc<SessionHandle>, RideError> {
        let handle = Arc::clone(
            &self
                .sessions
                .entry(user_id.clone())
                .or_insert_with(|| {
                    tracing::debug!(%user_id, "Creating ride session");
                    Arc::new(SessionHandle::new(user_id.clone(), self.services.clone()))
                }),
        );
        handle.session.ensure_bootstrapped().await?;
        Ok(handle)
    }

    /// Sign the user out and forget the session. Returns whether one existed.
    pub async fn remove(&self, user_id: &UserId) -> bool {
        let Some((_, handle)) = self.sessions.remove(user_id) else {
            return false;
        };
        handle.session.sign_out().await;
        true
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
