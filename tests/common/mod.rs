// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use ride_tracker::config::{Config, RetryPolicy, RideConfig};
use ride_tracker::db::MemoryStore;
use ride_tracker::middleware::auth::create_jwt;
use ride_tracker::models::{Coordinate, Route, Scooter, UserId};
use ride_tracker::routes::create_router;
use ride_tracker::services::distance::{distance, path_length};
use ride_tracker::services::{
    DirectionsProvider, PushedGeolocation, RideLifecycleManager, RideServices, RideSession,
    RideSignal, RouteError, RouteReconciler, SignalBus,
};
use ride_tracker::AppState;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Check if a Supabase test project is configured.
#[allow(dead_code)]
pub fn supabase_available() -> bool {
    std::env::var("SUPABASE_TEST_URL").is_ok() && std::env::var("SUPABASE_TEST_SERVICE_KEY").is_ok()
}

/// Skip test with message if no Supabase test project is configured.
#[macro_export]
macro_rules! require_supabase {
    () => {
        if !crate::common::supabase_available() {
            eprintln!("⚠️  Skipping: SUPABASE_TEST_URL not set");
            return;
        }
    };
}

/// Mean earth radius used by the haversine distance.
#[allow(dead_code)]
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Move `origin` by the given meters north and east.
#[allow(dead_code)]
pub fn offset(origin: Coordinate, north_m: f64, east_m: f64) -> Coordinate {
    let dlat = (north_m / EARTH_RADIUS_M).to_degrees();
    let dlon = (east_m / (EARTH_RADIUS_M * origin.latitude.to_radians().cos())).to_degrees();
    Coordinate::new(origin.longitude + dlon, origin.latitude + dlat)
}

/// A point in Palo Alto used as the default scooter position.
#[allow(dead_code)]
pub const ORIGIN: Coordinate = Coordinate::new(-122.143, 37.4419);

#[allow(dead_code)]
pub fn scooter(id: i64, at: Coordinate) -> Scooter {
    Scooter {
        id,
        longitude: at.longitude,
        latitude: at.latitude,
        battery: Some(87.0),
    }
}

/// Ride config with short timeouts and fast retries.
#[allow(dead_code)]
pub fn test_ride_config() -> RideConfig {
    RideConfig {
        store_timeout: Duration::from_secs(2),
        reconcile_timeout: Duration::from_secs(2),
        reconcile_retry: RetryPolicy {
            max_attempts: 3,
            base_backoff_ms: 10,
        },
        ..RideConfig::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FAKE ROUTING SERVICES
// ═══════════════════════════════════════════════════════════════════════════

/// Reconciler that replays queued results, then echoes the input path.
#[derive(Default)]
pub struct FakeReconciler {
    queued: Mutex<VecDeque<Result<Route, RouteError>>>,
    calls: AtomicUsize,
    latency: Mutex<Duration>,
    last_path: Mutex<Option<Vec<Coordinate>>>,
}

#[allow(dead_code)]
impl FakeReconciler {
    pub fn push(&self, result: Result<Route, RouteError>) {
        self.queued.lock().unwrap().push_back(result);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_path(&self) -> Option<Vec<Coordinate>> {
        self.last_path.lock().unwrap().clone()
    }
}

#[async_trait]
impl RouteReconciler for FakeReconciler {
    async fn reconcile(&self, path: &[Coordinate]) -> Result<Route, RouteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_path.lock().unwrap() = Some(path.to_vec());

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let queued = self.queued.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            Ok(Route {
                coordinates: path.to_vec(),
                duration: 60.0,
                distance: path_length(path),
            })
        })
    }
}

/// Directions provider returning a straight walking line.
#[derive(Default)]
pub struct FakeDirections {
    calls: AtomicUsize,
    fail: AtomicBool,
}

#[allow(dead_code)]
impl FakeDirections {
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectionsProvider for FakeDirections {
    async fn directions(
        &self,
        from: Coordinate,
        to: Coordinate,
    ) -> Result<Vec<Route>, RouteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RouteError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        let meters = distance(from, to);
        Ok(vec![Route {
            coordinates: vec![from, to],
            duration: meters / 1.4,
            distance: meters,
        }])
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// RIG
// ═══════════════════════════════════════════════════════════════════════════

/// In-memory backends shared by a test.
#[derive(Clone)]
pub struct TestRig {
    pub store: Arc<MemoryStore>,
    pub reconciler: Arc<FakeReconciler>,
    pub directions: Arc<FakeDirections>,
    pub config: RideConfig,
}

#[allow(dead_code)]
impl TestRig {
    pub fn new() -> Self {
        Self::with_scooters(vec![scooter(5, ORIGIN), scooter(7, offset(ORIGIN, 2000.0, 0.0))])
    }

    pub fn with_scooters(scooters: Vec<Scooter>) -> Self {
        Self {
            store: Arc::new(MemoryStore::with_scooters(scooters)),
            reconciler: Arc::new(FakeReconciler::default()),
            directions: Arc::new(FakeDirections::default()),
            config: test_ride_config(),
        }
    }

    pub fn services(&self) -> RideServices {
        RideServices {
            store: self.store.clone(),
            reconciler: self.reconciler.clone(),
            directions: self.directions.clone(),
            config: self.config.clone(),
        }
    }

    pub fn manager(&self) -> Arc<RideLifecycleManager> {
        Arc::new(RideLifecycleManager::new(
            self.store.clone(),
            self.reconciler.clone(),
            SignalBus::new(),
            self.config.clone(),
        ))
    }

    /// A manager already signed in as `user`.
    pub async fn signed_in_manager(&self, user: &str) -> Arc<RideLifecycleManager> {
        let manager = self.manager();
        manager
            .set_identity(Some(UserId::new(user)))
            .await
            .expect("bootstrap should succeed");
        manager
    }

    pub fn session(&self, user: &str) -> (RideSession, Arc<PushedGeolocation>) {
        let feed = Arc::new(PushedGeolocation::new());
        let session = RideSession::new(UserId::new(user), self.services(), feed.clone());
        (session, feed)
    }

    pub fn app(&self) -> (axum::Router, Arc<AppState>) {
        let config = Config {
            ride: self.config.clone(),
            ..Config::default()
        };
        let state = Arc::new(AppState::new(
            config,
            self.store.clone(),
            self.reconciler.clone(),
            self.directions.clone(),
        ));
        (create_router(state.clone()), state)
    }
}

/// Create a test app with in-memory dependencies.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>, TestRig) {
    let rig = TestRig::new();
    let (app, state) = rig.app();
    (app, state, rig)
}

/// Create a session JWT for `user` signed with `signing_key`.
#[allow(dead_code)]
pub fn create_test_jwt(user: &str, signing_key: &[u8]) -> String {
    create_jwt(&UserId::new(user), signing_key).unwrap()
}

/// Read a response body as JSON.
#[allow(dead_code)]
pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Wait for the next signal, failing the test after two seconds.
#[allow(dead_code)]
pub async fn next_signal(rx: &mut broadcast::Receiver<RideSignal>) -> RideSignal {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for signal")
        .expect("signal channel closed")
}

