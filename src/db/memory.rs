//! In-process [`RideStore`] used in offline mode and by tests.

use crate::db::{RideStore, StoreError};
use crate::models::{Ride, RideCompletion, Scooter, UserId};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// In-memory store with call counters and failure injection.
pub struct MemoryStore {
    rides: Mutex<Vec<Ride>>,
    scooters: Mutex<Vec<Scooter>>,
    next_id: Mutex<i64>,
    latency: Mutex<Duration>,
    fail_inserts: AtomicBool,
    fail_updates: AtomicBool,
    fail_lookups: AtomicBool,
    insert_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            rides: Mutex::new(Vec::new()),
            scooters: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
            latency: Mutex::new(Duration::ZERO),
            fail_inserts: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            fail_lookups: AtomicBool::new(false),
            insert_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scooters(scooters: Vec<Scooter>) -> Self {
        Self {
            scooters: Mutex::new(scooters),
            ..Self::default()
        }
    }

    /// Delay every call by `latency` (simulates a network round-trip).
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.lock().await = latency;
    }

    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Store a ride as-is (e.g. an unfinished ride left from an earlier session).
    pub async fn seed_ride(&self, ride: Ride) {
        let mut next_id = self.next_id.lock().await;
        *next_id = (*next_id).max(ride.id + 1);
        self.rides.lock().await.push(ride);
    }

    pub async fn rides(&self) -> Vec<Ride> {
        self.rides.lock().await.clone()
    }

    pub async fn ride(&self, ride_id: i64) -> Option<Ride> {
        self.rides
            .lock()
            .await
            .iter()
            .find(|r| r.id == ride_id)
            .cloned()
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn injected(op: &str) -> StoreError {
    StoreError::Status {
        status: 503,
        body: format!("injected {} failure", op),
    }
}

#[async_trait]
impl RideStore for MemoryStore {
    async fn find_active_ride(&self, user_id: &UserId) -> Result<Option<Ride>, StoreError> {
        self.simulate_latency().await;
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(injected("lookup"));
        }

        Ok(self
            .rides
            .lock()
            .await
            .iter()
            .filter(|r| &r.user_id == user_id && r.is_active())
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn insert_ride(&self, user_id: &UserId, scooter_id: i64) -> Result<Ride, StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(injected("insert"));
        }

        let id = {
            let mut next_id = self.next_id.lock().await;
            let id = *next_id;
            *next_id += 1;
            id
        };

        let ride = Ride {
            id,
            user_id: user_id.clone(),
            scooter_id,
            started_at: Some(Utc::now()),
            finished_at: None,
            route: None,
        };
        self.rides.lock().await.push(ride.clone());
        Ok(ride)
    }

    async fn update_ride(
        &self,
        ride_id: i64,
        completion: &RideCompletion,
    ) -> Result<(), StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(injected("update"));
        }

        let mut rides = self.rides.lock().await;
        let ride = rides
            .iter_mut()
            .find(|r| r.id == ride_id)
            .ok_or(StoreError::RideNotFound(ride_id))?;
        ride.finished_at = Some(completion.finished_at);
        ride.route = Some(completion.route.clone());
        Ok(())
    }

    async fn list_scooters(&self) -> Result<Vec<Scooter>, StoreError> {
        self.simulate_latency().await;
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(injected("lookup"));
        }
        Ok(self.scooters.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RideRoute;

    #[tokio::test]
    async fn test_insert_then_find_active() {
        let store = MemoryStore::new();
        let user = UserId::from("u1");

        assert!(store.find_active_ride(&user).await.unwrap().is_none());

        let ride = store.insert_ride(&user, 3).await.unwrap();
        let active = store.find_active_ride(&user).await.unwrap().unwrap();
        assert_eq!(active.id, ride.id);
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test]
    async fn test_finished_ride_is_not_active() {
        let store = MemoryStore::new();
        let user = UserId::from("u1");
        let ride = store.insert_ride(&user, 3).await.unwrap();

        let completion = RideCompletion {
            finished_at: Utc::now(),
            route: RideRoute {
                duration_seconds: 5.0,
                distance_meters: 10.0,
                coordinates: vec![],
            },
        };
        store.update_ride(ride.id, &completion).await.unwrap();

        assert!(store.find_active_ride(&user).await.unwrap().is_none());
        assert!(store.ride(ride.id).await.unwrap().route.is_some());
    }

    #[tokio::test]
    async fn test_update_unknown_ride_fails() {
        let store = MemoryStore::new();
        let completion = RideCompletion {
            finished_at: Utc::now(),
            route: RideRoute {
                duration_seconds: 0.0,
                distance_meters: 0.0,
                coordinates: vec![],
            },
        };
        assert!(matches!(
            store.update_ride(99, &completion).await,
            Err(StoreError::RideNotFound(99))
        ));
    }
}
