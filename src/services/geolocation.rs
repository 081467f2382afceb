// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Geolocation sources.
//!
//! The engine never talks to a device directly. Each user session owns a
//! [`PushedGeolocation`] that the client feeds over HTTP; anything else that
//! can produce position samples can implement [`GeolocationSource`].

use crate::models::PositionSample;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};

/// Samples queued per subscriber before publishers wait.
const SUBSCRIPTION_CAPACITY: usize = 64;

/// Location permission as last reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("No position available")]
    Unavailable,
}

/// One sample on its way to a subscriber. `done` fires once the subscriber
/// has finished with it.
#[derive(Debug)]
struct Delivery {
    sample: PositionSample,
    done: oneshot::Sender<()>,
}

/// A live feed of position samples. Dropping it releases the subscription.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<Delivery>,
    pending: Option<oneshot::Sender<()>>,
}

impl Subscription {
    /// Next sample in arrival order, or `None` once the source is gone.
    ///
    /// Asking for the next sample acknowledges the previous one to its
    /// publisher, so a consumer must finish with a sample before calling
    /// this again.
    pub async fn next_sample(&mut self) -> Option<PositionSample> {
        if let Some(done) = self.pending.take() {
            let _ = done.send(());
        }
        let delivery = self.rx.recv().await?;
        self.pending = Some(delivery.done);
        Some(delivery.sample)
    }
}

#[async_trait]
pub trait GeolocationSource: Send + Sync {
    async fn request_permission(&self) -> PermissionStatus;

    async fn current_position(&self) -> Result<PositionSample, LocationError>;

    fn subscribe(&self) -> Result<Subscription, LocationError>;

    fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }
}

/// Position source fed by the client.
#[derive(Debug)]
pub struct PushedGeolocation {
    state: Mutex<FeedState>,
}

#[derive(Debug)]
struct FeedState {
    permission: PermissionStatus,
    last: Option<PositionSample>,
    subscribers: Vec<mpsc::Sender<Delivery>>,
}

impl Default for PushedGeolocation {
    fn default() -> Self {
        Self::new()
    }
}

impl PushedGeolocation {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FeedState {
                permission: PermissionStatus::Undetermined,
                last: None,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Remember `sample` as the current position and hand it to every
    /// subscriber, returning once each of them has consumed it.
    ///
    /// Subscribers see samples in publish order and none is skipped; a slow
    /// subscriber holds publishers back. Samples are refused while
    /// permission is denied.
    pub async fn publish(&self, sample: PositionSample) -> Result<(), LocationError> {
        let subscribers = {
            let mut state = self.lock_state();
            if state.permission == PermissionStatus::Denied {
                return Err(LocationError::PermissionDenied);
            }
            state.last = Some(sample);
            state.subscribers.retain(|tx| !tx.is_closed());
            state.subscribers.clone()
        };

        let mut acks = Vec::with_capacity(subscribers.len());
        for tx in subscribers {
            let (done, ack) = oneshot::channel();
            if tx.send(Delivery { sample, done }).await.is_ok() {
                acks.push(ack);
            }
        }
        for ack in acks {
            // Err means the subscription went away with the sample in hand.
            let _ = ack.await;
        }
        Ok(())
    }

    /// Record the device's permission; denial forgets the last position.
    pub fn set_permission(&self, permission: PermissionStatus) {
        let mut state = self.lock_state();
        state.permission = permission;
        if permission == PermissionStatus::Denied {
            state.last = None;
        }
    }

    pub fn permission(&self) -> PermissionStatus {
        self.lock_state().permission
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock_state()
            .subscribers
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FeedState> {
        // A poisoned lock only means a panic elsewhere; the state is still plain data.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl GeolocationSource for PushedGeolocation {
    async fn request_permission(&self) -> PermissionStatus {
        self.permission()
    }

    async fn current_position(&self) -> Result<PositionSample, LocationError> {
        let state = self.lock_state();
        if state.permission == PermissionStatus::Denied {
            return Err(LocationError::PermissionDenied);
        }
        state.last.ok_or(LocationError::Unavailable)
    }

    fn subscribe(&self) -> Result<Subscription, LocationError> {
        let mut state = self.lock_state();
        if state.permission == PermissionStatus::Denied {
            return Err(LocationError::PermissionDenied);
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.push(tx);
        Ok(Subscription { rx, pending: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coordinate;

    #[tokio::test]
    async fn test_subscription_receives_in_order() {
        let feed = PushedGeolocation::new();
        feed.set_permission(PermissionStatus::Granted);
        let mut sub = feed.subscribe().unwrap();
        let consumer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while seen.len() < 3 {
                seen.push(sub.next_sample().await.unwrap().coordinate.longitude);
            }
            seen
        });

        for i in 0..3 {
            feed.publish(PositionSample::now(Coordinate::new(i as f64, 0.0)))
                .await
                .unwrap();
        }

        assert_eq!(consumer.await.unwrap(), vec![0.0, 1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_publish_waits_for_consumer() {
        let feed = std::sync::Arc::new(PushedGeolocation::new());
        let mut sub = feed.subscribe().unwrap();

        let publisher = {
            let feed = feed.clone();
            tokio::spawn(async move {
                feed.publish(PositionSample::now(Coordinate::new(1.0, 1.0)))
                    .await
            })
        };

        let sample = sub.next_sample().await.unwrap();
        assert_eq!(sample.coordinate, Coordinate::new(1.0, 1.0));
        tokio::task::yield_now().await;
        assert!(!publisher.is_finished());

        // Asking for the next sample acknowledges the first.
        tokio::select! {
            _ = sub.next_sample() => panic!("no second sample was published"),
            result = publisher => assert_eq!(result.unwrap(), Ok(())),
        }
    }

    #[tokio::test]
    async fn test_dropped_subscription_does_not_block_publisher() {
        let feed = PushedGeolocation::new();
        let sub = feed.subscribe().unwrap();
        drop(sub);

        feed.publish(PositionSample::now(Coordinate::new(1.0, 1.0)))
            .await
            .unwrap();
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_subscription() {
        let feed = PushedGeolocation::new();
        let sub = feed.subscribe().unwrap();
        assert_eq!(feed.subscriber_count(), 1);

        feed.unsubscribe(sub);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_denied_blocks_position() {
        let feed = PushedGeolocation::new();
        feed.publish(PositionSample::now(Coordinate::new(1.0, 1.0)))
            .await
            .unwrap();
        assert!(feed.current_position().await.is_ok());

        feed.set_permission(PermissionStatus::Denied);
        assert_eq!(
            feed.current_position().await,
            Err(LocationError::PermissionDenied)
        );
        assert!(feed.subscribe().is_err());
        assert_eq!(feed.request_permission().await, PermissionStatus::Denied);
    }
}
