// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Presentation signals emitted by the ride engine.

use crate::error::RideError;
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use tokio::sync::broadcast;

const SIGNAL_CAPACITY: usize = 64;

/// Why a ride operation failed, in a form the client can show directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct FailureReason {
    pub kind: String,
    pub title: String,
    pub message: String,
}

impl From<&RideError> for FailureReason {
    fn from(err: &RideError) -> Self {
        let user = err.user_message();
        Self {
            kind: err.kind().to_string(),
            title: user.title,
            message: user.message,
        }
    }
}

/// One observable event for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum RideSignal {
    RideStarted {
        #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
        ride_id: i64,
        #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
        scooter_id: i64,
    },
    RideStartFailed {
        reason: FailureReason,
    },
    RideFinished {
        #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
        ride_id: i64,
        duration_seconds: f64,
        distance_meters: f64,
    },
    RideFinishFailed {
        reason: FailureReason,
    },
    ProximityChanged {
        nearby: bool,
    },
}

impl RideSignal {
    /// Event name used on the server-sent event stream.
    pub fn name(&self) -> &'static str {
        match self {
            RideSignal::RideStarted { .. } => "ride_started",
            RideSignal::RideStartFailed { .. } => "ride_start_failed",
            RideSignal::RideFinished { .. } => "ride_finished",
            RideSignal::RideFinishFailed { .. } => "ride_finish_failed",
            RideSignal::ProximityChanged { .. } => "proximity_changed",
        }
    }
}

/// Fan-out of [`RideSignal`]s to any number of observers.
///
/// Emitting with no observers attached is not an error; the signal is dropped.
#[derive(Debug, Clone)]
pub struct SignalBus {
    tx: broadcast::Sender<RideSignal>,
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, signal: RideSignal) {
        tracing::debug!(signal = signal.name(), "Emitting signal");
        let _ = self.tx.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RideSignal> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_json_shape() {
        let json = serde_json::to_value(RideSignal::ProximityChanged { nearby: true }).unwrap();
        assert_eq!(json["type"], "proximity_changed");
        assert_eq!(json["nearby"], true);

        let failed = RideSignal::RideStartFailed {
            reason: FailureReason::from(&RideError::Conflict),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["type"], "ride_start_failed");
        assert_eq!(json["reason"]["kind"], "conflict");
        assert_eq!(json["reason"]["title"], "Ride In Progress");
    }

    #[tokio::test]
    async fn test_emit_reaches_subscribers() {
        let bus = SignalBus::new();
        let mut rx = bus.subscribe();
        bus.emit(RideSignal::ProximityChanged { nearby: false });
        assert_eq!(
            rx.recv().await.unwrap(),
            RideSignal::ProximityChanged { nearby: false }
        );
    }

    #[test]
    fn test_emit_without_observers_is_fine() {
        let bus = SignalBus::new();
        bus.emit(RideSignal::ProximityChanged { nearby: true });
        assert_eq!(bus.observer_count(), 0);
    }
}
