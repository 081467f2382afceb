// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - ride engine logic layer.

pub mod distance;
pub mod geolocation;
pub mod lifecycle;
pub mod mapbox;
pub mod path;
pub mod proximity;
pub mod session;
pub mod signals;

pub use distance::distance;
pub use geolocation::{
    GeolocationSource, LocationError, PermissionStatus, PushedGeolocation, Subscription,
};
pub use lifecycle::{FinishedRide, RideLifecycleManager, RidePhase, RideStatus};
pub use mapbox::{DirectionsProvider, MapboxClient, RouteError, RouteReconciler};
pub use path::{RidePathAccumulator, RidePathSnapshot};
pub use proximity::ProximityEvaluator;
pub use session::{RideServices, RideSession, Selection, SessionHandle, SessionRegistry};
pub use signals::{FailureReason, RideSignal, SignalBus};
