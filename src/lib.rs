// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Ride Tracker: ride and proximity engine for a scooter-rental app
//!
//! This crate provides the backend API that watches a rider's location,
//! decides whether they are near the selected scooter, and records rides
//! from start to finish with a map-matched route.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::RideStore;
use services::{DirectionsProvider, RideServices, RouteReconciler, SessionRegistry};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RideStore>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn RideStore>,
        reconciler: Arc<dyn RouteReconciler>,
        directions: Arc<dyn DirectionsProvider>,
    ) -> Self {
        let sessions = SessionRegistry::new(RideServices {
            store: Arc::clone(&store),
            reconciler,
            directions,
            config: config.ride.clone(),
        });
        Self {
            config,
            store,
            sessions,
        }
    }
}
