// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ride Tracker API Server
//!
//! Hosts the ride/proximity engine for the scooter-rental app, backed by
//! Supabase for storage and Mapbox for routing.

use ride_tracker::{
    config::Config,
    db::{MemoryStore, RideStore, SupabaseStore},
    services::MapboxClient,
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        proximity_threshold_m = config.ride.proximity_threshold_meters,
        "Starting Ride Tracker API"
    );

    let store: Arc<dyn RideStore> = match &config.supabase_url {
        Some(url) => Arc::new(SupabaseStore::new(
            url,
            &config.supabase_service_key,
            config.ride.store_timeout,
        )?),
        None => {
            tracing::warn!("SUPABASE_URL not set, using in-memory store (offline mode)");
            Arc::new(MemoryStore::new())
        }
    };

    let mapbox = Arc::new(MapboxClient::new(
        &config.mapbox_base_url,
        &config.mapbox_access_token,
        config.ride.reconcile_timeout,
    )?);
    tracing::info!(base_url = %config.mapbox_base_url, "Mapbox client initialized");

    // Build shared state
    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        mapbox.clone(),
        mapbox,
    ));

    // Build router
    let app = ride_tracker::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ride_tracker=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
