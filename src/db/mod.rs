//! Persistence layer (Supabase REST, with an in-memory fallback).

pub mod memory;
pub mod supabase;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

use crate::models::ride::InvalidRideRow;
use crate::models::{Ride, RideCompletion, Scooter, UserId};
use async_trait::async_trait;

/// Table names as constants.
pub mod tables {
    pub const RIDES: &str = "rides";
    pub const SCOOTERS: &str = "scooters";
}

/// Durable record of rides and scooters.
#[async_trait]
pub trait RideStore: Send + Sync {
    /// The user's unfinished ride, if any.
    async fn find_active_ride(&self, user_id: &UserId) -> Result<Option<Ride>, StoreError>;

    /// Insert a new active ride and return the stored record.
    async fn insert_ride(&self, user_id: &UserId, scooter_id: i64) -> Result<Ride, StoreError>;

    /// Mark a ride finished and record its route metrics.
    async fn update_ride(&self, ride_id: i64, completion: &RideCompletion)
        -> Result<(), StoreError>;

    async fn list_scooters(&self) -> Result<Vec<Scooter>, StoreError>;
}

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store request failed: {0}")]
    Request(String),

    #[error("Store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed ride record: {0}")]
    Malformed(#[from] InvalidRideRow),

    #[error("Unexpected store response: {0}")]
    Unexpected(String),

    #[error("Ride {0} not found")]
    RideNotFound(i64),
}
