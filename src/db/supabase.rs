// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Supabase (PostgREST) client implementing [`RideStore`].
//!
//! Provides typed operations for:
//! - Rides (active-ride lookup, insert, finish)
//! - Scooters (listing)
//!
//! Rows are validated into [`Ride`] at this boundary; a malformed row is a
//! store error, never a partially-filled ride.

use crate::db::{tables, RideStore, StoreError};
use crate::models::ride::RideCompletionRow;
use crate::models::{Ride, RideCompletion, RideRow, Scooter, UserId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Supabase REST client.
#[derive(Clone)]
pub struct SupabaseStore {
    http: reqwest::Client,
    rest_url: String,
    api_key: String,
}

impl SupabaseStore {
    /// Create a client for the project at `project_url` using a service-role key.
    ///
    /// `timeout` bounds every request at the transport level.
    pub fn new(project_url: &str, api_key: &str, timeout: Duration) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Request(format!("Failed to build HTTP client: {}", e)))?;

        tracing::info!(url = project_url, "Using Supabase store");

        Ok(Self {
            http,
            rest_url: format!("{}/rest/v1", project_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.rest_url, table)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Send a request and parse a JSON array of rows.
    async fn fetch_rows<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<Vec<T>, StoreError> {
        let response = builder
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        let response = check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| StoreError::Unexpected(format!("JSON parse error: {}", e)))
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        builder: reqwest::RequestBuilder,
        body: &B,
    ) -> Result<reqwest::Response, StoreError> {
        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;
        check_status(response).await
    }
}

#[async_trait]
impl RideStore for SupabaseStore {
    async fn find_active_ride(&self, user_id: &UserId) -> Result<Option<Ride>, StoreError> {
        let user_filter = format!("eq.{}", user_id);
        let builder = self
            .request(reqwest::Method::GET, &self.table_url(tables::RIDES))
            .query(&[
                ("select", "*"),
                ("user_id", user_filter.as_str()),
                ("finished_at", "is.null"),
                ("order", "created_at.desc"),
                ("limit", "1"),
            ]);

        let rows: Vec<RideRow> = self.fetch_rows(builder).await?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(Ride::try_from(row)?)),
            None => Ok(None),
        }
    }

    async fn insert_ride(&self, user_id: &UserId, scooter_id: i64) -> Result<Ride, StoreError> {
        #[derive(Serialize)]
        struct NewRide<'a> {
            user_id: &'a str,
            scooter_id: i64,
        }

        let body = [NewRide {
            user_id: user_id.as_str(),
            scooter_id,
        }];

        let builder = self
            .request(reqwest::Method::POST, &self.table_url(tables::RIDES))
            .header("Prefer", "return=representation");
        let response = self.send_json(builder, &body).await?;

        let rows: Vec<RideRow> = response
            .json()
            .await
            .map_err(|e| StoreError::Unexpected(format!("JSON parse error: {}", e)))?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Unexpected("Insert returned no rows".to_string()))?;
        let ride = Ride::try_from(row)?;

        tracing::debug!(ride_id = ride.id, %user_id, scooter_id, "Inserted ride");
        Ok(ride)
    }

    async fn update_ride(
        &self,
        ride_id: i64,
        completion: &RideCompletion,
    ) -> Result<(), StoreError> {
        let body = RideCompletionRow::try_from(completion)
            .map_err(|e| StoreError::Unexpected(format!("Failed to encode route: {}", e)))?;

        let id_filter = format!("eq.{}", ride_id);
        let builder = self
            .request(reqwest::Method::PATCH, &self.table_url(tables::RIDES))
            .query(&[("id", id_filter.as_str())])
            .header("Prefer", "return=representation");
        let response = self.send_json(builder, &body).await?;

        // PostgREST answers an update that matched nothing with an empty array.
        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| StoreError::Unexpected(format!("JSON parse error: {}", e)))?;
        if rows.is_empty() {
            return Err(StoreError::RideNotFound(ride_id));
        }

        Ok(())
    }

    async fn list_scooters(&self) -> Result<Vec<Scooter>, StoreError> {
        let builder = self
            .request(reqwest::Method::GET, &self.table_url(tables::SCOOTERS))
            .query(&[("select", "*")]);
        self.fetch_rows(builder).await
    }
}

/// Check response status and return an error if not successful.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(status, body = %body, "Supabase request failed");
    Err(StoreError::Status { status, body })
}
