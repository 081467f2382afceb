// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Mapbox client for route reconciliation and walking directions.
//!
//! Handles:
//! - Map matching of a recorded ride path (`cycling` profile)
//! - Walking directions from the user to a selected scooter
//! - Classifying failures as transient (retry) or permanent

use crate::models::{Coordinate, Route};
use async_trait::async_trait;
use geo::LineString;
use serde::Deserialize;
use std::time::Duration;

/// Map matching accepts at most this many coordinates per request.
pub const MAX_MATCHING_COORDINATES: usize = 100;

/// Route reconciliation and directions errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RouteError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Mapbox returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    #[error("No route found: {0}")]
    NoMatch(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl RouteError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RouteError::Transport(_) | RouteError::Timeout => true,
            RouteError::Status { status, .. } => *status == 429 || *status >= 500,
            RouteError::NoMatch(_) | RouteError::Malformed(_) => false,
        }
    }
}

/// Reconstructs a plausible route from an ordered GPS path.
#[async_trait]
pub trait RouteReconciler: Send + Sync {
    /// `path` holds at least two points.
    async fn reconcile(&self, path: &[Coordinate]) -> Result<Route, RouteError>;
}

/// Candidate routes between two points.
#[async_trait]
pub trait DirectionsProvider: Send + Sync {
    async fn directions(&self, from: Coordinate, to: Coordinate)
        -> Result<Vec<Route>, RouteError>;
}

/// Mapbox HTTP client.
#[derive(Clone)]
pub struct MapboxClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl MapboxClient {
    /// Create a client; `timeout` bounds each request at the transport level.
    pub fn new(base_url: &str, access_token: &str, timeout: Duration) -> Result<Self, RouteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RouteError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    async fn get(&self, url: &str, extra: &[(&str, &str)]) -> Result<String, RouteError> {
        let response = self
            .http
            .get(url)
            .query(&[
                ("geometries", "geojson"),
                ("overview", "full"),
                ("access_token", self.access_token.as_str()),
            ])
            .query(extra)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_reqwest_error)?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), body = %body, "Mapbox request failed");
            return Err(RouteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl RouteReconciler for MapboxClient {
    async fn reconcile(&self, path: &[Coordinate]) -> Result<Route, RouteError> {
        let sampled = downsample(path, MAX_MATCHING_COORDINATES);
        let url = format!(
            "{}/matching/v5/mapbox/cycling/{}",
            self.base_url,
            coordinate_list(&sampled)
        );

        tracing::debug!(
            points = path.len(),
            sent = sampled.len(),
            "Requesting map matching"
        );
        let body = self.get(&url, &[]).await?;
        parse_matching_response(&body)
    }
}

#[async_trait]
impl DirectionsProvider for MapboxClient {
    async fn directions(
        &self,
        from: Coordinate,
        to: Coordinate,
    ) -> Result<Vec<Route>, RouteError> {
        let url = format!(
            "{}/directions/v5/mapbox/walking/{}",
            self.base_url,
            coordinate_list(&[from, to])
        );
        let body = self.get(&url, &[("alternatives", "true")]).await?;
        parse_directions_response(&body)
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> RouteError {
    if err.is_timeout() {
        RouteError::Timeout
    } else {
        RouteError::Transport(err.to_string())
    }
}

/// `lon,lat;lon,lat;...` as used in Mapbox request paths.
fn coordinate_list(coordinates: &[Coordinate]) -> String {
    coordinates
        .iter()
        .map(|c| format!("{},{}", c.longitude, c.latitude))
        .collect::<Vec<_>>()
        .join(";")
}

/// Evenly pick at most `max` points, always keeping the first and last.
pub fn downsample(path: &[Coordinate], max: usize) -> Vec<Coordinate> {
    if path.len() <= max || max < 2 {
        return path.to_vec();
    }

    let last = path.len() - 1;
    (0..max)
        .map(|i| path[i * last / (max - 1)])
        .collect()
}

#[derive(Debug, Deserialize)]
struct MatchingResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    matchings: Vec<RouteResponse>,
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<RouteResponse>,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    geometry: geojson::Geometry,
    duration: f64,
    distance: f64,
}

impl TryFrom<RouteResponse> for Route {
    type Error = RouteError;

    fn try_from(raw: RouteResponse) -> Result<Self, Self::Error> {
        let line: LineString<f64> = raw
            .geometry
            .value
            .try_into()
            .map_err(|e: geojson::Error| RouteError::Malformed(e.to_string()))?;

        Ok(Route {
            coordinates: line.coords().copied().map(Coordinate::from).collect(),
            duration: raw.duration,
            distance: raw.distance,
        })
    }
}

/// Parse a map-matching response body into the best matching.
pub fn parse_matching_response(body: &str) -> Result<Route, RouteError> {
    let response: MatchingResponse =
        serde_json::from_str(body).map_err(|e| RouteError::Malformed(e.to_string()))?;

    if response.code != "Ok" {
        return Err(RouteError::NoMatch(describe(&response.code, response.message)));
    }

    let best = response
        .matchings
        .into_iter()
        .next()
        .ok_or_else(|| RouteError::NoMatch("empty matchings".to_string()))?;
    Route::try_from(best)
}

/// Parse a directions response body into candidate routes, best first.
pub fn parse_directions_response(body: &str) -> Result<Vec<Route>, RouteError> {
    let response: DirectionsResponse =
        serde_json::from_str(body).map_err(|e| RouteError::Malformed(e.to_string()))?;

    if response.code != "Ok" {
        return Err(RouteError::NoMatch(describe(&response.code, response.message)));
    }

    response.routes.into_iter().map(Route::try_from).collect()
}

fn describe(code: &str, message: Option<String>) -> String {
    match message {
        Some(message) => format!("{}: {}", code, message),
        None => code.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATCH_OK: &str = r#"{
        "code": "Ok",
        "matchings": [{
            "confidence": 0.9,
            "geometry": {"type": "LineString", "coordinates": [[-122.1, 37.4], [-122.2, 37.5]]},
            "duration": 120.5,
            "distance": 830.2
        }],
        "tracepoints": []
    }"#;

    #[test]
    fn test_parse_matching_ok() {
        let route = parse_matching_response(MATCH_OK).unwrap();
        assert_eq!(route.coordinates.len(), 2);
        assert_eq!(route.coordinates[0], Coordinate::new(-122.1, 37.4));
        assert_eq!(route.duration, 120.5);
        assert_eq!(route.distance, 830.2);
    }

    #[test]
    fn test_parse_matching_no_match_code() {
        let body = r#"{"code": "NoMatch", "message": "Could not match the trace."}"#;
        let err = parse_matching_response(body).unwrap_err();
        assert!(matches!(err, RouteError::NoMatch(ref m) if m.starts_with("NoMatch")));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_matching_empty_matchings() {
        let body = r#"{"code": "Ok", "matchings": []}"#;
        assert!(matches!(
            parse_matching_response(body),
            Err(RouteError::NoMatch(_))
        ));
    }

    #[test]
    fn test_parse_matching_wrong_geometry() {
        let body = r#"{"code": "Ok", "matchings": [{
            "geometry": {"type": "Point", "coordinates": [-122.1, 37.4]},
            "duration": 1.0, "distance": 1.0
        }]}"#;
        assert!(matches!(
            parse_matching_response(body),
            Err(RouteError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_matching_response("<html>"),
            Err(RouteError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_directions_routes() {
        let body = r#"{"code": "Ok", "routes": [
            {"geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [0.0, 0.001]]},
             "duration": 80.0, "distance": 111.2, "legs": []},
            {"geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [0.001, 0.001]]},
             "duration": 95.0, "distance": 150.0, "legs": []}
        ], "waypoints": []}"#;
        let routes = parse_directions_response(body).unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].duration, 80.0);
    }

    #[test]
    fn test_transient_classification() {
        assert!(RouteError::Timeout.is_transient());
        assert!(RouteError::Transport("reset".into()).is_transient());
        assert!(RouteError::Status {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(RouteError::Status {
            status: 429,
            body: String::new()
        }
        .is_transient());
        assert!(!RouteError::Status {
            status: 422,
            body: String::new()
        }
        .is_transient());
    }

    #[test]
    fn test_downsample_keeps_endpoints() {
        let path: Vec<Coordinate> = (0..250).map(|i| Coordinate::new(i as f64, 0.0)).collect();
        let sampled = downsample(&path, MAX_MATCHING_COORDINATES);
        assert_eq!(sampled.len(), MAX_MATCHING_COORDINATES);
        assert_eq!(sampled[0], path[0]);
        assert_eq!(sampled[sampled.len() - 1], path[249]);

        let short = &path[..10];
        assert_eq!(downsample(short, MAX_MATCHING_COORDINATES), short.to_vec());
    }

    #[test]
    fn test_coordinate_list_format() {
        let list = coordinate_list(&[Coordinate::new(-122.5, 37.25), Coordinate::new(1.0, 2.0)]);
        assert_eq!(list, "-122.5,37.25;1,2");
    }
}
