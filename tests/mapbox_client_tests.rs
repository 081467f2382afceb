// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Mapbox client tests against a local stand-in server.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use ride_tracker::models::Coordinate;
use ride_tracker::services::mapbox::MAX_MATCHING_COORDINATES;
use ride_tracker::services::{DirectionsProvider, MapboxClient, RouteError, RouteReconciler};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod common;
use common::{offset, ORIGIN};

const TOKEN: &str = "pk.test-token";

/// What the stand-in server answers with.
#[derive(Clone, Copy)]
enum Reply {
    Match,
    NoMatch,
    Status(u16),
    Slow,
}

struct Recorded {
    path_coords: String,
    query: HashMap<String, String>,
}

#[derive(Clone)]
struct Server {
    reply: Arc<Mutex<Reply>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Server {
    fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    fn requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_coordinate_count(&self) -> usize {
        let requests = self.requests.lock().unwrap();
        requests.last().unwrap().path_coords.split(';').count()
    }

    fn last_query(&self, key: &str) -> Option<String> {
        let requests = self.requests.lock().unwrap();
        requests.last().unwrap().query.get(key).cloned()
    }
}

fn route_json(coords: &str) -> String {
    let points: Vec<String> = coords
        .split(';')
        .map(|pair| format!("[{}]", pair))
        .collect();
    format!(
        r#"{{"geometry":{{"type":"LineString","coordinates":[{}]}},"duration":300.0,"distance":1800.0}}"#,
        points.join(",")
    )
}

async fn respond(
    server: &Server,
    coords: String,
    query: HashMap<String, String>,
    key: &str,
) -> axum::response::Response {
    let reply = *server.reply.lock().unwrap();
    let alternatives = query.get("alternatives").map(String::as_str) == Some("true");
    server.requests.lock().unwrap().push(Recorded {
        path_coords: coords.clone(),
        query,
    });

    match reply {
        Reply::Match => {
            let mut routes = vec![route_json(&coords)];
            if alternatives {
                routes.push(route_json(&coords));
            }
            (
                StatusCode::OK,
                format!(r#"{{"code":"Ok","{}":[{}]}}"#, key, routes.join(",")),
            )
                .into_response()
        }
        Reply::NoMatch => (
            StatusCode::OK,
            r#"{"code":"NoMatch","message":"Could not match the trace."}"#.to_string(),
        )
            .into_response(),
        Reply::Status(code) => (
            StatusCode::from_u16(code).unwrap(),
            r#"{"message":"upstream said no"}"#.to_string(),
        )
            .into_response(),
        Reply::Slow => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            StatusCode::OK.into_response()
        }
    }
}

async fn matching(
    State(server): State<Server>,
    Path(coords): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> axum::response::Response {
    respond(&server, coords, query, "matchings").await
}

async fn directions(
    State(server): State<Server>,
    Path(coords): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> axum::response::Response {
    respond(&server, coords, query, "routes").await
}

async fn spawn_server() -> (Server, String) {
    let server = Server {
        reply: Arc::new(Mutex::new(Reply::Match)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/matching/v5/mapbox/cycling/{coords}", get(matching))
        .route("/directions/v5/mapbox/walking/{coords}", get(directions))
        .with_state(server.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (server, format!("http://{}", addr))
}

fn client(base_url: &str) -> MapboxClient {
    MapboxClient::new(base_url, TOKEN, Duration::from_millis(500)).unwrap()
}

fn straight_path(points: usize) -> Vec<Coordinate> {
    (0..points)
        .map(|i| offset(ORIGIN, i as f64 * 10.0, 0.0))
        .collect()
}

#[tokio::test]
async fn test_reconcile_sends_token_and_geojson() {
    let (server, base) = spawn_server().await;
    let path = straight_path(3);

    let route = client(&base).reconcile(&path).await.unwrap();

    assert_eq!(route.coordinates.len(), 3);
    assert_eq!(route.duration, 300.0);
    assert_eq!(route.distance, 1800.0);
    assert_eq!(server.last_query("access_token").as_deref(), Some(TOKEN));
    assert_eq!(server.last_query("geometries").as_deref(), Some("geojson"));
    assert_eq!(server.last_query("alternatives"), None);
}

#[tokio::test]
async fn test_long_path_is_downsampled() {
    let (server, base) = spawn_server().await;
    let path = straight_path(340);

    let route = client(&base).reconcile(&path).await.unwrap();

    assert_eq!(server.last_coordinate_count(), MAX_MATCHING_COORDINATES);
    // Endpoints survive the downsampling.
    assert!((route.coordinates[0].latitude - path[0].latitude).abs() < 1e-9);
    assert!(
        (route.coordinates.last().unwrap().latitude - path.last().unwrap().latitude).abs() < 1e-9
    );
}

#[tokio::test]
async fn test_no_match_code_is_permanent() {
    let (server, base) = spawn_server().await;
    server.set_reply(Reply::NoMatch);

    let err = client(&base).reconcile(&straight_path(4)).await.unwrap_err();

    assert!(matches!(err, RouteError::NoMatch(ref m) if m.starts_with("NoMatch")));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, base) = spawn_server().await;
    server.set_reply(Reply::Status(500));

    let err = client(&base).reconcile(&straight_path(4)).await.unwrap_err();

    assert!(matches!(err, RouteError::Status { status: 500, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unprocessable_is_permanent() {
    let (server, base) = spawn_server().await;
    server.set_reply(Reply::Status(422));

    let err = client(&base).reconcile(&straight_path(4)).await.unwrap_err();

    assert!(matches!(err, RouteError::Status { status: 422, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let (server, base) = spawn_server().await;
    server.set_reply(Reply::Slow);

    let err = client(&base).reconcile(&straight_path(4)).await.unwrap_err();

    assert_eq!(err, RouteError::Timeout);
    assert_eq!(server.requests(), 1);
}

#[tokio::test]
async fn test_unreachable_host_is_transport_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{}", addr))
        .reconcile(&straight_path(2))
        .await
        .unwrap_err();

    assert!(matches!(err, RouteError::Transport(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_walking_directions() {
    let (server, base) = spawn_server().await;
    let to = offset(ORIGIN, 250.0, 0.0);

    let routes = client(&base).directions(ORIGIN, to).await.unwrap();

    // Alternatives are requested, so every candidate comes back.
    assert_eq!(server.last_query("alternatives").as_deref(), Some("true"));
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0].coordinates.len(), 2);
    assert_eq!(server.last_coordinate_count(), 2);
    assert_eq!(server.last_query("overview").as_deref(), Some("full"));
}
