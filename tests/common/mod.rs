//! In-process stand-in for the video game database API.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use stampede::http::HttpProtocol;
use tokio::net::TcpListener;

pub const TOKEN: &str = "secret-token";

#[derive(Clone, Default)]
struct Db {
    games: Arc<Mutex<BTreeMap<i64, Value>>>,
}

/// Starts the backend on an ephemeral port and returns its base URL.
pub async fn spawn_backend() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router()).await.unwrap();
    });
    format!("http://{addr}/api")
}

pub fn protocol(base_url: &str) -> HttpProtocol {
    HttpProtocol::builder()
        .base_url(base_url)
        .accept("application/json")
        .content_type("application/json")
        .timeout(Duration::from_secs(5))
        .build()
}

fn router() -> Router {
    let api = Router::new()
        .route("/authenticate", post(authenticate))
        .route("/videogame", get(list_games).post(create_game))
        .route("/videogame/{id}", get(get_game).delete(delete_game))
        .route("/echo/{value}", get(echo))
        .route("/broken", get(broken))
        .route("/slow", get(slow))
        .with_state(Db::default());
    Router::new().nest("/api", api)
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn authenticate(Json(credentials): Json<Value>) -> Response {
    if credentials["username"] == "admin" && credentials["password"] == "admin" {
        Json(json!({ "token": TOKEN })).into_response()
    } else {
        StatusCode::FORBIDDEN.into_response()
    }
}

async fn list_games(State(db): State<Db>) -> Json<Vec<Value>> {
    Json(db.games.lock().values().cloned().collect())
}

async fn create_game(State(db): State<Db>, headers: HeaderMap, Json(game): Json<Value>) -> Response {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let Some(id) = game["id"].as_i64() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    db.games.lock().insert(id, game.clone());
    Json(game).into_response()
}

async fn get_game(State(db): State<Db>, Path(id): Path<i64>) -> Response {
    match db.games.lock().get(&id) {
        Some(game) => Json(game.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn delete_game(State(db): State<Db>, headers: HeaderMap, Path(id): Path<i64>) -> Response {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    db.games.lock().remove(&id);
    "Video game deleted".into_response()
}

async fn echo(Path(value): Path<String>) -> Json<Value> {
    Json(json!({ "value": value }))
}

async fn broken() -> Json<Value> {
    Json(json!({ "unexpected": true }))
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(2)).await;
    "finally"
}
