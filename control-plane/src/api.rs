//! The `/v1/policies*` CRUD surface plus `/v1/config/stream`, built the way
//! the reference corpus wires an axum management API: a `Router` over a
//! cloneable state struct, handlers returning `Result<_, ApiError>` so the
//! `?` operator does the status-code mapping, and SSE framed by hand the
//! way `mockforge-http`'s `sse.rs` does it.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::broadcaster::Broadcaster;
use crate::error::ApiError;
use crate::policy::Policy;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/policies", get(list_all).post(create_or_update))
        .route("/policies/create", post(create_strict))
        .route("/policies/{name}", get(get_one).put(update_strict).delete(delete_one))
        .route("/config/stream", get(stream_config));

    Router::new()
        .route("/health", get(health))
        .nest("/v1", v1)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn list_all(State(state): State<AppState>) -> Json<Vec<Policy>> {
    Json(state.store.list().await)
}

async fn get_one(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<Policy>, ApiError> {
    state.store.get(&name).await.map(Json).ok_or(ApiError::NotFound(name))
}

/// `POST /v1/policies` - idempotent create-or-update.
async fn create_or_update(State(state): State<AppState>, body: Bytes) -> Result<(StatusCode, Json<Policy>), ApiError> {
    let policy: Policy = serde_json::from_slice(&body)?;
    policy.validate()?;
    state.store.put(policy.clone()).await;
    state.recompile_and_broadcast().await;
    Ok((StatusCode::CREATED, Json(policy)))
}

/// `POST /v1/policies/create` - strict create, 409 if the name already exists.
async fn create_strict(State(state): State<AppState>, body: Bytes) -> Result<(StatusCode, Json<Policy>), ApiError> {
    let policy: Policy = serde_json::from_slice(&body)?;
    policy.validate()?;
    state.store.create(policy.clone()).await?;
    state.recompile_and_broadcast().await;
    Ok((StatusCode::CREATED, Json(policy)))
}

/// `PUT /v1/policies/:name` - strict update, 404 if missing. The path
/// segment is authoritative over whatever `metadata.name` the body carries.
async fn update_strict(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Policy>), ApiError> {
    let mut policy: Policy = serde_json::from_slice(&body)?;
    policy.metadata.name = name;
    policy.validate()?;
    state.store.update(policy.clone()).await?;
    state.recompile_and_broadcast().await;
    Ok((StatusCode::OK, Json(policy)))
}

async fn delete_one(State(state): State<AppState>, Path(name): Path<String>) -> Result<StatusCode, ApiError> {
    state.store.delete(&name).await?;
    state.recompile_and_broadcast().await;
    Ok(StatusCode::NO_CONTENT)
}

/// Drops the sidecar's registration from the broadcaster's sink set when
/// the SSE stream itself is dropped (client disconnect).
struct SinkGuard {
    broadcaster: Arc<Broadcaster>,
    id: u64,
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        self.broadcaster.unregister(self.id);
    }
}

/// `GET /v1/config/stream` - pushes `full_config` once on connect, then
/// `update` on every subsequent change. Both frames carry the full
/// serialized policy list.
async fn stream_config(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let initial = state.current_snapshot();
    let (id, rx) = state.broadcaster.register(initial);
    let guard = SinkGuard { broadcaster: state.broadcaster.clone(), id };

    let stream = stream::unfold((rx, true, guard), |(mut rx, first, guard)| async move {
        let snapshot = rx.recv().await?;
        let event_name = if first { "full_config" } else { "update" };
        let data = serde_json::to_string(&snapshot.policies).unwrap_or_else(|_| "[]".to_string());
        let event = Event::default().event(event_name).data(data);
        Some((Ok(event), (rx, false, guard)))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keepalive"))
}
