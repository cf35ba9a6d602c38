use super::error::{WebError, WebResult};
use super::state::AppState;
use crate::cluster::{ForwardRequest, ForwardResponse, RouteOutcome};
use crate::core::{KvError, Result};
use crate::replication::NextKeyValue;
use axum::Json;
use axum::extract::{OriginalUri, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct KeyQuery {
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyValueQuery {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Runs a blocking storage call off the async workers.
pub(crate) async fn spawn_storage<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| KvError::Io(format!("storage task failed: {}", e)))?
}

fn forward_request(method: Method, uri: &OriginalUri) -> ForwardRequest {
    let path_and_query = uri
        .0
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.0.path().to_string());
    ForwardRequest::new(method, path_and_query)
}

fn relay(response: ForwardResponse) -> Response {
    (response.status, response.body).into_response()
}

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn get_key(
    State(state): State<AppState>,
    method: Method,
    uri: OriginalUri,
    Query(query): Query<KeyQuery>,
) -> WebResult<Response> {
    if query.key.is_empty() {
        return Err(WebError::input("Missing key"));
    }

    let request = forward_request(method, &uri);
    let storage = state.storage.clone();
    let key = query.key.into_bytes();
    let lookup = key.clone();
    let outcome = state
        .router
        .route("get", &key, &request, |_| {
            spawn_storage(move || storage.get(&lookup))
        })
        .await?;

    Ok(match outcome {
        RouteOutcome::Local { value, .. } => (StatusCode::OK, value).into_response(),
        RouteOutcome::Forwarded { response, .. } => relay(response),
    })
}

pub async fn set_key(
    State(state): State<AppState>,
    method: Method,
    uri: OriginalUri,
    Query(query): Query<KeyValueQuery>,
) -> WebResult<Response> {
    if query.key.is_empty() || query.value.is_empty() {
        return Err(WebError::input("Missing key or value"));
    }

    let request = forward_request(method, &uri);
    let storage = state.storage.clone();
    let key = query.key.into_bytes();
    let record = (key.clone(), query.value.into_bytes());
    let outcome = state
        .router
        .route("set", &key, &request, |shard| {
            spawn_storage(move || storage.put(&record.0, &record.1).map(|_| shard))
        })
        .await?;

    Ok(match outcome {
        RouteOutcome::Local { value: shard, .. } => {
            (StatusCode::OK, format!("set on shard {}", shard)).into_response()
        }
        RouteOutcome::Forwarded { response, .. } => relay(response),
    })
}

pub async fn purge(State(state): State<AppState>) -> WebResult<String> {
    let purger = state.purger.clone();
    let report = spawn_storage(move || purger.purge()).await?;
    Ok(format!("purged {} keys", report.deleted))
}

pub async fn next_replication_key(State(state): State<AppState>) -> Response {
    let storage = state.storage.clone();
    let next = spawn_storage(move || {
        storage
            .next_pending_replication()
            .and_then(NextKeyValue::try_from)
    });
    match next.await {
        Ok(body) => Json(body).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to read replication queue");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(NextKeyValue::failed(err.to_string())),
            )
                .into_response()
        }
    }
}

pub async fn delete_replication_key(
    State(state): State<AppState>,
    Query(query): Query<KeyValueQuery>,
) -> WebResult<&'static str> {
    if query.key.is_empty() || query.value.is_empty() {
        return Err(WebError::input("Missing key or value"));
    }

    let storage = state.storage.clone();
    let key = query.key.into_bytes();
    let value = query.value.into_bytes();
    let (key, value, outcome) = spawn_storage(move || {
        let outcome = storage.acknowledge_replication(&key, &value)?;
        Ok((key, value, outcome))
    })
    .await?;

    match outcome.into_mismatch_error(&key, &value) {
        None => Ok("ok"),
        Some(err) => {
            tracing::info!(error = %err, "acknowledge rejected");
            Err(err.into())
        }
    }
}
