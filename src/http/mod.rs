//! HTTP surface: SSE streams, request submission and the credential exchange.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::mcp::protocol::{ListToolsResult, SubmitRequest};

/// Header naming the submitting connection.
pub const CONNECTION_HEADER: &str = "x-connection-id";

/// HTTP server state.
#[derive(Clone)]
pub struct HttpState {
    gateway: Arc<Gateway>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        } else {
            debug!("Request rejected: {}", self);
        }
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Build the router for a gateway.
pub fn router(gateway: Arc<Gateway>) -> Router {
    let state = HttpState { gateway };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .route("/events", get(open_events))
        .route("/submit", post(submit))
        .route("/tools", get(list_tools))
        .route("/tokens", post(issue_token))
        .route("/tokens/{id}/redeem", post(redeem_token))
        .route("/connections/{id}", get(connection_info).delete(disconnect))
        .route("/requests/{id}", delete(cancel_request))
        .route("/broadcast", post(broadcast))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the gateway's shutdown token fires.
pub async fn start_server(gateway: Arc<Gateway>) -> Result<()> {
    let addr = gateway.config().bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Starting HTTP server on {}", listener.local_addr()?);
    serve(listener, gateway).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: tokio::net::TcpListener, gateway: Arc<Gateway>) -> Result<()> {
    let shutdown = gateway.shutdown_token();
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

/// Health check endpoint.
async fn health_check(State(state): State<HttpState>) -> impl IntoResponse {
    let gateway = &state.gateway;
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "connections": gateway.registry().len().await,
        "pendingRequests": gateway.correlator().pending_count().await,
        "metrics": gateway.metrics().snapshot(),
    }))
}

async fn prometheus_metrics(State(state): State<HttpState>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.gateway.metrics().to_prometheus(),
    )
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    owner: Option<String>,
}

/// Evicts the connection when the SSE response body is dropped.
struct DisconnectGuard {
    gateway: Arc<Gateway>,
    connection_id: String,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let gateway = self.gateway.clone();
        let connection_id = std::mem::take(&mut self.connection_id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if gateway.disconnect(&connection_id).await {
                    debug!("Stream {} closed by client", connection_id);
                }
            });
        }
    }
}

/// Open an event stream. The first event is always `connected`.
async fn open_events(
    State(state): State<HttpState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let owner = query.owner.unwrap_or_else(|| "anonymous".to_string());
    let (connection_id, frames) = state.gateway.open_stream(&owner).await;
    info!("Opened stream {} for {}", connection_id, owner);

    let guard = DisconnectGuard {
        gateway: state.gateway.clone(),
        connection_id,
    };
    let events = futures::stream::unfold((frames, guard), |(mut frames, guard)| async move {
        frames.recv().await.map(|frame| (frame, (frames, guard)))
    })
    .map(|frame| Event::default().event(frame.kind.as_str()).json_data(&frame));

    let keep_alive = KeepAlive::new().interval(state.gateway.config().heartbeat_interval());
    Sse::new(events).keep_alive(keep_alive)
}

#[derive(Debug, Deserialize)]
struct SubmitQuery {
    #[serde(rename = "connectionId")]
    connection_id: Option<String>,
}

fn connection_id(headers: &HeaderMap, query: Option<String>) -> Result<String> {
    headers
        .get(CONNECTION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            Error::Validation(format!("missing {} header or connectionId query", CONNECTION_HEADER))
        })
}

/// Submit a request. Answers as soon as the request is accepted.
async fn submit(
    State(state): State<HttpState>,
    Query(query): Query<SubmitQuery>,
    headers: HeaderMap,
    body: std::result::Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let connection_id = connection_id(&headers, query.connection_id)?;
    let Json(request) = body.map_err(|e| Error::Validation(e.body_text()))?;
    let ack = state.gateway.submit(&connection_id, request).await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

async fn list_tools(State(state): State<HttpState>) -> impl IntoResponse {
    Json(ListToolsResult {
        tools: state.gateway.dispatcher().list_tools(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueTokenRequest {
    license_key: String,
}

async fn issue_token(
    State(state): State<HttpState>,
    body: std::result::Result<Json<IssueTokenRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(request) = body.map_err(|e| Error::Validation(e.body_text()))?;
    let issued = state.gateway.credentials().issue(&request.license_key)?;
    Ok((StatusCode::CREATED, Json(issued)))
}

async fn redeem_token(
    State(state): State<HttpState>,
    Path(token_id): Path<String>,
) -> Result<impl IntoResponse> {
    let secret = state.gateway.credentials().redeem(&token_id)?;
    Ok(Json(json!({ "secret": secret.expose() })))
}

async fn connection_info(
    State(state): State<HttpState>,
    Path(connection_id): Path<String>,
) -> Result<impl IntoResponse> {
    let info = state.gateway.registry().lookup(&connection_id).await?;
    let pending: Vec<_> = state
        .gateway
        .correlator()
        .pending_for(&connection_id)
        .await
        .into_iter()
        .map(|p| {
            json!({
                "requestId": p.request_id,
                "ageMs": u64::try_from(p.age.as_millis()).unwrap_or(u64::MAX),
                "remainingMs": u64::try_from(p.remaining.as_millis()).unwrap_or(u64::MAX),
            })
        })
        .collect();
    Ok(Json(json!({ "connection": info, "pending": pending })))
}

/// Explicit disconnect. Unknown ids are not an error.
async fn disconnect(State(state): State<HttpState>, Path(connection_id): Path<String>) -> StatusCode {
    if state.gateway.disconnect(&connection_id).await {
        info!("Connection {} disconnected by client", connection_id);
    }
    StatusCode::NO_CONTENT
}

async fn cancel_request(
    State(state): State<HttpState>,
    Path(request_id): Path<String>,
    Query(query): Query<SubmitQuery>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let connection_id = connection_id(&headers, query.connection_id)?;
    state
        .gateway
        .correlator()
        .cancel(&connection_id, &request_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    message: String,
}

async fn broadcast(
    State(state): State<HttpState>,
    body: std::result::Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(request) = body.map_err(|e| Error::Validation(e.body_text()))?;
    let delivered = state
        .gateway
        .publisher()
        .broadcast(json!({ "message": request.message }))
        .await;
    Ok(Json(json!({ "delivered": delivered })))
}
