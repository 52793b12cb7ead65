//! Request dispatch for admitted requests.
//!
//! | Route              | Registry call  | Success          |
//! |--------------------|----------------|------------------|
//! | `GET /nodes/{id}`  | `lookup_node`  | 200 + PeerRecord |
//! | `PUT /nodes/{id}`  | `upsert_node`  | 200 + PeerRecord |
//! | anything else      | none           | 200, empty body  |
//!
//! Not-found maps to 404 and storage failures to a generic 500; the storage
//! error text only goes to the log.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::http::response::SERVER_NAME;
use crate::observability::metrics;
use crate::registry::{NodeRegistry, PeerRecord, RegistryError};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn NodeRegistry>,
}

/// Body of `PUT /nodes/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNode {
    pub port: u16,
    /// Defaults to the connecting peer's address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Ipv4Addr>,
}

/// Per-exchange failures turned into a response status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            ApiError::Registry(RegistryError::NotFound(id)) => {
                (StatusCode::NOT_FOUND, format!("node {} not found", id)).into_response()
            }
            ApiError::Registry(RegistryError::Storage(e)) => {
                tracing::error!(error = %e, "Registry failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}

/// Stamps each request with a UUID v4 `x-request-id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Build the router every admitted request is dispatched through.
pub fn build_router(registry: Arc<dyn NodeRegistry>) -> Router {
    Router::new()
        .route("/nodes/{id}", get(lookup_node).put(register_node))
        .fallback(acknowledge)
        .with_state(AppState { registry })
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static(SERVER_NAME),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        ))
}

/// Minimal acknowledgement for requests that touch no peer state.
async fn acknowledge() -> StatusCode {
    StatusCode::OK
}

async fn lookup_node(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<PeerRecord>, ApiError> {
    let result = state.registry.lookup_node(id).await;
    metrics::record_registry_op("lookup", outcome(&result));
    if let Err(RegistryError::NotFound(_)) = &result {
        tracing::debug!(node_id = id, "Node not found");
    }
    Ok(Json(result?))
}

async fn register_node(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(id): Path<u64>,
    Json(body): Json<RegisterNode>,
) -> Result<Json<PeerRecord>, ApiError> {
    let ip = match body.address {
        Some(ip) => ip,
        None => peer_ipv4(peer).ok_or_else(|| {
            ApiError::BadRequest("address is required when registering over IPv6".to_string())
        })?,
    };
    let address = SocketAddrV4::new(ip, body.port);

    let upserted = state.registry.upsert_node(id, address).await;
    metrics::record_registry_op("upsert", outcome(&upserted));
    upserted?;
    tracing::info!(node_id = id, address = %address, "Node registered");

    let record = state.registry.lookup_node(id).await;
    metrics::record_registry_op("lookup", outcome(&record));
    Ok(Json(record?))
}

fn peer_ipv4(peer: SocketAddr) -> Option<Ipv4Addr> {
    match peer.ip().to_canonical() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(_) => None,
    }
}

fn outcome<T>(result: &Result<T, RegistryError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(RegistryError::NotFound(_)) => "not_found",
        Err(RegistryError::Storage(_)) => "error",
    }
}
