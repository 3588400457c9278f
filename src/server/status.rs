//! Health and status responses

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::broker::{DispatchStats, Dispatcher};
use crate::connector::{ConnectorStatus, ConnectorSupervisor};

/// What the status endpoint reads from
pub struct ServerState {
    pub node_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub supervisor: Arc<ConnectorSupervisor>,
    pub dispatcher: Arc<Dispatcher>,
}

impl ServerState {
    pub fn new(node_id: Uuid, supervisor: Arc<ConnectorSupervisor>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            node_id,
            started_at: Utc::now(),
            supervisor,
            dispatcher,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    healthy: bool,
    node_id: Uuid,
    connectors: usize,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    node_id: Uuid,
    version: &'static str,
    started_at: DateTime<Utc>,
    uptime_secs: i64,
    actions: usize,
    dispatch: DispatchStats,
    connectors: Vec<ConnectorStatus>,
}

/// Liveness probe, always 200 while the process serves requests
pub fn health_check(state: &ServerState) -> Response<Full<Bytes>> {
    let body = HealthResponse {
        healthy: true,
        node_id: state.node_id,
        connectors: state.supervisor.len(),
    };
    json_response(StatusCode::OK, &body)
}

/// Connector pools and dispatch totals
pub fn status_check(state: &ServerState) -> Response<Full<Bytes>> {
    let now = Utc::now();
    let body = StatusResponse {
        node_id: state.node_id,
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at,
        uptime_secs: (now - state.started_at).num_seconds(),
        actions: state.dispatcher.registry().len(),
        dispatch: state.dispatcher.stats(),
        connectors: state.supervisor.statuses(),
    };
    json_response(StatusCode::OK, &body)
}

pub fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });
    json_response(StatusCode::NOT_FOUND, &body)
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(body)
        .unwrap_or_else(|_| r#"{"error":"Serialization failed"}"#.to_string());

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
