//! HTTP status server
//!
//! Uses hyper http1 with TokioIo; every request is answered from in-memory
//! state, so there is no request body handling.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use super::status::{health_check, not_found_response, status_check, ServerState};
use crate::types::Result;

/// Serve `/health` and `/status` until the task is dropped
pub async fn run(state: Arc<ServerState>, listen: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!("Status endpoint listening on {} as node {}", listen, state.node_id);
    serve(listener, state).await
}

/// Accept loop over an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

async fn handle_request(
    state: Arc<ServerState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    debug!("[{}] {} {}", addr, req.method(), req.uri().path());
    Ok(route(&state, req.method(), req.uri().path()))
}

/// Pick the response for a method and path
pub fn route(state: &ServerState, method: &Method, path: &str) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => health_check(state),
        (&Method::GET, "/status") => status_check(state),
        _ => not_found_response(path),
    }
}
