//! Passthrough proxy
//!
//! `GET /proxy?url=<encoded absolute URL>` issues one upstream GET and relays
//! status, content type and body. It exists so a browser page can reach a
//! panel that sends no CORS headers; it authenticates nothing and caches nothing.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info};

use crate::error::ViewerError;
use crate::models::mask_password;
use crate::transport::{FetchResponse, Transport};

/// Used when the upstream response declares no content type.
const DEFAULT_CONTENT_TYPE: &str = "application/json";

#[derive(Deserialize)]
struct ProxyQuery {
    url: Option<String>,
}

#[derive(Clone)]
struct ProxyState {
    transport: Arc<dyn Transport>,
}

pub struct ProxyController;

impl ProxyController {
    pub fn app(transport: Arc<dyn Transport>) -> Router {
        Router::new()
            .route("/proxy", get(Self::proxy_get).options(Self::proxy_options))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(ProxyState { transport })
    }

    /// Bind and serve until Ctrl-C.
    pub async fn serve(addr: SocketAddr, transport: Arc<dyn Transport>) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("proxy listening on http://{}/proxy", listener.local_addr()?);

        axum::serve(listener, Self::app(transport))
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("proxy stopped");
        Ok(())
    }

    /// Serve on 127.0.0.1 (any free port) from a background thread for the
    /// rest of the process. Returns the bound address.
    pub fn spawn_local(transport: Arc<dyn Transport>) -> anyhow::Result<SocketAddr> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        let listener = runtime.block_on(tokio::net::TcpListener::bind(("127.0.0.1", 0)))?;
        let addr = listener.local_addr()?;

        std::thread::Builder::new()
            .name("proxy".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    if let Err(e) = axum::serve(listener, Self::app(transport)).await {
                        error!("embedded proxy stopped: {}", e);
                    }
                })
            })?;

        debug!("embedded proxy on http://{}/proxy", addr);
        Ok(addr)
    }

    async fn proxy_get(
        State(state): State<ProxyState>,
        Query(params): Query<ProxyQuery>,
    ) -> Response {
        // the query extractor has already percent-decoded the parameter
        let Some(target) = params.url.filter(|u| !u.trim().is_empty()) else {
            debug!("rejecting proxy request without url parameter");
            return Self::error_response(
                StatusCode::BAD_REQUEST,
                ViewerError::MissingTargetParameter,
            );
        };

        debug!("Proxying: {}", mask_password(&target));

        let transport = state.transport.clone();
        let fetched = tokio::task::spawn_blocking(move || transport.get(&target)).await;

        match fetched {
            Ok(Ok(upstream)) => {
                debug!(
                    "Relaying status {} ({} bytes)",
                    upstream.status,
                    upstream.body.len()
                );
                Self::relay(upstream)
            }
            Ok(Err(e)) => {
                error!("Proxy fetch failed: {}", e);
                Self::error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
            }
            Err(e) => {
                error!("Proxy fetch task failed: {}", e);
                Self::error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ViewerError::transport(e),
                )
            }
        }
    }

    async fn proxy_options() -> impl IntoResponse {
        StatusCode::NO_CONTENT
    }

    fn relay(upstream: FetchResponse) -> Response {
        let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = upstream
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        (status, [(header::CONTENT_TYPE, content_type)], upstream.body).into_response()
    }

    fn error_response(status: StatusCode, err: ViewerError) -> Response {
        (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
    }
}
