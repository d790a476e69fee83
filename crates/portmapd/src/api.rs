//! HTTP control surface
//!
//! JSON over HTTP using Axum. Every core outcome is HTTP 200 with a
//! [`PortMappingResponse`] body; `success` carries the result. Malformed
//! requests get Axum's extractor rejections.
//!
//! | Method | Path | Operation |
//! |---|---|---|
//! | POST | `/v1/port-mappings` | EnablePortMapping |
//! | DELETE | `/v1/port-mappings/{mapped_port}` | DisablePortMapping |
//! | GET | `/v1/port-mappings` | ListPortMappings |
//! | GET | `/health` | nft version probe |
//!
//! Each request gets its own cancellation token, cancelled when the
//! handler future is dropped (client gone), which kills any nft child
//! still running for it.

use axum::{
    extract::{Path, State},
    routing::{delete, get},
    Json, Router,
};
use portmap_common::{CancellationToken, CommandRunner};
use serde::{Deserialize, Serialize};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::service::{PortMappingResponse, PortMappingService};

/// Body of `POST /v1/port-mappings`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnablePortMappingRequest {
    pub internal_ip: String,
    pub mapped_port: i32,
}

/// Build the control router.
pub fn build_router<R>(service: PortMappingService<R>) -> Router
where
    R: CommandRunner + 'static,
{
    Router::new()
        .route(
            "/v1/port-mappings",
            get(list_handler::<R>).post(enable_handler::<R>),
        )
        .route("/v1/port-mappings/{mapped_port}", delete(disable_handler::<R>))
        .route("/health", get(health_handler::<R>))
        .with_state(service)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

fn request_token() -> (CancellationToken, tokio_util::sync::DropGuard) {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    (cancel, guard)
}

async fn enable_handler<R: CommandRunner + 'static>(
    State(service): State<PortMappingService<R>>,
    Json(request): Json<EnablePortMappingRequest>,
) -> Json<PortMappingResponse> {
    let (cancel, _guard) = request_token();
    Json(
        service
            .enable_port_mapping(&request.internal_ip, request.mapped_port, &cancel)
            .await,
    )
}

async fn disable_handler<R: CommandRunner + 'static>(
    State(service): State<PortMappingService<R>>,
    Path(mapped_port): Path<i32>,
) -> Json<PortMappingResponse> {
    let (cancel, _guard) = request_token();
    Json(service.disable_port_mapping(mapped_port, &cancel).await)
}

async fn list_handler<R: CommandRunner + 'static>(
    State(service): State<PortMappingService<R>>,
) -> Json<PortMappingResponse> {
    let (cancel, _guard) = request_token();
    Json(service.list_port_mappings(&cancel).await)
}

async fn health_handler<R: CommandRunner + 'static>(
    State(service): State<PortMappingService<R>>,
) -> Json<PortMappingResponse> {
    let (cancel, _guard) = request_token();
    Json(service.health(&cancel).await)
}
