use crate::config::{HeaderConfig, Listener as ListenerConfig};
use crate::generator::{GenerateError, generate_parent_config};
use crate::metrics_defs::PARENT_CONFIG_FAILED;
use crate::renderer::timestamp_now;
use crate::snapshot::SnapshotStore;
use crate::source::{SourceError, TopologySource, load_timed};
use crate::types::ServerRef;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use shared::counter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;

#[derive(thiserror::Error, Debug)]
pub enum ParentConfigApiError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub struct ApiState {
    source: Arc<dyn TopologySource>,
    header: HeaderConfig,
    ready: Arc<AtomicBool>,
}

impl ApiState {
    /// `ready` is set once a topology snapshot has been loaded successfully.
    pub fn new(
        source: Arc<dyn TopologySource>,
        header: HeaderConfig,
        ready: Arc<AtomicBool>,
    ) -> Self {
        ApiState {
            source,
            header,
            ready,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/api/{version}/servers/{server}/configfiles/ats/parent.config",
            get(parent_config_handler),
        )
        .with_state(Arc::new(state))
}

pub async fn serve(listener: ListenerConfig, state: ApiState) -> Result<(), ParentConfigApiError> {
    let app = router(state);
    let addr = format!("{}:{}", listener.host, listener.port);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "parent config api listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("could not load topology: {0}")]
    Source(#[from] SourceError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = match &self {
            ApiError::Generate(GenerateError::ServerNotFound(_)) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            ApiError::Generate(GenerateError::Store(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "query")
            }
            ApiError::Generate(GenerateError::InvalidAtsVersion(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "format")
            }
            ApiError::Source(_) => (StatusCode::INTERNAL_SERVER_ERROR, "source"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "parent.config generation failed");
        } else {
            tracing::info!(error = %self, "parent.config request rejected");
        }
        counter!(PARENT_CONFIG_FAILED, "reason" => reason).increment(1);

        let body = Json(ApiErrorResponse {
            error_message: self.to_string(),
        });
        (status, body).into_response()
    }
}

async fn parent_config_handler(
    State(state): State<Arc<ApiState>>,
    Path((_version, server)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let Ok(server) = server.parse::<ServerRef>();

    let snapshot = load_timed(state.source.as_ref()).await?;
    state.ready.store(true, Ordering::Relaxed);
    let store = SnapshotStore::new(snapshot);

    let text = generate_parent_config(&store, &server, &state.header, &timestamp_now())?;

    Ok(([(header::CONTENT_TYPE, "text/plain")], text).into_response())
}
