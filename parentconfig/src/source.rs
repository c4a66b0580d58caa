//! Topology sources. A source is asked for a fresh snapshot on every generation request.

const BASE_DELAY: u64 = 500;

use crate::config::TopologySourceConfig;
use crate::metrics_defs::TOPOLOGY_LOAD_DURATION;
use crate::snapshot::TopologySnapshot;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use shared::histogram;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{Duration, sleep};

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("could not parse YAML snapshot: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("could not parse JSON snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported snapshot format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("control plane request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("control plane unavailable: {0}")]
    ControlPlaneUnavailable(StatusCode),
}

#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn load(&self) -> Result<TopologySnapshot, SourceError>;
}

/// Builds the source named in the config.
pub fn from_config(config: &TopologySourceConfig) -> Arc<dyn TopologySource> {
    match config {
        TopologySourceConfig::Filesystem { path } => Arc::new(FilesystemSource::new(path.clone())),
        TopologySourceConfig::ControlPlane { url } => {
            Arc::new(ControlPlaneSource::new(url.clone()))
        }
    }
}

/// Loads a source and records how long it took.
pub async fn load_timed(source: &dyn TopologySource) -> Result<TopologySnapshot, SourceError> {
    let start = Instant::now();
    let snapshot = source.load().await;
    histogram!(TOPOLOGY_LOAD_DURATION).record(start.elapsed().as_secs_f64());
    snapshot
}

enum SnapshotFormat {
    Yaml,
    Json,
}

impl SnapshotFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yaml" | "yml" => Some(SnapshotFormat::Yaml),
            "json" => Some(SnapshotFormat::Json),
            _ => None,
        }
    }
}

pub struct FilesystemSource {
    path: PathBuf,
}

impl FilesystemSource {
    pub fn new(path: PathBuf) -> Self {
        FilesystemSource { path }
    }
}

#[async_trait]
impl TopologySource for FilesystemSource {
    async fn load(&self) -> Result<TopologySnapshot, SourceError> {
        let format = SnapshotFormat::from_path(&self.path)
            .ok_or_else(|| SourceError::UnsupportedFormat(self.path.clone()))?;
        let data = tokio::fs::read(&self.path).await?;

        let snapshot = match format {
            SnapshotFormat::Yaml => serde_yaml::from_slice(&data)?,
            SnapshotFormat::Json => serde_json::from_slice(&data)?,
        };
        tracing::debug!(path = %self.path.display(), "loaded topology snapshot");
        Ok(snapshot)
    }
}

pub struct ControlPlaneSource {
    client: reqwest::Client,
    url: Url,
}

impl ControlPlaneSource {
    pub fn new(url: Url) -> Self {
        ControlPlaneSource {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl TopologySource for ControlPlaneSource {
    async fn load(&self) -> Result<TopologySnapshot, SourceError> {
        const RETRIABLE_STATUS_CODES: &[StatusCode] = &[
            StatusCode::TOO_MANY_REQUESTS,     // 429
            StatusCode::INTERNAL_SERVER_ERROR, // 500
            StatusCode::BAD_GATEWAY,           // 502
            StatusCode::SERVICE_UNAVAILABLE,   // 503
            StatusCode::GATEWAY_TIMEOUT,       // 504
        ];

        let mut retries = 0;

        loop {
            let response = self.client.get(self.url.clone()).send().await?;
            let status = response.status();

            if !status.is_success() {
                if RETRIABLE_STATUS_CODES.contains(&status) && retries < 3 {
                    let retry_millis = BASE_DELAY * 2_u64.pow(retries);
                    tracing::warn!(%status, retry_millis, "control plane request failed, retrying");
                    sleep(Duration::from_millis(retry_millis)).await;
                    retries += 1;
                    continue;
                }
                return Err(SourceError::ControlPlaneUnavailable(status));
            }

            return Ok(response.json::<TopologySnapshot>().await?);
        }
    }
}
