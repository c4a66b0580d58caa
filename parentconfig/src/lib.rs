//! ATS `parent.config` generation.
//!
//! A request names a server; the topology is loaded fresh from the configured source, the
//! server's candidate parents and delivery services are resolved through [`store::TopologyStore`]
//! and the result is rendered as one deterministic text file.

pub mod api;
pub mod config;
pub mod delivery_service;
pub mod directive;
pub mod generator;
pub mod metrics_defs;
pub mod origin;
pub mod params;
pub mod parent_info;
pub mod renderer;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod strategy;
pub mod types;

#[cfg(test)]
pub mod testutils;

use api::{ApiState, ParentConfigApiError};
use config::{Config, ValidationError};
use generator::{GenerateError, generate_parent_config};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use snapshot::SnapshotStore;
use source::{SourceError, load_timed};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use types::ServerRef;

#[derive(thiserror::Error, Debug)]
pub enum ParentConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error(transparent)]
    Api(#[from] ParentConfigApiError),
}

/// Serves generation requests and the admin endpoints until either listener fails.
pub async fn run(config: Config) -> Result<(), ParentConfigError> {
    config.validate()?;
    shared::metrics_defs::describe_metrics(metrics_defs::ALL_METRICS);

    let source = source::from_config(&config.topology_source);
    let ready = Arc::new(AtomicBool::new(false));

    match load_timed(source.as_ref()).await {
        Ok(snapshot) => {
            tracing::info!(
                servers = snapshot.servers.len(),
                delivery_services = snapshot.delivery_services.len(),
                "topology source reachable"
            );
            ready.store(true, Ordering::Relaxed);
        }
        Err(e) => {
            tracing::warn!(error = %e, "initial topology load failed, not ready yet");
        }
    }

    let state = ApiState::new(source, config.header.clone(), ready.clone());
    let api_task = async {
        api::serve(config.listener.clone(), state)
            .await
            .map_err(ParentConfigError::from)
    };

    let admin_service =
        AdminService::<_, ParentConfigError>::new(move || ready.load(Ordering::Relaxed));
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(api_task, admin_task)?;
    Ok(())
}

/// Loads the topology once and generates the file for `server`.
pub async fn generate_once(
    config: &Config,
    server: &ServerRef,
    generated_at: &str,
) -> Result<String, ParentConfigError> {
    let source = source::from_config(&config.topology_source);
    let store = SnapshotStore::new(load_timed(source.as_ref()).await?);
    Ok(generate_parent_config(
        &store,
        server,
        &config.header,
        generated_at,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HeaderConfig, Listener, TopologySourceConfig};
    use crate::testutils::TopologyFixture;
    use std::io::Write;

    fn config_for(path: &std::path::Path) -> Config {
        Config {
            listener: Listener {
                host: "127.0.0.1".into(),
                port: 3000,
            },
            admin_listener: Listener {
                host: "127.0.0.1".into(),
                port: 3001,
            },
            topology_source: TopologySourceConfig::Filesystem { path: path.into() },
            header: HeaderConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_generate_once() {
        let mut tmp = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .expect("create temp file");
        let snapshot = TopologyFixture::mid_with_mso().snapshot();
        write!(tmp, "{}", serde_yaml::to_string(&snapshot).unwrap()).expect("write snapshot");

        let config = config_for(tmp.path());
        let text = generate_once(&config, &"mymid0".parse().unwrap(), "now")
            .await
            .unwrap();
        assert!(text.starts_with("# DO NOT EDIT - Generated for mymid0 by Traffic Ops (https://to.example.net) on now\n"));
        assert!(text.contains("dest_domain=shielded.example.net port=443 parent=shield.example.net"));
        assert!(!text.contains("dest_domain=."));
    }

    #[tokio::test]
    async fn test_generate_once_missing_topology() {
        let config = config_for(std::path::Path::new("/nonexistent/topology.yaml"));
        let result = generate_once(&config, &"mymid0".parse().unwrap(), "now").await;
        assert!(matches!(
            result,
            Err(ParentConfigError::Source(SourceError::Io(_)))
        ));
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_config() {
        let mut config = config_for(std::path::Path::new("topology.yaml"));
        config.listener.port = 0;
        assert!(matches!(
            run(config).await,
            Err(ParentConfigError::Validation(ValidationError::InvalidPort))
        ));
    }
}
