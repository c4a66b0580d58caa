//! Generates the `parent.config` of one server.

use crate::config::HeaderConfig;
use crate::metrics_defs::{GENERATION_DURATION, PARENT_CONFIG_GENERATED};
use crate::params::ServerProfileParams;
use crate::renderer::{HeaderComment, render};
use crate::store::{CONFIG_FILE_PACKAGE, StoreError, TopologyStore};
use crate::strategy::{GenerationContext, strategy_for};
use crate::types::{ServerInfo, ServerRef};
use shared::{counter, histogram};
use std::time::Instant;

const PARAM_ATS_VERSION: &str = "trafficserver";
const PARAM_TOOL_NAME: &str = "tm.toolname";
const PARAM_TOOL_URL: &str = "tm.url";

/// Assumed when the server profile does not name its ATS package version.
pub const DEFAULT_ATS_VERSION: &str = "5";

#[derive(thiserror::Error, Debug)]
pub enum GenerateError {
    #[error("server not found: {0}")]
    ServerNotFound(ServerRef),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid ATS version '{0}', must start with a digit")]
    InvalidAtsVersion(String),
}

/// Major version of the ATS package installed on the server.
pub fn ats_major_version(
    store: &dyn TopologyStore,
    server: &ServerInfo,
) -> Result<u32, GenerateError> {
    let version = store
        .profile_param(server.profile_id, CONFIG_FILE_PACKAGE, PARAM_ATS_VERSION)?
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| {
            tracing::warn!(
                server = %server.host_name,
                profile = %server.profile_name,
                default = DEFAULT_ATS_VERSION,
                "profile has no ATS version, using default"
            );
            DEFAULT_ATS_VERSION.to_string()
        });

    match version.chars().next().and_then(|c| c.to_digit(10)) {
        Some(major) => Ok(major),
        None => Err(GenerateError::InvalidAtsVersion(version)),
    }
}

fn find_server(
    store: &dyn TopologyStore,
    server: &ServerRef,
) -> Result<ServerInfo, GenerateError> {
    let found = match server {
        ServerRef::Id(id) => store.server_by_id(*id)?,
        ServerRef::HostName(host) => store.server_by_host_name(host)?,
    };
    found.ok_or_else(|| GenerateError::ServerNotFound(server.clone()))
}

fn header(
    store: &dyn TopologyStore,
    server: &ServerInfo,
    defaults: &HeaderConfig,
    generated_at: &str,
) -> Result<HeaderComment, StoreError> {
    let global = |name: &str, default: &str| -> Result<String, StoreError> {
        Ok(store
            .global_param(name)?
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string()))
    };

    Ok(HeaderComment {
        host_name: server.host_name.clone(),
        tool_name: global(PARAM_TOOL_NAME, &defaults.tool_name)?,
        tool_url: global(PARAM_TOOL_URL, &defaults.tool_url)?,
        generated_at: generated_at.to_string(),
    })
}

/// Generates the complete file, or nothing at all.
///
/// `generated_at` is written into the header verbatim, so a fixed value gives byte-identical
/// output for an unchanged store.
pub fn generate_parent_config(
    store: &dyn TopologyStore,
    server: &ServerRef,
    header_defaults: &HeaderConfig,
    generated_at: &str,
) -> Result<String, GenerateError> {
    let start = Instant::now();

    let server = find_server(store, server)?;
    let ats_major_version = ats_major_version(store, &server)?;
    let top_level = server.is_top_level_cache();
    tracing::debug!(
        server = %server.host_name,
        top_level,
        ats_major_version,
        "generating parent.config"
    );

    let ctx = GenerationContext {
        store,
        server: &server,
        ats_major_version,
        server_params: ServerProfileParams::load(store, server.id)?,
    };
    let directives = strategy_for(&server).directives(&ctx)?;
    let text = render(&header(store, &server, header_defaults, generated_at)?, directives);

    histogram!(GENERATION_DURATION).record(start.elapsed().as_secs_f64());
    counter!(PARENT_CONFIG_GENERATED).increment(1);
    Ok(text)
}
