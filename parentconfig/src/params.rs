//! Typed views over `parent.config` parameters.
//!
//! Parameters arrive as loose `(name, value)` rows. Each table here names the parameters it
//! reads and documents what an absent parameter means.

use crate::metrics_defs::DATA_QUALITY_WARNINGS;
use crate::store::{StoreError, StoreResult, TopologyStore, CONFIG_FILE_PARENT, ProfileParamRow};
use crate::types::{ProfileId, ServerId};
use shared::counter;
use std::collections::HashMap;
use std::fmt;

pub const PARAM_QSTRING_HANDLING: &str = "psel.qstring_handling";
pub const PARAM_ALGORITHM: &str = "algorithm";
pub const PARAM_QSTRING: &str = "qstring";

pub const PARAM_MSO_ALGORITHM: &str = "mso.algorithm";
pub const PARAM_MSO_PARENT_RETRY: &str = "mso.parent_retry";
pub const PARAM_MSO_UNAVAILABLE_SERVER_RETRY_RESPONSES: &str =
    "mso.unavailable_server_retry_responses";
pub const PARAM_MSO_MAX_SIMPLE_RETRIES: &str = "mso.max_simple_retries";
pub const PARAM_MSO_MAX_UNAVAILABLE_SERVER_RETRIES: &str =
    "mso.max_unavailable_server_retry_responses";

pub const PARAM_WEIGHT: &str = "weight";
pub const PARAM_PORT: &str = "port";
pub const PARAM_USE_IP_ADDRESS: &str = "use_ip_address";
pub const PARAM_RANK: &str = "rank";
pub const PARAM_NOT_A_PARENT: &str = "not_a_parent";

pub const PROFILE_CACHE_PARAMS: &[&str] = &[
    PARAM_WEIGHT,
    PARAM_PORT,
    PARAM_USE_IP_ADDRESS,
    PARAM_RANK,
    PARAM_NOT_A_PARENT,
];

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.is_empty())
}

/// `parent.config` parameters on the requesting server's own profile.
///
/// An absent or empty parameter is `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerProfileParams {
    /// Overrides the query string handling of every delivery service on the server.
    pub qstring_handling: Option<String>,
    /// Parent selection algorithm for origin shields and the default destination.
    pub algorithm: Option<String>,
    /// `qstring` of the default destination.
    pub qstring: Option<String>,
}

impl ServerProfileParams {
    pub fn load(store: &dyn TopologyStore, server: ServerId) -> StoreResult<Self> {
        let rows = store.server_profile_params(
            server,
            CONFIG_FILE_PARENT,
            &[PARAM_QSTRING_HANDLING, PARAM_ALGORITHM, PARAM_QSTRING],
        )?;
        Ok(Self::from_rows(rows))
    }

    pub fn from_rows(rows: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut params = ServerProfileParams::default();
        for (name, value) in rows {
            match name.as_str() {
                PARAM_QSTRING_HANDLING => params.qstring_handling = non_empty(value),
                PARAM_ALGORITHM => params.algorithm = non_empty(value),
                PARAM_QSTRING => params.qstring = non_empty(value),
                _ => {}
            }
        }
        params
    }
}

/// Parent attributes a profile gives every server that uses it.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileCache {
    pub weight: f64,
    /// `None` means the server's own TCP port.
    pub port: Option<u16>,
    pub use_ip: bool,
    pub rank: i32,
    pub not_a_parent: bool,
}

impl Default for ProfileCache {
    fn default() -> Self {
        ProfileCache {
            weight: 0.999,
            port: None,
            use_ip: false,
            rank: 1,
            not_a_parent: false,
        }
    }
}

fn unparsable(name: &str, value: &str, error: impl fmt::Display) {
    tracing::warn!(param = name, value, error = %error, "unparsable parent param, using default");
    counter!(DATA_QUALITY_WARNINGS, "kind" => "unparsable_param").increment(1);
}

impl ProfileCache {
    /// Applies one parameter. Unparsable numbers are logged and leave the default in place.
    fn apply(&mut self, name: &str, value: &str) -> StoreResult<()> {
        match name {
            PARAM_WEIGHT => match value.trim().parse::<f64>() {
                Ok(weight) => self.weight = weight,
                Err(e) => unparsable(name, value, e),
            },
            PARAM_PORT => match value.trim().parse::<u16>() {
                Ok(0) => self.port = None,
                Ok(port) => self.port = Some(port),
                Err(e) => unparsable(name, value, e),
            },
            PARAM_USE_IP_ADDRESS => self.use_ip = value == "1",
            PARAM_RANK => match value.trim().parse::<i32>() {
                Ok(rank) => self.rank = rank,
                Err(e) => unparsable(name, value, e),
            },
            PARAM_NOT_A_PARENT => self.not_a_parent = value != "false",
            other => {
                return Err(StoreError::Inconsistent(format!(
                    "query returned unexpected param: {other}"
                )));
            }
        }
        Ok(())
    }
}

/// Profile id to [`ProfileCache`], for profiles that carry at least one parent parameter.
#[derive(Clone, Debug, Default)]
pub struct ProfileCaches {
    caches: HashMap<ProfileId, ProfileCache>,
}

impl ProfileCaches {
    pub fn from_rows(rows: impl IntoIterator<Item = ProfileParamRow>) -> StoreResult<Self> {
        let mut caches: HashMap<ProfileId, ProfileCache> = HashMap::new();
        for row in rows {
            caches
                .entry(row.profile_id)
                .or_default()
                .apply(&row.name, &row.value)?;
        }
        Ok(ProfileCaches { caches })
    }

    /// `None` when the profile has no parent parameters at all.
    pub fn get(&self, profile: ProfileId) -> Option<&ProfileCache> {
        self.caches.get(&profile)
    }
}

/// Per delivery service parameter overrides, keyed by delivery service name.
#[derive(Clone, Debug, Default)]
pub struct DsParamOverrides {
    by_ds: HashMap<String, HashMap<String, String>>,
}

impl DsParamOverrides {
    pub fn load(store: &dyn TopologyStore, xml_ids: &[String], names: &[&str]) -> StoreResult<Self> {
        if xml_ids.is_empty() {
            return Ok(Self::default());
        }

        let mut by_ds: HashMap<String, HashMap<String, String>> = HashMap::new();
        for row in store.delivery_service_params(xml_ids, CONFIG_FILE_PARENT, names)? {
            by_ds.entry(row.xml_id).or_default().insert(row.name, row.value);
        }
        Ok(DsParamOverrides { by_ds })
    }

    /// The override of `name` for `ds`; empty values count as absent.
    pub fn get(&self, ds: &str, name: &str) -> Option<String> {
        self.by_ds
            .get(ds)
            .and_then(|params| params.get(name))
            .filter(|v| !v.is_empty())
            .cloned()
    }
}
