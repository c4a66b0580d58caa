//! Loads the parent-relevant projection of delivery services for either generation mode.

use crate::metrics_defs::DATA_QUALITY_WARNINGS;
use crate::params::{
    DsParamOverrides, PARAM_MSO_ALGORITHM, PARAM_MSO_MAX_SIMPLE_RETRIES,
    PARAM_MSO_MAX_UNAVAILABLE_SERVER_RETRIES, PARAM_MSO_PARENT_RETRY,
    PARAM_MSO_UNAVAILABLE_SERVER_RETRY_RESPONSES, PARAM_QSTRING_HANDLING,
};
use crate::store::{DeliveryServiceRow, StoreResult, TopologyStore};
use crate::types::{ALGORITHM_CONSISTENT_HASH, DsType, ServerId};
use shared::counter;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
pub struct ParentConfigDs {
    pub name: String,
    pub qstring_ignore: i32,
    /// `scheme://fqdn[:port]` of the primary origin, never empty.
    pub origin_fqdn: String,
    pub multi_site_origin: bool,
    pub origin_shield: Option<String>,
    pub ds_type: DsType,
    /// `psel.qstring_handling` on the delivery service's profile.
    pub qstring_handling: Option<String>,
}

/// Multi-site origin settings of a delivery service, read from its profile.
#[derive(Clone, Debug, PartialEq)]
pub struct MsoSettings {
    /// Parent selection algorithm; `consistent_hash` when `mso.algorithm` is not set.
    pub algorithm: String,
    /// Retry mode; no retry directives are emitted without it.
    pub parent_retry: Option<String>,
    pub unavailable_server_retry_responses: Option<String>,
    pub max_simple_retries: Option<String>,
    pub max_unavailable_server_retries: Option<String>,
}

impl Default for MsoSettings {
    fn default() -> Self {
        MsoSettings {
            algorithm: ALGORITHM_CONSISTENT_HASH.to_string(),
            parent_retry: None,
            unavailable_server_retry_responses: None,
            max_simple_retries: None,
            max_unavailable_server_retries: None,
        }
    }
}

impl MsoSettings {
    fn from_overrides(overrides: &DsParamOverrides, ds: &str) -> Self {
        let defaults = MsoSettings::default();
        MsoSettings {
            algorithm: overrides
                .get(ds, PARAM_MSO_ALGORITHM)
                .unwrap_or(defaults.algorithm),
            parent_retry: overrides.get(ds, PARAM_MSO_PARENT_RETRY),
            unavailable_server_retry_responses: overrides
                .get(ds, PARAM_MSO_UNAVAILABLE_SERVER_RETRY_RESPONSES),
            max_simple_retries: overrides.get(ds, PARAM_MSO_MAX_SIMPLE_RETRIES),
            max_unavailable_server_retries: overrides
                .get(ds, PARAM_MSO_MAX_UNAVAILABLE_SERVER_RETRIES),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TopLevelDs {
    pub ds: ParentConfigDs,
    pub mso: MsoSettings,
}

const TOP_LEVEL_DS_PARAMS: &[&str] = &[
    PARAM_QSTRING_HANDLING,
    PARAM_MSO_ALGORITHM,
    PARAM_MSO_PARENT_RETRY,
    PARAM_MSO_UNAVAILABLE_SERVER_RETRY_RESPONSES,
    PARAM_MSO_MAX_SIMPLE_RETRIES,
    PARAM_MSO_MAX_UNAVAILABLE_SERVER_RETRIES,
];

/// Delivery services of the CDN, for a top level cache, in id order.
pub fn top_level_delivery_services(
    store: &dyn TopologyStore,
    cdn: &str,
) -> StoreResult<Vec<TopLevelDs>> {
    let dses = unique_origins(with_origin(store.delivery_services_for_cdn(cdn)?));
    let overrides = DsParamOverrides::load(store, &names(&dses), TOP_LEVEL_DS_PARAMS)?;

    Ok(dses
        .into_iter()
        .map(|row| {
            let mso = MsoSettings::from_overrides(&overrides, &row.xml_id);
            TopLevelDs {
                ds: project(row, &overrides),
                mso,
            }
        })
        .collect())
}

/// Delivery services assigned to the server, sorted by name.
pub fn server_delivery_services(
    store: &dyn TopologyStore,
    server: ServerId,
) -> StoreResult<Vec<ParentConfigDs>> {
    let mut rows = with_origin(store.delivery_services_for_server(server)?);
    rows.sort_by(|a, b| a.xml_id.cmp(&b.xml_id));
    let dses = unique_origins(rows);
    let overrides = DsParamOverrides::load(store, &names(&dses), &[PARAM_QSTRING_HANDLING])?;

    Ok(dses
        .into_iter()
        .map(|row| project(row, &overrides))
        .collect())
}

fn names(rows: &[DeliveryServiceRow]) -> Vec<String> {
    rows.iter().map(|r| r.xml_id.clone()).collect()
}

fn project(row: DeliveryServiceRow, overrides: &DsParamOverrides) -> ParentConfigDs {
    ParentConfigDs {
        qstring_handling: overrides.get(&row.xml_id, PARAM_QSTRING_HANDLING),
        name: row.xml_id,
        qstring_ignore: row.qstring_ignore,
        origin_fqdn: row.origin_fqdn,
        multi_site_origin: row.multi_site_origin,
        origin_shield: row.origin_shield,
        ds_type: DsType::from(row.type_name.as_str()),
    }
}

fn with_origin(rows: Vec<DeliveryServiceRow>) -> Vec<DeliveryServiceRow> {
    rows.into_iter()
        .filter(|row| {
            if row.origin_fqdn.is_empty() {
                tracing::info!(ds = %row.xml_id, "delivery service has no origin, skipping");
                false
            } else {
                true
            }
        })
        .collect()
}

/// Only one parent directive per destination is valid; the first delivery service wins.
fn unique_origins(rows: Vec<DeliveryServiceRow>) -> Vec<DeliveryServiceRow> {
    let mut owners: HashMap<String, String> = HashMap::new();
    rows.into_iter()
        .filter(|row| match owners.get(&row.origin_fqdn) {
            Some(owner) => {
                tracing::warn!(
                    ds = %row.xml_id,
                    existing = %owner,
                    origin = %row.origin_fqdn,
                    "duplicate origin, skipping delivery service"
                );
                counter!(DATA_QUALITY_WARNINGS, "kind" => "duplicate_origin").increment(1);
                false
            }
            None => {
                owners.insert(row.origin_fqdn.clone(), row.xml_id.clone());
                true
            }
        })
        .collect()
}
