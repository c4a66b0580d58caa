//! Resolves the candidate parent caches of a server.

use crate::metrics_defs::DATA_QUALITY_WARNINGS;
use crate::origin::OriginUri;
use crate::params::{PROFILE_CACHE_PARAMS, ProfileCache, ProfileCaches};
use crate::store::{CONFIG_FILE_PARENT, StoreResult, TopologyStore};
use crate::types::{
    CacheGroupId, DeliveryServiceId, ParentInfo, ParentKey, ProfileId, SERVER_TYPE_ORIGIN,
    ServerId, ServerInfo,
};
use indexmap::IndexMap;
use shared::counter;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Candidate parents of one server, grouped by [`ParentKey`] in discovery order.
#[derive(Clone, Debug, Default)]
pub struct ParentCandidates {
    by_key: IndexMap<ParentKey, Vec<ParentInfo>>,
}

impl ParentCandidates {
    pub fn get(&self, key: &ParentKey) -> &[ParentInfo] {
        self.by_key.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ParentKey> {
        self.by_key.keys()
    }

    fn push(&mut self, key: ParentKey, parent: ParentInfo) {
        self.by_key.entry(key).or_default().push(parent);
    }
}

/// Finds every server that may act as a parent for `server`.
///
/// Top level caches consider every origin location cache group; all other caches consider
/// their parent and secondary parent cache groups. A server whose profile has no CDN domain
/// gets no parents.
pub fn resolve_parents(
    store: &dyn TopologyStore,
    server: &ServerInfo,
) -> StoreResult<ParentCandidates> {
    let mut candidates = ParentCandidates::default();

    match store.cdn_domain_by_profile(server.profile_id)? {
        Some(domain) if !domain.is_empty() => {}
        _ => {
            tracing::warn!(
                server = %server.host_name,
                profile = %server.profile_name,
                "profile has no CDN domain, generating without parents"
            );
            counter!(DATA_QUALITY_WARNINGS, "kind" => "no_cdn_domain").increment(1);
            return Ok(candidates);
        }
    }

    let cache_groups: Vec<CacheGroupId> = if server.is_top_level_cache() {
        store.origin_location_cache_groups()?
    } else {
        server
            .parent_cache_group_id()
            .into_iter()
            .chain(server.secondary_parent_cache_group_id())
            .collect()
    };
    if cache_groups.is_empty() {
        return Ok(candidates);
    }

    let rows = store.parent_candidates(&cache_groups, &server.cdn)?;
    let server_ids: Vec<ServerId> = rows.iter().map(|r| r.id).collect();
    if server_ids.is_empty() {
        return Ok(candidates);
    }

    let profile_caches = ProfileCaches::from_rows(store.profile_params_for_servers(
        &server_ids,
        CONFIG_FILE_PARENT,
        PROFILE_CACHE_PARAMS,
    )?)?;
    let origins = origin_keys_by_server(store, &server_ids)?;

    let mut warned_profiles: HashSet<ProfileId> = HashSet::new();
    for row in rows {
        let profile = match profile_caches.get(row.profile_id) {
            Some(profile) => profile.clone(),
            None => {
                if warned_profiles.insert(row.profile_id) {
                    tracing::warn!(
                        profile = %row.profile_id,
                        "cache group has server with profile that has no parent parameters, using defaults"
                    );
                    counter!(DATA_QUALITY_WARNINGS, "kind" => "profile_without_params").increment(1);
                }
                ProfileCache::default()
            }
        };
        if profile.not_a_parent {
            tracing::debug!(host = %row.host_name, "not a parent, skipping");
            continue;
        }

        let parent = ParentInfo {
            host: row.host_name.clone(),
            domain: row.domain_name.clone(),
            ip: row.ip.clone(),
            port: profile.port.unwrap_or(row.port),
            weight: profile.weight,
            rank: profile.rank,
            use_ip: profile.use_ip,
            not_a_parent: profile.not_a_parent,
            primary_parent: server.parent_cache_group_id() == Some(row.cache_group_id),
            secondary_parent: server.secondary_parent_cache_group_id() == Some(row.cache_group_id),
        };

        if row.type_name == SERVER_TYPE_ORIGIN {
            for origin in origins.get(&row.id).into_iter().flatten() {
                candidates.push(ParentKey::PerOrigin(origin.clone()), parent.clone());
            }
        } else {
            candidates.push(ParentKey::Shared, parent);
        }
    }

    Ok(candidates)
}

/// Origin authorities (`host:port`) of the delivery services assigned to each origin server.
fn origin_keys_by_server(
    store: &dyn TopologyStore,
    servers: &[ServerId],
) -> StoreResult<HashMap<ServerId, Vec<String>>> {
    let assignments = store.server_delivery_services(servers)?;

    let ds_ids: Vec<DeliveryServiceId> = assignments
        .iter()
        .map(|(_, ds)| *ds)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if ds_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let origin_by_ds: HashMap<DeliveryServiceId, String> = store
        .primary_origins(&ds_ids)?
        .into_iter()
        .filter_map(|row| {
            match OriginUri::from_parts(&row.protocol, &row.fqdn, row.port) {
                Ok(origin) => Some((row.delivery_service_id, origin.authority())),
                Err(e) => {
                    tracing::warn!(ds = %row.delivery_service_id, error = %e, "origin servers not keyed");
                    counter!(DATA_QUALITY_WARNINGS, "kind" => "malformed_origin").increment(1);
                    None
                }
            }
        })
        .collect();

    let mut by_server: HashMap<ServerId, Vec<String>> = HashMap::new();
    for (server, ds) in assignments {
        if let Some(origin) = origin_by_ds.get(&ds) {
            by_server.entry(server).or_default().push(origin.clone());
        }
    }
    Ok(by_server)
}
