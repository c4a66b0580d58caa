//! Relational snapshot of the control database and the [`TopologyStore`] over it.
//!
//! A snapshot is loaded once per generation request and then queried read-only, which gives
//! every generation a consistent view, the same as a single read transaction would.

use crate::origin::origin_uri;
use crate::store::{
    CandidateServer, DeliveryServiceParamRow, DeliveryServiceRow, OriginRow, ProfileParamRow,
    StoreError, StoreResult, TopologyStore, CONFIG_FILE_GLOBAL,
};
use crate::types::{
    CacheGroupId, CacheGroupLink, CdnId, DeliveryServiceId, ParameterId, ProfileId, ServerId,
    ServerInfo, CACHE_GROUP_TYPE_ORIGIN, SERVER_TYPE_ORIGIN,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    #[serde(default)]
    pub cdns: Vec<Cdn>,
    #[serde(default)]
    pub cache_groups: Vec<CacheGroup>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub delivery_services: Vec<DeliveryService>,
    #[serde(default)]
    pub origins: Vec<Origin>,
    #[serde(default)]
    pub delivery_service_servers: Vec<DeliveryServiceServer>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cdn {
    pub id: CdnId,
    pub name: String,
    pub domain_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheGroup {
    pub id: CacheGroupId,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub parent_cache_group_id: Option<CacheGroupId>,
    #[serde(default)]
    pub secondary_parent_cache_group_id: Option<CacheGroupId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    #[serde(default)]
    pub cdn_id: Option<CdnId>,
    /// Assigned parameters, in assignment order.
    #[serde(default)]
    pub parameters: Vec<ParameterId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: ParameterId,
    pub name: String,
    pub config_file: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub host_name: String,
    pub domain_name: String,
    pub ip_address: String,
    pub tcp_port: u16,
    pub cdn_id: CdnId,
    pub profile_id: ProfileId,
    pub cache_group_id: CacheGroupId,
    #[serde(rename = "type")]
    pub type_name: String,
    pub status: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryService {
    pub id: DeliveryServiceId,
    pub xml_id: String,
    pub cdn_id: CdnId,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub qstring_ignore: Option<i32>,
    #[serde(default)]
    pub multi_site_origin: Option<bool>,
    #[serde(default)]
    pub origin_shield: Option<String>,
    #[serde(default)]
    pub profile_id: Option<ProfileId>,
}

fn default_active() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Origin {
    pub delivery_service_id: DeliveryServiceId,
    pub protocol: String,
    pub fqdn: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_primary")]
    pub is_primary: bool,
}

fn default_primary() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryServiceServer {
    pub server_id: ServerId,
    pub delivery_service_id: DeliveryServiceId,
}

const PARENT_STATUSES: &[&str] = &["REPORTED", "ONLINE"];

fn is_parent_type(type_name: &str) -> bool {
    type_name == SERVER_TYPE_ORIGIN || type_name.starts_with("EDGE") || type_name.starts_with("MID")
}

/// Answers the topology queries over an in-memory [`TopologySnapshot`].
pub struct SnapshotStore {
    snapshot: TopologySnapshot,
    servers: HashMap<ServerId, usize>,
    cache_groups: HashMap<CacheGroupId, usize>,
    profiles: HashMap<ProfileId, usize>,
    parameters: HashMap<ParameterId, usize>,
    cdns: HashMap<CdnId, usize>,
    delivery_services: HashMap<DeliveryServiceId, usize>,
}

fn index_by<T, K, F>(items: &[T], key: F) -> HashMap<K, usize>
where
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    items
        .iter()
        .enumerate()
        .map(|(i, item)| (key(item), i))
        .collect()
}

impl SnapshotStore {
    pub fn new(snapshot: TopologySnapshot) -> Self {
        SnapshotStore {
            servers: index_by(&snapshot.servers, |s| s.id),
            cache_groups: index_by(&snapshot.cache_groups, |cg| cg.id),
            profiles: index_by(&snapshot.profiles, |p| p.id),
            parameters: index_by(&snapshot.parameters, |p| p.id),
            cdns: index_by(&snapshot.cdns, |c| c.id),
            delivery_services: index_by(&snapshot.delivery_services, |ds| ds.id),
            snapshot,
        }
    }

    fn server(&self, id: ServerId) -> Option<&Server> {
        self.servers.get(&id).map(|&i| &self.snapshot.servers[i])
    }

    fn cache_group(&self, id: CacheGroupId) -> StoreResult<&CacheGroup> {
        self.cache_groups
            .get(&id)
            .map(|&i| &self.snapshot.cache_groups[i])
            .ok_or_else(|| StoreError::Inconsistent(format!("unknown cache group {id}")))
    }

    fn profile(&self, id: ProfileId) -> StoreResult<&Profile> {
        self.profiles
            .get(&id)
            .map(|&i| &self.snapshot.profiles[i])
            .ok_or_else(|| StoreError::Inconsistent(format!("unknown profile {id}")))
    }

    fn cdn(&self, id: CdnId) -> StoreResult<&Cdn> {
        self.cdns
            .get(&id)
            .map(|&i| &self.snapshot.cdns[i])
            .ok_or_else(|| StoreError::Inconsistent(format!("unknown cdn {id}")))
    }

    fn cdn_by_name(&self, name: &str) -> Option<&Cdn> {
        self.snapshot.cdns.iter().find(|c| c.name == name)
    }

    /// Parameters assigned to `profile`, in assignment order.
    fn profile_parameters(&self, profile: &Profile) -> impl Iterator<Item = &Parameter> {
        profile
            .parameters
            .iter()
            .filter_map(|id| self.parameters.get(id).map(|&i| &self.snapshot.parameters[i]))
    }

    fn link(&self, id: Option<CacheGroupId>) -> StoreResult<Option<CacheGroupLink>> {
        id.map(|id| {
            self.cache_group(id).map(|cg| CacheGroupLink {
                id,
                type_name: cg.type_name.clone(),
            })
        })
        .transpose()
    }

    fn server_info(&self, server: &Server) -> StoreResult<ServerInfo> {
        let cdn = self.cdn(server.cdn_id)?;
        let profile = self.profile(server.profile_id)?;
        let cache_group = self.cache_group(server.cache_group_id)?;

        Ok(ServerInfo {
            id: server.id,
            host_name: server.host_name.clone(),
            domain_name: server.domain_name.clone(),
            ip: server.ip_address.clone(),
            port: server.tcp_port,
            cdn: cdn.name.clone(),
            cdn_id: cdn.id,
            profile_id: profile.id,
            profile_name: profile.name.clone(),
            server_type: server.type_name.clone(),
            cache_group_id: cache_group.id,
            parent_cache_group: self.link(cache_group.parent_cache_group_id)?,
            secondary_parent_cache_group: self.link(cache_group.secondary_parent_cache_group_id)?,
        })
    }

    fn primary_origin(&self, ds: DeliveryServiceId) -> Option<&Origin> {
        self.snapshot
            .origins
            .iter()
            .find(|o| o.delivery_service_id == ds && o.is_primary)
    }

    fn delivery_service_row(&self, ds: &DeliveryService) -> DeliveryServiceRow {
        let origin_fqdn = self
            .primary_origin(ds.id)
            .map(|o| origin_uri(&o.protocol, &o.fqdn, o.port))
            .unwrap_or_default();

        DeliveryServiceRow {
            id: ds.id,
            xml_id: ds.xml_id.clone(),
            qstring_ignore: ds.qstring_ignore.unwrap_or(0),
            origin_fqdn,
            multi_site_origin: ds.multi_site_origin.unwrap_or(false),
            origin_shield: ds.origin_shield.clone().filter(|s| !s.is_empty()),
            type_name: ds.type_name.clone(),
        }
    }

    fn delivery_service_rows<F>(&self, include: F) -> Vec<DeliveryServiceRow>
    where
        F: Fn(&DeliveryService) -> bool,
    {
        let mut rows: Vec<DeliveryServiceRow> = self
            .snapshot
            .delivery_services
            .iter()
            .filter(|ds| include(ds))
            .map(|ds| self.delivery_service_row(ds))
            .collect();
        rows.sort_by_key(|row| row.id);
        rows
    }
}

impl TopologyStore for SnapshotStore {
    fn server_by_id(&self, id: ServerId) -> StoreResult<Option<ServerInfo>> {
        self.server(id).map(|s| self.server_info(s)).transpose()
    }

    fn server_by_host_name(&self, host_name: &str) -> StoreResult<Option<ServerInfo>> {
        self.snapshot
            .servers
            .iter()
            .find(|s| s.host_name == host_name)
            .map(|s| self.server_info(s))
            .transpose()
    }

    fn profile_param(
        &self,
        profile: ProfileId,
        config_file: &str,
        name: &str,
    ) -> StoreResult<Option<String>> {
        let profile = self.profile(profile)?;
        Ok(self
            .profile_parameters(profile)
            .find(|p| p.config_file == config_file && p.name == name)
            .map(|p| p.value.clone()))
    }

    fn global_param(&self, name: &str) -> StoreResult<Option<String>> {
        Ok(self
            .snapshot
            .parameters
            .iter()
            .find(|p| p.config_file == CONFIG_FILE_GLOBAL && p.name == name)
            .map(|p| p.value.clone()))
    }

    fn server_profile_params(
        &self,
        server: ServerId,
        config_file: &str,
        names: &[&str],
    ) -> StoreResult<Vec<(String, String)>> {
        let Some(server) = self.server(server) else {
            return Ok(Vec::new());
        };
        let profile = self.profile(server.profile_id)?;

        Ok(self
            .profile_parameters(profile)
            .filter(|p| p.config_file == config_file && names.contains(&p.name.as_str()))
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect())
    }

    fn cdn_domain_by_profile(&self, profile: ProfileId) -> StoreResult<Option<String>> {
        let Some(cdn_id) = self.profile(profile)?.cdn_id else {
            return Ok(None);
        };
        Ok(self
            .cdns
            .get(&cdn_id)
            .map(|&i| self.snapshot.cdns[i].domain_name.clone()))
    }

    fn origin_location_cache_groups(&self) -> StoreResult<Vec<CacheGroupId>> {
        let ids: BTreeSet<CacheGroupId> = self
            .snapshot
            .cache_groups
            .iter()
            .filter(|cg| cg.type_name == CACHE_GROUP_TYPE_ORIGIN)
            .map(|cg| cg.id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    fn parent_candidates(
        &self,
        cache_groups: &[CacheGroupId],
        cdn: &str,
    ) -> StoreResult<Vec<CandidateServer>> {
        let Some(cdn) = self.cdn_by_name(cdn) else {
            return Ok(Vec::new());
        };

        let mut candidates: Vec<CandidateServer> = self
            .snapshot
            .servers
            .iter()
            .filter(|s| {
                cache_groups.contains(&s.cache_group_id)
                    && s.cdn_id == cdn.id
                    && is_parent_type(&s.type_name)
                    && PARENT_STATUSES.contains(&s.status.as_str())
            })
            .map(|s| CandidateServer {
                id: s.id,
                host_name: s.host_name.clone(),
                domain_name: s.domain_name.clone(),
                ip: s.ip_address.clone(),
                port: s.tcp_port,
                cache_group_id: s.cache_group_id,
                profile_id: s.profile_id,
                type_name: s.type_name.clone(),
            })
            .collect();
        candidates.sort_by_key(|c| c.id);
        Ok(candidates)
    }

    fn server_delivery_services(
        &self,
        servers: &[ServerId],
    ) -> StoreResult<Vec<(ServerId, DeliveryServiceId)>> {
        Ok(self
            .snapshot
            .delivery_service_servers
            .iter()
            .filter(|dss| servers.contains(&dss.server_id))
            .map(|dss| (dss.server_id, dss.delivery_service_id))
            .collect())
    }

    fn primary_origins(
        &self,
        delivery_services: &[DeliveryServiceId],
    ) -> StoreResult<Vec<OriginRow>> {
        Ok(self
            .snapshot
            .origins
            .iter()
            .filter(|o| o.is_primary && delivery_services.contains(&o.delivery_service_id))
            .map(|o| OriginRow {
                delivery_service_id: o.delivery_service_id,
                protocol: o.protocol.clone(),
                fqdn: o.fqdn.clone(),
                port: o.port,
            })
            .collect())
    }

    fn profile_params_for_servers(
        &self,
        servers: &[ServerId],
        config_file: &str,
        names: &[&str],
    ) -> StoreResult<Vec<ProfileParamRow>> {
        let mut seen = HashSet::new();
        let mut rows = Vec::new();

        for server in servers.iter().filter_map(|id| self.server(*id)) {
            if !seen.insert(server.profile_id) {
                continue;
            }
            let profile = self.profile(server.profile_id)?;
            rows.extend(
                self.profile_parameters(profile)
                    .filter(|p| p.config_file == config_file && names.contains(&p.name.as_str()))
                    .map(|p| ProfileParamRow {
                        profile_id: profile.id,
                        name: p.name.clone(),
                        value: p.value.clone(),
                    }),
            );
        }
        Ok(rows)
    }

    fn delivery_services_for_cdn(&self, cdn: &str) -> StoreResult<Vec<DeliveryServiceRow>> {
        let Some(cdn) = self.cdn_by_name(cdn) else {
            return Ok(Vec::new());
        };
        let assigned: HashSet<DeliveryServiceId> = self
            .snapshot
            .delivery_service_servers
            .iter()
            .map(|dss| dss.delivery_service_id)
            .collect();

        Ok(self.delivery_service_rows(|ds| {
            ds.cdn_id == cdn.id && ds.active && assigned.contains(&ds.id)
        }))
    }

    fn delivery_services_for_server(
        &self,
        server: ServerId,
    ) -> StoreResult<Vec<DeliveryServiceRow>> {
        let assigned: HashSet<DeliveryServiceId> = self
            .snapshot
            .delivery_service_servers
            .iter()
            .filter(|dss| dss.server_id == server)
            .map(|dss| dss.delivery_service_id)
            .collect();

        Ok(self.delivery_service_rows(|ds| assigned.contains(&ds.id)))
    }

    fn delivery_service_params(
        &self,
        xml_ids: &[String],
        config_file: &str,
        names: &[&str],
    ) -> StoreResult<Vec<DeliveryServiceParamRow>> {
        let mut rows = Vec::new();

        for ds in self
            .snapshot
            .delivery_services
            .iter()
            .filter(|ds| xml_ids.contains(&ds.xml_id))
        {
            let Some(profile_id) = ds.profile_id else {
                continue;
            };
            let profile = self.profile(profile_id)?;
            rows.extend(
                self.profile_parameters(profile)
                    .filter(|p| p.config_file == config_file && names.contains(&p.name.as_str()))
                    .map(|p| DeliveryServiceParamRow {
                        xml_id: ds.xml_id.clone(),
                        name: p.name.clone(),
                        value: p.value.clone(),
                    }),
            );
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CONFIG_FILE_PARENT;
    use crate::testutils::TopologyFixture;

    #[test]
    fn test_server_lookup() {
        let fixture = TopologyFixture::edge_and_mids();
        let store = SnapshotStore::new(fixture.snapshot());

        let edge = store.server_by_host_name("myedge").unwrap().unwrap();
        assert_eq!(edge.cdn, "mycdn");
        assert_eq!(edge.parent_cache_group.as_ref().unwrap().type_name, "MID_LOC");
        assert!(!edge.is_top_level_cache());

        let by_id = store.server_by_id(edge.id).unwrap().unwrap();
        assert_eq!(by_id, edge);

        assert!(store.server_by_host_name("nope").unwrap().is_none());
        assert!(store.server_by_id(ServerId(9999)).unwrap().is_none());
    }

    #[test]
    fn test_inconsistent_snapshot() {
        let mut snapshot = TopologyFixture::edge_and_mids().snapshot();
        snapshot.profiles.clear();
        let store = SnapshotStore::new(snapshot);

        assert!(matches!(
            store.server_by_host_name("myedge"),
            Err(StoreError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_parent_candidates_filter_status_and_type() {
        let fixture = TopologyFixture::edge_and_mids();
        let store = SnapshotStore::new(fixture.snapshot());
        let mid_cg = fixture.mid_cache_group;

        let hosts: Vec<String> = store
            .parent_candidates(&[mid_cg], "mycdn")
            .unwrap()
            .into_iter()
            .map(|c| c.host_name)
            .collect();

        // mymid2 is OFFLINE
        assert_eq!(hosts, vec!["mymid0", "mymid1"]);
        assert!(store.parent_candidates(&[mid_cg], "othercdn").unwrap().is_empty());
    }

    #[test]
    fn test_profile_params() {
        let fixture = TopologyFixture::edge_and_mids();
        let store = SnapshotStore::new(fixture.snapshot());
        let edge = store.server_by_host_name("myedge").unwrap().unwrap();

        let params = store
            .server_profile_params(edge.id, CONFIG_FILE_PARENT, &["algorithm"])
            .unwrap();
        assert_eq!(
            params,
            vec![("algorithm".to_string(), "consistent_hash".to_string())]
        );

        assert_eq!(
            store
                .profile_param(edge.profile_id, "package", "trafficserver")
                .unwrap()
                .as_deref(),
            Some("7.0.0")
        );
        assert_eq!(
            store.global_param("tm.toolname").unwrap().as_deref(),
            Some("Traffic Ops")
        );
    }

    #[test]
    fn test_delivery_service_queries() {
        let fixture = TopologyFixture::edge_and_mids();
        let store = SnapshotStore::new(fixture.snapshot());
        let edge = store.server_by_host_name("myedge").unwrap().unwrap();

        let rows = store.delivery_services_for_server(edge.id).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.xml_id.as_str()).collect();
        assert_eq!(names, vec!["ds1", "ds0-live"]);
        assert_eq!(rows[0].origin_fqdn, "http://origin.example.net");

        let rows = store.delivery_services_for_cdn("mycdn").unwrap();
        assert_eq!(rows.len(), 2);
        assert!(store.delivery_services_for_cdn("othercdn").unwrap().is_empty());
    }
}
