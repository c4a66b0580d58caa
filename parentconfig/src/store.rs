//! Query contract of the topology store.
//!
//! Generation only ever reads through [`TopologyStore`]. Each method corresponds to one query
//! against the control database; implementations must not hold state between requests.

use crate::types::{
    CacheGroupId, DeliveryServiceId, ProfileId, ServerId, ServerInfo,
};

pub const CONFIG_FILE_PARENT: &str = "parent.config";
pub const CONFIG_FILE_GLOBAL: &str = "global";
pub const CONFIG_FILE_PACKAGE: &str = "package";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("query failed: {0}")]
    Query(String),
    #[error("inconsistent topology: {0}")]
    Inconsistent(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A server that may act as a parent for the requesting server.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidateServer {
    pub id: ServerId,
    pub host_name: String,
    pub domain_name: String,
    pub ip: String,
    pub port: u16,
    pub cache_group_id: CacheGroupId,
    pub profile_id: ProfileId,
    pub type_name: String,
}

/// Primary origin of a delivery service, as stored.
#[derive(Clone, Debug, PartialEq)]
pub struct OriginRow {
    pub delivery_service_id: DeliveryServiceId,
    pub protocol: String,
    pub fqdn: String,
    pub port: Option<u16>,
}

/// Parent-relevant columns of a delivery service.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryServiceRow {
    pub id: DeliveryServiceId,
    pub xml_id: String,
    pub qstring_ignore: i32,
    /// `protocol://fqdn[:port]` of the primary origin, empty when there is none.
    pub origin_fqdn: String,
    pub multi_site_origin: bool,
    pub origin_shield: Option<String>,
    pub type_name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProfileParamRow {
    pub profile_id: ProfileId,
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryServiceParamRow {
    pub xml_id: String,
    pub name: String,
    pub value: String,
}

pub trait TopologyStore: Send + Sync {
    fn server_by_id(&self, id: ServerId) -> StoreResult<Option<ServerInfo>>;

    fn server_by_host_name(&self, host_name: &str) -> StoreResult<Option<ServerInfo>>;

    /// Value of the parameter `name` in `config_file` assigned to `profile`.
    fn profile_param(
        &self,
        profile: ProfileId,
        config_file: &str,
        name: &str,
    ) -> StoreResult<Option<String>>;

    /// Value of a parameter in the `global` config file.
    fn global_param(&self, name: &str) -> StoreResult<Option<String>>;

    /// `(name, value)` of the `names` parameters in `config_file` on the server's profile.
    fn server_profile_params(
        &self,
        server: ServerId,
        config_file: &str,
        names: &[&str],
    ) -> StoreResult<Vec<(String, String)>>;

    /// Domain of the CDN the profile belongs to.
    fn cdn_domain_by_profile(&self, profile: ProfileId) -> StoreResult<Option<String>>;

    fn origin_location_cache_groups(&self) -> StoreResult<Vec<CacheGroupId>>;

    /// Servers of type `ORG`, `EDGE*` or `MID*` with status `REPORTED` or `ONLINE` in
    /// `cache_groups` and the CDN named `cdn`.
    fn parent_candidates(
        &self,
        cache_groups: &[CacheGroupId],
        cdn: &str,
    ) -> StoreResult<Vec<CandidateServer>>;

    /// `(server, delivery service)` assignments of `servers`.
    fn server_delivery_services(
        &self,
        servers: &[ServerId],
    ) -> StoreResult<Vec<(ServerId, DeliveryServiceId)>>;

    fn primary_origins(&self, delivery_services: &[DeliveryServiceId])
    -> StoreResult<Vec<OriginRow>>;

    /// Parameters in `config_file` named in `names` on the profiles of `servers`.
    fn profile_params_for_servers(
        &self,
        servers: &[ServerId],
        config_file: &str,
        names: &[&str],
    ) -> StoreResult<Vec<ProfileParamRow>>;

    /// Active delivery services of the CDN assigned to at least one server, ordered by id.
    fn delivery_services_for_cdn(&self, cdn: &str) -> StoreResult<Vec<DeliveryServiceRow>>;

    /// Delivery services assigned to the server, ordered by id.
    fn delivery_services_for_server(&self, server: ServerId)
    -> StoreResult<Vec<DeliveryServiceRow>>;

    /// Parameters in `config_file` named in `names` on the profiles of the delivery services.
    fn delivery_service_params(
        &self,
        xml_ids: &[String],
        config_file: &str,
        names: &[&str],
    ) -> StoreResult<Vec<DeliveryServiceParamRow>>;
}
