use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cache group type of groups that hold origin servers.
pub const CACHE_GROUP_TYPE_ORIGIN: &str = "ORG_LOC";

/// Server type of origin servers registered as parents.
pub const SERVER_TYPE_ORIGIN: &str = "ORG";

pub const ALGORITHM_CONSISTENT_HASH: &str = "consistent_hash";

macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(ServerId);
id_type!(ProfileId);
id_type!(CacheGroupId);
id_type!(CdnId);
id_type!(DeliveryServiceId);
id_type!(ParameterId);

/// A server as requested by a caller, either by numeric id or by host name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerRef {
    Id(ServerId),
    HostName(String),
}

impl FromStr for ServerRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_suffix(".json").unwrap_or(s);
        Ok(match s.parse::<i64>() {
            Ok(id) => ServerRef::Id(ServerId(id)),
            Err(_) => ServerRef::HostName(s.to_string()),
        })
    }
}

impl fmt::Display for ServerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRef::Id(id) => write!(f, "{id}"),
            ServerRef::HostName(host) => f.write_str(host),
        }
    }
}

/// Parent or secondary parent cache group of a server's own cache group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheGroupLink {
    pub id: CacheGroupId,
    pub type_name: String,
}

impl CacheGroupLink {
    pub fn is_origin_location(&self) -> bool {
        self.type_name == CACHE_GROUP_TYPE_ORIGIN
    }
}

/// The requesting server with its cache group, profile and CDN linkage.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerInfo {
    pub id: ServerId,
    pub host_name: String,
    pub domain_name: String,
    pub ip: String,
    pub port: u16,
    pub cdn: String,
    pub cdn_id: CdnId,
    pub profile_id: ProfileId,
    pub profile_name: String,
    pub server_type: String,
    pub cache_group_id: CacheGroupId,
    pub parent_cache_group: Option<CacheGroupLink>,
    pub secondary_parent_cache_group: Option<CacheGroupLink>,
}

impl ServerInfo {
    /// A top level cache forwards straight to origins: neither of its parent cache groups
    /// is another cache tier.
    pub fn is_top_level_cache(&self) -> bool {
        let routes_to_origin =
            |link: &Option<CacheGroupLink>| link.as_ref().is_none_or(|cg| cg.is_origin_location());

        routes_to_origin(&self.parent_cache_group)
            && routes_to_origin(&self.secondary_parent_cache_group)
    }

    pub fn parent_cache_group_id(&self) -> Option<CacheGroupId> {
        self.parent_cache_group.as_ref().map(|cg| cg.id)
    }

    pub fn secondary_parent_cache_group_id(&self) -> Option<CacheGroupId> {
        self.secondary_parent_cache_group.as_ref().map(|cg| cg.id)
    }
}

/// Delivery service types known to the generator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DsType {
    Http,
    HttpNoCache,
    HttpLive,
    HttpLiveNational,
    Dns,
    DnsLive,
    DnsLiveNational,
    AnyMap,
    Steering,
    ClientSteering,
    Other(String),
}

impl DsType {
    /// Types whose traffic bypasses the parent tier entirely.
    pub fn is_go_direct(&self) -> bool {
        matches!(self, DsType::HttpNoCache | DsType::HttpLive | DsType::DnsLive)
    }

    pub fn as_str(&self) -> &str {
        match self {
            DsType::Http => "HTTP",
            DsType::HttpNoCache => "HTTP_NO_CACHE",
            DsType::HttpLive => "HTTP_LIVE",
            DsType::HttpLiveNational => "HTTP_LIVE_NATNL",
            DsType::Dns => "DNS",
            DsType::DnsLive => "DNS_LIVE",
            DsType::DnsLiveNational => "DNS_LIVE_NATNL",
            DsType::AnyMap => "ANY_MAP",
            DsType::Steering => "STEERING",
            DsType::ClientSteering => "CLIENT_STEERING",
            DsType::Other(name) => name,
        }
    }
}

impl From<&str> for DsType {
    fn from(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "HTTP" => DsType::Http,
            "HTTP_NO_CACHE" => DsType::HttpNoCache,
            "HTTP_LIVE" => DsType::HttpLive,
            "HTTP_LIVE_NATNL" => DsType::HttpLiveNational,
            "DNS" => DsType::Dns,
            "DNS_LIVE" => DsType::DnsLive,
            "DNS_LIVE_NATNL" => DsType::DnsLiveNational,
            "ANY_MAP" => DsType::AnyMap,
            "STEERING" => DsType::Steering,
            "CLIENT_STEERING" => DsType::ClientSteering,
            _ => DsType::Other(s.to_string()),
        }
    }
}

impl fmt::Display for DsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of a parent candidate list.
///
/// Origin servers are grouped by the origin they serve; every other cache tier is shared
/// by all delivery services of the requesting server.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParentKey {
    PerOrigin(String),
    Shared,
}

/// One candidate parent cache.
#[derive(Clone, Debug, PartialEq)]
pub struct ParentInfo {
    pub host: String,
    pub domain: String,
    pub ip: String,
    pub port: u16,
    pub weight: f64,
    pub rank: i32,
    pub use_ip: bool,
    pub not_a_parent: bool,
    pub primary_parent: bool,
    pub secondary_parent: bool,
}

impl ParentInfo {
    /// Renders the entry as it appears inside a `parent="..."` list.
    pub fn format(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ParentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.use_ip {
            write!(f, "{}", self.ip)?;
        } else {
            write!(f, "{}.{}", self.host, self.domain)?;
        }
        // f64 Display is the shortest representation that round-trips, without exponent.
        write!(f, ":{}|{};", self.port, self.weight)
    }
}
