use crate::snapshot::{
    CacheGroup, Cdn, DeliveryService, DeliveryServiceServer, Origin, Parameter, Profile, Server,
    TopologySnapshot,
};
use crate::store::{CONFIG_FILE_GLOBAL, CONFIG_FILE_PACKAGE, CONFIG_FILE_PARENT};
use crate::types::{
    CacheGroupId, CdnId, DeliveryServiceId, ParameterId, ProfileId, ServerId, SERVER_TYPE_ORIGIN,
};
use url::Url;

const CDN: CdnId = CdnId(1);
const MID_SERVER: ServerId = ServerId(2);

/// Small topologies for generation tests.
///
/// `edge_and_mids` is an edge cache below a mid tier with a secondary mid cache group.
/// `mid_with_mso` is a top level mid cache in front of three origin cache groups, serving a
/// multi-site origin, an origin shielded and a plain delivery service.
pub struct TopologyFixture {
    snapshot: TopologySnapshot,
    pub edge_server: ServerId,
    pub edge_profile: ProfileId,
    pub mid_profile: ProfileId,
    pub mid_cache_group: CacheGroupId,
}

impl TopologyFixture {
    fn empty() -> Self {
        let mut fixture = TopologyFixture {
            snapshot: TopologySnapshot::default(),
            edge_server: ServerId(1),
            edge_profile: ProfileId(100),
            mid_profile: ProfileId(200),
            mid_cache_group: CacheGroupId(20),
        };
        fixture.snapshot.cdns.push(Cdn {
            id: CDN,
            name: "mycdn".into(),
            domain_name: "mycdn.example.net".into(),
        });
        fixture.add_global_param("tm.toolname", "Traffic Ops");
        fixture.add_global_param("tm.url", "https://to.example.net");
        fixture
    }

    pub fn edge_and_mids() -> Self {
        let mut fixture = Self::empty();

        fixture.add_cache_group(10, "edgeCG", "EDGE_LOC", Some(20), Some(21));
        fixture.add_cache_group(20, "midCG", "MID_LOC", None, None);
        fixture.add_cache_group(21, "secondaryMidCG", "MID_LOC", None, None);

        fixture.add_profile(100, "EDGE_PROFILE");
        fixture.add_profile(200, "MID_PROFILE");
        fixture.add_profile(201, "SECONDARY_MID_PROFILE");
        fixture.set_profile_param(fixture.edge_profile, "algorithm", "consistent_hash");
        fixture.set_package_version(fixture.edge_profile, "7.0.0");
        fixture.set_profile_param(ProfileId(201), "rank", "1");

        fixture.add_server(1, "myedge", "infra.test", 100, 10, "EDGE", "REPORTED");
        fixture.add_server(2, "mymid0", "infra.test", 200, 20, "MID", "REPORTED");
        fixture.add_server(3, "mymid1", "infra.test", 200, 20, "MID", "ONLINE");
        fixture.add_server(4, "mymid2", "infra.test", 200, 20, "MID", "OFFLINE");
        fixture.add_server(5, "mysecmid0", "infra.test", 201, 21, "MID", "REPORTED");

        let ds1 = fixture.add_delivery_service("ds1", "HTTP", Some("http://origin.example.net"));
        let live = fixture.add_delivery_service("ds0-live", "HTTP_LIVE", Some("http://live.example.net"));
        fixture.assign(ds1, fixture.edge_server);
        fixture.assign(live, fixture.edge_server);

        fixture
    }

    pub fn mid_with_mso() -> Self {
        let mut fixture = Self::empty();

        fixture.add_cache_group(10, "edgeCG", "EDGE_LOC", Some(20), None);
        fixture.add_cache_group(20, "midCG", "MID_LOC", Some(30), Some(31));
        fixture.add_cache_group(30, "orgCG", "ORG_LOC", None, None);
        fixture.add_cache_group(31, "secondaryOrgCG", "ORG_LOC", None, None);
        fixture.add_cache_group(32, "otherOrgCG", "ORG_LOC", None, None);

        fixture.add_profile(100, "EDGE_PROFILE");
        fixture.add_profile(200, "MID_PROFILE");
        fixture.add_profile(300, "ORG_PROFILE");
        fixture.add_profile(301, "SECONDARY_ORG_PROFILE");
        fixture.set_package_version(fixture.edge_profile, "7.0.0");
        fixture.set_profile_param(fixture.mid_profile, "algorithm", "consistent_hash");
        fixture.set_package_version(fixture.mid_profile, "7.1.0");
        fixture.set_profile_param(ProfileId(301), "rank", "2");
        fixture.set_profile_param(ProfileId(301), "port", "8080");

        fixture.add_server(1, "myedge", "infra.test", 100, 10, "EDGE", "REPORTED");
        fixture.add_server(2, "mymid0", "infra.test", 200, 20, "MID", "REPORTED");
        fixture.add_server(10, "myorg0", "origin.test", 300, 30, "ORG", "ONLINE");
        fixture.add_server(11, "myorg1", "origin.test", 301, 31, "ORG", "ONLINE");
        fixture.add_server(12, "myorg2", "origin.test", 300, 32, "ORG", "ONLINE");

        let mso = fixture.add_mso_origin("mso-ds", "http://mso.example.net");
        fixture.set_ds_param(mso, "mso.parent_retry", "both");
        fixture.set_ds_param(mso, "mso.unavailable_server_retry_responses", "503, 504, 598");
        fixture.set_ds_param(mso, "mso.max_simple_retries", "2");
        fixture.set_ds_param(mso, "mso.max_unavailable_server_retry_responses", "3");

        let shielded =
            fixture.add_delivery_service("shielded-ds", "HTTP", Some("https://shielded.example.net"));
        fixture.delivery_service(shielded).origin_shield = Some("shield.example.net".into());
        fixture.assign(shielded, MID_SERVER);

        let plain = fixture.add_delivery_service("plain-ds", "HTTP", Some("http://plain.example.net"));
        fixture.assign(plain, MID_SERVER);

        fixture
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        self.snapshot.clone()
    }

    fn add_cache_group(
        &mut self,
        id: i64,
        name: &str,
        type_name: &str,
        parent: Option<i64>,
        secondary: Option<i64>,
    ) {
        self.snapshot.cache_groups.push(CacheGroup {
            id: CacheGroupId(id),
            name: name.into(),
            type_name: type_name.into(),
            parent_cache_group_id: parent.map(CacheGroupId),
            secondary_parent_cache_group_id: secondary.map(CacheGroupId),
        });
    }

    fn add_profile(&mut self, id: i64, name: &str) -> ProfileId {
        self.snapshot.profiles.push(Profile {
            id: ProfileId(id),
            name: name.into(),
            cdn_id: Some(CDN),
            parameters: Vec::new(),
        });
        ProfileId(id)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_server(
        &mut self,
        id: i64,
        host_name: &str,
        domain_name: &str,
        profile: i64,
        cache_group: i64,
        type_name: &str,
        status: &str,
    ) {
        self.snapshot.servers.push(Server {
            id: ServerId(id),
            host_name: host_name.into(),
            domain_name: domain_name.into(),
            ip_address: format!("192.0.2.{id}"),
            tcp_port: 80,
            cdn_id: CDN,
            profile_id: ProfileId(profile),
            cache_group_id: CacheGroupId(cache_group),
            type_name: type_name.into(),
            status: status.into(),
        });
    }

    fn next_parameter_id(&self) -> ParameterId {
        let max = self.snapshot.parameters.iter().map(|p| p.id.0).max().unwrap_or(0);
        ParameterId(max + 1)
    }

    fn add_global_param(&mut self, name: &str, value: &str) {
        let id = self.next_parameter_id();
        self.snapshot.parameters.push(Parameter {
            id,
            name: name.into(),
            config_file: CONFIG_FILE_GLOBAL.into(),
            value: value.into(),
        });
    }

    fn profile(&mut self, profile: ProfileId) -> &mut Profile {
        self.snapshot
            .profiles
            .iter_mut()
            .find(|p| p.id == profile)
            .expect("fixture profile exists")
    }

    fn delivery_service(&mut self, ds: DeliveryServiceId) -> &mut DeliveryService {
        self.snapshot
            .delivery_services
            .iter_mut()
            .find(|d| d.id == ds)
            .expect("fixture delivery service exists")
    }

    fn set_param(&mut self, profile: ProfileId, config_file: &str, name: &str, value: &str) {
        let assigned = self.profile(profile).parameters.clone();
        if let Some(existing) = self
            .snapshot
            .parameters
            .iter_mut()
            .find(|p| assigned.contains(&p.id) && p.config_file == config_file && p.name == name)
        {
            existing.value = value.into();
            return;
        }

        let id = self.next_parameter_id();
        self.snapshot.parameters.push(Parameter {
            id,
            name: name.into(),
            config_file: config_file.into(),
            value: value.into(),
        });
        self.profile(profile).parameters.push(id);
    }

    /// Sets a `parent.config` parameter on the profile.
    pub fn set_profile_param(&mut self, profile: ProfileId, name: &str, value: &str) {
        self.set_param(profile, CONFIG_FILE_PARENT, name, value);
    }

    pub fn set_package_version(&mut self, profile: ProfileId, version: &str) {
        self.set_param(profile, CONFIG_FILE_PACKAGE, "trafficserver", version);
    }

    pub fn remove_profile_param(&mut self, profile: ProfileId, name: &str) {
        let named: Vec<ParameterId> = self
            .snapshot
            .parameters
            .iter()
            .filter(|p| p.name == name)
            .map(|p| p.id)
            .collect();
        self.profile(profile).parameters.retain(|id| !named.contains(id));
    }

    pub fn remove_global_params(&mut self) {
        self.snapshot
            .parameters
            .retain(|p| p.config_file != CONFIG_FILE_GLOBAL);
    }

    pub fn clear_profile_cdn(&mut self, profile: ProfileId) {
        self.profile(profile).cdn_id = None;
    }

    /// Adds an active delivery service of the CDN, unassigned.
    pub fn add_delivery_service(
        &mut self,
        xml_id: &str,
        type_name: &str,
        origin: Option<&str>,
    ) -> DeliveryServiceId {
        let max = self
            .snapshot
            .delivery_services
            .iter()
            .map(|ds| ds.id.0)
            .max()
            .unwrap_or(0);
        let id = DeliveryServiceId(max + 1);

        self.snapshot.delivery_services.push(DeliveryService {
            id,
            xml_id: xml_id.into(),
            cdn_id: CDN,
            type_name: type_name.into(),
            active: true,
            qstring_ignore: Some(0),
            multi_site_origin: Some(false),
            origin_shield: None,
            profile_id: None,
        });

        if let Some(origin) = origin {
            let url = Url::parse(origin).expect("fixture origin is a URL");
            self.snapshot.origins.push(Origin {
                delivery_service_id: id,
                protocol: url.scheme().into(),
                fqdn: url.host_str().expect("fixture origin has a host").into(),
                port: url.port(),
                is_primary: true,
            });
        }
        id
    }

    /// Adds a multi-site origin delivery service served by the mid and every origin server.
    pub fn add_mso_origin(&mut self, xml_id: &str, origin: &str) -> DeliveryServiceId {
        let ds = self.add_delivery_service(xml_id, "HTTP", Some(origin));
        self.delivery_service(ds).multi_site_origin = Some(true);
        self.assign(ds, MID_SERVER);

        let origin_servers: Vec<ServerId> = self
            .snapshot
            .servers
            .iter()
            .filter(|s| s.type_name == SERVER_TYPE_ORIGIN)
            .map(|s| s.id)
            .collect();
        for server in origin_servers {
            self.assign(ds, server);
        }
        ds
    }

    /// Overwrites the stored host of the delivery service's primary origin, bypassing URL
    /// normalization.
    pub fn set_origin_fqdn(&mut self, xml_id: &str, fqdn: &str) {
        let ds = self
            .snapshot
            .delivery_services
            .iter()
            .find(|d| d.xml_id == xml_id)
            .map(|d| d.id)
            .expect("fixture delivery service exists");
        let origin = self
            .snapshot
            .origins
            .iter_mut()
            .find(|o| o.delivery_service_id == ds && o.is_primary)
            .expect("fixture delivery service has an origin");
        origin.fqdn = fqdn.into();
    }

    pub fn assign(&mut self, ds: DeliveryServiceId, server: ServerId) {
        self.snapshot
            .delivery_service_servers
            .push(DeliveryServiceServer {
                server_id: server,
                delivery_service_id: ds,
            });
    }

    /// Sets a `parent.config` parameter on the delivery service's profile, creating the
    /// profile on first use.
    pub fn set_ds_param(&mut self, ds: DeliveryServiceId, name: &str, value: &str) {
        let profile = match self.delivery_service(ds).profile_id {
            Some(profile) => profile,
            None => {
                let max = self.snapshot.profiles.iter().map(|p| p.id.0).max().unwrap_or(0);
                let xml_id = self.delivery_service(ds).xml_id.clone();
                let profile = self.add_profile(max + 1, &format!("DS_{xml_id}"));
                self.delivery_service(ds).profile_id = Some(profile);
                profile
            }
        };
        self.set_profile_param(profile, name, value);
    }
}
