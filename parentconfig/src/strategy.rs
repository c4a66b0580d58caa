//! Line generation for the two kinds of cache.
//!
//! A top level cache talks to origins directly and only needs lines for delivery services
//! with an origin shield or a multi-site origin. Every other cache sends all of its delivery
//! services through the shared parent tier and ends with a catch-all line.

use crate::delivery_service::{server_delivery_services, top_level_delivery_services};
use crate::directive::{
    ATS_SECONDARY_PARENT_MIN_VERSION, DirectiveLine, ParentGroups, edge_qstring, mso_qstring,
    with_retry,
};
use crate::metrics_defs::DATA_QUALITY_WARNINGS;
use crate::origin::OriginUri;
use crate::params::ServerProfileParams;
use crate::parent_info::{ParentCandidates, resolve_parents};
use crate::store::{StoreResult, TopologyStore};
use crate::types::{ALGORITHM_CONSISTENT_HASH, ParentKey, ServerInfo};
use shared::counter;

const ALGORITHM_URLHASH: &str = "urlhash";

/// Everything a strategy reads besides the delivery services themselves.
pub struct GenerationContext<'a> {
    pub store: &'a dyn TopologyStore,
    pub server: &'a ServerInfo,
    pub ats_major_version: u32,
    pub server_params: ServerProfileParams,
}

impl GenerationContext<'_> {
    fn supports_secondary_parent(&self) -> bool {
        self.ats_major_version >= ATS_SECONDARY_PARENT_MIN_VERSION
    }
}

/// Generated lines. `lines` get sorted on render; `trailer` always goes last.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Directives {
    pub lines: Vec<String>,
    pub trailer: Option<String>,
}

pub trait ParentConfigStrategy {
    fn directives(&self, ctx: &GenerationContext<'_>) -> StoreResult<Directives>;
}

pub struct TopLevelStrategy;

pub struct EdgeStrategy;

pub fn strategy_for(server: &ServerInfo) -> Box<dyn ParentConfigStrategy> {
    if server.is_top_level_cache() {
        Box::new(TopLevelStrategy)
    } else {
        Box::new(EdgeStrategy)
    }
}

fn parse_origin(ds: &str, origin_fqdn: &str) -> Option<OriginUri> {
    match OriginUri::parse(origin_fqdn) {
        Ok(origin) => Some(origin),
        Err(e) => {
            tracing::warn!(ds, error = %e, "skipping delivery service");
            counter!(DATA_QUALITY_WARNINGS, "kind" => "malformed_origin").increment(1);
            None
        }
    }
}

impl ParentConfigStrategy for TopLevelStrategy {
    fn directives(&self, ctx: &GenerationContext<'_>) -> StoreResult<Directives> {
        let dses = top_level_delivery_services(ctx.store, &ctx.server.cdn)?;
        // Resolved on the first multi-site origin, shared by the rest.
        let mut parents: Option<ParentCandidates> = None;
        let mut lines = Vec::new();

        for top in dses {
            let (ds, mso) = (top.ds, top.mso);
            let Some(origin) = parse_origin(&ds.name, &ds.origin_fqdn) else {
                continue;
            };

            let line = if let Some(shield) = &ds.origin_shield {
                DirectiveLine::for_origin(&origin)
                    .token("parent", shield)
                    .maybe_token("round_robin", ctx.server_params.algorithm.as_ref())
                    .go_direct(true)
            } else if ds.multi_site_origin {
                if parents.is_none() {
                    parents = Some(resolve_parents(ctx.store, ctx.server)?);
                }
                let key = ParentKey::PerOrigin(origin.authority());
                let candidates = parents.as_ref().map(|p| p.get(&key)).unwrap_or_default();
                if candidates.is_empty() {
                    tracing::warn!(ds = %ds.name, "delivery service has no parent servers");
                }

                let split = ctx.supports_secondary_parent() && mso.algorithm == ALGORITHM_CONSISTENT_HASH;
                let groups = ParentGroups::multi_site_origin(candidates, split);
                let qstring = mso_qstring(
                    ds.qstring_handling.as_deref(),
                    &mso.algorithm,
                    ds.qstring_ignore,
                );

                let line = DirectiveLine::for_origin(&origin)
                    .parents(&groups)
                    .token("round_robin", &mso.algorithm)
                    .go_direct(false)
                    .token("parent_is_proxy", false)
                    .token("qstring", qstring);
                if ctx.supports_secondary_parent() {
                    with_retry(line, &ds.name, &mso)
                } else {
                    line
                }
            } else {
                continue;
            };
            lines.push(line.to_string());
        }

        Ok(Directives {
            lines,
            trailer: None,
        })
    }
}

impl ParentConfigStrategy for EdgeStrategy {
    fn directives(&self, ctx: &GenerationContext<'_>) -> StoreResult<Directives> {
        let dses = server_delivery_services(ctx.store, ctx.server.id)?;
        let parents = resolve_parents(ctx.store, ctx.server)?;
        let groups = ParentGroups::shared(
            parents.get(&ParentKey::Shared),
            ctx.supports_secondary_parent(),
        );

        let mut lines = Vec::with_capacity(dses.len());
        for ds in dses {
            let Some(origin) = parse_origin(&ds.name, &ds.origin_fqdn) else {
                continue;
            };

            let line = if ds.ds_type.is_go_direct() {
                DirectiveLine::for_origin(&origin).go_direct(true)
            } else {
                let qstring = edge_qstring(
                    ctx.server_params.qstring_handling.as_deref(),
                    ds.qstring_handling.as_deref(),
                    ds.qstring_ignore,
                );
                DirectiveLine::for_origin(&origin)
                    .parents(&groups)
                    .token("round_robin", ALGORITHM_CONSISTENT_HASH)
                    .go_direct(false)
                    .token("qstring", qstring)
            };
            lines.push(line.to_string());
        }

        let default_dest = match ctx.server_params.algorithm.as_deref() {
            Some(ALGORITHM_CONSISTENT_HASH) => DirectiveLine::new(".")
                .parents(&groups)
                .token("round_robin", ALGORITHM_CONSISTENT_HASH),
            // urlhash predates secondary_parent
            _ => DirectiveLine::new(".")
                .parents(&groups.primary_only())
                .token("round_robin", ALGORITHM_URLHASH),
        }
        .go_direct(false)
        .maybe_token("qstring", ctx.server_params.qstring.as_ref());

        Ok(Directives {
            lines,
            trailer: Some(default_dest.to_string()),
        })
    }
}
