//! Building blocks of `parent.config` lines.
//!
//! A line is a space separated list of `key=value` tokens. The order of tokens is significant
//! to the cache server's parser, so every line is built front to back through
//! [`DirectiveLine`] in the order the grammar lists them:
//!
//! ```text
//! dest_domain port parent [secondary_parent] round_robin go_direct [parent_is_proxy] qstring [retry...]
//! ```

use crate::delivery_service::MsoSettings;
use crate::metrics_defs::DATA_QUALITY_WARNINGS;
use crate::origin::OriginUri;
use crate::types::{ALGORITHM_CONSISTENT_HASH, ParentInfo};
use regex::Regex;
use shared::counter;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

pub const QSTRING_CONSIDER: &str = "consider";
pub const QSTRING_IGNORE: &str = "ignore";

/// First ATS major version that understands `secondary_parent` and the retry directives.
pub const ATS_SECONDARY_PARENT_MIN_VERSION: u32 = 6;

static RETRY_RESPONSES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{3}(,\d{3})*$").expect("retry response pattern is valid"));

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DirectiveLine {
    tokens: Vec<String>,
}

impl DirectiveLine {
    pub fn new(dest_domain: &str) -> Self {
        DirectiveLine {
            tokens: vec![format!("dest_domain={dest_domain}")],
        }
    }

    /// `dest_domain` and `port`. The port is left empty for schemes without a default.
    pub fn for_origin(origin: &OriginUri) -> Self {
        let port = origin.port.map(|p| p.to_string()).unwrap_or_default();
        Self::new(&origin.host).token("port", port)
    }

    pub fn token(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.tokens.push(format!("{key}={value}"));
        self
    }

    pub fn quoted(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.tokens.push(format!("{key}=\"{value}\""));
        self
    }

    pub fn maybe_token(self, key: &str, value: Option<impl fmt::Display>) -> Self {
        match value {
            Some(value) => self.token(key, value),
            None => self,
        }
    }

    pub fn parents(self, groups: &ParentGroups) -> Self {
        let line = self.quoted("parent", groups.primary.concat());
        if groups.secondary.is_empty() {
            line
        } else {
            line.quoted("secondary_parent", groups.secondary.concat())
        }
    }

    pub fn go_direct(self, go_direct: bool) -> Self {
        self.token("go_direct", go_direct)
    }
}

impl fmt::Display for DirectiveLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}

/// Formatted parent entries already placed in an earlier group.
///
/// The set is moved through each call so one generation pass owns exactly one of them.
#[derive(Debug, Default)]
pub struct SeenParents(HashSet<String>);

impl SeenParents {
    /// Drops the entries of `parents` that were already seen, keeping the order of the rest.
    pub fn retain_unseen(mut self, parents: Vec<String>) -> (Vec<String>, Self) {
        let kept = parents
            .into_iter()
            .filter(|p| self.0.insert(p.clone()))
            .collect();
        (kept, self)
    }
}

/// Parents of one destination, as they go into `parent` and `secondary_parent`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParentGroups {
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
}

impl ParentGroups {
    /// Parent groups of a multi-site origin, from candidates of that origin.
    ///
    /// Candidates are stable sorted by rank and bucketed into primary, secondary and unranked
    /// (neither). An empty primary bucket takes the secondary bucket, or the unranked bucket
    /// when secondary is empty too. With `split` the secondary and unranked buckets go into
    /// `secondary_parent`; otherwise everything goes into `parent`.
    pub fn multi_site_origin(candidates: &[ParentInfo], split: bool) -> Self {
        let mut ranked: Vec<&ParentInfo> = candidates.iter().collect();
        ranked.sort_by_key(|p| p.rank);

        let mut primary = Vec::new();
        let mut secondary = Vec::new();
        let mut unranked = Vec::new();
        for parent in ranked {
            if parent.primary_parent {
                primary.push(parent.format());
            } else if parent.secondary_parent {
                secondary.push(parent.format());
            } else {
                unranked.push(parent.format());
            }
        }

        if primary.is_empty() {
            if secondary.is_empty() {
                secondary = std::mem::take(&mut unranked);
            }
            primary = std::mem::take(&mut secondary);
        }

        let seen = SeenParents::default();
        let (mut primary, seen) = seen.retain_unseen(primary);
        let (mut secondary, seen) = seen.retain_unseen(secondary);
        let (unranked, _) = seen.retain_unseen(unranked);

        secondary.extend(unranked);
        if !split {
            primary.append(&mut secondary);
        }
        ParentGroups { primary, secondary }
    }

    /// Parent groups shared by every delivery service of a non top level cache.
    ///
    /// Candidates in neither the parent nor the secondary parent cache group are ignored. An
    /// empty primary group takes the secondary group. Each group is sorted. Without `split`
    /// the secondary group is appended to the primary one.
    pub fn shared(candidates: &[ParentInfo], split: bool) -> Self {
        let mut primary = Vec::new();
        let mut secondary = Vec::new();
        for parent in candidates {
            if parent.primary_parent {
                primary.push(parent.format());
            } else if parent.secondary_parent {
                secondary.push(parent.format());
            }
        }

        if primary.is_empty() {
            primary = std::mem::take(&mut secondary);
        }

        let (mut primary, seen) = SeenParents::default().retain_unseen(primary);
        let (mut secondary, _) = seen.retain_unseen(secondary);
        primary.sort();
        secondary.sort();

        if !split {
            primary.append(&mut secondary);
        }
        ParentGroups { primary, secondary }
    }

    /// The same groups without `secondary_parent`.
    pub fn primary_only(&self) -> Self {
        ParentGroups {
            primary: self.primary.clone(),
            secondary: Vec::new(),
        }
    }
}

/// `qstring` of a multi-site origin line.
pub fn mso_qstring(handling: Option<&str>, algorithm: &str, qstring_ignore: i32) -> String {
    match handling {
        Some(handling) => handling.to_string(),
        None if algorithm == ALGORITHM_CONSISTENT_HASH && qstring_ignore == 0 => {
            QSTRING_CONSIDER.to_string()
        }
        None => QSTRING_IGNORE.to_string(),
    }
}

/// `qstring` of a non top level line; the server profile's handling wins over the delivery
/// service's.
pub fn edge_qstring(
    server_handling: Option<&str>,
    ds_handling: Option<&str>,
    qstring_ignore: i32,
) -> String {
    match server_handling.or(ds_handling) {
        Some(handling) => handling.to_string(),
        None if qstring_ignore == 0 => QSTRING_CONSIDER.to_string(),
        None => QSTRING_IGNORE.to_string(),
    }
}

/// Strips whitespace from a retry response list and validates it as comma separated
/// three digit status codes.
pub fn retry_responses(raw: &str) -> Option<String> {
    let codes: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    RETRY_RESPONSES.is_match(&codes).then_some(codes)
}

/// Appends the multi-site origin retry directives. Nothing is added without a retry mode.
pub fn with_retry(line: DirectiveLine, ds: &str, mso: &MsoSettings) -> DirectiveLine {
    let Some(mode) = &mso.parent_retry else {
        return line;
    };

    let mut line = line.token("parent_retry", mode);
    if let Some(raw) = &mso.unavailable_server_retry_responses {
        match retry_responses(raw) {
            Some(codes) => line = line.token("unavailable_server_retry_responses", codes),
            None => {
                tracing::warn!(
                    ds,
                    value = %raw,
                    "malformed unavailable_server_retry_responses parameter, not using"
                );
                counter!(DATA_QUALITY_WARNINGS, "kind" => "invalid_retry_responses")
                    .increment(1);
            }
        }
    }
    line.maybe_token("max_simple_retries", mso.max_simple_retries.as_ref())
        .maybe_token(
            "max_unavailable_server_retries",
            mso.max_unavailable_server_retries.as_ref(),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(host: &str, rank: i32, primary: bool, secondary: bool) -> ParentInfo {
        ParentInfo {
            host: host.into(),
            domain: "infra.test".into(),
            ip: "192.0.2.1".into(),
            port: 80,
            weight: 0.999,
            rank,
            use_ip: false,
            not_a_parent: false,
            primary_parent: primary,
            secondary_parent: secondary,
        }
    }

    fn entry(host: &str) -> String {
        format!("{host}.infra.test:80|0.999;")
    }

    #[test]
    fn test_line_token_order() {
        let origin = OriginUri::parse("http://origin.example.net").unwrap();
        let groups = ParentGroups {
            primary: vec![entry("a")],
            secondary: vec![entry("b")],
        };
        let line = DirectiveLine::for_origin(&origin)
            .parents(&groups)
            .token("round_robin", "consistent_hash")
            .go_direct(false)
            .token("qstring", "ignore");
        assert_eq!(
            line.to_string(),
            "dest_domain=origin.example.net port=80 parent=\"a.infra.test:80|0.999;\" \
             secondary_parent=\"b.infra.test:80|0.999;\" round_robin=consistent_hash \
             go_direct=false qstring=ignore"
        );

        let origin = OriginUri::parse("gopher://origin.example.net").unwrap();
        assert_eq!(
            DirectiveLine::for_origin(&origin).go_direct(true).to_string(),
            "dest_domain=origin.example.net port= go_direct=true"
        );

        let origin = OriginUri::parse("http://[2001:db8::1]:8080").unwrap();
        assert_eq!(
            DirectiveLine::for_origin(&origin).go_direct(true).to_string(),
            "dest_domain=2001:db8::1 port=8080 go_direct=true"
        );
    }

    #[test]
    fn test_seen_parents() {
        let (first, seen) = SeenParents::default().retain_unseen(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(first, vec!["a", "b"]);
        let (second, _) = seen.retain_unseen(vec!["b".into(), "c".into()]);
        assert_eq!(second, vec!["c"]);
    }

    #[test]
    fn test_mso_groups_rank_and_split() {
        let candidates = vec![
            parent("sec", 1, false, true),
            parent("late", 2, true, false),
            parent("early", 1, true, false),
            parent("none", 1, false, false),
        ];

        let groups = ParentGroups::multi_site_origin(&candidates, true);
        assert_eq!(groups.primary, vec![entry("early"), entry("late")]);
        assert_eq!(groups.secondary, vec![entry("sec"), entry("none")]);

        let groups = ParentGroups::multi_site_origin(&candidates, false);
        assert_eq!(
            groups.primary,
            vec![entry("early"), entry("late"), entry("sec"), entry("none")]
        );
        assert!(groups.secondary.is_empty());
    }

    #[test]
    fn test_mso_groups_promotion() {
        // secondary takes the empty primary slot and the unranked ones stay behind it
        let groups = ParentGroups::multi_site_origin(
            &[parent("none", 1, false, false), parent("sec", 1, false, true)],
            true,
        );
        assert_eq!(groups.primary, vec![entry("sec")]);
        assert_eq!(groups.secondary, vec![entry("none")]);

        // with neither primary nor secondary the unranked ones are promoted
        let groups = ParentGroups::multi_site_origin(
            &[parent("none0", 1, false, false), parent("none1", 1, false, false)],
            true,
        );
        assert_eq!(groups.primary, vec![entry("none0"), entry("none1")]);
        assert!(groups.secondary.is_empty());
    }

    #[test]
    fn test_mso_groups_dedup_across_buckets() {
        let groups = ParentGroups::multi_site_origin(
            &[
                parent("dup", 1, true, false),
                parent("dup", 1, false, true),
                parent("dup", 1, false, false),
                parent("other", 1, false, false),
            ],
            true,
        );
        assert_eq!(groups.primary, vec![entry("dup")]);
        assert_eq!(groups.secondary, vec![entry("other")]);
    }

    #[test]
    fn test_shared_groups() {
        let candidates = vec![
            parent("mid1", 1, true, false),
            parent("mid0", 1, true, false),
            parent("sec0", 1, false, true),
            parent("stray", 1, false, false),
        ];
        let groups = ParentGroups::shared(&candidates, true);
        assert_eq!(groups.primary, vec![entry("mid0"), entry("mid1")]);
        assert_eq!(groups.secondary, vec![entry("sec0")]);
        assert_eq!(groups.primary_only().secondary, Vec::<String>::new());

        let groups = ParentGroups::shared(&candidates, false);
        assert_eq!(groups.primary, vec![entry("mid0"), entry("mid1"), entry("sec0")]);

        let groups = ParentGroups::shared(&[parent("sec0", 1, false, true)], true);
        assert_eq!(groups.primary, vec![entry("sec0")]);
        assert!(groups.secondary.is_empty());
    }

    #[test]
    fn test_qstring() {
        assert_eq!(mso_qstring(None, "consistent_hash", 0), "consider");
        assert_eq!(mso_qstring(None, "consistent_hash", 1), "ignore");
        assert_eq!(mso_qstring(None, "true", 0), "ignore");
        assert_eq!(mso_qstring(Some("drop"), "consistent_hash", 0), "drop");

        assert_eq!(edge_qstring(None, None, 0), "consider");
        assert_eq!(edge_qstring(None, None, 1), "ignore");
        assert_eq!(edge_qstring(None, Some("drop"), 0), "drop");
        assert_eq!(edge_qstring(Some("ignore"), Some("drop"), 0), "ignore");
    }

    #[test]
    fn test_retry_responses() {
        assert_eq!(retry_responses("503,504,598").as_deref(), Some("503,504,598"));
        assert_eq!(retry_responses(" 503, 504,\t598\n").as_deref(), Some("503,504,598"));
        assert_eq!(retry_responses("503").as_deref(), Some("503"));
        assert_eq!(retry_responses("abc"), None);
        assert_eq!(retry_responses(""), None);
        assert_eq!(retry_responses("503,"), None);
        assert_eq!(retry_responses("5033"), None);
    }

    #[test]
    fn test_retry_directives() {
        let mut mso = MsoSettings {
            parent_retry: Some("both".into()),
            unavailable_server_retry_responses: Some("abc".into()),
            max_simple_retries: Some("2".into()),
            max_unavailable_server_retries: None,
            ..MsoSettings::default()
        };
        let line = with_retry(DirectiveLine::new("o"), "ds", &mso);
        assert_eq!(line.to_string(), "dest_domain=o parent_retry=both max_simple_retries=2");

        mso.unavailable_server_retry_responses = Some("503, 504".into());
        mso.max_unavailable_server_retries = Some("3".into());
        let line = with_retry(DirectiveLine::new("o"), "ds", &mso);
        assert_eq!(
            line.to_string(),
            "dest_domain=o parent_retry=both unavailable_server_retry_responses=503,504 \
             max_simple_retries=2 max_unavailable_server_retries=3"
        );

        mso.parent_retry = None;
        assert_eq!(
            with_retry(DirectiveLine::new("o"), "ds", &mso).to_string(),
            "dest_domain=o"
        );
    }
}
