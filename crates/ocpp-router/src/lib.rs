//! The URL trie router (spec §4.6): Express-style `:param`/`*` path
//! templates with a numeric-specificity tie-break, plus a regex fallback
//! pass for opaque pattern routes.
//!
//! Grounded on the teacher's `arti-rpcserver::mgr` in spirit only (a
//! registry keyed by an identifying string, looked up on each request);
//! the trie structure itself and the static/param/wildcard segment
//! classification are new, since nothing in the teacher routes HTTP-style
//! paths — enriched from the general shape of path routers found
//! elsewhere in the retrieval pack.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::BTreeMap;

use ocpp_middleware::Stack;
use regex::Regex;

/// A single classified path segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Segment {
    Static(String),
    Param(String),
    Wildcard,
}

fn classify_segments(pattern: &str) -> Vec<Segment> {
    pattern
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s == "*" {
                Segment::Wildcard
            } else if let Some(name) = s.strip_prefix(':') {
                Segment::Param(name.to_owned())
            } else {
                Segment::Static(s.to_owned())
            }
        })
        .collect()
}

/// Optional per-route settings that override server defaults (spec §4.6).
#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    /// `callTimeoutMs` override.
    pub call_timeout_ms: Option<u64>,
    /// `pingIntervalMs` override.
    pub ping_interval_ms: Option<u64>,
    /// `callConcurrency` override.
    pub call_concurrency: Option<usize>,
    /// `strictMode` override, as a list of protocol strings or "all"/"none"
    /// is decided by the caller; stored here as opaque strings.
    pub strict_mode: Option<Vec<String>>,
    /// `respondWithDetailedErrors` override.
    pub respond_with_detailed_errors: Option<bool>,
    /// `maxBadMessages` override.
    pub max_bad_messages: Option<u32>,
}

impl RouteConfig {
    /// Shallow-merge `self` (the route) over `base` (server defaults):
    /// any field set on the route wins, otherwise fall through to the
    /// server default (spec §4.6, "Config inheritance").
    pub fn merge_over(&self, base: &RouteConfig) -> RouteConfig {
        RouteConfig {
            call_timeout_ms: self.call_timeout_ms.or(base.call_timeout_ms),
            ping_interval_ms: self.ping_interval_ms.or(base.ping_interval_ms),
            call_concurrency: self.call_concurrency.or(base.call_concurrency),
            strict_mode: self.strict_mode.clone().or_else(|| base.strict_mode.clone()),
            respond_with_detailed_errors: self
                .respond_with_detailed_errors
                .or(base.respond_with_detailed_errors),
            max_bad_messages: self.max_bad_messages.or(base.max_bad_messages),
        }
    }
}

/// A registered route: its middleware stack, config overrides, allowed
/// subprotocols, and auth callback handle (the callback itself is stored
/// by the server crate; this just reserves a slot by name since
/// `ocpp-router` has no notion of an async auth callback type).
pub struct Route {
    pattern: String,
    segments: Vec<Segment>,
    regex: Option<Regex>,
    /// Middleware specific to this route (concatenated after server-level).
    pub middlewares: Stack,
    /// Config overrides for peers accepted on this route.
    pub config: RouteConfig,
    /// Subprotocols this route accepts, if restricted.
    pub allowed_protocols: Option<Vec<String>>,
}

impl Route {
    /// Sortable so that a greater value means a more specific route: more
    /// static segments, then more params, then absence of a wildcard
    /// (spec §4.6: "more static segments > more params > wildcard").
    fn specificity(&self) -> (usize, usize, bool) {
        let mut statics = 0;
        let mut params = 0;
        let mut wildcard = false;
        for seg in &self.segments {
            match seg {
                Segment::Static(_) => statics += 1,
                Segment::Param(_) => params += 1,
                Segment::Wildcard => wildcard = true,
            }
        }
        (statics, params, !wildcard)
    }
}

/// A successful route match: the route and any path parameters extracted.
pub struct Matched<'a> {
    /// The matched route.
    pub route: &'a Route,
    /// Path parameters extracted by name, in path order.
    pub params: BTreeMap<String, String>,
}

#[derive(Default)]
struct TrieNode {
    routes: Vec<usize>,
    statics: BTreeMap<String, TrieNode>,
    param: Option<(String, Box<TrieNode>)>,
    wildcard: Option<usize>,
}

/// The router: a trie of path-template routes plus a linear list of
/// regex-pattern routes consulted as a fallback.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    trie: TrieNode,
    regex_route_order: Vec<usize>,
}

/// Error raised when registering a conflicting or malformed route.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum RouterError {
    /// The pattern could not be compiled as a regular expression.
    #[error("invalid regular expression route: {0}")]
    InvalidRegex(String),
}

impl Router {
    /// An empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path-template route (`/a/:b/*`).
    pub fn route(
        &mut self,
        pattern: impl Into<String>,
        middlewares: Stack,
        config: RouteConfig,
        allowed_protocols: Option<Vec<String>>,
    ) {
        let pattern = pattern.into();
        let segments = classify_segments(&pattern);
        let route = Route {
            pattern,
            segments,
            regex: None,
            middlewares,
            config,
            allowed_protocols,
        };
        let idx = self.routes.len();
        let segments = route.segments.clone();
        self.insert_into_trie(idx, &segments);
        self.routes.push(route);
    }

    /// Register an opaque regular-expression route, matched in
    /// registration order after the trie pass finds nothing (spec §4.6).
    pub fn route_regex(
        &mut self,
        pattern: &str,
        middlewares: Stack,
        config: RouteConfig,
        allowed_protocols: Option<Vec<String>>,
    ) -> Result<(), RouterError> {
        let regex = Regex::new(pattern).map_err(|e| RouterError::InvalidRegex(e.to_string()))?;
        let route = Route {
            pattern: pattern.to_owned(),
            segments: Vec::new(),
            regex: Some(regex),
            middlewares,
            config,
            allowed_protocols,
        };
        let idx = self.routes.len();
        self.regex_route_order.push(idx);
        self.routes.push(route);
        Ok(())
    }

    fn insert_into_trie(&mut self, idx: usize, segments: &[Segment]) {
        let mut node = &mut self.trie;
        for seg in segments {
            node = match seg {
                Segment::Static(s) => node.statics.entry(s.clone()).or_default(),
                Segment::Param(name) => {
                    if node.param.is_none() {
                        node.param = Some((name.clone(), Box::new(TrieNode::default())));
                    }
                    &mut node.param.as_mut().unwrap().1
                }
                Segment::Wildcard => {
                    node.wildcard = Some(idx);
                    return;
                }
            };
        }
        node.routes.push(idx);
    }

    /// Find the best-matching route for `path`, per spec §4.6's
    /// specificity rule: more static segments > more params > wildcard,
    /// ties broken by registration order.
    pub fn matches(&self, path: &str) -> Option<Matched<'_>> {
        let path_segments: Vec<&str> = path
            .trim_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let mut candidates = Vec::new();
        self.walk_trie(&self.trie, &path_segments, &mut BTreeMap::new(), &mut candidates);

        if let Some((idx, params)) = candidates
            .into_iter()
            .max_by_key(|(idx, _)| (self.routes[*idx].specificity(), std::cmp::Reverse(*idx)))
        {
            return Some(Matched {
                route: &self.routes[idx],
                params,
            });
        }

        for &idx in &self.regex_route_order {
            let route = &self.routes[idx];
            if let Some(regex) = &route.regex {
                if regex.is_match(path) {
                    return Some(Matched {
                        route,
                        params: BTreeMap::new(),
                    });
                }
            }
        }
        None
    }

    fn walk_trie(
        &self,
        node: &TrieNode,
        remaining: &[&str],
        params: &mut BTreeMap<String, String>,
        out: &mut Vec<(usize, BTreeMap<String, String>)>,
    ) {
        if remaining.is_empty() {
            for &idx in &node.routes {
                out.push((idx, params.clone()));
            }
            return;
        }
        let (head, tail) = (remaining[0], &remaining[1..]);

        if let Some(child) = node.statics.get(head) {
            self.walk_trie(child, tail, params, out);
        }
        if let Some((name, child)) = &node.param {
            let mut params = params.clone();
            params.insert(name.clone(), head.to_owned());
            self.walk_trie(child, tail, &mut params, out);
        }
        if let Some(idx) = node.wildcard {
            out.push((idx, params.clone()));
        }
    }

    /// Try the legacy `/ocpp/<identity>` fallback: the last path segment
    /// is taken verbatim as the identity (spec §4.11 step 3).
    pub fn legacy_identity(path: &str) -> Option<&str> {
        path.trim_matches('/').rsplit('/').next().filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn router_with(patterns: &[&str]) -> Router {
        let mut r = Router::new();
        for p in patterns {
            r.route(*p, Stack::new(), RouteConfig::default(), None);
        }
        r
    }

    #[test]
    fn static_beats_param_beats_wildcard() {
        let r = router_with(&["/ocpp/:id", "/ocpp/special", "/*"]);
        let m = r.matches("/ocpp/special").unwrap();
        assert_eq!(m.route.pattern, "/ocpp/special");
    }

    #[test]
    fn param_is_extracted() {
        let r = router_with(&["/ocpp/:id"]);
        let m = r.matches("/ocpp/CP001").unwrap();
        assert_eq!(m.params.get("id"), Some(&"CP001".to_owned()));
    }

    #[test]
    fn wildcard_matches_anything_left() {
        let r = router_with(&["/ocpp/:id", "/*"]);
        let m = r.matches("/totally/unrelated/path").unwrap();
        assert_eq!(m.route.pattern, "/*");
    }

    #[test]
    fn legacy_identity_takes_last_segment() {
        assert_eq!(Router::legacy_identity("/ocpp/CP001"), Some("CP001"));
        assert_eq!(Router::legacy_identity("/"), None);
    }

    #[test]
    fn regex_fallback_used_when_trie_misses() {
        let mut r = Router::new();
        r.route_regex(r"^/legacy-[0-9]+$", Stack::new(), RouteConfig::default(), None)
            .unwrap();
        assert!(r.matches("/legacy-42").is_some());
        assert!(r.matches("/legacy-abc").is_none());
    }

    #[test]
    fn route_config_merge_prefers_route_over_server_default() {
        let server = RouteConfig {
            call_timeout_ms: Some(30_000),
            max_bad_messages: Some(5),
            ..Default::default()
        };
        let route = RouteConfig {
            call_timeout_ms: Some(5_000),
            ..Default::default()
        };
        let merged = route.merge_over(&server);
        assert_eq!(merged.call_timeout_ms, Some(5_000));
        assert_eq!(merged.max_bad_messages, Some(5));
    }
}
