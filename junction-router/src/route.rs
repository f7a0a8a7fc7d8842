//! A compiled route: the runtime filter envelope shared by every route
//! kind (spec.md §3, §4.1 `doRuntimeChecks`), and the tagged
//! [`RouteKind`] variant holding the rewrite/redirect/handled-specific
//! state (spec.md §9 "Action polymorphism").

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::request::Request;

/// The method/host/port/protocol filters every route carries, checked
/// identically regardless of whether the containing table is a trie or a
/// regex list (spec.md §4.1 `doRuntimeChecks`).
#[derive(Debug, Clone, Default)]
pub struct RuntimeFilters {
    pub method_match: Option<String>,
    pub host_match: Option<String>,
    pub port_match: Option<u16>,
    pub proto_match: Option<String>,
    pub allow_write: bool,
    pub force_proto: Option<String>,
    pub force_port: Option<u16>,
    /// Regex applied to the tail after a trie prefix match; unused in
    /// regex-mode tables.
    pub post_match: Option<Regex>,
}

/// `doRuntimeChecks(req, route)` — spec.md §4.1.
pub fn runtime_checks_pass(req: &Request, filters: &RuntimeFilters) -> bool {
    if let Some(method) = &filters.method_match {
        if !method.eq_ignore_ascii_case(&req.method) {
            return false;
        }
    } else if !filters.allow_write && junction_core::util::is_write_method(&req.method) {
        return false;
    }

    if let Some(port) = filters.port_match {
        if port != req.port {
            return false;
        }
    }

    if let Some(host) = &filters.host_match {
        if !host.eq_ignore_ascii_case(&req.hostname) {
            return false;
        }
    }

    if let Some(proto) = &filters.proto_match {
        if proto.as_str() != req.scheme.as_str() {
            return false;
        }
    }

    true
}

#[derive(Debug, Clone)]
pub struct RewriteAction {
    pub pattern: Regex,
    pub replace: String,
    pub match_params: bool,
    pub redirect_code: u16,
    pub status: u16,
    pub is_last: bool,
}

#[derive(Debug, Clone)]
pub struct RedirectAction {
    pub redirect: String,
    pub code: u16,
    pub keep_params: bool,
    pub geo_target: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone)]
pub struct HandledAction {
    pub action: String,
    pub options: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum RouteKind {
    Rewrite(RewriteAction),
    Redirect(RedirectAction),
    Handled(HandledAction),
}

/// A fully compiled route: the matched-against pattern (kept for
/// diagnostics), the shared runtime filter envelope, and the action.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    pub on: String,
    pub filters: RuntimeFilters,
    pub kind: RouteKind,
}

pub type RouteHandle = Arc<CompiledRoute>;

/// The numbered match arguments a handler receives: `args[0]` is always
/// the matched prefix/whole match, `args[1]` the tail (trie mode) or first
/// capture group (regex mode), and so on — spec.md §6 route-handler
/// contract.
#[derive(Debug, Clone, Default)]
pub struct MatchArgs {
    pub numbered: Vec<String>,
    pub key: String,
}

impl MatchArgs {
    pub fn get(&self, index: usize) -> Option<&str> {
        self.numbered.get(index).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::test_support::make_request;

    #[test]
    fn method_match_overrides_write_method_rejection() {
        let req = make_request("POST", "example.com", "http", 80, "/x");
        let mut filters = RuntimeFilters::default();
        filters.method_match = Some("POST".to_string());
        assert!(runtime_checks_pass(&req, &filters));
    }

    #[test]
    fn write_method_rejected_without_allow_write() {
        let req = make_request("POST", "example.com", "http", 80, "/x");
        let filters = RuntimeFilters::default();
        assert!(!runtime_checks_pass(&req, &filters));
    }

    #[test]
    fn write_method_allowed_with_allow_write() {
        let req = make_request("POST", "example.com", "http", 80, "/x");
        let mut filters = RuntimeFilters::default();
        filters.allow_write = true;
        assert!(runtime_checks_pass(&req, &filters));
    }

    #[test]
    fn host_port_and_proto_filters_must_all_match() {
        let req = make_request("GET", "example.com", "https", 443, "/x");
        let mut filters = RuntimeFilters::default();
        filters.host_match = Some("example.com".to_string());
        filters.port_match = Some(443);
        filters.proto_match = Some("https".to_string());
        assert!(runtime_checks_pass(&req, &filters));

        filters.port_match = Some(8080);
        assert!(!runtime_checks_pass(&req, &filters));
    }
}
