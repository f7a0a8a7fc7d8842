//! Compiling a [`junction_core::config::RouteTableConf`] into a runtime
//! [`RouteTable`], and resolving an inbound path against it (spec.md §4.2
//! trie matching, §4.4 regex matching, §4.3 route compilation).

use std::sync::Arc;

use regex::Regex;

use junction_core::config::RouteTableConf;
use junction_core::environments::Environments;
use junction_core::ConfigError;

use crate::handlers::HandlerRegistry;
use crate::route::{
    runtime_checks_pass, CompiledRoute, HandledAction, MatchArgs, RedirectAction, RewriteAction,
    RouteHandle, RouteKind, RuntimeFilters,
};
use crate::request::Request;
use crate::trie::TrieRoute;

enum Resolver {
    Trie(TrieRoute<RouteHandle>),
    Regex(Vec<(Regex, RouteHandle)>),
}

/// A compiled route table: the ordered/indexed set of routes plus the
/// table-wide settings that apply regardless of which route within it
/// matches (spec.md §3 `RouteTable`).
pub struct RouteTable {
    pub name: String,
    pub is_case_specific: bool,
    pub match_using_query_params: bool,
    pub force_proto: Option<String>,
    pub force_port: Option<u16>,
    pub default_handler: Option<String>,
    pub route_namespace: Option<String>,
    pub default_redirect_code: u16,
    resolver: Resolver,
}

/// spec.md §4.3 step 4: classify by "first present field among rewrite,
/// redirect, else handled (uses `do` or the table's default handler)".
/// `table_default_handler` is the containing table's `defaultHandler`,
/// consulted when the route itself carries no `do`; `handlers` is the
/// registry every resolved action name must exist in, checked here so an
/// unknown name is a build-time `ConfigError` rather than a dispatch-time
/// surprise.
fn classify_route(
    name: &str,
    conf: &junction_core::config::RouteConf,
    table_default_handler: Option<&str>,
    handlers: &HandlerRegistry,
) -> Result<RouteKind, ConfigError> {
    if conf.rewrite.is_some() {
        let pattern_src = conf.rewrite.as_deref().unwrap();
        let pattern = Regex::new(pattern_src)
            .map_err(|e| ConfigError::InvalidRegex(name.to_string(), e))?;
        Ok(RouteKind::Rewrite(RewriteAction {
            pattern,
            replace: conf.replace.clone().unwrap_or_default(),
            match_params: conf.match_params.unwrap_or(false),
            redirect_code: conf.redirect_code.unwrap_or(0),
            status: conf.status.unwrap_or(0),
            is_last: conf.is_last.unwrap_or(false),
        }))
    } else if conf.redirect.is_some() || conf.code.is_some() {
        let redirect = conf
            .redirect
            .clone()
            .ok_or_else(|| ConfigError::RedirectMissingTarget(name.to_string()))?;
        Ok(RouteKind::Redirect(RedirectAction {
            redirect,
            code: conf.code.unwrap_or(0),
            keep_params: conf.keep_params.unwrap_or(true),
            geo_target: conf.geo_target.clone(),
        }))
    } else {
        let action = conf
            .do_
            .clone()
            .or_else(|| table_default_handler.map(str::to_string))
            .ok_or(ConfigError::AmbiguousRouteKind)?;
        if !handlers.contains(&action) {
            return Err(ConfigError::UnknownHandler(action));
        }
        Ok(RouteKind::Handled(HandledAction { action, options: conf.options.clone() }))
    }
}

impl RouteTable {
    /// Compile a declared table against a build-time [`Environments`] and
    /// [`HandlerRegistry`]: routes whose `conds` aren't satisfied (after
    /// substitution) are silently dropped, every surviving route's strings
    /// are substituted, and filters/method/proto/handler values are
    /// validated before the route is indexed into a trie or regex
    /// resolver.
    pub fn compile(
        name: &str,
        conf: &RouteTableConf,
        env: &Environments,
        handlers: &HandlerRegistry,
    ) -> Result<RouteTable, ConfigError> {
        if let Some(default_handler) = &conf.default_handler {
            if !handlers.contains(default_handler) {
                return Err(ConfigError::UnknownHandler(default_handler.clone()));
            }
        }

        let mut resolver = if conf.match_type.is_trie() {
            Resolver::Trie(TrieRoute::new())
        } else {
            Resolver::Regex(Vec::new())
        };

        for route_conf in &conf.routes {
            if let Some(conds) = &route_conf.conds {
                // spec.md §4.3 step 1: "Condition values are substituted
                // before comparison".
                let substituted: std::collections::HashMap<String, String> = conds
                    .iter()
                    .map(|(k, v)| (k.clone(), env.substitute(v)))
                    .collect();
                if !env.satisfies(&substituted) {
                    continue;
                }
            }

            let on = env.substitute(&route_conf.on);

            if let Some(method) = &route_conf.method_match {
                if !junction_core::util::is_method_valid(method) {
                    return Err(ConfigError::InvalidMethod(method.clone()));
                }
            }
            if let Some(proto) = &route_conf.proto_match {
                if proto != "http" && proto != "https" {
                    return Err(ConfigError::InvalidProtocol(proto.clone()));
                }
            }

            let post_match = match &route_conf.post_match {
                Some(src) => Some(
                    Regex::new(src).map_err(|e| ConfigError::InvalidRegex(on.clone(), e))?,
                ),
                None => None,
            };

            let filters = RuntimeFilters {
                method_match: route_conf.method_match.clone(),
                host_match: route_conf.host_match.clone(),
                port_match: route_conf.port_match,
                proto_match: route_conf.proto_match.clone(),
                allow_write: route_conf.allow_write.unwrap_or(false),
                // A route without its own forceProto/forcePort inherits the
                // containing table's (spec.md §4.6: "a route or the
                // containing route table"), so the engine only needs to
                // look at one place at dispatch time.
                force_proto: route_conf.force_proto.clone().or_else(|| conf.force_proto.clone()),
                force_port: route_conf.force_port.or(conf.force_port),
                post_match,
            };

            let kind = classify_route(&on, route_conf, conf.default_handler.as_deref(), handlers)?;
            let compiled = Arc::new(CompiledRoute { on: on.clone(), filters, kind });

            match &mut resolver {
                Resolver::Trie(trie) => {
                    let key = if conf.is_case_specific { on.clone() } else { on.to_ascii_lowercase() };
                    trie.add(&key, compiled)
                        .map_err(|_| ConfigError::DuplicateRoute(on.clone()))?;
                }
                Resolver::Regex(list) => {
                    let re = Regex::new(&on).map_err(|e| ConfigError::InvalidRegex(on.clone(), e))?;
                    list.push((re, compiled));
                }
            }
        }

        tracing::debug!(table = name, routes = conf.routes.len(), "compiled route table");

        Ok(RouteTable {
            name: name.to_string(),
            is_case_specific: conf.is_case_specific,
            match_using_query_params: conf.match_using_query_params,
            force_proto: conf.force_proto.clone(),
            force_port: conf.force_port,
            default_handler: conf.default_handler.clone(),
            route_namespace: conf.route_namespace.clone(),
            default_redirect_code: conf.default_redirect_code,
            resolver,
        })
    }

    /// Resolve `req` against this table. Returns the matched route and the
    /// numbered match arguments a handler receives, or `None` if nothing in
    /// this table matches (the caller falls through to the next table, or
    /// to the host's default handler).
    pub fn resolve(&self, req: &Request) -> Option<(RouteHandle, MatchArgs)> {
        // spec.md §4.4: "Build key = (isCaseSpecific ? req.path :
        // req.normalizedPath) + (matchUsingQueryParams ? "?" + req.query :
        // "")" — applies uniformly to both the trie and the regex resolver.
        let mut lookup_path = if self.is_case_specific { req.path.clone() } else { req.path.to_ascii_lowercase() };
        if self.match_using_query_params {
            lookup_path.push('?');
            lookup_path.push_str(&req.raw_query);
        }

        match &self.resolver {
            Resolver::Trie(trie) => {
                let (route, matched) = trie.find(&lookup_path, |r| runtime_checks_pass(req, &r.filters))?;
                let tail = &lookup_path[matched.len()..];

                if let Some(post_match) = &route.filters.post_match {
                    if !post_match.is_match(tail) {
                        return None;
                    }
                }

                let args = MatchArgs {
                    numbered: vec![matched.to_string(), tail.to_string()],
                    key: route.on.clone(),
                };
                Some((route, args))
            }
            Resolver::Regex(list) => {
                for (re, route) in list {
                    if !runtime_checks_pass(req, &route.filters) {
                        continue;
                    }
                    if let Some(caps) = re.captures(&lookup_path) {
                        let mut numbered = Vec::with_capacity(caps.len());
                        for i in 0..caps.len() {
                            numbered.push(caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default());
                        }
                        let args = MatchArgs { numbered, key: route.on.clone() };
                        return Some((route.clone(), args));
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_core::config::{MatchType, RouteConf, RouteTableConf};
    use crate::request::test_support::make_request;

    struct NoopHandler;
    impl crate::handlers::RouteHandler for NoopHandler {
        async fn handle(
            &self,
            req: &mut Request,
            _route: &CompiledRoute,
            _args: &MatchArgs,
        ) -> Result<bool, junction_core::AnyError> {
            req.send(200, bytes::Bytes::new())?;
            Ok(true)
        }
    }

    fn registry_with(names: &[&str]) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        for name in names {
            registry.register(*name, std::sync::Arc::new(NoopHandler));
        }
        registry
    }

    fn bare_route(on: &str) -> RouteConf {
        RouteConf {
            on: on.to_string(),
            conds: None,
            method_match: None,
            host_match: None,
            port_match: None,
            proto_match: None,
            allow_write: None,
            force_proto: None,
            force_port: None,
            post_match: None,
            rewrite: None,
            replace: None,
            match_params: None,
            redirect_code: None,
            status: None,
            is_last: None,
            redirect: None,
            code: None,
            keep_params: None,
            geo_target: None,
            do_: Some("health".to_string()),
            options: None,
        }
    }

    #[test]
    fn trie_table_resolves_exact_and_prefix() {
        let mut conf = RouteTableConf {
            match_type: MatchType::Trie,
            is_case_specific: true,
            match_using_query_params: false,
            force_proto: None,
            force_port: None,
            default_handler: None,
            route_namespace: None,
            default_redirect_code: 302,
            routes: Vec::new(),
        };
        let mut a = bare_route("/a/b#");
        a.do_ = Some("exact".to_string());
        let mut b = bare_route("/a/");
        b.do_ = Some("prefix".to_string());
        conf.routes.push(a);
        conf.routes.push(b);

        let env = Environments::new();
        let handlers = registry_with(&["exact", "prefix"]);
        let table = RouteTable::compile("t", &conf, &env, &handlers).unwrap();

        let req = make_request("GET", "h", "http", 80, "/a/b");
        let (route, args) = table.resolve(&req).unwrap();
        match &route.kind {
            RouteKind::Handled(h) => assert_eq!(h.action, "exact"),
            _ => panic!("wrong kind"),
        }
        assert_eq!(args.numbered[0], "/a/b");

        let req2 = make_request("GET", "h", "http", 80, "/a/b/c");
        let (route2, _) = table.resolve(&req2).unwrap();
        match &route2.kind {
            RouteKind::Handled(h) => assert_eq!(h.action, "prefix"),
            _ => panic!("wrong kind"),
        }
    }

    #[test]
    fn conds_drop_non_matching_routes_at_compile_time() {
        let mut conf = RouteTableConf {
            match_type: MatchType::Trie,
            is_case_specific: true,
            match_using_query_params: false,
            force_proto: None,
            force_port: None,
            default_handler: None,
            route_namespace: None,
            default_redirect_code: 302,
            routes: Vec::new(),
        };
        let mut route = bare_route("/beta#");
        let mut conds = std::collections::HashMap::new();
        conds.insert("flag".to_string(), "on".to_string());
        route.conds = Some(conds);
        conf.routes.push(route);

        let env = Environments::new();
        let handlers = registry_with(&["health"]);
        let table = RouteTable::compile("t", &conf, &env, &handlers).unwrap();
        let req = make_request("GET", "h", "http", 80, "/beta");
        assert!(table.resolve(&req).is_none());
    }

    #[test]
    fn conds_are_substituted_before_comparison() {
        let mut conf = RouteTableConf {
            match_type: MatchType::Trie,
            is_case_specific: true,
            match_using_query_params: false,
            force_proto: None,
            force_port: None,
            default_handler: None,
            route_namespace: None,
            default_redirect_code: 302,
            routes: Vec::new(),
        };
        let mut route = bare_route("/beta#");
        let mut conds = std::collections::HashMap::new();
        conds.insert("flag".to_string(), "%wanted%".to_string());
        route.conds = Some(conds);
        conf.routes.push(route);

        let mut env = Environments::new();
        env.conds.insert("flag".to_string(), "on".to_string());
        env.subs.insert("wanted".to_string(), serde_json::Value::String("on".to_string()));

        let handlers = registry_with(&["health"]);
        let table = RouteTable::compile("t", &conf, &env, &handlers).unwrap();
        let req = make_request("GET", "h", "http", 80, "/beta");
        assert!(table.resolve(&req).is_some());
    }

    #[test]
    fn bare_route_without_do_falls_back_to_table_default_handler() {
        let mut conf = RouteTableConf {
            match_type: MatchType::Trie,
            is_case_specific: true,
            match_using_query_params: false,
            force_proto: None,
            force_port: None,
            default_handler: Some("fallback".to_string()),
            route_namespace: None,
            default_redirect_code: 302,
            routes: Vec::new(),
        };
        let mut route = bare_route("/gamma#");
        route.do_ = None;
        conf.routes.push(route);

        let env = Environments::new();
        let handlers = registry_with(&["fallback"]);
        let table = RouteTable::compile("t", &conf, &env, &handlers).unwrap();
        let req = make_request("GET", "h", "http", 80, "/gamma");
        let (route, _) = table.resolve(&req).unwrap();
        match &route.kind {
            RouteKind::Handled(h) => assert_eq!(h.action, "fallback"),
            _ => panic!("wrong kind"),
        }
    }

    #[test]
    fn route_with_neither_do_nor_table_default_handler_is_ambiguous() {
        let mut conf = RouteTableConf {
            match_type: MatchType::Trie,
            is_case_specific: true,
            match_using_query_params: false,
            force_proto: None,
            force_port: None,
            default_handler: None,
            route_namespace: None,
            default_redirect_code: 302,
            routes: Vec::new(),
        };
        let mut route = bare_route("/gamma#");
        route.do_ = None;
        conf.routes.push(route);

        let env = Environments::new();
        let handlers = HandlerRegistry::new();
        assert!(matches!(
            RouteTable::compile("t", &conf, &env, &handlers),
            Err(ConfigError::AmbiguousRouteKind)
        ));
    }

    #[test]
    fn unknown_handler_name_is_a_build_time_error() {
        let mut conf = RouteTableConf {
            match_type: MatchType::Trie,
            is_case_specific: true,
            match_using_query_params: false,
            force_proto: None,
            force_port: None,
            default_handler: None,
            route_namespace: None,
            default_redirect_code: 302,
            routes: Vec::new(),
        };
        conf.routes.push(bare_route("/beta#"));

        let env = Environments::new();
        let handlers = HandlerRegistry::new();
        assert!(matches!(
            RouteTable::compile("t", &conf, &env, &handlers),
            Err(ConfigError::UnknownHandler(_))
        ));
    }

    #[test]
    fn regex_table_resolves_in_declaration_order() {
        let conf = RouteTableConf {
            match_type: MatchType::Regex,
            is_case_specific: true,
            match_using_query_params: false,
            force_proto: None,
            force_port: None,
            default_handler: None,
            route_namespace: None,
            default_redirect_code: 302,
            routes: vec![
                {
                    let mut r = bare_route(r"^/users/(\d+)$");
                    r.do_ = Some("user".to_string());
                    r
                },
                {
                    let mut r = bare_route(r"^/users/.*$");
                    r.do_ = Some("catchall".to_string());
                    r
                },
            ],
        };
        let env = Environments::new();
        let handlers = registry_with(&["user", "catchall"]);
        let table = RouteTable::compile("t", &conf, &env, &handlers).unwrap();
        let req = make_request("GET", "h", "http", 80, "/users/42");
        let (route, args) = table.resolve(&req).unwrap();
        match &route.kind {
            RouteKind::Handled(h) => assert_eq!(h.action, "user"),
            _ => panic!("wrong kind"),
        }
        assert_eq!(args.numbered[1], "42");
    }
}
