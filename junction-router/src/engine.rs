//! The live routing engine: an atomically swappable [`HostTable`] plus the
//! bounded-rewrite-recursion request loop that drives it (spec.md §4
//! "reconfiguration", §4.1 "routing loop").
//!
//! monolake's own reconfiguration story runs through its thread-per-core
//! orchestrator (`monolake-core::orchestrator`), which restarts whole
//! worker services on a config change — appropriate for a full standalone
//! server but out of proportion for a library whose embedding host already
//! owns the accept loop and connection lifecycle. `arc_swap::ArcSwap`
//! gives the same "readers never observe a half-built table" guarantee at
//! a fraction of the machinery, so this is the one addition to the
//! teacher's dependency stack (see DESIGN.md).

use std::sync::Arc;

use arc_swap::ArcSwap;

use junction_core::config::HostConf;
use junction_core::environments::Environments;
use junction_core::{AnyError, ConfigError, HttpError};

use crate::geo_redirect;
use crate::handlers::HandlerRegistry;
use crate::host_table::HostTable;
use crate::request::{collapse_double_slashes, Request};
use crate::route::RouteKind;

/// Invoked, exactly once per request, after the response is finalized
/// (spec.md §6 `envConf.onSent`).
pub type OnSentHook = Arc<dyn Fn(&Request) + Send + Sync>;

pub struct Engine {
    table: ArcSwap<HostTable>,
    handlers: HandlerRegistry,
    on_sent: Option<OnSentHook>,
}

impl Engine {
    pub fn new(conf: &HostConf, env: &Environments, handlers: HandlerRegistry) -> Result<Self, ConfigError> {
        let table = HostTable::compile(conf, env, &handlers)?;
        Ok(Engine { table: ArcSwap::from_pointee(table), handlers, on_sent: None })
    }

    /// Attach the `envConf.onSent` hook every request's response funnels
    /// through exactly once (spec.md §6).
    pub fn with_on_sent(mut self, hook: OnSentHook) -> Self {
        self.on_sent = Some(hook);
        self
    }

    /// Compile `conf` against `env` off to the side; only swap the live
    /// table in if compilation succeeds, leaving the previous
    /// configuration serving traffic untouched on failure.
    pub fn reconfigure(&self, conf: &HostConf, env: &Environments) -> Result<(), ConfigError> {
        let table = HostTable::compile(conf, env, &self.handlers)?;
        self.table.store(Arc::new(table));
        tracing::info!("host table reconfigured");
        Ok(())
    }

    /// Route and serve one request end to end: look up the host, walk its
    /// route tables, dispatch rewrite/redirect/handled actions, and bound
    /// `rewrite` recursion by the host's `retryLimit` (spec.md §4.1, §5
    /// "normalize -> (maybe redirect for //) -> (maybe body ingest) ->
    /// routeLoop").
    pub async fn handle_routing(&self, req: &mut Request) -> Result<(), AnyError> {
        if let Some(hook) = &self.on_sent {
            req.set_on_sent(hook.clone());
        }

        let table = self.table.load();

        let config = match table.config_for(&req.hostname) {
            Some(c) => c.clone(),
            None => {
                tracing::warn!(host = %req.hostname, "no host binding matched");
                req.error(HttpError::invalid_host())?;
                return Ok(());
            }
        };
        req.host_headers = config.headers.clone();
        req.host_redirect_headers = config.redirect_headers.clone();

        // Entry-time double-slash collapse: redirect rather than silently
        // rewrite, so the client's address bar reflects the canonical URL
        // (spec.md §4.8). A rewrite re-entering the loop below collapses in
        // place instead (§9).
        if config.remove_double_slashes && req.route_pass == 0 && req.path.contains("//") {
            let collapsed = collapse_double_slashes(&req.path);
            let target = same_origin_url(req, &collapsed);
            req.redirect(config.reduce_redirect_code, target)?;
            return Ok(());
        }

        loop {
            if req.route_pass > config.retry_limit {
                req.error(HttpError::retry_exceeded())?;
                return Ok(());
            }

            let Some((route, args)) = table.resolve(req) else {
                if self.try_default_handler(&table, req).await? {
                    return Ok(());
                }
                req.error(HttpError::not_found())?;
                return Ok(());
            };

            // spec.md §4.6: a route (or its containing table, inherited at
            // compile time into `filters.force_proto`/`force_port`) that
            // disagrees with the request's scheme preempts the route's own
            // action with a 301 back to the same host/path.
            if let Some(proto) = &route.filters.force_proto {
                if proto != &req.scheme {
                    let port = route.filters.force_port.filter(|p| *p != 0);
                    let target = origin_url(proto, &req.hostname, port, &req.path, &req.raw_query);
                    req.redirect(301, target)?;
                    return Ok(());
                }
            }

            match &route.kind {
                RouteKind::Redirect(redirect) => {
                    self.dispatch_redirect(req, redirect, &config)?;
                    return Ok(());
                }
                RouteKind::Rewrite(rewrite) => {
                    if !self.dispatch_rewrite(req, rewrite, &args, &config)? {
                        if self.try_default_handler(&table, req).await? {
                            return Ok(());
                        }
                        req.error(HttpError::not_found())?;
                        return Ok(());
                    }
                    if req.has_sent() {
                        return Ok(());
                    }
                    continue;
                }
                RouteKind::Handled(handled) => {
                    // Handler names are validated against the registry at
                    // `RouteTable`/`HostTable` compile time, so a missing
                    // entry here means the registry the engine was built
                    // with doesn't match the one the config was compiled
                    // against — defense in depth, not the expected path.
                    let Some(handler) = self.handlers.get(&handled.action).cloned() else {
                        tracing::error!(action = %handled.action, "route handler missing from registry at dispatch time");
                        req.error(HttpError::internal(format!("unknown route handler: {:?}", handled.action)))?;
                        return Ok(());
                    };
                    // spec.md §4.4/§7: an exception from the action is
                    // caught, logged, and converted to a 500 — the resolver
                    // itself always produces a response.
                    match handler.handle(req, &route, &args).await {
                        Ok(true) => return Ok(()),
                        Ok(false) => {
                            if self.try_default_handler(&table, req).await? {
                                return Ok(());
                            }
                            req.error(HttpError::not_found())?;
                            return Ok(());
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, action = %handled.action, "route handler failed");
                            req.error(HttpError::internal(e.to_string()))?;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// spec.md §4.5 `handleMatchedRedirect`.
    fn dispatch_redirect(
        &self,
        req: &mut Request,
        redirect: &crate::route::RedirectAction,
        config: &crate::host_table::HostConfig,
    ) -> Result<(), AnyError> {
        if let Some(geo_target) = &redirect.geo_target {
            let page = geo_redirect::render(geo_target, &redirect.redirect);
            let mut headers = std::collections::HashMap::new();
            headers.insert("content-type".to_string(), "text/html; charset=utf-8".to_string());
            return req.send_with_headers(200, headers, bytes::Bytes::from(page));
        }

        let mut location = redirect.redirect.clone();
        if redirect.keep_params && !req.raw_query.is_empty() {
            location.push('?');
            location.push_str(&req.raw_query);
        }
        let code = if redirect.code != 0 { redirect.code } else { config.redirect_code };
        req.redirect(code, location)
    }

    /// spec.md §4.5 `handleMatchedRewrite`. Returns `Ok(true)` iff this
    /// route produced a response or a rewrite ("handled"); `Ok(false)`
    /// means no rewrite was produced and the caller should treat this as a
    /// non-match and fall through.
    fn dispatch_rewrite(
        &self,
        req: &mut Request,
        rewrite: &crate::route::RewriteAction,
        args: &crate::route::MatchArgs,
        config: &crate::host_table::HostConfig,
    ) -> Result<bool, AnyError> {
        if rewrite.status != 0 {
            req.send(rewrite.status, bytes::Bytes::new())?;
            return Ok(true);
        }

        let (rewritten, original) = if rewrite.match_params {
            let full_url = same_origin_url(req, &req.path);
            let rewritten = rewrite.pattern.replace(&full_url, rewrite.replace.as_str()).into_owned();
            (rewritten, full_url)
        } else {
            let tail = args.get(1).unwrap_or(&req.path);
            let mut rewritten = rewrite.pattern.replace(tail, rewrite.replace.as_str()).into_owned();
            // spec.md §9: matchParams=false reattaches any pre-existing
            // query with `&`, not `?` — an intentionally preserved quirk.
            if !req.raw_query.is_empty() {
                rewritten.push('&');
                rewritten.push_str(&req.raw_query);
            }
            (rewritten, req.path.clone())
        };

        if rewritten == original {
            return Ok(false);
        }

        if rewrite.redirect_code != 0 {
            req.redirect(rewrite.redirect_code, rewritten)?;
            return Ok(true);
        }

        if rewrite.match_params {
            // The pattern rewrote a full `scheme://host[:port]/path?query`
            // string. If it points somewhere else entirely, that's an
            // external redirect; otherwise peel the path/query back off and
            // keep recursing in-process (spec.md §4.5 "if the rewritten
            // URL's host/scheme/port differ from the current request,
            // convert to a redirect").
            match parse_rewritten_url(&rewritten) {
                Some((scheme, host, port, path, query)) => {
                    let same_origin = scheme.eq_ignore_ascii_case(&req.scheme)
                        && host.eq_ignore_ascii_case(&req.hostname)
                        && port.unwrap_or(default_port(&scheme)) == req.port;
                    if !same_origin {
                        req.redirect(config.redirect_code, rewritten)?;
                        return Ok(true);
                    }
                    let mut new_path = if config.remove_double_slashes { collapse_double_slashes(&path) } else { path };
                    req.raw_query = query;
                    if new_path.is_empty() {
                        new_path.push('/');
                    }
                    req.rewrite_to(new_path);
                }
                None => {
                    let collapsed = if config.remove_double_slashes { collapse_double_slashes(&rewritten) } else { rewritten };
                    req.rewrite_to(collapsed);
                }
            }
        } else {
            let collapsed = if config.remove_double_slashes { collapse_double_slashes(&rewritten) } else { rewritten };
            req.rewrite_to(collapsed);
        }

        // `isLast` only matters in resolvers that can hold more than one
        // rule reachable from the same lookup; this table's trie/regex
        // resolver already commits to a single winning route per lookup
        // (spec.md §4.2/§4.4), so there's no "next rule" left to skip. The
        // rewritten path always re-enters the bounded routing loop so the
        // request ends in a real response (see DESIGN.md).
        let _ = rewrite.is_last;
        Ok(true)
    }

    /// Fall back to a table's `default_handler`, if one is declared,
    /// synthesizing a minimal route/match-args pair since no real route
    /// matched (spec.md §3 `RouteTableConf.defaultHandler`).
    async fn try_default_handler(&self, table: &HostTable, req: &mut Request) -> Result<bool, AnyError> {
        use crate::route::{CompiledRoute, HandledAction, MatchArgs, RuntimeFilters};

        let Some(name) = table.default_handler_for(&req.hostname) else {
            return Ok(false);
        };
        let Some(handler) = self.handlers.get(&name).cloned() else {
            return Ok(false);
        };
        let route = CompiledRoute {
            on: req.path.clone(),
            filters: RuntimeFilters::default(),
            kind: RouteKind::Handled(HandledAction { action: name.clone(), options: None }),
        };
        let args = MatchArgs::default();
        match handler.handle(req, &route, &args).await {
            Ok(handled) => Ok(handled),
            Err(e) => {
                tracing::warn!(error = %e, action = %name, "default route handler failed");
                req.error(HttpError::internal(e.to_string()))?;
                Ok(true)
            }
        }
    }
}

fn default_port(scheme: &str) -> u16 {
    if scheme.eq_ignore_ascii_case("https") {
        443
    } else {
        80
    }
}

/// Render `scheme://host[:port]path[?query]`, omitting the port when it's
/// the scheme's default (spec.md §4.6 force-proto redirect target).
fn origin_url(scheme: &str, hostname: &str, port: Option<u16>, path: &str, raw_query: &str) -> String {
    let mut out = format!("{}://{}", scheme, hostname);
    if let Some(p) = port {
        if p != default_port(scheme) {
            out.push(':');
            out.push_str(&p.to_string());
        }
    }
    out.push_str(path);
    if !raw_query.is_empty() {
        out.push('?');
        out.push_str(raw_query);
    }
    out
}

fn same_origin_url(req: &Request, path: &str) -> String {
    origin_url(&req.scheme, &req.hostname, Some(req.port), path, &req.raw_query)
}

/// Parse a rewritten `matchParams=true` target as an absolute URL, returning
/// `(scheme, host, port, path, query)`. `None` means `rewritten` isn't an
/// absolute URL (no scheme/authority), in which case the caller treats it
/// as a bare path.
fn parse_rewritten_url(rewritten: &str) -> Option<(String, String, Option<u16>, String, String)> {
    let uri: http::Uri = rewritten.parse().ok()?;
    let scheme = uri.scheme_str()?.to_string();
    let authority = uri.authority()?;
    let host = authority.host().to_string();
    let port = authority.port_u16();
    let path = uri.path().to_string();
    let query = uri.query().unwrap_or("").to_string();
    Some((scheme, host, port, path, query))
}
