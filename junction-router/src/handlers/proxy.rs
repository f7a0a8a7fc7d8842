//! The built-in reverse-proxy handler: dials an upstream resolved from the
//! route's `options`, forwards the inbound request with `X-Forwarded-*`
//! headers attached, and relays the response back (spec.md §4.5 "proxy
//! action", grounded on monolake's `ProxyHandler`/`add_xff_header`).

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method, Request as HttpRequest, Uri};
use monoio_http::common::body::HttpBody;
use monoio_transports::connectors::{Connector, TcpConnector};
use monoio_transports::http::HttpConnector;
use monoio_transports::pooled::connector::PooledConnector;
use serde_json::Value;

use junction_core::{AnyError, HttpError};

use crate::handlers::RouteHandler;
use crate::request::Request;
use crate::route::{CompiledRoute, MatchArgs, RouteKind};

type PoolHttpConnector = HttpConnector<PooledConnector<TcpConnector, monoio_transports::key::Key, monoio::net::TcpStream, ()>>;

/// `options` fields a `do = "proxy"` route supplies (spec.md §4.5):
/// destination hostname/proto/port, and optional path rewriting.
struct ProxyTarget {
    hostname: String,
    proto: String,
    port: u16,
    path: Option<String>,
    path_match: Option<regex::Regex>,
    path_replace: Option<String>,
    query: bool,
    timeout_ms: u64,
}

fn str_field(options: &Value, key: &str) -> Option<String> {
    options.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_target(options: Option<&Value>) -> Result<ProxyTarget, AnyError> {
    let options = options.ok_or_else(|| anyhow::anyhow!("proxy route missing options"))?;
    let hostname = str_field(options, "hostname")
        .ok_or_else(|| anyhow::anyhow!("proxy options missing `hostname`"))?;
    let proto = str_field(options, "proto").unwrap_or_else(|| "http".to_string());
    let port = options
        .get("port")
        .and_then(Value::as_u64)
        .map(|p| p as u16)
        .unwrap_or(if proto == "https" { 443 } else { 80 });
    let path = str_field(options, "path");
    let path_match = str_field(options, "pathMatch")
        .map(|p| regex::Regex::new(&p))
        .transpose()?;
    let path_replace = str_field(options, "pathReplace");
    let query = options.get("query").and_then(Value::as_bool).unwrap_or(true);
    let timeout_ms = options.get("timeout").and_then(Value::as_u64).unwrap_or(20_000);

    Ok(ProxyTarget { hostname, proto, port, path, path_match, path_replace, query, timeout_ms })
}

fn destination_path(target: &ProxyTarget, req: &Request, args: &MatchArgs) -> String {
    if let (Some(re), Some(replace)) = (&target.path_match, &target.path_replace) {
        let tail = args.get(1).unwrap_or("");
        return re.replace(tail, replace.as_str()).into_owned();
    }
    if let Some(path) = &target.path {
        return path.clone();
    }
    req.path.clone()
}

fn build_uri(target: &ProxyTarget, req: &Request, args: &MatchArgs) -> Result<Uri, AnyError> {
    let path = destination_path(target, req, args);
    let mut uri = format!("{}://{}:{}{}", target.proto, target.hostname, target.port, path);
    if target.query && !req.query.is_empty() {
        let qs = req
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        uri.push('?');
        uri.push_str(&qs);
    }
    Ok(uri.parse()?)
}

/// spec.md §4.7: "mutate X-Forwarded-For by appending the local address (or
/// set to req.ip if absent)" — append to whatever the client already sent,
/// don't clobber a chain of upstream proxies.
fn add_xff_headers(headers: &mut http::HeaderMap, req: &Request) {
    let xff = match req.headers.get("x-forwarded-for") {
        Some(existing) if !existing.is_empty() => format!("{}, {}", existing, req.remote_addr),
        _ => req.remote_addr.clone(),
    };
    if let Ok(value) = HeaderValue::from_str(&xff) {
        headers.insert(HeaderName::from_static("x-forwarded-for"), value);
    }
    if let Ok(value) = HeaderValue::from_str(&req.scheme) {
        headers.insert(HeaderName::from_static("x-forwarded-proto"), value);
    }
    if let Ok(value) = HeaderValue::from_str(&req.hostname) {
        headers.insert(HeaderName::from_static("x-forwarded-host"), value);
    }
}

/// Dials an upstream connection per request via a pooled HTTP/1.1
/// connector; no TLS upstream support here (mirrors the teacher's
/// `tls`-feature-gated split, left for a future `tls` feature on this
/// handler).
#[derive(Clone, Default)]
pub struct ProxyHandler {
    connector: PoolHttpConnector,
}

impl ProxyHandler {
    pub fn new(connector: PoolHttpConnector) -> Self {
        ProxyHandler { connector }
    }
}

impl RouteHandler for ProxyHandler {
    async fn handle(
        &self,
        req: &mut Request,
        route: &CompiledRoute,
        args: &MatchArgs,
    ) -> Result<bool, AnyError> {
        let options = match &route.kind {
            RouteKind::Handled(h) => h.options.as_ref(),
            _ => None,
        };
        // spec.md §4.7: a missing/invalid proxy target is an upstream
        // configuration problem, not an unhandled error — it becomes a 502
        // like any other failure to reach the upstream.
        let target = match parse_target(options) {
            Ok(t) => t,
            Err(e) => {
                req.error(HttpError::proxy_upstream(e.to_string()))?;
                return Ok(true);
            }
        };
        let uri = match build_uri(&target, req, args) {
            Ok(u) => u,
            Err(e) => {
                req.error(HttpError::proxy_upstream(e.to_string()))?;
                return Ok(true);
            }
        };

        let method = Method::from_bytes(req.method.as_bytes()).unwrap_or(Method::GET);
        let mut builder = HttpRequest::builder().method(method).uri(uri.clone());
        for (k, v) in &req.headers {
            if let (Ok(name), Ok(value)) = (HeaderName::try_from(k.as_str()), HeaderValue::from_str(v)) {
                builder = builder.header(name, value);
            }
        }
        let mut outbound = builder.body(HttpBody::fixed_body(Some(Bytes::new())))?;
        add_xff_headers(outbound.headers_mut(), req);

        let key = match uri.clone().try_into() {
            Ok(key) => key,
            Err(_) => {
                req.error(HttpError::bad_request("invalid proxy upstream uri"))?;
                return Ok(true);
            }
        };

        let timeout = Duration::from_millis(target.timeout_ms);
        let connect = monoio::time::timeout(timeout, self.connector.connect(key)).await;
        let mut conn = match connect {
            Ok(Ok(conn)) => conn,
            Ok(Err(_)) | Err(_) => {
                req.error(HttpError::proxy_upstream("upstream connect failed"))?;
                return Ok(true);
            }
        };

        let (result, _) = conn.send_request(outbound).await;
        match result {
            Ok(resp) => {
                let status = resp.status().as_u16();
                let mut headers = std::collections::HashMap::new();
                for (k, v) in resp.headers() {
                    if let Ok(s) = v.to_str() {
                        headers.insert(k.as_str().to_ascii_lowercase(), s.to_string());
                    }
                }
                // A 3xx from upstream points at the upstream's own host;
                // rewrite it back through this server so the client never
                // sees the proxied destination directly.
                if (300..400).contains(&status) {
                    if let Some(location) = headers.get("location").cloned() {
                        if let Ok(parsed) = location.parse::<Uri>() {
                            let rewritten = format!("{}://{}{}", req.scheme, req.hostname, parsed.path());
                            headers.insert("location".to_string(), rewritten);
                        }
                    }
                }
                let body = match resp.into_body().bytes().await {
                    Ok(b) => b,
                    Err(_) => Bytes::new(),
                };
                req.send_with_headers(status, headers, body)?;
                Ok(true)
            }
            Err(_) => {
                req.error(HttpError::proxy_upstream("upstream request failed"))?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::test_support::make_request;

    #[monoio::test]
    async fn missing_hostname_option_becomes_a_502_not_an_error() {
        let handler = ProxyHandler::default();
        let route = CompiledRoute {
            on: "/proxy".to_string(),
            filters: crate::route::RuntimeFilters::default(),
            kind: RouteKind::Handled(crate::route::HandledAction {
                action: "proxy".to_string(),
                options: Some(serde_json::json!({})),
            }),
        };
        let args = MatchArgs::default();
        let mut req = make_request("GET", "example.com", "http", 80, "/proxy");
        let handled = RouteHandler::handle(&handler, &mut req, &route, &args).await.unwrap();
        assert!(handled);
        match req.outcome() {
            Some(crate::request::Outcome::Error(e)) => assert_eq!(e.code, 502),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn destination_path_prefers_path_replace_over_literal_path() {
        let target = ProxyTarget {
            hostname: "upstream.internal".to_string(),
            proto: "http".to_string(),
            port: 80,
            path: Some("/ignored".to_string()),
            path_match: Some(regex::Regex::new("^/users").unwrap()),
            path_replace: Some("/accounts".to_string()),
            query: true,
            timeout_ms: 1000,
        };
        let req = make_request("GET", "example.com", "http", 80, "/api/users");
        let args = MatchArgs { numbered: vec!["/api".to_string(), "/users".to_string()], key: String::new() };
        assert_eq!(destination_path(&target, &req, &args), "/accounts");
    }

    #[test]
    fn xff_header_appends_rather_than_overwrites() {
        let mut req = make_request("GET", "example.com", "http", 80, "/x");
        req.remote_addr = "10.0.0.2".to_string();
        req.headers.insert("x-forwarded-for".to_string(), "203.0.113.1".to_string());
        let mut headers = http::HeaderMap::new();
        add_xff_headers(&mut headers, &req);
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "203.0.113.1, 10.0.0.2");
    }

    #[test]
    fn xff_header_defaults_to_remote_addr_when_absent() {
        let mut req = make_request("GET", "example.com", "http", 80, "/x");
        req.remote_addr = "10.0.0.2".to_string();
        let mut headers = http::HeaderMap::new();
        add_xff_headers(&mut headers, &req);
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.2");
    }

    #[test]
    fn build_uri_includes_query_string() {
        let target = ProxyTarget {
            hostname: "upstream.internal".to_string(),
            proto: "http".to_string(),
            port: 8080,
            path: Some("/x".to_string()),
            path_match: None,
            path_replace: None,
            query: true,
            timeout_ms: 1000,
        };
        let mut req = make_request("GET", "example.com", "http", 80, "/x");
        req.query.insert("a".to_string(), "1".to_string());
        let args = MatchArgs::default();
        let uri = build_uri(&target, &req, &args).unwrap();
        assert_eq!(uri.host().unwrap(), "upstream.internal");
        assert_eq!(uri.port_u16().unwrap(), 8080);
        assert!(uri.query().unwrap().contains("a=1"));
    }
}
