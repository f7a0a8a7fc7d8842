//! The in-flight request context: normalized URL parts, an ingested body,
//! and the response-producing operations a route handler drives
//! (spec.md §3 `Request`, §4.1 normalization and body ingestion, §6
//! response helpers).

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use junction_core::{AnyError, HttpError};

/// Cap on the body this pipeline will buffer in memory before rejecting the
/// request outright (spec.md §4.1 "200 KiB").
pub const MAX_BODY_BYTES: usize = 200 * 1024;

#[derive(Debug, Clone)]
pub enum ParsedBody {
    None,
    Json(Value),
    Form(HashMap<String, String>),
    Raw(Bytes),
}

/// The outcome a route-handler or the routing loop settles a request with.
/// `finish` is the single choke point every response path funnels through,
/// matching spec.md §6's "`onSent` fires exactly once" contract.
#[derive(Debug, Clone)]
pub enum Outcome {
    Sent { status: u16, headers: HashMap<String, String>, body: Bytes },
    Redirect { status: u16, location: String, headers: HashMap<String, String> },
    Rewritten { path: String },
    Error(HttpErrorPayload),
}

#[derive(Debug, Clone)]
pub struct HttpErrorPayload {
    pub code: u16,
    pub message: String,
}

impl From<HttpError> for HttpErrorPayload {
    fn from(e: HttpError) -> Self {
        HttpErrorPayload { code: e.code(), message: e.message().to_string() }
    }
}

/// One request as it flows through the routing pipeline.
#[derive(Clone)]
pub struct Request {
    pub method: String,
    pub hostname: String,
    pub scheme: String,
    pub port: u16,
    pub path: String,
    pub query: HashMap<String, String>,
    /// The raw, still-encoded query string (no leading `?`), kept verbatim
    /// for `matchUsingQueryParams` trie keying and `keepParams` redirects
    /// (spec.md §9 "matchUsingQueryParams keying").
    pub raw_query: String,
    pub headers: HashMap<String, String>,
    pub remote_addr: String,
    pub body: ParsedBody,

    /// Incremented each time a `rewrite` action re-enters the routing loop;
    /// bounded by the host's `retryLimit` (spec.md §4.1 "bounded rewrite
    /// recursion").
    pub route_pass: u32,

    /// The resolved host's response/redirect header overlays, set once by
    /// the engine right after host lookup; `send`/`redirect` merge these
    /// under any per-call headers (spec.md §4.7 `send`/`redirect`).
    pub host_headers: HashMap<String, String>,
    pub host_redirect_headers: HashMap<String, String>,

    /// Invoked exactly once, after the response is finalized, regardless
    /// of which terminal action produced it (spec.md §4.7 "`onSent` ...
    /// exactly once").
    on_sent: Option<Arc<dyn Fn(&Request) + Send + Sync>>,

    sent: bool,
    outcome: Option<Outcome>,
}

impl Request {
    pub fn new(method: impl Into<String>, hostname: impl Into<String>, scheme: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Request {
            method: method.into(),
            hostname: hostname.into(),
            scheme: scheme.into(),
            port,
            path: path.into(),
            query: HashMap::new(),
            raw_query: String::new(),
            headers: HashMap::new(),
            remote_addr: String::new(),
            body: ParsedBody::None,
            route_pass: 0,
            host_headers: HashMap::new(),
            host_redirect_headers: HashMap::new(),
            on_sent: None,
            sent: false,
            outcome: None,
        }
    }

    /// Registers the hook the engine invokes, exactly once, after this
    /// request's response is finalized (spec.md §4.7).
    pub fn set_on_sent(&mut self, hook: Arc<dyn Fn(&Request) + Send + Sync>) {
        self.on_sent = Some(hook);
    }

    pub fn has_sent(&self) -> bool {
        self.sent
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// The single choke point every terminal response path funnels
    /// through; fires `on_sent` exactly once, after the outcome is
    /// recorded (spec.md §4.7 "invokes the optional `onSent` hook once").
    fn finish(&mut self, outcome: Outcome) -> Result<(), AnyError> {
        if self.sent {
            return Err(anyhow::anyhow!("response already sent for this request"));
        }
        self.sent = true;
        self.outcome = Some(outcome);
        if let Some(hook) = self.on_sent.clone() {
            hook(self);
        }
        Ok(())
    }

    /// Merge this request's resolved-host response headers under any
    /// per-call `extra` headers (spec.md §4.7 `send`: "merge response
    /// headers from `hostConfig.headers` and per-request `headers`").
    fn merged_response_headers(&self, extra: HashMap<String, String>) -> HashMap<String, String> {
        let mut merged = self.host_headers.clone();
        merged.extend(extra);
        merged
    }

    fn merged_redirect_headers(&self, extra: HashMap<String, String>) -> HashMap<String, String> {
        let mut merged = self.host_redirect_headers.clone();
        merged.extend(extra);
        merged
    }

    pub fn send(&mut self, status: u16, body: impl Into<Bytes>) -> Result<(), AnyError> {
        self.send_with_headers(status, HashMap::new(), body)
    }

    /// Like [`Request::send`], but with response headers attached — used
    /// by handlers (e.g. the proxy handler) that need to relay an
    /// upstream's headers back to the client.
    pub fn send_with_headers(
        &mut self,
        status: u16,
        headers: HashMap<String, String>,
        body: impl Into<Bytes>,
    ) -> Result<(), AnyError> {
        let headers = self.merged_response_headers(headers);
        self.finish(Outcome::Sent { status, headers, body: body.into() })
    }

    pub fn end(&mut self, status: u16) -> Result<(), AnyError> {
        // spec.md §4.7: "if 310 <= code < 600, convert to error(code)".
        if (310..600).contains(&status) {
            return self.error(HttpError::from_code(status));
        }
        self.send(status, Bytes::new())
    }

    pub fn json(&mut self, status: u16, value: &Value) -> Result<(), AnyError> {
        let body = serde_json::to_vec(value)?;
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        self.send_with_headers(status, headers, Bytes::from(body))
    }

    /// Wraps `value` in `callback(...)` iff `queryParams[callback]` is a
    /// non-empty string (spec.md §4.7 `jsonp`); otherwise behaves exactly
    /// like [`Request::json`].
    pub fn jsonp(&mut self, status: u16, value: &Value) -> Result<(), AnyError> {
        let payload = serde_json::to_string(value)?;
        match self.query.get("callback").filter(|c| !c.is_empty()) {
            Some(callback) => {
                let body = format!("{}({});", callback, payload);
                let mut headers = HashMap::new();
                headers.insert("content-type".to_string(), "application/javascript".to_string());
                headers.insert("x-content-type-options".to_string(), "nosniff".to_string());
                self.send_with_headers(status, headers, Bytes::from(body))
            }
            None => self.json(status, value),
        }
    }

    pub fn error(&mut self, err: HttpError) -> Result<(), AnyError> {
        self.finish(Outcome::Error(err.into()))
    }

    pub fn redirect(&mut self, status: u16, location: impl Into<String>) -> Result<(), AnyError> {
        // spec.md §4.7 `redirect`: "validate code in [300,310] (default from
        // settings)".
        let status = if (300..=310).contains(&status) { status } else { 302 };
        let headers = self.merged_redirect_headers(HashMap::new());
        self.finish(Outcome::Redirect { status, location: location.into(), headers })
    }

    /// Re-enter the routing loop against a new path, bumping `route_pass`.
    /// Unlike every other response path this does not set `sent` — a
    /// rewrite is an internal loop continuation, not the one outward
    /// response `onSent` fires for (spec.md §4.1 "bounded rewrite
    /// recursion"). Callers are responsible for checking `route_pass`
    /// against the host's `retryLimit` before calling this.
    pub fn rewrite_to(&mut self, path: impl Into<String>) {
        self.route_pass += 1;
        self.path = path.into();
        self.outcome = Some(Outcome::Rewritten { path: self.path.clone() });
    }
}

/// `A-Za-z0-9-._~` — the only escapes `normalize_and_reduce` collapses to
/// their literal byte; every other escape (including `%2F`) keeps the path
/// separator/reserved character encoded so a segment can't be merged by a
/// decode (spec.md §4.8, §8 "only the unreserved set decodes").
fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

/// Percent-decode and reduce a raw path per spec.md §4.1:
/// - bare, unescaped `%` not followed by two hex digits is rejected,
/// - a decoded CR or LF byte is rejected (header/response-splitting guard),
/// - only unreserved-set escapes decode to their literal byte; every other
///   escape (e.g. `%2F`, `%20`) is re-emitted as `%` plus uppercase hex,
/// - when `remove_double_slashes` is set, runs of `/` collapse to one.
pub fn normalize_and_reduce(raw_path: &str, remove_double_slashes: bool) -> Result<String, AnyError> {
    let bytes = raw_path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3);
            let decoded = hex.and_then(|h| {
                std::str::from_utf8(h).ok().and_then(|s| u8::from_str_radix(s, 16).ok())
            });
            match decoded {
                Some(byte) => {
                    if byte == b'\r' || byte == b'\n' {
                        return Err(anyhow::anyhow!("decoded control byte in path"));
                    }
                    if is_unreserved(byte) {
                        out.push(byte);
                    } else {
                        out.push(b'%');
                        out.extend_from_slice(format!("{:02X}", byte).as_bytes());
                    }
                    i += 3;
                }
                None => return Err(anyhow::anyhow!("invalid percent-encoding in path")),
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    let decoded = String::from_utf8(out).map_err(|_| anyhow::anyhow!("path is not valid utf-8 after decoding"))?;

    if decoded.contains('\r') || decoded.contains('\n') {
        return Err(anyhow::anyhow!("raw control byte in path"));
    }

    if remove_double_slashes {
        Ok(collapse_double_slashes(&decoded))
    } else {
        Ok(decoded)
    }
}

/// Collapse runs of `/` in `path` to a single `/` (spec.md §4.8, §9
/// "double-slash collapse"). Used both by [`normalize_and_reduce`] and by
/// the engine's in-rewrite collapse-without-redirect path.
pub fn collapse_double_slashes(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        collapsed.push(c);
    }
    collapsed
}

/// Whether [`ingest_body`] should even be attempted: only for a write
/// method, and only when the request declares both `Content-Type` and
/// `Content-Length` (spec.md §4.9 "triggered only when `isWriteMethod`
/// and both headers are present"). `headers` is expected lower-cased, as
/// the request pipeline stores it.
pub fn should_ingest_body(method: &str, headers: &HashMap<String, String>) -> bool {
    junction_core::util::is_write_method(method)
        && headers.contains_key("content-type")
        && headers.contains_key("content-length")
}

/// Parse a request body according to its declared content-type, enforcing
/// [`MAX_BODY_BYTES`] (spec.md §4.1). Callers gate this with
/// [`should_ingest_body`]; this function itself does not re-check the
/// method or header presence.
pub fn ingest_body(content_type: Option<&str>, raw: &[u8]) -> Result<ParsedBody, AnyError> {
    if raw.len() > MAX_BODY_BYTES {
        return Err(anyhow::anyhow!("request body exceeds {} bytes", MAX_BODY_BYTES));
    }
    if raw.is_empty() {
        return Ok(ParsedBody::None);
    }

    match content_type.map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase()) {
        Some(ref ct) if ct == "application/json" => {
            let value: Value = serde_json::from_slice(raw)?;
            Ok(ParsedBody::Json(value))
        }
        Some(ref ct) if ct == "application/x-www-form-urlencoded" => {
            let mut map = HashMap::new();
            for pair in raw.split(|b| *b == b'&') {
                if pair.is_empty() {
                    continue;
                }
                let s = String::from_utf8_lossy(pair);
                let (k, v) = s.split_once('=').unwrap_or((&s, ""));
                map.insert(url_decode_form(k), url_decode_form(v));
            }
            Ok(ParsedBody::Form(map))
        }
        _ => Ok(ParsedBody::Raw(Bytes::copy_from_slice(raw))),
    }
}

fn url_decode_form(s: &str) -> String {
    let replaced = s.replace('+', " ");
    let bytes = replaced.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(h) = bytes.get(i + 1..i + 3) {
                if let Ok(b) = std::str::from_utf8(h).ok().and_then(|s| u8::from_str_radix(s, 16).ok()).ok_or(()) {
                    out.push(b);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Request;

    pub fn make_request(method: &str, hostname: &str, scheme: &str, port: u16, path: &str) -> Request {
        Request::new(method, hostname, scheme, port, path)
    }
}
