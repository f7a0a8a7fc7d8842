//! Method/hostname validation, `%name%` substitution, header merging and
//! port extraction — the small, pure helpers the config builder and the
//! request pipeline both lean on (spec.md §4.1).

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

pub mod uri_serde;

use std::sync::OnceLock;

static HOSTNAME_RE: OnceLock<Regex> = OnceLock::new();

/// `^[A-Za-z0-9_\-]+(\.[A-Za-z0-9_\-]+)*$`
pub fn is_hostname_valid(s: &str) -> bool {
    HOSTNAME_RE
        .get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9_\-]+(\.[A-Za-z0-9_\-]+)*$").expect("static regex compiles")
        })
        .is_match(s)
}

/// The closed set of HTTP methods this router understands.
const VALID_METHODS: &[&str] = &[
    "GET",
    "HEAD",
    "POST",
    "PUT",
    "DELETE",
    "CONNECT",
    "OPTIONS",
    "TRACE",
    "PATCH",
    "LOCK",
    "MERGE",
    "MKACTIVITY",
    "MKCOL",
    "MOVE",
    "PROPFIND",
    "PROPPATCH",
    "PURGE",
    "REPORT",
    "SEARCH",
    "SUBSCRIBE",
    "UNLOCK",
    "UNSUBSCRIBE",
];

/// Methods whose semantics are understood to mutate server-side state; a
/// route without an explicit `methodMatch` rejects these unless the route
/// (or table, or host) opts in with `allowWrite`.
const WRITE_METHODS: &[&str] = &[
    "POST",
    "PUT",
    "DELETE",
    "LOCK",
    "MERGE",
    "MKACTIVITY",
    "MKCOL",
    "MOVE",
    "PATCH",
    "PURGE",
    "UNLOCK",
    "UNSUBSCRIBE",
];

pub fn is_method_valid(method: &str) -> bool {
    VALID_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method))
}

pub fn is_write_method(method: &str) -> bool {
    WRITE_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method))
}

/// A substitution value: the `env.subs` map's values are JSON-ish and only
/// string values actually substitute (spec.md §4.1 — "Non-string input
/// passes through").
pub type Subs = HashMap<String, Value>;

/// Replace `%name%` tokens in `s` with `subs[name]` when that entry holds a
/// string. Unknown tokens (no such key, or a non-string value) are left in
/// place. The scan advances past any substituted region so an inserted
/// value can never itself be re-scanned for further `%..%` tokens — this is
/// what keeps a pathological substitution from expanding forever.
///
/// Operates on `str` slices rather than individual bytes so a multi-byte
/// UTF-8 literal passing through untouched is copied whole rather than
/// reinterpreted byte-by-byte.
pub fn substitute(s: &str, subs: &Subs) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];
        match after.find('%') {
            Some(rel_end) => {
                let name = &after[..rel_end];
                match subs.get(name).and_then(Value::as_str) {
                    Some(value) => {
                        out.push_str(value);
                        // Skip past the substituted region so the inserted
                        // value's own bytes can't be mistaken for further
                        // %name% tokens.
                        rest = &after[rel_end + 1..];
                    }
                    None => {
                        // Unknown token: keep the literal `%name%` and only
                        // advance past the opening `%`, so a `%` that is
                        // immediately followed by another `%foo%` pair is
                        // still considered.
                        out.push('%');
                        rest = after;
                    }
                }
            }
            None => {
                // Unterminated `%`: copy verbatim, nothing left to match.
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Lower-case every key from `base`, then overlay `extra` (lower-cased)
/// on top. Returns `Err` if any `extra` value is neither a string nor a
/// number (spec.md §4.1: "Non-string (and non-numeric in extra) header
/// values fail the build").
pub fn merge_headers(
    base: Option<&HashMap<String, Value>>,
    extra: Option<&HashMap<String, Value>>,
) -> Result<HashMap<String, String>, String> {
    let mut merged = HashMap::new();
    if let Some(base) = base {
        for (k, v) in base {
            if let Some(s) = value_to_header_string(v) {
                merged.insert(k.to_ascii_lowercase(), s);
            }
        }
    }
    if let Some(extra) = extra {
        for (k, v) in extra {
            match value_to_header_string(v) {
                Some(s) => {
                    merged.insert(k.to_ascii_lowercase(), s);
                }
                None => return Err(k.clone()),
            }
        }
    }
    Ok(merged)
}

fn value_to_header_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Split a `Host:` header value into `(hostname, port)`. `host` may or may
/// not carry a `:port` suffix; when absent, `default_port` is returned.
pub fn split_host_port(host: &str, default_port: u16) -> (&str, u16) {
    match host.rsplit_once(':') {
        Some((h, p)) => match p.parse::<u16>() {
            Ok(port) => (h, port),
            Err(_) => (host, default_port),
        },
        None => (host, default_port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_validation() {
        assert!(is_hostname_valid("example.com"));
        assert!(is_hostname_valid("a-b_c.example"));
        assert!(!is_hostname_valid("exa mple.com"));
        assert!(!is_hostname_valid(""));
        assert!(!is_hostname_valid(".example.com"));
    }

    #[test]
    fn write_methods_are_closed() {
        assert!(is_write_method("POST"));
        assert!(is_write_method("PATCH"));
        assert!(!is_write_method("GET"));
        assert!(!is_write_method("HEAD"));
    }

    #[test]
    fn substitute_replaces_known_tokens() {
        let mut subs = Subs::new();
        subs.insert("name".into(), Value::String("world".into()));
        assert_eq!(substitute("hello %name%!", &subs), "hello world!");
    }

    #[test]
    fn substitute_leaves_unknown_tokens_alone() {
        let subs = Subs::new();
        assert_eq!(substitute("hello %name%!", &subs), "hello %name%!");
    }

    #[test]
    fn substitute_is_fixed_point_without_matching_keys() {
        let subs = Subs::new();
        let s = "no tokens here";
        assert_eq!(substitute(s, &subs), s);
    }

    #[test]
    fn substitute_preserves_multi_byte_utf8_around_tokens() {
        let mut subs = Subs::new();
        subs.insert("city".into(), Value::String("世界".into()));
        assert_eq!(substitute("héllo %city% → 東京", &subs), "héllo 世界 → 東京");
    }

    #[test]
    fn substitute_does_not_rescan_inserted_text() {
        let mut subs = Subs::new();
        subs.insert("a".into(), Value::String("%b%".into()));
        subs.insert("b".into(), Value::String("OOPS".into()));
        // The inserted "%b%" from substituting %a% must not itself expand.
        assert_eq!(substitute("%a%", &subs), "%b%");
    }

    #[test]
    fn merge_headers_lowercases_and_prefers_extra() {
        let mut base = HashMap::new();
        base.insert("X-Foo".to_string(), Value::String("base".into()));
        base.insert("X-Bar".to_string(), Value::String("keep".into()));
        let mut extra = HashMap::new();
        extra.insert("X-Foo".to_string(), Value::String("override".into()));
        let merged = merge_headers(Some(&base), Some(&extra)).unwrap();
        assert_eq!(merged.get("x-foo").unwrap(), "override");
        assert_eq!(merged.get("x-bar").unwrap(), "keep");
    }

    #[test]
    fn merge_headers_rejects_non_scalar_extra_values() {
        let mut extra = HashMap::new();
        extra.insert("x-foo".to_string(), Value::Array(vec![]));
        assert!(merge_headers(None, Some(&extra)).is_err());
    }

    #[test]
    fn split_host_port_handles_missing_port() {
        assert_eq!(split_host_port("example.com", 80), ("example.com", 80));
        assert_eq!(split_host_port("example.com:8443", 80), ("example.com", 8443));
    }
}
