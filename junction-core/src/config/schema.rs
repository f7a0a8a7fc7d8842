//! The declarative configuration schema from spec.md §6: `envConf`,
//! `hostConf`, route tables, and routes. These structs are the serde
//! surface a TOML (or JSON) document deserializes into; the router crate
//! compiles them into the immutable runtime graph.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::environments::Environments;

fn default_true() -> bool {
    true
}

fn default_retry_limit() -> u32 {
    20
}

fn default_timeout() -> u64 {
    20_000
}

fn default_redirect_code() -> u16 {
    302
}

fn default_reduce_redirect_code() -> u16 {
    301
}

/// Top-level environment configuration: build-time conditionals and
/// substitutions, plus the per-port scheme-recovery table used when the
/// engine sits behind a TLS- or protocol-terminating proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvConf {
    #[serde(default)]
    pub env: Environments,
    #[serde(default)]
    pub ports: HashMap<u16, PortOverride>,
}

/// Recovers the scheme/version/port an inbound connection was originally
/// addressed with, for deployments terminated behind a reverse proxy that
/// rewrites those on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortOverride {
    pub orig_proto: String,
    pub orig_proto_ver: Option<String>,
    pub orig_port: Option<u16>,
}

/// `hostConf`: defaults, the host-to-route-table bindings, and the named
/// route tables those hosts reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConf {
    #[serde(default)]
    pub defaults: HostDefaults,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
    #[serde(default)]
    pub route_tables: HashMap<String, RouteTableConf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDefaults {
    #[serde(default)]
    pub allow_write: bool,
    #[serde(default)]
    pub normalize_urls: bool,
    #[serde(default = "default_redirect_code")]
    pub redirect_code: u16,
    #[serde(default = "default_reduce_redirect_code")]
    pub reduce_redirect_code: u16,
    #[serde(default)]
    pub remove_double_slashes: bool,
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub headers: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub proxy_headers: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub redirect_headers: Option<HashMap<String, Value>>,
}

impl Default for HostDefaults {
    fn default() -> Self {
        HostDefaults {
            allow_write: false,
            normalize_urls: false,
            redirect_code: default_redirect_code(),
            reduce_redirect_code: default_reduce_redirect_code(),
            remove_double_slashes: false,
            retry_limit: default_retry_limit(),
            timeout: default_timeout(),
            headers: None,
            proxy_headers: None,
            redirect_headers: None,
        }
    }
}

/// A single `hostConf.hosts[]` entry: one or more hostnames (`*` is the
/// wildcard default), bound to an ordered list of route tables, with
/// optional per-host overrides of the global defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEntry {
    pub hostnames: Vec<String>,
    pub route_tables: Vec<String>,
    pub timeout: Option<u64>,
    #[serde(default)]
    pub headers: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub proxy_headers: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub redirect_headers: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Trie,
    /// Alias of `Trie`.
    Simple,
    Regex,
}

impl MatchType {
    /// `simple` is a pure alias of `trie` (spec.md §3).
    pub fn is_trie(self) -> bool {
        matches!(self, MatchType::Trie | MatchType::Simple)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteTableConf {
    pub match_type: MatchType,
    #[serde(default = "default_true")]
    pub is_case_specific: bool,
    #[serde(default)]
    pub match_using_query_params: bool,
    pub force_proto: Option<String>,
    pub force_port: Option<u16>,
    pub default_handler: Option<String>,
    pub route_namespace: Option<String>,
    #[serde(default = "default_redirect_code")]
    pub default_redirect_code: u16,
    #[serde(default)]
    pub routes: Vec<RouteConf>,
}

/// A declared route. Exactly one of the rewrite/redirect/handled field
/// groups should be populated; `RouteTable::compile` classifies by "first
/// present field among rewrite, redirect, else handled" per spec.md §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConf {
    pub on: String,
    #[serde(default)]
    pub conds: Option<HashMap<String, String>>,
    pub method_match: Option<String>,
    pub host_match: Option<String>,
    pub port_match: Option<u16>,
    pub proto_match: Option<String>,
    pub allow_write: Option<bool>,
    pub force_proto: Option<String>,
    pub force_port: Option<u16>,
    pub post_match: Option<String>,

    // rewrite
    pub rewrite: Option<String>,
    pub replace: Option<String>,
    pub match_params: Option<bool>,
    pub redirect_code: Option<u16>,
    pub status: Option<u16>,
    pub is_last: Option<bool>,

    // redirect
    pub redirect: Option<String>,
    pub code: Option<u16>,
    pub keep_params: Option<bool>,
    pub geo_target: Option<HashMap<String, String>>,

    // handled
    #[serde(rename = "do")]
    pub do_: Option<String>,
    pub options: Option<Value>,
}

/// Loads an [`EnvConf`] + [`HostConf`] pair from a single TOML document with
/// top-level `[env_conf]` / `[host_conf]` tables, mirroring monolake's
/// TOML-based `monolake.toml` convention.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub env_conf: EnvConf,
    pub host_conf: HostConf,
}

impl ConfigDocument {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn from_path(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let doc = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), hosts = doc.host_conf.hosts.len(), "loaded configuration document");
        Ok(doc)
    }
}
