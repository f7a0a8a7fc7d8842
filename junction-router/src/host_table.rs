//! Binding hostnames to ordered lists of compiled route tables, with a `*`
//! wildcard fallback (spec.md §3 `HostConf`/`hosts[]`, §4 "host lookup").

use std::collections::HashMap;

use junction_core::config::{HostConf, HostDefaults};
use junction_core::environments::Environments;
use junction_core::ConfigError;

use crate::handlers::HandlerRegistry;
use crate::route::{MatchArgs, RouteHandle};
use crate::route_table::RouteTable;
use crate::request::Request;

/// The settings a matched host applies to every request it serves: these
/// are `HostDefaults`, overridden per-entry where the entry supplies its
/// own value (spec.md §4 "host defaults cascade").
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub allow_write: bool,
    pub normalize_urls: bool,
    pub redirect_code: u16,
    pub reduce_redirect_code: u16,
    pub remove_double_slashes: bool,
    pub retry_limit: u32,
    pub timeout: u64,
    pub headers: HashMap<String, String>,
    pub proxy_headers: HashMap<String, String>,
    pub redirect_headers: HashMap<String, String>,
}

impl HostConfig {
    fn from_defaults(defaults: &HostDefaults) -> Result<Self, ConfigError> {
        Ok(HostConfig {
            allow_write: defaults.allow_write,
            normalize_urls: defaults.normalize_urls,
            redirect_code: defaults.redirect_code,
            reduce_redirect_code: defaults.reduce_redirect_code,
            remove_double_slashes: defaults.remove_double_slashes,
            retry_limit: defaults.retry_limit,
            timeout: defaults.timeout,
            headers: junction_core::util::merge_headers(defaults.headers.as_ref(), None)
                .map_err(ConfigError::InvalidHeaderValue)?,
            proxy_headers: junction_core::util::merge_headers(defaults.proxy_headers.as_ref(), None)
                .map_err(ConfigError::InvalidHeaderValue)?,
            redirect_headers: junction_core::util::merge_headers(defaults.redirect_headers.as_ref(), None)
                .map_err(ConfigError::InvalidHeaderValue)?,
        })
    }

    fn overlay(&self, entry: &junction_core::config::HostEntry) -> Result<Self, ConfigError> {
        Ok(HostConfig {
            allow_write: self.allow_write,
            normalize_urls: self.normalize_urls,
            redirect_code: self.redirect_code,
            reduce_redirect_code: self.reduce_redirect_code,
            remove_double_slashes: self.remove_double_slashes,
            retry_limit: self.retry_limit,
            timeout: entry.timeout.unwrap_or(self.timeout),
            headers: merge_from_base(&self.headers, entry.headers.as_ref())?,
            proxy_headers: merge_from_base(&self.proxy_headers, entry.proxy_headers.as_ref())?,
            redirect_headers: merge_from_base(&self.redirect_headers, entry.redirect_headers.as_ref())?,
        })
    }
}

fn merge_from_base(
    base: &HashMap<String, String>,
    extra: Option<&HashMap<String, serde_json::Value>>,
) -> Result<HashMap<String, String>, ConfigError> {
    let base_as_value: HashMap<String, serde_json::Value> = base
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    junction_core::util::merge_headers(Some(&base_as_value), extra)
        .map_err(ConfigError::InvalidHeaderValue)
}

struct HostBinding {
    config: HostConfig,
    tables: Vec<std::sync::Arc<RouteTable>>,
}

/// The compiled host graph: every declared hostname (case-insensitively)
/// maps to its binding, plus an optional `*` wildcard fallback.
pub struct HostTable {
    bindings: HashMap<String, HostBinding>,
    wildcard: Option<HostBinding>,
}

impl HostTable {
    /// Compile a [`HostConf`] document: each named route table is compiled
    /// once against `env` and `handlers` and shared (by `Arc`) across every
    /// host entry that references it.
    pub fn compile(conf: &HostConf, env: &Environments, handlers: &HandlerRegistry) -> Result<HostTable, ConfigError> {
        let base = HostConfig::from_defaults(&conf.defaults)?;

        let mut compiled_tables = HashMap::new();
        for (name, table_conf) in &conf.route_tables {
            let table = RouteTable::compile(name, table_conf, env, handlers)?;
            compiled_tables.insert(name.clone(), std::sync::Arc::new(table));
        }

        let mut bindings = HashMap::new();
        let mut wildcard = None;

        for entry in &conf.hosts {
            let config = base.overlay(entry)?;
            let mut tables = Vec::with_capacity(entry.route_tables.len());
            for name in &entry.route_tables {
                let table = compiled_tables
                    .get(name)
                    .ok_or_else(|| ConfigError::UnknownRouteTable(name.clone()))?
                    .clone();
                tables.push(table);
            }
            let binding = HostBinding { config, tables };

            for hostname in &entry.hostnames {
                if hostname == "*" {
                    if wildcard.is_some() {
                        return Err(ConfigError::DuplicateHostname("*".to_string()));
                    }
                    wildcard = Some(HostBinding { config: binding.config.clone(), tables: binding.tables.clone() });
                    continue;
                }
                if !junction_core::util::is_hostname_valid(hostname) {
                    return Err(ConfigError::InvalidHostname(hostname.clone()));
                }
                let key = hostname.to_ascii_lowercase();
                if bindings.contains_key(&key) {
                    return Err(ConfigError::DuplicateHostname(hostname.clone()));
                }
                bindings.insert(key, HostBinding { config: binding.config.clone(), tables: binding.tables.clone() });
            }
        }

        Ok(HostTable { bindings, wildcard })
    }

    fn binding_for(&self, hostname: &str) -> Option<&HostBinding> {
        self.bindings
            .get(&hostname.to_ascii_lowercase())
            .or(self.wildcard.as_ref())
    }

    pub fn config_for(&self, hostname: &str) -> Option<&HostConfig> {
        self.binding_for(hostname).map(|b| &b.config)
    }

    /// Walk this host's route tables in binding order, returning the first
    /// match (spec.md §4 "tables are tried in declared order; the first
    /// table to produce a match wins").
    pub fn resolve(&self, req: &Request) -> Option<(RouteHandle, MatchArgs)> {
        let binding = self.binding_for(&req.hostname)?;
        binding.tables.iter().find_map(|table| table.resolve(req))
    }

    /// The first declared `default_handler` among a host's bound tables,
    /// consulted when nothing in any of them matches, or when a matched
    /// handler declines (spec.md §3 `RouteTableConf.defaultHandler`).
    pub fn default_handler_for(&self, hostname: &str) -> Option<String> {
        let binding = self.binding_for(hostname)?;
        binding.tables.iter().find_map(|table| table.default_handler.clone())
    }
}

impl Clone for HostConfig {
    fn clone(&self) -> Self {
        HostConfig {
            allow_write: self.allow_write,
            normalize_urls: self.normalize_urls,
            redirect_code: self.redirect_code,
            reduce_redirect_code: self.reduce_redirect_code,
            remove_double_slashes: self.remove_double_slashes,
            retry_limit: self.retry_limit,
            timeout: self.timeout,
            headers: self.headers.clone(),
            proxy_headers: self.proxy_headers.clone(),
            redirect_headers: self.redirect_headers.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::test_support::make_request;
    use junction_core::config::ConfigDocument;

    struct NoopHandler;
    impl crate::handlers::RouteHandler for NoopHandler {
        async fn handle(
            &self,
            req: &mut Request,
            _route: &crate::route::CompiledRoute,
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

    #[test]
    fn wildcard_is_the_fallback_for_unknown_hosts() {
        let doc = r#"
            [host_conf.defaults]

            [[host_conf.hosts]]
            hostnames = ["*"]
            route_tables = ["main"]

            [host_conf.route_tables.main]
            match_type = "trie"

            [[host_conf.route_tables.main.routes]]
            on = "/health#"
            do = "healthcheck"
        "#;
        let parsed = ConfigDocument::from_toml_str(doc).unwrap();
        let env = Environments::new();
        let handlers = registry_with(&["healthcheck"]);
        let table = HostTable::compile(&parsed.host_conf, &env, &handlers).unwrap();

        let req = make_request("GET", "unknown.example", "http", 80, "/health");
        assert!(table.resolve(&req).is_some());
    }

    #[test]
    fn duplicate_hostname_binding_is_a_build_error() {
        let doc = r#"
            [host_conf.defaults]

            [[host_conf.hosts]]
            hostnames = ["a.example"]
            route_tables = ["main"]

            [[host_conf.hosts]]
            hostnames = ["a.example"]
            route_tables = ["main"]

            [host_conf.route_tables.main]
            match_type = "trie"
        "#;
        let parsed = ConfigDocument::from_toml_str(doc).unwrap();
        let env = Environments::new();
        let handlers = HandlerRegistry::new();
        assert!(HostTable::compile(&parsed.host_conf, &env, &handlers).is_err());
    }

    #[test]
    fn unknown_route_table_reference_is_a_build_error() {
        let doc = r#"
            [host_conf.defaults]

            [[host_conf.hosts]]
            hostnames = ["a.example"]
            route_tables = ["missing"]
        "#;
        let parsed = ConfigDocument::from_toml_str(doc).unwrap();
        let env = Environments::new();
        let handlers = HandlerRegistry::new();
        assert!(HostTable::compile(&parsed.host_conf, &env, &handlers).is_err());
    }
}
