//! Declarative configuration: the serde schema (spec.md §6) and the
//! `continents`/`regions` lookup tables `geoTarget` resolution consults.

mod schema;

pub mod geo;

pub use schema::{
    ConfigDocument, EnvConf, HostConf, HostDefaults, HostEntry, MatchType, PortOverride,
    RouteConf, RouteTableConf,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_document() {
        let doc = r#"
            [env_conf.env]
            [env_conf.env.conds]
            region = "us"

            [host_conf.defaults]
            retry_limit = 5

            [[host_conf.hosts]]
            hostnames = ["*"]
            route_tables = ["main"]

            [host_conf.route_tables.main]
            match_type = "trie"

            [[host_conf.route_tables.main.routes]]
            on = "/health"
            do = "healthcheck"
        "#;
        let parsed = ConfigDocument::from_toml_str(doc).unwrap();
        assert_eq!(parsed.host_conf.defaults.retry_limit, 5);
        assert_eq!(parsed.host_conf.hosts[0].hostnames, vec!["*".to_string()]);
        let table = &parsed.host_conf.route_tables["main"];
        assert!(table.match_type.is_trie());
        assert_eq!(table.routes[0].on, "/health");
        assert_eq!(table.routes[0].do_.as_deref(), Some("healthcheck"));
        assert_eq!(parsed.env_conf.env.conds.get("region").unwrap(), "us");
    }
}
