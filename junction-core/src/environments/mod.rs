//! The build-time environment a declarative config document is compiled
//! against: the `conds` map that gates conditional routes (spec.md §4.3)
//! and the `subs` map that feeds `%name%` substitution (spec.md §4.1).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::Subs;

/// `env.conds` / `env.subs`, as supplied by the embedder at build time.
///
/// A route that declares `conds` is only compiled in when every key it
/// names is present here with an equal (string-compared, post-substitution)
/// value; any other route is silently dropped from the table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environments {
    #[serde(default)]
    pub conds: HashMap<String, String>,
    #[serde(default)]
    pub subs: Subs,
}

impl Environments {
    pub fn new() -> Self {
        Self::default()
    }

    /// A route's `conds` map is satisfied iff every key/value pair it
    /// declares (after substitution) matches an entry in `self.conds`.
    pub fn satisfies(&self, route_conds: &HashMap<String, String>) -> bool {
        route_conds
            .iter()
            .all(|(k, v)| self.conds.get(k).map(|have| have == v).unwrap_or(false))
    }

    /// Resolve a `%name%` template against `self.subs`.
    pub fn substitute(&self, s: &str) -> String {
        crate::util::substitute(s, &self.subs)
    }
}

/// A single scalar environment value, retained for embedders that want to
/// stash typed context (peer address, negotiated ALPN protocol, ...)
/// alongside the string-keyed conds/subs maps without round-tripping
/// through JSON.
#[derive(Debug, Clone)]
pub enum ValueType {
    Usize(usize),
    I64(i64),
    F64(f64),
    Bool(bool),
    String(String),
    Json(Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conds_require_exact_match_on_every_key() {
        let mut env = Environments::new();
        env.conds.insert("region".into(), "us".into());
        env.conds.insert("tier".into(), "prod".into());

        let mut route_conds = HashMap::new();
        route_conds.insert("region".into(), "us".into());
        assert!(env.satisfies(&route_conds));

        route_conds.insert("tier".into(), "staging".into());
        assert!(!env.satisfies(&route_conds));
    }

    #[test]
    fn missing_cond_key_fails() {
        let env = Environments::new();
        let mut route_conds = HashMap::new();
        route_conds.insert("region".into(), "us".into());
        assert!(!env.satisfies(&route_conds));
    }

    #[test]
    fn empty_conds_always_satisfied() {
        let env = Environments::new();
        assert!(env.satisfies(&HashMap::new()));
    }
}
