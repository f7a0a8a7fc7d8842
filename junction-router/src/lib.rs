//! The routing engine core: a character trie and a regex list matcher
//! sharing uniform runtime filter checks, a request pipeline that
//! normalizes URLs, ingests bodies, and walks route tables with bounded
//! rewrite recursion, and an [`Engine`] that composes both into a single
//! `handle_routing` entry point with atomic live reconfiguration.

pub mod engine;
pub mod geo_redirect;
pub mod handlers;
pub mod host_table;
pub mod request;
pub mod route;
pub mod route_table;
pub mod trie;

pub use engine::Engine;
pub use handlers::RouteHandler;
pub use host_table::{HostConfig, HostTable};
pub use request::Request;
pub use route::{CompiledRoute, RouteKind};
pub use route_table::RouteTable;

pub type AnyError = junction_core::AnyError;
pub type AnyResult<T, E = AnyError> = std::result::Result<T, E>;
