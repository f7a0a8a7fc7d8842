//! The demo binary's own route handlers, registered into the [`Engine`]'s
//! [`HandlerRegistry`](junction_router::handlers::HandlerRegistry) alongside
//! the router crate's built-in `proxy` handler.

use bytes::Bytes;

use junction_core::AnyError;
use junction_router::handlers::RouteHandler;
use junction_router::route::{CompiledRoute, MatchArgs};
use junction_router::Request;

/// `do = "healthcheck"` — always answers `200 ok`, ignoring the match.
pub struct Healthcheck;

impl RouteHandler for Healthcheck {
    async fn handle(
        &self,
        req: &mut Request,
        _route: &CompiledRoute,
        _args: &MatchArgs,
    ) -> Result<bool, AnyError> {
        req.send(200, Bytes::from_static(b"ok"))?;
        Ok(true)
    }
}
