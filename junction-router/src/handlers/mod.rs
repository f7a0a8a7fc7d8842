//! The dynamic route-handler namespace: named handlers a `do = "..."`
//! route resolves against at build time, invoked uniformly at request time
//! (spec.md §3 "Handled" routes, §9 "Action polymorphism").

pub mod proxy;

use std::collections::HashMap;
use std::sync::Arc;

use junction_core::AnyError;

use crate::request::Request;
use crate::route::{CompiledRoute, MatchArgs};

/// A named request handler a `do`-routed route dispatches into. Returning
/// `Ok(true)` means the handler produced a response (via one of
/// [`Request`]'s response helpers); `Ok(false)` means it declined and the
/// caller should fall through to the table's `default_handler`, if any.
pub trait RouteHandler: Send + Sync {
    fn handle(
        &self,
        req: &mut Request,
        route: &CompiledRoute,
        args: &MatchArgs,
    ) -> impl std::future::Future<Output = Result<bool, AnyError>> + Send;
}

/// Object-safe wrapper so a heterogeneous set of handlers can share a
/// registry; `RouteHandler` itself isn't object-safe because its method is
/// generic over the `impl Future` it returns.
pub trait DynRouteHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        route: &'a CompiledRoute,
        args: &'a MatchArgs,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<bool, AnyError>> + Send + 'a>>;
}

impl<T: RouteHandler> DynRouteHandler for T {
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        route: &'a CompiledRoute,
        args: &'a MatchArgs,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<bool, AnyError>> + Send + 'a>> {
        Box::pin(RouteHandler::handle(self, req, route, args))
    }
}

/// A name -> handler mapping resolved once at build time, then shared
/// (read-only) across every request (spec.md §6 "route handler namespace").
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn DynRouteHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn DynRouteHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn DynRouteHandler>> {
        self.handlers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::test_support::make_request;
    use crate::route::{HandledAction, RouteKind, RuntimeFilters};

    struct Healthcheck;

    impl RouteHandler for Healthcheck {
        async fn handle(
            &self,
            req: &mut Request,
            _route: &CompiledRoute,
            _args: &MatchArgs,
        ) -> Result<bool, AnyError> {
            req.send(200, bytes::Bytes::from_static(b"ok"))?;
            Ok(true)
        }
    }

    #[monoio::test]
    async fn registry_dispatches_by_name() {
        let mut registry = HandlerRegistry::new();
        registry.register("health", Arc::new(Healthcheck));
        assert!(registry.contains("health"));
        assert!(!registry.contains("missing"));

        let route = CompiledRoute {
            on: "/health".to_string(),
            filters: RuntimeFilters::default(),
            kind: RouteKind::Handled(HandledAction { action: "health".to_string(), options: None }),
        };
        let args = MatchArgs::default();
        let mut req = make_request("GET", "h", "http", 80, "/health");

        let handler = registry.get("health").unwrap().clone();
        let handled = handler.handle(&mut req, &route, &args).await.unwrap();
        assert!(handled);
        assert!(req.has_sent());
    }
}
