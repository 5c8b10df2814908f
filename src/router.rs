//! Route table and request matching.
//!
//! Two phases. While building, a [`RouteTable`] accumulates routes in
//! registration order; registering the same `(method, path)` again replaces
//! the earlier entry in place. On build the table is compiled into a
//! [`Router`]: every route's chain is composed once, and paths go into a
//! radix tree (`matchit`) as literals. After that the router is read-only.

use std::collections::BTreeMap;

use matchit::Router as MatchitRouter;

use crate::error::Error;
use crate::handler::Next;
use crate::method::Method;
use crate::middleware::{Middleware, compose};
use crate::route::Route;

// ── RouteTable ────────────────────────────────────────────────────────────────

/// Ordered collection of routes, keyed by `(method, path)`.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `route`, silently replacing any route with the same identity.
    pub fn register(&mut self, route: Route) {
        match self.routes.iter_mut().find(|r| r.same_identity(&route)) {
            Some(existing) => *existing = route,
            None => self.routes.push(route),
        }
    }

    /// Routes in registration order.
    pub fn list(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Result of matching a request line.
pub enum Lookup<'a> {
    Found(Method, &'a Next),
    /// The path exists, but not under this method. Holds the allowed methods.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

/// The compiled, read-only route table.
pub struct Router {
    tree: MatchitRouter<BTreeMap<Method, Next>>,
    routes: Vec<Route>,
}

impl Router {
    /// Composes every route with the matching global middleware.
    pub fn compile(table: RouteTable, global: &[Middleware]) -> Result<Self, Error> {
        let mut by_path: BTreeMap<&str, BTreeMap<Method, Next>> = BTreeMap::new();
        for route in table.list() {
            by_path
                .entry(route.path.as_str())
                .or_default()
                .insert(route.method, compose(global, route));
        }

        let mut tree = MatchitRouter::new();
        for (path, methods) in by_path {
            tree.insert(escape(path), methods).map_err(|e| Error::InvalidRoute {
                path: path.to_owned(),
                reason: e.to_string(),
            })?;
        }

        Ok(Self { tree, routes: table.routes })
    }

    /// Exact method + path match.
    pub fn lookup(&self, method: &http::Method, path: &str) -> Lookup<'_> {
        let Ok(matched) = self.tree.at(path) else {
            return Lookup::NotFound;
        };
        let methods = matched.value;
        let found = Method::try_from(method)
            .ok()
            .and_then(|m| methods.get(&m).map(|next| (m, next)));
        match found {
            Some((m, next)) => Lookup::Found(m, next),
            None => Lookup::MethodNotAllowed(methods.keys().copied().collect()),
        }
    }

    /// Routes in registration order, for diagnostics.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

/// Paths are literal. Braces would otherwise be read as parameter syntax.
fn escape(path: &str) -> String {
    path.replace('{', "{{").replace('}', "}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Request;

    async fn noop(_req: Request) {}

    fn router(routes: impl IntoIterator<Item = Route>) -> Router {
        let mut table = RouteTable::new();
        for r in routes {
            table.register(r);
        }
        Router::compile(table, &[]).unwrap()
    }

    #[test]
    fn reregistering_replaces_in_place() {
        let mut table = RouteTable::new();
        table.register(Route::get("/a", noop).with_tags(["first"]));
        table.register(Route::post("/a", noop));
        table.register(Route::get("/a", noop).with_tags(["second"]));

        assert_eq!(table.len(), 2);
        assert_eq!(table.list()[0].method(), Method::Get);
        assert!(table.list()[0].tags().contains("second"));
    }

    #[test]
    fn matches_exact_method_and_path_only() {
        let r = router([Route::get("/hello", noop), Route::post("/hello", noop)]);

        assert!(matches!(r.lookup(&http::Method::GET, "/hello"), Lookup::Found(..)));
        assert!(matches!(r.lookup(&http::Method::POST, "/hello"), Lookup::Found(..)));
        assert!(matches!(r.lookup(&http::Method::GET, "/hello/"), Lookup::NotFound));
        assert!(matches!(r.lookup(&http::Method::GET, "/hell"), Lookup::NotFound));
        assert!(matches!(r.lookup(&http::Method::GET, "/"), Lookup::NotFound));
    }

    #[test]
    fn wrong_method_reports_allowed_ones() {
        let r = router([Route::get("/x", noop), Route::delete("/x", noop)]);

        match r.lookup(&http::Method::PUT, "/x") {
            Lookup::MethodNotAllowed(allowed) => {
                assert_eq!(allowed, vec![Method::Delete, Method::Get]);
            }
            _ => panic!("expected 405"),
        }
        assert!(matches!(
            r.lookup(&http::Method::PATCH, "/x"),
            Lookup::MethodNotAllowed(_)
        ));
    }

    #[test]
    fn braces_are_literal() {
        let r = router([Route::get("/users/{id}", noop)]);

        assert!(matches!(r.lookup(&http::Method::GET, "/users/{id}"), Lookup::Found(..)));
        assert!(matches!(r.lookup(&http::Method::GET, "/users/42"), Lookup::NotFound));
    }

    #[test]
    fn keeps_registration_order_for_diagnostics() {
        let r = router([Route::put("/b", noop), Route::get("/a", noop)]);
        let paths: Vec<_> = r.routes().iter().map(Route::path).collect();
        assert_eq!(paths, ["/b", "/a"]);
    }
}
