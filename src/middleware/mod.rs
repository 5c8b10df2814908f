//! Middleware descriptors, scoping, and composition.
//!
//! A middleware is a named [`Layer`]: a function from the chain it wraps to
//! a new chain. It is global unless it carries a [`Scope`]:
//!
//! | Scope | Applies to a route when |
//! |---|---|
//! | `Global` | always |
//! | `Paths` | the route path equals an entry, or an entry ending in `*` is a prefix of it |
//! | `Methods` | the route method is in the set |
//! | `PathsAndMethods` | both of the above |
//!
//! Scopes are resolved once per route when the server is built, so a
//! middleware that is scoped out of a route never runs for it.
//!
//! For a route with global middleware `[A, B]` and own middleware `[r1, r2]`
//! the call order is:
//!
//! ```text
//! A → B → r1 → r2 → handler → r2 → r1 → B → A
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, ErasedHandler, Next};
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use crate::route::{Layer, Route};

mod json;
mod logging;

pub use json::{Envelope, ErrorWrapper, JsonConfig, JsonPipeline, RequestHead, SuccessWrapper};
pub use logging::{REQUEST_ID_HEADER, logging};

// ── Scope ─────────────────────────────────────────────────────────────────────

/// Where a middleware applies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Scope {
    #[default]
    Global,
    Paths(Vec<String>),
    Methods(BTreeSet<Method>),
    PathsAndMethods {
        paths: Vec<String>,
        methods: BTreeSet<Method>,
    },
}

impl Scope {
    /// Builds a scope from optional path and method sets. Empty sets mean
    /// "not restricted", so two empty sets give [`Scope::Global`].
    pub fn new<P, S, M>(paths: P, methods: M) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
        M: IntoIterator<Item = Method>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        let methods: BTreeSet<Method> = methods.into_iter().collect();
        match (paths.is_empty(), methods.is_empty()) {
            (true, true)   => Self::Global,
            (false, true)  => Self::Paths(paths),
            (true, false)  => Self::Methods(methods),
            (false, false) => Self::PathsAndMethods { paths, methods },
        }
    }

    pub fn matches(&self, method: Method, path: &str) -> bool {
        match self {
            Self::Global         => true,
            Self::Paths(paths)   => any_path_matches(paths, path),
            Self::Methods(set)   => set.contains(&method),
            Self::PathsAndMethods { paths, methods } => {
                any_path_matches(paths, path) && methods.contains(&method)
            }
        }
    }
}

fn any_path_matches(patterns: &[String], path: &str) -> bool {
    patterns.iter().any(|p| path_matches(p, path))
}

/// Exact match, or prefix match when the pattern ends in `*`.
fn path_matches(pattern: &str, path: &str) -> bool {
    if pattern == path {
        return true;
    }
    pattern
        .strip_suffix('*')
        .is_some_and(|prefix| path.starts_with(prefix))
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global         => f.write_str("global"),
            Self::Paths(p)       => write!(f, "paths: {p:?}"),
            Self::Methods(m)     => write!(f, "methods: {m:?}"),
            Self::PathsAndMethods { paths, methods } => {
                write!(f, "paths: {paths:?}, methods: {methods:?}")
            }
        }
    }
}

// ── Middleware ────────────────────────────────────────────────────────────────

/// A named wrapper plus the scope it applies to.
#[derive(Clone)]
pub struct Middleware {
    name: String,
    wrap: Layer,
    scope: Scope,
}

impl Middleware {
    /// A global middleware.
    pub fn new<F>(name: impl Into<String>, wrap: F) -> Self
    where
        F: Fn(Next) -> Next + Send + Sync + 'static,
    {
        Self { name: name.into(), wrap: Arc::new(wrap), scope: Scope::Global }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn scope(&self) -> &Scope { &self.scope }

    pub fn applies_to(&self, route: &Route) -> bool {
        self.scope.matches(route.method, &route.path)
    }

    pub fn wrap(&self, next: Next) -> Next {
        (self.wrap)(next)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Produces the final chain for `route`.
///
/// The route's own middleware wraps the handler first (reverse order, so the
/// first declared is outermost of the group), then every global middleware
/// whose scope matches the route, again in reverse registration order.
pub fn compose(global: &[Middleware], route: &Route) -> Next {
    let own = route
        .middleware
        .iter()
        .rev()
        .fold(route.handler.clone(), |next, wrap| wrap(next));

    global
        .iter()
        .rev()
        .filter(|m| m.applies_to(route))
        .fold(own, |next, m| m.wrap(next))
}

// ── from_fn ───────────────────────────────────────────────────────────────────

/// Turns an async function of `(Request, Next)` into a wrapper.
///
/// ```rust
/// use servekit::middleware::{self, Middleware};
/// use servekit::{Next, Request};
///
/// let timed = middleware::from_fn(|req: Request, next: Next| async move {
///     let started = std::time::Instant::now();
///     let res = next.run(req).await;
///     tracing::debug!(elapsed = ?started.elapsed(), "handled");
///     res
/// });
/// let timing = Middleware::new("Timing", timed);
/// ```
pub fn from_fn<F, Fut>(f: F) -> impl Fn(Next) -> Next + Send + Sync + 'static
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    let f = Arc::new(f);
    move |next| Next::new(FromFn { f: Arc::clone(&f), next })
}

struct FromFn<F> {
    f: Arc<F>,
    next: Next,
}

impl<F, Fut> ErasedHandler for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        Box::pin((self.f)(req, self.next.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    type Trace = Arc<Mutex<Vec<String>>>;

    fn tracer(label: &'static str, trace: &Trace) -> impl Fn(Next) -> Next + Send + Sync + 'static {
        let trace = Arc::clone(trace);
        from_fn(move |req: Request, next: Next| {
            let trace = Arc::clone(&trace);
            async move {
                trace.lock().unwrap().push(format!("> {label}"));
                let res = next.run(req).await;
                trace.lock().unwrap().push(format!("< {label}"));
                res
            }
        })
    }

    fn traced_route(method: Method, path: &str, trace: &Trace) -> Route {
        let t = Arc::clone(trace);
        Route::new(method, path, move |_req: Request| {
            let t = Arc::clone(&t);
            async move {
                t.lock().unwrap().push("handler".to_owned());
            }
        })
    }

    async fn run(global: &[Middleware], route: &Route) {
        compose(global, route)
            .run(Request::new(route.method, route.path.clone()))
            .await;
    }

    #[test]
    fn path_patterns() {
        assert!(path_matches("/api/users", "/api/users"));
        assert!(!path_matches("/api/users", "/api/users/1"));
        assert!(path_matches("/api/*", "/api/users/1"));
        assert!(path_matches("/api/*", "/api/"));
        assert!(!path_matches("/api/*", "/apix"));
        assert!(path_matches("*", "/anything"));
    }

    #[test]
    fn empty_scope_sets_are_global() {
        assert_eq!(Scope::new(Vec::<String>::new(), []), Scope::Global);
        assert_eq!(
            Scope::new(["/a"], []),
            Scope::Paths(vec!["/a".to_owned()])
        );
    }

    #[test]
    fn both_scopes_must_match() {
        let scope = Scope::new(["/admin/*"], [Method::Post, Method::Delete]);
        assert!(scope.matches(Method::Post, "/admin/users"));
        assert!(!scope.matches(Method::Get, "/admin/users"));
        assert!(!scope.matches(Method::Post, "/public"));
    }

    #[tokio::test]
    async fn global_wraps_route_middleware_in_registration_order() {
        let trace: Trace = Arc::default();
        let global = [
            Middleware::new("A", tracer("A", &trace)),
            Middleware::new("B", tracer("B", &trace)),
        ];
        let route = traced_route(Method::Get, "/x", &trace)
            .with_middleware(tracer("r1", &trace))
            .with_middleware(tracer("r2", &trace));

        run(&global, &route).await;

        assert_eq!(
            *trace.lock().unwrap(),
            ["> A", "> B", "> r1", "> r2", "handler", "< r2", "< r1", "< B", "< A"]
        );
    }

    #[tokio::test]
    async fn scoped_out_middleware_never_runs() {
        let trace: Trace = Arc::default();
        let global = [
            Middleware::new("api", tracer("api", &trace)).with_scope(Scope::new(["/api/*"], [])),
            Middleware::new("writes", tracer("writes", &trace))
                .with_scope(Scope::new(Vec::<String>::new(), [Method::Post])),
            Middleware::new("all", tracer("all", &trace)),
        ];

        run(&global, &traced_route(Method::Get, "/health", &trace)).await;
        assert_eq!(*trace.lock().unwrap(), ["> all", "handler", "< all"]);

        trace.lock().unwrap().clear();
        run(&global, &traced_route(Method::Post, "/api/items", &trace)).await;
        assert_eq!(
            *trace.lock().unwrap(),
            ["> api", "> writes", "> all", "handler", "< all", "< writes", "< api"]
        );
    }

    #[tokio::test]
    async fn handler_runs_exactly_once() {
        let trace: Trace = Arc::default();
        let route = traced_route(Method::Put, "/once", &trace);
        run(&[], &route).await;
        assert_eq!(*trace.lock().unwrap(), ["handler"]);
    }
}
