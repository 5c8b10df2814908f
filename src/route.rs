//! Route definitions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::handler::{Handler, Next};
use crate::method::Method;

/// A wrapper function: takes the chain it wraps, returns the new outer chain.
pub type Layer = Arc<dyn Fn(Next) -> Next + Send + Sync + 'static>;

/// One method + path entry and everything attached to it.
///
/// Identity is `(method, path)`. The path is matched literally: no
/// parameters, no trailing-slash normalisation.
///
/// ```rust
/// use servekit::{Request, Route, responses};
///
/// async fn list(_req: Request) -> servekit::Response {
///     responses::ok(Vec::<u32>::new())
/// }
///
/// let route = Route::get("/users", list)
///     .with_tags(["users", "public"])
///     .with_meta("summary", "List users")
///     .with_middleware(|next| next);
/// ```
#[derive(Clone)]
pub struct Route {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) handler: Next,
    pub(crate) middleware: Vec<Layer>,
    pub(crate) meta: BTreeMap<String, Value>,
    pub(crate) tags: BTreeSet<String>,
}

impl Route {
    pub fn new(method: Method, path: impl Into<String>, handler: impl Handler) -> Self {
        Self {
            method,
            path: path.into(),
            handler: handler.into_next(),
            middleware: Vec::new(),
            meta: BTreeMap::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn get(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::Get, path, handler)
    }

    pub fn post(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::Post, path, handler)
    }

    pub fn put(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::Put, path, handler)
    }

    pub fn delete(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::Delete, path, handler)
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Adds a route-own middleware. The first one added is the outermost of
    /// this route's own group, and always sits inside every global middleware.
    pub fn with_middleware<F>(mut self, wrap: F) -> Self
    where
        F: Fn(Next) -> Next + Send + Sync + 'static,
    {
        self.middleware.push(Arc::new(wrap));
        self
    }

    pub fn method(&self) -> Method { self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn tags(&self) -> &BTreeSet<String> { &self.tags }
    pub fn meta(&self, key: &str) -> Option<&Value> { self.meta.get(key) }

    pub(crate) fn same_identity(&self, other: &Route) -> bool {
        self.method == other.method && self.path == other.path
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("middleware", &self.middleware.len())
            .field("meta", &self.meta)
            .field("tags", &self.tags)
            .finish()
    }
}
