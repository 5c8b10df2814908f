//! Fluent server assembly.
//!
//! Every call takes the builder by value and hands it back, so a builder is
//! never shared while it is being filled in. [`ServerBuilder::build`]
//! snapshots the accumulated routes and middleware into a read-only
//! [`Server`].

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{Environment, ServerConfig};
use crate::error::Error;
use crate::handler::{Handler, Next};
use crate::method::Method;
use crate::middleware::{self, JsonConfig, JsonPipeline, Middleware, Scope};
use crate::route::Route;
use crate::router::{RouteTable, Router};
use crate::server::{App, Server, Timeouts};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Assembles routes, middleware, and settings into a [`Server`].
///
/// ```rust,no_run
/// use servekit::{Request, Response, Server, responses};
///
/// async fn hello(_req: Request) -> Response {
///     responses::ok(serde_json::json!({"message": "Hello, World!"}))
/// }
///
/// # async fn run() -> Result<(), servekit::Error> {
/// Server::builder()
///     .port(3000)
///     .with_logging(true, true)
///     .with_json_serialization()
///     .get("/hello", hello)
///     .build()?
///     .start()
///     .await
/// # }
/// ```
pub struct ServerBuilder {
    address: String,
    port: u16,
    timeouts: Timeouts,
    environment: Environment,
    routes: RouteTable,
    middleware: Vec<Middleware>,
    pipeline: JsonPipeline,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            address: String::new(),
            port: DEFAULT_PORT,
            timeouts: Timeouts {
                read: DEFAULT_READ_TIMEOUT,
                write: DEFAULT_WRITE_TIMEOUT,
                idle: DEFAULT_IDLE_TIMEOUT,
            },
            environment: Environment::default(),
            routes: RouteTable::new(),
            middleware: Vec::new(),
            pipeline: JsonPipeline::default(),
        }
    }

    /// Applies a resolved configuration. Zero and empty fields keep the
    /// current values.
    pub fn with_configuration(mut self, config: &ServerConfig) -> Self {
        if !config.host.is_empty() {
            self.address = config.host.clone();
        }
        if config.port != 0 {
            self.port = config.port;
        }
        if config.read_timeout != 0 {
            self.timeouts.read = Duration::from_secs(config.read_timeout);
        }
        if config.write_timeout != 0 {
            self.timeouts.write = Duration::from_secs(config.write_timeout);
        }
        if config.idle_timeout != 0 {
            self.timeouts.idle = Duration::from_secs(config.idle_timeout);
        }
        self.environment = config.environment;
        self
    }

    /// Port to listen on. `0` means [`DEFAULT_PORT`].
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Interface to listen on. Empty means all interfaces.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    // ── Routes ────────────────────────────────────────────────────────────────

    pub fn route(mut self, method: Method, path: impl Into<String>, handler: impl Handler) -> Self {
        self.routes.register(Route::new(method, path, handler));
        self
    }

    pub fn add_route(mut self, route: Route) -> Self {
        self.routes.register(route);
        self
    }

    pub fn routes(mut self, routes: impl IntoIterator<Item = Route>) -> Self {
        for route in routes {
            self.routes.register(route);
        }
        self
    }

    pub fn get(self, path: impl Into<String>, handler: impl Handler) -> Self {
        self.route(Method::Get, path, handler)
    }

    pub fn post(self, path: impl Into<String>, handler: impl Handler) -> Self {
        self.route(Method::Post, path, handler)
    }

    pub fn put(self, path: impl Into<String>, handler: impl Handler) -> Self {
        self.route(Method::Put, path, handler)
    }

    pub fn delete(self, path: impl Into<String>, handler: impl Handler) -> Self {
        self.route(Method::Delete, path, handler)
    }

    // ── Middleware ────────────────────────────────────────────────────────────

    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn global_middleware<F>(self, name: impl Into<String>, wrap: F) -> Self
    where
        F: Fn(Next) -> Next + Send + Sync + 'static,
    {
        self.middleware(Middleware::new(name, wrap))
    }

    /// A middleware limited to `paths`. An entry ending in `*` matches by prefix.
    pub fn route_middleware<F, P, S>(self, name: impl Into<String>, wrap: F, paths: P) -> Self
    where
        F: Fn(Next) -> Next + Send + Sync + 'static,
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scope = Scope::new(paths, Vec::<Method>::new());
        self.middleware(Middleware::new(name, wrap).with_scope(scope))
    }

    pub fn method_middleware<F>(
        self,
        name: impl Into<String>,
        wrap: F,
        methods: impl IntoIterator<Item = Method>,
    ) -> Self
    where
        F: Fn(Next) -> Next + Send + Sync + 'static,
    {
        let scope = Scope::new(Vec::<String>::new(), methods);
        self.middleware(Middleware::new(name, wrap).with_scope(scope))
    }

    /// Registers the JSON pipeline, with default options, as a global middleware.
    pub fn with_json_serialization(self) -> Self {
        self.with_json_config(JsonConfig::default())
    }

    /// Registers the JSON pipeline as a global middleware. The same options
    /// render the 404/405/timeout envelopes the server produces itself.
    pub fn with_json_config(mut self, config: JsonConfig) -> Self {
        self.pipeline = JsonPipeline::new(config);
        let mw = self.pipeline.clone().into_middleware();
        self.middleware(mw)
    }

    /// Registers request/response logging when either flag is set.
    ///
    /// Logging always becomes the outermost global middleware, whenever it is
    /// registered: it logs the status the client actually receives and its
    /// request id is visible to every other middleware.
    pub fn with_logging(mut self, log_requests: bool, log_responses: bool) -> Self {
        if log_requests || log_responses {
            self.middleware.insert(0, middleware::logging(log_requests, log_responses));
        }
        self
    }

    // ── Build ─────────────────────────────────────────────────────────────────

    pub fn build(self) -> Result<Server, Error> {
        self.log_registrations();

        let host = if self.address.is_empty() { "0.0.0.0" } else { self.address.as_str() };
        let port = if self.port == 0 { DEFAULT_PORT } else { self.port };
        let addr = format!("{host}:{port}");

        let router = Router::compile(self.routes, &self.middleware)?;
        let app = App { router, pipeline: self.pipeline, write_timeout: self.timeouts.write };

        Ok(Server::new(addr, self.timeouts, self.environment, Arc::new(app)))
    }

    fn log_registrations(&self) {
        for mw in &self.middleware {
            info!(name = mw.name(), scope = %mw.scope(), "middleware registered");
        }
        for route in self.routes.list() {
            info!(method = %route.method(), path = route.path(), "route registered");
        }
    }
}
