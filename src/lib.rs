//! # servekit
//!
//! A small HTTP server toolkit: exact-path routing, scoped middleware, a
//! JSON response envelope, and graceful shutdown.
//!
//! ## The shape of a request
//!
//! ```text
//! accept → route lookup ─┬─ 404 / 405 envelope
//!                        └─ global middleware (scope-filtered)
//!                            → route middleware
//!                              → handler
//!                            ← JSON pipeline resolves the outcome
//! ```
//!
//! - **Routing** is exact method + path. A path ending in `*` is literal in
//!   a route; only middleware scopes treat it as a prefix.
//! - **Middleware** is a function from [`Next`] to [`Next`], optionally
//!   scoped to paths and/or methods. Global middleware wraps outermost, in
//!   registration order.
//! - **Handlers** return anything that is [`IntoResponse`]: raw bytes, an
//!   [`Outcome`], a helper from [`responses`], or `()` after recording an
//!   outcome on the request's [`ResponseContext`].
//! - **Shutdown** stops accepting on SIGTERM / Ctrl-C and drains in-flight
//!   requests for up to [`DRAIN_TIMEOUT`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use servekit::{ConfigLoader, Request, Response, Server, responses, telemetry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), servekit::Error> {
//!     let config = ConfigLoader::new().load()?;
//!     telemetry::init(config.environment);
//!
//!     Server::builder()
//!         .with_configuration(&config)
//!         .with_logging(true, true)
//!         .with_json_serialization()
//!         .get("/hello", hello)
//!         .post("/echo", echo)
//!         .build()?
//!         .start()
//!         .await
//! }
//!
//! async fn hello(_req: Request) -> Response {
//!     responses::ok(serde_json::json!({"message": "Hello, World!"}))
//! }
//!
//! async fn echo(req: Request) {
//!     req.context().set_data(String::from_utf8_lossy(req.body()));
//! }
//! ```

mod builder;
mod config;
mod error;
mod handler;
mod method;
mod outcome;
mod request;
mod response;
mod route;
mod router;
mod server;

pub mod middleware;
pub mod responses;
pub mod telemetry;

pub use http;

pub use builder::{
    DEFAULT_IDLE_TIMEOUT, DEFAULT_PORT, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT, ServerBuilder,
};
pub use config::{ConfigError, ConfigLoader, Environment, ServerConfig};
pub use error::Error;
pub use handler::{BoxFuture, ErasedHandler, Handler, Next};
pub use method::{Method, UnknownMethod};
pub use outcome::{Outcome, Payload, ResponseContext};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use responses::*;
pub use route::{Layer, Route};
pub use router::{Lookup, RouteTable, Router};
pub use server::{DRAIN_TIMEOUT, Lifecycle, Server, Timeouts};
