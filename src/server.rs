//! HTTP server, dispatch, and graceful shutdown.
//!
//! # Lifecycle
//!
//! `Built → Listening → Draining → Stopped`, observable through
//! [`Server::state`].
//!
//! On the shutdown signal (SIGTERM or Ctrl-C for [`Server::start`], any
//! future for the other entry points) the server:
//! 1. Stops calling `listener.accept()` and closes the listener.
//! 2. Asks every open connection to finish its in-flight request and close.
//! 3. Waits up to [`DRAIN_TIMEOUT`] for the connection tasks to end. Tasks
//!    still running after that are aborted and the run call returns
//!    [`Error::ForcedShutdown`].
//!
//! Orchestrators that send SIGTERM before SIGKILL (Kubernetes waits
//! `terminationGracePeriodSeconds`, 30 s by default) should allow more than
//! the drain budget.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::header::{ALLOW, HeaderValue};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::builder::ServerBuilder;
use crate::config::Environment;
use crate::error::Error;
use crate::middleware::{JsonPipeline, RequestHead};
use crate::request::Request;
use crate::response::Response;
use crate::route::Route;
use crate::router::{Lookup, Router};

/// How long in-flight requests get to finish once shutdown starts.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Lifecycle {
    /// Handler graph assembled, socket not open yet.
    Built,
    Listening,
    Draining,
    Stopped,
}

/// Transport timeouts.
///
/// `read` bounds receiving the request head, `write` bounds producing the
/// response, and `idle` closes keep-alive connections with nothing in flight.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
    pub idle: Duration,
}

/// Everything a connection needs to answer requests.
pub(crate) struct App {
    pub(crate) router: Router,
    pub(crate) pipeline: JsonPipeline,
    pub(crate) write_timeout: Duration,
}

/// A built server. Create one with [`Server::builder`].
pub struct Server {
    addr: String,
    timeouts: Timeouts,
    environment: Environment,
    app: Arc<App>,
    state: watch::Sender<Lifecycle>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub(crate) fn new(
        addr: String,
        timeouts: Timeouts,
        environment: Environment,
        app: Arc<App>,
    ) -> Self {
        let (state, _) = watch::channel(Lifecycle::Built);
        Self { addr, timeouts, environment, app, state }
    }

    /// The `host:port` this server binds in [`start`](Self::start).
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Registered routes, in registration order.
    pub fn routes(&self) -> &[Route] {
        self.app.router.routes()
    }

    /// A receiver that observes every lifecycle transition.
    pub fn state(&self) -> watch::Receiver<Lifecycle> {
        self.state.subscribe()
    }

    /// Binds, serves, and returns after a graceful shutdown triggered by
    /// SIGTERM or Ctrl-C.
    pub async fn start(self) -> Result<(), Error> {
        self.start_with_shutdown(shutdown_signal()).await
    }

    /// Like [`start`](Self::start), with `signal` as the shutdown trigger.
    pub async fn start_with_shutdown<F>(self, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = match TcpListener::bind(self.addr.as_str()).await {
            Ok(l) => l,
            Err(e) => {
                error!(addr = %self.addr, "bind failed: {e}");
                return Err(Error::bind(self.addr.clone(), e));
            }
        };
        self.serve(listener, signal).await
    }

    /// Serves connections from an already bound `listener` until `signal`
    /// resolves, then drains.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        let local = listener.local_addr()?;
        self.state.send_replace(Lifecycle::Listening);
        info!(addr = %local, environment = %self.environment, "servekit listening");

        let (shutdown, _) = broadcast::channel::<()>(1);
        let mut tasks = JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Checked first so a signal stops accepting even with a queue
                // of pending connections.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };
                    tasks.spawn(serve_connection(
                        stream,
                        remote_addr,
                        Arc::clone(&self.app),
                        self.timeouts,
                        shutdown.subscribe(),
                    ));
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        drop(listener);
        self.state.send_replace(Lifecycle::Draining);
        // No receivers means no open connections; nothing to notify.
        let _ = shutdown.send(());

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        let result = match drained {
            Ok(()) => {
                info!("servekit stopped");
                Ok(())
            }
            Err(_) => {
                let in_flight = tasks.len();
                warn!(in_flight, budget = ?DRAIN_TIMEOUT, "drain budget exceeded, aborting");
                tasks.shutdown().await;
                Err(Error::ForcedShutdown { in_flight, budget: DRAIN_TIMEOUT })
            }
        };

        self.state.send_replace(Lifecycle::Stopped);
        result
    }
}

// ── Connections ───────────────────────────────────────────────────────────────

async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    app: Arc<App>,
    timeouts: Timeouts,
    mut shutdown: broadcast::Receiver<()>,
) {
    let io = TokioIo::new(stream);
    let activity = Arc::new(Activity::new());

    let svc = {
        let activity = Arc::clone(&activity);
        service_fn(move |req| {
            let app = Arc::clone(&app);
            let guard = activity.begin();
            async move {
                let res = dispatch(&app, req, remote_addr).await;
                drop(guard);
                Ok::<_, Infallible>(res)
            }
        })
    };

    let mut builder = ConnBuilder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.read);

    let conn = builder.serve_connection(io, svc);
    tokio::pin!(conn);

    let mut closing = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    debug!(peer = %remote_addr, "connection error: {e}");
                }
                break;
            }
            _ = shutdown.recv(), if !closing => {
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
            () = activity.idle_for(timeouts.idle), if !closing => {
                debug!(peer = %remote_addr, "idle timeout, closing connection");
                closing = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

/// In-flight request count and time of the last request boundary for one
/// connection.
struct Activity {
    epoch: Instant,
    last_ms: AtomicU64,
    in_flight: AtomicUsize,
    changed: Notify,
}

struct ActivityGuard(Arc<Activity>);

impl Activity {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ms: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            changed: Notify::new(),
        }
    }

    fn begin(self: &Arc<Self>) -> ActivityGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.touch();
        ActivityGuard(Arc::clone(self))
    }

    fn touch(&self) {
        let ms = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_ms.store(ms, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    fn quiet_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::SeqCst));
        self.epoch.elapsed().saturating_sub(last)
    }

    /// Resolves once nothing has been in flight for `limit`.
    async fn idle_for(&self, limit: Duration) {
        loop {
            let changed = self.changed.notified();
            if self.in_flight.load(Ordering::SeqCst) > 0 {
                changed.await;
                continue;
            }
            let quiet = self.quiet_for();
            if quiet >= limit {
                return;
            }
            tokio::select! {
                () = tokio::time::sleep(limit - quiet) => {}
                () = changed => {}
            }
        }
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.touch();
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Routes one request and produces exactly one response.
///
/// Routing failures are answered here without running middleware. Handler
/// panics become a 500 envelope and overrunning the write timeout a 503.
async fn dispatch(
    app: &App,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> http::Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let head = RequestHead {
        method: parts.method.clone(),
        path: parts.uri.path().to_owned(),
        request_id: None,
    };

    let (method, next) = match app.router.lookup(&parts.method, &head.path) {
        Lookup::Found(method, next) => (method, next.clone()),
        Lookup::MethodNotAllowed(allowed) => {
            debug!(method = %head.method, path = %head.path, "method not allowed");
            let mut res = app
                .pipeline
                .error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed", &head);
            let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                res.headers_mut().insert(ALLOW, value);
            }
            return res.into_http();
        }
        Lookup::NotFound => {
            debug!(method = %head.method, path = %head.path, "no route");
            return app
                .pipeline
                .error_response(StatusCode::NOT_FOUND, "not found", &head)
                .into_http();
        }
    };

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(path = %head.path, "could not read request body: {e}");
            return app
                .pipeline
                .error_response(StatusCode::BAD_REQUEST, "could not read request body", &head)
                .into_http();
        }
    };

    let req = Request::from_parts(method, parts, body, remote_addr);
    let ctx = req.context().clone();

    let task = HandlerTask(tokio::spawn(async move { next.run(req).await }));

    let res = match tokio::time::timeout(app.write_timeout, task).await {
        Ok(Ok(res)) => res,
        Ok(Err(e)) => {
            error!(path = %head.path, "handler failed: {e}");
            return app
                .pipeline
                .error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error", &head)
                .into_http();
        }
        Err(_) => {
            warn!(path = %head.path, timeout = ?app.write_timeout, "request timed out");
            return app
                .pipeline
                .error_response(StatusCode::SERVICE_UNAVAILABLE, "request timed out", &head)
                .into_http();
        }
    };

    let res = if res.is_written() {
        res
    } else {
        let mut head = head;
        head.adopt_request_id(&res);
        app.pipeline.finish(res, &ctx, &head)
    };
    res.into_http()
}

/// A spawned handler that is aborted when dropped.
///
/// Dispatch is dropped when the write timeout fires, when the client goes
/// away, and when a forced shutdown aborts the connection. The handler must
/// not outlive it in any of those cases.
struct HandlerTask(JoinHandle<Response>);

impl Future for HandlerTask {
    type Output = Result<Response, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl Drop for HandlerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on SIGTERM or SIGINT (Ctrl-C). On Windows only Ctrl-C is
/// available. A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn idle_waits_for_in_flight_requests() {
        let activity = Arc::new(Activity::new());
        let guard = activity.begin();

        let limit = Duration::from_secs(60);
        let idle = tokio::time::timeout(Duration::from_secs(120), activity.idle_for(limit));
        assert!(idle.await.is_err());

        drop(guard);
        let idle = tokio::time::timeout(Duration::from_secs(61), activity.idle_for(limit));
        assert!(idle.await.is_ok());
    }

    #[tokio::test]
    async fn dropping_a_handler_task_aborts_it() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let task = HandlerTask(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Response::pending()
        }));
        let abort = task.0.abort_handle();

        drop(task);
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(abort.is_finished());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_task_yields_the_response() {
        let task = HandlerTask(tokio::spawn(async { Response::text("done") }));
        let res = task.await.unwrap();
        assert_eq!(res.body().as_ref(), b"done");
    }

    #[tokio::test]
    async fn state_starts_built() {
        let server = Server::builder().build().unwrap();
        assert_eq!(*server.state().borrow(), Lifecycle::Built);
    }
}
