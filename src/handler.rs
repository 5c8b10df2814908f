//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! Routes hold handlers of *different* concrete types, and middleware wraps
//! them in yet more types. Everything is erased behind one trait object so
//! the composed chain for a route is a single value:
//!
//! ```text
//! async fn hello(req: Request) -> Response { … }   ← user writes this
//!        ↓ Route::get("/hello", hello)
//! hello.into_next()                                ← Handler blanket impl
//!        ↓
//! Next(Arc::new(FnHandler(hello)))                 ← heap-allocated wrapper
//!        ↓  wrapped by middleware: Next → Next
//! next.run(req)  at request time                   ← one vtable dispatch per layer
//!        ↓
//! Box::pin(async { hello(req).await.into_response() })  ← BoxFuture
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future that resolves to a [`Response`].
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because [`Next::new`]
/// accepts it. Implementing it directly is rarely what you want; reach for
/// [`middleware::from_fn`](crate::middleware::from_fn) instead.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

// ── Next ──────────────────────────────────────────────────────────────────────

/// The rest of a route's handler chain, as seen from a middleware.
///
/// Cheap to clone (one `Arc`). A middleware receives the `Next` it wraps and
/// returns a new one; calling [`Next::run`] hands the request inward.
#[derive(Clone)]
pub struct Next(Arc<dyn ErasedHandler + Send + Sync + 'static>);

impl Next {
    #[doc(hidden)]
    pub fn new(handler: impl ErasedHandler + Send + Sync + 'static) -> Self {
        Self(Arc::new(handler))
    }

    /// Runs the remaining chain for `req`.
    pub fn run(&self, req: Request) -> BoxFuture {
        self.0.call(req)
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next(..)")
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// The trait is **sealed**: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_next(self) -> Next;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_next(self) -> Next {
        Next::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Bridges a concrete handler `F` into the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
