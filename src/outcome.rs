//! Handler outcomes and the request-scoped slot that carries them.
//!
//! A handler has two ways to tell the response pipeline what happened:
//!
//! ```text
//! async fn a(req: Request) -> Response { servekit::ok(data) }   ← return it
//!
//! async fn b(req: Request) {                                    ← or record it
//!     req.context().set_data(data);
//! }
//! ```
//!
//! Both end up in the same [`ResponseContext`]: one payload cell (data *or*
//! error) and one status cell, each settable once. The first writer wins,
//! later writes are ignored and reported as `false`. The terminal pipeline
//! stage is the only reader.

use std::sync::{Arc, OnceLock};

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

// ── Payload ──────────────────────────────────────────────────────────────────

/// Success data, converted to JSON at the moment it is produced.
///
/// Conversion can fail (a map with non-string keys, a `Serialize` impl that
/// errors). The failure is kept rather than surfaced to the handler; the
/// pipeline answers it with the fixed internal-error envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct Payload(Result<Value, String>);

impl Payload {
    pub fn new<T: Serialize>(data: T) -> Self {
        Self(serde_json::to_value(data).map_err(|e| e.to_string()))
    }

    /// The JSON value, or `None` if the data could not be represented.
    pub fn value(&self) -> Option<&Value> {
        self.0.as_ref().ok()
    }

    pub(crate) fn as_result(&self) -> Result<&Value, &str> {
        self.0.as_ref().map_err(String::as_str)
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Self(Ok(v))
    }
}

// ── Outcome ──────────────────────────────────────────────────────────────────

/// The terminal result a handler communicates to the response pipeline.
///
/// `Status` combines with either of the other two: a handler can record
/// `Data` and `Status(201)`, or `Error` and `Status(404)`.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Success. Rendered as `{"success":true,"data":…}`, 200 unless overridden.
    Data(Payload),
    /// Failure. Rendered as `{"success":false,"error_message":…}`, 500 unless overridden.
    Error(String),
    /// Explicit status override.
    Status(StatusCode),
}

impl Outcome {
    pub fn data<T: Serialize>(data: T) -> Self {
        Self::Data(Payload::new(data))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn status(code: StatusCode) -> Self {
        Self::Status(code)
    }
}

// ── ResponseContext ──────────────────────────────────────────────────────────

/// What a settled payload cell holds.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Settled {
    Data(Payload),
    Error(String),
}

#[derive(Debug, Default)]
struct Slot {
    payload: OnceLock<Settled>,
    status: OnceLock<StatusCode>,
}

/// Request-scoped outcome slot.
///
/// Owned by the [`Request`](crate::Request); cloning yields another handle to
/// the same slot, which is how the pipeline keeps reading it after the
/// request has been moved into the handler. Never shared between requests.
#[derive(Clone, Debug, Default)]
pub struct ResponseContext {
    slot: Arc<Slot>,
}

impl ResponseContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `outcome`. Returns `false` if the matching cell was already set.
    pub fn set(&self, outcome: Outcome) -> bool {
        match outcome {
            Outcome::Data(p)   => self.slot.payload.set(Settled::Data(p)).is_ok(),
            Outcome::Error(m)  => self.slot.payload.set(Settled::Error(m)).is_ok(),
            Outcome::Status(s) => self.slot.status.set(s).is_ok(),
        }
    }

    pub fn set_data<T: Serialize>(&self, data: T) -> bool {
        self.set(Outcome::data(data))
    }

    pub fn set_error(&self, message: impl Into<String>) -> bool {
        self.set(Outcome::error(message))
    }

    pub fn set_status(&self, code: StatusCode) -> bool {
        self.set(Outcome::Status(code))
    }

    /// The explicit status, if one was recorded.
    pub fn status(&self) -> Option<StatusCode> {
        self.slot.status.get().copied()
    }

    /// `true` once a data or error outcome has been recorded.
    pub fn is_settled(&self) -> bool {
        self.slot.payload.get().is_some()
    }

    pub(crate) fn settled(&self) -> Option<&Settled> {
        self.slot.payload.get()
    }
}
