//! Shorthand constructors for the common outcomes.
//!
//! Each returns a pending [`Response`] carrying an outcome plus an explicit
//! status, so the JSON pipeline renders the envelope:
//!
//! ```rust
//! use servekit::{Request, Response, responses};
//!
//! async fn find(req: Request) -> Response {
//!     match req.query() {
//!         Some(q) => responses::ok(q),
//!         None    => responses::bad_request("missing query"),
//!     }
//! }
//! ```

use http::StatusCode;
use serde::Serialize;

use crate::outcome::Outcome;
use crate::response::Response;

fn data(status: StatusCode, data: impl Serialize) -> Response {
    Response::outcomes([Outcome::Status(status), Outcome::data(data)])
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    Response::outcomes([Outcome::Status(status), Outcome::error(message)])
}

/// `200 OK` with `data`.
pub fn ok(payload: impl Serialize) -> Response {
    data(StatusCode::OK, payload)
}

/// `201 Created` with `data`.
pub fn created(payload: impl Serialize) -> Response {
    data(StatusCode::CREATED, payload)
}

/// `204 No Content`, no body.
pub fn no_content() -> Response {
    Response::outcomes([Outcome::Status(StatusCode::NO_CONTENT)])
}

pub fn bad_request(message: impl Into<String>) -> Response {
    error(StatusCode::BAD_REQUEST, message)
}

pub fn unauthorized(message: impl Into<String>) -> Response {
    error(StatusCode::UNAUTHORIZED, message)
}

pub fn forbidden(message: impl Into<String>) -> Response {
    error(StatusCode::FORBIDDEN, message)
}

pub fn not_found(message: impl Into<String>) -> Response {
    error(StatusCode::NOT_FOUND, message)
}

pub fn internal_error(message: impl Into<String>) -> Response {
    error(StatusCode::INTERNAL_SERVER_ERROR, message)
}
