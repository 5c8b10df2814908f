//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! A [`Response`] is in one of two states:
//!
//! - **written** — the handler produced bytes itself (`Response::json`,
//!   `Response::text`, the builder). The pipeline passes these through.
//! - **pending** — nothing was written; the body is resolved later from the
//!   request's [`ResponseContext`](crate::ResponseContext) and any outcomes
//!   the response carries. This is what `()`, [`Outcome`] and the helper
//!   constructors in [`responses`](crate::responses) produce.

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::Full;

use crate::outcome::Outcome;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
pub enum ContentType {
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Raw bytes (passed through by the JSON pipeline)
///
/// ```rust
/// use servekit::Response;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use servekit::{ContentType, Response};
/// use servekit::http::{header, HeaderValue, StatusCode};
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header(header::LOCATION, HeaderValue::from_static("/users/42"))
///     .json(br#"{"id":42}"#.to_vec());
///
/// Response::builder().bytes(ContentType::Xml, b"<ok/>".to_vec());
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) written: bool,
    pub(crate) outcomes: Vec<Outcome>,
}

impl Response {
    /// `200 OK` — `application/json`, written as-is.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK` — `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// A response with nothing written. Resolved from the request context.
    pub fn pending() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            written: false,
            outcomes: Vec::new(),
        }
    }

    /// A pending response carrying outcomes for the pipeline to record.
    pub fn outcomes(outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        let mut res = Self::pending();
        res.outcomes.extend(outcomes);
        res
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &Bytes { &self.body }

    /// `true` once bytes have been written; the pipeline will not rewrite it.
    pub fn is_written(&self) -> bool { self.written }

    pub(crate) fn content_type(&self) -> Option<&str> {
        self.headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// Writes a JSON body with the given content type. Marks the response written.
    pub(crate) fn write_json(
        &mut self,
        status: StatusCode,
        content_type: &HeaderValue,
        body: Vec<u8>,
    ) {
        self.status = status;
        self.headers.insert(header::CONTENT_TYPE, content_type.clone());
        self.headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        self.body = Bytes::from(body);
        self.written = true;
    }

    /// Writes a status with no body. Marks the response written.
    pub(crate) fn write_empty(&mut self, status: StatusCode) {
        self.status = status;
        self.body = Bytes::new();
        self.written = true;
    }

    pub(crate) fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for written [`Response`]s.
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method — you always know what you're sending.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish(ContentType::Json.as_str(), body.into())
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(ContentType::Text.as_str(), Bytes::from(body.into()))
    }

    /// Terminate with a typed body.
    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.finish(content_type.as_str(), body.into())
    }

    /// Terminate with raw bytes and no content type.
    pub fn raw(self, body: impl Into<Bytes>) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body: body.into(),
            written: true,
            outcomes: Vec::new(),
        }
    }

    /// Terminate with no body (e.g. `204 No Content`).
    pub fn no_body(self) -> Response {
        self.raw(Bytes::new())
    }

    fn finish(mut self, content_type: &'static str, body: Bytes) -> Response {
        self.headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.raw(body)
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

/// Nothing returned: the outcome is whatever the handler recorded in the context.
impl IntoResponse for () {
    fn into_response(self) -> Response { Response::pending() }
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response { Response::outcomes([self]) }
}

impl IntoResponse for (StatusCode, Outcome) {
    fn into_response(self) -> Response {
        Response::outcomes([Outcome::Status(self.0), self.1])
    }
}

/// Return a status directly from a handler: `return StatusCode::NO_CONTENT`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::outcomes([Outcome::Status(self)]) }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

impl<T, E> IntoResponse for Result<T, E>
where
    T: IntoResponse,
    E: IntoResponse,
{
    fn into_response(self) -> Response {
        match self {
            Ok(v)  => v.into_response(),
            Err(e) => e.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_constructors_are_written() {
        let res = Response::json(r#"{"a":1}"#);
        assert!(res.is_written());
        assert_eq!(res.content_type(), Some("application/json"));

        let res = Response::builder().status(StatusCode::ACCEPTED).no_body();
        assert!(res.is_written());
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn outcome_values_stay_pending() {
        let res = (StatusCode::CREATED, Outcome::data(1)).into_response();
        assert!(!res.is_written());
        assert_eq!(
            res.outcomes,
            vec![Outcome::Status(StatusCode::CREATED), Outcome::data(1)]
        );

        assert!(!().into_response().is_written());
    }

    #[test]
    fn result_picks_the_matching_side() {
        let ok: Result<&'static str, Outcome> = Ok("fine");
        assert!(ok.into_response().is_written());

        let err: Result<&'static str, Outcome> = Err(Outcome::error("bad"));
        assert_eq!(err.into_response().outcomes, vec![Outcome::error("bad")]);
    }
}
