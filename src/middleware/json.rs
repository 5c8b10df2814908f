//! JSON response pipeline.
//!
//! Turns whatever a handler communicated into exactly one JSON response:
//!
//! ```text
//! {"success":true,  "data":<any>,             "timestamp":<unix seconds>}
//! {"success":false, "error_message":<string>, "timestamp":<unix seconds>}
//! ```
//!
//! Resolution order for one request:
//!
//! 1. Outcomes carried by the returned [`Response`] are recorded into the
//!    request's [`ResponseContext`]. Anything the handler recorded itself
//!    was there first and wins.
//! 2. A response the handler already **wrote** is left alone: non-JSON
//!    content types and valid JSON pass through verbatim, and only bytes
//!    claiming to be JSON (or carrying no content type) that do not parse
//!    are wrapped as a text `data` value.
//! 3. Otherwise the context decides: `Error` → error envelope, 500 unless a
//!    status was recorded; `Data` → success envelope, 200 unless a status
//!    was recorded; nothing → empty body with the recorded status or 200.
//! 4. If the payload cannot be serialized the response becomes a fixed
//!    internal-error envelope. Building that one cannot fail.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use http::header::HeaderValue;
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{Middleware, REQUEST_ID_HEADER};
use crate::handler::Next;
use crate::outcome::{ResponseContext, Settled};
use crate::request::Request;
use crate::response::Response;

const DEFAULT_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const FALLBACK_MESSAGE: &str = "internal server error: response could not be serialized";

/// Replaces the error envelope. Receives the error message.
pub type ErrorWrapper = Arc<dyn Fn(&str, &RequestHead) -> Value + Send + Sync + 'static>;

/// Replaces the success envelope. Receives the data value.
pub type SuccessWrapper = Arc<dyn Fn(&Value, &RequestHead) -> Value + Send + Sync + 'static>;

/// What the pipeline remembers about a request after handing it inward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHead {
    pub method: http::Method,
    pub path: String,
    pub request_id: Option<String>,
}

impl RequestHead {
    pub fn of(req: &Request) -> Self {
        Self {
            method: req.method().into(),
            path: req.path().to_owned(),
            request_id: req.request_id().map(str::to_owned),
        }
    }

    /// Takes the request id from the response's `x-request-id` header when
    /// it was assigned further in, after this head was captured.
    pub(crate) fn adopt_request_id(&mut self, res: &Response) {
        if self.request_id.is_none() {
            self.request_id = res
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
        }
    }
}

/// The standard wire envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

// ── JsonConfig ────────────────────────────────────────────────────────────────

/// Serialization options for [`JsonPipeline`].
///
/// Defaults: compact output, timestamps on, raw-text wrapping on,
/// `application/json; charset=utf-8`, no custom wrappers.
#[derive(Clone)]
pub struct JsonConfig {
    pretty: bool,
    include_timestamp: bool,
    wrap_single_values: bool,
    error_wrapper: Option<ErrorWrapper>,
    success_wrapper: Option<SuccessWrapper>,
    content_type: String,
}

impl Default for JsonConfig {
    fn default() -> Self {
        Self {
            pretty: false,
            include_timestamp: true,
            wrap_single_values: true,
            error_wrapper: None,
            success_wrapper: None,
            content_type: DEFAULT_CONTENT_TYPE.to_owned(),
        }
    }
}

impl JsonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty(mut self, on: bool) -> Self {
        self.pretty = on;
        self
    }

    pub fn include_timestamp(mut self, on: bool) -> Self {
        self.include_timestamp = on;
        self
    }

    /// Wrap written non-JSON bytes as a text `data` value.
    pub fn wrap_single_values(mut self, on: bool) -> Self {
        self.wrap_single_values = on;
        self
    }

    pub fn error_wrapper<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &RequestHead) -> Value + Send + Sync + 'static,
    {
        self.error_wrapper = Some(Arc::new(f));
        self
    }

    pub fn success_wrapper<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, &RequestHead) -> Value + Send + Sync + 'static,
    {
        self.success_wrapper = Some(Arc::new(f));
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

impl fmt::Debug for JsonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonConfig")
            .field("pretty", &self.pretty)
            .field("include_timestamp", &self.include_timestamp)
            .field("wrap_single_values", &self.wrap_single_values)
            .field("error_wrapper", &self.error_wrapper.is_some())
            .field("success_wrapper", &self.success_wrapper.is_some())
            .field("content_type", &self.content_type)
            .finish()
    }
}

// ── JsonPipeline ──────────────────────────────────────────────────────────────

/// The terminal serialization stage.
#[derive(Clone, Debug)]
pub struct JsonPipeline {
    config: Arc<JsonConfig>,
    content_type: HeaderValue,
}

impl Default for JsonPipeline {
    fn default() -> Self {
        Self::new(JsonConfig::default())
    }
}

impl JsonPipeline {
    pub fn new(config: JsonConfig) -> Self {
        let content_type = HeaderValue::from_str(&config.content_type).unwrap_or_else(|_| {
            warn!(content_type = %config.content_type, "invalid content type, using default");
            HeaderValue::from_static(DEFAULT_CONTENT_TYPE)
        });
        Self { config: Arc::new(config), content_type }
    }

    /// Wraps `next` so its result is resolved into a JSON response.
    pub fn wrap(&self, next: Next) -> Next {
        let pipeline = self.clone();
        super::from_fn(move |req: Request, next: Next| {
            let pipeline = pipeline.clone();
            async move {
                let mut head = RequestHead::of(&req);
                let ctx = req.context().clone();
                let res = next.run(req).await;
                head.adopt_request_id(&res);
                pipeline.finish(res, &ctx, &head)
            }
        })(next)
    }

    /// This pipeline as a global middleware named `JSONSerialization`.
    pub fn into_middleware(self) -> Middleware {
        Middleware::new("JSONSerialization", move |next| self.wrap(next))
    }

    /// Resolves `res` against the request's context. Idempotent: a response
    /// that comes back written is never rewritten by a later call.
    pub fn finish(&self, mut res: Response, ctx: &ResponseContext, head: &RequestHead) -> Response {
        for outcome in res.outcomes.drain(..) {
            if !ctx.set(outcome) {
                debug!(path = %head.path, "outcome already recorded, ignoring later one");
            }
        }

        if res.is_written() {
            if ctx.is_settled() {
                debug!(path = %head.path, "response already written, recorded outcome ignored");
            }
            return self.pass_through(res);
        }

        let explicit = ctx.status();
        match ctx.settled() {
            Some(Settled::Error(message)) => {
                let status = explicit.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                let body = self.error_body(message, head);
                self.write(res, status, body)
            }
            Some(Settled::Data(payload)) => match payload.as_result() {
                Ok(value) => {
                    let status = explicit.unwrap_or(StatusCode::OK);
                    let body = self.success_body(value, head);
                    self.write(res, status, body)
                }
                Err(e) => {
                    error!(path = %head.path, error = %e, "response data is not valid JSON");
                    self.write_fallback(res)
                }
            },
            None => {
                res.write_empty(explicit.unwrap_or(StatusCode::OK));
                res
            }
        }
    }

    fn pass_through(&self, res: Response) -> Response {
        if !self.config.wrap_single_values || res.body().is_empty() {
            return res;
        }
        let json_typed = match res.content_type() {
            None     => true,
            Some(ct) => is_json_content_type(ct),
        };
        if !json_typed || serde_json::from_slice::<serde::de::IgnoredAny>(res.body()).is_ok() {
            return res;
        }

        let text = Value::String(String::from_utf8_lossy(res.body()).into_owned());
        let status = res.status();
        let body = self.serialize(&Envelope {
            success: true,
            data: Some(&text),
            error_message: None,
            timestamp: self.timestamp(),
        });
        self.write(res, status, body)
    }

    fn success_body(&self, value: &Value, head: &RequestHead) -> serde_json::Result<Vec<u8>> {
        match &self.config.success_wrapper {
            Some(wrap) => self.serialize(&wrap(value, head)),
            None => self.serialize(&Envelope {
                success: true,
                data: Some(value),
                error_message: None,
                timestamp: self.timestamp(),
            }),
        }
    }

    fn error_body(&self, message: &str, head: &RequestHead) -> serde_json::Result<Vec<u8>> {
        match &self.config.error_wrapper {
            Some(wrap) => self.serialize(&wrap(message, head)),
            None => self.serialize(&Envelope {
                success: false,
                data: None,
                error_message: Some(message),
                timestamp: self.timestamp(),
            }),
        }
    }

    fn serialize<T: Serialize>(&self, value: &T) -> serde_json::Result<Vec<u8>> {
        if self.config.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        }
    }

    fn write(
        &self,
        mut res: Response,
        status: StatusCode,
        body: serde_json::Result<Vec<u8>>,
    ) -> Response {
        match body {
            Ok(body) => {
                res.write_json(status, &self.content_type, body);
                res
            }
            Err(e) => {
                error!(error = %e, "response serialization failed");
                self.write_fallback(res)
            }
        }
    }

    fn write_fallback(&self, mut res: Response) -> Response {
        let body = fallback_body(unix_now());
        res.write_json(StatusCode::INTERNAL_SERVER_ERROR, &self.content_type, body);
        res
    }

    /// Error envelope for responses produced outside any handler (404, 405, timeouts).
    pub(crate) fn error_response(
        &self,
        status: StatusCode,
        message: &str,
        head: &RequestHead,
    ) -> Response {
        self.write(Response::pending(), status, self.error_body(message, head))
    }

    fn timestamp(&self) -> Option<i64> {
        self.config.include_timestamp.then(unix_now)
    }
}

fn is_json_content_type(ct: &str) -> bool {
    let essence = ct.split(';').next().unwrap_or_default().trim();
    essence.eq_ignore_ascii_case("application/json") || essence.ends_with("+json")
}

/// The envelope of last resort. Formatting a literal with an integer cannot fail.
fn fallback_body(timestamp: i64) -> Vec<u8> {
    format!(r#"{{"success":false,"error_message":"{FALLBACK_MESSAGE}","timestamp":{timestamp}}}"#)
        .into_bytes()
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use http::header;
    use serde_json::json;

    use super::*;
    use crate::outcome::Outcome;
    use crate::response::{ContentType, IntoResponse};
    use crate::responses;

    fn head() -> RequestHead {
        RequestHead { method: http::Method::GET, path: "/t".into(), request_id: None }
    }

    fn resolve(
        pipeline: &JsonPipeline,
        res: Response,
        ctx: &ResponseContext,
    ) -> (StatusCode, Value) {
        let res = pipeline.finish(res, ctx, &head());
        assert_eq!(
            res.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
        assert_eq!(res.headers().get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
        (res.status(), serde_json::from_slice(res.body()).unwrap())
    }

    #[test]
    fn data_becomes_a_success_envelope() {
        let before = unix_now();
        let ctx = ResponseContext::new();
        ctx.set_data(json!({"x": 1}));

        let (status, body) = resolve(&JsonPipeline::default(), Response::pending(), &ctx);

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"], json!({"x": 1}));
        assert!(body["timestamp"].as_i64().unwrap() >= before);
    }

    #[test]
    fn error_becomes_a_500_unless_status_was_set() {
        let ctx = ResponseContext::new();
        let res = Outcome::error("boom").into_response();
        let (status, body) = resolve(&JsonPipeline::default(), res, &ctx);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error_message"], json!("boom"));

        let ctx = ResponseContext::new();
        let (status, _) = resolve(&JsonPipeline::default(), responses::not_found("gone"), &ctx);
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn context_outcome_beats_returned_outcome() {
        let ctx = ResponseContext::new();
        ctx.set_error("recorded first");
        let (_, body) = resolve(&JsonPipeline::default(), responses::ok("returned"), &ctx);
        assert_eq!(body["error_message"], json!("recorded first"));
    }

    #[test]
    fn written_responses_are_not_rewritten() {
        let pipeline = JsonPipeline::default();
        let ctx = ResponseContext::new();
        ctx.set_data("ignored");

        let text = pipeline.finish(Response::text("plain"), &ctx, &head());
        assert_eq!(text.body().as_ref(), b"plain");
        assert_eq!(text.content_type(), Some("text/plain; charset=utf-8"));

        let json = pipeline.finish(Response::json(r#"{"raw":true}"#), &ctx, &head());
        assert_eq!(json.body().as_ref(), br#"{"raw":true}"#);

        let again = pipeline.finish(json, &ctx, &head());
        assert_eq!(again.body().as_ref(), br#"{"raw":true}"#);
    }

    #[test]
    fn invalid_json_bytes_are_wrapped_as_text() {
        let ctx = ResponseContext::new();
        let res = Response::builder().bytes(ContentType::Json, "not json");
        let (status, body) = resolve(&JsonPipeline::default(), res, &ctx);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!("not json"));

        let off = JsonPipeline::new(JsonConfig::new().wrap_single_values(false));
        let res = off.finish(Response::builder().raw("abc"), &ResponseContext::new(), &head());
        assert_eq!(res.body().as_ref(), b"abc");
    }

    #[test]
    fn unserializable_data_falls_back() {
        let mut bad = HashMap::new();
        bad.insert((1, 2), 3);
        let ctx = ResponseContext::new();
        ctx.set_data(bad);

        let (status, body) = resolve(&JsonPipeline::default(), Response::pending(), &ctx);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error_message"], json!(FALLBACK_MESSAGE));
    }

    #[test]
    fn status_only_has_no_body() {
        let ctx = ResponseContext::new();
        let res = JsonPipeline::default().finish(responses::no_content(), &ctx, &head());
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert!(res.body().is_empty());
        assert!(res.is_written());
    }

    #[test]
    fn wrappers_and_options_apply() {
        let pipeline = JsonPipeline::new(
            JsonConfig::new()
                .include_timestamp(false)
                .pretty(true)
                .success_wrapper(|v, head| json!({"ok": v, "path": head.path}))
                .error_wrapper(|m, _| json!({"problem": m})),
        );

        let ctx = ResponseContext::new();
        ctx.set_data(7);
        let res = pipeline.finish(Response::pending(), &ctx, &head());
        assert!(res.body().contains(&b'\n'));
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body, json!({"ok": 7, "path": "/t"}));

        let ctx = ResponseContext::new();
        ctx.set_error("bad");
        let res = pipeline.finish(Response::pending(), &ctx, &head());
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body, json!({"problem": "bad"}));

        let plain = JsonPipeline::new(JsonConfig::new().include_timestamp(false));
        let ctx = ResponseContext::new();
        ctx.set_data(1);
        let res = plain.finish(Response::pending(), &ctx, &head());
        assert_eq!(res.body().as_ref(), br#"{"success":true,"data":1}"#);
    }

    #[test]
    fn fallback_literal_is_valid_json() {
        let body: Value = serde_json::from_slice(&fallback_body(42)).unwrap();
        assert_eq!(body["timestamp"], json!(42));
    }

    #[test]
    fn json_content_type_detection() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("Application/JSON; charset=utf-8"));
        assert!(is_json_content_type("application/problem+json"));
        assert!(!is_json_content_type("text/plain"));
    }

    #[tokio::test]
    async fn wrappers_see_a_request_id_assigned_further_in() {
        use crate::method::Method;
        use crate::middleware::{compose, logging};
        use crate::route::Route;

        let pipeline = JsonPipeline::new(
            JsonConfig::new().success_wrapper(|v, head| json!({"data": v, "id": head.request_id})),
        );
        let route = Route::get("/t", |_req: Request| async { responses::ok(1) });
        let chain = compose(&[pipeline.into_middleware(), logging(false, false)], &route);

        let res = chain.run(Request::new(Method::Get, "/t")).await;
        let id = res.headers().get(REQUEST_ID_HEADER).unwrap().to_str().unwrap().to_owned();
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["id"], json!(id));
    }
}
