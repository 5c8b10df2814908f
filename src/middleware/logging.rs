//! Request/response logging.

use std::time::Instant;

use http::header::{HeaderName, HeaderValue};
use tracing::info;
use uuid::Uuid;

use super::{Middleware, from_fn};
use crate::handler::Next;
use crate::request::Request;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// A global middleware named `Logging`.
///
/// Every request gets a fresh UUID v4 id, visible to inner middleware and
/// handlers through [`Request::request_id`] and echoed back in the
/// `x-request-id` header. The id lives only in that request.
pub fn logging(log_requests: bool, log_responses: bool) -> Middleware {
    Middleware::new(
        "Logging",
        from_fn(move |mut req: Request, next: Next| async move {
            let id = Uuid::new_v4().to_string();
            req.set_request_id(id.clone());

            let method = req.method();
            let path = req.path().to_owned();
            if log_requests {
                info!(request_id = %id, %method, %path, "request");
            }

            let started = Instant::now();
            let mut res = next.run(req).await;

            if let Ok(value) = HeaderValue::from_str(&id) {
                res.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            if log_responses {
                info!(
                    request_id = %id,
                    %method,
                    %path,
                    status = res.status().as_u16(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "response",
                );
            }
            res
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::fmt;
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use super::*;
    use crate::method::Method;
    use crate::route::Route;

    /// Collects the message of every event.
    #[derive(Clone, Default)]
    struct Messages(Arc<Mutex<Vec<String>>>);

    struct MessageField(Option<String>);

    impl Visit for MessageField {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.0 = Some(format!("{value:?}"));
            }
        }
    }

    impl<S: Subscriber> Layer<S> for Messages {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut field = MessageField(None);
            event.record(&mut field);
            if let Some(message) = field.0 {
                self.0.lock().unwrap().push(message);
            }
        }
    }

    #[tokio::test]
    async fn one_request_and_one_response_event_per_call() {
        let messages = Messages::default();
        let subscriber = tracing_subscriber::registry().with(messages.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let route = Route::get("/log", |_req: Request| async { "ok" });
        let chain = super::super::compose(&[logging(true, true)], &route);
        chain.run(Request::new(Method::Get, "/log")).await;
        chain.run(Request::new(Method::Post, "/log")).await;

        assert_eq!(*messages.0.lock().unwrap(), ["request", "response", "request", "response"]);
    }

    #[tokio::test]
    async fn flags_select_which_events_fire() {
        let messages = Messages::default();
        let subscriber = tracing_subscriber::registry().with(messages.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let route = Route::get("/log", |_req: Request| async { "ok" });
        let chain = super::super::compose(&[logging(false, true)], &route);
        chain.run(Request::new(Method::Get, "/log")).await;

        assert_eq!(*messages.0.lock().unwrap(), ["response"]);
    }

    #[tokio::test]
    async fn assigns_a_fresh_id_per_request() {
        let route = Route::get("/id", |req: Request| async move {
            req.request_id().unwrap_or_default().to_owned()
        });
        let chain = super::super::compose(&[logging(false, false)], &route);

        let a = chain.run(Request::new(Method::Get, "/id")).await;
        let b = chain.run(Request::new(Method::Get, "/id")).await;

        let id_a = a.headers().get(REQUEST_ID_HEADER).unwrap().clone();
        let id_b = b.headers().get(REQUEST_ID_HEADER).unwrap().clone();
        assert_ne!(id_a, id_b);
        assert_eq!(a.body().as_ref(), id_a.as_bytes());
        assert!(Uuid::parse_str(id_a.to_str().unwrap()).is_ok());
    }
}
