//! Three endpoints behind logging and the JSON envelope.
//!
//! Run with:
//!   APP_PORT=3000 cargo run --example hello
//!
//! Try:
//!   curl http://localhost:3000/hello
//!   curl http://localhost:3000/demo -H 'user-agent: curl'
//!   curl -X POST http://localhost:3000/echo -d 'abc'
//!   curl -X POST http://localhost:3000/hello        # 405

use serde_json::json;
use servekit::{ConfigLoader, Request, Response, Route, Server, responses, telemetry};

#[tokio::main]
async fn main() -> Result<(), servekit::Error> {
    let config = ConfigLoader::new().load()?;
    telemetry::init(config.environment);

    let greeting = Route::get("/hello", hello).with_tags(["greeting"]);
    let demo = Route::get("/demo", context_demo)
        .with_meta("description", "request details via the context");

    Server::builder()
        .with_configuration(&config)
        .with_logging(true, true)
        .with_json_serialization()
        .routes([greeting, demo])
        .post("/echo", echo)
        .build()?
        .start()
        .await
}

async fn hello(_req: Request) -> Response {
    responses::ok(json!({ "message": "Hello, World!" }))
}

/// Records its outcome on the request context instead of returning it.
async fn context_demo(req: Request) {
    req.context().set_data(json!({
        "message": "data passed through the context",
        "method": req.method().as_str(),
        "path": req.path(),
        "user_agent": req.header("user-agent"),
        "remote_addr": req.remote_addr().map(|a| a.to_string()),
    }));
}

async fn echo(req: Request) -> Response {
    responses::ok(String::from_utf8_lossy(req.body()))
}
