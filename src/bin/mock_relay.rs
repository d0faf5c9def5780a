//! Mock push relay
//!
//! Stands in for the push-relay service during local runs.
//!
//! Behavior:
//! 1. Listens on a configurable port (default 4000)
//! 2. Answers `POST /send` and logs every message it receives
//! 3. The first `--fail-first` requests get `--fail-status`, later ones 200
//!
//! Usage:
//!   cargo run --bin mock-relay -- --port 4000 --fail-first 2 --fail-status 503
//!
//! Then point the daemon at it with `[relay] url = "http://localhost:4000/send"`.

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "mock-relay")]
#[command(about = "Mock push relay for local testing")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "4000")]
    port: u16,

    /// Number of initial requests to fail
    #[arg(long, default_value = "0")]
    fail_first: u64,

    /// Status returned for the failed requests (5xx = transient, 4xx = rejected)
    #[arg(long, default_value = "500")]
    fail_status: u16,
}

struct RelayState {
    received: AtomicU64,
    fail_first: u64,
    fail_status: StatusCode,
}

fn respond(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<RelayState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::POST || req.uri().path() != "/send" {
        return Ok(respond(StatusCode::NOT_FOUND, r#"{"errors":["not found"]}"#.to_string()));
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "mock_relay_body_error");
            return Ok(respond(StatusCode::BAD_REQUEST, r#"{"errors":["bad body"]}"#.to_string()));
        }
    };

    let n = state.received.fetch_add(1, Ordering::Relaxed) + 1;
    let message: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!(request = %n, error = %e, "mock_relay_invalid_json");
            return Ok(respond(StatusCode::BAD_REQUEST, r#"{"errors":["invalid json"]}"#.to_string()));
        }
    };

    info!(
        request = %n,
        to = %message["to"],
        title = %message["title"],
        data = %message["data"],
        "mock_relay_received"
    );

    if n <= state.fail_first {
        warn!(request = %n, status = %state.fail_status.as_u16(), "mock_relay_scripted_failure");
        let body = serde_json::json!({ "errors": [{ "code": "SCRIPTED_FAILURE" }] });
        return Ok(respond(state.fail_status, body.to_string()));
    }

    let body = serde_json::json!({ "data": { "status": "ok", "id": Uuid::now_v7().to_string() } });
    Ok(respond(StatusCode::OK, body.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let fail_status = StatusCode::from_u16(args.fail_status)?;
    let state = Arc::new(RelayState { received: AtomicU64::new(0), fail_first: args.fail_first, fail_status });

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!(
        port = %args.port,
        fail_first = %args.fail_first,
        fail_status = %args.fail_status,
        "mock_relay_listening"
    );

    loop {
        let (stream, _peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %e, "mock_relay_http_error");
            }
        });
    }
}
