//! HTTP control API
//!
//! Raw event ingest, token registration, region management, health and
//! Prometheus metrics on one hyper HTTP/1.1 listener.

use crate::domain::types::{DropReason, PushToken, Region};
use crate::infra::metrics::Metrics;
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::dispatcher::{Dispatcher, IngestOutcome};
use crate::services::registry::RegistryError;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Largest accepted request body (64 KiB)
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared state behind every request
pub struct ApiState {
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<Metrics>,
    pub site_id: String,
}

#[derive(Deserialize)]
struct TokenRequest {
    value: String,
}

type ApiResponse = Response<Full<Bytes>>;

fn empty(status: StatusCode) -> ApiResponse {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .expect("static response should not fail")
}

fn json_response(status: StatusCode, body: serde_json::Value) -> ApiResponse {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

fn error_response(status: StatusCode, error: &str) -> ApiResponse {
    json_response(status, json!({ "ok": false, "error": error }))
}

/// Collect a request body, refusing anything over `MAX_BODY_BYTES`
async fn read_body<B>(body: B) -> Result<Bytes, ApiResponse>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(error_response(StatusCode::PAYLOAD_TOO_LARGE, "body_too_large"))
        }
        Err(e) => {
            warn!(error = %e, "http_body_read_error");
            Err(error_response(StatusCode::BAD_REQUEST, "unreadable_body"))
        }
    }
}

fn post_event(body: &[u8], state: &ApiState) -> ApiResponse {
    let outcome = state.dispatcher.on_raw_payload(body);
    if let IngestOutcome::Dropped(DropReason::Malformed(err)) = &outcome {
        return json_response(
            StatusCode::BAD_REQUEST,
            json!({ "ok": false, "error": "malformed", "detail": err }),
        );
    }

    json_response(
        StatusCode::ACCEPTED,
        json!({ "outcome": outcome.as_str(), "reason": outcome.reason() }),
    )
}

fn put_token(body: &[u8], state: &ApiState) -> ApiResponse {
    let request: TokenRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "malformed"),
    };

    let value = request.value.trim();
    if value.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty_token");
    }

    state.dispatcher.tokens().set(PushToken::new(value));
    empty(StatusCode::NO_CONTENT)
}

fn post_region(body: &[u8], state: &ApiState) -> ApiResponse {
    let region: Region = match serde_json::from_slice(body) {
        Ok(region) => region,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "malformed"),
    };

    match state.dispatcher.registry().register(region) {
        Ok(()) => empty(StatusCode::CREATED),
        Err(e @ RegistryError::DuplicateIdentifier(_)) => {
            error_response(StatusCode::CONFLICT, &e.to_string())
        }
        Err(e) => error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()),
    }
}

fn get_regions(state: &ApiState) -> ApiResponse {
    let regions = state.dispatcher.registry().snapshot();
    let regions: Vec<&Region> = regions.iter().map(|r| &**r).collect();
    json_response(StatusCode::OK, json!(regions))
}

fn delete_region(encoded_id: &str, state: &ApiState) -> ApiResponse {
    let identifier = percent_decode_str(encoded_id).decode_utf8_lossy();
    if state.dispatcher.registry().deregister(&identifier) {
        info!(region = %identifier, "region_deregistered_via_api");
    }
    empty(StatusCode::NO_CONTENT)
}

fn get_health(state: &ApiState) -> ApiResponse {
    json_response(
        StatusCode::OK,
        json!({
            "ok": true,
            "regions": state.dispatcher.registry().len(),
            "token": state.dispatcher.tokens().is_present(),
        }),
    )
}

fn get_metrics(state: &ApiState) -> ApiResponse {
    let body = format_prometheus_metrics(
        &state.metrics,
        state.dispatcher.registry().len(),
        state.dispatcher.tokens().is_present(),
        &state.site_id,
    );
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

/// Route one request
pub async fn handle_request<B>(req: Request<B>, state: Arc<ApiState>) -> ApiResponse
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let needs_body = matches!(
        (&method, path.as_str()),
        (&Method::POST, "/events") | (&Method::PUT, "/token") | (&Method::POST, "/regions")
    );
    let body = if needs_body {
        match read_body(req.into_body()).await {
            Ok(body) => body,
            Err(response) => return response,
        }
    } else {
        Bytes::new()
    };

    match (&method, path.as_str()) {
        (&Method::POST, "/events") => post_event(&body, &state),
        (&Method::PUT, "/token") => put_token(&body, &state),
        (&Method::DELETE, "/token") => {
            state.dispatcher.tokens().clear();
            empty(StatusCode::NO_CONTENT)
        }
        (&Method::GET, "/regions") => get_regions(&state),
        (&Method::POST, "/regions") => post_region(&body, &state),
        (&Method::DELETE, p) if p.starts_with("/regions/") && p.len() > "/regions/".len() => {
            delete_region(&p["/regions/".len()..], &state)
        }
        (&Method::GET, "/metrics") => get_metrics(&state),
        (&Method::GET, "/health") => get_health(&state),
        _ => error_response(StatusCode::NOT_FOUND, "not_found"),
    }
}

/// Bind `bind_address:port` and serve until shutdown
pub async fn start_http_api(
    bind_address: &str,
    port: u16,
    state: Arc<ApiState>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind((bind_address, port)).await?;
    info!(bind = %bind_address, port = %port, site = %state.site_id, "http_api_started");
    serve(listener, state, shutdown).await
}

/// Serve on an already-bound listener
pub async fn serve(
    listener: TcpListener,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { Ok::<_, Infallible>(handle_request(req, state).await) }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_api_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_api_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("http_api_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
