//! HTTP front door: `/graphql`, `/health` and `/metrics`.

use std::collections::HashMap;
use std::convert::Infallible;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::GraphQLRequest;
use crate::execution::GraphQLResponse;
use crate::gateway::Gateway;
use crate::resolve::RequestContext;

type ResponseBody = BoxBody<Bytes, hyper::Error>;

// Create a response body from a string
fn full<T: Into<Bytes>>(value: T) -> ResponseBody {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

pub async fn handle_request(
    req: Request<Incoming>,
    gateway: Gateway,
) -> Result<Response<ResponseBody>, Infallible> {
    let auth_headers = extract_auth_headers(&req);

    let result = match (req.method(), req.uri().path()) {
        (&Method::POST, "/graphql") => {
            let body_bytes = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read request body");
                    return Ok(text_response(StatusCode::BAD_REQUEST, "Failed to read request body"));
                }
            };

            match serde_json::from_slice::<GraphQLRequest>(&body_bytes) {
                Ok(mut graphql_req) => {
                    graphql_req.auth_headers = auth_headers;

                    match gateway.process_request(graphql_req).await {
                        Ok(response) => json_response(StatusCode::OK, &response),
                        Err(e) => json_response(
                            StatusCode::SERVICE_UNAVAILABLE,
                            &GraphQLResponse::request_error(e.to_string()),
                        ),
                    }
                }
                Err(e) => text_response(StatusCode::BAD_REQUEST, format!("Invalid JSON request: {e}")),
            }
        }

        (&Method::GET, "/health") => Response::builder()
            .header("Content-Type", "application/json")
            .header("Access-Control-Allow-Origin", "*")
            .body(full("true"))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::GET, "/metrics") => match gateway.metrics().as_text() {
            Some(text) => Response::builder()
                .header("Content-Type", "text/plain; version=0.0.4")
                .body(full(text))
                .unwrap_or_else(|_| internal_server_error()),
            None => internal_server_error(),
        },

        (&Method::OPTIONS, _) => Response::builder()
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header(
                "Access-Control-Allow-Headers",
                "Content-Type, Authorization, x-api-key, x-token",
            )
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(result)
}

fn json_response(status: StatusCode, response: &GraphQLResponse) -> Response<ResponseBody> {
    let json = match serde_json::to_string(response) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize response");
            return internal_server_error();
        }
    };
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(full(json))
        .unwrap_or_else(|_| internal_server_error())
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ResponseBody> {
    Response::builder()
        .status(status)
        .header("Access-Control-Allow-Origin", "*")
        .body(full(body))
        .unwrap_or_else(|_| internal_server_error())
}

// Create a standard internal server error response
fn internal_server_error() -> Response<ResponseBody> {
    let mut response = Response::new(full("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

// Extract the headers forwarded to upstreams
fn extract_auth_headers<B>(req: &Request<B>) -> Option<HashMap<String, String>> {
    let auth_headers: HashMap<String, String> = RequestContext::FORWARDED_HEADERS
        .iter()
        .filter_map(|name| {
            let value = req.headers().get(*name)?.to_str().ok()?;
            Some((name.to_string(), value.to_string()))
        })
        .collect();

    if auth_headers.is_empty() {
        None
    } else {
        Some(auth_headers)
    }
}

#[derive(Clone)]
// An Executor that uses the tokio runtime.
pub struct TokioExecutor;

impl<F> hyper::rt::Executor<F> for TokioExecutor
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::task::spawn(fut);
    }
}

/// Accepts connections until `cancel` fires. Connections already open are
/// served to completion in their own tasks.
pub async fn serve(listener: TcpListener, gateway: Gateway, cancel: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "gateway listening");
    }

    loop {
        let (stream, remote) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
        let io = TokioIo::new(stream);
        let gateway = gateway.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| handle_request(req, gateway.clone()));

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor)
                .serve_connection(io, service)
                .await
            {
                tracing::debug!(%remote, error = %e, "error processing connection");
            }
        });
    }

    tracing::info!("gateway stopped accepting connections");
    Ok(())
}
