/// Custom encoding of `GET /v1/retrieve/{method}/{subject}`
///
/// Runs ahead of the router. Matching requests are answered here with a
/// pretty-printed record and a weak ETag; everything else passes through.
use crate::{context::AppContext, storage::QueryRequest};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use sha2::{Digest, Sha256};

const RETRIEVE_PREFIX: &str = "/v1/retrieve/";

/// Agent version reported on retrieve responses
pub const VERSION_HEADER: &str = "x-agent-version";

/// Build identifier reported on retrieve responses
pub const BUILD_CODE_HEADER: &str = "x-agent-build-code";

fn build_code() -> &'static str {
    option_env!("AGENT_BUILD_CODE").unwrap_or("dev")
}

/// `(method, subject)` when the path has exactly two segments after the prefix
fn parse_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix(RETRIEVE_PREFIX)?;
    let mut segments = rest.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(method), Some(subject), None) => Some((method, subject)),
        _ => None,
    }
}

pub async fn retrieve_filter(State(ctx): State<AppContext>, req: Request, next: Next) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }
    let Some((method, subject)) = parse_path(req.uri().path()) else {
        return next.run(req).await;
    };

    let query = QueryRequest::new(method, subject);
    let (status, body, etag) = match ctx.handler.retrieve(&query).await {
        Ok((id, proof)) => {
            let body = serde_json::to_vec_pretty(&json!({
                "document": id.document(true),
                "proof": proof,
                "metadata": id.metadata(),
            }));
            match body {
                Ok(body) => {
                    let etag = format!("W/{}", hex::encode(Sha256::digest(&body)));
                    (StatusCode::OK, body, Some(etag))
                }
                Err(e) => (StatusCode::NOT_FOUND, error_body(&e.to_string()), None),
            }
        }
        Err(e) => (StatusCode::NOT_FOUND, error_body(&e.to_string()), None),
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(VERSION_HEADER, HeaderValue::from_static(env!("CARGO_PKG_VERSION")));
    headers.insert(BUILD_CODE_HEADER, HeaderValue::from_static(build_code()));
    if let Some(etag) = etag.and_then(|v| HeaderValue::from_str(&v).ok()) {
        headers.insert(header::ETAG, etag);
    }
    response
}

fn error_body(message: &str) -> Vec<u8> {
    serde_json::to_vec_pretty(&json!({ "error": message })).unwrap_or_default()
}
