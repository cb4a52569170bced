/// HTTP server setup and routing
use crate::{
    api::retrieve::retrieve_filter,
    context::AppContext,
    error::{AgentError, AgentResult},
};
use axum::{
    http::{header, Method, StatusCode},
    middleware,
    response::Json,
    routing::get,
    Router,
};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Build the main application router
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .merge(crate::api::routes())
        // retrieve paths have no route of their own, the filter needs the fallback wrapped
        .fallback(not_found)
        .with_state(ctx.clone())
        .layer(middleware::from_fn_with_state(ctx, retrieve_filter))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Start the HTTP server and run until a shutdown signal arrives
pub async fn serve(ctx: AppContext) -> AgentResult<()> {
    let addr = ctx.config.bind_address();

    info!("DID agent listening on {}", addr);
    info!("   Methods: {}", ctx.handler.methods().join(", "));
    info!("   Difficulty: {} bits", ctx.handler.difficulty());
    info!("   Storage: {}", ctx.handler.store().description());

    let handler = ctx.handler.clone();
    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AgentError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AgentError::Internal(format!("Server error: {}", e)))?;

    info!("closing storage");
    if let Err(e) = handler.close().await {
        warn!("storage close failed: {}", e);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::retrieve::{BUILD_CODE_HEADER, VERSION_HEADER},
        config::AgentConfig,
        did::{fixtures, Identifier, KeyPair},
        handler::{Handler, HandlerOptions, ProcessRequest},
        storage::Ephemeral,
        ticket::Ticket,
    };
    use axum::{body::Body, http::Request};
    use std::sync::{atomic::AtomicBool, Arc};
    use tower::ServiceExt;

    const DIFFICULTY: u32 = 8;

    fn app() -> Router {
        let config = AgentConfig::from_vars(|_| None).unwrap();
        let handler = Handler::new(HandlerOptions {
            difficulty: DIFFICULTY,
            ..HandlerOptions::new(vec!["algo".to_string()], Arc::new(Ephemeral::open()))
        });
        build_router(AppContext::with_handler(config, handler))
    }

    fn process_body(id: &Identifier, key: &KeyPair) -> String {
        let mut ticket = Ticket::new(id, "master").unwrap();
        let digest = ticket.solve(DIFFICULTY, &AtomicBool::new(false)).unwrap();
        ticket.sign(key, &hex::decode(digest).unwrap());
        serde_json::to_string(&ProcessRequest::new(ticket)).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let (status, _, body) = send(&app(), get("/v1/ping")).await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_process_then_retrieve() {
        let app = app();
        let (id, key) = fixtures::identifier("algo", "abc");

        let (status, _, body) = send(&app, post_json("/v1/process", process_body(&id, &key))).await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["ok"], true);

        let (status, headers, body) = send(&app, get("/v1/retrieve/algo/abc")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert!(headers.contains_key(VERSION_HEADER));
        assert!(headers.contains_key(BUILD_CODE_HEADER));

        use sha2::{Digest, Sha256};
        let etag = format!("W/{}", hex::encode(Sha256::digest(&body)));
        assert_eq!(headers[header::ETAG], etag.as_str());

        let record: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(record["document"]["id"], "did:algo:abc");
        assert!(record.get("proof").is_some());
        assert!(record.get("metadata").is_some());
    }

    #[tokio::test]
    async fn test_retrieve_missing_record() {
        let (status, headers, body) = send(&app(), get("/v1/retrieve/algo/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!headers.contains_key(header::ETAG));
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({ "error": "no information available" }));
    }

    #[tokio::test]
    async fn test_retrieve_unsupported_method() {
        let (status, _, body) = send(&app(), get("/v1/retrieve/other/abc")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "non supported method");
    }

    #[tokio::test]
    async fn test_retrieve_wrong_segment_count_falls_through() {
        let (status, _, body) = send(&app(), get("/v1/retrieve/algo/abc/extra")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["message"], "Endpoint not found");
    }

    #[tokio::test]
    async fn test_process_errors_are_invalid_argument() {
        let (status, _, body) = send(&app(), post_json("/v1/process", "{}".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "InvalidArgument");
        assert_eq!(body["message"], "empty request");
    }

    #[tokio::test]
    async fn test_undecodable_ticket_is_invalid_argument() {
        let req = json!({ "ticket": { "document": "!!notb64" } }).to_string();
        let (status, _, body) = send(&app(), post_json("/v1/process", req)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "InvalidArgument");
        assert!(!body["message"].as_str().unwrap().is_empty());

        let (status, _, _) = send(&app(), post_json("/v1/process", "not json".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_query_is_not_found() {
        let req = json!({ "method": 7 }).to_string();
        let (status, _, body) = send(&app(), post_json("/v1/query", req)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "NotFound");
    }

    #[tokio::test]
    async fn test_query_errors_are_not_found() {
        let req = json!({ "method": "algo", "subject": "abc" }).to_string();
        let (status, _, body) = send(&app(), post_json("/v1/query", req)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "NotFound");
    }

    #[tokio::test]
    async fn test_query_returns_encoded_record() {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        let app = app();
        let (id, key) = fixtures::identifier("algo", "abc");
        send(&app, post_json("/v1/process", process_body(&id, &key))).await;

        let req = json!({ "method": "algo", "subject": "abc" }).to_string();
        let (status, _, body) = send(&app, post_json("/v1/query", req)).await;
        assert_eq!(status, StatusCode::OK);

        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let document = STANDARD.decode(body["document"].as_str().unwrap()).unwrap();
        let document: serde_json::Value = serde_json::from_slice(&document).unwrap();
        assert_eq!(document["id"], "did:algo:abc");
        assert!(body["documentMetadata"].is_string());
    }

    #[tokio::test]
    async fn test_ledger_routes_unavailable_without_client() {
        let (status, _, _) = send(&app(), get("/v1/tx/params")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
