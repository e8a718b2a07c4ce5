//! Router and request handling for the deploy hook.
//!
//! One route, configured method and path. Everything else resolves to the
//! same `404 Not found` responder without touching the secret. Verified
//! deliveries run the update pipeline to completion and report its outcome;
//! rejected ones get a single indistinguishable `403` no matter why
//! verification failed.

use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{MethodFilter, on},
};
use deployd_pipeline::UpdatePipeline;
use deployd_signature::{SIGNATURE_HEADER, verify_signature};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::DeploydConfig;

#[derive(Clone)]
pub struct AppState {
    secret: Option<String>,
    pipeline: Arc<dyn UpdatePipeline>,
    /// Serializes pipeline runs. Held only around `invoke`, so verification
    /// of unrelated requests never waits on a deploy in flight.
    deploy_gate: Arc<Mutex<()>>,
}

pub fn build_router(
    config: &DeploydConfig,
    pipeline: Arc<dyn UpdatePipeline>,
) -> anyhow::Result<Router> {
    let filter = MethodFilter::try_from(config.hook_method.clone())
        .map_err(|_| anyhow::anyhow!("unsupported hook method {}", config.hook_method))?;
    let state = AppState {
        secret: config.secret.clone(),
        pipeline,
        deploy_gate: Arc::new(Mutex::new(())),
    };
    Ok(Router::new()
        .route(
            &config.hook_path,
            on(filter, handle_hook).fallback(not_found),
        )
        .fallback(not_found)
        .layer(middleware::from_fn(with_request_id))
        .with_state(state))
}

/// Subset of the push payload surfaced in logs after verification.
#[derive(Debug, Deserialize)]
struct PushEvent {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
}

async fn handle_hook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(secret) = state.secret.as_deref() {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        let valid = provided
            .map(|signature| verify_signature(secret, signature, &body).unwrap_or(false))
            .unwrap_or(false);
        if !valid {
            // One response for every rejection reason; detail stays in the log.
            tracing::warn!(
                signature_present = provided.is_some(),
                "rejected hook delivery"
            );
            return (StatusCode::FORBIDDEN, "Invalid signature").into_response();
        }
    }

    if let Ok(event) = serde_json::from_slice::<PushEvent>(&body)
        && let Some(git_ref) = event.git_ref
    {
        tracing::info!(git_ref = %git_ref, "verified push delivery");
    }

    let _gate = state.deploy_gate.lock().await;
    match state.pipeline.invoke().await {
        Ok(output) => {
            tracing::info!(stdout = %output.stdout.trim(), "update pipeline finished");
            (StatusCode::OK, "OK").into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "update pipeline failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Update failed").into_response()
        }
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

/// Tags every response with a fresh `x-request-id`.
async fn with_request_id(req: Request<Body>, next: Next) -> Response {
    let rid = Uuid::new_v4().to_string();
    let mut res = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&rid) {
        res.headers_mut()
            .insert(HeaderName::from_static("x-request-id"), value);
    }
    res
}
