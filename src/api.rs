use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::manual::{ManualOutcome, ManualTrigger};
use crate::monitor::{Monitor, PushRefused};

#[derive(Clone)]
pub struct AppState {
    pub manual: Arc<ManualTrigger>,
    /// Absent when no subscription monitor was built.
    pub monitor: Option<Monitor>,
    /// Bearer token for operator commands; `None` refuses them all.
    pub admin_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/inbound", post(inbound))
        .route("/admin/force-push", post(force_push))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct InboundReq {
    channel_id: String,
    text: String,
}

#[derive(Debug, Serialize)]
struct InboundResp {
    matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn inbound(State(state): State<AppState>, Json(body): Json<InboundReq>) -> Json<InboundResp> {
    let resp = match state.manual.handle_inbound(&body.channel_id, &body.text).await {
        None => InboundResp {
            matched: false,
            outcome: None,
            reason: None,
        },
        Some(ManualOutcome::Delivered) => InboundResp {
            matched: true,
            outcome: Some("delivered"),
            reason: None,
        },
        Some(ManualOutcome::NothingFound) => InboundResp {
            matched: true,
            outcome: Some("nothing_found"),
            reason: None,
        },
        Some(ManualOutcome::Failed { reason }) => InboundResp {
            matched: true,
            outcome: Some("failed"),
            reason: Some(reason),
        },
    };
    Json(resp)
}

fn authorized(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|t| t.trim() == expected)
}

async fn force_push(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers, state.admin_token.as_deref()) {
        warn!("force-push rejected: bad or missing admin token");
        return (StatusCode::UNAUTHORIZED, "unauthorized".to_string());
    }

    let result = match &state.monitor {
        Some(monitor) => monitor.force_push_all().await,
        None => Err(PushRefused::Disabled),
    };

    match result {
        Ok(summary) => {
            info!(%summary, "force-push done");
            (StatusCode::OK, summary.to_string())
        }
        Err(refused) => (StatusCode::CONFLICT, refused.to_string()),
    }
}
