use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use tracing::{info, warn};

use crate::cluster::ClusterClient;
use crate::config::ConfigStore;
use crate::discovery;
use crate::errors::Error;
use crate::metrics::{self, PROXY_REQUESTS};
use crate::proxy::{self, AgentProxy};
use crate::status;

/* ============================= STATE ============================= */

pub struct AppState {
    pub store: ConfigStore,
    pub cluster: Arc<dyn ClusterClient>,
    pub proxy: AgentProxy,
    pub ready: Arc<AtomicBool>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/api/v1/healthz", get(healthz))
        .route("/api/v1/readyz", get(readyz))
        .route("/api/v1/namespaces", get(list_namespaces))
        .route("/api/v1/pvcs", get(list_pvcs))
        .route("/api/v1/tree", get(proxy_tree))
        .route("/api/v1/download", get(proxy_download))
        .route("/api/v1/upload", post(proxy_upload))
        .route("/api/v1/file", delete(proxy_delete))
        .route("/api/v1/pvc-status", get(pvc_status))
        .with_state(state)
}

/* ============================= PROBES ============================= */

async fn healthz() -> impl IntoResponse {
    info!("healthz");
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/* ============================= READ APIS ============================= */

/// Listings are computed through the same discovery pass the reconciler
/// uses, so the UI only ever sees what the data plane is serving.
async fn list_namespaces(State(state): State<Arc<AppState>>) -> Response {
    let cfg = state.store.current();
    match discovery::build_targets(state.cluster.as_ref(), &cfg).await {
        Ok(targets) => {
            let names: BTreeSet<String> = targets.into_iter().map(|t| t.namespace).collect();
            axum::Json(names.into_iter().collect::<Vec<_>>()).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn list_pvcs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(ns) = params.get("namespace").filter(|s| !s.is_empty()) else {
        return Error::BadRequest("namespace required".into()).into_response();
    };
    let cfg = state.store.current();
    match discovery::build_targets(state.cluster.as_ref(), &cfg).await {
        Ok(targets) => {
            let mut names: Vec<String> = targets
                .into_iter()
                .filter(|t| &t.namespace == ns)
                .map(|t| t.pvc_name)
                .collect();
            names.sort();
            axum::Json(names).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/* ============================= PROXY ============================= */

async fn proxy_tree(
    state: State<Arc<AppState>>,
    params: Query<HashMap<String, String>>,
    req: Request,
) -> Response {
    proxy_endpoint(state.0, "/v1/tree", params.0, req).await
}

async fn proxy_download(
    state: State<Arc<AppState>>,
    params: Query<HashMap<String, String>>,
    req: Request,
) -> Response {
    proxy_endpoint(state.0, "/v1/file", params.0, req).await
}

async fn proxy_upload(
    state: State<Arc<AppState>>,
    params: Query<HashMap<String, String>>,
    req: Request,
) -> Response {
    proxy_endpoint(state.0, "/v1/upload", params.0, req).await
}

async fn proxy_delete(
    state: State<Arc<AppState>>,
    params: Query<HashMap<String, String>>,
    req: Request,
) -> Response {
    proxy_endpoint(state.0, "/v1/file", params.0, req).await
}

async fn proxy_endpoint(
    state: Arc<AppState>,
    agent_path: &'static str,
    params: HashMap<String, String>,
    req: Request,
) -> Response {
    let (Some(ns), Some(pvc)) = (
        params.get("ns").filter(|s| !s.is_empty()).cloned(),
        params.get("pvc").filter(|s| !s.is_empty()).cloned(),
    ) else {
        return Error::BadRequest("ns and pvc required".into()).into_response();
    };

    PROXY_REQUESTS.with_label_values(&[agent_path]).inc();

    let cfg = state.store.current();
    info!(ns = %ns, pvc = %pvc, endpoint = %agent_path, "proxying");

    let route = proxy::compute_routing(state.cluster.as_ref(), &cfg, &ns, &pvc, &params).await;

    let (parts, body) = req.into_parts();
    match state
        .proxy
        .forward(&ns, &route, agent_path, parts.method, &parts.headers, body)
        .await
    {
        Ok(resp) => resp.into_response(),
        Err(e) => {
            warn!(ns = %ns, pvc = %pvc, svc = %route.service, error = %e, "proxy_failed");
            (StatusCode::BAD_GATEWAY, "agent unavailable").into_response()
        }
    }
}

/* ============================= STATUS ============================= */

async fn pvc_status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let (Some(ns), Some(pvc)) = (params.get("ns"), params.get("pvc")) else {
        return Error::BadRequest("ns and pvc required".into()).into_response();
    };
    let cfg = state.store.current();
    let st = status::pvc_status(state.cluster.as_ref(), &cfg, ns, pvc).await;
    axum::Json(st).into_response()
}

/* ============================= METRICS ============================= */

async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics encoding error",
        )
            .into_response(),
    }
}
