mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{FakeCluster, base_config, make_pvc, make_ready_pod, namespace_mode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use pvc_viewer::config::{ConfigStore, OverrideSpec, SecuritySpec};
use pvc_viewer::naming;
use pvc_viewer::proxy::{AgentProxy, compute_routing};
use pvc_viewer::security;
use pvc_viewer::server::{AppState, build_router};
use pvc_viewer::status::{PvcStatus, pvc_status};

// ══════════════════════════════════════════════════════════════════
// Routing + status integration tests (no cluster required)
//
// Target-service selection, per-namespace path rewriting, and
// readiness reporting against the in-memory cluster.
// ══════════════════════════════════════════════════════════════════

fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn path_param(route: &pvc_viewer::proxy::Route) -> Option<&str> {
    route
        .params
        .iter()
        .find(|(k, _)| k == "path")
        .map(|(_, v)| v.as_str())
}

fn seeded_cluster() -> Arc<FakeCluster> {
    let cluster = Arc::new(FakeCluster::new());
    cluster.add_namespace("app-a");
    cluster.add_pvc(
        "app-a",
        make_pvc("d1", "app-a", &["ReadWriteMany"], Some("gp3"), None),
    );
    cluster
}

/* ============================= ROUTING ============================= */

#[tokio::test]
async fn test_per_pvc_routing_passes_path_through() {
    let cluster = seeded_cluster();
    let cfg = base_config(&["app-*"], &["gp3"]);

    let route = compute_routing(
        cluster.as_ref(),
        &cfg,
        "app-a",
        "d1",
        &params(&[("ns", "app-a"), ("pvc", "d1"), ("path", "/sub")]),
    )
    .await;

    assert_eq!(route.service, naming::agent_name("app-a", "d1"));
    assert_eq!(path_param(&route), Some("/sub"));
}

#[tokio::test]
async fn test_namespace_routing_rewrites_path_and_targets_group() {
    let cluster = seeded_cluster();
    let cfg = namespace_mode(base_config(&["app-*"], &["gp3"]));

    let route = compute_routing(
        cluster.as_ref(),
        &cfg,
        "app-a",
        "d1",
        &params(&[("ns", "app-a"), ("pvc", "d1"), ("path", "/sub")]),
    )
    .await;

    let key = security::profile_key(&security::resolve(
        &cfg.agents.security_defaults,
        &cfg.agents.security_overrides,
        "d1",
        "gp3",
    ));
    assert_eq!(route.service, naming::namespace_group_agent_name("app-a", &key));
    assert_eq!(path_param(&route), Some("/d1/sub"));
}

#[tokio::test]
async fn test_namespace_routing_follows_security_overrides() {
    let cluster = seeded_cluster();
    let mut cfg = namespace_mode(base_config(&["app-*"], &["gp3"]));
    cfg.agents.security_overrides = vec![OverrideSpec {
        storage_class: "gp3".to_string(),
        pvc_match: None,
        security: SecuritySpec {
            fs_group: Some(4000),
            ..Default::default()
        },
    }];

    let route = compute_routing(cluster.as_ref(), &cfg, "app-a", "d1", &params(&[])).await;

    let expected_key = security::profile_key(&SecuritySpec {
        fs_group: Some(4000),
        ..Default::default()
    });
    assert_eq!(
        route.service,
        naming::namespace_group_agent_name("app-a", &expected_key)
    );
}

#[tokio::test]
async fn test_namespace_routing_unknown_pvc_falls_back_to_legacy_name() {
    let cluster = seeded_cluster();
    let cfg = namespace_mode(base_config(&["app-*"], &["gp3"]));

    let route = compute_routing(
        cluster.as_ref(),
        &cfg,
        "app-a",
        "ghost",
        &params(&[("path", "/x")]),
    )
    .await;

    assert_eq!(route.service, naming::namespace_agent_name("app-a"));
    assert_eq!(path_param(&route), Some("/ghost/x"));
}

/* ============================= STATUS ============================= */

#[tokio::test]
async fn test_status_ready_when_per_pvc_agent_ready() {
    let cluster = seeded_cluster();
    let cfg = base_config(&["app-*"], &["gp3"]);
    cluster.insert_pod(make_ready_pod(&naming::agent_name("app-a", "d1"), "app-a"));

    assert_eq!(
        pvc_status(cluster.as_ref(), &cfg, "app-a", "d1").await,
        PvcStatus::Ready
    );
}

#[tokio::test]
async fn test_status_pending_when_agent_missing_or_unready() {
    let cluster = seeded_cluster();
    let cfg = base_config(&["app-*"], &["gp3"]);

    assert_eq!(
        pvc_status(cluster.as_ref(), &cfg, "app-a", "d1").await,
        PvcStatus::AgentPending
    );

    // present but without a Ready=True condition
    let name = naming::agent_name("app-a", "d1");
    let mut pod = make_ready_pod(&name, "app-a");
    pod.status = None;
    cluster.insert_pod(pod);
    assert_eq!(
        pvc_status(cluster.as_ref(), &cfg, "app-a", "d1").await,
        PvcStatus::AgentPending
    );
}

#[tokio::test]
async fn test_status_resolves_group_agent_in_namespace_mode() {
    let cluster = seeded_cluster();
    let cfg = namespace_mode(base_config(&["app-*"], &["gp3"]));

    let key = security::profile_key(&cfg.agents.security_defaults);
    let name = naming::namespace_group_agent_name("app-a", &key);
    cluster.insert_pod(make_ready_pod(&name, "app-a"));

    assert_eq!(
        pvc_status(cluster.as_ref(), &cfg, "app-a", "d1").await,
        PvcStatus::Ready
    );
}

/* ============================= READ APIS ============================= */

fn app_with(cluster: Arc<FakeCluster>, store: ConfigStore) -> axum::Router {
    build_router(Arc::new(AppState {
        store,
        cluster,
        proxy: AgentProxy::new(),
        ready: Arc::new(AtomicBool::new(true)),
    }))
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, String) {
    let resp = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

#[tokio::test]
async fn test_api_lists_only_served_namespaces_and_pvcs() {
    let cluster = Arc::new(FakeCluster::new());
    cluster.add_namespace("app-a");
    cluster.add_namespace("kube-system");
    cluster.add_pvc(
        "app-a",
        make_pvc("d2", "app-a", &["ReadWriteMany"], Some("gp3"), None),
    );
    cluster.add_pvc(
        "app-a",
        make_pvc("d1", "app-a", &["ReadWriteMany"], Some("gp3"), None),
    );
    cluster.add_pvc(
        "kube-system",
        make_pvc("x", "kube-system", &["ReadWriteMany"], Some("gp3"), None),
    );

    let store = ConfigStore::new();
    store.publish(base_config(&["app-*"], &["gp3"]));

    let (status, body) = get_json(app_with(cluster.clone(), store.clone()), "/api/v1/namespaces").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[\"app-a\"]");

    let (status, body) = get_json(
        app_with(cluster.clone(), store.clone()),
        "/api/v1/pvcs?namespace=app-a",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[\"d1\",\"d2\"]");

    let (status, body) = get_json(
        app_with(cluster, store),
        "/api/v1/pvcs?namespace=kube-system",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "[]");
}

#[tokio::test]
async fn test_api_pvc_status_reports_ready_agent() {
    let cluster = seeded_cluster();
    cluster.insert_pod(make_ready_pod(&naming::agent_name("app-a", "d1"), "app-a"));

    let store = ConfigStore::new();
    store.publish(base_config(&["app-*"], &["gp3"]));

    let (status, body) = get_json(app_with(cluster, store), "/api/v1/pvc-status?ns=app-a&pvc=d1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "\"Ready\"");
}
