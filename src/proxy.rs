use std::collections::HashMap;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, Method, Response};
use tracing::warn;

use crate::cluster::ClusterClient;
use crate::config::{Config, DataPlane};
use crate::discovery;
use crate::errors::{Error, Result};
use crate::naming;
use crate::security;

const PROXY_TIMEOUT: Duration = Duration::from_secs(120);

/* ============================= ROUTING ============================= */

/// Where a request goes and with which query. In per-namespace mode the
/// `path` parameter is rewritten so the shared agent's `/data/<pvc>/...`
/// view lines up with the caller's per-PVC view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub service: String,
    pub params: Vec<(String, String)>,
}

pub async fn compute_routing(
    client: &dyn ClusterClient,
    cfg: &Config,
    ns: &str,
    pvc: &str,
    params: &HashMap<String, String>,
) -> Route {
    match cfg.mode.data_plane {
        DataPlane::AgentPerPvc => Route {
            service: naming::agent_name(ns, pvc),
            params: params.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        },
        DataPlane::AgentPerNamespace => {
            let service = match resolve_group_service(client, cfg, ns, pvc).await {
                Ok(name) => name,
                Err(e) => {
                    warn!(ns = %ns, pvc = %pvc, error = %e, "profile_resolution_failed");
                    naming::namespace_agent_name(ns)
                }
            };

            let mut path = params.get("path").cloned().unwrap_or_default();
            if !path.starts_with('/') {
                path.insert(0, '/');
            }
            let mut rewritten: Vec<(String, String)> = params
                .iter()
                .filter(|(k, _)| k.as_str() != "path")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            rewritten.push(("path".to_string(), format!("/{pvc}{path}")));

            Route {
                service,
                params: rewritten,
            }
        }
    }
}

/// The namespace agent responsible for a PVC is named by the PVC's profile
/// key, derived from its storage class through the configured overrides.
pub async fn resolve_group_service(
    client: &dyn ClusterClient,
    cfg: &Config,
    ns: &str,
    pvc: &str,
) -> Result<String> {
    let claim = client.get_pvc(ns, pvc).await?;
    let sc = discovery::resolve_storage_class(client, &claim)
        .await?
        .unwrap_or_default();
    let spec = security::resolve(
        &cfg.agents.security_defaults,
        &cfg.agents.security_overrides,
        pvc,
        &sc,
    );
    Ok(naming::namespace_group_agent_name(
        ns,
        &security::profile_key(&spec),
    ))
}

/* ============================= FORWARDING ============================= */

/// Streams a request to an agent service over DNS and streams the response
/// back. Dial, DNS, and timeout failures all surface as `Error::Proxy`, which
/// handlers map to 502.
pub struct AgentProxy {
    http: reqwest::Client,
}

impl Default for AgentProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentProxy {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(PROXY_TIMEOUT)
                .build()
                .expect("http client builds"),
        }
    }

    pub async fn forward(
        &self,
        ns: &str,
        route: &Route,
        agent_path: &str,
        method: Method,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<Response<Body>> {
        let url = format!(
            "http://{service}.{ns}.svc:{port}{agent_path}",
            service = route.service,
            port = naming::AGENT_PORT,
        );

        let mut req = self.http.request(method, &url).query(&route.params);
        for (name, value) in headers {
            if name == HOST || name == CONTENT_LENGTH {
                continue;
            }
            req = req.header(name, value);
        }
        req = req.body(reqwest::Body::wrap_stream(body.into_data_stream()));

        let upstream = req
            .send()
            .await
            .map_err(|e| Error::Proxy(e.to_string()))?;

        let mut builder = Response::builder().status(upstream.status());
        for (name, value) in upstream.headers() {
            if name == TRANSFER_ENCODING {
                continue;
            }
            builder = builder.header(name, value);
        }
        builder
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| Error::Internal(e.to_string()))
    }
}
