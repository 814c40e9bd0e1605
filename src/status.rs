use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;

use crate::cluster::ClusterClient;
use crate::config::{Config, DataPlane};
use crate::naming;
use crate::proxy;

/// Readiness of the agent responsible for a PVC. `MountBlocked` and
/// `ReadOnly` are reported by richer inspections of pod events and mount
/// flags; the base service produces `Ready` and `AgentPending` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PvcStatus {
    Ready,
    AgentPending,
    MountBlocked,
    ReadOnly,
}

/// Locates the responsible agent pod by its deterministic name for the
/// active data-plane mode. Any lookup failure reads as a pending agent.
pub async fn pvc_status(
    client: &dyn ClusterClient,
    cfg: &Config,
    ns: &str,
    pvc: &str,
) -> PvcStatus {
    let name = match cfg.mode.data_plane {
        DataPlane::AgentPerPvc => naming::agent_name(ns, pvc),
        DataPlane::AgentPerNamespace => proxy::resolve_group_service(client, cfg, ns, pvc)
            .await
            .unwrap_or_else(|_| naming::namespace_agent_name(ns)),
    };

    match client.get_pod(ns, &name).await {
        Ok(pod) if pod_is_ready(&pod) => PvcStatus::Ready,
        _ => PvcStatus::AgentPending,
    }
}

pub fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}
