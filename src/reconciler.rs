use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EnvVar, PersistentVolumeClaimVolumeSource, Pod,
    PodSecurityContext, PodSpec, SecurityContext, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{info, warn};

use crate::cluster::ClusterClient;
use crate::config::{Config, DataPlane, SecuritySpec};
use crate::discovery::Target;
use crate::errors::{Error, Result};
use crate::naming::{
    self, AGENT_APP, AGENT_PORT, APP_LABEL, GROUP_LABEL, NS_AGENT_APP, NS_LABEL, PVC_LABEL,
    SPEC_HASH_ANNOTATION,
};
use crate::security;

const DEFAULT_RUN_AS: i64 = 65532;

/// Drives the cluster toward the desired agent set for the active data-plane
/// mode. Each tick is ensure-then-GC: creations land before any deletion so
/// a still-desired PVC is never left agent-less by an overlapping pass.
pub struct Reconciler {
    client: Arc<dyn ClusterClient>,
    agent_image: String,
}

struct MountSpec {
    volume: String,
    claim: String,
    mount_path: String,
    read_only: bool,
}

impl Reconciler {
    pub fn new(client: Arc<dyn ClusterClient>, agent_image: String) -> Self {
        Self {
            client,
            agent_image,
        }
    }

    pub async fn reconcile(&self, cfg: &Config, targets: &[Target]) -> Result<()> {
        match cfg.mode.data_plane {
            DataPlane::AgentPerPvc => self.reconcile_per_pvc(cfg, targets).await,
            DataPlane::AgentPerNamespace => self.reconcile_per_namespace(cfg, targets).await,
        }
    }

    /* ============================= PER-PVC MODE ============================= */

    async fn reconcile_per_pvc(&self, cfg: &Config, targets: &[Target]) -> Result<()> {
        let desired: HashMap<String, &Target> = targets
            .iter()
            .map(|t| (format!("{}/{}", t.namespace, t.pvc_name), t))
            .collect();

        let observed = self
            .client
            .list_pods_labeled(&format!("{APP_LABEL}={AGENT_APP}"))
            .await?;

        for t in targets {
            let spec = security::resolve(
                &cfg.agents.security_defaults,
                &cfg.agents.security_overrides,
                &t.pvc_name,
                &t.storage_class,
            );
            if let Err(e) = self.ensure_pvc_agent(cfg, t, &spec).await {
                warn!(ns = %t.namespace, pvc = %t.pvc_name, error = %e, "ensure_agent_failed");
            }
        }

        for pod in &observed {
            let labels = pod.metadata.labels.clone().unwrap_or_default();
            let (Some(ns), Some(pvc)) = (labels.get(NS_LABEL), labels.get(PVC_LABEL)) else {
                continue;
            };
            if desired.contains_key(&format!("{ns}/{pvc}")) {
                continue;
            }
            let pod_ns = pod.metadata.namespace.as_deref().unwrap_or(ns);
            let name = pod
                .metadata
                .name
                .as_deref()
                .map(str::to_owned)
                .unwrap_or_else(|| naming::agent_name(ns, pvc));
            info!(ns = %pod_ns, pvc = %pvc, svc = %name, "gc_agent");
            self.delete_agent(pod_ns, &name).await;
        }

        Ok(())
    }

    /// Identity in per-PVC mode is fully determined by (ns, pvc), so an
    /// existing pod is never updated, only created when absent.
    async fn ensure_pvc_agent(&self, cfg: &Config, t: &Target, spec: &SecuritySpec) -> Result<()> {
        let name = naming::agent_name(&t.namespace, &t.pvc_name);
        let labels = BTreeMap::from([
            (APP_LABEL.to_string(), AGENT_APP.to_string()),
            (NS_LABEL.to_string(), t.namespace.clone()),
            (PVC_LABEL.to_string(), t.pvc_name.clone()),
        ]);

        self.ensure_service(&t.namespace, &name, &labels, true)
            .await?;

        match self.client.get_pod(&t.namespace, &name).await {
            Ok(_) => return Ok(()),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let mounts = vec![MountSpec {
            volume: "data".to_string(),
            claim: t.pvc_name.clone(),
            mount_path: "/data".to_string(),
            read_only: spec.read_only,
        }];
        let pod = self.build_agent_pod(
            &name,
            &t.namespace,
            labels,
            None,
            &mounts,
            spec,
            &cfg.agents.security_defaults,
        );

        match self.client.create_pod(&t.namespace, &pod).await {
            Ok(()) => {
                info!(ns = %t.namespace, pvc = %t.pvc_name, svc = %name, "agent_created");
                Ok(())
            }
            Err(Error::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /* ============================= GROUPED MODE ============================= */

    async fn reconcile_per_namespace(&self, cfg: &Config, targets: &[Target]) -> Result<()> {
        // bucket PVCs by (namespace, profile key); BTreeMap keeps tick output
        // deterministic
        struct Bucket {
            spec: SecuritySpec,
            pvcs: Vec<String>,
        }
        let mut buckets: BTreeMap<(String, String), Bucket> = BTreeMap::new();
        for t in targets {
            let spec = security::resolve(
                &cfg.agents.security_defaults,
                &cfg.agents.security_overrides,
                &t.pvc_name,
                &t.storage_class,
            );
            let key = security::profile_key(&spec);
            buckets
                .entry((t.namespace.clone(), key))
                .or_insert_with(|| Bucket {
                    spec,
                    pvcs: Vec::new(),
                })
                .pvcs
                .push(t.pvc_name.clone());
        }

        let mut desired_names: HashSet<String> = HashSet::new();
        for ((ns, key), bucket) in &buckets {
            let name = naming::namespace_group_agent_name(ns, key);
            desired_names.insert(name.clone());
            if let Err(e) = self
                .ensure_namespace_agent(cfg, ns, &name, key, &bucket.spec, &bucket.pvcs)
                .await
            {
                warn!(ns = %ns, svc = %name, error = %e, "ensure_ns_agent_failed");
            }
        }

        // one cluster-wide GC pass: removed namespaces, stale profile groups,
        // and legacy single-profile names all fall out here
        let observed = self
            .client
            .list_pods_labeled(&format!("{APP_LABEL}={NS_AGENT_APP}"))
            .await?;
        for pod in &observed {
            let Some(name) = pod.metadata.name.as_deref() else {
                continue;
            };
            if desired_names.contains(name) {
                continue;
            }
            let ns = pod.metadata.namespace.as_deref().unwrap_or_default();
            info!(ns = %ns, svc = %name, "gc_ns_agent");
            self.delete_agent(ns, name).await;
        }

        Ok(())
    }

    async fn ensure_namespace_agent(
        &self,
        cfg: &Config,
        ns: &str,
        name: &str,
        profile_key: &str,
        spec: &SecuritySpec,
        pvc_names: &[String],
    ) -> Result<()> {
        if pvc_names.is_empty() {
            return Ok(());
        }
        let mut pvcs = pvc_names.to_vec();
        pvcs.sort();
        let desired_hash = naming::spec_hash(&pvcs);

        let labels = BTreeMap::from([
            (APP_LABEL.to_string(), NS_AGENT_APP.to_string()),
            (NS_LABEL.to_string(), ns.to_string()),
            (GROUP_LABEL.to_string(), profile_key.to_string()),
        ]);

        self.ensure_service(ns, name, &labels, false).await?;

        match self.client.get_pod(ns, name).await {
            Ok(existing) => {
                let live_hash = existing
                    .metadata
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get(SPEC_HASH_ANNOTATION))
                    .cloned()
                    .unwrap_or_default();
                if live_hash == desired_hash {
                    return Ok(());
                }
                info!(
                    ns = %ns,
                    svc = %name,
                    old_hash = %live_hash,
                    new_hash = %desired_hash,
                    "ns_agent_spec_changed"
                );
                self.delete_pod_logged(ns, name).await;
            }
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let mounts: Vec<MountSpec> = pvcs
            .iter()
            .map(|pvc| MountSpec {
                volume: format!("v-{pvc}"),
                claim: pvc.clone(),
                mount_path: format!("/data/{pvc}"),
                read_only: spec.read_only,
            })
            .collect();
        let annotations = BTreeMap::from([(SPEC_HASH_ANNOTATION.to_string(), desired_hash)]);
        let pod = self.build_agent_pod(
            name,
            ns,
            labels,
            Some(annotations),
            &mounts,
            spec,
            &cfg.agents.security_defaults,
        );

        match self.client.create_pod(ns, &pod).await {
            Ok(()) => {
                info!(ns = %ns, svc = %name, pvcs = ?pvcs, "ns_agent_created");
                Ok(())
            }
            Err(Error::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /* ============================= GC ============================= */

    /// Deletes every per-PVC agent cluster-wide. Used when leaving per-PVC
    /// mode and on shutdown.
    pub async fn gc_per_pvc_all(&self) -> Result<()> {
        let pods = self
            .client
            .list_pods_labeled(&format!("{APP_LABEL}={AGENT_APP}"))
            .await?;
        for pod in &pods {
            if let (Some(ns), Some(name)) = (
                pod.metadata.namespace.as_deref(),
                pod.metadata.name.as_deref(),
            ) {
                self.delete_agent(ns, name).await;
            }
        }
        Ok(())
    }

    /// Deletes namespace agents whose names are not in `keep`. An empty keep
    /// set clears them all (mode transition, shutdown).
    pub async fn gc_namespace_agents(&self, keep: &HashSet<String>) -> Result<()> {
        let pods = self
            .client
            .list_pods_labeled(&format!("{APP_LABEL}={NS_AGENT_APP}"))
            .await?;
        for pod in &pods {
            let (Some(ns), Some(name)) = (
                pod.metadata.namespace.as_deref(),
                pod.metadata.name.as_deref(),
            ) else {
                continue;
            };
            if keep.contains(name) {
                continue;
            }
            self.delete_agent(ns, name).await;
        }
        Ok(())
    }

    async fn delete_agent(&self, ns: &str, name: &str) {
        self.delete_pod_logged(ns, name).await;
        match self.client.delete_service(ns, name).await {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => warn!(ns = %ns, svc = %name, error = %e, "delete_service_failed"),
        }
    }

    async fn delete_pod_logged(&self, ns: &str, name: &str) {
        match self.client.delete_pod(ns, name).await {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => warn!(ns = %ns, svc = %name, error = %e, "delete_pod_failed"),
        }
    }

    /* ============================= TEMPLATES ============================= */

    async fn ensure_service(
        &self,
        ns: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        headless: bool,
    ) -> Result<()> {
        match self.client.get_service(ns, name).await {
            Ok(_) => return Ok(()),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let svc = Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: headless.then(|| "None".to_string()),
                selector: Some(labels.clone()),
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port: AGENT_PORT,
                    target_port: Some(IntOrString::Int(AGENT_PORT)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        match self.client.create_service(ns, &svc).await {
            Ok(()) | Err(Error::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_agent_pod(
        &self,
        name: &str,
        ns: &str,
        labels: BTreeMap<String, String>,
        annotations: Option<BTreeMap<String, String>>,
        mounts: &[MountSpec],
        spec: &SecuritySpec,
        defaults: &SecuritySpec,
    ) -> Pod {
        let run_as_user = spec.run_as_user.unwrap_or(DEFAULT_RUN_AS);
        let run_as_group = spec.run_as_group.unwrap_or(DEFAULT_RUN_AS);

        let volumes: Vec<Volume> = mounts
            .iter()
            .map(|m| Volume {
                name: m.volume.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: m.claim.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();
        let volume_mounts: Vec<VolumeMount> = mounts
            .iter()
            .map(|m| VolumeMount {
                name: m.volume.clone(),
                mount_path: m.mount_path.clone(),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let supplemental = supplemental_union(defaults, spec);

        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                labels: Some(labels),
                annotations,
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "agent".to_string(),
                    image: Some(self.agent_image.clone()),
                    command: Some(vec!["/bin/agent".to_string()]),
                    env: Some(vec![
                        EnvVar {
                            name: "PVC_VIEWER_DATA_ROOT".to_string(),
                            value: Some("/data".to_string()),
                            ..Default::default()
                        },
                        EnvVar {
                            name: "PVC_VIEWER_READ_ONLY".to_string(),
                            value: Some(spec.read_only.to_string()),
                            ..Default::default()
                        },
                    ]),
                    ports: Some(vec![ContainerPort {
                        container_port: AGENT_PORT,
                        ..Default::default()
                    }]),
                    volume_mounts: Some(volume_mounts),
                    security_context: Some(SecurityContext {
                        run_as_non_root: Some(true),
                        run_as_user: Some(run_as_user),
                        run_as_group: Some(run_as_group),
                        allow_privilege_escalation: Some(false),
                        capabilities: Some(Capabilities {
                            drop: Some(vec!["ALL".to_string()]),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                volumes: Some(volumes),
                security_context: Some(PodSecurityContext {
                    run_as_user: Some(run_as_user),
                    run_as_group: Some(run_as_group),
                    fs_group: spec.fs_group,
                    supplemental_groups: (!supplemental.is_empty()).then_some(supplemental),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Union of default and effective supplemental groups, deduplicated while
/// preserving first-seen order.
fn supplemental_union(defaults: &SecuritySpec, spec: &SecuritySpec) -> Vec<i64> {
    let mut seen = HashSet::new();
    defaults
        .supplemental_groups
        .iter()
        .chain(spec.supplemental_groups.iter())
        .copied()
        .filter(|g| seen.insert(*g))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supplemental_union_dedups_preserving_order() {
        let defaults = SecuritySpec {
            supplemental_groups: vec![10, 20],
            ..Default::default()
        };
        let spec = SecuritySpec {
            supplemental_groups: vec![20, 30, 10],
            ..Default::default()
        };
        assert_eq!(supplemental_union(&defaults, &spec), vec![10, 20, 30]);
    }

    #[test]
    fn test_supplemental_union_empty() {
        let empty = SecuritySpec::default();
        assert!(supplemental_union(&empty, &empty).is_empty());
    }
}
