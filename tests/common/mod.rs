#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeSpec, Pod,
    PodCondition, PodStatus, Service,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use pvc_viewer::cluster::ClusterClient;
use pvc_viewer::config::{Config, DataPlane};
use pvc_viewer::errors::{Error, Result};

/* ============================= FAKE CLUSTER ============================= */

/// In-memory stand-in for the cluster API: plain maps behind a mutex, with
/// the same not-found/conflict behavior the reconciler sees in production.
#[derive(Default)]
pub struct FakeCluster {
    pub state: Mutex<FakeState>,
}

#[derive(Default)]
pub struct FakeState {
    pub namespaces: Vec<String>,
    pub pvcs: HashMap<String, Vec<PersistentVolumeClaim>>,
    pub pvs: HashMap<String, PersistentVolume>,
    pub pods: HashMap<(String, String), Pod>,
    pub services: HashMap<(String, String), Service>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_namespace(&self, ns: &str) {
        self.state.lock().unwrap().namespaces.push(ns.to_string());
    }

    pub fn add_pvc(&self, ns: &str, pvc: PersistentVolumeClaim) {
        self.state
            .lock()
            .unwrap()
            .pvcs
            .entry(ns.to_string())
            .or_default()
            .push(pvc);
    }

    pub fn remove_pvc(&self, ns: &str, name: &str) {
        if let Some(list) = self.state.lock().unwrap().pvcs.get_mut(ns) {
            list.retain(|p| p.metadata.name.as_deref() != Some(name));
        }
    }

    pub fn add_pv(&self, pv: PersistentVolume) {
        let name = pv.metadata.name.clone().unwrap_or_default();
        self.state.lock().unwrap().pvs.insert(name, pv);
    }

    pub fn insert_pod(&self, pod: Pod) {
        let ns = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.state.lock().unwrap().pods.insert((ns, name), pod);
    }

    pub fn pod(&self, ns: &str, name: &str) -> Option<Pod> {
        self.state
            .lock()
            .unwrap()
            .pods
            .get(&(ns.to_string(), name.to_string()))
            .cloned()
    }

    pub fn service(&self, ns: &str, name: &str) -> Option<Service> {
        self.state
            .lock()
            .unwrap()
            .services
            .get(&(ns.to_string(), name.to_string()))
            .cloned()
    }

    /// Names of pods carrying `app=<value>`, sorted for stable assertions.
    pub fn pod_names_with_app(&self, value: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .pods
            .values()
            .filter(|p| has_label(p, "app", value))
            .filter_map(|p| p.metadata.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn service_count(&self) -> usize {
        self.state.lock().unwrap().services.len()
    }

    /// Tags a live pod so a later recreation is detectable.
    pub fn mark_pod(&self, ns: &str, name: &str, marker: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(pod) = state.pods.get_mut(&(ns.to_string(), name.to_string())) {
            pod.metadata
                .labels
                .get_or_insert_with(Default::default)
                .insert("test-marker".to_string(), marker.to_string());
        }
    }

    pub fn pod_marker(&self, ns: &str, name: &str) -> Option<String> {
        self.pod(ns, name)
            .and_then(|p| p.metadata.labels)
            .and_then(|l| l.get("test-marker").cloned())
    }
}

fn has_label(pod: &Pod, key: &str, value: &str) -> bool {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(String::as_str)
        == Some(value)
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().namespaces.clone())
    }

    async fn list_pvcs(&self, ns: &str) -> Result<Vec<PersistentVolumeClaim>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pvcs
            .get(ns)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_pvc(&self, ns: &str, name: &str) -> Result<PersistentVolumeClaim> {
        self.state
            .lock()
            .unwrap()
            .pvcs
            .get(ns)
            .and_then(|list| {
                list.iter()
                    .find(|p| p.metadata.name.as_deref() == Some(name))
            })
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("pvc {ns}/{name}")))
    }

    async fn get_pv(&self, name: &str) -> Result<PersistentVolume> {
        self.state
            .lock()
            .unwrap()
            .pvs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("pv {name}")))
    }

    async fn list_pods_labeled(&self, selector: &str) -> Result<Vec<Pod>> {
        let (key, value) = selector
            .split_once('=')
            .ok_or_else(|| Error::BadRequest(format!("selector {selector}")))?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .values()
            .filter(|p| has_label(p, key, value))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, ns: &str, name: &str) -> Result<Pod> {
        self.pod(ns, name)
            .ok_or_else(|| Error::NotFound(format!("pod {ns}/{name}")))
    }

    async fn create_pod(&self, ns: &str, pod: &Pod) -> Result<()> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        let key = (ns.to_string(), name.clone());
        let mut state = self.state.lock().unwrap();
        if state.pods.contains_key(&key) {
            return Err(Error::Conflict(format!("pod {ns}/{name}")));
        }
        state.pods.insert(key, pod.clone());
        Ok(())
    }

    async fn delete_pod(&self, ns: &str, name: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .pods
            .remove(&(ns.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("pod {ns}/{name}")))
    }

    async fn get_service(&self, ns: &str, name: &str) -> Result<Service> {
        self.service(ns, name)
            .ok_or_else(|| Error::NotFound(format!("service {ns}/{name}")))
    }

    async fn create_service(&self, ns: &str, svc: &Service) -> Result<()> {
        let name = svc.metadata.name.clone().unwrap_or_default();
        let key = (ns.to_string(), name.clone());
        let mut state = self.state.lock().unwrap();
        if state.services.contains_key(&key) {
            return Err(Error::Conflict(format!("service {ns}/{name}")));
        }
        state.services.insert(key, svc.clone());
        Ok(())
    }

    async fn delete_service(&self, ns: &str, name: &str) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .services
            .remove(&(ns.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("service {ns}/{name}")))
    }
}

/* ============================= BUILDERS ============================= */

pub fn make_pvc(
    name: &str,
    ns: &str,
    access_modes: &[&str],
    storage_class: Option<&str>,
    volume_name: Option<&str>,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(access_modes.iter().map(|m| m.to_string()).collect()),
            storage_class_name: storage_class.map(str::to_string),
            volume_name: volume_name.map(str::to_string),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn make_pv(name: &str, storage_class: &str) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            storage_class_name: Some(storage_class.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn make_ready_pod(name: &str, ns: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            ..Default::default()
        },
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A per-PVC-mode config watching everything under the given namespace and
/// storage-class globs.
pub fn base_config(ns_include: &[&str], sc_include: &[&str]) -> Config {
    let mut cfg = Config::default();
    cfg.watch.namespaces.include = ns_include.iter().map(|s| s.to_string()).collect();
    cfg.watch.pvcs.include = vec!["**".to_string()];
    cfg.watch.storage_classes.include = sc_include.iter().map(|s| s.to_string()).collect();
    cfg
}

pub fn namespace_mode(mut cfg: Config) -> Config {
    cfg.mode.data_plane = DataPlane::AgentPerNamespace;
    cfg
}
