use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolume, PersistentVolumeClaim, Pod, Service,
};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;

use crate::errors::Result;

/// The single seam between the control plane and the cluster API. The
/// controller is the only writer; discovery, routing, and status use the
/// read side only.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<String>>;
    async fn list_pvcs(&self, ns: &str) -> Result<Vec<PersistentVolumeClaim>>;
    async fn get_pvc(&self, ns: &str, name: &str) -> Result<PersistentVolumeClaim>;
    async fn get_pv(&self, name: &str) -> Result<PersistentVolume>;

    /// Cluster-wide pod listing by label selector (`key=value`).
    async fn list_pods_labeled(&self, selector: &str) -> Result<Vec<Pod>>;
    async fn get_pod(&self, ns: &str, name: &str) -> Result<Pod>;
    async fn create_pod(&self, ns: &str, pod: &Pod) -> Result<()>;
    async fn delete_pod(&self, ns: &str, name: &str) -> Result<()>;

    async fn get_service(&self, ns: &str, name: &str) -> Result<Service>;
    async fn create_service(&self, ns: &str, svc: &Service) -> Result<()>;
    async fn delete_service(&self, ns: &str, name: &str) -> Result<()>;
}

/* ============================= KUBE IMPL ============================= */

pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_pvcs(&self, ns: &str) -> Result<Vec<PersistentVolumeClaim>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), ns);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn get_pvc(&self, ns: &str, name: &str) -> Result<PersistentVolumeClaim> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), ns);
        Ok(api.get(name).await?)
    }

    async fn get_pv(&self, name: &str) -> Result<PersistentVolume> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn list_pods_labeled(&self, selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    async fn get_pod(&self, ns: &str, name: &str) -> Result<Pod> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        Ok(api.get(name).await?)
    }

    async fn create_pod(&self, ns: &str, pod: &Pod) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        api.create(&PostParams::default(), pod).await?;
        Ok(())
    }

    async fn delete_pod(&self, ns: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), ns);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn get_service(&self, ns: &str, name: &str) -> Result<Service> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), ns);
        Ok(api.get(name).await?)
    }

    async fn create_service(&self, ns: &str, svc: &Service) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), ns);
        api.create(&PostParams::default(), svc).await?;
        Ok(())
    }

    async fn delete_service(&self, ns: &str, name: &str) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), ns);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}
