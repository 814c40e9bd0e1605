use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use tracing::debug;

use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::matcher::Matcher;

/// One (namespace, PVC, storageClass) tuple selected for serving. Produced
/// fresh on every reconcile tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub namespace: String,
    pub pvc_name: String,
    pub storage_class: String,
}

/// Enumerates the cluster and applies the configured matchers. Any empty
/// include list short-circuits to the empty set.
pub async fn build_targets(client: &dyn ClusterClient, cfg: &Config) -> Result<Vec<Target>> {
    if cfg.watch.namespaces.include.is_empty()
        || cfg.watch.pvcs.include.is_empty()
        || cfg.watch.storage_classes.include.is_empty()
    {
        return Ok(Vec::new());
    }

    let ns_match = Matcher::new(&cfg.watch.namespaces.include, &cfg.watch.namespaces.exclude);
    let pvc_match = Matcher::new(&cfg.watch.pvcs.include, &cfg.watch.pvcs.exclude);
    let sc_match = Matcher::new(
        &cfg.watch.storage_classes.include,
        &cfg.watch.storage_classes.exclude,
    );

    let mut out = Vec::new();
    for ns in client.list_namespaces().await? {
        if !ns_match.matches(&ns) {
            continue;
        }
        for pvc in client.list_pvcs(&ns).await? {
            let Some(name) = pvc.metadata.name.clone() else {
                continue;
            };
            if !pvc_match.matches(&name) {
                continue;
            }
            if !cfg.allow_rwo && !has_shared_access_mode(&pvc) {
                debug!(ns = %ns, pvc = %name, "pvc_skipped_access_mode");
                continue;
            }
            let Some(sc) = resolve_storage_class(client, &pvc).await? else {
                debug!(ns = %ns, pvc = %name, "pvc_skipped_no_storage_class");
                continue;
            };
            if !sc_match.matches(&sc) {
                continue;
            }
            out.push(Target {
                namespace: ns.clone(),
                pvc_name: name,
                storage_class: sc,
            });
        }
    }
    Ok(out)
}

/// RWX and RWOP claims are mountable from an agent without stealing the
/// workload's attachment; plain RWO needs the allowRWO escape hatch.
fn has_shared_access_mode(pvc: &PersistentVolumeClaim) -> bool {
    pvc.spec
        .as_ref()
        .and_then(|s| s.access_modes.as_ref())
        .is_some_and(|modes| {
            modes
                .iter()
                .any(|m| m == "ReadWriteMany" || m == "ReadWriteOncePod")
        })
}

/// The PVC's own storage class, falling back to the bound PV's. A missing PV
/// is treated as "no storage class" (the PVC is dropped); other API errors
/// abort the tick.
pub async fn resolve_storage_class(
    client: &dyn ClusterClient,
    pvc: &PersistentVolumeClaim,
) -> Result<Option<String>> {
    let spec = pvc.spec.as_ref();

    if let Some(sc) = spec.and_then(|s| s.storage_class_name.clone())
        && !sc.is_empty()
    {
        return Ok(Some(sc));
    }

    if let Some(volume) = spec.and_then(|s| s.volume_name.as_deref())
        && !volume.is_empty()
    {
        match client.get_pv(volume).await {
            Ok(pv) => {
                let sc = pv.spec.and_then(|s| s.storage_class_name);
                return Ok(sc.filter(|s| !s.is_empty()));
            }
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        }
    }

    Ok(None)
}
