use sha2::{Digest, Sha256};

use crate::config::{OverrideSpec, SecuritySpec};
use crate::matcher::glob_match;

/* ============================= RESOLUTION ============================= */

/// Merges the defaults with the first matching override. An override with a
/// `pvcMatch` glob is tried against the PVC name only; otherwise its `match`
/// glob is tried against the storage class. First hit wins.
pub fn resolve(
    defaults: &SecuritySpec,
    overrides: &[OverrideSpec],
    pvc_name: &str,
    storage_class: &str,
) -> SecuritySpec {
    let mut spec = defaults.clone();

    for ov in overrides {
        let hit = match &ov.pvc_match {
            Some(pattern) => glob_match(pattern, pvc_name),
            None => glob_match(&ov.storage_class, storage_class),
        };
        if hit {
            merge(&mut spec, &ov.security);
            break;
        }
    }

    spec
}

fn merge(base: &mut SecuritySpec, overlay: &SecuritySpec) {
    if overlay.run_as_user.is_some() {
        base.run_as_user = overlay.run_as_user;
    }
    if overlay.run_as_group.is_some() {
        base.run_as_group = overlay.run_as_group;
    }
    if overlay.fs_group.is_some() {
        base.fs_group = overlay.fs_group;
    }
    if !overlay.supplemental_groups.is_empty() {
        base.supplemental_groups = overlay.supplemental_groups.clone();
    }
    base.read_only = base.read_only || overlay.read_only;
}

/* ============================= PROFILE KEY ============================= */

/// Stable short fingerprint of an effective spec, used to partition agents
/// within a namespace. Absent integers canonicalize to 0 and supplemental
/// groups are order-insensitive.
pub fn profile_key(spec: &SecuritySpec) -> String {
    let digest = Sha256::digest(canonical(spec).as_bytes());
    hex::encode(&digest[..4])
}

fn canonical(spec: &SecuritySpec) -> String {
    let mut groups = spec.supplemental_groups.clone();
    groups.sort_unstable();

    let mut out = format!(
        "{}|{}|{}|{}|",
        spec.run_as_user.unwrap_or(0),
        spec.run_as_group.unwrap_or(0),
        spec.fs_group.unwrap_or(0),
        spec.read_only,
    );
    for g in groups {
        out.push_str(&g.to_string());
        out.push(',');
    }
    out
}
