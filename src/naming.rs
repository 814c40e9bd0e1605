use sha2::{Digest, Sha256};

/* ============================= LABELS ============================= */

pub const APP_LABEL: &str = "app";
pub const AGENT_APP: &str = "pvc-viewer-agent";
pub const NS_AGENT_APP: &str = "pvc-viewer-agent-ns";

pub const NS_LABEL: &str = "pvcviewer.k8s.io/ns";
pub const PVC_LABEL: &str = "pvcviewer.k8s.io/pvc";
pub const GROUP_LABEL: &str = "pvcviewer.k8s.io/gr";
pub const SPEC_HASH_ANNOTATION: &str = "pvcviewer.k8s.io/spec-hash";

pub const AGENT_PORT: i32 = 8090;

/* ============================= HASHES ============================= */

/// Lowercase hex of the first `bytes` bytes of the SHA-256 digest.
fn short_hash(input: &str, bytes: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..bytes])
}

pub fn hash8(input: &str) -> String {
    short_hash(input, 8)
}

pub fn hash4(input: &str) -> String {
    short_hash(input, 4)
}

/* ============================= NAMES ============================= */

/// Deterministic name for a per-PVC agent Pod/Service.
pub fn agent_name(ns: &str, pvc: &str) -> String {
    format!("{}-{}", AGENT_APP, hash8(&format!("{ns}:{pvc}")))
}

/// Legacy single-profile namespace agent name, still honored for cleanup and
/// as the routing fallback when a PVC's profile cannot be resolved.
pub fn namespace_agent_name(ns: &str) -> String {
    format!("{}-{}", NS_AGENT_APP, hash8(ns))
}

/// Namespace agent bound to a security profile group.
pub fn namespace_group_agent_name(ns: &str, profile_key: &str) -> String {
    if profile_key.is_empty() {
        return namespace_agent_name(ns);
    }
    format!("{}-{}-{}", NS_AGENT_APP, hash4(ns), profile_key)
}

/// Content hash of a namespace agent's desired PVC set, recorded as the
/// spec-hash annotation. Equal sets produce equal hashes.
pub fn spec_hash(pvc_names: &[String]) -> String {
    let mut sorted = pvc_names.to_vec();
    sorted.sort();
    hash8(&sorted.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_name_is_deterministic() {
        assert_eq!(agent_name("app-a", "data"), agent_name("app-a", "data"));
        assert_ne!(agent_name("app-a", "data"), agent_name("app-a", "scratch"));
        assert_ne!(agent_name("app-a", "data"), agent_name("app-b", "data"));
    }

    #[test]
    fn test_agent_name_shape() {
        let name = agent_name("app-a", "data");
        assert!(name.starts_with("pvc-viewer-agent-"));
        let suffix = name.trim_start_matches("pvc-viewer-agent-");
        assert_eq!(suffix.len(), 16);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(name.len() <= 63);
    }

    #[test]
    fn test_group_name_shape() {
        let name = namespace_group_agent_name("app-a", "deadbeef");
        assert!(name.starts_with("pvc-viewer-agent-ns-"));
        assert!(name.ends_with("-deadbeef"));
        assert!(name.len() <= 63);
    }

    #[test]
    fn test_group_name_falls_back_to_legacy() {
        assert_eq!(
            namespace_group_agent_name("app-a", ""),
            namespace_agent_name("app-a")
        );
    }

    #[test]
    fn test_spec_hash_ignores_order() {
        let a = spec_hash(&["d1".into(), "d2".into()]);
        let b = spec_hash(&["d2".into(), "d1".into()]);
        assert_eq!(a, b);
        assert_ne!(a, spec_hash(&["d1".into()]));
    }

    #[test]
    fn test_colon_separator_prevents_ambiguity() {
        assert_ne!(agent_name("a", "b:c"), agent_name("a:b", "c"));
    }
}
