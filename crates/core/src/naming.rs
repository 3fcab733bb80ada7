//! Naming convention tying klusterlet ManifestWorks to their cluster.
//!
//! The works for cluster `c1` are `c1-klusterlet` and `c1-klusterlet-crds`.

pub const KLUSTERLET_SUFFIX: &str = "klusterlet";
pub const KLUSTERLET_CRDS_SUFFIX: &str = "klusterlet-crds";

pub fn has_klusterlet_suffix(name: &str) -> bool {
    name.ends_with(KLUSTERLET_SUFFIX)
}

pub fn has_crds_suffix(name: &str) -> bool {
    name.ends_with(KLUSTERLET_CRDS_SUFFIX)
}

/// Cluster name owning a klusterlet work, or `None` when the name does not
/// follow `<cluster>-<suffix>` with a non-empty cluster part.
pub fn derive_cluster_key(work_name: &str) -> Option<String> {
    [KLUSTERLET_CRDS_SUFFIX, KLUSTERLET_SUFFIX]
        .iter()
        .find_map(|suffix| work_name.strip_suffix(suffix)?.strip_suffix('-'))
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_checks() {
        assert!(has_klusterlet_suffix("c1-klusterlet"));
        assert!(!has_klusterlet_suffix("c1-klusterlet-crds"));
        assert!(has_crds_suffix("c1-klusterlet-crds"));
        assert!(!has_crds_suffix("unrelated-object"));
    }

    #[test]
    fn derives_cluster_from_either_work() {
        assert_eq!(derive_cluster_key("c1-klusterlet").as_deref(), Some("c1"));
        assert_eq!(derive_cluster_key("c1-klusterlet-crds").as_deref(), Some("c1"));
        assert_eq!(derive_cluster_key("my-cluster-klusterlet").as_deref(), Some("my-cluster"));
    }

    #[test]
    fn underivable_names() {
        assert_eq!(derive_cluster_key("klusterlet"), None);
        assert_eq!(derive_cluster_key("-klusterlet"), None);
        assert_eq!(derive_cluster_key("c1klusterlet"), None);
        assert_eq!(derive_cluster_key("unrelated-object"), None);
        assert_eq!(derive_cluster_key(""), None);
    }
}
