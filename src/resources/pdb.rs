//! PodDisruptionBudget generation.
//!
//! Keeps enough data nodes and sentinels up during voluntary disruptions
//! such as node drains for the sentinels to keep their quorum.

use std::collections::BTreeMap;

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::resources::common::label_selector;

/// `minAvailable` for a workload of `replicas` pods.
///
/// 3+ replicas keep 2 available, smaller workloads keep 1.
pub fn min_available(replicas: i32) -> i32 {
    if replicas >= 3 { 2 } else { 1 }
}

/// PDB selecting the pods matched by `selector`.
pub fn generate_pod_disruption_budget(
    metadata: ObjectMeta,
    selector: BTreeMap<String, String>,
    replicas: i32,
) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata,
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::Int(min_available(replicas))),
            selector: Some(label_selector(selector)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::resources::common::selector_labels;

    #[test]
    fn test_min_available() {
        assert_eq!(min_available(1), 1);
        assert_eq!(min_available(2), 1);
        assert_eq!(min_available(3), 2);
        assert_eq!(min_available(5), 2);
    }

    #[test]
    fn test_pdb_selector() {
        let metadata = ObjectMeta {
            name: Some("rfr-cache".to_string()),
            ..Default::default()
        };
        let pdb =
            generate_pod_disruption_budget(metadata, selector_labels("redis", "cache"), 3);

        assert_eq!(pdb.metadata.name, Some("rfr-cache".to_string()));
        let spec = pdb.spec.unwrap();
        assert_eq!(spec.min_available, Some(IntOrString::Int(2)));
        let labels = spec.selector.unwrap().match_labels.unwrap();
        assert_eq!(
            labels.get("app.kubernetes.io/name"),
            Some(&"cache".to_string())
        );
    }
}
