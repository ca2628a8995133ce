use std::collections::BTreeSet;

use crate::crd::NodeGroup;

/// One node of the cluster: a StatefulSet pod with a stable network identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIdentity {
    /// Pod name, `<statefulset>-<ordinal>`
    pub name: String,
    pub statefulset: String,
}

impl NodeIdentity {
    pub fn headless_service(&self) -> String {
        headless_service_name(&self.statefulset)
    }
}

pub fn statefulset_name(cluster: &str, group: &str) -> String {
    format!("{}-{}", cluster, group)
}

pub fn headless_service_name(statefulset: &str) -> String {
    format!("{}-headless", statefulset)
}

/// Every node identity implied by the node groups, ordered by name.
pub fn desired_nodes(cluster: &str, groups: &[NodeGroup]) -> Vec<NodeIdentity> {
    let mut nodes: Vec<NodeIdentity> = groups
        .iter()
        .flat_map(|group| {
            let statefulset = statefulset_name(cluster, &group.name);
            (0..group.replicas).map(move |ordinal| NodeIdentity {
                name: format!("{}-{}", statefulset, ordinal),
                statefulset: statefulset.clone(),
            })
        })
        .collect();
    nodes.sort();
    nodes.dedup_by(|a, b| a.name == b.name);
    nodes
}

/// Result of comparing desired node names with the names present in a leaf set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub fn diff<'a, D, C>(desired: D, current: C) -> MembershipDiff
where
    D: IntoIterator<Item = &'a str>,
    C: IntoIterator<Item = &'a str>,
{
    let desired: BTreeSet<&str> = desired.into_iter().collect();
    let current: BTreeSet<&str> = current.into_iter().collect();

    MembershipDiff {
        added: desired
            .difference(&current)
            .map(|name| name.to_string())
            .collect(),
        removed: current
            .difference(&desired)
            .map(|name| name.to_string())
            .collect(),
    }
}
