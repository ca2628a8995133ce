use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams};
use kube::{Api, Client};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::config::PkiSettings;
use crate::discovery::statefulset_name;
use crate::error::Result;
use crate::store::CLUSTER_LABEL;

/// The workload controller that runs the cluster's nodes, seen from the
/// certificate lifecycle.
///
/// The rollout signal is only meaningful if the pod template has already been
/// changed for the new trust material by the time the next poll happens. The
/// component that builds the StatefulSets must fold the stored records (or a
/// hash of them) into the pod template so a record write bumps the generation
/// before the next reconcile; otherwise an untouched StatefulSet reads as
/// rolled out and the gate opens without any restart.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Workload: Send + Sync {
    /// Every node runs the latest pod specification. Reports nothing about
    /// whether that specification already references the newest records.
    async fn rollout_complete(&self) -> Result<bool>;

    /// Names of the cluster's existing pods.
    async fn pod_names(&self) -> Result<Vec<String>>;

    async fn delete_pods(&self, names: &[String]) -> Result<()>;
}

/// Reads rollout state from the node-group StatefulSets.
pub struct StatefulSetWorkload {
    statefulsets: Api<StatefulSet>,
    pods: Api<Pod>,
    names: Vec<String>,
    selector: String,
}

impl StatefulSetWorkload {
    pub fn new(client: Client, settings: &PkiSettings) -> Self {
        Self {
            statefulsets: Api::namespaced(client.clone(), &settings.namespace),
            pods: Api::namespaced(client, &settings.namespace),
            names: settings
                .node_groups
                .iter()
                .map(|group| statefulset_name(&settings.cluster_name, &group.name))
                .collect(),
            selector: format!("{}={}", CLUSTER_LABEL, settings.cluster_name),
        }
    }
}

/// A StatefulSet has rolled out when it observed its latest generation and all
/// replicas are updated, ready and on the update revision.
pub fn statefulset_rolled_out(sts: &StatefulSet) -> bool {
    let Some(status) = sts.status.as_ref() else {
        return false;
    };
    let desired = sts
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let generation = sts.metadata.generation.unwrap_or(0);

    status.observed_generation.unwrap_or(0) >= generation
        && status.replicas == desired
        && status.updated_replicas.unwrap_or(0) == desired
        && status.ready_replicas.unwrap_or(0) == desired
        && status.current_revision.is_some()
        && status.current_revision == status.update_revision
}

#[async_trait]
impl Workload for StatefulSetWorkload {
    async fn rollout_complete(&self) -> Result<bool> {
        for name in &self.names {
            match self.statefulsets.get_opt(name).await? {
                Some(sts) if statefulset_rolled_out(&sts) => {}
                Some(_) => {
                    debug!(statefulset = %name, "rollout in progress");
                    return Ok(false);
                }
                None => {
                    debug!(statefulset = %name, "statefulset not found");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn pod_names(&self) -> Result<Vec<String>> {
        let pods = self
            .pods
            .list(&ListParams::default().labels(&self.selector))
            .await?;
        Ok(pods
            .items
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect())
    }

    async fn delete_pods(&self, names: &[String]) -> Result<()> {
        for name in names {
            info!(pod = %name, "deleting pod");
            match self.pods.delete(name, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{StatefulSetSpec, StatefulSetStatus};

    fn sts(generation: i64, status: StatefulSetStatus) -> StatefulSet {
        let mut sts = StatefulSet {
            spec: Some(StatefulSetSpec {
                replicas: Some(3),
                ..Default::default()
            }),
            status: Some(status),
            ..Default::default()
        };
        sts.metadata.generation = Some(generation);
        sts
    }

    fn settled() -> StatefulSetStatus {
        StatefulSetStatus {
            observed_generation: Some(2),
            replicas: 3,
            updated_replicas: Some(3),
            ready_replicas: Some(3),
            current_revision: Some("logs-data-abc".to_string()),
            update_revision: Some("logs-data-abc".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn settled_statefulset_is_rolled_out() {
        assert!(statefulset_rolled_out(&sts(2, settled())));
    }

    #[test]
    fn pending_revision_is_not_rolled_out() {
        let status = StatefulSetStatus {
            update_revision: Some("logs-data-def".to_string()),
            updated_replicas: Some(1),
            ..settled()
        };
        assert!(!statefulset_rolled_out(&sts(2, status)));
    }

    #[test]
    fn unobserved_generation_is_not_rolled_out() {
        assert!(!statefulset_rolled_out(&sts(3, settled())));
    }

    #[test]
    fn statefulset_without_status_is_not_rolled_out() {
        let mut missing = sts(1, settled());
        missing.status = None;
        assert!(!statefulset_rolled_out(&missing));
    }
}
