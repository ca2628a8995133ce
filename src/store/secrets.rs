use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::info;

use super::{RecordData, SecretStore};
use crate::crd::SearchCluster;
use crate::error::{Error, Result};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const CLUSTER_LABEL: &str = "search.opencluster.dev/cluster";
const MANAGER_NAME: &str = env!("CARGO_PKG_NAME");

/// Records stored as Secrets in the cluster's namespace, owned by the cluster
/// so they are garbage collected with it.
pub struct KubeSecretStore {
    api: Api<Secret>,
    owner: OwnerReference,
    labels: BTreeMap<String, String>,
    field_manager: String,
}

impl KubeSecretStore {
    pub fn for_cluster(client: Client, cluster: &SearchCluster, field_manager: &str) -> Result<Self> {
        let namespace = cluster
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let owner = cluster
            .controller_owner_ref(&())
            .ok_or(Error::MissingObjectKey(".metadata.uid"))?;

        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGER_NAME.to_string());
        labels.insert(CLUSTER_LABEL.to_string(), cluster.name_any());

        Ok(Self {
            api: Api::namespaced(client, &namespace),
            owner,
            labels,
            field_manager: field_manager.to_string(),
        })
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn metadata_intact(&self, secret: &Secret) -> bool {
        let labels = secret.labels();
        let labelled = self
            .labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value));
        let owned = secret
            .owner_references()
            .iter()
            .any(|owner| owner.uid == self.owner.uid);
        labelled && owned
    }
}

fn to_secret_data(data: RecordData) -> BTreeMap<String, ByteString> {
    data.into_iter()
        .map(|(key, value)| (key, ByteString(value)))
        .collect()
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, name: &str) -> Result<Option<RecordData>> {
        Ok(self.api.get_opt(name).await?.map(|secret| {
            secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(key, value)| (key, value.0))
                .collect()
        }))
    }

    async fn upsert(&self, name: &str, data: RecordData) -> Result<bool> {
        let data = to_secret_data(data);

        match self.api.get_opt(name).await? {
            Some(mut existing) => {
                if existing.data.as_ref() == Some(&data) {
                    return Ok(false);
                }
                // The read resourceVersion stays on the object, so a concurrent
                // writer makes this replace fail with a conflict.
                existing.data = Some(data);
                existing.string_data = None;
                self.api
                    .replace(name, &self.post_params(), &existing)
                    .await?;
            }
            None => {
                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        labels: Some(self.labels.clone()),
                        owner_references: Some(vec![self.owner.clone()]),
                        ..Default::default()
                    },
                    type_: Some("Opaque".to_string()),
                    data: Some(data),
                    ..Default::default()
                };
                info!(secret = %name, "creating record");
                self.api.create(&self.post_params(), &secret).await?;
            }
        }
        Ok(true)
    }

    async fn ensure_metadata(&self, name: &str) -> Result<bool> {
        let Some(secret) = self.api.get_opt(name).await? else {
            return Ok(false);
        };
        if self.metadata_intact(&secret) {
            return Ok(false);
        }

        let mut owners: Vec<OwnerReference> = secret
            .owner_references()
            .iter()
            .filter(|owner| owner.uid != self.owner.uid)
            .cloned()
            .collect();
        owners.push(self.owner.clone());

        let patch = json!({
            "metadata": {
                "labels": self.labels,
                "ownerReferences": owners,
            }
        });
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        self.api.patch(name, &params, &Patch::Merge(&patch)).await?;
        Ok(true)
    }
}
