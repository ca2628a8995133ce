use chrono::{DateTime, Utc};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

use super::checkpoints::{Checkpoint, Checkpoints};
use super::manager::{ReconcileOutcome, RotationManager};
use super::workload::StatefulSetWorkload;
use crate::config::{OperatorConfig, PkiSettings};
use crate::crd::{Condition, SearchCluster};
use crate::error::{Error, Result};
use crate::store::KubeSecretStore;

pub const REASON_FAILED: &str = "Failed";

/// Shared state handed to every reconcile invocation.
pub struct Context {
    pub client: Client,
    pub config: OperatorConfig,
}

#[instrument(skip_all, fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<SearchCluster>, ctx: Arc<Context>) -> Result<Action> {
    let now = Utc::now();
    let namespace = cluster
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let conditions = cluster
        .status
        .as_ref()
        .map(|status| status.conditions.clone())
        .unwrap_or_default();
    let observed_generation = cluster
        .status
        .as_ref()
        .and_then(|status| status.observed_generation);

    let mut checkpoints = Checkpoints::from_conditions(&conditions, now);
    let before = checkpoints.clone();

    let result = reconcile_pki(&cluster, &ctx, &mut checkpoints, now).await;
    if let Err(e) = &result {
        record_failure(&mut checkpoints, e, now);
    }

    // Progress made before a failure is kept together with the failure.
    if checkpoints != before || observed_generation != cluster.metadata.generation {
        let api: Api<SearchCluster> = Api::namespaced(ctx.client.clone(), &namespace);
        let patch = status_patch(&conditions, &checkpoints, cluster.metadata.generation);
        let params = PatchParams {
            field_manager: Some(ctx.config.field_manager.clone()),
            ..Default::default()
        };
        api.patch_status(&cluster.name_any(), &params, &Patch::Merge(&patch))
            .await?;
    }

    let outcome = result?;
    Ok(Action::requeue(outcome.requeue_after))
}

async fn reconcile_pki(
    cluster: &SearchCluster,
    ctx: &Context,
    checkpoints: &mut Checkpoints,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome> {
    let settings = PkiSettings::from_cluster(cluster)?;
    let store = KubeSecretStore::for_cluster(ctx.client.clone(), cluster, &ctx.config.field_manager)?;
    let workload = StatefulSetWorkload::new(ctx.client.clone(), &settings);

    let outcome = RotationManager::new(&settings, &ctx.config, &store, &workload, now)
        .reconcile(checkpoints)
        .await?;
    info!(
        phase = %outcome.phase,
        requeue_secs = outcome.requeue_after.as_secs(),
        "reconciled"
    );
    Ok(outcome)
}

pub fn record_failure(checkpoints: &mut Checkpoints, error: &Error, now: DateTime<Utc>) {
    checkpoints.set(Checkpoint::Ready, false, REASON_FAILED, error.to_string(), now);
}

pub fn status_patch(
    existing: &[Condition],
    checkpoints: &Checkpoints,
    generation: Option<i64>,
) -> Value {
    let mut conditions = existing.to_vec();
    checkpoints.merge_into(&mut conditions);
    json!({
        "status": {
            "conditions": conditions,
            "observedGeneration": generation,
        }
    })
}

/// Configuration errors wait for the SearchCluster to be fixed; everything else is
/// retried soon.
pub fn retry_interval(error: &Error, config: &OperatorConfig) -> Duration {
    if error.is_config() {
        config.config_error_requeue()
    } else {
        config.error_requeue()
    }
}

pub fn error_policy(cluster: Arc<SearchCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        %error,
        cluster = %cluster.name_any(),
        "reconciliation failed"
    );
    Action::requeue(retry_interval(error, &ctx.config))
}
