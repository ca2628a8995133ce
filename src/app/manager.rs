// src/app/manager.rs
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::checkpoints::{Checkpoint, Checkpoints};
use super::phase::{infer_phase, Inventory, Phase};
use super::workload::Workload;
use crate::cert::{
    authority_subject, create_authority, issue_certificate, needs_renewal, AltName,
    ApiCertGenerator, CertificateInfo, LeafCertificate, NodeCertGenerator, Purpose, RootAuthority,
};
use crate::config::{OperatorConfig, PkiSettings};
use crate::discovery::{desired_nodes, diff, NodeIdentity};
use crate::error::Result;
use crate::store::{CertificateStore, LeafSet, SecretStore, TrustBundle, API_ENTRY};

pub const REASON_BOOTSTRAPPED: &str = "Bootstrapped";
pub const REASON_ROTATION_STARTED: &str = "RotationStarted";
pub const REASON_AUTHORITY_GENERATED: &str = "AuthorityGenerated";
pub const REASON_AUTHORITY_MISSING: &str = "AuthorityMissing";
pub const REASON_ROLLOUT_COMPLETE: &str = "RolloutComplete";
pub const REASON_AWAITING_ROLLOUT: &str = "AwaitingRollout";
pub const REASON_PROPAGATION_STALLED: &str = "PropagationStalled";
pub const REASON_CERTIFICATES_ISSUED: &str = "CertificatesIssued";
pub const REASON_CERTIFICATES_OUTDATED: &str = "CertificatesOutdated";
pub const REASON_ROTATION_COMPLETE: &str = "RotationComplete";
pub const REASON_RECONCILED: &str = "Reconciled";
pub const REASON_STALE_WORKLOAD: &str = "StaleWorkload";
pub const REASON_PODS_RECREATED: &str = "PodsRecreated";

/// Result of one reconcile invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub phase: Phase,
    pub requeue_after: Duration,
}

/// Everything read from the store at the start of an invocation.
#[derive(Debug, Default)]
struct Snapshot {
    transport_authority: Option<RootAuthority>,
    api_authority: Option<RootAuthority>,
    transport_set: Option<LeafSet>,
    api_set: Option<LeafSet>,
}

impl Snapshot {
    fn authority(&self, purpose: Purpose) -> Option<&RootAuthority> {
        match purpose {
            Purpose::Transport => self.transport_authority.as_ref(),
            Purpose::Api => self.api_authority.as_ref(),
        }
    }

    fn leaf_set(&self, purpose: Purpose) -> Option<&LeafSet> {
        match purpose {
            Purpose::Transport => self.transport_set.as_ref(),
            Purpose::Api => self.api_set.as_ref(),
        }
    }
}

/// Drives one cluster through the certificate lifecycle.
///
/// The manager holds no state of its own between invocations: the phase is
/// inferred from the checkpoints and the stored records every time, and every
/// action can be repeated after a crash without harm.
pub struct RotationManager<'a, S: SecretStore + ?Sized, W: Workload + ?Sized> {
    settings: &'a PkiSettings,
    config: &'a OperatorConfig,
    store: CertificateStore<'a, S>,
    workload: &'a W,
    now: DateTime<Utc>,
}

impl<'a, S: SecretStore + ?Sized, W: Workload + ?Sized> RotationManager<'a, S, W> {
    pub fn new(
        settings: &'a PkiSettings,
        config: &'a OperatorConfig,
        backend: &'a S,
        workload: &'a W,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            settings,
            config,
            store: CertificateStore::new(backend, settings.cluster_name.clone()),
            workload,
            now,
        }
    }

    #[instrument(skip_all, fields(cluster = %self.settings.cluster_name))]
    pub async fn reconcile(&self, checkpoints: &mut Checkpoints) -> Result<ReconcileOutcome> {
        let mut snapshot = self.load().await?;
        let inventory = self.inventory(&snapshot);
        let phase = infer_phase(checkpoints, &inventory);
        debug!(%phase, ?inventory, "inferred phase");

        if phase.allows_membership_changes() {
            self.sync_membership(&mut snapshot).await?;
        }
        let stale_workload = snapshot
            .transport_set
            .as_ref()
            .is_some_and(|set| set.stale_workload);

        let requeue_after = match phase {
            Phase::Create => self.create(snapshot, checkpoints).await?,
            Phase::RenewPki => self.renew_pki(&snapshot, checkpoints).await?,
            Phase::PropagatePki => self.gate(Checkpoint::PropagatePki, checkpoints).await?,
            Phase::RenewCertificates => self.renew_certificates(&snapshot, checkpoints).await?,
            Phase::PropagateCertificates => {
                self.gate(Checkpoint::PropagateCertificates, checkpoints)
                    .await?
            }
            Phase::CleanAuthority => self.clean_authority(&snapshot, checkpoints).await?,
            Phase::Steady => self.steady(&snapshot).await?,
        };

        // Left over from an earlier invocation that regenerated transport
        // trust; only reported once the rotation no longer owns Ready.
        if stale_workload && checkpoints.is_true(Checkpoint::Ready) {
            self.handle_stale_workload(checkpoints).await?;
        }

        Ok(ReconcileOutcome {
            phase,
            requeue_after,
        })
    }

    async fn load(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot {
            transport_authority: self.store.read_authority(Purpose::Transport).await?,
            transport_set: self.store.read_leaf_set(Purpose::Transport).await?,
            ..Default::default()
        };
        if self.settings.manages_api() {
            snapshot.api_authority = self.store.read_authority(Purpose::Api).await?;
            snapshot.api_set = self.store.read_leaf_set(Purpose::Api).await?;
        }
        Ok(snapshot)
    }

    fn is_due(&self, info: &CertificateInfo) -> bool {
        needs_renewal(info, self.settings.renewal_window, self.now)
    }

    fn inventory(&self, snapshot: &Snapshot) -> Inventory {
        let purposes = self.settings.managed_purposes();

        let authority_due = purposes.iter().any(|purpose| {
            snapshot
                .authority(*purpose)
                .map_or(true, |authority| self.is_due(&authority.info))
        });
        let nodes_due = snapshot.transport_set.as_ref().is_some_and(|set| {
            set.certificates
                .values()
                .any(|leaf| self.is_due(&leaf.info))
        });
        let api_due = self.settings.manages_api()
            && snapshot
                .api_set
                .as_ref()
                .and_then(|set| set.certificates.get(API_ENTRY))
                .map_or(true, |leaf| self.is_due(&leaf.info));

        let trust_consistent = purposes.iter().all(|purpose| {
            match (snapshot.authority(*purpose), snapshot.leaf_set(*purpose)) {
                (Some(authority), Some(set)) => {
                    set.bundle.is_exactly(authority) && set.all_issued_by(authority)
                }
                _ => false,
            }
        });

        Inventory {
            transport_leaf_set_present: snapshot.transport_set.is_some(),
            renewal_due: authority_due || nodes_due || api_due,
            trust_consistent,
        }
    }

    fn desired_nodes(&self) -> Vec<NodeIdentity> {
        desired_nodes(&self.settings.cluster_name, &self.settings.node_groups)
    }

    fn generate_authority(&self, purpose: Purpose) -> Result<RootAuthority> {
        Ok(create_authority(
            purpose,
            &authority_subject(&self.settings.cluster_name, purpose),
            self.settings.authority_validity_days,
            self.settings.key_bits,
            self.now,
        )?)
    }

    fn issue_node(&self, authority: &RootAuthority, node: &NodeIdentity) -> Result<LeafCertificate> {
        let config = NodeCertGenerator::new(self.settings).config_for(node);
        Ok(issue_certificate(authority, &config, self.now)?)
    }

    fn issue_api(&self, authority: &RootAuthority) -> Result<LeafCertificate> {
        let config = ApiCertGenerator::new(self.settings).get_config();
        Ok(issue_certificate(authority, &config, self.now)?)
    }

    fn api_alt_names(&self) -> BTreeSet<AltName> {
        ApiCertGenerator::new(self.settings)
            .alt_names()
            .into_iter()
            .collect()
    }

    /// A leaf can stay when it verifies against `authority`, is outside the
    /// renewal window and carries the expected SANs.
    fn leaf_current(
        &self,
        leaf: &LeafCertificate,
        authority: &RootAuthority,
        alt_names: &BTreeSet<AltName>,
    ) -> bool {
        leaf.is_issued_by(authority) && !self.is_due(&leaf.info) && leaf.info.alt_names == *alt_names
    }

    /// Brings the transport set in line with the desired nodes under
    /// `authority`. Returns the number of certificates issued.
    fn reissue_nodes(&self, set: &mut LeafSet, authority: &RootAuthority) -> Result<usize> {
        let desired = self.desired_nodes();
        let generator = NodeCertGenerator::new(self.settings);
        set.certificates
            .retain(|name, _| desired.iter().any(|node| node.name == *name));

        let mut issued = 0;
        for node in &desired {
            let alt_names: BTreeSet<AltName> = generator.config_for(node).alt_names.into_iter().collect();
            let current = set
                .certificates
                .get(&node.name)
                .is_some_and(|leaf| self.leaf_current(leaf, authority, &alt_names));
            if !current {
                set.certificates
                    .insert(node.name.clone(), self.issue_node(authority, node)?);
                issued += 1;
            }
        }
        Ok(issued)
    }

    fn reissue_api(&self, set: &mut LeafSet, authority: &RootAuthority) -> Result<bool> {
        let alt_names = self.api_alt_names();
        let current = set
            .certificates
            .get(API_ENTRY)
            .is_some_and(|leaf| self.leaf_current(leaf, authority, &alt_names));
        if current {
            return Ok(false);
        }
        set.certificates.retain(|name, _| name == API_ENTRY);
        set.certificates
            .insert(API_ENTRY.to_string(), self.issue_api(authority)?);
        Ok(true)
    }

    async fn fresh_authority(&self, purpose: Purpose) -> Result<RootAuthority> {
        let authority = self.generate_authority(purpose)?;
        self.store.write_authority(&authority).await?;
        Ok(authority)
    }

    async fn create(&self, mut snapshot: Snapshot, checkpoints: &mut Checkpoints) -> Result<Duration> {
        let had_progress = checkpoints.any_true();
        let mut fresh_transport = false;

        let transport = match snapshot.transport_authority.take() {
            Some(authority) if !self.is_due(&authority.info) => authority,
            _ => {
                fresh_transport = true;
                self.fresh_authority(Purpose::Transport).await?
            }
        };

        if self.settings.manages_api() {
            let authority = match snapshot.api_authority.take() {
                Some(authority) if !self.is_due(&authority.info) => authority,
                _ => self.fresh_authority(Purpose::Api).await?,
            };
            let mut set = match snapshot.api_set.take() {
                Some(set) if set.bundle.is_exactly(&authority) => set,
                _ => LeafSet::new(Purpose::Api, TrustBundle::of(&authority)),
            };
            self.reissue_api(&mut set, &authority)?;
            self.store.write_leaf_set(&set).await?;
        }

        // The transport set goes last: its presence marks the bootstrap as done.
        // Pods that may hold the lost trust are marked in the same write, so the
        // marker survives a failure before they are dealt with.
        let mut set = LeafSet::new(Purpose::Transport, TrustBundle::of(&transport));
        set.stale_workload = fresh_transport && had_progress;
        let issued = self.reissue_nodes(&mut set, &transport)?;
        self.store.write_leaf_set(&set).await?;

        for checkpoint in Checkpoint::ALL {
            checkpoints.set(checkpoint, true, REASON_BOOTSTRAPPED, "", self.now);
        }
        info!(nodes = issued, fresh_authority = fresh_transport, "bootstrapped cluster certificates");

        if set.stale_workload {
            self.handle_stale_workload(checkpoints).await?;
        }
        Ok(self.config.transition_requeue())
    }

    /// Running pods still trust the lost transport authority and cannot join
    /// nodes holding the regenerated material.
    ///
    /// The marker on the transport set is only cleared once no pods are left
    /// or they were deleted; a report alone keeps it, so enabling
    /// `forceRecreatePods` later still recreates them.
    async fn handle_stale_workload(&self, checkpoints: &mut Checkpoints) -> Result<()> {
        let pods = self.workload.pod_names().await?;
        if pods.is_empty() {
            debug!("no pods hold the lost transport trust");
            return self.clear_stale_workload().await;
        }

        if self.settings.force_recreate_pods {
            warn!(pods = pods.len(), "transport trust was regenerated, recreating pods");
            self.workload.delete_pods(&pods).await?;
            checkpoints.set(
                Checkpoint::Ready,
                true,
                REASON_PODS_RECREATED,
                format!("recreated {} pods after regenerating transport trust", pods.len()),
                self.now,
            );
            self.clear_stale_workload().await?;
        } else {
            warn!(pods = ?pods, "transport trust was regenerated while pods are running");
            checkpoints.set(
                Checkpoint::Ready,
                true,
                REASON_STALE_WORKLOAD,
                format!(
                    "pods {} hold trust from a lost transport authority; set spec.tls.forceRecreatePods to recreate them",
                    pods.join(", ")
                ),
                self.now,
            );
        }
        Ok(())
    }

    /// Re-reads the transport set so writes made earlier in this invocation
    /// are kept.
    async fn clear_stale_workload(&self) -> Result<()> {
        if let Some(mut set) = self.store.read_leaf_set(Purpose::Transport).await? {
            set.stale_workload = false;
            self.store.write_leaf_set(&set).await?;
        }
        Ok(())
    }

    async fn renew_pki(&self, snapshot: &Snapshot, checkpoints: &mut Checkpoints) -> Result<Duration> {
        checkpoints.reset_all(REASON_ROTATION_STARTED, self.now);

        for purpose in self.settings.managed_purposes() {
            let authority = match snapshot.authority(purpose) {
                Some(authority) if !self.is_due(&authority.info) => authority.clone(),
                previous => {
                    let authority = self.generate_authority(purpose)?;
                    self.store.write_authority(&authority).await?;
                    info!(
                        %purpose,
                        serial = %authority.info.serial,
                        replaces = previous.map(|p| p.info.serial.as_str()).unwrap_or("none"),
                        "generated new authority"
                    );
                    authority
                }
            };

            let mut set = snapshot
                .leaf_set(purpose)
                .cloned()
                .unwrap_or_else(|| LeafSet::new(purpose, TrustBundle::default()));
            set.bundle.push(&authority);
            self.store.write_leaf_set(&set).await?;
        }

        checkpoints.set(
            Checkpoint::GeneratePki,
            true,
            REASON_AUTHORITY_GENERATED,
            "",
            self.now,
        );
        info!(phase = %Phase::RenewPki, "authorities ready, waiting for propagation");
        Ok(self.config.transition_requeue())
    }

    /// Opens once the workload reports a finished rollout. Never opens on a
    /// timer; a long wait is only reported.
    async fn gate(&self, checkpoint: Checkpoint, checkpoints: &mut Checkpoints) -> Result<Duration> {
        if self.workload.rollout_complete().await? {
            checkpoints.set(checkpoint, true, REASON_ROLLOUT_COMPLETE, "", self.now);
            info!(%checkpoint, "rollout complete");
            return Ok(self.config.transition_requeue());
        }

        let waiting_since = checkpoint
            .previous()
            .map_or(self.now, |previous| checkpoints.transitioned_at(previous));
        let timeout = self.config.propagation_timeout();
        if self.now - waiting_since > timeout {
            warn!(
                %checkpoint,
                waiting_since = %waiting_since,
                "rollout has not completed within the propagation timeout"
            );
            checkpoints.set(
                checkpoint,
                false,
                REASON_PROPAGATION_STALLED,
                format!(
                    "rollout has not completed within {} seconds",
                    timeout.num_seconds()
                ),
                self.now,
            );
        } else {
            debug!(%checkpoint, "waiting for rollout");
            checkpoints.set(
                checkpoint,
                false,
                REASON_AWAITING_ROLLOUT,
                "waiting for every node to run the latest pod specification",
                self.now,
            );
        }
        Ok(self.config.gate_poll())
    }

    async fn renew_certificates(&self, snapshot: &Snapshot, checkpoints: &mut Checkpoints) -> Result<Duration> {
        for purpose in self.settings.managed_purposes() {
            let Some(authority) = snapshot.authority(purpose) else {
                warn!(%purpose, "authority disappeared during rotation, starting over");
                checkpoints.reset_all(REASON_AUTHORITY_MISSING, self.now);
                return Ok(self.config.transition_requeue());
            };

            let mut set = snapshot
                .leaf_set(purpose)
                .cloned()
                .unwrap_or_else(|| LeafSet::new(purpose, TrustBundle::of(authority)));
            set.bundle.push(authority);
            let issued = match purpose {
                Purpose::Transport => self.reissue_nodes(&mut set, authority)?,
                Purpose::Api => usize::from(self.reissue_api(&mut set, authority)?),
            };
            self.store.write_leaf_set(&set).await?;
            info!(%purpose, issued, "leaf certificates renewed");
        }

        checkpoints.set(
            Checkpoint::GenerateCertificates,
            true,
            REASON_CERTIFICATES_ISSUED,
            "",
            self.now,
        );
        Ok(self.config.transition_requeue())
    }

    async fn clean_authority(&self, snapshot: &Snapshot, checkpoints: &mut Checkpoints) -> Result<Duration> {
        let purposes = self.settings.managed_purposes();

        for purpose in &purposes {
            let Some(authority) = snapshot.authority(*purpose) else {
                warn!(%purpose, "authority disappeared during rotation, starting over");
                checkpoints.reset_all(REASON_AUTHORITY_MISSING, self.now);
                return Ok(self.config.transition_requeue());
            };
            let outdated = snapshot
                .leaf_set(*purpose)
                .map_or(true, |set| !set.all_issued_by(authority));
            if outdated {
                // Dropping the old authority now would cut off the holders of
                // those certificates.
                warn!(%purpose, "certificates not issued by the current authority");
                checkpoints.set(
                    Checkpoint::GenerateCertificates,
                    false,
                    REASON_CERTIFICATES_OUTDATED,
                    format!("{} certificates must be reissued", purpose),
                    self.now,
                );
                return Ok(self.config.transition_requeue());
            }
        }

        let mut retired = false;
        for purpose in purposes {
            let (Some(authority), Some(set)) = (snapshot.authority(purpose), snapshot.leaf_set(purpose)) else {
                continue;
            };
            let mut set = set.clone();
            if set.bundle.retain_only(authority) {
                self.store.write_leaf_set(&set).await?;
                info!(%purpose, "retired previous authority");
                retired = true;
            }
        }

        if retired {
            checkpoints.set(Checkpoint::Ready, true, REASON_ROTATION_COMPLETE, "", self.now);
            info!("certificate rotation complete");
        } else {
            checkpoints.set(Checkpoint::Ready, true, REASON_RECONCILED, "", self.now);
            debug!("no previous authority to retire");
        }
        Ok(self.config.transition_requeue())
    }

    async fn steady(&self, snapshot: &Snapshot) -> Result<Duration> {
        if let (Some(authority), Some(set)) = (snapshot.api_authority.as_ref(), snapshot.api_set.as_ref()) {
            let mut set = set.clone();
            if self.reissue_api(&mut set, authority)? {
                info!("API certificate names changed, reissued");
                self.store.write_leaf_set(&set).await?;
            }
        }

        self.store
            .ensure_metadata(&self.settings.managed_purposes())
            .await?;
        Ok(self.config.steady_requeue())
    }

    /// Adds certificates for new nodes and drops those of removed nodes, under
    /// the current transport authority.
    async fn sync_membership(&self, snapshot: &mut Snapshot) -> Result<bool> {
        let (Some(authority), Some(set)) = (
            snapshot.transport_authority.as_ref(),
            snapshot.transport_set.as_ref(),
        ) else {
            return Ok(false);
        };

        let desired = self.desired_nodes();
        let membership = diff(
            desired.iter().map(|node| node.name.as_str()),
            set.certificates.keys().map(String::as_str),
        );
        if membership.is_empty() {
            return Ok(false);
        }

        let mut set = set.clone();
        for name in &membership.removed {
            set.certificates.remove(name);
        }
        for node in desired.iter().filter(|node| membership.added.contains(&node.name)) {
            set.certificates
                .insert(node.name.clone(), self.issue_node(authority, node)?);
        }
        info!(added = ?membership.added, removed = ?membership.removed, "node membership changed");
        let written = self.store.write_leaf_set(&set).await?;
        snapshot.transport_set = Some(set);
        Ok(written)
    }
}
