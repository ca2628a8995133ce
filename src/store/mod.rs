//! Persistence of authorities and leaf sets as named key/value records
//!
//! Every piece of state the rotation needs between invocations lives in these
//! records or in the cluster's status conditions. Nothing is kept in memory.

mod secrets;
#[cfg(test)]
pub(crate) mod memory;
mod records;

pub use secrets::{KubeSecretStore, CLUSTER_LABEL, MANAGED_BY_LABEL};
pub use records::{
    authority_record_name, leaf_set_record_name, LeafSet, RecordData, TrustBundle, API_ENTRY,
};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cert::{Purpose, RootAuthority};
use crate::error::Result;

/// Raw record storage, one record per name.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<RecordData>>;

    /// Creates or replaces the record. Returns false without writing when the
    /// stored payload already equals `data`.
    async fn upsert(&self, name: &str, data: RecordData) -> Result<bool>;

    /// Restores ownership and labels on an existing record. Returns true when
    /// something had to be fixed.
    async fn ensure_metadata(&self, name: &str) -> Result<bool>;
}

/// Typed view over the records of one cluster.
pub struct CertificateStore<'a, S: SecretStore + ?Sized> {
    backend: &'a S,
    cluster: String,
}

impl<'a, S: SecretStore + ?Sized> CertificateStore<'a, S> {
    pub fn new(backend: &'a S, cluster: impl Into<String>) -> Self {
        Self {
            backend,
            cluster: cluster.into(),
        }
    }

    /// Missing and unusable authority records both read as `None`.
    pub async fn read_authority(&self, purpose: Purpose) -> Result<Option<RootAuthority>> {
        let name = authority_record_name(&self.cluster, purpose);
        let Some(data) = self.backend.get(&name).await? else {
            return Ok(None);
        };
        match records::authority_from_data(purpose, &data) {
            Ok(authority) => Ok(Some(authority)),
            Err(e) => {
                warn!(record = %name, error = %e, "authority record is unusable, treating as absent");
                Ok(None)
            }
        }
    }

    pub async fn write_authority(&self, authority: &RootAuthority) -> Result<bool> {
        let name = authority_record_name(&self.cluster, authority.purpose);
        let written = self
            .backend
            .upsert(&name, records::authority_to_data(authority))
            .await?;
        if written {
            debug!(
                record = %name,
                serial = %authority.info.serial,
                key_size = authority.key_size,
                not_after = %authority.info.not_after,
                "stored authority"
            );
        }
        Ok(written)
    }

    pub async fn read_leaf_set(&self, purpose: Purpose) -> Result<Option<LeafSet>> {
        let name = leaf_set_record_name(&self.cluster, purpose);
        Ok(self
            .backend
            .get(&name)
            .await?
            .map(|data| LeafSet::from_data(purpose, &data)))
    }

    pub async fn write_leaf_set(&self, set: &LeafSet) -> Result<bool> {
        let name = leaf_set_record_name(&self.cluster, set.purpose);
        let written = self.backend.upsert(&name, set.to_data()?).await?;
        if written {
            debug!(
                record = %name,
                certificates = set.certificates.len(),
                bundle = set.bundle.len(),
                "stored leaf set"
            );
        }
        Ok(written)
    }

    /// Repairs labels and ownership on every record of `purposes`.
    pub async fn ensure_metadata(&self, purposes: &[Purpose]) -> Result<bool> {
        let mut repaired = false;
        for purpose in purposes {
            for name in [
                authority_record_name(&self.cluster, *purpose),
                leaf_set_record_name(&self.cluster, *purpose),
            ] {
                if self.backend.ensure_metadata(&name).await? {
                    warn!(record = %name, "restored record labels and ownership");
                    repaired = true;
                }
            }
        }
        Ok(repaired)
    }
}
