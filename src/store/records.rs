use openssl::x509::X509;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::cert::{split_pem_certificates, CertError, LeafCertificate, Purpose, RootAuthority};

/// Raw payload of one stored record.
pub type RecordData = BTreeMap<String, Vec<u8>>;

pub const CA_CERT_KEY: &str = "ca.crt";
pub const CA_KEY_KEY: &str = "ca.key";
pub const CA_PUBLIC_KEY_KEY: &str = "ca.pub";
pub const CA_CRL_KEY: &str = "ca.crl";
/// Entry name of the single certificate in the API leaf set
pub const API_ENTRY: &str = "tls";
/// Present while running pods may still hold trust from a lost authority
pub const STALE_WORKLOAD_KEY: &str = "stale-workload";

const CERT_SUFFIX: &str = ".crt";
const KEY_SUFFIX: &str = ".key";

pub fn authority_record_name(cluster: &str, purpose: Purpose) -> String {
    format!("{}-{}-ca", cluster, purpose)
}

pub fn leaf_set_record_name(cluster: &str, purpose: Purpose) -> String {
    format!("{}-{}-certs", cluster, purpose)
}

pub fn authority_to_data(authority: &RootAuthority) -> RecordData {
    let mut data = RecordData::new();
    data.insert(CA_CERT_KEY.to_string(), authority.cert_pem.as_bytes().to_vec());
    data.insert(CA_KEY_KEY.to_string(), authority.key_pem.as_bytes().to_vec());
    data.insert(
        CA_PUBLIC_KEY_KEY.to_string(),
        authority.public_key_pem.as_bytes().to_vec(),
    );
    data.insert(CA_CRL_KEY.to_string(), authority.crl_pem.as_bytes().to_vec());
    data
}

pub fn authority_from_data(purpose: Purpose, data: &RecordData) -> Result<RootAuthority, CertError> {
    RootAuthority::from_pem(
        purpose,
        text(data, CA_CERT_KEY)?,
        text(data, CA_KEY_KEY)?,
        text(data, CA_PUBLIC_KEY_KEY)?,
        text(data, CA_CRL_KEY)?,
    )
}

fn text<'a>(data: &'a RecordData, key: &str) -> Result<&'a str, CertError> {
    let bytes = data
        .get(key)
        .ok_or_else(|| CertError::Parse(format!("missing {}", key)))?;
    std::str::from_utf8(bytes).map_err(|e| CertError::Parse(format!("{}: {}", key, e)))
}

/// Authority certificates a verifier accepts, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustBundle {
    entries: Vec<Vec<u8>>,
}

impl TrustBundle {
    pub fn of(authority: &RootAuthority) -> Self {
        Self {
            entries: vec![authority.info.der.clone()],
        }
    }

    /// Unreadable bundles come back empty.
    pub fn parse(pem: &str) -> Self {
        match split_pem_certificates(pem) {
            Ok(mut entries) => {
                let mut seen = BTreeSet::new();
                entries.retain(|der| seen.insert(der.clone()));
                Self { entries }
            }
            Err(e) => {
                warn!(error = %e, "discarding unreadable trust bundle");
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, authority: &RootAuthority) -> bool {
        self.entries.iter().any(|der| *der == authority.info.der)
    }

    /// True when the authority is the one and only entry.
    pub fn is_exactly(&self, authority: &RootAuthority) -> bool {
        self.entries.len() == 1 && self.contains(authority)
    }

    /// Appends the authority unless it is already trusted.
    pub fn push(&mut self, authority: &RootAuthority) -> bool {
        if self.contains(authority) {
            return false;
        }
        self.entries.push(authority.info.der.clone());
        true
    }

    /// Drops every entry but `authority`.
    pub fn retain_only(&mut self, authority: &RootAuthority) -> bool {
        if self.is_exactly(authority) {
            return false;
        }
        *self = Self::of(authority);
        true
    }

    pub fn to_pem(&self) -> Result<String, CertError> {
        let mut bundle = String::new();
        for der in &self.entries {
            let pem = X509::from_der(der)
                .and_then(|cert| cert.to_pem())
                .map_err(|e| CertError::Parse(format!("trust bundle entry: {}", e)))?;
            bundle.push_str(&String::from_utf8_lossy(&pem));
        }
        Ok(bundle)
    }
}

/// All current leaf certificates of one purpose, with the bundle they ship with.
///
/// Transport entries are keyed by node name; the API set has the single
/// entry [`API_ENTRY`].
#[derive(Debug, Clone)]
pub struct LeafSet {
    pub purpose: Purpose,
    pub bundle: TrustBundle,
    pub certificates: BTreeMap<String, LeafCertificate>,
    /// The set was regenerated under a new authority while pods were running
    /// and those pods have not been dealt with yet.
    pub stale_workload: bool,
}

impl LeafSet {
    pub fn new(purpose: Purpose, bundle: TrustBundle) -> Self {
        Self {
            purpose,
            bundle,
            certificates: BTreeMap::new(),
            stale_workload: false,
        }
    }

    /// Entries whose certificate or key cannot be used are left out, so callers
    /// see them as absent and issue them again.
    pub fn from_data(purpose: Purpose, data: &RecordData) -> Self {
        let bundle = text(data, CA_CERT_KEY)
            .map(TrustBundle::parse)
            .unwrap_or_default();

        let mut certificates = BTreeMap::new();
        for (key, value) in data {
            let Some(name) = key.strip_suffix(CERT_SUFFIX) else {
                continue;
            };
            if key == CA_CERT_KEY {
                continue;
            }
            let key_pem = data.get(&format!("{}{}", name, KEY_SUFFIX));
            let leaf = match (std::str::from_utf8(value), key_pem.map(|k| std::str::from_utf8(k))) {
                (Ok(cert), Some(Ok(key))) => LeafCertificate::from_pem(cert, key),
                _ => Err(CertError::Parse("missing or non-UTF-8 material".to_string())),
            };
            match leaf {
                Ok(leaf) => {
                    certificates.insert(name.to_string(), leaf);
                }
                Err(e) => warn!(%purpose, entry = name, error = %e, "ignoring unusable certificate"),
            }
        }

        Self {
            purpose,
            bundle,
            certificates,
            stale_workload: data.contains_key(STALE_WORKLOAD_KEY),
        }
    }

    pub fn to_data(&self) -> Result<RecordData, CertError> {
        let mut data = RecordData::new();
        data.insert(CA_CERT_KEY.to_string(), self.bundle.to_pem()?.into_bytes());
        if self.stale_workload {
            data.insert(STALE_WORKLOAD_KEY.to_string(), b"true".to_vec());
        }
        for (name, leaf) in &self.certificates {
            data.insert(
                format!("{}{}", name, CERT_SUFFIX),
                leaf.cert_pem.as_bytes().to_vec(),
            );
            data.insert(
                format!("{}{}", name, KEY_SUFFIX),
                leaf.key_pem.as_bytes().to_vec(),
            );
        }
        Ok(data)
    }

    /// True when every certificate verifies against `authority`.
    pub fn all_issued_by(&self, authority: &RootAuthority) -> bool {
        self.certificates
            .values()
            .all(|leaf| leaf.is_issued_by(authority))
    }
}
