use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, CertificateRevocationListParams, IsCa, Issuer, KeyIdMethod,
    KeyUsagePurpose, SerialNumber,
};
use tracing::info;

use super::{
    openssl::{generate_private_key, key_matches_certificate, load_private_key},
    operations::{certificate_params, rsa_key_pair, CertError},
    types::{Purpose, SubjectInfo},
    verification::CertificateInfo,
};

/// A self-signed certificate authority for one [`Purpose`].
///
/// Authorities are replaced on rotation, never modified in place.
#[derive(Debug, Clone)]
pub struct RootAuthority {
    pub purpose: Purpose,
    pub cert_pem: String,
    pub key_pem: String,
    pub public_key_pem: String,
    pub crl_pem: String,
    pub key_size: u32,
    pub info: CertificateInfo,
}

impl RootAuthority {
    /// Rebuilds an authority from stored PEM material.
    pub fn from_pem(
        purpose: Purpose,
        cert_pem: &str,
        key_pem: &str,
        public_key_pem: &str,
        crl_pem: &str,
    ) -> Result<Self, CertError> {
        let info = CertificateInfo::from_pem(cert_pem)?;
        if !info.is_ca {
            return Err(CertError::Parse(format!(
                "{} authority certificate is not a CA",
                purpose
            )));
        }
        let key = load_private_key(key_pem)?;
        if !key_matches_certificate(cert_pem, key_pem) {
            return Err(CertError::Parse(format!(
                "{} authority key does not match its certificate",
                purpose
            )));
        }

        Ok(Self {
            purpose,
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
            public_key_pem: public_key_pem.to_string(),
            crl_pem: crl_pem.to_string(),
            key_size: key.bits(),
            info,
        })
    }
}

/// Subject put on the authority of `cluster` for `purpose`.
pub fn authority_subject(cluster: &str, purpose: Purpose) -> SubjectInfo {
    SubjectInfo::new(format!("{}-{}-ca", cluster, purpose))
        .with_organization(cluster)
        .with_unit(purpose.as_str())
}

/// Generates a new self-signed authority with an empty revocation list.
pub fn create_authority(
    purpose: Purpose,
    subject: &SubjectInfo,
    validity_days: u32,
    key_size: u32,
    now: DateTime<Utc>,
) -> Result<RootAuthority, CertError> {
    info!(%purpose, subject = %subject.common_name, key_size, "generating root authority");

    let mut params = certificate_params(subject, &[], validity_days, now)?;
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let not_before = params.not_before;
    let not_after = params.not_after;

    let key = generate_private_key(key_size)?;
    let key_pair = rsa_key_pair(&key.private_pem)?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CertError::Generation(format!("failed to self-sign authority: {}", e)))?;
    let cert_pem = cert.pem();

    let issuer = Issuer::from_ca_cert_pem(&cert_pem, &key_pair)
        .map_err(|e| CertError::Parse(format!("failed to load new authority: {}", e)))?;
    let crl = CertificateRevocationListParams {
        this_update: not_before,
        next_update: not_after,
        crl_number: SerialNumber::from_slice(&[1]),
        issuing_distribution_point: None,
        revoked_certs: Vec::new(),
        key_identifier_method: KeyIdMethod::Sha256,
    }
    .signed_by(&issuer)
    .map_err(|e| CertError::Generation(format!("failed to sign revocation list: {}", e)))?;
    let crl_pem = crl
        .pem()
        .map_err(|e| CertError::Generation(format!("failed to encode revocation list: {}", e)))?;

    let info = CertificateInfo::from_pem(&cert_pem)?;

    Ok(RootAuthority {
        purpose,
        cert_pem,
        key_pem: key.private_pem,
        public_key_pem: key.public_pem,
        crl_pem,
        key_size,
        info,
    })
}
