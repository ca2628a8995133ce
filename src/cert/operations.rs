// src/cert/operations.rs
use chrono::{DateTime, Duration, Utc};
use rcgen::{
    string::Ia5String, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
    PKCS_RSA_SHA256,
};
use thiserror::Error;
use tracing::debug;

use super::{
    ca::RootAuthority,
    openssl::{generate_private_key, key_matches_certificate, random_serial, verify_certificate},
    types::{AltName, CertificateConfig, SubjectInfo},
    verification::CertificateInfo,
};

/// Backdating applied to `notBefore` so freshly issued material is accepted by
/// peers whose clocks run slightly behind.
const CLOCK_SKEW_MINUTES: i64 = 5;

#[derive(Debug, Error)]
pub enum CertError {
    /// Parameters no key or certificate can be generated from
    #[error("invalid certificate parameter: {0}")]
    InvalidParameter(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("certificate generation failed: {0}")]
    Generation(String),

    /// Stored material that cannot be parsed
    #[error("certificate parsing error: {0}")]
    Parse(String),
}

/// A certificate plus its private key, issued by a [`RootAuthority`].
#[derive(Debug, Clone)]
pub struct LeafCertificate {
    pub cert_pem: String,
    pub key_pem: String,
    pub info: CertificateInfo,
}

impl LeafCertificate {
    /// Rebuilds a leaf from stored PEM. Fails when either half is unusable or
    /// they do not belong together.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CertError> {
        let info = CertificateInfo::from_pem(cert_pem)?;
        if !key_matches_certificate(cert_pem, key_pem) {
            return Err(CertError::Parse(format!(
                "private key does not match certificate {}",
                info.subject
            )));
        }
        Ok(Self {
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
            info,
        })
    }

    pub fn is_issued_by(&self, authority: &RootAuthority) -> bool {
        verify_certificate(&self.cert_pem, &authority.cert_pem).unwrap_or(false)
    }
}

/// Issues a leaf certificate for `config.subject`, signed by `authority`.
pub fn issue_certificate(
    authority: &RootAuthority,
    config: &CertificateConfig,
    now: DateTime<Utc>,
) -> Result<LeafCertificate, CertError> {
    debug!(
        purpose = %config.purpose,
        subject = %config.subject.common_name,
        alt_names = config.alt_names.len(),
        "issuing leaf certificate"
    );

    let mut params = certificate_params(&config.subject, &config.alt_names, config.validity_days, now)?;
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    // Nodes both accept and open transport connections
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params.use_authority_key_identifier_extension = true;

    let key = generate_private_key(config.key_size)?;
    let leaf_key = rsa_key_pair(&key.private_pem)?;

    let ca_key = rsa_key_pair(&authority.key_pem)?;
    let issuer = Issuer::from_ca_cert_pem(&authority.cert_pem, &ca_key)
        .map_err(|e| CertError::Parse(format!("failed to load issuer: {}", e)))?;

    let cert = params
        .signed_by(&leaf_key, &issuer)
        .map_err(|e| CertError::Generation(format!("failed to sign certificate: {}", e)))?;
    let cert_pem = cert.pem();
    let info = CertificateInfo::from_pem(&cert_pem)?;

    Ok(LeafCertificate {
        cert_pem,
        key_pem: key.private_pem,
        info,
    })
}

/// True once the certificate is within `renewal_window` of its expiry.
pub fn needs_renewal(info: &CertificateInfo, renewal_window: Duration, now: DateTime<Utc>) -> bool {
    info.remaining(now) <= renewal_window
}

pub(super) fn rsa_key_pair(pem: &str) -> Result<KeyPair, CertError> {
    KeyPair::from_pem_and_sign_algo(pem, &PKCS_RSA_SHA256)
        .map_err(|e| CertError::Parse(format!("failed to load RSA key: {}", e)))
}

pub(super) fn certificate_params(
    subject: &SubjectInfo,
    alt_names: &[AltName],
    validity_days: u32,
    now: DateTime<Utc>,
) -> Result<CertificateParams, CertError> {
    if validity_days == 0 {
        return Err(CertError::InvalidParameter(
            "validity must be at least one day".to_string(),
        ));
    }
    if subject.common_name.is_empty() {
        return Err(CertError::InvalidParameter("empty common name".to_string()));
    }

    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(subject.common_name.clone()),
    );
    if let Some(organization) = &subject.organization {
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(organization.clone()),
        );
    }
    if let Some(unit) = &subject.organizational_unit {
        dn.push(
            DnType::OrganizationalUnitName,
            DnValue::Utf8String(unit.clone()),
        );
    }
    params.distinguished_name = dn;

    params.not_before = offset_time(now - Duration::minutes(CLOCK_SKEW_MINUTES))?;
    params.not_after = offset_time(now + Duration::days(i64::from(validity_days)))?;
    params.serial_number = Some(SerialNumber::from_slice(&random_serial()?));

    params.subject_alt_names = alt_names
        .iter()
        .map(|name| match name {
            AltName::Ip(addr) => Ok(SanType::IpAddress(*addr)),
            AltName::Dns(dns) => Ia5String::try_from(dns.clone())
                .map(SanType::DnsName)
                .map_err(|e| {
                    CertError::InvalidParameter(format!("invalid DNS name '{}': {}", dns, e))
                }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(params)
}

pub(super) fn offset_time(at: DateTime<Utc>) -> Result<time::OffsetDateTime, CertError> {
    time::OffsetDateTime::from_unix_timestamp(at.timestamp())
        .map_err(|e| CertError::InvalidParameter(format!("timestamp out of range: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{ca::create_authority, types::Purpose};

    fn leaf_config(validity_days: u32) -> CertificateConfig {
        CertificateConfig {
            purpose: Purpose::Transport,
            subject: SubjectInfo::new("logs-data-0").with_organization("search"),
            alt_names: vec![
                AltName::dns("logs-data-0"),
                AltName::dns("logs-data-0.logs-data-headless"),
                AltName::ip("127.0.0.1".parse().unwrap()),
            ],
            validity_days,
            key_size: 2048,
        }
    }

    fn authority(now: DateTime<Utc>) -> RootAuthority {
        create_authority(
            Purpose::Transport,
            &SubjectInfo::new("logs transport CA"),
            3650,
            2048,
            now,
        )
        .unwrap()
    }

    #[test]
    fn issued_certificate_is_fresh() {
        let now = Utc::now();
        let ca = authority(now);
        let leaf = issue_certificate(&ca, &leaf_config(397), now).unwrap();

        assert!(leaf.info.not_after > now);
        let remaining = leaf.info.not_after - now;
        assert!((remaining - Duration::days(397)).num_seconds().abs() <= 1);
        assert!(!leaf.info.is_ca);
    }

    #[test]
    fn issued_certificate_chains_to_its_authority_only() {
        let now = Utc::now();
        let ca = authority(now);
        let unrelated = authority(now);
        let leaf = issue_certificate(&ca, &leaf_config(30), now).unwrap();

        assert!(leaf.is_issued_by(&ca));
        assert!(!leaf.is_issued_by(&unrelated));
        assert!(verify_certificate(&leaf.cert_pem, &ca.cert_pem).unwrap());
        assert!(!verify_certificate(&leaf.cert_pem, &unrelated.cert_pem).unwrap());
    }

    #[test]
    fn issued_certificate_carries_alt_names() {
        let now = Utc::now();
        let ca = authority(now);
        let config = leaf_config(30);
        let leaf = issue_certificate(&ca, &config, now).unwrap();

        let expected = config.alt_names.iter().cloned().collect();
        assert_eq!(leaf.info.alt_names, expected);
        assert!(leaf.info.subject.contains("logs-data-0"));
    }

    #[test]
    fn stored_leaf_round_trips_and_rejects_mismatched_key() {
        let now = Utc::now();
        let ca = authority(now);
        let a = issue_certificate(&ca, &leaf_config(30), now).unwrap();
        let b = issue_certificate(&ca, &leaf_config(30), now).unwrap();

        assert!(LeafCertificate::from_pem(&a.cert_pem, &a.key_pem).is_ok());
        assert!(LeafCertificate::from_pem(&a.cert_pem, &b.key_pem).is_err());
        assert!(LeafCertificate::from_pem("garbage", &a.key_pem).is_err());
    }

    #[test]
    fn renewal_boundary() {
        let now = Utc::now();
        let ca = authority(now);
        let leaf = issue_certificate(&ca, &leaf_config(30), now).unwrap();
        let window = Duration::days(30);
        let expiry = leaf.info.not_after;

        // remaining == window - 1s
        let inside = expiry - window + Duration::seconds(1);
        assert!(needs_renewal(&leaf.info, window, inside));
        // remaining == window + 1s
        let outside = expiry - window - Duration::seconds(1);
        assert!(!needs_renewal(&leaf.info, window, outside));
        // remaining == window
        assert!(needs_renewal(&leaf.info, window, expiry - window));
    }

    #[test]
    fn rejects_invalid_parameters() {
        let now = Utc::now();
        let ca = authority(now);

        let mut config = leaf_config(0);
        assert!(matches!(
            issue_certificate(&ca, &config, now),
            Err(CertError::InvalidParameter(_))
        ));

        config.validity_days = 30;
        config.key_size = 1000;
        assert!(matches!(
            issue_certificate(&ca, &config, now),
            Err(CertError::InvalidParameter(_))
        ));

        config.key_size = 2048;
        config.alt_names = vec![AltName::dns("bad\u{e9}name")];
        assert!(matches!(
            issue_certificate(&ca, &config, now),
            Err(CertError::InvalidParameter(_))
        ));
    }
}
