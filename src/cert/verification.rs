// src/cert/verification.rs
use chrono::{DateTime, TimeZone, Utc};
use std::{collections::BTreeSet, net::IpAddr};
use x509_parser::{
    extensions::GeneralName,
    pem::Pem,
    prelude::{FromDer, ParsedExtension, X509Certificate},
};

use super::{operations::CertError, types::AltName};

/// The parts of a parsed certificate the lifecycle decisions look at.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub subject: String,
    pub not_after: DateTime<Utc>,
    pub serial: String,
    pub is_ca: bool,
    pub alt_names: BTreeSet<AltName>,
    /// DER bytes, used to compare certificates for identity
    pub der: Vec<u8>,
}

impl CertificateInfo {
    /// Parses the first certificate block of a PEM document.
    pub fn from_pem(pem: &str) -> Result<Self, CertError> {
        let der = split_pem_certificates(pem)?
            .into_iter()
            .next()
            .ok_or_else(|| CertError::Parse("no certificate in PEM data".to_string()))?;
        Self::from_der(der)
    }

    pub fn from_der(der: Vec<u8>) -> Result<Self, CertError> {
        let (_remainder, cert) = X509Certificate::from_der(&der)
            .map_err(|e| CertError::Parse(format!("certificate: {}", e)))?;

        let not_after = timestamp(cert.validity().not_after.timestamp())?;

        let is_ca = cert
            .extensions()
            .iter()
            .find_map(|ext| match ext.parsed_extension() {
                ParsedExtension::BasicConstraints(bc) => Some(bc.ca),
                _ => None,
            })
            .unwrap_or(false);

        let mut alt_names = BTreeSet::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => {
                        alt_names.insert(AltName::dns(*dns));
                    }
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            alt_names.insert(AltName::ip(ip));
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(CertificateInfo {
            subject: cert.subject().to_string(),
            not_after,
            serial: hex::encode(cert.raw_serial()),
            is_ca,
            alt_names,
            der: der.clone(),
        })
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.not_after - now
    }
}

/// Splits a trust bundle into the DER bytes of each certificate, in order.
pub fn split_pem_certificates(pem: &str) -> Result<Vec<Vec<u8>>, CertError> {
    let mut blocks = Vec::new();
    for block in Pem::iter_from_buffer(pem.as_bytes()) {
        let block = block.map_err(|e| CertError::Parse(format!("PEM: {}", e)))?;
        if block.label == "CERTIFICATE" {
            blocks.push(block.contents);
        }
    }
    Ok(blocks)
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, CertError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| CertError::Parse(format!("invalid timestamp {}", secs)))
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_garbage_pem_is_rejected() {
        assert!(CertificateInfo::from_pem("").is_err());
        assert!(CertificateInfo::from_pem("not a certificate").is_err());
    }

    #[test]
    fn non_certificate_blocks_are_skipped() {
        let key = crate::cert::openssl::generate_private_key(2048).unwrap();
        let blocks = split_pem_certificates(&key.private_pem).unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn ip_bytes_decode() {
        assert_eq!(
            ip_from_bytes(&[127, 0, 0, 1]),
            Some("127.0.0.1".parse().unwrap())
        );
        assert_eq!(ip_from_bytes(&[1, 2, 3]), None);
    }
}
