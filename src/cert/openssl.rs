// src/cert/openssl.rs
use openssl::{
    bn::{BigNum, MsbOption},
    pkey::{PKey, Private},
    rsa::Rsa,
    x509::X509,
};
use tracing::debug;

use super::operations::CertError;

pub const MIN_KEY_BITS: u32 = 2048;
pub const MAX_KEY_BITS: u32 = 8192;

/// RSA key material in the PEM encodings the records carry.
pub struct GeneratedKey {
    /// PKCS#8 private key
    pub private_pem: String,
    /// SubjectPublicKeyInfo public key
    pub public_pem: String,
}

pub fn validate_key_size(key_size: u32) -> Result<(), CertError> {
    if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&key_size) || key_size % 8 != 0 {
        return Err(CertError::InvalidParameter(format!(
            "RSA key size {} outside {}..={} bits",
            key_size, MIN_KEY_BITS, MAX_KEY_BITS
        )));
    }
    Ok(())
}

pub fn generate_private_key(key_size: u32) -> Result<GeneratedKey, CertError> {
    validate_key_size(key_size)?;
    debug!(key_size, "generating RSA private key");

    let rsa = Rsa::generate(key_size)
        .map_err(|e| CertError::KeyGeneration(format!("RSA {} bits: {}", key_size, e)))?;
    let pkey = PKey::from_rsa(rsa).map_err(|e| CertError::KeyGeneration(e.to_string()))?;

    Ok(GeneratedKey {
        private_pem: pem_string(pkey.private_key_to_pem_pkcs8())?,
        public_pem: pem_string(pkey.public_key_to_pem())?,
    })
}

/// Positive 128-bit serial number, big-endian bytes.
pub fn random_serial() -> Result<Vec<u8>, CertError> {
    let mut serial = BigNum::new().map_err(|e| CertError::KeyGeneration(e.to_string()))?;
    serial
        .rand(127, MsbOption::ONE, false)
        .map_err(|e| CertError::KeyGeneration(format!("serial number: {}", e)))?;
    Ok(serial.to_vec())
}

pub fn load_private_key(pem: &str) -> Result<PKey<Private>, CertError> {
    PKey::private_key_from_pem(pem.as_bytes())
        .map_err(|e| CertError::Parse(format!("private key: {}", e)))
}

/// True if `cert_pem` carries a signature made by the key behind `ca_pem`.
pub fn verify_certificate(cert_pem: &str, ca_pem: &str) -> Result<bool, CertError> {
    let cert = X509::from_pem(cert_pem.as_bytes())
        .map_err(|e| CertError::Parse(format!("certificate: {}", e)))?;
    let ca = X509::from_pem(ca_pem.as_bytes())
        .map_err(|e| CertError::Parse(format!("authority certificate: {}", e)))?;
    let ca_key = ca
        .public_key()
        .map_err(|e| CertError::Parse(format!("authority public key: {}", e)))?;

    // A signature mismatch comes back as Ok(false) or as an error stack depending
    // on the OpenSSL build; both mean "not signed by this authority".
    Ok(cert.verify(&ca_key).unwrap_or(false))
}

/// True if the certificate and private key belong together.
pub fn key_matches_certificate(cert_pem: &str, key_pem: &str) -> bool {
    let (Ok(cert), Ok(key)) = (
        X509::from_pem(cert_pem.as_bytes()),
        PKey::private_key_from_pem(key_pem.as_bytes()),
    ) else {
        return false;
    };
    cert.public_key()
        .map(|public| public.public_eq(&key))
        .unwrap_or(false)
}

fn pem_string(bytes: Result<Vec<u8>, openssl::error::ErrorStack>) -> Result<String, CertError> {
    let bytes = bytes.map_err(|e| CertError::KeyGeneration(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CertError::KeyGeneration(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_weak_and_oversized_keys() {
        assert!(matches!(
            generate_private_key(1024),
            Err(CertError::InvalidParameter(_))
        ));
        assert!(validate_key_size(16384).is_err());
        assert!(validate_key_size(2050).is_err());
        assert!(validate_key_size(2048).is_ok());
        assert!(validate_key_size(4096).is_ok());
    }

    #[test]
    fn generated_key_is_pkcs8() {
        let key = generate_private_key(2048).unwrap();
        assert!(key.private_pem.contains("BEGIN PRIVATE KEY"));
        assert!(key.public_pem.contains("BEGIN PUBLIC KEY"));
        assert!(load_private_key(&key.private_pem).is_ok());
    }

    #[test]
    fn serials_are_random_and_positive() {
        let a = random_serial().unwrap();
        let b = random_serial().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a[0] & 0x80 == 0);
    }
}
