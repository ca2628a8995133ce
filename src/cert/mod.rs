// src/cert/mod.rs
mod api_server;
mod ca;
mod node;
mod openssl;
mod operations;
mod types;
mod verification;

pub use api_server::ApiCertGenerator;
pub use ca::{authority_subject, create_authority, RootAuthority};
pub use node::NodeCertGenerator;
pub use openssl::validate_key_size;
pub use operations::{issue_certificate, needs_renewal, CertError, LeafCertificate};
pub use types::{AltName, Purpose};
#[cfg(test)]
pub use types::{CertificateConfig, SubjectInfo};
pub use verification::{split_pem_certificates, CertificateInfo};
