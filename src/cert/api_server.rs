// src/cert/api_server.rs
use super::types::{AltName, CertificateConfig, Purpose, SubjectInfo};
use crate::config::PkiSettings;

/// Builds the request for the client-facing API certificate.
pub struct ApiCertGenerator<'a> {
    settings: &'a PkiSettings,
}

impl<'a> ApiCertGenerator<'a> {
    pub fn new(settings: &'a PkiSettings) -> Self {
        Self { settings }
    }

    pub fn get_config(&self) -> CertificateConfig {
        CertificateConfig {
            purpose: Purpose::Api,
            subject: SubjectInfo::new(self.settings.cluster_name.clone())
                .with_organization(self.settings.cluster_name.clone())
                .with_unit(Purpose::Api.as_str()),
            alt_names: self.alt_names(),
            validity_days: self.settings.validity_days,
            key_size: self.settings.key_bits,
        }
    }

    /// Service names of the cluster followed by the user-configured names and IPs.
    pub fn alt_names(&self) -> Vec<AltName> {
        let cluster = &self.settings.cluster_name;
        let namespace = &self.settings.namespace;

        let mut names = vec![
            AltName::dns(cluster.clone()),
            AltName::dns(format!("{}.{}", cluster, namespace)),
            AltName::dns(format!("{}.{}.svc", cluster, namespace)),
            AltName::dns(format!(
                "{}.{}.svc.{}",
                cluster, namespace, self.settings.cluster_domain
            )),
        ];
        for name in &self.settings.alt_names {
            let name = AltName::dns(name.clone());
            if !names.contains(&name) {
                names.push(name);
            }
        }
        for ip in &self.settings.alt_ips {
            let ip = AltName::ip(*ip);
            if !names.contains(&ip) {
                names.push(ip);
            }
        }
        names
    }
}
