use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::types::{AltName, CertificateConfig, Purpose, SubjectInfo};
use crate::config::PkiSettings;
use crate::discovery::NodeIdentity;

/// Builds transport certificate requests for cluster nodes.
pub struct NodeCertGenerator<'a> {
    settings: &'a PkiSettings,
}

impl<'a> NodeCertGenerator<'a> {
    pub fn new(settings: &'a PkiSettings) -> Self {
        Self { settings }
    }

    pub fn config_for(&self, node: &NodeIdentity) -> CertificateConfig {
        CertificateConfig {
            purpose: Purpose::Transport,
            subject: SubjectInfo::new(node.name.clone())
                .with_organization(self.settings.cluster_name.clone())
                .with_unit(Purpose::Transport.as_str()),
            alt_names: self.alt_names(node),
            validity_days: self.settings.validity_days,
            key_size: self.settings.key_bits,
        }
    }

    /// The node's stable network names plus loopback.
    fn alt_names(&self, node: &NodeIdentity) -> Vec<AltName> {
        let service = node.headless_service();
        let namespace = &self.settings.namespace;
        vec![
            AltName::dns(node.name.clone()),
            AltName::dns(format!("{}.{}", node.name, service)),
            AltName::dns(format!("{}.{}.{}", node.name, service, namespace)),
            AltName::dns(format!("{}.{}.{}.svc", node.name, service, namespace)),
            AltName::dns(format!(
                "{}.{}.{}.svc.{}",
                node.name, service, namespace, self.settings.cluster_domain
            )),
            AltName::dns("localhost"),
            AltName::ip(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            AltName::ip(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_cluster;
    use crate::crd::TlsSpec;

    #[test]
    fn node_names_are_fully_qualified() {
        let settings = PkiSettings::from_cluster(&test_cluster(TlsSpec::default(), &[("data", 1)])).unwrap();
        let node = NodeIdentity {
            name: "logs-data-0".to_string(),
            statefulset: "logs-data".to_string(),
        };
        let config = NodeCertGenerator::new(&settings).config_for(&node);

        assert_eq!(config.subject.common_name, "logs-data-0");
        assert_eq!(config.validity_days, 397);
        assert!(config
            .alt_names
            .contains(&AltName::dns("logs-data-0.logs-data-headless.search.svc.cluster.local")));
        assert!(config
            .alt_names
            .contains(&AltName::ip("127.0.0.1".parse().unwrap())));
    }
}
