// config/types.rs
use chrono::Duration;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::{fs, io, net::IpAddr, path::Path, time::Duration as StdDuration};

use crate::cert::validate_key_size;
use crate::crd::{NodeGroup, SearchCluster};
use crate::error::Error;

pub const DEFAULT_VALIDITY_DAYS: u32 = 397;
pub const DEFAULT_AUTHORITY_VALIDITY_DAYS: u32 = 3650;
pub const DEFAULT_RENEWAL_WINDOW_DAYS: u32 = 30;
pub const DEFAULT_KEY_BITS: u32 = 2048;
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
/// Upper bound for `propagationTimeoutSecs`, one year
pub const MAX_PROPAGATION_TIMEOUT_SECS: u64 = 365 * 24 * 3600;

/// Process-wide settings, read once at startup.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    pub field_manager: String,
    /// Restrict the controller to one namespace; all namespaces when unset
    pub namespace: Option<String>,
    pub steady_requeue_secs: u64,
    pub transition_requeue_secs: u64,
    pub gate_poll_secs: u64,
    /// How long a propagation gate may stay closed before it is reported as stalled
    pub propagation_timeout_secs: u64,
    pub error_requeue_secs: u64,
    pub config_error_requeue_secs: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            field_manager: "search-cluster-pki".to_string(),
            namespace: None,
            steady_requeue_secs: 3600,
            transition_requeue_secs: 1,
            gate_poll_secs: 30,
            propagation_timeout_secs: 3600,
            error_requeue_secs: 5,
            config_error_requeue_secs: 300,
        }
    }
}

impl OperatorConfig {
    /// Loads JSON, or YAML when the file ends in `.yaml`/`.yml`. A missing
    /// file yields the defaults.
    pub fn load_from_file(path: &str) -> Result<Self, Error> {
        let config_str = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(operator_config_error(path, e)),
        };

        let is_yaml = matches!(
            Path::new(path).extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        let config: Self = if is_yaml {
            serde_yaml::from_str(&config_str).map_err(|e| operator_config_error(path, e))?
        } else {
            serde_json::from_str(&config_str).map_err(|e| operator_config_error(path, e))?
        };
        config.validate(path)?;
        Ok(config)
    }

    pub fn validate(&self, path: &str) -> Result<(), Error> {
        if self.field_manager.is_empty() {
            return Err(operator_config_error(path, "fieldManager must not be empty"));
        }
        if self.gate_poll_secs == 0 || self.steady_requeue_secs == 0 {
            return Err(operator_config_error(
                path,
                "requeue intervals must be at least one second",
            ));
        }
        if self.propagation_timeout_secs > MAX_PROPAGATION_TIMEOUT_SECS {
            return Err(operator_config_error(
                path,
                format!(
                    "propagationTimeoutSecs must not exceed {}",
                    MAX_PROPAGATION_TIMEOUT_SECS
                ),
            ));
        }
        Ok(())
    }

    pub fn steady_requeue(&self) -> StdDuration {
        StdDuration::from_secs(self.steady_requeue_secs)
    }

    pub fn transition_requeue(&self) -> StdDuration {
        StdDuration::from_secs(self.transition_requeue_secs)
    }

    pub fn gate_poll(&self) -> StdDuration {
        StdDuration::from_secs(self.gate_poll_secs)
    }

    pub fn propagation_timeout(&self) -> Duration {
        let secs = self.propagation_timeout_secs.min(MAX_PROPAGATION_TIMEOUT_SECS);
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    pub fn error_requeue(&self) -> StdDuration {
        StdDuration::from_secs(self.error_requeue_secs)
    }

    pub fn config_error_requeue(&self) -> StdDuration {
        StdDuration::from_secs(self.config_error_requeue_secs)
    }
}

fn operator_config_error(path: &str, message: impl ToString) -> Error {
    Error::OperatorConfig {
        path: path.to_string(),
        message: message.to_string(),
    }
}

/// Validated TLS settings of one cluster.
#[derive(Clone, Debug, PartialEq)]
pub struct PkiSettings {
    pub cluster_name: String,
    pub namespace: String,
    pub node_groups: Vec<NodeGroup>,
    pub api_enabled: bool,
    /// False when the API certificate comes from an external secret
    pub self_managed_api: bool,
    pub validity_days: u32,
    pub authority_validity_days: u32,
    pub renewal_window: Duration,
    pub key_bits: u32,
    pub alt_names: Vec<String>,
    pub alt_ips: Vec<IpAddr>,
    pub cluster_domain: String,
    pub force_recreate_pods: bool,
}

impl PkiSettings {
    pub fn from_cluster(cluster: &SearchCluster) -> Result<Self, Error> {
        let name = cluster.name_any();
        let namespace = cluster
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let tls = &cluster.spec.tls;

        let validity_days = tls.validity_days.unwrap_or(DEFAULT_VALIDITY_DAYS);
        let authority_validity_days = tls
            .authority_validity_days
            .unwrap_or(DEFAULT_AUTHORITY_VALIDITY_DAYS);
        let renewal_window_days = tls
            .renewal_window_days
            .unwrap_or(DEFAULT_RENEWAL_WINDOW_DAYS);
        let key_bits = tls.key_bits.unwrap_or(DEFAULT_KEY_BITS);

        if validity_days == 0 || authority_validity_days == 0 {
            return Err(Error::config(&name, "validity must be at least one day"));
        }
        if validity_days > authority_validity_days {
            return Err(Error::config(
                &name,
                format!(
                    "validityDays ({}) must not exceed authorityValidityDays ({})",
                    validity_days, authority_validity_days
                ),
            ));
        }
        // With the window at or beyond the authority lifetime, every new
        // authority would be due for renewal the moment it is created.
        if renewal_window_days >= authority_validity_days {
            return Err(Error::config(
                &name,
                format!(
                    "renewalWindowDays ({}) must be shorter than authorityValidityDays ({})",
                    renewal_window_days, authority_validity_days
                ),
            ));
        }
        if renewal_window_days >= validity_days {
            return Err(Error::config(
                &name,
                format!(
                    "renewalWindowDays ({}) must be shorter than validityDays ({})",
                    renewal_window_days, validity_days
                ),
            ));
        }
        validate_key_size(key_bits).map_err(|e| Error::config(&name, e.to_string()))?;

        for (i, alt_name) in tls.alt_names.iter().enumerate() {
            if alt_name.is_empty() || !alt_name.is_ascii() {
                return Err(Error::config(
                    &name,
                    format!("altNames[{}]: '{}' is not a valid DNS name", i, alt_name),
                ));
            }
        }
        let alt_ips = tls
            .alt_ips
            .iter()
            .enumerate()
            .map(|(i, ip)| {
                ip.parse::<IpAddr>().map_err(|e| {
                    Error::config(&name, format!("altIps[{}]: '{}': {}", i, ip, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for group in &cluster.spec.node_groups {
            if group.name.is_empty() {
                return Err(Error::config(&name, "node group with empty name"));
            }
        }

        Ok(Self {
            cluster_name: name,
            namespace,
            node_groups: cluster.spec.node_groups.clone(),
            api_enabled: tls.api_enabled,
            self_managed_api: tls.external_secret.is_none(),
            validity_days,
            authority_validity_days,
            renewal_window: Duration::days(i64::from(renewal_window_days)),
            key_bits,
            alt_names: tls.alt_names.clone(),
            alt_ips,
            cluster_domain: tls
                .cluster_domain
                .clone()
                .unwrap_or_else(|| DEFAULT_CLUSTER_DOMAIN.to_string()),
            force_recreate_pods: tls.force_recreate_pods,
        })
    }

    /// The controller owns the API authority and certificate.
    pub fn manages_api(&self) -> bool {
        self.api_enabled && self.self_managed_api
    }

    /// Purposes whose material this controller generates.
    pub fn managed_purposes(&self) -> Vec<crate::cert::Purpose> {
        let mut purposes = vec![crate::cert::Purpose::Transport];
        if self.manages_api() {
            purposes.push(crate::cert::Purpose::Api);
        }
        purposes
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crd::{SearchClusterSpec, TlsSpec};

    pub(crate) fn cluster(tls: TlsSpec, groups: &[(&str, u32)]) -> SearchCluster {
        let mut cluster = SearchCluster::new(
            "logs",
            SearchClusterSpec {
                node_groups: groups
                    .iter()
                    .map(|(name, replicas)| NodeGroup {
                        name: name.to_string(),
                        replicas: *replicas,
                    })
                    .collect(),
                tls,
            },
        );
        cluster.metadata.namespace = Some("search".to_string());
        cluster.metadata.uid = Some("0b9a1d3c-6f2e-4d7a-9c1b-5e8f7a6d4c3b".to_string());
        cluster
    }

    #[test]
    fn defaults_apply() {
        let settings = PkiSettings::from_cluster(&cluster(TlsSpec::default(), &[("data", 3)])).unwrap();

        assert_eq!(settings.validity_days, 397);
        assert_eq!(settings.renewal_window, Duration::days(30));
        assert_eq!(settings.key_bits, 2048);
        assert_eq!(settings.cluster_domain, "cluster.local");
        assert!(settings.manages_api());
        assert_eq!(settings.managed_purposes().len(), 2);
    }

    #[test]
    fn external_api_certificate_is_not_managed() {
        let tls = TlsSpec {
            external_secret: Some("customer-tls".to_string()),
            ..TlsSpec::default()
        };
        let settings = PkiSettings::from_cluster(&cluster(tls, &[("data", 1)])).unwrap();
        assert!(!settings.self_managed_api);
        assert!(!settings.manages_api());
        assert_eq!(settings.managed_purposes(), vec![crate::cert::Purpose::Transport]);
    }

    #[test]
    fn invalid_ip_is_a_config_error() {
        let tls = TlsSpec {
            alt_ips: vec!["10.0.0.1".to_string(), "10.0.0.300".to_string()],
            ..TlsSpec::default()
        };
        let err = PkiSettings::from_cluster(&cluster(tls, &[("data", 1)])).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("altIps[1]"));
    }

    #[test]
    fn weak_key_is_a_config_error() {
        let tls = TlsSpec {
            key_bits: Some(1024),
            ..TlsSpec::default()
        };
        assert!(PkiSettings::from_cluster(&cluster(tls, &[("data", 1)]))
            .unwrap_err()
            .is_config());
    }

    #[test]
    fn renewal_window_must_fit_inside_validity() {
        let tls = TlsSpec {
            validity_days: Some(30),
            renewal_window_days: Some(30),
            ..TlsSpec::default()
        };
        assert!(PkiSettings::from_cluster(&cluster(tls, &[("data", 1)]))
            .unwrap_err()
            .is_config());
    }

    #[test]
    fn authority_must_outlive_its_window_and_leaves() {
        let short_authority = TlsSpec {
            authority_validity_days: Some(10),
            ..TlsSpec::default()
        };
        let err = PkiSettings::from_cluster(&cluster(short_authority, &[("data", 1)])).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("authorityValidityDays"));

        let window_too_wide = TlsSpec {
            validity_days: Some(20),
            authority_validity_days: Some(20),
            renewal_window_days: Some(20),
            ..TlsSpec::default()
        };
        assert!(PkiSettings::from_cluster(&cluster(window_too_wide, &[("data", 1)]))
            .unwrap_err()
            .is_config());

        let fits = TlsSpec {
            validity_days: Some(20),
            authority_validity_days: Some(40),
            renewal_window_days: Some(10),
            ..TlsSpec::default()
        };
        assert!(PkiSettings::from_cluster(&cluster(fits, &[("data", 1)])).is_ok());
    }

    #[test]
    fn propagation_timeout_is_bounded() {
        let config = OperatorConfig {
            propagation_timeout_secs: u64::MAX,
            ..OperatorConfig::default()
        };
        assert!(config.propagation_timeout() > Duration::days(364));
        assert!(matches!(
            config.validate("operator.json"),
            Err(Error::OperatorConfig { .. })
        ));
    }

    #[test]
    fn missing_operator_config_file_uses_defaults() {
        let config = OperatorConfig::load_from_file("/nonexistent/operator.json").unwrap();
        assert_eq!(config, OperatorConfig::default());
    }

    #[test]
    fn operator_config_reads_yaml() {
        let path = std::env::temp_dir().join(format!("pki-operator-{}.yaml", std::process::id()));
        fs::write(&path, "gatePollSecs: 10\nnamespace: search\n").unwrap();

        let config = OperatorConfig::load_from_file(path.to_str().unwrap()).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(config.gate_poll_secs, 10);
        assert_eq!(config.namespace.as_deref(), Some("search"));
        assert_eq!(config.steady_requeue_secs, 3600);
    }

    #[test]
    fn operator_config_rejects_zero_poll() {
        let path = std::env::temp_dir().join(format!("pki-operator-{}.json", std::process::id()));
        fs::write(&path, r#"{"gatePollSecs": 0}"#).unwrap();

        let result = OperatorConfig::load_from_file(path.to_str().unwrap());
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(Error::OperatorConfig { .. })));
    }
}
