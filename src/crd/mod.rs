//! SearchCluster custom resource
//!
//! Only the fields the certificate lifecycle reads are modelled here: the
//! node-group topology and the TLS settings. The status carries the rotation
//! checkpoints as conditions.

mod types;

pub use types::{Condition, ConditionStatus};

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "search.opencluster.dev",
    version = "v1",
    kind = "SearchCluster",
    plural = "searchclusters",
    shortname = "sc",
    status = "SearchClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SearchClusterSpec {
    /// Node groups; each becomes one StatefulSet named `<cluster>-<group>`
    pub node_groups: Vec<NodeGroup>,

    #[serde(default)]
    pub tls: TlsSpec,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    pub name: String,
    pub replicas: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    /// Serve the HTTP API over TLS
    #[serde(default = "default_true")]
    pub api_enabled: bool,

    /// Secret holding a customer-supplied API certificate. When set the
    /// controller never generates or rotates API material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_secret: Option<String>,

    /// Leaf certificate validity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity_days: Option<u32>,

    /// Authority validity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_validity_days: Option<u32>,

    /// Renew once a certificate is this close to expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewal_window_days: Option<u32>,

    /// RSA key size for every generated key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_bits: Option<u32>,

    /// Extra DNS names on the API certificate
    #[serde(default)]
    pub alt_names: Vec<String>,

    /// Extra IP addresses on the API certificate
    #[serde(default)]
    pub alt_ips: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_domain: Option<String>,

    /// Delete running pods when their trust material had to be regenerated
    /// from scratch
    #[serde(default)]
    pub force_recreate_pods: bool,
}

impl Default for TlsSpec {
    fn default() -> Self {
        Self {
            api_enabled: true,
            external_secret: None,
            validity_days: None,
            authority_validity_days: None,
            renewal_window_days: None,
            key_bits: None,
            alt_names: Vec::new(),
            alt_ips: Vec::new(),
            cluster_domain: None,
            force_recreate_pods: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchClusterStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_defaults_when_omitted() {
        let spec: SearchClusterSpec = serde_json::from_value(serde_json::json!({
            "nodeGroups": [{"name": "data", "replicas": 3}]
        }))
        .unwrap();

        assert!(spec.tls.api_enabled);
        assert!(spec.tls.external_secret.is_none());
        assert!(!spec.tls.force_recreate_pods);
        assert_eq!(spec.node_groups[0].replicas, 3);
    }

    #[test]
    fn tls_fields_use_camel_case() {
        let tls: TlsSpec = serde_json::from_value(serde_json::json!({
            "apiEnabled": false,
            "renewalWindowDays": 10,
            "altIps": ["10.0.0.1"],
            "forceRecreatePods": true
        }))
        .unwrap();

        assert!(!tls.api_enabled);
        assert_eq!(tls.renewal_window_days, Some(10));
        assert_eq!(tls.alt_ips, vec!["10.0.0.1".to_string()]);
        assert!(tls.force_recreate_pods);
    }
}
