// cert/types.rs
use serde::{Deserialize, Serialize};
use std::{fmt, net::IpAddr};

/// Which trust domain an authority or leaf certificate belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    /// Node-to-node trust
    Transport,
    /// Client-facing HTTP trust
    Api,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Transport => "transport",
            Purpose::Api => "api",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distinguished-name fields put on generated certificates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubjectInfo {
    pub common_name: String,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
}

impl SubjectInfo {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            organization: None,
            organizational_unit: None,
        }
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.organizational_unit = Some(unit.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AltName {
    Dns(String),
    Ip(IpAddr),
}

impl AltName {
    pub fn dns(name: impl Into<String>) -> Self {
        AltName::Dns(name.into())
    }

    pub fn ip(addr: IpAddr) -> Self {
        AltName::Ip(addr)
    }
}

impl fmt::Display for AltName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AltName::Dns(name) => write!(f, "DNS:{}", name),
            AltName::Ip(addr) => write!(f, "IP:{}", addr),
        }
    }
}

/// Everything needed to issue one leaf certificate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateConfig {
    pub purpose: Purpose,
    pub subject: SubjectInfo,
    pub alt_names: Vec<AltName>,
    pub validity_days: u32,
    pub key_size: u32,
}
