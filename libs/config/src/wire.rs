//! Wire format of the cni network configuration. Decoded with serde, then
//! validated into [`crate::IpamConfig`].
use std::{net::IpAddr, path::PathBuf};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// result version reported when the config names none
pub const DEFAULT_CNI_VERSION: &str = "0.3.1";
/// default directory for the ledger and lock file
pub const DEFAULT_DATA_DIR: &str = "/var/lib/cni/networks";
/// default cap on fixed ips bound to one shared port
pub const DEFAULT_MAX_IPS: usize = 20;
/// default cap on interfaces attached to one instance
pub const DEFAULT_MAX_ENIS: usize = 16;

/// top-level config type
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetConf {
    #[serde(default)]
    pub cni_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub ipam: Ipam,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Ipam {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub neutron: NeutronConf,
    #[serde(default)]
    pub openstack: OpenStackConf,
    /// hex encoded 32 byte key; passwords are plaintext when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_key: Option<String>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolv_conf: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NeutronConf {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_interface: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_max_ips")]
    pub max_ips: usize,
    #[serde(default = "default_max_enis")]
    pub max_enis: usize,
    #[serde(default)]
    pub release_policy: ReleasePolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct OpenStackConf {
    #[serde(default)]
    pub auth_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Route {
    pub dst: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<IpAddr>,
}

/// What release does when the cloud side fails or disagrees with the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// return the error and keep the ledger entry for a retry
    #[default]
    Strict,
    /// log the error, drop the ledger entry and succeed
    BestEffort,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

pub const fn default_max_ips() -> usize {
    DEFAULT_MAX_IPS
}

pub const fn default_max_enis() -> usize {
    DEFAULT_MAX_ENIS
}
