//! Cloud objects as the backend sees them. Field names follow the neutron
//! and nova json representations.

use std::{collections::BTreeMap, net::IpAddr};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subnets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub network_id: String,
    pub cidr: IpNet,
    pub gateway_ip: Option<IpAddr>,
}

/// One address binding on a port. An entry without `ip_address` asks the
/// cloud to pick a free address from `subnet_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixedIp {
    pub subnet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<IpAddr>,
}

impl FixedIp {
    pub fn new(subnet_id: impl Into<String>, ip_address: IpAddr) -> Self {
        Self {
            subnet_id: subnet_id.into(),
            ip_address: Some(ip_address),
        }
    }

    /// request a cloud-assigned address on `subnet_id`
    pub fn any_in(subnet_id: impl Into<String>) -> Self {
        Self {
            subnet_id: subnet_id.into(),
            ip_address: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub network_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default = "default_admin_state")]
    pub admin_state_up: bool,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
}

const fn default_admin_state() -> bool {
    true
}

impl Port {
    pub fn has_address(&self, addr: IpAddr) -> bool {
        self.fixed_ips.iter().any(|ip| ip.ip_address == Some(addr))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePortOpts {
    pub network_id: String,
    pub name: String,
    pub description: String,
    pub admin_state_up: bool,
}

/// Filter for port listings; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortFilter {
    pub name: Option<String>,
    pub fixed_ip: Option<IpAddr>,
    pub device_id: Option<String>,
}

impl PortFilter {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn fixed_ip(addr: IpAddr) -> Self {
        Self {
            fixed_ip: Some(addr),
            ..Self::default()
        }
    }

    pub fn device_id(id: impl Into<String>) -> Self {
        Self {
            device_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, port: &Port) -> bool {
        self.name.as_ref().is_none_or(|name| *name == port.name)
            && self.fixed_ip.is_none_or(|addr| port.has_address(addr))
            && self
                .device_id
                .as_ref()
                .is_none_or(|id| *id == port.device_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddress {
    pub addr: IpAddr,
    #[serde(default)]
    pub version: u8,
}

/// A compute instance and its addresses keyed by network name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub addresses: BTreeMap<String, Vec<ServerAddress>>,
}

impl Server {
    pub fn has_address(&self, addr: IpAddr) -> bool {
        self.addresses
            .values()
            .flatten()
            .any(|entry| entry.addr == addr)
    }
}

/// A virtual interface attached to a compute instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceAttachment {
    pub port_id: String,
    pub net_id: String,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub destination: IpNet,
    pub nexthop: IpAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Router {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub routes: Vec<Route>,
}
