use std::{net::IpAddr, path::Path};

use config::{IpamConfig, Mode};
use neutron_api::{FixedIp, Port, memory::MemoryCloud};

use crate::Clients;

pub(crate) const NETWORK: &str = "net-1";
pub(crate) const SUBNET: &str = "subnet-1";
pub(crate) const HOST_PORT: &str = "host-port";
pub(crate) const SERVER: &str = "vm-1";
pub(crate) const ROUTER: &str = "router-1";

pub(crate) fn addr(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub(crate) fn host_addr() -> IpAddr {
    addr("10.0.0.4")
}

/// A /24 with gateway .1 owned by a router, and a host instance at .4 whose
/// port carries `extra` addresses besides its own.
pub(crate) fn cloud_with(extra: &[&str]) -> MemoryCloud {
    let cloud = MemoryCloud::new();
    cloud.add_network(NETWORK, "private");
    cloud.add_subnet(
        SUBNET,
        NETWORK,
        "10.0.0.0/24".parse().unwrap(),
        Some(addr("10.0.0.1")),
    );
    cloud.add_router(ROUTER, SUBNET, addr("10.0.0.1"));
    cloud.add_server(SERVER, "private", &[host_addr()]);
    let fixed_ips = std::iter::once(host_addr())
        .chain(extra.iter().map(|s| addr(s)))
        .map(|ip| FixedIp::new(SUBNET, ip))
        .collect();
    cloud.add_port(Port {
        id: HOST_PORT.into(),
        name: String::new(),
        network_id: NETWORK.into(),
        description: "host".into(),
        device_id: SERVER.into(),
        admin_state_up: true,
        fixed_ips,
    });
    cloud
}

pub(crate) fn cloud() -> MemoryCloud {
    cloud_with(&[])
}

pub(crate) fn clients(cloud: &MemoryCloud) -> Clients {
    Clients::from_cloud(cloud.clone())
}

pub(crate) fn config(mode: Mode, dir: &Path) -> IpamConfig {
    IpamConfig::new(mode, vec![NETWORK.into()], dir).with_host_addr(host_addr())
}

pub(crate) fn host_port_addrs(cloud: &MemoryCloud) -> Vec<IpAddr> {
    cloud
        .port(HOST_PORT)
        .map(|port| port.fixed_ips.iter().filter_map(|ip| ip.ip_address).collect())
        .unwrap_or_default()
}
