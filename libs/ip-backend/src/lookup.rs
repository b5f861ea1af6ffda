//! Inventory lookups shared by the stores.
use std::{env, fs, net::IpAddr};

use config::IpamConfig;
use neutron_api::{ComputeApi, NetworkApi, Port, PortFilter, Router, Server};
use tracing::debug;

use crate::StoreError;

/// the network allocations are made on
pub fn target_network(config: &IpamConfig) -> Result<&str, StoreError> {
    config
        .network()
        .ok_or_else(|| StoreError::config("neutron networks is none"))
}

/// Host name used as the description of created ports.
pub fn hostname() -> String {
    env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .or_else(|| {
            fs::read_to_string("/proc/sys/kernel/hostname")
                .ok()
                .map(|name| name.trim().to_owned())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_owned())
}

pub async fn find_port_by_name(
    network: &dyn NetworkApi,
    name: &str,
) -> Result<Option<Port>, StoreError> {
    let port = network
        .list_ports(&PortFilter::name(name))
        .await?
        .into_iter()
        .next();
    debug!(name, port_id = ?port.as_ref().map(|p| &p.id), "port lookup by name");
    Ok(port)
}

/// The port carrying `addr`. The port must have at least one fixed ip.
pub async fn find_host_port(network: &dyn NetworkApi, addr: IpAddr) -> Result<Port, StoreError> {
    let port = network
        .list_ports(&PortFilter::fixed_ip(addr))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| StoreError::config(format!("failed to get host neutron port for {addr}")))?;
    if port.fixed_ips.is_empty() {
        return Err(StoreError::config(format!(
            "host neutron port {} has no fixed ip",
            port.id
        )));
    }
    debug!(%addr, port_id = %port.id, "found host port");
    Ok(port)
}

/// The single instance listing `addr` among its addresses.
pub async fn find_server(compute: &dyn ComputeApi, addr: IpAddr) -> Result<Server, StoreError> {
    let mut matches = compute
        .list_servers()
        .await?
        .into_iter()
        .filter(|server| server.has_address(addr));
    match (matches.next(), matches.next()) {
        (Some(server), None) => {
            debug!(%addr, server_id = %server.id, "found host instance");
            Ok(server)
        }
        (None, _) => Err(StoreError::config(format!(
            "can't find nova instance with address {addr}"
        ))),
        (Some(first), Some(second)) => Err(StoreError::config(format!(
            "address {addr} matches several instances ({}, {})",
            first.id, second.id
        ))),
    }
}

/// The router owning a port bound to `gateway`.
pub async fn find_router(
    network: &dyn NetworkApi,
    gateway: IpAddr,
) -> Result<Option<Router>, StoreError> {
    for router in network.list_routers().await? {
        let ports = network
            .list_ports(&PortFilter::device_id(router.id.as_str()))
            .await?;
        if ports.iter().any(|port| port.has_address(gateway)) {
            debug!(%gateway, router_id = %router.id, "found router");
            return Ok(Some(router));
        }
    }
    Ok(None)
}

pub async fn count_interfaces(compute: &dyn ComputeApi, server_id: &str) -> Result<usize, StoreError> {
    Ok(compute.list_interfaces(server_id).await?.len())
}
