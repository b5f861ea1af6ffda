//! Dry runs of a config against an in-memory cloud.
//!
//! The cloud is seeded with what the configured mode needs to construct:
//! the target network with one subnet around the host address, a router on
//! the subnet gateway, an instance owning the host address and the host's
//! own port.
use std::net::IpAddr;

use anyhow::{Context, Result, bail};
use config::{IpamConfig, Mode};
use ip_backend::{
    AllocationResult, Clients, IpAllocator, MixRouteStore, PodPlacement, store_factory,
};
use ipnet::IpNet;
use neutron_api::{FixedIp, Port, Route, memory::MemoryCloud};
use serde::Serialize;
use tracing::{info, warn};

pub const SUBNET: &str = "sim-subnet";
pub const ROUTER: &str = "sim-router";
pub const SERVER: &str = "sim-host";
pub const HOST_PORT: &str = "sim-host-port";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub mode: String,
    pub allocations: Vec<Allocation>,
    /// a reservation was refused by the configured maximum
    pub capacity_reached: bool,
    /// router routes after syncing the placements, mix-route only
    pub routes: Vec<Route>,
    /// ports left in the cloud once everything was released
    pub ports_after_release: usize,
    pub ledger_after_release: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub container_id: String,
    pub result: AllocationResult,
}

/// A cloud the configured store can be built against, with the host at
/// `host_addr`.
pub fn seed_cloud(config: &IpamConfig, host_addr: IpAddr) -> Result<MemoryCloud> {
    let network = config.network().context("neutron networks is none")?;
    let prefix = if host_addr.is_ipv4() { 24 } else { 64 };
    let cidr = IpNet::new(host_addr, prefix)?.trunc();
    let gateway = cidr
        .hosts()
        .find(|addr| *addr != cidr.network())
        .with_context(|| format!("no usable gateway in {cidr}"))?;
    if gateway == host_addr {
        bail!("host address {host_addr} is the simulated gateway, pick another one");
    }

    let cloud = MemoryCloud::new();
    cloud.add_network(network, "simulated");
    cloud.add_subnet(SUBNET, network, cidr, Some(gateway));
    cloud.add_router(ROUTER, SUBNET, gateway);
    cloud.add_server(SERVER, "simulated", &[host_addr]);
    cloud.add_port(Port {
        id: HOST_PORT.to_owned(),
        name: String::new(),
        network_id: network.to_owned(),
        description: SERVER.to_owned(),
        device_id: SERVER.to_owned(),
        admin_state_up: true,
        fixed_ips: vec![FixedIp::new(SUBNET, host_addr)],
    });
    Ok(cloud)
}

/// Reserves `ops` containers, syncs routes in mix-route mode, then releases
/// everything again.
pub async fn run(config: IpamConfig, ops: usize, host_addr: IpAddr) -> Result<Report> {
    let config = config.with_host_addr(host_addr);
    let cloud = seed_cloud(&config, host_addr)?;
    let clients = Clients::from_cloud(cloud.clone());
    let dns = config.dns().unwrap_or_else(|err| {
        warn!(?err, "ignoring unreadable resolv.conf");
        None
    });

    let alloc = IpAllocator::new(store_factory(&config, clients.clone()).await?);
    let mut allocations = Vec::with_capacity(ops);
    let mut capacity_reached = false;
    for i in 0..ops {
        let container_id = format!("sim-{i:04}");
        match alloc.get(&container_id).await {
            Ok(ip) => allocations.push(Allocation {
                container_id,
                result: AllocationResult::new(ip, &config, dns.clone()),
            }),
            Err(err) if err.is_capacity() => {
                info!(%err, reserved = allocations.len(), "stopping at capacity");
                capacity_reached = true;
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }

    let routes = if config.mode() == Mode::MixRoute {
        let pods = allocations
            .iter()
            .filter_map(|allocation| {
                let ip = allocation.result.ips.first()?;
                Some(PodPlacement {
                    name: allocation.container_id.clone(),
                    pod_ip: ip.address.addr().to_string(),
                    host_ip: host_addr.to_string(),
                    deleting: false,
                })
            })
            .collect::<Vec<_>>();
        let store = MixRouteStore::new(&config, &clients).await?;
        store.route_sync().update_routes(&pods).await?.routes
    } else {
        Vec::new()
    };

    for allocation in &allocations {
        alloc.release(&allocation.container_id).await?;
    }
    alloc.close().await?;

    let ledger_after_release = match config.mode() {
        Mode::Mix | Mode::MixRoute => ip_backend::Ledger::new(config.data_dir()).entries()?.len(),
        Mode::Separate | Mode::Eni => 0,
    };
    Ok(Report {
        mode: config.mode().to_string(),
        allocations,
        capacity_reached,
        routes,
        ports_after_release: cloud.ports().len(),
        ledger_after_release,
    })
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    fn config(mode: Mode, dir: &std::path::Path) -> IpamConfig {
        IpamConfig::new(mode, vec!["sim-net".into()], dir)
    }

    fn host() -> IpAddr {
        "192.168.7.20".parse().unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_mix_route_syncs_routes() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(config(Mode::MixRoute, dir.path()), 2, host())
            .await
            .unwrap();
        assert_eq!(report.mode, "mix-route");
        assert_eq!(report.allocations.len(), 2);
        assert!(!report.capacity_reached);
        assert_eq!(report.routes.len(), 2);
        assert!(report.routes.iter().all(|route| route.nexthop == host()));
        // router port + host port
        assert_eq!(report.ports_after_release, 2);
        assert_eq!(report.ledger_after_release, 0);
    }

    #[tokio::test]
    async fn test_stops_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(config(Mode::Mix, dir.path()).with_max_ips(3), 5, host())
            .await
            .unwrap();
        assert!(report.capacity_reached);
        // the host's own address takes one slot
        assert_eq!(report.allocations.len(), 2);
        assert!(report.routes.is_empty());
    }

    #[tokio::test]
    async fn test_eni_releases_ports() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(config(Mode::Eni, dir.path()), 3, host()).await.unwrap();
        assert_eq!(report.allocations.len(), 3);
        let first = &report.allocations[0].result.ips[0];
        assert_eq!(first.gateway, "192.168.7.1".parse::<IpAddr>().unwrap());
        assert_eq!(first.address.prefix_len(), 24);
        assert_eq!(report.ports_after_release, 2);
    }

    #[test]
    fn test_seed_rejects_gateway_host() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(Mode::Mix, dir.path());
        assert!(seed_cloud(&cfg, "192.168.7.1".parse().unwrap()).is_err());
        let empty = IpamConfig::new(Mode::Mix, Vec::new(), dir.path());
        assert!(seed_cloud(&empty, host()).is_err());
    }
}
