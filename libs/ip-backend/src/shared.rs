//! Allocation on the host's own port, shared by the mix and mix-route stores.
use std::{net::IpAddr, path::PathBuf, sync::Arc};

use config::{IpamConfig, ReleasePolicy};
use file_lock::FileLock;
use neutron_api::{FixedIp, NetworkApi, Port, Subnet};
use tracing::{debug, error, info, warn};

use crate::{
    CapacityGuard, Clients, IpConfig, Ledger, StoreError, StoreGuard,
    diff::{find_fixed_ip, new_fixed_ip},
    lookup, settle_release, subnet_gateway,
};

#[derive(Debug)]
pub(crate) struct SharedPort {
    network: Arc<dyn NetworkApi>,
    host_addr: IpAddr,
    host_port_id: String,
    subnet: Subnet,
    ledger: Ledger,
    guard: CapacityGuard,
    policy: ReleasePolicy,
}

impl SharedPort {
    /// Resolves the host's port and its subnet. The host address is read once
    /// here and kept for the store's lifetime.
    pub(crate) async fn resolve(config: &IpamConfig, clients: &Clients) -> Result<Self, StoreError> {
        let network_id = lookup::target_network(config)?;
        let host_addr = config
            .host_addr()
            .map_err(|err| StoreError::config(format!("{err:#}")))?;
        info!(%host_addr, "host address");

        let network = clients.network.get_network(network_id).await?;
        if network.subnets.is_empty() {
            return Err(StoreError::config(format!(
                "neutron network {network_id} subnets is none"
            )));
        }

        let host_port = lookup::find_host_port(clients.network.as_ref(), host_addr).await?;
        // find_host_port guarantees a fixed ip
        let subnet_id = &host_port.fixed_ips[0].subnet_id;
        let subnet = clients.network.get_subnet(subnet_id).await?;
        let ledger = Ledger::create(config.data_dir())?;

        Ok(Self {
            network: clients.network.clone(),
            host_addr,
            host_port_id: host_port.id,
            subnet,
            ledger,
            guard: CapacityGuard::fixed_ips(config.max_ips()),
            policy: config.release_policy(),
        })
    }

    pub(crate) fn network(&self) -> &Arc<dyn NetworkApi> {
        &self.network
    }

    pub(crate) fn host_addr(&self) -> IpAddr {
        self.host_addr
    }

    pub(crate) fn host_port_id(&self) -> &str {
        &self.host_port_id
    }

    pub(crate) fn subnet(&self) -> &Subnet {
        &self.subnet
    }

    pub(crate) fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub(crate) fn data_dir(&self) -> PathBuf {
        self.ledger.dir().to_path_buf()
    }

    pub(crate) async fn lock(&self) -> Result<StoreGuard, StoreError> {
        Ok(StoreGuard::file(FileLock::acquire_async(self.data_dir()).await?))
    }

    async fn host_port(&self) -> Result<Port, StoreError> {
        self.network
            .get_port(&self.host_port_id)
            .await
            .inspect_err(|err| warn!(port_id = %self.host_port_id, %err, "get host neutron port failed"))
            .map_err(StoreError::from)
    }

    pub(crate) async fn reserve(&self, id: &str) -> Result<IpConfig, StoreError> {
        // fail on config problems before touching the port
        subnet_gateway(&self.subnet)?;
        let port = self.host_port().await?;
        self.guard.check(port.fixed_ips.len())?;

        let before = port.fixed_ips;
        let mut requested = before.clone();
        requested.push(FixedIp::any_in(self.subnet.id.as_str()));
        let updated = self
            .network
            .update_port_fixed_ips(&self.host_port_id, requested)
            .await?;
        info!(port_id = %self.host_port_id, fixed_ips = ?updated.fixed_ips, "updated neutron port");

        let Some(address) = new_fixed_ip(&before, &updated.fixed_ips).and_then(|ip| ip.ip_address)
        else {
            return Err(StoreError::NoNewAddress {
                port_id: self.host_port_id.clone(),
            });
        };
        info!(%address, container_id = id, "new neutron port fixed ip");
        let ip = IpConfig::from_subnet(&self.subnet, address)?;

        if let Err(err) = self.ledger.write(address, id) {
            error!(%address, container_id = id, %err, "ledger write failed, returning address to the port");
            self.rollback(address).await;
            return Err(err);
        }
        Ok(ip)
    }

    // best-effort undo of a fixed ip that never made it into the ledger
    async fn rollback(&self, address: IpAddr) {
        if let Err(err) = self.remove_fixed_ip(address).await {
            error!(%address, %err, "failed to remove unrecorded fixed ip from host port");
        }
    }

    async fn remove_fixed_ip(&self, address: IpAddr) -> Result<(), StoreError> {
        let mut port = self.host_port().await?;
        let index = find_fixed_ip(&port.fixed_ips, address).ok_or_else(|| {
            StoreError::Divergence(format!(
                "container ip {address} was not found in fixed ips of port {}",
                self.host_port_id
            ))
        })?;
        port.fixed_ips.remove(index);
        let updated = self
            .network
            .update_port_fixed_ips(&self.host_port_id, port.fixed_ips)
            .await?;
        info!(port_id = %self.host_port_id, fixed_ips = ?updated.fixed_ips, "updated neutron port");
        Ok(())
    }

    pub(crate) async fn release_by_id(&self, id: &str) -> Result<(), StoreError> {
        let Some(entry) = self.ledger.find_by_id(id)? else {
            debug!(container_id = id, "container ip not found");
            return Ok(());
        };
        settle_release(self.policy, id, self.remove_fixed_ip(entry.address).await)?;
        // the cloud side is done, a stale file is only logged
        if let Err(err) = self.ledger.remove(&entry) {
            warn!(%err, address = %entry.address, "failed to remove ledger entry");
        }
        Ok(())
    }
}
