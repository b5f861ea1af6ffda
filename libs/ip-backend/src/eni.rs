//! One port per container, attached to the host instance as its own
//! interface. The port name is the container id; the number of attached
//! interfaces is capped per instance.
use std::{net::IpAddr, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use config::{IpamConfig, ReleasePolicy};
use file_lock::FileLock;
use neutron_api::{ComputeApi, CreatePortOpts, NetworkApi, Port};
use tracing::{debug, info, warn};

use crate::{
    CapacityGuard, Clients, IpConfig, Store, StoreError, StoreGuard, lookup,
    separate::{delete_named_port, discard_port, port_address},
    settle_release,
};

#[derive(Debug)]
pub struct EniStore {
    network: Arc<dyn NetworkApi>,
    compute: Arc<dyn ComputeApi>,
    network_id: String,
    host_addr: IpAddr,
    server_id: String,
    data_dir: PathBuf,
    guard: CapacityGuard,
    policy: ReleasePolicy,
}

impl EniStore {
    /// Resolves the instance this host runs as. The host address must match
    /// exactly one instance.
    pub async fn new(config: &IpamConfig, clients: &Clients) -> Result<Self, StoreError> {
        let network_id = lookup::target_network(config)?.to_owned();
        let host_addr = config
            .host_addr()
            .map_err(|err| StoreError::config(format!("{err:#}")))?;
        let server = lookup::find_server(clients.compute.as_ref(), host_addr).await?;
        info!(%host_addr, server_id = %server.id, "resolved host instance");

        Ok(Self {
            network: clients.network.clone(),
            compute: clients.compute.clone(),
            network_id,
            host_addr,
            server_id: server.id,
            data_dir: config.data_dir().to_path_buf(),
            guard: CapacityGuard::interfaces(config.max_enis()),
            policy: config.release_policy(),
        })
    }

    pub fn host_addr(&self) -> IpAddr {
        self.host_addr
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// the container's port, created when it doesn't exist yet
    async fn container_port(&self, network_id: String, id: &str) -> Result<(Port, bool), StoreError> {
        if let Some(port) = lookup::find_port_by_name(self.network.as_ref(), id).await? {
            debug!(port_id = %port.id, container_id = id, "reusing neutron port");
            return Ok((port, false));
        }
        let attached = lookup::count_interfaces(self.compute.as_ref(), &self.server_id).await?;
        self.guard.check(attached)?;

        let port = self
            .network
            .create_port(CreatePortOpts {
                network_id,
                name: id.to_owned(),
                description: lookup::hostname(),
                admin_state_up: true,
            })
            .await
            .inspect_err(|err| warn!(container_id = id, %err, "create neutron port failed"))?;
        info!(port_id = %port.id, container_id = id, "created neutron port");
        Ok((port, true))
    }

    async fn attach(&self, port: &Port) -> Result<IpConfig, StoreError> {
        let ip = port_address(self.network.as_ref(), port).await?;
        self.compute
            .attach_interface(&self.server_id, &port.id)
            .await
            .inspect_err(|err| {
                warn!(server_id = %self.server_id, port_id = %port.id, %err, "attach interface failed")
            })?;
        info!(server_id = %self.server_id, port_id = %port.id, address = %ip.address, "attached interface");
        Ok(ip)
    }
}

#[async_trait]
impl Store for EniStore {
    async fn reserve(&self, id: &str) -> Result<IpConfig, StoreError> {
        let network = self.network.get_network(&self.network_id).await?;
        if network.subnets.is_empty() {
            return Err(StoreError::config(format!(
                "neutron network {} subnets is none",
                network.id
            )));
        }

        let (port, created) = self.container_port(network.id, id).await?;
        match self.attach(&port).await {
            Ok(ip) => Ok(ip),
            Err(err) => {
                if created {
                    discard_port(self.network.as_ref(), &port).await;
                }
                Err(err)
            }
        }
    }

    /// Deleting the port takes the interface with it.
    async fn release_by_id(&self, id: &str) -> Result<(), StoreError> {
        let res = delete_named_port(self.network.as_ref(), id).await;
        settle_release(self.policy, id, res)
    }

    async fn lock(&self) -> Result<StoreGuard, StoreError> {
        Ok(StoreGuard::file(
            FileLock::acquire_async(self.data_dir.clone()).await?,
        ))
    }
}
