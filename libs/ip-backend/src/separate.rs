//! One port per container, named after the container id. Used when the
//! cluster runs apart from the openstack instances, so nothing is attached
//! to the host and no ledger is needed: the port name is the record.
use std::sync::Arc;

use async_trait::async_trait;
use config::{IpamConfig, ReleasePolicy};
use neutron_api::{CreatePortOpts, NetworkApi, Port};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{Clients, IpConfig, Store, StoreError, StoreGuard, lookup, settle_release};

#[derive(Debug)]
pub struct SeparateStore {
    network: Arc<dyn NetworkApi>,
    network_id: String,
    policy: ReleasePolicy,
    lock: Arc<Mutex<()>>,
}

impl SeparateStore {
    pub fn new(config: &IpamConfig, clients: &Clients) -> Result<Self, StoreError> {
        Ok(Self {
            network: clients.network.clone(),
            network_id: lookup::target_network(config)?.to_owned(),
            policy: config.release_policy(),
            lock: Arc::new(Mutex::new(())),
        })
    }
}

/// The first fixed ip of a container port, sized to its subnet.
pub(crate) async fn port_address(network: &dyn NetworkApi, port: &Port) -> Result<IpConfig, StoreError> {
    let Some((subnet_id, address)) = port
        .fixed_ips
        .first()
        .and_then(|ip| Some((ip.subnet_id.as_str(), ip.ip_address?)))
    else {
        return Err(StoreError::NoNewAddress {
            port_id: port.id.clone(),
        });
    };
    let subnet = network
        .get_subnet(subnet_id)
        .await
        .inspect_err(|err| warn!(subnet_id, %err, "get neutron subnet failed"))?;
    IpConfig::from_subnet(&subnet, address)
}

/// Removes a port created by a reserve that failed afterwards.
pub(crate) async fn discard_port(network: &dyn NetworkApi, port: &Port) {
    match network.delete_port(&port.id).await {
        Ok(()) => info!(port_id = %port.id, "deleted port of failed reservation"),
        Err(err) => warn!(port_id = %port.id, %err, "failed to delete port of failed reservation"),
    }
}

/// Deletes the port named `id`. A port that is already gone counts as
/// deleted.
pub(crate) async fn delete_named_port(network: &dyn NetworkApi, id: &str) -> Result<(), StoreError> {
    let Some(port) = lookup::find_port_by_name(network, id).await? else {
        debug!(container_id = id, "already deleted neutron port");
        return Ok(());
    };
    match network.delete_port(&port.id).await {
        Ok(()) => {
            info!(port_id = %port.id, container_id = id, "deleted neutron port");
            Ok(())
        }
        Err(err) if err.is_not_found() => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl Store for SeparateStore {
    async fn reserve(&self, id: &str) -> Result<IpConfig, StoreError> {
        let network = self.network.get_network(&self.network_id).await?;
        if network.subnets.is_empty() {
            return Err(StoreError::config(format!(
                "neutron network {} subnets is none",
                network.id
            )));
        }

        let port = self
            .network
            .create_port(CreatePortOpts {
                network_id: network.id,
                name: id.to_owned(),
                description: lookup::hostname(),
                admin_state_up: true,
            })
            .await
            .inspect_err(|err| warn!(container_id = id, %err, "create neutron port failed"))?;
        info!(port_id = %port.id, container_id = id, "created neutron port");

        match port_address(self.network.as_ref(), &port).await {
            Ok(ip) => Ok(ip),
            Err(err) => {
                discard_port(self.network.as_ref(), &port).await;
                Err(err)
            }
        }
    }

    async fn release_by_id(&self, id: &str) -> Result<(), StoreError> {
        let res = delete_named_port(self.network.as_ref(), id).await;
        settle_release(self.policy, id, res)
    }

    async fn lock(&self) -> Result<StoreGuard, StoreError> {
        Ok(StoreGuard::local(self.lock.clone().lock_owned().await))
    }
}
