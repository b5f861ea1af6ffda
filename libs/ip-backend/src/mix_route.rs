//! Mix allocation plus the router that fronts the host subnet.
use std::net::IpAddr;

use async_trait::async_trait;
use config::IpamConfig;
use neutron_api::{Router, Subnet};
use tracing::info;

use crate::{
    Clients, IpConfig, Ledger, RouteSync, Store, StoreError, StoreGuard, lookup,
    shared::SharedPort, subnet_gateway,
};

/// Allocates exactly like [`crate::MixStore`]. Construction additionally
/// resolves the router owning the subnet gateway; its routes are only ever
/// written through [`MixRouteStore::route_sync`].
#[derive(Debug)]
pub struct MixRouteStore {
    port: SharedPort,
    router: Router,
}

impl MixRouteStore {
    pub async fn new(config: &IpamConfig, clients: &Clients) -> Result<Self, StoreError> {
        let port = SharedPort::resolve(config, clients).await?;
        let gateway = subnet_gateway(port.subnet())?;
        let router = lookup::find_router(clients.network.as_ref(), gateway)
            .await?
            .ok_or_else(|| {
                StoreError::config(format!("can't find neutron vrouter with gateway ip {gateway}"))
            })?;
        info!(router_id = %router.id, %gateway, "resolved subnet router");
        Ok(Self { port, router })
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn host_addr(&self) -> IpAddr {
        self.port.host_addr()
    }

    pub fn subnet(&self) -> &Subnet {
        self.port.subnet()
    }

    pub fn ledger(&self) -> &Ledger {
        self.port.ledger()
    }

    /// the collaborator that writes this router's static routes
    pub fn route_sync(&self) -> RouteSync {
        RouteSync::new(
            self.port.network().clone(),
            &self.router,
            self.port.subnet().clone(),
        )
    }
}

#[async_trait]
impl Store for MixRouteStore {
    async fn reserve(&self, id: &str) -> Result<IpConfig, StoreError> {
        self.port.reserve(id).await
    }

    async fn release_by_id(&self, id: &str) -> Result<(), StoreError> {
        self.port.release_by_id(id).await
    }

    async fn lock(&self) -> Result<StoreGuard, StoreError> {
        self.port.lock().await
    }
}
