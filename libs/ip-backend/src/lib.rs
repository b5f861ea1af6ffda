//! # ip-backend
//!
//! `ip-backend` defines a trait [`Store`] with the operations for reserving
//! and releasing a container's address against a neutron network, and four
//! implementations of it that shape the cloud side differently:
//!
//! - [`SeparateStore`]: one port per container
//! - [`EniStore`]: one port per container, attached to the host instance
//! - [`MixStore`]: one extra fixed ip per container on the host's own port
//! - [`MixRouteStore`]: like `MixStore`, plus the router whose static routes
//!   follow pod placement (see [`RouteSync`])
//!
//! Stores are not meant to be driven directly. [`store_factory`] picks one
//! for the configured mode and [`IpAllocator`] wraps it, taking the store
//! lock around every reserve/release.
#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::{fmt, net::IpAddr, sync::Arc};

use async_trait::async_trait;
use config::{Dns, IpamConfig, ReleasePolicy, StaticRoute};
use file_lock::FileLock;
use ipnet::IpNet;
use neutron_api::{ComputeApi, NetworkApi, Subnet};
use serde::Serialize;
use tracing::{debug, info, warn};

pub mod capacity;
pub mod diff;
mod error;
pub mod eni;
pub mod factory;
pub mod ledger;
pub mod lookup;
pub mod mix;
pub mod mix_route;
pub mod route_sync;
pub mod separate;
mod shared;
#[cfg(test)]
mod test_support;

pub use capacity::CapacityGuard;
pub use eni::EniStore;
pub use error::{Resource, StoreError};
pub use factory::store_factory;
pub use ledger::{Ledger, LedgerEntry};
pub use mix::MixStore;
pub use mix_route::MixRouteStore;
pub use route_sync::{PodPlacement, RouteSync};
pub use separate::SeparateStore;

/// an address with its subnet's prefix length, plus the subnet gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IpConfig {
    pub address: IpNet,
    pub gateway: IpAddr,
}

impl IpConfig {
    /// `address` sized to `subnet`. A subnet without a gateway is a
    /// configuration error.
    pub fn from_subnet(subnet: &Subnet, address: IpAddr) -> Result<Self, StoreError> {
        let gateway = subnet_gateway(subnet)?;
        let address = IpNet::new(address, subnet.cidr.prefix_len()).map_err(|_| {
            StoreError::config(format!(
                "address {address} doesn't fit subnet {} ({})",
                subnet.id, subnet.cidr
            ))
        })?;
        Ok(Self { address, gateway })
    }
}

pub(crate) fn subnet_gateway(subnet: &Subnet) -> Result<IpAddr, StoreError> {
    subnet
        .gateway_ip
        .ok_or_else(|| StoreError::config(format!("neutron subnet {} has no gateway", subnet.id)))
}

/// the cloud capabilities handed to a store
#[derive(Debug, Clone)]
pub struct Clients {
    pub network: Arc<dyn NetworkApi>,
    pub compute: Arc<dyn ComputeApi>,
}

impl Clients {
    pub fn new(network: Arc<dyn NetworkApi>, compute: Arc<dyn ComputeApi>) -> Self {
        Self { network, compute }
    }

    /// both capabilities served by one client
    pub fn from_cloud<C>(cloud: C) -> Self
    where
        C: NetworkApi + ComputeApi + Clone,
    {
        Self {
            network: Arc::new(cloud.clone()),
            compute: Arc::new(cloud),
        }
    }
}

/// Held while a store operation runs. Dropping it or calling
/// [`StoreGuard::release`] lets the next holder in.
#[derive(Debug)]
pub struct StoreGuard {
    inner: Option<GuardInner>,
}

#[derive(Debug)]
enum GuardInner {
    Local(tokio::sync::OwnedMutexGuard<()>),
    File(FileLock),
}

impl StoreGuard {
    pub fn local(guard: tokio::sync::OwnedMutexGuard<()>) -> Self {
        Self {
            inner: Some(GuardInner::Local(guard)),
        }
    }

    pub fn file(lock: FileLock) -> Self {
        Self {
            inner: Some(GuardInner::File(lock)),
        }
    }

    pub fn is_held(&self) -> bool {
        self.inner.is_some()
    }

    /// safe to call more than once
    pub fn release(&mut self) {
        if let Some(GuardInner::File(mut lock)) = self.inner.take() {
            lock.release();
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync + fmt::Debug + 'static {
    /// Allocates an address for `id`.
    async fn reserve(&self, id: &str) -> Result<IpConfig, StoreError>;
    /// Frees whatever `id` holds. Releasing an unknown id succeeds.
    async fn release_by_id(&self, id: &str) -> Result<(), StoreError>;
    /// Excludes other reserve/release calls until the guard is released.
    async fn lock(&self) -> Result<StoreGuard, StoreError>;
    /// release held resources
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl<S: Store + ?Sized> Store for Box<S> {
    async fn reserve(&self, id: &str) -> Result<IpConfig, StoreError> {
        (**self).reserve(id).await
    }
    async fn release_by_id(&self, id: &str) -> Result<(), StoreError> {
        (**self).release_by_id(id).await
    }
    async fn lock(&self) -> Result<StoreGuard, StoreError> {
        (**self).lock().await
    }
    async fn close(&self) -> Result<(), StoreError> {
        (**self).close().await
    }
}

/// Applies the release policy to a failed cloud-side release step. Under
/// `BestEffort` the failure is logged and swallowed.
pub(crate) fn settle_release(
    policy: ReleasePolicy,
    id: &str,
    result: Result<(), StoreError>,
) -> Result<(), StoreError> {
    match (result, policy) {
        (Ok(()), _) => Ok(()),
        (Err(err), ReleasePolicy::Strict) => Err(err),
        (Err(err), ReleasePolicy::BestEffort) => {
            warn!(?err, container_id = id, "release failed, continuing best-effort");
            Ok(())
        }
    }
}

/// Serializes reserve/release on a store.
#[derive(Debug)]
pub struct IpAllocator<S> {
    store: S,
}

impl<S: Clone> Clone for IpAllocator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S> IpAllocator<S>
where
    S: Store,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// reserve an address for `id` under the store lock
    pub async fn get(&self, id: &str) -> Result<IpConfig, StoreError> {
        let mut guard = self.store.lock().await?;
        let res = self.store.reserve(id).await;
        guard.release();
        match &res {
            Ok(ip) => info!(container_id = id, address = %ip.address, gateway = %ip.gateway, "reserved address"),
            Err(err) => warn!(container_id = id, %err, "failed to reserve address"),
        }
        res
    }

    /// release whatever `id` holds under the store lock
    pub async fn release(&self, id: &str) -> Result<(), StoreError> {
        let mut guard = self.store.lock().await?;
        let res = self.store.release_by_id(id).await;
        guard.release();
        debug!(container_id = id, ok = res.is_ok(), "release finished");
        res
    }

    pub async fn close(&self) -> Result<(), StoreError> {
        self.store.close().await
    }
}

/// What the cni collaborator reports back for an added container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    pub cni_version: String,
    pub ips: Vec<IpConfig>,
    pub routes: Vec<StaticRoute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns: Option<Dns>,
}

impl AllocationResult {
    pub fn new(ip: IpConfig, config: &IpamConfig, dns: Option<Dns>) -> Self {
        Self {
            cni_version: config.cni_version().to_owned(),
            ips: vec![ip],
            routes: config.routes().to_vec(),
            dns,
        }
    }
}
