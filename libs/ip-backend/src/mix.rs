//! Shared port, many fixed ips: every container gets one more fixed ip on
//! the host's own port, recorded in the ledger.
use std::net::IpAddr;

use async_trait::async_trait;
use config::IpamConfig;
use neutron_api::Subnet;

use crate::{Clients, IpConfig, Ledger, Store, StoreError, StoreGuard, shared::SharedPort};

#[derive(Debug)]
pub struct MixStore {
    port: SharedPort,
}

impl MixStore {
    pub async fn new(config: &IpamConfig, clients: &Clients) -> Result<Self, StoreError> {
        Ok(Self {
            port: SharedPort::resolve(config, clients).await?,
        })
    }

    pub fn host_addr(&self) -> IpAddr {
        self.port.host_addr()
    }

    pub fn host_port_id(&self) -> &str {
        self.port.host_port_id()
    }

    pub fn subnet(&self) -> &Subnet {
        self.port.subnet()
    }

    pub fn ledger(&self) -> &Ledger {
        self.port.ledger()
    }
}

#[async_trait]
impl Store for MixStore {
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use config::{Mode, ReleasePolicy};
    use neutron_api::{CloudError, memory::Op};
    use tracing_test::traced_test;

    use super::*;
    use crate::{IpAllocator, test_support::*};

    async fn store(cloud: &neutron_api::memory::MemoryCloud, cfg: IpamConfig) -> MixStore {
        MixStore::new(&cfg, &clients(cloud)).await.unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = cloud();
        let store = IpAllocator::new(store(&cloud, config(Mode::Mix, dir.path())).await);
        assert_eq!(store.store().host_port_id(), HOST_PORT);
        assert_eq!(store.store().subnet().id, SUBNET);

        let ip = store.get("c1").await.unwrap();
        assert_eq!(ip.address, "10.0.0.2/24".parse().unwrap());
        assert_eq!(ip.gateway, addr("10.0.0.1"));
        assert_eq!(host_port_addrs(&cloud), [host_addr(), addr("10.0.0.2")]);
        let entries = store.store().ledger().entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].container_id, "c1");

        store.release("c1").await.unwrap();
        assert_eq!(host_port_addrs(&cloud), [host_addr()]);
        assert!(store.store().ledger().entries().unwrap().is_empty());
        assert!(logs_contain("updated neutron port"));
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = cloud();
        let store = IpAllocator::new(store(&cloud, config(Mode::Mix, dir.path())).await);

        // never reserved
        store.release("ghost").await.unwrap();
        assert_eq!(cloud.calls(Op::UpdatePort), 0);

        store.get("c1").await.unwrap();
        store.release("c1").await.unwrap();
        store.release("c1").await.unwrap();
        // reserve + one release
        assert_eq!(cloud.calls(Op::UpdatePort), 2);
        assert!(store.store().ledger().entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capacity_blocks_update() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = cloud_with(&["10.0.0.9"]);
        let store = store(&cloud, config(Mode::Mix, dir.path()).with_max_ips(2)).await;

        let err = store.reserve("c1").await.unwrap_err();
        assert!(err.is_capacity(), "{err}");
        assert_eq!(cloud.calls(Op::UpdatePort), 0);
        assert!(store.ledger().entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_new_address() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = cloud();
        let store = store(&cloud, config(Mode::Mix, dir.path())).await;
        cloud.swallow_port_updates(true);

        let err = store.reserve("c1").await.unwrap_err();
        assert!(matches!(err, StoreError::NoNewAddress { .. }));
        assert!(err.is_divergence());
        assert!(store.ledger().entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reverse_lookup_removes_only_owner() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = cloud_with(&["10.0.0.9", "10.0.0.11"]);
        let store = store(&cloud, config(Mode::Mix, dir.path())).await;
        store.ledger().write(addr("10.0.0.9"), "c1").unwrap();
        store.ledger().write(addr("10.0.0.11"), "c2").unwrap();

        store.release_by_id("c1").await.unwrap();

        assert_eq!(host_port_addrs(&cloud), [host_addr(), addr("10.0.0.11")]);
        let entries = store.ledger().entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].address, addr("10.0.0.11"));
        assert_eq!(entries[0].container_id, "c2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_reserve_respects_cap() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = cloud();
        // two independent stores on one data dir, like two plugin processes
        let cfg = config(Mode::Mix, dir.path()).with_max_ips(2);
        let a = Arc::new(IpAllocator::new(store(&cloud, cfg.clone()).await));
        let b = Arc::new(IpAllocator::new(store(&cloud, cfg).await));

        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.get("c1").await }),
            tokio::spawn(async move { b.get("c2").await }),
        );
        let results = [ra.unwrap(), rb.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let err = results.into_iter().find_map(Result::err).unwrap();
        assert!(err.is_capacity(), "{err}");
        assert_eq!(host_port_addrs(&cloud).len(), 2);
        assert_eq!(Ledger::new(dir.path()).entries().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_max_two_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = cloud();
        let store = IpAllocator::new(store(&cloud, config(Mode::Mix, dir.path()).with_max_ips(2)).await);

        store.get("c1").await.unwrap();
        assert_eq!(host_port_addrs(&cloud).len(), 2);
        assert_eq!(store.store().ledger().entries().unwrap().len(), 1);

        let err = store.get("c2").await.unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(host_port_addrs(&cloud).len(), 2);
        let entries = store.store().ledger().entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].container_id, "c1");
    }

    #[tokio::test]
    async fn test_strict_release_keeps_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = cloud();
        let store = IpAllocator::new(store(&cloud, config(Mode::Mix, dir.path())).await);
        store.get("c1").await.unwrap();

        cloud.fail_next(Op::UpdatePort, CloudError::Transport("connection reset".into()));
        let err = store.release("c1").await.unwrap_err();
        assert!(err.is_cloud());
        assert_eq!(store.store().ledger().entries().unwrap().len(), 1);

        // a retry finds the entry again
        store.release("c1").await.unwrap();
        assert!(store.store().ledger().entries().unwrap().is_empty());
        assert_eq!(host_port_addrs(&cloud), [host_addr()]);
    }

    #[tokio::test]
    async fn test_strict_release_reports_divergence() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = cloud();
        let store = store(&cloud, config(Mode::Mix, dir.path())).await;
        // ledger claims an address the port doesn't have
        store.ledger().write(addr("10.0.0.50"), "c1").unwrap();

        let err = store.release_by_id("c1").await.unwrap_err();
        assert!(err.is_divergence(), "{err}");
        assert!(store.ledger().find_by_id("c1").unwrap().is_some());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_best_effort_release() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = cloud();
        let cfg = config(Mode::Mix, dir.path()).with_release_policy(ReleasePolicy::BestEffort);
        let store = IpAllocator::new(store(&cloud, cfg).await);
        store.get("c1").await.unwrap();

        cloud.fail_next(Op::GetPort, CloudError::Transport("connection reset".into()));
        store.release("c1").await.unwrap();
        assert!(store.store().ledger().entries().unwrap().is_empty());
        // the cloud still holds the address, only the ledger moved on
        assert_eq!(host_port_addrs(&cloud).len(), 2);
        assert!(logs_contain("best-effort"));

        store.store().ledger().write(addr("10.0.0.50"), "c2").unwrap();
        store.release("c2").await.unwrap();
        assert!(store.store().ledger().entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_conflict_rolls_back_port() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = cloud();
        let store = store(&cloud, config(Mode::Mix, dir.path())).await;
        // stale entry for the address the cloud will hand out next
        store.ledger().write(addr("10.0.0.2"), "stale").unwrap();

        let err = store.reserve("c1").await.unwrap_err();
        assert!(matches!(err, StoreError::Ledger { .. }));
        assert_eq!(host_port_addrs(&cloud), [host_addr()]);
        assert_eq!(
            store.ledger().find_by_id("stale").unwrap().unwrap().address,
            addr("10.0.0.2")
        );
    }

    #[tokio::test]
    async fn test_construction_errors() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = cloud();

        let cfg = IpamConfig::new(Mode::Mix, Vec::new(), dir.path()).with_host_addr(host_addr());
        assert!(MixStore::new(&cfg, &clients(&cloud)).await.unwrap_err().is_config());

        // no port carries this address
        let cfg = config(Mode::Mix, dir.path()).with_host_addr(addr("10.0.0.200"));
        assert!(MixStore::new(&cfg, &clients(&cloud)).await.unwrap_err().is_config());

        cloud.add_network("empty", "empty");
        let cfg = IpamConfig::new(Mode::Mix, vec!["empty".into()], dir.path())
            .with_host_addr(host_addr());
        assert!(MixStore::new(&cfg, &clients(&cloud)).await.unwrap_err().is_config());
    }
}
