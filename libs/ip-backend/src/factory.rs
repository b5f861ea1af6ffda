use config::{IpamConfig, Mode};
use tracing::info;

use crate::{
    Clients, EniStore, MixRouteStore, MixStore, SeparateStore, Store, StoreError, lookup,
};

/// Builds the store for the configured mode. A config without networks is
/// rejected before any cloud call is made.
pub async fn store_factory(
    config: &IpamConfig,
    clients: Clients,
) -> Result<Box<dyn Store>, StoreError> {
    let network = lookup::target_network(config)?;
    info!(mode = %config.mode(), network, "creating neutron ip store");
    Ok(match config.mode() {
        Mode::Separate => Box::new(SeparateStore::new(config, &clients)?),
        Mode::Eni => Box::new(EniStore::new(config, &clients).await?),
        Mode::Mix => Box::new(MixStore::new(config, &clients).await?),
        Mode::MixRoute => Box::new(MixRouteStore::new(config, &clients).await?),
    })
}

#[cfg(test)]
mod tests {
    use neutron_api::memory::Op;

    use super::*;
    use crate::{IpAllocator, test_support::*};

    #[tokio::test]
    async fn test_every_mode_allocates() {
        for mode in [Mode::Separate, Mode::Eni, Mode::Mix, Mode::MixRoute] {
            let dir = tempfile::tempdir().unwrap();
            let cloud = cloud();
            let store = store_factory(&config(mode, dir.path()), clients(&cloud))
                .await
                .unwrap();
            let alloc = IpAllocator::new(store);
            let ip = alloc.get("c1").await.unwrap();
            assert_eq!(ip.address, "10.0.0.2/24".parse().unwrap(), "{mode}");
            alloc.release("c1").await.unwrap();
            alloc.close().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_mode_shapes_cloud_calls() {
        let dir = tempfile::tempdir().unwrap();
        let mix = cloud();
        let store = store_factory(&config(Mode::Mix, dir.path()), clients(&mix))
            .await
            .unwrap();
        store.reserve("c1").await.unwrap();
        assert_eq!(mix.calls(Op::CreatePort), 0);
        assert_eq!(mix.calls(Op::UpdatePort), 1);

        let separate = cloud();
        let store = store_factory(&config(Mode::Separate, dir.path()), clients(&separate))
            .await
            .unwrap();
        store.reserve("c1").await.unwrap();
        assert_eq!(separate.calls(Op::CreatePort), 1);
        assert_eq!(separate.calls(Op::UpdatePort), 0);
        assert_eq!(separate.calls(Op::AttachInterface), 0);
    }

    #[tokio::test]
    async fn test_empty_networks_rejected_first() {
        let dir = tempfile::tempdir().unwrap();
        for mode in [Mode::Separate, Mode::Eni, Mode::Mix, Mode::MixRoute] {
            let cloud = cloud();
            let cfg = IpamConfig::new(mode, Vec::new(), dir.path()).with_host_addr(host_addr());
            let err = store_factory(&cfg, clients(&cloud)).await.unwrap_err();
            assert!(err.is_config(), "{mode}: {err}");
            assert_eq!(cloud.calls(Op::GetNetwork), 0);
            assert_eq!(cloud.calls(Op::ListServers), 0);
            assert_eq!(cloud.calls(Op::ListPorts), 0);
        }
    }
}
