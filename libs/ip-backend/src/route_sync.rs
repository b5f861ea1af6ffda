//! Keeps a router's static routes in step with where pods run.
//!
//! In mix-route mode a pod address lives on the host's port but traffic for
//! it is steered by the router, one host route per pod pointing at the node
//! running it. The store never writes router state; this collaborator does,
//! whenever the caller hands it the current placement.
use std::{net::IpAddr, sync::Arc};

use ipnet::IpNet;
use neutron_api::{CloudError, NetworkApi, Route, Router, Subnet};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    StoreError,
    diff::{find_route, route_destination},
};

/// where one pod runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodPlacement {
    pub name: String,
    pub pod_ip: String,
    pub host_ip: String,
    /// the pod is being torn down
    pub deleting: bool,
}

#[derive(Debug, Clone)]
pub struct RouteSync {
    network: Arc<dyn NetworkApi>,
    router_id: String,
    subnet: Subnet,
    lock: Arc<Mutex<()>>,
}

impl RouteSync {
    pub fn new(network: Arc<dyn NetworkApi>, router: &Router, subnet: Subnet) -> Self {
        Self {
            network,
            router_id: router.id.clone(),
            subnet,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn router_id(&self) -> &str {
        &self.router_id
    }

    /// One host route per live pod inside the subnet, first placement wins
    /// for a repeated address.
    pub fn routes_for(&self, pods: &[PodPlacement]) -> Vec<Route> {
        let mut routes: Vec<Route> = Vec::with_capacity(pods.len());
        for pod in pods {
            if pod.deleting {
                debug!(pod = %pod.name, "pod is in deleting status");
                continue;
            }
            let Some(destination) = route_destination(&pod.pod_ip) else {
                warn!(pod = %pod.name, pod_ip = %pod.pod_ip, "invalid pod ip");
                continue;
            };
            let Ok(nexthop) = pod.host_ip.trim().parse::<IpAddr>() else {
                warn!(pod = %pod.name, host_ip = %pod.host_ip, "invalid host ip");
                continue;
            };
            if !self.subnet.cidr.contains(&destination.addr()) {
                info!(pod = %pod.name, pod_ip = %pod.pod_ip, cidr = %self.subnet.cidr, "pod ip is not in router range");
                continue;
            }
            if find_route(&routes, destination).is_some() {
                warn!(pod = %pod.name, %destination, "duplicate pod route");
                continue;
            }
            routes.push(Route {
                destination,
                nexthop,
            });
        }
        routes
    }

    /// Replaces the router's static routes with those computed from `pods`.
    pub async fn update_routes(&self, pods: &[PodPlacement]) -> Result<Router, StoreError> {
        let _guard = self.lock.lock().await;
        info!(router_id = %self.router_id, "update router static routes start");
        let routes = self.routes_for(pods);
        debug!(router_id = %self.router_id, ?routes, "router static routes");
        let router = self
            .network
            .update_router_routes(&self.router_id, routes)
            .await
            .inspect_err(|err| warn!(router_id = %self.router_id, %err, "update router static routes failed"))?;
        info!(router_id = %self.router_id, count = router.routes.len(), "update router static routes end");
        Ok(router)
    }

    /// Drops the route for `destination`. Returns whether one was present.
    pub async fn remove_route(&self, destination: IpNet) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let router = self
            .network
            .list_routers()
            .await?
            .into_iter()
            .find(|router| router.id == self.router_id)
            .ok_or_else(|| CloudError::not_found("router", self.router_id.as_str()))?;
        let mut routes = router.routes;
        let Some(index) = find_route(&routes, destination) else {
            return Ok(false);
        };
        routes.remove(index);
        self.network
            .update_router_routes(&self.router_id, routes)
            .await?;
        info!(router_id = %self.router_id, %destination, "removed router static route");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use neutron_api::memory::{MemoryCloud, Op};

    use super::*;
    use crate::test_support::*;

    fn pod(name: &str, pod_ip: &str, host_ip: &str) -> PodPlacement {
        PodPlacement {
            name: name.into(),
            pod_ip: pod_ip.into(),
            host_ip: host_ip.into(),
            deleting: false,
        }
    }

    fn sync(cloud: &MemoryCloud) -> RouteSync {
        let router = cloud.router(ROUTER).unwrap();
        let subnet = Subnet {
            id: SUBNET.into(),
            network_id: NETWORK.into(),
            cidr: "10.0.0.0/24".parse().unwrap(),
            gateway_ip: Some(addr("10.0.0.1")),
        };
        RouteSync::new(Arc::new(cloud.clone()), &router, subnet)
    }

    #[test]
    fn test_routes_for_filters_pods() {
        let cloud = cloud();
        let sync = sync(&cloud);
        let mut deleting = pod("gone", "10.0.0.12", "10.0.0.5");
        deleting.deleting = true;
        let pods = vec![
            pod("a", "10.0.0.10", "10.0.0.4"),
            deleting,
            pod("outside", "192.168.1.10", "10.0.0.4"),
            pod("pending", "", "10.0.0.4"),
            pod("dup", "10.0.0.10", "10.0.0.5"),
            pod("b", "10.0.0.11", "10.0.0.5"),
        ];
        let routes = sync.routes_for(&pods);
        assert_eq!(
            routes,
            vec![
                Route {
                    destination: "10.0.0.10/32".parse().unwrap(),
                    nexthop: addr("10.0.0.4"),
                },
                Route {
                    destination: "10.0.0.11/32".parse().unwrap(),
                    nexthop: addr("10.0.0.5"),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_update_and_remove_routes() {
        let cloud = cloud();
        let sync = sync(&cloud);
        sync.update_routes(&[
            pod("a", "10.0.0.10", "10.0.0.4"),
            pod("b", "10.0.0.11", "10.0.0.5"),
        ])
        .await
        .unwrap();
        assert_eq!(cloud.router(ROUTER).unwrap().routes.len(), 2);

        let removed = sync
            .remove_route(route_destination("10.0.0.10").unwrap())
            .await
            .unwrap();
        assert!(removed);
        let routes = cloud.router(ROUTER).unwrap().routes;
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].nexthop, addr("10.0.0.5"));

        let calls = cloud.calls(Op::UpdateRouter);
        assert!(
            !sync
                .remove_route(route_destination("10.0.0.10").unwrap())
                .await
                .unwrap()
        );
        assert_eq!(cloud.calls(Op::UpdateRouter), calls);
    }

    #[tokio::test]
    async fn test_update_failure_surfaces() {
        let cloud = cloud();
        let sync = sync(&cloud);
        cloud.fail_next(
            Op::UpdateRouter,
            CloudError::Api {
                status: 409,
                message: "router busy".into(),
            },
        );
        let err = sync
            .update_routes(&[pod("a", "10.0.0.10", "10.0.0.4")])
            .await
            .unwrap_err();
        assert!(err.is_cloud());
        assert!(cloud.router(ROUTER).unwrap().routes.is_empty());
    }
}
