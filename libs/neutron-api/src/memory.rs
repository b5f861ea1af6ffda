//! In-process cloud implementing [`NetworkApi`] and [`ComputeApi`].
//!
//! Addresses are handed out in order from each subnet's cidr, skipping the
//! gateway and anything already bound to a port. Every call is counted per
//! [`Op`] and single calls can be made to fail, so callers can assert which
//! requests a code path issued.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    net::IpAddr,
    sync::Arc,
};

use async_trait::async_trait;
use ipnet::IpNet;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    CloudError, CloudResult, ComputeApi, CreatePortOpts, FixedIp, InterfaceAttachment, Network,
    NetworkApi, Port, PortFilter, Route, Router, Server, ServerAddress, Subnet,
};

/// Operations that can be counted or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    GetNetwork,
    ListNetworks,
    GetSubnet,
    CreatePort,
    GetPort,
    ListPorts,
    UpdatePort,
    DeletePort,
    ListRouters,
    UpdateRouter,
    ListServers,
    ListInterfaces,
    AttachInterface,
    DetachInterface,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCloud {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    networks: BTreeMap<String, Network>,
    subnets: BTreeMap<String, Subnet>,
    ports: BTreeMap<String, Port>,
    servers: BTreeMap<String, Server>,
    attachments: BTreeMap<String, Vec<InterfaceAttachment>>,
    routers: BTreeMap<String, Router>,
    next_id: u64,
    calls: HashMap<Op, usize>,
    failures: HashMap<Op, CloudError>,
    swallow_port_updates: bool,
}

impl Inner {
    /// count the call and return an injected failure, if any
    fn enter(&mut self, op: Op) -> CloudResult<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.remove(&op) {
            Some(err) => {
                debug!(?op, %err, "injected cloud failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }

    fn addresses_in_use(&self) -> HashSet<IpAddr> {
        self.ports
            .values()
            .flat_map(|port| port.fixed_ips.iter().filter_map(|ip| ip.ip_address))
            .collect()
    }

    fn subnet(&self, id: &str) -> CloudResult<&Subnet> {
        self.subnets
            .get(id)
            .ok_or_else(|| CloudError::not_found("subnet", id))
    }

    fn allocate(&self, subnet_id: &str, taken: &HashSet<IpAddr>) -> CloudResult<IpAddr> {
        let subnet = self.subnet(subnet_id)?;
        subnet
            .cidr
            .hosts()
            .find(|addr| Some(*addr) != subnet.gateway_ip && !taken.contains(addr))
            .ok_or_else(|| CloudError::Conflict(format!("subnet {subnet_id} is exhausted")))
    }
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_network(&self, id: impl Into<String>, name: impl Into<String>) {
        let id = id.into();
        self.inner.lock().networks.insert(
            id.clone(),
            Network {
                id,
                name: name.into(),
                subnets: Vec::new(),
            },
        );
    }

    /// Adds a subnet and links it to its network, creating the network if
    /// it does not exist yet.
    pub fn add_subnet(
        &self,
        id: impl Into<String>,
        network_id: impl Into<String>,
        cidr: IpNet,
        gateway_ip: Option<IpAddr>,
    ) {
        let (id, network_id) = (id.into(), network_id.into());
        let mut inner = self.inner.lock();
        inner
            .networks
            .entry(network_id.clone())
            .or_insert_with(|| Network {
                id: network_id.clone(),
                name: network_id.clone(),
                subnets: Vec::new(),
            })
            .subnets
            .push(id.clone());
        inner.subnets.insert(
            id.clone(),
            Subnet {
                id,
                network_id,
                cidr,
                gateway_ip,
            },
        );
    }

    /// insert a port exactly as given
    pub fn add_port(&self, port: Port) {
        self.inner.lock().ports.insert(port.id.clone(), port);
    }

    pub fn add_server(&self, id: impl Into<String>, network: impl Into<String>, addrs: &[IpAddr]) {
        let id = id.into();
        let mut addresses = BTreeMap::new();
        addresses.insert(
            network.into(),
            addrs
                .iter()
                .map(|addr| ServerAddress {
                    addr: *addr,
                    version: if addr.is_ipv4() { 4 } else { 6 },
                })
                .collect(),
        );
        self.inner.lock().servers.insert(
            id.clone(),
            Server {
                name: id.clone(),
                id,
                addresses,
            },
        );
    }

    /// Adds a router plus the interface port that owns `gateway` on `subnet_id`.
    pub fn add_router(&self, id: impl Into<String>, subnet_id: &str, gateway: IpAddr) {
        let id = id.into();
        let mut inner = self.inner.lock();
        let network_id = inner
            .subnets
            .get(subnet_id)
            .map(|subnet| subnet.network_id.clone())
            .unwrap_or_default();
        let port_id = inner.next_id("port");
        inner.ports.insert(
            port_id.clone(),
            Port {
                id: port_id,
                name: String::new(),
                network_id,
                description: "router interface".into(),
                device_id: id.clone(),
                admin_state_up: true,
                fixed_ips: vec![FixedIp::new(subnet_id, gateway)],
            },
        );
        inner.routers.insert(
            id.clone(),
            Router {
                name: id.clone(),
                id,
                routes: Vec::new(),
            },
        );
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: Op, err: CloudError) {
        self.inner.lock().failures.insert(op, err);
    }

    /// When set, port updates are accepted but leave the port unchanged.
    pub fn swallow_port_updates(&self, swallow: bool) {
        self.inner.lock().swallow_port_updates = swallow;
    }

    pub fn calls(&self, op: Op) -> usize {
        self.inner.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn port(&self, id: &str) -> Option<Port> {
        self.inner.lock().ports.get(id).cloned()
    }

    pub fn ports(&self) -> Vec<Port> {
        self.inner.lock().ports.values().cloned().collect()
    }

    pub fn router(&self, id: &str) -> Option<Router> {
        self.inner.lock().routers.get(id).cloned()
    }

    pub fn interfaces(&self, server_id: &str) -> Vec<InterfaceAttachment> {
        self.inner
            .lock()
            .attachments
            .get(server_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl NetworkApi for MemoryCloud {
    async fn get_network(&self, id: &str) -> CloudResult<Network> {
        let mut inner = self.inner.lock();
        inner.enter(Op::GetNetwork)?;
        inner
            .networks
            .get(id)
            .cloned()
            .ok_or_else(|| CloudError::not_found("network", id))
    }

    async fn list_networks(&self) -> CloudResult<Vec<Network>> {
        let mut inner = self.inner.lock();
        inner.enter(Op::ListNetworks)?;
        Ok(inner.networks.values().cloned().collect())
    }

    async fn get_subnet(&self, id: &str) -> CloudResult<Subnet> {
        let mut inner = self.inner.lock();
        inner.enter(Op::GetSubnet)?;
        inner.subnet(id).cloned()
    }

    async fn create_port(&self, opts: CreatePortOpts) -> CloudResult<Port> {
        let mut inner = self.inner.lock();
        inner.enter(Op::CreatePort)?;
        let network = inner
            .networks
            .get(&opts.network_id)
            .cloned()
            .ok_or_else(|| CloudError::not_found("network", &opts.network_id))?;
        let fixed_ips = match network.subnets.first() {
            Some(subnet_id) => {
                let addr = inner.allocate(subnet_id, &inner.addresses_in_use())?;
                vec![FixedIp::new(subnet_id.clone(), addr)]
            }
            None => Vec::new(),
        };
        let port = Port {
            id: inner.next_id("port"),
            name: opts.name,
            network_id: opts.network_id,
            description: opts.description,
            device_id: String::new(),
            admin_state_up: opts.admin_state_up,
            fixed_ips,
        };
        trace!(?port, "memory cloud created port");
        inner.ports.insert(port.id.clone(), port.clone());
        Ok(port)
    }

    async fn get_port(&self, id: &str) -> CloudResult<Port> {
        let mut inner = self.inner.lock();
        inner.enter(Op::GetPort)?;
        inner
            .ports
            .get(id)
            .cloned()
            .ok_or_else(|| CloudError::not_found("port", id))
    }

    async fn list_ports(&self, filter: &PortFilter) -> CloudResult<Vec<Port>> {
        let mut inner = self.inner.lock();
        inner.enter(Op::ListPorts)?;
        Ok(inner
            .ports
            .values()
            .filter(|port| filter.matches(port))
            .cloned()
            .collect())
    }

    async fn update_port_fixed_ips(
        &self,
        id: &str,
        fixed_ips: Vec<FixedIp>,
    ) -> CloudResult<Port> {
        let mut inner = self.inner.lock();
        inner.enter(Op::UpdatePort)?;
        let current = inner
            .ports
            .get(id)
            .cloned()
            .ok_or_else(|| CloudError::not_found("port", id))?;
        if inner.swallow_port_updates {
            return Ok(current);
        }

        // addresses held by every other port
        let mut taken: HashSet<IpAddr> = inner
            .ports
            .values()
            .filter(|port| port.id != current.id)
            .flat_map(|port| port.fixed_ips.iter().filter_map(|ip| ip.ip_address))
            .collect();
        // explicit entries are claimed first so allocation can't hand them out
        for requested in &fixed_ips {
            let subnet = inner.subnet(&requested.subnet_id)?;
            if let Some(addr) = requested.ip_address {
                if !subnet.cidr.contains(&addr) {
                    return Err(CloudError::Api {
                        status: 400,
                        message: format!("{addr} is not in subnet {}", subnet.id),
                    });
                }
                if !taken.insert(addr) {
                    return Err(CloudError::Conflict(format!("{addr} is already in use")));
                }
            }
        }
        let mut resolved = Vec::with_capacity(fixed_ips.len());
        for requested in fixed_ips {
            let addr = match requested.ip_address {
                Some(addr) => addr,
                None => {
                    let addr = inner.allocate(&requested.subnet_id, &taken)?;
                    taken.insert(addr);
                    addr
                }
            };
            resolved.push(FixedIp::new(requested.subnet_id, addr));
        }

        let port = inner
            .ports
            .get_mut(id)
            .ok_or_else(|| CloudError::not_found("port", id))?;
        port.fixed_ips = resolved;
        trace!(?port, "memory cloud updated port");
        Ok(port.clone())
    }

    async fn delete_port(&self, id: &str) -> CloudResult<()> {
        let mut inner = self.inner.lock();
        inner.enter(Op::DeletePort)?;
        inner
            .ports
            .remove(id)
            .ok_or_else(|| CloudError::not_found("port", id))?;
        for attached in inner.attachments.values_mut() {
            attached.retain(|iface| iface.port_id != id);
        }
        Ok(())
    }

    async fn list_routers(&self) -> CloudResult<Vec<Router>> {
        let mut inner = self.inner.lock();
        inner.enter(Op::ListRouters)?;
        Ok(inner.routers.values().cloned().collect())
    }

    async fn update_router_routes(&self, id: &str, routes: Vec<Route>) -> CloudResult<Router> {
        let mut inner = self.inner.lock();
        inner.enter(Op::UpdateRouter)?;
        let router = inner
            .routers
            .get_mut(id)
            .ok_or_else(|| CloudError::not_found("router", id))?;
        router.routes = routes;
        Ok(router.clone())
    }
}

#[async_trait]
impl ComputeApi for MemoryCloud {
    async fn list_servers(&self) -> CloudResult<Vec<Server>> {
        let mut inner = self.inner.lock();
        inner.enter(Op::ListServers)?;
        Ok(inner.servers.values().cloned().collect())
    }

    async fn list_interfaces(&self, server_id: &str) -> CloudResult<Vec<InterfaceAttachment>> {
        let mut inner = self.inner.lock();
        inner.enter(Op::ListInterfaces)?;
        if !inner.servers.contains_key(server_id) {
            return Err(CloudError::not_found("server", server_id));
        }
        Ok(inner
            .attachments
            .get(server_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn attach_interface(
        &self,
        server_id: &str,
        port_id: &str,
    ) -> CloudResult<InterfaceAttachment> {
        let mut inner = self.inner.lock();
        inner.enter(Op::AttachInterface)?;
        if !inner.servers.contains_key(server_id) {
            return Err(CloudError::not_found("server", server_id));
        }
        let port = inner
            .ports
            .get_mut(port_id)
            .ok_or_else(|| CloudError::not_found("port", port_id))?;
        if !port.device_id.is_empty() && port.device_id != server_id {
            return Err(CloudError::Conflict(format!(
                "port {port_id} is bound to {}",
                port.device_id
            )));
        }
        port.device_id = server_id.to_owned();
        let attachment = InterfaceAttachment {
            port_id: port.id.clone(),
            net_id: port.network_id.clone(),
            fixed_ips: port.fixed_ips.clone(),
        };
        let attached = inner.attachments.entry(server_id.to_owned()).or_default();
        attached.retain(|iface| iface.port_id != port_id);
        attached.push(attachment.clone());
        Ok(attachment)
    }

    async fn detach_interface(&self, server_id: &str, port_id: &str) -> CloudResult<()> {
        let mut inner = self.inner.lock();
        inner.enter(Op::DetachInterface)?;
        let attached = inner
            .attachments
            .get_mut(server_id)
            .ok_or_else(|| CloudError::not_found("server", server_id))?;
        let before = attached.len();
        attached.retain(|iface| iface.port_id != port_id);
        if attached.len() == before {
            return Err(CloudError::not_found("interface", port_id));
        }
        if let Some(port) = inner.ports.get_mut(port_id) {
            port.device_id.clear();
        }
        Ok(())
    }
}
