//! # neutron-api
//!
//! Capability traits for the cloud operations the ipam backend needs.
//!
//! The backend never builds credentials or talks http itself. It is handed
//! something implementing [`NetworkApi`] (ports, subnets, networks, routers)
//! and [`ComputeApi`] (instances and their interface attachments), and all
//! calls are plain request/response.
//!
//! [`memory::MemoryCloud`] implements both over in-process state and is what
//! the tests and the `simulate` command run against.
#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::fmt;

use async_trait::async_trait;

pub mod error;
pub mod memory;
pub mod models;

pub use error::{CloudError, CloudResult};
pub use models::{
    CreatePortOpts, FixedIp, InterfaceAttachment, Network, Port, PortFilter, Route, Router,
    Server, ServerAddress, Subnet,
};

/// neutron operations
#[async_trait]
pub trait NetworkApi: Send + Sync + fmt::Debug + 'static {
    async fn get_network(&self, id: &str) -> CloudResult<Network>;
    async fn list_networks(&self) -> CloudResult<Vec<Network>>;
    async fn get_subnet(&self, id: &str) -> CloudResult<Subnet>;

    async fn create_port(&self, opts: CreatePortOpts) -> CloudResult<Port>;
    async fn get_port(&self, id: &str) -> CloudResult<Port>;
    async fn list_ports(&self, filter: &PortFilter) -> CloudResult<Vec<Port>>;
    /// Replaces the port's fixed ip list. The answer carries the whole
    /// resulting list, not just what changed.
    async fn update_port_fixed_ips(&self, id: &str, fixed_ips: Vec<FixedIp>)
    -> CloudResult<Port>;
    /// Deleting a port also removes any interface attachment it backs.
    async fn delete_port(&self, id: &str) -> CloudResult<()>;

    async fn list_routers(&self) -> CloudResult<Vec<Router>>;
    async fn update_router_routes(&self, id: &str, routes: Vec<Route>) -> CloudResult<Router>;
}

/// nova operations
#[async_trait]
pub trait ComputeApi: Send + Sync + fmt::Debug + 'static {
    async fn list_servers(&self) -> CloudResult<Vec<Server>>;
    async fn list_interfaces(&self, server_id: &str) -> CloudResult<Vec<InterfaceAttachment>>;
    async fn attach_interface(
        &self,
        server_id: &str,
        port_id: &str,
    ) -> CloudResult<InterfaceAttachment>;
    async fn detach_interface(&self, server_id: &str, port_id: &str) -> CloudResult<()>;
}
