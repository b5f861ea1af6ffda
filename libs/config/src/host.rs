//! Discovery of the host's own address, used to identify the host's port or
//! compute instance in the cloud inventory.
use std::{fs, net::IpAddr};

use anyhow::{Context, Result, bail};
use pnet::ipnetwork::IpNetwork;
use tracing::debug;

const PROC_ROUTE: &str = "/proc/net/route";

/// Returns the first address of `interface`, preferring IPv4. Without an
/// interface name the one carrying the IPv4 default route is used.
pub fn host_addr(interface: Option<&str>) -> Result<IpAddr> {
    let name = match interface {
        Some(name) => name.to_owned(),
        None => default_route_interface()?,
    };
    let interface = pnet::datalink::interfaces()
        .into_iter()
        .find(|e| e.name == name)
        .with_context(|| format!("failed to lookup interface {name:?}"))?;
    debug!(?interface);

    first_addr(&interface.ips)
        .with_context(|| format!("failed to get host IP addresses for {name:?}"))
}

fn first_addr(ips: &[IpNetwork]) -> Option<IpAddr> {
    ips.iter()
        .find(|net| net.is_ipv4())
        .or_else(|| ips.first())
        .map(|net| net.ip())
}

/// name of the interface holding the IPv4 default route
pub fn default_route_interface() -> Result<String> {
    let table = fs::read_to_string(PROC_ROUTE)
        .with_context(|| format!("failed to read {PROC_ROUTE}"))?;
    parse_route_table(&table)
}

/// parse the kernel route table format of `/proc/net/route`
pub fn parse_route_table(table: &str) -> Result<String> {
    for line in table.lines().skip(1) {
        let fields = line.split_whitespace().collect::<Vec<_>>();
        // Iface Destination Gateway Flags RefCnt Use Metric Mask ...
        if fields.len() < 8 {
            continue;
        }
        if fields[1] == "00000000" && fields[7] == "00000000" {
            return Ok(fields[0].to_owned());
        }
    }
    bail!("default gw route not set")
}
