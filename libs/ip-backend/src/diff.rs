//! Typed searches over fixed-ip and route lists.
//!
//! A port update answers with the port's whole fixed-ip list, so the address
//! it added has to be recovered by comparing against the list sent.
use std::net::IpAddr;

use ipnet::IpNet;
use neutron_api::{FixedIp, Route};
use tracing::debug;

/// The entry of `after` that has no `(address, subnet)` match in `before`.
/// `None` when the update added nothing.
pub fn new_fixed_ip(before: &[FixedIp], after: &[FixedIp]) -> Option<FixedIp> {
    debug!(?before, ?after, "diffing fixed ips");
    if after.len() <= before.len() {
        return None;
    }
    after
        .iter()
        .filter(|ip| ip.ip_address.is_some())
        .find(|ip| {
            !before
                .iter()
                .any(|old| old.ip_address == ip.ip_address && old.subnet_id == ip.subnet_id)
        })
        .cloned()
}

/// index of the first fixed ip bound to `addr`
pub fn find_fixed_ip(ips: &[FixedIp], addr: IpAddr) -> Option<usize> {
    ips.iter().position(|ip| ip.ip_address == Some(addr))
}

/// index of the first route whose destination is `destination`
pub fn find_route(routes: &[Route], destination: IpNet) -> Option<usize> {
    routes
        .iter()
        .position(|route| route.destination == destination)
}

/// Parses a route destination. A bare address is a host route, /32 for v4
/// and /128 for v6.
pub fn route_destination(s: &str) -> Option<IpNet> {
    let s = s.trim();
    if s.contains('/') {
        s.parse::<IpNet>().ok()
    } else {
        let addr = s.parse::<IpAddr>().ok()?;
        IpNet::new(addr, if addr.is_ipv4() { 32 } else { 128 }).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(subnet: &str, addr: &str) -> FixedIp {
        FixedIp::new(subnet, addr.parse().unwrap())
    }

    #[test]
    fn test_new_fixed_ip() {
        let before = vec![ip("s1", "10.0.0.5")];
        let after = vec![ip("s1", "10.0.0.5"), ip("s1", "10.0.0.9")];
        assert_eq!(new_fixed_ip(&before, &after), Some(ip("s1", "10.0.0.9")));
    }

    #[test]
    fn test_unchanged_list_has_no_new_ip() {
        let before = vec![ip("s1", "10.0.0.5")];
        assert_eq!(new_fixed_ip(&before, &before), None);
        assert_eq!(new_fixed_ip(&before, &[]), None);
    }

    #[test]
    fn test_reordered_list() {
        // the cloud may return entries in a different order
        let before = vec![ip("s1", "10.0.0.5"), ip("s1", "10.0.0.6")];
        let after = vec![
            ip("s1", "10.0.0.7"),
            ip("s1", "10.0.0.6"),
            ip("s1", "10.0.0.5"),
        ];
        assert_eq!(new_fixed_ip(&before, &after), Some(ip("s1", "10.0.0.7")));
    }

    #[test]
    fn test_same_address_other_subnet_is_new() {
        let before = vec![ip("s1", "10.0.0.5")];
        let after = vec![ip("s1", "10.0.0.5"), ip("s2", "10.0.0.5")];
        assert_eq!(new_fixed_ip(&before, &after), Some(ip("s2", "10.0.0.5")));
    }

    #[test]
    fn test_find_fixed_ip() {
        let ips = vec![ip("s1", "10.0.0.5"), ip("s1", "10.0.0.9")];
        assert_eq!(find_fixed_ip(&ips, "10.0.0.9".parse().unwrap()), Some(1));
        assert_eq!(find_fixed_ip(&ips, "10.0.0.1".parse().unwrap()), None);
    }

    #[test]
    fn test_find_route() {
        let routes = vec![
            Route {
                destination: "10.0.0.0/24".parse().unwrap(),
                nexthop: "10.0.0.1".parse().unwrap(),
            },
            Route {
                destination: "10.0.0.9/32".parse().unwrap(),
                nexthop: "10.0.0.4".parse().unwrap(),
            },
        ];
        let bare = route_destination("10.0.0.9").unwrap();
        assert_eq!(bare, "10.0.0.9/32".parse::<IpNet>().unwrap());
        assert_eq!(find_route(&routes, bare), Some(1));
        assert_eq!(
            find_route(&routes, route_destination("10.0.0.0/24").unwrap()),
            Some(0)
        );
        assert_eq!(find_route(&routes, route_destination("10.0.0.8").unwrap()), None);

        assert_eq!(
            route_destination("fd00::9").unwrap(),
            "fd00::9/128".parse::<IpNet>().unwrap()
        );
        assert!(route_destination("not-an-ip").is_none());
    }
}
