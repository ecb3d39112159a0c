use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use ipnet::{IpNet, Ipv4Net};

/// Expand CIDRs and bare addresses into a sorted, de-duplicated target list.
///
/// A bare IPv4 address stands for the .1-.254 sweep of its /24. Entries that
/// do not parse are logged and skipped. At most `max_targets` addresses are
/// returned.
pub fn expand_targets(inputs: &[String], max_targets: usize) -> Vec<IpAddr> {
    let mut targets = BTreeSet::new();
    let mut truncated = false;

    for input in inputs {
        let input = input.trim();
        let before = targets.len();

        let hosts: Box<dyn Iterator<Item = IpAddr>> = if input.contains('/') {
            match input.parse::<IpNet>() {
                Ok(net) => Box::new(net.hosts()),
                Err(e) => {
                    tracing::error!(cidr = %input, error = %e, "cannot parse CIDR, skipping");
                    continue;
                }
            }
        } else {
            match input.parse::<IpAddr>() {
                Ok(IpAddr::V4(addr)) => Box::new(sweep_24(addr)),
                Ok(addr @ IpAddr::V6(_)) => Box::new(std::iter::once(addr)),
                Err(e) => {
                    tracing::error!(cidr = %input, error = %e, "cannot parse address, skipping");
                    continue;
                }
            }
        };

        for ip in hosts {
            if targets.len() >= max_targets {
                truncated = true;
                break;
            }
            targets.insert(ip);
        }
        tracing::info!(cidr = %input, added = targets.len() - before, "expanded scan range");
    }

    if truncated {
        tracing::warn!(max_targets, "scan range truncated");
    }
    targets.into_iter().collect()
}

fn sweep_24(addr: Ipv4Addr) -> impl Iterator<Item = IpAddr> {
    let [a, b, c, _] = addr.octets();
    (1..=254).map(move |d| IpAddr::V4(Ipv4Addr::new(a, b, c, d)))
}

/// Address of the interface that carries outbound traffic, or loopback.
///
/// No packet is sent: connecting a UDP socket only selects a route.
pub fn local_ipv4() -> Ipv4Addr {
    let detected = UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .ok()
        .and_then(|addr| match addr.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
            _ => None,
        });

    detected.unwrap_or(Ipv4Addr::LOCALHOST)
}

/// The /24 around `ip`.
pub fn subnet_24(ip: Ipv4Addr) -> String {
    let [a, b, c, _] = ip.octets();
    Ipv4Net::new(Ipv4Addr::new(a, b, c, 0), 24)
        .map(|net| net.to_string())
        .unwrap_or_else(|_| format!("{a}.{b}.{c}.0/24"))
}

/// Default scan range when nothing is configured.
pub fn local_subnet() -> String {
    let ip = local_ipv4();
    let subnet = subnet_24(ip);
    tracing::info!(local_ip = %ip, %subnet, "auto-detected local subnet");
    subnet
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidrs(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_slash_30_has_two_hosts() {
        let targets = expand_targets(&cidrs(&["192.168.1.0/30"]), 4096);
        assert_eq!(
            targets,
            vec![
                "192.168.1.1".parse::<IpAddr>().unwrap(),
                "192.168.1.2".parse::<IpAddr>().unwrap()
            ]
        );
    }

    #[test]
    fn test_bare_ip_sweeps_its_24() {
        let targets = expand_targets(&cidrs(&["10.1.2.77"]), 4096);
        assert_eq!(targets.len(), 254);
        assert_eq!(targets[0], "10.1.2.1".parse::<IpAddr>().unwrap());
        assert_eq!(targets[253], "10.1.2.254".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_overlapping_ranges_are_deduplicated_and_sorted() {
        let targets = expand_targets(&cidrs(&["10.0.0.8/29", "10.0.0.0/28"]), 4096);
        assert_eq!(targets.len(), 14);
        assert!(targets.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let targets = expand_targets(&cidrs(&["not-a-net/24", "banana", "172.16.0.0/30"]), 4096);
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_max_targets_caps_expansion() {
        let targets = expand_targets(&cidrs(&["10.0.0.0/16"]), 100);
        assert_eq!(targets.len(), 100);
    }

    #[test]
    fn test_subnet_24() {
        assert_eq!(subnet_24(Ipv4Addr::new(192, 168, 7, 42)), "192.168.7.0/24");
    }
}
