use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;

use futures::future::join_all;
use mac_address::MacAddress;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;

/// Ports tried when a host ignores both ARP and ICMP.
pub const COMMON_PORTS: [u16; 8] = [80, 443, 22, 3389, 445, 139, 21, 23];

const PROC_ARP: &str = "/proc/net/arp";

/// Arguments for a single-echo `ping` on `os` (as in `std::env::consts::OS`).
/// The reply-wait flag differs per platform: Linux and OpenBSD take whole
/// seconds, macOS and the other BSDs take milliseconds.
pub fn ping_args(os: &str, ip: &str, wait: Duration) -> Vec<String> {
    let millis = wait.as_millis().max(1).to_string();
    let secs = wait.as_secs().max(1).to_string();
    let (count, wait_flag, wait_value) = match os {
        "windows" => ("-n", "-w", millis),
        "macos" | "ios" | "freebsd" | "netbsd" | "dragonfly" => ("-c", "-W", millis),
        "openbsd" => ("-c", "-w", secs),
        _ => ("-c", "-W", secs),
    };
    vec![count.into(), "1".into(), wait_flag.into(), wait_value, ip.into()]
}

/// One round trip with the system `ping`, success iff it exits zero.
pub async fn ping_once(ip: &str, wait: Duration) -> bool {
    let mut command = Command::new("ping");
    command.args(ping_args(std::env::consts::OS, ip, wait));
    command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null()).kill_on_drop(true);

    match timeout(wait + Duration::from_millis(500), command.status()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            tracing::debug!(%ip, error = %e, "failed to run ping");
            false
        }
        Err(_) => false,
    }
}

/// ICMP liveness with `attempts` tries.
pub async fn ping_host(ip: IpAddr, attempts: u32, wait: Duration) -> bool {
    let ip = ip.to_string();
    for _ in 0..attempts.max(1) {
        if ping_once(&ip, wait).await {
            return true;
        }
    }
    false
}

/// Plain TCP connect, no retry.
pub async fn port_open(ip: IpAddr, port: u16, wait: Duration) -> bool {
    matches!(timeout(wait, TcpStream::connect(SocketAddr::new(ip, port))).await, Ok(Ok(_)))
}

/// True if any of `ports` accepts a connection.
pub async fn any_port_open(ip: IpAddr, ports: &[u16], wait: Duration) -> bool {
    join_all(ports.iter().map(|&port| port_open(ip, port, wait))).await.into_iter().any(|open| open)
}

/// Uppercase, colon-separated form of a MAC address.
pub fn format_mac(mac: MacAddress) -> String {
    let b = mac.bytes();
    format!("{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", b[0], b[1], b[2], b[3], b[4], b[5])
}

/// First usable MAC address in free-form `arp` output.
pub fn find_mac(text: &str) -> Option<String> {
    text.split_whitespace()
        .filter(|token| token.len() == 17)
        .filter_map(|token| token.replace('-', ":").parse::<MacAddress>().ok())
        .find(|mac| mac.bytes() != [0; 6])
        .map(format_mac)
}

/// MAC for `ip` from the Linux `/proc/net/arp` table. Incomplete entries
/// (flags 0x0) are ignored.
pub fn parse_proc_arp(table: &str, ip: IpAddr) -> Option<String> {
    let ip = ip.to_string();
    table.lines().skip(1).find_map(|line| {
        let columns: Vec<&str> = line.split_whitespace().collect();
        match columns.as_slice() {
            [addr, _hw_type, flags, mac, ..] if *addr == ip && *flags != "0x0" => find_mac(mac),
            _ => None,
        }
    })
}

/// ARP cache lookup. IPv6 neighbours are not consulted.
pub async fn arp_lookup(ip: IpAddr) -> Option<String> {
    if ip.is_ipv6() {
        return None;
    }

    if cfg!(target_os = "linux") {
        if let Ok(table) = tokio::fs::read_to_string(PROC_ARP).await {
            return parse_proc_arp(&table, ip);
        }
    }

    let ip_arg = ip.to_string();
    let flag = if cfg!(windows) { "-a" } else { "-n" };
    let output = Command::new("arp")
        .args([flag, ip_arg.as_str()])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => find_mac(&String::from_utf8_lossy(&output.stdout)),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(%ip, error = %e, "arp lookup failed");
            None
        }
    }
}

/// Reverse DNS on the blocking pool, bounded by `wait`.
pub async fn reverse_dns(ip: IpAddr, wait: Duration) -> Option<String> {
    let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&ip));
    match timeout(wait, lookup).await {
        Ok(Ok(Ok(name))) if !name.is_empty() && name != ip.to_string() => Some(name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    const PROC_TABLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         a4:91:b1:0c:22:7f     *        eth0
192.168.1.50     0x1         0x0         00:00:00:00:00:00     *        eth0
192.168.1.60     0x1         0x2         b8:27:eb:12:34:56     *        eth0
";

    #[test]
    fn test_ping_wait_flag_per_platform() {
        let wait = Duration::from_millis(1500);
        assert_eq!(ping_args("linux", "10.0.0.1", wait), ["-c", "1", "-W", "1", "10.0.0.1"]);
        assert_eq!(ping_args("macos", "10.0.0.1", wait), ["-c", "1", "-W", "1500", "10.0.0.1"]);
        assert_eq!(ping_args("freebsd", "10.0.0.1", wait), ["-c", "1", "-W", "1500", "10.0.0.1"]);
        assert_eq!(ping_args("openbsd", "10.0.0.1", wait), ["-c", "1", "-w", "1", "10.0.0.1"]);
        assert_eq!(ping_args("windows", "10.0.0.1", wait), ["-n", "1", "-w", "1500", "10.0.0.1"]);
        assert_eq!(ping_args("linux", "10.0.0.1", Duration::from_millis(200))[3], "1");
    }

    #[test]
    fn test_parse_proc_arp() {
        let gateway = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(parse_proc_arp(PROC_TABLE, gateway).as_deref(), Some("A4:91:B1:0C:22:7F"));

        let incomplete = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(parse_proc_arp(PROC_TABLE, incomplete), None);

        let missing = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 99));
        assert_eq!(parse_proc_arp(PROC_TABLE, missing), None);
    }

    #[test]
    fn test_find_mac_in_command_output() {
        let bsd = "? (192.168.1.60) at b8:27:eb:12:34:56 on en0 ifscope [ethernet]";
        assert_eq!(find_mac(bsd).as_deref(), Some("B8:27:EB:12:34:56"));

        let windows = "  192.168.1.60          b8-27-eb-12-34-56     dynamic";
        assert_eq!(find_mac(windows).as_deref(), Some("B8:27:EB:12:34:56"));

        assert_eq!(find_mac("192.168.1.60 (192.168.1.60) -- no entry"), None);
    }

    #[tokio::test]
    async fn test_port_probes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = {
            let spare = TcpListener::bind("127.0.0.1:0").await.unwrap();
            spare.local_addr().unwrap().port()
        };
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let wait = Duration::from_millis(500);

        assert!(port_open(localhost, open, wait).await);
        assert!(!port_open(localhost, closed, wait).await);
        assert!(any_port_open(localhost, &[closed, open], wait).await);
        assert!(!any_port_open(localhost, &[closed], wait).await);
    }

    #[tokio::test]
    async fn test_arp_skips_ipv6() {
        assert_eq!(arp_lookup("::1".parse().unwrap()).await, None);
    }
}
