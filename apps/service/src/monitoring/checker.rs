use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::types::ProbeOutcome;
use crate::config::MonitorConfig;
use crate::database::Service;
use crate::discovery::liveness::ping_once;
use crate::snmp::{SnmpClient, SnmpTarget, query_system_blocking};

const BANNER_LIMIT: usize = 1024;

/// Checker trait for the different kinds of service checks.
///
/// Implementations report expected negative results (refused, timed out,
/// non-2xx/3xx) as an unreachable outcome. An `Err` means the check itself
/// could not run and is turned into an unreachable outcome by the caller.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, service: &Service) -> Result<ProbeOutcome>;
}

/// TCP connect with an optional banner read
pub struct TcpChecker {
    connect_timeout: Duration,
    banner_timeout: Duration,
}

impl TcpChecker {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.tcp_timeout_ms),
            banner_timeout: Duration::from_millis(config.banner_timeout_ms),
        }
    }
}

#[async_trait::async_trait]
impl Checker for TcpChecker {
    async fn check(&self, service: &Service) -> Result<ProbeOutcome> {
        let Some(port) = service.port else {
            return Ok(ProbeOutcome::failure("No port configured"));
        };

        let connect = TcpStream::connect((service.ip.as_str(), port));
        let mut stream = match timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(_)) | Err(_) => return Ok(ProbeOutcome::failure("Connection Failed")),
        };

        // Silent services are still up
        let mut buf = vec![0u8; BANNER_LIMIT];
        let banner = match timeout(self.banner_timeout, stream.read(&mut buf)).await {
            Ok(Ok(n)) => String::from_utf8_lossy(&buf[..n]).trim().to_string(),
            _ => String::new(),
        };

        Ok(ProbeOutcome::success(banner))
    }
}

/// HTTP GET, reachable iff the status is in [200, 400)
pub struct HttpChecker {
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self { client })
    }

    /// Absolute targets are used as-is, anything else is a path on the
    /// service address.
    pub fn url_for(service: &Service) -> String {
        let target = service.check_target.as_deref().unwrap_or_default();
        if target.starts_with("http") {
            return target.to_string();
        }

        let host = match service.ip.parse::<std::net::IpAddr>() {
            Ok(std::net::IpAddr::V6(v6)) => format!("[{v6}]"),
            _ => service.ip.clone(),
        };
        let port = service.port.map(|p| format!(":{p}")).unwrap_or_default();
        format!("http://{host}{port}{target}")
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, service: &Service) -> Result<ProbeOutcome> {
        let url = Self::url_for(service);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Ok(ProbeOutcome::failure("Timeout")),
            Err(e) if e.is_connect() => return Ok(ProbeOutcome::failure("Connection Refused")),
            Err(e) => return Ok(ProbeOutcome::failure(e.to_string())),
        };

        let status = response.status();
        let reachable = status.is_success() || status.is_redirection();
        let body = response.text().await.unwrap_or_default();

        Ok(ProbeOutcome::with_reachable(reachable, body))
    }
}

/// One system ping round trip
pub struct IcmpChecker {
    timeout: Duration,
}

impl IcmpChecker {
    pub fn new(config: &MonitorConfig) -> Self {
        Self { timeout: Duration::from_millis(config.tcp_timeout_ms) }
    }
}

#[async_trait::async_trait]
impl Checker for IcmpChecker {
    async fn check(&self, service: &Service) -> Result<ProbeOutcome> {
        if ping_once(&service.ip, self.timeout).await {
            Ok(ProbeOutcome::success(""))
        } else {
            Ok(ProbeOutcome::failure("No ICMP reply"))
        }
    }
}

/// Runs the stored script body from a throwaway file
pub struct ScriptChecker {
    interpreter: Vec<String>,
    timeout: Duration,
}

impl ScriptChecker {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            interpreter: config.script_interpreter.split_whitespace().map(str::to_string).collect(),
            timeout: Duration::from_millis(config.script_timeout_ms),
        }
    }
}

#[async_trait::async_trait]
impl Checker for ScriptChecker {
    async fn check(&self, service: &Service) -> Result<ProbeOutcome> {
        let Some(script) = service.script_content.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(ProbeOutcome::failure(""));
        };
        let (program, args) =
            self.interpreter.split_first().context("no script interpreter configured")?;

        // Removed when dropped, whichever way this function returns
        let mut file = tempfile::Builder::new()
            .prefix("lanwatch-check-")
            .tempfile()
            .context("failed to create script file")?;
        file.write_all(script.as_bytes())?;
        file.flush()?;

        let child = tokio::process::Command::new(program)
            .args(args)
            .arg(file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {program}"))?;

        match timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                let mut content = String::from_utf8_lossy(&output.stdout).into_owned();
                content.push_str(&String::from_utf8_lossy(&output.stderr));
                Ok(ProbeOutcome::with_reachable(output.status.success(), content))
            }
            // The child is killed when the dropped future releases it
            Err(_) => Ok(ProbeOutcome::failure("Timeout")),
        }
    }
}

/// SNMP sysDescr + sysUpTime GET
pub struct SnmpChecker {
    client: Option<Arc<dyn SnmpClient>>,
    timeout: Duration,
}

impl SnmpChecker {
    pub fn new(client: Option<Arc<dyn SnmpClient>>, config: &MonitorConfig) -> Self {
        Self { client, timeout: Duration::from_millis(config.snmp_timeout_ms) }
    }
}

#[async_trait::async_trait]
impl Checker for SnmpChecker {
    async fn check(&self, service: &Service) -> Result<ProbeOutcome> {
        let Some(client) = self.client.clone() else {
            return Ok(ProbeOutcome::failure("SNMP support not compiled in"));
        };

        let target = SnmpTarget {
            host: service.ip.clone(),
            port: service.snmp_port,
            community: service.snmp_community.clone(),
        };

        match query_system_blocking(client, target, self.timeout).await {
            Ok((descr, uptime)) => {
                let descr = descr.trim().to_string();
                Ok(ProbeOutcome::success(format!("SNMP OK. {descr} | Uptime: {uptime}"))
                    .with_sys_descr(descr))
            }
            Err(e) => Ok(ProbeOutcome::failure(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::CheckKind;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn test_config() -> MonitorConfig {
        MonitorConfig {
            tcp_timeout_ms: 500,
            banner_timeout_ms: 200,
            script_timeout_ms: 1000,
            script_interpreter: "sh".into(),
            ..Default::default()
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_tcp_reads_banner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();
        });

        let mut service = Service::new("ssh", "127.0.0.1", CheckKind::Tcp);
        service.port = Some(port);

        let outcome = TcpChecker::new(&test_config()).check(&service).await.unwrap();
        assert!(outcome.reachable);
        assert_eq!(outcome.content, "SSH-2.0-OpenSSH_9.6");
    }

    #[tokio::test]
    async fn test_tcp_silent_port_is_still_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut service = Service::new("db", "127.0.0.1", CheckKind::Tcp);
        service.port = Some(port);

        let outcome = TcpChecker::new(&test_config()).check(&service).await.unwrap();
        assert!(outcome.reachable);
        assert_eq!(outcome.content, "");
        drop(listener);
    }

    #[tokio::test]
    async fn test_tcp_closed_port() {
        let mut service = Service::new("db", "127.0.0.1", CheckKind::Tcp);
        service.port = Some(closed_port().await);

        let outcome = TcpChecker::new(&test_config()).check(&service).await.unwrap();
        assert!(!outcome.reachable);
        assert_eq!(outcome.content, "Connection Failed");
    }

    #[tokio::test]
    async fn test_tcp_without_port() {
        let service = Service::new("db", "127.0.0.1", CheckKind::Tcp);
        let outcome = TcpChecker::new(&test_config()).check(&service).await.unwrap();
        assert!(!outcome.reachable);
        assert_eq!(outcome.content, "No port configured");
    }

    #[test]
    fn test_http_url_building() {
        let mut service = Service::new("web", "10.0.0.4", CheckKind::Http);
        assert_eq!(HttpChecker::url_for(&service), "http://10.0.0.4");

        service.port = Some(8080);
        service.check_target = Some("/health".into());
        assert_eq!(HttpChecker::url_for(&service), "http://10.0.0.4:8080/health");

        service.check_target = Some("https://status.lan/ok".into());
        assert_eq!(HttpChecker::url_for(&service), "https://status.lan/ok");

        let mut v6 = Service::new("web6", "fe80::1", CheckKind::Http);
        v6.port = Some(80);
        assert_eq!(HttpChecker::url_for(&v6), "http://[fe80::1]:80");
    }

    async fn serve_once(status_line: &'static str, body: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        port
    }

    #[tokio::test]
    async fn test_http_status_decides_reachability() {
        let checker = HttpChecker::new(&test_config()).unwrap();

        let mut ok = Service::new("web", "127.0.0.1", CheckKind::Http);
        ok.port = Some(serve_once("200 OK", "all good").await);
        let outcome = checker.check(&ok).await.unwrap();
        assert!(outcome.reachable);
        assert_eq!(outcome.content, "all good");

        let mut redirect = Service::new("web", "127.0.0.1", CheckKind::Http);
        redirect.port = Some(serve_once("302 Found", "").await);
        assert!(checker.check(&redirect).await.unwrap().reachable);

        let mut broken = Service::new("web", "127.0.0.1", CheckKind::Http);
        broken.port = Some(serve_once("503 Service Unavailable", "down").await);
        let outcome = checker.check(&broken).await.unwrap();
        assert!(!outcome.reachable);
        assert_eq!(outcome.content, "down");
    }

    #[tokio::test]
    async fn test_http_refused() {
        let mut service = Service::new("web", "127.0.0.1", CheckKind::Http);
        service.port = Some(closed_port().await);

        let outcome = HttpChecker::new(&test_config()).unwrap().check(&service).await.unwrap();
        assert!(!outcome.reachable);
        assert_eq!(outcome.content, "Connection Refused");
    }

    #[tokio::test]
    async fn test_script_exit_code_and_output() {
        let checker = ScriptChecker::new(&test_config());

        let mut ok = Service::new("job", "127.0.0.1", CheckKind::Script);
        ok.script_content = Some("echo out; echo err 1>&2".into());
        let outcome = checker.check(&ok).await.unwrap();
        assert!(outcome.reachable);
        assert_eq!(outcome.content, "out\nerr\n");

        let mut failing = Service::new("job", "127.0.0.1", CheckKind::Script);
        failing.script_content = Some("echo nope; exit 3".into());
        let outcome = checker.check(&failing).await.unwrap();
        assert!(!outcome.reachable);
        assert_eq!(outcome.content, "nope\n");
    }

    #[tokio::test]
    async fn test_script_timeout() {
        let checker = ScriptChecker {
            interpreter: vec!["sh".into()],
            timeout: Duration::from_millis(200),
        };
        let mut service = Service::new("job", "127.0.0.1", CheckKind::Script);
        service.script_content = Some("sleep 5".into());

        let started = std::time::Instant::now();
        let outcome = checker.check(&service).await.unwrap();
        assert!(!outcome.reachable);
        assert_eq!(outcome.content, "Timeout");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_empty_script() {
        let service = Service::new("job", "127.0.0.1", CheckKind::Script);
        let outcome = ScriptChecker::new(&test_config()).check(&service).await.unwrap();
        assert!(!outcome.reachable);
        assert_eq!(outcome.content, "");
    }

    #[tokio::test]
    async fn test_snmp_without_client() {
        let service = Service::new("switch", "127.0.0.1", CheckKind::Snmp);
        let outcome = SnmpChecker::new(None, &test_config()).check(&service).await.unwrap();
        assert!(!outcome.reachable);
    }

    #[tokio::test]
    async fn test_icmp_unroutable_host() {
        // TEST-NET-1, never answers
        let service = Service::new("ghost", "192.0.2.1", CheckKind::Icmp);
        let started = std::time::Instant::now();
        let outcome = IcmpChecker::new(&test_config()).check(&service).await.unwrap();
        assert!(!outcome.reachable);
        assert_eq!(outcome.content, "No ICMP reply");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(feature = "snmp")]
    #[tokio::test]
    async fn test_snmp_silent_agent() {
        let port = {
            let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
            socket.local_addr().unwrap().port()
        };
        let mut service = Service::new("switch", "127.0.0.1", CheckKind::Snmp);
        service.snmp_port = port;

        let config = MonitorConfig { snmp_timeout_ms: 300, ..test_config() };
        let client: Arc<dyn SnmpClient> = Arc::new(crate::snmp::UdpSnmpClient::new());
        let started = std::time::Instant::now();
        let outcome = SnmpChecker::new(Some(client), &config).check(&service).await.unwrap();
        assert!(!outcome.reachable);
        assert!(outcome.sys_descr.is_none());
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
