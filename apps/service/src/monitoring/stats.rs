use std::sync::Arc;
use std::time::Duration;

use super::types::{CheckKind, ResourceStats};
use crate::config::MonitorConfig;
use crate::crypto::SecretStore;
use crate::database::Service;
use crate::remote::{RemoteExecutor, RemoteTarget, exec_many_blocking};
use crate::snmp::{
    OID_CPU_IDLE, OID_DISK_PERCENT, OID_MEM_AVAIL_REAL, OID_MEM_TOTAL_REAL, SnmpClient,
    SnmpTarget, SnmpValue,
};

pub const CPU_COMMAND: &str = "top -bn1 | grep 'Cpu(s)'";
pub const MEMORY_COMMAND: &str = "free -m | grep Mem";
pub const DISK_COMMAND: &str = "df -h / | tail -1";

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Leading numeric part of a token, so `98.3%id` and `98.3` both parse.
fn leading_number(token: &str) -> Option<f64> {
    let end = token.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(token.len());
    token[..end].parse().ok()
}

/// CPU busy percent from the `Cpu(s)` line of `top`.
pub fn parse_cpu(line: &str) -> Option<f64> {
    let idle_part = line.split(',').find(|part| part.contains("id"))?;
    let token = idle_part.split(':').next_back()?.split_whitespace().next()?;
    let idle = leading_number(token)?;
    Some(round1(100.0 - idle))
}

/// Used/total percent from the `Mem:` line of `free -m`.
pub fn parse_memory(line: &str) -> Option<f64> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let total: f64 = parts.get(1)?.parse().ok()?;
    let used: f64 = parts.get(2)?.parse().ok()?;
    if total <= 0.0 {
        return None;
    }
    Some(round1(used / total * 100.0))
}

/// Use% column of the last `df -h /` line.
pub fn parse_disk(line: &str) -> Option<f64> {
    line.split_whitespace().nth(4)?.trim_end_matches('%').parse().ok()
}

/// Best-effort CPU/RAM/disk sampling. SSH first, SNMP only for snmp checks
/// when SSH produced nothing.
pub struct ResourceStatsCollector {
    remote: Arc<dyn RemoteExecutor>,
    snmp: Option<Arc<dyn SnmpClient>>,
    secrets: Arc<dyn SecretStore>,
    ssh_timeout: Duration,
    snmp_timeout: Duration,
}

impl ResourceStatsCollector {
    pub fn new(
        remote: Arc<dyn RemoteExecutor>,
        snmp: Option<Arc<dyn SnmpClient>>,
        secrets: Arc<dyn SecretStore>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            remote,
            snmp,
            secrets,
            ssh_timeout: Duration::from_millis(config.ssh_timeout_ms),
            snmp_timeout: Duration::from_millis(config.snmp_timeout_ms),
        }
    }

    pub async fn collect(&self, service: &Service) -> ResourceStats {
        let stats = self.collect_ssh(service).await;
        if !stats.is_empty() || service.check_type != CheckKind::Snmp {
            return stats;
        }
        self.collect_snmp(service).await
    }

    async fn collect_ssh(&self, service: &Service) -> ResourceStats {
        let target = match RemoteTarget::for_service(service, self.secrets.as_ref()) {
            Ok(Some(target)) => target,
            Ok(None) => return ResourceStats::default(),
            Err(e) => {
                tracing::warn!(service_id = service.id, error = %e, "cannot decrypt SSH password, skipping stats");
                return ResourceStats::default();
            }
        };

        let commands = vec![CPU_COMMAND.to_string(), MEMORY_COMMAND.to_string(), DISK_COMMAND.to_string()];
        let outputs = match exec_many_blocking(self.remote.clone(), target, commands, self.ssh_timeout).await {
            Ok(outputs) => outputs,
            Err(e) => {
                tracing::warn!(service_id = service.id, ip = %service.ip, error = %e, "SSH stats failed");
                return ResourceStats::default();
            }
        };

        let line = |idx: usize| outputs.get(idx).map(|o| o.stdout.trim().to_string()).unwrap_or_default();
        ResourceStats {
            cpu: parse_cpu(&line(0)),
            ram: parse_memory(&line(1)),
            disk: parse_disk(&line(2)),
        }
    }

    async fn collect_snmp(&self, service: &Service) -> ResourceStats {
        let Some(client) = self.snmp.clone() else {
            return ResourceStats::default();
        };
        let target = SnmpTarget {
            host: service.ip.clone(),
            port: service.snmp_port,
            community: service.snmp_community.clone(),
        };
        let timeout = self.snmp_timeout;

        let sampled = tokio::task::spawn_blocking(move || {
            let query = |oids: &[&str]| -> Option<Vec<f64>> {
                let values = client.get(&target, oids, timeout).ok()?;
                values.iter().map(SnmpValue::as_f64).collect()
            };

            let cpu = query(&[OID_CPU_IDLE]).and_then(|v| v.first().map(|idle| round1(100.0 - idle)));
            let ram = query(&[OID_MEM_TOTAL_REAL, OID_MEM_AVAIL_REAL]).and_then(|v| match v[..] {
                [total, avail] if total > 0.0 => Some(round1((total - avail) / total * 100.0)),
                _ => None,
            });
            let disk = query(&[OID_DISK_PERCENT]).and_then(|v| v.first().copied());

            ResourceStats { cpu, ram, disk }
        })
        .await;

        sampled.unwrap_or_else(|e| {
            tracing::warn!(service_id = service.id, error = %e, "SNMP stats task failed");
            ResourceStats::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu() {
        let line = "%Cpu(s):  2.3 us,  0.8 sy,  0.0 ni, 96.4 id,  0.3 wa,  0.0 hi,  0.2 si,  0.0 st";
        assert_eq!(parse_cpu(line), Some(3.6));

        let legacy = "Cpu(s):  5.0%us,  1.0%sy,  0.0%ni, 94.0%id,  0.0%wa";
        assert_eq!(parse_cpu(legacy), Some(6.0));

        let idle_first = "%Cpu(s): 100.0 id,  0.0 us";
        assert_eq!(parse_cpu(idle_first), Some(0.0));

        assert_eq!(parse_cpu(""), None);
        assert_eq!(parse_cpu("garbage"), None);
    }

    #[test]
    fn test_parse_memory() {
        let line = "Mem:           7821        2345        1024         120        4451        5120";
        assert_eq!(parse_memory(line), Some(30.0));
        assert_eq!(parse_memory("Mem: 0 0"), None);
        assert_eq!(parse_memory("Mem:"), None);
    }

    #[test]
    fn test_parse_disk() {
        let line = "/dev/sda1        59G   21G   36G  37% /";
        assert_eq!(parse_disk(line), Some(37.0));
        assert_eq!(parse_disk("/dev/sda1 59G"), None);
    }
}
