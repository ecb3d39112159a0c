/// SNMP trap receiver
///
/// Listens for v2c notifications on a UDP socket and appends each one to the
/// trap log, linked to the monitored service at the sender's address.
/// Undecodable datagrams are logged and dropped.
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::database::{Database, SnmpTrap};
use crate::snmp::decode_trap;

const MAX_DATAGRAM: usize = 65_535;

pub struct TrapReceiver {
    socket: UdpSocket,
    db: Arc<dyn Database>,
}

impl TrapReceiver {
    pub async fn bind(addr: &str, db: Arc<dyn Database>) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind trap receiver on {addr}"))?;
        Ok(Self { socket, db })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Decode and store one datagram. `Ok(None)` when it was not a trap.
    pub async fn handle(&self, datagram: &[u8], source: SocketAddr) -> Result<Option<i64>> {
        let message = match decode_trap(datagram) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(%source, error = %e, "dropping undecodable trap datagram");
                return Ok(None);
            }
        };

        let (oid, value) = message.summary();
        let trap = SnmpTrap {
            id: None,
            service_id: None,
            source_ip: source.ip().to_string(),
            oid,
            value,
            varbinds: message.describe(),
            timestamp: Utc::now(),
        };

        let id = self.db.record_trap(&trap).await.context("failed to store trap")?;
        tracing::info!(id, source = %trap.source_ip, oid = %trap.oid, "trap received");
        Ok(Some(id))
    }

    /// Receive until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        if let Ok(addr) = self.local_addr() {
            tracing::info!(%addr, "Trap receiver listening");
        }

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, source)) => {
                        if let Err(e) = self.handle(&buf[..len], source).await {
                            tracing::error!(%source, error = %format!("{e:#}"), "trap dropped");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "trap socket receive failed"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Trap receiver stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::create_test_database;

    #[tokio::test]
    async fn test_garbage_is_dropped() {
        let (db, _dir) = create_test_database().await.unwrap();
        let receiver = TrapReceiver::bind("127.0.0.1:0", db.clone()).await.unwrap();

        let source: SocketAddr = "10.0.0.7:40000".parse().unwrap();
        assert_eq!(receiver.handle(b"\x30\x03\x02\x01", source).await.unwrap(), None);
        assert!(db.recent_traps(10).await.unwrap().is_empty());
    }

    #[cfg(feature = "snmp")]
    #[tokio::test]
    async fn test_receives_and_links_trap() {
        use crate::database::Service;
        use crate::monitoring::CheckKind;
        use crate::snmp::test_support::{get_request, link_down_trap};
        use std::time::Duration;

        let (db, _dir) = create_test_database().await.unwrap();
        let service_id =
            db.insert_service(&Service::new("switch", "127.0.0.1", CheckKind::Snmp)).await.unwrap();

        let receiver = TrapReceiver::bind("127.0.0.1:0", db.clone()).await.unwrap();
        let addr = receiver.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(receiver.run(shutdown_rx));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&get_request("public"), addr).await.unwrap();
        sender.send_to(&link_down_trap("public"), addr).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let traps = loop {
            let traps = db.recent_traps(10).await.unwrap();
            if !traps.is_empty() {
                break traps;
            }
            assert!(tokio::time::Instant::now() < deadline, "trap never stored");
            tokio::time::sleep(Duration::from_millis(20)).await;
        };

        assert_eq!(traps.len(), 1);
        assert_eq!(traps[0].service_id, Some(service_id));
        assert_eq!(traps[0].source_ip, "127.0.0.1");
        assert_eq!(traps[0].oid, "1.3.6.1.6.3.1.1.5.3");
        assert_eq!(traps[0].value, "2");
        assert!(traps[0].varbinds.starts_with("1.3.6.1.2.1.1.3.0 = 12345"));

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }
}
