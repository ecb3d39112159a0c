//! SNMP v2c GET primitive and trap decoding.
//!
//! The client is blocking; callers on the async side wrap it in
//! `spawn_blocking`. The UDP implementation is only compiled with the `snmp`
//! feature, without it [`default_client`] returns `None` and
//! [`decode_trap`] rejects every datagram.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub const OID_SYS_DESCR: &str = "1.3.6.1.2.1.1.1.0";
pub const OID_SYS_UPTIME: &str = "1.3.6.1.2.1.1.3.0";
pub const OID_SNMP_TRAP_OID: &str = "1.3.6.1.6.3.1.1.4.1.0";

// UCD-SNMP-MIB
pub const OID_CPU_IDLE: &str = "1.3.6.1.4.1.2021.11.11.0";
pub const OID_MEM_TOTAL_REAL: &str = "1.3.6.1.4.1.2021.4.5.0";
pub const OID_MEM_AVAIL_REAL: &str = "1.3.6.1.4.1.2021.4.6.0";
pub const OID_DISK_PERCENT: &str = "1.3.6.1.4.1.2021.9.1.9.1";

#[derive(Debug, Error)]
pub enum SnmpError {
    #[error("invalid OID: {0}")]
    InvalidOid(String),
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snmp request failed: {0}")]
    Protocol(String),
    #[error("no value returned for {0}")]
    NoSuchObject(String),
    #[error("snmp task aborted: {0}")]
    Task(String),
}

#[derive(Debug, Clone)]
pub struct SnmpTarget {
    pub host: String,
    pub port: u16,
    pub community: String,
}

impl SnmpTarget {
    /// IPv4 or IPv6 transport follows from the parsed address; hostnames go
    /// through the system resolver.
    pub fn socket_addr(&self) -> Result<SocketAddr, SnmpError> {
        if let Ok(ip) = self.host.parse::<std::net::IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SnmpError::Resolve(self.host.clone()))
    }
}

/// Owned copy of a varbind value.
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Text(String),
    Integer(i64),
    Unsigned(u64),
    Timeticks(u32),
    Other(String),
}

impl SnmpValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SnmpValue::Integer(v) => Some(*v as f64),
            SnmpValue::Unsigned(v) => Some(*v as f64),
            SnmpValue::Timeticks(v) => Some(f64::from(*v)),
            SnmpValue::Text(s) => s.trim().parse().ok(),
            SnmpValue::Other(_) => None,
        }
    }
}

impl fmt::Display for SnmpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnmpValue::Text(s) | SnmpValue::Other(s) => f.write_str(s),
            SnmpValue::Integer(v) => write!(f, "{v}"),
            SnmpValue::Unsigned(v) => write!(f, "{v}"),
            SnmpValue::Timeticks(v) => write!(f, "{v}"),
        }
    }
}

pub fn parse_oid(oid: &str) -> Result<Vec<u32>, SnmpError> {
    let parts: Result<Vec<u32>, _> =
        oid.trim().trim_start_matches('.').split('.').map(str::parse::<u32>).collect();
    match parts {
        Ok(parts) if parts.len() >= 2 => Ok(parts),
        _ => Err(SnmpError::InvalidOid(oid.to_string())),
    }
}

pub trait SnmpClient: Send + Sync {
    /// One GET per OID, values returned in request order. Zero retries.
    fn get(
        &self,
        target: &SnmpTarget,
        oids: &[&str],
        timeout: Duration,
    ) -> Result<Vec<SnmpValue>, SnmpError>;
}

/// `(sysDescr, sysUpTime)` of an agent.
pub fn query_system(
    client: &dyn SnmpClient,
    target: &SnmpTarget,
    timeout: Duration,
) -> Result<(String, String), SnmpError> {
    let values = client.get(target, &[OID_SYS_DESCR, OID_SYS_UPTIME], timeout)?;
    match values.as_slice() {
        [descr, uptime, ..] => Ok((descr.to_string(), uptime.to_string())),
        _ => Err(SnmpError::NoSuchObject(OID_SYS_DESCR.to_string())),
    }
}

/// Blocking sysDescr/uptime query on the blocking pool.
pub async fn query_system_blocking(
    client: Arc<dyn SnmpClient>,
    target: SnmpTarget,
    timeout: Duration,
) -> Result<(String, String), SnmpError> {
    tokio::task::spawn_blocking(move || query_system(client.as_ref(), &target, timeout))
        .await
        .map_err(|e| SnmpError::Task(e.to_string()))?
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrapVarbind {
    pub oid: String,
    pub value: SnmpValue,
}

/// Varbinds of one v2c notification, in wire order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrapMessage {
    pub varbinds: Vec<TrapVarbind>,
}

impl TrapMessage {
    /// `(notification OID, first payload value)`. Senders that omit
    /// `snmpTrapOID.0` get their first varbind instead.
    pub fn summary(&self) -> (String, String) {
        let Some(trap_oid) = self.varbinds.iter().find(|v| v.oid == OID_SNMP_TRAP_OID) else {
            return self
                .varbinds
                .first()
                .map(|v| (v.oid.clone(), v.value.to_string()))
                .unwrap_or_default();
        };

        let payload = self
            .varbinds
            .iter()
            .find(|v| v.oid != OID_SYS_UPTIME && v.oid != OID_SNMP_TRAP_OID)
            .map(|v| v.value.to_string())
            .unwrap_or_default();
        (trap_oid.value.to_string(), payload)
    }

    pub fn describe(&self) -> String {
        self.varbinds
            .iter()
            .map(|v| format!("{} = {}", v.oid, v.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(feature = "snmp")]
pub use udp::{UdpSnmpClient, decode_trap};

#[cfg(not(feature = "snmp"))]
pub fn decode_trap(_datagram: &[u8]) -> Result<TrapMessage, SnmpError> {
    Err(SnmpError::Protocol("SNMP support not compiled in".into()))
}

#[cfg(feature = "snmp")]
mod udp {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::time::Duration;

    use snmp::{ObjIdBuf, ObjectIdentifier, SnmpMessageType, SnmpPdu, SyncSession, Value};

    use super::{SnmpClient, SnmpError, SnmpTarget, SnmpValue, TrapMessage, TrapVarbind, parse_oid};

    /// v2c client over UDP.
    #[derive(Debug, Default)]
    pub struct UdpSnmpClient {
        request_id: AtomicI32,
    }

    impl UdpSnmpClient {
        pub fn new() -> Self {
            Self { request_id: AtomicI32::new(1) }
        }
    }

    fn dotted(oid: &ObjectIdentifier<'_>) -> Option<String> {
        let mut buf: ObjIdBuf = [0; 128];
        let parts = oid.read_name(&mut buf).ok()?;
        Some(parts.iter().map(u32::to_string).collect::<Vec<_>>().join("."))
    }

    fn owned(value: Value<'_>) -> SnmpValue {
        match value {
            Value::OctetString(bytes) => SnmpValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            Value::ObjectIdentifier(oid) => match dotted(&oid) {
                Some(oid) => SnmpValue::Text(oid),
                None => SnmpValue::Other("invalid OID".into()),
            },
            Value::IpAddress(ip) => SnmpValue::Text(std::net::Ipv4Addr::from(ip).to_string()),
            Value::Integer(v) => SnmpValue::Integer(v),
            Value::Counter32(v) | Value::Unsigned32(v) => SnmpValue::Unsigned(u64::from(v)),
            Value::Counter64(v) => SnmpValue::Unsigned(v),
            Value::Timeticks(v) => SnmpValue::Timeticks(v),
            other => SnmpValue::Other(format!("{other:?}")),
        }
    }

    /// noSuchObject, noSuchInstance and endOfMibView are context tags
    /// 0x80..=0x82. A varbind the decoder cannot read at all comes back as
    /// `None`.
    fn decode(value: Option<Value<'_>>, oid: &str) -> Result<SnmpValue, SnmpError> {
        match value {
            None | Some(Value::Null) | Some(Value::Constructed(0x80..=0x82, _)) => {
                Err(SnmpError::NoSuchObject(oid.to_string()))
            }
            Some(value) => Ok(owned(value)),
        }
    }

    /// Parse a v2c TRAP datagram. Other PDU types and v1 traps are
    /// rejected.
    pub fn decode_trap(datagram: &[u8]) -> Result<TrapMessage, SnmpError> {
        let pdu = SnmpPdu::from_bytes(datagram).map_err(|e| SnmpError::Protocol(format!("{e:?}")))?;
        if pdu.message_type != SnmpMessageType::Trap {
            return Err(SnmpError::Protocol(format!("expected a trap, got {:?}", pdu.message_type)));
        }

        let varbinds = pdu
            .varbinds
            .map(|(name, value)| TrapVarbind {
                oid: dotted(&name).unwrap_or_default(),
                value: owned(value),
            })
            .collect();
        Ok(TrapMessage { varbinds })
    }

    impl SnmpClient for UdpSnmpClient {
        fn get(
            &self,
            target: &SnmpTarget,
            oids: &[&str],
            timeout: Duration,
        ) -> Result<Vec<SnmpValue>, SnmpError> {
            let addr = target.socket_addr()?;
            let request_id = self.request_id.fetch_add(1, Ordering::Relaxed);
            let mut session =
                SyncSession::new(addr, target.community.as_bytes(), Some(timeout), request_id)?;

            let mut values = Vec::with_capacity(oids.len());
            for oid in oids {
                let name = parse_oid(oid)?;
                let mut response =
                    session.get(&name).map_err(|e| SnmpError::Protocol(format!("{e:?}")))?;

                // SNMPv1 agents report a missing OID as noSuchName (2)
                if response.error_status != 0 {
                    return Err(SnmpError::NoSuchObject(oid.to_string()));
                }
                let value = response.varbinds.next().map(|(_, value)| value);
                values.push(decode(value, oid)?);
            }

            Ok(values)
        }
    }

}

/// Hand-built v2c datagrams for tests.
#[cfg(all(test, feature = "snmp"))]
pub(crate) mod test_support {
    const SYS_UPTIME: &[u8] = &[0x2B, 6, 1, 2, 1, 1, 3, 0];
    const SNMP_TRAP_OID: &[u8] = &[0x2B, 6, 1, 6, 3, 1, 1, 4, 1, 0];
    const LINK_DOWN: &[u8] = &[0x2B, 6, 1, 6, 3, 1, 1, 5, 3];
    const IF_INDEX_2: &[u8] = &[0x2B, 6, 1, 2, 1, 2, 2, 1, 1, 2];

    /// Short-form TLV, every body here is under 128 bytes.
    fn tlv(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![tag, body.len() as u8];
        out.extend_from_slice(body);
        out
    }

    fn varbind(oid: &[u8], value: Vec<u8>) -> Vec<u8> {
        let mut body = tlv(0x06, oid);
        body.extend(value);
        tlv(0x30, &body)
    }

    fn message(community: &str, pdu_tag: u8, varbinds: &[Vec<u8>]) -> Vec<u8> {
        let mut pdu = tlv(0x02, &[1]);
        pdu.extend(tlv(0x02, &[0]));
        pdu.extend(tlv(0x02, &[0]));
        pdu.extend(tlv(0x30, &varbinds.concat()));

        let mut body = tlv(0x02, &[1]);
        body.extend(tlv(0x04, community.as_bytes()));
        body.extend(tlv(pdu_tag, &pdu));
        tlv(0x30, &body)
    }

    /// linkDown for ifIndex 2, uptime 12345 ticks.
    pub(crate) fn link_down_trap(community: &str) -> Vec<u8> {
        message(
            community,
            0xA7,
            &[
                varbind(SYS_UPTIME, tlv(0x43, &[0x30, 0x39])),
                varbind(SNMP_TRAP_OID, tlv(0x06, LINK_DOWN)),
                varbind(IF_INDEX_2, tlv(0x02, &[2])),
            ],
        )
    }

    pub(crate) fn get_request(community: &str) -> Vec<u8> {
        message(community, 0xA0, &[varbind(SYS_UPTIME, vec![0x05, 0])])
    }
}

/// The compiled-in SNMP client, if any.
pub fn default_client() -> Option<Arc<dyn SnmpClient>> {
    #[cfg(feature = "snmp")]
    {
        Some(Arc::new(UdpSnmpClient::new()))
    }
    #[cfg(not(feature = "snmp"))]
    {
        None
    }
}
