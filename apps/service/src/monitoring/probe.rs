use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use futures::FutureExt;

use super::checker::{Checker, HttpChecker, IcmpChecker, ScriptChecker, SnmpChecker, TcpChecker};
use super::types::{CheckKind, ProbeOutcome};
use crate::config::MonitorConfig;
use crate::database::Service;
use crate::snmp::SnmpClient;

/// Dispatches a service to the checker for its kind and times the call.
///
/// `probe` never fails: checker errors and panics become an unreachable
/// outcome carrying the error text.
pub struct ProtocolProbe {
    checkers: HashMap<CheckKind, Arc<dyn Checker>>,
}

impl ProtocolProbe {
    pub fn new(config: &MonitorConfig, snmp: Option<Arc<dyn SnmpClient>>) -> Result<Self> {
        let mut checkers: HashMap<CheckKind, Arc<dyn Checker>> = HashMap::new();
        checkers.insert(CheckKind::Tcp, Arc::new(TcpChecker::new(config)));
        checkers.insert(CheckKind::Http, Arc::new(HttpChecker::new(config)?));
        checkers.insert(CheckKind::Icmp, Arc::new(IcmpChecker::new(config)));
        checkers.insert(CheckKind::Script, Arc::new(ScriptChecker::new(config)));
        checkers.insert(CheckKind::Snmp, Arc::new(SnmpChecker::new(snmp, config)));
        Ok(Self { checkers })
    }

    /// Replace the checker used for one kind.
    pub fn with_checker(mut self, kind: CheckKind, checker: Arc<dyn Checker>) -> Self {
        self.checkers.insert(kind, checker);
        self
    }

    pub async fn probe(&self, service: &Service) -> ProbeOutcome {
        let started = Instant::now();

        let outcome = match self.checkers.get(&service.check_type) {
            Some(checker) => {
                match AssertUnwindSafe(checker.check(service)).catch_unwind().await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => {
                        tracing::warn!(service_id = service.id, ip = %service.ip, error = %e, "check failed");
                        ProbeOutcome::failure(format!("Error: {e}"))
                    }
                    Err(_) => {
                        tracing::error!(service_id = service.id, ip = %service.ip, "checker panicked");
                        ProbeOutcome::failure("Error: checker panicked")
                    }
                }
            }
            None => ProbeOutcome::failure(format!("No checker for {}", service.check_type)),
        };

        outcome.with_elapsed(started.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait::async_trait]
    impl Checker for Failing {
        async fn check(&self, _service: &Service) -> Result<ProbeOutcome> {
            anyhow::bail!("resolver exploded")
        }
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl Checker for Panicking {
        async fn check(&self, _service: &Service) -> Result<ProbeOutcome> {
            panic!("boom")
        }
    }

    #[tokio::test]
    async fn test_errors_become_unreachable() {
        let probe = ProtocolProbe::new(&MonitorConfig::default(), None)
            .unwrap()
            .with_checker(CheckKind::Tcp, Arc::new(Failing))
            .with_checker(CheckKind::Http, Arc::new(Panicking));

        let outcome = probe.probe(&Service::new("a", "10.0.0.1", CheckKind::Tcp)).await;
        assert!(!outcome.reachable);
        assert_eq!(outcome.content, "Error: resolver exploded");

        let outcome = probe.probe(&Service::new("b", "10.0.0.1", CheckKind::Http)).await;
        assert!(!outcome.reachable);
        assert!(outcome.content.starts_with("Error:"));
    }

    #[tokio::test]
    async fn test_every_kind_has_a_checker() {
        let probe = ProtocolProbe::new(&MonitorConfig::default(), None).unwrap();
        for kind in CheckKind::ALL {
            assert!(probe.checkers.contains_key(&kind), "missing checker for {kind}");
        }
    }
}
