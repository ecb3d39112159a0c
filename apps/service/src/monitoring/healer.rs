use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::MonitorConfig;
use crate::crypto::SecretStore;
use crate::database::Service;
use crate::remote::{RemoteExecutor, RemoteTarget, exec_blocking};

/// What an auto-heal attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealOutcome {
    /// auto_restart off, no command, or in maintenance
    NotEligible,
    CoolingDown,
    NoCredentials,
    /// The command ran; its own exit status does not matter
    Executed { exit_code: i32 },
    Failed(String),
}

impl HealOutcome {
    pub fn executed(&self) -> bool {
        matches!(self, HealOutcome::Executed { .. })
    }
}

/// Rate-limited remote remediation, triggered on DOWN transitions.
pub struct AutoHealer {
    remote: Arc<dyn RemoteExecutor>,
    secrets: Arc<dyn SecretStore>,
    timeout: Duration,
    cooldown_seconds: i64,
}

impl AutoHealer {
    pub fn new(
        remote: Arc<dyn RemoteExecutor>,
        secrets: Arc<dyn SecretStore>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            remote,
            secrets,
            timeout: Duration::from_millis(config.heal_timeout_ms),
            cooldown_seconds: config.heal_cooldown_seconds,
        }
    }

    pub fn is_eligible(service: &Service) -> bool {
        service.auto_restart
            && !service.maintenance
            && service.restart_command.as_deref().is_some_and(|c| !c.trim().is_empty())
    }

    /// A heal exactly `cooldown_seconds` after the last one is allowed.
    pub fn cooling_down(&self, service: &Service, now: DateTime<Utc>) -> bool {
        service
            .last_healed
            .is_some_and(|last| (now - last).num_seconds() < self.cooldown_seconds)
    }

    pub async fn heal(&self, service: &Service, now: DateTime<Utc>) -> HealOutcome {
        if !Self::is_eligible(service) {
            return HealOutcome::NotEligible;
        }
        if self.cooling_down(service, now) {
            tracing::debug!(service_id = service.id, "auto-heal skipped, still cooling down");
            return HealOutcome::CoolingDown;
        }

        let remote_target = match RemoteTarget::for_service(service, self.secrets.as_ref()) {
            Ok(Some(remote_target)) => remote_target,
            Ok(None) => {
                tracing::info!(service_id = service.id, "auto-heal needs SSH credentials, skipping");
                return HealOutcome::NoCredentials;
            }
            Err(e) => {
                tracing::warn!(service_id = service.id, error = %e, "auto-heal cannot decrypt SSH password");
                return HealOutcome::Failed(e.to_string());
            }
        };

        let command = service.restart_command.clone().unwrap_or_default();
        tracing::info!(
            target: "lanwatch::audit",
            service_id = service.id,
            ip = %service.ip,
            user = %remote_target.username,
            command = %command,
            "auto-heal triggered"
        );

        match exec_blocking(self.remote.clone(), remote_target, command, self.timeout).await {
            Ok(output) => {
                tracing::info!(
                    target: "lanwatch::audit",
                    service_id = service.id,
                    exit_code = output.exit_code,
                    stdout = %output.stdout.trim(),
                    stderr = %output.stderr.trim(),
                    "auto-heal command executed"
                );
                HealOutcome::Executed { exit_code: output.exit_code }
            }
            Err(e) => {
                tracing::error!(
                    target: "lanwatch::audit",
                    service_id = service.id,
                    error = %e,
                    "auto-heal failed"
                );
                HealOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherSecretStore;
    use crate::monitoring::types::CheckKind;
    use crate::remote::{CommandOutput, RemoteError};
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingExecutor {
        commands: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RemoteExecutor for RecordingExecutor {
        fn exec(
            &self,
            _target: &RemoteTarget,
            command: &str,
            _timeout: Duration,
        ) -> Result<CommandOutput, RemoteError> {
            if self.fail {
                return Err(RemoteError::Timeout);
            }
            self.commands.lock().unwrap().push(command.to_string());
            Ok(CommandOutput { stdout: "restarted".into(), stderr: String::new(), exit_code: 1 })
        }
    }

    fn healable(secrets: &CipherSecretStore) -> Service {
        let mut service = Service::new("web", "10.0.0.8", CheckKind::Tcp);
        service.id = 3;
        service.auto_restart = true;
        service.restart_command = Some("systemctl restart nginx".into());
        service.ssh_username = Some("admin".into());
        service.ssh_password = Some(secrets.encrypt("pw").unwrap());
        service
    }

    #[tokio::test]
    async fn test_heal_runs_command_even_with_nonzero_exit() {
        let secrets = Arc::new(CipherSecretStore::new("master"));
        let remote = Arc::new(RecordingExecutor::default());
        let healer = AutoHealer::new(remote.clone(), secrets.clone(), &MonitorConfig::default());

        let outcome = healer.heal(&healable(&secrets), Utc::now()).await;
        assert_eq!(outcome, HealOutcome::Executed { exit_code: 1 });
        assert!(outcome.executed());
        assert_eq!(*remote.commands.lock().unwrap(), vec!["systemctl restart nginx".to_string()]);
    }

    #[tokio::test]
    async fn test_cooldown_window() {
        let secrets = Arc::new(CipherSecretStore::new("master"));
        let remote = Arc::new(RecordingExecutor::default());
        let healer = AutoHealer::new(remote.clone(), secrets.clone(), &MonitorConfig::default());

        let now = Utc::now();
        let mut service = healable(&secrets);

        service.last_healed = Some(now - ChronoDuration::seconds(5));
        assert_eq!(healer.heal(&service, now).await, HealOutcome::CoolingDown);

        service.last_healed = Some(now - ChronoDuration::seconds(899));
        assert_eq!(healer.heal(&service, now).await, HealOutcome::CoolingDown);

        service.last_healed = Some(now - ChronoDuration::seconds(900));
        assert!(healer.heal(&service, now).await.executed());
        assert_eq!(remote.commands.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ineligible_services() {
        let secrets = Arc::new(CipherSecretStore::new("master"));
        let healer =
            AutoHealer::new(Arc::new(RecordingExecutor::default()), secrets.clone(), &MonitorConfig::default());
        let now = Utc::now();

        let mut off = healable(&secrets);
        off.auto_restart = false;
        assert_eq!(healer.heal(&off, now).await, HealOutcome::NotEligible);

        let mut blank = healable(&secrets);
        blank.restart_command = Some("  ".into());
        assert_eq!(healer.heal(&blank, now).await, HealOutcome::NotEligible);

        let mut maintenance = healable(&secrets);
        maintenance.maintenance = true;
        assert_eq!(healer.heal(&maintenance, now).await, HealOutcome::NotEligible);

        let mut anonymous = healable(&secrets);
        anonymous.ssh_password = None;
        assert_eq!(healer.heal(&anonymous, now).await, HealOutcome::NoCredentials);
    }

    #[tokio::test]
    async fn test_connection_failure_is_reported() {
        let secrets = Arc::new(CipherSecretStore::new("master"));
        let remote = Arc::new(RecordingExecutor { fail: true, ..Default::default() });
        let healer = AutoHealer::new(remote, secrets.clone(), &MonitorConfig::default());

        let outcome = healer.heal(&healable(&secrets), Utc::now()).await;
        assert!(matches!(outcome, HealOutcome::Failed(_)));
    }
}
