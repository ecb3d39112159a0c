//! Remote command execution used for telemetry and auto-heal.
//!
//! Executors are blocking; async callers go through [`exec_blocking`] and
//! [`exec_many_blocking`], which offload to the blocking pool.

pub mod ssh;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use ssh::SshExecutor;

use crate::crypto::{SecretError, SecretStore};
use crate::database::Service;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("connection failed: {0}")]
    Connect(#[from] std::io::Error),
    #[error("ssh session error: {0}")]
    Session(String),
    #[error("authentication rejected for {0}")]
    Auth(String),
    #[error("remote command failed: {0}")]
    Exec(String),
    #[error("remote execution timed out")]
    Timeout,
    #[error("remote task aborted: {0}")]
    Task(String),
}

/// Where and as whom to run a command. The password is plaintext and lives
/// only as long as one pipeline step.
#[derive(Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl RemoteTarget {
    /// SSH target for a service, `None` when it has no credentials.
    pub fn for_service(
        service: &Service,
        secrets: &dyn SecretStore,
    ) -> Result<Option<Self>, SecretError> {
        let (Some(username), Some(token)) = (&service.ssh_username, &service.ssh_password) else {
            return Ok(None);
        };
        if !service.has_ssh_credentials() {
            return Ok(None);
        }

        Ok(Some(Self {
            host: service.ip.clone(),
            port: service.ssh_port,
            username: username.clone(),
            password: secrets.decrypt(token)?,
        }))
    }
}

impl fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

pub trait RemoteExecutor: Send + Sync {
    fn exec(
        &self,
        target: &RemoteTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError>;

    /// Run several commands against one host. A failure to reach the host
    /// fails the whole call; a failure of one command only affects its own
    /// output.
    fn exec_many(
        &self,
        target: &RemoteTarget,
        commands: &[&str],
        timeout: Duration,
    ) -> Result<Vec<CommandOutput>, RemoteError> {
        commands.iter().map(|command| self.exec(target, command, timeout)).collect()
    }
}

/// Run one command on the blocking pool.
pub async fn exec_blocking(
    executor: Arc<dyn RemoteExecutor>,
    target: RemoteTarget,
    command: String,
    timeout: Duration,
) -> Result<CommandOutput, RemoteError> {
    tokio::task::spawn_blocking(move || executor.exec(&target, &command, timeout))
        .await
        .map_err(|e| RemoteError::Task(e.to_string()))?
}

/// Run a batch of commands over one session on the blocking pool.
pub async fn exec_many_blocking(
    executor: Arc<dyn RemoteExecutor>,
    target: RemoteTarget,
    commands: Vec<String>,
    timeout: Duration,
) -> Result<Vec<CommandOutput>, RemoteError> {
    tokio::task::spawn_blocking(move || {
        let commands: Vec<&str> = commands.iter().map(String::as_str).collect();
        executor.exec_many(&target, &commands, timeout)
    })
    .await
    .map_err(|e| RemoteError::Task(e.to_string()))?
}
