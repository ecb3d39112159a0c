use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use ssh2::{Channel, Session};

use super::{CommandOutput, RemoteError, RemoteExecutor, RemoteTarget};

/// Password-authenticated SSH via libssh2.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshExecutor;

impl SshExecutor {
    pub fn new() -> Self {
        Self
    }

    fn connect(&self, target: &RemoteTarget, timeout: Duration) -> Result<Session, RemoteError> {
        let addr = (target.host.as_str(), target.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| RemoteError::Resolve(target.host.clone()))?;

        let tcp = TcpStream::connect_timeout(&addr, timeout)?;
        let mut session = Session::new().map_err(session_error)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
        session.handshake().map_err(session_error)?;

        session
            .userauth_password(&target.username, &target.password)
            .map_err(|_| RemoteError::Auth(format!("{}@{}", target.username, target.host)))?;
        if !session.authenticated() {
            return Err(RemoteError::Auth(format!("{}@{}", target.username, target.host)));
        }

        Ok(session)
    }

    fn run(session: &Session, command: &str) -> Result<CommandOutput, RemoteError> {
        let mut channel: Channel = session.channel_session().map_err(session_error)?;
        channel.exec(command).map_err(|e| RemoteError::Exec(e.to_string()))?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout).map_err(read_error)?;
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr).map_err(read_error)?;

        channel.wait_close().map_err(session_error)?;
        let exit_code = channel.exit_status().map_err(session_error)?;

        Ok(CommandOutput { stdout, stderr, exit_code })
    }
}

fn session_error(e: ssh2::Error) -> RemoteError {
    match e.code() {
        ssh2::ErrorCode::Session(-9) => RemoteError::Timeout,
        _ => RemoteError::Session(e.to_string()),
    }
}

fn read_error(e: std::io::Error) -> RemoteError {
    if matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) {
        RemoteError::Timeout
    } else {
        RemoteError::Exec(e.to_string())
    }
}

impl RemoteExecutor for SshExecutor {
    fn exec(
        &self,
        target: &RemoteTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, RemoteError> {
        let session = self.connect(target, timeout)?;
        let output = Self::run(&session, command);
        let _ = session.disconnect(None, "done", None);
        output
    }

    fn exec_many(
        &self,
        target: &RemoteTarget,
        commands: &[&str],
        timeout: Duration,
    ) -> Result<Vec<CommandOutput>, RemoteError> {
        let session = self.connect(target, timeout)?;

        let outputs = commands
            .iter()
            .map(|command| {
                Self::run(&session, command).unwrap_or_else(|e| CommandOutput {
                    stdout: String::new(),
                    stderr: e.to_string(),
                    exit_code: -1,
                })
            })
            .collect();

        let _ = session.disconnect(None, "done", None);
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn target(port: u16) -> RemoteTarget {
        RemoteTarget {
            host: "127.0.0.1".into(),
            port,
            username: "nobody".into(),
            password: "nothing".into(),
        }
    }

    #[test]
    fn test_closed_port_is_connect_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = SshExecutor::new().exec(&target(port), "true", Duration::from_millis(500));
        assert!(matches!(result, Err(RemoteError::Connect(_))));
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", target(22));
        assert!(!rendered.contains("nothing"));
        assert!(rendered.contains("<redacted>"));
    }
}
