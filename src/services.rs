//! Service-list helper: applies restart/start/stop/status to a list of
//! service names, with the `sshd`-first/last survival-channel policy.
//!
//! This has no direct counterpart in `original_source` (the Go repo never
//! grew this far); it follows how the rest of the crate does fan-out
//! (`scheduler.rs`'s bounded thread spawn, flume channels).

use std::sync::Arc;

use crate::executor::{Command, CommandReturn, RemoteExecutor, SshClientConfig};
use crate::host::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOp {
    Restart,
    Start,
    Stop,
    Status,
}

impl ServiceOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "restart" => Some(Self::Restart),
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "status" => Some(Self::Status),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Status => "status",
        }
    }
}

fn service_command(name: &str, op: ServiceOp) -> String {
    format!("service {} {}; sleep 2", name, op.as_str())
}

/// Run `op` against every name in `services`, honoring the sshd-first
/// (restart) / sshd-last (stop) policy. Blocks until all results are in;
/// returns them in the order they were produced (sshd's result first/last
/// on restart/stop respectively, otherwise arrival order).
pub fn run_service_op(
    executor: &Arc<dyn RemoteExecutor>,
    host: &Host,
    ssh_config: &SshClientConfig,
    sudo: bool,
    services: &[String],
    op: ServiceOp,
) -> Vec<CommandReturn> {
    let has_sshd = services.iter().any(|s| s == "sshd");
    let others: Vec<&String> = services.iter().filter(|s| s.as_str() != "sshd").collect();

    let run_one = |name: &str| -> CommandReturn {
        executor.run(
            host,
            ssh_config,
            Command {
                cmd: service_command(name, op),
                sudo,
                quiet: false,
            },
        )
    };

    match op {
        ServiceOp::Restart => {
            let mut results = Vec::with_capacity(services.len());
            if has_sshd {
                results.push(run_one("sshd"));
            }
            results.extend(run_parallel(executor.clone(), host.clone(), ssh_config.clone(), sudo, &others, op));
            results
        }
        ServiceOp::Stop => {
            let mut results = run_parallel(executor.clone(), host.clone(), ssh_config.clone(), sudo, &others, op);
            if has_sshd {
                results.push(run_one("sshd"));
            }
            results
        }
        ServiceOp::Start | ServiceOp::Status => {
            run_parallel(executor.clone(), host.clone(), ssh_config.clone(), sudo, &services.iter().collect::<Vec<_>>(), op)
        }
    }
}

fn run_parallel(
    executor: Arc<dyn RemoteExecutor>,
    host: Host,
    ssh_config: SshClientConfig,
    sudo: bool,
    names: &[&String],
    op: ServiceOp,
) -> Vec<CommandReturn> {
    if names.is_empty() {
        return Vec::new();
    }
    std::thread::scope(|scope| {
        let handles: Vec<_> = names
            .iter()
            .map(|name| {
                let executor = executor.clone();
                let host = host.clone();
                let ssh_config = ssh_config.clone();
                let name = (*name).clone();
                scope.spawn(move || {
                    executor.run(
                        &host,
                        &ssh_config,
                        Command {
                            cmd: service_command(&name, op),
                            sudo,
                            quiet: false,
                        },
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("service thread panicked")).collect()
    })
}
