//! Workflow interpreter: a two-phase `Init`/`Exec` split matching
//! `original_source/workflows.go`'s `Workflow.Exec`, generalized to the
//! full `SET`/`FOR`/`SLEEP`/`QUIET`/`%var%` mini language.
//!
//! `Init` expands every `%var%` reference once, up front, against the
//! two-layer (workflow-local `SET` / process-global [`ResourceMap`])
//! lookup and resolves the `S3(...)`/`RAND(n)` generators. `Exec` then
//! walks the pre-resolved command list per host; it never touches the
//! variable tables again, so a single `Workflow` can be safely shared
//! (behind an `Arc`) across every concurrently-scheduled host.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Workflow as WorkflowConfig;
use crate::error::WorkflowError;
use crate::executor::{Command, CommandReturn, RemoteExecutor, SshClientConfig};
use crate::host::Host;
use crate::needs_restarting::{fold_nulls, needs_restarting_services};
use crate::resources::ResourceMap;
use crate::services::{run_service_op, ServiceOp};
use crate::vars;

/// One parsed instruction from a workflow's `Commands` list.
#[derive(Debug, Clone)]
enum Instruction {
    /// A comment or blank line; produces no command return.
    Noop,
    /// A plain command to run over SSH.
    Run { cmd: String, quiet: bool },
    /// `FOR needs-restarting [ACTION]` — probe then apply `ACTION` (default
    /// restart) to whatever the probe names.
    ForNeedsRestarting(ServiceOp),
    /// `FOR <list> <ACTION>` — apply `ACTION` to a literal, comma/whitespace
    /// separated list of service names.
    ForList { services: Vec<String>, op: ServiceOp },
    /// `SLEEP <duration>`.
    Sleep(Duration),
    /// `%%other_workflow` — explicitly unsupported at exec time; kept as
    /// a variant so `Init` can surface a clear error rather than silently
    /// running the literal text as a shell command.
    ChainRecursion(String),
}

/// Split a comma- and/or whitespace-separated service list into its literal
/// names. Idempotent on lists that already contain no commas, since
/// whitespace splitting alone reproduces the same tokens.
fn make_list(s: &str) -> Vec<String> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|tok| !tok.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse the body of a `FOR` instruction (everything after `FOR `).
fn parse_for(rest: &str) -> Result<Instruction, WorkflowError> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(WorkflowError::MalformedFor(format!("FOR {rest}")));
    }

    if tokens.len() == 1 {
        return if tokens[0].eq_ignore_ascii_case("needs-restarting") {
            Ok(Instruction::ForNeedsRestarting(ServiceOp::Restart))
        } else {
            Err(WorkflowError::MalformedFor(format!("FOR {rest}")))
        };
    }

    let (list_tokens, action) = tokens.split_at(tokens.len() - 1);
    let Some(op) = ServiceOp::parse(action[0]) else {
        // unknown ACTION: silently produces no work rather than erroring
        return Ok(Instruction::Noop);
    };

    if list_tokens.len() == 1 && list_tokens[0].eq_ignore_ascii_case("needs-restarting") {
        return Ok(Instruction::ForNeedsRestarting(op));
    }

    let services = make_list(&list_tokens.join(" "));
    if services.is_empty() {
        return Err(WorkflowError::MalformedFor(format!("FOR {rest}")));
    }
    Ok(Instruction::ForList { services, op })
}

/// The fully pre-processed form of a [`WorkflowConfig`], ready to execute
/// against any number of hosts without re-touching variable state.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: String,
    pub sudo: bool,
    pub min_timeout: Duration,
    pub must_chain: bool,
    instructions: Vec<(Instruction, bool)>, // (instruction, breaks_on_failure)
    /// Process-wide `dontrestart-processes` Misc key, resolved once at
    /// `Init` and merged into `needs_restarting`'s built-in exclusion list.
    dont_restart: Vec<String>,
    /// Process-wide `usednf` Misc key: dnf-based hosts expose the same
    /// `needs-restarting -s` probe through a `dnf` subcommand instead of a
    /// standalone binary.
    use_dnf: bool,
}

/// The outcome of running one [`Workflow`] against one host.
#[derive(Debug, Clone)]
pub struct WorkflowReturn {
    pub host: Host,
    pub workflow: String,
    pub command_returns: Vec<CommandReturn>,
    /// Set when the workflow stopped early because a breaking command failed.
    pub aborted: bool,
}

impl Workflow {
    /// Phase one: validate `vars_required`, expand every `%var%` in every
    /// command against `local` ∪ `global`, apply `S3()`/`RAND()`, and parse
    /// each resulting string into an [`Instruction`].
    pub fn init(
        config: &WorkflowConfig,
        local: &HashMap<String, String>,
        global: &ResourceMap,
    ) -> Result<Self, WorkflowError> {
        for required in &config.vars_required {
            if local.get(required).is_none() && global.get(required).is_none() {
                return Err(WorkflowError::MalformedSet(format!(
                    "workflow '{}' requires variable '{}' which is not set",
                    config.name, required
                )));
            }
        }

        let mut instructions = Vec::with_capacity(config.commands.len());
        for (i, raw) in config.commands.iter().enumerate() {
            let breaks = config.breaks_on_failure(i);
            let instruction = parse_instruction(raw, local, global)?;
            instructions.push((instruction, breaks));
        }

        let dont_restart = global.get("dontrestart-processes").map(make_list).unwrap_or_default();
        let use_dnf = global.get_bool("usednf");

        Ok(Self {
            name: config.name.clone(),
            sudo: config.sudo,
            min_timeout: Duration::from_secs(config.min_timeout.max(1)),
            must_chain: config.must_chain,
            instructions,
            dont_restart,
            use_dnf,
        })
    }

    /// Phase two: walk the pre-resolved instructions against one host,
    /// stopping at the first breaking failure.
    pub fn exec(
        &self,
        executor: &Arc<dyn RemoteExecutor>,
        host: &Host,
        ssh_config: &SshClientConfig,
    ) -> WorkflowReturn {
        let mut command_returns = Vec::with_capacity(self.instructions.len());
        let mut aborted = false;

        for (instruction, breaks) in &self.instructions {
            let results = self.run_instruction(instruction, executor, host, ssh_config);
            let failed = results.iter().any(|r| r.error.is_some());
            command_returns.extend(results);

            if failed && *breaks {
                aborted = true;
                break;
            }
        }

        WorkflowReturn {
            host: host.clone(),
            workflow: self.name.clone(),
            command_returns,
            aborted,
        }
    }

    fn run_instruction(
        &self,
        instruction: &Instruction,
        executor: &Arc<dyn RemoteExecutor>,
        host: &Host,
        ssh_config: &SshClientConfig,
    ) -> Vec<CommandReturn> {
        match instruction {
            Instruction::Noop => Vec::new(),
            Instruction::Run { cmd, quiet } => vec![executor.run(
                host,
                ssh_config,
                Command {
                    cmd: cmd.clone(),
                    sudo: self.sudo,
                    quiet: *quiet,
                },
            )],
            Instruction::Sleep(d) => {
                std::thread::sleep(*d);
                Vec::new()
            }
            Instruction::ForNeedsRestarting(op) => {
                let probe_cmd = if self.use_dnf {
                    "dnf needs-restarting -s".to_string()
                } else {
                    "needs-restarting -s".to_string()
                };
                let mut probe = executor.run(
                    host,
                    ssh_config,
                    Command {
                        cmd: probe_cmd,
                        sudo: self.sudo,
                        quiet: true,
                    },
                );
                let folded = fold_nulls(&probe.stdout_string());
                let services = needs_restarting_services(&folded, &self.dont_restart);
                if !services.is_empty() {
                    probe.needs_restarting_services = Some(services.clone());
                }
                let mut results = vec![probe];
                if !services.is_empty() {
                    results.extend(run_service_op(executor, host, ssh_config, self.sudo, &services, *op));
                }
                results
            }
            Instruction::ForList { services, op } => {
                run_service_op(executor, host, ssh_config, self.sudo, services, *op)
            }
            Instruction::ChainRecursion(name) => vec![CommandReturn {
                host: host.clone(),
                hostname: host.connect_target().to_string(),
                command: format!("%%{name}"),
                date: chrono::Utc::now(),
                stdout: Vec::new(),
                stderr: Vec::new(),
                error: Some(
                    WorkflowError::BadFilter(format!(
                        "'%%{name}' chain recursion is not supported at exec time; \
                         comma-chain workflows on the command line instead"
                    ))
                    .to_string(),
                ),
                quiet: false,
                needs_restarting_services: None,
            }],
        }
    }
}

fn parse_instruction(
    raw: &str,
    local: &HashMap<String, String>,
    global: &ResourceMap,
) -> Result<Instruction, WorkflowError> {
    let trimmed = raw.trim();

    if trimmed.starts_with('#') || trimmed.is_empty() {
        return Ok(Instruction::Noop);
    }

    if let Some(rest) = trimmed.strip_prefix("%%") {
        return Ok(Instruction::ChainRecursion(rest.trim().to_string()));
    }

    if let Some(rest) = trimmed.strip_prefix("SLEEP ") {
        let expanded = vars::expand(rest.trim(), local, global);
        let duration = humantime::parse_duration(&expanded)
            .map_err(|_| WorkflowError::MalformedFor(format!("SLEEP {rest}")))?;
        return Ok(Instruction::Sleep(duration));
    }

    if let Some(rest) = trimmed.strip_prefix("FOR ") {
        return parse_for(rest.trim());
    }
    if trimmed.eq_ignore_ascii_case("FOR") {
        return Err(WorkflowError::MalformedFor(trimmed.to_string()));
    }

    let (quiet, body) = match trimmed.strip_prefix("QUIET ") {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let expanded = vars::expand(body, local, global);
    let resolved = vars::apply_generators(&expanded, global)?;

    Ok(Instruction::Run { cmd: resolved, quiet })
}

/// Parse a `SET NAME value` instruction out of the pre-pass, expanding any
/// `%var%` references already defined in `local` before storing the result.
/// `SET` lines are consumed during `Init` and never appear in the final
/// instruction list.
pub fn apply_set_instructions(
    commands: &[String],
    global: &ResourceMap,
) -> Result<HashMap<String, String>, WorkflowError> {
    let mut local = HashMap::new();
    for raw in commands {
        let trimmed = raw.trim();
        let Some(rest) = trimmed.strip_prefix("SET ") else {
            continue;
        };
        let mut parts = rest.splitn(2, ' ');
        let name = parts.next().unwrap_or_default().trim();
        let value = parts.next().unwrap_or_default().trim();
        if name.is_empty() || value.is_empty() {
            return Err(WorkflowError::MalformedSet(raw.clone()));
        }
        let expanded = vars::expand(value, &local, global);
        let resolved = vars::apply_generators(&expanded, global)?;
        local.insert(name.to_string(), resolved);
    }
    Ok(local)
}
