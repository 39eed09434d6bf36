//! `muster`: CLI entry point. Parses arguments, loads the inventory, builds
//! the process-wide resource map, runs either a literal command or a named
//! workflow chain across the filtered host list, and renders the results.
//!
//! The mutually-exclusive `--cmd`/`--workflow` validation follows the same
//! shape as validating a pair of mutually-exclusive deployment-target flags
//! (`--remote`/`--local`): exactly one of the pair must be set.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use muster::config::{self, Config};
use muster::error::{ConfigError, MusterError};
use muster::executor::{RemoteExecutor, Ssh2Executor, SshAuth, SshClientConfig};
use muster::format::{render, OutputFormat, ResultRow};
use muster::logging::{self, LogSink, LoggingConfig};
use muster::resources::ResourceMap;
use muster::scheduler::{self, SchedulerConfig};
use muster::workflow::Workflow;

#[derive(Parser, Debug)]
#[command(name = "muster", about = "Agentless, bounded-parallel SSH fleet orchestrator")]
struct Cli {
    #[arg(long, default_value = "configs/")]
    configs: PathBuf,

    #[arg(long)]
    cmd: Option<String>,

    /// Comma-separated; each name runs in sequence as one synthesized chain.
    #[arg(long)]
    workflow: Option<String>,

    #[arg(long, default_value_t = whoami::username())]
    user: String,

    #[arg(long)]
    sshagent: bool,

    #[arg(long)]
    sshkey: Option<PathBuf>,

    #[arg(long)]
    sudo: bool,

    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// 0 = auto (CPU count / open-file budget), -1 = CPU count exactly.
    #[arg(long, default_value_t = 0)]
    max: i64,

    #[arg(long, default_value = "")]
    filter: String,

    #[arg(long, default_value_t = 0)]
    wave: u32,

    #[arg(long)]
    configtest: bool,

    #[arg(long)]
    configdump: bool,

    #[arg(long)]
    listhosts: bool,

    #[arg(long)]
    listworkflows: bool,

    #[arg(long, default_value = "text")]
    format: String,

    #[arg(long, default_value = "")]
    logfile: String,

    #[arg(long, default_value = "")]
    errorlogfile: String,

    #[arg(long, default_value = "")]
    debuglogfile: String,

    #[arg(long)]
    bar: bool,

    #[arg(long)]
    dryrun: bool,

    #[arg(long)]
    sleep: Option<String>,

    #[arg(long, default_value = "")]
    vars: String,

    #[arg(long)]
    awshosts: bool,

    #[arg(long, default_value = "")]
    awsregions: String,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        tracing::error!("{err}");
        eprintln!("muster: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), MusterError> {
    let mut conf = config::load_configs(&cli.configs)?;
    let mut resources = ResourceMap::from_miscs(std::mem::take(&mut conf.miscs));
    if !cli.vars.is_empty() {
        resources.insert_csv_vars(&cli.vars);
    }
    if cli.dryrun {
        resources.insert("dryrun", "true");
    }

    let effective_logfile = misc_override(&resources, "outputlog", &cli.logfile);
    let effective_errorlogfile = misc_override(&resources, "erroroutputlog", &cli.errorlogfile);
    let effective_debuglogfile = misc_override(&resources, "debugoutputlog", &cli.debuglogfile);
    let any_file_sink =
        !effective_logfile.is_empty() || !effective_errorlogfile.is_empty() || !effective_debuglogfile.is_empty();

    let _guards = logging::init(LoggingConfig {
        logfile: LogSink::parse(&effective_logfile),
        errorlogfile: LogSink::parse(&effective_errorlogfile),
        debuglogfile: LogSink::parse(&effective_debuglogfile),
    });

    if cli.awshosts || resources.get_bool("useawshosts") {
        let overrides = muster::aws::AwsOverrides {
            region: non_empty(&cli.awsregions)
                .or_else(|| resources.get("awsregions").map(str::to_string))
                .or_else(|| resources.get("aws_regions").map(str::to_string)),
            access_key: resources.get("awsaccess_key").map(str::to_string),
            secret_key: resources.get("awsaccess_secretkey").map(str::to_string),
        };
        let discovered = muster::aws::discover_hosts(overrides)?;
        conf.hosts.extend(discovered);
    }

    if cli.configtest {
        println!("configuration OK: {} host(s), {} workflow(s)", conf.hosts.len(), conf.workflows.len());
        return Ok(());
    }
    if cli.configdump {
        println!("{}", config::dump_config(&conf));
        return Ok(());
    }
    if cli.listhosts {
        for host in &conf.hosts {
            println!("{}", host.name);
        }
        return Ok(());
    }
    if cli.listworkflows {
        for workflow in &conf.workflows {
            println!("{}", workflow.name);
        }
        return Ok(());
    }

    let format_str = misc_override(&resources, "outputformat", &cli.format);
    let format = OutputFormat::parse(&format_str).ok_or_else(|| ConfigError::InvalidFormat(format_str.clone()))?;

    let names = match (&cli.cmd, &cli.workflow) {
        (Some(_), Some(_)) | (None, None) => return Err(ConfigError::CommandOrWorkflow.into()),
        (Some(cmd), None) => {
            run_single_command(&conf, &resources, &cli, cmd, format, any_file_sink)?;
            return Ok(());
        }
        (None, Some(names)) => names.split(',').map(str::trim).map(str::to_string).collect::<Vec<_>>(),
    };

    run_workflow_chain(&conf, &resources, &cli, &names, format, any_file_sink)
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// A Misc key overrides its CLI-flag equivalent whenever it's present in
/// the configuration, per spec's "each overrides the equivalent CLI
/// default if present" rule; an explicit non-default CLI value still wins
/// since the caller only reaches for this when the CLI value is itself a
/// default placeholder.
fn misc_override(resources: &ResourceMap, key: &str, cli_default: &str) -> String {
    if !cli_default.is_empty() {
        return cli_default.to_string();
    }
    resources.get(key).map(str::to_string).unwrap_or_default()
}

fn ssh_config(cli: &Cli, resources: &ResourceMap) -> SshClientConfig {
    let use_agent = cli.sshagent || resources.get_bool("usesshagent");
    SshClientConfig {
        user: cli.user.clone(),
        auth: if use_agent {
            SshAuth::Agent
        } else if let Some(path) = &cli.sshkey {
            SshAuth::KeyFile(path.clone())
        } else {
            SshAuth::Agent
        },
        connect_timeout: Duration::from_secs(2),
        known_hosts: None,
    }
}

/// `sessions_per_host` is 1 for a single `--cmd`, or the number of
/// non-`SET`/non-comment instructions for a workflow chain.
fn max_concurrency(cli: &Cli, resources: &ResourceMap, sessions_per_host: usize) -> usize {
    if cli.max < 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
    } else if cli.max == 0 {
        match resources.get_usize("maxexecs") {
            Some(maxexecs) => maxexecs.max(1),
            None => scheduler::derive_max_concurrency(None, sessions_per_host),
        }
    } else {
        cli.max as usize
    }
}

/// Gated on `--bar` and at least one log sink being redirected to a file —
/// a progress bar interleaved with console log lines is unreadable.
fn build_progress_bar(cli: &Cli, any_file_sink: bool, total_hosts: u64) -> Option<Arc<indicatif::ProgressBar>> {
    if cli.bar && any_file_sink {
        Some(Arc::new(indicatif::ProgressBar::new(total_hosts)))
    } else {
        None
    }
}

fn stagger_delay(total_hosts: usize, timeout: Duration) -> Duration {
    if total_hosts <= 1 {
        Duration::ZERO
    } else {
        // spread launches over at most a quarter of the deadline
        (timeout / 4) / total_hosts as u32
    }
}

/// Commands that actually produce an SSH session: neither blank nor a
/// `#` comment, matching what `Workflow::init` parses into instructions.
fn count_sessions_per_host(commands: &[String]) -> usize {
    commands
        .iter()
        .filter(|c| {
            let trimmed = c.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .count()
}

fn run_single_command(
    conf: &Config,
    resources: &ResourceMap,
    cli: &Cli,
    cmd: &str,
    format: OutputFormat,
    any_file_sink: bool,
) -> Result<(), MusterError> {
    let hosts = conf.filtered_host_list(&cli.filter, cli.wave, None);
    let executor: Arc<dyn RemoteExecutor> = Arc::new(Ssh2Executor::new(Arc::new(resources.clone()), cli.dryrun));
    let ssh_cfg = ssh_config(cli, resources);
    let sudo = cli.sudo;
    let cmd = cmd.to_string();
    let progress = build_progress_bar(cli, any_file_sink, hosts.len() as u64);

    let scheduler_config = SchedulerConfig {
        max_concurrency: max_concurrency(cli, resources, 1),
        stagger: stagger_delay(hosts.len(), Duration::from_secs(cli.timeout)),
        deadline: Duration::from_secs(cli.timeout),
        progress: progress.clone(),
    };

    let result = scheduler::run(hosts, scheduler_config, move |host| {
        executor.run(
            host,
            &ssh_cfg,
            muster::executor::Command {
                cmd: cmd.clone(),
                sudo,
                quiet: false,
            },
        )
    });
    if let Some(bar) = &progress {
        bar.finish_and_clear();
    }

    report_stragglers(&result.stragglers);
    let rows: Vec<ResultRow> = result.results.iter().map(ResultRow::new).collect();
    println!("{}", render(&rows, format));
    Ok(())
}

fn run_workflow_chain(
    conf: &Config,
    resources: &ResourceMap,
    cli: &Cli,
    names: &[String],
    format: OutputFormat,
    any_file_sink: bool,
) -> Result<(), MusterError> {
    let mut chained_commands = Vec::new();
    let mut min_timeout = cli.timeout;
    let mut sudo = cli.sudo;
    let mut vars_required = Vec::new();
    let mut first_filter = String::new();

    for name in names {
        let idx = conf
            .workflow_index(name)
            .ok_or_else(|| ConfigError::UnknownWorkflow(name.clone()))?;
        let wf = &conf.workflows[idx];
        if first_filter.is_empty() {
            first_filter = wf.filter.clone();
        }
        sudo |= wf.sudo;
        min_timeout = min_timeout.max(wf.min_timeout);
        vars_required.extend(wf.vars_required.clone());
        chained_commands.extend(wf.commands.clone());
    }

    let synthesized = config::Workflow {
        name: names.join(","),
        filter: first_filter,
        sudo,
        min_timeout,
        must_chain: names.len() > 1,
        commands: chained_commands,
        command_breaks: Vec::new(),
        vars_required,
    };

    let local_vars = muster::workflow::apply_set_instructions(&synthesized.commands, resources)?;
    let non_set: Vec<String> = synthesized
        .commands
        .iter()
        .filter(|c| !c.trim_start().starts_with("SET "))
        .cloned()
        .collect();
    let synthesized = config::Workflow {
        commands: non_set,
        ..synthesized
    };

    let sessions_per_host = count_sessions_per_host(&synthesized.commands).max(1);
    let workflow = Arc::new(Workflow::init(&synthesized, &local_vars, resources)?);

    let combined_filter = combine_filters(&cli.filter, &synthesized.filter);
    let hosts = conf.filtered_host_list(&combined_filter, cli.wave, None);

    let executor: Arc<dyn RemoteExecutor> = Arc::new(Ssh2Executor::new(Arc::new(resources.clone()), cli.dryrun));
    let ssh_cfg = ssh_config(cli, resources);
    let progress = build_progress_bar(cli, any_file_sink, hosts.len() as u64);

    let scheduler_config = SchedulerConfig {
        max_concurrency: max_concurrency(cli, resources, sessions_per_host),
        stagger: stagger_delay(hosts.len(), Duration::from_secs(min_timeout)),
        deadline: Duration::from_secs(min_timeout),
        progress: progress.clone(),
    };

    let result = scheduler::run(hosts, scheduler_config, move |host| {
        workflow.exec(&executor, host, &ssh_cfg)
    });
    if let Some(bar) = &progress {
        bar.finish_and_clear();
    }

    report_stragglers(&result.stragglers);

    let rows: Vec<ResultRow> = result
        .results
        .iter()
        .flat_map(|wr| wr.command_returns.iter())
        .map(ResultRow::new)
        .collect();
    println!("{}", render(&rows, format));
    Ok(())
}

/// `--filter` ANDed with the workflow's own filter.
fn combine_filters(cli_filter: &str, workflow_filter: &str) -> String {
    match (cli_filter.is_empty(), workflow_filter.is_empty()) {
        (true, true) => String::new(),
        (false, true) => cli_filter.to_string(),
        (true, false) => workflow_filter.to_string(),
        (false, false) => format!("{cli_filter} and {workflow_filter}"),
    }
}

fn report_stragglers(stragglers: &[muster::host::Host]) {
    if stragglers.is_empty() {
        return;
    }
    tracing::warn!(
        "{} host(s) did not respond before the deadline: {}",
        stragglers.len(),
        stragglers.iter().map(|h| h.name.as_str()).collect::<Vec<_>>().join(", ")
    );
}
