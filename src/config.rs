//! `Config`: the merged inventory of hosts, workflows and miscs.
//!
//! Grounded on `original_source/config.go` (`Config`, `Merge`,
//! `WorkflowIndex`, `loadConfigs`/`loadConfigFile`), following the same
//! scan-directory/parse-each/fold-into-one-aggregate merge-builder shape,
//! adapted from TOML remote-deployment config to the JSON inventory config
//! this orchestrator reads.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::host::Host;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, alias = "Hosts")]
    pub hosts: Vec<Host>,
    #[serde(default, alias = "Workflows")]
    pub workflows: Vec<Workflow>,
    #[serde(default, alias = "Miscs")]
    pub miscs: Vec<Misc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Misc {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Value")]
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(alias = "Name")]
    pub name: String,

    #[serde(default, alias = "Filter")]
    pub filter: String,

    #[serde(default, alias = "Sudo")]
    pub sudo: bool,

    #[serde(default, alias = "MinTimeout")]
    pub min_timeout: u64,

    #[serde(default, alias = "MustChain")]
    pub must_chain: bool,

    #[serde(default, alias = "Commands")]
    pub commands: Vec<String>,

    #[serde(default, alias = "CommandBreaks")]
    pub command_breaks: Vec<bool>,

    #[serde(default, alias = "VarsRequired")]
    pub vars_required: Vec<String>,
}

impl Workflow {
    /// Whether instruction `i` should abort the workflow on failure.
    ///
    /// Empty `command_breaks` means "break on every failure"; once
    /// non-empty, any index at or beyond its length also breaks (rather
    /// than being undefined), since the evident intent of a partial list
    /// is "break except where I said not to". See DESIGN.md.
    pub fn breaks_on_failure(&self, i: usize) -> bool {
        if self.command_breaks.is_empty() {
            true
        } else {
            self.command_breaks.get(i).copied().unwrap_or(true)
        }
    }
}

impl Config {
    /// Append another config's lists verbatim; no dedup.
    pub fn merge(&mut self, other: Config) {
        self.hosts.extend(other.hosts);
        self.workflows.extend(other.workflows);
        self.miscs.extend(other.miscs);
    }

    /// Index of the first workflow named `name`, or `None`.
    ///
    /// First occurrence wins; later ones with the same name remain in
    /// `workflows` but are unreachable through this lookup. Callers that
    /// load configs should warn about shadowed names at load time (see
    /// [`load_configs`]). See DESIGN.md.
    pub fn workflow_index(&self, name: &str) -> Option<usize> {
        self.workflows.iter().position(|w| w.name == name)
    }

    /// Hosts passing all of: not offline, matching wave (0 = any),
    /// matching `cli_filter` (empty = true), and matching the selected
    /// workflow's own filter (empty = true) when `workflow_index` is given.
    pub fn filtered_host_list(
        &self,
        cli_filter: &str,
        wave: u32,
        workflow_index: Option<usize>,
    ) -> Vec<Host> {
        let workflow_filter = workflow_index
            .and_then(|i| self.workflows.get(i))
            .map(|w| w.filter.as_str());

        self.hosts
            .iter()
            .filter(|h| !h.offline)
            .filter(|h| wave == 0 || h.wave == wave)
            .filter(|h| crate::filter::evaluate(h, cli_filter))
            .filter(|h| match workflow_filter {
                Some(f) => crate::filter::evaluate(h, f),
                None => true,
            })
            .cloned()
            .collect()
    }
}

/// Scan `dir` (non-recursive) for `*.json` files in lexicographic order and
/// merge each in turn. A missing directory, unreadable file or malformed
/// JSON is a fatal startup error.
pub fn load_configs(dir: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let dir = dir.as_ref();
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| ConfigError::Directory(dir.to_path_buf(), e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut conf = Config::default();
    for path in paths {
        tracing::debug!("reading config '{}'", path.display());
        conf.merge(load_config_file(&path)?);
    }

    warn_on_shadowed_workflows(&conf);
    Ok(conf)
}

fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let buf = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    serde_json::from_str(&buf).map_err(|e| ConfigError::Json(path.to_path_buf(), e))
}

fn warn_on_shadowed_workflows(conf: &Config) {
    let mut seen = std::collections::HashSet::new();
    for wf in &conf.workflows {
        if !seen.insert(wf.name.clone()) {
            tracing::warn!(
                "workflow '{}' is defined more than once; only the first definition is reachable",
                wf.name
            );
        }
    }
}

pub fn dump_config(conf: &Config) -> String {
    serde_json::to_string_pretty(conf).unwrap_or_default()
}
