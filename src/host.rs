//! The `Host` data model: a single remote system in the inventory.
//!
//! Grounded on `original_source/hosts.go`, generalized with the extra
//! fields (`wave`, `offline`, `dont_update_packages`) the distilled spec
//! adds on top of the Go source's `Port`/`Address`/`Name`/`Arch`/`AltUser`/`Tags`.

use serde::{Deserialize, Serialize};

/// A remote system known to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, Derivative, PartialEq, Eq)]
#[derivative(Default)]
pub struct Host {
    pub name: String,

    #[serde(default, alias = "Address")]
    pub address: String,

    /// 0 means "default to 22"; callers must apply that fallback explicitly
    /// wherever the port is used (filter comparisons, dial target) rather
    /// than normalizing it here, so that round-tripping a loaded `Host`
    /// through JSON preserves the literal `0`.
    #[serde(default, alias = "Port")]
    pub port: u16,

    #[serde(default, alias = "User", alias = "AltUser")]
    pub user: Option<String>,

    #[serde(default, alias = "Arch")]
    pub arch: String,

    #[serde(default, alias = "Loc")]
    pub loc: String,

    #[serde(default, alias = "Wave")]
    pub wave: u32,

    #[serde(default, alias = "Offline")]
    pub offline: bool,

    #[serde(default, alias = "Tags")]
    pub tags: Vec<String>,

    #[serde(default, alias = "DontUpdatePackages")]
    pub dont_update_packages: Option<String>,
}

impl Host {
    /// Sort tags in place; idempotent and cheap to call unconditionally.
    pub fn sort_tags(&mut self) {
        self.tags.sort();
    }

    /// Exact membership, or substring match against any tag when `fuzzy`.
    pub fn search_tags(&self, needle: &str, fuzzy: bool) -> bool {
        if fuzzy {
            self.tags.iter().any(|t| t.contains(needle))
        } else {
            self.tags.iter().any(|t| t == needle)
        }
    }

    /// The effective SSH port: `22` when unset.
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            22
        } else {
            self.port
        }
    }

    /// The address to dial: `address` if non-empty, else `name`.
    pub fn connect_target(&self) -> &str {
        if !self.address.is_empty() {
            &self.address
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(tags: &[&str]) -> Host {
        Host {
            name: "h1".into(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn exact_tag_membership() {
        let h = host(&["tag1", "tag2", "tag3", "tag4"]);
        assert!(h.search_tags("tag2", false));
        assert!(!h.search_tags("NOPE", false));
    }

    #[test]
    fn fuzzy_tag_membership() {
        let h = host(&["httpd-1.2", "tomcat"]);
        assert!(h.search_tags("httpd", true));
        assert!(!h.search_tags("httpd", false));
    }

    #[test]
    fn port_zero_defaults_to_22() {
        let h = Host {
            port: 0,
            ..Default::default()
        };
        assert_eq!(h.effective_port(), 22);
    }

    #[test]
    fn connect_target_prefers_address() {
        let mut h = host(&[]);
        h.name = "box1".into();
        assert_eq!(h.connect_target(), "box1");
        h.address = "10.0.0.1".into();
        assert_eq!(h.connect_target(), "10.0.0.1");
    }
}
