//! The process-wide `Misc` mapping: built once at startup, read-only for
//! the rest of the run.
//!
//! The Go source threads this through a mutable global; this crate instead
//! wraps it in a plain immutable struct handed around as `Arc<ResourceMap>`
//! — a dependency, not a global.

use std::collections::HashMap;

use crate::config::Misc;

#[derive(Debug, Clone, Default)]
pub struct ResourceMap(HashMap<String, String>);

impl ResourceMap {
    pub fn from_miscs(miscs: Vec<Misc>) -> Self {
        let mut map = HashMap::with_capacity(miscs.len());
        for misc in miscs {
            map.insert(misc.name, misc.value);
        }
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.get(key), Some(v) if v.eq_ignore_ascii_case("true") || v == "1")
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// `VAR1, VAR2, ...` from `--vars` populate keys `VAR1`, `VAR2`, etc,
    /// one-indexed, matching the `--vars` CLI surface.
    pub fn insert_csv_vars(&mut self, csv: &str) {
        for (i, value) in csv.split(',').enumerate() {
            self.0.insert(format!("VAR{}", i + 1), value.trim().to_string());
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_vars_are_one_indexed() {
        let mut map = ResourceMap::default();
        map.insert_csv_vars("a,b,c");
        assert_eq!(map.get("VAR1"), Some("a"));
        assert_eq!(map.get("VAR2"), Some("b"));
        assert_eq!(map.get("VAR3"), Some("c"));
    }
}
