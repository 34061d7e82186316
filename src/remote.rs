//! Remote module cache
//!
//! Maps a Go import path outside the repository to the module root prefix
//! and the canonical external repository name. A small table of built-in
//! host heuristics answers the common cases; everything else goes through
//! a pluggable lookup whose results (including failures) are memoized for
//! the rest of the run.
//!
//! Concurrency: the map is guarded by a mutex, but the external call
//! happens inside a per-key once-cell, so no thread holds the lock while
//! blocked and concurrent lookups for one path coalesce into a single
//! fetch.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::Deserialize;

/// Result of locating the module that provides an import path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRoot {
    /// Import path prefix identifying the module root.
    pub prefix: String,
    /// Canonical external repository name derived from the prefix.
    pub repo_name: String,
}

/// Pluggable import-path to module-root resolver, consulted on cache
/// misses the built-in heuristics cannot answer.
pub trait RepoLookup: Send + Sync {
    /// Returns the module root prefix for an import path.
    fn lookup(&self, import_path: &str) -> Result<String, String>;
}

impl<F> RepoLookup for F
where
    F: Fn(&str) -> Result<String, String> + Send + Sync,
{
    fn lookup(&self, import_path: &str) -> Result<String, String> {
        self(import_path)
    }
}

/// The JSON structure returned by the external `module download` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleDownload {
    #[serde(rename = "Dir", default)]
    pub dir: String,
    #[serde(rename = "Sum", default)]
    pub sum: String,
    #[serde(rename = "Error", default)]
    pub error: String,
}

type Slot = Arc<OnceLock<Result<ModuleRoot, String>>>;

pub struct RemoteCache {
    cache: Mutex<HashMap<String, Slot>>,
    lookup: Option<Box<dyn RepoLookup>>,
}

impl Default for RemoteCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteCache {
    /// A cache with only the built-in heuristics; unseeded paths fail.
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            lookup: None,
        }
    }

    pub fn with_lookup(lookup: Box<dyn RepoLookup>) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            lookup: Some(lookup),
        }
    }

    /// The module root for an import path. Errors are cached as negative
    /// entries so a failing host is asked once per run.
    pub fn root(&self, import_path: &str) -> Result<ModuleRoot, String> {
        if let Some(root) = known_root(import_path) {
            return Ok(root);
        }
        let slot = {
            let mut map = self.cache.lock();
            map.entry(import_path.to_string())
                .or_insert_with(|| Arc::new(OnceLock::new()))
                .clone()
        };
        // First caller performs the lookup; the rest block on the cell,
        // not on the map lock.
        slot.get_or_init(|| self.fetch(import_path)).clone()
    }

    fn fetch(&self, import_path: &str) -> Result<ModuleRoot, String> {
        let Some(lookup) = &self.lookup else {
            return Err(format!("no remote lookup configured for {import_path:?}"));
        };
        let prefix = lookup.lookup(import_path)?;
        let repo_name = canonical_repo_name(&prefix);
        Ok(ModuleRoot { prefix, repo_name })
    }
}

/// Built-in host heuristics: how many path components identify a
/// repository at well-known hosts.
fn known_root(import_path: &str) -> Option<ModuleRoot> {
    let parts: Vec<&str> = import_path.split('/').collect();
    let take = match parts[0] {
        "github.com" | "bitbucket.org" | "gitlab.com" | "golang.org" => {
            if parts[0] == "golang.org" && parts.get(1) != Some(&"x") {
                return None;
            }
            3
        }
        "gopkg.in" => {
            // gopkg.in/pkg.v1 or gopkg.in/user/pkg.v1
            if parts.get(1).is_some_and(|p| p.contains(".v")) {
                2
            } else {
                3
            }
        }
        "google.golang.org" | "k8s.io" | "sigs.k8s.io" | "go.uber.org" => 2,
        "cloud.google.com" => {
            if parts.get(1) == Some(&"go") {
                2
            } else {
                return None;
            }
        }
        _ => return None,
    };
    if parts.len() < take {
        return None;
    }
    let prefix = parts[..take].join("/");
    let repo_name = canonical_repo_name(&prefix);
    Some(ModuleRoot { prefix, repo_name })
}

/// Canonical external repository name: reverse the dotted labels of the
/// host, join the remaining components with underscores, map `-` and `.`
/// to `_`, lowercase. `github.com/pkg/errors` becomes
/// `com_github_pkg_errors`.
pub fn canonical_repo_name(prefix: &str) -> String {
    let mut parts = prefix.split('/');
    let host = parts.next().unwrap_or_default();
    let mut segments: Vec<String> = host.split('.').rev().map(str::to_string).collect();
    segments.extend(parts.map(str::to_string));
    segments
        .join("_")
        .replace(['-', '.'], "_")
        .to_lowercase()
}
