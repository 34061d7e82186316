//! Cross-repository rule index
//!
//! Every library rule discovered during the walk is indexed by its label
//! and by the importable identities it provides. The index stores label
//! plus attribute snapshots, never references into the mutable files, so
//! later merging cannot invalidate lookups.
//!
//! Population happens during the walk; [`RuleIndex::finish`] seals the
//! index before resolution: replaced entries are dropped, transitive
//! embedding is folded (an embedded rule sharing its parent's import path
//! stops answering Go lookups), and the import map is built. After
//! sealing, lookups are pure functions of their inputs.

use std::collections::{HashMap, HashSet};

use crate::ast::{CallExpr, File};
use crate::config::Config;
use crate::error::{GazelleError, Result};
use crate::label::Label;
use crate::lang::Language;
use crate::rule::{Rule, expr_strings};

/// A language-tagged import string: the key rules are looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImportSpec {
    pub lang: &'static str,
    pub imp: String,
}

impl ImportSpec {
    pub fn new(lang: &'static str, imp: impl Into<String>) -> Self {
        Self {
            lang,
            imp: imp.into(),
        }
    }
}

/// Attribute snapshot of a rule, detached from the file that holds it.
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    pub kind: String,
    pub name: String,
    pub importpath: Option<String>,
    pub srcs: Vec<String>,
    pub embed: Vec<String>,
}

impl RuleSnapshot {
    pub fn from_call(call: &CallExpr) -> Option<Self> {
        let name = call.arg("name")?.as_string()?.to_string();
        Some(Self {
            kind: call.name.clone(),
            name,
            importpath: call
                .arg("importpath")
                .and_then(|e| e.as_string())
                .map(str::to_string),
            srcs: call.arg("srcs").map(expr_strings).unwrap_or_default(),
            embed: call.arg("embed").map(expr_strings).unwrap_or_default(),
        })
    }

    pub fn from_rule(rule: &Rule) -> Self {
        Self {
            kind: rule.kind().to_string(),
            name: rule.name().to_string(),
            importpath: rule
                .attr("importpath")
                .and_then(|e| e.as_string())
                .map(str::to_string),
            srcs: rule.attr_strings("srcs"),
            embed: rule.attr_strings("embed"),
        }
    }
}

/// One indexed rule.
#[derive(Debug, Clone)]
pub struct Entry {
    pub label: Label,
    pub kind: String,
    pub lang: &'static str,
    pub imported_as: Vec<ImportSpec>,
    pub embeds: Vec<Label>,
    embedded_for_go: bool,
    replaced: bool,
}

pub struct RuleIndex {
    entries: Vec<Entry>,
    by_label: HashMap<Label, usize>,
    by_import: HashMap<ImportSpec, Vec<usize>>,
    finished: bool,
}

impl Default for RuleIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleIndex {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            by_label: HashMap::new(),
            by_import: HashMap::new(),
            finished: false,
        }
    }

    /// Index every rule in an existing build file whose kind belongs to a
    /// registered language.
    pub fn add_rules_from_file(
        &mut self,
        config: &Config,
        file: &File,
        langs: &[Box<dyn Language>],
    ) {
        debug_assert!(!self.finished);
        for (_, call) in file.rules() {
            let Some(snapshot) = RuleSnapshot::from_call(call) else {
                continue;
            };
            self.add_snapshot(config, &file.pkg, snapshot, langs, false);
        }
    }

    /// Index newly generated rules. A generated rule replaces any
    /// existing entry with the same label.
    pub fn add_generated_rules(
        &mut self,
        config: &Config,
        rel: &str,
        rules: &[Rule],
        langs: &[Box<dyn Language>],
    ) {
        debug_assert!(!self.finished);
        for rule in rules {
            self.add_snapshot(config, rel, RuleSnapshot::from_rule(rule), langs, true);
        }
    }

    fn add_snapshot(
        &mut self,
        config: &Config,
        rel: &str,
        snapshot: RuleSnapshot,
        langs: &[Box<dyn Language>],
        generated: bool,
    ) {
        for lang in langs {
            let Some(imported_as) = lang.index_specs(config, rel, &snapshot) else {
                continue;
            };
            let label = Label::new(rel, snapshot.name.clone());
            if generated {
                if let Some(&old) = self.by_label.get(&label) {
                    self.entries[old].replaced = true;
                }
            } else if self.by_label.contains_key(&label) {
                // First occurrence wins for duplicate names in hand
                // written files; the merger flags the duplication.
                continue;
            }
            let embeds = snapshot
                .embed
                .iter()
                .filter_map(|s| Label::parse(s).ok())
                .map(|l| l.abs("", rel))
                .collect();
            let entry = Entry {
                label: label.clone(),
                kind: snapshot.kind.clone(),
                lang: lang.name(),
                imported_as,
                embeds,
                embedded_for_go: false,
                replaced: false,
            };
            self.by_label.insert(label, self.entries.len());
            self.entries.push(entry);
            return;
        }
    }

    /// Seal the index. No mutation is allowed afterwards.
    pub fn finish(&mut self) {
        debug_assert!(!self.finished);

        // Drop replaced entries and rebuild the label map.
        self.entries.retain(|e| !e.replaced);
        self.by_label = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.label.clone(), i))
            .collect();

        // Transitive embedding: an embedded entry that shares a Go import
        // path with its embedder stops answering Go lookups, and its Go
        // identities flow to the embedder.
        let mut inherited: Vec<(usize, Vec<ImportSpec>)> = Vec::new();
        for (i, entry) in self.entries.iter().enumerate() {
            let mut gained = Vec::new();
            let mut visited = HashSet::new();
            self.collect_embedded_imports(entry, &mut gained, &mut visited);
            if !gained.is_empty() {
                inherited.push((i, gained));
            }
        }
        let mut embedded: HashSet<Label> = HashSet::new();
        for entry in &self.entries {
            for embed in &entry.embeds {
                if let Some(&j) = self.by_label.get(embed) {
                    let shares_import = self.entries[j]
                        .imported_as
                        .iter()
                        .any(|spec| spec.lang == "go" && entry.imported_as.contains(spec));
                    if shares_import {
                        embedded.insert(embed.clone());
                    }
                }
            }
        }
        for entry in &mut self.entries {
            if embedded.contains(&entry.label) {
                entry.embedded_for_go = true;
            }
        }
        for (i, gained) in inherited {
            for spec in gained {
                if !self.entries[i].imported_as.contains(&spec) {
                    self.entries[i].imported_as.push(spec);
                }
            }
        }

        // Import map. Entries folded into an embedder stay reachable for
        // other languages but not for Go.
        self.by_import.clear();
        for (i, entry) in self.entries.iter().enumerate() {
            for spec in &entry.imported_as {
                if spec.lang == "go" && entry.embedded_for_go {
                    continue;
                }
                self.by_import.entry(spec.clone()).or_default().push(i);
            }
        }
        self.finished = true;
    }

    fn collect_embedded_imports(
        &self,
        entry: &Entry,
        gained: &mut Vec<ImportSpec>,
        visited: &mut HashSet<Label>,
    ) {
        for embed in &entry.embeds {
            if !visited.insert(embed.clone()) {
                continue;
            }
            if let Some(&j) = self.by_label.get(embed) {
                let embedded = &self.entries[j];
                for spec in &embedded.imported_as {
                    if spec.lang == "go" && !gained.contains(spec) {
                        gained.push(spec.clone());
                    }
                }
                self.collect_embedded_imports(embedded, gained, visited);
            }
        }
    }

    pub fn find_by_label(&self, label: &Label) -> Option<&Entry> {
        self.by_label.get(label).map(|&i| &self.entries[i])
    }

    /// Look up the single rule providing an import, applying the Go
    /// vendoring rule: a vendored entry is visible only from inside the
    /// tree that vendors it, and the deepest visible vendor wins.
    /// Distinct non-vendored candidates are an ambiguity error.
    pub fn find_by_import(
        &self,
        spec: &ImportSpec,
        from: &Label,
    ) -> Result<Option<&Entry>> {
        debug_assert!(self.finished);
        let Some(candidates) = self.by_import.get(spec) else {
            return Ok(None);
        };
        // Rank: a non-vendored rule beats every vendored copy; among
        // vendored copies the deepest visible vendor tree wins. Equal
        // ranks are an ambiguity the user must break with a directive.
        let mut best: Option<(&Entry, usize)> = None;
        let mut ambiguous: Vec<&Entry> = Vec::new();
        for &i in candidates {
            let entry = &self.entries[i];
            if entry.label == *from {
                continue;
            }
            let rank = match vendor_prefix(&entry.label.pkg) {
                Some(prefix) => {
                    if !entry.label.repo.is_empty() || !is_path_prefix(&prefix, &from.pkg) {
                        continue;
                    }
                    prefix.len()
                }
                None => usize::MAX,
            };
            match &best {
                None => best = Some((entry, rank)),
                Some((_, best_rank)) => {
                    if rank > *best_rank {
                        best = Some((entry, rank));
                        ambiguous.clear();
                    } else if rank == *best_rank {
                        ambiguous.push(entry);
                    }
                }
            }
        }
        if let Some((winner, _)) = best {
            if !ambiguous.is_empty() {
                let mut names: Vec<String> = ambiguous
                    .iter()
                    .map(|e| e.label.to_string())
                    .collect();
                names.insert(0, winner.label.to_string());
                return Err(GazelleError::Ambiguous {
                    lang: spec.lang,
                    imp: spec.imp.clone(),
                    candidates: names.join(", "),
                });
            }
            return Ok(Some(winner));
        }
        Ok(None)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The package path of the tree that vendors `pkg`, if `pkg` lies under a
/// `vendor` directory: `a/vendor/example.com/x` is visible from `a/...`.
fn vendor_prefix(pkg: &str) -> Option<String> {
    let mut prefix = String::new();
    for segment in pkg.split('/') {
        if segment == "vendor" {
            return Some(prefix.trim_end_matches('/').to_string());
        }
        prefix.push_str(segment);
        prefix.push('/');
    }
    None
}

fn is_path_prefix(prefix: &str, path: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || path.starts_with(&format!("{prefix}/"))
}
