//! Per-directory configuration
//!
//! Configuration flows top down: each directory starts from a clone of
//! its parent's [`Config`] and is then adjusted by `# gazelle:` directive
//! comments found in the directory's build file. Mutations never
//! propagate back up. Command line flags seed the root configuration, so
//! a directive seen later in the walk overrides a flag for its subtree.

use std::collections::BTreeMap;
use std::path::PathBuf;

use regex::Regex;

use crate::ast::{Directive, File};
use crate::error::{Diagnostics, GazelleError, Result};
use crate::label::Label;

pub const DEFAULT_BUILD_FILE_NAMES: &[&str] = &["BUILD.bazel", "BUILD"];

/// How generated Go rules are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingConvention {
    /// Library named after the directory, `foo_test` for tests.
    #[default]
    Import,
    /// Legacy `go_default_library` / `go_default_test` names.
    GoDefaultLibrary,
}

/// Proto rule generation mode for a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtoMode {
    /// Generate `proto_library` and `go_proto_library` rules.
    #[default]
    Default,
    /// Generate no proto rules; protos are treated as plain files.
    Disable,
    /// Keep deprecated filegroup shapes; no new proto rules.
    Legacy,
    /// One `proto_library` per proto package.
    Package,
}

impl ProtoMode {
    pub fn from_directive(value: &str) -> Option<Self> {
        match value {
            "default" => Some(Self::Default),
            "disable" => Some(Self::Disable),
            "legacy" => Some(Self::Legacy),
            "package" => Some(Self::Package),
            _ => None,
        }
    }
}

/// Go extension state carried in the config.
#[derive(Debug, Clone)]
pub struct GoConfig {
    pub naming_convention: NamingConvention,
    pub generate_proto: bool,
}

impl Default for GoConfig {
    fn default() -> Self {
        Self {
            naming_convention: NamingConvention::default(),
            generate_proto: true,
        }
    }
}

/// An explicit import-to-label override from a `resolve` directive or a
/// `--resolve` flag.
#[derive(Debug, Clone)]
pub struct ResolveOverride {
    pub lang: String,
    pub dep_lang: String,
    pub imp: String,
    pub label: Label,
}

/// Second-tier override matched by regular expression.
#[derive(Debug, Clone)]
pub struct RegexOverride {
    pub lang: String,
    pub dep_lang: String,
    pub pattern: Regex,
    pub label: Label,
}

/// A `map_kind FROM TO LOAD` substitution.
#[derive(Debug, Clone, PartialEq)]
pub struct KindMapping {
    pub to: String,
    pub load_file: String,
}

/// Effective options at one directory.
#[derive(Debug, Clone)]
pub struct Config {
    pub repo_root: PathBuf,
    pub build_file_names: Vec<String>,
    pub strict: bool,
    /// Whether library indexing (and index-based resolution) is enabled.
    pub index_libraries: bool,
    /// Languages allowed to run in this subtree; empty means all.
    pub langs: Vec<String>,
    /// Go import path of the repository root (or of `prefix_rel`).
    pub prefix: String,
    /// Directory the prefix was set in, as a slash path from the root.
    pub prefix_rel: String,
    /// Set by a `gazelle:ignore` directive; prunes the subtree.
    pub ignore: bool,
    pub kind_map: BTreeMap<String, KindMapping>,
    pub overrides: Vec<ResolveOverride>,
    pub regex_overrides: Vec<RegexOverride>,
    pub go: GoConfig,
    pub proto_mode: ProtoMode,
}

impl Config {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            build_file_names: DEFAULT_BUILD_FILE_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            strict: false,
            index_libraries: true,
            langs: Vec::new(),
            prefix: String::new(),
            prefix_rel: String::new(),
            ignore: false,
            kind_map: BTreeMap::new(),
            overrides: Vec::new(),
            regex_overrides: Vec::new(),
            go: GoConfig::default(),
            proto_mode: ProtoMode::default(),
        }
    }

    /// The starting configuration for a child directory.
    pub fn clone_for_child(&self) -> Self {
        let mut child = self.clone();
        child.ignore = false;
        child
    }

    pub fn lang_enabled(&self, name: &str) -> bool {
        self.langs.is_empty() || self.langs.iter().any(|l| l == name)
    }

    /// The Go import path for a directory, derived from the prefix. A
    /// directory under `vendor/` takes its import path from the part
    /// after the vendor segment.
    pub fn import_path_for(&self, rel: &str) -> String {
        if let Some(vendored) = vendored_import_path(rel) {
            return vendored.to_string();
        }
        let sub = rel
            .strip_prefix(self.prefix_rel.as_str())
            .unwrap_or(rel)
            .trim_start_matches('/');
        if sub.is_empty() {
            self.prefix.clone()
        } else if self.prefix.is_empty() {
            sub.to_string()
        } else {
            format!("{}/{}", self.prefix, sub)
        }
    }

    /// Apply core directives from a build file. Keys in `lang_keys` are
    /// left for the owning language's configure hook; anything else
    /// unknown is a warning (an error in strict mode).
    pub fn apply_directives(
        &mut self,
        rel: &str,
        file: &File,
        lang_keys: &[&str],
        diags: &mut Diagnostics,
    ) -> Result<()> {
        for directive in file.directives() {
            match directive.key.as_str() {
                "prefix" => {
                    self.prefix = directive.value.clone();
                    self.prefix_rel = rel.to_string();
                }
                "build_file_name" => {
                    self.build_file_names = directive
                        .value
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                "ignore" => self.ignore = true,
                "lang" => {
                    self.langs = directive
                        .value
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                "map_kind" => self.add_map_kind(&directive, &file.path, diags)?,
                "resolve" => self.add_resolve(&directive, &file.path, diags)?,
                "resolve_regexp" => self.add_resolve_regexp(&directive, &file.path, diags)?,
                // keep is consumed where the annotated node is merged
                "keep" => {}
                key if lang_keys.contains(&key) => {}
                key => {
                    diags.record(GazelleError::UnknownDirective {
                        key: key.to_string(),
                        path: file.path.clone(),
                    })?;
                }
            }
        }
        Ok(())
    }

    fn add_map_kind(
        &mut self,
        directive: &Directive,
        path: &std::path::Path,
        diags: &mut Diagnostics,
    ) -> Result<()> {
        let parts: Vec<&str> = directive.value.split_whitespace().collect();
        if parts.len() != 3 {
            return diags.record(GazelleError::Config {
                reason: format!(
                    "{}: map_kind expects FROM TO LOAD, got {:?}",
                    path.display(),
                    directive.value
                ),
            });
        }
        self.kind_map.insert(
            parts[0].to_string(),
            KindMapping {
                to: parts[1].to_string(),
                load_file: parts[2].to_string(),
            },
        );
        // A directive introducing a cycle is rejected immediately.
        self.mapped_kind(parts[0])?;
        Ok(())
    }

    fn add_resolve(
        &mut self,
        directive: &Directive,
        path: &std::path::Path,
        diags: &mut Diagnostics,
    ) -> Result<()> {
        match parse_resolve_parts(&directive.value) {
            Some((lang, dep_lang, imp, label)) => {
                self.overrides.push(ResolveOverride {
                    lang,
                    dep_lang,
                    imp,
                    label,
                });
                Ok(())
            }
            None => diags.record(GazelleError::Config {
                reason: format!(
                    "{}: resolve expects LANG [DEP_LANG] IMPORT LABEL, got {:?}",
                    path.display(),
                    directive.value
                ),
            }),
        }
    }

    fn add_resolve_regexp(
        &mut self,
        directive: &Directive,
        path: &std::path::Path,
        diags: &mut Diagnostics,
    ) -> Result<()> {
        let parsed = parse_resolve_parts(&directive.value).and_then(
            |(lang, dep_lang, pattern, label)| {
                let pattern = Regex::new(&pattern).ok()?;
                Some(RegexOverride {
                    lang,
                    dep_lang,
                    pattern,
                    label,
                })
            },
        );
        match parsed {
            Some(over) => {
                self.regex_overrides.push(over);
                Ok(())
            }
            None => diags.record(GazelleError::Config {
                reason: format!(
                    "{}: resolve_regexp expects LANG [DEP_LANG] PATTERN LABEL, got {:?}",
                    path.display(),
                    directive.value
                ),
            }),
        }
    }

    /// The effective kind for a generated rule, following `map_kind`
    /// substitutions transitively. Returns the final kind plus the load
    /// file of the last mapping applied, if any.
    pub fn mapped_kind(&self, kind: &str) -> Result<(String, Option<String>)> {
        let mut current = kind.to_string();
        let mut load = None;
        let mut visited = std::collections::HashSet::new();
        visited.insert(current.clone());
        while let Some(mapping) = self.kind_map.get(&current) {
            if !visited.insert(mapping.to.clone()) {
                return Err(GazelleError::KindCycle {
                    kind: kind.to_string(),
                });
            }
            load = Some(mapping.load_file.clone());
            current = mapping.to.clone();
        }
        Ok((current, load))
    }

    /// Explicit override for an import, if any. The last declaration
    /// wins; exact overrides beat regex overrides.
    pub fn resolve_override(&self, lang: &str, dep_lang: &str, imp: &str) -> Option<Label> {
        if let Some(over) = self
            .overrides
            .iter()
            .rev()
            .find(|o| o.lang == lang && o.dep_lang == dep_lang && o.imp == imp)
        {
            return Some(over.label.clone());
        }
        self.regex_overrides
            .iter()
            .rev()
            .find(|o| o.lang == lang && o.dep_lang == dep_lang && o.pattern.is_match(imp))
            .map(|o| o.label.clone())
    }
}

/// The import path implied by a vendored location: everything after the
/// innermost `vendor/` segment.
fn vendored_import_path(rel: &str) -> Option<&str> {
    let idx = rel.rfind("vendor/")?;
    // The segment must start at a path boundary.
    if idx != 0 && !rel[..idx].ends_with('/') {
        return None;
    }
    let sub = &rel[idx + "vendor/".len()..];
    if sub.is_empty() { None } else { Some(sub) }
}

/// Parse `LANG [DEP_LANG] IMPORT LABEL`. With three fields the dependency
/// language defaults to the source language.
fn parse_resolve_parts(value: &str) -> Option<(String, String, String, Label)> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    let (lang, dep_lang, imp, label) = match parts.len() {
        3 => (parts[0], parts[0], parts[1], parts[2]),
        4 => (parts[0], parts[1], parts[2], parts[3]),
        _ => return None,
    };
    let label = Label::parse(label).ok()?;
    Some((
        lang.to_string(),
        dep_lang.to_string(),
        imp.to_string(),
        label,
    ))
}
