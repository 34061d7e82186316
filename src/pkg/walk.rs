//! Repository traversal
//!
//! Walks the source tree depth-first with children in lexicographic
//! order. Each directory yields a [`Visit`]: the effective configuration
//! (derived from the parent's and the directory's directives), the parsed
//! build file if one exists, the discovered package, and whether the
//! caller asked to update (not merely index) the directory.
//!
//! A `gazelle:ignore` directive prunes the subtree. Build file parse
//! errors are reported and downgrade the subtree to index-only outside
//! strict mode. Symbolic links to directories are not followed.

use std::fs;
use std::path::{Path, PathBuf};

use crate::ast::File;
use crate::config::Config;
use crate::error::{Diagnostics, GazelleError, Result};
use crate::lang::LanguageRegistry;

use super::{GoSourceParser, Package, ProtoFileInfo, parse_proto_source};

/// One directory's contribution to the run.
pub struct Visit {
    pub rel: String,
    pub config: Config,
    pub file: Option<File>,
    pub pkg: Option<Package>,
    pub is_update_dir: bool,
}

/// Walk the repository rooted at `config.repo_root`. `update_rels` names
/// the directories (and their subtrees) to update; empty means all.
pub fn walk(
    root_config: &Config,
    registry: &LanguageRegistry,
    update_rels: &[String],
    diags: &mut Diagnostics,
) -> Result<Vec<Visit>> {
    let mut walker = Walker {
        registry,
        lang_keys: registry.directive_keys(),
        update_rels,
        go_parser: GoSourceParser::new()?,
        visits: Vec::new(),
    };
    let root = root_config.repo_root.clone();
    walker.walk_dir(&root, "", root_config, true, diags)?;
    Ok(walker.visits)
}

struct Walker<'a> {
    registry: &'a LanguageRegistry,
    lang_keys: Vec<&'static str>,
    update_rels: &'a [String],
    go_parser: GoSourceParser,
    visits: Vec<Visit>,
}

impl Walker<'_> {
    fn walk_dir(
        &mut self,
        dir: &Path,
        rel: &str,
        parent_config: &Config,
        update_ok: bool,
        diags: &mut Diagnostics,
    ) -> Result<()> {
        let mut entries = match read_sorted_entries(dir) {
            Ok(entries) => entries,
            Err(source) => {
                diags.record(GazelleError::FileRead {
                    path: dir.to_path_buf(),
                    source,
                })?;
                return Ok(());
            }
        };

        let mut update_ok = update_ok;
        // The parent's configured names locate this directory's file; a
        // build_file_name directive inside only affects children.
        let mut file = None;
        for name in &parent_config.build_file_names {
            let path = dir.join(name);
            if !path.is_file() {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(content) => match File::parse(&path, rel, &content) {
                    Ok(parsed) => file = Some(parsed),
                    Err(err) => {
                        diags.record(err)?;
                        update_ok = false;
                    }
                },
                Err(source) => {
                    diags.record(GazelleError::FileRead { path, source })?;
                    update_ok = false;
                }
            }
            break;
        }

        let mut config = parent_config.clone_for_child();
        if let Some(file) = &file {
            config.apply_directives(rel, file, &self.lang_keys, diags)?;
        }
        for lang in self.registry.langs() {
            lang.configure(&mut config, rel, file.as_ref());
        }
        if config.ignore {
            return Ok(());
        }

        let mut go_infos = Vec::new();
        let mut proto_infos: Vec<ProtoFileInfo> = Vec::new();
        let mut other_files = Vec::new();
        let mut subdirs = Vec::new();
        let mut has_testdata = false;

        entries.retain(|e| !e.name.starts_with('.') && !e.name.starts_with('_'));
        for entry in &entries {
            if entry.is_dir {
                if entry.is_symlink {
                    continue; // directory symlinks are not followed
                }
                if entry.name == "testdata" {
                    has_testdata = true;
                    continue;
                }
                subdirs.push((entry.name.clone(), entry.path.clone()));
                continue;
            }
            if entry.name.ends_with(".go") && config.lang_enabled("go") {
                match fs::read_to_string(&entry.path) {
                    Ok(code) => {
                        match self.go_parser.parse_source(rel, &entry.name, &code) {
                            Ok(info) => go_infos.push(info),
                            Err(err) => {
                                tracing::warn!("skipping {}: {err}", entry.path.display());
                            }
                        }
                    }
                    Err(source) => {
                        diags.record(GazelleError::FileRead {
                            path: entry.path.clone(),
                            source,
                        })?;
                    }
                }
            } else if entry.name.ends_with(".proto") && config.lang_enabled("proto") {
                match fs::read_to_string(&entry.path) {
                    Ok(code) => proto_infos.push(parse_proto_source(&entry.name, &code)),
                    Err(source) => {
                        diags.record(GazelleError::FileRead {
                            path: entry.path.clone(),
                            source,
                        })?;
                    }
                }
            } else {
                other_files.push(entry.name.clone());
            }
        }

        let pkg = match Package::build(rel, &config, go_infos, proto_infos, has_testdata, &other_files)
        {
            Ok(pkg) => pkg,
            Err(err) => {
                diags.record(err)?;
                None
            }
        };

        let is_update_dir = update_ok && in_update_set(rel, self.update_rels);
        self.visits.push(Visit {
            rel: rel.to_string(),
            config: config.clone(),
            file,
            pkg,
            is_update_dir,
        });

        for (name, path) in subdirs {
            let child_rel = if rel.is_empty() {
                name
            } else {
                format!("{rel}/{name}")
            };
            self.walk_dir(&path, &child_rel, &config, update_ok, diags)?;
        }
        Ok(())
    }
}

struct DirEntry {
    name: String,
    path: PathBuf,
    is_dir: bool,
    is_symlink: bool,
}

fn read_sorted_entries(dir: &Path) -> std::io::Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let symlink_meta = fs::symlink_metadata(&path)?;
        let is_symlink = symlink_meta.file_type().is_symlink();
        // File symlinks resolve once through metadata(); directory
        // symlinks are recorded and skipped by the caller.
        let is_dir = if is_symlink {
            fs::metadata(&path).map(|m| m.is_dir()).unwrap_or(false)
        } else {
            symlink_meta.is_dir()
        };
        entries.push(DirEntry {
            name,
            path,
            is_dir,
            is_symlink,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn in_update_set(rel: &str, update_rels: &[String]) -> bool {
    if update_rels.is_empty() {
        return true;
    }
    update_rels.iter().any(|r| {
        r.is_empty() || rel == r || rel.starts_with(&format!("{r}/"))
    })
}
