//! Run orchestration
//!
//! Sequences the passes: walk the tree collecting visits, apply fixes,
//! generate rules, populate and seal the index, resolve imports, merge
//! the resolved attributes, normalize loads and list order, then emit
//! under the selected mode (write back, print, or unified diff).

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use rayon::prelude::*;
use similar::TextDiff;

use crate::ast::File;
use crate::config::Config;
use crate::error::{Diagnostics, GazelleError, Result};
use crate::fix::{fix_file, fix_file_minor};
use crate::index::RuleIndex;
use crate::label::Label;
use crate::lang::{GenerateResult, LanguageRegistry};
use crate::merge::{
    MergedRule, dedup_rule_lists, fix_loads, merge_file, merge_resolved_attr, sort_rule_lists,
};
use crate::pkg::walk;
use crate::remote::RemoteCache;
use crate::rule::{PrivateValue, Rule};

/// What to do with updated build files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitMode {
    /// Write updated files in place.
    #[default]
    Fix,
    /// Write updated files to standard output.
    Print,
    /// Emit a unified diff.
    Diff,
}

#[derive(Debug, Default)]
pub struct DriverOptions {
    pub mode: EmitMode,
    /// Apply the full fix pass (the `fix` command), not just safe
    /// rewrites.
    pub run_fix: bool,
    /// Collect the diff into a patch file instead of stdout.
    pub patch_file: Option<PathBuf>,
}

/// Outcome of a run, used to pick the process exit status.
#[derive(Debug, Default)]
pub struct RunResult {
    pub error_count: usize,
    pub diff_nonempty: bool,
}

struct WorkItem {
    visit_idx: usize,
    lang: &'static str,
    merged: Vec<MergedRule>,
}

/// The fix/update pipeline over a repository.
pub fn run(
    config: &Config,
    registry: &LanguageRegistry,
    cache: &RemoteCache,
    update_rels: &[String],
    opts: &DriverOptions,
) -> Result<RunResult> {
    let mut diags = Diagnostics::new(config.strict);
    let mut visits = walk(config, registry, update_rels, &mut diags)?;

    // Index every existing build file before generation so generated
    // rules can replace stale entries.
    let mut index = RuleIndex::new();
    for visit in &visits {
        if let Some(file) = &visit.file {
            index.add_rules_from_file(&visit.config, file, registry.langs());
        }
    }

    let mut work: Vec<WorkItem> = Vec::new();
    for (visit_idx, visit) in visits.iter_mut().enumerate() {
        if !visit.is_update_dir {
            continue;
        }
        if let Some(file) = &mut visit.file {
            fix_file_minor(file);
            if opts.run_fix {
                fix_file(&visit.config, file);
            }
        }
        let Some(pkg) = &visit.pkg else { continue };

        for lang in registry.langs() {
            if !visit.config.lang_enabled(lang.name()) {
                continue;
            }
            let generated = lang.generate(&visit.config, pkg);
            if generated.rules.is_empty() && generated.empty.is_empty() {
                continue;
            }
            if visit.file.is_none() && !generated.rules.is_empty() {
                let name = &visit.config.build_file_names[0];
                let path = build_file_path(&visit.config, &visit.rel, name);
                visit.file = Some(File::empty(path, visit.rel.clone()));
            }
            let Some(file) = &mut visit.file else { continue };
            index.add_generated_rules(&visit.config, &visit.rel, &generated.rules, registry.langs());
            let merged = merge_file(&visit.config, registry, file, generated, &mut diags)?;
            work.push(WorkItem {
                visit_idx,
                lang: lang.name(),
                merged,
            });
        }
    }

    index.finish();

    // Resolve pass: translate each merged rule's imports into labels and
    // fold them into the file.
    for item in &work {
        let visit = &visits[item.visit_idx];
        let Some(lang) = registry.langs().iter().find(|l| l.name() == item.lang) else {
            continue;
        };
        let mut resolved = Vec::new();
        for merged in &item.merged {
            let Some(imports) = &merged.imports else { continue };
            let from = Label::new(visit.rel.clone(), merged.name.clone());
            let (deps, errors) =
                lang.resolve(&visit.config, &index, cache, imports, &from);
            for err in errors {
                diags.record(err)?;
            }
            let attr = registry
                .kind_info(&merged.kind)
                .and_then(|info| info.resolve_attrs.first().copied())
                .unwrap_or("deps");
            resolved.push((merged.stmt_index, attr, deps.to_expr()));
        }
        let visit = &mut visits[item.visit_idx];
        if let Some(file) = &mut visit.file {
            for (stmt_index, attr, expr) in resolved {
                merge_resolved_attr(file, stmt_index, attr, expr);
            }
        }
    }

    // Final normalization and emission, in visit order. Every update
    // directory with a file emits, so fix-only rewrites land too.
    let mut emitter = Emitter::new(opts);
    for visit in &mut visits {
        if !visit.is_update_dir {
            continue;
        }
        let Some(file) = &mut visit.file else { continue };
        dedup_rule_lists(file);
        sort_rule_lists(file);
        fix_loads(file, registry, &visit.config);
        emitter.emit(file, &mut diags)?;
    }
    emitter.finish(&mut diags)?;

    Ok(RunResult {
        error_count: diags.len(),
        diff_nonempty: emitter.diff_nonempty,
    })
}

fn build_file_path(config: &Config, rel: &str, name: &str) -> PathBuf {
    let mut path = config.repo_root.clone();
    if !rel.is_empty() {
        path.push(rel);
    }
    path.push(name);
    path
}

struct Emitter<'a> {
    opts: &'a DriverOptions,
    patch: String,
    diff_nonempty: bool,
}

impl<'a> Emitter<'a> {
    fn new(opts: &'a DriverOptions) -> Self {
        Self {
            opts,
            patch: String::new(),
            diff_nonempty: false,
        }
    }

    fn emit(&mut self, file: &File, diags: &mut Diagnostics) -> Result<()> {
        let new = file.format();
        let old = fs::read_to_string(&file.path).unwrap_or_default();
        match self.opts.mode {
            EmitMode::Fix => {
                if new != old {
                    if let Err(source) = fs::write(&file.path, &new) {
                        diags.record(GazelleError::FileWrite {
                            path: file.path.clone(),
                            source,
                        })?;
                    }
                }
            }
            EmitMode::Print => {
                let mut stdout = std::io::stdout().lock();
                let _ = writeln!(stdout, "# {}", file.path.display());
                let _ = stdout.write_all(new.as_bytes());
            }
            EmitMode::Diff => {
                if new != old {
                    self.diff_nonempty = true;
                    let name = file.path.display().to_string();
                    let diff = TextDiff::from_lines(&old, &new);
                    self.patch.push_str(
                        &diff
                            .unified_diff()
                            .context_radius(3)
                            .header(&format!("a/{name}"), &format!("b/{name}"))
                            .to_string(),
                    );
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self, diags: &mut Diagnostics) -> Result<()> {
        if self.opts.mode != EmitMode::Diff || self.patch.is_empty() {
            return Ok(());
        }
        match &self.opts.patch_file {
            Some(path) => {
                if let Err(source) = fs::write(path, &self.patch) {
                    diags.record(GazelleError::FileWrite {
                        path: path.clone(),
                        source,
                    })?;
                }
            }
            None => {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(self.patch.as_bytes());
            }
        }
        Ok(())
    }
}

/// Resolve a list of import paths to external repository rules and merge
/// them into the workspace file. Independent lookups run in parallel and
/// rejoin before merging begins.
pub fn run_update_repos(
    config: &Config,
    registry: &LanguageRegistry,
    cache: &RemoteCache,
    imports: &[String],
    opts: &DriverOptions,
) -> Result<RunResult> {
    let mut diags = Diagnostics::new(config.strict);

    let results: Vec<(String, std::result::Result<crate::remote::ModuleRoot, String>)> = imports
        .par_iter()
        .map(|imp| (imp.clone(), cache.root(imp)))
        .collect();

    let path = config.repo_root.join("WORKSPACE");
    let mut file = match fs::read_to_string(&path) {
        Ok(content) => File::parse(&path, "", &content)?,
        Err(_) => File::empty(&path, ""),
    };

    let insert_pos = workspace_insert_pos(&file);
    let mut generated = GenerateResult::default();
    for (imp, result) in results {
        match result {
            Ok(root) => {
                let mut rule = Rule::new("go_repository", &root.repo_name);
                rule.set_attr("importpath", root.prefix.clone());
                // Successive rules insert after one another, keeping the
                // requested order.
                let pos = insert_pos + generated.rules.len();
                rule.set_private(crate::rule::INSERT_POS_KEY, PrivateValue::Pos(pos));
                generated.rules.push(rule);
            }
            Err(reason) => {
                tracing::debug!("update-repos lookup for {imp:?} failed: {reason}");
                diags.record(GazelleError::Resolve {
                    lang: "go",
                    imp,
                    from: "//:WORKSPACE".to_string(),
                })?;
            }
        }
    }

    merge_file(config, registry, &mut file, generated, &mut diags)?;
    sort_rule_lists(&mut file);
    fix_loads(&mut file, registry, config);

    let mut emitter = Emitter::new(opts);
    emitter.emit(&file, &mut diags)?;
    emitter.finish(&mut diags)?;

    Ok(RunResult {
        error_count: diags.len(),
        diff_nonempty: emitter.diff_nonempty,
    })
}

/// New repository rules go after the last load or repository-shaped call
/// already in the workspace file.
fn workspace_insert_pos(file: &File) -> usize {
    let mut pos = 0;
    for (i, stmt) in file.stmts.iter().enumerate() {
        match &stmt.kind {
            crate::ast::StmtKind::Load(_) => pos = i + 1,
            crate::ast::StmtKind::Rule(call)
                if call.name == "go_repository" || call.name.ends_with("_dependencies") =>
            {
                pos = i + 1;
            }
            _ => {}
        }
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
    }

    fn run_in(root: &Path, opts: &DriverOptions) -> RunResult {
        let config = Config::new(root);
        let registry = LanguageRegistry::new();
        let cache = RemoteCache::new();
        run(&config, &registry, &cache, &[], opts).unwrap()
    }

    #[test]
    fn generates_new_library_file() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("WORKSPACE"), "");
        write(
            &tmp.path().join("BUILD.bazel"),
            "# gazelle:prefix example.com/hello\n",
        );
        write(&tmp.path().join("hello.go"), "package hello\n");

        run_in(tmp.path(), &DriverOptions::default());

        let content = fs::read_to_string(tmp.path().join("BUILD.bazel")).unwrap();
        assert!(content.contains("go_library("), "{content}");
        assert!(content.contains("name = \"hello\""), "{content}");
        assert!(content.contains("srcs = [\"hello.go\"]"), "{content}");
        assert!(
            content.contains("importpath = \"example.com/hello\""),
            "{content}"
        );
        assert!(
            content.contains("load(\"@io_bazel_rules_go//go:def.bzl\", \"go_library\")"),
            "{content}"
        );
    }

    #[test]
    fn fix_runs_are_idempotent() {
        let tmp = TempDir::new().unwrap();
        write(
            &tmp.path().join("BUILD.bazel"),
            "# gazelle:prefix example.com/hello\n",
        );
        write(&tmp.path().join("hello.go"), "package hello\n");
        write(&tmp.path().join("hello_test.go"), "package hello\n");

        run_in(tmp.path(), &DriverOptions::default());
        let once = fs::read_to_string(tmp.path().join("BUILD.bazel")).unwrap();
        run_in(tmp.path(), &DriverOptions::default());
        let twice = fs::read_to_string(tmp.path().join("BUILD.bazel")).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn diff_mode_leaves_files_alone() {
        let tmp = TempDir::new().unwrap();
        write(
            &tmp.path().join("BUILD.bazel"),
            "# gazelle:prefix example.com/hello\n",
        );
        write(&tmp.path().join("hello.go"), "package hello\n");

        let result = run_in(
            tmp.path(),
            &DriverOptions {
                mode: EmitMode::Diff,
                ..Default::default()
            },
        );
        assert!(result.diff_nonempty);
        let content = fs::read_to_string(tmp.path().join("BUILD.bazel")).unwrap();
        assert!(!content.contains("go_library"));
    }

    #[test]
    fn resolves_internal_dependency() {
        let tmp = TempDir::new().unwrap();
        write(
            &tmp.path().join("BUILD.bazel"),
            "# gazelle:prefix example.com/repo\n",
        );
        let a = tmp.path().join("a");
        fs::create_dir(&a).unwrap();
        write(&a.join("a.go"), "package a\n");
        let b = tmp.path().join("b");
        fs::create_dir(&b).unwrap();
        write(
            &b.join("b.go"),
            "package b\n\nimport \"example.com/repo/a\"\n\nvar _ = a.X\n",
        );

        run_in(tmp.path(), &DriverOptions::default());
        let content = fs::read_to_string(b.join("BUILD.bazel")).unwrap();
        assert!(content.contains("deps = [\"//a\"]"), "{content}");
    }

    #[test]
    fn update_repos_adds_go_repository() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("WORKSPACE"), "");
        let config = Config::new(tmp.path());
        let registry = LanguageRegistry::new();
        let cache = RemoteCache::new();
        run_update_repos(
            &config,
            &registry,
            &cache,
            &["github.com/pkg/errors".to_string()],
            &DriverOptions::default(),
        )
        .unwrap();
        let content = fs::read_to_string(tmp.path().join("WORKSPACE")).unwrap();
        assert!(content.contains("go_repository("), "{content}");
        assert!(content.contains("name = \"com_github_pkg_errors\""), "{content}");
        assert!(
            content.contains("importpath = \"github.com/pkg/errors\""),
            "{content}"
        );
    }
}
