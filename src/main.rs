//! CLI entry point for the build file generator.
//!
//! Subcommands: `fix` (default) and `update` run the generation pipeline
//! over the repository; `update-repos` resolves external import paths
//! into repository rules in the WORKSPACE file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::{
    Args, Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use tracing_subscriber::EnvFilter;

use gazelle::config::Config;
use gazelle::driver::{DriverOptions, EmitMode, RunResult, run, run_update_repos};
use gazelle::label::Label;
use gazelle::lang::LanguageRegistry;
use gazelle::remote::RemoteCache;

/// Exit status for diff mode when a non-empty diff was produced.
const DIFF_EXIT_CODE: u8 = 3;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser)]
#[command(
    name = "gazelle",
    version,
    about = "Generate and maintain build files for Go repositories",
    styles = clap_cargo_style()
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    common: CommonArgs,

    /// Directories to update; the whole repository by default
    dirs: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Update build files and apply all upgrades to deprecated rules
    Fix {
        #[command(flatten)]
        common: CommonArgs,

        /// Directories to update; the whole repository by default
        dirs: Vec<PathBuf>,
    },
    /// Update build files with safe rewrites only
    Update {
        #[command(flatten)]
        common: CommonArgs,

        /// Directories to update; the whole repository by default
        dirs: Vec<PathBuf>,
    },
    /// Add or update repository rules for external import paths
    #[command(name = "update-repos")]
    UpdateRepos {
        #[command(flatten)]
        common: CommonArgs,

        /// Import paths to add, e.g. github.com/pkg/errors
        #[arg(required = true)]
        imports: Vec<String>,
    },
}

#[derive(Args, Clone, Default)]
struct CommonArgs {
    /// Repository root; discovered from a WORKSPACE file by default
    #[arg(long, value_name = "DIR")]
    repo_root: Option<PathBuf>,

    /// What to do with updated files
    #[arg(long, value_enum, default_value = "fix")]
    mode: ModeArg,

    /// Comma-separated names to try for build files
    #[arg(long, value_name = "NAMES")]
    build_file_name: Option<String>,

    /// Go import path of the repository root
    #[arg(long, value_name = "PREFIX")]
    go_prefix: Option<String>,

    /// Promote warnings to fatal errors
    #[arg(long)]
    strict: bool,

    /// Disable library indexing and index-based resolution
    #[arg(long)]
    no_index: bool,

    /// Explicit import override: LANG IMPORT LABEL (repeatable)
    #[arg(long, num_args = 3, value_names = ["LANG", "IMPORT", "LABEL"], action = clap::ArgAction::Append)]
    resolve: Vec<String>,

    /// Comma-separated languages allowed to run
    #[arg(long, value_name = "CSV")]
    lang: Option<String>,

    /// In diff mode, write the patch to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    patch: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Copy, Default, PartialEq, Eq)]
enum ModeArg {
    #[default]
    Fix,
    Print,
    Diff,
}

impl From<ModeArg> for EmitMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Fix => EmitMode::Fix,
            ModeArg::Print => EmitMode::Print,
            ModeArg::Diff => EmitMode::Diff,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (common, dirs, run_fix, repos) = match cli.command {
        None => (cli.common, cli.dirs, false, None),
        Some(Command::Fix { common, dirs }) => (common, dirs, true, None),
        Some(Command::Update { common, dirs }) => (common, dirs, false, None),
        Some(Command::UpdateRepos { common, imports }) => (common, Vec::new(), false, Some(imports)),
    };

    match execute(&common, &dirs, run_fix, repos.as_deref()) {
        Ok(result) => {
            if result.diff_nonempty && common.mode == ModeArg::Diff {
                ExitCode::from(DIFF_EXIT_CODE)
            } else if result.error_count > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("gazelle: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(
    common: &CommonArgs,
    dirs: &[PathBuf],
    run_fix: bool,
    repos: Option<&[String]>,
) -> anyhow::Result<RunResult> {
    let repo_root = match &common.repo_root {
        Some(root) => root
            .canonicalize()
            .with_context(|| format!("bad --repo-root {}", root.display()))?,
        None => find_repo_root()?,
    };

    let mut config = Config::new(&repo_root);
    config.strict = common.strict;
    config.index_libraries = !common.no_index;
    if let Some(names) = &common.build_file_name {
        config.build_file_names = names
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if config.build_file_names.is_empty() {
            bail!("--build-file-name needs at least one name");
        }
    }
    if let Some(prefix) = &common.go_prefix {
        config.prefix = prefix.clone();
    }
    if let Some(langs) = &common.lang {
        config.langs = langs
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    // Flag overrides load before file directives, so a directive seen
    // later in the walk wins for its subtree.
    for chunk in common.resolve.chunks(3) {
        let [lang, imp, label] = chunk else {
            bail!("--resolve needs LANG IMPORT LABEL");
        };
        let label = Label::parse(label)
            .map_err(|e| anyhow::anyhow!("bad --resolve label {label:?}: {e}"))?;
        config.overrides.push(gazelle::config::ResolveOverride {
            lang: lang.clone(),
            dep_lang: lang.clone(),
            imp: imp.clone(),
            label,
        });
    }

    let update_rels = resolve_update_dirs(&repo_root, dirs)?;

    let opts = DriverOptions {
        mode: common.mode.into(),
        run_fix,
        patch_file: common.patch.clone(),
    };
    let registry = LanguageRegistry::new();
    let cache = RemoteCache::new();

    let result = match repos {
        Some(imports) => run_update_repos(&config, &registry, &cache, imports, &opts)?,
        None => run(&config, &registry, &cache, &update_rels, &opts)?,
    };
    if result.error_count > 0 {
        tracing::warn!("{} issue(s) reported", result.error_count);
    }
    Ok(result)
}

/// Search upward from the working directory for a WORKSPACE file.
fn find_repo_root() -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir().context("cannot read working directory")?;
    let mut dir = cwd.as_path();
    loop {
        if dir.join("WORKSPACE").is_file() || dir.join("WORKSPACE.bazel").is_file() {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => return Ok(cwd),
        }
    }
}

/// Convert directory arguments to slash paths relative to the root.
/// Arguments outside the repository are rejected.
fn resolve_update_dirs(repo_root: &Path, dirs: &[PathBuf]) -> anyhow::Result<Vec<String>> {
    let mut rels = Vec::new();
    for dir in dirs {
        let abs = if dir.is_absolute() {
            dir.clone()
        } else {
            std::env::current_dir()?.join(dir)
        };
        let abs = abs
            .canonicalize()
            .with_context(|| format!("no such directory: {}", dir.display()))?;
        let rel = abs.strip_prefix(repo_root).map_err(|_| {
            anyhow::anyhow!(
                "directory {} is outside the repository root {}",
                dir.display(),
                repo_root.display()
            )
        })?;
        rels.push(rel.to_string_lossy().replace('\\', "/"));
    }
    Ok(rels)
}
