//! Package model
//!
//! The walker condenses each directory into a [`Package`]: the logical Go
//! package with its sources grouped by target and platform, cgo options,
//! embed patterns, and any proto files. Language extensions turn packages
//! into rules.

mod gofile;
mod protofile;
pub mod walk;

use std::collections::BTreeSet;

pub use gofile::{CgoDirective, GoFileInfo, GoSourceParser, filename_constraint};
pub use protofile::{ProtoFileInfo, parse_proto_source};
pub use walk::{Visit, walk};

use crate::config::Config;
use crate::error::{GazelleError, Result};
use crate::platform::PlatformStrings;

/// Sources and imports for one generated Go rule.
#[derive(Debug, Clone, Default)]
pub struct GoTarget {
    pub srcs: PlatformStrings,
    pub imports: PlatformStrings,
}

impl GoTarget {
    pub fn has_srcs(&self) -> bool {
        self.srcs.has_values()
    }

    fn add_file(&mut self, info: &GoFileInfo) {
        self.srcs.add(&info.name, &info.platform);
        for imp in &info.imports {
            self.imports.add(imp, &info.platform);
        }
    }
}

/// Proto sources in a directory.
#[derive(Debug, Clone, Default)]
pub struct ProtoTarget {
    pub srcs: Vec<String>,
    pub imports: BTreeSet<String>,
    pub has_service: bool,
    pub go_package: Option<String>,
}

/// The logical package discovered in one directory.
#[derive(Debug, Clone)]
pub struct Package {
    /// Slash path from the repository root.
    pub rel: String,
    /// Go package name; "main" marks a command.
    pub name: String,
    pub import_path: String,
    pub library: GoTarget,
    /// Sources of a `main` package. Mutually exclusive with `library`.
    pub binary: GoTarget,
    pub test: GoTarget,
    pub xtest: GoTarget,
    pub proto: Option<ProtoTarget>,
    /// `//go:embed` patterns, platform-tagged.
    pub embeds: PlatformStrings,
    pub copts: PlatformStrings,
    pub clinkopts: PlatformStrings,
    pub cgo: bool,
    pub has_testdata: bool,
}

impl Package {
    /// Assemble a package from inspected sources. `dir_files` lists the
    /// remaining regular files in the directory, used to expand
    /// `//go:embed` patterns. A directory with conflicting Go package
    /// names yields an error and no package.
    pub fn build(
        rel: &str,
        config: &Config,
        go_files: Vec<GoFileInfo>,
        proto_files: Vec<ProtoFileInfo>,
        has_testdata: bool,
        dir_files: &[String],
    ) -> Result<Option<Package>> {
        let proto = build_proto_target(&proto_files);
        if go_files.is_empty() && proto.is_none() {
            return Ok(None);
        }

        // Non-test files must agree on one package name.
        let lib_names: BTreeSet<&str> = go_files
            .iter()
            .filter(|f| !f.is_test)
            .map(|f| f.package.as_str())
            .collect();
        if lib_names.len() > 1 {
            let names: Vec<&str> = lib_names.into_iter().collect();
            return Err(GazelleError::Generate {
                rel: rel.to_string(),
                reason: format!(
                    "multiple Go package names in one directory: {}",
                    names.join(", ")
                ),
            });
        }
        let name = lib_names
            .into_iter()
            .next()
            .map(str::to_string)
            .or_else(|| {
                go_files
                    .iter()
                    .filter(|f| f.is_test)
                    .map(|f| f.package.trim_end_matches("_test").to_string())
                    .next()
            })
            .unwrap_or_default();

        let import_path = proto
            .as_ref()
            .and_then(|p| p.go_package.clone())
            .unwrap_or_else(|| config.import_path_for(rel));

        let mut pkg = Package {
            rel: rel.to_string(),
            name,
            import_path,
            library: GoTarget::default(),
            binary: GoTarget::default(),
            test: GoTarget::default(),
            xtest: GoTarget::default(),
            proto,
            embeds: PlatformStrings::default(),
            copts: PlatformStrings::default(),
            clinkopts: PlatformStrings::default(),
            cgo: false,
            has_testdata,
        };

        let is_command = pkg.name == "main";
        for info in &go_files {
            let target = if info.is_test {
                if info.is_external_test() {
                    &mut pkg.xtest
                } else {
                    &mut pkg.test
                }
            } else if is_command {
                &mut pkg.binary
            } else {
                &mut pkg.library
            };
            target.add_file(info);

            if info.is_cgo {
                pkg.cgo = true;
            }
            for directive in &info.cgo_directives {
                let constraint = directive.constraint.intersect(&info.platform);
                let bucket = if directive.linker {
                    &mut pkg.clinkopts
                } else {
                    &mut pkg.copts
                };
                for opt in &directive.opts {
                    bucket.add(opt, &constraint);
                }
            }
            for pattern in &info.embeds {
                for matched in expand_embed_pattern(pattern, dir_files) {
                    pkg.embeds.add(matched, &info.platform);
                }
            }
        }

        Ok(Some(pkg))
    }

    /// Sources of the production rule, whether library or command.
    pub fn main_target(&self) -> &GoTarget {
        if self.binary.has_srcs() {
            &self.binary
        } else {
            &self.library
        }
    }

    pub fn is_command(&self) -> bool {
        self.name == "main" && self.binary.has_srcs()
    }

    pub fn has_go(&self) -> bool {
        self.library.has_srcs()
            || self.binary.has_srcs()
            || self.test.has_srcs()
            || self.xtest.has_srcs()
    }
}

/// Expand one embed pattern against the directory's files. Patterns that
/// reach into subdirectories pass through verbatim; patterns matching
/// nothing locally do too, so nothing silently disappears.
fn expand_embed_pattern(pattern: &str, dir_files: &[String]) -> Vec<String> {
    if pattern.contains('/') {
        return vec![pattern.to_string()];
    }
    let matched: Vec<String> = dir_files
        .iter()
        .filter(|f| glob_match(pattern, f))
        .cloned()
        .collect();
    if matched.is_empty() {
        vec![pattern.to_string()]
    } else {
        matched
    }
}

/// Minimal glob: `*` matches any run of characters, `?` matches one.
fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&p[1..], &n[1..]),
            (Some(a), Some(b)) if a == b => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

fn build_proto_target(proto_files: &[ProtoFileInfo]) -> Option<ProtoTarget> {
    if proto_files.is_empty() {
        return None;
    }
    let mut target = ProtoTarget::default();
    for info in proto_files {
        target.srcs.push(info.name.clone());
        target.imports.extend(info.imports.iter().cloned());
        target.has_service |= info.has_service;
        if target.go_package.is_none() {
            target.go_package = info.go_package.clone();
        }
    }
    target.srcs.sort();
    Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformSet;

    fn go_file(name: &str, package: &str, imports: &[&str]) -> GoFileInfo {
        GoFileInfo {
            name: name.to_string(),
            package: package.to_string(),
            imports: imports.iter().map(|s| s.to_string()).collect(),
            is_test: name.ends_with("_test.go"),
            is_cgo: false,
            cgo_directives: Vec::new(),
            embeds: Vec::new(),
            platform: PlatformSet::Any,
        }
    }

    #[test]
    fn builds_library_package() {
        let config = Config::new("/repo");
        let pkg = Package::build(
            "hello",
            &config,
            vec![go_file("hello.go", "hello", &["fmt"])],
            vec![],
            false,
            &[],
        )
        .unwrap()
        .unwrap();
        assert_eq!(pkg.name, "hello");
        assert!(pkg.library.has_srcs());
        assert!(!pkg.is_command());
    }

    #[test]
    fn main_package_is_a_command() {
        let config = Config::new("/repo");
        let pkg = Package::build(
            "cmd/tool",
            &config,
            vec![go_file("main.go", "main", &[])],
            vec![],
            false,
            &[],
        )
        .unwrap()
        .unwrap();
        assert!(pkg.is_command());
        assert!(pkg.binary.has_srcs());
        assert!(!pkg.library.has_srcs());
    }

    #[test]
    fn conflicting_package_names_error() {
        let config = Config::new("/repo");
        let err = Package::build(
            "bad",
            &config,
            vec![go_file("a.go", "alpha", &[]), go_file("b.go", "beta", &[])],
            vec![],
            false,
            &[],
        );
        assert!(matches!(err, Err(GazelleError::Generate { .. })));
    }

    #[test]
    fn test_files_partition() {
        let config = Config::new("/repo");
        let pkg = Package::build(
            "p",
            &config,
            vec![
                go_file("p.go", "p", &[]),
                go_file("p_test.go", "p", &["testing"]),
                go_file("px_test.go", "p_test", &["testing"]),
            ],
            vec![],
            true,
            &[],
        )
        .unwrap()
        .unwrap();
        assert!(pkg.test.has_srcs());
        assert!(pkg.xtest.has_srcs());
        assert!(pkg.has_testdata);
    }

    #[test]
    fn proto_go_package_sets_import_path() {
        let config = Config::new("/repo");
        let pkg = Package::build(
            "p",
            &config,
            vec![],
            vec![ProtoFileInfo {
                name: "p.proto".to_string(),
                package: Some("p".to_string()),
                go_package: Some("example.com/repo/p".to_string()),
                imports: vec![],
                has_service: false,
            }],
            false,
            &[],
        )
        .unwrap()
        .unwrap();
        assert_eq!(pkg.import_path, "example.com/repo/p");
    }
}
