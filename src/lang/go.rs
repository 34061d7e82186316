//! Go language extension
//!
//! Generates `go_library`, `go_binary`, and `go_test` rules from a
//! package, plus `go_proto_library` when the package carries protos, and
//! resolves Go import paths to labels through the override table, the
//! rule index, and the remote module cache.

use crate::ast::File;
use crate::config::{Config, NamingConvention, ProtoMode};
use crate::error::GazelleError;
use crate::index::{ImportSpec, RuleIndex, RuleSnapshot};
use crate::label::Label;
use crate::pkg::Package;
use crate::platform::PlatformStrings;
use crate::remote::RemoteCache;
use crate::rule::{Rule, RuleImports};

use super::{GenerateResult, KindInfo, Language, LoadInfo};

pub const GO_DEF_BZL: &str = "@io_bazel_rules_go//go:def.bzl";
pub const GO_PROTO_DEF_BZL: &str = "@io_bazel_rules_go//proto:def.bzl";
pub const GAZELLE_DEPS_BZL: &str = "@bazel_gazelle//:deps.bzl";

const GO_PROTO_COMPILER: &str = "@io_bazel_rules_go//proto:go_proto";
const GO_GRPC_COMPILER: &str = "@io_bazel_rules_go//proto:go_grpc";

static KINDS: &[KindInfo] = &[
    KindInfo {
        kind: "go_library",
        match_attrs: &["importpath"],
        mergeable_attrs: &[
            "srcs",
            "embed",
            "embedsrcs",
            "cgo",
            "copts",
            "clinkopts",
            "importpath",
            "visibility",
        ],
        resolve_attrs: &["deps"],
        nonempty_attrs: &["srcs", "embed"],
    },
    KindInfo {
        kind: "go_binary",
        match_attrs: &[],
        mergeable_attrs: &["srcs", "embed", "embedsrcs", "cgo", "copts", "clinkopts", "visibility"],
        resolve_attrs: &["deps"],
        nonempty_attrs: &["srcs", "embed"],
    },
    KindInfo {
        kind: "go_test",
        match_attrs: &[],
        mergeable_attrs: &["srcs", "embed", "embedsrcs", "cgo", "copts", "clinkopts", "data"],
        resolve_attrs: &["deps"],
        nonempty_attrs: &["srcs", "embed"],
    },
    KindInfo {
        kind: "go_proto_library",
        match_attrs: &["importpath"],
        mergeable_attrs: &["proto", "protos", "compilers", "importpath", "visibility"],
        resolve_attrs: &["deps"],
        nonempty_attrs: &["proto", "protos"],
    },
    KindInfo {
        kind: "go_repository",
        match_attrs: &["importpath"],
        mergeable_attrs: &["commit", "importpath", "remote", "replace", "sum", "tag", "vcs", "version"],
        resolve_attrs: &[],
        nonempty_attrs: &["importpath"],
    },
];

static LOADS: &[LoadInfo] = &[
    LoadInfo {
        file: GO_DEF_BZL,
        symbols: &["go_library", "go_binary", "go_test"],
    },
    LoadInfo {
        file: GO_PROTO_DEF_BZL,
        symbols: &["go_proto_library"],
    },
    LoadInfo {
        file: GAZELLE_DEPS_BZL,
        symbols: &["go_repository"],
    },
];

pub struct GoLanguage;

impl GoLanguage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GoLanguage {
    fn default() -> Self {
        Self::new()
    }
}

impl Language for GoLanguage {
    fn name(&self) -> &'static str {
        "go"
    }

    fn kinds(&self) -> &'static [KindInfo] {
        KINDS
    }

    fn loads(&self) -> &'static [LoadInfo] {
        LOADS
    }

    fn directives(&self) -> &'static [&'static str] {
        &["go_naming_convention", "go_generate_proto"]
    }

    fn configure(&self, config: &mut Config, _rel: &str, file: Option<&File>) {
        let Some(file) = file else { return };
        for directive in file.directives() {
            match directive.key.as_str() {
                "go_naming_convention" => match directive.value.as_str() {
                    "import" => config.go.naming_convention = NamingConvention::Import,
                    "go_default_library" => {
                        config.go.naming_convention = NamingConvention::GoDefaultLibrary;
                    }
                    other => {
                        tracing::warn!("unknown go_naming_convention {other:?}; keeping current");
                    }
                },
                "go_generate_proto" => {
                    config.go.generate_proto = directive.value != "false";
                }
                _ => {}
            }
        }
    }

    fn generate(&self, config: &Config, pkg: &Package) -> GenerateResult {
        let mut result = GenerateResult::default();
        let names = RuleNames::for_package(config, pkg);
        let visibility = default_visibility(&pkg.rel);

        let proto = if config.go.generate_proto
            && matches!(config.proto_mode, ProtoMode::Default | ProtoMode::Package)
        {
            pkg.proto.as_ref()
        } else {
            None
        };
        let generate_proto = proto.is_some();

        // go_proto_library wrapping the proto_library generated alongside.
        if let Some(proto) = proto {
            let mut rule = Rule::new("go_proto_library", &names.go_proto);
            let compiler = if proto.has_service {
                GO_GRPC_COMPILER
            } else {
                GO_PROTO_COMPILER
            };
            rule.set_attr("compilers", vec![compiler]);
            rule.set_attr("importpath", pkg.import_path.clone());
            rule.set_attr("proto", format!(":{}", names.proto));
            rule.set_attr("visibility", vec![visibility.clone()]);
            let mut imports = PlatformStrings::default();
            for imp in &proto.imports {
                imports.add(imp, &crate::platform::PlatformSet::Any);
            }
            rule.set_imports(RuleImports::new("proto", imports));
            result.rules.push(rule);
        } else {
            result
                .empty
                .push(Rule::new("go_proto_library", &names.go_proto));
        }

        // The source-holding library. A command package keeps its sources
        // here too; the binary embeds it.
        let main = pkg.main_target();
        let has_library = main.has_srcs() || generate_proto;
        if has_library {
            let mut rule = Rule::new("go_library", &names.library);
            if main.has_srcs() {
                rule.set_attr("srcs", &main.srcs);
            }
            if !pkg.embeds.is_empty() {
                rule.set_attr("embedsrcs", &pkg.embeds);
            }
            if pkg.cgo {
                rule.set_attr("cgo", true);
                if !pkg.copts.is_empty() {
                    rule.set_attr("copts", &pkg.copts);
                }
                if !pkg.clinkopts.is_empty() {
                    rule.set_attr("clinkopts", &pkg.clinkopts);
                }
            }
            if generate_proto {
                rule.set_attr("embed", vec![format!(":{}", names.go_proto)]);
            }
            rule.set_attr("importpath", pkg.import_path.clone());
            rule.set_attr("visibility", vec![visibility.clone()]);
            rule.set_imports(RuleImports::new("go", main.imports.clone()));
            result.rules.push(rule);
        } else {
            result.empty.push(Rule::new("go_library", &names.library));
        }

        if pkg.is_command() {
            let mut rule = Rule::new("go_binary", &names.binary);
            rule.set_attr("embed", vec![format!(":{}", names.library)]);
            rule.set_attr("visibility", vec!["//visibility:public".to_string()]);
            result.rules.push(rule);
        } else {
            result.empty.push(Rule::new("go_binary", &names.binary));
        }

        for (target, name, internal) in [
            (&pkg.test, &names.test, true),
            (&pkg.xtest, &names.xtest, false),
        ] {
            if target.has_srcs() {
                let mut rule = Rule::new("go_test", name);
                rule.set_attr("srcs", &target.srcs);
                if internal && has_library {
                    rule.set_attr("embed", vec![format!(":{}", names.library)]);
                }
                if pkg.has_testdata {
                    rule.set_attr("data", testdata_glob());
                }
                rule.set_imports(RuleImports::new("go", target.imports.clone()));
                result.rules.push(rule);
            } else {
                result.empty.push(Rule::new("go_test", name));
            }
        }

        result
    }

    fn index_specs(
        &self,
        _config: &Config,
        _rel: &str,
        snapshot: &RuleSnapshot,
    ) -> Option<Vec<ImportSpec>> {
        match snapshot.kind.as_str() {
            "go_library" | "go_proto_library" => Some(
                snapshot
                    .importpath
                    .iter()
                    .map(|p| ImportSpec::new("go", p.clone()))
                    .collect(),
            ),
            _ => None,
        }
    }

    fn resolve(
        &self,
        config: &Config,
        index: &RuleIndex,
        cache: &RemoteCache,
        imports: &RuleImports,
        from: &Label,
    ) -> (PlatformStrings, Vec<GazelleError>) {
        let mut resolver = GoResolver {
            config,
            index,
            cache,
            from,
            errors: Vec::new(),
        };
        let deps = match imports.lang {
            "proto" => resolver.map_imports(&imports.imports, GoResolver::resolve_proto_dep),
            _ => resolver.map_imports(&imports.imports, GoResolver::resolve_go_import),
        };
        (deps, resolver.errors)
    }
}

struct GoResolver<'a> {
    config: &'a Config,
    index: &'a RuleIndex,
    cache: &'a RemoteCache,
    from: &'a Label,
    errors: Vec<GazelleError>,
}

impl GoResolver<'_> {
    fn map_imports(
        &mut self,
        imports: &PlatformStrings,
        f: fn(&mut Self, &str) -> Option<Label>,
    ) -> PlatformStrings {
        let mut out = PlatformStrings::default();
        for imp in &imports.generic {
            if let Some(label) = f(self, imp) {
                out.generic.push(label.to_string());
            }
        }
        for (os, values) in &imports.os {
            for imp in values {
                if let Some(label) = f(self, imp) {
                    out.os.entry(*os).or_default().push(label.to_string());
                }
            }
        }
        for (arch, values) in &imports.arch {
            for imp in values {
                if let Some(label) = f(self, imp) {
                    out.arch.entry(*arch).or_default().push(label.to_string());
                }
            }
        }
        for (pair, values) in &imports.platform {
            for imp in values {
                if let Some(label) = f(self, imp) {
                    out.platform
                        .entry(*pair)
                        .or_default()
                        .push(label.to_string());
                }
            }
        }
        out
    }

    /// One Go import path to a dependency label: override table, rule
    /// index, then the remote cache. Standard library imports resolve to
    /// nothing.
    fn resolve_go_import(&mut self, imp: &str) -> Option<Label> {
        if is_standard(imp) {
            return None;
        }
        if let Some(label) = self.config.resolve_override("go", "go", imp) {
            return Some(label);
        }
        if self.config.index_libraries {
            match self
                .index
                .find_by_import(&ImportSpec::new("go", imp), self.from)
            {
                Ok(Some(entry)) => return Some(entry.label.clone()),
                Ok(None) => {}
                Err(err) => {
                    self.errors.push(err);
                    return None;
                }
            }
        }
        // Inside the repository prefix the label follows from the path,
        // which also covers runs with indexing turned off.
        if !self.config.prefix.is_empty() {
            if let Some(sub) = strip_import_prefix(imp, &self.config.prefix) {
                let pkg = if self.config.prefix_rel.is_empty() {
                    sub.to_string()
                } else if sub.is_empty() {
                    self.config.prefix_rel.clone()
                } else {
                    format!("{}/{}", self.config.prefix_rel, sub)
                };
                let name = match self.config.go.naming_convention {
                    NamingConvention::GoDefaultLibrary => "go_default_library".to_string(),
                    NamingConvention::Import => package_base_name(self.config, &pkg),
                };
                return Some(Label::new(pkg, name));
            }
        }
        match self.cache.root(imp) {
            Ok(root) => {
                let sub = imp
                    .strip_prefix(&root.prefix)
                    .unwrap_or("")
                    .trim_start_matches('/');
                let name = if sub.is_empty() {
                    root.prefix.rsplit('/').next().unwrap_or(&root.prefix)
                } else {
                    sub.rsplit('/').next().unwrap_or(sub)
                };
                Some(Label::external(root.repo_name, sub, name))
            }
            Err(reason) => {
                tracing::debug!("remote lookup for {imp:?} failed: {reason}");
                self.errors.push(GazelleError::Resolve {
                    lang: "go",
                    imp: imp.to_string(),
                    from: self.from.to_string(),
                });
                None
            }
        }
    }

    /// A proto import to the sibling go_proto_library of the
    /// proto_library providing it. Well-known types are compiled in by
    /// the proto compilers and resolve to nothing.
    fn resolve_proto_dep(&mut self, imp: &str) -> Option<Label> {
        if super::proto::is_well_known(imp) {
            return None;
        }
        if let Some(label) = self.config.resolve_override("go", "proto", imp) {
            return Some(label);
        }
        match self
            .index
            .find_by_import(&ImportSpec::new("proto", imp), self.from)
        {
            Ok(Some(entry)) => {
                let name = entry
                    .label
                    .name
                    .strip_suffix("_proto")
                    .map(|base| format!("{base}_go_proto"))
                    .unwrap_or_else(|| format!("{}_go_proto", entry.label.name));
                Some(Label::new(entry.label.pkg.clone(), name))
            }
            Ok(None) => {
                self.errors.push(GazelleError::Resolve {
                    lang: "proto",
                    imp: imp.to_string(),
                    from: self.from.to_string(),
                });
                None
            }
            Err(err) => {
                self.errors.push(err);
                None
            }
        }
    }
}

/// Standard library heuristic: the first path component of a stdlib
/// import carries no dot (`fmt`, `net/http`).
pub fn is_standard(imp: &str) -> bool {
    !imp.split('/').next().unwrap_or(imp).contains('.')
}

/// The sub-path of `imp` under `prefix`, if `imp` is inside it.
fn strip_import_prefix<'a>(imp: &'a str, prefix: &str) -> Option<&'a str> {
    if imp == prefix {
        return Some("");
    }
    imp.strip_prefix(prefix)?.strip_prefix('/')
}

/// Rule names for one package under the active naming convention.
struct RuleNames {
    library: String,
    binary: String,
    test: String,
    xtest: String,
    proto: String,
    go_proto: String,
}

impl RuleNames {
    fn for_package(config: &Config, pkg: &Package) -> Self {
        let base = package_base_name(config, &pkg.rel);
        match config.go.naming_convention {
            NamingConvention::Import => Self {
                library: if pkg.is_command() {
                    format!("{base}_lib")
                } else {
                    base.clone()
                },
                binary: base.clone(),
                test: format!("{base}_test"),
                xtest: format!("{base}_xtest"),
                proto: format!("{base}_proto"),
                go_proto: format!("{base}_go_proto"),
            },
            NamingConvention::GoDefaultLibrary => Self {
                library: "go_default_library".to_string(),
                binary: base.clone(),
                test: "go_default_test".to_string(),
                xtest: "go_default_xtest".to_string(),
                proto: format!("{base}_proto"),
                go_proto: format!("{base}_go_proto"),
            },
        }
    }
}

/// The name stem for rules in a directory: the directory base name, or
/// the last prefix component at the repository root.
pub fn package_base_name(config: &Config, rel: &str) -> String {
    if rel.is_empty() {
        let base = config.prefix.rsplit('/').next().unwrap_or("");
        if base.is_empty() {
            "root".to_string()
        } else {
            base.to_string()
        }
    } else {
        rel.rsplit('/').next().unwrap_or(rel).to_string()
    }
}

/// Public visibility, narrowed to the enclosing tree for packages under
/// an `internal` directory.
pub fn default_visibility(rel: &str) -> String {
    let segments: Vec<&str> = rel.split('/').collect();
    if let Some(idx) = segments.iter().rposition(|s| *s == "internal") {
        let parent = segments[..idx].join("/");
        format!("//{parent}:__subpackages__")
    } else {
        "//visibility:public".to_string()
    }
}

fn testdata_glob() -> crate::ast::Expr {
    use crate::ast::{Arg, CallExpr, Comments, Expr};
    let mut call = CallExpr::new("glob");
    call.args.push(Arg {
        name: None,
        value: Expr::string_list(["testdata/**"]),
        comments: Comments::default(),
    });
    Expr::Call(call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::GoFileInfo;
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

    fn library_package(config: &Config, rel: &str) -> Package {
        Package::build(
            rel,
            config,
            vec![go_file("a.go", "a", &["fmt", "example.com/dep"])],
            vec![],
            false,
            &[],
        )
        .unwrap()
        .unwrap()
    }

    #[test]
    fn generates_library_rule() {
        let mut config = Config::new("/repo");
        config.prefix = "example.com/hello".to_string();
        let pkg = library_package(&config, "a");
        let result = GoLanguage::new().generate(&config, &pkg);
        let lib = result
            .rules
            .iter()
            .find(|r| r.kind() == "go_library")
            .unwrap();
        assert_eq!(lib.name(), "a");
        assert_eq!(lib.attr_strings("srcs"), vec!["a.go"]);
        assert_eq!(
            lib.attr("importpath").and_then(|e| e.as_string()),
            Some("example.com/hello/a")
        );
        assert_eq!(
            lib.attr_strings("visibility"),
            vec!["//visibility:public"]
        );
        let imports = lib.imports().unwrap();
        assert_eq!(imports.lang, "go");
    }

    #[test]
    fn root_library_named_after_prefix() {
        let mut config = Config::new("/repo");
        config.prefix = "example.com/hello".to_string();
        let pkg = Package::build(
            "",
            &config,
            vec![go_file("hello.go", "hello", &[])],
            vec![],
            false,
            &[],
        )
        .unwrap()
        .unwrap();
        let result = GoLanguage::new().generate(&config, &pkg);
        let lib = result
            .rules
            .iter()
            .find(|r| r.kind() == "go_library")
            .unwrap();
        assert_eq!(lib.name(), "hello");
    }

    #[test]
    fn command_gets_binary_embedding_lib() {
        let mut config = Config::new("/repo");
        config.prefix = "example.com/repo".to_string();
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
        let result = GoLanguage::new().generate(&config, &pkg);
        let lib = result
            .rules
            .iter()
            .find(|r| r.kind() == "go_library")
            .unwrap();
        assert_eq!(lib.name(), "tool_lib");
        let bin = result
            .rules
            .iter()
            .find(|r| r.kind() == "go_binary")
            .unwrap();
        assert_eq!(bin.name(), "tool");
        assert_eq!(bin.attr_strings("embed"), vec![":tool_lib"]);
    }

    #[test]
    fn legacy_naming_convention() {
        let mut config = Config::new("/repo");
        config.go.naming_convention = NamingConvention::GoDefaultLibrary;
        let pkg = library_package(&config, "a");
        let result = GoLanguage::new().generate(&config, &pkg);
        let lib = result
            .rules
            .iter()
            .find(|r| r.kind() == "go_library")
            .unwrap();
        assert_eq!(lib.name(), "go_default_library");
    }

    #[test]
    fn internal_visibility() {
        assert_eq!(default_visibility("a/b"), "//visibility:public");
        assert_eq!(
            default_visibility("internal/x"),
            "//:__subpackages__"
        );
        assert_eq!(
            default_visibility("a/internal/x"),
            "//a:__subpackages__"
        );
    }

    #[test]
    fn stdlib_heuristic() {
        assert!(is_standard("fmt"));
        assert!(is_standard("net/http"));
        assert!(!is_standard("example.com/x"));
        assert!(!is_standard("github.com/pkg/errors"));
    }

    #[test]
    fn empty_markers_for_absent_targets() {
        let config = Config::new("/repo");
        let pkg = library_package(&config, "a");
        let result = GoLanguage::new().generate(&config, &pkg);
        let empty_kinds: Vec<&str> = result.empty.iter().map(|r| r.kind()).collect();
        assert!(empty_kinds.contains(&"go_binary"));
        assert!(empty_kinds.contains(&"go_test"));
        assert!(empty_kinds.contains(&"go_proto_library"));
    }
}
