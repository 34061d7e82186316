//! Go source inspection
//!
//! Extracts the facts rule generation needs from a single `.go` file: the
//! package clause, the import list, whether the file uses cgo (and its
//! `#cgo` options), `//go:embed` patterns, and the platform constraint
//! derived from the file name suffix and build constraint comments.
//!
//! Declarations come from the tree-sitter CST; build constraints and
//! embed patterns live in comments, which are scanned line-wise.

use std::collections::BTreeSet;

use tree_sitter::{Node, Parser};

use crate::error::{GazelleError, Result};
use crate::platform::{
    KNOWN_PLATFORMS, PlatformSet, classify_build_expr, eval_build_expr, eval_plus_build_line,
    known_arch, known_os,
};

/// A `#cgo` directive: compiler or linker options under an optional
/// build constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct CgoDirective {
    pub constraint: PlatformSet,
    /// True for LDFLAGS; false for CFLAGS, CPPFLAGS, CXXFLAGS.
    pub linker: bool,
    pub opts: Vec<String>,
}

/// Everything generation needs to know about one Go source file.
#[derive(Debug, Clone)]
pub struct GoFileInfo {
    pub name: String,
    pub package: String,
    pub imports: Vec<String>,
    pub is_test: bool,
    pub is_cgo: bool,
    pub cgo_directives: Vec<CgoDirective>,
    pub embeds: Vec<String>,
    pub platform: PlatformSet,
}

impl GoFileInfo {
    /// True when the file belongs to the external `foo_test` package.
    pub fn is_external_test(&self) -> bool {
        self.is_test && self.package.ends_with("_test")
    }
}

/// Parses Go sources with tree-sitter.
pub struct GoSourceParser {
    parser: Parser,
}

impl GoSourceParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let lang = tree_sitter_go::LANGUAGE;
        parser
            .set_language(&lang.into())
            .map_err(|e| GazelleError::Config {
                reason: format!("failed to load Go grammar: {e}"),
            })?;
        Ok(Self { parser })
    }

    /// Inspect one file's source text. `name` is the bare file name,
    /// used for the platform suffix and test detection.
    pub fn parse_source(&mut self, rel: &str, name: &str, code: &str) -> Result<GoFileInfo> {
        let tree = self
            .parser
            .parse(code, None)
            .ok_or_else(|| GazelleError::Generate {
                rel: rel.to_string(),
                reason: format!("{name}: tree-sitter could not parse file"),
            })?;
        let root = tree.root_node();

        let mut package = String::new();
        let mut package_row = usize::MAX;
        let mut imports = Vec::new();
        let mut is_cgo = false;
        let mut cgo_directives = Vec::new();

        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            match child.kind() {
                "package_clause" => {
                    let mut inner = child.walk();
                    for part in child.children(&mut inner) {
                        if part.kind() == "package_identifier" {
                            package = code[part.byte_range()].to_string();
                            package_row = child.start_position().row;
                        }
                    }
                }
                "import_declaration" => {
                    let before = imports.len();
                    collect_imports(child, code, &mut imports);
                    let has_c = imports[before..].iter().any(|i| i == "C");
                    if has_c {
                        is_cgo = true;
                        imports.retain(|i| i != "C");
                        collect_cgo_directives(child, code, &mut cgo_directives);
                    }
                }
                _ => {}
            }
        }

        if package.is_empty() {
            return Err(GazelleError::Generate {
                rel: rel.to_string(),
                reason: format!("{name}: no package clause"),
            });
        }

        let is_test = name.ends_with("_test.go");
        let constraint =
            build_constraint(code, package_row).intersect(&filename_constraint(name));
        let embeds = collect_embeds(code);

        Ok(GoFileInfo {
            name: name.to_string(),
            package,
            imports,
            is_test,
            is_cgo,
            cgo_directives,
            embeds,
            platform: constraint,
        })
    }
}

fn collect_imports(node: Node, code: &str, imports: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "import_spec" => {
                if let Some(path) = import_spec_path(child, code) {
                    imports.push(path);
                }
            }
            "import_spec_list" => {
                let mut inner = child.walk();
                for spec in child.children(&mut inner) {
                    if spec.kind() == "import_spec" {
                        if let Some(path) = import_spec_path(spec, code) {
                            imports.push(path);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn import_spec_path(node: Node, code: &str) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if matches!(
            child.kind(),
            "interpreted_string_literal" | "raw_string_literal"
        ) {
            let text = &code[child.byte_range()];
            return Some(text.trim_matches(|c| c == '"' || c == '`').to_string());
        }
    }
    None
}

/// The cgo preamble is the comment group immediately preceding the
/// `import "C"` declaration. `#cgo` lines inside it carry compiler and
/// linker options, optionally guarded by a build constraint.
fn collect_cgo_directives(import_node: Node, code: &str, out: &mut Vec<CgoDirective>) {
    let mut comments = Vec::new();
    let mut prev = import_node.prev_sibling();
    while let Some(node) = prev {
        if node.kind() != "comment" {
            break;
        }
        comments.push(code[node.byte_range()].to_string());
        prev = node.prev_sibling();
    }
    comments.reverse();
    for comment in comments {
        for line in comment.lines() {
            let line = line
                .trim_start()
                .trim_start_matches("//")
                .trim_start_matches("/*")
                .trim_end_matches("*/")
                .trim();
            if let Some(directive) = parse_cgo_line(line) {
                out.push(directive);
            }
        }
    }
}

fn parse_cgo_line(line: &str) -> Option<CgoDirective> {
    let rest = line.strip_prefix("#cgo")?;
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let key_pos = tokens.iter().position(|t| t.ends_with(':'))?;
    let key = tokens[key_pos].trim_end_matches(':');
    let linker = match key {
        "LDFLAGS" => true,
        "CFLAGS" | "CPPFLAGS" | "CXXFLAGS" | "FFLAGS" => false,
        _ => return None,
    };
    let opts: Vec<String> = tokens[key_pos + 1..].iter().map(|s| s.to_string()).collect();
    if opts.is_empty() {
        return None;
    }
    let constraint = if key_pos == 0 {
        PlatformSet::Any
    } else {
        let line = tokens[..key_pos].join(" ");
        let matches: BTreeSet<_> = KNOWN_PLATFORMS
            .iter()
            .copied()
            .filter(|(os, arch)| eval_plus_build_line(&line, os, arch))
            .collect();
        classify_build_expr(&matches)
    };
    Some(CgoDirective {
        constraint,
        linker,
        opts,
    })
}

/// Build constraint comments before the package clause. A `//go:build`
/// line wins over legacy `// +build` lines; multiple legacy lines AND
/// together.
fn build_constraint(code: &str, package_row: usize) -> PlatformSet {
    let mut go_build: Option<String> = None;
    let mut plus_build: Vec<String> = Vec::new();
    for (row, line) in code.lines().enumerate() {
        if row >= package_row {
            break;
        }
        let trimmed = line.trim();
        if let Some(expr) = trimmed.strip_prefix("//go:build ") {
            go_build = Some(expr.trim().to_string());
        } else if let Some(tags) = trimmed.strip_prefix("// +build ") {
            plus_build.push(tags.trim().to_string());
        } else if let Some(tags) = trimmed.strip_prefix("//+build ") {
            plus_build.push(tags.trim().to_string());
        }
    }
    if go_build.is_none() && plus_build.is_empty() {
        return PlatformSet::Any;
    }
    let matches: BTreeSet<_> = KNOWN_PLATFORMS
        .iter()
        .copied()
        .filter(|(os, arch)| match &go_build {
            Some(expr) => eval_build_expr(expr, os, arch),
            None => plus_build
                .iter()
                .all(|line| eval_plus_build_line(line, os, arch)),
        })
        .collect();
    classify_build_expr(&matches)
}

/// Platform constraint implied by the file name: `foo_linux.go`,
/// `foo_amd64.go`, `foo_linux_amd64.go`. The suffix only counts when it
/// follows an underscore-separated prefix, and `_test` is stripped first.
pub fn filename_constraint(name: &str) -> PlatformSet {
    let Some(stem) = name.strip_suffix(".go") else {
        return PlatformSet::Any;
    };
    let stem = stem.strip_suffix("_test").unwrap_or(stem);
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 2 {
        return PlatformSet::Any;
    }
    let last = parts[parts.len() - 1];
    if let Some(arch) = known_arch(last) {
        if parts.len() >= 3 {
            if let Some(os) = known_os(parts[parts.len() - 2]) {
                return PlatformSet::Platform(BTreeSet::from([(os, arch)]));
            }
        }
        return PlatformSet::arch(arch);
    }
    if let Some(os) = known_os(last) {
        return PlatformSet::os(os);
    }
    PlatformSet::Any
}

/// `//go:embed` patterns anywhere in the file: bare tokens, quoted, or
/// backquoted.
fn collect_embeds(code: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in code.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("//go:embed ") {
            out.extend(parse_embed_patterns(rest));
        }
    }
    out
}

fn parse_embed_patterns(rest: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = rest.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '"' | '`' => {
                let quote = c;
                chars.next();
                let mut pattern = String::new();
                for c in chars.by_ref() {
                    if c == quote {
                        break;
                    }
                    pattern.push(c);
                }
                out.push(pattern);
            }
            _ => {
                let mut pattern = String::new();
                while let Some(&c) = chars.peek() {
                    if c == ' ' || c == '\t' {
                        break;
                    }
                    pattern.push(c);
                    chars.next();
                }
                out.push(pattern);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(name: &str, code: &str) -> GoFileInfo {
        GoSourceParser::new()
            .unwrap()
            .parse_source("", name, code)
            .unwrap()
    }

    #[test]
    fn extracts_package_and_imports() {
        let info = parse(
            "hello.go",
            r#"package hello

import (
    "fmt"
    "example.com/foo/bar"
)

func Hello() { fmt.Println("hi") }
"#,
        );
        assert_eq!(info.package, "hello");
        assert_eq!(info.imports, vec!["fmt", "example.com/foo/bar"]);
        assert!(!info.is_test);
        assert!(!info.is_cgo);
    }

    #[test]
    fn single_import() {
        let info = parse("a.go", "package a\n\nimport \"fmt\"\n");
        assert_eq!(info.imports, vec!["fmt"]);
    }

    #[test]
    fn detects_cgo_with_options() {
        let info = parse(
            "cgo.go",
            r#"package cgo

// #cgo CFLAGS: -I/usr/include
// #cgo linux LDFLAGS: -lm
// #include <stdlib.h>
import "C"
"#,
        );
        assert!(info.is_cgo);
        assert!(!info.imports.contains(&"C".to_string()));
        assert_eq!(info.cgo_directives.len(), 2);
        assert!(!info.cgo_directives[0].linker);
        assert_eq!(info.cgo_directives[0].opts, vec!["-I/usr/include"]);
        assert!(info.cgo_directives[1].linker);
        assert_eq!(
            info.cgo_directives[1].constraint,
            PlatformSet::os("linux")
        );
    }

    #[test]
    fn test_files_and_external_packages() {
        let info = parse("a_test.go", "package a_test\n\nimport \"testing\"\n");
        assert!(info.is_test);
        assert!(info.is_external_test());

        let info = parse("b_test.go", "package a\n\nimport \"testing\"\n");
        assert!(info.is_test);
        assert!(!info.is_external_test());
    }

    #[test]
    fn filename_constraints() {
        assert_eq!(filename_constraint("foo.go"), PlatformSet::Any);
        assert_eq!(filename_constraint("linux.go"), PlatformSet::Any);
        assert_eq!(filename_constraint("foo_linux.go"), PlatformSet::os("linux"));
        assert_eq!(
            filename_constraint("foo_amd64.go"),
            PlatformSet::arch("amd64")
        );
        assert_eq!(
            filename_constraint("foo_linux_amd64.go"),
            PlatformSet::Platform(BTreeSet::from([("linux", "amd64")]))
        );
        assert_eq!(
            filename_constraint("foo_linux_test.go"),
            PlatformSet::os("linux")
        );
    }

    #[test]
    fn build_constraint_comments() {
        let info = parse(
            "a.go",
            "//go:build linux || darwin\n\npackage a\n",
        );
        assert_eq!(
            info.platform,
            PlatformSet::Os(BTreeSet::from(["darwin", "linux"]))
        );

        let info = parse("b.go", "// +build windows\n\npackage b\n");
        assert_eq!(info.platform, PlatformSet::os("windows"));
    }

    #[test]
    fn ignore_tag_matches_nothing() {
        let info = parse("gen.go", "//go:build ignore\n\npackage main\n");
        assert!(info.platform.is_empty());
    }

    #[test]
    fn embed_patterns() {
        let info = parse(
            "e.go",
            "package e\n\nimport \"embed\"\n\n//go:embed static/* \"with space\" `raw`\nvar fs embed.FS\n",
        );
        assert_eq!(info.embeds, vec!["static/*", "with space", "raw"]);
    }
}
