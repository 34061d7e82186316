//! Platform-partitioned string lists
//!
//! Go sources and their dependencies can be constrained to operating
//! systems and architectures through file name suffixes and build
//! constraint comments. Rather than manipulating `select` expressions
//! directly, the generator works with [`PlatformStrings`]: a generic list
//! plus per-OS, per-arch, and per-(OS, arch) overlays. The serializer
//! collapses the structure to a plain list when no overlays exist.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{Arg, CallExpr, Comments, Expr};

/// An (OS, arch) pair from the known port table.
pub type Platform = (&'static str, &'static str);

/// The supported Go port table. Files constrained to platforms outside
/// this table are preserved but collapse into no emitted case.
pub static KNOWN_PLATFORMS: &[Platform] = &[
    ("android", "386"),
    ("android", "amd64"),
    ("android", "arm"),
    ("android", "arm64"),
    ("darwin", "amd64"),
    ("darwin", "arm64"),
    ("dragonfly", "amd64"),
    ("freebsd", "386"),
    ("freebsd", "amd64"),
    ("freebsd", "arm"),
    ("linux", "386"),
    ("linux", "amd64"),
    ("linux", "arm"),
    ("linux", "arm64"),
    ("linux", "mips"),
    ("linux", "mips64"),
    ("linux", "mips64le"),
    ("linux", "mipsle"),
    ("linux", "ppc64"),
    ("linux", "ppc64le"),
    ("linux", "s390x"),
    ("netbsd", "386"),
    ("netbsd", "amd64"),
    ("netbsd", "arm"),
    ("openbsd", "386"),
    ("openbsd", "amd64"),
    ("openbsd", "arm"),
    ("plan9", "386"),
    ("plan9", "amd64"),
    ("plan9", "arm"),
    ("solaris", "amd64"),
    ("windows", "386"),
    ("windows", "amd64"),
];

/// OSes treated as unix-like by the `unix` build tag.
static UNIX_OS: &[&str] = &[
    "android",
    "darwin",
    "dragonfly",
    "freebsd",
    "linux",
    "netbsd",
    "openbsd",
    "solaris",
];

/// Look up an OS name in the port table, interning it.
pub fn known_os(name: &str) -> Option<&'static str> {
    KNOWN_PLATFORMS
        .iter()
        .find(|(os, _)| *os == name)
        .map(|(os, _)| *os)
}

/// Look up an architecture name in the port table, interning it.
pub fn known_arch(name: &str) -> Option<&'static str> {
    KNOWN_PLATFORMS
        .iter()
        .find(|(_, arch)| *arch == name)
        .map(|(_, arch)| *arch)
}

/// The set of platforms a constraint admits, kept in the most specific
/// shape that still distinguishes "OS only" from "arch only" so the
/// emitted select uses the coarsest condition labels possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformSet {
    /// No constraint: builds everywhere.
    Any,
    /// Constrained by OS only.
    Os(BTreeSet<&'static str>),
    /// Constrained by architecture only.
    Arch(BTreeSet<&'static str>),
    /// Constrained to specific (OS, arch) pairs.
    Platform(BTreeSet<Platform>),
}

impl PlatformSet {
    pub fn os(name: &'static str) -> Self {
        PlatformSet::Os(BTreeSet::from([name]))
    }

    pub fn arch(name: &'static str) -> Self {
        PlatformSet::Arch(BTreeSet::from([name]))
    }

    /// Expand to concrete (OS, arch) pairs from the port table.
    pub fn pairs(&self) -> BTreeSet<Platform> {
        match self {
            PlatformSet::Any => KNOWN_PLATFORMS.iter().copied().collect(),
            PlatformSet::Os(oses) => KNOWN_PLATFORMS
                .iter()
                .copied()
                .filter(|(os, _)| oses.contains(os))
                .collect(),
            PlatformSet::Arch(arches) => KNOWN_PLATFORMS
                .iter()
                .copied()
                .filter(|(_, arch)| arches.contains(arch))
                .collect(),
            PlatformSet::Platform(pairs) => pairs.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            PlatformSet::Any => false,
            PlatformSet::Os(s) => s.is_empty(),
            PlatformSet::Arch(s) => s.is_empty(),
            PlatformSet::Platform(s) => s.is_empty(),
        }
    }

    /// Intersect two constraints, preserving the coarsest shape that is
    /// still exact.
    pub fn intersect(&self, other: &PlatformSet) -> PlatformSet {
        match (self, other) {
            (PlatformSet::Any, _) => other.clone(),
            (_, PlatformSet::Any) => self.clone(),
            (PlatformSet::Os(a), PlatformSet::Os(b)) => {
                PlatformSet::Os(a.intersection(b).copied().collect())
            }
            (PlatformSet::Arch(a), PlatformSet::Arch(b)) => {
                PlatformSet::Arch(a.intersection(b).copied().collect())
            }
            _ => {
                let pairs: BTreeSet<Platform> =
                    self.pairs().intersection(&other.pairs()).copied().collect();
                PlatformSet::Platform(pairs)
            }
        }
    }
}

/// A generic string list plus platform overlays.
///
/// Invariant: a value appears in exactly one of the four partitions for a
/// given target (it may be tagged with several OSes inside the OS
/// partition).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlatformStrings {
    pub generic: Vec<String>,
    pub os: BTreeMap<&'static str, Vec<String>>,
    pub arch: BTreeMap<&'static str, Vec<String>>,
    pub platform: BTreeMap<Platform, Vec<String>>,
}

impl PlatformStrings {
    pub fn is_empty(&self) -> bool {
        self.generic.is_empty()
            && self.os.is_empty()
            && self.arch.is_empty()
            && self.platform.is_empty()
    }

    /// True when any value exists in any partition, including only
    /// platform-specific ones.
    pub fn has_values(&self) -> bool {
        !self.is_empty()
    }

    pub fn add(&mut self, value: impl Into<String>, set: &PlatformSet) {
        let value = value.into();
        match set {
            PlatformSet::Any => self.generic.push(value),
            PlatformSet::Os(oses) => {
                for os in oses {
                    self.os.entry(*os).or_default().push(value.clone());
                }
            }
            PlatformSet::Arch(arches) => {
                for arch in arches {
                    self.arch.entry(*arch).or_default().push(value.clone());
                }
            }
            PlatformSet::Platform(pairs) => {
                for pair in pairs {
                    self.platform.entry(*pair).or_default().push(value.clone());
                }
            }
        }
    }

    pub fn extend(&mut self, other: &PlatformStrings) {
        self.generic.extend(other.generic.iter().cloned());
        for (os, values) in &other.os {
            self.os.entry(*os).or_default().extend(values.iter().cloned());
        }
        for (arch, values) in &other.arch {
            self.arch
                .entry(*arch)
                .or_default()
                .extend(values.iter().cloned());
        }
        for (pair, values) in &other.platform {
            self.platform
                .entry(*pair)
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    /// Values across all partitions, deduplicated, in partition order.
    pub fn flat(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let mut push = |v: &String| {
            if seen.insert(v.clone()) {
                out.push(v.clone());
            }
        };
        self.generic.iter().for_each(&mut push);
        self.os.values().flatten().for_each(&mut push);
        self.arch.values().flatten().for_each(&mut push);
        self.platform.values().flatten().for_each(&mut push);
        out
    }

    /// Collapse to an expression: a plain sorted list when no overlays
    /// exist, otherwise `[generic] + select({cases, default})` with one
    /// case per applicable condition label. Reconstruction is
    /// deterministic: partitions iterate in sorted order.
    pub fn to_expr(&self) -> Expr {
        let mut generic: Vec<String> = self.generic.clone();
        generic.sort();
        generic.dedup();

        if self.os.is_empty() && self.arch.is_empty() && self.platform.is_empty() {
            return Expr::string_list(generic);
        }

        let mut entries: Vec<(Expr, Expr)> = Vec::new();
        for (os, values) in &self.os {
            entries.push((
                Expr::string(condition_label(os)),
                sorted_list(values),
            ));
        }
        for (arch, values) in &self.arch {
            entries.push((
                Expr::string(condition_label(arch)),
                sorted_list(values),
            ));
        }
        for ((os, arch), values) in &self.platform {
            entries.push((
                Expr::string(condition_label(&format!("{os}_{arch}"))),
                sorted_list(values),
            ));
        }
        entries.push((
            Expr::string("//conditions:default"),
            Expr::List(Vec::new()),
        ));

        let mut select = CallExpr::new("select");
        select.args.push(Arg {
            name: None,
            value: Expr::Dict(entries),
            comments: Comments::default(),
        });
        let select = Expr::Call(select);

        if generic.is_empty() {
            select
        } else {
            Expr::BinaryAdd(Box::new(Expr::string_list(generic)), Box::new(select))
        }
    }
}

/// The configuration condition label for an OS, arch, or `os_arch` tag.
pub fn condition_label(tag: &str) -> String {
    format!("@io_bazel_rules_go//go/platform:{tag}")
}

/// Evaluate a `//go:build` style constraint expression for one platform.
///
/// Grammar: `expr = or; or = and ('||' and)*; and = unary ('&&' unary)*;
/// unary = '!' unary | '(' expr ')' | ident`. Unknown tags evaluate to
/// false, which also excludes `ignore`-tagged files everywhere.
pub fn eval_build_expr(expr: &str, os: &str, arch: &str) -> bool {
    let tokens = tokenize_build_expr(expr);
    let mut pos = 0;
    let value = parse_or(&tokens, &mut pos, os, arch);
    value.unwrap_or(false)
}

/// Evaluate a legacy `// +build` line: space-separated options are ORed,
/// comma-separated terms within an option are ANDed, `!` negates.
pub fn eval_plus_build_line(line: &str, os: &str, arch: &str) -> bool {
    line.split_whitespace().any(|option| {
        option.split(',').all(|term| {
            let (negate, tag) = match term.strip_prefix('!') {
                Some(tag) => (true, tag),
                None => (false, term),
            };
            eval_tag(tag, os, arch) != negate
        })
    })
}

fn eval_tag(tag: &str, os: &str, arch: &str) -> bool {
    if tag == os || tag == arch {
        return true;
    }
    match tag {
        "unix" => UNIX_OS.contains(&os),
        "cgo" => true,
        _ => tag.starts_with("go1"),
    }
}

fn tokenize_build_expr(expr: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '(' | ')' | '!' => {
                tokens.push(c.to_string());
                chars.next();
            }
            '&' | '|' => {
                let mut op = String::new();
                op.push(c);
                chars.next();
                if chars.peek() == Some(&c) {
                    op.push(c);
                    chars.next();
                }
                tokens.push(op);
            }
            _ => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '.' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if ident.is_empty() {
                    chars.next();
                } else {
                    tokens.push(ident);
                }
            }
        }
    }
    tokens
}

fn parse_or(tokens: &[String], pos: &mut usize, os: &str, arch: &str) -> Option<bool> {
    let mut value = parse_and(tokens, pos, os, arch)?;
    while tokens.get(*pos).map(String::as_str) == Some("||") {
        *pos += 1;
        let rhs = parse_and(tokens, pos, os, arch)?;
        value = value || rhs;
    }
    Some(value)
}

fn parse_and(tokens: &[String], pos: &mut usize, os: &str, arch: &str) -> Option<bool> {
    let mut value = parse_unary(tokens, pos, os, arch)?;
    while tokens.get(*pos).map(String::as_str) == Some("&&") {
        *pos += 1;
        let rhs = parse_unary(tokens, pos, os, arch)?;
        value = value && rhs;
    }
    Some(value)
}

fn parse_unary(tokens: &[String], pos: &mut usize, os: &str, arch: &str) -> Option<bool> {
    match tokens.get(*pos).map(String::as_str) {
        Some("!") => {
            *pos += 1;
            Some(!parse_unary(tokens, pos, os, arch)?)
        }
        Some("(") => {
            *pos += 1;
            let value = parse_or(tokens, pos, os, arch)?;
            if tokens.get(*pos).map(String::as_str) != Some(")") {
                return None;
            }
            *pos += 1;
            Some(value)
        }
        Some(tag) => {
            let value = eval_tag(tag, os, arch);
            *pos += 1;
            Some(value)
        }
        None => None,
    }
}

/// Classify a constraint expression by evaluating it over the port table.
///
/// An expression satisfied everywhere is `Any`; one whose matches line up
/// exactly with whole OS columns (or whole arch rows) keeps the coarse
/// shape so a single condition label covers it.
pub fn classify_build_expr(matches: &BTreeSet<Platform>) -> PlatformSet {
    let all: BTreeSet<Platform> = KNOWN_PLATFORMS.iter().copied().collect();
    if *matches == all {
        return PlatformSet::Any;
    }
    let oses: BTreeSet<&'static str> = matches.iter().map(|(os, _)| *os).collect();
    let os_expansion: BTreeSet<Platform> = KNOWN_PLATFORMS
        .iter()
        .copied()
        .filter(|(os, _)| oses.contains(os))
        .collect();
    if os_expansion == *matches {
        return PlatformSet::Os(oses);
    }
    let arches: BTreeSet<&'static str> = matches.iter().map(|(_, arch)| *arch).collect();
    let arch_expansion: BTreeSet<Platform> = KNOWN_PLATFORMS
        .iter()
        .copied()
        .filter(|(_, arch)| arches.contains(arch))
        .collect();
    if arch_expansion == *matches {
        return PlatformSet::Arch(arches);
    }
    PlatformSet::Platform(matches.clone())
}

fn sorted_list(values: &[String]) -> Expr {
    let mut values = values.to_vec();
    values.sort();
    values.dedup();
    Expr::string_list(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_list_without_overlays() {
        let mut ps = PlatformStrings::default();
        ps.add("b.go", &PlatformSet::Any);
        ps.add("a.go", &PlatformSet::Any);
        let expr = ps.to_expr();
        let Expr::List(items) = expr else { panic!() };
        assert_eq!(items[0].as_string(), Some("a.go"));
        assert_eq!(items[1].as_string(), Some("b.go"));
    }

    #[test]
    fn select_with_os_overlay() {
        let mut ps = PlatformStrings::default();
        ps.add("common.go", &PlatformSet::Any);
        ps.add("linux.go", &PlatformSet::os("linux"));
        let expr = ps.to_expr();
        let Expr::BinaryAdd(lhs, rhs) = expr else {
            panic!()
        };
        assert!(matches!(*lhs, Expr::List(_)));
        assert!(rhs.is_select());
    }

    #[test]
    fn select_only_when_no_generic() {
        let mut ps = PlatformStrings::default();
        ps.add("linux.go", &PlatformSet::os("linux"));
        assert!(ps.to_expr().is_select());
    }

    #[test]
    fn eval_go_build_expressions() {
        assert!(eval_build_expr("linux", "linux", "amd64"));
        assert!(!eval_build_expr("linux", "darwin", "amd64"));
        assert!(eval_build_expr("linux && amd64", "linux", "amd64"));
        assert!(eval_build_expr("linux || darwin", "darwin", "arm64"));
        assert!(eval_build_expr("!windows", "linux", "amd64"));
        assert!(eval_build_expr("(linux || darwin) && !arm", "darwin", "amd64"));
        assert!(!eval_build_expr("ignore", "linux", "amd64"));
        assert!(eval_build_expr("unix", "darwin", "amd64"));
        assert!(!eval_build_expr("unix", "windows", "amd64"));
    }

    #[test]
    fn eval_plus_build_lines() {
        // space = OR, comma = AND
        assert!(eval_plus_build_line("linux darwin", "darwin", "amd64"));
        assert!(!eval_plus_build_line("linux,386", "linux", "amd64"));
        assert!(eval_plus_build_line("linux,amd64 darwin", "linux", "amd64"));
        assert!(eval_plus_build_line("!windows", "linux", "amd64"));
    }

    #[test]
    fn classify_os_shape() {
        let matches: BTreeSet<Platform> = KNOWN_PLATFORMS
            .iter()
            .copied()
            .filter(|(os, _)| *os == "linux")
            .collect();
        assert_eq!(
            classify_build_expr(&matches),
            PlatformSet::Os(BTreeSet::from(["linux"]))
        );
    }

    #[test]
    fn classify_pair_shape() {
        let matches = BTreeSet::from([("linux", "amd64")]);
        assert!(matches!(
            classify_build_expr(&matches),
            PlatformSet::Platform(_)
        ));
    }

    #[test]
    fn intersect_os_and_arch() {
        let set = PlatformSet::os("linux").intersect(&PlatformSet::arch("amd64"));
        assert_eq!(
            set,
            PlatformSet::Platform(BTreeSet::from([("linux", "amd64")]))
        );
    }

    #[test]
    fn condition_labels() {
        assert_eq!(
            condition_label("linux"),
            "@io_bazel_rules_go//go/platform:linux"
        );
    }
}
