//! Build file AST
//!
//! Parses the declarative build dialect into an editable tree and
//! re-serializes it deterministically. The parser recognizes calls with
//! positional and keyword arguments, string and integer literals, lists,
//! dicts, `select(...)`, and binary `+` concatenation. Anything else is
//! preserved verbatim as an opaque statement so unknown syntax survives a
//! rewrite untouched.
//!
//! Comments attach to the statement, argument, or list element they
//! annotate. Two comment forms carry meaning: `# keep` freezes the
//! annotated node against automated edits, and `# gazelle:<key> <value>`
//! carries configuration directives.

mod parse;
mod print;

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Comments attached to a statement, argument, or list element.
///
/// `before` holds full-line comments above the node; `suffix` holds
/// comments on the same line after it. Text is stored with the leading
/// `#` included, exactly as authored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Comments {
    pub before: Vec<String>,
    pub suffix: Vec<String>,
}

impl Comments {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.suffix.is_empty()
    }

    /// True when any attached comment is a `# keep` annotation (or its
    /// directive spelling).
    pub fn has_keep(&self) -> bool {
        self.before
            .iter()
            .chain(self.suffix.iter())
            .any(|c| {
                let text = comment_text(c);
                text == "keep" || text == "gazelle:keep"
            })
    }
}

/// The comment body with the `#` marker and surrounding space removed.
pub fn comment_text(comment: &str) -> &str {
    comment.trim_start_matches('#').trim()
}

/// A string literal, the only expression kind that carries its own
/// comments: `# keep` on an individual list element attaches here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringExpr {
    pub value: String,
    pub comments: Comments,
}

impl StringExpr {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            comments: Comments::default(),
        }
    }
}

/// A call expression: rule invocations and `select(...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub name: String,
    pub args: Vec<Arg>,
}

impl CallExpr {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(&self, name: &str) -> Option<&Expr> {
        self.args
            .iter()
            .find(|a| a.name.as_deref() == Some(name))
            .map(|a| &a.value)
    }

    pub fn arg_entry(&self, name: &str) -> Option<&Arg> {
        self.args.iter().find(|a| a.name.as_deref() == Some(name))
    }

    pub fn arg_entry_mut(&mut self, name: &str) -> Option<&mut Arg> {
        self.args
            .iter_mut()
            .find(|a| a.name.as_deref() == Some(name))
    }

    pub fn set_arg(&mut self, name: &str, value: Expr) {
        match self.arg_entry_mut(name) {
            Some(arg) => arg.value = value,
            None => self.args.push(Arg {
                name: Some(name.to_string()),
                value,
                comments: Comments::default(),
            }),
        }
    }

    pub fn del_arg(&mut self, name: &str) -> bool {
        let before = self.args.len();
        self.args.retain(|a| a.name.as_deref() != Some(name));
        self.args.len() != before
    }
}

/// A positional or keyword argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
    pub comments: Comments,
}

impl Arg {
    pub fn keyword(name: impl Into<String>, value: Expr) -> Self {
        Self {
            name: Some(name.into()),
            value,
            comments: Comments::default(),
        }
    }
}

/// An expression in the build dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    String(StringExpr),
    Int(i64),
    Ident(String),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Call(CallExpr),
    BinaryAdd(Box<Expr>, Box<Expr>),
    /// Unparsed source preserved verbatim.
    Raw(String),
}

impl Expr {
    pub fn string(value: impl Into<String>) -> Self {
        Expr::String(StringExpr::new(value))
    }

    pub fn string_list<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::List(values.into_iter().map(Expr::string).collect())
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Expr::String(s) => Some(&s.value),
            _ => None,
        }
    }

    /// The values of a plain string list; `None` for any other shape.
    pub fn as_string_list(&self) -> Option<Vec<String>> {
        match self {
            Expr::List(items) => items
                .iter()
                .map(|i| i.as_string().map(str::to_string))
                .collect(),
            _ => None,
        }
    }

    /// True for a `select({...})` call.
    pub fn is_select(&self) -> bool {
        matches!(self, Expr::Call(c) if c.name == "select")
    }

    /// An expression with no content: empty string, list, or dict, or a
    /// concatenation of such.
    pub fn is_empty_value(&self) -> bool {
        match self {
            Expr::String(s) => s.value.is_empty(),
            Expr::List(items) => items.is_empty(),
            Expr::Dict(entries) => entries.is_empty(),
            Expr::Call(c) if c.name == "select" => c.args.iter().all(|a| match &a.value {
                Expr::Dict(entries) => entries.iter().all(|(_, v)| v.is_empty_value()),
                _ => false,
            }),
            Expr::BinaryAdd(l, r) => l.is_empty_value() && r.is_empty_value(),
            _ => false,
        }
    }
}

/// A `load()` statement: a source file plus imported symbols.
///
/// `alias` is the remote name when the local binding differs, as in
/// `load("//:def.bzl", my_lib = "lib")`.
#[derive(Debug, Clone, PartialEq)]
pub struct Load {
    pub source: String,
    pub symbols: Vec<LoadedSymbol>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoadedSymbol {
    /// Local binding name.
    pub name: String,
    /// Remote symbol when it differs from the local name.
    pub alias: Option<String>,
}

impl Load {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            symbols: Vec::new(),
        }
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.symbols.iter().any(|s| s.name == name)
    }

    pub fn add_symbol(&mut self, name: &str) {
        if !self.has_symbol(name) {
            self.symbols.push(LoadedSymbol {
                name: name.to_string(),
                alias: None,
            });
        }
    }
}

/// One top-level statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// Stable identity within the file, reflecting textual position at
    /// parse time. New statements get fresh indices past the parsed ones.
    pub index: usize,
    pub comments: Comments,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Rule(CallExpr),
    Load(Load),
    /// A standalone comment block; text lives in `comments.before`.
    Comment,
    /// Unrecognized syntax preserved verbatim.
    Raw(String),
}

/// A directive comment `# gazelle:<key> <value>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub key: String,
    pub value: String,
}

/// Extract directives from a single comment line, if any.
pub fn parse_directive(comment: &str) -> Option<Directive> {
    let text = comment_text(comment);
    let rest = text.strip_prefix("gazelle:")?;
    let rest = rest.trim();
    let (key, value) = match rest.split_once(char::is_whitespace) {
        Some((k, v)) => (k, v.trim()),
        None => (rest, ""),
    };
    if key.is_empty() {
        return None;
    }
    Some(Directive {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// A parsed build file: an ordered list of top-level statements.
#[derive(Debug, Clone)]
pub struct File {
    pub path: PathBuf,
    /// Slash path of the package this file belongs to, from the repo root.
    pub pkg: String,
    pub stmts: Vec<Stmt>,
    next_index: usize,
}

impl File {
    /// An empty file for a directory with no build file yet.
    pub fn empty(path: impl Into<PathBuf>, pkg: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            pkg: pkg.into(),
            stmts: Vec::new(),
            next_index: 0,
        }
    }

    /// Parse build file content. Statement indices are assigned in textual
    /// order and stay unique for the lifetime of the file.
    pub fn parse(path: &Path, pkg: &str, content: &str) -> Result<Self> {
        parse::parse_file(path, pkg, content)
    }

    /// Serialize with the canonical formatting.
    pub fn format(&self) -> String {
        print::format_file(self)
    }

    pub(crate) fn alloc_index(&mut self) -> usize {
        let i = self.next_index;
        self.next_index += 1;
        i
    }

    pub(crate) fn set_next_index(&mut self, next: usize) {
        self.next_index = next;
    }

    /// Append a statement at the end of the file.
    pub fn push_stmt(&mut self, comments: Comments, kind: StmtKind) -> usize {
        let index = self.alloc_index();
        self.stmts.push(Stmt {
            index,
            comments,
            kind,
        });
        index
    }

    /// Insert a statement at a position in the statement list.
    pub fn insert_stmt(&mut self, pos: usize, comments: Comments, kind: StmtKind) -> usize {
        let index = self.alloc_index();
        let pos = pos.min(self.stmts.len());
        self.stmts.insert(
            pos,
            Stmt {
                index,
                comments,
                kind,
            },
        );
        index
    }

    pub fn stmt_by_index(&self, index: usize) -> Option<&Stmt> {
        self.stmts.iter().find(|s| s.index == index)
    }

    pub fn stmt_by_index_mut(&mut self, index: usize) -> Option<&mut Stmt> {
        self.stmts.iter_mut().find(|s| s.index == index)
    }

    pub fn remove_stmt(&mut self, index: usize) -> Option<Stmt> {
        let pos = self.stmts.iter().position(|s| s.index == index)?;
        Some(self.stmts.remove(pos))
    }

    /// Rule statements in file order.
    pub fn rules(&self) -> impl Iterator<Item = (&Stmt, &CallExpr)> {
        self.stmts.iter().filter_map(|s| match &s.kind {
            StmtKind::Rule(call) => Some((s, call)),
            _ => None,
        })
    }

    /// Load statements in file order.
    pub fn loads(&self) -> impl Iterator<Item = (&Stmt, &Load)> {
        self.stmts.iter().filter_map(|s| match &s.kind {
            StmtKind::Load(load) => Some((s, load)),
            _ => None,
        })
    }

    /// The statement list position just past the leading load statements,
    /// where new rules are inserted by default.
    pub fn after_loads(&self) -> usize {
        let mut pos = 0;
        for (i, stmt) in self.stmts.iter().enumerate() {
            if matches!(stmt.kind, StmtKind::Load(_)) {
                pos = i + 1;
            }
        }
        pos
    }

    /// All directives in the file, in textual order.
    pub fn directives(&self) -> Vec<Directive> {
        let mut out = Vec::new();
        for stmt in &self.stmts {
            for comment in stmt
                .comments
                .before
                .iter()
                .chain(stmt.comments.suffix.iter())
            {
                if let Some(d) = parse_directive(comment) {
                    out.push(d);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_parsing() {
        let d = parse_directive("# gazelle:prefix example.com/hello").unwrap();
        assert_eq!(d.key, "prefix");
        assert_eq!(d.value, "example.com/hello");

        let d = parse_directive("#gazelle:ignore").unwrap();
        assert_eq!(d.key, "ignore");
        assert_eq!(d.value, "");

        assert!(parse_directive("# keep").is_none());
        assert!(parse_directive("# plain comment").is_none());
    }

    #[test]
    fn keep_detection() {
        let mut c = Comments::default();
        assert!(!c.has_keep());
        c.suffix.push("# keep".to_string());
        assert!(c.has_keep());

        let mut c = Comments::default();
        c.before.push("#keep".to_string());
        assert!(c.has_keep());
    }

    #[test]
    fn empty_value_detection() {
        assert!(Expr::List(vec![]).is_empty_value());
        assert!(Expr::string("").is_empty_value());
        assert!(!Expr::string_list(["a"]).is_empty_value());

        let mut select = CallExpr::new("select");
        select.args.push(Arg {
            name: None,
            value: Expr::Dict(vec![(
                Expr::string("//conditions:default"),
                Expr::List(vec![]),
            )]),
            comments: Comments::default(),
        });
        assert!(Expr::Call(select).is_empty_value());
    }

    #[test]
    fn stmt_indices_stay_unique() {
        let mut f = File::empty("BUILD.bazel", "");
        let a = f.push_stmt(Comments::default(), StmtKind::Rule(CallExpr::new("x")));
        let b = f.insert_stmt(0, Comments::default(), StmtKind::Rule(CallExpr::new("y")));
        assert_ne!(a, b);
        f.remove_stmt(a);
        let c = f.push_stmt(Comments::default(), StmtKind::Rule(CallExpr::new("z")));
        assert_ne!(b, c);
        assert_ne!(a, c);
    }
}
