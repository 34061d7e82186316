//! Build file parser
//!
//! Two stages: a scanner splits the file into top-level pieces (comment
//! lines, blank separators, balanced statement texts), then a recursive
//! descent parser turns each statement text into an expression tree.
//! Statements that use syntax outside the recognized dialect fall back to
//! verbatim raw statements, so nothing is lost on rewrite.

use std::path::Path;

use crate::error::{GazelleError, Result};

use super::{Arg, CallExpr, Comments, Expr, File, Load, LoadedSymbol, Stmt, StmtKind, StringExpr};

pub fn parse_file(path: &Path, pkg: &str, content: &str) -> Result<File> {
    let pieces = split_pieces(path, content)?;
    let mut stmts = Vec::new();
    let mut pending: Vec<String> = Vec::new();

    fn flush_comment_block(pending: &mut Vec<String>, stmts: &mut Vec<Stmt>) {
        if pending.is_empty() {
            return;
        }
        let index = stmts.len();
        stmts.push(Stmt {
            index,
            comments: Comments {
                before: std::mem::take(pending),
                suffix: Vec::new(),
            },
            kind: StmtKind::Comment,
        });
    }

    for piece in pieces {
        match piece {
            Piece::Blank => flush_comment_block(&mut pending, &mut stmts),
            Piece::Comment(text) => pending.push(text),
            Piece::Stmt(text) => {
                let before = std::mem::take(&mut pending);
                let index = stmts.len();
                let (kind, suffix) = parse_stmt(&text);
                stmts.push(Stmt {
                    index,
                    comments: Comments { before, suffix },
                    kind,
                });
            }
        }
    }
    flush_comment_block(&mut pending, &mut stmts);

    let next_index = stmts.len();
    let mut file = File {
        path: path.to_path_buf(),
        pkg: pkg.to_string(),
        stmts,
        next_index: 0,
    };
    file.set_next_index(next_index);
    Ok(file)
}

enum Piece {
    Blank,
    Comment(String),
    Stmt(String),
}

/// Split content into top-level pieces, tracking bracket depth and string
/// state so statements spanning multiple lines stay intact.
fn split_pieces(path: &Path, content: &str) -> Result<Vec<Piece>> {
    let bytes = content.as_bytes();
    let mut pieces = Vec::new();
    let mut i = 0;
    let mut line = 1;

    while i < bytes.len() {
        // At the start of a top-level line.
        let line_start = i;
        while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t' || bytes[i] == b'\r') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        match bytes[i] {
            b'\n' => {
                pieces.push(Piece::Blank);
                i += 1;
                line += 1;
            }
            b'#' => {
                let start = i;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                pieces.push(Piece::Comment(
                    content[start..i].trim_end().to_string(),
                ));
                if i < bytes.len() {
                    i += 1;
                    line += 1;
                }
            }
            _ => {
                let start = line_start;
                let start_line = line;
                let mut depth: i32 = 0;
                let mut string: Option<(u8, bool)> = None; // (quote, triple)
                while i < bytes.len() {
                    let b = bytes[i];
                    if let Some((quote, triple)) = string {
                        if b == b'\\' {
                            i += 2;
                            continue;
                        }
                        if b == quote {
                            if triple {
                                if bytes[i..].starts_with(&[quote, quote, quote]) {
                                    string = None;
                                    i += 3;
                                    continue;
                                }
                            } else {
                                string = None;
                            }
                        } else if b == b'\n' {
                            line += 1;
                            if !triple {
                                return Err(GazelleError::BuildFileParse {
                                    path: path.to_path_buf(),
                                    line,
                                    reason: "unterminated string".to_string(),
                                });
                            }
                        }
                        i += 1;
                        continue;
                    }
                    match b {
                        b'"' | b'\'' => {
                            if bytes[i..].starts_with(&[b, b, b]) {
                                string = Some((b, true));
                                i += 3;
                                continue;
                            }
                            string = Some((b, false));
                        }
                        b'(' | b'[' | b'{' => depth += 1,
                        b')' | b']' | b'}' => depth -= 1,
                        b'#' => {
                            while i < bytes.len() && bytes[i] != b'\n' {
                                i += 1;
                            }
                            continue;
                        }
                        b'\n' => {
                            line += 1;
                            if depth <= 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                if depth > 0 || string.is_some() {
                    return Err(GazelleError::BuildFileParse {
                        path: path.to_path_buf(),
                        line: start_line,
                        reason: "unbalanced brackets".to_string(),
                    });
                }
                let end = i.min(bytes.len());
                pieces.push(Piece::Stmt(content[start..end].trim_end().to_string()));
                if i < bytes.len() {
                    i += 1; // consume the newline
                }
            }
        }
    }
    Ok(pieces)
}

/// Parse one statement text. Returns the statement kind plus any suffix
/// comments found on or after the closing line. Unparseable statements are
/// preserved verbatim.
fn parse_stmt(text: &str) -> (StmtKind, Vec<String>) {
    let toks = match lex(text) {
        Ok(toks) => toks,
        Err(_) => return (StmtKind::Raw(text.to_string()), Vec::new()),
    };
    let mut parser = Parser {
        toks,
        pos: 0,
        last_line: 0,
    };
    match parser.parse_top() {
        Ok((expr, suffix)) => {
            let kind = match expr {
                Expr::Call(call) if call.name == "load" => match to_load(&call) {
                    Some(load) => StmtKind::Load(load),
                    None => StmtKind::Rule(call),
                },
                Expr::Call(call) => StmtKind::Rule(call),
                _ => StmtKind::Raw(text.to_string()),
            };
            (kind, suffix)
        }
        Err(_) => (StmtKind::Raw(text.to_string()), Vec::new()),
    }
}

fn to_load(call: &CallExpr) -> Option<Load> {
    let mut args = call.args.iter();
    let source = match args.next() {
        Some(Arg { name: None, value, .. }) => value.as_string()?.to_string(),
        _ => return None,
    };
    let mut load = Load::new(source);
    for arg in args {
        let remote = arg.value.as_string()?;
        match &arg.name {
            None => load.symbols.push(LoadedSymbol {
                name: remote.to_string(),
                alias: None,
            }),
            Some(local) => load.symbols.push(LoadedSymbol {
                name: local.clone(),
                alias: Some(remote.to_string()),
            }),
        }
    }
    Some(load)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Int(i64),
    Punct(char),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

struct LexError;

fn lex(text: &str) -> std::result::Result<Vec<Token>, LexError> {
    let bytes = text.as_bytes();
    let mut toks = Vec::new();
    let mut i = 0;
    let mut line = 1;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b' ' | b'\t' | b'\r' => i += 1,
            b'\n' => {
                line += 1;
                i += 1;
            }
            b'#' => {
                let start = i;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                toks.push(Token {
                    tok: Tok::Comment(text[start..i].trim_end().to_string()),
                    line,
                });
            }
            b'"' | b'\'' => {
                let (value, consumed, newlines) = lex_string(&text[i..]).ok_or(LexError)?;
                toks.push(Token {
                    tok: Tok::Str(value),
                    line,
                });
                line += newlines;
                i += consumed;
            }
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let value: i64 = text[start..i].parse().map_err(|_| LexError)?;
                toks.push(Token {
                    tok: Tok::Int(value),
                    line,
                });
            }
            b'-' if i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let value: i64 = text[start..i].parse().map_err(|_| LexError)?;
                toks.push(Token {
                    tok: Tok::Int(value),
                    line,
                });
            }
            b'(' | b')' | b'[' | b']' | b'{' | b'}' | b',' | b'=' | b'+' | b':' | b'.' => {
                toks.push(Token {
                    tok: Tok::Punct(b as char),
                    line,
                });
                i += 1;
            }
            _ if b == b'_' || b.is_ascii_alphabetic() => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric())
                {
                    i += 1;
                }
                toks.push(Token {
                    tok: Tok::Ident(text[start..i].to_string()),
                    line,
                });
            }
            _ => return Err(LexError),
        }
    }
    Ok(toks)
}

/// Lex one string literal starting at the quote. Returns the decoded
/// value, bytes consumed, and newlines crossed.
fn lex_string(text: &str) -> Option<(String, usize, usize)> {
    let bytes = text.as_bytes();
    let quote = bytes[0];
    let triple = bytes.starts_with(&[quote, quote, quote]);
    let mut i = if triple { 3 } else { 1 };
    let mut value = String::new();
    let mut newlines = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && i + 1 < bytes.len() {
            let esc = bytes[i + 1];
            match esc {
                b'n' => value.push('\n'),
                b't' => value.push('\t'),
                b'r' => value.push('\r'),
                b'\\' => value.push('\\'),
                b'"' => value.push('"'),
                b'\'' => value.push('\''),
                _ => {
                    value.push('\\');
                    value.push(esc as char);
                }
            }
            i += 2;
            continue;
        }
        if b == quote {
            if triple {
                if bytes[i..].starts_with(&[quote, quote, quote]) {
                    return Some((value, i + 3, newlines));
                }
            } else {
                return Some((value, i + 1, newlines));
            }
        }
        if b == b'\n' {
            if !triple {
                return None;
            }
            newlines += 1;
        }
        // Push the raw byte; multibyte characters pass through unchanged.
        let ch_len = utf8_len(b);
        value.push_str(&text[i..i + ch_len]);
        i += ch_len;
    }
    None
}

fn utf8_len(b: u8) -> usize {
    match b {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}

struct ParseErr;

struct Parser {
    toks: Vec<Token>,
    pos: usize,
    last_line: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> std::result::Result<Token, ParseErr> {
        let tok = self.toks.get(self.pos).cloned().ok_or(ParseErr)?;
        self.last_line = tok.line;
        self.pos += 1;
        Ok(tok)
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if matches!(self.peek(), Some(Token { tok: Tok::Punct(p), .. }) if *p == c) {
            let _ = self.bump();
            return true;
        }
        false
    }

    fn expect_punct(&mut self, c: char) -> std::result::Result<(), ParseErr> {
        if self.eat_punct(c) { Ok(()) } else { Err(ParseErr) }
    }

    /// Comments on the current parse line, immediately after the last
    /// consumed token.
    fn take_suffix_comments(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(Token {
            tok: Tok::Comment(c),
            line,
        }) = self.peek()
        {
            if *line != self.last_line {
                break;
            }
            out.push(c.clone());
            let _ = self.bump();
        }
        out
    }

    /// Full-line comments preceding the next element.
    fn take_before_comments(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(Token {
            tok: Tok::Comment(c),
            ..
        }) = self.peek()
        {
            out.push(c.clone());
            let _ = self.bump();
        }
        out
    }

    fn parse_top(&mut self) -> std::result::Result<(Expr, Vec<String>), ParseErr> {
        let expr = self.parse_expr()?;
        let mut suffix = Vec::new();
        while let Some(tok) = self.peek() {
            match &tok.tok {
                Tok::Comment(c) => {
                    suffix.push(c.clone());
                    let _ = self.bump();
                }
                _ => return Err(ParseErr),
            }
        }
        Ok((expr, suffix))
    }

    fn parse_expr(&mut self) -> std::result::Result<Expr, ParseErr> {
        let mut lhs = self.parse_operand()?;
        loop {
            // Comments may sit between a list and its `+ select(...)`.
            let save = self.pos;
            let _ = self.take_before_comments();
            if self.eat_punct('+') {
                let _ = self.take_before_comments();
                let rhs = self.parse_operand()?;
                lhs = Expr::BinaryAdd(Box::new(lhs), Box::new(rhs));
            } else {
                self.pos = save;
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_operand(&mut self) -> std::result::Result<Expr, ParseErr> {
        let tok = self.bump()?;
        match tok.tok {
            Tok::Str(value) => {
                let mut s = StringExpr::new(value);
                s.comments.suffix = self.take_suffix_comments();
                Ok(Expr::String(s))
            }
            Tok::Int(value) => Ok(Expr::Int(value)),
            Tok::Ident(name) => {
                let mut name = name;
                while self.eat_punct('.') {
                    match self.bump()?.tok {
                        Tok::Ident(part) => {
                            name.push('.');
                            name.push_str(&part);
                        }
                        _ => return Err(ParseErr),
                    }
                }
                if matches!(self.peek(), Some(Token { tok: Tok::Punct('('), .. })) {
                    let _ = self.bump();
                    let args = self.parse_args()?;
                    Ok(Expr::Call(CallExpr { name, args }))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Tok::Punct('[') => self.parse_list(),
            Tok::Punct('{') => self.parse_dict(),
            Tok::Punct('(') => {
                let inner = self.parse_expr()?;
                let _ = self.take_before_comments();
                self.expect_punct(')')?;
                Ok(inner)
            }
            _ => Err(ParseErr),
        }
    }

    fn parse_args(&mut self) -> std::result::Result<Vec<Arg>, ParseErr> {
        let mut args: Vec<Arg> = Vec::new();
        loop {
            let before = self.take_before_comments();
            if self.eat_punct(')') {
                // Dangling comments before the closer stay with the last arg.
                if let (Some(last), false) = (args.last_mut(), before.is_empty()) {
                    last.comments.suffix.extend(before);
                }
                return Ok(args);
            }
            // Keyword argument: ident '=' value.
            let is_kwarg = matches!(
                (
                    self.toks.get(self.pos).map(|t| &t.tok),
                    self.toks.get(self.pos + 1).map(|t| &t.tok),
                ),
                (Some(Tok::Ident(_)), Some(Tok::Punct('=')))
            );
            let name = if is_kwarg {
                let Tok::Ident(id) = self.bump()?.tok else {
                    return Err(ParseErr);
                };
                let _ = self.bump(); // '='
                Some(id)
            } else {
                None
            };
            let value = self.parse_expr()?;
            let mut arg = Arg {
                name,
                value,
                comments: Comments {
                    before,
                    suffix: Vec::new(),
                },
            };
            let had_comma = self.eat_punct(',');
            arg.comments.suffix = self.take_suffix_comments();
            args.push(arg);
            if !had_comma {
                let _ = self.take_before_comments();
                self.expect_punct(')')?;
                return Ok(args);
            }
        }
    }

    fn parse_list(&mut self) -> std::result::Result<Expr, ParseErr> {
        let mut items: Vec<Expr> = Vec::new();
        loop {
            let before = self.take_before_comments();
            if self.eat_punct(']') {
                if let (Some(Expr::String(last)), false) = (items.last_mut(), before.is_empty()) {
                    last.comments.suffix.extend(before);
                }
                return Ok(Expr::List(items));
            }
            let mut item = self.parse_expr()?;
            let had_comma = self.eat_punct(',');
            let suffix = self.take_suffix_comments();
            if let Expr::String(s) = &mut item {
                s.comments.before = before;
                s.comments.suffix.extend(suffix);
            }
            items.push(item);
            if !had_comma {
                let _ = self.take_before_comments();
                self.expect_punct(']')?;
                return Ok(Expr::List(items));
            }
        }
    }

    fn parse_dict(&mut self) -> std::result::Result<Expr, ParseErr> {
        let mut entries: Vec<(Expr, Expr)> = Vec::new();
        loop {
            let before = self.take_before_comments();
            if self.eat_punct('}') {
                return Ok(Expr::Dict(entries));
            }
            let mut key = self.parse_expr()?;
            if let Expr::String(s) = &mut key {
                s.comments.before = before;
            }
            self.expect_punct(':')?;
            let _ = self.take_before_comments();
            let value = self.parse_expr()?;
            let had_comma = self.eat_punct(',');
            let suffix = self.take_suffix_comments();
            if let Expr::String(s) = &mut key {
                s.comments.suffix.extend(suffix);
            }
            entries.push((key, value));
            if !had_comma {
                let _ = self.take_before_comments();
                self.expect_punct('}')?;
                return Ok(Expr::Dict(entries));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(content: &str) -> File {
        parse_file(&PathBuf::from("BUILD.bazel"), "", content).unwrap()
    }

    #[test]
    fn parses_rule_with_attrs() {
        let f = parse(
            r#"go_library(
    name = "hello",
    srcs = ["hello.go"],
    importpath = "example.com/hello",
)
"#,
        );
        assert_eq!(f.stmts.len(), 1);
        let (_, rule) = f.rules().next().unwrap();
        assert_eq!(rule.name, "go_library");
        assert_eq!(rule.arg("name").unwrap().as_string(), Some("hello"));
        assert!(matches!(rule.arg("srcs"), Some(Expr::List(items)) if items.len() == 1));
    }

    #[test]
    fn parses_load() {
        let f = parse(r#"load("@io_bazel_rules_go//go:def.bzl", "go_library", my_test = "go_test")"#);
        let (_, load) = f.loads().next().unwrap();
        assert_eq!(load.source, "@io_bazel_rules_go//go:def.bzl");
        assert_eq!(load.symbols.len(), 2);
        assert_eq!(load.symbols[0].name, "go_library");
        assert_eq!(load.symbols[1].name, "my_test");
        assert_eq!(load.symbols[1].alias.as_deref(), Some("go_test"));
    }

    #[test]
    fn attaches_keep_to_attribute() {
        let f = parse(
            r#"go_library(
    name = "x",
    # keep
    deps = ["//a"],
)
"#,
        );
        let (_, rule) = f.rules().next().unwrap();
        let arg = rule.arg_entry("deps").unwrap();
        assert!(arg.comments.has_keep());
    }

    #[test]
    fn attaches_keep_to_list_element() {
        let f = parse(
            r#"go_library(
    name = "x",
    deps = [
        "//a",  # keep
        "//b",
    ],
)
"#,
        );
        let (_, rule) = f.rules().next().unwrap();
        let Some(Expr::List(items)) = rule.arg("deps") else {
            panic!("deps is not a list");
        };
        let Expr::String(a) = &items[0] else {
            panic!()
        };
        assert!(a.comments.has_keep());
        let Expr::String(b) = &items[1] else {
            panic!()
        };
        assert!(!b.comments.has_keep());
    }

    #[test]
    fn leading_comments_attach_to_rule() {
        let f = parse(
            r#"# gazelle:prefix example.com/hello
go_library(
    name = "x",
)
"#,
        );
        assert_eq!(f.stmts.len(), 1);
        let dirs = f.directives();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].key, "prefix");
    }

    #[test]
    fn standalone_comment_block() {
        let f = parse("# a lone comment\n\ngo_library(name = \"x\")\n");
        assert_eq!(f.stmts.len(), 2);
        assert!(matches!(f.stmts[0].kind, StmtKind::Comment));
    }

    #[test]
    fn select_is_a_call() {
        let f = parse(
            r#"go_library(
    name = "x",
    srcs = ["a.go"] + select({
        "@io_bazel_rules_go//go/platform:linux": ["b.go"],
        "//conditions:default": [],
    }),
)
"#,
        );
        let (_, rule) = f.rules().next().unwrap();
        let Some(Expr::BinaryAdd(_, rhs)) = rule.arg("srcs") else {
            panic!("srcs is not a concatenation");
        };
        assert!(rhs.is_select());
    }

    #[test]
    fn unknown_statement_preserved_raw() {
        let f = parse("x = some_function(1) if cond else other\n");
        assert!(matches!(&f.stmts[0].kind, StmtKind::Raw(t) if t.contains("some_function")));
    }

    #[test]
    fn unbalanced_is_a_parse_error() {
        let err = parse_file(
            &PathBuf::from("BUILD"),
            "",
            "go_library(\n    name = \"x\",\n",
        );
        assert!(err.is_err());
    }

    #[test]
    fn dotted_call_names() {
        let f = parse("foo.bar(name = \"x\")\n");
        let (_, rule) = f.rules().next().unwrap();
        assert_eq!(rule.name, "foo.bar");
    }
}
