//! Build file serialization
//!
//! Deterministic formatting: rules print one attribute per line with the
//! `name` attribute hoisted first, lists with more than one element break
//! across lines, load symbols are alphabetized, and comments re-attach to
//! the nodes that carried them. Formatting the same tree twice yields the
//! same bytes.

use super::{Arg, CallExpr, Expr, File, Load, Stmt, StmtKind};

const INDENT: usize = 4;

pub fn format_file(file: &File) -> String {
    let mut out = String::new();
    let mut prev_was_load = false;
    for (i, stmt) in file.stmts.iter().enumerate() {
        let is_load = matches!(stmt.kind, StmtKind::Load(_));
        if i > 0 {
            // Consecutive loads stay adjacent; everything else gets a
            // separating blank line.
            if !(prev_was_load && is_load) {
                out.push('\n');
            }
        }
        format_stmt(&mut out, stmt);
        prev_was_load = is_load;
    }
    out
}

fn format_stmt(out: &mut String, stmt: &Stmt) {
    for comment in &stmt.comments.before {
        out.push_str(comment);
        out.push('\n');
    }
    let body = match &stmt.kind {
        StmtKind::Rule(call) => Some(format_rule(call)),
        StmtKind::Load(load) => Some(format_load(load)),
        StmtKind::Raw(text) => Some(text.clone()),
        StmtKind::Comment => None,
    };
    if let Some(body) = body {
        out.push_str(&body);
        for comment in &stmt.comments.suffix {
            out.push_str("  ");
            out.push_str(comment);
        }
        out.push('\n');
    }
}

fn format_load(load: &Load) -> String {
    let mut symbols = load.symbols.clone();
    symbols.sort();
    symbols.dedup();
    let mut s = format!("load({}", quote(&load.source));
    for sym in &symbols {
        match &sym.alias {
            None => {
                s.push_str(", ");
                s.push_str(&quote(&sym.name));
            }
            Some(remote) => {
                s.push_str(&format!(", {} = {}", sym.name, quote(remote)));
            }
        }
    }
    s.push(')');
    s
}

fn format_rule(call: &CallExpr) -> String {
    if call.args.is_empty() {
        return format!("{}()", call.name);
    }
    let mut s = format!("{}(\n", call.name);
    // `name` always prints first; everything else keeps authored order.
    let mut order: Vec<&Arg> = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        if arg.name.as_deref() == Some("name") {
            order.push(arg);
        }
    }
    for arg in &call.args {
        if arg.name.as_deref() != Some("name") {
            order.push(arg);
        }
    }
    for arg in order {
        for comment in &arg.comments.before {
            s.push_str(&" ".repeat(INDENT));
            s.push_str(comment);
            s.push('\n');
        }
        s.push_str(&" ".repeat(INDENT));
        if let Some(name) = &arg.name {
            s.push_str(name);
            s.push_str(" = ");
        }
        s.push_str(&format_expr(&arg.value, INDENT));
        s.push(',');
        for comment in &arg.comments.suffix {
            s.push_str("  ");
            s.push_str(comment);
        }
        s.push('\n');
    }
    s.push(')');
    s
}

/// Format an expression starting at a line indented by `indent` spaces.
/// Multi-line forms close at `indent`.
fn format_expr(expr: &Expr, indent: usize) -> String {
    match expr {
        Expr::String(s) => quote(&s.value),
        Expr::Int(v) => v.to_string(),
        Expr::Ident(name) => name.clone(),
        Expr::List(items) => format_list(items, indent),
        Expr::Dict(entries) => format_dict(entries, indent),
        Expr::Call(call) => format_call(call, indent),
        Expr::BinaryAdd(lhs, rhs) => format!(
            "{} + {}",
            format_expr(lhs, indent),
            format_expr(rhs, indent)
        ),
        Expr::Raw(text) => text.clone(),
    }
}

fn format_list(items: &[Expr], indent: usize) -> String {
    if items.is_empty() {
        return "[]".to_string();
    }
    let inline = items.len() == 1
        && match &items[0] {
            Expr::String(s) => s.comments.is_empty(),
            Expr::Int(_) | Expr::Ident(_) => true,
            _ => false,
        };
    if inline {
        return format!("[{}]", format_expr(&items[0], indent));
    }
    let inner = " ".repeat(indent + INDENT);
    let mut s = String::from("[\n");
    for item in items {
        if let Expr::String(se) = item {
            for comment in &se.comments.before {
                s.push_str(&inner);
                s.push_str(comment);
                s.push('\n');
            }
        }
        s.push_str(&inner);
        s.push_str(&format_expr(item, indent + INDENT));
        s.push(',');
        if let Expr::String(se) = item {
            for comment in &se.comments.suffix {
                s.push_str("  ");
                s.push_str(comment);
            }
        }
        s.push('\n');
    }
    s.push_str(&" ".repeat(indent));
    s.push(']');
    s
}

fn format_dict(entries: &[(Expr, Expr)], indent: usize) -> String {
    if entries.is_empty() {
        return "{}".to_string();
    }
    let inner = " ".repeat(indent + INDENT);
    let mut s = String::from("{\n");
    for (key, value) in entries {
        if let Expr::String(se) = key {
            for comment in &se.comments.before {
                s.push_str(&inner);
                s.push_str(comment);
                s.push('\n');
            }
        }
        s.push_str(&inner);
        s.push_str(&format_expr(key, indent + INDENT));
        s.push_str(": ");
        s.push_str(&format_expr(value, indent + INDENT));
        s.push(',');
        if let Expr::String(se) = key {
            for comment in &se.comments.suffix {
                s.push_str("  ");
                s.push_str(comment);
            }
        }
        s.push('\n');
    }
    s.push_str(&" ".repeat(indent));
    s.push('}');
    s
}

fn format_call(call: &CallExpr, indent: usize) -> String {
    let mut s = format!("{}(", call.name);
    for (i, arg) in call.args.iter().enumerate() {
        if i > 0 {
            s.push_str(", ");
        }
        if let Some(name) = &arg.name {
            s.push_str(name);
            s.push_str(" = ");
        }
        s.push_str(&format_expr(&arg.value, indent));
    }
    s.push(')');
    s
}

fn quote(value: &str) -> String {
    let mut s = String::with_capacity(value.len() + 2);
    s.push('"');
    for c in value.chars() {
        match c {
            '\\' => s.push_str("\\\\"),
            '"' => s.push_str("\\\""),
            '\n' => s.push_str("\\n"),
            '\t' => s.push_str("\\t"),
            '\r' => s.push_str("\\r"),
            _ => s.push(c),
        }
    }
    s.push('"');
    s
}
