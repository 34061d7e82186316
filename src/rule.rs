//! Typed access to a single rule
//!
//! Generated rules are staged as [`Rule`] values: kind, name, attributes
//! in insertion order, comments, and a private metadata bag that never
//! serializes (it carries the imports awaiting resolution from the
//! generate pass to the resolve pass, and the insertion position chosen by
//! the extension). `sync_into` reconciles staged attributes onto an
//! underlying call expression; `into_call` builds a fresh one.

use std::collections::HashMap;

use crate::ast::{Arg, CallExpr, Comments, Expr, StringExpr};
use crate::index::ImportSpec;
use crate::label::Label;
use crate::platform::PlatformStrings;

/// Imports awaiting resolution, tagged with the language that will
/// resolve them. The platform partition of each import string survives so
/// resolved dependencies reconstruct the same `select` arms.
#[derive(Debug, Clone)]
pub struct RuleImports {
    pub lang: &'static str,
    pub imports: PlatformStrings,
}

impl RuleImports {
    pub fn new(lang: &'static str, imports: PlatformStrings) -> Self {
        Self { lang, imports }
    }

    /// Flattened `(lang, import)` pairs for index population and lookup.
    pub fn specs(&self) -> Vec<ImportSpec> {
        self.imports
            .flat()
            .into_iter()
            .map(|imp| ImportSpec {
                lang: self.lang,
                imp,
            })
            .collect()
    }
}

/// Private metadata attached to a generated rule.
#[derive(Debug, Clone)]
pub enum PrivateValue {
    Imports(RuleImports),
    Labels(Vec<Label>),
    Pos(usize),
    Flag(bool),
}

/// Key for the unresolved imports carried between generate and resolve.
pub const IMPORTS_KEY: &str = "imports";
/// Key for an explicit statement insertion position.
pub const INSERT_POS_KEY: &str = "insert_pos";

/// A staged rule: either freshly generated or an editable view that will
/// be synced onto an existing call expression.
#[derive(Debug, Clone)]
pub struct Rule {
    kind: String,
    name: String,
    attrs: Vec<(String, Expr)>,
    comments: Comments,
    private: HashMap<&'static str, PrivateValue>,
}

impl Rule {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            attrs: Vec::new(),
            comments: Comments::default(),
            private: HashMap::new(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn set_kind(&mut self, kind: impl Into<String>) {
        self.kind = kind.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, name: &str) -> Option<&Expr> {
        self.attrs
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, e)| e)
    }

    pub fn set_attr(&mut self, name: &str, value: impl IntoExpr) {
        let value = value.into_expr();
        match self.attrs.iter_mut().find(|(n, _)| n.as_str() == name) {
            Some((_, e)) => *e = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn del_attr(&mut self, name: &str) {
        self.attrs.retain(|(n, _)| n.as_str() != name);
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &Expr)> {
        self.attrs.iter().map(|(n, e)| (n.as_str(), e))
    }

    /// Flattened strings of an attribute: list elements, both sides of a
    /// `+`, and the default arm of a `select`.
    pub fn attr_strings(&self, name: &str) -> Vec<String> {
        self.attr(name).map(expr_strings).unwrap_or_default()
    }

    pub fn add_comment(&mut self, text: impl Into<String>) {
        self.comments.before.push(text.into());
    }

    pub fn comments(&self) -> &Comments {
        &self.comments
    }

    pub fn set_private(&mut self, key: &'static str, value: PrivateValue) {
        self.private.insert(key, value);
    }

    pub fn private(&self, key: &str) -> Option<&PrivateValue> {
        self.private.get(key)
    }

    /// The imports recorded for resolution, if any.
    pub fn imports(&self) -> Option<&RuleImports> {
        match self.private.get(IMPORTS_KEY) {
            Some(PrivateValue::Imports(imports)) => Some(imports),
            _ => None,
        }
    }

    pub fn set_imports(&mut self, imports: RuleImports) {
        self.private.insert(IMPORTS_KEY, PrivateValue::Imports(imports));
    }

    /// True when every attribute is empty: the rule is a deletion marker.
    pub fn is_empty_marker(&self) -> bool {
        self.attrs.iter().all(|(_, e)| e.is_empty_value())
    }

    /// Build a fresh call expression from the staged state.
    pub fn into_call(self) -> (CallExpr, Comments) {
        let mut call = CallExpr::new(self.kind);
        call.args.push(Arg::keyword("name", Expr::string(self.name)));
        for (name, value) in self.attrs {
            call.args.push(Arg::keyword(name, value));
        }
        (call, self.comments)
    }

    /// Reconcile staged attributes onto an existing call expression.
    /// Attributes guarded by `# keep` are left alone; the caller decides
    /// what to do about the conflict.
    pub fn sync_into(&self, call: &mut CallExpr) -> Vec<String> {
        let mut kept = Vec::new();
        call.name = self.kind.clone();
        for (name, value) in &self.attrs {
            if let Some(arg) = call.arg_entry(name) {
                if arg.comments.has_keep() {
                    kept.push(name.clone());
                    continue;
                }
            }
            call.set_arg(name, value.clone());
        }
        kept
    }
}

/// Conversion into a build expression, covering the value shapes the
/// generators produce.
pub trait IntoExpr {
    fn into_expr(self) -> Expr;
}

impl IntoExpr for Expr {
    fn into_expr(self) -> Expr {
        self
    }
}

impl IntoExpr for &str {
    fn into_expr(self) -> Expr {
        Expr::string(self)
    }
}

impl IntoExpr for String {
    fn into_expr(self) -> Expr {
        Expr::string(self)
    }
}

impl IntoExpr for bool {
    fn into_expr(self) -> Expr {
        Expr::Ident(if self { "True" } else { "False" }.to_string())
    }
}

impl IntoExpr for i64 {
    fn into_expr(self) -> Expr {
        Expr::Int(self)
    }
}

impl IntoExpr for Vec<String> {
    fn into_expr(self) -> Expr {
        Expr::string_list(self)
    }
}

impl IntoExpr for Vec<&str> {
    fn into_expr(self) -> Expr {
        Expr::string_list(self)
    }
}

impl IntoExpr for &Label {
    fn into_expr(self) -> Expr {
        Expr::string(self.to_string())
    }
}

impl IntoExpr for Vec<Label> {
    fn into_expr(self) -> Expr {
        Expr::List(
            self.into_iter()
                .map(|l| Expr::string(l.to_string()))
                .collect(),
        )
    }
}

impl IntoExpr for &PlatformStrings {
    fn into_expr(self) -> Expr {
        self.to_expr()
    }
}

/// Flattened strings of an expression: scalars, list elements, both sides
/// of a binary `+`, and the default arm of a `select`.
pub fn expr_strings(expr: &Expr) -> Vec<String> {
    let mut out = Vec::new();
    collect_strings(expr, &mut out);
    out
}

fn collect_strings(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::String(s) => out.push(s.value.clone()),
        Expr::List(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        Expr::BinaryAdd(lhs, rhs) => {
            collect_strings(lhs, out);
            collect_strings(rhs, out);
        }
        Expr::Call(call) if call.name == "select" => {
            for arg in &call.args {
                if let Expr::Dict(entries) = &arg.value {
                    for (key, value) in entries {
                        if key.as_string() == Some("//conditions:default") {
                            collect_strings(value, out);
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

/// Rewrite every string in an expression. `f` returning `None` drops the
/// string; alternatives that become empty are dropped, except list values
/// that were already empty, so mapping with the identity is structurally
/// the identity. Comments attached to strings are preserved.
pub fn map_expr_strings<F>(expr: &Expr, f: &F) -> Option<Expr>
where
    F: Fn(&str) -> Option<String>,
{
    match expr {
        Expr::String(s) => f(&s.value).map(|value| {
            Expr::String(StringExpr {
                value,
                comments: s.comments.clone(),
            })
        }),
        Expr::List(items) => {
            let mapped: Vec<Expr> = items
                .iter()
                .filter_map(|item| map_expr_strings(item, f))
                .collect();
            if mapped.is_empty() && !items.is_empty() {
                return None;
            }
            Some(Expr::List(mapped))
        }
        Expr::Dict(entries) => {
            let mapped: Vec<(Expr, Expr)> = entries
                .iter()
                .filter_map(|(key, value)| {
                    let was_empty = value.is_empty_value();
                    let new_value = map_expr_strings(value, f)?;
                    if new_value.is_empty_value() && !was_empty {
                        return None;
                    }
                    Some((key.clone(), new_value))
                })
                .collect();
            Some(Expr::Dict(mapped))
        }
        Expr::BinaryAdd(lhs, rhs) => {
            match (map_expr_strings(lhs, f), map_expr_strings(rhs, f)) {
                (Some(l), Some(r)) => Some(Expr::BinaryAdd(Box::new(l), Box::new(r))),
                (Some(l), None) => Some(l),
                (None, Some(r)) => Some(r),
                (None, None) => None,
            }
        }
        Expr::Call(call) if call.name == "select" => {
            let mut mapped = CallExpr::new("select");
            for arg in &call.args {
                let value = map_expr_strings(&arg.value, f)?;
                mapped.args.push(Arg {
                    name: arg.name.clone(),
                    value,
                    comments: arg.comments.clone(),
                });
            }
            Some(Expr::Call(mapped))
        }
        other => Some(other.clone()),
    }
}
