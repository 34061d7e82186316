//! Merging generated rules into existing build files
//!
//! The existing file may carry hand written edits, `# keep` annotations,
//! extra attributes, or rules from prior runs. Merging reconciles the
//! generated rules with that file: generated values win where the user
//! has not objected, `# keep` freezes a rule, an attribute, or a single
//! list element, empty-rule markers delete rules that hold no authored
//! data, and load statements are rewritten to exactly the symbols in use.
//!
//! Merging the same inputs twice produces byte-identical output.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{
    Arg, CallExpr, Comments, Expr, File, Load, StmtKind, StringExpr,
};
use crate::config::Config;
use crate::error::{Diagnostics, GazelleError, Result};
use crate::label::Label;
use crate::lang::{GenerateResult, LanguageRegistry};
use crate::rule::{PrivateValue, Rule, RuleImports};

/// A rule that survived the merge, with the state the resolve pass needs.
#[derive(Debug)]
pub struct MergedRule {
    pub stmt_index: usize,
    pub kind: String,
    pub name: String,
    pub imports: Option<RuleImports>,
}

/// Merge one package's generated rules into its build file.
pub fn merge_file(
    config: &Config,
    registry: &LanguageRegistry,
    file: &mut File,
    generated: GenerateResult,
    diags: &mut Diagnostics,
) -> Result<Vec<MergedRule>> {
    flag_duplicate_names(file);

    let mut merged = Vec::new();
    for mut rule in generated.rules {
        // Generated rules are emitted under the substituted kind.
        let (kind, _) = config.mapped_kind(rule.kind())?;
        rule.set_kind(kind);

        let existing = find_matching_stmt(config, file, rule.kind(), rule.name())?;
        match existing {
            Some(stmt_index) => {
                let imports = rule.imports().cloned();
                let (kind, name) = (rule.kind().to_string(), rule.name().to_string());
                merge_into_existing(registry, file, stmt_index, &rule);
                merged.push(MergedRule {
                    stmt_index,
                    kind,
                    name,
                    imports,
                });
            }
            None => {
                let imports = rule.imports().cloned();
                let (kind, name) = (rule.kind().to_string(), rule.name().to_string());
                let pos = match rule.private(crate::rule::INSERT_POS_KEY) {
                    Some(PrivateValue::Pos(pos)) => Some(*pos),
                    _ => None,
                };
                let (call, comments) = rule.into_call();
                let stmt_index = match pos {
                    Some(pos) => file.insert_stmt(pos, comments, StmtKind::Rule(call)),
                    None => file.push_stmt(comments, StmtKind::Rule(call)),
                };
                merged.push(MergedRule {
                    stmt_index,
                    kind,
                    name,
                    imports,
                });
            }
        }
    }

    for marker in generated.empty {
        let (kind, _) = config.mapped_kind(marker.kind())?;
        if let Some(stmt_index) = find_matching_stmt(config, file, &kind, marker.name())? {
            delete_if_emptied(registry, file, stmt_index, diags)?;
        }
    }

    Ok(merged)
}

/// Locate an existing rule matching (kind, name), where the existing
/// rule's kind is compared after `map_kind` substitution.
fn find_matching_stmt(
    config: &Config,
    file: &File,
    kind: &str,
    name: &str,
) -> Result<Option<usize>> {
    for (stmt, call) in file.rules() {
        let Some(existing_name) = call.arg("name").and_then(|e| e.as_string()) else {
            continue;
        };
        if existing_name != name {
            continue;
        }
        let (mapped, _) = config.mapped_kind(&call.name)?;
        if call.name == kind || mapped == kind {
            return Ok(Some(stmt.index));
        }
    }
    Ok(None)
}

fn merge_into_existing(
    registry: &LanguageRegistry,
    file: &mut File,
    stmt_index: usize,
    rule: &Rule,
) {
    let path = file.path.clone();
    let Some(stmt) = file.stmt_by_index_mut(stmt_index) else {
        return;
    };
    // A keep on the rule freezes it entirely.
    if stmt.comments.has_keep() {
        return;
    }
    let StmtKind::Rule(call) = &mut stmt.kind else {
        return;
    };
    let info = registry.kind_info(rule.kind());
    call.name = rule.kind().to_string();

    let mergeable = |attr: &str| info.is_none_or(|i| i.is_mergeable(attr));
    for (attr, value) in rule.attrs() {
        if !mergeable(attr) {
            continue;
        }
        match call.arg_entry_mut(attr) {
            Some(arg) => {
                if arg.comments.has_keep() {
                    if arg.value != *value {
                        tracing::warn!(
                            "{}: rule {:?}: attribute {attr:?} is marked keep; not updating",
                            path.display(),
                            rule.name(),
                        );
                    }
                    continue;
                }
                arg.value = merge_exprs(&arg.value, value);
            }
            None => call.set_arg(attr, value.clone()),
        }
    }
    // Mergeable attributes the generator no longer produces are removed.
    if let Some(info) = info {
        let stale: Vec<String> = call
            .args
            .iter()
            .filter(|arg| {
                arg.name.as_deref().is_some_and(|n| {
                    info.is_mergeable(n)
                        && rule.attr(n).is_none()
                        && !arg.comments.has_keep()
                })
            })
            .filter_map(|arg| arg.name.clone())
            .collect();
        for attr in stale {
            call.del_arg(&attr);
        }
    }
}

/// Delete a rule an extension marked empty, unless authored data remains.
fn delete_if_emptied(
    registry: &LanguageRegistry,
    file: &mut File,
    stmt_index: usize,
    diags: &mut Diagnostics,
) -> Result<()> {
    let path = file.path.clone();
    let Some(stmt) = file.stmt_by_index(stmt_index) else {
        return Ok(());
    };
    if stmt.comments.has_keep() {
        return Ok(());
    }
    let StmtKind::Rule(call) = &stmt.kind else {
        return Ok(());
    };
    let name = call
        .arg("name")
        .and_then(|e| e.as_string())
        .unwrap_or_default()
        .to_string();
    let info = registry.kind_info(&call.name);
    let deletable = call.args.iter().all(|arg| match arg.name.as_deref() {
        Some("name") | Some("visibility") => true,
        Some(attr) => {
            !arg.comments.has_keep()
                && info.is_some_and(|i| i.is_mergeable(attr) || i.is_resolve_attr(attr))
        }
        None => false,
    });
    if deletable {
        file.remove_stmt(stmt_index);
    } else {
        diags.record(GazelleError::NotEmptied { path, name })?;
    }
    Ok(())
}

fn flag_duplicate_names(file: &File) {
    let mut seen = BTreeSet::new();
    for (_, call) in file.rules() {
        if let Some(name) = call.arg("name").and_then(|e| e.as_string()) {
            if !name.is_empty() && !seen.insert(name.to_string()) {
                tracing::warn!(
                    "{}: multiple rules named {name:?}",
                    file.path.display()
                );
            }
        }
    }
}

/// Write a resolve-pass attribute onto a merged rule, honoring keep at
/// the attribute and element level. An empty value removes the attribute.
pub fn merge_resolved_attr(file: &mut File, stmt_index: usize, attr: &str, value: Expr) {
    let path = file.path.clone();
    let Some(stmt) = file.stmt_by_index_mut(stmt_index) else {
        return;
    };
    if stmt.comments.has_keep() {
        return;
    }
    let StmtKind::Rule(call) = &mut stmt.kind else {
        return;
    };
    match call.arg_entry_mut(attr) {
        Some(arg) => {
            if arg.comments.has_keep() {
                tracing::debug!(
                    "{}: attribute {attr:?} is marked keep; resolution skipped",
                    path.display()
                );
                return;
            }
            let merged = merge_exprs(&arg.value, &value);
            if merged.is_empty_value() && !has_kept_elements(&arg.value) {
                call.del_arg(attr);
            } else {
                arg.value = merged;
            }
        }
        None => {
            if !value.is_empty_value() {
                call.set_arg(attr, value);
            }
        }
    }
}

/// Merge an old expression with a generated one. Recognized shapes are a
/// plain list, a `select`, or `list + select`; they merge arm-wise with
/// keep-marked elements of the old value retained. Anything else is
/// replaced outright.
pub fn merge_exprs(old: &Expr, new: &Expr) -> Expr {
    let (Some(old_parts), Some(new_parts)) = (decompose(old), decompose(new)) else {
        return new.clone();
    };

    let mut plain = new_parts.plain;
    for item in old_parts.plain {
        if element_has_keep(&item) && !contains_string(&plain, &item) {
            plain.push(item);
        }
    }

    let mut cases: BTreeMap<String, Vec<Expr>> = new_parts.cases;
    for (case, items) in old_parts.cases {
        let kept: Vec<Expr> = items.into_iter().filter(element_has_keep_ref).collect();
        if kept.is_empty() {
            continue;
        }
        let slot = cases.entry(case).or_default();
        for item in kept {
            if !contains_string(slot, &item) {
                slot.push(item);
            }
        }
    }

    recompose(plain, cases)
}

struct ListParts {
    plain: Vec<Expr>,
    cases: BTreeMap<String, Vec<Expr>>,
}

fn decompose(expr: &Expr) -> Option<ListParts> {
    match expr {
        Expr::List(items) => Some(ListParts {
            plain: items.clone(),
            cases: BTreeMap::new(),
        }),
        Expr::Call(call) if call.name == "select" => {
            let mut cases = BTreeMap::new();
            for arg in &call.args {
                let Expr::Dict(entries) = &arg.value else {
                    return None;
                };
                for (key, value) in entries {
                    let key = key.as_string()?.to_string();
                    let Expr::List(items) = value else {
                        return None;
                    };
                    if key == "//conditions:default" && items.is_empty() {
                        continue;
                    }
                    cases.insert(key, items.clone());
                }
            }
            Some(ListParts {
                plain: Vec::new(),
                cases,
            })
        }
        Expr::BinaryAdd(lhs, rhs) => {
            let l = decompose(lhs)?;
            let r = decompose(rhs)?;
            let mut cases = l.cases;
            cases.extend(r.cases);
            let mut plain = l.plain;
            plain.extend(r.plain);
            Some(ListParts { plain, cases })
        }
        _ => None,
    }
}

fn recompose(plain: Vec<Expr>, cases: BTreeMap<String, Vec<Expr>>) -> Expr {
    let list = Expr::List(plain);
    if cases.is_empty() {
        return list;
    }
    let mut entries: Vec<(Expr, Expr)> = cases
        .into_iter()
        .map(|(key, items)| (Expr::string(key), Expr::List(items)))
        .collect();
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
    if let Expr::List(items) = &list {
        if items.is_empty() {
            return select;
        }
    }
    Expr::BinaryAdd(Box::new(list), Box::new(select))
}

fn element_has_keep(expr: &Expr) -> bool {
    matches!(expr, Expr::String(s) if s.comments.has_keep())
}

fn element_has_keep_ref(expr: &Expr) -> bool {
    element_has_keep(expr)
}

fn contains_string(items: &[Expr], needle: &Expr) -> bool {
    let Some(value) = needle.as_string() else {
        return false;
    };
    items.iter().any(|i| i.as_string() == Some(value))
}

fn has_kept_elements(expr: &Expr) -> bool {
    match expr {
        Expr::List(items) => items.iter().any(element_has_keep),
        Expr::BinaryAdd(lhs, rhs) => has_kept_elements(lhs) || has_kept_elements(rhs),
        Expr::Call(call) if call.name == "select" => call.args.iter().any(|arg| {
            matches!(&arg.value, Expr::Dict(entries) if entries
                .iter()
                .any(|(_, v)| has_kept_elements(v)))
        }),
        _ => false,
    }
}

/// Rewrite load statements so each source file loads exactly the symbols
/// its rules use. Symbols the registry does not know about are kept, as
/// they may feed raw statements the rewriter cannot see into.
pub fn fix_loads(file: &mut File, registry: &LanguageRegistry, config: &Config) {
    let mut needed: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for (_, call) in file.rules() {
        if let Some(load_file) = load_file_for_kind(registry, config, &call.name) {
            needed.entry(load_file).or_default().insert(call.name.clone());
        }
    }

    // Prune managed-but-unused symbols, collect which are present.
    let mut remove: Vec<usize> = Vec::new();
    for stmt in &mut file.stmts {
        let StmtKind::Load(load) = &mut stmt.kind else {
            continue;
        };
        load.symbols.retain(|sym| {
            match registry.load_for(&sym.name) {
                Some(source) if source == load.source => needed
                    .get(source)
                    .is_some_and(|symbols| symbols.contains(&sym.name)),
                // Unmanaged or mismatched symbols stay untouched.
                _ => true,
            }
        });
        // A symbol bound by any load, canonical source or not, must not
        // be bound a second time.
        for sym in &load.symbols {
            for symbols in needed.values_mut() {
                symbols.remove(&sym.name);
            }
        }
        if load.symbols.is_empty() {
            remove.push(stmt.index);
        }
    }
    for index in remove {
        file.remove_stmt(index);
    }

    // Add missing symbols to existing loads, then new load statements
    // (sorted by source) at the top of the file.
    for stmt in &mut file.stmts {
        let StmtKind::Load(load) = &mut stmt.kind else {
            continue;
        };
        if let Some(symbols) = needed.remove(load.source.as_str()) {
            for sym in symbols {
                load.add_symbol(&sym);
            }
        }
    }
    for (source, symbols) in needed {
        if symbols.is_empty() {
            continue;
        }
        let mut load = Load::new(source.to_string());
        for sym in symbols {
            load.add_symbol(&sym);
        }
        let pos = insert_load_pos(file, source);
        file.insert_stmt(pos, Comments::default(), StmtKind::Load(load));
    }
}

/// Where the kind's symbol is loaded from: the mapping's load file for a
/// substituted kind, otherwise the registry's canonical location.
fn load_file_for_kind<'a>(
    registry: &LanguageRegistry,
    config: &'a Config,
    kind: &str,
) -> Option<&'a str> {
    for mapping in config.kind_map.values() {
        if mapping.to == kind {
            return Some(mapping.load_file.as_str());
        }
    }
    registry.load_for(kind)
}

fn insert_load_pos(file: &File, source: &str) -> usize {
    let mut pos = 0;
    for (i, stmt) in file.stmts.iter().enumerate() {
        match &stmt.kind {
            StmtKind::Load(load) if load.source.as_str() < source => pos = i + 1,
            StmtKind::Load(_) => break,
            _ => break,
        }
    }
    pos
}

/// Label-carrying attributes whose lists sort in buildifier order; other
/// string lists sort lexically. Lists under an attribute-level keep are
/// left in authored order.
const LABEL_LIST_ATTRS: &[&str] = &["deps", "embed", "visibility"];
const SORTED_LIST_ATTRS: &[&str] = &["srcs", "embedsrcs", "data", "copts", "clinkopts"];

pub fn sort_rule_lists(file: &mut File) {
    for stmt in &mut file.stmts {
        let StmtKind::Rule(call) = &mut stmt.kind else {
            continue;
        };
        for arg in &mut call.args {
            let Some(name) = arg.name.as_deref() else {
                continue;
            };
            if arg.comments.has_keep() {
                continue;
            }
            let by_label = LABEL_LIST_ATTRS.contains(&name);
            if by_label || SORTED_LIST_ATTRS.contains(&name) {
                sort_lists_in_expr(&mut arg.value, by_label);
            }
        }
    }
}

fn sort_lists_in_expr(expr: &mut Expr, by_label: bool) {
    match expr {
        Expr::List(items) => sort_string_items(items, by_label),
        Expr::BinaryAdd(lhs, rhs) => {
            sort_lists_in_expr(lhs, by_label);
            sort_lists_in_expr(rhs, by_label);
        }
        Expr::Call(call) if call.name == "select" => {
            for arg in &mut call.args {
                if let Expr::Dict(entries) = &mut arg.value {
                    for (_, value) in entries {
                        sort_lists_in_expr(value, by_label);
                    }
                }
            }
        }
        _ => {}
    }
}

fn sort_string_items(items: &mut [Expr], by_label: bool) {
    if !items.iter().all(|i| matches!(i, Expr::String(_))) {
        return;
    }
    items.sort_by_key(|item| {
        let value = item.as_string().unwrap_or_default();
        if by_label {
            match Label::parse(value) {
                Ok(label) => label.sort_key(),
                Err(_) => (3, value.to_string()),
            }
        } else {
            (0, value.to_string())
        }
    });
}

/// Deduplicate string list items after merging, preserving first
/// occurrence (and its comments).
pub fn dedup_rule_lists(file: &mut File) {
    for stmt in &mut file.stmts {
        let StmtKind::Rule(call) = &mut stmt.kind else {
            continue;
        };
        for arg in &mut call.args {
            dedup_in_expr(&mut arg.value);
        }
    }
}

fn dedup_in_expr(expr: &mut Expr) {
    match expr {
        Expr::List(items) => {
            let mut seen: BTreeSet<String> = BTreeSet::new();
            items.retain(|item| match item {
                Expr::String(StringExpr { value, .. }) => seen.insert(value.clone()),
                _ => true,
            });
        }
        Expr::BinaryAdd(lhs, rhs) => {
            dedup_in_expr(lhs);
            dedup_in_expr(rhs);
        }
        Expr::Call(call) if call.name == "select" => {
            for arg in &mut call.args {
                if let Expr::Dict(entries) = &mut arg.value {
                    for (_, value) in entries {
                        dedup_in_expr(value);
                    }
                }
            }
        }
        _ => {}
    }
}
