//! Upgrades for deprecated rule shapes
//!
//! Two tiers: [`fix_file_minor`] runs on every update and performs only
//! safe rewrites (the deprecated `library` attribute becomes `embed`).
//! [`fix_file`] runs under the `fix` command and restructures rules:
//! legacy `cgo_library` rules are squashed into their `go_library`, and
//! deprecated proto shapes (all-proto `filegroup`s, `go_proto_library`
//! with inline `srcs`) are removed so generation can replace them.

use crate::ast::{Expr, File, StmtKind};
use crate::config::{Config, ProtoMode};
use crate::rule::{expr_strings, map_expr_strings};

/// Safe rewrites, run before every merge.
pub fn fix_file_minor(file: &mut File) {
    migrate_library_to_embed(file);
}

/// Structural rewrites, run only under the `fix` command.
pub fn fix_file(config: &Config, file: &mut File) {
    squash_cgo_library(file);
    if matches!(config.proto_mode, ProtoMode::Default | ProtoMode::Package) {
        remove_legacy_proto_rules(file);
    }
}

/// `library = ":x"` on go rules becomes `embed = [":x"]`.
fn migrate_library_to_embed(file: &mut File) {
    for stmt in &mut file.stmts {
        let StmtKind::Rule(call) = &mut stmt.kind else {
            continue;
        };
        if !matches!(call.name.as_str(), "go_library" | "go_binary" | "go_test") {
            continue;
        }
        let Some(arg) = call.arg_entry("library") else {
            continue;
        };
        if arg.comments.has_keep() {
            continue;
        }
        let Some(target) = arg.value.as_string().map(str::to_string) else {
            continue;
        };
        match call.arg_entry_mut("embed") {
            Some(embed) => {
                if let Expr::List(items) = &mut embed.value {
                    if !items.iter().any(|i| i.as_string() == Some(&target)) {
                        items.push(Expr::string(target));
                    }
                }
            }
            None => call.set_arg("embed", Expr::string_list([target])),
        }
        call.del_arg("library");
    }
}

/// Fold each `cgo_library` into the `go_library` that embeds it; a
/// `cgo_library` nothing embeds is renamed in place.
fn squash_cgo_library(file: &mut File) {
    // (statement index, name, srcs, copts, clinkopts) per cgo_library.
    let mut cgo_rules: Vec<(usize, String, Vec<String>, Option<Expr>, Option<Expr>)> = Vec::new();
    for (stmt, call) in file.rules() {
        if call.name != "cgo_library" || stmt.comments.has_keep() {
            continue;
        }
        let Some(name) = call.arg("name").and_then(|e| e.as_string()) else {
            continue;
        };
        cgo_rules.push((
            stmt.index,
            name.to_string(),
            call.arg("srcs").map(expr_strings).unwrap_or_default(),
            call.arg("copts").cloned(),
            call.arg("clinkopts").cloned(),
        ));
    }

    enum Outcome {
        Absorbed,
        Frozen,
        NoEmbedder,
    }

    for (cgo_index, cgo_name, cgo_srcs, copts, clinkopts) in cgo_rules {
        let target = format!(":{cgo_name}");
        let mut outcome = Outcome::NoEmbedder;
        for stmt in &mut file.stmts {
            let StmtKind::Rule(call) = &mut stmt.kind else {
                continue;
            };
            if call.name != "go_library" {
                continue;
            }
            let embeds = call.arg("embed").map(expr_strings).unwrap_or_default();
            if !embeds.contains(&target) {
                continue;
            }
            if stmt.comments.has_keep() {
                // The annotated pair is left alone in full.
                outcome = Outcome::Frozen;
                break;
            }
            // Union the sources and pull the cgo attributes across.
            let mut srcs = call.arg("srcs").map(expr_strings).unwrap_or_default();
            for src in &cgo_srcs {
                if !srcs.contains(src) {
                    srcs.push(src.clone());
                }
            }
            srcs.sort();
            call.set_arg("srcs", Expr::string_list(srcs));
            call.set_arg("cgo", Expr::Ident("True".to_string()));
            if let Some(copts) = copts.clone() {
                call.set_arg("copts", copts);
            }
            if let Some(clinkopts) = clinkopts.clone() {
                call.set_arg("clinkopts", clinkopts);
            }
            if let Some(embed) = call.arg_entry_mut("embed") {
                let remaining = map_expr_strings(&embed.value, &|s| {
                    (s != target).then(|| s.to_string())
                });
                match remaining {
                    Some(value) if !value.is_empty_value() => embed.value = value,
                    _ => {
                        call.del_arg("embed");
                    }
                }
            }
            outcome = Outcome::Absorbed;
            break;
        }
        match outcome {
            Outcome::Absorbed => {
                file.remove_stmt(cgo_index);
            }
            Outcome::Frozen => {}
            Outcome::NoEmbedder => {
                // No embedding library: the rule itself becomes a go_library.
                if let Some(stmt) = file.stmt_by_index_mut(cgo_index) {
                    if let StmtKind::Rule(call) = &mut stmt.kind {
                        call.name = "go_library".to_string();
                        call.set_arg("cgo", Expr::Ident("True".to_string()));
                    }
                }
            }
        }
    }
}

/// Deprecated proto shapes: an all-proto `filegroup` and a
/// `go_proto_library` carrying inline `srcs` are superseded by the
/// generated `proto_library` / `go_proto_library` pair.
fn remove_legacy_proto_rules(file: &mut File) {
    let mut remove = Vec::new();
    for (stmt, call) in file.rules() {
        if stmt.comments.has_keep() {
            continue;
        }
        match call.name.as_str() {
            "filegroup" => {
                let srcs = call.arg("srcs").map(expr_strings).unwrap_or_default();
                if !srcs.is_empty() && srcs.iter().all(|s| s.ends_with(".proto")) {
                    remove.push(stmt.index);
                }
            }
            "go_proto_library" => {
                if call.arg("srcs").is_some() && call.arg("proto").is_none() {
                    remove.push(stmt.index);
                }
            }
            _ => {}
        }
    }
    for index in remove {
        file.remove_stmt(index);
    }
}
