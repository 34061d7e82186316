//! Proto source inspection
//!
//! Pulls the package name, `option go_package`, the import list, and
//! service presence out of a `.proto` file. Comments are stripped first
//! so declarations inside them do not count.

use std::sync::LazyLock;

use regex::Regex;

/// Facts about one `.proto` file.
#[derive(Debug, Clone, Default)]
pub struct ProtoFileInfo {
    pub name: String,
    pub package: Option<String>,
    pub go_package: Option<String>,
    pub imports: Vec<String>,
    pub has_service: bool,
}

static PACKAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*package\s+([\w.]+)\s*;").expect("static regex"));
static GO_PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*option\s+go_package\s*=\s*"([^"]*)"\s*;"#).expect("static regex")
});
static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*import\s+(?:public\s+|weak\s+)?"([^"]+)"\s*;"#).expect("static regex")
});
static SERVICE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*service\s+\w+").expect("static regex"));

pub fn parse_proto_source(name: &str, code: &str) -> ProtoFileInfo {
    let stripped = strip_comments(code);
    let go_package = GO_PACKAGE_RE.captures(&stripped).map(|c| {
        let value = c[1].to_string();
        // "example.com/repo;alias" carries an explicit package alias.
        match value.split_once(';') {
            Some((path, _)) => path.to_string(),
            None => value,
        }
    });
    ProtoFileInfo {
        name: name.to_string(),
        package: PACKAGE_RE.captures(&stripped).map(|c| c[1].to_string()),
        go_package,
        imports: IMPORT_RE
            .captures_iter(&stripped)
            .map(|c| c[1].to_string())
            .collect(),
        has_service: SERVICE_RE.is_match(&stripped),
    }
}

fn strip_comments(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let bytes = code.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"//") {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
        } else if bytes[i..].starts_with(b"/*") {
            i += 2;
            while i < bytes.len() && !bytes[i..].starts_with(b"*/") {
                i += 1;
            }
            i = (i + 2).min(bytes.len());
        } else if bytes[i] == b'"' {
            out.push('"');
            i += 1;
            while i < bytes.len() && bytes[i] != b'"' {
                if bytes[i] == b'\\' {
                    out.push(bytes[i] as char);
                    i += 1;
                    if i >= bytes.len() {
                        break;
                    }
                }
                out.push(bytes[i] as char);
                i += 1;
            }
            if i < bytes.len() {
                out.push('"');
                i += 1;
            }
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}
