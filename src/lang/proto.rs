//! Proto language extension
//!
//! Generates `proto_library` rules from `.proto` sources and resolves
//! proto imports: well-known types short-circuit to the shared protobuf
//! repository, everything else goes through the override table and the
//! rule index.

use crate::ast::File;
use crate::config::{Config, ProtoMode};
use crate::error::GazelleError;
use crate::index::{ImportSpec, RuleIndex, RuleSnapshot};
use crate::label::Label;
use crate::pkg::Package;
use crate::platform::{PlatformSet, PlatformStrings};
use crate::remote::RemoteCache;
use crate::rule::{Rule, RuleImports};

use super::{GenerateResult, KindInfo, Language, LoadInfo};

pub const RULES_PROTO_DEFS_BZL: &str = "@rules_proto//proto:defs.bzl";

static KINDS: &[KindInfo] = &[KindInfo {
    kind: "proto_library",
    match_attrs: &["srcs"],
    mergeable_attrs: &["srcs", "import_prefix", "strip_import_prefix", "visibility"],
    resolve_attrs: &["deps"],
    nonempty_attrs: &["srcs"],
}];

static LOADS: &[LoadInfo] = &[LoadInfo {
    file: RULES_PROTO_DEFS_BZL,
    symbols: &["proto_library"],
}];

/// Imports under this prefix point at well-known types compiled into the
/// shared protobuf repository.
const WELL_KNOWN_PREFIX: &str = "google/protobuf/";

pub fn is_well_known(imp: &str) -> bool {
    imp.starts_with(WELL_KNOWN_PREFIX)
}

/// The fixed label for a well-known type import.
pub fn well_known_label(imp: &str) -> Option<Label> {
    let base = imp
        .strip_prefix(WELL_KNOWN_PREFIX)?
        .strip_suffix(".proto")?;
    Some(Label::external(
        "com_google_protobuf",
        "",
        format!("{base}_proto"),
    ))
}

pub struct ProtoLanguage;

impl ProtoLanguage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProtoLanguage {
    fn default() -> Self {
        Self::new()
    }
}

impl Language for ProtoLanguage {
    fn name(&self) -> &'static str {
        "proto"
    }

    fn kinds(&self) -> &'static [KindInfo] {
        KINDS
    }

    fn loads(&self) -> &'static [LoadInfo] {
        LOADS
    }

    fn directives(&self) -> &'static [&'static str] {
        &["proto"]
    }

    fn configure(&self, config: &mut Config, _rel: &str, file: Option<&File>) {
        let Some(file) = file else { return };
        for directive in file.directives() {
            if directive.key == "proto" {
                match ProtoMode::from_directive(&directive.value) {
                    Some(mode) => config.proto_mode = mode,
                    None => {
                        tracing::warn!(
                            "unknown proto mode {:?}; keeping current",
                            directive.value
                        );
                    }
                }
            }
        }
    }

    fn generate(&self, config: &Config, pkg: &Package) -> GenerateResult {
        let mut result = GenerateResult::default();
        if matches!(config.proto_mode, ProtoMode::Disable | ProtoMode::Legacy) {
            return result;
        }
        let base = super::go::package_base_name(config, &pkg.rel);
        let name = format!("{base}_proto");
        let Some(proto) = &pkg.proto else {
            result.empty.push(Rule::new("proto_library", name));
            return result;
        };

        let mut rule = Rule::new("proto_library", name);
        rule.set_attr("srcs", proto.srcs.clone());
        rule.set_attr(
            "visibility",
            vec![super::go::default_visibility(&pkg.rel)],
        );
        let mut imports = PlatformStrings::default();
        for imp in &proto.imports {
            imports.add(imp, &PlatformSet::Any);
        }
        rule.set_imports(RuleImports::new("proto", imports));
        result.rules.push(rule);
        result
    }

    fn index_specs(
        &self,
        _config: &Config,
        rel: &str,
        snapshot: &RuleSnapshot,
    ) -> Option<Vec<ImportSpec>> {
        if snapshot.kind != "proto_library" {
            return None;
        }
        Some(
            snapshot
                .srcs
                .iter()
                .map(|src| {
                    let imp = if rel.is_empty() {
                        src.clone()
                    } else {
                        format!("{rel}/{src}")
                    };
                    ImportSpec::new("proto", imp)
                })
                .collect(),
        )
    }

    fn resolve(
        &self,
        config: &Config,
        index: &RuleIndex,
        _cache: &RemoteCache,
        imports: &RuleImports,
        from: &Label,
    ) -> (PlatformStrings, Vec<GazelleError>) {
        let mut deps = PlatformStrings::default();
        let mut errors = Vec::new();
        for imp in imports.imports.flat() {
            if let Some(label) = well_known_label(&imp) {
                deps.generic.push(label.to_string());
                continue;
            }
            if let Some(label) = config.resolve_override("proto", "proto", &imp) {
                deps.generic.push(label.to_string());
                continue;
            }
            match index.find_by_import(&ImportSpec::new("proto", imp.clone()), from) {
                Ok(Some(entry)) => deps.generic.push(entry.label.to_string()),
                Ok(None) => {
                    errors.push(GazelleError::Resolve {
                        lang: "proto",
                        imp,
                        from: from.to_string(),
                    });
                }
                Err(err) => errors.push(err),
            }
        }
        (deps, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pkg::ProtoFileInfo;

    fn proto_package(config: &Config, imports: &[&str], has_service: bool) -> Package {
        Package::build(
            "svc",
            config,
            vec![],
            vec![ProtoFileInfo {
                name: "svc.proto".to_string(),
                package: Some("svc".to_string()),
                go_package: Some("example.com/repo/svc".to_string()),
                imports: imports.iter().map(|s| s.to_string()).collect(),
                has_service,
            }],
            false,
            &[],
        )
        .unwrap()
        .unwrap()
    }

    #[test]
    fn generates_proto_library() {
        let config = Config::new("/repo");
        let pkg = proto_package(&config, &["google/protobuf/timestamp.proto"], false);
        let result = ProtoLanguage::new().generate(&config, &pkg);
        assert_eq!(result.rules.len(), 1);
        let rule = &result.rules[0];
        assert_eq!(rule.kind(), "proto_library");
        assert_eq!(rule.name(), "svc_proto");
        assert_eq!(rule.attr_strings("srcs"), vec!["svc.proto"]);
    }

    #[test]
    fn disable_mode_generates_nothing() {
        let mut config = Config::new("/repo");
        config.proto_mode = ProtoMode::Disable;
        let pkg = proto_package(&config, &[], false);
        let result = ProtoLanguage::new().generate(&config, &pkg);
        assert!(result.rules.is_empty());
        assert!(result.empty.is_empty());
    }

    #[test]
    fn well_known_labels() {
        assert!(is_well_known("google/protobuf/timestamp.proto"));
        assert_eq!(
            well_known_label("google/protobuf/timestamp.proto")
                .unwrap()
                .to_string(),
            "@com_google_protobuf//:timestamp_proto"
        );
        assert!(well_known_label("other/thing.proto").is_none());
    }

    #[test]
    fn index_specs_qualified_by_rel() {
        let config = Config::new("/repo");
        let snapshot = RuleSnapshot {
            kind: "proto_library".to_string(),
            name: "svc_proto".to_string(),
            importpath: None,
            srcs: vec!["svc.proto".to_string()],
            embed: vec![],
        };
        let specs = ProtoLanguage::new()
            .index_specs(&config, "a/b", &snapshot)
            .unwrap();
        assert_eq!(specs, vec![ImportSpec::new("proto", "a/b/svc.proto")]);
    }
}
