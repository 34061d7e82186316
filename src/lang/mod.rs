//! Language extensions
//!
//! A language is a bundle of capabilities: it declares the rule kinds it
//! owns and their load locations, reads its directives during
//! configuration, turns packages into generated rules, tells the index
//! which importable identities a rule provides, and resolves import
//! strings to labels. The registry holds the registered languages in a
//! deterministic order; lookups by kind walk that order.

pub mod go;
pub mod proto;

use crate::config::Config;
use crate::error::GazelleError;
use crate::index::{ImportSpec, RuleIndex, RuleSnapshot};
use crate::label::Label;
use crate::pkg::Package;
use crate::platform::PlatformStrings;
use crate::remote::RemoteCache;
use crate::rule::{Rule, RuleImports};

/// Merge and resolution behavior of one rule kind.
#[derive(Debug, Clone, Copy)]
pub struct KindInfo {
    pub kind: &'static str,
    /// Attributes beyond (kind, name) that identify a rule across merges.
    pub match_attrs: &'static [&'static str],
    /// Attributes the merger may overwrite.
    pub mergeable_attrs: &'static [&'static str],
    /// Attributes written by the resolve pass, merged after it.
    pub resolve_attrs: &'static [&'static str],
    /// Attributes whose presence marks the rule as non-empty.
    pub nonempty_attrs: &'static [&'static str],
}

impl KindInfo {
    pub fn is_mergeable(&self, attr: &str) -> bool {
        self.mergeable_attrs.contains(&attr)
    }

    pub fn is_resolve_attr(&self, attr: &str) -> bool {
        self.resolve_attrs.contains(&attr)
    }
}

/// Where the symbols for generated kinds are loaded from.
#[derive(Debug, Clone, Copy)]
pub struct LoadInfo {
    pub file: &'static str,
    pub symbols: &'static [&'static str],
}

/// Output of one language's generate pass for one package.
#[derive(Debug, Default)]
pub struct GenerateResult {
    /// Newly built rules, imports attached as private metadata.
    pub rules: Vec<Rule>,
    /// Same-kind, same-name markers for rules that should be deleted.
    pub empty: Vec<Rule>,
}

/// A language extension.
pub trait Language {
    fn name(&self) -> &'static str;

    fn kinds(&self) -> &'static [KindInfo];

    fn loads(&self) -> &'static [LoadInfo];

    /// Directive keys this language owns.
    fn directives(&self) -> &'static [&'static str] {
        &[]
    }

    /// Read this language's directives for a directory.
    fn configure(&self, config: &mut Config, rel: &str, file: Option<&crate::ast::File>);

    /// Produce rules for a package.
    fn generate(&self, config: &Config, pkg: &Package) -> GenerateResult;

    /// Importable identities a rule provides, or `None` when the rule's
    /// kind does not belong to this language.
    fn index_specs(
        &self,
        config: &Config,
        rel: &str,
        snapshot: &RuleSnapshot,
    ) -> Option<Vec<ImportSpec>>;

    /// Map import strings to labels. Returns the resolved dependencies
    /// (platform partition preserved) plus any diagnostics.
    fn resolve(
        &self,
        config: &Config,
        index: &RuleIndex,
        cache: &RemoteCache,
        imports: &RuleImports,
        from: &Label,
    ) -> (PlatformStrings, Vec<GazelleError>);
}

/// Registered languages in deterministic order: proto before Go, so Go
/// rules can embed the proto-derived libraries generated alongside them.
pub struct LanguageRegistry {
    langs: Vec<Box<dyn Language>>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self {
            langs: vec![
                Box::new(proto::ProtoLanguage::new()),
                Box::new(go::GoLanguage::new()),
            ],
        }
    }

    pub fn langs(&self) -> &[Box<dyn Language>] {
        &self.langs
    }

    pub fn iter_enabled<'a>(
        &'a self,
        config: &'a Config,
    ) -> impl Iterator<Item = &'a Box<dyn Language>> {
        self.langs
            .iter()
            .filter(|lang| config.lang_enabled(lang.name()))
    }

    /// All directive keys owned by any registered language.
    pub fn directive_keys(&self) -> Vec<&'static str> {
        self.langs
            .iter()
            .flat_map(|lang| lang.directives().iter().copied())
            .collect()
    }

    /// Kind metadata, searched across languages in registration order.
    pub fn kind_info(&self, kind: &str) -> Option<&'static KindInfo> {
        self.langs
            .iter()
            .flat_map(|lang| lang.kinds().iter())
            .find(|info| info.kind == kind)
    }

    /// The load file providing a kind's symbol, if any.
    pub fn load_for(&self, symbol: &str) -> Option<&'static str> {
        self.langs
            .iter()
            .flat_map(|lang| lang.loads().iter())
            .find(|load| load.symbols.contains(&symbol))
            .map(|load| load.file)
    }
}
