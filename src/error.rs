//! Error types for build file generation
//!
//! This module provides structured error types using thiserror. Most
//! pipeline failures are non-fatal: they are accumulated as diagnostics and
//! reported at the end of the run, which then exits non-zero. Strict mode
//! promotes every diagnostic to a fatal error.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for generation, resolution, and merging
#[derive(Error, Debug)]
pub enum GazelleError {
    /// Invalid flag combination, unparseable directive, bad repo root
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Existing build file could not be parsed
    #[error("{path}:{line}: parse error: {reason}")]
    BuildFileParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Source-level inconsistency in one directory
    #[error("{rel}: {reason}")]
    Generate { rel: String, reason: String },

    /// An import could not be mapped to a label
    #[error("could not resolve {lang} import {imp:?} from {from}")]
    Resolve {
        lang: &'static str,
        imp: String,
        from: String,
    },

    /// Two or more candidate rules match an import
    #[error(
        "multiple rules ({candidates}) provide {lang} import {imp:?}; disambiguate with a gazelle:resolve directive"
    )]
    Ambiguous {
        lang: &'static str,
        imp: String,
        candidates: String,
    },

    /// A `# keep` annotation blocked an automated change
    #[error("{path}: rule {name:?}: attribute {attr:?} is marked keep; not updating")]
    KeepConflict {
        path: PathBuf,
        name: String,
        attr: String,
    },

    /// A rule slated for deletion still carries authored data
    #[error("{path}: rule {name:?} is empty but has hand-written attributes; not deleting")]
    NotEmptied { path: PathBuf, name: String },

    /// kind A maps to kind B maps back to kind A
    #[error("map_kind cycle detected on {kind:?}; check gazelle:map_kind directives in this subtree")]
    KindCycle { kind: String },

    #[error("unknown directive {key:?} in {path}")]
    UnknownDirective { key: String, path: PathBuf },

    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl GazelleError {
    /// Whether this error aborts the run even outside strict mode.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::KindCycle { .. } | Self::FileWrite { .. }
        )
    }
}

/// Result type alias for generation operations
pub type Result<T> = std::result::Result<T, GazelleError>;

/// Accumulates non-fatal diagnostics across a run.
///
/// The driver logs each diagnostic as it is recorded and uses the count to
/// pick the process exit status.
#[derive(Default)]
pub struct Diagnostics {
    errors: Vec<GazelleError>,
    strict: bool,
}

impl Diagnostics {
    pub fn new(strict: bool) -> Self {
        Self {
            errors: Vec::new(),
            strict,
        }
    }

    /// Record a diagnostic. Returns an error when it must abort the run:
    /// always in strict mode, otherwise only for intrinsically fatal kinds.
    pub fn record(&mut self, err: GazelleError) -> Result<()> {
        tracing::warn!("{err}");
        if self.strict || err.is_fatal() {
            return Err(err);
        }
        self.errors.push(err);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[GazelleError] {
        &self.errors
    }
}
