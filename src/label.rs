//! Canonical rule identifiers
//!
//! A label names a rule across repositories, packages, and rule names. The
//! text form is `[@repo]//pkg[:name]`, with `:name` omitted when it equals
//! the last package component, and a bare `:name` form for labels relative
//! to the package being generated.

use std::fmt;

use crate::error::{GazelleError, Result};

/// Canonical identifier of a rule.
///
/// `repo` is empty for the repository under generation. `pkg` is a
/// slash-separated path from the repository root. Relative labels carry
/// only a name and must be made absolute with [`Label::abs`] before
/// indexing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub repo: String,
    pub pkg: String,
    pub name: String,
    pub relative: bool,
}

impl Label {
    /// An absolute label in this repository.
    pub fn new(pkg: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            repo: String::new(),
            pkg: pkg.into(),
            name: name.into(),
            relative: false,
        }
    }

    /// An absolute label in an external repository.
    pub fn external(
        repo: impl Into<String>,
        pkg: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            pkg: pkg.into(),
            name: name.into(),
            relative: false,
        }
    }

    /// A label relative to the package being generated, rendered `:name`.
    pub fn relative(name: impl Into<String>) -> Self {
        Self {
            repo: String::new(),
            pkg: String::new(),
            name: name.into(),
            relative: true,
        }
    }

    /// Parse a label from its text form.
    pub fn parse(s: &str) -> Result<Self> {
        let err = |reason: &str| GazelleError::Config {
            reason: format!("invalid label {s:?}: {reason}"),
        };
        if s.is_empty() {
            return Err(err("empty"));
        }

        let (repo, rest) = if let Some(stripped) = s.strip_prefix('@') {
            match stripped.find("//") {
                Some(i) => (&stripped[..i], &stripped[i..]),
                // "@repo" is shorthand for "@repo//:repo"
                None => {
                    if stripped.is_empty() {
                        return Err(err("missing repository name"));
                    }
                    return Ok(Self::external(stripped, "", stripped));
                }
            }
        } else {
            ("", s)
        };

        if let Some(rest) = rest.strip_prefix("//") {
            let (pkg, name) = match rest.find(':') {
                Some(i) => (&rest[..i], &rest[i + 1..]),
                None => {
                    let name = rest.rsplit('/').next().unwrap_or(rest);
                    (rest, name)
                }
            };
            if pkg.starts_with('/') || pkg.ends_with('/') {
                return Err(err("package has a leading or trailing slash"));
            }
            if pkg.split('/').any(|c| c == "." || c == "..") {
                return Err(err("package contains a dot segment"));
            }
            if name.is_empty() && pkg.is_empty() {
                return Err(err("missing name"));
            }
            let name = if name.is_empty() {
                pkg.rsplit('/').next().unwrap_or(pkg)
            } else {
                name
            };
            return Ok(Self {
                repo: repo.to_string(),
                pkg: pkg.to_string(),
                name: name.to_string(),
                relative: false,
            });
        }

        if !repo.is_empty() {
            return Err(err("external label must contain //"));
        }

        // ":name" or bare "name" is relative to the current package
        let name = rest.strip_prefix(':').unwrap_or(rest);
        if name.is_empty() || name.contains(':') || name.contains('/') {
            return Err(err("invalid relative name"));
        }
        Ok(Self::relative(name))
    }

    /// Resolve a relative label against the given repository and package.
    pub fn abs(&self, repo: &str, pkg: &str) -> Label {
        if !self.relative {
            return self.clone();
        }
        Label {
            repo: repo.to_string(),
            pkg: pkg.to_string(),
            name: self.name.clone(),
            relative: false,
        }
    }

    /// Key ordering deps lists the way buildifier does: relative labels
    /// first, then same-repo labels, then external labels, each
    /// alphabetically.
    pub fn sort_key(&self) -> (u8, String) {
        let group = if self.relative {
            0
        } else if self.repo.is_empty() {
            1
        } else {
            2
        };
        (group, self.to_string())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.relative {
            return write!(f, ":{}", self.name);
        }
        if !self.repo.is_empty() {
            write!(f, "@{}", self.repo)?;
        }
        write!(f, "//{}", self.pkg)?;
        let last = self.pkg.rsplit('/').next().unwrap_or(&self.pkg);
        if self.pkg.is_empty() || last != self.name {
            write!(f, ":{}", self.name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_absolute() {
        let l = Label::parse("//foo/bar:baz").unwrap();
        assert_eq!(l, Label::new("foo/bar", "baz"));
        assert_eq!(l.to_string(), "//foo/bar:baz");
    }

    #[test]
    fn parse_shorthand_name() {
        let l = Label::parse("//foo/bar").unwrap();
        assert_eq!(l, Label::new("foo/bar", "bar"));
        // name matching the last package component is omitted on render
        assert_eq!(l.to_string(), "//foo/bar");
    }

    #[test]
    fn parse_external() {
        let l = Label::parse("@com_github_pkg_errors//:errors").unwrap();
        assert_eq!(l, Label::external("com_github_pkg_errors", "", "errors"));
    }

    #[test]
    fn parse_repo_only() {
        let l = Label::parse("@foo").unwrap();
        assert_eq!(l, Label::external("foo", "", "foo"));
    }

    #[test]
    fn parse_relative() {
        assert_eq!(Label::parse(":lib").unwrap(), Label::relative("lib"));
        assert_eq!(Label::parse("lib").unwrap(), Label::relative("lib"));
    }

    #[test]
    fn rejects_dot_segments() {
        assert!(Label::parse("//foo/../bar:x").is_err());
        assert!(Label::parse("//foo/./bar:x").is_err());
        assert!(Label::parse("///foo:x").is_err());
    }

    #[test]
    fn round_trip() {
        for text in [
            "//foo/bar:baz",
            "//foo/bar",
            "//:root",
            "@my_repo//pkg:name",
            "@my_repo//pkg/sub",
            ":rel",
        ] {
            let l = Label::parse(text).unwrap();
            assert_eq!(Label::parse(&l.to_string()).unwrap(), l, "{text}");
        }
    }

    #[test]
    fn abs_resolves_relative() {
        let l = Label::relative("lib").abs("", "a/b");
        assert_eq!(l, Label::new("a/b", "lib"));
    }

    #[test]
    fn sort_groups() {
        let rel = Label::relative("a");
        let local = Label::new("pkg", "a");
        let ext = Label::external("repo", "", "a");
        let mut v = vec![ext.clone(), local.clone(), rel.clone()];
        v.sort_by_key(|l| l.sort_key());
        assert_eq!(v, vec![rel, local, ext]);
    }
}
