//! Dependency resolution: index lookups, vendor visibility, overrides,
//! and kind mapping.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use gazelle::config::Config;
use gazelle::driver::{DriverOptions, run};
use gazelle::lang::LanguageRegistry;
use gazelle::remote::RemoteCache;

fn run_update(root: &Path, update_rels: &[String]) -> gazelle::Result<()> {
    let config = Config::new(root);
    let registry = LanguageRegistry::new();
    let cache = RemoteCache::new();
    run(
        &config,
        &registry,
        &cache,
        update_rels,
        &DriverOptions::default(),
    )
    .map(|_| ())
}

fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

#[test]
fn vendor_copy_is_not_preferred_over_source() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        "# gazelle:prefix example.com/repo\n",
    )
    .unwrap();

    // The in-repo source of example.com/foo/x.
    let a = tmp.path().join("a");
    fs::create_dir(&a).unwrap();
    fs::write(
        a.join("BUILD.bazel"),
        r#"go_library(
    name = "a",
    srcs = ["a.go"],
    importpath = "example.com/foo/x",
    visibility = ["//visibility:public"],
)
"#,
    )
    .unwrap();
    fs::write(a.join("a.go"), "package x\n").unwrap();

    // A vendored copy of the same import path.
    let vendored = tmp.path().join("vendor/example.com/foo/x");
    fs::create_dir_all(&vendored).unwrap();
    fs::write(
        vendored.join("BUILD.bazel"),
        r#"go_library(
    name = "x",
    srcs = ["x.go"],
    importpath = "example.com/foo/x",
    visibility = ["//visibility:public"],
)
"#,
    )
    .unwrap();
    fs::write(vendored.join("x.go"), "package x\n").unwrap();

    let b = tmp.path().join("b");
    fs::create_dir(&b).unwrap();
    fs::write(
        b.join("b.go"),
        "package b\n\nimport \"example.com/foo/x\"\n\nvar _ = x.X\n",
    )
    .unwrap();

    run_update(tmp.path(), &["b".to_string()]).unwrap();

    let content = read(tmp.path(), "b/BUILD.bazel");
    assert!(content.contains("deps = [\"//a\"]"), "{content}");
    assert!(!content.contains("vendor"), "{content}");
}

#[test]
fn keep_on_deps_freezes_resolution() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        "# gazelle:prefix example.com/repo\n",
    )
    .unwrap();
    let a = tmp.path().join("a");
    fs::create_dir(&a).unwrap();
    fs::write(a.join("a.go"), "package a\n").unwrap();
    let b = tmp.path().join("b");
    fs::create_dir(&b).unwrap();
    fs::write(
        b.join("BUILD.bazel"),
        r#"go_library(
    name = "b",
    srcs = ["b.go"],
    importpath = "example.com/repo/b",
    # keep
    deps = ["//custom:dep"],
)
"#,
    )
    .unwrap();
    fs::write(
        b.join("b.go"),
        "package b\n\nimport \"example.com/repo/a\"\n\nvar _ = a.X\n",
    )
    .unwrap();

    run_update(tmp.path(), &[]).unwrap();

    let content = read(tmp.path(), "b/BUILD.bazel");
    assert!(content.contains("deps = [\"//custom:dep\"]"), "{content}");
    assert!(!content.contains("//a"), "{content}");
}

#[test]
fn resolve_directive_overrides_index() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        "# gazelle:prefix example.com/repo\n# gazelle:resolve go example.com/repo/a //chosen:one\n",
    )
    .unwrap();
    let a = tmp.path().join("a");
    fs::create_dir(&a).unwrap();
    fs::write(a.join("a.go"), "package a\n").unwrap();
    let b = tmp.path().join("b");
    fs::create_dir(&b).unwrap();
    fs::write(
        b.join("b.go"),
        "package b\n\nimport \"example.com/repo/a\"\n\nvar _ = a.X\n",
    )
    .unwrap();

    run_update(tmp.path(), &[]).unwrap();

    let content = read(tmp.path(), "b/BUILD.bazel");
    assert!(content.contains("deps = [\"//chosen:one\"]"), "{content}");
}

#[test]
fn external_imports_fall_back_to_remote_cache() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        "# gazelle:prefix example.com/repo\n",
    )
    .unwrap();
    let a = tmp.path().join("a");
    fs::create_dir(&a).unwrap();
    fs::write(
        a.join("a.go"),
        "package a\n\nimport \"github.com/pkg/errors\"\n\nvar _ = errors.New\n",
    )
    .unwrap();

    run_update(tmp.path(), &[]).unwrap();

    let content = read(tmp.path(), "a/BUILD.bazel");
    assert!(
        content.contains("deps = [\"@com_github_pkg_errors//:errors\"]"),
        "{content}"
    );
}

#[test]
fn map_kind_is_transitive_across_directories() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        "# gazelle:prefix example.com/repo\n# gazelle:map_kind go_library my_library //tools/go:def.bzl\n",
    )
    .unwrap();
    let nested = tmp.path().join("nested");
    fs::create_dir(&nested).unwrap();
    fs::write(
        nested.join("BUILD.bazel"),
        "# gazelle:map_kind my_library other_library //other:def.bzl\n",
    )
    .unwrap();
    fs::write(nested.join("n.go"), "package nested\n").unwrap();
    let outer = tmp.path().join("outer");
    fs::create_dir(&outer).unwrap();
    fs::write(outer.join("o.go"), "package outer\n").unwrap();

    run_update(tmp.path(), &[]).unwrap();

    let nested_content = read(tmp.path(), "nested/BUILD.bazel");
    assert!(nested_content.contains("other_library("), "{nested_content}");
    assert!(
        nested_content.contains("load(\"//other:def.bzl\", \"other_library\")"),
        "{nested_content}"
    );

    let outer_content = read(tmp.path(), "outer/BUILD.bazel");
    assert!(outer_content.contains("my_library("), "{outer_content}");
    assert!(
        outer_content.contains("load(\"//tools/go:def.bzl\", \"my_library\")"),
        "{outer_content}"
    );
}

#[test]
fn map_kind_self_cycle_is_rejected() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        "# gazelle:map_kind go_library my_library //a:def.bzl\n",
    )
    .unwrap();
    let nested = tmp.path().join("nested");
    fs::create_dir(&nested).unwrap();
    fs::write(
        nested.join("BUILD.bazel"),
        "# gazelle:map_kind my_library go_library //b:def.bzl\n",
    )
    .unwrap();
    fs::write(nested.join("n.go"), "package nested\n").unwrap();

    let err = run_update(tmp.path(), &[]);
    assert!(matches!(
        err,
        Err(gazelle::GazelleError::KindCycle { .. })
    ));
}

#[test]
fn xtest_depends_on_library_under_test() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        "# gazelle:prefix example.com/repo\n",
    )
    .unwrap();
    let a = tmp.path().join("a");
    fs::create_dir(&a).unwrap();
    fs::write(a.join("a.go"), "package a\n").unwrap();
    fs::write(
        a.join("ext_test.go"),
        "package a_test\n\nimport \"example.com/repo/a\"\n\nvar _ = a.X\n",
    )
    .unwrap();

    run_update(tmp.path(), &[]).unwrap();

    let content = read(tmp.path(), "a/BUILD.bazel");
    assert!(content.contains("name = \"a_xtest\""), "{content}");
    assert!(content.contains("deps = [\"//a\"]"), "{content}");
}
