//! End-to-end generation: fresh rules from a source tree.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use gazelle::config::Config;
use gazelle::driver::{DriverOptions, run};
use gazelle::lang::LanguageRegistry;
use gazelle::remote::RemoteCache;

fn run_update(root: &Path, update_rels: &[String]) {
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
    .unwrap();
}

fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

#[test]
fn new_library_generation() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("WORKSPACE"), "").unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        "# gazelle:prefix example.com/hello\n",
    )
    .unwrap();
    fs::write(tmp.path().join("hello.go"), "package hello\n").unwrap();

    run_update(tmp.path(), &[]);

    let content = read(tmp.path(), "BUILD.bazel");
    assert!(
        content.contains("load(\"@io_bazel_rules_go//go:def.bzl\", \"go_library\")"),
        "{content}"
    );
    assert!(content.contains("name = \"hello\""), "{content}");
    assert!(content.contains("srcs = [\"hello.go\"]"), "{content}");
    assert!(
        content.contains("importpath = \"example.com/hello\""),
        "{content}"
    );
    assert!(
        content.contains("visibility = [\"//visibility:public\"]"),
        "{content}"
    );
}

#[test]
fn platform_constrained_sources_build_a_select() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        "# gazelle:prefix example.com/hello\n",
    )
    .unwrap();
    fs::write(tmp.path().join("a.go"), "package hello\n").unwrap();
    fs::write(tmp.path().join("b_linux.go"), "package hello\n").unwrap();

    run_update(tmp.path(), &[]);

    let content = read(tmp.path(), "BUILD.bazel");
    assert!(content.contains("srcs = [\"a.go\"] + select({"), "{content}");
    assert!(
        content.contains("\"@io_bazel_rules_go//go/platform:linux\": ["),
        "{content}"
    );
    assert!(content.contains("\"b_linux.go\""), "{content}");
    assert!(content.contains("\"//conditions:default\": []"), "{content}");
}

#[test]
fn command_package_generates_binary() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        "# gazelle:prefix example.com/repo\n",
    )
    .unwrap();
    let cmd = tmp.path().join("cmd").join("tool");
    fs::create_dir_all(&cmd).unwrap();
    fs::write(cmd.join("main.go"), "package main\n\nfunc main() {}\n").unwrap();

    run_update(tmp.path(), &[]);

    let content = read(tmp.path(), "cmd/tool/BUILD.bazel");
    assert!(content.contains("go_binary("), "{content}");
    assert!(content.contains("name = \"tool\""), "{content}");
    assert!(content.contains("embed = [\":tool_lib\"]"), "{content}");
    assert!(
        content.contains("importpath = \"example.com/repo/cmd/tool\""),
        "{content}"
    );
}

#[test]
fn test_files_generate_go_test() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        "# gazelle:prefix example.com/hello\n",
    )
    .unwrap();
    fs::write(tmp.path().join("hello.go"), "package hello\n").unwrap();
    fs::write(
        tmp.path().join("hello_test.go"),
        "package hello\n\nimport \"testing\"\n\nfunc TestX(t *testing.T) {}\n",
    )
    .unwrap();
    let td = tmp.path().join("testdata");
    fs::create_dir(&td).unwrap();
    fs::write(td.join("golden.txt"), "x").unwrap();

    run_update(tmp.path(), &[]);

    let content = read(tmp.path(), "BUILD.bazel");
    assert!(content.contains("go_test("), "{content}");
    assert!(content.contains("name = \"hello_test\""), "{content}");
    assert!(content.contains("embed = [\":hello\"]"), "{content}");
    assert!(content.contains("data = glob([\"testdata/**\"])"), "{content}");
}

#[test]
fn internal_packages_get_narrowed_visibility() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        "# gazelle:prefix example.com/repo\n",
    )
    .unwrap();
    let internal = tmp.path().join("internal").join("secret");
    fs::create_dir_all(&internal).unwrap();
    fs::write(internal.join("s.go"), "package secret\n").unwrap();

    run_update(tmp.path(), &[]);

    let content = read(tmp.path(), "internal/secret/BUILD.bazel");
    assert!(
        content.contains("visibility = [\"//:__subpackages__\"]"),
        "{content}"
    );
}

#[test]
fn proto_generates_library_chain() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        "# gazelle:prefix example.com/repo\n",
    )
    .unwrap();
    let svc = tmp.path().join("svc");
    fs::create_dir(&svc).unwrap();
    fs::write(
        svc.join("svc.proto"),
        "syntax = \"proto3\";\n\npackage svc;\n\noption go_package = \"example.com/repo/svc\";\n\nmessage Ping {}\n",
    )
    .unwrap();

    run_update(tmp.path(), &[]);

    let content = read(tmp.path(), "svc/BUILD.bazel");
    assert!(content.contains("proto_library("), "{content}");
    assert!(content.contains("name = \"svc_proto\""), "{content}");
    assert!(content.contains("go_proto_library("), "{content}");
    assert!(content.contains("name = \"svc_go_proto\""), "{content}");
    assert!(
        content.contains("compilers = [\"@io_bazel_rules_go//proto:go_proto\"]"),
        "{content}"
    );
    assert!(content.contains("proto = \":svc_proto\""), "{content}");
    assert!(content.contains("embed = [\":svc_go_proto\"]"), "{content}");
    assert!(
        content.contains("load(\"@rules_proto//proto:defs.bzl\", \"proto_library\")"),
        "{content}"
    );
}

#[test]
fn two_runs_are_byte_identical() {
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
        b.join("b.go"),
        "package b\n\nimport \"example.com/repo/a\"\n\nvar _ = a.X\n",
    )
    .unwrap();
    fs::write(b.join("b_test.go"), "package b\n").unwrap();

    run_update(tmp.path(), &[]);
    let first: Vec<String> = ["BUILD.bazel", "a/BUILD.bazel", "b/BUILD.bazel"]
        .iter()
        .map(|p| read(tmp.path(), p))
        .collect();

    run_update(tmp.path(), &[]);
    let second: Vec<String> = ["BUILD.bazel", "a/BUILD.bazel", "b/BUILD.bazel"]
        .iter()
        .map(|p| read(tmp.path(), p))
        .collect();

    assert_eq!(first, second);
}
