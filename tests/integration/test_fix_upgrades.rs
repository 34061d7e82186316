//! The fix pass: upgrades for deprecated rule shapes.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use gazelle::config::Config;
use gazelle::driver::{DriverOptions, run};
use gazelle::lang::LanguageRegistry;
use gazelle::remote::RemoteCache;

fn run_fix(root: &Path) {
    let config = Config::new(root);
    let registry = LanguageRegistry::new();
    let cache = RemoteCache::new();
    run(
        &config,
        &registry,
        &cache,
        &[],
        &DriverOptions {
            run_fix: true,
            ..Default::default()
        },
    )
    .unwrap();
}

fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

#[test]
fn cgo_merge_removes_legacy_sibling() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        r#"# gazelle:prefix example.com/hello

go_library(
    name = "hello",
    srcs = ["pure.go"],
    library = ":cgo_default_library",
    importpath = "example.com/hello",
)

cgo_library(
    name = "cgo_default_library",
    srcs = ["cgo.go"],
)
"#,
    )
    .unwrap();
    fs::write(tmp.path().join("pure.go"), "package hello\n").unwrap();
    fs::write(
        tmp.path().join("cgo.go"),
        "package hello\n\n// #include <stdlib.h>\nimport \"C\"\n",
    )
    .unwrap();

    run_fix(tmp.path());

    let content = read(tmp.path(), "BUILD.bazel");
    assert!(!content.contains("cgo_library("), "{content}");
    assert!(!content.contains("library ="), "{content}");
    assert!(content.contains("cgo = True"), "{content}");
    assert!(
        content.contains("srcs = [\n        \"cgo.go\",\n        \"pure.go\",\n    ]"),
        "{content}"
    );
}

#[test]
fn proto_pair_upgrade() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        "# gazelle:prefix example.com/repo\n",
    )
    .unwrap();
    let svc = tmp.path().join("svc");
    fs::create_dir(&svc).unwrap();
    fs::write(
        svc.join("BUILD.bazel"),
        r#"filegroup(
    name = "go_default_library_protos",
    srcs = ["svc.proto"],
)

go_proto_library(
    name = "svc_old_proto",
    srcs = ["svc.proto"],
)
"#,
    )
    .unwrap();
    fs::write(
        svc.join("svc.proto"),
        "syntax = \"proto3\";\n\npackage svc;\n\noption go_package = \"example.com/repo\";\n\nservice Greeter {\n    rpc Greet (Ping) returns (Ping);\n}\n\nmessage Ping {}\n",
    )
    .unwrap();

    run_fix(tmp.path());

    let content = read(tmp.path(), "svc/BUILD.bazel");
    assert!(!content.contains("filegroup("), "{content}");
    assert!(!content.contains("svc_old_proto"), "{content}");
    assert!(content.contains("proto_library("), "{content}");
    assert!(content.contains("name = \"svc_proto\""), "{content}");
    // A service promotes the compiler to the gRPC variant.
    assert!(
        content.contains("compilers = [\"@io_bazel_rules_go//proto:go_grpc\"]"),
        "{content}"
    );
    assert!(content.contains("embed = [\":svc_go_proto\"]"), "{content}");
    assert!(
        content.contains("visibility = [\"//visibility:public\"]"),
        "{content}"
    );
}

#[test]
fn keep_preserves_rule_whose_kind_would_change() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        r#"# gazelle:prefix example.com/hello

# keep
cgo_library(
    name = "cgo_default_library",
    srcs = ["cgo.go"],
)
"#,
    )
    .unwrap();
    fs::write(
        tmp.path().join("cgo.go"),
        "package hello\n\nimport \"C\"\n",
    )
    .unwrap();

    run_fix(tmp.path());

    let content = read(tmp.path(), "BUILD.bazel");
    // The annotated rule survives the fix pass untouched.
    assert!(content.contains("cgo_library("), "{content}");
    assert!(content.contains("srcs = [\"cgo.go\"]"), "{content}");
}

#[test]
fn second_fix_run_is_byte_identical() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("BUILD.bazel"),
        r#"# gazelle:prefix example.com/hello

go_library(
    name = "hello",
    srcs = ["pure.go"],
    library = ":cgo_default_library",
)

cgo_library(
    name = "cgo_default_library",
    srcs = ["cgo.go"],
)
"#,
    )
    .unwrap();
    fs::write(tmp.path().join("pure.go"), "package hello\n").unwrap();
    fs::write(
        tmp.path().join("cgo.go"),
        "package hello\n\nimport \"C\"\n",
    )
    .unwrap();

    run_fix(tmp.path());
    let once = read(tmp.path(), "BUILD.bazel");
    run_fix(tmp.path());
    let twice = read(tmp.path(), "BUILD.bazel");
    assert_eq!(once, twice);
}
