//! Detection feeds the resolver: the pair decides what actually runs.

use std::fs;

use gantry_core::{detect, CommandKind, CommandResolver, Ecosystem, Invocation, Resolution};

#[test]
fn test_node_target_resolves_npm_install() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("package.json"), r#"{"name": "demo"}"#).unwrap();

    let eco = detect(dir.path(), None);
    assert_eq!(eco, Ecosystem::Node);

    let resolver = CommandResolver::builtin();
    assert_eq!(
        resolver.resolve(eco, CommandKind::Build, dir.path()),
        Resolution::run(Invocation::new("npm", ["install"]))
    );
}

#[test]
fn test_empty_target_skips_build_and_tests() {
    let dir = tempfile::tempdir().unwrap();
    let eco = detect(dir.path(), None);
    let resolver = CommandResolver::builtin();

    assert!(resolver.resolve(eco, CommandKind::Build, dir.path()).is_skip());
    assert!(resolver.resolve(eco, CommandKind::UnitTest, dir.path()).is_skip());
}

#[test]
fn test_unknown_declared_language_skips_everything() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("go.mod"), "module example.com/x\n").unwrap();

    let eco = detect(dir.path(), Some("cobol"));
    assert_eq!(eco, Ecosystem::Unknown);

    let resolver = CommandResolver::builtin();
    for kind in [
        CommandKind::Build,
        CommandKind::StaticCheck,
        CommandKind::UnitTest,
        CommandKind::RunServer,
    ] {
        assert!(resolver.resolve(eco, kind, dir.path()).is_skip(), "{kind}");
    }
}

#[test]
fn test_registered_entry_overrides_builtin() {
    let dir = tempfile::tempdir().unwrap();
    let mut resolver = CommandResolver::builtin();
    resolver.register(Ecosystem::Ruby, CommandKind::Build, |_| {
        Resolution::run(Invocation::new("bundle", ["install", "--local"]))
    });

    match resolver.resolve(Ecosystem::Ruby, CommandKind::Build, dir.path()) {
        Resolution::Run(invs) => assert_eq!(invs[0].args, vec!["install", "--local"]),
        other => panic!("expected run, got {other:?}"),
    }
}
