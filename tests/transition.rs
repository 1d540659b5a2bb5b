// tests/transition.rs

//! End-to-end install, update and uninstall against an in-memory authority.

mod common;

use common::{MockTransport, TestImage, publish_basic, publish_server_update};
use pkgimage::{Error, ExecOptions, PlanState, SilentProgress, TransitionKind, run_transition};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

fn install(image: &mut pkgimage::Image, patterns: &[&str]) -> pkgimage::ExecutionOutcome {
    let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
    image
        .make_install_plan(&patterns, &SilentProgress::new(), Vec::new(), false, false)
        .unwrap();
    run_transition(image, TransitionKind::Install, &ExecOptions::new()).unwrap()
}

#[test]
fn test_install_pulls_in_dependencies() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport);
    let mut image = test.open();

    let outcome = install(&mut image, &["web/server"]);

    assert!(outcome.executed());
    assert_eq!(outcome.installed, 2);
    assert!(outcome.index_warning.is_none());
    assert_eq!(fs::read(test.path("usr/bin/httpd")).unwrap(), b"httpd 1.0");
    assert_eq!(fs::read(test.path("lib/libc.so")).unwrap(), b"libc 1.0");

    let names: Vec<String> = image
        .installed_fmris()
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, vec!["library/libc", "web/server"]);
    assert!(image.imageplan.is_none());
}

#[test]
fn test_file_mode_is_applied() {
    use std::os::unix::fs::PermissionsExt;

    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport);
    let mut image = test.open();
    install(&mut image, &["library/libc"]);

    let mode = fs::metadata(test.path("lib/libc.so")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[test]
fn test_noexecute_changes_nothing() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport.clone());
    let mut image = test.open();

    image
        .make_install_plan(
            &["web/server".to_string()],
            &SilentProgress::new(),
            Vec::new(),
            false,
            true,
        )
        .unwrap();
    let plan = image.imageplan.as_ref().unwrap();
    assert_eq!(plan.state(), PlanState::Evaluated);
    assert_eq!(plan.pkg_plans().len(), 2);

    let outcome = run_transition(&mut image, TransitionKind::Install, &ExecOptions::new()).unwrap();
    assert!(!outcome.executed());
    assert!(!test.path("usr/bin/httpd").exists());
    assert!(image.installed_fmris().unwrap().is_empty());
    assert!(
        transport.requests().iter().all(|r| !r.contains("file/0/")),
        "no payload may be downloaded"
    );
}

#[test]
fn test_reinstall_is_nothing_to_do() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport);
    let mut image = test.open();
    install(&mut image, &["library/libc"]);

    image
        .make_install_plan(
            &["library/libc".to_string()],
            &SilentProgress::new(),
            Vec::new(),
            false,
            false,
        )
        .unwrap();
    assert!(image.imageplan.as_ref().unwrap().nothingtodo());
}

#[test]
fn test_unknown_pattern_is_reported() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport);
    let mut image = test.open();

    let err = image
        .make_install_plan(
            &["web/server".to_string(), "no/such/pkg".to_string()],
            &SilentProgress::new(),
            Vec::new(),
            false,
            false,
        )
        .unwrap_err();
    match err {
        Error::PatternsNotFound(patterns) => assert_eq!(patterns, vec!["no/such/pkg"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_update_replaces_and_adds_files() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport.clone());
    let mut image = test.open();
    install(&mut image, &["web/server"]);

    publish_server_update(&transport);
    image.retrieve_catalogs(true).unwrap();
    image.load_catalogs(&SilentProgress::new()).unwrap();

    let server = image.installed_fmri("web/server").unwrap().unwrap();
    assert!(image.is_upgradable(&server));

    image
        .make_update_plan(&SilentProgress::new(), false, false)
        .unwrap();
    let outcome =
        run_transition(&mut image, TransitionKind::ImageUpdate, &ExecOptions::new()).unwrap();

    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.installed, 0);
    assert_eq!(fs::read(test.path("usr/bin/httpd")).unwrap(), b"httpd 2.0");
    assert_eq!(fs::read(test.path("etc/httpd.conf")).unwrap(), b"listen 80\n");

    let server = image.installed_fmri("web/server").unwrap().unwrap();
    assert_eq!(server.version.unwrap().to_string(), "2.0");
}

#[test]
fn test_uninstall_of_dependency_is_refused() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport);
    let mut image = test.open();
    install(&mut image, &["web/server"]);

    let err = image
        .make_uninstall_plan(
            &["library/libc".to_string()],
            false,
            &SilentProgress::new(),
            false,
            false,
        )
        .unwrap_err();
    match err {
        Error::NonLeaf { package, dependents } => {
            assert!(package.contains("library/libc"));
            assert!(dependents.iter().any(|d| d.contains("web/server")));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(test.path("lib/libc.so").exists());
}

#[test]
fn test_recursive_uninstall_removes_dependents() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport);
    let mut image = test.open();
    install(&mut image, &["web/server"]);

    image
        .make_uninstall_plan(
            &["library/libc".to_string()],
            true,
            &SilentProgress::new(),
            false,
            false,
        )
        .unwrap();
    let outcome =
        run_transition(&mut image, TransitionKind::Uninstall, &ExecOptions::new()).unwrap();

    assert_eq!(outcome.removed, 2);
    assert!(image.installed_fmris().unwrap().is_empty());
    assert!(!test.path("usr/bin/httpd").exists());
    assert!(!test.path("lib/libc.so").exists());
    // Emptied directories go with their packages
    assert!(!test.path("usr/bin").exists());
}

#[test]
fn test_failed_execution_rolls_back() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport);
    let mut image = test.open();

    // A directory where the server's binary must go makes execution fail
    fs::create_dir_all(test.path("usr/bin/httpd")).unwrap();

    image
        .make_install_plan(
            &["web/server".to_string()],
            &SilentProgress::new(),
            Vec::new(),
            false,
            false,
        )
        .unwrap();
    let err = run_transition(&mut image, TransitionKind::Install, &ExecOptions::new()).unwrap_err();

    assert!(matches!(err, Error::Execution { .. }), "got {err}");
    assert!(!test.path("lib/libc.so").exists());
    assert!(test.path("usr/bin/httpd").is_dir());
    assert!(image.installed_fmris().unwrap().is_empty());

    let txn = pkgimage::db::paths::txn_dir(image.meta_dir());
    assert!(pkgimage::transaction::find_incomplete_journals(&txn).unwrap().is_empty());
}

#[test]
fn test_corrupt_payload_fails_before_any_change() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    // Serve the wrong bytes for libc's payload
    let hash = common::sha256(b"libc 1.0");
    transport.respond(common::PREFIX, &format!("file/0/{hash}"), b"tampered".to_vec());

    let test = TestImage::new(transport);
    let mut image = test.open();
    image
        .make_install_plan(
            &["library/libc".to_string()],
            &SilentProgress::new(),
            Vec::new(),
            false,
            false,
        )
        .unwrap();
    let err = run_transition(&mut image, TransitionKind::Install, &ExecOptions::new()).unwrap_err();

    assert!(matches!(err, Error::ChecksumMismatch { .. }), "got {err}");
    assert!(!test.path("lib").exists());
    assert!(image.installed_fmris().unwrap().is_empty());
}

#[test]
fn test_cancelled_transition_changes_nothing() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport);
    let mut image = test.open();

    image
        .make_install_plan(
            &["web/server".to_string()],
            &SilentProgress::new(),
            Vec::new(),
            false,
            false,
        )
        .unwrap();
    let opts = ExecOptions::new().with_cancel(Arc::new(AtomicBool::new(true)));
    let err = run_transition(&mut image, TransitionKind::Install, &opts).unwrap_err();

    assert!(matches!(err, Error::Cancelled(_)));
    assert!(!test.path("usr/bin/httpd").exists());
    assert!(image.installed_fmris().unwrap().is_empty());
}

#[test]
fn test_manifest_path_outside_image_is_refused() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport.clone());
    let escaped = format!(
        "{}-escaped.txt",
        test.root().file_name().unwrap().to_string_lossy()
    );

    let hash = transport.publish_file(common::PREFIX, b"outside");
    transport.publish_catalog(
        common::PREFIX,
        &["library/libc@1.0", "web/server@1.0", "evil/pkg@1.0"],
    );
    transport.publish_manifest(
        common::PREFIX,
        "evil/pkg@1.0",
        &format!("file {hash} path=../{escaped} mode=0644\n"),
    );

    let mut image = test.open();
    let err = image
        .make_install_plan(
            &["evil/pkg".to_string()],
            &SilentProgress::new(),
            Vec::new(),
            false,
            false,
        )
        .unwrap_err();
    assert!(err.to_string().contains("leaves the image root"), "got {err}");

    let outside = test.root().parent().unwrap().join(&escaped);
    assert!(!outside.exists());
    assert!(image.imageplan.is_none());
    assert!(image.installed_fmris().unwrap().is_empty());
}

#[test]
fn test_frozen_package_is_held_back_by_update() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport.clone());
    let mut image = test.open();
    install(&mut image, &["web/server"]);

    publish_server_update(&transport);
    image.retrieve_catalogs(true).unwrap();
    image.load_catalogs(&SilentProgress::new()).unwrap();

    let frozen = image.set_frozen(&["web/server".to_string()], true).unwrap();
    assert_eq!(frozen.len(), 1);
    let listed = image.inventory(&["web/server".to_string()], false).unwrap();
    assert!(listed.found[0].1.frozen);

    image
        .make_update_plan(&SilentProgress::new(), false, false)
        .unwrap();
    assert!(image.imageplan.as_ref().unwrap().nothingtodo());

    image.set_frozen(&["web/server".to_string()], false).unwrap();
    image
        .make_update_plan(&SilentProgress::new(), false, false)
        .unwrap();
    let outcome =
        run_transition(&mut image, TransitionKind::ImageUpdate, &ExecOptions::new()).unwrap();
    assert_eq!(outcome.updated, 1);
    assert_eq!(fs::read(test.path("usr/bin/httpd")).unwrap(), b"httpd 2.0");
}

#[test]
fn test_freezing_requires_an_installed_match() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport);
    let mut image = test.open();

    let err = image
        .set_frozen(&["web/server".to_string()], true)
        .unwrap_err();
    assert!(matches!(err, Error::PatternsNotFound(_)));
}
