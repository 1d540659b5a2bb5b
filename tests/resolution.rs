// tests/resolution.rs

//! Pattern resolution and dependency evaluation failures, and packages that
//! several authorities publish under the same name.

mod common;

use common::{MockTransport, PREFIX, TestImage, publish_basic};
use pkgimage::{
    Error, ExecOptions, Fmri, SilentProgress, TransitionKind, run_transition,
};
use std::fs;

const ALPHA: &str = "alpha";
const BETA: &str = "beta";

fn add_authority(image: &mut pkgimage::Image, prefix: &str) {
    image
        .set_authority(prefix, Some(&format!("http://{prefix}.example")), None, None)
        .unwrap();
}

fn refresh(image: &mut pkgimage::Image) {
    image.retrieve_catalogs(true).unwrap();
    image.load_catalogs(&SilentProgress::new()).unwrap();
}

fn plan_install(image: &mut pkgimage::Image, pattern: &str) -> pkgimage::Result<()> {
    image.make_install_plan(
        &[pattern.to_string()],
        &SilentProgress::new(),
        Vec::new(),
        false,
        false,
    )
}

#[test]
fn test_same_name_from_two_other_authorities_is_ambiguous() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    transport.publish_catalog(ALPHA, &["tools/editor@1.0"]);
    transport.publish_catalog(BETA, &["tools/editor@1.2"]);
    transport.publish_manifest(BETA, "tools/editor@1.2", "dir path=opt mode=0755\n");

    let test = TestImage::new(transport);
    let mut image = test.open_stale();
    add_authority(&mut image, ALPHA);
    add_authority(&mut image, BETA);
    refresh(&mut image);

    let err = plan_install(&mut image, "tools/editor").unwrap_err();
    match err {
        Error::AmbiguousMatch { pattern, matches } => {
            assert_eq!(pattern, "tools/editor");
            assert_eq!(matches.len(), 2);
            assert!(matches.iter().any(|m| m.contains("pkg://alpha/")));
            assert!(matches.iter().any(|m| m.contains("pkg://beta/")));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(image.imageplan.is_none());
    assert!(image.installed_fmris().unwrap().is_empty());

    // Naming the authority settles it
    plan_install(&mut image, "pkg://beta/tools/editor").unwrap();
    let plan = image.imageplan.as_ref().unwrap();
    assert_eq!(plan.pkg_plans().len(), 1);
}

#[test]
fn test_preferred_authority_wins_over_others() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    transport.publish_catalog(ALPHA, &["library/libc@9.0"]);

    let test = TestImage::new(transport);
    let mut image = test.open_stale();
    add_authority(&mut image, ALPHA);
    refresh(&mut image);

    let chosen = image.resolve_latest("library/libc").unwrap();
    assert_eq!(chosen.authority.as_deref(), Some(PREFIX));
    assert_eq!(chosen.version.unwrap().to_string(), "1.0");
}

#[test]
fn test_requirement_no_catalog_satisfies() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    transport.publish_catalog(
        PREFIX,
        &["library/libc@1.0", "web/server@1.0", "web/proxy@1.0"],
    );
    transport.publish_manifest(
        PREFIX,
        "web/proxy@1.0",
        "dir path=opt mode=0755\n\
         depend fmri=library/libc@2.0 type=require\n",
    );

    let test = TestImage::new(transport.clone());
    let mut image = test.open();

    let err = plan_install(&mut image, "web/proxy").unwrap_err();
    match err {
        Error::Unsatisfiable {
            package,
            constraints,
        } => {
            assert_eq!(package, "library/libc");
            assert!(!constraints.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(image.imageplan.is_none());
    assert!(image.installed_fmris().unwrap().is_empty());
    assert!(!test.path("opt").exists());
    assert!(
        transport.requests().iter().all(|r| !r.contains("file/0/")),
        "nothing may be downloaded for a failed evaluation"
    );
}

#[test]
fn test_manifests_are_cached_per_authority() {
    let transport = MockTransport::new();
    let ours = transport.publish_file(PREFIX, b"ed from test");
    let theirs = transport.publish_file(ALPHA, b"ed from alpha");
    transport.publish_catalog(PREFIX, &["tools/editor@1.0"]);
    transport.publish_catalog(ALPHA, &["tools/editor@1.0"]);
    transport.publish_manifest(
        PREFIX,
        "tools/editor@1.0",
        &format!("file {ours} path=editor mode=0755\n"),
    );
    transport.publish_manifest(
        ALPHA,
        "tools/editor@1.0",
        &format!("file {theirs} path=editor mode=0755\n"),
    );

    let test = TestImage::new(transport);
    let mut image = test.open_stale();
    add_authority(&mut image, ALPHA);
    refresh(&mut image);

    // Warm the cache with the preferred authority's manifest first
    let from_test = Fmri::parse("pkg://test/tools/editor@1.0").unwrap();
    let from_alpha = Fmri::parse("pkg://alpha/tools/editor@1.0").unwrap();
    let payload = |fmri: &Fmri| {
        image
            .get_manifest(fmri, false)
            .unwrap()
            .actions
            .iter()
            .find_map(|a| a.payload.clone())
    };
    assert_eq!(payload(&from_test), Some(ours));
    assert_eq!(payload(&from_alpha), Some(theirs));

    plan_install(&mut image, "pkg://alpha/tools/editor").unwrap();
    run_transition(&mut image, TransitionKind::Install, &ExecOptions::new()).unwrap();
    assert_eq!(fs::read(test.path("editor")).unwrap(), b"ed from alpha");
}
