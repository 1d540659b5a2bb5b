// tests/refresh_search.rs

//! Catalog refresh across several authorities, and local and remote search.

mod common;

use common::{MockTransport, PREFIX, TestImage, publish_basic};
use pkgimage::db::paths;
use pkgimage::repository::FetchError;
use pkgimage::{
    Error, ExecOptions, REBUILD_INDEX_HINT, SearchHit, SilentProgress, TransitionKind,
    run_transition,
};
use std::fs;

const MIRROR: &str = "mirror";

fn connect_error() -> FetchError {
    FetchError::Connect {
        host: "mirror.example".to_string(),
        reason: "connection refused".to_string(),
    }
}

fn install_server(image: &mut pkgimage::Image) -> pkgimage::ExecutionOutcome {
    image
        .make_install_plan(
            &["web/server".to_string()],
            &SilentProgress::new(),
            Vec::new(),
            false,
            false,
        )
        .unwrap();
    run_transition(image, TransitionKind::Install, &ExecOptions::new()).unwrap()
}

#[test]
fn test_partial_refresh_keeps_good_catalogs() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport.clone());
    let mut image = test.open_stale();
    image
        .set_authority(MIRROR, Some("http://mirror.example"), None, None)
        .unwrap();
    transport.take_down(MIRROR, connect_error());

    let err = image.retrieve_catalogs(true).unwrap_err();
    let Error::CatalogRefresh(failures) = err else {
        panic!("expected a refresh failure");
    };
    assert_eq!(failures.total, 2);
    assert_eq!(failures.succeeded, 1);
    assert!(!failures.all_failed());
    assert_eq!(failures.failures[0].prefix, MIRROR);

    // The reachable authority's catalog is usable regardless
    assert_eq!(image.catalog().len(), 2);
}

#[test]
fn test_corrupt_cache_of_failed_authority_keeps_aggregate() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport.clone());
    let mut image = test.open_stale();
    image
        .set_authority(MIRROR, Some("http://mirror.example"), None, None)
        .unwrap();

    let cache = paths::catalog_file(image.meta_dir(), MIRROR);
    fs::create_dir_all(cache.parent().unwrap()).unwrap();
    fs::write(&cache, b"{ truncated").unwrap();
    transport.take_down(MIRROR, connect_error());

    let err = image.retrieve_catalogs(true).unwrap_err();
    let Error::CatalogRefresh(failures) = err else {
        panic!("expected the aggregate refresh failure");
    };
    assert_eq!(failures.total, 2);
    assert_eq!(failures.succeeded, 1);
    assert_eq!(failures.failures.len(), 1);
    assert_eq!(failures.failures[0].prefix, MIRROR);
    assert_eq!(image.catalog().len(), 2);
}

#[test]
fn test_refresh_with_every_authority_down() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport.clone());
    let mut image = test.open_stale();
    transport.take_down(PREFIX, FetchError::Timeout);

    let Err(Error::CatalogRefresh(failures)) = image.retrieve_catalogs(true) else {
        panic!("expected a refresh failure");
    };
    assert!(failures.all_failed());
    assert!(failures.timeouts_exhausted);
}

#[test]
fn test_local_search_finds_installed_files() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport);
    let mut image = test.open();
    install_server(&mut image);

    let hits: Vec<SearchHit> = image
        .local_search(&["httpd".to_string()])
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(
        hits.iter()
            .any(|h| h.index == "basename" && h.fmri.name == "web/server")
    );

    // Descriptions are indexed word by word, case-insensitively
    let hits: Vec<SearchHit> = image
        .local_search(&["LIBRARY".to_string()])
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(hits.iter().any(|h| h.fmri.name == "library/libc"));
}

#[test]
fn test_uninstall_drops_package_from_index() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport);
    let mut image = test.open();
    install_server(&mut image);

    image
        .make_uninstall_plan(
            &["web/server".to_string()],
            false,
            &SilentProgress::new(),
            false,
            false,
        )
        .unwrap();
    run_transition(&mut image, TransitionKind::Uninstall, &ExecOptions::new()).unwrap();

    let hits = image.local_search(&["httpd".to_string()]).unwrap().count();
    assert_eq!(hits, 0);
}

#[test]
fn test_missing_index_asks_for_rebuild() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport);
    let image = test.open();

    let err = image.local_search(&["httpd".to_string()]).err().unwrap();
    assert!(matches!(err, Error::NoIndex(_)));
    assert_eq!(err.remediation(), Some(REBUILD_INDEX_HINT));
}

#[test]
fn test_damaged_index_is_repaired_by_rebuild() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport);
    let mut image = test.open();
    install_server(&mut image);

    let index_dir = paths::index_dir(image.meta_dir());
    fs::write(index_dir.join("main_dict.json"), b"{ not json").unwrap();
    let err = image.local_search(&["httpd".to_string()]).err().unwrap();
    assert!(matches!(err, Error::InconsistentIndex(_)));

    image.rebuild_search_index(&SilentProgress::new()).unwrap();
    assert!(image.local_search(&["httpd".to_string()]).unwrap().count() > 0);

    // Neither the staged build nor the replaced index is left behind
    let leftovers: Vec<_> = fs::read_dir(image.meta_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".index"))
        .collect();
    assert!(leftovers.is_empty(), "left behind: {leftovers:?}");
}

#[test]
fn test_leftover_index_tmp_is_a_warning_not_a_failure() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport);
    let mut image = test.open();

    let index_dir = paths::index_dir(image.meta_dir());
    fs::create_dir_all(index_dir.join("TMP")).unwrap();

    let outcome = install_server(&mut image);
    assert!(matches!(outcome.index_warning, Some(Error::PartialIndexing(_))));
    // The packages themselves are in place
    assert!(test.path("usr/bin/httpd").exists());
    assert_eq!(image.installed_fmris().unwrap().len(), 2);
}

#[test]
fn test_remote_search_ends_with_failures() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    transport.publish_search(
        PREFIX,
        "httpd",
        &["basename file pkg:/web/server@1.0 usr/bin/httpd"],
    );
    let test = TestImage::new(transport.clone());
    let mut image = test.open_stale();
    image
        .set_authority(MIRROR, Some("http://mirror.example"), None, None)
        .unwrap();
    transport.take_down(MIRROR, connect_error());

    let authorities = image.authorities().unwrap();
    let results: Vec<_> = image
        .remote_search(&["httpd".to_string()], authorities)
        .collect();

    assert_eq!(results.len(), 2);
    let hit = results[0].as_ref().unwrap();
    assert_eq!(hit.fmri.authority.as_deref(), Some(PREFIX));
    assert_eq!(hit.action_type.as_deref(), Some("file"));
    assert_eq!(hit.value.as_deref(), Some("usr/bin/httpd"));
    match &results[1] {
        Err(Error::SearchFailed(failures)) => {
            assert_eq!(failures.failures.len(), 1);
            assert_eq!(failures.failures[0].origin, "http://mirror.example");
        }
        other => panic!("expected terminal search failure, got {other:?}"),
    }
}

#[test]
fn test_remote_search_is_lazy() {
    let transport = MockTransport::new();
    publish_basic(&transport);
    let test = TestImage::new(transport.clone());
    let image = test.open_stale();

    let before = transport.requests().len();
    let search = image.remote_search(&["httpd".to_string()], image.authorities().unwrap());
    assert_eq!(transport.requests().len(), before);

    // Unknown tokens are a 404: no results and no failure
    assert_eq!(search.count(), 0);
    assert!(transport.requests().len() > before);
}
