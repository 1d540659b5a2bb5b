// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use pkgimage::db::models::Authority;
use pkgimage::repository::{
    CATALOG_PATH, Catalog, FetchError, FetchResult, Transport, file_path, manifest_path,
    search_path,
};
use pkgimage::{Fmri, Image, ImageType, SilentProgress};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const PREFIX: &str = "test";
pub const ORIGIN: &str = "http://pkg.test.example";

/// In-memory authorities: responses keyed by "prefix path"
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, FetchResult<Vec<u8>>>>,
    /// Authorities whose every request fails
    down: Mutex<HashMap<String, FetchError>>,
    requests: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, prefix: &str, path: &str, body: impl Into<Vec<u8>>) {
        self.responses
            .lock()
            .unwrap()
            .insert(format!("{prefix} {path}"), Ok(body.into()));
    }

    pub fn fail(&self, prefix: &str, path: &str, error: FetchError) {
        self.responses
            .lock()
            .unwrap()
            .insert(format!("{prefix} {path}"), Err(error));
    }

    /// Every request to `prefix` fails with `error`
    pub fn take_down(&self, prefix: &str, error: FetchError) {
        self.down.lock().unwrap().insert(prefix.to_string(), error);
    }

    pub fn bring_up(&self, prefix: &str) {
        self.down.lock().unwrap().remove(prefix);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Serve a full catalog listing `fmris` for `prefix`
    pub fn publish_catalog(&self, prefix: &str, fmris: &[&str]) {
        let mut catalog = Catalog::new(prefix);
        for fmri in fmris {
            catalog.insert(&Fmri::parse(fmri).unwrap()).unwrap();
        }
        catalog.set_last_modified("2008-04-26T17:32:08Z".parse().unwrap());
        self.respond(prefix, CATALOG_PATH, catalog.to_bytes().unwrap());
    }

    /// Serve a manifest under both the qualified and unqualified FMRI
    pub fn publish_manifest(&self, prefix: &str, fmri: &str, text: &str) {
        let fmri = Fmri::parse(fmri).unwrap();
        let qualified = fmri.with_authority(prefix);
        let bare = Fmri {
            authority: None,
            ..fmri
        };
        self.respond(prefix, &manifest_path(&qualified), text);
        self.respond(prefix, &manifest_path(&bare), text);
    }

    /// Serve `content` as a payload; returns its hash
    pub fn publish_file(&self, prefix: &str, content: &[u8]) -> String {
        let hash = sha256(content);
        self.respond(prefix, &file_path(&hash), content.to_vec());
        hash
    }

    pub fn publish_search(&self, prefix: &str, token: &str, lines: &[&str]) {
        let mut body = lines.join("\n");
        body.push('\n');
        self.respond(prefix, &search_path(token), body);
    }
}

impl Transport for MockTransport {
    fn get(&self, authority: &Authority, path: &str) -> FetchResult<Vec<u8>> {
        let key = format!("{} {}", authority.prefix, path);
        self.requests.lock().unwrap().push(key.clone());
        if let Some(error) = self.down.lock().unwrap().get(&authority.prefix) {
            return Err(error.clone());
        }
        self.responses
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or(Err(FetchError::Http {
                status: 404,
                reason: "Not Found".to_string(),
            }))
    }
}

pub fn sha256(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// A user image in a temp directory, backed by a `MockTransport`
///
/// Keep the `TestImage` alive to prevent cleanup.
pub struct TestImage {
    pub dir: TempDir,
    pub transport: Arc<MockTransport>,
}

impl TestImage {
    /// Create an image whose preferred authority is `PREFIX`
    pub fn new(transport: Arc<MockTransport>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Image::create_with_transport(
            dir.path(),
            ImageType::User,
            PREFIX,
            ORIGIN,
            None,
            None,
            transport.clone(),
        )
        .unwrap();
        Self { dir, transport }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Open the image with its catalogs refreshed and loaded
    pub fn open(&self) -> Image {
        let mut image = self.open_stale();
        image.retrieve_catalogs(true).unwrap();
        image.load_catalogs(&SilentProgress::new()).unwrap();
        image
    }

    /// Open without touching the network
    pub fn open_stale(&self) -> Image {
        Image::open_with_transport(self.dir.path(), self.transport.clone()).unwrap()
    }
}

/// Publish a small two-package repository:
///
/// - `library/libc@1.0` ships `lib/libc.so`
/// - `web/server@1.0` ships `usr/bin/httpd` and requires `library/libc`
pub fn publish_basic(transport: &MockTransport) {
    let libc = transport.publish_file(PREFIX, b"libc 1.0");
    let httpd = transport.publish_file(PREFIX, b"httpd 1.0");

    transport.publish_catalog(PREFIX, &["library/libc@1.0", "web/server@1.0"]);
    transport.publish_manifest(
        PREFIX,
        "library/libc@1.0",
        &format!(
            "set name=pkg.description value=\"C library\"\n\
             dir path=lib mode=0755\n\
             file {libc} path=lib/libc.so mode=0755 pkg.size=8\n"
        ),
    );
    transport.publish_manifest(
        PREFIX,
        "web/server@1.0",
        &format!(
            "set name=pkg.description value=\"Web server\"\n\
             dir path=usr mode=0755\n\
             dir path=usr/bin mode=0755\n\
             file {httpd} path=usr/bin/httpd mode=0755 pkg.size=9\n\
             depend fmri=library/libc@1.0 type=require\n"
        ),
    );
}

/// Add `web/server@2.0` to the basic repository
pub fn publish_server_update(transport: &MockTransport) {
    let httpd = transport.publish_file(PREFIX, b"httpd 2.0");
    let conf = transport.publish_file(PREFIX, b"listen 80\n");

    transport.publish_catalog(
        PREFIX,
        &["library/libc@1.0", "web/server@1.0", "web/server@2.0"],
    );
    transport.publish_manifest(
        PREFIX,
        "web/server@2.0",
        &format!(
            "set name=pkg.description value=\"Web server\"\n\
             dir path=usr mode=0755\n\
             dir path=usr/bin mode=0755\n\
             dir path=etc mode=0755\n\
             file {httpd} path=usr/bin/httpd mode=0755 pkg.size=9\n\
             file {conf} path=etc/httpd.conf mode=0644 pkg.size=10\n\
             depend fmri=library/libc@1.0 type=require\n"
        ),
    );
}
