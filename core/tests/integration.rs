//! End-to-end tests against the live mock server.
//!
//! # Design
//! Each test starts its own mock server on a random port and drives a
//! `Connection` over the real `ureq` transport. The shared `MockState`
//! lets a test revoke tokens, inject 503s and count requests per endpoint.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use mock_server::{MockState, DEFAULT_KEY, DEFAULT_USER};
use swift_core::{Connection, ConnectionOptions, Credentials, ListingFormat, ObjectEntry, StorageError};

fn start_server(state: MockState) -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::serve(listener, state).await
        })
        .unwrap();
    });

    addr
}

fn connect(addr: SocketAddr) -> Connection {
    connect_as(addr, DEFAULT_USER, DEFAULT_KEY)
}

fn connect_as(addr: SocketAddr, user: &str, key: &str) -> Connection {
    Connection::new(
        Credentials::new(user, key),
        ConnectionOptions::new(format!("http://{addr}/auth/v1.0")),
    )
    .unwrap()
}

fn meta(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn storage_lifecycle() {
    let state = MockState::new();
    let addr = start_server(state.clone());
    let conn = connect(addr);

    // Step 1: nothing happens until the first request.
    assert!(!conn.is_authenticated());
    let info = conn.get_account_info().unwrap();
    assert_eq!(info.container_count, 0);
    assert!(conn.is_authenticated());
    assert!(conn.cdn_enabled());

    // Step 2: create a container; creating it again is reported.
    let container = conn.create_container("photos", false).unwrap();
    assert_eq!(container.name(), "photos");
    assert!(matches!(
        conn.create_container("photos", true),
        Err(StorageError::ContainerExists(_))
    ));
    container
        .update_metadata(&[("X-Container-Meta-Color".to_string(), "blue".to_string())])
        .unwrap();

    // Step 3: upload an object with metadata.
    let mut object = container.create_object("2024/summer cat.txt").unwrap();
    assert_eq!(object.size(), None);
    object.set_metadata(meta(&[("Author", "milton")]));
    object.write(b"hello world", Some("text/plain")).unwrap();
    assert!(object.etag().is_some());

    // Step 4: read it back through a fresh handle.
    let fetched = container.get_object("2024/summer cat.txt").unwrap();
    assert_eq!(fetched.size(), Some(11));
    assert_eq!(fetched.content_type(), Some("text/plain"));
    assert_eq!(fetched.etag(), object.etag());
    assert_eq!(fetched.metadata().get("author").map(String::as_str), Some("milton"));
    assert_eq!(fetched.read().unwrap(), b"hello world");
    assert_eq!(fetched.read_range(6, 5, &[]).unwrap(), b"world");
    assert_eq!(fetched.read_range(6, 0, &[]).unwrap(), b"world");

    // Step 5: metadata-only update.
    object.set_metadata(meta(&[("Reviewer", "ada")]));
    object.sync_metadata().unwrap();
    let fetched = container.get_object("2024/summer cat.txt").unwrap();
    assert_eq!(fetched.metadata().get("reviewer").map(String::as_str), Some("ada"));

    // Step 6: listings.
    let entries = container.get_objects_info(&[("delimiter", "/")]).unwrap();
    assert!(matches!(&entries[..], [ObjectEntry::Subdir { subdir }] if subdir == "2024/"));
    let names = container.get_objects_list(&[("prefix", "2024/")]).unwrap();
    assert_eq!(names, vec!["2024/summer cat.txt"]);
    let objects = container.get_objects(&[]).unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].size(), Some(11));
    let xml = container.get_objects_raw(&[], ListingFormat::Xml).unwrap();
    assert!(String::from_utf8(xml).unwrap().contains("<name>2024/summer cat.txt</name>"));

    let reloaded = conn.get_container("photos").unwrap();
    assert_eq!(reloaded.object_count(), 1);
    assert_eq!(reloaded.bytes_used(), 11);
    assert_eq!(reloaded.metadata().get("color").map(String::as_str), Some("blue"));
    assert_eq!(conn.get_containers_list(&[]).unwrap(), vec!["photos"]);

    // Step 7: a non-empty container cannot be deleted.
    assert!(matches!(
        conn.delete_container("photos"),
        Err(StorageError::ContainerNotEmpty(_))
    ));

    // Step 8: delete the object, then the container.
    object.delete().unwrap();
    assert!(matches!(
        container.get_object("2024/summer cat.txt"),
        Err(StorageError::NoSuchObject(_))
    ));
    assert!(matches!(
        container.delete_object("2024/summer cat.txt"),
        Err(StorageError::NoSuchObject(_))
    ));
    conn.delete_container("photos").unwrap();
    assert!(matches!(
        conn.get_container("photos"),
        Err(StorageError::NoSuchContainer(_))
    ));
    assert!(conn.get_containers_list(&[]).unwrap().is_empty());

    assert_eq!(state.auth_requests(), 1);
}

#[test]
fn bad_credentials_fail_authentication() {
    let addr = start_server(MockState::new());
    let conn = connect_as(addr, DEFAULT_USER, "wrong");

    assert!(matches!(
        conn.get_account_info(),
        Err(StorageError::AuthenticationFailed)
    ));
    assert!(!conn.is_authenticated());
}

#[test]
fn expired_token_is_renewed_transparently() {
    let state = MockState::new();
    let addr = start_server(state.clone());
    let conn = connect(addr);

    conn.create_container("docs", false).unwrap();
    let first = conn.auth_token().unwrap();

    state.expire_tokens();
    let container = conn.get_container("docs").unwrap();
    assert_eq!(container.name(), "docs");

    let second = conn.auth_token().unwrap();
    assert_ne!(first, second);
    assert_eq!(state.auth_requests(), 2);
}

#[test]
fn body_is_resent_after_reauthentication() {
    let state = MockState::new();
    let addr = start_server(state.clone());
    let conn = connect(addr);
    let container = conn.create_container("docs", false).unwrap();

    state.expire_tokens();
    let mut object = container.create_object("note.txt").unwrap();
    state.expire_tokens();
    object.write(b"remember", None).unwrap();

    assert_eq!(container.get_object("note.txt").unwrap().read().unwrap(), b"remember");
    assert_eq!(state.auth_requests(), 3);
}

#[test]
fn concurrent_requests_share_one_reauthentication() {
    let state = MockState::new();
    let addr = start_server(state.clone());
    let conn = connect(addr);
    conn.create_container("shared", false).unwrap();

    state.expire_tokens();
    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                conn.get_account_info().unwrap();
            });
        }
    });

    assert_eq!(state.auth_requests(), 2);
}

#[test]
fn server_errors_are_retried_once() {
    let state = MockState::new();
    let addr = start_server(state.clone());
    let conn = connect(addr);
    conn.get_account_info().unwrap();
    let before = state.storage_requests();

    state.fail_next(1);
    conn.get_account_info().unwrap();
    assert_eq!(state.storage_requests(), before + 2);

    state.fail_next(2);
    let err = conn.get_account_info().unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert_eq!(state.storage_requests(), before + 4);
    assert_eq!(state.auth_requests(), 1);
}

#[test]
fn cdn_publishing() {
    let state = MockState::new();
    let addr = start_server(state.clone());
    let conn = connect(addr);

    let mut container = conn.create_container("site", false).unwrap();
    assert!(!container.is_public().unwrap());
    assert!(matches!(
        container.public_uri(),
        Err(StorageError::ContainerNotPublic(_))
    ));

    container.make_public(3600).unwrap();
    assert!(container.is_public().unwrap());
    let uri = container.public_uri().unwrap();
    assert!(uri.starts_with("http://"));
    assert!(container.public_ssl_uri().unwrap().starts_with("https://"));

    {
        let mut object = container.create_object("index.html").unwrap();
        object.write(b"<h1>hi</h1>", Some("text/html")).unwrap();
        assert_eq!(object.public_uri().unwrap(), format!("{uri}/index.html"));
        object.purge_from_cdn(Some("ops@example.org")).unwrap();
    }
    container.purge_from_cdn(None).unwrap();
    container.set_log_retention(true).unwrap();

    let reloaded = conn.get_container("site").unwrap();
    assert_eq!(reloaded.cdn().ttl, Some(3600));
    assert!(reloaded.cdn().log_retention);
    assert_eq!(conn.get_public_containers_list().unwrap(), vec!["site"]);

    container.make_private().unwrap();
    assert!(!container.is_public().unwrap());
    let reloaded = conn.get_container("site").unwrap();
    assert!(!reloaded.is_public().unwrap());
    assert!(conn.get_public_containers_list().unwrap().is_empty());

    container.delete_object("index.html").unwrap();
    conn.delete_container("site").unwrap();
}

#[test]
fn account_without_cdn() {
    let state = MockState::with_account("solo", "pw", false);
    let addr = start_server(state.clone());
    let conn = connect_as(addr, "solo", "pw");

    let mut container = conn.create_container("plain", false).unwrap();
    assert!(!conn.cdn_enabled());
    assert!(matches!(container.make_public(60), Err(StorageError::CdnNotEnabled)));
    assert!(matches!(
        conn.get_public_containers_list(),
        Err(StorageError::CdnNotEnabled)
    ));
    conn.delete_container("plain").unwrap();
    assert_eq!(state.cdn_requests(), 0);
}

#[test]
fn manifest_object_reads_segments() {
    let addr = start_server(MockState::new());
    let conn = connect(addr);
    let segments = conn.create_container("segments", false).unwrap();
    let movies = conn.create_container("movies", false).unwrap();

    for (name, part) in [("movie/001", "hello "), ("movie/002", "world")] {
        segments
            .create_object(name)
            .unwrap()
            .write(part.as_bytes(), None)
            .unwrap();
    }
    let mut movie = movies.create_object("movie.mkv").unwrap();
    movie.set_manifest("segments/movie/");
    movie.sync_manifest().unwrap();

    let fetched = movies.get_object("movie.mkv").unwrap();
    assert_eq!(fetched.manifest(), Some("segments/movie/"));
    assert_eq!(fetched.read().unwrap(), b"hello world");
}

#[test]
fn versioning_and_static_web_metadata() {
    let addr = start_server(MockState::new());
    let conn = connect(addr);
    conn.create_container("docs-versions", false).unwrap();
    let docs = conn.create_container("docs", false).unwrap();

    docs.enable_object_versioning("docs-versions").unwrap();
    docs.enable_static_web(Some("index.html"), Some(true), None, Some("listing.css"))
        .unwrap();
    for body in ["v1", "v2"] {
        docs.create_object("report.txt")
            .unwrap()
            .write(body.as_bytes(), None)
            .unwrap();
    }

    let archive = conn.get_container("docs-versions").unwrap();
    assert_eq!(archive.object_count(), 1);
    let reloaded = conn.get_container("docs").unwrap();
    assert_eq!(reloaded.metadata().get("web-index").map(String::as_str), Some("index.html"));
    assert_eq!(reloaded.metadata().get("web-listings-css").map(String::as_str), Some("listing.css"));
    assert!(!reloaded.metadata().contains_key("web-error"));

    docs.disable_static_web().unwrap();
    docs.disable_object_versioning().unwrap();
    let reloaded = conn.get_container("docs").unwrap();
    assert!(reloaded.metadata().is_empty());
}

#[test]
fn save_to_file_writes_object_body() {
    let addr = start_server(MockState::new());
    let conn = connect(addr);
    let container = conn.create_container("files", false).unwrap();
    let mut object = container.create_object("data.bin").unwrap();
    object.write(&[0u8, 1, 2, 3, 255], None).unwrap();

    let path = std::env::temp_dir().join(format!("swift-core-{}.bin", addr.port()));
    object.save_to_file(&path).unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), vec![0u8, 1, 2, 3, 255]);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn write_from_file_uploads_local_file() {
    let addr = start_server(MockState::new());
    let conn = connect(addr);
    let container = conn.create_container("uploads", false).unwrap();

    let path = std::env::temp_dir().join(format!("swift-core-upload-{}.txt", addr.port()));
    std::fs::write(&path, b"hello").unwrap();
    {
        let mut object = container.create_object("greeting.txt").unwrap();
        object.write_from_file(&path, Some("text/plain")).unwrap();
        assert_eq!(object.etag(), Some("5d41402abc4b2a76b9719d911017c592"));
    }
    std::fs::remove_file(&path).unwrap();

    let object = container.get_object("greeting.txt").unwrap();
    assert_eq!(object.content_type(), Some("text/plain"));
    assert_eq!(object.size(), Some(5));
    assert_eq!(object.read().unwrap(), b"hello");
}
