//! Stored objects: content transfer, metadata and manifests.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use percent_encoding::utf8_percent_encode;
use tracing::debug;

use crate::account::header_u64;
use crate::container::Container;
use crate::error::{Result, StorageError};
use crate::http::{merge_headers, Headers, HttpMethod};
use crate::transport::{Transport, UreqTransport};
use crate::types::ObjectRecord;
use crate::url_info::SEGMENT;

pub const OBJECT_NAME_LIMIT: usize = 1024;
pub const META_NAME_LIMIT: usize = 128;
pub const META_VALUE_LIMIT: usize = 256;

pub const OBJECT_META_PREFIX: &str = "x-object-meta-";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Object names must be non-empty and at most 1024 bytes.
pub fn validate_object_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > OBJECT_NAME_LIMIT {
        return Err(StorageError::InvalidObjectName(name.to_string()));
    }
    Ok(())
}

/// An object inside a container. It may or may not exist remotely yet.
#[derive(Debug)]
pub struct StorageObject<'a, T = UreqTransport> {
    container: &'a Container<'a, T>,
    name: String,
    content_type: Option<String>,
    size: Option<u64>,
    last_modified: Option<String>,
    etag: Option<String>,
    metadata: BTreeMap<String, String>,
    headers: Headers,
    manifest: Option<String>,
}

impl<'a, T: Transport> StorageObject<'a, T> {
    pub(crate) fn new(container: &'a Container<'a, T>, name: &str) -> Result<Self> {
        validate_object_name(name)?;
        Ok(Self {
            container,
            name: name.to_string(),
            content_type: None,
            size: None,
            last_modified: None,
            etag: None,
            metadata: BTreeMap::new(),
            headers: Vec::new(),
            manifest: None,
        })
    }

    pub(crate) fn from_record(container: &'a Container<'a, T>, record: ObjectRecord) -> Self {
        Self {
            container,
            name: record.name,
            content_type: Some(record.content_type),
            size: Some(record.bytes),
            last_modified: Some(record.last_modified),
            etag: Some(record.hash),
            metadata: BTreeMap::new(),
            headers: Vec::new(),
            manifest: None,
        }
    }

    /// Load attributes from the service. Returns `false` when the object
    /// does not exist.
    pub(crate) fn initialize(&mut self) -> Result<bool> {
        let response = match self.container.connection().make_request(
            HttpMethod::Head,
            &[self.container.name(), self.name.as_str()],
            &[],
            &[],
        ) {
            Ok(response) => response,
            Err(StorageError::Response { status: 404, .. }) => return Ok(false),
            Err(err) => return Err(err),
        };

        let owned = |name: &str| response.header(name).map(str::to_string);
        self.manifest = owned("x-object-manifest");
        self.content_type = owned("content-type");
        self.etag = owned("etag");
        self.size = Some(header_u64(response.header("content-length")));
        self.last_modified = owned("last-modified");
        self.metadata = response
            .prefixed_headers(OBJECT_META_PREFIX)
            .into_iter()
            .collect();
        Ok(true)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container(&self) -> &'a Container<'a, T> {
        self.container
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = Some(content_type.into());
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Replace the metadata sent by the next write or `sync_metadata`.
    pub fn set_metadata(&mut self, metadata: BTreeMap<String, String>) {
        self.metadata = metadata;
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Extra headers (e.g. `Content-Disposition`) sent with writes and
    /// metadata syncs.
    pub fn set_headers(&mut self, headers: Headers) {
        self.headers = headers;
    }

    pub fn manifest(&self) -> Option<&str> {
        self.manifest.as_deref()
    }

    /// Point this object at segments stored under `container/prefix`.
    pub fn set_manifest(&mut self, manifest: impl Into<String>) {
        self.manifest = Some(manifest.into());
    }

    /// The whole object body.
    pub fn read(&self) -> Result<Vec<u8>> {
        self.read_range(0, 0, &[])
    }

    /// `size` bytes starting at `offset`. A `size` of zero reads to the end
    /// of the object.
    pub fn read_range(&self, offset: u64, size: u64, headers: &[(String, String)]) -> Result<Vec<u8>> {
        let mut headers = headers.to_vec();
        if size > 0 {
            let last = offset.checked_add(size - 1).ok_or_else(|| {
                StorageError::InvalidArgument(format!("range of {size} bytes at {offset} overflows"))
            })?;
            headers.push(("Range".to_string(), format!("bytes={offset}-{last}")));
        } else if offset > 0 {
            headers.push(("Range".to_string(), format!("bytes={offset}-")));
        }
        let response = self.container.connection().make_request(
            HttpMethod::Get,
            &[self.container.name(), self.name.as_str()],
            &headers,
            &[],
        )?;
        Ok(response.body)
    }

    /// Download the object into `path`, replacing any existing file.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let body = self.read()?;
        std::fs::write(path, body)?;
        Ok(())
    }

    /// Upload everything `reader` yields. See [`StorageObject::write`].
    pub fn write_from_reader(&mut self, mut reader: impl Read, content_type: Option<&str>) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.write(&data, content_type)
    }

    /// Upload the contents of the local file at `path`.
    pub fn write_from_file(&mut self, path: impl AsRef<Path>, content_type: Option<&str>) -> Result<()> {
        let file = File::open(path)?;
        self.write_from_reader(file, content_type)
    }

    /// Upload `data` as the object's content together with its metadata,
    /// manifest and extra headers.
    pub fn write(&mut self, data: &[u8], content_type: Option<&str>) -> Result<()> {
        self.content_type = Some(content_type.unwrap_or(DEFAULT_CONTENT_TYPE).to_string());
        self.size = Some(data.len() as u64);

        let headers = self.new_headers()?;

        debug!(container = self.container.name(), object = %self.name, bytes = data.len(), "uploading object");
        let response = self.container.connection().make_request_with_body(
            HttpMethod::Put,
            &[self.container.name(), self.name.as_str()],
            &headers,
            &[],
            data.to_vec(),
        )?;
        self.etag = response.header("etag").map(str::to_string);
        self.container.connection().clear_listing_cache();
        Ok(())
    }

    /// Commit metadata and extra headers without re-uploading content.
    /// The service must acknowledge with 202.
    pub fn sync_metadata(&self) -> Result<()> {
        if self.metadata.is_empty() && self.headers.is_empty() {
            return Ok(());
        }
        let headers = self.new_headers()?;
        let response = self.container.connection().make_request(
            HttpMethod::Post,
            &[self.container.name(), self.name.as_str()],
            &headers,
            &[],
        )?;
        if response.status != 202 {
            return Err(StorageError::from_response(response));
        }
        Ok(())
    }

    /// Commit the manifest as a zero-length object.
    pub fn sync_manifest(&self) -> Result<()> {
        if self.manifest.is_none() {
            return Ok(());
        }
        let headers = self.new_headers()?;
        self.container.connection().make_request(
            HttpMethod::Put,
            &[self.container.name(), self.name.as_str()],
            &headers,
            &[],
        )?;
        self.container.connection().clear_listing_cache();
        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        self.container.delete_object(&self.name)
    }

    pub fn public_uri(&self) -> Result<String> {
        Ok(self.below(&self.container.public_uri()?))
    }

    pub fn public_ssl_uri(&self) -> Result<String> {
        Ok(self.below(&self.container.public_ssl_uri()?))
    }

    pub fn public_streaming_uri(&self) -> Result<String> {
        Ok(self.below(&self.container.public_streaming_uri()?))
    }

    /// Purge this object from the edge caches.
    pub fn purge_from_cdn(&self, email: Option<&str>) -> Result<()> {
        let connection = self.container.connection();
        if !connection.session()?.cdn_enabled() {
            return Err(StorageError::CdnNotEnabled);
        }
        let headers: Vec<(String, String)> = email
            .map(|email| ("X-Purge-Email".to_string(), email.to_string()))
            .into_iter()
            .collect();
        connection.make_cdn_request(
            HttpMethod::Delete,
            &[self.container.name(), self.name.as_str()],
            &headers,
        )?;
        Ok(())
    }

    fn below(&self, base: &str) -> String {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            utf8_percent_encode(&self.name, SEGMENT)
        )
    }

    /// Headers describing the object's attributes, merged over the extra
    /// headers so attribute values win.
    fn new_headers(&self) -> Result<Headers> {
        let mut headers = vec![(
            "Content-Type".to_string(),
            self.content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        )];
        if let Some(manifest) = &self.manifest {
            headers.push(("X-Object-Manifest".to_string(), manifest.clone()));
        }
        for (key, value) in &self.metadata {
            if key.len() > META_NAME_LIMIT {
                return Err(StorageError::InvalidMetaName {
                    name: key.clone(),
                    limit: META_NAME_LIMIT,
                });
            }
            if value.len() > META_VALUE_LIMIT {
                return Err(StorageError::InvalidMetaValue {
                    name: key.clone(),
                    limit: META_VALUE_LIMIT,
                });
            }
            headers.push((format!("X-Object-Meta-{key}"), value.clone()));
        }
        Ok(merge_headers(self.headers.clone(), &headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;
    use crate::config::ConnectionOptions;
    use crate::connection::Connection;
    use crate::test_support::{response, StubTransport, AUTH_URL};

    fn connection(transport: &StubTransport) -> Connection<&StubTransport> {
        Connection::with_transport(
            Credentials::new("tester", "secret"),
            ConnectionOptions::new(AUTH_URL),
            transport,
        )
        .unwrap()
    }

    fn container<'a>(conn: &'a Connection<&'a StubTransport>) -> Container<'a, &'a StubTransport> {
        Container::load(conn, "photos", 0, 0, BTreeMap::new()).unwrap()
    }

    #[test]
    fn object_name_limits() {
        assert!(validate_object_name(&"o".repeat(1024)).is_ok());
        assert!(matches!(
            validate_object_name(&"o".repeat(1025)),
            Err(StorageError::InvalidObjectName(_))
        ));
        assert!(validate_object_name("").is_err());
    }

    #[test]
    fn get_object_loads_attributes() {
        let transport = StubTransport::new();
        let conn = connection(&transport);
        transport.push_auth("AUTH_tk1", false);
        transport.push_response(response(
            200,
            &[
                ("Content-Type", "image/jpeg"),
                ("Content-Length", "5"),
                ("ETag", "abc123"),
                ("Last-Modified", "Wed, 01 May 2024 10:00:00 GMT"),
                ("X-Object-Meta-Author", "milton"),
            ],
            b"",
        ));

        let container = container(&conn);
        let object = container.get_object("cat.jpg").unwrap();
        assert_eq!(object.content_type(), Some("image/jpeg"));
        assert_eq!(object.size(), Some(5));
        assert_eq!(object.etag(), Some("abc123"));
        assert_eq!(object.metadata().get("author").map(String::as_str), Some("milton"));
        assert_eq!(
            transport.requests()[1].url,
            "https://storage.example.org:443/v1/AUTH_test/photos/cat.jpg"
        );
    }

    #[test]
    fn get_missing_object() {
        let transport = StubTransport::new();
        let conn = connection(&transport);
        transport.push_auth("AUTH_tk1", false);
        transport.push_status(404);
        transport.push_status(404);

        let container = container(&conn);
        assert!(matches!(
            container.get_object("cat.jpg"),
            Err(StorageError::NoSuchObject(_))
        ));
        let fresh = container.create_object("cat.jpg").unwrap();
        assert_eq!(fresh.size(), None);
    }

    #[test]
    fn invalid_object_name_never_reaches_the_network() {
        let transport = StubTransport::new();
        let conn = connection(&transport);
        transport.push_auth("AUTH_tk1", false);

        let container = container(&conn);
        let before = transport.requests().len();
        let name = "o".repeat(1025);
        assert!(matches!(
            container.create_object(&name),
            Err(StorageError::InvalidObjectName(_))
        ));
        assert_eq!(transport.requests().len(), before);
    }

    #[test]
    fn write_sends_body_and_metadata_headers() {
        let transport = StubTransport::new();
        let conn = connection(&transport);
        transport.push_auth("AUTH_tk1", false);
        transport.push_status(404);
        transport.push_response(response(201, &[("Etag", "5d41402abc4b2a76b9719d911017c592")], b""));

        let container = container(&conn);
        let mut object = container.create_object("hello.txt").unwrap();
        object.set_metadata(BTreeMap::from([("Author".to_string(), "milton".to_string())]));
        object.set_headers(vec![("Content-Disposition".to_string(), "inline".to_string())]);
        object.write(b"hello", Some("text/plain")).unwrap();

        let put = &transport.requests()[2];
        assert_eq!(put.method, HttpMethod::Put);
        assert_eq!(put.body.as_deref(), Some(&b"hello"[..]));
        assert_eq!(put.header("content-type"), Some("text/plain"));
        assert_eq!(put.header("X-Object-Meta-Author"), Some("milton"));
        assert_eq!(put.header("content-disposition"), Some("inline"));
        assert_eq!(put.header("etag"), None);
        assert_eq!(object.etag(), Some("5d41402abc4b2a76b9719d911017c592"));
        assert_eq!(object.size(), Some(5));
    }

    #[test]
    fn oversized_metadata_is_rejected() {
        let transport = StubTransport::new();
        let conn = connection(&transport);
        transport.push_auth("AUTH_tk1", false);
        transport.push_status(404);

        let container = container(&conn);
        let mut object = container.create_object("hello.txt").unwrap();
        object.set_metadata(BTreeMap::from([("k".repeat(129), "v".to_string())]));
        assert!(matches!(
            object.write(b"x", None),
            Err(StorageError::InvalidMetaName { .. })
        ));
        object.set_metadata(BTreeMap::from([("k".to_string(), "v".repeat(257))]));
        assert!(matches!(
            object.sync_metadata(),
            Err(StorageError::InvalidMetaValue { .. })
        ));
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn sync_metadata_requires_202() {
        let transport = StubTransport::new();
        let conn = connection(&transport);
        transport.push_auth("AUTH_tk1", false);
        transport.push_status(404);
        transport.push_status(202);
        transport.push_status(204);

        let container = container(&conn);
        let mut object = container.create_object("hello.txt").unwrap();
        object.set_metadata(BTreeMap::from([("color".to_string(), "red".to_string())]));
        object.sync_metadata().unwrap();
        let err = object.sync_metadata().unwrap_err();
        assert_eq!(err.status(), Some(204));
        assert_eq!(transport.requests()[2].method, HttpMethod::Post);
    }

    #[test]
    fn sync_without_changes_is_a_no_op() {
        let transport = StubTransport::new();
        let conn = connection(&transport);
        transport.push_auth("AUTH_tk1", false);
        transport.push_status(404);

        let container = container(&conn);
        let object = container.create_object("hello.txt").unwrap();
        object.sync_metadata().unwrap();
        object.sync_manifest().unwrap();
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn sync_manifest_puts_manifest_header() {
        let transport = StubTransport::new();
        let conn = connection(&transport);
        transport.push_auth("AUTH_tk1", false);
        transport.push_status(404);
        transport.push_status(201);

        let container = container(&conn);
        let mut object = container.create_object("movie.mkv").unwrap();
        object.set_manifest("segments/movie.mkv/");
        object.sync_manifest().unwrap();

        let put = &transport.requests()[2];
        assert_eq!(put.method, HttpMethod::Put);
        assert_eq!(put.header("x-object-manifest"), Some("segments/movie.mkv/"));
        assert!(put.body.is_none());
    }

    #[test]
    fn read_range_sets_range_header() {
        let transport = StubTransport::new();
        let conn = connection(&transport);
        transport.push_auth("AUTH_tk1", false);
        transport.push_status(404);
        transport.push_response(response(206, &[], b"ell"));
        transport.push_response(response(206, &[], b"llo"));

        let container = container(&conn);
        let object = container.create_object("hello.txt").unwrap();
        assert_eq!(object.read_range(1, 3, &[]).unwrap(), b"ell");
        assert_eq!(object.read_range(2, 0, &[]).unwrap(), b"llo");

        let requests = transport.requests();
        assert_eq!(requests[2].header("range"), Some("bytes=1-3"));
        assert_eq!(requests[3].header("range"), Some("bytes=2-"));
    }

    #[test]
    fn read_range_rejects_overflowing_range() {
        let transport = StubTransport::new();
        let conn = connection(&transport);
        transport.push_auth("AUTH_tk1", false);
        transport.push_status(404);

        let container = container(&conn);
        let object = container.create_object("hello.txt").unwrap();
        assert!(matches!(
            object.read_range(u64::MAX, 2, &[]),
            Err(StorageError::InvalidArgument(_))
        ));
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn write_from_reader_uploads_everything() {
        let transport = StubTransport::new();
        let conn = connection(&transport);
        transport.push_auth("AUTH_tk1", false);
        transport.push_status(404);
        transport.push_response(response(201, &[("ETag", "5d41402abc4b2a76b9719d911017c592")], b""));

        let container = container(&conn);
        let mut object = container.create_object("hello.txt").unwrap();
        object
            .write_from_reader(std::io::Cursor::new(b"hello".to_vec()), Some("text/plain"))
            .unwrap();
        assert_eq!(object.size(), Some(5));
        assert_eq!(object.etag(), Some("5d41402abc4b2a76b9719d911017c592"));

        let put = &transport.requests()[2];
        assert_eq!(put.method, HttpMethod::Put);
        assert_eq!(put.header("content-type"), Some("text/plain"));
        assert_eq!(put.body.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn write_from_missing_file_is_io_error() {
        let transport = StubTransport::new();
        let conn = connection(&transport);
        transport.push_auth("AUTH_tk1", false);
        transport.push_status(404);

        let container = container(&conn);
        let mut object = container.create_object("hello.txt").unwrap();
        let missing = std::env::temp_dir().join("swift-core-no-such-upload-source");
        assert!(matches!(
            object.write_from_file(&missing, None),
            Err(StorageError::Io(_))
        ));
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn public_uri_appends_encoded_name() {
        let transport = StubTransport::new();
        let conn = connection(&transport);
        transport.push_auth("AUTH_tk1", true);
        transport.push_response(response(204, &[("X-CDN-URI", "http://c1.cdn.example.net/")], b""));
        transport.push_status(404);

        let container = Container::load(&conn, "photos", 0, 0, BTreeMap::new()).unwrap();
        let object = container.create_object("summer cat.jpg").unwrap();
        assert_eq!(
            object.public_uri().unwrap(),
            "http://c1.cdn.example.net/summer%20cat.jpg"
        );
    }

    #[test]
    fn purge_object_requires_cdn() {
        let transport = StubTransport::new();
        let conn = connection(&transport);
        transport.push_auth("AUTH_tk1", false);
        transport.push_status(404);

        let container = container(&conn);
        let object = container.create_object("hello.txt").unwrap();
        assert!(matches!(
            object.purge_from_cdn(None),
            Err(StorageError::CdnNotEnabled)
        ));
    }
}
