//! Containers and their CDN publication state.

use std::collections::BTreeMap;

use crate::connection::Connection;
use crate::error::{Result, StorageError};
use crate::http::{HttpMethod, HttpResponse};
use crate::object::{validate_object_name, StorageObject};
use crate::transport::{Transport, UreqTransport};
use crate::types::{json_listing, plain_names, ListingFormat, ObjectEntry};

pub const CONTAINER_NAME_LIMIT: usize = 256;

/// Query parameters honoured by object listings.
pub const OBJECT_LISTING_PARAMS: &[&str] =
    &["limit", "marker", "end_marker", "prefix", "format", "delimiter"];

pub const CONTAINER_META_PREFIX: &str = "x-container-meta-";

/// Default CDN cache lifetime, one day.
pub const DEFAULT_CDN_TTL: u64 = 86_400;

/// Container names must be non-empty, at most 256 bytes and free of `/`.
pub fn validate_container_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.len() > CONTAINER_NAME_LIMIT {
        return Err(StorageError::InvalidContainerName(name.to_string()));
    }
    Ok(())
}

/// CDN attributes of a container, as reported by the CDN management API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CdnAttributes {
    pub uri: Option<String>,
    pub ssl_uri: Option<String>,
    pub streaming_uri: Option<String>,
    pub ttl: Option<u64>,
    pub log_retention: bool,
}

impl CdnAttributes {
    fn from_response(response: &HttpResponse) -> Self {
        // a container that was made private keeps reporting its URIs
        let enabled = response
            .header("x-cdn-enabled")
            .map_or(true, |v| !v.eq_ignore_ascii_case("false"));
        let owned = |name: &str| response.header(name).filter(|_| enabled).map(str::to_string);
        Self {
            uri: owned("x-cdn-uri"),
            ssl_uri: owned("x-cdn-ssl-uri"),
            streaming_uri: owned("x-cdn-streaming-uri"),
            ttl: response.header("x-ttl").and_then(|v| v.trim().parse().ok()),
            log_retention: response
                .header("x-log-retention")
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
        }
    }
}

/// A named container bound to the connection that produced it.
#[derive(Debug)]
pub struct Container<'a, T = UreqTransport> {
    connection: &'a Connection<T>,
    name: String,
    object_count: u64,
    bytes_used: u64,
    metadata: BTreeMap<String, String>,
    cdn: CdnAttributes,
}

impl<'a, T: Transport> Container<'a, T> {
    /// Build a container handle. With CDN enabled on the account its CDN
    /// attributes are fetched as well; a 404 from the CDN means the
    /// container was never published.
    pub(crate) fn load(
        connection: &'a Connection<T>,
        name: &str,
        object_count: u64,
        bytes_used: u64,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut cdn = CdnAttributes::default();
        if connection.session()?.cdn_enabled() {
            match connection.make_cdn_request(HttpMethod::Head, &[name], &[]) {
                Ok(response) => cdn = CdnAttributes::from_response(&response),
                Err(StorageError::Response { status: 404, .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(Self {
            connection,
            name: name.to_string(),
            object_count,
            bytes_used,
            metadata,
            cdn,
        })
    }

    pub fn connection(&self) -> &'a Connection<T> {
        self.connection
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object_count(&self) -> u64 {
        self.object_count
    }

    pub fn bytes_used(&self) -> u64 {
        self.bytes_used
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn cdn(&self) -> &CdnAttributes {
        &self.cdn
    }

    /// Post `X-Container-Meta-*` (or other container) headers.
    pub fn update_metadata(&self, headers: &[(String, String)]) -> Result<()> {
        self.connection
            .make_request(HttpMethod::Post, &[self.name.as_str()], headers, &[])?;
        Ok(())
    }

    /// Serve the container as a static website. Unset arguments clear the
    /// corresponding setting.
    pub fn enable_static_web(
        &self,
        index: Option<&str>,
        listings: Option<bool>,
        error: Option<&str>,
        listings_css: Option<&str>,
    ) -> Result<()> {
        let listings = listings.map(|on| if on { "True" } else { "False" });
        let headers = [
            ("X-Container-Meta-Web-Index", index),
            ("X-Container-Meta-Web-Listings", listings),
            ("X-Container-Meta-Web-Error", error),
            ("X-Container-Meta-Web-Listings-CSS", listings_css),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.unwrap_or_default().to_string()))
        .collect::<Vec<_>>();
        self.update_metadata(&headers)
    }

    pub fn disable_static_web(&self) -> Result<()> {
        self.enable_static_web(None, None, None, None)
    }

    /// Keep previous object versions in `location`.
    pub fn enable_object_versioning(&self, location: &str) -> Result<()> {
        self.update_metadata(&[("X-Versions-Location".to_string(), location.to_string())])
    }

    pub fn disable_object_versioning(&self) -> Result<()> {
        self.update_metadata(&[("X-Versions-Location".to_string(), String::new())])
    }

    /// Publish the container to the CDN, or update its TTL when it is
    /// already public.
    pub fn make_public(&mut self, ttl: u64) -> Result<()> {
        self.require_cdn()?;
        let method = if self.cdn.uri.is_some() {
            HttpMethod::Post
        } else {
            HttpMethod::Put
        };
        let response = self.connection.make_cdn_request(
            method,
            &[self.name.as_str()],
            &[
                ("X-TTL".to_string(), ttl.to_string()),
                ("X-CDN-Enabled".to_string(), "True".to_string()),
            ],
        )?;
        self.cdn.ttl = Some(ttl);
        self.cdn.uri = response.header("x-cdn-uri").map(str::to_string);
        self.cdn.ssl_uri = response.header("x-cdn-ssl-uri").map(str::to_string);
        self.cdn.streaming_uri = response.header("x-cdn-streaming-uri").map(str::to_string);
        Ok(())
    }

    /// Stop serving through the CDN. Edge caches may keep serving until the
    /// TTL expires.
    pub fn make_private(&mut self) -> Result<()> {
        self.require_cdn()?;
        self.connection.make_cdn_request(
            HttpMethod::Post,
            &[self.name.as_str()],
            &[("X-CDN-Enabled".to_string(), "False".to_string())],
        )?;
        self.cdn.uri = None;
        self.cdn.ssl_uri = None;
        self.cdn.streaming_uri = None;
        Ok(())
    }

    /// Purge every object of the container from the edge caches.
    pub fn purge_from_cdn(&self, email: Option<&str>) -> Result<()> {
        self.require_cdn()?;
        let headers: Vec<(String, String)> = email
            .map(|email| ("X-Purge-Email".to_string(), email.to_string()))
            .into_iter()
            .collect();
        self.connection
            .make_cdn_request(HttpMethod::Delete, &[self.name.as_str()], &headers)?;
        Ok(())
    }

    pub fn set_log_retention(&mut self, enabled: bool) -> Result<()> {
        self.require_cdn()?;
        let value = if enabled { "True" } else { "False" };
        self.connection.make_cdn_request(
            HttpMethod::Post,
            &[self.name.as_str()],
            &[("X-Log-Retention".to_string(), value.to_string())],
        )?;
        self.cdn.log_retention = enabled;
        Ok(())
    }

    pub fn is_public(&self) -> Result<bool> {
        self.require_cdn()?;
        Ok(self.cdn.uri.is_some())
    }

    pub fn public_uri(&self) -> Result<String> {
        self.public(|cdn| cdn.uri.clone())
    }

    pub fn public_ssl_uri(&self) -> Result<String> {
        self.public(|cdn| cdn.ssl_uri.clone())
    }

    pub fn public_streaming_uri(&self) -> Result<String> {
        self.public(|cdn| cdn.streaming_uri.clone())
    }

    /// Handle for an object that may not exist yet. Existing objects are
    /// loaded from the service.
    pub fn create_object(&self, name: &str) -> Result<StorageObject<'_, T>> {
        let mut object = StorageObject::new(self, name)?;
        object.initialize()?;
        Ok(object)
    }

    /// Handle for an existing object, `NoSuchObject` otherwise.
    pub fn get_object(&self, name: &str) -> Result<StorageObject<'_, T>> {
        let mut object = StorageObject::new(self, name)?;
        if !object.initialize()? {
            return Err(StorageError::NoSuchObject(name.to_string()));
        }
        Ok(object)
    }

    pub fn delete_object(&self, name: &str) -> Result<()> {
        validate_object_name(name)?;
        match self
            .connection
            .make_request(HttpMethod::Delete, &[self.name.as_str(), name], &[], &[])
        {
            Ok(_) => {}
            Err(StorageError::Response { status: 404, .. }) => {
                return Err(StorageError::NoSuchObject(name.to_string()))
            }
            Err(err) => return Err(err),
        }
        self.connection.clear_listing_cache();
        Ok(())
    }

    /// Objects of the container. Pseudo-directory entries are skipped.
    pub fn get_objects(&self, params: &[(&str, &str)]) -> Result<Vec<StorageObject<'_, T>>> {
        Ok(self
            .get_objects_info(params)?
            .into_iter()
            .filter_map(|entry| match entry {
                ObjectEntry::Object(record) => Some(StorageObject::from_record(self, record)),
                ObjectEntry::Subdir { .. } => None,
            })
            .collect())
    }

    /// JSON object listing. See [`OBJECT_LISTING_PARAMS`].
    pub fn get_objects_info(&self, params: &[(&str, &str)]) -> Result<Vec<ObjectEntry>> {
        let body = self.get_objects_raw(params, ListingFormat::Json)?;
        json_listing(&body)
    }

    /// Plain object listing: one name per line.
    pub fn get_objects_list(&self, params: &[(&str, &str)]) -> Result<Vec<String>> {
        let body = self.get_objects_raw(params, ListingFormat::Plain)?;
        Ok(plain_names(&body))
    }

    pub fn get_objects_raw(&self, params: &[(&str, &str)], format: ListingFormat) -> Result<Vec<u8>> {
        self.connection
            .listing(Some(&self.name), OBJECT_LISTING_PARAMS, params, format)
    }

    /// Re-read counters and metadata from the service.
    pub fn refresh(&mut self) -> Result<()> {
        let fresh = self.connection.get_container(&self.name)?;
        self.object_count = fresh.object_count;
        self.bytes_used = fresh.bytes_used;
        self.metadata = fresh.metadata;
        self.cdn = fresh.cdn;
        Ok(())
    }

    fn require_cdn(&self) -> Result<()> {
        if self.connection.session()?.cdn_enabled() {
            Ok(())
        } else {
            Err(StorageError::CdnNotEnabled)
        }
    }

    fn public(&self, pick: impl Fn(&CdnAttributes) -> Option<String>) -> Result<String> {
        if !self.is_public()? {
            return Err(StorageError::ContainerNotPublic(self.name.clone()));
        }
        pick(&self.cdn).ok_or_else(|| StorageError::ContainerNotPublic(self.name.clone()))
    }
}
