//! Account-level operations: account metadata and container management.

use tracing::debug;

use crate::connection::Connection;
use crate::container::{validate_container_name, Container};
use crate::error::{Result, StorageError};
use crate::http::HttpMethod;
use crate::transport::Transport;
use crate::types::{json_listing, plain_names, AccountInfo, ContainerRecord, ListingFormat};

/// Query parameters honoured by account (container) listings.
pub const ACCOUNT_LISTING_PARAMS: &[&str] = &["limit", "marker", "end_marker", "format"];

pub const ACCOUNT_META_PREFIX: &str = "x-account-meta-";

impl<T: Transport> Connection<T> {
    /// Container count, bytes used and metadata of the account.
    pub fn get_account_info(&self) -> Result<AccountInfo> {
        let response = self.make_request(HttpMethod::Head, &[], &[], &[])?;
        Ok(AccountInfo {
            container_count: header_u64(response.header("x-account-container-count")),
            bytes_used: header_u64(response.header("x-account-bytes-used")),
            metadata: response
                .prefixed_headers(ACCOUNT_META_PREFIX)
                .into_iter()
                .collect(),
        })
    }

    /// Post `X-Account-Meta-*` headers to the account.
    pub fn update_account_metadata(&self, headers: &[(String, String)]) -> Result<()> {
        self.make_request(HttpMethod::Post, &[], headers, &[])?;
        Ok(())
    }

    /// Create a container. The service answers 202 when it already exists;
    /// with `error_on_existing` that becomes `ContainerExists`.
    pub fn create_container(&self, name: &str, error_on_existing: bool) -> Result<Container<'_, T>> {
        validate_container_name(name)?;
        let response = self.make_request(HttpMethod::Put, &[name], &[], &[])?;
        self.clear_listing_cache();
        if error_on_existing && response.status == 202 {
            return Err(StorageError::ContainerExists(name.to_string()));
        }
        Container::load(self, name, 0, 0, Default::default())
    }

    /// Delete an empty container and, with CDN enabled, unpublish it.
    pub fn delete_container(&self, name: &str) -> Result<()> {
        validate_container_name(name)?;
        match self.make_request(HttpMethod::Delete, &[name], &[], &[]) {
            Ok(_) => {}
            Err(StorageError::Response { status: 409, .. }) => {
                return Err(StorageError::ContainerNotEmpty(name.to_string()))
            }
            Err(StorageError::Response { status: 404, .. }) => {
                return Err(StorageError::NoSuchContainer(name.to_string()))
            }
            Err(err) => return Err(err),
        }
        self.clear_listing_cache();

        if self.session()?.cdn_enabled() {
            debug!(container = name, "disabling CDN for deleted container");
            match self.make_cdn_request(
                HttpMethod::Post,
                &[name],
                &[("X-CDN-Enabled".to_string(), "False".to_string())],
            ) {
                // never published
                Ok(_) | Err(StorageError::Response { status: 404, .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Fetch a container's counters and metadata.
    pub fn get_container(&self, name: &str) -> Result<Container<'_, T>> {
        validate_container_name(name)?;
        let response = match self.make_request(HttpMethod::Head, &[name], &[], &[]) {
            Ok(response) => response,
            Err(StorageError::Response { status: 404, .. }) => {
                return Err(StorageError::NoSuchContainer(name.to_string()))
            }
            Err(err) => return Err(err),
        };

        let object_count = header_u64(response.header("x-container-object-count"));
        let bytes_used = header_u64(response.header("x-container-bytes-used"));
        let metadata = response
            .prefixed_headers(crate::container::CONTAINER_META_PREFIX)
            .into_iter()
            .collect();
        Container::load(self, name, object_count, bytes_used, metadata)
    }

    /// Containers of the account, built from the JSON listing.
    pub fn get_containers(&self, params: &[(&str, &str)]) -> Result<Vec<Container<'_, T>>> {
        self.get_containers_info(params)?
            .into_iter()
            .map(|record| {
                Container::load(self, &record.name, record.count, record.bytes, Default::default())
            })
            .collect()
    }

    /// Names of the containers published to the CDN.
    pub fn get_public_containers_list(&self) -> Result<Vec<String>> {
        if !self.session()?.cdn_enabled() {
            return Err(StorageError::CdnNotEnabled);
        }
        let response = self.make_cdn_request(HttpMethod::Get, &[], &[])?;
        Ok(plain_names(&response.body))
    }

    /// JSON container listing. See [`ACCOUNT_LISTING_PARAMS`].
    pub fn get_containers_info(&self, params: &[(&str, &str)]) -> Result<Vec<ContainerRecord>> {
        let body = self.get_containers_raw(params, ListingFormat::Json)?;
        json_listing(&body)
    }

    /// Plain container listing: one name per line.
    pub fn get_containers_list(&self, params: &[(&str, &str)]) -> Result<Vec<String>> {
        let body = self.get_containers_raw(params, ListingFormat::Plain)?;
        Ok(plain_names(&body))
    }

    /// Raw container listing body, served from the listing cache when the
    /// same parameters were requested before.
    pub fn get_containers_raw(&self, params: &[(&str, &str)], format: ListingFormat) -> Result<Vec<u8>> {
        self.listing(None, ACCOUNT_LISTING_PARAMS, params, format)
    }
}

pub(crate) fn header_u64(value: Option<&str>) -> u64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}
