//! Synchronous client core for OpenStack Swift compatible object storage.
//!
//! # Overview
//! A [`Connection`] authenticates against a v1.0 auth endpoint, holds the
//! resulting session (token, storage URL, optional CDN management URL) and
//! routes requests to the storage or CDN endpoint. Account, container and
//! object operations are layered on top of it.
//!
//! # Design
//! - Wire types (`HttpRequest` / `HttpResponse`) are plain data; the actual
//!   round trip goes through the [`Transport`] trait, so tests can script
//!   responses without a network.
//! - Authentication is lazy and the session is shared. Concurrent callers
//!   that hit an expired token re-authenticate once between them.
//! - Handles borrow their parent: a [`Container`] borrows the connection and
//!   a [`StorageObject`] borrows its container.

pub mod account;
pub mod auth;
pub mod config;
pub mod connection;
pub mod container;
pub mod error;
pub mod http;
pub mod object;
pub mod session;
pub mod transport;
pub mod types;
pub mod url_info;

#[cfg(test)]
mod test_support;

pub use auth::{AuthResponse, Authenticator, Credentials};
pub use config::ConnectionOptions;
pub use connection::Connection;
pub use container::{CdnAttributes, Container};
pub use error::{Result, StorageError, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use object::StorageObject;
pub use session::Session;
pub use transport::{Transport, UreqTransport};
pub use types::{AccountInfo, ContainerRecord, ListingFormat, ObjectEntry, ObjectRecord};
pub use url_info::{parse_url, Scheme, UrlInfo};
