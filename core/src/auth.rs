//! One-shot authentication against the storage auth endpoint.
//!
//! # Design
//! The exchange is split the same way as every other call: `build_request`
//! produces the GET with the credential headers, `parse_response` turns the
//! reply into an [`AuthResponse`] or a typed failure. `authenticate` joins the
//! two with a single round trip and never retries; the retry policy belongs
//! to the connection.

use std::fmt;

use crate::error::{Result, StorageError};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::transport::Transport;
use crate::url_info::{parse_url, UrlInfo};

pub const AUTH_USER_HEADER: &str = "x-auth-user";
pub const AUTH_KEY_HEADER: &str = "x-auth-key";
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";
pub const STORAGE_TOKEN_HEADER: &str = "x-storage-token";
pub const STORAGE_URL_HEADER: &str = "x-storage-url";
pub const CDN_MANAGEMENT_URL_HEADER: &str = "x-cdn-management-url";

/// Account username and API key. The key never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub api_key: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Routing information and token returned by a successful authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub storage_url: String,
    /// Absent when the account has no CDN.
    pub cdn_url: Option<String>,
    pub auth_token: String,
}

impl fmt::Debug for AuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthResponse")
            .field("storage_url", &self.storage_url)
            .field("cdn_url", &self.cdn_url)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

/// Talks to the remote authentication service.
#[derive(Debug, Clone)]
pub struct Authenticator {
    url_info: UrlInfo,
    credentials: Credentials,
    user_agent: String,
}

impl Authenticator {
    /// Fails with `InvalidUrl` if `auth_url` is not a valid http(s) URL.
    pub fn new(credentials: Credentials, auth_url: &str, user_agent: &str) -> Result<Self> {
        Ok(Self {
            url_info: parse_url(auth_url)?,
            credentials,
            user_agent: user_agent.to_string(),
        })
    }

    pub fn url_info(&self) -> &UrlInfo {
        &self.url_info
    }

    pub fn build_request(&self) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: format!(
                "{}/{}",
                self.url_info.origin(),
                self.url_info.path
            ),
            headers: vec![
                (AUTH_USER_HEADER.to_string(), self.credentials.username.clone()),
                (AUTH_KEY_HEADER.to_string(), self.credentials.api_key.clone()),
                ("User-Agent".to_string(), self.user_agent.clone()),
            ],
            body: None,
        }
    }

    pub fn parse_response(&self, response: HttpResponse) -> Result<AuthResponse> {
        if response.status == 401 {
            return Err(StorageError::AuthenticationFailed);
        }
        if !response.is_success() {
            return Err(StorageError::from_response(response));
        }

        let auth_token = non_empty_header(&response, AUTH_TOKEN_HEADER)
            .or_else(|| non_empty_header(&response, STORAGE_TOKEN_HEADER));
        let storage_url = non_empty_header(&response, STORAGE_URL_HEADER);
        let cdn_url = non_empty_header(&response, CDN_MANAGEMENT_URL_HEADER);

        match (auth_token, storage_url) {
            (Some(auth_token), Some(storage_url)) => Ok(AuthResponse {
                storage_url,
                cdn_url,
                auth_token,
            }),
            _ => Err(StorageError::AuthenticationError(
                "invalid response from the authentication service".to_string(),
            )),
        }
    }

    /// Perform the exchange over `transport`. Exactly one round trip.
    pub fn authenticate<T: Transport>(&self, transport: &T) -> Result<AuthResponse> {
        let response = transport.send(&self.build_request())?;
        self.parse_response(response)
    }
}

fn non_empty_header(response: &HttpResponse, name: &str) -> Option<String> {
    response
        .header(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
