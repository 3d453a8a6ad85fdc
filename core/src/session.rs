//! The authenticated session a connection routes requests through.

use std::fmt;

use crate::auth::AuthResponse;
use crate::error::Result;
use crate::url_info::{parse_url, UrlInfo};

/// Host prefix that routes storage traffic over the provider's private network.
pub const SERVICENET_PREFIX: &str = "snet-";

/// Token and base URLs from one successful authentication.
///
/// A session is never mutated. Re-authentication builds a new one and the
/// connection swaps it in whole.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    auth_token: String,
    storage: UrlInfo,
    cdn: Option<UrlInfo>,
}

impl Session {
    /// Build a session from an authentication result.
    ///
    /// With `servicenet` the storage host gets the `snet-` prefix. The CDN
    /// endpoint is parsed only when one was returned, and its presence alone
    /// decides whether CDN operations are available.
    pub fn connect(auth: AuthResponse, servicenet: bool) -> Result<Self> {
        let mut storage = parse_url(&auth.storage_url)?;
        if servicenet {
            storage = storage.with_host_prefix(SERVICENET_PREFIX);
        }
        let cdn = auth.cdn_url.as_deref().map(parse_url).transpose()?;
        Ok(Self {
            auth_token: auth.auth_token,
            storage,
            cdn,
        })
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn storage(&self) -> &UrlInfo {
        &self.storage
    }

    pub fn cdn(&self) -> Option<&UrlInfo> {
        self.cdn.as_ref()
    }

    pub fn cdn_enabled(&self) -> bool {
        self.cdn.is_some()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("auth_token", &"<redacted>")
            .field("storage", &self.storage)
            .field("cdn", &self.cdn)
            .finish()
    }
}
