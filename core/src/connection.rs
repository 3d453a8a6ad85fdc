//! Authenticated connection and request router.
//!
//! # Design
//! A `Connection` starts unauthenticated and authenticates lazily: every
//! request path begins with [`Connection::session`], which runs the auth
//! exchange when no session exists yet. The session is only ever replaced in
//! `replace_session`, under the session lock, and the lock is held for the
//! auth round trip alone, never for the storage request itself.
//!
//! Retry policy, per request:
//! - a 401 triggers one re-authentication and one resend against the new
//!   session;
//! - a transport failure or a 5xx triggers one resend of the identical
//!   request with the same token;
//! - whatever the second attempt yields is final.
//!
//! There is no backoff and no loop, so a request costs at most two round
//! trips plus one authentication.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::auth::{Authenticator, Credentials};
use crate::config::ConnectionOptions;
use crate::error::{Result, StorageError};
use crate::http::{merge_headers, Headers, HttpMethod, HttpRequest, HttpResponse};
use crate::session::Session;
use crate::transport::{Transport, UreqTransport};
use crate::types::ListingFormat;

pub const AUTH_TOKEN: &str = "X-Auth-Token";
pub const USER_AGENT: &str = "User-Agent";

/// Which base URL a request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Storage,
    Cdn,
}

/// Cache key for a listing: the container being listed (or the account) and
/// the filtered, ordered query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ListingKey {
    container: Option<String>,
    params: BTreeMap<String, String>,
}

/// A session-holding client for one storage account.
#[derive(Debug)]
pub struct Connection<T = UreqTransport> {
    transport: T,
    authenticator: Authenticator,
    options: ConnectionOptions,
    session: Mutex<Option<Arc<Session>>>,
    listings: Mutex<HashMap<ListingKey, Vec<u8>>>,
}

impl Connection<UreqTransport> {
    /// Connection over a `ureq` transport using the configured timeout.
    pub fn new(credentials: Credentials, options: ConnectionOptions) -> Result<Self> {
        let transport = UreqTransport::new(options.timeout());
        Self::with_transport(credentials, options, transport)
    }
}

impl<T: Transport> Connection<T> {
    pub fn with_transport(
        credentials: Credentials,
        options: ConnectionOptions,
        transport: T,
    ) -> Result<Self> {
        options.validate()?;
        let authenticator = Authenticator::new(credentials, &options.auth_url, &options.user_agent)?;
        Ok(Self {
            transport,
            authenticator,
            options,
            session: Mutex::new(None),
            listings: Mutex::new(HashMap::new()),
        })
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn user_agent(&self) -> &str {
        &self.options.user_agent
    }

    /// Token of the current session, if authenticated. Never triggers auth.
    pub fn auth_token(&self) -> Option<String> {
        self.lock_session()
            .as_ref()
            .map(|session| session.auth_token().to_string())
    }

    /// Whether the current session has a CDN endpoint. `false` until the
    /// connection has authenticated.
    pub fn cdn_enabled(&self) -> bool {
        self.lock_session()
            .as_ref()
            .is_some_and(|session| session.cdn_enabled())
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock_session().is_some()
    }

    /// Authenticate now, replacing any existing session.
    pub fn authenticate(&self) -> Result<Arc<Session>> {
        let mut slot = self.lock_session();
        self.replace_session(&mut slot)
    }

    /// The current session, authenticating first if there is none.
    pub fn session(&self) -> Result<Arc<Session>> {
        let mut slot = self.lock_session();
        match slot.as_ref() {
            Some(session) => Ok(Arc::clone(session)),
            None => self.replace_session(&mut slot),
        }
    }

    /// Send a request to the storage endpoint.
    pub fn make_request(
        &self,
        method: HttpMethod,
        path: &[&str],
        headers: &[(String, String)],
        query: &[(String, String)],
    ) -> Result<HttpResponse> {
        self.dispatch(Target::Storage, method, path, headers, query, None)
    }

    /// Send a request with a body to the storage endpoint.
    pub fn make_request_with_body(
        &self,
        method: HttpMethod,
        path: &[&str],
        headers: &[(String, String)],
        query: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<HttpResponse> {
        self.dispatch(Target::Storage, method, path, headers, query, Some(body))
    }

    /// Send a request to the CDN management endpoint. Fails with
    /// `CdnNotEnabled` without touching the network when the account has
    /// no CDN.
    pub fn make_cdn_request(
        &self,
        method: HttpMethod,
        path: &[&str],
        headers: &[(String, String)],
    ) -> Result<HttpResponse> {
        self.dispatch(Target::Cdn, method, path, headers, &[], None)
    }

    /// Encoded storage path for `segments`, e.g. `/v1/AUTH_acct/photos/cat.jpg`.
    pub fn storage_path(&self, segments: &[&str]) -> Result<String> {
        Ok(self.session()?.storage().path_for(segments))
    }

    /// Raw listing body for the account (`container == None`) or a
    /// container. Parameters outside `allowed` are dropped and `format`
    /// always wins. Bodies are cached per parameter set until the cache is
    /// cleared.
    pub(crate) fn listing(
        &self,
        container: Option<&str>,
        allowed: &[&str],
        params: &[(&str, &str)],
        format: ListingFormat,
    ) -> Result<Vec<u8>> {
        let key = ListingKey {
            container: container.map(str::to_string),
            params: listing_params(allowed, params, format),
        };
        if let Some(body) = self.lock_listings().get(&key) {
            debug!(container = ?key.container, "listing served from cache");
            return Ok(body.clone());
        }

        let query: Vec<(String, String)> = key
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let path: Vec<&str> = container.into_iter().collect();
        let body = self
            .make_request(HttpMethod::Get, &path, &[], &query)?
            .body;
        self.lock_listings().insert(key, body.clone());
        Ok(body)
    }

    pub fn clear_listing_cache(&self) {
        self.lock_listings().clear();
    }

    fn dispatch(
        &self,
        target: Target,
        method: HttpMethod,
        path: &[&str],
        headers: &[(String, String)],
        query: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse> {
        let session = self.session()?;
        let request = HttpRequest {
            method,
            url: resolve_url(&session, target, path, query)?,
            headers: self.request_headers(&session, headers),
            body,
        };

        debug!(%method, url = %request.url, "sending request");
        let response = match self.transport.send(&request) {
            Ok(response) if response.status == 401 => {
                warn!(%method, url = %request.url, "token rejected, re-authenticating");
                let session = self.reauthenticate(&session)?;
                let retry = HttpRequest {
                    url: resolve_url(&session, target, path, query)?,
                    headers: self.request_headers(&session, headers),
                    ..request
                };
                self.transport.send(&retry)?
            }
            Ok(response) if response.status >= 500 => {
                warn!(%method, url = %request.url, status = response.status, "server error, resending once");
                self.transport.send(&request)?
            }
            Ok(response) => response,
            Err(err) => {
                warn!(%method, url = %request.url, error = %err, "transport failure, resending once");
                self.transport.send(&request)?
            }
        };

        if response.is_success() {
            Ok(response)
        } else {
            debug!(%method, status = response.status, "request failed");
            Err(StorageError::from_response(response))
        }
    }

    /// Re-authenticate after `stale` was rejected. When another caller has
    /// already replaced that session, the newer one is reused.
    fn reauthenticate(&self, stale: &Arc<Session>) -> Result<Arc<Session>> {
        let mut slot = self.lock_session();
        if let Some(current) = slot.as_ref() {
            if !Arc::ptr_eq(current, stale) {
                debug!("session already refreshed by another request");
                return Ok(Arc::clone(current));
            }
        }
        *slot = None;
        self.replace_session(&mut slot)
    }

    /// The only place the session changes.
    fn replace_session(&self, slot: &mut Option<Arc<Session>>) -> Result<Arc<Session>> {
        info!(auth_url = %self.authenticator.url_info(), "authenticating");
        let auth = self.authenticator.authenticate(&self.transport)?;
        let session = Arc::new(Session::connect(auth, self.options.servicenet)?);
        info!(
            storage = %session.storage(),
            cdn_enabled = session.cdn_enabled(),
            "authenticated"
        );
        *slot = Some(Arc::clone(&session));
        self.clear_listing_cache();
        Ok(session)
    }

    fn request_headers(&self, session: &Session, extra: &[(String, String)]) -> Headers {
        merge_headers(
            vec![
                (USER_AGENT.to_string(), self.options.user_agent.clone()),
                (AUTH_TOKEN.to_string(), session.auth_token().to_string()),
            ],
            extra,
        )
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Arc<Session>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_listings(&self) -> MutexGuard<'_, HashMap<ListingKey, Vec<u8>>> {
        self.listings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn resolve_url(
    session: &Session,
    target: Target,
    path: &[&str],
    query: &[(String, String)],
) -> Result<String> {
    let base = match target {
        Target::Storage => session.storage(),
        Target::Cdn => session.cdn().ok_or(StorageError::CdnNotEnabled)?,
    };
    let query = (!query.is_empty()).then(|| {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query)
            .finish()
    });
    Ok(base.url_for(path, query.as_deref()))
}

fn listing_params(
    allowed: &[&str],
    params: &[(&str, &str)],
    format: ListingFormat,
) -> BTreeMap<String, String> {
    let mut filtered: BTreeMap<String, String> = params
        .iter()
        .filter(|(name, _)| allowed.contains(name))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    filtered.insert("format".to_string(), format.as_str().to_string());
    filtered
}
