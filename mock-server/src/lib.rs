//! In-memory emulator of a Swift storage service, its v1.0 auth endpoint and
//! its CDN management API.
//!
//! # Overview
//! - `GET /auth/v1.0` checks `X-Auth-User` / `X-Auth-Key` and mints a token.
//!   Storage and CDN URLs are built from the request's `Host` header so the
//!   returned session points back at this server.
//! - `/v1/{account}[/{container}[/{object}]]` serves the storage API.
//! - `/cdn/v1/{account}[/{container}[/{object}]]` serves the CDN API.
//!
//! [`MockState`] is shared with the test driving the server: it can revoke
//! every token, make the next storage requests fail with 503, and count the
//! requests each endpoint received.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get},
    Router,
};
use tokio::{net::TcpListener, sync::RwLock};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use md5::{Digest, Md5};
use uuid::Uuid;

pub mod listing;

use listing::{ContainerEntry, Listed, ListingQuery, ObjectEntry};

pub const DEFAULT_USER: &str = "tester";
pub const DEFAULT_KEY: &str = "testing";
pub const DEFAULT_TTL: u64 = 86_400;

const ACCOUNT_META: &str = "x-account-meta-";
const CONTAINER_META: &str = "x-container-meta-";
const OBJECT_META: &str = "x-object-meta-";
const VERSIONS_LOCATION: &str = "x-versions-location";

type Reply = Result<Response, Response>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    Storage,
    Cdn,
}

/// Shared server state. Cloning is cheap; clones observe the same data.
#[derive(Clone, Debug)]
pub struct MockState {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    users: HashMap<String, String>,
    cdn: bool,
    // token -> account
    tokens: Mutex<HashMap<String, String>>,
    accounts: RwLock<HashMap<String, Account>>,
    auth_requests: AtomicUsize,
    storage_requests: AtomicUsize,
    cdn_requests: AtomicUsize,
    pending_failures: AtomicUsize,
}

#[derive(Debug, Default)]
struct Account {
    metadata: BTreeMap<String, String>,
    containers: BTreeMap<String, StoredContainer>,
    cdn: BTreeMap<String, CdnEntry>,
}

#[derive(Debug, Default)]
struct StoredContainer {
    metadata: BTreeMap<String, String>,
    objects: BTreeMap<String, StoredObject>,
}

impl StoredContainer {
    fn bytes_used(&self) -> u64 {
        self.objects.values().map(|o| o.data.len() as u64).sum()
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    etag: String,
    modified: SystemTime,
    metadata: BTreeMap<String, String>,
    manifest: Option<String>,
    disposition: Option<String>,
}

impl StoredObject {
    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), self.content_type.clone()),
            ("ETag".to_string(), self.etag.clone()),
            ("Last-Modified".to_string(), httpdate::fmt_http_date(self.modified)),
            ("Accept-Ranges".to_string(), "bytes".to_string()),
        ];
        if let Some(manifest) = &self.manifest {
            headers.push(("X-Object-Manifest".to_string(), manifest.clone()));
        }
        if let Some(disposition) = &self.disposition {
            headers.push(("Content-Disposition".to_string(), disposition.clone()));
        }
        headers.extend(self.metadata.clone());
        headers
    }
}

#[derive(Debug, Clone)]
struct CdnEntry {
    enabled: bool,
    ttl: u64,
    log_retention: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self::new()
    }
}

impl MockState {
    /// One account for [`DEFAULT_USER`] with CDN enabled.
    pub fn new() -> Self {
        Self::with_account(DEFAULT_USER, DEFAULT_KEY, true)
    }

    pub fn with_account(user: &str, key: &str, cdn: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                users: HashMap::from([(user.to_string(), key.to_string())]),
                cdn,
                tokens: Mutex::new(HashMap::new()),
                accounts: RwLock::new(HashMap::new()),
                auth_requests: AtomicUsize::new(0),
                storage_requests: AtomicUsize::new(0),
                cdn_requests: AtomicUsize::new(0),
                pending_failures: AtomicUsize::new(0),
            }),
        }
    }

    /// Revoke every issued token. Subsequent requests carrying them get 401.
    pub fn expire_tokens(&self) {
        self.tokens().clear();
    }

    /// Answer the next `count` storage requests with 503.
    pub fn fail_next(&self, count: usize) {
        self.inner.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn auth_requests(&self) -> usize {
        self.inner.auth_requests.load(Ordering::SeqCst)
    }

    pub fn storage_requests(&self) -> usize {
        self.inner.storage_requests.load(Ordering::SeqCst)
    }

    pub fn cdn_requests(&self) -> usize {
        self.inner.cdn_requests.load(Ordering::SeqCst)
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.inner.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_failure(&self) -> bool {
        self.inner
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn authorize(&self, surface: Surface, headers: &HeaderMap, account: &str) -> Result<(), Response> {
        let counter = match surface {
            Surface::Storage => &self.inner.storage_requests,
            Surface::Cdn => &self.inner.cdn_requests,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        if surface == Surface::Storage && self.take_failure() {
            debug!(account, "injected failure");
            return Err(StatusCode::SERVICE_UNAVAILABLE.into_response());
        }

        let tokens = self.tokens();
        match header_str(headers, "x-auth-token").and_then(|token| tokens.get(token)) {
            Some(owner) if owner == account => Ok(()),
            Some(_) => Err(StatusCode::FORBIDDEN.into_response()),
            None => Err(StatusCode::UNAUTHORIZED.into_response()),
        }
    }
}

pub fn app() -> Router {
    app_with_state(MockState::new())
}

pub fn app_with_state(state: MockState) -> Router {
    Router::new()
        .route("/auth/v1.0", get(authenticate))
        .route(
            "/v1/{account}",
            get(list_containers).head(head_account).post(post_account),
        )
        .route(
            "/v1/{account}/{container}",
            get(list_objects)
                .head(head_container)
                .put(put_container)
                .post(post_container)
                .delete(delete_container),
        )
        // HEAD is served by the GET handler with the body stripped
        .route(
            "/v1/{account}/{container}/{*object}",
            get(get_object)
                .put(put_object)
                .post(post_object)
                .delete(delete_object),
        )
        .route("/cdn/v1/{account}", get(cdn_list))
        .route(
            "/cdn/v1/{account}/{container}",
            get(cdn_head)
                .put(cdn_put)
                .post(cdn_post)
                .delete(cdn_purge),
        )
        .route("/cdn/v1/{account}/{container}/{*object}", delete(cdn_purge_object))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, MockState::new()).await
}

pub async fn serve(listener: TcpListener, state: MockState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}

// --- auth ---

async fn authenticate(State(state): State<MockState>, headers: HeaderMap) -> Reply {
    state.inner.auth_requests.fetch_add(1, Ordering::SeqCst);

    let (Some(user), Some(key)) = (
        header_str(&headers, "x-auth-user"),
        header_str(&headers, "x-auth-key"),
    ) else {
        return Err(StatusCode::UNAUTHORIZED.into_response());
    };
    if state.inner.users.get(user).map(String::as_str) != Some(key) {
        info!(user, "rejected credentials");
        return Err(StatusCode::UNAUTHORIZED.into_response());
    }

    let account = format!("AUTH_{user}");
    let token = format!("AUTH_tk{}", Uuid::new_v4().simple());
    state.tokens().insert(token.clone(), account.clone());
    state
        .inner
        .accounts
        .write()
        .await
        .entry(account.clone())
        .or_default();

    let host = header_str(&headers, "host").unwrap_or("localhost");
    let mut reply = vec![
        ("X-Auth-Token".to_string(), token.clone()),
        ("X-Storage-Token".to_string(), token),
        ("X-Storage-Url".to_string(), format!("http://{host}/v1/{account}")),
    ];
    if state.inner.cdn {
        reply.push((
            "X-CDN-Management-Url".to_string(),
            format!("http://{host}/cdn/v1/{account}"),
        ));
    }
    info!(user, "issued token");
    Ok(respond(StatusCode::NO_CONTENT, reply, Body::empty()))
}

// --- account ---

async fn head_account(
    State(state): State<MockState>,
    Path(account): Path<String>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Storage, &headers, &account)?;
    let accounts = state.inner.accounts.read().await;
    let stored = accounts.get(&account).ok_or_else(not_found)?;

    let bytes: u64 = stored.containers.values().map(StoredContainer::bytes_used).sum();
    let mut reply = vec![
        (
            "X-Account-Container-Count".to_string(),
            stored.containers.len().to_string(),
        ),
        ("X-Account-Bytes-Used".to_string(), bytes.to_string()),
    ];
    reply.extend(stored.metadata.clone());
    Ok(respond(StatusCode::NO_CONTENT, reply, Body::empty()))
}

async fn post_account(
    State(state): State<MockState>,
    Path(account): Path<String>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Storage, &headers, &account)?;
    let mut accounts = state.inner.accounts.write().await;
    let stored = accounts.get_mut(&account).ok_or_else(not_found)?;
    apply_metadata(&mut stored.metadata, &headers, |name| name.starts_with(ACCOUNT_META));
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_containers(
    State(state): State<MockState>,
    Path(account): Path<String>,
    Query(query): Query<ListingQuery>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Storage, &headers, &account)?;
    let accounts = state.inner.accounts.read().await;
    let stored = accounts.get(&account).ok_or_else(not_found)?;

    let items = stored
        .containers
        .iter()
        .map(|(name, container)| (name.clone(), container));
    let entries: Vec<ContainerEntry> = listing::select(&query, items)
        .into_iter()
        .filter_map(|listed| match listed {
            Listed::Item(name, container) => Some(ContainerEntry {
                name,
                count: container.objects.len() as u64,
                bytes: container.bytes_used(),
            }),
            Listed::Subdir(_) => None,
        })
        .collect();

    let rendered = listing::render_containers(query.format(), &account, &entries).map_err(internal)?;
    Ok(listing_reply(entries.is_empty(), rendered))
}

// --- container ---

async fn put_container(
    State(state): State<MockState>,
    Path((account, container)): Path<(String, String)>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Storage, &headers, &account)?;
    let mut accounts = state.inner.accounts.write().await;
    let stored = accounts.get_mut(&account).ok_or_else(not_found)?;

    let status = if stored.containers.contains_key(&container) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CREATED
    };
    let target = stored.containers.entry(container).or_default();
    apply_metadata(&mut target.metadata, &headers, container_header);
    Ok(status.into_response())
}

async fn head_container(
    State(state): State<MockState>,
    Path((account, container)): Path<(String, String)>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Storage, &headers, &account)?;
    let accounts = state.inner.accounts.read().await;
    let stored = accounts
        .get(&account)
        .and_then(|a| a.containers.get(&container))
        .ok_or_else(not_found)?;

    let mut reply = vec![
        (
            "X-Container-Object-Count".to_string(),
            stored.objects.len().to_string(),
        ),
        (
            "X-Container-Bytes-Used".to_string(),
            stored.bytes_used().to_string(),
        ),
    ];
    reply.extend(stored.metadata.clone());
    Ok(respond(StatusCode::NO_CONTENT, reply, Body::empty()))
}

async fn post_container(
    State(state): State<MockState>,
    Path((account, container)): Path<(String, String)>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Storage, &headers, &account)?;
    let mut accounts = state.inner.accounts.write().await;
    let stored = accounts
        .get_mut(&account)
        .and_then(|a| a.containers.get_mut(&container))
        .ok_or_else(not_found)?;
    apply_metadata(&mut stored.metadata, &headers, container_header);
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn delete_container(
    State(state): State<MockState>,
    Path((account, container)): Path<(String, String)>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Storage, &headers, &account)?;
    let mut accounts = state.inner.accounts.write().await;
    let stored = accounts.get_mut(&account).ok_or_else(not_found)?;
    match stored.containers.get(&container) {
        None => Err(not_found()),
        Some(c) if !c.objects.is_empty() => Err(StatusCode::CONFLICT.into_response()),
        Some(_) => {
            stored.containers.remove(&container);
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

async fn list_objects(
    State(state): State<MockState>,
    Path((account, container)): Path<(String, String)>,
    Query(query): Query<ListingQuery>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Storage, &headers, &account)?;
    let accounts = state.inner.accounts.read().await;
    let stored = accounts
        .get(&account)
        .and_then(|a| a.containers.get(&container))
        .ok_or_else(not_found)?;

    let items = stored.objects.iter().map(|(name, object)| (name.clone(), object));
    let entries: Vec<ObjectEntry> = listing::select(&query, items)
        .into_iter()
        .map(|listed| match listed {
            Listed::Subdir(subdir) => ObjectEntry::Subdir { subdir },
            Listed::Item(name, object) => ObjectEntry::Object {
                name,
                hash: object.etag.clone(),
                bytes: object.data.len() as u64,
                content_type: object.content_type.clone(),
                last_modified: listing::listing_timestamp(object.modified),
            },
        })
        .collect();

    let rendered = listing::render_objects(query.format(), &container, &entries).map_err(internal)?;
    Ok(listing_reply(entries.is_empty(), rendered))
}

// --- object ---

async fn get_object(
    State(state): State<MockState>,
    Path((account, container, object)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Storage, &headers, &account)?;
    let accounts = state.inner.accounts.read().await;
    let stored_account = accounts.get(&account).ok_or_else(not_found)?;
    let stored = stored_account
        .containers
        .get(&container)
        .and_then(|c| c.objects.get(&object))
        .ok_or_else(not_found)?;

    let data = match &stored.manifest {
        Some(manifest) => assemble(stored_account, manifest),
        None => stored.data.clone(),
    };
    let mut reply = stored.headers();

    let Some(range) = header_str(&headers, "range") else {
        return Ok(respond(StatusCode::OK, reply, data));
    };
    let total = data.len() as u64;
    match parse_range(range, total) {
        Some((start, end)) => {
            reply.push((
                "Content-Range".to_string(),
                format!("bytes {start}-{end}/{total}"),
            ));
            let part = data.slice(start as usize..=end as usize);
            Ok(respond(StatusCode::PARTIAL_CONTENT, reply, part))
        }
        None => {
            reply.push(("Content-Range".to_string(), format!("bytes */{total}")));
            Err(respond(StatusCode::RANGE_NOT_SATISFIABLE, reply, Body::empty()))
        }
    }
}

async fn put_object(
    State(state): State<MockState>,
    Path((account, container, object)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    state.authorize(Surface::Storage, &headers, &account)?;
    let mut accounts = state.inner.accounts.write().await;
    let stored_account = accounts.get_mut(&account).ok_or_else(not_found)?;
    let target = stored_account
        .containers
        .get_mut(&container)
        .ok_or_else(not_found)?;

    let stored = StoredObject {
        etag: etag_of(&body),
        content_type: header_str(&headers, "content-type")
            .unwrap_or("application/octet-stream")
            .to_string(),
        modified: SystemTime::now(),
        metadata: collect_prefixed(&headers, OBJECT_META),
        manifest: header_str(&headers, "x-object-manifest").map(str::to_string),
        disposition: header_str(&headers, "content-disposition").map(str::to_string),
        data: body,
    };
    let etag = stored.etag.clone();
    let location = target.metadata.get(VERSIONS_LOCATION).cloned();
    let previous = target.objects.insert(object.clone(), stored);

    if let (Some(location), Some(previous)) = (location, previous) {
        if let Some(archive) = stored_account.containers.get_mut(&location) {
            let version = listing::listing_timestamp(previous.modified);
            archive
                .objects
                .insert(format!("{:03x}{object}/{version}", object.len()), previous);
        }
    }
    Ok(respond(StatusCode::CREATED, [("ETag".to_string(), etag)], Body::empty()))
}

async fn post_object(
    State(state): State<MockState>,
    Path((account, container, object)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Storage, &headers, &account)?;
    let mut accounts = state.inner.accounts.write().await;
    let stored = accounts
        .get_mut(&account)
        .and_then(|a| a.containers.get_mut(&container))
        .and_then(|c| c.objects.get_mut(&object))
        .ok_or_else(not_found)?;

    // POST replaces the whole metadata set
    stored.metadata = collect_prefixed(&headers, OBJECT_META);
    if let Some(content_type) = header_str(&headers, "content-type") {
        stored.content_type = content_type.to_string();
    }
    if let Some(disposition) = header_str(&headers, "content-disposition") {
        stored.disposition = Some(disposition.to_string());
    }
    Ok(StatusCode::ACCEPTED.into_response())
}

async fn delete_object(
    State(state): State<MockState>,
    Path((account, container, object)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Storage, &headers, &account)?;
    let mut accounts = state.inner.accounts.write().await;
    accounts
        .get_mut(&account)
        .and_then(|a| a.containers.get_mut(&container))
        .and_then(|c| c.objects.remove(&object))
        .ok_or_else(not_found)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// --- cdn ---

async fn cdn_list(
    State(state): State<MockState>,
    Path(account): Path<String>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Cdn, &headers, &account)?;
    let accounts = state.inner.accounts.read().await;
    let stored = accounts.get(&account).ok_or_else(not_found)?;

    let mut body = String::new();
    for (name, _) in stored.cdn.iter().filter(|(_, entry)| entry.enabled) {
        body.push_str(name);
        body.push('\n');
    }
    let status = if body.is_empty() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::OK
    };
    Ok(respond(
        status,
        [("Content-Type".to_string(), "text/plain; charset=utf-8".to_string())],
        body,
    ))
}

async fn cdn_head(
    State(state): State<MockState>,
    Path((account, container)): Path<(String, String)>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Cdn, &headers, &account)?;
    let accounts = state.inner.accounts.read().await;
    let entry = accounts
        .get(&account)
        .and_then(|a| a.cdn.get(&container))
        .ok_or_else(not_found)?;
    Ok(respond(
        StatusCode::NO_CONTENT,
        cdn_headers(&account, &container, entry),
        Body::empty(),
    ))
}

async fn cdn_put(
    State(state): State<MockState>,
    Path((account, container)): Path<(String, String)>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Cdn, &headers, &account)?;
    let mut accounts = state.inner.accounts.write().await;
    let stored = accounts.get_mut(&account).ok_or_else(not_found)?;

    let status = if stored.cdn.contains_key(&container) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CREATED
    };
    let entry = stored
        .cdn
        .entry(container.clone())
        .or_insert_with(|| CdnEntry {
            enabled: true,
            ttl: DEFAULT_TTL,
            log_retention: false,
        });
    entry.enabled = true;
    update_cdn_entry(entry, &headers);
    Ok(respond(status, cdn_headers(&account, &container, entry), Body::empty()))
}

async fn cdn_post(
    State(state): State<MockState>,
    Path((account, container)): Path<(String, String)>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Cdn, &headers, &account)?;
    let mut accounts = state.inner.accounts.write().await;
    let entry = accounts
        .get_mut(&account)
        .and_then(|a| a.cdn.get_mut(&container))
        .ok_or_else(not_found)?;
    update_cdn_entry(entry, &headers);
    Ok(respond(
        StatusCode::ACCEPTED,
        cdn_headers(&account, &container, entry),
        Body::empty(),
    ))
}

async fn cdn_purge(
    State(state): State<MockState>,
    Path((account, container)): Path<(String, String)>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Cdn, &headers, &account)?;
    purge(&state, &account, &container, &headers).await
}

async fn cdn_purge_object(
    State(state): State<MockState>,
    Path((account, container, _object)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Reply {
    state.authorize(Surface::Cdn, &headers, &account)?;
    purge(&state, &account, &container, &headers).await
}

async fn purge(state: &MockState, account: &str, container: &str, headers: &HeaderMap) -> Reply {
    let accounts = state.inner.accounts.read().await;
    accounts
        .get(account)
        .and_then(|a| a.cdn.get(container))
        .filter(|entry| entry.enabled)
        .ok_or_else(not_found)?;
    debug!(
        container,
        email = header_str(headers, "x-purge-email").unwrap_or_default(),
        "purge requested"
    );
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn update_cdn_entry(entry: &mut CdnEntry, headers: &HeaderMap) {
    if let Some(ttl) = header_str(headers, "x-ttl").and_then(|v| v.parse().ok()) {
        entry.ttl = ttl;
    }
    if let Some(enabled) = header_str(headers, "x-cdn-enabled") {
        entry.enabled = enabled.eq_ignore_ascii_case("true");
    }
    if let Some(retention) = header_str(headers, "x-log-retention") {
        entry.log_retention = retention.eq_ignore_ascii_case("true");
    }
}

fn cdn_headers(account: &str, container: &str, entry: &CdnEntry) -> Vec<(String, String)> {
    let host = etag_of(format!("{account}/{container}").as_bytes());
    let flag = |on: bool| if on { "True" } else { "False" }.to_string();
    vec![
        ("X-CDN-Enabled".to_string(), flag(entry.enabled)),
        ("X-CDN-URI".to_string(), format!("http://{host}.cdn.mock.invalid")),
        ("X-CDN-SSL-URI".to_string(), format!("https://{host}.ssl.cdn.mock.invalid")),
        (
            "X-CDN-Streaming-URI".to_string(),
            format!("http://{host}.stream.cdn.mock.invalid"),
        ),
        ("X-TTL".to_string(), entry.ttl.to_string()),
        ("X-Log-Retention".to_string(), flag(entry.log_retention)),
    ]
}

// --- helpers ---

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn collect_prefixed(headers: &HeaderMap, prefix: &str) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with(prefix))
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect()
}

/// Merge headers selected by `keep` into `target`; empty values remove.
fn apply_metadata(target: &mut BTreeMap<String, String>, headers: &HeaderMap, keep: impl Fn(&str) -> bool) {
    for (name, value) in headers {
        if !keep(name.as_str()) {
            continue;
        }
        match value.to_str() {
            Ok("") => {
                target.remove(name.as_str());
            }
            Ok(value) => {
                target.insert(name.to_string(), value.to_string());
            }
            Err(_) => {}
        }
    }
}

fn container_header(name: &str) -> bool {
    name.starts_with(CONTAINER_META) || name == VERSIONS_LOCATION
}

/// Concatenate the segments named by a `container/prefix` manifest.
fn assemble(account: &Account, manifest: &str) -> Bytes {
    let (container, prefix) = manifest.split_once('/').unwrap_or((manifest, ""));
    let mut data = Vec::new();
    if let Some(segments) = account.containers.get(container) {
        for (_, segment) in segments
            .objects
            .iter()
            .filter(|(name, segment)| name.starts_with(prefix) && segment.manifest.is_none())
        {
            data.extend_from_slice(&segment.data);
        }
    }
    Bytes::from(data)
}

/// Single `bytes=` range against a body of `total` bytes, as an inclusive
/// `(start, end)` pair. `None` when unsatisfiable.
fn parse_range(spec: &str, total: u64) -> Option<(u64, u64)> {
    let spec = spec.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    if total == 0 {
        return None;
    }
    let (start, end) = match (start.trim(), end.trim()) {
        ("", suffix) => {
            let len: u64 = suffix.parse().ok()?;
            if len == 0 {
                return None;
            }
            (total.saturating_sub(len), total - 1)
        }
        (start, "") => (start.parse().ok()?, total - 1),
        (start, end) => (start.parse().ok()?, end.parse::<u64>().ok()?.min(total - 1)),
    };
    (start <= end && start < total).then_some((start, end))
}

// hex MD5 of the stored bytes, as the real service reports it
fn etag_of(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn listing_reply(empty: bool, rendered: listing::Rendered) -> Response {
    // empty plain listings are 204 like the real service
    let status = if empty && rendered.content_type.starts_with("text/plain") {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::OK
    };
    respond(
        status,
        [("Content-Type".to_string(), rendered.content_type.to_string())],
        rendered.body,
    )
}

fn respond(
    status: StatusCode,
    headers: impl IntoIterator<Item = (String, String)>,
    body: impl Into<Body>,
) -> Response {
    let mut response = (status, body.into()).into_response();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            response.headers_mut().append(name, value);
        }
    }
    response
}

fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

fn internal(err: listing::RenderError) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}
