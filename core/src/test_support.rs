//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::Transport;

pub const AUTH_URL: &str = "https://auth.example.org/auth/v1.0";
pub const STORAGE_URL: &str = "https://storage.example.org/v1/AUTH_test";
pub const CDN_URL: &str = "https://cdn.example.org/v1/AUTH_test";

/// Replays queued results in order and records every request it receives.
/// An exhausted script answers with a transport error.
#[derive(Debug, Default)]
pub struct StubTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: HttpResponse) {
        self.script.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_status(&self, status: u16) {
        self.push_response(response(status, &[], b""));
    }

    pub fn push_error(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(TransportError::new(message)));
    }

    /// Queue a successful auth reply issuing `token`.
    pub fn push_auth(&self, token: &str, with_cdn: bool) {
        let mut headers = vec![("X-Auth-Token", token), ("X-Storage-Url", STORAGE_URL)];
        if with_cdn {
            headers.push(("X-CDN-Management-Url", CDN_URL));
        }
        self.push_response(response(204, &headers, b""));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests sent to the auth endpoint.
    pub fn auth_calls(&self) -> usize {
        self.requests()
            .iter()
            .filter(|req| req.url.starts_with("https://auth.example.org"))
            .count()
    }
}

impl Transport for StubTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new("script exhausted")))
    }
}

pub fn response(status: u16, headers: &[(&str, &str)], body: &[u8]) -> HttpResponse {
    HttpResponse {
        status,
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: body.to_vec(),
    }
}
