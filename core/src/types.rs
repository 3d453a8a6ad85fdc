//! Listing and account DTOs.
//!
//! # Design
//! These mirror the JSON the storage service returns for `format=json`
//! listings. Object listings requested with a `delimiter` interleave
//! pseudo-directory entries (`{"subdir": "..."}`) with regular records, so
//! they deserialize into [`ObjectEntry`].

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Listing response format, sent as the `format` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListingFormat {
    Json,
    Plain,
    Xml,
}

impl ListingFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingFormat::Json => "json",
            ListingFormat::Plain => "plain",
            ListingFormat::Xml => "xml",
        }
    }
}

/// Account-wide counters and metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub container_count: u64,
    pub bytes_used: u64,
    pub metadata: BTreeMap<String, String>,
}

/// One entry of a JSON container listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: String,
    pub count: u64,
    pub bytes: u64,
}

/// One object of a JSON object listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub name: String,
    pub hash: String,
    pub bytes: u64,
    pub content_type: String,
    pub last_modified: String,
}

/// An object listing entry: a stored object or a pseudo-directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectEntry {
    Subdir { subdir: String },
    Object(ObjectRecord),
}

impl ObjectEntry {
    pub fn name(&self) -> &str {
        match self {
            ObjectEntry::Subdir { subdir } => subdir,
            ObjectEntry::Object(record) => &record.name,
        }
    }
}

/// Split a `format=plain` listing into names.
pub fn plain_names(body: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(body)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a `format=json` listing. Empty listings come back as 204 with no
/// body, which yields no entries.
pub fn json_listing<T: DeserializeOwned>(body: &[u8]) -> Result<Vec<T>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(body)?)
}
