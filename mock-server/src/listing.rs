//! Listing selection (marker, prefix, delimiter, limit) and rendering in the
//! three listing formats.

use std::io::Cursor;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_LIMIT: usize = 10_000;

#[derive(Debug, Default, Deserialize)]
pub struct ListingQuery {
    pub format: Option<String>,
    pub limit: Option<usize>,
    pub marker: Option<String>,
    pub end_marker: Option<String>,
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Plain,
    Json,
    Xml,
}

impl ListingQuery {
    pub fn format(&self) -> Format {
        match self.format.as_deref() {
            Some("json") => Format::Json,
            Some("xml") => Format::Xml,
            _ => Format::Plain,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Listed<T> {
    Subdir(String),
    Item(String, T),
}

/// Apply the listing window to `items`, which must be sorted by name.
/// Names sharing `prefix` up to the next `delimiter` collapse into one
/// `Subdir` entry.
pub fn select<T>(query: &ListingQuery, items: impl IntoIterator<Item = (String, T)>) -> Vec<Listed<T>> {
    let limit = query.limit.unwrap_or(MAX_LIMIT).min(MAX_LIMIT);
    let prefix = query.prefix.as_deref().unwrap_or("");
    let delimiter = query.delimiter.as_deref().filter(|d| !d.is_empty());

    let mut out = Vec::new();
    for (name, item) in items {
        if out.len() >= limit {
            break;
        }
        if query.marker.as_deref().is_some_and(|m| name.as_str() <= m) {
            continue;
        }
        if query.end_marker.as_deref().is_some_and(|m| name.as_str() >= m) {
            break;
        }
        if !name.starts_with(prefix) {
            continue;
        }
        if let Some(delimiter) = delimiter {
            if let Some(pos) = name[prefix.len()..].find(delimiter) {
                let subdir = name[..prefix.len() + pos + delimiter.len()].to_string();
                if !matches!(out.last(), Some(Listed::Subdir(last)) if *last == subdir) {
                    out.push(Listed::Subdir(subdir));
                }
                continue;
            }
        }
        out.push(Listed::Item(name, item));
    }
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerEntry {
    pub name: String,
    pub count: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ObjectEntry {
    Subdir {
        subdir: String,
    },
    Object {
        name: String,
        hash: String,
        bytes: u64,
        content_type: String,
        last_modified: String,
    },
}

impl ObjectEntry {
    fn name(&self) -> &str {
        match self {
            ObjectEntry::Subdir { subdir } => subdir,
            ObjectEntry::Object { name, .. } => name,
        }
    }
}

pub struct Rendered {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("json listing: {0}")]
    Json(#[from] serde_json::Error),
    #[error("xml listing: {0}")]
    Xml(#[from] quick_xml::Error),
}

/// `2024-05-01T10:00:00.000000`, the timestamp layout of JSON listings.
pub fn listing_timestamp(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

pub fn render_containers(
    format: Format,
    account: &str,
    entries: &[ContainerEntry],
) -> Result<Rendered, RenderError> {
    Ok(match format {
        Format::Plain => plain(entries.iter().map(|e| e.name.as_str())),
        Format::Json => json(entries)?,
        Format::Xml => {
            let mut writer = xml_open("account", account)?;
            for entry in entries {
                write_group(
                    &mut writer,
                    BytesStart::new("container"),
                    &[
                        ("name", entry.name.as_str()),
                        ("count", entry.count.to_string().as_str()),
                        ("bytes", entry.bytes.to_string().as_str()),
                    ],
                )?;
            }
            xml_close(writer, "account")?
        }
    })
}

pub fn render_objects(
    format: Format,
    container: &str,
    entries: &[ObjectEntry],
) -> Result<Rendered, RenderError> {
    Ok(match format {
        Format::Plain => plain(entries.iter().map(ObjectEntry::name)),
        Format::Json => json(entries)?,
        Format::Xml => {
            let mut writer = xml_open("container", container)?;
            for entry in entries {
                match entry {
                    ObjectEntry::Subdir { subdir } => write_group(
                        &mut writer,
                        BytesStart::new("subdir").with_attributes([("name", subdir.as_str())]),
                        &[("name", subdir.as_str())],
                    )?,
                    ObjectEntry::Object {
                        name,
                        hash,
                        bytes,
                        content_type,
                        last_modified,
                    } => write_group(
                        &mut writer,
                        BytesStart::new("object"),
                        &[
                            ("name", name.as_str()),
                            ("hash", hash.as_str()),
                            ("bytes", bytes.to_string().as_str()),
                            ("content_type", content_type.as_str()),
                            ("last_modified", last_modified.as_str()),
                        ],
                    )?,
                }
            }
            xml_close(writer, "container")?
        }
    })
}

fn plain<'a>(names: impl Iterator<Item = &'a str>) -> Rendered {
    let mut body = String::new();
    for name in names {
        body.push_str(name);
        body.push('\n');
    }
    Rendered {
        content_type: "text/plain; charset=utf-8",
        body: body.into_bytes(),
    }
}

fn json<T: Serialize + ?Sized>(entries: &T) -> Result<Rendered, serde_json::Error> {
    Ok(Rendered {
        content_type: "application/json; charset=utf-8",
        body: serde_json::to_vec(entries)?,
    })
}

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn xml_open(root: &str, name: &str) -> Result<XmlWriter, quick_xml::Error> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new(root).with_attributes([("name", name)])))?;
    Ok(writer)
}

fn xml_close(mut writer: XmlWriter, root: &str) -> Result<Rendered, quick_xml::Error> {
    writer.write_event(Event::End(BytesEnd::new(root)))?;
    Ok(Rendered {
        content_type: "application/xml; charset=utf-8",
        body: writer.into_inner().into_inner(),
    })
}

// <parent><tag>text</tag>...</parent>, text escaped by the writer
fn write_group(
    writer: &mut XmlWriter,
    parent: BytesStart<'_>,
    children: &[(&str, &str)],
) -> Result<(), quick_xml::Error> {
    let end = parent.to_end().into_owned();
    writer.write_event(Event::Start(parent))?;
    for (tag, text) in children {
        writer.write_event(Event::Start(BytesStart::new(*tag)))?;
        writer.write_event(Event::Text(BytesText::new(*text)))?;
        writer.write_event(Event::End(BytesEnd::new(*tag)))?;
    }
    writer.write_event(Event::End(end))?;
    Ok(())
}
