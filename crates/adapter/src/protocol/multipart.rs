//! Values exchanged while parsing a `multipart/*` request body.
//!
//! The parser hands every part head to a caller supplied classifier as
//! [`PartHeaders`], the classifier answers with a [`SegmentDecision`], and the
//! collected results are returned as [`Params`].

use std::collections::HashMap;
use std::collections::hash_map::{self, Entry};

use bytes::Bytes;
use tracing::debug;

use crate::protocol::Headers;

/// What to do with the body of one part.
#[derive(Debug)]
pub enum SegmentDecision<D> {
    /// Buffer the body in memory and bind it under the given name.
    Binary(String),
    /// Stream the body into the destination and bind an [`Upload`] under the name.
    File(String, D),
    /// Discard the body.
    Skip,
}

/// The header block of one part.
///
/// `name`, `filename` and `content_type` are lifted out of
/// `Content-Disposition` and `Content-Type`; all headers stay available in
/// their original order through [`PartHeaders::headers`].
#[derive(Debug, Clone, Default)]
pub struct PartHeaders {
    headers: Headers,
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

impl PartHeaders {
    pub fn new(headers: Headers) -> Self {
        // browsers send raw UTF-8 in quoted filenames
        let (name, filename) = headers
            .get("content-disposition")
            .map(|value| parse_content_disposition(&String::from_utf8_lossy(value.as_bytes())))
            .unwrap_or_default();

        let content_type = headers.get("content-type").map(|value| String::from_utf8_lossy(value.as_bytes()).trim().to_owned());

        Self { headers, name, filename, content_type }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// A part is a file upload when its disposition carries a filename.
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }
}

/// Extracts `name` and `filename` from a `Content-Disposition` value such as
/// `form-data; name="field"; filename="a.txt"`.
fn parse_content_disposition(value: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut filename = None;

    for param in split_params(value).into_iter().skip(1) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };

        let key = key.trim();
        if key.eq_ignore_ascii_case("name") {
            name = Some(unquote(raw));
        } else if key.eq_ignore_ascii_case("filename") {
            filename = Some(unquote(raw));
        }
    }

    (name, filename)
}

/// Splits on `;` outside of quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                params.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(value[start..].trim());
    params
}

fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    match raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => out.extend(chars.next()),
                    c => out.push(c),
                }
            }
            out
        }
        None => raw.to_owned(),
    }
}

/// A part that was streamed into a caller supplied destination.
#[derive(Debug)]
pub struct Upload<D> {
    filename: Option<String>,
    content_type: Option<String>,
    destination: D,
    size: u64,
}

impl<D> Upload<D> {
    pub(crate) fn new(filename: Option<String>, content_type: Option<String>, destination: D, size: u64) -> Self {
        Self { filename, content_type, destination, size }
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Number of body bytes written into the destination.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    /// Hands the destination back to the caller, who owns closing it.
    pub fn into_destination(self) -> D {
        self.destination
    }
}

/// One bound value of a parsed multipart body.
#[derive(Debug)]
pub enum Param<D> {
    Value(Bytes),
    File(Upload<D>),
    /// Values of a bracket-suffixed key (`tags[]`) in encounter order.
    List(Vec<Param<D>>),
}

impl<D> Param<D> {
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Param::Value(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_upload(&self) -> Option<&Upload<D>> {
        match self {
            Param::File(upload) => Some(upload),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Param<D>]> {
        match self {
            Param::List(list) => Some(list),
            _ => None,
        }
    }
}

/// Parameters collected from a multipart body, keyed by part name.
#[derive(Debug)]
pub struct Params<D> {
    inner: HashMap<String, Param<D>>,
}

impl<D> Default for Params<D> {
    fn default() -> Self {
        Self { inner: HashMap::new() }
    }
}

impl<D> Params<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` under `name`.
    ///
    /// A name ending in `[]` appends to the list stored under the name without
    /// the suffix. Any other name replaces an earlier binding.
    pub fn bind(&mut self, name: String, value: Param<D>) {
        if let Some(key) = name.strip_suffix("[]") {
            match self.inner.entry(key.to_owned()) {
                Entry::Occupied(mut entry) => match entry.get_mut() {
                    Param::List(list) => list.push(value),
                    other => {
                        debug!(name = key, "replace scalar param with list");
                        *other = Param::List(vec![value]);
                    }
                },
                Entry::Vacant(entry) => {
                    entry.insert(Param::List(vec![value]));
                }
            }
            return;
        }

        if self.inner.insert(name, value).is_some() {
            debug!("duplicate multipart param, last value wins");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Param<D>> {
        self.inner.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Param<D>> {
        self.inner.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Param<D>)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<D> IntoIterator for Params<D> {
    type Item = (String, Param<D>);
    type IntoIter = hash_map::IntoIter<String, Param<D>>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

/// Outcome of parsing a multipart body.
#[derive(Debug)]
pub enum Multipart<D> {
    /// The terminal boundary was reached.
    Parsed(Params<D>),
    /// More than `limit` bytes were read; the remaining body was left unread.
    TooLarge,
}

impl<D> Multipart<D> {
    pub fn is_too_large(&self) -> bool {
        matches!(self, Multipart::TooLarge)
    }

    pub fn into_params(self) -> Option<Params<D>> {
        match self {
            Multipart::Parsed(params) => Some(params),
            Multipart::TooLarge => None,
        }
    }
}
