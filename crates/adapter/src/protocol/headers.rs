//! Ordered header list used on the response side and for multipart part heads.
//!
//! Unlike [`http::HeaderMap`], [`Headers`] keeps every `(name, value)` pair in
//! insertion order and transmits names exactly as they were given. Lookups
//! compare names case-insensitively.

use http::{HeaderName, HeaderValue};

use crate::protocol::SendError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, HeaderValue)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Vec::with_capacity(capacity) }
    }

    /// Appends a header, keeping any earlier header with the same name.
    ///
    /// The name must be a valid HTTP token and the value must be a valid
    /// header value, otherwise the header is rejected.
    pub fn append<N, V>(&mut self, name: N, value: V) -> Result<(), SendError>
    where
        N: Into<String>,
        V: TryInto<HeaderValue>,
    {
        let name = name.into();
        HeaderName::from_bytes(name.as_bytes()).map_err(|_| SendError::invalid_header(format!("invalid header name {name:?}")))?;
        let value = value.try_into().map_err(|_| SendError::invalid_header(format!("invalid value for header {name:?}")))?;
        self.entries.push((name, value));
        Ok(())
    }

    /// Builder flavour of [`Headers::append`].
    pub fn with<N, V>(mut self, name: N, value: V) -> Result<Self, SendError>
    where
        N: Into<String>,
        V: TryInto<HeaderValue>,
    {
        self.append(name, value)?;
        Ok(self)
    }

    pub(crate) fn push_unchecked(&mut self, name: String, value: HeaderValue) {
        self.entries.push((name, value));
    }

    /// First value whose name matches `name` ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v)
    }

    /// Every value whose name matches `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HeaderValue> + 'a {
        self.entries.iter().filter(move |(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Sets `name` to `value`: the first matching entry is overwritten in place
    /// and later duplicates removed; without a match the header is appended.
    pub(crate) fn set(&mut self, name: &str, value: HeaderValue) {
        let mut replaced = false;
        self.entries.retain_mut(|(n, v)| {
            if !n.eq_ignore_ascii_case(name) {
                return true;
            }
            if replaced {
                return false;
            }
            *v = value.clone();
            replaced = true;
            true
        });

        if !replaced {
            self.entries.push((name.to_owned(), value));
        }
    }

    pub(crate) fn remove(&mut self, name: &str) {
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
