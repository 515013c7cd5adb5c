//! Body-side values exchanged through the transport contract.
//!
//! - [`BodyChunk`]: one bounded read of the request body
//! - [`FileRegion`]: the file (or part of it) a response body is read from

use std::path::{Path, PathBuf};

use bytes::Bytes;

/// Result of one bounded read of the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyChunk {
    /// Up to `limit` bytes that were not delivered before
    Data(Bytes),
    /// The body is exhausted; every later read returns `Done` again
    Done,
}

impl BodyChunk {
    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, BodyChunk::Done)
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            BodyChunk::Data(bytes) => Some(bytes),
            BodyChunk::Done => None,
        }
    }
}

/// A file used as response body: the whole file, or `length` bytes starting
/// at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRegion {
    path: PathBuf,
    offset: u64,
    length: Option<u64>,
}

impl FileRegion {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into(), offset: 0, length: None }
    }

    /// Restricts the region to `length` bytes starting at `offset`; `None`
    /// means up to the end of the file.
    pub fn range(mut self, offset: u64, length: Option<u64>) -> Self {
        self.offset = offset;
        self.length = length;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Number of bytes this region covers in a file of `file_len` bytes.
    pub(crate) fn resolve_len(&self, file_len: u64) -> Option<u64> {
        if self.offset > file_len {
            return None;
        }
        let available = file_len - self.offset;
        Some(self.length.map_or(available, |length| length.min(available)))
    }
}

impl From<PathBuf> for FileRegion {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<&Path> for FileRegion {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_region_len() {
        assert_eq!(FileRegion::new("a").resolve_len(10), Some(10));
        assert_eq!(FileRegion::new("a").range(4, None).resolve_len(10), Some(6));
        assert_eq!(FileRegion::new("a").range(4, Some(3)).resolve_len(10), Some(3));
        assert_eq!(FileRegion::new("a").range(4, Some(30)).resolve_len(10), Some(6));
        assert_eq!(FileRegion::new("a").range(10, None).resolve_len(10), Some(0));
        assert_eq!(FileRegion::new("a").range(11, None).resolve_len(10), None);
    }
}
