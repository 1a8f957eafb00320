//! Caller-side file handle and object stream state.
//!
//! A [`FileHandle`] is owned by whoever drives a stream (the FUSE layer,
//! a copy tool). Drivers read its [`ObjectLocation`] and update the
//! bookkeeping in its [`ObjectStream`].

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A storage repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    /// Repository name.
    pub name: String,
    /// Host field. For POSIX this is the root directory, for MC drivers
    /// it is the printf-style path format of the block files.
    pub host: String,
}

/// A namespace within a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace name.
    pub name: String,
}

/// Where an object lives, as resolved by the metadata layer.
#[derive(Debug, Clone)]
pub struct ObjectLocation {
    /// Repository holding the object.
    pub repo: Arc<Repo>,
    /// Namespace of the file.
    pub ns: Arc<Namespace>,
    /// Object-store host.
    pub host: String,
    /// Object-store bucket.
    pub bucket: String,
    /// Object identifier, may contain '/'.
    pub objid: String,
}

impl ObjectLocation {
    /// Creates a location for `objid` in the given repo and namespace.
    pub fn new(repo: Arc<Repo>, ns: Arc<Namespace>, objid: &str) -> Self {
        Self {
            host: repo.host.clone(),
            bucket: repo.name.clone(),
            repo,
            ns,
            objid: objid.to_string(),
        }
    }
}

/// Object stream status bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct StreamFlags(u32);

impl StreamFlags {
    /// No flags set.
    pub const EMPTY: StreamFlags = StreamFlags(0);
    /// Stream is open.
    pub const OPEN: StreamFlags = StreamFlags(1 << 0);
    /// Opened for reading.
    pub const READING: StreamFlags = StreamFlags(1 << 1);
    /// Opened for writing.
    pub const WRITING: StreamFlags = StreamFlags(1 << 2);
    /// End of data reached.
    pub const EOF: StreamFlags = StreamFlags(1 << 3);
    /// Stream was aborted.
    pub const ABORT: StreamFlags = StreamFlags(1 << 4);
    /// Stream was closed.
    pub const CLOSED: StreamFlags = StreamFlags(1 << 5);
    /// An I/O error happened on the stream.
    pub const ERRORS: StreamFlags = StreamFlags(1 << 6);

    /// Raw bits.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Returns true if all bits of `other` are set.
    pub fn contains(&self, other: StreamFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: StreamFlags) {
        self.0 |= other.0;
    }

    /// Clears the bits of `other`.
    pub fn remove(&mut self, other: StreamFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for StreamFlags {
    type Output = StreamFlags;

    fn bitor(self, rhs: StreamFlags) -> StreamFlags {
        StreamFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for StreamFlags {
    fn bitor_assign(&mut self, rhs: StreamFlags) {
        self.0 |= rhs.0;
    }
}

/// Byte-stream bookkeeping shared by every driver.
#[derive(Debug, Clone, Default)]
pub struct ObjectStream {
    /// URL (or path) of the stream target, used in log messages.
    pub url: String,
    /// Bytes moved through the stream since open.
    pub written: u64,
    /// Status bits.
    pub flags: StreamFlags,
    /// Stream handle assigned by the byte-stream primitive on open, 0
    /// when none is held.
    pub handle: u64,
}

impl ObjectStream {
    /// Returns true if the stream is open.
    pub fn is_open(&self) -> bool {
        self.flags.contains(StreamFlags::OPEN)
    }

    /// Resets state left over from a previous open of the same handle.
    pub fn cleanup_for_reopen(&mut self, preserve_write_count: bool) {
        self.flags = StreamFlags::EMPTY;
        if !preserve_write_count {
            self.written = 0;
        }
    }

    /// Marks the stream closed.
    pub fn mark_closed(&mut self) {
        self.flags.remove(StreamFlags::OPEN);
        self.flags.insert(StreamFlags::CLOSED);
    }
}

/// Parameters of a DAL `open` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenParams {
    /// Open for writing (put) instead of reading (get).
    pub is_put: bool,
    /// Byte offset to start at.
    pub chunk_offset: u64,
    /// Expected content length, 0 when unknown.
    pub content_length: u64,
    /// Keep the written-byte counter across the reopen.
    pub preserve_write_count: bool,
    /// Timeout in seconds, enforced by the underlying primitives.
    pub timeout: u16,
}

impl OpenParams {
    /// Parameters for a fresh write from offset 0.
    pub fn write() -> Self {
        Self {
            is_put: true,
            ..Self::default()
        }
    }

    /// Parameters for a fresh read from offset 0.
    pub fn read() -> Self {
        Self::default()
    }

    /// Sets the starting offset.
    pub fn at_offset(mut self, offset: u64) -> Self {
        self.chunk_offset = offset;
        self
    }
}

/// The caller's handle for one open file.
#[derive(Debug, Clone)]
pub struct FileHandle {
    /// Resolved location of the object.
    pub location: ObjectLocation,
    /// Stream bookkeeping.
    pub os: ObjectStream,
}

impl FileHandle {
    /// Creates a handle for the given location with a fresh stream.
    pub fn new(location: ObjectLocation) -> Self {
        Self {
            location,
            os: ObjectStream::default(),
        }
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:{}",
            self.location.repo.name, self.location.ns.name, self.location.objid
        )
    }
}
