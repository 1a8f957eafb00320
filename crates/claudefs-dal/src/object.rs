//! Pass-through object-store driver.
//!
//! Every operation forwards to an [`ObjectStore`], the byte-stream
//! primitive that already handles I/O and URL bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::ConfigOption;
use crate::context::{default_destroy, DalContext};
use crate::dal::Dal;
use crate::error::{DalError, DalResult};
use crate::handle::{FileHandle, ObjectLocation, ObjectStream, OpenParams, StreamFlags};

/// Byte-stream primitives of an object store.
pub trait ObjectStore: Send + Sync {
    /// Prepares a fresh stream for `loc`.
    fn init(&self, os: &mut ObjectStream, loc: &ObjectLocation) -> DalResult<()>;

    /// Opens the stream for reading or writing.
    fn open(&self, os: &mut ObjectStream, params: OpenParams) -> DalResult<()>;

    /// Appends data to a stream opened for writing.
    fn put(&self, os: &mut ObjectStream, buf: &[u8]) -> DalResult<usize>;

    /// Reads from a stream opened for reading; 0 at end of data.
    fn get(&self, os: &mut ObjectStream, buf: &mut [u8]) -> DalResult<usize>;

    /// Completes the transfer; the stream accepts no further I/O.
    fn sync(&self, os: &mut ObjectStream) -> DalResult<()>;

    /// Abandons the transfer.
    fn abort(&self, os: &mut ObjectStream) -> DalResult<()>;

    /// Closes the stream.
    fn close(&self, os: &mut ObjectStream) -> DalResult<()>;

    /// Deletes the object addressed by its components.
    fn delete_components(
        &self,
        os: &mut ObjectStream,
        host: &str,
        bucket: &str,
        objid: &str,
    ) -> DalResult<()>;

    /// Points the stream at the current location of the object.
    fn update_url(&self, os: &mut ObjectStream, loc: &ObjectLocation) -> DalResult<()>;
}

fn object_url(host: &str, bucket: &str, objid: &str) -> String {
    format!("http://{}/{}/{}", host, bucket, objid)
}

#[derive(Default)]
struct MemState {
    objects: HashMap<String, Vec<u8>>,
    // keyed by stream handle, so streams on one object stay independent
    pending: HashMap<u64, Vec<u8>>,
    cursors: HashMap<u64, usize>,
    next_handle: u64,
}

impl MemState {
    fn release(&mut self, os: &mut ObjectStream) {
        self.pending.remove(&os.handle);
        self.cursors.remove(&os.handle);
        os.handle = 0;
    }

    fn commit(&mut self, os: &mut ObjectStream) {
        if let Some(data) = self.pending.remove(&os.handle) {
            self.objects.insert(os.url.clone(), data);
        }
        self.release(os);
    }
}

/// In-memory object store keyed by URL.
///
/// Every open gets its own stream handle: concurrent readers keep their
/// own offsets and concurrent writers their own buffers, and the last
/// writer to commit wins.
#[derive(Default)]
pub struct MemObjectStore {
    state: Mutex<MemState>,
}

impl MemObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the committed object at `url`.
    pub fn object(&self, url: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(url).cloned()
    }

    /// Number of committed objects.
    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Number of streams holding a handle.
    pub fn open_streams(&self) -> usize {
        let state = self.state.lock();
        state.pending.len() + state.cursors.len()
    }
}

impl ObjectStore for MemObjectStore {
    fn init(&self, os: &mut ObjectStream, loc: &ObjectLocation) -> DalResult<()> {
        *os = ObjectStream::default();
        os.url = object_url(&loc.host, &loc.bucket, &loc.objid);
        Ok(())
    }

    fn open(&self, os: &mut ObjectStream, params: OpenParams) -> DalResult<()> {
        os.cleanup_for_reopen(params.preserve_write_count);
        let mut state = self.state.lock();
        // a handle left over from an earlier open of this stream is dropped
        state.release(os);
        let offset = params.chunk_offset as usize;
        if !params.is_put && !state.objects.contains_key(&os.url) {
            return Err(DalError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no object at {}", os.url),
            )));
        }

        state.next_handle += 1;
        let handle = state.next_handle;
        if params.is_put {
            let mut data = state.objects.get(&os.url).cloned().unwrap_or_default();
            data.truncate(offset);
            state.pending.insert(handle, data);
            os.flags |= StreamFlags::WRITING;
        } else {
            state.cursors.insert(handle, offset);
            os.flags |= StreamFlags::READING;
        }
        os.handle = handle;
        os.flags |= StreamFlags::OPEN;
        debug!("mem store opened {} as stream {} (put={})", os.url, handle, params.is_put);
        Ok(())
    }

    fn put(&self, os: &mut ObjectStream, buf: &[u8]) -> DalResult<usize> {
        if !os.is_open() || !os.flags.contains(StreamFlags::WRITING) {
            return Err(DalError::NotOpen { url: os.url.clone() });
        }
        let mut state = self.state.lock();
        let pending = state
            .pending
            .get_mut(&os.handle)
            .ok_or_else(|| DalError::NotOpen { url: os.url.clone() })?;
        pending.extend_from_slice(buf);
        os.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn get(&self, os: &mut ObjectStream, buf: &mut [u8]) -> DalResult<usize> {
        if !os.is_open() || !os.flags.contains(StreamFlags::READING) {
            return Err(DalError::NotOpen { url: os.url.clone() });
        }
        let mut state = self.state.lock();
        let MemState {
            objects, cursors, ..
        } = &mut *state;
        let data = objects
            .get(&os.url)
            .ok_or_else(|| DalError::NotOpen { url: os.url.clone() })?;
        let cursor = cursors
            .get_mut(&os.handle)
            .ok_or_else(|| DalError::NotOpen { url: os.url.clone() })?;
        let start = (*cursor).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        *cursor = start + n;
        if n == 0 {
            os.flags |= StreamFlags::EOF;
        }
        os.written += n as u64;
        Ok(n)
    }

    fn sync(&self, os: &mut ObjectStream) -> DalResult<()> {
        if !os.is_open() {
            return Err(DalError::NotOpen { url: os.url.clone() });
        }
        self.state.lock().commit(os);
        os.mark_closed();
        Ok(())
    }

    fn abort(&self, os: &mut ObjectStream) -> DalResult<()> {
        if !os.is_open() {
            return Err(DalError::NotOpen { url: os.url.clone() });
        }
        self.state.lock().pending.remove(&os.handle);
        os.flags |= StreamFlags::ABORT;
        Ok(())
    }

    fn close(&self, os: &mut ObjectStream) -> DalResult<()> {
        if !os.is_open() {
            return Ok(());
        }
        let mut state = self.state.lock();
        if os.flags.contains(StreamFlags::ABORT) {
            state.release(os);
        } else {
            state.commit(os);
        }
        os.mark_closed();
        Ok(())
    }

    fn delete_components(
        &self,
        _os: &mut ObjectStream,
        host: &str,
        bucket: &str,
        objid: &str,
    ) -> DalResult<()> {
        let url = object_url(host, bucket, objid);
        match self.state.lock().objects.remove(&url) {
            Some(_) => Ok(()),
            None => Err(DalError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no object at {}", url),
            ))),
        }
    }

    fn update_url(&self, os: &mut ObjectStream, loc: &ObjectLocation) -> DalResult<()> {
        os.url = object_url(&loc.host, &loc.bucket, &loc.objid);
        Ok(())
    }
}

/// Driver that forwards every operation to an [`ObjectStore`].
pub struct ObjectDal {
    name: String,
    store: Arc<dyn ObjectStore>,
}

impl ObjectDal {
    /// Configures the driver. It takes no options.
    pub fn configure(
        name: &str,
        opts: &[ConfigOption],
        store: Arc<dyn ObjectStore>,
    ) -> DalResult<Self> {
        reject_options(name, opts)?;
        Ok(Self {
            name: name.to_string(),
            store,
        })
    }
}

/// Fails on the first option, for drivers that take none.
pub(crate) fn reject_options(name: &str, opts: &[ConfigOption]) -> DalResult<()> {
    match opts.first() {
        Some(opt) => Err(DalError::UnknownOption {
            dal: name.to_string(),
            key: opt.key.clone(),
        }),
        None => Ok(()),
    }
}

impl Dal for ObjectDal {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, fh: &mut FileHandle) -> DalResult<DalContext> {
        let FileHandle { location, os } = fh;
        self.store.init(os, location)?;
        Ok(DalContext::empty())
    }

    fn destroy(&self, ctx: DalContext) -> DalResult<()> {
        default_destroy(ctx)
    }

    fn open(&self, _ctx: &mut DalContext, fh: &mut FileHandle, params: OpenParams) -> DalResult<()> {
        self.store.open(&mut fh.os, params)
    }

    fn put(&self, _ctx: &mut DalContext, fh: &mut FileHandle, buf: &[u8]) -> DalResult<usize> {
        self.store.put(&mut fh.os, buf)
    }

    fn get(&self, _ctx: &mut DalContext, fh: &mut FileHandle, buf: &mut [u8]) -> DalResult<usize> {
        self.store.get(&mut fh.os, buf)
    }

    fn sync(&self, _ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        self.store.sync(&mut fh.os)
    }

    fn abort(&self, _ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        self.store.abort(&mut fh.os)
    }

    fn close(&self, _ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        self.store.close(&mut fh.os)
    }

    fn delete(&self, _ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        let FileHandle { location, os } = fh;
        self.store
            .delete_components(os, &location.host, &location.bucket, &location.objid)
    }

    fn update_object_location(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        let FileHandle { location, os } = fh;
        self.store.update_url(os, location)?;
        ctx.set_location_computed();
        Ok(())
    }
}
