//! Erasure engine over local block files.
//!
//! An object is striped into N data shards plus E Reed-Solomon parity
//! shards. Logical block `i` is stored at physical block
//! `(start_block + i) % (N + E)`. Each block file starts with a header
//! carrying the object length and a CRC32 of the shard payload, so
//! missing, truncated and corrupt blocks are all detected on read.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use reed_solomon_erasure::galois_8::ReedSolomon;
use tracing::{debug, error, warn};

use super::{BlockPathRenderer, EcHandle, EcMode, EcOpenRequest, ErasureEngine, IoKind};
use crate::error::{DalError, DalResult};

/// Length of the per-block header: object length (u64) + CRC32 (u32).
pub const BLOCK_HEADER_LEN: usize = 12;

/// Largest stripe whose error pattern fits a positive `i32`.
pub const MAX_STRIPE_BLOCKS: u32 = 31;

/// Engine storing each block as a local file.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileErasureEngine;

impl FileErasureEngine {
    /// Creates the engine.
    pub fn new() -> Self {
        Self
    }
}

fn shard_len(object_len: u64, n: u32) -> usize {
    (object_len.div_ceil(n as u64) as usize).max(1)
}

fn encode(data: &[u8], n: u32, e: u32) -> Result<Vec<Vec<u8>>, String> {
    let size = shard_len(data.len() as u64, n);
    let mut shards: Vec<Vec<u8>> = Vec::with_capacity((n + e) as usize);
    for i in 0..n as usize {
        let start = (i * size).min(data.len());
        let end = (start + size).min(data.len());
        let mut shard = data[start..end].to_vec();
        shard.resize(size, 0);
        shards.push(shard);
    }
    for _ in 0..e {
        shards.push(vec![0u8; size]);
    }
    if e > 0 {
        let rs = ReedSolomon::new(n as usize, e as usize)
            .map_err(|e| format!("failed to create Reed-Solomon codec: {}", e))?;
        rs.encode(&mut shards)
            .map_err(|e| format!("Reed-Solomon encoding failed: {}", e))?;
    }
    Ok(shards)
}

fn write_block(path: &str, object_len: u64, payload: &[u8]) -> io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    let mut header = [0u8; BLOCK_HEADER_LEN];
    header[..8].copy_from_slice(&object_len.to_le_bytes());
    header[8..].copy_from_slice(&crc32fast::hash(payload).to_le_bytes());
    file.write_all(&header)?;
    file.write_all(payload)?;
    file.sync_data()
}

fn read_block(path: &str) -> Result<(u64, Vec<u8>), String> {
    let mut raw = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut raw))
        .map_err(|e| e.to_string())?;
    if raw.len() < BLOCK_HEADER_LEN {
        return Err(format!("short block ({} bytes)", raw.len()));
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&raw[..8]);
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&raw[8..BLOCK_HEADER_LEN]);

    let payload = raw.split_off(BLOCK_HEADER_LEN);
    let expected = u32::from_le_bytes(crc_bytes);
    let actual = crc32fast::hash(&payload);
    if expected != actual {
        return Err(format!(
            "crc mismatch (expected {:08x}, got {:08x})",
            expected, actual
        ));
    }
    Ok((u64::from_le_bytes(len_bytes), payload))
}

/// Bookkeeping shared by read and write handles.
struct Stripe {
    req: EcOpenRequest,
    bad: u32,
}

impl Stripe {
    fn total(&self) -> u32 {
        self.req.num_blocks()
    }

    fn is_bad(&self, logical: u32) -> bool {
        self.bad & (1 << logical) != 0
    }

    fn mark_bad(&mut self, logical: u32, reason: &str) {
        if !self.is_bad(logical) {
            warn!(
                "block {} (physical {}) of {} is bad: {}",
                logical,
                self.req.physical_block(logical),
                self.req.template,
                reason
            );
            self.bad |= 1 << logical;
        }
    }

    fn too_many_bad(&self) -> bool {
        self.bad.count_ones() > self.req.e
    }

    fn block_path(&self, logical: u32) -> DalResult<String> {
        self.req
            .renderer
            .render(&self.req.template, self.req.physical_block(logical))
    }

    /// Runs the fault hook for `kind` on `logical`; a failure marks the
    /// block bad.
    fn hook(&mut self, kind: IoKind, logical: u32) -> bool {
        let Some(hook) = self.req.fault_hook.clone() else {
            return true;
        };
        match hook.before_block(kind, self.req.physical_block(logical)) {
            Ok(()) => true,
            Err(e) => {
                self.mark_bad(logical, &format!("{} failed: {}", kind, e));
                false
            }
        }
    }

    /// Runs the hook for `kind` on every block not yet bad.
    fn hook_all(&mut self, kind: IoKind) {
        for logical in 0..self.total() {
            if !self.is_bad(logical) {
                self.hook(kind, logical);
            }
        }
    }

    fn unrecoverable(&self, what: &str) -> DalError {
        DalError::Engine {
            path: self.req.template.clone(),
            reason: format!(
                "{}: {} of {} blocks bad, at most {} tolerated",
                what,
                self.bad.count_ones(),
                self.total(),
                self.req.e
            ),
        }
    }
}

struct WriteHandle {
    stripe: Stripe,
    buf: Vec<u8>,
}

impl WriteHandle {
    fn finish(&mut self) -> DalResult<i32> {
        let (n, e) = (self.stripe.req.n, self.stripe.req.e);
        let shards = encode(&self.buf, n, e).map_err(|reason| DalError::Engine {
            path: self.stripe.req.template.clone(),
            reason,
        })?;
        let object_len = self.buf.len() as u64;

        for (logical, shard) in (0u32..).zip(shards.iter()) {
            if self.stripe.is_bad(logical) || !self.stripe.hook(IoKind::Write, logical) {
                continue;
            }
            let path = self.stripe.block_path(logical)?;
            if let Err(e) = write_block(&path, object_len, shard) {
                self.stripe.mark_bad(logical, &e.to_string());
                continue;
            }
            self.stripe.hook(IoKind::Close, logical);
        }

        if self.stripe.too_many_bad() {
            return Err(self.stripe.unrecoverable("write"));
        }
        debug!(
            "wrote {} bytes to {} ({}+{}, pattern 0x{:x})",
            object_len, self.stripe.req.template, n, e, self.stripe.bad
        );
        Ok(self.stripe.bad as i32)
    }
}

impl EcHandle for WriteHandle {
    fn write(&mut self, buf: &[u8]) -> DalResult<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn read(&mut self, _buf: &mut [u8], _offset: u64) -> DalResult<usize> {
        Err(DalError::Engine {
            path: self.stripe.req.template.clone(),
            reason: "read on a stripe opened for writing".to_string(),
        })
    }

    fn close(mut self: Box<Self>) -> i32 {
        match self.finish() {
            Ok(pattern) => pattern,
            Err(e) => {
                error!("closing {} failed: {}", self.stripe.req.template, e);
                -e.errno()
            }
        }
    }
}

struct ReadHandle {
    stripe: Stripe,
    data: Vec<u8>,
}

impl ReadHandle {
    fn load(mut stripe: Stripe) -> DalResult<Self> {
        let total = stripe.total();
        let mut shards: Vec<Option<Vec<u8>>> = vec![None; total as usize];
        let mut object_len: Option<u64> = None;

        for logical in 0..total {
            if !stripe.hook(IoKind::Open, logical) {
                continue;
            }
            let path = stripe.block_path(logical)?;
            match read_block(&path) {
                Ok((len, payload)) => match object_len {
                    Some(known) if known != len => {
                        stripe.mark_bad(logical, &format!("length {} != {}", len, known));
                    }
                    _ => {
                        object_len = Some(len);
                        shards[logical as usize] = Some(payload);
                    }
                },
                Err(reason) => stripe.mark_bad(logical, &format!("{}: {}", path, reason)),
            }
        }

        let object_len = object_len.ok_or_else(|| stripe.unrecoverable("open"))?;
        let size = shard_len(object_len, stripe.req.n);
        for logical in 0..total {
            let wrong_size = shards[logical as usize]
                .as_ref()
                .is_some_and(|s| s.len() != size);
            if wrong_size {
                shards[logical as usize] = None;
                stripe.mark_bad(logical, "shard size mismatch");
            }
        }
        if stripe.too_many_bad() {
            return Err(stripe.unrecoverable("open"));
        }

        if stripe.bad != 0 {
            let rs = ReedSolomon::new(stripe.req.n as usize, stripe.req.e as usize).map_err(|e| {
                DalError::Engine {
                    path: stripe.req.template.clone(),
                    reason: format!("failed to create Reed-Solomon codec: {}", e),
                }
            })?;
            rs.reconstruct_data(&mut shards).map_err(|e| DalError::Engine {
                path: stripe.req.template.clone(),
                reason: format!("reconstruction failed: {}", e),
            })?;
            debug!(
                "reconstructed {} from pattern 0x{:x}",
                stripe.req.template, stripe.bad
            );
        }

        let mut data = Vec::with_capacity(size * stripe.req.n as usize);
        for shard in shards.iter().take(stripe.req.n as usize) {
            match shard {
                Some(s) => data.extend_from_slice(s),
                None => return Err(stripe.unrecoverable("decode")),
            }
        }
        data.truncate(object_len as usize);
        Ok(Self { stripe, data })
    }
}

impl EcHandle for ReadHandle {
    fn write(&mut self, _buf: &[u8]) -> DalResult<usize> {
        Err(DalError::Engine {
            path: self.stripe.req.template.clone(),
            reason: "write on a stripe opened for reading".to_string(),
        })
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> DalResult<usize> {
        self.stripe.hook_all(IoKind::Read);
        if self.stripe.too_many_bad() {
            return Err(self.stripe.unrecoverable("read"));
        }
        let start = (offset as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn close(mut self: Box<Self>) -> i32 {
        self.stripe.hook_all(IoKind::Close);
        self.stripe.bad as i32
    }
}

impl ErasureEngine for FileErasureEngine {
    fn open(&self, req: EcOpenRequest) -> DalResult<Box<dyn EcHandle>> {
        if req.n == 0 || req.num_blocks() > MAX_STRIPE_BLOCKS {
            return Err(DalError::Engine {
                path: req.template,
                reason: format!(
                    "unsupported stripe {}+{} (1..={} blocks, n > 0)",
                    req.n, req.e, MAX_STRIPE_BLOCKS
                ),
            });
        }
        debug!("opening {:?}", req);

        let mode = req.mode;
        let mut stripe = Stripe { req, bad: 0 };
        match mode {
            EcMode::Write => {
                stripe.hook_all(IoKind::Open);
                if stripe.too_many_bad() {
                    return Err(stripe.unrecoverable("open"));
                }
                Ok(Box::new(WriteHandle {
                    stripe,
                    buf: Vec::new(),
                }))
            }
            EcMode::Read => Ok(Box::new(ReadHandle::load(stripe)?)),
        }
    }

    fn delete(&self, template: &str, nblocks: u32, renderer: &dyn BlockPathRenderer) -> DalResult<()> {
        let mut removed = 0u32;
        for block in 0..nblocks {
            let path = renderer.render(template, block)?;
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("block file {} already gone", path);
                }
                Err(e) => {
                    error!("failed to remove {}: {}", path, e);
                    return Err(e.into());
                }
            }
        }
        if removed == 0 && nblocks > 0 {
            return Err(DalError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no block files found for {}", template),
            )));
        }
        debug!("deleted {} of {} blocks of {}", removed, nblocks, template);
        Ok(())
    }
}
