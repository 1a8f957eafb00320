//! Erasure-coding engine interface.
//!
//! The MC drivers hand an engine a path template, the stripe geometry
//! and a renderer that turns a block number into a block-file path. The
//! engine owns the byte-level work: striping, parity, reconstruction.
//! Closing a handle reports `0` for a clean stripe, a positive bitmask
//! of bad block positions for a degraded one, or a negative status when
//! the stripe could not be completed.

pub mod file_engine;
pub mod mock;

use std::fmt;
use std::sync::Arc;

use crate::error::DalResult;
use crate::template::{format_template, FmtArg};

pub use file_engine::FileErasureEngine;
pub use mock::{MockErasureEngine, MockEvent};

/// Direction of an engine handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcMode {
    /// Handle reads an existing stripe.
    Read,
    /// Handle writes a new stripe.
    Write,
}

/// Kind of I/O, used to select fault rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoKind {
    /// Opening a stream or block file.
    Open,
    /// Reading data.
    Read,
    /// Writing data.
    Write,
    /// Closing a stream or block file.
    Close,
}

impl IoKind {
    /// Parses the `func=` value of a fault rule.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(IoKind::Open),
            "read" => Some(IoKind::Read),
            "write" => Some(IoKind::Write),
            "close" => Some(IoKind::Close),
            _ => None,
        }
    }
}

impl fmt::Display for IoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IoKind::Open => "open",
            IoKind::Read => "read",
            IoKind::Write => "write",
            IoKind::Close => "close",
        };
        f.write_str(s)
    }
}

/// Renders the path of one block file from a path template.
pub trait BlockPathRenderer: Send + Sync {
    /// Path of physical block `block`.
    fn render(&self, template: &str, block: u32) -> DalResult<String>;
}

/// Renderer for local block files: the one remaining `%d` is the block.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixBlockRenderer;

impl BlockPathRenderer for PosixBlockRenderer {
    fn render(&self, template: &str, block: u32) -> DalResult<String> {
        format_template(template, &[FmtArg::Int(block as i64)])
    }
}

/// Consulted by an engine before each per-block operation.
pub trait BlockFaultHook: Send + Sync {
    /// Returns an error to fail the operation on `block`. May block the
    /// calling thread to simulate a slow server.
    fn before_block(&self, kind: IoKind, block: u32) -> DalResult<()>;
}

/// Everything an engine needs to open a stripe.
#[derive(Clone)]
pub struct EcOpenRequest {
    /// Path template with the block placeholders still unfilled.
    pub template: String,
    /// Read or write.
    pub mode: EcMode,
    /// Physical block holding logical block 0.
    pub start_block: u32,
    /// Data blocks.
    pub n: u32,
    /// Erasure blocks.
    pub e: u32,
    /// Block path renderer.
    pub renderer: Arc<dyn BlockPathRenderer>,
    /// Optional block-level fault injection.
    pub fault_hook: Option<Arc<dyn BlockFaultHook>>,
    /// Timeout in seconds, 0 for none.
    pub timeout: u16,
}

impl EcOpenRequest {
    /// Blocks in the stripe.
    pub fn num_blocks(&self) -> u32 {
        self.n.saturating_add(self.e)
    }

    /// Physical block number of logical block `logical`.
    pub fn physical_block(&self, logical: u32) -> u32 {
        let wrapped = (self.start_block as u64 + logical as u64) % self.num_blocks().max(1) as u64;
        wrapped as u32
    }
}

impl fmt::Debug for EcOpenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcOpenRequest")
            .field("template", &self.template)
            .field("mode", &self.mode)
            .field("start_block", &self.start_block)
            .field("n", &self.n)
            .field("e", &self.e)
            .field("fault_hook", &self.fault_hook.is_some())
            .finish()
    }
}

/// An open stripe.
pub trait EcHandle: Send {
    /// Appends `buf` to a stripe opened for writing.
    fn write(&mut self, buf: &[u8]) -> DalResult<usize>;

    /// Reads from byte `offset` of the object; 0 at end of data.
    fn read(&mut self, buf: &mut [u8], offset: u64) -> DalResult<usize>;

    /// Finishes the stripe. Returns 0 when clean, the bad-block bitmask
    /// when degraded, a negative status on failure.
    fn close(self: Box<Self>) -> i32;
}

/// An erasure-coding engine.
pub trait ErasureEngine: Send + Sync {
    /// Opens a stripe.
    fn open(&self, req: EcOpenRequest) -> DalResult<Box<dyn EcHandle>>;

    /// Removes all `nblocks` block files of the object at `template`.
    fn delete(&self, template: &str, nblocks: u32, renderer: &dyn BlockPathRenderer) -> DalResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posix_renderer_fills_block() {
        let path = PosixBlockRenderer
            .render("/zfs/pod1/block%d/cap0/scatter3/obj", 7)
            .unwrap();
        assert_eq!(path, "/zfs/pod1/block7/cap0/scatter3/obj");
    }

    #[test]
    fn test_physical_block_wraps() {
        let req = EcOpenRequest {
            template: String::new(),
            mode: EcMode::Write,
            start_block: 10,
            n: 10,
            e: 2,
            renderer: Arc::new(PosixBlockRenderer),
            fault_hook: None,
            timeout: 0,
        };
        assert_eq!(req.physical_block(0), 10);
        assert_eq!(req.physical_block(1), 11);
        assert_eq!(req.physical_block(2), 0);
        assert_eq!(req.physical_block(11), 9);
    }

    #[test]
    fn test_oversized_stripe_saturates() {
        let req = EcOpenRequest {
            template: String::new(),
            mode: EcMode::Read,
            start_block: u32::MAX - 1,
            n: u32::MAX,
            e: 4,
            renderer: Arc::new(PosixBlockRenderer),
            fault_hook: None,
            timeout: 0,
        };
        assert_eq!(req.num_blocks(), u32::MAX);
        assert_eq!(req.physical_block(3), 2);
    }

    #[test]
    fn test_io_kind_parse() {
        assert_eq!(IoKind::parse("write"), Some(IoKind::Write));
        assert_eq!(IoKind::parse("stat"), None);
        assert_eq!(IoKind::Close.to_string(), "close");
    }
}
