//! The driver capability set.
//!
//! Every backend implements [`Dal`]. A configured driver instance is
//! shared by all streams of a repository; per-stream state lives in the
//! [`DalContext`] returned by [`Dal::init`].

use std::fmt;
use std::sync::Arc;

use crate::context::DalContext;
use crate::error::DalResult;
use crate::fuzzy::RuleSet;
use crate::handle::{FileHandle, OpenParams};
use crate::mc::Placement;

/// Operations of the capability set, in slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DalOp {
    /// Configuration-time setup.
    Config,
    /// Per-stream context creation.
    Init,
    /// Per-stream context teardown.
    Destroy,
    /// Open the object stream.
    Open,
    /// Write data.
    Put,
    /// Read data.
    Get,
    /// Flush and finish all I/O.
    Sync,
    /// Abandon the stream.
    Abort,
    /// Mark the stream closed.
    Close,
    /// Remove the object.
    Delete,
    /// Compute the physical location.
    UpdateObjectLocation,
}

impl DalOp {
    /// All operations a driver must provide.
    pub const ALL: [DalOp; 11] = [
        DalOp::Config,
        DalOp::Init,
        DalOp::Destroy,
        DalOp::Open,
        DalOp::Put,
        DalOp::Get,
        DalOp::Sync,
        DalOp::Abort,
        DalOp::Close,
        DalOp::Delete,
        DalOp::UpdateObjectLocation,
    ];

    /// Name used in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            DalOp::Config => "config",
            DalOp::Init => "init",
            DalOp::Destroy => "destroy",
            DalOp::Open => "open",
            DalOp::Put => "put",
            DalOp::Get => "get",
            DalOp::Sync => "sync",
            DalOp::Abort => "abort",
            DalOp::Close => "close",
            DalOp::Delete => "delete",
            DalOp::UpdateObjectLocation => "update_object_location",
        }
    }
}

impl fmt::Display for DalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured storage driver.
///
/// Within one stream the caller issues
/// `init → update_object_location → open → (put|get)* → sync|abort → close → destroy`.
pub trait Dal: Send + Sync {
    /// Name the driver was looked up by.
    fn name(&self) -> &str;

    /// Creates the per-stream context for `fh`.
    fn init(&self, fh: &mut FileHandle) -> DalResult<DalContext>;

    /// Releases everything owned by `ctx`.
    fn destroy(&self, ctx: DalContext) -> DalResult<()>;

    /// Opens the object stream.
    fn open(&self, ctx: &mut DalContext, fh: &mut FileHandle, params: OpenParams) -> DalResult<()>;

    /// Writes `buf`, returning the number of bytes accepted.
    fn put(&self, ctx: &mut DalContext, fh: &mut FileHandle, buf: &[u8]) -> DalResult<usize>;

    /// Reads into `buf`, returning the number of bytes read (0 at EOF).
    fn get(&self, ctx: &mut DalContext, fh: &mut FileHandle, buf: &mut [u8]) -> DalResult<usize>;

    /// Completes all I/O. No further I/O is possible afterwards.
    fn sync(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()>;

    /// Abandons a stream on which nothing has been written yet.
    fn abort(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()>;

    /// Marks the stream closed.
    fn close(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()>;

    /// Removes the object at the computed location.
    fn delete(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()>;

    /// Computes the physical location of the object.
    fn update_object_location(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()>;

    /// Placement coordinate of the stream, for drivers that place objects
    /// across pods and capacitors.
    fn placement(&self, _ctx: &DalContext) -> Option<Placement> {
        None
    }

    /// Hands block-level fault rules to a stream. Drivers without block
    /// addressing ignore them.
    fn attach_block_rules(&self, _ctx: &mut DalContext, _rules: Arc<RuleSet>) {}
}

impl fmt::Debug for dyn Dal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dal({})", self.name())
    }
}
