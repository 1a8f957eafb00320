//! Per-stream DAL context.
//!
//! A [`DalContext`] is created by a driver's `init`, used for exactly one
//! open/close cycle of one object, and consumed by the same driver's
//! `destroy`. Driver-specific state lives in a tagged [`ContextState`].

use crate::dynamic::ModuleState;
use crate::error::{DalError, DalResult};
use crate::fuzzy::FuzzyState;
use crate::handle::FileHandle;
use crate::mc::McState;
use crate::posix::PosixState;

/// Generic context bits, independent of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextFlags(u32);

impl ContextFlags {
    /// The physical location of the object has been computed.
    pub const LOCATION_COMPUTED: ContextFlags = ContextFlags(1 << 0);

    /// Returns true if all bits of `other` are set.
    pub fn contains(&self, other: ContextFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: ContextFlags) {
        self.0 |= other.0;
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// Driver-specific state of a stream.
#[derive(Debug)]
pub enum ContextState {
    /// Drivers that keep no per-stream state.
    Empty,
    /// Local-file driver state.
    Posix(PosixState),
    /// Multi-component (erasure-coded) driver state.
    Mc(Box<McState>),
    /// Fault-injection wrapper state, owning the wrapped context.
    Fuzzy(Box<FuzzyState>),
    /// State of a driver loaded from a runtime module.
    Module(ModuleState),
}

impl ContextState {
    fn kind(&self) -> &'static str {
        match self {
            ContextState::Empty => "empty",
            ContextState::Posix(_) => "posix",
            ContextState::Mc(_) => "mc",
            ContextState::Fuzzy(_) => "fuzzy",
            ContextState::Module(_) => "module",
        }
    }
}

/// State attached to one logical object stream.
#[derive(Debug)]
pub struct DalContext {
    /// Generic flags.
    pub flags: ContextFlags,
    state: ContextState,
}

impl DalContext {
    /// Creates a context with the given driver state and no flags.
    pub fn new(state: ContextState) -> Self {
        Self {
            flags: ContextFlags::default(),
            state,
        }
    }

    /// Context for drivers with no extra state.
    pub fn empty() -> Self {
        Self::new(ContextState::Empty)
    }

    /// Shared access to the driver state.
    pub fn state(&self) -> &ContextState {
        &self.state
    }

    /// Mutable access to the driver state.
    pub fn state_mut(&mut self) -> &mut ContextState {
        &mut self.state
    }

    /// Consumes the context, returning the driver state.
    pub fn into_state(self) -> ContextState {
        self.state
    }

    /// Returns true once `update_object_location` has succeeded.
    pub fn location_computed(&self) -> bool {
        self.flags.contains(ContextFlags::LOCATION_COMPUTED)
    }

    /// Records that the physical location has been computed.
    pub fn set_location_computed(&mut self) {
        self.flags.insert(ContextFlags::LOCATION_COMPUTED);
    }
}

/// Default `init` for drivers that keep no per-stream state.
pub fn default_init(fh: &FileHandle) -> DalResult<DalContext> {
    tracing::trace!("default context init for {}", fh);
    Ok(DalContext::empty())
}

/// Default `destroy` for drivers that keep no per-stream state.
pub fn default_destroy(ctx: DalContext) -> DalResult<()> {
    match ctx.into_state() {
        ContextState::Empty => Ok(()),
        other => {
            tracing::error!("default destroy given a {} context", other.kind());
            Err(DalError::ContextMismatch { expected: "default" })
        }
    }
}
