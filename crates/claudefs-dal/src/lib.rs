#![warn(missing_docs)]

//! ClaudeFS data abstraction layer: pluggable storage drivers behind one capability set
//!
//! Each repository names a driver (DAL). The driver turns a file's
//! location into a physical location and moves its bytes: to an object
//! store, to a local file, nowhere at all, or erasure coded across a
//! pod/capacitor tree with reproducible placement. A fault-injection
//! driver wraps any of them for resilience testing, and further drivers
//! can be installed as callback tables or loaded from shared modules.

pub mod cli;
pub mod config;
pub mod context;
pub mod dal;
pub mod dynamic;
pub mod ec;
pub mod error;
pub mod fuzzy;
pub mod handle;
pub mod mc;
pub mod nop;
pub mod object;
pub mod posix;
pub mod registry;
pub mod stream;
pub mod template;

pub use config::{ConfigOption, OptionValue, RepoDalConfig};
pub use context::{ContextFlags, ContextState, DalContext};
pub use dal::{Dal, DalOp};
pub use dynamic::{DynamicModule, ModuleDal};
pub use ec::{
    BlockFaultHook, BlockPathRenderer, EcHandle, EcMode, EcOpenRequest, ErasureEngine,
    FileErasureEngine, IoKind, MockErasureEngine, MockEvent, PosixBlockRenderer,
};
pub use error::{DalError, DalResult};
pub use fuzzy::{FaultRule, FuzzyDal, RuleSet, Verdict};
pub use handle::{FileHandle, Namespace, ObjectLocation, ObjectStream, OpenParams, Repo, StreamFlags};
pub use mc::{Geometry, McConfig, McDal, Placement, MC_SOCKETS};
pub use nop::NoopDal;
pub use object::{MemObjectStore, ObjectDal, ObjectStore};
pub use posix::PosixDal;
pub use registry::{Collaborators, DalDescriptor, DalRegistry, DalTable, MAX_DAL};
pub use stream::DalStream;
