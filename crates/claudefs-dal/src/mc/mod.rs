//! Multi-component (MC) driver.
//!
//! Objects are erasure coded into N data and E parity blocks spread over
//! a pod/capacitor/scatter tree. The repository `host` field is a path
//! format with, in order, the pod (`%d`), the block (`%s`, left as a
//! literal `%d` for the engine), the capacitor (`%d`) and the scatter
//! directory (`%d`):
//!
//! ```text
//! /zfs/repo10+2/pod%d/block%s/cap%d/scatter%d
//! ```
//!
//! MC_SOCKETS repositories use a format with escaped host and block
//! fields, filled per block by a [`sockets::SocketBlockRenderer`].

pub mod degraded;
pub mod placement;
pub mod sockets;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::ConfigOption;
use crate::context::{ContextState, DalContext};
use crate::dal::Dal;
use crate::ec::{
    BlockFaultHook, BlockPathRenderer, EcHandle, EcMode, EcOpenRequest, ErasureEngine,
    PosixBlockRenderer,
};
use crate::error::{DalError, DalResult};
use crate::fuzzy::rules::BlockRuleHook;
use crate::fuzzy::RuleSet;
use crate::handle::{FileHandle, OpenParams, StreamFlags};
use crate::template::{flatten_objid, format_template, FmtArg};

use degraded::{DegradedLog, DegradedRecord};
use sockets::SocketsConfig;

pub use placement::{Geometry, Placement};

/// Name under which the socket-addressed variant is registered.
pub const MC_SOCKETS: &str = "MC_SOCKETS";

/// Largest single write the engine accepts.
pub const MAX_PUT_SIZE: usize = i32::MAX as usize;

/// Parsed options of an MC or MC_SOCKETS driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McConfig {
    /// Stripe and placement geometry.
    pub geometry: Geometry,
    /// Root of the degraded-object log.
    pub degraded_log_dir: PathBuf,
    /// Host addressing, for MC_SOCKETS only.
    pub sockets: Option<SocketsConfig>,
}

fn require<T>(dal: &str, key: &'static str, value: Option<T>) -> DalResult<T> {
    value.ok_or_else(|| DalError::MissingOption {
        dal: dal.to_string(),
        key,
    })
}

impl McConfig {
    /// Parses the option list. Socket keys are accepted only when
    /// `is_sockets` is set.
    pub fn parse(name: &str, is_sockets: bool, opts: &[ConfigOption]) -> DalResult<Self> {
        let (mut n, mut e) = (None, 0);
        let (mut num_pods, mut num_cap, mut scatter_width) = (None, None, None);
        let mut degraded_log_dir = None;
        let mut sockets = SocketsConfig::default();

        for opt in opts {
            match opt.key.as_str() {
                "n" => n = Some(opt.as_nonzero_u32()?),
                "e" => e = opt.as_u32()?,
                "num_pods" => num_pods = Some(opt.as_nonzero_u32()?),
                "num_cap" => num_cap = Some(opt.as_nonzero_u32()?),
                "scatter_width" => scatter_width = Some(opt.as_nonzero_u32()?),
                "degraded_log_dir" => degraded_log_dir = Some(PathBuf::from(opt.as_str())),
                "host_offset" if is_sockets => sockets.host_offset = opt.as_u32()?,
                "host_count" if is_sockets => sockets.host_count = opt.as_u32()?,
                "blocks_per_host" if is_sockets => sockets.blocks_per_host = opt.as_u32()?,
                "block_offset" if is_sockets => sockets.block_offset = opt.as_u32()?,
                "global_block_numbering" if is_sockets => {
                    sockets.global_block_numbering = opt.as_i64()?
                }
                "pod_offset" if is_sockets => sockets.pod_offset = opt.as_u32()?,
                "mc_user" if is_sockets => sockets.mc_user = Some(opt.as_str()),
                other => {
                    error!("unrecognized option '{}' for DAL {}", other, name);
                    return Err(DalError::UnknownOption {
                        dal: name.to_string(),
                        key: other.to_string(),
                    });
                }
            }
        }

        let geometry = Geometry {
            n: require(name, "n", n)?,
            e,
            num_pods: require(name, "num_pods", num_pods)?,
            num_cap: require(name, "num_cap", num_cap)?,
            scatter_width: require(name, "scatter_width", scatter_width)?,
        };
        geometry.validate()?;
        let degraded_log_dir = require(name, "degraded_log_dir", degraded_log_dir)?;

        let sockets = if is_sockets {
            sockets.validate(&geometry)?;
            Some(sockets)
        } else {
            None
        };

        Ok(Self {
            geometry,
            degraded_log_dir,
            sockets,
        })
    }
}

/// Renders the path template of `objid` at `p`: the repository format
/// with pod, capacitor and scatter filled, then the flattened object id.
/// Block placeholders are left for the engine.
pub fn path_template(
    format: &str,
    objid: &str,
    p: &Placement,
    sockets: Option<&SocketsConfig>,
) -> DalResult<String> {
    let mut template = match sockets {
        None => format_template(
            format,
            &[
                FmtArg::Int(p.pod as i64),
                FmtArg::Str("%d"),
                FmtArg::Int(p.cap as i64),
                FmtArg::Int(p.scatter as i64),
            ],
        )?,
        Some(s) => format_template(
            format,
            &[
                FmtArg::Int(p.pod as i64 + s.pod_offset as i64),
                FmtArg::Int(p.cap as i64),
                FmtArg::Int(p.scatter as i64),
            ],
        )?,
    };
    if !template.ends_with('/') {
        template.push('/');
    }
    template.push_str(&flatten_objid(objid));
    Ok(template)
}

/// Per-stream state of the MC drivers.
#[derive(Default)]
pub struct McState {
    template: String,
    placement: Option<Placement>,
    handle: Option<Box<dyn EcHandle>>,
    chunk_offset: u64,
    block_rules: Option<Arc<RuleSet>>,
}

impl McState {
    /// Path template computed by `update_object_location`.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Placement computed by `update_object_location`.
    pub fn placement(&self) -> Option<Placement> {
        self.placement
    }

    /// Byte offset of the next read.
    pub fn chunk_offset(&self) -> u64 {
        self.chunk_offset
    }
}

impl fmt::Debug for McState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McState")
            .field("template", &self.template)
            .field("placement", &self.placement)
            .field("open", &self.handle.is_some())
            .field("chunk_offset", &self.chunk_offset)
            .finish()
    }
}

/// Erasure-coded driver, plain or socket-addressed.
pub struct McDal {
    name: String,
    kind: &'static str,
    config: Arc<McConfig>,
    engine: Arc<dyn ErasureEngine>,
    log: Arc<DegradedLog>,
}

impl McDal {
    /// Configures the driver. `name` selects the variant: [`MC_SOCKETS`]
    /// enables host addressing, anything else is plain MC.
    pub fn configure(
        name: &str,
        opts: &[ConfigOption],
        engine: Arc<dyn ErasureEngine>,
    ) -> DalResult<Self> {
        let is_sockets = name == MC_SOCKETS;
        let config = McConfig::parse(name, is_sockets, opts)?;
        info!(
            "configured {} with {}+{} over {} pods, {} caps, scatter {}",
            name,
            config.geometry.n,
            config.geometry.e,
            config.geometry.num_pods,
            config.geometry.num_cap,
            config.geometry.scatter_width
        );
        let log = Arc::new(DegradedLog::new(config.degraded_log_dir.clone()));
        Ok(Self {
            name: name.to_string(),
            kind: if is_sockets { MC_SOCKETS } else { "MC" },
            config: Arc::new(config),
            engine,
            log,
        })
    }

    /// Parsed configuration.
    pub fn config(&self) -> &McConfig {
        &self.config
    }

    /// The degraded-object log shared by all streams of this driver.
    pub fn degraded_log(&self) -> &DegradedLog {
        &self.log
    }

    fn state_mut<'a>(&self, ctx: &'a mut DalContext) -> DalResult<&'a mut McState> {
        match ctx.state_mut() {
            ContextState::Mc(state) => Ok(state),
            _ => Err(DalError::ContextMismatch { expected: self.kind }),
        }
    }

    fn renderer(&self, pod: u32) -> Arc<dyn BlockPathRenderer> {
        match &self.config.sockets {
            None => Arc::new(PosixBlockRenderer),
            Some(s) => Arc::new(s.renderer(self.config.geometry.num_pods, pod)),
        }
    }
}

impl Dal for McDal {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, _fh: &mut FileHandle) -> DalResult<DalContext> {
        Ok(DalContext::new(ContextState::Mc(Box::default())))
    }

    fn destroy(&self, ctx: DalContext) -> DalResult<()> {
        match ctx.into_state() {
            ContextState::Mc(state) => {
                if state.handle.is_some() {
                    warn!("destroying {} context with an engine handle still open", self.kind);
                }
                Ok(())
            }
            _ => Err(DalError::ContextMismatch { expected: self.kind }),
        }
    }

    fn update_object_location(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        let placement = placement::compute(&fh.location.objid, &self.config.geometry);
        let template = path_template(
            &fh.location.repo.host,
            &fh.location.objid,
            &placement,
            self.config.sockets.as_ref(),
        )?;
        debug!("{} placed {} at {:?}: {}", self.kind, fh, placement, template);

        let state = self.state_mut(ctx)?;
        state.placement = Some(placement);
        state.template = template.clone();
        fh.os.url = template;
        ctx.set_location_computed();
        Ok(())
    }

    fn open(&self, ctx: &mut DalContext, fh: &mut FileHandle, params: OpenParams) -> DalResult<()> {
        if !ctx.location_computed() {
            error!("{} open of {} before its location was computed", self.kind, fh);
            return Err(DalError::LocationNotComputed(self.kind));
        }
        let geometry = self.config.geometry;
        let state = self.state_mut(ctx)?;
        let placement = state
            .placement
            .ok_or(DalError::LocationNotComputed(self.kind))?;

        fh.os.cleanup_for_reopen(params.preserve_write_count);
        // a handle left over from an unsynced stream is dropped, not closed
        state.handle = None;

        let mode = if params.is_put {
            EcMode::Write
        } else {
            EcMode::Read
        };
        let fault_hook = state.block_rules.as_ref().map(|rules| {
            Arc::new(BlockRuleHook::new(Arc::clone(rules), placement)) as Arc<dyn BlockFaultHook>
        });
        let request = EcOpenRequest {
            template: state.template.clone(),
            mode,
            start_block: placement.start_block,
            n: geometry.n,
            e: geometry.e,
            renderer: self.renderer(placement.pod),
            fault_hook,
            timeout: params.timeout,
        };

        let handle = self.engine.open(request).map_err(|e| {
            error!("{} engine open of {} failed: {}", self.kind, state.template, e);
            e
        })?;
        state.handle = Some(handle);
        state.chunk_offset = params.chunk_offset;
        fh.os.flags |= StreamFlags::OPEN
            | if params.is_put {
                StreamFlags::WRITING
            } else {
                StreamFlags::READING
            };
        Ok(())
    }

    fn put(&self, ctx: &mut DalContext, fh: &mut FileHandle, buf: &[u8]) -> DalResult<usize> {
        if buf.len() > MAX_PUT_SIZE {
            error!(
                "{} put of {} bytes to {} exceeds {}",
                self.kind,
                buf.len(),
                fh.os.url,
                MAX_PUT_SIZE
            );
            return Err(DalError::WriteTooLarge {
                size: buf.len(),
                limit: MAX_PUT_SIZE,
            });
        }
        let state = self.state_mut(ctx)?;
        let handle = match state.handle.as_mut() {
            Some(h) if fh.os.is_open() => h,
            _ => return Err(DalError::NotOpen { url: fh.os.url.clone() }),
        };
        match handle.write(buf) {
            Ok(n) => {
                fh.os.written += n as u64;
                Ok(n)
            }
            Err(e) => {
                error!("{} write to {} failed: {}", self.kind, fh.os.url, e);
                fh.os.flags |= StreamFlags::ERRORS;
                Err(e)
            }
        }
    }

    fn get(&self, ctx: &mut DalContext, fh: &mut FileHandle, buf: &mut [u8]) -> DalResult<usize> {
        let state = self.state_mut(ctx)?;
        let offset = state.chunk_offset;
        let handle = match state.handle.as_mut() {
            Some(h) if fh.os.is_open() => h,
            _ => return Err(DalError::NotOpen { url: fh.os.url.clone() }),
        };
        match handle.read(buf, offset) {
            Ok(0) => {
                fh.os.flags |= StreamFlags::EOF;
                Ok(0)
            }
            Ok(n) => {
                state.chunk_offset += n as u64;
                fh.os.written += n as u64;
                Ok(n)
            }
            Err(e) => {
                error!("{} read from {} failed: {}", self.kind, fh.os.url, e);
                fh.os.flags |= StreamFlags::ERRORS;
                Err(e)
            }
        }
    }

    fn sync(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        if !fh.os.is_open() {
            error!("{} sync of {}: stream not open", self.kind, fh.os.url);
            return Err(DalError::NotOpen { url: fh.os.url.clone() });
        }
        let geometry = self.config.geometry;
        let state = self.state_mut(ctx)?;
        let handle = state
            .handle
            .take()
            .ok_or_else(|| DalError::NotOpen { url: fh.os.url.clone() })?;

        let status = handle.close();
        if status > 0 {
            warn!(
                "{} object {} degraded, error pattern {:#x}",
                self.kind, state.template, status
            );
            if let Some(placement) = state.placement {
                self.log.append(&DegradedRecord {
                    path_template: &state.template,
                    n: geometry.n,
                    e: geometry.e,
                    start_block: placement.start_block,
                    error_pattern: status,
                    repo: &fh.location.repo.name,
                    placement,
                });
            }
        } else if status < 0 {
            error!("{} close of {} failed with {}", self.kind, state.template, status);
            fh.os.mark_closed();
            fh.os.flags |= StreamFlags::ERRORS;
            return Err(DalError::EngineFatal {
                path: state.template.clone(),
                status,
            });
        }
        Ok(())
    }

    fn abort(&self, _ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        if !fh.os.is_open() {
            return Err(DalError::NotOpen { url: fh.os.url.clone() });
        }
        fh.os.flags |= StreamFlags::ABORT;
        Ok(())
    }

    fn close(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        if !fh.os.is_open() {
            return Ok(());
        }
        let state = self.state_mut(ctx)?;
        if state.handle.take().is_some() {
            debug!("{} close of {} without sync drops the engine handle", self.kind, fh.os.url);
        }
        fh.os.mark_closed();
        Ok(())
    }

    fn delete(&self, ctx: &mut DalContext, _fh: &mut FileHandle) -> DalResult<()> {
        if !ctx.location_computed() {
            return Err(DalError::LocationNotComputed(self.kind));
        }
        let nblocks = self.config.geometry.num_blocks();
        let state = self.state_mut(ctx)?;
        let pod = state.placement.map_or(0, |p| p.pod);
        let renderer = self.renderer(pod);
        self.engine.delete(&state.template, nblocks, renderer.as_ref())
    }

    fn placement(&self, ctx: &DalContext) -> Option<Placement> {
        match ctx.state() {
            ContextState::Mc(state) => state.placement,
            _ => None,
        }
    }

    fn attach_block_rules(&self, ctx: &mut DalContext, rules: Arc<RuleSet>) {
        if let ContextState::Mc(state) = ctx.state_mut() {
            state.block_rules = Some(rules);
        }
    }
}
