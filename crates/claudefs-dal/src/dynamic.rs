//! Drivers loaded from shared modules at runtime.
//!
//! A module exports the C entry points below. Every one is required
//! except `dal_delete`; a module missing any required symbol is refused
//! as a whole and closed again. Loaded modules are never unloaded.
//!
//! ```text
//! int     dal_config(const char *name, const dal_opt *opts, size_t count);
//! int     dal_init(dal_ctx *ctx);
//! int     dal_destroy(dal_ctx *ctx);
//! int     dal_open(dal_ctx *ctx, int is_put, uint64_t chunk_offset,
//!                  uint64_t content_length, uint8_t preserve_write_count,
//!                  uint16_t timeout);
//! ssize_t dal_put(dal_ctx *ctx, const char *buf, size_t size);
//! ssize_t dal_get(dal_ctx *ctx, char *buf, size_t size);
//! int     dal_sync(dal_ctx *ctx);
//! int     dal_abort(dal_ctx *ctx);
//! int     dal_close(dal_ctx *ctx);
//! int     dal_update_object_location(dal_ctx *ctx);
//! int     dal_delete(dal_ctx *ctx);      /* optional */
//! ```

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error};

use crate::config::ConfigOption;
use crate::context::{ContextState, DalContext};
use crate::dal::Dal;
use crate::error::{DalError, DalResult};
use crate::handle::{FileHandle, OpenParams, StreamFlags};

/// One option as passed to `dal_config`. Values are rendered as text.
#[repr(C)]
pub struct RawConfigOpt {
    /// NUL-terminated key.
    pub key: *const c_char,
    /// NUL-terminated value.
    pub value: *const c_char,
}

/// Stream context shared with a module.
///
/// The string fields stay valid until `dal_destroy` returns; `state` is
/// owned by the module.
#[repr(C)]
pub struct RawContext {
    /// Generic context flags.
    pub flags: u32,
    /// Module-private state.
    pub state: *mut c_void,
    /// Repository name.
    pub repo: *const c_char,
    /// Repository host field.
    pub host: *const c_char,
    /// Namespace name.
    pub ns: *const c_char,
    /// Object id.
    pub objid: *const c_char,
}

type ConfigFn = unsafe extern "C" fn(*const c_char, *const RawConfigOpt, usize) -> c_int;
type CtxFn = unsafe extern "C" fn(*mut RawContext) -> c_int;
type OpenFn = unsafe extern "C" fn(*mut RawContext, c_int, u64, u64, u8, u16) -> c_int;
type PutFn = unsafe extern "C" fn(*mut RawContext, *const c_char, usize) -> isize;
type GetFn = unsafe extern "C" fn(*mut RawContext, *mut c_char, usize) -> isize;

struct ModuleFns {
    config: ConfigFn,
    init: CtxFn,
    destroy: CtxFn,
    open: OpenFn,
    put: PutFn,
    get: GetFn,
    sync: CtxFn,
    abort: CtxFn,
    close: CtxFn,
    update_object_location: CtxFn,
    delete: Option<CtxFn>,
}

/// A loaded driver module.
pub struct DynamicModule {
    path: String,
    fns: ModuleFns,
}

impl fmt::Debug for DynamicModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicModule")
            .field("path", &self.path)
            .field("has_delete", &self.fns.delete.is_some())
            .finish()
    }
}

fn dl_error() -> String {
    // SAFETY: dlerror returns NULL or a NUL-terminated string owned by libc.
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        "unknown error".to_string()
    } else {
        // SAFETY: checked non-null above.
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

fn symbol(lib: *mut c_void, module: &str, name: &str) -> DalResult<Option<*mut c_void>> {
    let cname = CString::new(name).map_err(|_| DalError::DynamicLoad {
        module: module.to_string(),
        reason: format!("bad symbol name {}", name),
    })?;
    // SAFETY: lib is a live handle from dlopen, cname is NUL-terminated.
    let sym = unsafe { libc::dlsym(lib, cname.as_ptr()) };
    Ok(if sym.is_null() { None } else { Some(sym) })
}

macro_rules! require_symbol {
    ($lib:expr, $module:expr, $name:literal, $ty:ty) => {{
        match symbol($lib, $module, $name)? {
            // SAFETY: the module contract fixes the signature of $name.
            Some(sym) => unsafe { std::mem::transmute::<*mut c_void, $ty>(sym) },
            None => {
                return Err(DalError::DynamicLoad {
                    module: $module.to_string(),
                    reason: format!("missing symbol {}", $name),
                })
            }
        }
    }};
}

fn resolve(lib: *mut c_void, path: &str) -> DalResult<ModuleFns> {
    Ok(ModuleFns {
        config: require_symbol!(lib, path, "dal_config", ConfigFn),
        init: require_symbol!(lib, path, "dal_init", CtxFn),
        destroy: require_symbol!(lib, path, "dal_destroy", CtxFn),
        open: require_symbol!(lib, path, "dal_open", OpenFn),
        put: require_symbol!(lib, path, "dal_put", PutFn),
        get: require_symbol!(lib, path, "dal_get", GetFn),
        sync: require_symbol!(lib, path, "dal_sync", CtxFn),
        abort: require_symbol!(lib, path, "dal_abort", CtxFn),
        close: require_symbol!(lib, path, "dal_close", CtxFn),
        update_object_location: require_symbol!(lib, path, "dal_update_object_location", CtxFn),
        delete: symbol(lib, path, "dal_delete")?
            // SAFETY: the module contract fixes the signature of dal_delete.
            .map(|sym| unsafe { std::mem::transmute::<*mut c_void, CtxFn>(sym) }),
    })
}

impl DynamicModule {
    /// Loads the module at `path` and resolves its entry points.
    pub fn load(path: &str) -> DalResult<Self> {
        let cpath = CString::new(path).map_err(|_| DalError::DynamicLoad {
            module: path.to_string(),
            reason: "path contains a NUL byte".to_string(),
        })?;
        // SAFETY: cpath is NUL-terminated. A loaded module is never
        // closed, so resolved symbols stay valid.
        let lib = unsafe { libc::dlopen(cpath.as_ptr(), libc::RTLD_LAZY) };
        if lib.is_null() {
            let reason = dl_error();
            error!("dlopen({}) failed: {}", path, reason);
            return Err(DalError::DynamicLoad {
                module: path.to_string(),
                reason,
            });
        }

        let fns = match resolve(lib, path) {
            Ok(fns) => fns,
            Err(e) => {
                error!("refusing module {}: {}", path, e);
                // SAFETY: lib came from dlopen above and no symbol of it
                // escapes this function.
                unsafe { libc::dlclose(lib) };
                return Err(e);
            }
        };
        debug!("resolved DAL symbols of {}", path);
        Ok(Self {
            path: path.to_string(),
            fns,
        })
    }

    /// Path the module was loaded from.
    pub fn path(&self) -> &str {
        &self.path
    }
}

fn cstring(key: &str, value: &str) -> DalResult<CString> {
    CString::new(value).map_err(|_| DalError::InvalidOption {
        key: key.to_string(),
        reason: "contains a NUL byte".to_string(),
    })
}

/// Per-stream state of a module driver: the shared context and the
/// strings it points into.
pub struct ModuleState {
    raw: Box<RawContext>,
    _strings: [CString; 4],
}

// SAFETY: the module owns `raw.state` and is required to tolerate its
// context moving between threads between calls; the string pointers
// refer to heap buffers owned by `_strings`.
unsafe impl Send for ModuleState {}

impl fmt::Debug for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleState")
            .field("flags", &self.raw.flags)
            .field("objid", &self._strings[3])
            .finish()
    }
}

impl ModuleState {
    fn new(fh: &FileHandle) -> DalResult<Self> {
        let loc = &fh.location;
        let strings = [
            cstring("repo", &loc.repo.name)?,
            cstring("host", &loc.repo.host)?,
            cstring("ns", &loc.ns.name)?,
            cstring("objid", &loc.objid)?,
        ];
        let raw = Box::new(RawContext {
            flags: 0,
            state: std::ptr::null_mut(),
            repo: strings[0].as_ptr(),
            host: strings[1].as_ptr(),
            ns: strings[2].as_ptr(),
            objid: strings[3].as_ptr(),
        });
        Ok(Self {
            raw,
            _strings: strings,
        })
    }

    fn ptr(&mut self) -> *mut RawContext {
        &mut *self.raw
    }
}

/// A configured module driver.
pub struct ModuleDal {
    name: String,
    module: Arc<DynamicModule>,
}

fn check(op: &'static str, status: c_int) -> DalResult<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(DalError::Module {
            op,
            status: status as i64,
        })
    }
}

fn state_mut(ctx: &mut DalContext) -> DalResult<&mut ModuleState> {
    match ctx.state_mut() {
        ContextState::Module(state) => Ok(state),
        _ => Err(DalError::ContextMismatch { expected: "module" }),
    }
}

impl ModuleDal {
    /// Runs the module's `dal_config` with `opts`.
    pub fn configure(name: &str, opts: &[ConfigOption], module: Arc<DynamicModule>) -> DalResult<Self> {
        let cname = cstring("dal", name)?;
        let mut owned = Vec::with_capacity(opts.len());
        for opt in opts {
            owned.push((cstring(&opt.key, &opt.key)?, cstring(&opt.key, &opt.as_str())?));
        }
        let raw: Vec<RawConfigOpt> = owned
            .iter()
            .map(|(k, v)| RawConfigOpt {
                key: k.as_ptr(),
                value: v.as_ptr(),
            })
            .collect();
        // SAFETY: every pointer refers to a CString alive for the call.
        let status = unsafe { (module.fns.config)(cname.as_ptr(), raw.as_ptr(), raw.len()) };
        check("config", status)?;
        Ok(Self {
            name: name.to_string(),
            module,
        })
    }

    fn call(&self, op: &'static str, f: CtxFn, ctx: &mut DalContext) -> DalResult<()> {
        let state = state_mut(ctx)?;
        // SAFETY: the context pointer is valid and exclusively borrowed.
        let status = unsafe { f(state.ptr()) };
        check(op, status)
    }
}

impl Dal for ModuleDal {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, fh: &mut FileHandle) -> DalResult<DalContext> {
        let mut state = ModuleState::new(fh)?;
        // SAFETY: the context and its strings outlive the call.
        check("init", unsafe { (self.module.fns.init)(state.ptr()) })?;
        Ok(DalContext::new(ContextState::Module(state)))
    }

    fn destroy(&self, ctx: DalContext) -> DalResult<()> {
        match ctx.into_state() {
            ContextState::Module(mut state) => {
                // SAFETY: last use of the context; the module frees its state.
                check("destroy", unsafe { (self.module.fns.destroy)(state.ptr()) })
            }
            _ => Err(DalError::ContextMismatch { expected: "module" }),
        }
    }

    fn open(&self, ctx: &mut DalContext, fh: &mut FileHandle, params: OpenParams) -> DalResult<()> {
        fh.os.cleanup_for_reopen(params.preserve_write_count);
        let state = state_mut(ctx)?;
        // SAFETY: the context pointer is valid and exclusively borrowed.
        let status = unsafe {
            (self.module.fns.open)(
                state.ptr(),
                params.is_put as c_int,
                params.chunk_offset,
                params.content_length,
                params.preserve_write_count as u8,
                params.timeout,
            )
        };
        check("open", status)?;
        fh.os.flags |= StreamFlags::OPEN
            | if params.is_put {
                StreamFlags::WRITING
            } else {
                StreamFlags::READING
            };
        Ok(())
    }

    fn put(&self, ctx: &mut DalContext, fh: &mut FileHandle, buf: &[u8]) -> DalResult<usize> {
        let state = state_mut(ctx)?;
        // SAFETY: buf is valid for reads of buf.len() bytes.
        let n = unsafe { (self.module.fns.put)(state.ptr(), buf.as_ptr() as *const c_char, buf.len()) };
        if n < 0 {
            fh.os.flags |= StreamFlags::ERRORS;
            return Err(DalError::Module {
                op: "put",
                status: n as i64,
            });
        }
        fh.os.written += n as u64;
        Ok(n as usize)
    }

    fn get(&self, ctx: &mut DalContext, fh: &mut FileHandle, buf: &mut [u8]) -> DalResult<usize> {
        let state = state_mut(ctx)?;
        // SAFETY: buf is valid for writes of buf.len() bytes.
        let n = unsafe {
            (self.module.fns.get)(state.ptr(), buf.as_mut_ptr() as *mut c_char, buf.len())
        };
        match n {
            n if n < 0 => {
                fh.os.flags |= StreamFlags::ERRORS;
                Err(DalError::Module {
                    op: "get",
                    status: n as i64,
                })
            }
            0 => {
                fh.os.flags |= StreamFlags::EOF;
                Ok(0)
            }
            n => {
                fh.os.written += n as u64;
                Ok(n as usize)
            }
        }
    }

    fn sync(&self, ctx: &mut DalContext, _fh: &mut FileHandle) -> DalResult<()> {
        self.call("sync", self.module.fns.sync, ctx)
    }

    fn abort(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        self.call("abort", self.module.fns.abort, ctx)?;
        fh.os.flags |= StreamFlags::ABORT;
        Ok(())
    }

    fn close(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        self.call("close", self.module.fns.close, ctx)?;
        fh.os.mark_closed();
        Ok(())
    }

    fn delete(&self, ctx: &mut DalContext, _fh: &mut FileHandle) -> DalResult<()> {
        match self.module.fns.delete {
            Some(f) => self.call("delete", f, ctx),
            None => Err(DalError::Unsupported {
                dal: self.name.clone(),
                op: "delete",
            }),
        }
    }

    fn update_object_location(&self, ctx: &mut DalContext, _fh: &mut FileHandle) -> DalResult<()> {
        self.call("update_object_location", self.module.fns.update_object_location, ctx)?;
        ctx.set_location_computed();
        Ok(())
    }
}
