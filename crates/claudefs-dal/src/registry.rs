//! Driver registry.
//!
//! Repositories name their driver; the registry maps that name to a
//! [`DalDescriptor`] which, given the repository's options, yields a
//! configured [`Dal`]. Names are unique, every descriptor must provide
//! the full capability set, and the registry holds at most [`MAX_DAL`]
//! drivers.
//!
//! A name of the form `DYNAMIC <path>` that is not installed yet loads
//! the shared module at `<path>` and installs it under that name.

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::{debug, error, info};

use crate::config::{ConfigOption, RepoDalConfig};
use crate::context::DalContext;
use crate::dal::{Dal, DalOp};
use crate::dynamic::{DynamicModule, ModuleDal};
use crate::ec::{ErasureEngine, FileErasureEngine};
use crate::error::{DalError, DalResult};
use crate::fuzzy::FuzzyDal;
use crate::handle::{FileHandle, OpenParams};
use crate::mc::{McDal, MC_SOCKETS};
use crate::nop::NoopDal;
use crate::object::{MemObjectStore, ObjectDal, ObjectStore};
use crate::posix::PosixDal;

/// Most drivers a registry holds.
pub const MAX_DAL: usize = 32;

/// Prefix of names that denote a runtime-loaded module.
pub const DYNAMIC_PREFIX: &str = "DYNAMIC ";

/// Names of the built-in drivers, in install order.
pub const BUILTIN_NAMES: [&str; 6] = ["OBJECT", "NO_OP", "POSIX", "MC", MC_SOCKETS, "FUZZY"];

/// External services handed to the built-in drivers at configuration.
#[derive(Clone)]
pub struct Collaborators {
    /// Byte-stream primitive behind the OBJECT driver.
    pub object_store: Arc<dyn ObjectStore>,
    /// Erasure engine behind the MC drivers.
    pub ec_engine: Arc<dyn ErasureEngine>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            object_store: Arc::new(MemObjectStore::new()),
            ec_engine: Arc::new(FileErasureEngine::new()),
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Configuration entry point of a built-in driver.
pub type ConfigureFn = fn(&str, &[ConfigOption], &DalRegistry) -> DalResult<Arc<dyn Dal>>;

type ConfigSlot = Arc<dyn Fn(&str, &[ConfigOption]) -> DalResult<()> + Send + Sync>;
type InitSlot = Arc<dyn Fn(&mut FileHandle) -> DalResult<DalContext> + Send + Sync>;
type DestroySlot = Arc<dyn Fn(DalContext) -> DalResult<()> + Send + Sync>;
type OpenSlot =
    Arc<dyn Fn(&mut DalContext, &mut FileHandle, OpenParams) -> DalResult<()> + Send + Sync>;
type PutSlot = Arc<dyn Fn(&mut DalContext, &mut FileHandle, &[u8]) -> DalResult<usize> + Send + Sync>;
type GetSlot =
    Arc<dyn Fn(&mut DalContext, &mut FileHandle, &mut [u8]) -> DalResult<usize> + Send + Sync>;
type StreamSlot = Arc<dyn Fn(&mut DalContext, &mut FileHandle) -> DalResult<()> + Send + Sync>;

/// A driver assembled from one callable per operation.
///
/// Applications use tables to install their own drivers. A table with an
/// empty slot is refused by [`DalRegistry::install`].
#[derive(Clone, Default)]
pub struct DalTable {
    config: Option<ConfigSlot>,
    init: Option<InitSlot>,
    destroy: Option<DestroySlot>,
    open: Option<OpenSlot>,
    put: Option<PutSlot>,
    get: Option<GetSlot>,
    sync: Option<StreamSlot>,
    abort: Option<StreamSlot>,
    close: Option<StreamSlot>,
    delete: Option<StreamSlot>,
    update_object_location: Option<StreamSlot>,
}

impl DalTable {
    /// A table with every slot empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table whose slots all forward to `dal`. The config slot accepts
    /// any options.
    pub fn from_dal(dal: Arc<dyn Dal>) -> Self {
        let (d1, d2, d3, d4, d5) = (dal.clone(), dal.clone(), dal.clone(), dal.clone(), dal.clone());
        let (d6, d7, d8, d9, d10) = (dal.clone(), dal.clone(), dal.clone(), dal.clone(), dal);
        Self::new()
            .with_config(|_, _| Ok(()))
            .with_init(move |fh| d1.init(fh))
            .with_destroy(move |ctx| d2.destroy(ctx))
            .with_open(move |ctx, fh, p| d3.open(ctx, fh, p))
            .with_put(move |ctx, fh, buf| d4.put(ctx, fh, buf))
            .with_get(move |ctx, fh, buf| d5.get(ctx, fh, buf))
            .with_sync(move |ctx, fh| d6.sync(ctx, fh))
            .with_abort(move |ctx, fh| d7.abort(ctx, fh))
            .with_close(move |ctx, fh| d8.close(ctx, fh))
            .with_delete(move |ctx, fh| d9.delete(ctx, fh))
            .with_update_object_location(move |ctx, fh| d10.update_object_location(ctx, fh))
    }

    /// Sets the configuration callback.
    pub fn with_config(
        mut self,
        f: impl Fn(&str, &[ConfigOption]) -> DalResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.config = Some(Arc::new(f));
        self
    }

    /// Sets the context init callback.
    pub fn with_init(
        mut self,
        f: impl Fn(&mut FileHandle) -> DalResult<DalContext> + Send + Sync + 'static,
    ) -> Self {
        self.init = Some(Arc::new(f));
        self
    }

    /// Sets the context destroy callback.
    pub fn with_destroy(
        mut self,
        f: impl Fn(DalContext) -> DalResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.destroy = Some(Arc::new(f));
        self
    }

    /// Sets the open callback.
    pub fn with_open(
        mut self,
        f: impl Fn(&mut DalContext, &mut FileHandle, OpenParams) -> DalResult<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.open = Some(Arc::new(f));
        self
    }

    /// Sets the put callback.
    pub fn with_put(
        mut self,
        f: impl Fn(&mut DalContext, &mut FileHandle, &[u8]) -> DalResult<usize> + Send + Sync + 'static,
    ) -> Self {
        self.put = Some(Arc::new(f));
        self
    }

    /// Sets the get callback.
    pub fn with_get(
        mut self,
        f: impl Fn(&mut DalContext, &mut FileHandle, &mut [u8]) -> DalResult<usize>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.get = Some(Arc::new(f));
        self
    }

    /// Sets the sync callback.
    pub fn with_sync(
        mut self,
        f: impl Fn(&mut DalContext, &mut FileHandle) -> DalResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.sync = Some(Arc::new(f));
        self
    }

    /// Sets the abort callback.
    pub fn with_abort(
        mut self,
        f: impl Fn(&mut DalContext, &mut FileHandle) -> DalResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.abort = Some(Arc::new(f));
        self
    }

    /// Sets the close callback.
    pub fn with_close(
        mut self,
        f: impl Fn(&mut DalContext, &mut FileHandle) -> DalResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.close = Some(Arc::new(f));
        self
    }

    /// Sets the delete callback.
    pub fn with_delete(
        mut self,
        f: impl Fn(&mut DalContext, &mut FileHandle) -> DalResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.delete = Some(Arc::new(f));
        self
    }

    /// Sets the update-location callback.
    pub fn with_update_object_location(
        mut self,
        f: impl Fn(&mut DalContext, &mut FileHandle) -> DalResult<()> + Send + Sync + 'static,
    ) -> Self {
        self.update_object_location = Some(Arc::new(f));
        self
    }

    /// Empties the slot of `op`.
    pub fn clear(mut self, op: DalOp) -> Self {
        match op {
            DalOp::Config => self.config = None,
            DalOp::Init => self.init = None,
            DalOp::Destroy => self.destroy = None,
            DalOp::Open => self.open = None,
            DalOp::Put => self.put = None,
            DalOp::Get => self.get = None,
            DalOp::Sync => self.sync = None,
            DalOp::Abort => self.abort = None,
            DalOp::Close => self.close = None,
            DalOp::Delete => self.delete = None,
            DalOp::UpdateObjectLocation => self.update_object_location = None,
        }
        self
    }

    fn has(&self, op: DalOp) -> bool {
        match op {
            DalOp::Config => self.config.is_some(),
            DalOp::Init => self.init.is_some(),
            DalOp::Destroy => self.destroy.is_some(),
            DalOp::Open => self.open.is_some(),
            DalOp::Put => self.put.is_some(),
            DalOp::Get => self.get.is_some(),
            DalOp::Sync => self.sync.is_some(),
            DalOp::Abort => self.abort.is_some(),
            DalOp::Close => self.close.is_some(),
            DalOp::Delete => self.delete.is_some(),
            DalOp::UpdateObjectLocation => self.update_object_location.is_some(),
        }
    }

    /// First operation without a callback, if any.
    pub fn missing_op(&self) -> Option<DalOp> {
        DalOp::ALL.into_iter().find(|op| !self.has(*op))
    }
}

/// A configured [`DalTable`].
struct TableDal {
    name: String,
    table: Arc<DalTable>,
}

impl TableDal {
    fn slot<'a, T>(&self, slot: &'a Option<T>, op: DalOp) -> DalResult<&'a T> {
        slot.as_ref().ok_or_else(|| DalError::Unsupported {
            dal: self.name.clone(),
            op: op.as_str(),
        })
    }
}

impl Dal for TableDal {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, fh: &mut FileHandle) -> DalResult<DalContext> {
        self.slot(&self.table.init, DalOp::Init)?(fh)
    }

    fn destroy(&self, ctx: DalContext) -> DalResult<()> {
        self.slot(&self.table.destroy, DalOp::Destroy)?(ctx)
    }

    fn open(&self, ctx: &mut DalContext, fh: &mut FileHandle, params: OpenParams) -> DalResult<()> {
        self.slot(&self.table.open, DalOp::Open)?(ctx, fh, params)
    }

    fn put(&self, ctx: &mut DalContext, fh: &mut FileHandle, buf: &[u8]) -> DalResult<usize> {
        self.slot(&self.table.put, DalOp::Put)?(ctx, fh, buf)
    }

    fn get(&self, ctx: &mut DalContext, fh: &mut FileHandle, buf: &mut [u8]) -> DalResult<usize> {
        self.slot(&self.table.get, DalOp::Get)?(ctx, fh, buf)
    }

    fn sync(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        self.slot(&self.table.sync, DalOp::Sync)?(ctx, fh)
    }

    fn abort(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        self.slot(&self.table.abort, DalOp::Abort)?(ctx, fh)
    }

    fn close(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        self.slot(&self.table.close, DalOp::Close)?(ctx, fh)
    }

    fn delete(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        self.slot(&self.table.delete, DalOp::Delete)?(ctx, fh)
    }

    fn update_object_location(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        self.slot(&self.table.update_object_location, DalOp::UpdateObjectLocation)?(ctx, fh)
    }
}

#[derive(Clone)]
enum Backend {
    Builtin(ConfigureFn),
    Table(Arc<DalTable>),
    Module(Arc<DynamicModule>),
}

/// An installable driver: a name plus the means to configure it.
#[derive(Clone)]
pub struct DalDescriptor {
    name: String,
    backend: Backend,
}

impl DalDescriptor {
    /// Descriptor for a driver configured by `configure`.
    pub fn builtin(name: &str, configure: ConfigureFn) -> Self {
        Self {
            name: name.to_string(),
            backend: Backend::Builtin(configure),
        }
    }

    /// Descriptor for a callback table.
    pub fn table(name: &str, table: DalTable) -> Self {
        Self {
            name: name.to_string(),
            backend: Backend::Table(Arc::new(table)),
        }
    }

    /// Descriptor for a loaded module.
    pub fn module(name: &str, module: DynamicModule) -> Self {
        Self {
            name: name.to_string(),
            backend: Backend::Module(Arc::new(module)),
        }
    }

    /// Name the descriptor is installed under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First operation the descriptor cannot provide.
    pub fn missing_op(&self) -> Option<DalOp> {
        match &self.backend {
            Backend::Table(table) => table.missing_op(),
            // loading already checked every symbol
            Backend::Builtin(_) | Backend::Module(_) => None,
        }
    }

    /// Configures a driver instance from `opts`.
    pub fn configure(&self, registry: &DalRegistry, opts: &[ConfigOption]) -> DalResult<Arc<dyn Dal>> {
        match &self.backend {
            Backend::Builtin(configure) => configure(&self.name, opts, registry),
            Backend::Table(table) => {
                let config = table.config.as_ref().ok_or_else(|| DalError::Unsupported {
                    dal: self.name.clone(),
                    op: DalOp::Config.as_str(),
                })?;
                config(&self.name, opts)?;
                Ok(Arc::new(TableDal {
                    name: self.name.clone(),
                    table: Arc::clone(table),
                }))
            }
            Backend::Module(module) => Ok(Arc::new(ModuleDal::configure(
                &self.name,
                opts,
                Arc::clone(module),
            )?)),
        }
    }
}

impl fmt::Debug for DalDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.backend {
            Backend::Builtin(_) => "builtin",
            Backend::Table(_) => "table",
            Backend::Module(_) => "module",
        };
        f.debug_struct("DalDescriptor")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

fn configure_object(name: &str, opts: &[ConfigOption], reg: &DalRegistry) -> DalResult<Arc<dyn Dal>> {
    let store = reg.collaborators().object_store;
    Ok(Arc::new(ObjectDal::configure(name, opts, store)?))
}

fn configure_noop(name: &str, opts: &[ConfigOption], _reg: &DalRegistry) -> DalResult<Arc<dyn Dal>> {
    Ok(Arc::new(NoopDal::configure(name, opts)?))
}

fn configure_posix(name: &str, opts: &[ConfigOption], _reg: &DalRegistry) -> DalResult<Arc<dyn Dal>> {
    Ok(Arc::new(PosixDal::configure(name, opts)?))
}

fn configure_mc(name: &str, opts: &[ConfigOption], reg: &DalRegistry) -> DalResult<Arc<dyn Dal>> {
    let engine = reg.collaborators().ec_engine;
    Ok(Arc::new(McDal::configure(name, opts, engine)?))
}

fn configure_fuzzy(name: &str, opts: &[ConfigOption], reg: &DalRegistry) -> DalResult<Arc<dyn Dal>> {
    Ok(Arc::new(FuzzyDal::configure(name, opts, reg)?))
}

/// Descriptors of the built-in drivers.
pub fn builtin_descriptors() -> Vec<DalDescriptor> {
    let fns: [ConfigureFn; 6] = [
        configure_object,
        configure_noop,
        configure_posix,
        configure_mc,
        configure_mc,
        configure_fuzzy,
    ];
    BUILTIN_NAMES
        .iter()
        .zip(fns)
        .map(|(name, f)| DalDescriptor::builtin(name, f))
        .collect()
}

/// A set of installed drivers.
pub struct DalRegistry {
    drivers: RwLock<Vec<DalDescriptor>>,
    collaborators: RwLock<Collaborators>,
}

impl Default for DalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DalRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DalRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

impl DalRegistry {
    /// An empty registry with default collaborators.
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(Vec::new()),
            collaborators: RwLock::new(Collaborators::default()),
        }
    }

    /// A registry holding the built-in drivers.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for desc in builtin_descriptors() {
            if let Err(e) = registry.install(desc) {
                error!("failed to install built-in DAL: {}", e);
            }
        }
        registry
    }

    /// Services handed to built-in drivers configured from now on.
    pub fn collaborators(&self) -> Collaborators {
        self.collaborators.read().clone()
    }

    /// Replaces the collaborators. Drivers already configured keep theirs.
    pub fn set_collaborators(&self, collaborators: Collaborators) {
        *self.collaborators.write() = collaborators;
    }

    /// Installs `desc`.
    pub fn install(&self, desc: DalDescriptor) -> DalResult<()> {
        let mut drivers = self.drivers.write();
        if drivers.iter().any(|d| d.name == desc.name) {
            error!("DAL named '{}' already exists", desc.name);
            return Err(DalError::DriverExists(desc.name));
        }
        if let Some(op) = desc.missing_op() {
            error!("DAL '{}' has no {} operation", desc.name, op);
            return Err(DalError::DriverIncomplete {
                name: desc.name,
                op: op.as_str(),
            });
        }
        if drivers.len() >= MAX_DAL {
            error!("no room for DAL '{}'", desc.name);
            return Err(DalError::RegistryFull {
                name: desc.name,
                capacity: MAX_DAL,
            });
        }
        debug!("installed DAL {} ({:?})", desc.name, desc);
        drivers.push(desc);
        Ok(())
    }

    /// Finds the driver called `name`, loading a module for
    /// `DYNAMIC <path>` names on first use.
    pub fn lookup(&self, name: &str) -> DalResult<DalDescriptor> {
        if let Some(desc) = self.drivers.read().iter().find(|d| d.name == name) {
            return Ok(desc.clone());
        }

        let Some(path) = name.strip_prefix(DYNAMIC_PREFIX) else {
            error!("unrecognized DAL '{}'", name);
            return Err(DalError::DriverNotFound(name.to_string()));
        };

        let module = DynamicModule::load(path.trim())?;
        info!("loaded DAL module {}", path.trim());
        let desc = DalDescriptor::module(name, module);
        match self.install(desc.clone()) {
            Ok(()) => Ok(desc),
            // another caller loaded it first
            Err(DalError::DriverExists(_)) => self.lookup(name),
            Err(e) => Err(e),
        }
    }

    /// Looks up and configures the driver of a repository.
    pub fn configure(&self, cfg: &RepoDalConfig) -> DalResult<Arc<dyn Dal>> {
        self.lookup(&cfg.dal)?.configure(self, &cfg.options)
    }

    /// Number of installed drivers.
    pub fn len(&self) -> usize {
        self.drivers.read().len()
    }

    /// Returns true if nothing is installed.
    pub fn is_empty(&self) -> bool {
        self.drivers.read().is_empty()
    }

    /// Installed names, in install order.
    pub fn names(&self) -> Vec<String> {
        self.drivers.read().iter().map(|d| d.name.clone()).collect()
    }
}

static GLOBAL: OnceLock<DalRegistry> = OnceLock::new();

/// The process-wide registry. The built-in drivers are installed on
/// first access.
pub fn global() -> &'static DalRegistry {
    GLOBAL.get_or_init(|| {
        info!("initializing DAL registry");
        DalRegistry::with_builtins()
    })
}

/// Sets the collaborators of the process-wide registry.
pub fn set_collaborators(collaborators: Collaborators) {
    global().set_collaborators(collaborators);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Namespace, ObjectLocation, Repo};

    fn complete_table() -> DalTable {
        DalTable::from_dal(Arc::new(NoopDal::configure("NO_OP", &[]).unwrap()))
    }

    fn handle() -> FileHandle {
        let repo = Arc::new(Repo {
            name: "r".to_string(),
            host: "h".to_string(),
        });
        let ns = Arc::new(Namespace {
            name: "n".to_string(),
        });
        FileHandle::new(ObjectLocation::new(repo, ns, "obj"))
    }

    #[test]
    fn test_builtins_installed() {
        let reg = DalRegistry::with_builtins();
        assert_eq!(reg.names(), BUILTIN_NAMES.to_vec());
        for name in BUILTIN_NAMES {
            assert_eq!(reg.lookup(name).unwrap().name(), name);
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let reg = DalRegistry::new();
        reg.install(DalDescriptor::table("CUSTOM", complete_table()))
            .unwrap();
        let err = reg
            .install(DalDescriptor::table("CUSTOM", complete_table()))
            .unwrap_err();
        assert!(matches!(err, DalError::DriverExists(ref n) if n == "CUSTOM"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_incomplete_table_rejected() {
        let reg = DalRegistry::new();
        for op in DalOp::ALL {
            let desc = DalDescriptor::table("PARTIAL", complete_table().clear(op));
            match reg.install(desc) {
                Err(DalError::DriverIncomplete { op: missing, .. }) => {
                    assert_eq!(missing, op.as_str())
                }
                other => panic!("expected DriverIncomplete for {}, got {:?}", op, other),
            }
        }
        assert!(reg.is_empty());
        assert!(matches!(
            reg.lookup("PARTIAL"),
            Err(DalError::DriverNotFound(_))
        ));
    }

    #[test]
    fn test_capacity() {
        let reg = DalRegistry::new();
        for i in 0..MAX_DAL {
            reg.install(DalDescriptor::table(&format!("D{}", i), complete_table()))
                .unwrap();
        }
        assert!(matches!(
            reg.install(DalDescriptor::table("ONE_MORE", complete_table())),
            Err(DalError::RegistryFull { capacity: MAX_DAL, .. })
        ));
        assert_eq!(reg.len(), MAX_DAL);
    }

    #[test]
    fn test_lookup_is_exact() {
        let reg = DalRegistry::with_builtins();
        assert!(matches!(reg.lookup("MC_"), Err(DalError::DriverNotFound(_))));
        assert!(matches!(reg.lookup("posix"), Err(DalError::DriverNotFound(_))));
        assert!(matches!(reg.lookup(""), Err(DalError::DriverNotFound(_))));
    }

    #[test]
    fn test_dynamic_missing_module() {
        let reg = DalRegistry::with_builtins();
        let err = reg
            .lookup("DYNAMIC /nonexistent/libdal_missing.so")
            .unwrap_err();
        assert!(matches!(err, DalError::DynamicLoad { .. }));
        assert_eq!(reg.len(), BUILTIN_NAMES.len());
    }

    #[test]
    fn test_configured_table_driver_runs() {
        let reg = DalRegistry::new();
        reg.install(DalDescriptor::table("CUSTOM", complete_table()))
            .unwrap();
        let dal = reg
            .configure(&RepoDalConfig {
                dal: "CUSTOM".to_string(),
                options: vec![],
            })
            .unwrap();
        assert_eq!(dal.name(), "CUSTOM");

        let mut fh = handle();
        let mut ctx = dal.init(&mut fh).unwrap();
        dal.update_object_location(&mut ctx, &mut fh).unwrap();
        dal.open(&mut ctx, &mut fh, OpenParams::write()).unwrap();
        assert_eq!(dal.put(&mut ctx, &mut fh, b"abc").unwrap(), 3);
        dal.sync(&mut ctx, &mut fh).unwrap();
        dal.close(&mut ctx, &mut fh).unwrap();
        dal.destroy(ctx).unwrap();
    }

    #[test]
    fn test_configure_unknown_option_fails() {
        let reg = DalRegistry::with_builtins();
        let err = reg
            .configure(&RepoDalConfig {
                dal: "POSIX".to_string(),
                options: vec![ConfigOption::new("bogus", "1")],
            })
            .unwrap_err();
        assert!(matches!(err, DalError::UnknownOption { .. }));
    }

    #[test]
    fn test_fuzzy_configures_wrapped_driver() {
        let reg = DalRegistry::with_builtins();
        let dal = reg
            .configure(&RepoDalConfig {
                dal: "FUZZY".to_string(),
                options: vec![
                    ConfigOption::new("wrap", "MC"),
                    ConfigOption::new(
                        "rule",
                        "which=dal,func=write,pod=2,cap=-1,mode=fail,fail_freq=1.0,ret=5",
                    ),
                    ConfigOption::int("n", 10),
                    ConfigOption::int("e", 2),
                    ConfigOption::int("num_pods", 4),
                    ConfigOption::int("num_cap", 4),
                    ConfigOption::int("scatter_width", 128),
                    ConfigOption::new("degraded_log_dir", "/tmp"),
                ],
            })
            .unwrap();
        assert_eq!(dal.name(), "FUZZY");

        let missing_wrap = reg.configure(&RepoDalConfig {
            dal: "FUZZY".to_string(),
            options: vec![],
        });
        assert!(matches!(
            missing_wrap,
            Err(DalError::MissingOption { key: "wrap", .. })
        ));
    }

    #[test]
    fn test_global_registry_is_shared() {
        let a = global() as *const DalRegistry;
        let b = global() as *const DalRegistry;
        assert_eq!(a, b);
        assert!(global().lookup("NO_OP").is_ok());
    }
}
