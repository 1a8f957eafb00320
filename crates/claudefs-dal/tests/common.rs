//! Shared fixtures for the DAL integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use claudefs_dal::{
    Collaborators, ConfigOption, DalRegistry, ErasureEngine, FileHandle, MemObjectStore,
    Namespace, ObjectLocation, Repo,
};

/// MC geometry used throughout: 10+2 over 4 pods, 4 caps, 128 scatter dirs.
pub fn mc_options(log_dir: &Path) -> Vec<ConfigOption> {
    vec![
        ConfigOption::int("n", 10),
        ConfigOption::int("e", 2),
        ConfigOption::int("num_pods", 4),
        ConfigOption::int("num_cap", 4),
        ConfigOption::int("scatter_width", 128),
        ConfigOption::new("degraded_log_dir", &log_dir.to_string_lossy()),
    ]
}

/// Block path format of an MC repository rooted at `root`.
pub fn mc_format(root: &Path) -> String {
    format!("{}/pod%d/block%s/cap%d/scatter%d", root.to_string_lossy())
}

/// A fresh handle for `objid` in repository `repo` with host field `host`.
pub fn handle(repo: &str, host: &str, objid: &str) -> FileHandle {
    let repo = Arc::new(Repo {
        name: repo.to_string(),
        host: host.to_string(),
    });
    let ns = Arc::new(Namespace {
        name: "ns".to_string(),
    });
    FileHandle::new(ObjectLocation::new(repo, ns, objid))
}

/// A registry with the built-ins, wired to `engine`.
pub fn registry_with_engine(engine: Arc<dyn ErasureEngine>) -> DalRegistry {
    let registry = DalRegistry::with_builtins();
    registry.set_collaborators(Collaborators {
        object_store: Arc::new(MemObjectStore::new()),
        ec_engine: engine,
    });
    registry
}
