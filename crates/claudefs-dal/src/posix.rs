//! Local-file driver.
//!
//! Objects are stored as plain files under
//! `<repo.host>/<repo.name>/<namespace>/<flattened objid>`.

use std::fs::{DirBuilder, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::config::ConfigOption;
use crate::context::{ContextState, DalContext};
use crate::dal::Dal;
use crate::error::{DalError, DalResult};
use crate::handle::{FileHandle, OpenParams, StreamFlags};
use crate::object::reject_options;
use crate::template::flatten_objid;

const DIR_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o600;

/// Per-stream state of the local-file driver.
#[derive(Debug, Default)]
pub struct PosixState {
    file: Option<File>,
    path: PathBuf,
}

impl PosixState {
    /// Path computed by `update_object_location`.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn state_mut(ctx: &mut DalContext) -> DalResult<&mut PosixState> {
    match ctx.state_mut() {
        ContextState::Posix(state) => Ok(state),
        _ => Err(DalError::ContextMismatch { expected: "POSIX" }),
    }
}

fn ensure_dir(path: &Path) -> DalResult<()> {
    match DirBuilder::new().mode(DIR_MODE).create(path) {
        Ok(()) => {
            info!("created POSIX repo directory {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => {
            error!("failed to create {}: {}", path.display(), e);
            Err(e.into())
        }
    }
}

/// Driver storing each object as one local file.
pub struct PosixDal {
    name: String,
}

impl PosixDal {
    /// Configures the driver. It takes no options.
    pub fn configure(name: &str, opts: &[ConfigOption]) -> DalResult<Self> {
        reject_options(name, opts)?;
        Ok(Self {
            name: name.to_string(),
        })
    }

    fn close_file(state: &mut PosixState, fh: &mut FileHandle) {
        // dropping the File closes the descriptor
        state.file = None;
        fh.os.mark_closed();
    }
}

impl Dal for PosixDal {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, fh: &mut FileHandle) -> DalResult<DalContext> {
        let loc = &fh.location;
        let repo_dir = Path::new(&loc.repo.host).join(&loc.repo.name);
        ensure_dir(&repo_dir)?;
        ensure_dir(&repo_dir.join(&loc.ns.name))?;
        Ok(DalContext::new(ContextState::Posix(PosixState::default())))
    }

    fn destroy(&self, ctx: DalContext) -> DalResult<()> {
        match ctx.into_state() {
            ContextState::Posix(_) => Ok(()),
            _ => Err(DalError::ContextMismatch { expected: "POSIX" }),
        }
    }

    fn open(&self, ctx: &mut DalContext, fh: &mut FileHandle, params: OpenParams) -> DalResult<()> {
        if !ctx.location_computed() {
            error!("POSIX open without a prior update_object_location");
            return Err(DalError::LocationNotComputed("POSIX"));
        }
        let state = state_mut(ctx)?;
        fh.os.cleanup_for_reopen(params.preserve_write_count);

        let mut opts = OpenOptions::new();
        if params.is_put {
            opts.write(true).create(true).mode(FILE_MODE);
        } else {
            opts.read(true);
        }
        let mut file = opts.open(&state.path).map_err(|e| {
            error!("failed to open {}: {}", state.path.display(), e);
            DalError::Io(e)
        })?;

        if params.chunk_offset != 0 {
            file.seek(SeekFrom::Start(params.chunk_offset)).map_err(|e| {
                error!(
                    "seek to {} failed on {}: {}",
                    params.chunk_offset,
                    state.path.display(),
                    e
                );
                DalError::Io(e)
            })?;
        }

        fh.os.flags |= if params.is_put {
            StreamFlags::WRITING
        } else {
            StreamFlags::READING
        };
        fh.os.flags |= StreamFlags::OPEN;
        state.file = Some(file);
        debug!("opened {} (put={})", state.path.display(), params.is_put);
        Ok(())
    }

    fn put(&self, ctx: &mut DalContext, fh: &mut FileHandle, buf: &[u8]) -> DalResult<usize> {
        let state = state_mut(ctx)?;
        let file = state
            .file
            .as_mut()
            .ok_or_else(|| DalError::NotOpen { url: fh.os.url.clone() })?;
        let written = file.write(buf)?;
        fh.os.written += written as u64;
        Ok(written)
    }

    fn get(&self, ctx: &mut DalContext, fh: &mut FileHandle, buf: &mut [u8]) -> DalResult<usize> {
        let state = state_mut(ctx)?;
        let file = state
            .file
            .as_mut()
            .ok_or_else(|| DalError::NotOpen { url: fh.os.url.clone() })?;
        let read = file.read(buf)?;
        if read == 0 {
            fh.os.flags |= StreamFlags::EOF;
        }
        fh.os.written += read as u64;
        Ok(read)
    }

    fn sync(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        let state = state_mut(ctx)?;
        if !fh.os.is_open() {
            error!("{} isn't open", fh.os.url);
            return Err(DalError::NotOpen { url: fh.os.url.clone() });
        }
        if let Some(file) = state.file.as_ref() {
            file.sync_all()?;
        }
        Self::close_file(state, fh);
        Ok(())
    }

    fn abort(&self, _ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        if !fh.os.is_open() {
            error!("abort: {} isn't open", fh.os.url);
            return Err(DalError::NotOpen { url: fh.os.url.clone() });
        }
        // nothing has been written yet, so there is nothing to undo
        fh.os.flags |= StreamFlags::ABORT;
        Ok(())
    }

    fn close(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        let state = state_mut(ctx)?;
        if !fh.os.is_open() {
            return Ok(());
        }
        Self::close_file(state, fh);
        Ok(())
    }

    fn delete(&self, ctx: &mut DalContext, _fh: &mut FileHandle) -> DalResult<()> {
        if !ctx.location_computed() {
            return Err(DalError::LocationNotComputed("POSIX"));
        }
        let state = state_mut(ctx)?;
        std::fs::remove_file(&state.path)?;
        Ok(())
    }

    fn update_object_location(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        let loc = &fh.location;
        let dir = Path::new(&loc.repo.host)
            .join(&loc.repo.name)
            .join(&loc.ns.name);
        info!("POSIX repo top level dir: {}", dir.display());

        let path = dir.join(flatten_objid(&loc.objid));
        debug!("generated path: {}", path.display());

        let state = state_mut(ctx)?;
        fh.os.url = path.display().to_string();
        state.path = path;
        ctx.set_location_computed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Namespace, ObjectLocation, Repo};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn handle(root: &Path, objid: &str) -> FileHandle {
        let repo = Arc::new(Repo {
            name: "repo1".to_string(),
            host: root.display().to_string(),
        });
        let ns = Arc::new(Namespace {
            name: "projects".to_string(),
        });
        FileHandle::new(ObjectLocation::new(repo, ns, objid))
    }

    #[test]
    fn test_init_creates_directories_idempotently() {
        let dir = tempdir().unwrap();
        let dal = PosixDal::configure("POSIX", &[]).unwrap();
        let mut fh = handle(dir.path(), "obj");

        let ctx = dal.init(&mut fh).unwrap();
        assert!(dir.path().join("repo1/projects").is_dir());
        dal.destroy(ctx).unwrap();

        let ctx = dal.init(&mut fh).unwrap();
        dal.destroy(ctx).unwrap();
    }

    #[test]
    fn test_path_is_flattened() {
        let dir = tempdir().unwrap();
        let dal = PosixDal::configure("POSIX", &[]).unwrap();
        let mut fh = handle(dir.path(), "ver.001/uid/file.0");
        let mut ctx = dal.init(&mut fh).unwrap();
        dal.update_object_location(&mut ctx, &mut fh).unwrap();

        let ContextState::Posix(state) = ctx.state() else {
            panic!("expected POSIX state");
        };
        assert_eq!(
            state.path(),
            dir.path().join("repo1/projects/ver.001#uid#file.0")
        );
    }

    #[test]
    fn test_open_before_location_fails_without_side_effects() {
        let dir = tempdir().unwrap();
        let dal = PosixDal::configure("POSIX", &[]).unwrap();
        let mut fh = handle(dir.path(), "obj");
        let mut ctx = dal.init(&mut fh).unwrap();

        let err = dal.open(&mut ctx, &mut fh, OpenParams::write()).unwrap_err();
        assert!(matches!(err, DalError::LocationNotComputed(_)));
        assert!(!fh.os.is_open());
        let entries = std::fs::read_dir(dir.path().join("repo1/projects")).unwrap();
        assert_eq!(entries.count(), 0);
    }

    #[test]
    fn test_write_sync_read_roundtrip() {
        let dir = tempdir().unwrap();
        let dal = PosixDal::configure("POSIX", &[]).unwrap();
        let mut fh = handle(dir.path(), "a/b");

        let mut ctx = dal.init(&mut fh).unwrap();
        dal.update_object_location(&mut ctx, &mut fh).unwrap();
        dal.open(&mut ctx, &mut fh, OpenParams::write()).unwrap();
        assert_eq!(dal.put(&mut ctx, &mut fh, b"0123456789").unwrap(), 10);
        dal.sync(&mut ctx, &mut fh).unwrap();
        assert!(!fh.os.is_open());
        assert!(matches!(
            dal.put(&mut ctx, &mut fh, b"x"),
            Err(DalError::NotOpen { .. })
        ));
        dal.close(&mut ctx, &mut fh).unwrap();
        dal.destroy(ctx).unwrap();

        let mut ctx = dal.init(&mut fh).unwrap();
        dal.update_object_location(&mut ctx, &mut fh).unwrap();
        dal.open(&mut ctx, &mut fh, OpenParams::read().at_offset(4)).unwrap();
        let mut buf = [0u8; 32];
        let n = dal.get(&mut ctx, &mut fh, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"456789");
        assert_eq!(dal.get(&mut ctx, &mut fh, &mut buf).unwrap(), 0);
        assert!(fh.os.flags.contains(StreamFlags::EOF));
        dal.close(&mut ctx, &mut fh).unwrap();
        dal.destroy(ctx).unwrap();
    }

    #[test]
    fn test_resumed_write_at_offset() {
        let dir = tempdir().unwrap();
        let dal = PosixDal::configure("POSIX", &[]).unwrap();
        let mut fh = handle(dir.path(), "obj");
        let mut ctx = dal.init(&mut fh).unwrap();
        dal.update_object_location(&mut ctx, &mut fh).unwrap();

        dal.open(&mut ctx, &mut fh, OpenParams::write()).unwrap();
        dal.put(&mut ctx, &mut fh, b"aaaa").unwrap();
        dal.sync(&mut ctx, &mut fh).unwrap();

        dal.open(&mut ctx, &mut fh, OpenParams::write().at_offset(4)).unwrap();
        dal.put(&mut ctx, &mut fh, b"bbbb").unwrap();
        dal.sync(&mut ctx, &mut fh).unwrap();

        let data = std::fs::read(dir.path().join("repo1/projects/obj")).unwrap();
        assert_eq!(data, b"aaaabbbb");
    }

    #[test]
    fn test_sync_and_abort_require_open() {
        let dir = tempdir().unwrap();
        let dal = PosixDal::configure("POSIX", &[]).unwrap();
        let mut fh = handle(dir.path(), "obj");
        let mut ctx = dal.init(&mut fh).unwrap();
        dal.update_object_location(&mut ctx, &mut fh).unwrap();
        assert!(dal.sync(&mut ctx, &mut fh).is_err());
        assert!(dal.abort(&mut ctx, &mut fh).is_err());

        dal.open(&mut ctx, &mut fh, OpenParams::write()).unwrap();
        dal.abort(&mut ctx, &mut fh).unwrap();
        assert!(fh.os.flags.contains(StreamFlags::ABORT));
        dal.close(&mut ctx, &mut fh).unwrap();
        dal.close(&mut ctx, &mut fh).unwrap();
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = tempdir().unwrap();
        let dal = PosixDal::configure("POSIX", &[]).unwrap();
        let mut fh = handle(dir.path(), "obj");
        let mut ctx = dal.init(&mut fh).unwrap();
        dal.update_object_location(&mut ctx, &mut fh).unwrap();
        dal.open(&mut ctx, &mut fh, OpenParams::write()).unwrap();
        dal.put(&mut ctx, &mut fh, b"x").unwrap();
        dal.sync(&mut ctx, &mut fh).unwrap();

        let path = dir.path().join("repo1/projects/obj");
        assert!(path.exists());
        dal.delete(&mut ctx, &mut fh).unwrap();
        assert!(!path.exists());
    }
}
