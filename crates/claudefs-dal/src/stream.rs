//! One object stream driven through a configured driver.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::context::DalContext;
use crate::dal::Dal;
use crate::error::{DalError, DalResult};
use crate::handle::{FileHandle, OpenParams};
use crate::mc::Placement;

/// Bundles a driver, the caller's handle and the stream context.
///
/// The context is created on construction and destroyed exactly once,
/// by [`finish`](Self::finish) or, failing that, on drop.
pub struct DalStream {
    dal: Arc<dyn Dal>,
    fh: FileHandle,
    ctx: Option<DalContext>,
}

impl DalStream {
    /// Runs the driver's `init` for `fh`.
    pub fn new(dal: Arc<dyn Dal>, mut fh: FileHandle) -> DalResult<Self> {
        let ctx = dal.init(&mut fh)?;
        trace!("{} stream for {} initialized", dal.name(), fh);
        Ok(Self {
            dal,
            fh,
            ctx: Some(ctx),
        })
    }

    /// The caller's handle.
    pub fn handle(&self) -> &FileHandle {
        &self.fh
    }

    /// The driver.
    pub fn dal(&self) -> &Arc<dyn Dal> {
        &self.dal
    }

    /// Placement of the stream, if the driver places objects.
    pub fn placement(&self) -> Option<Placement> {
        self.ctx.as_ref().and_then(|ctx| self.dal.placement(ctx))
    }

    fn parts(&mut self) -> DalResult<(&dyn Dal, &mut DalContext, &mut FileHandle)> {
        match self.ctx.as_mut() {
            Some(ctx) => Ok((self.dal.as_ref(), ctx, &mut self.fh)),
            None => Err(DalError::ContextMismatch { expected: "stream" }),
        }
    }

    /// Computes the physical location.
    pub fn update_object_location(&mut self) -> DalResult<()> {
        let (dal, ctx, fh) = self.parts()?;
        dal.update_object_location(ctx, fh)
    }

    /// Opens the stream.
    pub fn open(&mut self, params: OpenParams) -> DalResult<()> {
        let (dal, ctx, fh) = self.parts()?;
        dal.open(ctx, fh, params)
    }

    /// Writes `buf`.
    pub fn put(&mut self, buf: &[u8]) -> DalResult<usize> {
        let (dal, ctx, fh) = self.parts()?;
        dal.put(ctx, fh, buf)
    }

    /// Writes all of `buf`, looping over short writes.
    pub fn put_all(&mut self, mut buf: &[u8]) -> DalResult<()> {
        while !buf.is_empty() {
            let n = self.put(buf)?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "driver accepted no bytes",
                )
                .into());
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Reads into `buf`; 0 at end of data.
    pub fn get(&mut self, buf: &mut [u8]) -> DalResult<usize> {
        let (dal, ctx, fh) = self.parts()?;
        dal.get(ctx, fh, buf)
    }

    /// Reads until end of data.
    pub fn get_to_end(&mut self, out: &mut Vec<u8>) -> DalResult<usize> {
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0;
        loop {
            let n = self.get(&mut buf)?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&buf[..n]);
            total += n;
        }
    }

    /// Completes all I/O.
    pub fn sync(&mut self) -> DalResult<()> {
        let (dal, ctx, fh) = self.parts()?;
        dal.sync(ctx, fh)
    }

    /// Abandons the stream.
    pub fn abort(&mut self) -> DalResult<()> {
        let (dal, ctx, fh) = self.parts()?;
        dal.abort(ctx, fh)
    }

    /// Closes the stream.
    pub fn close(&mut self) -> DalResult<()> {
        let (dal, ctx, fh) = self.parts()?;
        dal.close(ctx, fh)
    }

    /// Deletes the object.
    pub fn delete(&mut self) -> DalResult<()> {
        let (dal, ctx, fh) = self.parts()?;
        dal.delete(ctx, fh)
    }

    /// Destroys the context, returning the handle.
    pub fn finish(mut self) -> DalResult<FileHandle> {
        if let Some(ctx) = self.ctx.take() {
            self.dal.destroy(ctx)?;
        }
        let placeholder = FileHandle::new(self.fh.location.clone());
        Ok(std::mem::replace(&mut self.fh, placeholder))
    }
}

impl Drop for DalStream {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            if let Err(e) = self.dal.destroy(ctx) {
                warn!("destroying {} context for {} failed: {}", self.dal.name(), self.fh, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepoDalConfig;
    use crate::dal::DalOp;
    use crate::handle::{Namespace, ObjectLocation, Repo};
    use crate::nop::NoopDal;
    use crate::posix::PosixDal;
    use crate::registry::{DalDescriptor, DalRegistry, DalTable};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle(host: &str) -> FileHandle {
        let repo = Arc::new(Repo {
            name: "repo".to_string(),
            host: host.to_string(),
        });
        let ns = Arc::new(Namespace {
            name: "ns".to_string(),
        });
        FileHandle::new(ObjectLocation::new(repo, ns, "dir/obj"))
    }

    #[test]
    fn test_posix_stream_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let dal: Arc<dyn Dal> = Arc::new(PosixDal::configure("POSIX", &[]).unwrap());
        let host = dir.path().to_string_lossy().into_owned();

        let mut s = DalStream::new(dal.clone(), handle(&host)).unwrap();
        s.update_object_location().unwrap();
        s.open(OpenParams::write()).unwrap();
        s.put_all(b"hello stream").unwrap();
        s.sync().unwrap();
        s.close().unwrap();
        let fh = s.finish().unwrap();
        assert_eq!(fh.os.written, 12);

        let mut s = DalStream::new(dal, handle(&host)).unwrap();
        s.update_object_location().unwrap();
        s.open(OpenParams::read()).unwrap();
        let mut out = Vec::new();
        assert_eq!(s.get_to_end(&mut out).unwrap(), 12);
        assert_eq!(out, b"hello stream");
        s.close().unwrap();
    }

    #[test]
    fn test_destroy_runs_once() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counter = destroyed.clone();
        let noop: Arc<dyn Dal> = Arc::new(NoopDal::configure("NO_OP", &[]).unwrap());
        let table = DalTable::from_dal(noop)
            .clear(DalOp::Destroy)
            .with_destroy(move |_ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        let reg = DalRegistry::new();
        reg.install(DalDescriptor::table("COUNTING", table)).unwrap();
        let dal = reg
            .configure(&RepoDalConfig {
                dal: "COUNTING".to_string(),
                options: vec![],
            })
            .unwrap();

        let s = DalStream::new(dal.clone(), handle("/unused")).unwrap();
        s.finish().unwrap();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);

        {
            let _s = DalStream::new(dal, handle("/unused")).unwrap();
        }
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    }
}
