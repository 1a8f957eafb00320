//! No-op driver.
//!
//! Moves no data: puts and gets only advance the byte counter, so the
//! cost of the metadata path can be measured on its own.

use crate::config::ConfigOption;
use crate::context::{default_destroy, default_init, DalContext};
use crate::dal::Dal;
use crate::error::DalResult;
use crate::handle::{FileHandle, OpenParams};
use crate::object::reject_options;

/// Driver that performs no data action.
pub struct NoopDal {
    name: String,
}

impl NoopDal {
    /// Configures the driver. It takes no options.
    pub fn configure(name: &str, opts: &[ConfigOption]) -> DalResult<Self> {
        reject_options(name, opts)?;
        Ok(Self {
            name: name.to_string(),
        })
    }
}

impl Dal for NoopDal {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, fh: &mut FileHandle) -> DalResult<DalContext> {
        default_init(fh)
    }

    fn destroy(&self, ctx: DalContext) -> DalResult<()> {
        default_destroy(ctx)
    }

    fn open(&self, _ctx: &mut DalContext, _fh: &mut FileHandle, _params: OpenParams) -> DalResult<()> {
        Ok(())
    }

    fn put(&self, _ctx: &mut DalContext, fh: &mut FileHandle, buf: &[u8]) -> DalResult<usize> {
        fh.os.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn get(&self, _ctx: &mut DalContext, fh: &mut FileHandle, buf: &mut [u8]) -> DalResult<usize> {
        fh.os.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn sync(&self, _ctx: &mut DalContext, _fh: &mut FileHandle) -> DalResult<()> {
        Ok(())
    }

    fn abort(&self, _ctx: &mut DalContext, _fh: &mut FileHandle) -> DalResult<()> {
        Ok(())
    }

    fn close(&self, _ctx: &mut DalContext, _fh: &mut FileHandle) -> DalResult<()> {
        Ok(())
    }

    fn delete(&self, _ctx: &mut DalContext, _fh: &mut FileHandle) -> DalResult<()> {
        Ok(())
    }

    fn update_object_location(&self, ctx: &mut DalContext, _fh: &mut FileHandle) -> DalResult<()> {
        ctx.set_location_computed();
        Ok(())
    }
}
