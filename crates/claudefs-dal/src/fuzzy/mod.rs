//! Fault-injection wrapper driver.
//!
//! FUZZY wraps another configured driver and consults its fault rules
//! before open, read (get), write (put) and close. Driver-level rules are
//! matched against the wrapped stream's placement; block-level rules are
//! handed to the wrapped driver's stream so its erasure engine consults
//! them per block. Everything else forwards unchanged.
//!
//! Options: `wrap` (required) names the wrapped driver, each `rule` adds
//! one rule (see [`rules`]), every other key is passed to the wrapped
//! driver's configuration.

pub mod rules;

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{ConfigOption, RepoDalConfig};
use crate::context::{ContextState, DalContext};
use crate::dal::Dal;
use crate::ec::IoKind;
use crate::error::{DalError, DalResult};
use crate::handle::{FileHandle, OpenParams};
use crate::mc::Placement;
use crate::registry::DalRegistry;

pub use rules::{FaultRule, RuleSet, Verdict};

/// Per-stream state of the wrapper: the wrapped driver's own context.
#[derive(Debug)]
pub struct FuzzyState {
    inner: Box<DalContext>,
}

impl FuzzyState {
    /// The wrapped driver's context.
    pub fn inner(&self) -> &DalContext {
        &self.inner
    }
}

/// Driver injecting faults into a wrapped driver.
pub struct FuzzyDal {
    name: String,
    inner: Arc<dyn Dal>,
    rules: Arc<RuleSet>,
}

impl FuzzyDal {
    /// Configures the wrapper, configuring the wrapped driver through
    /// `registry`.
    pub fn configure(name: &str, opts: &[ConfigOption], registry: &DalRegistry) -> DalResult<Self> {
        let mut wrap = None;
        let mut rule_texts = Vec::new();
        let mut passthrough = Vec::new();
        for opt in opts {
            match opt.key.as_str() {
                "wrap" => wrap = Some(opt.as_str()),
                "rule" => rule_texts.push(opt.as_str()),
                _ => passthrough.push(opt.clone()),
            }
        }
        let wrap = wrap.ok_or_else(|| DalError::MissingOption {
            dal: name.to_string(),
            key: "wrap",
        })?;
        let rules = RuleSet::parse(rule_texts.iter().map(String::as_str))?;
        let inner = registry.configure(&RepoDalConfig {
            dal: wrap,
            options: passthrough,
        })?;
        info!(
            "{} wraps {} with {} driver and {} block rules",
            name,
            inner.name(),
            rules.dal_rules().len(),
            rules.block_rules().len()
        );
        Ok(Self::new(name, inner, Arc::new(rules)))
    }

    /// Wraps an already configured driver.
    pub fn new(name: &str, inner: Arc<dyn Dal>, rules: Arc<RuleSet>) -> Self {
        Self {
            name: name.to_string(),
            inner,
            rules,
        }
    }

    /// The wrapped driver.
    pub fn inner(&self) -> &Arc<dyn Dal> {
        &self.inner
    }

    /// Rules of this wrapper.
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn inner_ctx<'a>(ctx: &'a mut DalContext) -> DalResult<&'a mut DalContext> {
        match ctx.state_mut() {
            ContextState::Fuzzy(state) => Ok(&mut state.inner),
            _ => Err(DalError::ContextMismatch { expected: "FUZZY" }),
        }
    }

    fn gate(&self, kind: IoKind, inner: &DalContext, fh: &FileHandle) -> DalResult<()> {
        match self.rules.check_dal(kind, self.inner.placement(inner)) {
            Verdict::Proceed => Ok(()),
            Verdict::Fail(code) => {
                debug!("{} fails {} of {} with {}", self.name, kind, fh, code);
                Err(DalError::Injected { code })
            }
        }
    }
}

impl Dal for FuzzyDal {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, fh: &mut FileHandle) -> DalResult<DalContext> {
        let mut inner = self.inner.init(fh)?;
        if !self.rules.block_rules().is_empty() {
            self.inner.attach_block_rules(&mut inner, Arc::clone(&self.rules));
        }
        Ok(DalContext::new(ContextState::Fuzzy(Box::new(FuzzyState {
            inner: Box::new(inner),
        }))))
    }

    fn destroy(&self, ctx: DalContext) -> DalResult<()> {
        match ctx.into_state() {
            ContextState::Fuzzy(state) => self.inner.destroy(*state.inner),
            _ => Err(DalError::ContextMismatch { expected: "FUZZY" }),
        }
    }

    fn open(&self, ctx: &mut DalContext, fh: &mut FileHandle, params: OpenParams) -> DalResult<()> {
        let inner = Self::inner_ctx(ctx)?;
        self.gate(IoKind::Open, inner, fh)?;
        self.inner.open(inner, fh, params)
    }

    fn put(&self, ctx: &mut DalContext, fh: &mut FileHandle, buf: &[u8]) -> DalResult<usize> {
        let inner = Self::inner_ctx(ctx)?;
        self.gate(IoKind::Write, inner, fh)?;
        self.inner.put(inner, fh, buf)
    }

    fn get(&self, ctx: &mut DalContext, fh: &mut FileHandle, buf: &mut [u8]) -> DalResult<usize> {
        let inner = Self::inner_ctx(ctx)?;
        self.gate(IoKind::Read, inner, fh)?;
        self.inner.get(inner, fh, buf)
    }

    fn sync(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        self.inner.sync(Self::inner_ctx(ctx)?, fh)
    }

    fn abort(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        self.inner.abort(Self::inner_ctx(ctx)?, fh)
    }

    fn close(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        let inner = Self::inner_ctx(ctx)?;
        self.gate(IoKind::Close, inner, fh)?;
        self.inner.close(inner, fh)
    }

    fn delete(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        self.inner.delete(Self::inner_ctx(ctx)?, fh)
    }

    fn update_object_location(&self, ctx: &mut DalContext, fh: &mut FileHandle) -> DalResult<()> {
        let inner = Self::inner_ctx(ctx)?;
        self.inner.update_object_location(inner, fh)?;
        if inner.location_computed() {
            ctx.set_location_computed();
        }
        Ok(())
    }

    fn placement(&self, ctx: &DalContext) -> Option<Placement> {
        match ctx.state() {
            ContextState::Fuzzy(state) => self.inner.placement(&state.inner),
            _ => None,
        }
    }

    fn attach_block_rules(&self, ctx: &mut DalContext, rules: Arc<RuleSet>) {
        if let Ok(inner) = Self::inner_ctx(ctx) {
            self.inner.attach_block_rules(inner, rules);
        }
    }
}
