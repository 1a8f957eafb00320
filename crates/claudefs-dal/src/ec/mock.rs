//! Scriptable in-memory erasure engine for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{BlockPathRenderer, EcHandle, EcMode, EcOpenRequest, ErasureEngine};
use crate::error::{DalError, DalResult};

/// A call observed by [`MockErasureEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// A stripe was opened.
    Open {
        /// Path template.
        template: String,
        /// Read or write.
        mode: EcMode,
        /// First block.
        start_block: u32,
        /// Data blocks.
        n: u32,
        /// Erasure blocks.
        e: u32,
    },
    /// Bytes were written.
    Write {
        /// Length of the write.
        len: usize,
    },
    /// Bytes were read.
    Read {
        /// Requested offset.
        offset: u64,
        /// Bytes returned.
        len: usize,
    },
    /// A handle was closed.
    Close {
        /// Value returned to the caller.
        result: i32,
    },
    /// An object was deleted.
    Delete {
        /// Path template.
        template: String,
        /// Blocks deleted.
        nblocks: u32,
    },
}

#[derive(Default)]
struct MockState {
    events: Vec<MockEvent>,
    close_results: VecDeque<i32>,
    objects: HashMap<String, Vec<u8>>,
    fail_open: bool,
}

/// Engine that keeps objects in memory, records every call and returns
/// scripted close results.
#[derive(Clone, Default)]
pub struct MockErasureEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockErasureEngine {
    /// Creates an engine whose closes all return 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the result of the next close.
    pub fn push_close_result(&self, result: i32) {
        self.state.lock().close_results.push_back(result);
    }

    /// Makes every subsequent open fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Stores `data` as the object at `template`.
    pub fn insert_object(&self, template: &str, data: &[u8]) {
        self.state
            .lock()
            .objects
            .insert(template.to_string(), data.to_vec());
    }

    /// Returns the object written at `template`.
    pub fn object(&self, template: &str) -> Option<Vec<u8>> {
        self.state.lock().objects.get(template).cloned()
    }

    /// All calls so far, in order.
    pub fn events(&self) -> Vec<MockEvent> {
        self.state.lock().events.clone()
    }

    /// Number of calls recorded.
    pub fn call_count(&self) -> usize {
        self.state.lock().events.len()
    }
}

struct MockHandle {
    state: Arc<Mutex<MockState>>,
    template: String,
    mode: EcMode,
    buf: Vec<u8>,
}

impl EcHandle for MockHandle {
    fn write(&mut self, buf: &[u8]) -> DalResult<usize> {
        self.buf.extend_from_slice(buf);
        self.state.lock().events.push(MockEvent::Write { len: buf.len() });
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> DalResult<usize> {
        let start = (offset as usize).min(self.buf.len());
        let n = buf.len().min(self.buf.len() - start);
        buf[..n].copy_from_slice(&self.buf[start..start + n]);
        self.state
            .lock()
            .events
            .push(MockEvent::Read { offset, len: n });
        Ok(n)
    }

    fn close(self: Box<Self>) -> i32 {
        let mut state = self.state.lock();
        let result = state.close_results.pop_front().unwrap_or(0);
        if self.mode == EcMode::Write && result >= 0 {
            state.objects.insert(self.template.clone(), self.buf.clone());
        }
        state.events.push(MockEvent::Close { result });
        debug!("mock close of {} -> {}", self.template, result);
        result
    }
}

impl ErasureEngine for MockErasureEngine {
    fn open(&self, req: EcOpenRequest) -> DalResult<Box<dyn EcHandle>> {
        let mut state = self.state.lock();
        state.events.push(MockEvent::Open {
            template: req.template.clone(),
            mode: req.mode,
            start_block: req.start_block,
            n: req.n,
            e: req.e,
        });
        if state.fail_open {
            return Err(DalError::Engine {
                path: req.template,
                reason: "scripted open failure".to_string(),
            });
        }
        let buf = match req.mode {
            EcMode::Write => Vec::new(),
            EcMode::Read => state.objects.get(&req.template).cloned().ok_or_else(|| {
                DalError::Engine {
                    path: req.template.clone(),
                    reason: "no such object".to_string(),
                }
            })?,
        };
        Ok(Box::new(MockHandle {
            state: Arc::clone(&self.state),
            template: req.template,
            mode: req.mode,
            buf,
        }))
    }

    fn delete(&self, template: &str, nblocks: u32, _renderer: &dyn BlockPathRenderer) -> DalResult<()> {
        let mut state = self.state.lock();
        state.events.push(MockEvent::Delete {
            template: template.to_string(),
            nblocks,
        });
        state.objects.remove(template);
        Ok(())
    }
}
