//! Filter slots and the byte buffers passed between them

use std::sync::Arc;
use std::time::Duration;

use crate::filter::{Filter, FilterInstance};

/// Input bytes handed to a slot, with a read position
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBuf {
    data: Vec<u8>,
    pos: usize,
}

impl DataBuf {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Unconsumed bytes
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark `n` bytes as consumed
    pub fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.data.len());
    }

    pub fn consume_all(&mut self) {
        self.pos = self.data.len();
    }

    /// Take the unconsumed bytes, leaving the buffer empty
    pub fn take(&mut self) -> Vec<u8> {
        let mut data = std::mem::take(&mut self.data);
        if self.pos > 0 {
            data.drain(..self.pos);
        }
        self.pos = 0;
        data
    }

    /// Append bytes after the unconsumed ones
    pub fn append(&mut self, mut more: Vec<u8>) {
        if self.is_empty() {
            self.data = more;
            self.pos = 0;
            return;
        }
        self.data.append(&mut more);
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.pos = 0;
    }
}

/// Opaque handle to a slot, returned by the chain mutation operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle(pub(crate) crate::chain::SlotId);

/// Runtime wrapper of one filter in a track chain
pub(crate) struct FilterSlot {
    pub(crate) name: Arc<str>,
    pub(crate) filter: Arc<dyn Filter>,
    pub(crate) instance: Option<Box<dyn FilterInstance>>,
    pub(crate) opened: bool,
    pub(crate) is_chain_head: bool,
    pub(crate) is_chain_tail_done: bool,
    /// Upstream announced its last output with `NextDone`
    pub(crate) upstream_done: bool,
    pub(crate) pending: DataBuf,
    /// The next call delivers new input
    pub(crate) new_data: bool,
    /// Last status was `Ok`: the slot consumed its input and wants more
    pub(crate) want_input: bool,
    pub(crate) elapsed: Duration,
}

impl FilterSlot {
    pub(crate) fn new(filter: Arc<dyn Filter>) -> Self {
        Self {
            name: Arc::from(filter.name()),
            filter,
            instance: None,
            opened: false,
            is_chain_head: false,
            is_chain_tail_done: false,
            upstream_done: false,
            pending: DataBuf::default(),
            new_data: false,
            want_input: false,
            elapsed: Duration::ZERO,
        }
    }
}
