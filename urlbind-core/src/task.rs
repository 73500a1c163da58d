//! Deferred notifications waiting for the owning thread.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::status::{BindStatus, BscFlags, ProtocolData};

/// Work recorded on a foreign thread and replayed on the owning thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Task {
    /// Hand the snapshot back to the inner protocol's `continue_with`.
    Continue(ProtocolData),
    /// Deliver a progress notification to the consumer sink.
    Progress {
        status: BindStatus,
        text: Option<String>,
    },
    /// Deliver a data notification to the consumer sink.
    Data {
        flags: BscFlags,
        progress: u64,
        progress_max: u64,
    },
}

/// FIFO queue guarded by a single mutex.
///
/// The lock is held only for the push/pop itself; callers run popped items
/// after it has been released.
pub(crate) struct TaskQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> TaskQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Append `item`. Returns true when the queue was empty before, which is
    /// the one transition that requires waking the owning thread.
    pub(crate) fn push(&self, item: T) -> bool {
        let mut items = self.items.lock();
        let was_empty = items.is_empty();
        items.push_back(item);
        was_empty
    }

    pub(crate) fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }
}
