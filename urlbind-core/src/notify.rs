//! Per-thread notification channel used to wake a binding's owning thread.
//!
//! Every thread that creates bindings lazily gets one channel. Each
//! [`NotifyWindow`] is a counted registration on the channel of the thread
//! that acquired it; the channel is torn down when the last registration is
//! released. Messages posted from any thread are only ever executed by the
//! owning thread, when it calls one of the `pump_*` functions.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

/// Work delivered to the owning thread. The posted `Arc` is the reference
/// that keeps the target alive while the wakeup is in flight; it is dropped
/// once `run` returns.
pub trait PendingWork: Send + Sync {
    fn run(self: Arc<Self>);
}

enum Message {
    Run(Arc<dyn PendingWork>),
    /// A registration dropped on a foreign thread.
    Release,
}

struct Channel {
    id: u64,
    owner: ThreadId,
    tx: Sender<Message>,
}

struct ThreadState {
    channel: Arc<Channel>,
    rx: Receiver<Message>,
    registrations: usize,
}

thread_local! {
    static THREAD_STATE: RefCell<Option<ThreadState>> = const { RefCell::new(None) };
}

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// A registration on the current thread's notification channel.
pub struct NotifyWindow {
    channel: Arc<Channel>,
}

impl NotifyWindow {
    /// Register on the calling thread's channel, creating it if needed.
    pub fn acquire() -> Self {
        THREAD_STATE.with(|state| {
            let mut state = state.borrow_mut();
            let state = state.get_or_insert_with(|| {
                let (tx, rx) = crossbeam_channel::unbounded();
                let channel = Arc::new(Channel {
                    id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
                    owner: thread::current().id(),
                    tx,
                });
                tracing::debug!(channel = channel.id, "created notification channel");
                ThreadState {
                    channel,
                    rx,
                    registrations: 0,
                }
            });
            state.registrations += 1;
            NotifyWindow {
                channel: Arc::clone(&state.channel),
            }
        })
    }

    pub fn id(&self) -> u64 {
        self.channel.id
    }

    pub fn owner(&self) -> ThreadId {
        self.channel.owner
    }

    /// Queue `work` for the owning thread. Returns false if that thread has
    /// exited; `work` is dropped in that case.
    pub fn post(&self, work: Arc<dyn PendingWork>) -> bool {
        self.channel.tx.send(Message::Run(work)).is_ok()
    }
}

impl Drop for NotifyWindow {
    fn drop(&mut self) {
        if thread::current().id() == self.channel.owner {
            release_local(self.channel.id);
        } else if self.channel.tx.send(Message::Release).is_err() {
            tracing::trace!(channel = self.channel.id, "owning thread gone, release dropped");
        }
    }
}

fn release_local(id: u64) {
    // The thread-local may already be destroyed during thread exit.
    let _ = THREAD_STATE.try_with(|state| {
        let retired = {
            let mut slot = state.borrow_mut();
            match slot.as_mut() {
                Some(current) if current.channel.id == id => {
                    current.registrations = current.registrations.saturating_sub(1);
                    if current.registrations == 0 {
                        slot.take()
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        if let Some(retired) = retired {
            tracing::debug!(channel = retired.channel.id, "destroyed notification channel");
        }
    });
}

fn current_channel() -> Option<(u64, Receiver<Message>)> {
    THREAD_STATE
        .try_with(|state| {
            state
                .borrow()
                .as_ref()
                .map(|s| (s.channel.id, s.rx.clone()))
        })
        .ok()
        .flatten()
}

fn dispatch(id: u64, message: Message) {
    match message {
        Message::Run(work) => work.run(),
        Message::Release => release_local(id),
    }
}

/// Run every message already queued for the calling thread without
/// blocking. Returns the number of messages processed.
pub fn pump_pending() -> usize {
    let Some((id, rx)) = current_channel() else {
        return 0;
    };
    let mut processed = 0;
    while let Ok(message) = rx.try_recv() {
        dispatch(id, message);
        processed += 1;
    }
    processed
}

/// Block up to `timeout` for one message and run it. Returns true if a
/// message was processed.
pub fn pump_one(timeout: Duration) -> bool {
    let Some((id, rx)) = current_channel() else {
        return false;
    };
    match rx.recv_timeout(timeout) {
        Ok(message) => {
            dispatch(id, message);
            true
        }
        Err(_) => false,
    }
}

/// Pump messages until `done` returns true or `timeout` elapses. Returns
/// the final value of `done`.
pub fn pump_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    let Some((id, rx)) = current_channel() else {
        return done();
    };
    loop {
        if done() {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match rx.recv_timeout(remaining) {
            Ok(message) => dispatch(id, message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return done(),
        }
    }
}

/// Registrations currently held on the calling thread's channel.
pub fn registrations() -> usize {
    THREAD_STATE
        .try_with(|state| state.borrow().as_ref().map_or(0, |s| s.registrations))
        .unwrap_or(0)
}
