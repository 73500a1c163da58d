//! urlbind-probe: runs one binding end to end through a [`BindingProxy`].
//!
//! The `mem:` handler serves resources described in the probe config. Its
//! I/O runs on a shared tokio runtime, so progress arrives on runtime worker
//! threads and exercises the proxy's owning-thread redirection.
//!
//! [`BindingProxy`]: urlbind_core::BindingProxy

pub mod config;
pub mod consumer;
pub mod event;
pub mod memory;

use once_cell::sync::Lazy;

/// Shared tokio runtime for handler I/O.
/// Two worker threads; the probe binds one resource at a time.
pub(crate) static RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("urlbind-io")
        .build()
        .expect("Failed to create tokio runtime")
});
