//! Protocol binding proxy for URL-addressed resources.
//!
//! A [`BindingProxy`] sits between a binding consumer and the concrete
//! protocol handler that serves a URL scheme. It starts the handler with
//! itself installed as the handler's sink, so every progress/data/result
//! callback passes through the proxy before reaching the consumer.
//!
//! Handlers are free to call back from worker threads. When a binding is
//! started with [`PiFlags::APARTMENT_THREADED`], the proxy defers those
//! callbacks into a FIFO task queue and wakes the thread that created it
//! through a per-thread [`notify`] channel. The owning thread runs the queued
//! work when it pumps that channel.

pub mod bind;
pub mod error;
pub mod notify;
pub mod protocol;
pub mod registry;
pub mod status;
mod task;

pub use bind::{BindOptions, BindState, BindingProxy};
pub use error::{BindError, Result};
pub use protocol::{
    BindInfo, BindInfoData, BindOutcome, BindVerb, HandlerResolver, Priority, Protocol,
    ProtocolFactory, ProtocolSink, ReadOutcome, ResolvedHandler, SERVICE_PROTOCOL, SeekOrigin,
    ServiceObject, ServiceProvider, WinInetInfo,
};
pub use registry::SchemeRegistry;
pub use status::{BindFlags, BindStatus, BindStringKind, BscFlags, PiFlags, ProtocolData};
