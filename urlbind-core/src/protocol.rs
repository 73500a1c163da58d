//! Capability traits shared by handlers, consumers and the proxy.
//!
//! Optional capabilities are discovered through `as_*` accessors returning
//! `None` by default. A missing capability is never an error for the proxy.

use std::any::Any;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{BindError, Result};
use crate::status::{BindFlags, BindStatus, BindStringKind, BscFlags, PiFlags, ProtocolData};

/// Final outcome of a binding, as carried by `report_result`.
pub type BindOutcome = Result<(), BindError>;

/// Result of a successful [`Protocol::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes written into the caller's buffer.
    pub read: usize,
    /// No more data will follow.
    pub finished: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

/// A protocol handler, or anything that can stand in for one.
pub trait Protocol: Send + Sync {
    fn start(
        &self,
        url: &str,
        sink: Arc<dyn ProtocolSink>,
        bind_info: Arc<dyn BindInfo>,
        flags: PiFlags,
        reserved: usize,
    ) -> Result<()>;

    /// Resume work previously handed out through [`ProtocolSink::switch`].
    fn continue_with(&self, data: &ProtocolData) -> Result<()>;

    fn abort(&self, reason: BindError, options: u32) -> Result<()>;

    fn terminate(&self, options: u32) -> Result<()>;

    fn suspend(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;

    fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome>;

    fn seek(&self, offset: i64, origin: SeekOrigin) -> Result<u64>;

    fn lock_request(&self, options: u32) -> Result<()>;

    fn unlock_request(&self) -> Result<()>;

    fn as_priority(&self) -> Option<&dyn Priority> {
        None
    }

    fn as_wininet_info(&self) -> Option<Arc<dyn WinInetInfo>> {
        None
    }
}

/// Callbacks a protocol uses to report to its consumer.
pub trait ProtocolSink: Send + Sync {
    /// Ask the consumer to call [`Protocol::continue_with`] with `data`,
    /// typically on a different thread than the caller.
    fn switch(&self, data: &ProtocolData) -> Result<()>;

    fn report_progress(&self, status: BindStatus, text: Option<&str>) -> Result<()>;

    fn report_data(&self, flags: BscFlags, progress: u64, progress_max: u64) -> Result<()>;

    fn report_result(&self, result: BindOutcome, error: u32, text: Option<&str>) -> Result<()>;

    fn as_service_provider(&self) -> Option<Arc<dyn ServiceProvider>> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BindVerb {
    #[default]
    Get,
    Post,
    Put,
    Custom,
}

/// Request description handed out by [`BindInfo::get_bind_info`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindInfoData {
    pub verb: BindVerb,
    pub custom_verb: Option<String>,
    pub extra_info: Option<String>,
    pub post_data: Vec<u8>,
    pub code_page: u32,
}

/// Supplies request parameters to a protocol.
pub trait BindInfo: Send + Sync {
    fn get_bind_info(&self) -> Result<(BindFlags, BindInfoData)>;

    /// Up to `max` values of the requested kind.
    fn get_bind_string(&self, kind: BindStringKind, max: usize) -> Result<Vec<String>>;
}

pub trait Priority: Send + Sync {
    fn set_priority(&self, priority: i32) -> Result<()>;

    fn get_priority(&self) -> Result<i32>;
}

/// Objects a [`ServiceProvider`] can hand out.
#[derive(Clone)]
pub enum ServiceObject {
    /// A ready-made protocol instance to bind through instead of resolving
    /// a handler for the URL scheme.
    Protocol(Arc<dyn Protocol>),
    Other(Arc<dyn Any + Send + Sync>),
}

impl std::fmt::Debug for ServiceObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Protocol(_) => f.write_str("ServiceObject::Protocol"),
            Self::Other(_) => f.write_str("ServiceObject::Other"),
        }
    }
}

pub trait ServiceProvider: Send + Sync {
    fn query_service(&self, service: Uuid) -> Result<ServiceObject>;
}

/// Well-known service id under which a consumer offers a preinstalled
/// protocol (`IID_IInternetProtocol`).
pub const SERVICE_PROTOCOL: Uuid = Uuid::from_u128(0x79eac9e7_baf9_11ce_8c82_00aa004ba90b);

/// Connection-level details exposed by the built-in network handlers.
pub trait WinInetInfo: Send + Sync {
    fn query_option(&self, option: u32) -> Result<Vec<u8>>;
}

/// Creates protocol instances for a scheme.
pub trait ProtocolFactory: Send + Sync {
    /// `outer` is the binding object aggregating the new instance, when the
    /// caller wants the handler to see its identity.
    fn create_instance(&self, outer: Option<Arc<dyn BindInfo>>) -> Result<Arc<dyn Protocol>>;
}

impl<F> ProtocolFactory for F
where
    F: Fn(Option<Arc<dyn BindInfo>>) -> Result<Arc<dyn Protocol>> + Send + Sync,
{
    fn create_instance(&self, outer: Option<Arc<dyn BindInfo>>) -> Result<Arc<dyn Protocol>> {
        self(outer)
    }
}

/// A handler resolved for a URL.
#[derive(Clone)]
pub struct ResolvedHandler {
    pub factory: Arc<dyn ProtocolFactory>,
    pub clsid: Uuid,
    /// Whether the scheme is one of the built-in network schemes.
    pub builtin: bool,
}

pub trait HandlerResolver: Send + Sync {
    fn resolve(&self, url: &str) -> Result<ResolvedHandler>;
}
