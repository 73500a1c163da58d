//! The binding proxy.
//!
//! [`BindingProxy`] implements [`Protocol`] towards the consumer and
//! [`ProtocolSink`], [`BindInfo`], [`Priority`] and [`ServiceProvider`]
//! towards the inner protocol it drives. All of these are the same `Arc`
//! allocation, so every face shares one identity and one reference count.
//!
//! Notifications from the inner protocol either reach the consumer sink
//! directly or, when the binding is apartment threaded and the caller is not
//! allowed to call through, are queued and replayed on the thread that
//! created the proxy.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use arc_swap::ArcSwapOption;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{BindError, Result};
use crate::notify::{NotifyWindow, PendingWork};
use crate::protocol::{
    BindInfo, BindInfoData, BindOutcome, HandlerResolver, Priority, Protocol, ProtocolSink,
    ReadOutcome, SERVICE_PROTOCOL, SeekOrigin, ServiceObject, ServiceProvider, WinInetInfo,
};
use crate::status::{BindFlags, BindStatus, BindStringKind, BscFlags, PiFlags, ProtocolData};
use crate::task::{Task, TaskQueue};

static NEXT_PROXY_ID: AtomicU64 = AtomicU64::new(1);

/// Construction options for a [`BindingProxy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BindOptions {
    /// The proxy is created by the umbrella binding layer itself. Such
    /// proxies create handlers without aggregation and report verified MIME
    /// types as such.
    pub from_urlmon: bool,
    /// Priority handed to the inner protocol at start.
    pub priority: i32,
}

/// Position of a proxy in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BindState {
    Idle = 0,
    Starting = 1,
    Bound = 2,
    ResultReported = 3,
    Terminated = 4,
}

impl BindState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Bound,
            3 => Self::ResultReported,
            4 => Self::Terminated,
            _ => Self::Idle,
        }
    }
}

/// Consumer sink together with the service provider it exposed when it was
/// installed. Swapped as one unit.
struct SinkSlot {
    sink: Arc<dyn ProtocolSink>,
    service_provider: Option<Arc<dyn ServiceProvider>>,
}

pub struct BindingProxy {
    id: u64,
    this: Weak<BindingProxy>,
    resolver: Arc<dyn HandlerResolver>,
    from_urlmon: bool,

    // Released in this order on drop.
    wininet_info: RwLock<Option<Arc<dyn WinInetInfo>>>,
    protocol: RwLock<Option<Arc<dyn Protocol>>>,
    bind_info: RwLock<Option<Arc<dyn BindInfo>>>,
    sink: ArcSwapOption<SinkSlot>,

    priority: AtomicI32,
    pi: AtomicU32,
    state: AtomicU8,
    reported_result: AtomicBool,

    apartment_thread: ThreadId,
    /// Queued tasks currently executing on this proxy.
    continue_calls: AtomicUsize,
    tasks: TaskQueue<Task>,
    notify: NotifyWindow,
}

/// Keeps `continue_calls` raised while a queued task runs, even if it
/// unwinds.
struct ContinueCall<'a>(&'a AtomicUsize);

impl<'a> ContinueCall<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ContinueCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn clsid_string(clsid: Uuid) -> String {
    let mut buf = Uuid::encode_buffer();
    clsid.braced().encode_upper(&mut buf).to_owned()
}

impl BindingProxy {
    /// Create a proxy owned by the calling thread. Handlers are resolved
    /// through `resolver` when the proxy is started.
    pub fn new(resolver: Arc<dyn HandlerResolver>, options: BindOptions) -> Arc<Self> {
        let proxy = Arc::new_cyclic(|this| Self {
            id: NEXT_PROXY_ID.fetch_add(1, Ordering::Relaxed),
            this: this.clone(),
            resolver,
            from_urlmon: options.from_urlmon,
            wininet_info: RwLock::new(None),
            protocol: RwLock::new(None),
            bind_info: RwLock::new(None),
            sink: ArcSwapOption::empty(),
            priority: AtomicI32::new(options.priority),
            pi: AtomicU32::new(0),
            state: AtomicU8::new(BindState::Idle as u8),
            reported_result: AtomicBool::new(false),
            apartment_thread: thread::current().id(),
            continue_calls: AtomicUsize::new(0),
            tasks: TaskQueue::new(),
            notify: NotifyWindow::acquire(),
        });
        tracing::debug!(
            proxy = proxy.id,
            channel = proxy.notify.id(),
            from_urlmon = options.from_urlmon,
            "created binding proxy"
        );
        proxy
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> BindState {
        BindState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn from_urlmon(&self) -> bool {
        self.from_urlmon
    }

    /// Thread that created the proxy and drains its queued notifications.
    pub fn apartment_thread(&self) -> ThreadId {
        self.apartment_thread
    }

    /// Notifications queued for the owning thread and not yet delivered.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn has_sink(&self) -> bool {
        self.sink.load().is_some()
    }

    /// Connection details captured from a built-in handler at start.
    pub fn wininet_info(&self) -> Option<Arc<dyn WinInetInfo>> {
        self.wininet_info.read().clone()
    }

    /// Replace the consumer sink, releasing the previous one. The sink's
    /// service provider is captured with it.
    pub fn set_binding_sink(&self, sink: Option<Arc<dyn ProtocolSink>>) {
        let slot = sink.map(|sink| {
            let service_provider = sink.as_service_provider();
            Arc::new(SinkSlot {
                sink,
                service_provider,
            })
        });
        let installing = slot.is_some();
        let previous = self.sink.swap(slot);
        tracing::trace!(
            proxy = self.id,
            installing,
            replaced = previous.is_some(),
            "swapped binding sink"
        );
    }

    /// Whether the calling thread may call into the consumer sink right now.
    pub fn should_dispatch_direct(&self) -> bool {
        !PiFlags(self.pi.load(Ordering::Acquire)).contains(PiFlags::APARTMENT_THREADED)
            || (thread::current().id() == self.apartment_thread
                && self.continue_calls.load(Ordering::SeqCst) == 0)
    }

    fn set_state(&self, state: BindState) {
        let previous = BindState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            tracing::debug!(proxy = self.id, from = ?previous, to = ?state, "binding state");
        }
    }

    fn self_arc(&self) -> Result<Arc<Self>> {
        self.this.upgrade().ok_or(BindError::Failed)
    }

    fn current_sink(&self) -> Option<Arc<dyn ProtocolSink>> {
        self.sink.load_full().map(|slot| Arc::clone(&slot.sink))
    }

    fn bound_protocol(&self) -> Result<Arc<dyn Protocol>> {
        self.protocol.read().clone().ok_or(BindError::NotBound)
    }

    fn push_task(&self, task: Task) {
        if !self.tasks.push(task) {
            return;
        }
        // First task since the last drain: wake the owning thread, holding
        // the proxy alive until the drain has run.
        let Some(hold) = self.this.upgrade() else {
            tracing::warn!(proxy = self.id, "proxy released with notifications queued");
            return;
        };
        if !self.notify.post(hold) {
            tracing::warn!(
                proxy = self.id,
                "owning thread has exited, queued notifications will not be delivered"
            );
        }
    }

    fn process_tasks(&self) {
        while let Some(task) = self.tasks.pop() {
            let _call = ContinueCall::enter(&self.continue_calls);
            self.run_task(task);
        }
    }

    fn run_task(&self, task: Task) {
        match task {
            Task::Continue(data) => {
                let result = self
                    .bound_protocol()
                    .and_then(|protocol| protocol.continue_with(&data));
                if let Err(e) = result {
                    tracing::debug!(proxy = self.id, "deferred continue failed: {e}");
                }
            }
            Task::Progress { status, text } => {
                let Some(sink) = self.current_sink() else {
                    tracing::trace!(proxy = self.id, %status, "sink detached, progress dropped");
                    return;
                };
                if let Err(e) = sink.report_progress(status, text.as_deref()) {
                    tracing::debug!(proxy = self.id, %status, "deferred progress failed: {e}");
                }
            }
            Task::Data {
                flags,
                progress,
                progress_max,
            } => {
                let Some(sink) = self.current_sink() else {
                    tracing::trace!(proxy = self.id, progress, "sink detached, data dropped");
                    return;
                };
                if let Err(e) = sink.report_data(flags, progress, progress_max) {
                    tracing::debug!(proxy = self.id, progress, "deferred data failed: {e}");
                }
            }
        }
    }

    fn report_progress_redirected(&self, status: BindStatus, text: Option<&str>) -> Result<()> {
        if self.should_dispatch_direct() {
            return match self.current_sink() {
                Some(sink) => sink.report_progress(status, text),
                None => Ok(()),
            };
        }
        self.push_task(Task::Progress {
            status,
            text: text.map(str::to_owned),
        });
        Ok(())
    }

    fn preinstalled_protocol(&self, sink: &dyn ProtocolSink) -> Option<Arc<dyn Protocol>> {
        let provider = sink.as_service_provider()?;
        match provider.query_service(SERVICE_PROTOCOL) {
            Ok(ServiceObject::Protocol(protocol)) => Some(protocol),
            Ok(ServiceObject::Other(_)) => None,
            Err(e) => {
                tracing::trace!(proxy = self.id, "no preinstalled protocol: {e}");
                None
            }
        }
    }

    fn start_bound(
        &self,
        url: &str,
        sink: Arc<dyn ProtocolSink>,
        bind_info: Arc<dyn BindInfo>,
    ) -> Result<()> {
        let mut clsid = Uuid::nil();
        let mut builtin = false;

        let protocol = match self.preinstalled_protocol(sink.as_ref()) {
            // The sink's own instance has no class id to report.
            Some(protocol) => protocol,
            None => {
                let handler = self.resolver.resolve(url)?;
                clsid = handler.clsid;
                builtin = handler.builtin;
                let outer = if self.from_urlmon {
                    None
                } else {
                    Some(self.self_arc()? as Arc<dyn BindInfo>)
                };
                handler.factory.create_instance(outer)?
            }
        };

        if let Err(e) =
            sink.report_progress(BindStatus::PROTOCOL_CLASSID, Some(&clsid_string(clsid)))
        {
            tracing::trace!(proxy = self.id, "sink rejected class id: {e}");
        }

        *self.protocol.write() = Some(Arc::clone(&protocol));
        if builtin {
            *self.wininet_info.write() = protocol.as_wininet_info();
        }
        *self.bind_info.write() = Some(bind_info);
        self.set_binding_sink(Some(sink));

        if let Some(priority) = protocol.as_priority() {
            if let Err(e) = priority.set_priority(self.priority.load(Ordering::Acquire)) {
                tracing::trace!(proxy = self.id, "inner protocol rejected priority: {e}");
            }
        }

        self.set_state(BindState::Bound);
        let this = self.self_arc()?;
        protocol.start(
            url,
            Arc::clone(&this) as Arc<dyn ProtocolSink>,
            this as Arc<dyn BindInfo>,
            PiFlags::empty(),
            0,
        )
    }
}

impl Drop for BindingProxy {
    fn drop(&mut self) {
        tracing::debug!(proxy = self.id, "releasing binding proxy");
        self.wininet_info.get_mut().take();
        self.protocol.get_mut().take();
        self.bind_info.get_mut().take();
        self.sink.store(None);
        // `notify` drops last, releasing the channel registration.
    }
}

impl PendingWork for BindingProxy {
    fn run(self: Arc<Self>) {
        self.process_tasks();
    }
}

impl Protocol for BindingProxy {
    fn start(
        &self,
        url: &str,
        sink: Arc<dyn ProtocolSink>,
        bind_info: Arc<dyn BindInfo>,
        flags: PiFlags,
        reserved: usize,
    ) -> Result<()> {
        tracing::trace!(proxy = self.id, url, flags = flags.bits(), reserved, "start");

        if url.is_empty() {
            return Err(BindError::InvalidArgument("url"));
        }

        self.pi.store(flags.bits(), Ordering::Release);
        self.set_state(BindState::Starting);

        let result = self.start_bound(url, sink, bind_info);
        if result.is_err() && self.protocol.read().is_none() {
            self.set_state(BindState::Idle);
        }
        result
    }

    fn continue_with(&self, data: &ProtocolData) -> Result<()> {
        tracing::trace!(proxy = self.id, state = data.state, "continue");
        self.bound_protocol()?.continue_with(data)
    }

    fn abort(&self, reason: BindError, options: u32) -> Result<()> {
        tracing::warn!(proxy = self.id, %reason, options, "abort is not supported");
        Err(BindError::NotImplemented("abort"))
    }

    fn terminate(&self, options: u32) -> Result<()> {
        tracing::trace!(proxy = self.id, options, "terminate");

        if !self.reported_result.load(Ordering::Acquire) {
            return Err(BindError::NotReady);
        }

        // The inner protocol always sees zero options.
        let protocol = self.protocol.read().clone();
        let result = match protocol {
            Some(protocol) => protocol.terminate(0),
            None => Ok(()),
        };
        if let Err(e) = &result {
            tracing::debug!(proxy = self.id, "inner terminate failed: {e}");
        }

        self.set_binding_sink(None);
        self.bind_info.write().take();
        self.set_state(BindState::Terminated);
        result
    }

    fn suspend(&self) -> Result<()> {
        tracing::warn!(proxy = self.id, "suspend is not supported");
        Err(BindError::NotImplemented("suspend"))
    }

    fn resume(&self) -> Result<()> {
        tracing::warn!(proxy = self.id, "resume is not supported");
        Err(BindError::NotImplemented("resume"))
    }

    fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        tracing::trace!(proxy = self.id, len = buf.len(), "read");
        self.bound_protocol()?.read(buf)
    }

    fn seek(&self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        tracing::warn!(proxy = self.id, offset, ?origin, "seek is not supported");
        Err(BindError::NotImplemented("seek"))
    }

    fn lock_request(&self, options: u32) -> Result<()> {
        tracing::trace!(proxy = self.id, options, "lock request");
        self.bound_protocol()?.lock_request(options)
    }

    fn unlock_request(&self) -> Result<()> {
        tracing::trace!(proxy = self.id, "unlock request");
        self.bound_protocol()?.unlock_request()
    }

    fn as_priority(&self) -> Option<&dyn Priority> {
        Some(self)
    }
}

impl ProtocolSink for BindingProxy {
    fn switch(&self, data: &ProtocolData) -> Result<()> {
        tracing::trace!(
            proxy = self.id,
            flags = data.flags,
            state = data.state,
            len = data.data.len(),
            "switch"
        );

        if !self.should_dispatch_direct() {
            self.push_task(Task::Continue(data.clone()));
            return Ok(());
        }

        match self.current_sink() {
            Some(sink) => sink.switch(data),
            None => self.bound_protocol()?.continue_with(data),
        }
    }

    fn report_progress(&self, status: BindStatus, text: Option<&str>) -> Result<()> {
        tracing::trace!(proxy = self.id, %status, text, "report progress");

        let status = match status {
            BindStatus::FINDING_RESOURCE
            | BindStatus::CONNECTING
            | BindStatus::BEGIN_DOWNLOAD_DATA
            | BindStatus::SENDING_REQUEST
            | BindStatus::CACHE_FILENAME_AVAILABLE
            | BindStatus::DIRECT_BIND
            | BindStatus::ACCEPT_RANGES
            | BindStatus::MIME_TYPE_AVAILABLE => status,
            BindStatus::VERIFIED_MIME_TYPE_AVAILABLE if self.from_urlmon => status,
            BindStatus::VERIFIED_MIME_TYPE_AVAILABLE => BindStatus::MIME_TYPE_AVAILABLE,
            other => {
                tracing::warn!(proxy = self.id, status = %other, "unsupported status code");
                return Err(BindError::NotImplemented("progress status"));
            }
        };

        if !self.has_sink() {
            return Ok(());
        }
        self.report_progress_redirected(status, text)
    }

    fn report_data(&self, flags: BscFlags, progress: u64, progress_max: u64) -> Result<()> {
        tracing::trace!(proxy = self.id, flags = flags.bits(), progress, progress_max, "report data");

        let Some(sink) = self.current_sink() else {
            return Ok(());
        };
        if self.should_dispatch_direct() {
            return sink.report_data(flags, progress, progress_max);
        }
        self.push_task(Task::Data {
            flags,
            progress,
            progress_max,
        });
        Ok(())
    }

    fn report_result(&self, result: BindOutcome, error: u32, text: Option<&str>) -> Result<()> {
        tracing::trace!(proxy = self.id, ?result, error, text, "report result");

        let Some(sink) = self.current_sink() else {
            return Err(BindError::Failed);
        };

        self.reported_result.store(true, Ordering::Release);
        self.set_state(BindState::ResultReported);
        sink.report_result(result, error, text)
    }

    fn as_service_provider(&self) -> Option<Arc<dyn ServiceProvider>> {
        self.this
            .upgrade()
            .map(|this| this as Arc<dyn ServiceProvider>)
    }
}

impl BindInfo for BindingProxy {
    fn get_bind_info(&self) -> Result<(BindFlags, BindInfoData)> {
        tracing::trace!(proxy = self.id, "get bind info");

        let bind_info = self.bind_info.read().clone().ok_or(BindError::NotBound)?;
        let (flags, data) = bind_info.get_bind_info().inspect_err(|e| {
            tracing::warn!(proxy = self.id, "get bind info failed: {e}");
        })?;
        Ok((flags | BindFlags::FROM_URLMON, data))
    }

    fn get_bind_string(&self, kind: BindStringKind, max: usize) -> Result<Vec<String>> {
        tracing::trace!(proxy = self.id, kind = kind.0, max, "get bind string");

        let bind_info = self.bind_info.read().clone().ok_or(BindError::NotBound)?;
        bind_info.get_bind_string(kind, max)
    }
}

impl Priority for BindingProxy {
    fn set_priority(&self, priority: i32) -> Result<()> {
        tracing::trace!(proxy = self.id, priority, "set priority");
        self.priority.store(priority, Ordering::Release);
        Ok(())
    }

    fn get_priority(&self) -> Result<i32> {
        Ok(self.priority.load(Ordering::Acquire))
    }
}

impl ServiceProvider for BindingProxy {
    fn query_service(&self, service: Uuid) -> Result<ServiceObject> {
        tracing::trace!(proxy = self.id, %service, "query service");

        let provider = self
            .sink
            .load_full()
            .and_then(|slot| slot.service_provider.clone())
            .ok_or(BindError::NoInterface)?;
        provider.query_service(service)
    }
}
