//! Test doubles shared by the integration tests: a recording consumer sink,
//! a fixed bind-info and a scriptable protocol handler.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use urlbind_core::{
    BindError, BindFlags, BindInfo, BindInfoData, BindOutcome, BindStatus, BindStringKind,
    BscFlags, PiFlags, Priority, Protocol, ProtocolData, ProtocolSink, ReadOutcome,
    SERVICE_PROTOCOL, SchemeRegistry, SeekOrigin, ServiceObject, ServiceProvider, WinInetInfo,
};
use uuid::Uuid;

pub const STUB_CLSID: Uuid = Uuid::from_u128(0x3dd53d40_7b8b_11d0_b013_00aa0059ce02);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("urlbind_core=trace")
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Switch(ProtocolData),
    Progress(BindStatus, Option<String>),
    Data(BscFlags, u64, u64),
    Result(BindOutcome, u32, Option<String>),
}

/// Consumer sink recording every call together with the calling thread.
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<(SinkCall, ThreadId)>>,
    provider: Mutex<Option<Arc<dyn ServiceProvider>>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_provider(provider: Arc<dyn ServiceProvider>) -> Arc<Self> {
        let sink = Self::default();
        *sink.provider.lock() = Some(provider);
        Arc::new(sink)
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.calls.lock().iter().map(|(_, t)| *t).collect()
    }

    /// Calls other than the PROTOCOLCLASSID announcement made during start.
    pub fn relayed(&self) -> Vec<SinkCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, SinkCall::Progress(BindStatus::PROTOCOL_CLASSID, _)))
            .collect()
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().push((call, thread::current().id()));
    }
}

impl ProtocolSink for RecordingSink {
    fn switch(&self, data: &ProtocolData) -> urlbind_core::Result<()> {
        self.record(SinkCall::Switch(data.clone()));
        Ok(())
    }

    fn report_progress(&self, status: BindStatus, text: Option<&str>) -> urlbind_core::Result<()> {
        self.record(SinkCall::Progress(status, text.map(str::to_owned)));
        Ok(())
    }

    fn report_data(&self, flags: BscFlags, progress: u64, max: u64) -> urlbind_core::Result<()> {
        self.record(SinkCall::Data(flags, progress, max));
        Ok(())
    }

    fn report_result(
        &self,
        result: BindOutcome,
        error: u32,
        text: Option<&str>,
    ) -> urlbind_core::Result<()> {
        self.record(SinkCall::Result(result, error, text.map(str::to_owned)));
        Ok(())
    }

    fn as_service_provider(&self) -> Option<Arc<dyn ServiceProvider>> {
        self.provider.lock().clone()
    }
}

/// Service provider offering a preinstalled protocol.
pub struct OfferProtocol(pub Arc<dyn Protocol>);

impl ServiceProvider for OfferProtocol {
    fn query_service(&self, service: Uuid) -> urlbind_core::Result<ServiceObject> {
        if service == SERVICE_PROTOCOL {
            Ok(ServiceObject::Protocol(Arc::clone(&self.0)))
        } else {
            Err(BindError::NoInterface)
        }
    }
}

pub struct StubBindInfo {
    pub flags: BindFlags,
}

impl StubBindInfo {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            flags: BindFlags::ASYNCHRONOUS | BindFlags::PULL_DATA,
        })
    }
}

impl BindInfo for StubBindInfo {
    fn get_bind_info(&self) -> urlbind_core::Result<(BindFlags, BindInfoData)> {
        Ok((
            self.flags,
            BindInfoData {
                extra_info: Some("extra".into()),
                ..BindInfoData::default()
            },
        ))
    }

    fn get_bind_string(
        &self,
        kind: BindStringKind,
        max: usize,
    ) -> urlbind_core::Result<Vec<String>> {
        if kind == BindStringKind::ACCEPT_MIMES {
            Ok(["text/html", "*/*"]
                .iter()
                .take(max)
                .map(|s| s.to_string())
                .collect())
        } else {
            Err(BindError::NoInterface)
        }
    }
}

type StartHook = Box<dyn Fn(&StubProtocol, Arc<dyn ProtocolSink>) -> urlbind_core::Result<()> + Send + Sync>;
type ContinueHook = Box<dyn Fn(&StubProtocol, &ProtocolData) + Send + Sync>;

pub struct StubWinInet;

impl WinInetInfo for StubWinInet {
    fn query_option(&self, option: u32) -> urlbind_core::Result<Vec<u8>> {
        Ok(option.to_le_bytes().to_vec())
    }
}

/// Protocol handler whose behavior on start/continue is supplied by the test.
#[derive(Default)]
pub struct StubProtocol {
    pub sink: Mutex<Option<Arc<dyn ProtocolSink>>>,
    pub bind_info: Mutex<Option<Arc<dyn BindInfo>>>,
    pub start_args: Mutex<Option<(String, PiFlags, usize)>>,
    pub continued: Mutex<Vec<(ProtocolData, ThreadId)>>,
    pub terminated: AtomicUsize,
    pub terminate_options: Mutex<Vec<u32>>,
    pub locks: AtomicUsize,
    pub unlocks: AtomicUsize,
    pub priority: Mutex<Option<i32>>,
    pub payload: Mutex<Vec<u8>>,
    pub expose_priority: bool,
    pub expose_wininet: bool,
    pub fail_terminate: bool,
    on_start: Option<StartHook>,
    on_continue: Option<ContinueHook>,
}

impl StubProtocol {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn builder() -> StubBuilder {
        StubBuilder(Self::default())
    }

    pub fn sink(&self) -> Arc<dyn ProtocolSink> {
        self.sink.lock().clone().expect("protocol not started")
    }
}

pub struct StubBuilder(StubProtocol);

impl StubBuilder {
    pub fn on_start(
        mut self,
        hook: impl Fn(&StubProtocol, Arc<dyn ProtocolSink>) -> urlbind_core::Result<()>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.0.on_start = Some(Box::new(hook));
        self
    }

    pub fn on_continue(
        mut self,
        hook: impl Fn(&StubProtocol, &ProtocolData) + Send + Sync + 'static,
    ) -> Self {
        self.0.on_continue = Some(Box::new(hook));
        self
    }

    pub fn payload(self, payload: &[u8]) -> Self {
        *self.0.payload.lock() = payload.to_vec();
        self
    }

    pub fn with_priority(mut self) -> Self {
        self.0.expose_priority = true;
        self
    }

    pub fn with_wininet(mut self) -> Self {
        self.0.expose_wininet = true;
        self
    }

    pub fn failing_terminate(mut self) -> Self {
        self.0.fail_terminate = true;
        self
    }

    pub fn build(self) -> Arc<StubProtocol> {
        Arc::new(self.0)
    }
}

impl Protocol for StubProtocol {
    fn start(
        &self,
        url: &str,
        sink: Arc<dyn ProtocolSink>,
        bind_info: Arc<dyn BindInfo>,
        flags: PiFlags,
        reserved: usize,
    ) -> urlbind_core::Result<()> {
        *self.start_args.lock() = Some((url.to_string(), flags, reserved));
        *self.sink.lock() = Some(Arc::clone(&sink));
        *self.bind_info.lock() = Some(bind_info);
        match &self.on_start {
            Some(hook) => hook(self, sink),
            None => Ok(()),
        }
    }

    fn continue_with(&self, data: &ProtocolData) -> urlbind_core::Result<()> {
        self.continued
            .lock()
            .push((data.clone(), thread::current().id()));
        if let Some(hook) = &self.on_continue {
            hook(self, data);
        }
        Ok(())
    }

    fn abort(&self, reason: BindError, _options: u32) -> urlbind_core::Result<()> {
        Err(reason)
    }

    fn terminate(&self, options: u32) -> urlbind_core::Result<()> {
        self.terminated.fetch_add(1, Ordering::SeqCst);
        self.terminate_options.lock().push(options);
        // Break the sink → proxy cycle the way real handlers do.
        self.sink.lock().take();
        self.bind_info.lock().take();
        if self.fail_terminate {
            return Err(BindError::Protocol("terminate failed".into()));
        }
        Ok(())
    }

    fn suspend(&self) -> urlbind_core::Result<()> {
        Ok(())
    }

    fn resume(&self) -> urlbind_core::Result<()> {
        Ok(())
    }

    fn read(&self, buf: &mut [u8]) -> urlbind_core::Result<ReadOutcome> {
        let mut payload = self.payload.lock();
        let n = buf.len().min(payload.len());
        buf[..n].copy_from_slice(&payload[..n]);
        payload.drain(..n);
        Ok(ReadOutcome {
            read: n,
            finished: payload.is_empty(),
        })
    }

    fn seek(&self, _offset: i64, _origin: SeekOrigin) -> urlbind_core::Result<u64> {
        Ok(0)
    }

    fn lock_request(&self, _options: u32) -> urlbind_core::Result<()> {
        self.locks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unlock_request(&self) -> urlbind_core::Result<()> {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_priority(&self) -> Option<&dyn Priority> {
        if self.expose_priority {
            Some(self)
        } else {
            None
        }
    }

    fn as_wininet_info(&self) -> Option<Arc<dyn WinInetInfo>> {
        self.expose_wininet
            .then(|| Arc::new(StubWinInet) as Arc<dyn WinInetInfo>)
    }
}

impl Priority for StubProtocol {
    fn set_priority(&self, priority: i32) -> urlbind_core::Result<()> {
        *self.priority.lock() = Some(priority);
        Ok(())
    }

    fn get_priority(&self) -> urlbind_core::Result<i32> {
        self.priority.lock().ok_or(BindError::Failed)
    }
}

/// Records whether the factory was handed an aggregating outer object.
#[derive(Default)]
pub struct FactoryLog {
    pub outer: Mutex<Vec<bool>>,
}

/// Registry serving `protocol` for the `stub:` scheme.
pub fn registry_for(
    protocol: Arc<StubProtocol>,
    builtin: bool,
) -> (Arc<SchemeRegistry>, Arc<FactoryLog>) {
    let registry = Arc::new(SchemeRegistry::new());
    let log = Arc::new(FactoryLog::default());
    let factory_log = Arc::clone(&log);
    registry.register(
        "stub",
        STUB_CLSID,
        builtin,
        Arc::new(
            move |outer: Option<Arc<dyn BindInfo>>| -> urlbind_core::Result<Arc<dyn Protocol>> {
                factory_log.outer.lock().push(outer.is_some());
                Ok(Arc::clone(&protocol) as Arc<dyn Protocol>)
            },
        ),
    );
    (registry, log)
}
