//! `mem:` protocol handler serving resources from the probe config.
//!
//! Each binding resolves its resource on the shared runtime, reporting
//! progress from a runtime worker thread, then asks for a switch so the data
//! notifications are produced from `continue_with` on whichever thread the
//! consumer picks.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use urlbind_core::registry::url_scheme;
use urlbind_core::{
    BindError, BindInfo, BindStatus, BindStringKind, BscFlags, PiFlags, Priority, Protocol,
    ProtocolData, ProtocolSink, ReadOutcome, Result, SchemeRegistry, SeekOrigin,
};
use uuid::Uuid;

use crate::RUNTIME;
use crate::config::ProbeConfig;

pub const MEMORY_SCHEME: &str = "mem";
pub const MEMORY_CLSID: Uuid = Uuid::from_u128(0x6c1f4a52_2b7e_4d0e_9a51_83d0f2c4e7a1);

/// `continue_with` state: the resource body is ready to hand out.
const STATE_BODY_READY: u32 = 1;

#[derive(Debug, Clone)]
struct Resource {
    body: Arc<[u8]>,
    mime: String,
}

type ResourceTable = HashMap<String, Resource>;

/// Register the `mem:` handler on `registry`, serving `config`'s resources.
pub fn register(registry: &SchemeRegistry, config: &ProbeConfig) {
    let resources: Arc<ResourceTable> = Arc::new(
        config
            .resources
            .iter()
            .map(|r| {
                (
                    r.path.clone(),
                    Resource {
                        body: Arc::from(r.body.as_bytes()),
                        mime: r.mime().to_string(),
                    },
                )
            })
            .collect(),
    );
    let latency = Duration::from_millis(config.latency_ms());

    registry.register(
        MEMORY_SCHEME,
        MEMORY_CLSID,
        false,
        Arc::new(
            move |outer: Option<Arc<dyn BindInfo>>| -> Result<Arc<dyn Protocol>> {
                tracing::debug!(aggregated = outer.is_some(), "creating mem protocol");
                Ok(Arc::new(MemoryProtocol::new(Arc::clone(&resources), latency)))
            },
        ),
    );
}

#[derive(Default)]
struct Transfer {
    sink: Option<Arc<dyn ProtocolSink>>,
    resource: Option<Resource>,
    ready: bool,
    offset: usize,
    io: Option<JoinHandle<()>>,
}

pub struct MemoryProtocol {
    resources: Arc<ResourceTable>,
    latency: Duration,
    priority: AtomicI32,
    transfer: Mutex<Transfer>,
}

fn log_sink_error(what: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::debug!("sink rejected {what}: {e}");
    }
}

impl MemoryProtocol {
    fn new(resources: Arc<ResourceTable>, latency: Duration) -> Self {
        Self {
            resources,
            latency,
            priority: AtomicI32::new(0),
            transfer: Mutex::new(Transfer::default()),
        }
    }

    fn spawn_lookup(
        &self,
        path: String,
        sink: Arc<dyn ProtocolSink>,
        resource: Option<Resource>,
    ) -> JoinHandle<()> {
        let latency = self.latency;
        RUNTIME.spawn(async move {
            log_sink_error(
                "progress",
                sink.report_progress(BindStatus::FINDING_RESOURCE, Some(&path)),
            );
            tokio::time::sleep(latency).await;

            let Some(resource) = resource else {
                tracing::info!(%path, "resource not found");
                log_sink_error(
                    "result",
                    sink.report_result(
                        Err(BindError::Protocol(format!("{path}: not found"))),
                        404,
                        Some("not found"),
                    ),
                );
                return;
            };

            log_sink_error(
                "progress",
                sink.report_progress(BindStatus::CONNECTING, Some("memory")),
            );
            tokio::time::sleep(latency).await;
            log_sink_error(
                "progress",
                sink.report_progress(BindStatus::SENDING_REQUEST, None),
            );
            tokio::time::sleep(latency).await;
            log_sink_error(
                "progress",
                sink.report_progress(BindStatus::VERIFIED_MIME_TYPE_AVAILABLE, Some(&resource.mime)),
            );
            log_sink_error("switch", sink.switch(&ProtocolData::new(STATE_BODY_READY)));
        })
    }
}

impl Protocol for MemoryProtocol {
    fn start(
        &self,
        url: &str,
        sink: Arc<dyn ProtocolSink>,
        bind_info: Arc<dyn BindInfo>,
        flags: PiFlags,
        _reserved: usize,
    ) -> Result<()> {
        let scheme = url_scheme(url).ok_or_else(|| BindError::InvalidUrl(url.to_string()))?;
        let path = url[scheme.len() + 1..].to_string();

        let (bind_flags, _) = bind_info.get_bind_info()?;
        let user_agent = bind_info
            .get_bind_string(BindStringKind::USER_AGENT, 1)
            .ok()
            .and_then(|v| v.into_iter().next());
        tracing::debug!(
            %path,
            bind_flags = bind_flags.bits(),
            flags = flags.bits(),
            user_agent = user_agent.as_deref(),
            priority = self.priority.load(Ordering::Relaxed),
            "starting mem binding"
        );

        let resource = self.resources.get(&path).cloned();
        {
            let mut transfer = self.transfer.lock();
            transfer.sink = Some(Arc::clone(&sink));
            transfer.resource = resource.clone();
        }
        // The lookup may switch before this returns.
        let io = self.spawn_lookup(path, sink, resource);
        self.transfer.lock().io = Some(io);
        Ok(())
    }

    fn continue_with(&self, data: &ProtocolData) -> Result<()> {
        if data.state != STATE_BODY_READY {
            return Err(BindError::InvalidArgument("protocol data"));
        }

        let (sink, len) = {
            let mut transfer = self.transfer.lock();
            let len = transfer
                .resource
                .as_ref()
                .map(|r| r.body.len() as u64)
                .ok_or(BindError::NotBound)?;
            transfer.ready = true;
            (transfer.sink.clone().ok_or(BindError::NotBound)?, len)
        };

        log_sink_error(
            "progress",
            sink.report_progress(BindStatus::BEGIN_DOWNLOAD_DATA, None),
        );
        sink.report_data(
            BscFlags::FIRST_DATA_NOTIFICATION
                | BscFlags::LAST_DATA_NOTIFICATION
                | BscFlags::DATA_FULLY_AVAILABLE,
            len,
            len,
        )?;
        sink.report_result(Ok(()), 0, None)
    }

    fn abort(&self, reason: BindError, _options: u32) -> Result<()> {
        let sink = {
            let mut transfer = self.transfer.lock();
            if let Some(io) = transfer.io.take() {
                io.abort();
            }
            transfer.sink.clone()
        };
        match sink {
            Some(sink) => sink.report_result(Err(reason), 0, None),
            None => Err(BindError::NotBound),
        }
    }

    fn terminate(&self, _options: u32) -> Result<()> {
        let mut transfer = self.transfer.lock();
        if let Some(io) = transfer.io.take() {
            io.abort();
        }
        transfer.sink = None;
        Ok(())
    }

    fn suspend(&self) -> Result<()> {
        Err(BindError::NotImplemented("suspend"))
    }

    fn resume(&self) -> Result<()> {
        Err(BindError::NotImplemented("resume"))
    }

    fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome> {
        let mut transfer = self.transfer.lock();
        if !transfer.ready {
            return Err(BindError::Pending);
        }
        let body = transfer
            .resource
            .as_ref()
            .map(|r| Arc::clone(&r.body))
            .ok_or(BindError::NotBound)?;

        let start = transfer.offset;
        let n = buf.len().min(body.len() - start);
        buf[..n].copy_from_slice(&body[start..start + n]);
        transfer.offset += n;
        Ok(ReadOutcome {
            read: n,
            finished: transfer.offset == body.len(),
        })
    }

    fn seek(&self, _offset: i64, _origin: SeekOrigin) -> Result<u64> {
        Err(BindError::NotImplemented("seek"))
    }

    fn lock_request(&self, _options: u32) -> Result<()> {
        Ok(())
    }

    fn unlock_request(&self) -> Result<()> {
        Ok(())
    }

    fn as_priority(&self) -> Option<&dyn Priority> {
        Some(self)
    }
}

impl Priority for MemoryProtocol {
    fn set_priority(&self, priority: i32) -> Result<()> {
        self.priority.store(priority, Ordering::Relaxed);
        Ok(())
    }

    fn get_priority(&self) -> Result<i32> {
        Ok(self.priority.load(Ordering::Relaxed))
    }
}
