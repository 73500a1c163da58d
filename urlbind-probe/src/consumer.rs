//! Consumer side of a probe binding: records every sink notification as an
//! [`EventEnvelope`] and supplies the request's bind-info.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use urlbind_core::{
    BindError, BindFlags, BindInfo, BindInfoData, BindOutcome, BindStatus, BindStringKind,
    BscFlags, Protocol, ProtocolData, ProtocolSink, Result,
};

use crate::event::{EventEnvelope, ProbeEvent};

pub const USER_AGENT: &str = concat!("urlbind-probe/", env!("CARGO_PKG_VERSION"));

pub struct ConsoleSink {
    seq: AtomicU64,
    /// Print each envelope to stdout as it is recorded.
    echo: bool,
    events: Mutex<Vec<EventEnvelope>>,
    outcome: Mutex<Option<BindOutcome>>,
    /// Target of `switch`. Weak so the binding does not keep itself alive
    /// through its own sink.
    protocol: Mutex<Option<Weak<dyn Protocol>>>,
}

impl ConsoleSink {
    pub fn new(echo: bool) -> Arc<Self> {
        Arc::new(Self {
            seq: AtomicU64::new(0),
            echo,
            events: Mutex::new(Vec::new()),
            outcome: Mutex::new(None),
            protocol: Mutex::new(None),
        })
    }

    /// Route `switch` requests to `protocol`.
    pub fn attach(&self, protocol: &Arc<dyn Protocol>) {
        *self.protocol.lock() = Some(Arc::downgrade(protocol));
    }

    pub fn finished(&self) -> bool {
        self.outcome.lock().is_some()
    }

    pub fn outcome(&self) -> Option<BindOutcome> {
        self.outcome.lock().clone()
    }

    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.lock().clone()
    }

    /// Record an event that did not come through the sink.
    pub fn emit(&self, event: ProbeEvent) {
        let envelope = EventEnvelope::new(self.seq.fetch_add(1, Ordering::Relaxed) + 1, event);
        if self.echo {
            match serde_json::to_string(&envelope) {
                Ok(line) => {
                    let mut out = std::io::stdout().lock();
                    if let Err(e) = writeln!(out, "{line}") {
                        tracing::warn!("failed to write event: {e}");
                    }
                }
                Err(e) => tracing::warn!("failed to serialize event: {e}"),
            }
        }
        self.events.lock().push(envelope);
    }
}

impl ProtocolSink for ConsoleSink {
    fn switch(&self, data: &ProtocolData) -> Result<()> {
        self.emit(ProbeEvent::switch(data));
        let protocol = self
            .protocol
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(BindError::NotBound)?;
        protocol.continue_with(data)
    }

    fn report_progress(&self, status: BindStatus, text: Option<&str>) -> Result<()> {
        tracing::debug!(%status, text, "progress");
        self.emit(ProbeEvent::progress(status, text));
        Ok(())
    }

    fn report_data(&self, flags: BscFlags, progress: u64, progress_max: u64) -> Result<()> {
        self.emit(ProbeEvent::data(flags, progress, progress_max));
        Ok(())
    }

    fn report_result(&self, result: BindOutcome, error: u32, text: Option<&str>) -> Result<()> {
        self.emit(ProbeEvent::result(&result, error, text));
        *self.outcome.lock() = Some(result);
        Ok(())
    }
}

impl BindInfo for ConsoleSink {
    fn get_bind_info(&self) -> Result<(BindFlags, BindInfoData)> {
        Ok((
            BindFlags::ASYNCHRONOUS | BindFlags::PULL_DATA | BindFlags::NO_WRITE_CACHE,
            BindInfoData::default(),
        ))
    }

    fn get_bind_string(&self, kind: BindStringKind, max: usize) -> Result<Vec<String>> {
        let values: &[&str] = match kind {
            BindStringKind::USER_AGENT => &[USER_AGENT],
            BindStringKind::ACCEPT_MIMES => &["*/*"],
            _ => return Err(BindError::NoInterface),
        };
        Ok(values.iter().take(max).map(|s| s.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_finishes_binding() {
        let sink = ConsoleSink::new(false);
        assert!(!sink.finished());
        sink.report_progress(BindStatus::CONNECTING, Some("memory"))
            .unwrap();
        sink.report_result(Err(BindError::Aborted), 3, Some("stop"))
            .unwrap();

        assert!(sink.finished());
        assert_eq!(sink.outcome(), Some(Err(BindError::Aborted)));
        let seqs: Vec<u64> = sink.events().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_switch_without_protocol() {
        let sink = ConsoleSink::new(false);
        assert_eq!(
            sink.switch(&ProtocolData::new(1)),
            Err(BindError::NotBound)
        );
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_bind_strings() {
        let sink = ConsoleSink::new(false);
        assert_eq!(
            sink.get_bind_string(BindStringKind::USER_AGENT, 4).unwrap(),
            vec![USER_AGENT.to_string()]
        );
        assert!(sink
            .get_bind_string(BindStringKind::ACCEPT_MIMES, 0)
            .unwrap()
            .is_empty());
        assert_eq!(
            sink.get_bind_string(BindStringKind::PASSWORD, 1),
            Err(BindError::NoInterface)
        );
        let (flags, _) = sink.get_bind_info().unwrap();
        assert!(flags.contains(BindFlags::PULL_DATA));
    }
}
