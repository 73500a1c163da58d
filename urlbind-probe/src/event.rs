//! Sink notifications as JSON events.

use serde::Serialize;
use urlbind_core::{BindOutcome, BindStatus, BscFlags, ProtocolData};

/// One consumer-sink notification.
///
/// Serialized with `#[serde(tag = "type", content = "data")]` so readers can
/// switch on `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProbeEvent {
    Switch {
        state: u32,
        len: usize,
    },
    Progress {
        code: u32,
        status: Option<String>,
        text: Option<String>,
    },
    Data {
        flags: u32,
        progress: u64,
        progress_max: u64,
    },
    Result {
        ok: bool,
        error_code: u32,
        error: Option<String>,
        text: Option<String>,
    },
    /// Emitted by the probe itself once the payload has been read.
    Complete {
        bytes: usize,
        elapsed_ms: u64,
    },
}

impl ProbeEvent {
    pub fn switch(data: &ProtocolData) -> Self {
        Self::Switch {
            state: data.state,
            len: data.data.len(),
        }
    }

    pub fn progress(status: BindStatus, text: Option<&str>) -> Self {
        Self::Progress {
            code: status.0,
            status: status.name().map(str::to_owned),
            text: text.map(str::to_owned),
        }
    }

    pub fn data(flags: BscFlags, progress: u64, progress_max: u64) -> Self {
        Self::Data {
            flags: flags.bits(),
            progress,
            progress_max,
        }
    }

    pub fn result(outcome: &BindOutcome, error_code: u32, text: Option<&str>) -> Self {
        Self::Result {
            ok: outcome.is_ok(),
            error_code,
            error: outcome.as_ref().err().map(ToString::to_string),
            text: text.map(str::to_owned),
        }
    }
}

/// Versioned wrapper printed one per line.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub version: u32,
    pub seq: u64,
    pub timestamp_ms: i64,
    pub event: ProbeEvent,
}

impl EventEnvelope {
    pub fn new(seq: u64, event: ProbeEvent) -> Self {
        Self {
            version: 1,
            seq,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            event,
        }
    }
}
