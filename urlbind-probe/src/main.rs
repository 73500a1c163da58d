use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use urlbind_core::notify::pump_one;
use urlbind_core::{BindError, BindOptions, BindingProxy, PiFlags, Protocol, SchemeRegistry};
use urlbind_probe::config::ProbeConfig;
use urlbind_probe::consumer::ConsoleSink;
use urlbind_probe::event::ProbeEvent;
use urlbind_probe::memory;

/// Bind a URL through the binding proxy and print every notification as JSON.
#[derive(Parser, Debug)]
#[command(name = "urlbind-probe", version)]
struct Args {
    /// Config file (default: <config dir>/urlbind/probe.toml).
    #[arg(long, env = "URLBIND_PROBE_CONFIG")]
    config: Option<PathBuf>,

    /// URL to bind.
    #[arg(long, env = "URLBIND_PROBE_URL", default_value = "mem:/hello")]
    url: String,

    /// Deliver progress on this thread instead of the handler's threads.
    #[arg(long, env = "URLBIND_PROBE_APARTMENT")]
    apartment: bool,

    /// Behave as the umbrella binding layer (no aggregation, verified MIME).
    #[arg(long)]
    from_urlmon: bool,

    /// Priority handed to the handler at start.
    #[arg(long, default_value_t = 0)]
    priority: i32,

    /// Give up if no result is reported within this many milliseconds.
    #[arg(long, env = "URLBIND_PROBE_TIMEOUT_MS", default_value_t = 5000)]
    timeout_ms: u64,

    /// Write the payload to stdout after the events.
    #[arg(long)]
    print_body: bool,
}

/// Pump this thread's notification channel in short slices until the
/// consumer sees a result. Results from handler threads do not post to the
/// channel, so a single long wait would overshoot them.
fn wait_for_result(sink: &ConsoleSink, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !sink.finished() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        pump_one(remaining.min(Duration::from_millis(10)));
    }
    true
}

fn read_body(protocol: &dyn Protocol, chunk: usize) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        let outcome = protocol.read(&mut buf)?;
        body.extend_from_slice(&buf[..outcome.read]);
        if outcome.finished {
            return Ok(body);
        }
    }
}

fn main() -> Result<()> {
    // JSON logs with URLBIND_LOG_JSON=1, human-readable otherwise. Logs go
    // to stderr so stdout carries only events.
    let json_logs = std::env::var("URLBIND_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env()
        .add_directive("urlbind_probe=info".parse()?)
        .add_directive("urlbind_core=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ProbeConfig::load_from(path)?,
        None => ProbeConfig::load(),
    };
    tracing::info!(
        url = %args.url,
        apartment = args.apartment,
        resources = config.resources.len(),
        "starting probe"
    );

    let registry = Arc::new(SchemeRegistry::new());
    memory::register(&registry, &config);

    let proxy = BindingProxy::new(
        registry,
        BindOptions {
            from_urlmon: args.from_urlmon,
            priority: args.priority,
        },
    );
    let protocol: Arc<dyn Protocol> = proxy.clone();
    let sink = ConsoleSink::new(true);
    sink.attach(&protocol);

    let flags = if args.apartment {
        PiFlags::APARTMENT_THREADED
    } else {
        PiFlags::empty()
    };
    let started = Instant::now();
    protocol.start(&args.url, sink.clone(), sink.clone(), flags, 0)?;

    if !wait_for_result(&sink, Duration::from_millis(args.timeout_ms)) {
        bail!("no result after {}ms", args.timeout_ms);
    }

    let outcome = sink.outcome().unwrap_or(Err(BindError::Failed));
    let body = match &outcome {
        Ok(()) => read_body(protocol.as_ref(), config.read_chunk())?,
        Err(_) => Vec::new(),
    };
    protocol.terminate(0)?;
    sink.emit(ProbeEvent::Complete {
        bytes: body.len(),
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    });
    tracing::info!(
        proxy = proxy.id(),
        state = ?proxy.state(),
        bytes = body.len(),
        "binding finished"
    );

    if args.print_body {
        println!("{}", String::from_utf8_lossy(&body));
    }
    outcome.map_err(|e| anyhow::anyhow!("binding failed: {e}"))
}
