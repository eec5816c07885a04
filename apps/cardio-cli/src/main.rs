use anyhow::{Context, Result};
use cardio_core::{
    metrics, start_io_worker, BlockEngine, CompletionSink, DeviceCaps, DeviceRegistry, Direction,
    EngineConfig, IoError, Request, TransportErrorKind,
};
use cardio_sim::{Fault, SimClock, SimLifecycle, SimTransport};
use clap::Parser;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(name = "cardio-cli")]
#[command(about = "Drive the block request engine against a scripted device", long_about = None)]
struct Args {
    /// Number of requests to submit
    #[arg(long, default_value_t = 8)]
    requests: u32,
    /// Sectors per request
    #[arg(long, default_value_t = 64)]
    sectors: u32,
    /// Issue writes instead of reads
    #[arg(long, default_value_t = false)]
    write: bool,
    /// Simulate a non-removable device
    #[arg(long, default_value_t = false)]
    fixed: bool,
    /// Transport limit on blocks per data command
    #[arg(long, default_value_t = 1024)]
    max_block_count: u32,
    /// Inject a transient data error at this sector
    #[arg(long, value_name = "SECTOR")]
    fault_sector: Option<u64>,
    /// How many times the injected fault fires
    #[arg(long, default_value_t = 1)]
    fault_count: u32,
    /// Status polls the device stays busy after each write
    #[arg(long, default_value_t = 0)]
    busy_polls: u32,
}

struct LogSink {
    request: u32,
}

impl CompletionSink for LogSink {
    fn end_request(&mut self, bytes_ok: u64, error: Option<IoError>) {
        match error {
            None => debug!(request = self.request, bytes_ok, "range complete"),
            Some(err) => warn!(request = self.request, bytes_ok, error = %err, "range failed"),
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let clock = SimClock::new();
    let transport = SimTransport::new(clock.clone());
    let lifecycle = SimLifecycle::for_transport(&transport);
    if let Some(sector) = args.fault_sector {
        transport.push_fault(Fault::data_error(
            sector,
            args.fault_count,
            TransportErrorKind::Crc,
        ));
        info!(sector, count = args.fault_count, "injecting data faults");
    }
    transport.set_write_busy_polls(args.busy_polls);

    let caps = DeviceCaps {
        removable: !args.fixed,
        max_block_count: args.max_block_count,
        ..DeviceCaps::default()
    };
    let mut registry = DeviceRegistry::with_slots(1);
    let device = registry.attach(caps).context("attach device")?;
    info!(
        slot = device.slot(),
        removable = !args.fixed,
        "device attached"
    );

    let engine = BlockEngine::new(
        transport,
        lifecycle,
        clock,
        device,
        EngineConfig::default(),
    );
    let (handle, task) = start_io_worker(engine);
    let worker = tokio::spawn(task);

    let direction = if args.write {
        Direction::Write
    } else {
        Direction::Read
    };
    let mut completed = 0u64;
    let mut failed = 0u64;
    for index in 0..args.requests {
        let start = u64::from(index) * u64::from(args.sectors);
        let request = Request::contiguous(start, args.sectors, direction);
        match handle
            .submit(request, Box::new(LogSink { request: index }))
            .await
        {
            Ok(outcome) if outcome.is_complete() => {
                completed += outcome.bytes_completed;
                info!(
                    request = index,
                    bytes = outcome.bytes_completed,
                    "request complete"
                );
            }
            Ok(outcome) => {
                completed += outcome.bytes_completed;
                failed += outcome.total_bytes - outcome.bytes_completed;
                if let Some(err) = &outcome.error {
                    warn!(
                        request = index,
                        ok_bytes = outcome.bytes_completed,
                        error = %err,
                        "request failed"
                    );
                }
            }
            Err(err) => warn!(request = index, error = %err, "request rejected"),
        }
    }
    handle.shutdown();
    worker.await.context("worker task")?;

    let snapshot = metrics::snapshot();
    info!(completed, failed, "workload finished");
    info!(
        reads = snapshot.read.count,
        read_bytes = snapshot.read.bytes,
        writes = snapshot.write.count,
        write_bytes = snapshot.write.bytes,
        status_polls = snapshot.status_polls,
        single_block_fallbacks = snapshot.single_block_fallbacks,
        reinits = snapshot.reinits,
        removals = snapshot.removals,
        fatal_requests = snapshot.fatal_requests,
        "engine metrics"
    );
    Ok(())
}
