//! # plainsight - Main Entry Point
//!
//! Loads the kernel programs, attaches the lifecycle tracepoints and the TLS
//! probes, then polls both ring buffers until Ctrl+C or `--duration`.

use anyhow::{Context, Result};
use aya::maps::RingBuf;
use clap::Parser;
use crossbeam_channel::bounded;
use log::{info, warn};
use std::time::{Duration, Instant};

use plainsight::cli::Args;
use plainsight::config::SensorConfig;
use plainsight::domain::{ConfigError, SensorError};
use plainsight::preflight::run_preflight_checks;
use plainsight::sensor::{
    attach_lifecycle_tracepoints, attach_tls_probes, init_ebpf_logger, load_ebpf_program,
    print_capture_stats, read_capture_stats, register_comms, register_targets, spawn_output_worker,
    write_capture_config, write_task_layout, EventProcessor, OutputSink,
};
use plainsight::tls_library::find_tls_library;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

/// Events buffered between the drain loop and the output worker
const OUTPUT_QUEUE: usize = 4096;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        return EXIT_USAGE;
    }
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let config = SensorConfig::from_args(&args)?;
    let quiet = config.quiet;

    run_preflight_checks(&config.targets, quiet)?;

    let tls_lib = if config.tls {
        Some(find_tls_library(config.tls_lib.as_deref(), &config.targets)?)
    } else {
        None
    };

    if !quiet {
        println!("plainsight v{}", env!("CARGO_PKG_VERSION"));
        if let Some(ref lib) = tls_lib {
            println!("tls library: {}", lib.display());
        }
        if !config.targets.is_empty() {
            let pids: Vec<String> = config.targets.iter().map(|p| p.0.to_string()).collect();
            println!("targets: {}", pids.join(", "));
        }
        if !config.target_comms.is_empty() {
            println!("commands: {}", config.target_comms.join(", "));
        }
    }

    // ── Load and seed maps before anything is attached ──────────────────
    let mut bpf = load_ebpf_program(&config)?;
    init_ebpf_logger(&mut bpf);
    write_capture_config(&mut bpf, config.capture_config())?;
    register_targets(&mut bpf, &config.targets)?;
    register_comms(&mut bpf, &config.comm_keys())?;

    // ── Attach ──────────────────────────────────────────────────────────
    let mut process_ring = if config.process {
        if write_task_layout(&mut bpf)?.is_none() {
            warn!("ppid and exit codes will read as 0");
        }
        attach_lifecycle_tracepoints(&mut bpf)?;
        Some(RingBuf::try_from(
            bpf.take_map("PROCESS_EVENTS").ok_or(SensorError::MapNotFound("PROCESS_EVENTS"))?,
        )?)
    } else {
        None
    };

    let mut tls_ring = if let Some(ref lib) = tls_lib {
        attach_tls_probes(&mut bpf, lib, config.single_target())?;
        Some(RingBuf::try_from(
            bpf.take_map("TLS_EVENTS").ok_or(SensorError::MapNotFound("TLS_EVENTS"))?,
        )?)
    } else {
        None
    };

    // ── Output worker ───────────────────────────────────────────────────
    let sink = OutputSink::create(!quiet, config.export.as_deref())
        .context("Failed to create export file")?;
    if !quiet {
        if let Some(ref path) = config.export {
            println!("export: {}", path.display());
        }
    }
    let (event_tx, event_rx) = bounded(OUTPUT_QUEUE);
    let output = spawn_output_worker(event_rx, sink);
    let mut processor = EventProcessor::new(event_tx);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let mut exit_reason = "interrupted";
    info!("Capturing");

    loop {
        if let Some(limit) = config.duration {
            if started.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        if let Some(ring) = process_ring.as_mut() {
            processor.drain(ring);
        }
        if let Some(ring) = tls_ring.as_mut() {
            processor.drain(ring);
        }

        tokio::select! {
            () = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    // Pick up whatever was committed after the last poll
    if let Some(ring) = process_ring.as_mut() {
        processor.drain(ring);
    }
    if let Some(ring) = tls_ring.as_mut() {
        processor.drain(ring);
    }

    let consumer = processor.finish();
    let written = output
        .join()
        .map_err(|_| anyhow::anyhow!("output worker panicked"))?
        .context("Failed to write events")?;

    eprintln!(
        "\n{}: {:.1}s, {} events (process: {}, tls: {}, malformed: {}, dropped: {}, exported: {})",
        exit_reason,
        started.elapsed().as_secs_f64(),
        consumer.received,
        consumer.process_events,
        consumer.tls_events,
        consumer.malformed,
        consumer.dropped,
        written.exported,
    );
    match read_capture_stats(&bpf) {
        Ok(stats) => print_capture_stats(&stats),
        Err(e) => warn!("Could not read kernel counters: {e}"),
    }

    if !quiet {
        if let Some(ref path) = config.export {
            println!("saved: {}", path.display());
        }
    }

    Ok(())
}
