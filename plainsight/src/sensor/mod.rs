//! Sensor runtime
//!
//! - Loading, sizing and attaching the kernel programs
//! - Draining and decoding the ring buffers
//! - Console and JSON-lines output
//! - Kernel counter readout

pub mod diagnostics;
pub mod ebpf_setup;
pub mod event_processor;
pub mod output;

pub use diagnostics::{print_capture_stats, read_capture_stats, CaptureStats};
pub use ebpf_setup::{
    attach_lifecycle_tracepoints, attach_tls_probes, init_ebpf_logger, load_ebpf_program,
    register_comms, register_targets, write_capture_config, write_task_layout,
};
pub use event_processor::{ConsumerStats, EventProcessor};
pub use output::{format_event, spawn_output_worker, write_json_line, OutputSink, OutputStats};
