//! # plainsight - eBPF Process Lifecycle and TLS Plaintext Sensor
//!
//! plainsight watches two things from the kernel: process lifecycle
//! (exec, exit, fork) through scheduler tracepoints, and the plaintext of TLS
//! traffic by probing `SSL_read`/`SSL_write` in `libssl`. Both are delivered
//! to userspace as fixed-layout records through BPF ring buffers.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     eBPF Programs (Kernel)                      │
//! │  • Tracepoints: sched_process_{exec,exit,fork}                  │
//! │  • Uprobes: SSL_read / SSL_write entry  → pending call tables   │
//! │  • Uretprobes: SSL_read / SSL_write     → plaintext records     │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ PROCESS_EVENTS / TLS_EVENTS ring buffers
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    plainsight (This Crate)                      │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │    Sensor    │──▶│    Decode    │──▶│    Output    │         │
//! │  │ (load/drain) │   │  (records)   │   │ (lines/JSON) │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The capture logic itself lives in `plainsight-common` and is generic over
//! its channel, store and task context, so it runs unchanged in the kernel
//! programs and in host tests.
//!
//! ## Module Structure
//!
//! - [`sensor`]: load, size and attach the kernel programs; drain the rings;
//!   print or export events; read the kernel drop counters
//! - [`decode`]: validate raw records and turn them into owned events
//! - [`config`]: validated capacities and flags built from [`cli`]
//! - [`btf`]: `task_struct` offsets from kernel BTF
//! - [`tls_library`]: find the `libssl` to probe
//! - [`preflight`]: root, kernel version and target checks
//! - [`domain`]: newtypes and error enums
//!
//! ## Typical Usage
//!
//! ```bash
//! # Everything, system-wide
//! sudo ./plainsight
//!
//! # TLS traffic of one process, exported as JSON lines
//! sudo ./plainsight --pid <PID> --export events.jsonl
//! ```

pub mod btf;
pub mod cli;
pub mod config;
pub mod decode;
pub mod domain;
pub mod preflight;
pub mod sensor;
pub mod tls_library;
