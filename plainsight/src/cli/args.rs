//! CLI argument definitions

use clap::Parser;
use plainsight_common::{DEFAULT_PENDING_CALLS, DEFAULT_RING_BYTES};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "plainsight",
    about = "Observe process lifecycle and TLS plaintext with eBPF",
    after_help = "\
EXAMPLES:
    sudo plainsight                              Everything, system-wide
    sudo plainsight --pid 1234                   TLS traffic of one process
    sudo plainsight --comm curl --comm wget      TLS traffic of programs by name
    sudo plainsight --no-tls --leader-exits-only Lifecycle only, one exit per process
    sudo plainsight --export events.jsonl -q     JSON lines, no console output"
)]
pub struct Args {
    /// Only capture TLS traffic of this process (repeatable)
    #[arg(short, long = "pid", value_name = "PID")]
    pub pids: Vec<u32>,

    /// Only capture TLS traffic of threads with this command name (repeatable)
    #[arg(short, long = "comm", value_name = "NAME")]
    pub comms: Vec<String>,

    /// TLS library to probe (auto-detected if omitted)
    #[arg(long, value_name = "PATH")]
    pub tls_lib: Option<PathBuf>,

    /// Do not capture exec/exit/fork
    #[arg(long)]
    pub no_process: bool,

    /// Do not capture TLS plaintext
    #[arg(long)]
    pub no_tls: bool,

    /// Report only whole-process exits, not the exit of every thread
    #[arg(long)]
    pub leader_exits_only: bool,

    /// Lifecycle ring buffer size in bytes (power of two)
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_RING_BYTES)]
    pub process_ring_bytes: u32,

    /// TLS ring buffer size in bytes (power of two)
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_RING_BYTES)]
    pub tls_ring_bytes: u32,

    /// In-flight TLS calls tracked per direction
    #[arg(long, value_name = "N", default_value_t = DEFAULT_PENDING_CALLS)]
    pub pending_calls: u32,

    /// Write events to FILE as JSON lines
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["plainsight"]).unwrap();
        assert!(args.pids.is_empty());
        assert!(args.comms.is_empty());
        assert!(!args.leader_exits_only);
        assert_eq!(args.process_ring_bytes, DEFAULT_RING_BYTES);
        assert_eq!(args.pending_calls, DEFAULT_PENDING_CALLS);
        assert!(!args.no_process && !args.no_tls);
    }

    #[test]
    fn test_repeated_pid() {
        let args = Args::try_parse_from(["plainsight", "--pid", "10", "-p", "20"]).unwrap();
        assert_eq!(args.pids, vec![10, 20]);
    }

    #[test]
    fn test_repeated_comm() {
        let args = Args::try_parse_from(["plainsight", "--comm", "curl", "-c", "python3"]).unwrap();
        assert_eq!(args.comms, vec!["curl", "python3"]);
    }

    #[test]
    fn test_rejects_non_numeric_pid() {
        assert!(Args::try_parse_from(["plainsight", "--pid", "abc"]).is_err());
    }
}
