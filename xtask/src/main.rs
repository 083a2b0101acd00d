use anyhow::{Context, Result};
use clap::Parser;
use std::process::Command;

const EBPF_PACKAGE: &str = "plainsight-ebpf";

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
enum Cmd {
    /// Compile the kernel programs to BPF bytecode
    BuildEbpf {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
        #[arg(long)]
        release: bool,
    },
    /// Build everything and run the sensor as root
    Run {
        #[arg(long, default_value = "bpfel-unknown-none")]
        target: String,
        /// Arguments passed through to `plainsight`
        #[arg(last = true)]
        sensor_args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Cmd::BuildEbpf { target, release } => build_ebpf(&target, release)?,
        Cmd::Run { target, sensor_args } => run(&target, &sensor_args)?,
    }

    Ok(())
}

fn build_ebpf(target: &str, _release: bool) -> Result<()> {
    // Debug builds pull in formatting code the BPF linker rejects, so the
    // kernel side is always built with release settings.
    let status = Command::new("cargo")
        .args(["+nightly", "build", "--package", EBPF_PACKAGE, "--target", target])
        .args(["-Z", "build-std=core", "--release"])
        .status()
        .context("Failed to build eBPF program")?;

    if !status.success() {
        anyhow::bail!("Failed to build eBPF program");
    }

    println!("✓ eBPF program built successfully");
    println!("  Target: {target}");
    println!("  Profile: release (always)");

    Ok(())
}

fn run(target: &str, sensor_args: &[String]) -> Result<()> {
    build_ebpf(target, true)?;

    let status = Command::new("cargo")
        .args(["build", "--release", "--package", "plainsight"])
        .status()
        .context("Failed to build plainsight")?;
    if !status.success() {
        anyhow::bail!("Failed to build plainsight");
    }

    // Probes and tracepoints need root; keep RUST_LOG
    let status = Command::new("sudo")
        .arg("-E")
        .arg("target/release/plainsight")
        .args(sensor_args)
        .status()
        .context("Failed to start plainsight")?;

    if !status.success() {
        anyhow::bail!("plainsight exited with {status}");
    }
    Ok(())
}
