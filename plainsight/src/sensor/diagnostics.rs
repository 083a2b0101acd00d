use aya::maps::PerCpuArray;
use aya::Ebpf;
use plainsight_common::Counter;

use crate::domain::SensorError;

/// Kernel-side capture counters summed across CPUs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub emitted: u64,
    pub channel_full: u64,
    pub store_full: u64,
    pub read_fault: u64,
    pub unmatched: u64,
}

impl CaptureStats {
    fn slot_mut(&mut self, counter: Counter) -> &mut u64 {
        match counter {
            Counter::Emitted => &mut self.emitted,
            Counter::ChannelFull => &mut self.channel_full,
            Counter::StoreFull => &mut self.store_full,
            Counter::ReadFault => &mut self.read_fault,
            Counter::Unmatched => &mut self.unmatched,
        }
    }

    #[must_use]
    pub fn get(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Emitted => self.emitted,
            Counter::ChannelFull => self.channel_full,
            Counter::StoreFull => self.store_full,
            Counter::ReadFault => self.read_fault,
            Counter::Unmatched => self.unmatched,
        }
    }

    /// Events lost in the kernel for any reason
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.channel_full + self.store_full + self.read_fault
    }
}

/// Read `CAPTURE_STATS`
///
/// # Errors
/// Returns an error if the map is missing or a slot cannot be read
pub fn read_capture_stats(bpf: &Ebpf) -> Result<CaptureStats, SensorError> {
    let map: PerCpuArray<_, u64> = PerCpuArray::try_from(
        bpf.map("CAPTURE_STATS").ok_or(SensorError::MapNotFound("CAPTURE_STATS"))?,
    )?;

    let mut stats = CaptureStats::default();
    for counter in Counter::ALL {
        let per_cpu = map.get(&(counter as u32), 0)?;
        *stats.slot_mut(counter) = per_cpu.iter().sum();
    }
    Ok(stats)
}

/// Print the kernel counters on stderr
pub fn print_capture_stats(stats: &CaptureStats) {
    let line: Vec<String> =
        Counter::ALL.iter().map(|c| format!("{}={}", c.name(), stats.get(*c))).collect();
    eprintln!("kernel: {}", line.join(" "));
}
