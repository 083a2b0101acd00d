//! Console lines and JSON-lines export for decoded events.
//!
//! Runs on its own thread behind a bounded channel so slow terminals or
//! disks never stall the ring drain loop.

use crossbeam_channel::Receiver;
use log::debug;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread::JoinHandle;

use crate::decode::{CapturedEvent, LifecycleKind, ProcessRecord, TlsDirection, TlsRecord};
use crate::domain::ExportError;

/// Bytes of payload shown on the console
const PREVIEW_LEN: usize = 64;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutputStats {
    pub printed: u64,
    pub exported: u64,
}

/// Where decoded events go
pub struct OutputSink<W: Write> {
    console: bool,
    export: Option<W>,
    stats: OutputStats,
}

impl OutputSink<BufWriter<File>> {
    /// Console output plus an optional JSON-lines file
    ///
    /// # Errors
    /// Returns an error if the export file cannot be created
    pub fn create(console: bool, export: Option<&Path>) -> Result<Self, ExportError> {
        let export = export.map(File::create).transpose()?.map(BufWriter::new);
        Ok(Self::new(console, export))
    }
}

impl<W: Write> OutputSink<W> {
    pub fn new(console: bool, export: Option<W>) -> Self {
        Self { console, export, stats: OutputStats::default() }
    }

    /// Print and export one event
    ///
    /// # Errors
    /// Returns an error if the export writer fails
    pub fn write(&mut self, event: &CapturedEvent) -> Result<(), ExportError> {
        if self.console {
            println!("{}", format_event(event));
            self.stats.printed += 1;
        }
        if let Some(writer) = self.export.as_mut() {
            write_json_line(writer, event)?;
            self.stats.exported += 1;
        }
        Ok(())
    }

    /// Flush the export writer and hand it back
    ///
    /// # Errors
    /// Returns an error if the final flush fails
    pub fn finish(mut self) -> Result<(OutputStats, Option<W>), ExportError> {
        if let Some(writer) = self.export.as_mut() {
            writer.flush()?;
        }
        Ok((self.stats, self.export))
    }
}

/// Serialize `event` as one JSON object followed by a newline
///
/// # Errors
/// Returns an error if serialization or the write fails
pub fn write_json_line<W: Write>(writer: &mut W, event: &CapturedEvent) -> Result<(), ExportError> {
    serde_json::to_writer(&mut *writer, event)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Consume events until every sender is dropped
pub fn spawn_output_worker<W: Write + Send + 'static>(
    rx: Receiver<CapturedEvent>,
    mut sink: OutputSink<W>,
) -> JoinHandle<Result<OutputStats, ExportError>> {
    std::thread::spawn(move || {
        for event in rx {
            sink.write(&event)?;
        }
        debug!("Event channel closed, flushing output");
        let (stats, _) = sink.finish()?;
        Ok(stats)
    })
}

/// One console line per event
#[must_use]
pub fn format_event(event: &CapturedEvent) -> String {
    match event {
        CapturedEvent::Process(p) => format_process(p),
        CapturedEvent::Tls(t) => format_tls(t),
    }
}

fn format_process(p: &ProcessRecord) -> String {
    match p.kind {
        LifecycleKind::Exec => format!(
            "[EXEC] pid={} ppid={} uid={} comm={} exe={}",
            p.pid,
            p.ppid,
            p.uid,
            p.comm,
            p.exe.as_deref().unwrap_or("?")
        ),
        LifecycleKind::Exit => {
            let mut line =
                format!("[EXIT] pid={} ppid={} uid={} comm={}", p.pid, p.ppid, p.uid, p.comm);
            if let Some(status) = p.exit_status() {
                let _ = write!(line, " status={status}");
            }
            line
        }
        LifecycleKind::Fork => format!(
            "[FORK] pid={} child={} comm={}",
            p.pid,
            p.child_pid().map_or_else(|| "?".to_string(), |c| c.to_string()),
            p.comm
        ),
    }
}

fn format_tls(t: &TlsRecord) -> String {
    let label = match t.direction {
        TlsDirection::Read => "SSL_READ",
        TlsDirection::Write => "SSL_WRITE",
    };
    let shown = &t.data[..t.data.len().min(PREVIEW_LEN)];
    let ellipsis = if t.data.len() > PREVIEW_LEN { "..." } else { "" };
    format!(
        "[{label}] pid={} tid={} comm={} len={} \"{}{ellipsis}\"",
        t.pid,
        t.tid,
        t.comm,
        t.data.len(),
        shown.escape_ascii()
    )
}
