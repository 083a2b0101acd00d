//! # Record Decoding
//!
//! Turns raw ring buffer records into owned [`CapturedEvent`]s. Every record
//! is checked against its layout before it is trusted: length must match the
//! tag exactly, enumerations must be in range and payload lengths must be
//! within capacity. Anything else is a [`DecodeError`] and is dropped by the
//! caller.

use plainsight_common::bounded::c_str_len;
use plainsight_common::{
    Direction, ProcessEvent, ProcessKind, Record, SslDataEvent, MAX_DATA_SIZE, RECORD_PROCESS,
    RECORD_SSL_DATA,
};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::mem::size_of;

use crate::domain::{DecodeError, ExitStatus};

/// One decoded record from either capturer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CapturedEvent {
    Process(ProcessRecord),
    Tls(TlsRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    Exec,
    Exit,
    Fork,
}

impl From<ProcessKind> for LifecycleKind {
    fn from(kind: ProcessKind) -> Self {
        match kind {
            ProcessKind::Exec => Self::Exec,
            ProcessKind::Exit => Self::Exit,
            ProcessKind::Fork => Self::Fork,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessRecord {
    pub timestamp_ns: u64,
    pub kind: LifecycleKind,
    pub pid: u32,
    pub ppid: u32,
    pub uid: u32,
    pub gid: u32,
    pub comm: String,
    /// Executable path, EXEC only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exe: Option<String>,
    /// Raw auxiliary code as captured
    pub code: i32,
}

impl ProcessRecord {
    /// Decoded exit status for EXIT records
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus> {
        (self.kind == LifecycleKind::Exit).then(|| ExitStatus::from_raw(self.code))
    }

    /// New child's pid for FORK records
    #[must_use]
    pub fn child_pid(&self) -> Option<u32> {
        if self.kind == LifecycleKind::Fork {
            u32::try_from(self.code).ok()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsDirection {
    Read,
    Write,
}

impl From<Direction> for TlsDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Read => Self::Read,
            Direction::Write => Self::Write,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsRecord {
    pub timestamp_ns: u64,
    pub direction: TlsDirection,
    pub pid: u32,
    pub tid: u32,
    pub uid: u32,
    pub comm: String,
    pub data: Vec<u8>,
}

// Payloads are text more often than not; anything that is not UTF-8 goes out
// as hex so the JSON line stays lossless.
impl Serialize for TlsRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TlsRecord", 9)?;
        state.serialize_field("timestamp_ns", &self.timestamp_ns)?;
        state.serialize_field("direction", &self.direction)?;
        state.serialize_field("pid", &self.pid)?;
        state.serialize_field("tid", &self.tid)?;
        state.serialize_field("uid", &self.uid)?;
        state.serialize_field("comm", &self.comm)?;
        state.serialize_field("data_len", &self.data.len())?;
        match std::str::from_utf8(&self.data) {
            Ok(text) => {
                state.serialize_field("encoding", "utf8")?;
                state.serialize_field("data", text)?;
            }
            Err(_) => {
                state.serialize_field("encoding", "hex")?;
                state.serialize_field("data", &hex::encode(&self.data))?;
            }
        }
        state.end()
    }
}

/// Decode one ring buffer record.
///
/// # Errors
/// Returns [`DecodeError`] for records that are short, carry an unknown tag,
/// have the wrong length for their tag, or hold out-of-range fields.
pub fn decode_record(bytes: &[u8]) -> Result<CapturedEvent, DecodeError> {
    let tag = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_ne_bytes)
        .ok_or(DecodeError::Truncated { len: bytes.len() })?;

    match tag {
        RECORD_PROCESS => decode_process(&*read_exact::<ProcessEvent>(bytes)?),
        RECORD_SSL_DATA => decode_tls(&*read_exact::<SslDataEvent>(bytes)?),
        other => Err(DecodeError::UnknownTag(other)),
    }
}

fn read_exact<T: Record>(bytes: &[u8]) -> Result<Box<T>, DecodeError> {
    if bytes.len() != size_of::<T>() {
        return Err(DecodeError::LengthMismatch {
            tag: T::TAG,
            expected: size_of::<T>(),
            actual: bytes.len(),
        });
    }
    // SAFETY: the length matches and `Record` types accept any byte pattern.
    #[allow(unsafe_code)]
    let record = unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<T>()) };
    Ok(Box::new(record))
}

fn decode_process(event: &ProcessEvent) -> Result<CapturedEvent, DecodeError> {
    let kind = event.kind().ok_or(DecodeError::UnknownKind(event.kind))?;
    let exe = (kind == ProcessKind::Exec).then(|| c_string(&event.exe));

    Ok(CapturedEvent::Process(ProcessRecord {
        timestamp_ns: event.timestamp_ns,
        kind: kind.into(),
        pid: event.pid,
        ppid: event.ppid,
        uid: event.uid,
        gid: event.gid,
        comm: c_string(&event.comm),
        exe,
        code: event.exit_code,
    }))
}

fn decode_tls(event: &SslDataEvent) -> Result<CapturedEvent, DecodeError> {
    let direction = event.direction().ok_or(DecodeError::UnknownDirection(event.direction))?;
    let len = event.data_len as usize;
    if len == 0 || len > MAX_DATA_SIZE {
        return Err(DecodeError::BadPayloadLength { len: event.data_len, max: MAX_DATA_SIZE });
    }

    Ok(CapturedEvent::Tls(TlsRecord {
        timestamp_ns: event.timestamp_ns,
        direction: direction.into(),
        pid: event.pid,
        tid: event.tid,
        uid: event.uid,
        comm: c_string(&event.comm),
        data: event.payload().to_vec(),
    }))
}

/// NUL-bounded field to `String`, replacing invalid UTF-8
fn c_string(field: &[u8]) -> String {
    String::from_utf8_lossy(&field[..c_str_len(field)]).into_owned()
}
