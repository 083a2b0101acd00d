//! Host stand-ins for the kernel context a capture handler runs in.

#![allow(dead_code)]

use std::mem::size_of;

use plainsight_common::bounded::copy_str;
use plainsight_common::{
    comm_key, MemoryReader, ReadFault, Record, TargetSets, TaskContext, COMM_LEN,
};

#[derive(Clone, Debug)]
pub struct FakeTask {
    pub tgid: u32,
    pub tid: u32,
    pub uid: u32,
    pub gid: u32,
    pub now_ns: u64,
    pub comm: [u8; COMM_LEN],
    pub parent: u32,
    pub exit_code: i32,
}

impl FakeTask {
    pub fn new(tgid: u32, tid: u32) -> Self {
        Self {
            tgid,
            tid,
            uid: 1000,
            gid: 1000,
            now_ns: 42_000,
            comm: comm("fake"),
            parent: 1,
            exit_code: 0,
        }
    }

    pub fn leader(tgid: u32) -> Self {
        Self::new(tgid, tgid)
    }

    pub fn with_comm(mut self, name: &str) -> Self {
        self.comm = comm(name);
        self
    }

    pub fn with_parent(mut self, parent: u32) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_ids(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }
}

impl TaskContext for FakeTask {
    fn pid_tgid(&self) -> u64 {
        (u64::from(self.tgid) << 32) | u64::from(self.tid)
    }

    fn uid_gid(&self) -> u64 {
        (u64::from(self.gid) << 32) | u64::from(self.uid)
    }

    fn ktime_ns(&self) -> u64 {
        self.now_ns
    }

    fn comm(&self) -> [u8; COMM_LEN] {
        self.comm
    }

    fn parent_tgid(&self) -> u32 {
        self.parent
    }

    fn exit_code(&self) -> i32 {
        self.exit_code
    }
}

/// Raw 16-byte comm as the kernel stores it: unterminated when full
pub fn comm(name: &str) -> [u8; COMM_LEN] {
    let mut out = [0u8; COMM_LEN];
    let n = name.len().min(COMM_LEN);
    out[..n].copy_from_slice(&name.as_bytes()[..n]);
    out
}

/// Address space made of disjoint readable regions
#[derive(Default)]
pub struct FakeMemory {
    regions: Vec<(u64, Vec<u8>)>,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(mut self, addr: u64, bytes: impl Into<Vec<u8>>) -> Self {
        self.regions.push((addr, bytes.into()));
        self
    }

    fn region(&self, addr: u64) -> Option<&[u8]> {
        self.regions.iter().find_map(|(base, bytes)| {
            let offset = usize::try_from(addr.checked_sub(*base)?).ok()?;
            bytes.get(offset..).filter(|b| !b.is_empty())
        })
    }
}

impl MemoryReader for FakeMemory {
    fn read_bytes(&self, src: u64, dst: &mut [u8]) -> Result<(), ReadFault> {
        let region = self.region(src).ok_or(ReadFault)?;
        let bytes = region.get(..dst.len()).ok_or(ReadFault)?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    fn read_str(&self, src: u64, dst: &mut [u8]) -> Result<usize, ReadFault> {
        let region = self.region(src).ok_or(ReadFault)?;
        Ok(copy_str(dst, region))
    }
}

/// Host-side contents of `TARGET_PIDS` and `TARGET_COMMS`
#[derive(Default)]
pub struct FakeTargets {
    pub pids: Vec<u32>,
    pub comms: Vec<[u8; COMM_LEN]>,
}

impl FakeTargets {
    pub fn pids(pids: &[u32]) -> Self {
        Self { pids: pids.to_vec(), ..Self::default() }
    }

    pub fn comms(names: &[&str]) -> Self {
        let comms = names.iter().map(|n| comm_key(n.as_bytes())).collect();
        Self { comms, ..Self::default() }
    }
}

impl TargetSets for FakeTargets {
    fn has_pid(&self, tgid: u32) -> bool {
        self.pids.contains(&tgid)
    }

    fn has_comm(&self, comm: &[u8; COMM_LEN]) -> bool {
        self.comms.contains(comm)
    }
}

/// Copy a consumed record out of ring memory
pub fn read_record<T: Record>(bytes: &[u8]) -> T {
    assert_eq!(bytes.len(), size_of::<T>(), "record length");
    let tag = u32::from_ne_bytes(bytes[..4].try_into().unwrap());
    assert_eq!(tag, T::TAG, "record tag");
    // SAFETY: length checked above; `Record` types accept any byte pattern.
    unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<T>()) }
}

pub fn c_str(buf: &[u8]) -> &str {
    let len = plainsight_common::bounded::c_str_len(buf);
    std::str::from_utf8(&buf[..len]).unwrap()
}
