//! Length clamps and NUL-bounded copies used before every fixed-size write.
//!
//! Nothing here loops more than the length of a fixed-size array, so every
//! helper is usable from verified eBPF code.

use crate::MAX_DATA_SIZE;

/// Bytes to capture for a call that reported `ret` and asked for `requested`.
///
/// `None` when the call failed or moved nothing (`ret <= 0`). Otherwise the
/// result is clamped to the request and to the payload capacity, so an
/// over-length report can never size a copy past `MAX_DATA_SIZE`.
#[inline(always)]
#[must_use]
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub fn payload_len(ret: i64, requested: u64) -> Option<usize> {
    if ret <= 0 {
        return None;
    }
    let mut len = ret as u64;
    if requested != 0 && len > requested {
        len = requested;
    }
    if len > MAX_DATA_SIZE as u64 {
        len = MAX_DATA_SIZE as u64;
    }
    Some(len as usize)
}

/// Force a NUL into the last byte so the field is terminated within capacity.
#[inline(always)]
pub fn nul_terminate(buf: &mut [u8]) {
    if let Some(last) = buf.last_mut() {
        *last = 0;
    }
}

/// Mark a string field empty.
#[inline(always)]
pub fn clear_str(buf: &mut [u8]) {
    if let Some(first) = buf.first_mut() {
        *first = 0;
    }
    nul_terminate(buf);
}

/// Copy a possibly unterminated string into `dst`, truncating.
///
/// Copies at most `dst.len() - 1` bytes, stops at the first NUL in `src`, and
/// always terminates. Returns the number of bytes copied, excluding the NUL.
#[inline(always)]
pub fn copy_str(dst: &mut [u8], src: &[u8]) -> usize {
    let Some(cap) = dst.len().checked_sub(1) else {
        return 0;
    };
    let mut n = 0;
    while n < cap && n < src.len() && src[n] != 0 {
        dst[n] = src[n];
        n += 1;
    }
    dst[n] = 0;
    n
}

/// Length of the NUL-terminated string at the front of `buf`.
#[must_use]
pub fn c_str_len(buf: &[u8]) -> usize {
    buf.iter().position(|&b| b == 0).unwrap_or(buf.len())
}
