//! Fixed-width fields shared by every on-disk record.
//!
//! Integers are little-endian and encoded by `binrw`; strings are stored in
//! fixed-size byte arrays padded with zeros.

use std::borrow::Cow;

/// Width of the boot sector signature.
pub const SIGNATURE_LEN: usize = 9;

/// Width of a directory entry name.
pub const FILENAME_LEN: usize = 13;

/// Width of an allocation-table entry.
pub const FAT_ENTRY_SIZE: usize = 4;

/// Width of the record count at the start of a directory cluster.
pub const DIR_HEADER_SIZE: usize = 4;

/// Default size of a data cluster.
pub const CLUSTER_SIZE: u32 = 512;

/// Copies `s` into a zero padded array, truncating at `N` bytes.
pub fn pad<const N: usize>(s: &str) -> [u8; N] {
    let mut buf = [0; N];
    let len = s.len().min(N);
    buf[..len].copy_from_slice(&s.as_bytes()[..len]);
    buf
}

/// Bytes up to the first zero.
pub fn unpad(field: &[u8]) -> Cow<'_, str> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end])
}

/// The stored form of a name, i.e. what [`unpad`] returns after [`pad`].
pub fn stored_name(name: &str) -> String {
    let field: [u8; FILENAME_LEN] = pad(name);
    unpad(&field).into_owned()
}

pub(crate) fn bool_to_u8(b: &bool) -> u8 {
    u8::from(*b)
}

pub(crate) fn u8_to_bool(b: u8) -> bool {
    b != 0
}
