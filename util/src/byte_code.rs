// Copyright (c) 2024 Huawei Technologies Co.,Ltd. All rights reserved.
//
// KexecLintel is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan
// PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//         http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY
// KIND, EITHER EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO
// NON-INFRINGEMENT, MERCHANTABILITY OR FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.

use std::io::Read;
use std::mem::size_of;
use std::slice::{from_raw_parts, from_raw_parts_mut};

/// A trait bound for plain-old-data types which are safe to expose as a byte
/// slice and to reconstruct from one. Implementors must be `#[repr(C)]`
/// (usually packed) with every bit pattern valid.
pub trait ByteCode: Default + Copy + Send + Sync {
    /// View the object as its raw bytes; inverse of `from_bytes`.
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: the object is initialized and Self is plain old data.
        unsafe { from_raw_parts((self as *const Self).cast::<u8>(), size_of::<Self>()) }
    }

    /// View the object as mutable raw bytes; inverse of `from_mut_bytes`.
    fn as_mut_bytes(&mut self) -> &mut [u8] {
        // SAFETY: the object is initialized and Self is plain old data.
        unsafe { from_raw_parts_mut((self as *mut Self).cast::<u8>(), size_of::<Self>()) }
    }

    /// Reinterpret a byte slice of exactly `size_of::<Self>()` bytes as a
    /// reference to Self. Returns `None` on any length mismatch.
    fn from_bytes(data: &[u8]) -> Option<&Self> {
        if data.len() != size_of::<Self>() {
            return None;
        }

        // SAFETY: length was checked; packed POD types tolerate any
        // placement of the underlying bytes.
        unsafe { data.as_ptr().cast::<Self>().as_ref() }
    }

    /// Mutable counterpart of `from_bytes`.
    fn from_mut_bytes(data: &mut [u8]) -> Option<&mut Self> {
        if data.len() != size_of::<Self>() {
            return None;
        }

        // SAFETY: length was checked; packed POD types tolerate any
        // placement of the underlying bytes.
        unsafe { data.as_mut_ptr().cast::<Self>().as_mut() }
    }
}

// Unsigned integers are trivially plain old data.
impl ByteCode for u8 {}
impl ByteCode for u16 {}
impl ByteCode for u32 {}
impl ByteCode for u64 {}
impl ByteCode for usize {}

/// Read exactly one `T` from a stream at its current position.
pub fn read_obj<T: ByteCode, R: Read + ?Sized>(reader: &mut R) -> std::io::Result<T> {
    let mut obj = T::default();
    reader.read_exact(obj.as_mut_bytes())?;
    Ok(obj)
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;

    #[repr(C, packed)]
    #[derive(Copy, Clone, Default)]
    struct Record {
        offset: u64,
        kind: u32,
    }

    impl ByteCode for Record {}

    #[test]
    fn test_int_round_trip() {
        let num: u32 = 0x1234_5678;
        assert_eq!(num.as_bytes(), &[0x78, 0x56, 0x34, 0x12]);

        let bytes = [0x78_u8, 0x56, 0x34, 0x12];
        assert_eq!(*u32::from_bytes(&bytes).unwrap(), 0x1234_5678);

        let short = [0x78_u8, 0x56];
        assert!(u32::from_bytes(&short).is_none());
    }

    #[test]
    fn test_struct_view() {
        let mut bytes = [0_u8; 12];
        bytes[0] = 0x80;
        bytes[8] = 9;

        let record = Record::from_bytes(&bytes).unwrap();
        assert_eq!({ record.offset }, 0x80);
        assert_eq!({ record.kind }, 9);

        let record = Record::from_mut_bytes(&mut bytes).unwrap();
        record.kind = 3;
        assert_eq!(bytes[8], 3);
    }

    #[test]
    fn test_read_obj() {
        let mut stream = Cursor::new(vec![0xef_u8, 0xbe, 0xad, 0xde, 0xff]);
        let value: u32 = read_obj(&mut stream).unwrap();
        assert_eq!(value, 0xdead_beef);

        // Only one trailing byte left, not enough for another u32.
        assert!(read_obj::<u32, _>(&mut stream).is_err());
    }
}
