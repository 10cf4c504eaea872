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

use std::mem::size_of;
use std::slice::{from_raw_parts, from_raw_parts_mut};

use crate::UtilError;

pub fn is_aligned(offset: u64, align: u32) -> bool {
    offset & (u64::from(align) - 1) == 0
}

pub fn align_down(offset: u64, align: u32) -> u64 {
    offset - (offset & (u64::from(align) - 1))
}

pub fn align_up(offset: u64, align: u32) -> u64 {
    if !is_aligned(offset, align) {
        align_down(offset, align) + u64::from(align)
    } else {
        offset
    }
}

/// Zero-initialized heap buffer whose base address honors a caller-chosen
/// alignment. Freed when dropped.
pub struct AlignedBuf {
    ptr: *mut u8,
    len: usize,
}

impl AlignedBuf {
    pub fn new(len: usize, align: usize) -> Result<Self, UtilError> {
        if !align.is_power_of_two() || align < size_of::<usize>() {
            return Err(UtilError::BadAlignment(align));
        }

        let mut ptr: *mut libc::c_void = std::ptr::null_mut();
        // SAFETY: posix_memalign only writes the out pointer.
        let ret = unsafe { libc::posix_memalign(&mut ptr, align, len) };
        if ret != 0 || ptr.is_null() {
            return Err(UtilError::AlignedAlloc(len, align));
        }
        // SAFETY: `ptr` addresses a freshly allocated region of `len` bytes.
        unsafe { std::ptr::write_bytes(ptr.cast::<u8>(), 0, len) };

        Ok(AlignedBuf {
            ptr: ptr.cast::<u8>(),
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the allocation stays valid for the lifetime of self.
        unsafe { from_raw_parts(self.ptr, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the allocation stays valid and exclusively owned.
        unsafe { from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // SAFETY: `ptr` came from posix_memalign and is freed exactly once.
        unsafe { libc::free(self.ptr.cast::<libc::c_void>()) };
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_align_math() {
        assert!(is_aligned(0, 4096));
        assert!(is_aligned(8192, 4096));
        assert!(!is_aligned(513, 512));
        assert_eq!(align_down(513, 512), 512);
        assert_eq!(align_up(513, 512), 1024);
        assert_eq!(align_up(1024, 512), 1024);
    }

    #[test]
    fn test_aligned_buf() {
        let mut buf = AlignedBuf::new(1000, 4096).unwrap();
        assert_eq!(buf.len(), 1000);
        assert_eq!(buf.as_ptr() as usize % 4096, 0);
        assert!(buf.as_slice().iter().all(|b| *b == 0));

        buf.as_mut_slice()[999] = 0xa5;
        assert_eq!(buf.as_slice()[999], 0xa5);
    }

    #[test]
    fn test_bad_alignment() {
        assert!(matches!(
            AlignedBuf::new(512, 100),
            Err(UtilError::BadAlignment(100))
        ));
    }
}
