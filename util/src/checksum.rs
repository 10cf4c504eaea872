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

use crate::byte_code::ByteCode;

/// Additive byte checksum, as carried by BCD directory records.
pub fn checksum(slice: &[u8]) -> u32 {
    let mut sum: u32 = 0;

    for byte in slice.iter() {
        sum = sum.wrapping_add(u32::from(*byte));
    }

    sum
}

pub fn obj_checksum<T: ByteCode>(t: &T) -> u32 {
    checksum(t.as_bytes())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[1, 2, 3]), 6);
        assert_eq!(checksum(&[0xff; 4]), 0x3fc);
        assert_eq!(obj_checksum(&0x0102_0304_u32), 10);
    }
}
