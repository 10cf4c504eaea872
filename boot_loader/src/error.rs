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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootLoaderError {
    #[error("Io")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("Can't allocate aligned buffer for the lintel image")]
    Alloc {
        #[from]
        source: util::UtilError,
    },
    // Source resolution.
    #[error("Malformed image pattern {0}: {1}")]
    MalformedPattern(String, String),
    #[error("No files found matching {0}")]
    NoSourceMatch(String),
    #[error("Ambiguous pattern {0} matching {1} files")]
    AmbiguousSource(String, usize),
    // Structural invariants of the BCD directory.
    #[error("Lintel file must be the first one in BCD, found at index {0}")]
    LintelNotFirst(u32),
    #[error("Can't read lintel file from BCD: size {0} blocks exceeds initialized {1} blocks")]
    LintelUninitialized(u64, u64),
    #[error("Can't find lintel file in BCD")]
    LintelNotFound,
    #[error("Unrecognized BCD file tag {0}")]
    UnrecognizedTag(u32),
    #[error("Container free block pointer {0} precedes the lintel record at block {1}")]
    FreeLbaBehindLintel(u64, u64),
    #[error("Lintel span at block {0} of {1} blocks does not fit in byte addressing")]
    SpanOverflow(u64, u64),
    // Embedded sub-container.
    #[error("Embedded BCD directory lies outside the loaded lintel image")]
    SubHeaderOutOfBounds,
    #[error("Can't find BCD signature in the embedded directory of the super file")]
    SubHeaderMagic,
    #[error("Can't find kexec jumper record in the embedded directory of the super file")]
    JumperMissing,
    #[error("Ambiguous kexec jumper: embedded directory of the super file holds {0} records")]
    JumperAmbiguous(usize),
}
