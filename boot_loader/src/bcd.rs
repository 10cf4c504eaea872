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

//! On-disk layout of BCD containers and the directory walk that selects the
//! lintel span. The directory is an append log of fixed-size records with no
//! end marker beyond the declared count; the lintel-first rule lets one pass
//! compute the contiguous span to load.

use std::convert::TryFrom;
use std::io::SeekFrom;

use anyhow::{anyhow, Context, Result};
use log::info;

use crate::error::BootLoaderError;
use crate::source::ImageSource;
use util::byte_code::{read_obj, ByteCode};

/// Logical block size; every BCD offset and length counts these.
pub const BLOCK_SIZE: u64 = 512;
/// Absolute byte offset of a container header within the image.
pub const HEADER_OFFSET: u64 = 512;
/// Magic opening a BCD container header.
pub const BCD_SIGNATURE: u64 = 0x0123_4567_8ABC_DEF0;

#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone)]
pub struct BcdHeader {
    pub signature: u64,
    pub files_num: u32,
    pub free_lba: u64,
}

impl ByteCode for BcdHeader {}

#[repr(C, packed)]
#[derive(Debug, Default, Copy, Clone)]
pub struct BcdFile {
    pub lba: u64,
    pub size: u64,
    /// Blocks actually written, as opposed to blocks reserved.
    pub init_size: u64,
    pub tag: u32,
    /// Carried through for the firmware; never verified here.
    pub checksum: u32,
}

impl ByteCode for BcdFile {}

/// Closed set of directory record kinds a BCD container may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BcdFileTag {
    Lintel = 0,
    LintelObj = 1,
    X86Bios = 2,
    X86BiosRecovery = 3,
    LibRcomp = 4,
    BcdBootInfo = 5,
    Codebase = 6,
    Log = 7,
    VideoBios = 8,
    KexecJumper = 9,
}

impl TryFrom<u32> for BcdFileTag {
    type Error = BootLoaderError;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(BcdFileTag::Lintel),
            1 => Ok(BcdFileTag::LintelObj),
            2 => Ok(BcdFileTag::X86Bios),
            3 => Ok(BcdFileTag::X86BiosRecovery),
            4 => Ok(BcdFileTag::LibRcomp),
            5 => Ok(BcdFileTag::BcdBootInfo),
            6 => Ok(BcdFileTag::Codebase),
            7 => Ok(BcdFileTag::Log),
            8 => Ok(BcdFileTag::VideoBios),
            9 => Ok(BcdFileTag::KexecJumper),
            other => Err(BootLoaderError::UnrecognizedTag(other)),
        }
    }
}

/// The derived span selected for one contiguous load: the lintel record,
/// possibly extended through the container's free block pointer when a
/// kexec jumper trails it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SuperFile {
    pub lba: u64,
    pub size: u64,
    /// Block count of the unextended lintel record, kept for locating the
    /// embedded sub-container after the load.
    pub init_size: u64,
    pub has_jumper: bool,
}

/// Probe the byte source for a BCD container header at its fixed offset.
///
/// `Ok(None)` means a raw lintel image, a recognized outcome rather than a
/// failure. Not being able to read the fixed-size header at all is fatal.
pub fn detect_header(source: &mut dyn ImageSource) -> Result<Option<BcdHeader>> {
    source
        .seek(SeekFrom::Start(HEADER_OFFSET))
        .with_context(|| "Can't seek to possible BCD header")?;
    let header: BcdHeader =
        read_obj(source).with_context(|| "Can't read BCD header, image might be truncated")?;

    if { header.signature } != BCD_SIGNATURE {
        return Ok(None);
    }
    Ok(Some(header))
}

/// Walk the directory records following the header and derive the super
/// file. The source must be positioned right behind the header.
///
/// The lintel record has to be the very first one and fully initialized; a
/// kexec jumper record extends the span up to the free block pointer and
/// ends the scan.
pub fn select_super_file(source: &mut dyn ImageSource, header: &BcdHeader) -> Result<SuperFile> {
    let mut super_file: Option<SuperFile> = None;

    for index in 0..header.files_num {
        let file: BcdFile = read_obj(source).with_context(|| {
            format!(
                "Can't read file {} header of BCD directory, image might be truncated",
                index
            )
        })?;
        let (lba, size, init_size, checksum) =
            (file.lba, file.size, file.init_size, file.checksum);
        let tag = BcdFileTag::try_from(file.tag)?;
        info!(
            "BCD file {}: {:?}, offset {} blocks, size {} blocks, init_size {} blocks, checksum 0x{:08x}",
            index, tag, lba, size, init_size, checksum
        );

        match tag {
            BcdFileTag::Lintel => {
                if index != 0 {
                    return Err(anyhow!(BootLoaderError::LintelNotFirst(index)));
                }
                if size > init_size {
                    return Err(anyhow!(BootLoaderError::LintelUninitialized(
                        size, init_size
                    )));
                }
                super_file = Some(SuperFile {
                    lba,
                    size,
                    init_size: size,
                    has_jumper: false,
                });
            }
            BcdFileTag::KexecJumper => {
                let selected = super_file
                    .as_mut()
                    .ok_or_else(|| anyhow!(BootLoaderError::LintelNotFound))?;
                selected.size = { header.free_lba }
                    .checked_sub(selected.lba)
                    .ok_or_else(|| {
                        anyhow!(BootLoaderError::FreeLbaBehindLintel(
                            header.free_lba,
                            selected.lba
                        ))
                    })?;
                selected.has_jumper = true;
                break;
            }
            _ => {}
        }
    }

    match super_file {
        Some(selected) if selected.size > 0 => Ok(selected),
        _ => Err(anyhow!(BootLoaderError::LintelNotFound)),
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::io::Cursor;

    use util::checksum::obj_checksum;

    use super::*;

    pub(crate) fn record(tag: BcdFileTag, lba: u64, size: u64, init_size: u64) -> BcdFile {
        let mut file = BcdFile {
            lba,
            size,
            init_size,
            tag: tag as u32,
            checksum: 0,
        };
        file.checksum = obj_checksum(&file);
        file
    }

    pub(crate) fn container_prefix(files: &[BcdFile], free_lba: u64) -> Vec<u8> {
        let mut bytes = vec![0_u8; HEADER_OFFSET as usize];
        let header = BcdHeader {
            signature: BCD_SIGNATURE,
            files_num: files.len() as u32,
            free_lba,
        };
        bytes.extend_from_slice(header.as_bytes());
        for file in files {
            bytes.extend_from_slice(file.as_bytes());
        }
        bytes
    }

    #[test]
    fn test_detect_raw_image() {
        let mut data = vec![0_u8; 2048];
        data[512] = 0xaa;
        let mut source = Cursor::new(data);
        assert!(detect_header(&mut source).unwrap().is_none());
    }

    #[test]
    fn test_detect_truncated_source() {
        let mut source = Cursor::new(vec![0_u8; 520]);
        assert!(detect_header(&mut source).is_err());
    }

    #[test]
    fn test_detect_container() {
        let prefix = container_prefix(&[record(BcdFileTag::Lintel, 8, 4, 4)], 12);
        let mut source = Cursor::new(prefix);
        let header = detect_header(&mut source).unwrap().unwrap();
        assert_eq!({ header.files_num }, 1);
        assert_eq!({ header.free_lba }, 12);
    }

    fn walk(files: &[BcdFile], free_lba: u64) -> Result<SuperFile> {
        let prefix = container_prefix(files, free_lba);
        let mut source = Cursor::new(prefix);
        let header = detect_header(&mut source).unwrap().unwrap();
        select_super_file(&mut source, &header)
    }

    #[test]
    fn test_plain_lintel_selection() {
        let selected = walk(&[record(BcdFileTag::Lintel, 8, 4, 6)], 20).unwrap();
        assert_eq!(
            selected,
            SuperFile {
                lba: 8,
                size: 4,
                init_size: 4,
                has_jumper: false
            }
        );
    }

    #[test]
    fn test_jumper_extends_span() {
        let selected = walk(
            &[
                record(BcdFileTag::Lintel, 8, 4, 4),
                record(BcdFileTag::Log, 12, 2, 2),
                record(BcdFileTag::KexecJumper, 14, 1, 1),
            ],
            20,
        )
        .unwrap();
        assert_eq!(selected.lba, 8);
        assert_eq!(selected.size, 12); // free_lba 20 - lba 8
        assert_eq!(selected.init_size, 4);
        assert!(selected.has_jumper);
    }

    #[test]
    fn test_jumper_short_circuits_scan() {
        // The record behind the jumper carries a tag that would be rejected,
        // but the scan must stop before reaching it.
        let selected = walk(
            &[
                record(BcdFileTag::Lintel, 8, 4, 4),
                record(BcdFileTag::KexecJumper, 14, 1, 1),
                BcdFile {
                    tag: 77,
                    ..Default::default()
                },
            ],
            20,
        )
        .unwrap();
        assert!(selected.has_jumper);
    }

    #[test]
    fn test_lintel_must_be_first() {
        let err = walk(
            &[
                record(BcdFileTag::Log, 4, 2, 2),
                record(BcdFileTag::Lintel, 8, 4, 4),
            ],
            20,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::LintelNotFirst(1))
        ));
    }

    #[test]
    fn test_uninitialized_lintel_rejected() {
        let err = walk(&[record(BcdFileTag::Lintel, 8, 6, 4)], 20).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::LintelUninitialized(6, 4))
        ));
    }

    #[test]
    fn test_lintel_missing() {
        let err = walk(&[record(BcdFileTag::Log, 4, 2, 2)], 20).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::LintelNotFound)
        ));
    }

    #[test]
    fn test_jumper_without_lintel_rejected() {
        let err = walk(&[record(BcdFileTag::KexecJumper, 14, 1, 1)], 20).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::LintelNotFound)
        ));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut bogus = record(BcdFileTag::Log, 4, 2, 2);
        bogus.tag = 42;
        let err = walk(&[record(BcdFileTag::Lintel, 8, 4, 4), bogus], 20).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BootLoaderError>(),
            Some(BootLoaderError::UnrecognizedTag(42))
        ));
    }

    #[test]
    fn test_truncated_directory() {
        let mut prefix = container_prefix(&[record(BcdFileTag::Lintel, 8, 4, 4)], 20);
        // Claim a second record that is not there.
        let header = BcdHeader {
            signature: BCD_SIGNATURE,
            files_num: 2,
            free_lba: 20,
        };
        prefix[512..512 + 20].copy_from_slice(header.as_bytes());
        let mut source = Cursor::new(prefix);
        let header = detect_header(&mut source).unwrap().unwrap();
        assert!(select_super_file(&mut source, &header).is_err());
    }
}
