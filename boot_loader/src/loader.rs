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

use std::fmt;
use std::io::SeekFrom;
use std::mem::size_of;

use anyhow::{anyhow, Context, Result};
use log::info;

use crate::bcd::{
    detect_header, select_super_file, BcdFile, BcdFileTag, BcdHeader, SuperFile, BCD_SIGNATURE,
    BLOCK_SIZE,
};
use crate::error::BootLoaderError;
use crate::source::{open_source, ImageSource};
use util::align::{align_up, AlignedBuf};
use util::byte_code::ByteCode;

/// Base alignment required of the loaded image.
pub const IMAGE_ALIGN: u32 = 4096;
/// Leading magic of a kexec_info block ("data", little endian).
pub const KEXEC_INFO_MAGIC: u32 = 0x6174_6164;
/// The only kexec_info layout this loader understands.
pub const KEXEC_INFO_VERSION_1: u32 = 0x0100_0000;

// Bytes occupied by the signature, version and size words which injection
// must never clear.
const KEXEC_INFO_KEEP: usize = 3 * size_of::<u32>();

/// Per-invocation loader parameters. The deltas between the historical
/// loader variants are all expressed here instead of forked code paths.
#[derive(Clone)]
pub struct LoaderConfig {
    /// Image path, glob pattern, or [`crate::STDIN_MARKER`].
    pub image: String,
    /// Expand shell glob patterns when resolving `image`.
    pub expand_glob: bool,
    /// Rewrite the image's kexec_info block with `kexec_info` after loading.
    pub inject_info: bool,
    pub kexec_info: KexecInfo,
}

/// Boot parameters handed to lintel through the kexec_info block that
/// occupies the last block of a jumper-bearing image. 128 32-bit words.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct KexecInfo {
    pub signature: u32,
    pub version: u32,
    pub size: u32,
    pub interactive: u32,
    pub boot_disk_num: u32,
    pub vga_pci_addr_domain: u32,
    pub vga_pci_addr_bus: u32,
    pub vga_pci_addr_slot: u32,
    pub vga_pci_addr_func: u32,
    reserved: [u32; 119],
}

impl Default for KexecInfo {
    fn default() -> Self {
        // SAFETY: KexecInfo is plain old data; all-zero is a valid value.
        unsafe { std::mem::zeroed() }
    }
}

impl ByteCode for KexecInfo {}

impl KexecInfo {
    /// All-ones value, the firmware convention for "not configured".
    pub fn new_unset() -> Self {
        let mut info = KexecInfo::default();
        for byte in info.as_mut_bytes() {
            *byte = 0xff;
        }
        info
    }
}

/// The materialized lintel image.
///
/// The allocation is aligned to [`IMAGE_ALIGN`] and may be longer than the
/// requested span; `image_size` records the requested byte count exactly.
/// The kexec jump address arithmetic depends on that exactness, so the two
/// sizes are kept strictly apart. The buffer is freed whenever the value
/// drops, on success and on every error path alike.
pub struct LoadedImage {
    buf: AlignedBuf,
    image_size: u64,
}

impl LoadedImage {
    fn new(image_size: u64) -> Result<Self> {
        let aligned_size =
            align_up(image_size, IMAGE_ALIGN).max(u64::from(IMAGE_ALIGN)) as usize;
        let buf =
            AlignedBuf::new(aligned_size, IMAGE_ALIGN as usize).map_err(BootLoaderError::from)?;
        Ok(LoadedImage { buf, image_size })
    }

    /// Exact byte count of the loaded span, not the allocation length.
    pub fn image_size(&self) -> u64 {
        self.image_size
    }

    pub fn allocation_len(&self) -> usize {
        self.buf.len()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.buf.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf.as_slice()[..self.image_size as usize]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let image_size = self.image_size as usize;
        &mut self.buf.as_mut_slice()[..image_size]
    }
}

// The buffer content is not worth dumping; the two sizes are.
impl fmt::Debug for LoadedImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LoadedImage")
            .field("image_size", &self.image_size)
            .field("allocation_len", &self.buf.len())
            .finish()
    }
}

/// Resolve, detect and materialize the boot image described by `config`.
pub fn load_image(config: &LoaderConfig) -> Result<LoadedImage> {
    let mut source = open_source(&config.image, config.expand_glob)?;
    match detect_header(source.as_mut())? {
        Some(header) => load_bcd(source.as_mut(), &header, config),
        None => load_raw(source.as_mut()),
    }
}

/// Read `image_size` bytes from the source's current position into a fresh
/// aligned buffer. Shared by the raw and the container path.
fn read_image(source: &mut dyn ImageSource, image_size: u64) -> Result<LoadedImage> {
    let mut image = LoadedImage::new(image_size)?;
    source.read_exact(image.as_mut_slice()).with_context(|| {
        format!(
            "Can't read {} bytes of lintel image, image might be truncated",
            image_size
        )
    })?;
    info!(
        "Loaded lintel: {} bytes at {:p} ({} bytes aligned at 0x{:x})",
        image_size,
        image.as_ptr(),
        image.allocation_len(),
        IMAGE_ALIGN
    );
    Ok(image)
}

fn load_raw(source: &mut dyn ImageSource) -> Result<LoadedImage> {
    info!("Image seems to be raw lintel, so boot disk, VGA card and trusted mode won't be passed to lintel.");
    let image_size = source
        .seek(SeekFrom::End(0))
        .with_context(|| "Can't seek lintel image")?;
    source
        .rewind()
        .with_context(|| "Can't rewind lintel image")?;
    read_image(source, image_size)
}

fn load_bcd(
    source: &mut dyn ImageSource,
    header: &BcdHeader,
    config: &LoaderConfig,
) -> Result<LoadedImage> {
    info!("Image is a BCD container ({} files).", { header.files_num });

    let super_file = select_super_file(source, header)?;
    // A corrupt free block pointer must not wrap the byte arithmetic.
    let byte_offset = super_file
        .lba
        .checked_mul(BLOCK_SIZE)
        .ok_or_else(|| anyhow!(BootLoaderError::SpanOverflow(super_file.lba, super_file.size)))?;
    let byte_count = super_file
        .size
        .checked_mul(BLOCK_SIZE)
        .ok_or_else(|| anyhow!(BootLoaderError::SpanOverflow(super_file.lba, super_file.size)))?;
    source
        .seek(SeekFrom::Start(byte_offset))
        .with_context(|| "Can't seek to start of lintel binary in BCD container")?;
    let mut image = read_image(source, byte_count)?;

    if super_file.has_jumper {
        patch_jumper_info(&mut image, &super_file)?;
        if config.inject_info {
            inject_kexec_info(&config.kexec_info, &mut image, &super_file);
        }
    } else {
        info!("BCD container has no kexec jumper, so boot disk, VGA card and trusted mode won't be passed to lintel.");
    }

    Ok(image)
}

/// Rewrite the kexec jumper record of the image's embedded BCD directory so
/// that it names the span the outer loader actually used. The jumper was
/// written with placeholder coordinates; after the loader repositioned the
/// trailing fragment, this is how the stub learns where it really landed.
fn patch_jumper_info(image: &mut LoadedImage, super_file: &SuperFile) -> Result<()> {
    info!("BCD container carries a kexec jumper, patching the embedded directory.");

    // The embedded directory occupies the last block of the unextended
    // lintel file.
    let map_block = super_file
        .init_size
        .checked_sub(1)
        .ok_or_else(|| anyhow!(BootLoaderError::SubHeaderOutOfBounds))?;
    let header_offset = map_block
        .checked_mul(BLOCK_SIZE)
        .ok_or_else(|| anyhow!(BootLoaderError::SubHeaderOutOfBounds))?
        as usize;
    let record_size = size_of::<BcdFile>();
    let bytes = image.as_mut_slice();

    let header_end = header_offset + size_of::<BcdHeader>();
    if header_end > bytes.len() {
        return Err(anyhow!(BootLoaderError::SubHeaderOutOfBounds));
    }
    let header = *BcdHeader::from_bytes(&bytes[header_offset..header_end])
        .ok_or_else(|| anyhow!(BootLoaderError::SubHeaderOutOfBounds))?;
    if { header.signature } != BCD_SIGNATURE {
        return Err(anyhow!(BootLoaderError::SubHeaderMagic));
    }

    let files_num = header.files_num as usize;
    let records_end = files_num
        .checked_mul(record_size)
        .and_then(|len| len.checked_add(header_end))
        .ok_or_else(|| anyhow!(BootLoaderError::SubHeaderOutOfBounds))?;
    if records_end > bytes.len() {
        return Err(anyhow!(BootLoaderError::SubHeaderOutOfBounds));
    }

    // The jumper must be unique; both a missing and a duplicated record
    // would leave the stub pointing at the wrong blocks.
    let mut jumper_offset = None;
    let mut jumper_count = 0_usize;
    for index in 0..files_num {
        let offset = header_end + index * record_size;
        let record = BcdFile::from_bytes(&bytes[offset..offset + record_size])
            .ok_or_else(|| anyhow!(BootLoaderError::SubHeaderOutOfBounds))?;
        if { record.tag } == BcdFileTag::KexecJumper as u32 {
            jumper_count += 1;
            jumper_offset.get_or_insert(offset);
        }
    }
    if jumper_count > 1 {
        return Err(anyhow!(BootLoaderError::JumperAmbiguous(jumper_count)));
    }

    let offset = jumper_offset.ok_or_else(|| anyhow!(BootLoaderError::JumperMissing))?;
    let record = BcdFile::from_mut_bytes(&mut bytes[offset..offset + record_size])
        .ok_or_else(|| anyhow!(BootLoaderError::SubHeaderOutOfBounds))?;
    record.lba = super_file.lba;
    record.size = super_file.size;
    Ok(())
}

/// Copy caller-supplied boot parameters into the kexec_info block in the
/// image's last block. An unknown magic or version leaves every byte
/// untouched; this is best-effort parameter passing, never a failure.
fn inject_kexec_info(source_info: &KexecInfo, image: &mut LoadedImage, super_file: &SuperFile) {
    let offset = super_file
        .size
        .checked_sub(1)
        .and_then(|block| block.checked_mul(BLOCK_SIZE));
    let bytes = image.as_mut_slice();
    let target = offset
        .and_then(|offset| bytes.get_mut(offset as usize..offset as usize + size_of::<KexecInfo>()))
        .and_then(KexecInfo::from_mut_bytes);
    let Some(target) = target else {
        info!("Loaded image is too small to hold a kexec_info block, so boot disk, VGA card and trusted mode won't be passed to lintel.");
        return;
    };

    if { target.signature } != KEXEC_INFO_MAGIC {
        info!("Kexec jumper does not contain kexec_info structure, so boot disk, VGA card and trusted mode won't be passed to lintel.");
        return;
    }
    if { target.version } != KEXEC_INFO_VERSION_1 {
        info!("Kexec jumper contains kexec_info structure of unsupported version, so boot disk, VGA card and trusted mode won't be passed to lintel.");
        return;
    }

    let declared = (target.size as usize).min(size_of::<KexecInfo>());
    if declared > KEXEC_INFO_KEEP {
        target.as_mut_bytes()[KEXEC_INFO_KEEP..declared].fill(0);
    }
    target.interactive = source_info.interactive;
    target.boot_disk_num = source_info.boot_disk_num;
    target.vga_pci_addr_domain = source_info.vga_pci_addr_domain;
    target.vga_pci_addr_bus = source_info.vga_pci_addr_bus;
    target.vga_pci_addr_slot = source_info.vga_pci_addr_slot;
    target.vga_pci_addr_func = source_info.vga_pci_addr_func;
}
