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

//! # Boot Loader
//!
//! The crate that resolves a lintel boot image and materializes it in memory
//! ahead of the kexec handoff.
//!
//! ## Design
//!
//! This crate offers support for:
//! 1. Opening the image from a filesystem path (glob patterns allowed, one
//!    match required) or from standard input through a caching stream that
//!    emulates seeking over a one-pass source.
//! 2. Telling raw lintel images from BCD containers, and walking a container
//!    directory to select the lintel span, extended through the free block
//!    pointer when a kexec jumper trails it.
//! 3. Loading the selected span into a page-aligned buffer whose recorded
//!    size is byte-exact, then patching the embedded sub-container
//!    directory and the trailing kexec_info block in place.
//!
//! ## Examples
//!
//! ```no_run
//! use boot_loader::{load_image, KexecInfo, LoaderConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LoaderConfig {
//!         image: "/opt/mcst/lintel/bin/lintel_*.disk".to_string(),
//!         expand_glob: true,
//!         inject_info: true,
//!         kexec_info: KexecInfo::new_unset(),
//!     };
//!
//!     let image = load_image(&config)?;
//!     // `image` now holds the lintel binary, aligned and byte-exact,
//!     // ready to be handed to the kexec device.
//!     let _ = image.image_size();
//!     Ok(())
//! }
//! ```

pub mod error;

mod bcd;
mod loader;
mod source;

pub use bcd::{
    BcdFile, BcdFileTag, BcdHeader, SuperFile, BCD_SIGNATURE, BLOCK_SIZE, HEADER_OFFSET,
};
pub use error::BootLoaderError;
pub use loader::{
    load_image, KexecInfo, LoadedImage, LoaderConfig, IMAGE_ALIGN, KEXEC_INFO_MAGIC,
    KEXEC_INFO_VERSION_1,
};
pub use source::{open_source, ImageSource, StreamSource, STDIN_MARKER};
