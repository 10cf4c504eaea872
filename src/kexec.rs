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

use std::fs::File;
use std::os::raw::c_void;

use anyhow::{bail, Context, Result};
use vmm_sys_util::ioctl::ioctl_with_ref;
use vmm_sys_util::{ioctl_ioc_nr, ioctl_iow_nr};

use boot_loader::LoadedImage;

const KEXEC_DEVICE: &str = "/dev/kexec";

/// Mirrors struct lintel_reboot_param from the e2k kernel headers. The
/// kernel requires the structure itself to be page aligned, on top of the
/// alignment of the image it points to.
#[repr(C, align(4096))]
struct LintelRebootParam {
    image: *mut c_void,
    image_size: u64,
}

ioctl_iow_nr!(LINTEL_REBOOT, 0x45, 1, LintelRebootParam);

/// Hand the machine over to the loaded lintel image. A successful call
/// never returns; any return from the ioctl is a failure.
pub fn kexec_lintel(image: &LoadedImage) -> Result<()> {
    let fd = File::open(KEXEC_DEVICE)
        .with_context(|| format!("Can't open kexec device {}", KEXEC_DEVICE))?;

    let param = LintelRebootParam {
        image: image.as_ptr() as *mut c_void,
        image_size: image.image_size(),
    };
    // SAFETY: the fd is a valid kexec device; param and the image buffer
    // stay alive across the call.
    let ret = unsafe { ioctl_with_ref(&fd, LINTEL_REBOOT(), &param) };
    bail!(
        "Failure performing ioctl (returned {}) to start lintel: {}",
        ret,
        std::io::Error::last_os_error()
    );
}
