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

//! Video adapter teardown. Current kernels require a specific reset
//! sequence to be performed on the framebuffer device before kexec:
//! unbind the vtconsole, unload the driver module, remove the PCI device,
//! and pulse the bridge behind it.

use std::ffi::CString;
use std::fs::File;
use std::os::raw::c_ulong;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use nix::kmod::{delete_module, DeleteModuleFlags};
use vmm_sys_util::ioctl::ioctl_with_mut_ref;

use crate::cmdline::Flags;
use crate::pci::bridge_reset;
use util::sysfs::{first_line, read_sysfs, readlink_basename, write_sysfs};

// From linux/fb.h; not an _IO-encoded request.
const FBIOGET_CON2FBMAP: c_ulong = 0x460f;

const ACTIVE_TTY_FILE: &str = "/sys/class/tty/tty0/active";
const VTCON_CLASS: &str = "/sys/class/vtconsole";
const FB_CONSOLE_NAME: &str = "frame buffer device";

#[repr(C)]
struct FbCon2FbMap {
    console: u32,
    framebuffer: u32,
}

/// Number of the tty named by a `ttyN` attribute value.
fn tty_number(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("tty")?;
    match digits.parse::<u32>() {
        Ok(num) if num > 0 => Some(num),
        _ => None,
    }
}

fn active_tty() -> Result<u32> {
    let value = read_sysfs(ACTIVE_TTY_FILE).with_context(|| {
        format!(
            "Can't read {} (maybe you don't have tty enabled, try -t <N> if you have)",
            ACTIVE_TTY_FILE
        )
    })?;
    let name = first_line(&value);
    info!("Active tty: {}", name);
    tty_number(name).ok_or_else(|| {
        anyhow!(
            "Incorrect data in {}, can't autodetect active tty. Use -t <N> to specify it",
            ACTIVE_TTY_FILE
        )
    })
}

/// Which framebuffer the given console is mapped to, or `None` when no
/// console is mapped at all.
fn con2fbmap(tty: u32, fbdev: &str) -> Result<Option<u32>> {
    let file =
        File::open(fbdev).with_context(|| format!("Can't open framebuffer device {}", fbdev))?;
    let mut map = FbCon2FbMap {
        console: tty,
        framebuffer: 0,
    };
    // SAFETY: the fd is a valid framebuffer device and the map struct
    // matches the layout the ioctl expects.
    let ret = unsafe { ioctl_with_mut_ref(&file, FBIOGET_CON2FBMAP, &mut map) };
    if ret < 0 {
        bail!(
            "Can't perform FBIOGET_CON2FBMAP ioctl: {}",
            std::io::Error::last_os_error()
        );
    }
    if map.framebuffer == u32::MAX {
        return Ok(None);
    }
    Ok(Some(map.framebuffer))
}

/// PCI id of the adapter implementing the active framebuffer, or `None`
/// when the machine has no framebuffer console to reset.
fn active_fb_pci_id(tty: Option<u32>) -> Result<Option<String>> {
    let tty = match tty {
        Some(num) => num,
        None => active_tty()?,
    };

    let mut fbdevs: Vec<_> = glob::glob("/dev/fb*")
        .with_context(|| "Malformed framebuffer pattern")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| "Read error looking for framebuffers")?;
    fbdevs.sort();
    let Some(fbdev) = fbdevs.first() else {
        info!("No /dev/fb* exist; you might have no video adapter, or use VGA console instead of framebuffer one.");
        return Ok(None);
    };

    info!(
        "Detecting active framebuffer device for tty{} by {}...",
        tty,
        fbdev.display()
    );
    let Some(fb) = con2fbmap(tty, &fbdev.to_string_lossy())? else {
        info!("No console is mapped to frame buffer device; you might have no video adapter, or use VGA console instead of framebuffer one.");
        return Ok(None);
    };
    info!("Active framebuffer device is {}.", fb);

    let pciid = readlink_basename(&format!("/sys/class/graphics/fb{}/device", fb))?;
    if pciid.starts_with("vga16fb") {
        info!("Framebuffer console is {}, no need to reset.", pciid);
        return Ok(None);
    }
    Ok(Some(pciid))
}

/// Unbind the first bound virtual console whose name carries `signature`.
fn unbind_vtcon(signature: &str) -> Result<()> {
    let entries = std::fs::read_dir(VTCON_CLASS)
        .with_context(|| format!("Can't open vtconsole directory {}", VTCON_CLASS))?;

    for entry in entries {
        let entry = entry.with_context(|| "Can't read vtconsole directory")?;
        let vtcon = entry.file_name().to_string_lossy().into_owned();
        if vtcon.starts_with('.') {
            continue;
        }

        let bind_path = format!("{}/{}/bind", VTCON_CLASS, vtcon);
        let bound = read_sysfs(&bind_path)?.starts_with('1');
        let name = read_sysfs(&format!("{}/{}/name", VTCON_CLASS, vtcon))?;
        let name = first_line(&name);
        info!(
            "Console {} is {}, {}.",
            vtcon,
            name,
            if bound { "active" } else { "inactive" }
        );

        if bound && name.contains(signature) {
            info!("Active {} is found. Unbinding...", signature);
            return write_sysfs(&bind_path, "0\n");
        }
    }

    info!("Can't find console that is {}, no reset needed.", signature);
    Ok(())
}

fn unload_driver_module(pciid: &str) -> Result<()> {
    let modname =
        readlink_basename(&format!("/sys/bus/pci/devices/{}/driver", pciid))?;
    info!("Unloading module {}.", modname);
    let modname = CString::new(modname).with_context(|| "Malformed module name")?;
    delete_module(modname.as_c_str(), DeleteModuleFlags::O_NONBLOCK)
        .with_context(|| "Can't remove module")
}

/// Bridge id directly above the device in the PCI topology.
fn parent_bridge_id(pciid: &str) -> Result<String> {
    let devlink = format!("/sys/bus/pci/devices/{}", pciid);
    let target = std::fs::read_link(&devlink)
        .with_context(|| format!("Can't read symbolic link {}", devlink))?;
    let bridge = target
        .parent()
        .and_then(Path::file_name)
        .ok_or_else(|| anyhow!("Can't derive bridge of PCI device {}", pciid))?;
    Ok(bridge.to_string_lossy().into_owned())
}

/// Run the teardown steps that are still enabled in `flags`.
pub fn reset_fbdriver(tty: Option<u32>, flags: &Flags) -> Result<()> {
    let pciid = if flags.rmmod || flags.rmpci || flags.bridgerst {
        match active_fb_pci_id(tty)? {
            Some(id) => Some(id),
            None => return Ok(()),
        }
    } else {
        None
    };

    if flags.vtunbind {
        unbind_vtcon(FB_CONSOLE_NAME)?;
    }

    if let Some(pciid) = pciid {
        if flags.rmmod {
            unload_driver_module(&pciid)?;
        }

        // The bridge path has to be derived before the device is removed.
        let bridge = if flags.bridgerst {
            Some(parent_bridge_id(&pciid)?)
        } else {
            None
        };

        if flags.rmpci {
            info!("Removing PCI device {}.", pciid);
            write_sysfs(&format!("/sys/bus/pci/devices/{}/remove", pciid), "1\n")?;
        }

        if let Some(bridge) = bridge {
            info!("Performing bridge reset of {}.", bridge);
            bridge_reset(&bridge)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_tty_number() {
        assert_eq!(tty_number("tty1"), Some(1));
        assert_eq!(tty_number("tty12"), Some(12));
        assert_eq!(tty_number("tty0"), None);
        assert_eq!(tty_number("ttyS0"), None);
        assert_eq!(tty_number("console"), None);
        assert_eq!(tty_number("tty"), None);
    }
}
