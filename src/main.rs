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

mod checks;
mod cmdline;
mod fbreset;
mod kexec;
mod pci;

use std::env;
use std::process::ExitCode;

use anyhow::Result;
use log::info;

use boot_loader::{load_image, KexecInfo, LoaderConfig, STDIN_MARKER};
use cmdline::{parse_cmdline, Config};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Vec<String>) -> Result<()> {
    let Some(config) = parse_cmdline(args)? else {
        return Ok(());
    };
    util::logger::init_log(String::new())?;

    if config.flags.mounts {
        checks::check_mountpoints()?;
    }
    if config.flags.iommu {
        checks::check_iommu()?;
    }
    if config.flags.runlevel {
        checks::check_runlevel()?;
    }

    let kexec_info = build_kexec_info(&config)?;
    let image = load_image(&LoaderConfig {
        image: config.image.clone(),
        // The stdin marker never reaches the glob; plain paths expand so
        // that a quoted wildcard argument works.
        expand_glob: config.image != STDIN_MARKER,
        inject_info: true,
        kexec_info,
    })?;

    if config.flags.resetfb {
        info!("Resetting video driver...");
        fbreset::reset_fbdriver(config.tty, &config.flags)?;
    }

    if config.flags.fsflush {
        info!("Flushing filesystems...");
        checks::flush_filesystems()?;
    }

    if !config.flags.kexec {
        return Ok(());
    }

    info!("Rebooting to lintel...");
    let result = kexec::kexec_lintel(&image);
    if config.flags.fsflush {
        info!("Note: you should at least remount everything back to rw to bring system back to work");
    }
    result
}

/// Fill the kexec_info the loader injects into a jumper-bearing image.
/// Untouched fields stay all-ones, the firmware convention for values the
/// user did not configure.
fn build_kexec_info(config: &Config) -> Result<KexecInfo> {
    let mut kexec_info = KexecInfo::new_unset();

    if config.flags.setvideo {
        if let Some(addr) = pci::detect_active_vga()? {
            kexec_info.vga_pci_addr_domain = addr.domain;
            kexec_info.vga_pci_addr_bus = addr.bus;
            kexec_info.vga_pci_addr_slot = addr.slot;
            kexec_info.vga_pci_addr_func = addr.func;
        }
    }

    if let Some(disk) = config.disk_number {
        kexec_info.boot_disk_num = disk;
        if config.flags.trusted {
            kexec_info.interactive = 0;
        }
    }

    Ok(kexec_info)
}
