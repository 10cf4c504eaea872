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

//! Host state checks that run before anything irreversible happens, and the
//! filesystem flush performed right before the handoff.

use std::thread::sleep;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::info;
use nix::mount::{mount, MsFlags};
use nix::sys::stat::stat;

use util::sysfs::write_sysfs;

fn get_dev(path: &str) -> Result<u64> {
    let st = stat(path).with_context(|| format!("Can't stat mountpoint {}", path))?;
    Ok(st.st_dev)
}

fn try_mount(src: &str, tgt: &str) -> Result<()> {
    info!("Filesystem {} ({}) is not mounted, trying to fix it...", tgt, src);
    mount(Some(src), tgt, Some(src), MsFlags::empty(), None::<&str>)
        .with_context(|| format!("Can't mount {}", tgt))
}

/// The pseudo filesystems this tool relies on have to be mounted; a
/// mountpoint sharing its device id with / is a bare directory.
pub fn check_mountpoints() -> Result<()> {
    let dev_root = get_dev("/")?;
    if dev_root == get_dev("/dev")? {
        try_mount("devtmpfs", "/dev")?;
    }
    if dev_root == get_dev("/sys")? {
        try_mount("sysfs", "/sys")?;
    }
    if dev_root == get_dev("/proc")? {
        try_mount("proc", "/proc")?;
    }
    Ok(())
}

/// Current kernels don't let lintel detect devices when the IOMMU is on.
pub fn check_iommu() -> Result<()> {
    if std::fs::metadata("/sys/class/iommu").is_err() {
        bail!("Can't stat /sys/class/iommu directory (probably you have very old kernel)");
    }
    if std::fs::symlink_metadata("/sys/class/iommu/iommu0").is_ok() {
        bail!(
            "IOMMU is enabled, and current kernels don't support kexec to lintel in this case. \
            Reboot with iommu=0 kernel parameter"
        );
    }
    Ok(())
}

// Shells that may stand in for init when the system was booted straight
// into single user mode.
const INIT_SHELLS: [&str; 8] = ["bash", "csh", "sh", "zsh", "rbash", "sh4", "bash4", "rbash4"];

/// First argv[0] component of a /proc/<pid>/cmdline blob, reduced to its
/// basename.
fn init_basename(cmdline: &[u8]) -> Option<String> {
    let first = cmdline
        .split(|b| *b == 0 || *b == b' ')
        .next()
        .filter(|token| !token.is_empty())?;
    let name = String::from_utf8_lossy(first).into_owned();
    let base = name.rsplit('/').next().unwrap_or("").to_string();
    if base.is_empty() {
        None
    } else {
        Some(base)
    }
}

fn runlevel_from_utmp() -> Option<i32> {
    // SAFETY: the getutxent family only touches libc-internal state; the
    // returned record is copied out before the next call.
    unsafe {
        libc::setutxent();
        let mut runlevel = None;
        loop {
            let ut = libc::getutxent();
            if ut.is_null() {
                break;
            }
            if (*ut).ut_type == libc::RUN_LVL {
                runlevel = Some((*ut).ut_pid % 256 - i32::from(b'0'));
                break;
            }
        }
        libc::endutxent();
        runlevel
    }
}

/// Restrict the handoff to runlevel 1, where nothing that could leave
/// garbage in a filesystem is expected to run.
pub fn check_runlevel() -> Result<()> {
    let runlevel = match runlevel_from_utmp() {
        Some(level) => level,
        None => {
            let cmdline = std::fs::read("/proc/1/cmdline")
                .with_context(|| "Can't read /proc/1/cmdline")?;
            match init_basename(&cmdline) {
                Some(init) if INIT_SHELLS.contains(&init.as_str()) => {
                    info!(
                        "Init process is a simple shell ({}), assuming we are in runlevel 1.",
                        init
                    );
                    return Ok(());
                }
                _ => bail!("Can't get current runlevel: no RUN_LVL entry in utmp file"),
            }
        }
    };

    if runlevel != 1 {
        bail!(
            "You should run this only from runlevel 1, but current runlevel is {}",
            runlevel
        );
    }
    Ok(())
}

fn syslog_contains(marker: &str) -> bool {
    let mut buf = vec![0_u8; 1000];
    // SAFETY: SYSLOG_ACTION_READ_ALL writes at most `len` bytes into buf.
    let len = unsafe { libc::klogctl(3, buf.as_mut_ptr().cast::<libc::c_char>(), 1000) };
    if len <= 0 {
        return false;
    }
    String::from_utf8_lossy(&buf[..len as usize]).contains(marker)
}

/// Sync everything, then trigger an emergency remount read-only and wait
/// until the kernel reports it finished.
pub fn flush_filesystems() -> Result<()> {
    nix::unistd::sync();
    write_sysfs("/proc/sys/kernel/printk", "7\n")?;
    write_sysfs("/proc/sysrq-trigger", "u\n")?;
    while !syslog_contains("Emergency Remount complete\n") {
        sleep(Duration::from_millis(10));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_init_basename() {
        assert_eq!(init_basename(b"/sbin/init\0splash\0"), Some("init".to_string()));
        assert_eq!(init_basename(b"/bin/bash\0"), Some("bash".to_string()));
        assert_eq!(init_basename(b"bash arg"), Some("bash".to_string()));
        assert_eq!(init_basename(b""), None);
        assert_eq!(init_basename(b"\0"), None);
    }

    #[test]
    fn test_init_shell_set() {
        assert!(INIT_SHELLS.contains(&"sh"));
        assert!(!INIT_SHELLS.contains(&"systemd"));
    }
}
