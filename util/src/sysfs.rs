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

//! Helpers for the sysfs/procfs command pseudofiles this tool leans on.
//! Attribute files answer a whole value to one read(2) and take a whole
//! command in one write(2); streaming them through buffered I/O would hide
//! short-write errors the kernel reports.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};

use anyhow::{bail, Context, Result};

const ATTRIBUTE_SIZE_MAX: usize = 4096;

/// Read one sysfs/procfs attribute as a string.
pub fn read_sysfs(path: &str) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Can't open {} for reading", path))?;
    let mut buf = vec![0_u8; ATTRIBUTE_SIZE_MAX];
    let count = file
        .read(&mut buf)
        .with_context(|| format!("Can't read {}", path))?;
    if count == 0 {
        bail!("Can't read {}: empty response", path);
    }

    Ok(String::from_utf8_lossy(&buf[..count]).into_owned())
}

/// Write one command string into a sysfs/procfs attribute.
pub fn write_sysfs(path: &str, value: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("Can't open {} for writing", path))?;
    file.write_all(value.as_bytes())
        .with_context(|| format!("Can't write {} to {}", value.trim_end(), path))
}

/// Final component of the path a symbolic link points to.
pub fn readlink_basename(link: &str) -> Result<String> {
    let target = std::fs::read_link(link)
        .with_context(|| format!("Can't read symbolic link {}", link))?;
    match target.file_name() {
        Some(name) => Ok(name.to_string_lossy().into_owned()),
        None => bail!("Symbolic link {} has no final path component", link),
    }
}

/// Cut an attribute value at its first newline.
pub fn first_line(value: &str) -> &str {
    value.split('\n').next().unwrap_or("")
}

#[cfg(test)]
mod test {
    use vmm_sys_util::tempfile::TempFile;

    use super::*;

    #[test]
    fn test_read_write_attribute() {
        let file = TempFile::new().unwrap();
        let path = file.as_path().to_str().unwrap().to_string();

        write_sysfs(&path, "7\n").unwrap();
        let value = read_sysfs(&path).unwrap();
        assert_eq!(value, "7\n");
        assert_eq!(first_line(&value), "7");
    }

    #[test]
    fn test_read_missing_attribute() {
        assert!(read_sysfs("/nonexistent/attribute").is_err());
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("tty1\ntty2"), "tty1");
        assert_eq!(first_line(""), "");
        assert_eq!(first_line("plain"), "plain");
    }
}
