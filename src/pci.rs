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
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::thread::sleep;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::info;

use util::sysfs::{first_line, read_sysfs};

/// Offset of the bridge control register in a type 1 config header.
const PCI_BRIDGE_CONTROL: u64 = 0x3e;
/// Secondary bus reset bit of the bridge control register.
const PCI_BRIDGE_CTL_BUS_RESET: u16 = 0x40;

const VGA_ARBITER: &str = "/dev/vga_arbiter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciAddr {
    pub domain: u32,
    pub bus: u32,
    pub slot: u32,
    pub func: u32,
}

impl fmt::Display for PciAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.slot, self.func
        )
    }
}

/// Parse a `dddd:bb:ss.f` id; `context` names its origin in error messages.
pub fn parse_pci_id(context: &str, id: &str) -> Result<PciAddr> {
    let fields: Vec<&str> = id.split(|c| c == ':' || c == '.').collect();
    if fields.len() != 4 {
        bail!("Can't recognize PCI id {}: got {} fields", context, fields.len());
    }

    let parse = |name: &str, field: &str| -> Result<u32> {
        u32::from_str_radix(field, 16)
            .with_context(|| format!("Malformed {} id {}", name, context))
    };
    Ok(PciAddr {
        domain: parse("domain", fields[0])?,
        bus: parse("bus", fields[1])?,
        slot: parse("dev", fields[2])?,
        func: parse("func", fields[3])?,
    })
}

/// Ask the VGA arbiter which video card is active. `Ok(None)` means the
/// arbiter has no notion of an active card and lintel should boot on the
/// last saved one.
pub fn detect_active_vga() -> Result<Option<PciAddr>> {
    let response = read_sysfs(VGA_ARBITER)?;
    if response.starts_with("invalid") {
        info!("VGA arbiter has no idea of which video card is active, lintel will boot on the last saved one.");
        return Ok(None);
    }

    let pcidev = response
        .split("PCI:")
        .nth(1)
        .ok_or_else(|| anyhow!("Can't find PCI device signature in VGA arbiter response"))?;
    let pcidev = first_line(pcidev).split(',').next().unwrap_or("");
    let addr = parse_pci_id("of current VGA card", pcidev)?;
    info!("Active VGA card to boot lintel on is {}.", addr);
    Ok(Some(addr))
}

/// Pulse the secondary bus reset bit of the given PCI bridge. The sleeps
/// give the devices behind the bridge time to settle before and after the
/// reset is released.
pub fn bridge_reset(bridge_id: &str) -> Result<()> {
    let config_path = format!("/sys/bus/pci/devices/{}/config", bridge_id);
    let mut config = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&config_path)
        .with_context(|| format!("Can't open {}", config_path))?;

    let mut word = [0_u8; 2];
    config
        .seek(SeekFrom::Start(PCI_BRIDGE_CONTROL))
        .with_context(|| format!("Can't seek config space of {}", bridge_id))?;
    config
        .read_exact(&mut word)
        .with_context(|| format!("Can't read bridge control register of {}", bridge_id))?;
    let bridge_ctl = u16::from_le_bytes(word);

    write_bridge_control(&mut config, bridge_id, bridge_ctl | PCI_BRIDGE_CTL_BUS_RESET)?;
    sleep(Duration::from_millis(10));
    write_bridge_control(&mut config, bridge_id, bridge_ctl)?;
    sleep(Duration::from_millis(500));
    Ok(())
}

fn write_bridge_control(config: &mut std::fs::File, bridge_id: &str, value: u16) -> Result<()> {
    config
        .seek(SeekFrom::Start(PCI_BRIDGE_CONTROL))
        .with_context(|| format!("Can't seek config space of {}", bridge_id))?;
    config
        .write_all(&value.to_le_bytes())
        .with_context(|| format!("Can't write bridge control register of {}", bridge_id))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_pci_id() {
        let addr = parse_pci_id("in test", "0000:03:1c.7").unwrap();
        assert_eq!(
            addr,
            PciAddr {
                domain: 0,
                bus: 3,
                slot: 0x1c,
                func: 7
            }
        );
        assert_eq!(addr.to_string(), "0000:03:1c.7");
    }

    #[test]
    fn test_parse_pci_id_malformed() {
        assert!(parse_pci_id("in test", "0000:03:1c").is_err());
        assert!(parse_pci_id("in test", "0000:03:zz.7").is_err());
        assert!(parse_pci_id("in test", "0000:03:1c.7.9").is_err());
        assert!(parse_pci_id("in test", "").is_err());
    }
}
