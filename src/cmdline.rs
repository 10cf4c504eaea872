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

use std::collections::HashMap;

use anyhow::{bail, Result};

/// Image pattern used when no FILE argument is given.
pub const DEFAULT_IMAGE: &str = "/opt/mcst/lintel/bin/lintel_*.disk";

const BINARY_NAME: &str = "kexec-lintel";

enum ArgsType {
    Flag,
    Opt,
}

struct Arg {
    args_type: ArgsType,
    value: Option<String>,
    // Whether this parameter was configured.
    presented: bool,
}

impl Arg {
    fn new(args_type: ArgsType) -> Self {
        Self {
            args_type,
            value: None,
            presented: false,
        }
    }
}

pub struct ArgsParse {
    args: HashMap<String, Arg>,
    pub free: Vec<String>,
}

impl ArgsParse {
    pub fn create(opt_flag: Vec<&str>, opt_short: Vec<&str>) -> Self {
        let mut args: HashMap<String, Arg> = HashMap::new();
        for arg_name in opt_flag {
            args.insert(arg_name.to_string(), Arg::new(ArgsType::Flag));
        }

        for arg_name in opt_short {
            args.insert(arg_name.to_string(), Arg::new(ArgsType::Opt));
        }

        Self {
            args,
            free: Vec::new(),
        }
    }

    pub fn parse(&mut self, args: Vec<String>) -> Result<()> {
        let len = args.len();
        let mut pre_opt = (0, "".to_string());

        for idx in 0..len {
            let str = args[idx].clone();
            if str.starts_with('-') && str.len() > 1 {
                if !pre_opt.1.is_empty() {
                    bail!("missing argument for option '{}'", pre_opt.1);
                }

                let name = if str.starts_with("--") && str.len() > 2 {
                    str[2..].to_string()
                } else {
                    str[1..].to_string()
                };

                if let Some(arg) = self.args.get_mut(&name) {
                    match arg.args_type {
                        ArgsType::Flag => {
                            arg.presented = true;
                        }
                        ArgsType::Opt => {
                            pre_opt = (idx, name);
                        }
                    };
                } else {
                    bail!("unrecognized option '{}'", name);
                }

                continue;
            }

            if pre_opt.0 + 1 == idx && !pre_opt.1.is_empty() {
                let name = pre_opt.1.to_string();
                if let Some(arg) = self.args.get_mut(&name) {
                    arg.presented = true;
                    arg.value = Some(str.to_string());
                }
                pre_opt = (0, "".to_string());
            } else if pre_opt.1.is_empty() {
                self.free.push(str.to_string());
            } else {
                bail!("unrecognized option '{}'", pre_opt.1);
            }
        }

        if pre_opt.0 != 0 || !pre_opt.1.is_empty() {
            bail!("missing argument for option '{}'", pre_opt.1);
        }

        Ok(())
    }

    pub fn opt_present(&self, name: &str) -> bool {
        if let Some(arg) = self.args.get(name) {
            return arg.presented;
        }
        false
    }

    pub fn opt_str(&self, name: &str) -> Option<String> {
        if let Some(arg) = self.args.get(name) {
            return arg.value.clone();
        }
        None
    }
}

/// Which of the preparation and handoff steps stay enabled. Every flag on
/// the command line switches one of them off.
pub struct Flags {
    pub mounts: bool,
    pub iommu: bool,
    pub runlevel: bool,
    pub resetfb: bool,
    pub fsflush: bool,
    pub vtunbind: bool,
    pub rmmod: bool,
    pub rmpci: bool,
    pub bridgerst: bool,
    pub kexec: bool,
    pub trusted: bool,
    pub setvideo: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Flags {
            mounts: true,
            iommu: true,
            runlevel: true,
            resetfb: true,
            fsflush: true,
            vtunbind: true,
            rmmod: true,
            rmpci: true,
            bridgerst: true,
            kexec: true,
            trusted: false,
            setvideo: true,
        }
    }
}

pub struct Config {
    pub image: String,
    pub tty: Option<u32>,
    pub disk_number: Option<u32>,
    pub flags: Flags,
}

/// Parse the command line into a runnable config. `Ok(None)` means help or
/// version was printed and the process should exit successfully.
pub fn parse_cmdline(args: Vec<String>) -> Result<Option<Config>> {
    let mut arg_parser = ArgsParse::create(
        vec![
            "h", "help", "version", "T", "m", "i", "r", "b", "f", "v", "V", "M", "P", "B", "x",
        ],
        vec!["t", "tty", "d"],
    );
    arg_parser.parse(args)?;

    if arg_parser.opt_present("h") || arg_parser.opt_present("help") {
        print_help();
        return Ok(None);
    }
    if arg_parser.opt_present("version") {
        println!(
            "{} version {}\n\
            Copyright (c) 2024 Huawei Technologies Co.,Ltd. All rights reserved.",
            BINARY_NAME,
            util::VERSION,
        );
        return Ok(None);
    }

    if arg_parser.free.len() > 1 {
        bail!(
            "too many file arguments: {:?}\n\
            Run {} --help for usage",
            arg_parser.free,
            BINARY_NAME
        );
    }
    let image = arg_parser
        .free
        .first()
        .cloned()
        .unwrap_or_else(|| DEFAULT_IMAGE.to_string());

    let tty = match arg_parser.opt_str("t").or_else(|| arg_parser.opt_str("tty")) {
        Some(value) => match value.parse::<u32>() {
            Ok(num) => Some(num),
            Err(_) => bail!(
                "malformed tty number {}\n\
                Run {} --help for usage",
                value,
                BINARY_NAME
            ),
        },
        None => None,
    };

    let disk_number = match arg_parser.opt_str("d") {
        Some(value) => match value.parse::<u32>() {
            Ok(num) => Some(num),
            Err(_) => bail!(
                "malformed disk number {}\n\
                Run {} --help for usage",
                value,
                BINARY_NAME
            ),
        },
        None => None,
    };

    let flags = Flags {
        mounts: !arg_parser.opt_present("m"),
        iommu: !arg_parser.opt_present("i"),
        runlevel: !arg_parser.opt_present("r"),
        resetfb: !arg_parser.opt_present("b"),
        fsflush: !arg_parser.opt_present("f"),
        vtunbind: !arg_parser.opt_present("V"),
        rmmod: !arg_parser.opt_present("M"),
        rmpci: !arg_parser.opt_present("P"),
        bridgerst: !arg_parser.opt_present("B"),
        kexec: !arg_parser.opt_present("x"),
        trusted: arg_parser.opt_present("T"),
        setvideo: !arg_parser.opt_present("v"),
    };

    Ok(Some(Config {
        image,
        tty,
        disk_number,
        flags,
    }))
}

pub fn print_help() {
    println!("Usage:");
    println!("    {} [OPTIONS] [FILE]", BINARY_NAME);
    println!();
    println!("    FILE:             Lintel file to start (may be a plain lintel starter, BCD image, or a BCD image with kexec jumper)");
    println!("                      Wildcards are supported (to prevent shell expansion, put the argument in quotes). Only one file should fit the pattern then.");
    println!("                      If not specified, {} is loaded. Use a single dash to load from standard input", DEFAULT_IMAGE);
    println!("    OPTIONS:");
    println!("        -h | --help:  Show this help and exit");
    println!("        --version:    Show version information and exit");
    println!("        -t | --tty N: Reset framebuffer device associated with ttyN instead of currently active one (has no effect if -b, or all three of -M, -P, and -B are given)");
    println!("        -d N:         Avoid interactivity and unconditionally boot guest OS from Nth disk drive");
    println!("        -T:           Prohibit lintel to react at any keypress to perform a controlled trusted boot (has an effect only if -d is given)");
    println!("        -m:           Don't check for unmounted filesystems and don't mount them");
    println!("        -i:           Don't check that IOMMU is off");
    println!("        -r:           Don't check current runlevel");
    println!("        -b:           Don't reset current framebuffer device");
    println!("        -f:           Don't sync, flush, and remount-read-only filesystems");
    println!("        -v:           Don't pass current video adapter id to lintel and make it load on the one it has in NVRAM");
    println!("        -V:           Don't unbind currently active vtconsole (has no effect if -b is given)");
    println!("        -M:           Don't unload module bound to PCI Express device implementing current framebuffer (has no effect if -b is given)");
    println!("        -P:           Don't remove PCI Express device implementing current framebuffer (has no effect if -b is given)");
    println!("        -B:           Don't reset PCI bridge associated with PCI Express device implementing current framebuffer (has no effect if -b is given)");
    println!("        -x:           Don't perform actual kexec but everything preceding it");
}

#[cfg(test)]
mod test {
    use super::*;

    fn args(cmd: &str) -> Vec<String> {
        cmd.split(' ').map(|str| str.to_string()).collect()
    }

    #[test]
    fn test_default_config() {
        let config = parse_cmdline(vec![]).unwrap().unwrap();
        assert_eq!(config.image, DEFAULT_IMAGE);
        assert_eq!(config.tty, None);
        assert_eq!(config.disk_number, None);
        assert!(config.flags.mounts);
        assert!(config.flags.kexec);
        assert!(!config.flags.trusted);
    }

    #[test]
    fn test_flags_and_values() {
        let config = parse_cmdline(args("-m -x -T -d 2 --tty 4 /tmp/lintel.disk"))
            .unwrap()
            .unwrap();
        assert_eq!(config.image, "/tmp/lintel.disk");
        assert_eq!(config.tty, Some(4));
        assert_eq!(config.disk_number, Some(2));
        assert!(!config.flags.mounts);
        assert!(!config.flags.kexec);
        assert!(config.flags.trusted);
        assert!(config.flags.iommu);
    }

    #[test]
    fn test_stdin_marker_is_free_argument() {
        let config = parse_cmdline(args("-")).unwrap().unwrap();
        assert_eq!(config.image, "-");
    }

    #[test]
    fn test_malformed_numbers() {
        assert!(parse_cmdline(args("-d four")).is_err());
        assert!(parse_cmdline(args("-t -1")).is_err());
    }

    #[test]
    fn test_missing_argument_and_unknown_option() {
        assert!(parse_cmdline(args("-d")).is_err());
        assert!(parse_cmdline(args("-z")).is_err());
        assert!(parse_cmdline(args("a.disk b.disk")).is_err());
    }
}
