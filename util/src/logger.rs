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
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Mutex;

use anyhow::{Context, Result};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::time::{get_format_time, gettime};

fn format_now() -> String {
    let (sec, nsec) = gettime().unwrap_or((0, 0));
    let format_time = get_format_time(sec as i64);

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}",
        format_time[0],
        format_time[1],
        format_time[2],
        format_time[3],
        format_time[4],
        format_time[5],
        nsec
    )
}

/// Format like "%year-%mon-%dayT%hour:%min:%sec.%nsec LEVEL [file: line]: msg".
struct ToolLogger {
    sink: Mutex<Box<dyn Write + Send>>,
    level: Level,
}

impl Log for ToolLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let formatmsg = format!(
            "{} {:<5} [{}: {}]: {}\n",
            format_now(),
            record.level(),
            record.file().unwrap_or(""),
            record.line().unwrap_or(0),
            record.args()
        );

        if let Err(e) = self
            .sink
            .lock()
            .unwrap()
            .write_all(formatmsg.as_bytes())
        {
            eprintln!("Failed to log message {:?}", e);
        }
    }

    fn flush(&self) {
        let _ = self.sink.lock().unwrap().flush();
    }
}

fn init_tool_logger(level: Level, sink: Box<dyn Write + Send>) -> Result<()> {
    let logger = ToolLogger {
        sink: Mutex::new(sink),
        level,
    };
    log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(LevelFilter::Trace))?;
    Ok(())
}

fn init_logger_with_env(sink: Box<dyn Write + Send>) -> Result<()> {
    let level = match std::env::var("KEXEC_LINTEL_LOG_LEVEL") {
        Ok(l) => match l.to_lowercase().as_str() {
            "error" => Level::Error,
            "warn" => Level::Warn,
            "info" => Level::Info,
            "debug" => Level::Debug,
            "trace" => Level::Trace,
            _ => Level::Info,
        },
        _ => Level::Info,
    };

    init_tool_logger(level, sink)
}

fn open_log_file(path: &str) -> Result<File> {
    std::fs::OpenOptions::new()
        .read(false)
        .write(true)
        .append(true)
        .create(true)
        .mode(0o640)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path))
}

/// Initialize the process logger; an empty path selects stderr.
pub fn init_log(path: String) -> Result<()> {
    let sink: Box<dyn Write + Send> = if path.is_empty() {
        Box::new(std::io::stderr())
    } else {
        Box::new(open_log_file(&path)?)
    };
    init_logger_with_env(sink).with_context(|| format!("Failed to init logger: {}", path))
}
