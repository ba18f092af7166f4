//! Kernel logging
//!
//! `log` facade over the PL011 console: every record gets a timestamp from
//! the generic timer and an ANSI-coloured level tag. The panic path writes
//! to the console directly and never comes through here.

use core::fmt::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};
use mlk_pal::console;

/// Stack buffer for formatting one record without allocation.
struct LineBuffer {
    data: [u8; 256],
    len: usize,
}

impl LineBuffer {
    const fn new() -> Self {
        Self {
            data: [0; 256],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.data[..self.len]).unwrap_or("<invalid>")
    }
}

impl Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let to_copy = bytes.len().min(self.data.len() - self.len);
        self.data[self.len..self.len + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.len += to_copy;
        Ok(())
    }
}

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let time_ms = mlk_pal::timer::now_ms();
        let level_str = match record.level() {
            Level::Error => "\x1b[31mERROR\x1b[0m",
            Level::Warn => "\x1b[33m WARN\x1b[0m",
            Level::Info => "\x1b[32m INFO\x1b[0m",
            Level::Debug => "\x1b[34mDEBUG\x1b[0m",
            Level::Trace => "\x1b[35mTRACE\x1b[0m",
        };

        let mut line = LineBuffer::new();
        let _ = writeln!(
            line,
            "[{:>5}.{:03}] {} {}: {}",
            time_ms / 1000,
            time_ms % 1000,
            level_str,
            record.target(),
            record.args()
        );
        console::puts(line.as_str());
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the kernel logger.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Debug))
        .ok();
}
