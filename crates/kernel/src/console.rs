//! Defines the kernel console that logs to the host's standard error.

use std::io::{self, Write};

use log::LevelFilter;
use spin::{Mutex, Once};

pub struct Console {
    output: Mutex<io::Stderr>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    pub fn init(level: LevelFilter) -> &'static Self {
        let console = Self::default();
        console.install(level);
        console
    }

    pub fn default() -> &'static Self {
        DEFAULT.call_once(|| Console {
            output: Mutex::new(io::stderr()),
        })
    }

    /// Makes this console the global logger. Only the first install in a
    /// process takes effect.
    pub fn install(&'static self, level: LevelFilter) {
        if log::set_logger(self).is_ok() {
            log::set_max_level(level);
        }
    }
}

impl log::Log for Console {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut output = self.output.lock();
        // Nowhere left to report a failing console.
        let _ = write_log_entry_to(&mut *output, record);
    }

    fn flush(&self) {
        let _ = self.output.lock().flush();
    }
}

fn write_log_entry_to(writer: &mut impl Write, record: &log::Record) -> io::Result<()> {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}
