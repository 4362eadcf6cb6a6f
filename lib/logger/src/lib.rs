#![no_std]

use crate_interface::call_interface;
use log::{Level, LevelFilter};

struct SimpleLogger;

/// Forwards every enabled record to whichever crate implements
/// [`LogInterface`] (`call_interface!` resolves it at link time).
impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }
    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        call_interface!(LogInterface::print_log(record));
    }
    fn flush(&self) {}
}

/// Output hook of the logger.
///
/// Exactly one crate of the final binary implements it with
/// `#[crate_interface::impl_interface]`.
#[crate_interface::def_interface]
pub trait LogInterface: Send + Sync {
    fn print_log(record: &log::Record);
}

/// Installs the logger with the level baked in at build time through the
/// `LOG` environment variable. Logging is off when it is unset.
pub fn init() {
    init_with_level(option_env!("LOG").map_or(LevelFilter::Off, parse_level));
}

/// Installs the logger with an explicit level. A second call only changes
/// the level.
pub fn init_with_level(level: LevelFilter) {
    static LOGGER: SimpleLogger = SimpleLogger;
    log::set_logger(&LOGGER).ok();
    log::set_max_level(level);
}

/// Parses a level name, treating unknown names as `Off`.
pub fn parse_level(name: &str) -> LevelFilter {
    match name {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Off,
    }
}

pub fn level2color(level: Level) -> u8 {
    match level {
        Level::Error => 31, // Red
        Level::Warn => 93,  // BrightYellow
        Level::Info => 36,  // Blue
        Level::Debug => 32, // Green
        Level::Trace => 90, // BrightBlack
    }
}
