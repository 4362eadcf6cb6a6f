use std::{fmt, io::Write};

use logger::LogInterface;
use mutex::SpinLock;

static LOG_LOCK: SpinLock<()> = SpinLock::new(());

pub fn print_in_color(args: fmt::Arguments, color_code: u8) {
    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "\u{1B}[{}m{}\u{1B}[0m", color_code, args);
}

struct LogInterfaceImpl;

#[crate_interface::impl_interface]
impl LogInterface for LogInterfaceImpl {
    fn print_log(record: &log::Record) {
        let _guard = LOG_LOCK.lock();
        print_in_color(
            format_args!(
                "[{:>5}][{}:{}] {}\n",
                record.level(),
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                record.args()
            ),
            logger::level2color(record.level()),
        );
    }
}
