use log::{Level, LevelFilter};

struct SweepLogger;

static LOGGER: SweepLogger = SweepLogger;

impl log::Log for SweepLogger {
    fn enabled(&self, _: &log::Metadata) -> bool {
        // This method wont be called.
        unreachable!()
    }

    fn log(&self, record: &log::Record) {
        match record.level() {
            // Per-probe failures must not pollute the result lines on stdout.
            Level::Error | Level::Warn => eprintln!("[{}] {}", record.level(), record.args()),
            _ => println!("[Debug] {}", record.args()),
        }
    }

    fn flush(&self) {}
}

pub fn init(debug: bool) {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    // Result is ignored since we guarantee that init is called only one time.
    let _ = log::set_logger(&LOGGER).map(|_| log::set_max_level(level));
}
