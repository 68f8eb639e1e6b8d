use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};

struct StdoutLogger;

static LOGGER: StdoutLogger = StdoutLogger;

impl Log for StdoutLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("{}", format_line(record.level(), record.target(), record.args()));
        }
    }

    fn flush(&self) {}
}

fn format_line(level: Level, target: &str, args: &std::fmt::Arguments) -> String {
    let now = Local::now();
    format!("[{}] {} {} {}", now.format("%Y-%m-%d %H:%M:%S"), level, target, args)
}

/// Installs the stdout logger; later calls only adjust the level.
pub fn init(level: LevelFilter) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_carries_timestamp_level_and_target() {
        let line = format_line(Level::Warn, "protobit::storage", &format_args!("retrying {}", 2));
        assert!(line.starts_with('['));
        assert!(line.contains("] WARN protobit::storage retrying 2"));
        init(LevelFilter::Debug);
        init(LevelFilter::Info);
        assert_eq!(log::max_level(), LevelFilter::Info);
    }
}
