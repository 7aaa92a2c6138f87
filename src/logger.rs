use std::fmt;

/// Log severity, least to most detailed.
///
/// `Warn` and `Info` always print; the remaining levels unlock with
/// repeated `-v` flags (`-v` Verbose, `-vv` Debug, `-vvv` Trace).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Warn,
    Info,
    Verbose,
    Debug,
    Trace,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Warn    => "WARN",
            Level::Info    => "INFO",
            Level::Verbose => "VERB",
            Level::Debug   => "DEBG",
            Level::Trace   => "TRCE",
        }
    }

    /// Smallest `-v` count at which this level prints.
    fn threshold(self) -> u8 {
        match self {
            Level::Warn | Level::Info => 0,
            Level::Verbose => 1,
            Level::Debug   => 2,
            Level::Trace   => 3,
        }
    }
}

/// Verbosity-gated logger writing to stderr.
///
/// Every log method accepts any value implementing [`fmt::Display`]:
/// plain strings, `format!` output, or operational event enums that carry
/// their own `Display` implementation. Nothing is formatted unless the
/// current verbosity admits the level, so the client's stdout stays
/// reserved for game output.
pub struct Logger {
    verbosity: u8,
}

impl Logger {
    pub fn new(verbosity: u8) -> Self {
        Self { verbosity }
    }

    fn emit(&self, level: Level, msg: &dyn fmt::Display) {
        if self.verbosity >= level.threshold() {
            eprintln!("[{}] {msg}", level.tag());
        }
    }

    pub fn warn   (&self, msg: impl fmt::Display) { self.emit(Level::Warn,    &msg); }
    pub fn info   (&self, msg: impl fmt::Display) { self.emit(Level::Info,    &msg); }
    pub fn verbose(&self, msg: impl fmt::Display) { self.emit(Level::Verbose, &msg); }
    pub fn debug  (&self, msg: impl fmt::Display) { self.emit(Level::Debug,   &msg); }
    pub fn trace  (&self, msg: impl fmt::Display) { self.emit(Level::Trace,   &msg); }
}
