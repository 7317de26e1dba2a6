use slog::{o, Discard, Drain, Level, Logger};
use slog_async::OverflowStrategy;

/// Creates a logger object. Used in certain utilities and tests
pub fn create_logger(level: Level) -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator)
        .build()
        .filter_level(level)
        .fuse();
    let drain = slog_async::Async::new(drain)
        .overflow_strategy(OverflowStrategy::Block)
        .build()
        .fuse();
    Logger::root(drain, o!())
}

/// A logger that swallows everything. Used by the convenience entry points where the caller
/// did not supply a logger.
pub fn create_discard_logger() -> Logger {
    Logger::root(Discard, o!())
}

/// Test logger filters out everything below Warning level. For debugging tests, change to Debug
pub fn create_test_logger() -> Logger {
    create_logger(Level::Warning)
}
