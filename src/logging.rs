//! `tracing-subscriber` wiring for the three independent log sinks exposed
//! on the CLI (`--logfile`, `--errorlogfile`, `--debuglogfile`).
//!
//! Grounded on `original_source/log.go`'s `Debug`/`Log` logger pair: each
//! sink there is either stdout/stderr (empty filename) or an append-mode
//! file, selected once at startup and never touched again. This crate keeps
//! that same "empty or `STDOUT` means the console, anything else is a path"
//! sentinel, but layers three independent `tracing_appender` writers
//! instead of swapping out a single global `*log.Logger`, since `tracing`
//! lets each sink carry its own level filter.
use std::path::Path;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};

/// Where a sink should write. `Console` covers both the empty string and
/// the literal `STDOUT`/`STDERR` sentinels.
#[derive(Debug, Clone)]
pub enum LogSink {
    Console,
    File(std::path::PathBuf),
}

impl LogSink {
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() || raw.eq_ignore_ascii_case("stdout") || raw.eq_ignore_ascii_case("stderr") {
            Self::Console
        } else {
            Self::File(std::path::PathBuf::from(raw))
        }
    }
}

pub struct LoggingConfig {
    pub logfile: LogSink,
    pub errorlogfile: LogSink,
    pub debuglogfile: LogSink,
}

/// Guards keep the non-blocking file writers alive; callers must hold the
/// returned value for the lifetime of `main`.
#[must_use]
pub struct LoggingGuards(Vec<tracing_appender::non_blocking::WorkerGuard>);

/// Install a global subscriber with one layer per sink: info-and-above to
/// `logfile` (default stdout), warn-and-above to `errorlogfile` (default
/// stderr, but only emits when something actually warns/errors), and
/// everything to `debuglogfile` when set (otherwise silent — debug output
/// is opt-in, matching the source's `Debug` logger defaulting to
/// `ioutil.Discard`).
pub fn init(config: LoggingConfig) -> LoggingGuards {
    let mut guards = Vec::new();

    type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

    let info_layer: BoxedLayer = make_layer(&config.logfile, &mut guards, tracing::Level::INFO);
    let error_layer: BoxedLayer = make_layer(&config.errorlogfile, &mut guards, tracing::Level::WARN);
    let debug_layer: Option<BoxedLayer> = match config.debuglogfile {
        LogSink::Console => None,
        sink => Some(make_layer(&sink, &mut guards, tracing::Level::TRACE)),
    };

    let registry = tracing_subscriber::registry()
        .with(info_layer)
        .with(error_layer)
        .with(debug_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    registry.init();
    LoggingGuards(guards)
}

fn make_layer<S>(
    sink: &LogSink,
    guards: &mut Vec<tracing_appender::non_blocking::WorkerGuard>,
    min_level: tracing::Level,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let writer: BoxMakeWriter = match sink {
        LogSink::Console => BoxMakeWriter::new(std::io::stdout),
        LogSink::File(path) => {
            let (dir, file_name) = split_path(path);
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            BoxMakeWriter::new(non_blocking)
        }
    };

    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(matches!(sink, LogSink::Console))
        .with_filter(tracing_subscriber::filter::LevelFilter::from_level(min_level))
        .boxed()
}

fn split_path(path: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let file_name = path.file_name().map(std::path::PathBuf::from).unwrap_or_else(|| std::path::PathBuf::from("muster.log"));
    (dir.to_path_buf(), file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_and_stdout_sentinel_mean_console() {
        assert!(matches!(LogSink::parse(""), LogSink::Console));
        assert!(matches!(LogSink::parse("STDOUT"), LogSink::Console));
        assert!(matches!(LogSink::parse("stdout"), LogSink::Console));
    }

    #[test]
    fn anything_else_is_a_file_path() {
        match LogSink::parse("/var/log/muster.log") {
            LogSink::File(p) => assert_eq!(p, std::path::PathBuf::from("/var/log/muster.log")),
            LogSink::Console => panic!("expected a file sink"),
        }
    }
}
