//! Logging init: per-download log file in the download dir, or stderr fallback.
//!
//! Lines are formatted as `[<ISO8601>] [<LEVEL>] <message>`. Wall-clock time
//! appears only here and in the log file name; all rate math elsewhere uses
//! the monotonic clock.

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Default log file name: `download_log_<ISO8601-timestamp>.txt`, with colons
/// avoided for filesystem compatibility.
pub fn default_log_file_name() -> String {
    format!("download_log_{}.txt", Utc::now().format("%Y-%m-%dT%H-%M-%SZ"))
}

/// Event formatter producing `[<ISO8601>] [<LEVEL>] <message>` lines.
struct LogLine;

impl<S, N> FormatEvent<S, N> for LogLine
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        write!(writer, "[{}] [{}] ", timestamp, event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Writer that is either the log file or stderr (used when file clone fails).
enum FileOrStderr {
    File(fs::File),
    Stderr,
}

impl io::Write for FileOrStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileOrStderr::File(f) => f.write(buf),
            FileOrStderr::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileOrStderr::File(f) => f.flush(),
            FileOrStderr::Stderr => io::stderr().lock().flush(),
        }
    }
}

/// Initialize logging to `<download_dir>/<log_file_name>`.
///
/// Returns the log file path. On failure (e.g. the directory is unwritable)
/// the caller should fall back to [`init_logging_stderr`].
pub fn init_logging(download_dir: &Path, log_file_name: Option<&str>) -> Result<PathBuf> {
    fs::create_dir_all(download_dir)?;
    let name = log_file_name.map(str::to_owned).unwrap_or_else(default_log_file_name);
    let log_path = download_dir.join(name);

    let file = fs::OpenOptions::new().create(true).append(true).open(&log_path)?;

    struct FileMakeWriter(fs::File);

    impl<'a> MakeWriter<'a> for FileMakeWriter {
        type Writer = FileOrStderr;

        fn make_writer(&'a self) -> Self::Writer {
            self.0
                .try_clone()
                .map(FileOrStderr::File)
                .unwrap_or(FileOrStderr::Stderr)
        }
    }

    let writer: BoxMakeWriter = BoxMakeWriter::new(FileMakeWriter(file));

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,s3pull=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(LogLine)
        .with_writer(writer)
        .init();

    tracing::info!("logging initialized at {}", log_path.display());

    Ok(log_path)
}

/// Initialize logging to stderr only (no file). Use when `init_logging` fails
/// so the CLI doesn't crash.
pub fn init_logging_stderr() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,s3pull=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(LogLine)
        .with_writer(io::stderr)
        .init();
}
