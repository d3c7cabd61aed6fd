//! Tracing subscriber setup shared by the hangar binaries.
//!
//! Console output always goes to stderr: `hangar state pull` writes state
//! blobs to stdout and must not interleave log lines with them.

use std::{
    env,
    io::{self, Write},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::MakeWriter, prelude::*, registry, EnvFilter};

const DEFAULT_LOG_FILE: &str = "/tmp/hangar.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
    /// Install a subscriber that only applies the level filter.
    Off,
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" => Ok(LogOutput::Both),
            "off" | "none" => Ok(LogOutput::Off),
            other => Err(format!("unknown log output '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" | "pretty" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    pub output: LogOutput,
    pub format: LogFormat,
    pub file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Console,
            format: LogFormat::Human,
            file: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

impl LoggingConfig {
    /// Read `HANGAR_LOG_LEVEL`, `HANGAR_LOG_OUTPUT`, `HANGAR_LOG_FORMAT` and
    /// `HANGAR_LOG_FILE`. Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            level: lookup("HANGAR_LOG_LEVEL").unwrap_or(defaults.level),
            output: lookup("HANGAR_LOG_OUTPUT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.output),
            format: lookup("HANGAR_LOG_FORMAT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.format),
            file: lookup("HANGAR_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.file),
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

// Writes every line to two sinks.
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write_all(buf);
        let res_b = self.b.write_all(buf);
        res_a.and(res_b).map(|_| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

struct MakeTee<A, B> {
    a: A,
    b: B,
}

impl<'a, A, B> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = Tee<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.a.make_writer(),
            b: self.b.make_writer(),
        }
    }
}

fn env_filter(level: &str) -> EnvFilter {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    ["sqlx=warn", "hyper=warn", "tower_http=info"]
        .into_iter()
        .filter_map(|d| d.parse().ok())
        .fold(filter, |f, d| f.add_directive(d))
}

/// Install the global subscriber. Keep the returned guard alive for as long
/// as file logging should flush. A second call is a no-op.
pub fn init_subscriber(config: &LoggingConfig) -> Option<WorkerGuard> {
    let subscriber = registry().with(env_filter(&config.level));
    let json = config.format == LogFormat::Json;

    macro_rules! install {
        ($writer:expr) => {{
            let layer = tracing_subscriber::fmt::layer().with_writer($writer);
            if json {
                subscriber.with(layer.json()).try_init()
            } else {
                subscriber.with(layer.with_target(false)).try_init()
            }
        }};
    }

    let (result, guard) = match config.output {
        LogOutput::Console => (install!(io::stderr), None),
        LogOutput::File => {
            let (writer, guard) = file_writer(&config.file);
            (install!(writer), Some(guard))
        }
        LogOutput::Both => {
            let (writer, guard) = file_writer(&config.file);
            let tee = MakeTee {
                a: io::stderr,
                b: writer,
            };
            (install!(tee), Some(guard))
        }
        LogOutput::Off => (subscriber.try_init(), None),
    };

    if result.is_err() {
        // Already installed, e.g. by an earlier test in the same process.
        return None;
    }
    guard
}

fn file_writer(path: &Path) -> (tracing_appender::non_blocking::NonBlocking, WorkerGuard) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .unwrap_or_else(|| "hangar.log".as_ref());

    let appender = tracing_appender::rolling::daily(dir, file_name);
    tracing_appender::non_blocking(appender)
}
