//! Unified logging for the inspection services
//!
//! Console output and a daily rolling file share one reloadable filter, so the
//! level can be changed at runtime without restarting the service.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::time::{interval, Duration};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Bracketed level label: `[INFO]`, `[WARN]`, ...
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter producing `timestamp [LEVEL] message`
///
/// Example: `2025-12-02T00:50:44.809000Z [INFO] PLC connected`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
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
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// Keeps the non-blocking writer thread alive for the life of the process
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

type FilterHandle = reload::Handle<EnvFilter, Registry>;
static LOG_FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();
static CURRENT_LOG_LEVEL: OnceLock<Mutex<String>> = OnceLock::new();

// ============================================================================
// Log Root Directory
// ============================================================================

/// Log root directory, resolved once.
/// Priority: `INSPECTION_LOG_DIR` env > configured dir > "logs"
static LOG_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Fix the log root directory. Later calls are ignored.
pub fn init_log_root(config_dir: Option<&str>) {
    LOG_ROOT.get_or_init(|| {
        std::env::var("INSPECTION_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                config_dir
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("logs"))
            })
    });
}

/// Current log root directory
pub fn get_log_root() -> PathBuf {
    LOG_ROOT.get().cloned().unwrap_or_else(|| {
        std::env::var("INSPECTION_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("logs"))
    })
}

/// Default max file size: 100MB
const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

fn mutex_err<T>(e: std::sync::PoisonError<T>) -> std::io::Error {
    std::io::Error::other(format!("Mutex poisoned: {}", e))
}

/// Daily rolling file writer: `{YYYYMMDD}_{service}.log`, then
/// `{YYYYMMDD}_{service}.{N}.log` once a file exceeds the size limit.
#[derive(Clone)]
struct DailyRollingWriter {
    service_name: String,
    log_dir: PathBuf,
    state: Arc<Mutex<RollingState>>,
    current_size: Arc<AtomicU64>,
    max_file_size: u64,
    rotation_count: Arc<AtomicU32>,
}

struct RollingState {
    date: String,
    file: File,
}

impl DailyRollingWriter {
    fn with_max_size(
        service_name: String,
        log_dir: PathBuf,
        max_file_size: u64,
    ) -> std::io::Result<Self> {
        fs::create_dir_all(&log_dir)?;

        let date = chrono::Local::now().format("%Y%m%d").to_string();
        let file = Self::open(&log_dir, &date, &service_name, 0)?;
        let initial_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            service_name,
            log_dir,
            state: Arc::new(Mutex::new(RollingState { date, file })),
            current_size: Arc::new(AtomicU64::new(initial_size)),
            max_file_size,
            rotation_count: Arc::new(AtomicU32::new(0)),
        })
    }

    fn file_name(date: &str, service: &str, rotation: u32) -> String {
        if rotation == 0 {
            format!("{}_{}.log", date, service)
        } else {
            format!("{}_{}.{}.log", date, service, rotation)
        }
    }

    fn open(dir: &Path, date: &str, service: &str, rotation: u32) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(Self::file_name(date, service, rotation)))
    }

    /// Switch files when the day changes or the size limit is hit
    fn roll_if_needed(&self, state: &mut RollingState, incoming: usize) -> std::io::Result<()> {
        let today = chrono::Local::now().format("%Y%m%d").to_string();
        if state.date != today {
            fs::create_dir_all(&self.log_dir)?;
            state.file = Self::open(&self.log_dir, &today, &self.service_name, 0)?;
            state.date = today;
            self.rotation_count.store(0, Ordering::SeqCst);
            let size = state.file.metadata().map(|m| m.len()).unwrap_or(0);
            self.current_size.store(size, Ordering::SeqCst);
            return Ok(());
        }

        let size = self.current_size.load(Ordering::Relaxed);
        if size > 0 && size + incoming as u64 > self.max_file_size {
            let n = self.rotation_count.fetch_add(1, Ordering::SeqCst) + 1;
            state.file = Self::open(&self.log_dir, &state.date, &self.service_name, n)?;
            self.current_size.store(0, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Write for DailyRollingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock().map_err(mutex_err)?;
        self.roll_if_needed(&mut state, buf.len())?;
        let written = state.file.write(buf)?;
        self.current_size
            .fetch_add(written as u64, Ordering::Relaxed);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.state.lock().map_err(mutex_err)?.file.flush()
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used as file name component and default filter target
    pub service_name: String,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Level used when `RUST_LOG` is not set
    pub console_level: Level,
    /// Write JSON lines to the file instead of the bracketed text format
    pub enable_json: bool,
    /// ANSI colors on the console
    pub ansi: bool,
    /// Size limit before a same-day rotation
    pub max_file_size: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: get_log_root(),
            console_level: Level::INFO,
            enable_json: false,
            ansi: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Build the initial filter string: `RUST_LOG` wins, otherwise the configured level
fn initial_filter(config: &LogConfig) -> String {
    match std::env::var("RUST_LOG") {
        Ok(env) if !env.trim().is_empty() => env,
        _ => {
            let level = config.console_level.as_str().to_lowercase();
            format!("{},{}={}", level, config.service_name, level)
        },
    }
}

/// Initialize the global subscriber
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let writer = DailyRollingWriter::with_max_size(
        config.service_name.clone(),
        config.log_dir.clone(),
        config.max_file_size,
    )?;
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);

    let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
    match guards.lock() {
        Ok(mut guards) => guards.push(guard),
        Err(poisoned) => poisoned.into_inner().push(guard),
    }

    let filter_str = initial_filter(&config);
    let env_filter = EnvFilter::try_new(&filter_str)?;
    let (reload_filter, reload_handle) = reload::Layer::new(env_filter);
    let _ = LOG_FILTER_HANDLE.set(reload_handle);
    let _ = CURRENT_LOG_LEVEL.set(Mutex::new(filter_str));

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = if config.enable_json {
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .event_format(BracketedLevelFormat)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(reload_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);

    start_log_compression_task(config.log_dir, config.service_name);
    Ok(())
}

/// Change the log filter at runtime.
///
/// Accepts a bare level (`"debug"`) or a full directive list
/// (`"info,fins_comlink=trace"`).
pub fn set_log_level(level: &str) -> Result<(), String> {
    let handle = LOG_FILTER_HANDLE
        .get()
        .ok_or("Logging not initialized with reload support")?;

    let new_filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;
    handle
        .reload(new_filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;

    if let Some(current) = CURRENT_LOG_LEVEL.get() {
        if let Ok(mut guard) = current.lock() {
            *guard = level.to_string();
        }
    }

    tracing::info!("Log level: {}", level);
    Ok(())
}

/// Current log filter string
pub fn get_log_level() -> String {
    CURRENT_LOG_LEVEL
        .get()
        .and_then(|m| m.lock().ok())
        .map(|guard| guard.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

// ==================== Log Compression ====================

/// Age after which plain logs are gzipped
const COMPRESS_AFTER: Duration = Duration::from_secs(7 * 86400);
/// Age after which archives are removed
const DELETE_AFTER: Duration = Duration::from_secs(365 * 86400);

/// Start the daily compression task
pub fn start_log_compression_task(log_dir: PathBuf, service_name: String) {
    tokio::spawn(async move {
        // Let the service settle first
        tokio::time::sleep(Duration::from_secs(60)).await;

        let mut ticker = interval(Duration::from_secs(86400));
        loop {
            ticker.tick().await;
            if let Err(e) = compress_old_logs(&log_dir, &service_name).await {
                tracing::error!("Log compression {}: {}", service_name, e);
            }
        }
    });
}

async fn compress_old_logs(
    log_dir: &Path,
    service_name: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut entries = tokio::fs::read_dir(log_dir).await?;
    let marker = format!("_{}.", service_name);

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => continue,
        };
        if !file_name.contains(&marker) {
            continue;
        }

        let age = tokio::fs::metadata(&path)
            .await?
            .modified()?
            .elapsed()
            .unwrap_or_default();

        if file_name.ends_with(".log") && age > COMPRESS_AFTER {
            compress_file(&path).await?;
            tokio::fs::remove_file(&path).await?;
            tracing::debug!("Compressed: {}", file_name);
        } else if file_name.ends_with(".log.gz") && age > DELETE_AFTER {
            tokio::fs::remove_file(&path).await?;
            tracing::debug!("Deleted: {}", file_name);
        }
    }

    Ok(())
}

/// Gzip `path` into `path.gz`
async fn compress_file(path: &Path) -> std::io::Result<PathBuf> {
    let buffer = tokio::fs::read(path).await?;
    let output_path = PathBuf::from(format!("{}.gz", path.display()));

    let out = output_path.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let output = File::create(&out)?;
        let mut encoder = GzEncoder::new(output, Compression::best());
        encoder.write_all(&buffer)?;
        encoder.finish()?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)??;

    Ok(output_path)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_format_level() {
        assert_eq!(format_level(&Level::INFO), "[INFO]");
        assert_eq!(format_level(&Level::ERROR), "[ERROR]");
        assert_eq!(format_level(&Level::TRACE), "[TRACE]");
    }

    #[test]
    fn test_rolling_writer_creates_daily_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            DailyRollingWriter::with_max_size("inspsrv".into(), dir.path().into(), 1024).unwrap();
        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();

        let date = chrono::Local::now().format("%Y%m%d").to_string();
        let content =
            fs::read_to_string(dir.path().join(format!("{}_inspsrv.log", date))).unwrap();
        assert_eq!(content, "hello\n");
    }

    #[test]
    fn test_rolling_writer_rotates_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            DailyRollingWriter::with_max_size("inspsrv".into(), dir.path().into(), 8).unwrap();
        writer.write_all(b"12345678").unwrap();
        writer.write_all(b"abc").unwrap();
        writer.flush().unwrap();

        let date = chrono::Local::now().format("%Y%m%d").to_string();
        let rotated =
            fs::read_to_string(dir.path().join(format!("{}_inspsrv.1.log", date))).unwrap();
        assert_eq!(rotated, "abc");
    }

    #[test]
    fn test_initial_filter_uses_configured_level() {
        std::env::remove_var("RUST_LOG");
        let config = LogConfig {
            service_name: "inspsrv".into(),
            console_level: Level::DEBUG,
            ..Default::default()
        };
        assert_eq!(initial_filter(&config), "debug,inspsrv=debug");
    }

    #[tokio::test]
    async fn test_compress_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20240101_inspsrv.log");
        fs::write(&path, b"line one\nline two\n").unwrap();

        let gz = compress_file(&path).await.unwrap();
        let mut decoder = GzDecoder::new(File::open(gz).unwrap());
        let mut text = String::new();
        decoder.read_to_string(&mut text).unwrap();
        assert_eq!(text, "line one\nline two\n");
    }
}
