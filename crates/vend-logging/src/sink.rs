//! ---
//! vend_section: "03-logging"
//! vend_subsection: "module"
//! vend_type: "source"
//! vend_scope: "code"
//! vend_description: "Queue-backed log sink writing dated files from a dedicated thread."
//! vend_version: "v0.1.0-alpha"
//! vend_owner: "tbd"
//! ---
//! Asynchronous file sink.
//!
//! Producers hand entries to a bounded queue and return immediately. A single
//! consumer thread owns the file handle and appends one line per entry to
//! `<directory>/<yyyy-MM-dd>.log`, where the date is taken when the line is
//! written. The sink is an ordinary value: it is created with
//! [`LogSink::start`] and torn down with [`LogSink::shutdown`].

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, NaiveDate};
use parking_lot::{Condvar, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default bound on how long [`LogSink::shutdown`] waits for the queue to drain.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Severity attached to a sink entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Something unexpected that did not stop the operation.
    Warning,
    /// A failed operation.
    Error,
}

impl LogLevel {
    /// Upper-case label written into the file.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record owned by the sink from enqueue until it is written.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Rendered message.
    pub message: String,
    /// Local time at which the entry was enqueued.
    pub timestamp: DateTime<Local>,
}

impl LogEntry {
    /// Build an entry stamped with the current local time.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Local::now(),
        }
    }

    /// Render the entry as `[yyyy-MM-dd HH:mm:ss] LEVEL - message`.
    pub fn render(&self) -> String {
        format!(
            "[{}] {} - {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Errors surfaced by the sink.
#[derive(Debug, Error)]
pub enum LogSinkError {
    /// The bounded queue had no free slot.
    #[error("log sink queue is full")]
    QueueFull,
    /// The sink was shut down or its consumer has exited.
    #[error("log sink is stopped")]
    Stopped,
    /// The log directory or consumer thread could not be set up.
    #[error("log sink i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Default)]
struct Latch {
    done: Mutex<bool>,
    signal: Condvar,
}

impl Latch {
    fn release(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.signal.notify_all();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.signal.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}

struct SinkInner {
    directory: PathBuf,
    sender: RwLock<Option<mpsc::Sender<LogEntry>>>,
    running: AtomicBool,
    dropped: AtomicU64,
    drained: Arc<Latch>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running sink. Clones share the same queue and consumer.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("directory", &self.inner.directory)
            .field("running", &self.is_running())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl LogSink {
    /// Create the log directory and spawn the consumer thread.
    pub fn start(directory: impl Into<PathBuf>, capacity: usize) -> Result<Self, LogSinkError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let drained = Arc::new(Latch::default());
        let writer = DatedFileWriter::new(directory.clone());
        let latch = Arc::clone(&drained);
        let consumer = std::thread::Builder::new()
            .name("vend-log-sink".into())
            .spawn(move || consume(receiver, writer, latch))?;

        Ok(Self {
            inner: Arc::new(SinkInner {
                directory,
                sender: RwLock::new(Some(sender)),
                running: AtomicBool::new(true),
                dropped: AtomicU64::new(0),
                drained,
                consumer: Mutex::new(Some(consumer)),
            }),
        })
    }

    /// Queue an entry without blocking.
    pub fn enqueue(&self, level: LogLevel, message: impl Into<String>) -> Result<(), LogSinkError> {
        self.enqueue_entry(LogEntry::new(level, message))
    }

    /// Queue a pre-built entry without blocking.
    pub fn enqueue_entry(&self, entry: LogEntry) -> Result<(), LogSinkError> {
        if !self.inner.running.load(Ordering::Acquire) {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(LogSinkError::Stopped);
        }
        let guard = self.inner.sender.read();
        let Some(sender) = guard.as_ref() else {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(LogSinkError::Stopped);
        };
        sender.try_send(entry).map_err(|err| {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            match err {
                TrySendError::Full(_) => LogSinkError::QueueFull,
                TrySendError::Closed(_) => LogSinkError::Stopped,
            }
        })
    }

    /// Stop accepting entries, let the consumer drain what is queued and wait
    /// up to `timeout` for it to finish. Returns `true` when the drain completed.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.running.store(false, Ordering::Release);
        // Dropping the last sender closes the channel; the consumer exits after the backlog.
        self.inner.sender.write().take();

        let drained = self.inner.drained.wait(timeout);
        if drained {
            if let Some(handle) = self.inner.consumer.lock().take() {
                let _ = handle.join();
            }
        }
        drained
    }

    /// Whether the sink still accepts entries.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Entries rejected because the queue was full or the sink stopped.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Directory receiving the dated files.
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    /// Path of the file an entry written now would land in.
    pub fn current_file(&self) -> PathBuf {
        dated_path(&self.inner.directory, Local::now().date_naive())
    }
}

fn consume(mut receiver: mpsc::Receiver<LogEntry>, mut writer: DatedFileWriter, latch: Arc<Latch>) {
    while let Some(entry) = receiver.blocking_recv() {
        if let Err(err) = writer.write(&entry) {
            eprintln!("log sink failed to write entry: {err}");
        }
    }
    writer.flush();
    latch.release();
}

fn dated_path(directory: &Path, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}.log", date.format("%Y-%m-%d")))
}

struct DatedFileWriter {
    directory: PathBuf,
    current: Option<(NaiveDate, File)>,
}

impl DatedFileWriter {
    fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            current: None,
        }
    }

    fn write(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let today = Local::now().date_naive();
        let rolled = !matches!(&self.current, Some((date, _)) if *date == today);
        if rolled {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(dated_path(&self.directory, today))?;
            self.current = Some((today, file));
        }
        if let Some((_, file)) = self.current.as_mut() {
            writeln!(file, "{}", entry.render())?;
        }
        Ok(())
    }

    fn flush(&mut self) {
        if let Some((_, file)) = &mut self.current {
            if let Err(err) = file.flush() {
                eprintln!("log sink failed to flush: {err}");
            }
        }
    }
}
