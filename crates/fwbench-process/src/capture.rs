//! Capture of child stdout/stderr.
//!
//! Each stream is read line by line on its own task. Lines go to an optional
//! log file (prefixed with the stream name) and into a bounded in-memory
//! tail, which is what gets logged when a server dies during startup.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fwbench_common::{ProcessError, ProcessResult};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const DEFAULT_TAIL_LINES: usize = 50;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Stream type (stdout or stderr)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamType::Stdout => write!(f, "stdout"),
            StreamType::Stderr => write!(f, "stderr"),
        }
    }
}

/// Shared state written by the reader tasks.
struct CaptureSink {
    file: Option<Mutex<BufWriter<File>>>,
    tail: Mutex<VecDeque<String>>,
    tail_limit: usize,
    lines: AtomicU64,
}

impl CaptureSink {
    fn record(&self, process_id: &str, stream_type: StreamType, line: &str) {
        self.lines.fetch_add(1, Ordering::Relaxed);
        debug!(process_id = %process_id, stream = %stream_type, "{}", line);

        if let Some(file) = &self.file {
            if let Err(e) = writeln!(file.lock(), "[{}] {}", stream_type, line) {
                warn!(process_id = %process_id, error = %e, "Failed to write captured output");
            }
        }

        let mut tail = self.tail.lock();
        if tail.len() == self.tail_limit {
            tail.pop_front();
        }
        tail.push_back(format!("[{}] {}", stream_type, line));
    }
}

/// Output capture for one supervised process.
pub struct OutputCapture {
    process_id: String,
    log_path: Option<PathBuf>,
    sink: Arc<CaptureSink>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OutputCapture {
    /// Create a capture that keeps only the in-memory tail.
    pub fn in_memory(process_id: impl Into<String>) -> Self {
        Self::build(process_id.into(), None, None)
    }

    /// Create a capture that also writes every line to `path`, truncating
    /// any previous log. Parent directories are created.
    pub fn to_file(process_id: impl Into<String>, path: &Path) -> ProcessResult<Self> {
        let process_id = process_id.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ProcessError::configuration(&process_id, format!("Failed to create log directory: {}", e))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                ProcessError::configuration(
                    &process_id,
                    format!("Failed to open log file {}: {}", path.display(), e),
                )
            })?;

        Ok(Self::build(process_id, Some(path.to_path_buf()), Some(file)))
    }

    fn build(process_id: String, log_path: Option<PathBuf>, file: Option<File>) -> Self {
        Self {
            process_id,
            log_path,
            sink: Arc::new(CaptureSink {
                file: file.map(|f| Mutex::new(BufWriter::new(f))),
                tail: Mutex::new(VecDeque::with_capacity(DEFAULT_TAIL_LINES)),
                tail_limit: DEFAULT_TAIL_LINES,
                lines: AtomicU64::new(0),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Start reading `stream` on a background task until EOF.
    pub fn attach(&self, stream: impl AsyncRead + Unpin + Send + 'static, stream_type: StreamType) {
        let sink = Arc::clone(&self.sink);
        let process_id = self.process_id.clone();

        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => sink.record(&process_id, stream_type, &line),
                    Ok(None) => {
                        debug!(process_id = %process_id, stream = %stream_type, "Stream ended");
                        break;
                    }
                    Err(e) => {
                        warn!(process_id = %process_id, error = %e, "Error reading from stream");
                        break;
                    }
                }
            }
        });

        self.tasks.lock().push(task);
    }

    /// Most recent captured lines, oldest first.
    pub fn tail(&self) -> Vec<String> {
        self.sink.tail.lock().iter().cloned().collect()
    }

    pub fn lines_captured(&self) -> u64 {
        self.sink.lines.load(Ordering::Relaxed)
    }

    /// Wait briefly for the readers to hit EOF, abort stragglers, and flush
    /// the log file.
    pub async fn finish(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for mut task in tasks {
            if tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await.is_err() {
                debug!(process_id = %self.process_id, "Aborting output reader that did not reach EOF");
                task.abort();
            }
        }

        if let Some(file) = &self.sink.file {
            if let Err(e) = file.lock().flush() {
                warn!(process_id = %self.process_id, error = %e, "Failed to flush captured output");
            }
        }
    }
}
