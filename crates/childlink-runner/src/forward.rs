//! Background stdio forwarding
//!
//! With redirection enabled the launcher keeps two pipe ends. The output
//! forwarder copies the child's combined stdout/stderr to the launcher's
//! stdout; the input forwarder copies lines from the launcher's stdin to the
//! child. Each runs on its own named thread, owns exactly one pipe end and
//! closes it when it returns.
//!
//! Both forwarders observe a shared cancellation flag. On Unix reads are
//! preceded by `poll(2)` with a timeout, so a forwarder stuck waiting for data
//! notices cancellation within one poll interval. Elsewhere the flag is only
//! checked between reads.
//!
//! On Windows a blocked read cannot be interrupted, so such a forwarder is
//! detached after the join timeout. A detached input forwarder reading the
//! launcher's stdin stays blocked inside `io::Stdin` and keeps holding the
//! process-wide stdin lock, so other `stdin().lock()` callers in the process
//! block until a line arrives or stdin closes.

use crate::error::LaunchError;
use crate::pipes::{ParentStdio, PipeEnd};
use childlink_config::LauncherConfig;
use childlink_utils::logging::forwarder_span;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::fd::AsFd;

/// Name of the forwarder that copies the child's output.
pub const OUTPUT_FORWARDER: &str = "stdout";
/// Name of the forwarder that feeds the child's input.
pub const INPUT_FORWARDER: &str = "stdin";

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Where the input forwarder reads lines from.
pub enum InputSource {
    /// The launcher's own standard input.
    Inherit,
    Reader(Box<dyn Read + Send>),
}

impl fmt::Debug for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inherit => f.write_str("Inherit"),
            Self::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// Where the output forwarder writes the child's output to.
pub enum OutputSink {
    /// The launcher's own standard output.
    Inherit,
    Writer(Box<dyn Write + Send>),
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inherit => f.write_str("Inherit"),
            Self::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

/// Copy `source` to `sink` in chunks of at most `chunk_size` bytes.
///
/// Every chunk is written in full and flushed before the next read. Returns
/// the number of bytes copied once `source` reports end of stream or
/// `cancel` is set.
///
/// # Errors
///
/// The first read or write error other than `Interrupted`.
pub fn forward_output<R: Read, W: Write>(
    mut source: R,
    mut sink: W,
    chunk_size: usize,
    cancel: &AtomicBool,
) -> io::Result<u64> {
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut copied = 0u64;

    while !cancel.load(Ordering::Acquire) {
        let read = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink.write_all(&buffer[..read])?;
        sink.flush()?;
        copied += read as u64;
    }

    Ok(copied)
}

/// Copy `source` to `sink` line by line.
///
/// Line endings (`\n` or `\r\n`) are normalized to `\n`. Empty lines are
/// dropped. A final line without a terminator is still forwarded. Returns the
/// number of bytes written once `source` is exhausted or `cancel` is set.
///
/// # Errors
///
/// The first read or write error other than `Interrupted`.
pub fn forward_input<R: BufRead, W: Write>(
    mut source: R,
    mut sink: W,
    cancel: &AtomicBool,
) -> io::Result<u64> {
    let mut line = Vec::new();
    let mut written = 0u64;

    while !cancel.load(Ordering::Acquire) {
        line.clear();
        match source.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        strip_line_ending(&mut line);
        if line.is_empty() {
            continue;
        }
        line.push(b'\n');
        sink.write_all(&line)?;
        sink.flush()?;
        written += line.len() as u64;
    }

    Ok(written)
}

fn strip_line_ending(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
}

/// A reader that reports end of stream once cancellation is requested.
struct CancellableReader<R> {
    inner: R,
    cancel: Arc<AtomicBool>,
    #[cfg_attr(not(unix), allow(dead_code))]
    poll_interval: Duration,
}

impl<R> CancellableReader<R> {
    fn new(inner: R, cancel: Arc<AtomicBool>, poll_interval: Duration) -> Self {
        Self {
            inner,
            cancel,
            poll_interval,
        }
    }
}

#[cfg(unix)]
impl<R: Read + AsFd> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.cancel.load(Ordering::Acquire) {
                return Ok(0);
            }
            if crate::platform::wait_readable(self.inner.as_fd(), self.poll_interval)? {
                return self.inner.read(buf);
            }
        }
    }
}

#[cfg(not(unix))]
impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.load(Ordering::Acquire) {
            return Ok(0);
        }
        self.inner.read(buf)
    }
}

#[cfg(unix)]
fn inherited_stdin(
    cancel: Arc<AtomicBool>,
    poll_interval: Duration,
) -> io::Result<CancellableReader<std::fs::File>> {
    // A private duplicate, so polling never disturbs the process-wide handle.
    let fd = io::stdin().as_fd().try_clone_to_owned()?;
    Ok(CancellableReader::new(
        std::fs::File::from(fd),
        cancel,
        poll_interval,
    ))
}

#[cfg(not(unix))]
fn inherited_stdin(
    cancel: Arc<AtomicBool>,
    poll_interval: Duration,
) -> io::Result<CancellableReader<io::Stdin>> {
    Ok(CancellableReader::new(io::stdin(), cancel, poll_interval))
}

fn run_output(
    reader: PipeEnd,
    sink: OutputSink,
    chunk_size: usize,
    poll_interval: Duration,
    cancel: Arc<AtomicBool>,
) -> io::Result<u64> {
    let source = CancellableReader::new(reader.into_file(), Arc::clone(&cancel), poll_interval);
    let result = match sink {
        OutputSink::Inherit => forward_output(source, io::stdout(), chunk_size, &cancel),
        OutputSink::Writer(writer) => forward_output(source, writer, chunk_size, &cancel),
    };
    log_outcome(OUTPUT_FORWARDER, &result);
    result
}

fn run_input(
    writer: PipeEnd,
    source: InputSource,
    poll_interval: Duration,
    cancel: Arc<AtomicBool>,
) -> io::Result<u64> {
    let sink = writer.into_file();
    let result = match source {
        InputSource::Inherit => inherited_stdin(Arc::clone(&cancel), poll_interval)
            .and_then(|stdin| forward_input(BufReader::new(stdin), sink, &cancel)),
        InputSource::Reader(reader) => forward_input(BufReader::new(reader), sink, &cancel),
    };
    log_outcome(INPUT_FORWARDER, &result);
    result
}

fn log_outcome(name: &'static str, result: &io::Result<u64>) {
    match result {
        Ok(bytes) => debug!(forwarder = name, bytes, "Forwarder finished"),
        Err(e) => debug!(forwarder = name, error = %e, "Forwarder stopped on I/O error"),
    }
}

/// Outcome of stopping the forwarders.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownSummary {
    /// Forwarders whose thread was joined.
    pub joined: usize,
    /// Forwarders still blocked when the join timeout ran out.
    pub detached: usize,
}

struct Forwarder {
    name: &'static str,
    handle: Option<JoinHandle<io::Result<u64>>>,
}

/// The running forwarder threads of one launch and their cancellation flag.
pub(crate) struct ForwarderSet {
    cancel: Arc<AtomicBool>,
    join_timeout: Duration,
    workers: Vec<Forwarder>,
}

impl fmt::Debug for ForwarderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwarderSet")
            .field("cancelled", &self.cancel.load(Ordering::Relaxed))
            .field(
                "workers",
                &self.workers.iter().map(|w| w.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ForwarderSet {
    /// Spawn the output and input forwarders over the retained pipe ends.
    ///
    /// If the second thread cannot be spawned the first is cancelled and
    /// joined before the error is returned.
    pub(crate) fn start(
        parent: ParentStdio,
        input: InputSource,
        output: OutputSink,
        config: &LauncherConfig,
    ) -> Result<Self, LaunchError> {
        let ParentStdio {
            stdin_writer,
            stdout_reader,
        } = parent;

        let mut set = Self {
            cancel: Arc::new(AtomicBool::new(false)),
            join_timeout: config.join_timeout,
            workers: Vec::with_capacity(2),
        };

        let chunk_size = config.forward_chunk_size;
        let poll_interval = config.poll_interval;

        let cancel = Arc::clone(&set.cancel);
        set.spawn(OUTPUT_FORWARDER, move || {
            run_output(stdout_reader, output, chunk_size, poll_interval, cancel)
        })?;

        let cancel = Arc::clone(&set.cancel);
        set.spawn(INPUT_FORWARDER, move || {
            run_input(stdin_writer, input, poll_interval, cancel)
        })?;

        debug!("Started stdio forwarders");
        Ok(set)
    }

    fn spawn<F>(&mut self, name: &'static str, work: F) -> Result<(), LaunchError>
    where
        F: FnOnce() -> io::Result<u64> + Send + 'static,
    {
        let span = forwarder_span(name);
        let handle = thread::Builder::new()
            .name(format!("childlink-{name}"))
            .spawn(move || span.in_scope(work))
            .map_err(|source| LaunchError::Forwarder { name, source })?;

        self.workers.push(Forwarder {
            name,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Wait up to `timeout` for the output forwarder to reach end of stream.
    pub(crate) fn drain_output(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Some(handle) = self
            .workers
            .iter()
            .find(|w| w.name == OUTPUT_FORWARDER)
            .and_then(|w| w.handle.as_ref())
        else {
            return true;
        };

        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        true
    }

    /// Cancel every forwarder and join those that stop within the join timeout.
    ///
    /// A forwarder still blocked at the deadline is detached with a warning.
    pub(crate) fn shutdown(&mut self) -> ShutdownSummary {
        self.cancel.store(true, Ordering::Release);
        let deadline = Instant::now() + self.join_timeout;
        let mut summary = ShutdownSummary::default();

        for worker in &mut self.workers {
            let Some(handle) = worker.handle.take() else {
                continue;
            };

            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(JOIN_POLL_INTERVAL);
            }

            if !handle.is_finished() {
                warn!(
                    forwarder = worker.name,
                    timeout_ms = self.join_timeout.as_millis() as u64,
                    "Forwarder did not stop in time, detaching"
                );
                summary.detached += 1;
                continue;
            }

            if handle.join().is_err() {
                warn!(forwarder = worker.name, "Forwarder thread panicked");
            }
            summary.joined += 1;
        }

        summary
    }
}

impl Drop for ForwarderSet {
    fn drop(&mut self) {
        self.shutdown();
    }
}
