#![allow(dead_code)]

use childlink::LauncherConfig;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

/// A writer that forwards every chunk over a channel.
pub(crate) struct ChannelWriter(Sender<Vec<u8>>);

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn output_channel() -> (ChannelWriter, Receiver<Vec<u8>>) {
    let (tx, rx) = mpsc::channel();
    (ChannelWriter(tx), rx)
}

/// Everything received so far, as text.
pub(crate) fn drain_text(rx: &Receiver<Vec<u8>>) -> String {
    let bytes: Vec<u8> = rx.try_iter().flatten().collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Receive until `needle` shows up or `timeout` elapses.
pub(crate) fn receive_until(rx: &Receiver<Vec<u8>>, needle: &str, timeout: Duration) -> String {
    let deadline = std::time::Instant::now() + timeout;
    let mut received = Vec::new();
    while !String::from_utf8_lossy(&received).contains(needle) {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(chunk) => received.extend(chunk),
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&received).into_owned()
}

/// Absolute path of a system tool.
pub(crate) fn tool(name: &str) -> PathBuf {
    which::which(name).unwrap_or_else(|e| panic!("{name} not found on PATH: {e}"))
}

/// Short poll interval and join timeout so tests stay fast.
pub(crate) fn quick_config() -> LauncherConfig {
    LauncherConfig::builder()
        .poll_interval(Duration::from_millis(10))
        .join_timeout(Duration::from_secs(2))
        .build()
        .expect("valid test config")
}

/// Number of descriptors currently open in this process.
#[cfg(unix)]
pub(crate) fn open_fd_count() -> usize {
    let dir = if std::path::Path::new("/proc/self/fd").is_dir() {
        "/proc/self/fd"
    } else {
        "/dev/fd"
    };
    std::fs::read_dir(dir)
        .expect("descriptor directory is readable")
        .count()
}
