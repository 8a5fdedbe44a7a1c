//! Process creation capability
//!
//! [`ProcessSpawner`] is the seam between the launcher state machine and the
//! operating system. Each supported platform provides one native
//! implementation together with the pipe primitives the bridge needs.

use crate::command_line::CommandLine;
use crate::pipes::ChildStdio;
use crate::start_info::StartInfo;
use std::io;
use std::ops::BitOr;
use std::path::Path;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::{UnixProcess, UnixSpawner};
#[cfg(windows)]
pub use windows::{WindowsProcess, WindowsSpawner};

#[cfg(unix)]
pub(crate) use unix::{create_inheritable_pipe, is_inheritable, set_inheritable, wait_readable};
#[cfg(windows)]
pub(crate) use windows::{create_inheritable_pipe, is_inheritable, set_inheritable};

/// The spawner for the platform this crate is built for.
#[cfg(unix)]
pub type NativeSpawner = UnixSpawner;
/// The spawner for the platform this crate is built for.
#[cfg(windows)]
pub type NativeSpawner = WindowsSpawner;

/// Process creation flags handed to the platform.
///
/// Values are Win32 `PROCESS_CREATION_FLAGS` bits. Unix has no equivalent and
/// ignores them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CreationFlags(u32);

impl CreationFlags {
    pub const NONE: Self = Self(0);
    pub const DEBUG_PROCESS: Self = Self(0x0000_0001);
    pub const DEBUG_ONLY_THIS_PROCESS: Self = Self(0x0000_0002);
    pub const CREATE_SUSPENDED: Self = Self(0x0000_0004);
    pub const CREATE_NEW_CONSOLE: Self = Self(0x0000_0010);
    pub const CREATE_NO_WINDOW: Self = Self(0x0800_0000);

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CreationFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Everything the platform needs to create the child.
#[derive(Debug)]
pub struct SpawnRequest<'a> {
    pub start_info: &'a StartInfo,
    /// Executable to run. A path with a directory part is already absolute
    /// against the caller's working directory; a bare name is searched for
    /// by the platform.
    pub program: &'a Path,
    /// `None` lets the platform derive the invocation from the path alone.
    pub command_line: Option<&'a CommandLine>,
    /// `None` inherits the caller's working directory.
    pub working_directory: Option<&'a Path>,
    /// Child-facing pipe ends; stderr shares the stdout pipe.
    pub stdio: Option<&'a ChildStdio>,
    pub inherit_handles: bool,
    pub creation_flags: CreationFlags,
}

/// A handle the platform failed to close.
#[derive(Debug)]
pub struct ReleaseFailure {
    /// Which handle, e.g. `"process handle"` or `"thread handle"`.
    pub resource: &'static str,
    pub source: io::Error,
}

/// A created child process and the OS handles that refer to it.
pub trait ChildProcess {
    /// OS process identifier.
    fn id(&self) -> u32;

    /// Block until the child exits and return its exit code.
    ///
    /// `None` means the child was terminated without an exit code.
    fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Terminate the child and wait for it to exit.
    fn kill(&mut self) -> io::Result<()>;

    /// Close every handle held for the child.
    ///
    /// Consuming `self` makes a second release impossible. Failures are
    /// returned so the caller can report them; none of them is fatal.
    fn release(self) -> Vec<ReleaseFailure>;
}

/// Creates child processes.
///
/// Implementations create exactly one process per successful call and own
/// no resources on failure.
pub trait ProcessSpawner {
    type Process: ChildProcess;

    fn spawn(&self, request: &SpawnRequest<'_>) -> io::Result<Self::Process>;
}
