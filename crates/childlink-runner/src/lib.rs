//! Child process launching with optional stdio bridging
//!
//! A [`Launcher`] creates one child from a [`StartInfo`]. With redirection
//! enabled the child's stdin and combined stdout/stderr are connected to
//! anonymous pipes, and two background forwarders relay them to the
//! launcher's own standard streams (or to a caller-supplied reader and
//! writer).

pub mod command_line;
pub mod error;
pub mod forward;
pub mod launcher;
pub mod pipes;
pub mod platform;
pub mod start_info;

pub use command_line::{CommandLine, build_command_line};
pub use error::{
    CANNOT_FIND_PATH_MESSAGE, CHECK_IF_VALID_EXECUTABLE_MESSAGE, LaunchError, PipeStage,
};
pub use forward::{InputSource, OutputSink, ShutdownSummary, forward_input, forward_output};
pub use launcher::{LaunchState, Launcher, TeardownReport};
pub use pipes::{ChildStdio, ParentStdio, PipeEnd, PipePair, StdioPipes, create_stdio_pipes};
pub use platform::{
    ChildProcess, CreationFlags, NativeSpawner, ProcessSpawner, ReleaseFailure, SpawnRequest,
};
pub use start_info::StartInfo;

#[cfg(unix)]
pub use platform::{UnixProcess, UnixSpawner};
#[cfg(windows)]
pub use platform::{WindowsProcess, WindowsSpawner};
