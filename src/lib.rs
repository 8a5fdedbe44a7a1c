//! childlink - launch a child process and bridge its standard I/O
//!
//! A [`Launcher`] starts one child process from a [`StartInfo`]. When
//! redirection is enabled the child's stdin and its combined stdout/stderr are
//! connected to anonymous pipes, and two owned background forwarders relay
//! them to the launcher's own streams. Teardown stops the forwarders and
//! releases every OS handle exactly once, also on drop.
//!
//! # Quick Start
//!
//! ```no_run
//! use childlink::{CreationFlags, Launcher, StartInfo};
//!
//! let info = StartInfo::new("/bin/sh")
//!     .arg("-c")
//!     .arg("echo hello")
//!     .redirect_stdio(true);
//!
//! let mut launcher = Launcher::new(info);
//! launcher.start(CreationFlags::NONE)?;
//! let exit_code = launcher.wait()?;
//! println!("child exited with {exit_code:?}");
//! # Ok::<(), childlink::LaunchError>(())
//! ```
//!
//! # Errors
//!
//! [`LaunchError`] messages for a missing or unrunnable executable begin with
//! [`CANNOT_FIND_PATH_MESSAGE`] and [`CHECK_IF_VALID_EXECUTABLE_MESSAGE`].
//! Both texts are stable. [`LaunchError::display_for_user`] renders a longer
//! report with context and suggestions.
//!
//! # Configuration
//!
//! Forwarding tunables live in [`LauncherConfig`], loadable from
//! `.childlink/config.toml` via [`LauncherConfig::discover`].

pub use childlink_runner::{
    CANNOT_FIND_PATH_MESSAGE, CHECK_IF_VALID_EXECUTABLE_MESSAGE, ChildProcess, CommandLine,
    CreationFlags, InputSource, LaunchError, LaunchState, Launcher, NativeSpawner, OutputSink,
    PipeStage, ProcessSpawner, ReleaseFailure, SpawnRequest, StartInfo, TeardownReport,
    build_command_line,
};

pub use childlink_config::{ConfigError, LauncherConfig, LauncherConfigBuilder};

pub use childlink_utils::error::{ErrorCategory, UserFriendlyError};
pub use childlink_utils::logging::init_tracing;

/// Lower-level building blocks: pipes, forwarders and platform spawners.
pub use childlink_runner as runner;
