use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use std::io;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use super::{ChildProcess, CreationFlags, ProcessSpawner, ReleaseFailure, SpawnRequest};

/// Create a pipe whose ends are both inherited by children.
///
/// `pipe(2)` leaves `FD_CLOEXEC` clear on both descriptors.
pub(crate) fn create_inheritable_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe().map_err(io::Error::from)
}

fn fd_flags(fd: BorrowedFd<'_>) -> io::Result<FdFlag> {
    Ok(FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD)?))
}

/// Set or clear `FD_CLOEXEC` so the descriptor is or is not inherited.
pub(crate) fn set_inheritable(fd: BorrowedFd<'_>, inheritable: bool) -> io::Result<()> {
    let flags = fd_flags(fd)?;
    let updated = if inheritable {
        flags.difference(FdFlag::FD_CLOEXEC)
    } else {
        flags.union(FdFlag::FD_CLOEXEC)
    };
    if updated != flags {
        fcntl(fd, FcntlArg::F_SETFD(updated))?;
    }
    Ok(())
}

pub(crate) fn is_inheritable(fd: BorrowedFd<'_>) -> io::Result<bool> {
    Ok(!fd_flags(fd)?.contains(FdFlag::FD_CLOEXEC))
}

/// Wait up to `timeout` for `fd` to become readable.
///
/// Hang-up and error conditions count as readable so the next read reports them.
pub(crate) fn wait_readable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    let timeout = PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX);
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];

    match poll(&mut fds, timeout) {
        Ok(ready) => Ok(ready > 0),
        Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Spawns children with `std::process::Command`.
///
/// The first argument becomes `argv[0]`; the executable is always `path`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixSpawner;

impl UnixSpawner {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ProcessSpawner for UnixSpawner {
    type Process = UnixProcess;

    fn spawn(&self, request: &SpawnRequest<'_>) -> io::Result<UnixProcess> {
        let info = request.start_info;
        let mut command = Command::new(request.program);

        if let Some((program_name, rest)) = info.arguments().split_first() {
            command.arg0(program_name).args(rest);
        }

        if let Some(dir) = request.working_directory {
            command.current_dir(dir);
        }

        if let Some(stdio) = request.stdio {
            // Command takes ownership of what it is given, so hand it duplicates
            // and leave the originals to the launcher.
            let stdout = stdio.stdout().try_clone_handle()?;
            command
                .stdin(Stdio::from(stdio.stdin().try_clone_handle()?))
                .stderr(Stdio::from(stdout.try_clone()?))
                .stdout(Stdio::from(stdout));
        }

        if request.creation_flags != CreationFlags::NONE {
            tracing::trace!(
                flags = request.creation_flags.bits(),
                "Creation flags have no Unix equivalent, ignoring"
            );
        }

        let child = command.spawn()?;
        Ok(UnixProcess { child })
    }
}

/// A child created by [`UnixSpawner`].
#[derive(Debug)]
pub struct UnixProcess {
    child: Child,
}

impl ChildProcess for UnixProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.child.wait()?;
        Ok(status.code())
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }

    fn release(mut self) -> Vec<ReleaseFailure> {
        // Reap the child if it already exited; a running child is left alone.
        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(pid = self.child.id(), %status, "Reaped child process");
                Vec::new()
            }
            Ok(None) => {
                tracing::debug!(pid = self.child.id(), "Releasing still-running child process");
                Vec::new()
            }
            Err(source) => vec![ReleaseFailure {
                resource: "process handle",
                source,
            }],
        }
    }
}
