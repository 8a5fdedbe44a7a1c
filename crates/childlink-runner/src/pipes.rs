//! Anonymous pipes for stdio redirection
//!
//! Two pairs are created, one per direction. Both ends of a new pair are
//! inheritable; the end the launcher keeps is then made non-inheritable so the
//! child (and its descendants) never hold a copy of it. A stray copy of the
//! stdin write end would keep the child's stdin open after the launcher closes
//! its own.

use crate::error::{LaunchError, PipeStage};
use crate::platform;
use std::fs::File;
use std::io;

#[cfg(unix)]
use std::os::fd::{AsFd, BorrowedFd, OwnedFd as OwnedPipeHandle};
#[cfg(windows)]
use std::os::windows::io::{AsHandle, BorrowedHandle, OwnedHandle as OwnedPipeHandle};

/// One end of an anonymous pipe. Closed when dropped.
#[derive(Debug)]
pub struct PipeEnd {
    handle: OwnedPipeHandle,
}

impl PipeEnd {
    /// Whether a child created with handle inheritance receives this end.
    pub fn is_inheritable(&self) -> io::Result<bool> {
        platform::is_inheritable(self.borrow_handle())
    }

    fn set_inheritable(&self, inheritable: bool) -> io::Result<()> {
        platform::set_inheritable(self.borrow_handle(), inheritable)
    }

    /// Duplicate the underlying handle.
    pub fn try_clone_handle(&self) -> io::Result<OwnedPipeHandle> {
        self.handle.try_clone()
    }

    /// Turn this end into a `File` for reading or writing.
    #[must_use]
    pub fn into_file(self) -> File {
        File::from(self.handle)
    }

    #[cfg(unix)]
    fn borrow_handle(&self) -> BorrowedFd<'_> {
        self.handle.as_fd()
    }

    #[cfg(windows)]
    fn borrow_handle(&self) -> BorrowedHandle<'_> {
        self.handle.as_handle()
    }
}

impl From<OwnedPipeHandle> for PipeEnd {
    fn from(handle: OwnedPipeHandle) -> Self {
        Self { handle }
    }
}

#[cfg(unix)]
impl AsFd for PipeEnd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.handle.as_fd()
    }
}

#[cfg(windows)]
impl AsHandle for PipeEnd {
    fn as_handle(&self) -> BorrowedHandle<'_> {
        self.handle.as_handle()
    }
}

/// Both ends of one anonymous pipe.
#[derive(Debug)]
pub struct PipePair {
    pub read_end: PipeEnd,
    pub write_end: PipeEnd,
}

impl PipePair {
    fn create() -> io::Result<Self> {
        let (read_end, write_end) = platform::create_inheritable_pipe()?;
        Ok(Self {
            read_end: read_end.into(),
            write_end: write_end.into(),
        })
    }
}

/// The pipe ends handed to the child. stderr shares the stdout pipe.
#[derive(Debug)]
pub struct ChildStdio {
    stdin: PipeEnd,
    stdout: PipeEnd,
}

impl ChildStdio {
    /// Read end of the stdin pipe.
    #[must_use]
    pub fn stdin(&self) -> &PipeEnd {
        &self.stdin
    }

    /// Write end of the stdout pipe, also used for stderr.
    #[must_use]
    pub fn stdout(&self) -> &PipeEnd {
        &self.stdout
    }
}

/// The pipe ends the launcher keeps and hands to its forwarders.
#[derive(Debug)]
pub struct ParentStdio {
    pub(crate) stdin_writer: PipeEnd,
    pub(crate) stdout_reader: PipeEnd,
}

/// Both directions of a redirected child's stdio.
#[derive(Debug)]
pub struct StdioPipes {
    pub child: ChildStdio,
    pub parent: ParentStdio,
}

/// Create the stdin and stdout pipe pairs for a redirected child.
///
/// On error every pipe created so far is closed before returning.
pub fn create_stdio_pipes() -> Result<StdioPipes, LaunchError> {
    create_stdio_pipes_with(PipePair::create, |end| end.set_inheritable(false))
}

pub(crate) fn create_stdio_pipes_with<C, N>(
    mut create: C,
    mut make_private: N,
) -> Result<StdioPipes, LaunchError>
where
    C: FnMut() -> io::Result<PipePair>,
    N: FnMut(&PipeEnd) -> io::Result<()>,
{
    let stage_error = |stage| move |source| LaunchError::PipeSetupFailed { stage, source };

    let stdin_pair = create().map_err(stage_error(PipeStage::CreateStdinPipe))?;
    make_private(&stdin_pair.write_end).map_err(stage_error(PipeStage::ClearStdinInheritance))?;

    let stdout_pair = create().map_err(stage_error(PipeStage::CreateStdoutPipe))?;
    make_private(&stdout_pair.read_end)
        .map_err(stage_error(PipeStage::ClearStdoutInheritance))?;

    tracing::debug!("Created stdio pipes");

    Ok(StdioPipes {
        child: ChildStdio {
            stdin: stdin_pair.read_end,
            stdout: stdout_pair.write_end,
        },
        parent: ParentStdio {
            stdin_writer: stdin_pair.write_end,
            stdout_reader: stdout_pair.read_end,
        },
    })
}
