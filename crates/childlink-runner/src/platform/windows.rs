use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{
    AsHandle, AsRawHandle, BorrowedHandle, FromRawHandle, OwnedHandle, RawHandle,
};

use ::windows::Win32::Foundation::{
    CloseHandle, GetHandleInformation, HANDLE, HANDLE_FLAG_INHERIT, HANDLE_FLAGS,
    SetHandleInformation, WAIT_OBJECT_0,
};
use ::windows::Win32::Security::SECURITY_ATTRIBUTES;
use ::windows::Win32::System::Pipes::CreatePipe;
use ::windows::Win32::System::Threading::{
    CreateProcessW, GetExitCodeProcess, INFINITE, PROCESS_CREATION_FLAGS, PROCESS_INFORMATION,
    STARTF_USESTDHANDLES, STARTUPINFOW, TerminateProcess, WaitForSingleObject,
};
use ::windows::core::{PCWSTR, PWSTR};

use super::{ChildProcess, ProcessSpawner, ReleaseFailure, SpawnRequest};

fn raw(handle: BorrowedHandle<'_>) -> HANDLE {
    HANDLE(handle.as_raw_handle())
}

fn to_wide_nul(text: &OsStr) -> Vec<u16> {
    text.encode_wide().chain(std::iter::once(0)).collect()
}

/// Create an anonymous pipe whose ends are both inheritable.
pub(crate) fn create_inheritable_pipe() -> io::Result<(OwnedHandle, OwnedHandle)> {
    let attributes = SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: std::ptr::null_mut(),
        bInheritHandle: true.into(),
    };
    let mut read_end = HANDLE::default();
    let mut write_end = HANDLE::default();

    // SAFETY: both out-pointers and the attributes live across the call; on
    // success the two handles are new and owned by nobody else.
    unsafe {
        CreatePipe(&raw mut read_end, &raw mut write_end, Some(&raw const attributes), 0)
            .map_err(io::Error::from)?;
        Ok((
            OwnedHandle::from_raw_handle(read_end.0 as RawHandle),
            OwnedHandle::from_raw_handle(write_end.0 as RawHandle),
        ))
    }
}

pub(crate) fn set_inheritable(handle: BorrowedHandle<'_>, inheritable: bool) -> io::Result<()> {
    let flags = if inheritable {
        HANDLE_FLAG_INHERIT
    } else {
        HANDLE_FLAGS(0)
    };
    // SAFETY: the borrowed handle is live for the duration of the call.
    unsafe { SetHandleInformation(raw(handle), HANDLE_FLAG_INHERIT.0, flags) }
        .map_err(io::Error::from)
}

pub(crate) fn is_inheritable(handle: BorrowedHandle<'_>) -> io::Result<bool> {
    let mut flags = 0u32;
    // SAFETY: the borrowed handle is live and `flags` outlives the call.
    unsafe { GetHandleInformation(raw(handle), &raw mut flags) }.map_err(io::Error::from)?;
    Ok(flags & HANDLE_FLAG_INHERIT.0 != 0)
}

/// Spawns children with `CreateProcessW`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsSpawner;

impl WindowsSpawner {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ProcessSpawner for WindowsSpawner {
    type Process = WindowsProcess;

    fn spawn(&self, request: &SpawnRequest<'_>) -> io::Result<WindowsProcess> {
        let mut startup_info = STARTUPINFOW {
            cb: std::mem::size_of::<STARTUPINFOW>() as u32,
            ..Default::default()
        };

        if let Some(stdio) = request.stdio {
            startup_info.hStdInput = raw(stdio.stdin().as_handle());
            startup_info.hStdOutput = raw(stdio.stdout().as_handle());
            startup_info.hStdError = raw(stdio.stdout().as_handle());
            startup_info.dwFlags |= STARTF_USESTDHANDLES;
        }

        // Without a command line the application name carries the invocation.
        let mut command_line = request.command_line.map(|line| line.to_wide_mut());
        let application_name = match command_line {
            Some(_) => None,
            None => Some(to_wide_nul(request.program.as_os_str())),
        };
        let working_directory = request
            .working_directory
            .map(|dir| to_wide_nul(dunce::simplified(dir).as_os_str()));

        let mut process_information = PROCESS_INFORMATION::default();

        // SAFETY: every buffer and struct passed by pointer outlives the call;
        // the command line buffer is an owned, writable, NUL-terminated copy.
        unsafe {
            CreateProcessW(
                application_name
                    .as_ref()
                    .map_or(PCWSTR::null(), |name| PCWSTR(name.as_ptr())),
                command_line
                    .as_mut()
                    .map(|line| PWSTR(line.as_mut_ptr())),
                None,
                None,
                request.inherit_handles,
                PROCESS_CREATION_FLAGS(request.creation_flags.bits()),
                None,
                working_directory
                    .as_ref()
                    .map_or(PCWSTR::null(), |dir| PCWSTR(dir.as_ptr())),
                &raw const startup_info,
                &raw mut process_information,
            )
        }
        .map_err(io::Error::from)?;

        Ok(WindowsProcess {
            pid: process_information.dwProcessId,
            process: Some(process_information.hProcess),
            thread: Some(process_information.hThread),
        })
    }
}

/// A child created by [`WindowsSpawner`], holding its process and primary thread handles.
#[derive(Debug)]
pub struct WindowsProcess {
    pid: u32,
    process: Option<HANDLE>,
    thread: Option<HANDLE>,
}

// SAFETY: process and thread HANDLEs are kernel object references usable from any thread.
unsafe impl Send for WindowsProcess {}

fn close(handle: Option<HANDLE>, resource: &'static str) -> Option<ReleaseFailure> {
    let handle = handle.filter(|h| !h.is_invalid())?;
    // SAFETY: the handle came from CreateProcessW and is closed exactly once here.
    unsafe { CloseHandle(handle) }
        .err()
        .map(|e| ReleaseFailure {
            resource,
            source: io::Error::from(e),
        })
}

impl WindowsProcess {
    fn process_handle(&self) -> io::Result<HANDLE> {
        self.process
            .ok_or_else(|| io::Error::other("process handle already released"))
    }
}

/// # Safety
///
/// `handle` must be an open process handle.
unsafe fn wait_for_exit(handle: HANDLE) -> io::Result<()> {
    // SAFETY: upheld by the caller.
    if unsafe { WaitForSingleObject(handle, INFINITE) } != WAIT_OBJECT_0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl ChildProcess for WindowsProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn wait(&mut self) -> io::Result<Option<i32>> {
        let handle = self.process_handle()?;

        // SAFETY: the process handle stays open until `release`.
        unsafe {
            wait_for_exit(handle)?;
            let mut exit_code = 0u32;
            GetExitCodeProcess(handle, &raw mut exit_code).map_err(io::Error::from)?;
            Ok(Some(exit_code as i32))
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        let handle = self.process_handle()?;

        // SAFETY: the process handle stays open until `release`.
        unsafe {
            TerminateProcess(handle, 1).map_err(io::Error::from)?;
            wait_for_exit(handle)
        }
    }

    fn release(mut self) -> Vec<ReleaseFailure> {
        [
            close(self.process.take(), "process handle"),
            close(self.thread.take(), "thread handle"),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}
