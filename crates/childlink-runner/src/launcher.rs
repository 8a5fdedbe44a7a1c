//! Child process launcher
//!
//! [`Launcher`] owns everything a launched child needs from the parent: the
//! native process handle and, when stdio is redirected, the two forwarder
//! threads and the pipe ends they hold. All of it is released by
//! [`Launcher::teardown`], which also runs on drop.

use crate::command_line::build_command_line;
use crate::error::LaunchError;
use crate::forward::{ForwarderSet, InputSource, OutputSink};
use crate::pipes::{StdioPipes, create_stdio_pipes};
use crate::platform::{
    ChildProcess, CreationFlags, NativeSpawner, ProcessSpawner, ReleaseFailure, SpawnRequest,
};
use crate::start_info::StartInfo;
use childlink_config::LauncherConfig;
use childlink_utils::logging::launch_span;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`Launcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    /// Not started yet.
    Created,
    /// `start` is in progress.
    Starting,
    /// The child was created.
    Running,
    /// `start` failed. Nothing is held and the launcher cannot start again.
    Failed,
    /// Resources were released; the launcher cannot start again.
    TornDown,
}

/// What one call to [`Launcher::teardown`] released.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// The process handle was held and has now been released.
    pub process_released: bool,
    /// Handles that could not be closed. Logged, never fatal.
    pub release_failures: Vec<ReleaseFailure>,
    /// Forwarder threads joined.
    pub forwarders_joined: usize,
    /// Forwarder threads left running after the join timeout.
    pub forwarders_detached: usize,
}

/// Launches one child process and bridges its standard I/O.
///
/// ```no_run
/// use childlink_runner::{CreationFlags, Launcher, StartInfo};
///
/// let info = StartInfo::new("/bin/cat").redirect_stdio(true);
/// let mut launcher = Launcher::new(info);
/// launcher.start(CreationFlags::NONE)?;
/// launcher.wait()?;
/// # Ok::<(), childlink_runner::LaunchError>(())
/// ```
#[derive(Debug)]
pub struct Launcher<S: ProcessSpawner = NativeSpawner> {
    start_info: StartInfo,
    config: LauncherConfig,
    spawner: S,
    input: Option<InputSource>,
    output: Option<OutputSink>,
    state: LaunchState,
    process: Option<S::Process>,
    forwarders: Option<ForwarderSet>,
}

impl Launcher<NativeSpawner> {
    /// Launcher for `start_info` with the default configuration.
    #[must_use]
    pub fn new(start_info: StartInfo) -> Self {
        Self::with_config(start_info, LauncherConfig::default())
    }

    #[must_use]
    pub fn with_config(start_info: StartInfo, config: LauncherConfig) -> Self {
        Self::with_spawner(start_info, config, NativeSpawner::new())
    }
}

impl<S: ProcessSpawner> Launcher<S> {
    /// Launcher that creates its child through `spawner`.
    pub fn with_spawner(start_info: StartInfo, config: LauncherConfig, spawner: S) -> Self {
        Self {
            start_info,
            config,
            spawner,
            input: None,
            output: None,
            state: LaunchState::Created,
            process: None,
            forwarders: None,
        }
    }

    /// Feed the child's stdin from `reader` instead of the launcher's stdin.
    ///
    /// Only used when redirection is enabled.
    #[must_use]
    pub fn input_from(mut self, reader: impl Read + Send + 'static) -> Self {
        self.input = Some(InputSource::Reader(Box::new(reader)));
        self
    }

    /// Send the child's output to `writer` instead of the launcher's stdout.
    ///
    /// Only used when redirection is enabled.
    #[must_use]
    pub fn output_to(mut self, writer: impl Write + Send + 'static) -> Self {
        self.output = Some(OutputSink::Writer(Box::new(writer)));
        self
    }

    #[must_use]
    pub fn start_info(&self) -> &StartInfo {
        &self.start_info
    }

    #[must_use]
    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> LaunchState {
        self.state
    }

    /// OS process id of the running child.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ChildProcess::id)
    }

    /// Create the child process.
    ///
    /// A start is attempted at most once. On failure every resource acquired
    /// by this call is released and the launcher moves to
    /// [`LaunchState::Failed`].
    ///
    /// A path with a directory part is resolved against the caller's working
    /// directory, not the child's.
    ///
    /// # Errors
    ///
    /// - [`LaunchError::AlreadyStarted`] unless the launcher is in `Created`
    /// - [`LaunchError::PipeSetupFailed`] when redirection pipes cannot be set up
    /// - [`LaunchError::PathNotFound`] when the executable does not exist
    /// - [`LaunchError::ProcessCreationFailed`] when it exists but cannot be run
    /// - [`LaunchError::Forwarder`] when a forwarding thread cannot be spawned;
    ///   the child was already created and is killed before this returns
    pub fn start(&mut self, creation_flags: CreationFlags) -> Result<(), LaunchError> {
        if self.state != LaunchState::Created {
            return Err(LaunchError::AlreadyStarted);
        }

        let span = launch_span(self.start_info.path(), self.start_info.redirects_stdio());
        let _enter = span.enter();

        self.state = LaunchState::Starting;
        match self.start_child(creation_flags) {
            Ok(()) => {
                self.state = LaunchState::Running;
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "Start failed");
                self.state = LaunchState::Failed;
                Err(e)
            }
        }
    }

    fn start_child(&mut self, creation_flags: CreationFlags) -> Result<(), LaunchError> {
        let command_line = build_command_line(self.start_info.arguments());
        if let Some(line) = &command_line {
            debug!(command_line = %line, "Built command line");
        }

        let redirect = self.start_info.redirects_stdio();
        let (child_stdio, parent_stdio) = if redirect {
            let StdioPipes { child, parent } = create_stdio_pipes()?;
            (Some(child), Some(parent))
        } else {
            (None, None)
        };

        let program = resolve_program(self.start_info.path());
        let request = SpawnRequest {
            start_info: &self.start_info,
            program: &program,
            command_line: command_line.as_ref(),
            working_directory: self.start_info.working_dir(),
            stdio: child_stdio.as_ref(),
            inherit_handles: redirect,
            creation_flags,
        };
        let spawned = self.spawner.spawn(&request);

        // The child holds its own copies now.
        drop(child_stdio);

        let process = match spawned {
            Ok(process) => process,
            Err(source) => {
                drop(parent_stdio);
                return Err(LaunchError::creation_failure(
                    self.start_info.path().to_path_buf(),
                    program.exists(),
                    self.start_info.to_string(),
                    &source,
                ));
            }
        };

        info!(pid = process.id(), "Started child process");

        if let Some(parent) = parent_stdio {
            let input = self.input.take().unwrap_or(InputSource::Inherit);
            let output = self.output.take().unwrap_or(OutputSink::Inherit);
            match ForwarderSet::start(parent, input, output, &self.config) {
                Ok(forwarders) => self.forwarders = Some(forwarders),
                Err(e) => {
                    abandon(process);
                    return Err(e);
                }
            }
        }

        self.process = Some(process);
        Ok(())
    }

    /// Block until the child exits and return its exit code.
    ///
    /// `None` means the child was terminated without one. Output the child
    /// wrote before exiting is forwarded before this returns, bounded by the
    /// configured join timeout.
    ///
    /// # Errors
    ///
    /// [`LaunchError::NotRunning`] without a child, [`LaunchError::Wait`] when
    /// the OS wait fails.
    pub fn wait(&mut self) -> Result<Option<i32>, LaunchError> {
        let process = self.process.as_mut().ok_or(LaunchError::NotRunning)?;
        let code = process.wait().map_err(|source| LaunchError::Wait { source })?;
        info!(pid = process.id(), exit_code = ?code, "Child process exited");

        if let Some(forwarders) = &self.forwarders
            && !forwarders.drain_output(self.config.join_timeout)
        {
            debug!("Output still open after child exit");
        }
        Ok(code)
    }

    /// Stop the forwarders and release the process handles.
    ///
    /// Never fails. Release failures are logged and listed in the report.
    /// Safe to call any number of times; later calls release nothing. Does
    /// not wait for or terminate the child.
    pub fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        if let Some(mut forwarders) = self.forwarders.take() {
            let summary = forwarders.shutdown();
            report.forwarders_joined = summary.joined;
            report.forwarders_detached = summary.detached;
        }

        if let Some(process) = self.process.take() {
            let pid = process.id();
            let failures = process.release();
            log_release_failures(pid, &failures);
            debug!(pid, "Released child process");
            report.process_released = true;
            report.release_failures = failures;
        }

        self.state = LaunchState::TornDown;
        report
    }
}

impl<S: ProcessSpawner> Drop for Launcher<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Make a path with a directory part absolute against the current directory.
///
/// Bare names are left for the platform's search path.
fn resolve_program(path: &Path) -> PathBuf {
    let has_directory = path.parent().is_some_and(|parent| !parent.as_os_str().is_empty());
    if has_directory {
        std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
    } else {
        path.to_path_buf()
    }
}

/// Kill and release a child the launcher will not keep.
fn abandon<P: ChildProcess>(mut process: P) {
    let pid = process.id();
    if let Err(e) = process.kill() {
        warn!(pid, error = %e, "Cannot terminate child process");
    }
    log_release_failures(pid, &process.release());
}

fn log_release_failures(pid: u32, failures: &[ReleaseFailure]) {
    for failure in failures {
        error!(pid, error = %failure.source, "Cannot close {}", failure.resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct RecordedSpawn {
        program: PathBuf,
        command_line: Option<String>,
        working_directory: Option<PathBuf>,
        had_stdio: bool,
        inherit_handles: bool,
        creation_flags: CreationFlags,
    }

    #[derive(Debug, Clone, Default)]
    struct MockSpawner {
        spawns: Arc<Mutex<Vec<RecordedSpawn>>>,
        releases: Arc<AtomicUsize>,
        kills: Arc<AtomicUsize>,
        fail_with: Option<io::ErrorKind>,
        fail_release: bool,
    }

    impl MockSpawner {
        fn failing(kind: io::ErrorKind) -> Self {
            Self {
                fail_with: Some(kind),
                ..Self::default()
            }
        }

        fn spawn_count(&self) -> usize {
            self.spawns.lock().unwrap().len()
        }

        fn last_spawn(&self) -> RecordedSpawn {
            self.spawns.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[derive(Debug)]
    struct MockProcess {
        releases: Arc<AtomicUsize>,
        kills: Arc<AtomicUsize>,
        fail_release: bool,
    }

    impl ChildProcess for MockProcess {
        fn id(&self) -> u32 {
            4242
        }

        fn wait(&mut self) -> io::Result<Option<i32>> {
            Ok(Some(7))
        }

        fn kill(&mut self) -> io::Result<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(self) -> Vec<ReleaseFailure> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.fail_release {
                vec![
                    ReleaseFailure {
                        resource: "process handle",
                        source: io::Error::other("close failed"),
                    },
                    ReleaseFailure {
                        resource: "thread handle",
                        source: io::Error::other("close failed"),
                    },
                ]
            } else {
                Vec::new()
            }
        }
    }

    impl ProcessSpawner for MockSpawner {
        type Process = MockProcess;

        fn spawn(&self, request: &SpawnRequest<'_>) -> io::Result<MockProcess> {
            self.spawns.lock().unwrap().push(RecordedSpawn {
                program: request.program.to_path_buf(),
                command_line: request.command_line.map(ToString::to_string),
                working_directory: request.working_directory.map(PathBuf::from),
                had_stdio: request.stdio.is_some(),
                inherit_handles: request.inherit_handles,
                creation_flags: request.creation_flags,
            });

            if let Some(kind) = self.fail_with {
                return Err(kind.into());
            }
            Ok(MockProcess {
                releases: Arc::clone(&self.releases),
                kills: Arc::clone(&self.kills),
                fail_release: self.fail_release,
            })
        }
    }

    fn quick_config() -> LauncherConfig {
        LauncherConfig::builder()
            .poll_interval(Duration::from_millis(10))
            .join_timeout(Duration::from_millis(500))
            .build()
            .unwrap()
    }

    fn launcher(info: StartInfo, spawner: &MockSpawner) -> Launcher<MockSpawner> {
        Launcher::with_spawner(info, quick_config(), spawner.clone())
    }

    #[test]
    fn test_start_without_redirection() {
        let spawner = MockSpawner::default();
        let mut launcher = launcher(StartInfo::new("tool").arg("--flag"), &spawner);

        launcher.start(CreationFlags::CREATE_NO_WINDOW).unwrap();

        assert_eq!(launcher.state(), LaunchState::Running);
        assert_eq!(launcher.pid(), Some(4242));
        assert_eq!(
            spawner.last_spawn(),
            RecordedSpawn {
                program: PathBuf::from("tool"),
                command_line: Some("\"tool\" \"--flag\" ".to_string()),
                working_directory: None,
                had_stdio: false,
                inherit_handles: false,
                creation_flags: CreationFlags::CREATE_NO_WINDOW,
            }
        );
        assert!(launcher.forwarders.is_none());
    }

    #[test]
    fn test_working_directory_is_passed_through() {
        let spawner = MockSpawner::default();
        let mut launcher = launcher(StartInfo::new("tool").working_directory("/srv/data"), &spawner);

        launcher.start(CreationFlags::NONE).unwrap();
        assert_eq!(
            spawner.last_spawn().working_directory,
            Some(PathBuf::from("/srv/data"))
        );
    }

    #[test]
    fn test_empty_argument_list_passes_no_command_line() {
        let spawner = MockSpawner::default();
        let mut launcher = launcher(StartInfo::new("tool").with_arguments::<_, &str>([]), &spawner);

        launcher.start(CreationFlags::NONE).unwrap();
        assert_eq!(spawner.last_spawn().command_line, None);
    }

    #[test]
    fn test_start_twice_is_rejected_without_spawning() {
        let spawner = MockSpawner::default();
        let mut launcher = launcher(StartInfo::new("tool"), &spawner);

        launcher.start(CreationFlags::NONE).unwrap();
        let err = launcher.start(CreationFlags::NONE).unwrap_err();

        assert!(matches!(err, LaunchError::AlreadyStarted));
        assert_eq!(spawner.spawn_count(), 1);
        assert_eq!(launcher.state(), LaunchState::Running);
    }

    #[test]
    fn test_missing_executable_reports_path_not_found() {
        let spawner = MockSpawner::failing(io::ErrorKind::NotFound);
        let mut launcher = launcher(
            StartInfo::new("/definitely/not/here/tool").redirect_stdio(true),
            &spawner,
        );

        let err = launcher.start(CreationFlags::NONE).unwrap_err();

        assert_eq!(err.to_string(), "Cannot find path: /definitely/not/here/tool");
        assert_eq!(launcher.state(), LaunchState::Failed);
        assert_eq!(launcher.pid(), None);
        assert!(launcher.forwarders.is_none());
        assert_eq!(spawner.releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_existing_path_failure_reports_start_info() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let spawner = MockSpawner::failing(io::ErrorKind::PermissionDenied);
        let mut launcher = launcher(StartInfo::new(file.path()).arg("x"), &spawner);

        let err = launcher.start(CreationFlags::NONE).unwrap_err();

        match &err {
            LaunchError::ProcessCreationFailed { start_info, .. } => {
                assert!(start_info.contains(&file.path().display().to_string()));
            }
            other => panic!("Expected ProcessCreationFailed, got {other:?}"),
        }
        assert!(
            err.to_string()
                .starts_with("Cannot run process, check if it is a valid executable:\n")
        );
    }

    #[test]
    fn test_failed_start_is_terminal() {
        let mut spawner = MockSpawner::failing(io::ErrorKind::NotFound);
        let mut launcher = launcher(StartInfo::new("/no/such/tool"), &spawner);
        assert!(launcher.start(CreationFlags::NONE).is_err());
        assert_eq!(launcher.state(), LaunchState::Failed);

        // Even a spawner that would now succeed is never asked again.
        spawner.fail_with = None;
        launcher.spawner = spawner.clone();
        let err = launcher.start(CreationFlags::NONE).unwrap_err();

        assert!(matches!(err, LaunchError::AlreadyStarted));
        assert_eq!(spawner.spawn_count(), 1);
        assert_eq!(launcher.state(), LaunchState::Failed);
        assert_eq!(launcher.pid(), None);
    }

    #[test]
    fn test_teardown_after_failed_start_releases_nothing() {
        let spawner = MockSpawner::failing(io::ErrorKind::NotFound);
        let mut launcher = launcher(StartInfo::new("/no/such/tool"), &spawner);
        assert!(launcher.start(CreationFlags::NONE).is_err());

        let report = launcher.teardown();
        assert!(!report.process_released);
        assert_eq!(launcher.state(), LaunchState::TornDown);
        assert_eq!(spawner.releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_relative_path_resolves_against_caller_directory() {
        let spawner = MockSpawner::default();
        let mut launcher = launcher(
            StartInfo::new("bin/tool").working_directory("/srv"),
            &spawner,
        );

        launcher.start(CreationFlags::NONE).unwrap();

        let spawn = spawner.last_spawn();
        assert_eq!(spawn.program, std::env::current_dir().unwrap().join("bin/tool"));
        assert_eq!(spawn.working_directory, Some(PathBuf::from("/srv")));
        // The child still sees the path as given.
        assert_eq!(spawn.command_line, Some("\"bin/tool\" ".to_string()));
    }

    #[test]
    fn test_bare_program_name_is_left_for_search() {
        assert_eq!(resolve_program(Path::new("tool")), PathBuf::from("tool"));
        assert_eq!(resolve_program(Path::new("/opt/tool")), PathBuf::from("/opt/tool"));
        assert_eq!(
            resolve_program(Path::new("./tool")),
            std::env::current_dir().unwrap().join("tool")
        );
    }

    #[test]
    fn test_relative_missing_path_is_checked_in_caller_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("only-in-workdir"), b"").unwrap();
        let spawner = MockSpawner::failing(io::ErrorKind::NotFound);
        let mut launcher = launcher(
            StartInfo::new("./only-in-workdir").working_directory(dir.path()),
            &spawner,
        );

        let err = launcher.start(CreationFlags::NONE).unwrap_err();
        assert!(matches!(err, LaunchError::PathNotFound { .. }));
        assert_eq!(err.to_string(), "Cannot find path: ./only-in-workdir");
    }

    #[test]
    fn test_abandoned_child_is_killed_then_released() {
        let spawner = MockSpawner::default();
        let process = spawner
            .spawn(&SpawnRequest {
                start_info: &StartInfo::new("tool"),
                program: Path::new("tool"),
                command_line: None,
                working_directory: None,
                stdio: None,
                inherit_handles: false,
                creation_flags: CreationFlags::NONE,
            })
            .unwrap();

        abandon(process);

        assert_eq!(spawner.kills.load(Ordering::SeqCst), 1);
        assert_eq!(spawner.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_redirection_creates_pipes_and_forwarders() {
        let spawner = MockSpawner::default();
        let mut launcher = launcher(StartInfo::new("tool").redirect_stdio(true), &spawner)
            .input_from(io::empty())
            .output_to(io::sink());

        launcher.start(CreationFlags::NONE).unwrap();

        let spawn = spawner.last_spawn();
        assert!(spawn.had_stdio);
        assert!(spawn.inherit_handles);
        assert!(launcher.forwarders.is_some());

        // The mock child never held the pipes, so both forwarders end on their own.
        let report = launcher.teardown();
        assert_eq!(report.forwarders_joined, 2);
        assert_eq!(report.forwarders_detached, 0);
        assert!(report.process_released);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let spawner = MockSpawner::default();
        let mut launcher = launcher(StartInfo::new("tool"), &spawner);
        launcher.start(CreationFlags::NONE).unwrap();

        let first = launcher.teardown();
        let second = launcher.teardown();

        assert!(first.process_released);
        assert!(!second.process_released);
        assert_eq!(spawner.releases.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.state(), LaunchState::TornDown);
        assert_eq!(launcher.pid(), None);
    }

    #[test]
    fn test_drop_releases_process_once() {
        let spawner = MockSpawner::default();
        {
            let mut launcher = launcher(StartInfo::new("tool"), &spawner);
            launcher.start(CreationFlags::NONE).unwrap();
        }
        assert_eq!(spawner.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_after_teardown_does_not_release_again() {
        let spawner = MockSpawner::default();
        {
            let mut launcher = launcher(StartInfo::new("tool"), &spawner);
            launcher.start(CreationFlags::NONE).unwrap();
            launcher.teardown();
        }
        assert_eq!(spawner.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_failures_are_reported_not_raised() {
        let spawner = MockSpawner {
            fail_release: true,
            ..MockSpawner::default()
        };
        let mut launcher = launcher(StartInfo::new("tool"), &spawner);
        launcher.start(CreationFlags::NONE).unwrap();

        let report = launcher.teardown();
        let resources: Vec<_> = report.release_failures.iter().map(|f| f.resource).collect();
        assert_eq!(resources, ["process handle", "thread handle"]);
    }

    #[test]
    fn test_start_after_teardown_is_rejected() {
        let spawner = MockSpawner::default();
        let mut launcher = launcher(StartInfo::new("tool"), &spawner);
        launcher.teardown();

        assert!(matches!(
            launcher.start(CreationFlags::NONE),
            Err(LaunchError::AlreadyStarted)
        ));
        assert_eq!(spawner.spawn_count(), 0);
    }

    #[test]
    fn test_wait_requires_running_child() {
        let spawner = MockSpawner::default();
        let mut launcher = launcher(StartInfo::new("tool"), &spawner);
        assert!(matches!(launcher.wait(), Err(LaunchError::NotRunning)));

        launcher.start(CreationFlags::NONE).unwrap();
        assert_eq!(launcher.wait().unwrap(), Some(7));
    }
}
