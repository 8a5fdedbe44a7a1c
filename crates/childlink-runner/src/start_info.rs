use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

/// Description of the process to launch.
///
/// The argument list starts with the executable path itself, so it is what
/// the child sees as its program name. Further arguments are appended in order.
///
/// # Example
///
/// ```rust
/// use childlink_runner::StartInfo;
///
/// let info = StartInfo::new("/usr/bin/env")
///     .arg("FOO=1")
///     .arg("printenv")
///     .working_directory("/tmp")
///     .redirect_stdio(true);
///
/// assert_eq!(info.arguments().len(), 3);
/// assert!(info.redirects_stdio());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartInfo {
    path: PathBuf,
    arguments: Vec<OsString>,
    working_directory: Option<PathBuf>,
    enable_std_redirection: bool,
}

impl StartInfo {
    /// Describe a launch of `path` with no extra arguments.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let arguments = vec![path.clone().into_os_string()];
        Self {
            path,
            arguments,
            working_directory: None,
            enable_std_redirection: false,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.arguments.push(arg.into());
        self
    }

    /// Append several arguments in order.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }

    /// Replace the whole argument list, including the leading program name.
    ///
    /// An empty list lets the platform derive the invocation from the path alone.
    #[must_use]
    pub fn with_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.arguments = args.into_iter().map(Into::into).collect();
        self
    }

    /// Run the child in `dir` instead of the caller's working directory.
    #[must_use]
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Bridge the child's stdin and stdout through pipes.
    #[must_use]
    pub fn redirect_stdio(mut self, enabled: bool) -> Self {
        self.enable_std_redirection = enabled;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.arguments
    }

    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_directory.as_deref()
    }

    #[must_use]
    pub fn redirects_stdio(&self) -> bool {
        self.enable_std_redirection
    }
}

impl fmt::Display for StartInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Path: {}", self.path.display())?;
        write!(f, "Arguments:")?;
        for argument in &self.arguments {
            write!(f, " {}", OsStr::to_string_lossy(argument))?;
        }
        writeln!(f)?;
        if let Some(dir) = &self.working_directory {
            writeln!(f, "Working directory: {}", dir.display())?;
        }
        writeln!(f, "Redirect standard I/O: {}", self.enable_std_redirection)
    }
}
