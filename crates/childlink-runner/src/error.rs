//! Error types for launching a child process

use childlink_utils::error::{ErrorCategory, UserFriendlyError, render_for_user};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Prefix of the diagnostic raised when the executable does not exist.
///
/// Tooling parses this text; it must not change.
pub const CANNOT_FIND_PATH_MESSAGE: &str = "Cannot find path: ";

/// First line of the diagnostic raised when the executable exists but could not be run.
///
/// Tooling parses this text; it must not change.
pub const CHECK_IF_VALID_EXECUTABLE_MESSAGE: &str =
    "Cannot run process, check if it is a valid executable:";

/// Caveat added when the launcher is built with 32-bit pointers.
pub const NARROW_WORD_SIZE_CAVEAT: &str = "*** This version support only 32 bits executable ***.";

/// Step of stdio pipe setup that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeStage {
    CreateStdinPipe,
    ClearStdinInheritance,
    CreateStdoutPipe,
    ClearStdoutInheritance,
}

impl fmt::Display for PipeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateStdinPipe => write!(f, "create stdin pipe"),
            Self::ClearStdinInheritance => {
                write!(f, "clear inheritance on the stdin pipe write end")
            }
            Self::CreateStdoutPipe => write!(f, "create stdout pipe"),
            Self::ClearStdoutInheritance => {
                write!(f, "clear inheritance on the stdout pipe read end")
            }
        }
    }
}

/// Errors raised by [`Launcher::start`](crate::Launcher::start) and [`Launcher::wait`](crate::Launcher::wait)
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Process already started")]
    AlreadyStarted,

    #[error("{}{}", CANNOT_FIND_PATH_MESSAGE, .path.display())]
    PathNotFound { path: PathBuf },

    #[error("{}", render_creation_failure(.start_info, .os_error, .narrow_word_size))]
    ProcessCreationFailed {
        /// Rendering of the [`StartInfo`](crate::StartInfo) that failed
        start_info: String,
        /// OS description of the failure
        os_error: String,
        /// Set when the launcher itself is a 32-bit build
        narrow_word_size: bool,
    },

    #[error("Failed to {stage}: {source}")]
    PipeSetupFailed {
        stage: PipeStage,
        #[source]
        source: io::Error,
    },

    #[error("Failed to start {name} forwarder: {source}")]
    Forwarder {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Process is not running")]
    NotRunning,

    #[error("Failed to wait for process: {source}")]
    Wait {
        #[source]
        source: io::Error,
    },
}

fn render_creation_failure(start_info: &str, os_error: &str, narrow_word_size: &bool) -> String {
    let mut message = String::new();
    message.push_str(CHECK_IF_VALID_EXECUTABLE_MESSAGE);
    message.push('\n');
    if *narrow_word_size {
        message.push('\n');
        message.push_str(NARROW_WORD_SIZE_CAVEAT);
        message.push_str("\n\n");
    }
    message.push_str(start_info);
    message.push_str(os_error);
    message
}

impl LaunchError {
    /// Build the error for a failed process creation.
    ///
    /// `path_exists` decides between [`LaunchError::PathNotFound`] and
    /// [`LaunchError::ProcessCreationFailed`].
    pub(crate) fn creation_failure(
        path: PathBuf,
        path_exists: bool,
        start_info: String,
        source: &io::Error,
    ) -> Self {
        if path_exists {
            Self::ProcessCreationFailed {
                start_info,
                os_error: source.to_string(),
                narrow_word_size: cfg!(target_pointer_width = "32"),
            }
        } else {
            Self::PathNotFound { path }
        }
    }

    /// Error message with context and suggestions for end users
    #[must_use]
    pub fn display_for_user(&self) -> String {
        render_for_user(self)
    }
}

impl UserFriendlyError for LaunchError {
    fn user_message(&self) -> String {
        match self {
            Self::AlreadyStarted => "The process has already been started".to_string(),
            Self::PathNotFound { path } => {
                format!("The executable {} does not exist", path.display())
            }
            Self::ProcessCreationFailed { os_error, .. } => {
                format!("The operating system refused to start the process: {os_error}")
            }
            Self::PipeSetupFailed { stage, source } => {
                format!("Could not {stage}: {source}")
            }
            Self::Forwarder { name, source } => {
                format!("Could not start the {name} forwarding thread: {source}")
            }
            Self::NotRunning => "No process is running".to_string(),
            Self::Wait { source } => format!("Could not wait for the process: {source}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::AlreadyStarted => {
                Some("A launcher starts exactly one child process.".to_string())
            }
            Self::PathNotFound { .. } | Self::ProcessCreationFailed { .. } => {
                Some("The executable path is used as given, relative paths resolve against the current directory.".to_string())
            }
            Self::PipeSetupFailed { .. } | Self::Forwarder { .. } => Some(
                "Standard I/O redirection bridges the child's stdin and stdout through anonymous pipes."
                    .to_string(),
            ),
            Self::NotRunning | Self::Wait { .. } => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::AlreadyStarted => {
                vec!["Create a new launcher for each process you need to start".to_string()]
            }
            Self::PathNotFound { .. } => vec![
                "Check the spelling of the executable path".to_string(),
                "Use an absolute path if the working directory differs".to_string(),
            ],
            Self::ProcessCreationFailed { narrow_word_size, .. } => {
                let mut suggestions = vec![
                    "Check that the file is an executable for this platform".to_string(),
                    "Check the file's execute permission".to_string(),
                ];
                if *narrow_word_size {
                    suggestions.push("Use a 64-bit build to launch 64-bit executables".to_string());
                }
                suggestions
            }
            Self::PipeSetupFailed { .. } | Self::Forwarder { .. } => vec![
                "Check the process's open handle limit".to_string(),
                "Retry without standard I/O redirection".to_string(),
            ],
            Self::NotRunning => vec!["Call start() before waiting".to_string()],
            Self::Wait { .. } => Vec::new(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::AlreadyStarted | Self::NotRunning | Self::Wait { .. } => ErrorCategory::Lifecycle,
            Self::PathNotFound { .. } => ErrorCategory::FileSystem,
            Self::ProcessCreationFailed { .. } => ErrorCategory::ProcessCreation,
            Self::PipeSetupFailed { .. } | Self::Forwarder { .. } => ErrorCategory::Pipe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_not_found_message_prefix() {
        let err = LaunchError::PathNotFound {
            path: PathBuf::from("/no/such/tool"),
        };
        assert_eq!(err.to_string(), "Cannot find path: /no/such/tool");
    }

    #[test]
    fn test_creation_failure_message_layout() {
        let err = LaunchError::ProcessCreationFailed {
            start_info: "Path: tool\n".to_string(),
            os_error: "Permission denied (os error 13)".to_string(),
            narrow_word_size: false,
        };
        assert_eq!(
            err.to_string(),
            "Cannot run process, check if it is a valid executable:\nPath: tool\nPermission denied (os error 13)"
        );
    }

    #[test]
    fn test_creation_failure_with_word_size_caveat() {
        let err = LaunchError::ProcessCreationFailed {
            start_info: "Path: tool\n".to_string(),
            os_error: "bad format".to_string(),
            narrow_word_size: true,
        };
        let message = err.to_string();
        assert!(message.starts_with(CHECK_IF_VALID_EXECUTABLE_MESSAGE));
        assert!(message.contains("*** This version support only 32 bits executable ***."));
        assert!(message.ends_with("Path: tool\nbad format"));
        assert_eq!(err.suggestions().len(), 3);
    }

    #[test]
    fn test_creation_failure_picks_variant_from_existence() {
        let os_error = io::Error::from(io::ErrorKind::PermissionDenied);

        let missing = LaunchError::creation_failure(
            PathBuf::from("missing"),
            false,
            String::new(),
            &os_error,
        );
        assert!(matches!(missing, LaunchError::PathNotFound { .. }));

        let present =
            LaunchError::creation_failure(PathBuf::from("present"), true, String::new(), &os_error);
        match present {
            LaunchError::ProcessCreationFailed { os_error, .. } => {
                assert!(!os_error.is_empty());
            }
            other => panic!("Expected ProcessCreationFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_pipe_setup_names_stage() {
        let err = LaunchError::PipeSetupFailed {
            stage: PipeStage::ClearStdoutInheritance,
            source: io::Error::other("boom"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to clear inheritance on the stdout pipe read end: boom"
        );
        assert_eq!(err.category(), ErrorCategory::Pipe);
    }

    #[test]
    fn test_display_for_user_sections() {
        let report = LaunchError::AlreadyStarted.display_for_user();
        assert!(report.starts_with("Error: The process has already been started\n"));
        assert!(report.contains("Context:"));
        assert!(report.contains("Suggestions:"));
    }
}
