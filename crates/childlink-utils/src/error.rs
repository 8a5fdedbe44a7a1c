use std::fmt;

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    ProcessCreation,
    FileSystem,
    Pipe,
    Lifecycle,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::ProcessCreation => write!(f, "Process Creation"),
            Self::FileSystem => write!(f, "File System"),
            Self::Pipe => write!(f, "Pipe"),
            Self::Lifecycle => write!(f, "Lifecycle"),
        }
    }
}

/// Render an error as a user-facing report.
///
/// The format is:
///
/// ```text
/// Error: <user message>
///
/// Context: <context if available>
///
/// Suggestions:
///   • <suggestion 1>
///   • <suggestion 2>
/// ```
pub fn render_for_user<E: UserFriendlyError + ?Sized>(err: &E) -> String {
    let mut output = String::new();

    output.push_str(&format!("Error: {}\n", err.user_message()));

    if let Some(ctx) = err.context() {
        output.push_str(&format!("\nContext: {ctx}\n"));
    }

    let suggestions = err.suggestions();
    if !suggestions.is_empty() {
        output.push_str("\nSuggestions:\n");
        for suggestion in suggestions {
            output.push_str(&format!("  • {suggestion}\n"));
        }
    }

    output
}
