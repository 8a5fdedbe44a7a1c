//! Single-buffer command line construction
//!
//! Windows process creation takes the whole invocation as one mutable,
//! NUL-terminated UTF-16 buffer. Each argument is wrapped in double quotes and
//! followed by a space. Quotes inside an argument are NOT escaped, so such an
//! argument produces a command line the child will split differently.

use std::ffi::OsString;
use std::fmt;

/// A NUL-terminated UTF-16 command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    wide: Vec<u16>,
}

const QUOTE: u16 = b'"' as u16;
const SPACE: u16 = b' ' as u16;

impl CommandLine {
    /// The buffer including its terminating NUL.
    #[must_use]
    pub fn as_wide(&self) -> &[u16] {
        &self.wide
    }

    /// Copy of the buffer suitable for APIs that may write into it.
    #[must_use]
    pub fn to_wide_mut(&self) -> Vec<u16> {
        self.wide.clone()
    }

    /// Number of UTF-16 units before the terminating NUL.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wide.len() - 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text of the command line without the terminating NUL.
    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.wide[..self.len()])
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// Build the command line for `arguments`.
///
/// Returns `None` for an empty list: the platform then derives the invocation
/// from the executable path alone.
#[must_use]
pub fn build_command_line(arguments: &[OsString]) -> Option<CommandLine> {
    if arguments.is_empty() {
        return None;
    }

    let mut wide = Vec::new();
    for argument in arguments {
        wide.push(QUOTE);
        wide.extend(encode_wide(argument));
        wide.push(QUOTE);
        wide.push(SPACE);
    }
    wide.push(0);

    Some(CommandLine { wide })
}

#[cfg(windows)]
fn encode_wide(argument: &OsString) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    argument.encode_wide().collect()
}

#[cfg(not(windows))]
fn encode_wide(argument: &OsString) -> Vec<u16> {
    argument.to_string_lossy().encode_utf16().collect()
}
