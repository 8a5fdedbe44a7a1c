pub mod error;
pub mod logging;

pub use error::{ErrorCategory, UserFriendlyError, render_for_user};
