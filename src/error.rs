//! Error types for toolbar-hammer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HammerError {
    #[error("Target application is not running")]
    TargetNotRunning,

    #[error("Target application not found in the accessibility tree")]
    ApplicationNotFound,

    #[error("Target application has no focused window")]
    WindowNotFound,

    #[error("Toolbar structure not found at level {level}")]
    ToolbarStructureNotFound { level: u8 },

    #[error("No toolbar buttons matched the expected size")]
    NoMatchingButtons,

    #[error("Cached element is no longer valid")]
    StaleHandle,

    #[error("A cache refresh is already in progress")]
    RefreshInProgress,

    #[error("Button index {index} out of range ({count} buttons cached)")]
    ButtonIndexOutOfRange { index: usize, count: usize },

    #[error("Element does not support action {0}")]
    ActionUnsupported(String),

    #[error("Failed to perform action {0}")]
    ActionFailed(String),

    #[error("Accessibility API error: {0}")]
    Accessibility(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not supported on this platform: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HammerError {
    /// Whether the error comes out of the refresh algorithm itself, so a
    /// background schedule may try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HammerError::ApplicationNotFound
                | HammerError::WindowNotFound
                | HammerError::ToolbarStructureNotFound { .. }
                | HammerError::NoMatchingButtons
                | HammerError::StaleHandle
        )
    }
}

pub type Result<T> = std::result::Result<T, HammerError>;
