use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Profile invalid: {0}")]
    ProfileInvalid(String),

    #[error("Window not found: {0}")]
    WindowNotFound(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Interaction failed: {0}")]
    InteractionFailed(String),

    #[error("Extraction incomplete: {0}")]
    ExtractionIncomplete(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Platform-side error: {0}")]
    PlatformError(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
