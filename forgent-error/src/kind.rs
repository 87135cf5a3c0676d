//! Error kinds for forgent operations

use std::fmt;

/// The kind of error that occurred.
///
/// Callers match on ErrorKind to decide how to handle specific error cases,
/// e.g. the CLI exits on `PermissionDenied` at startup but only reports
/// `InferenceFailed` for a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // =========================================================================
    // General errors
    // =========================================================================
    /// An unexpected error occurred - catch-all for unhandled cases
    Unexpected,

    /// The requested feature or operation is not supported
    Unsupported,

    /// Invalid configuration or parameters
    ConfigInvalid,

    /// Invalid argument passed to function
    InvalidArgument,

    // =========================================================================
    // Network interface errors
    // =========================================================================
    /// No interface matches the requested index or name
    InterfaceNotFound,

    /// Enumerating interfaces failed
    InterfaceQueryFailed,

    // =========================================================================
    // Inference/LLM errors
    // =========================================================================
    /// LLM inference failed
    InferenceFailed,

    /// Provider not available
    ProviderUnavailable,

    /// Rate limit exceeded
    RateLimited,

    /// Provider rejected the credentials
    AuthenticationFailed,

    // =========================================================================
    // Code execution errors
    // =========================================================================
    /// The snippet ran but reported failure
    ExecutionFailed,

    /// The snippet did not finish in time
    ExecutionTimeout,

    /// The snippet imports a module that is not authorized
    ImportNotAuthorized,

    // =========================================================================
    // Session errors
    // =========================================================================
    /// No session with the given id
    SessionNotFound,

    /// Input channel closed (e.g. end of stdin)
    ChannelClosed,

    // =========================================================================
    // IO errors
    // =========================================================================
    /// File not found
    FileNotFound,

    /// Permission denied
    PermissionDenied,

    /// IO operation failed
    IoFailed,

    /// Network error
    NetworkFailed,

    // =========================================================================
    // Parse errors
    // =========================================================================
    /// Failed to parse input
    ParseFailed,

    /// Prompt template failed to render
    TemplateFailed,
}

impl ErrorKind {
    /// Returns the error kind as a static string
    pub fn as_str(&self) -> &'static str {
        match self {
            // General
            ErrorKind::Unexpected => "Unexpected",
            ErrorKind::Unsupported => "Unsupported",
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::InvalidArgument => "InvalidArgument",

            // Interfaces
            ErrorKind::InterfaceNotFound => "InterfaceNotFound",
            ErrorKind::InterfaceQueryFailed => "InterfaceQueryFailed",

            // Inference
            ErrorKind::InferenceFailed => "InferenceFailed",
            ErrorKind::ProviderUnavailable => "ProviderUnavailable",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::AuthenticationFailed => "AuthenticationFailed",

            // Execution
            ErrorKind::ExecutionFailed => "ExecutionFailed",
            ErrorKind::ExecutionTimeout => "ExecutionTimeout",
            ErrorKind::ImportNotAuthorized => "ImportNotAuthorized",

            // Session
            ErrorKind::SessionNotFound => "SessionNotFound",
            ErrorKind::ChannelClosed => "ChannelClosed",

            // IO
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::IoFailed => "IoFailed",
            ErrorKind::NetworkFailed => "NetworkFailed",

            // Parse
            ErrorKind::ParseFailed => "ParseFailed",
            ErrorKind::TemplateFailed => "TemplateFailed",
        }
    }

    /// Check if this error kind is retryable by default
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::InferenceFailed
                | ErrorKind::NetworkFailed
                | ErrorKind::RateLimited
                | ErrorKind::ExecutionTimeout
                | ErrorKind::ProviderUnavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
