//! Forgent core error types
//!
//! Re-exports forgent-error and provides core-specific conveniences.

pub use forgent_error::{Error, ErrorKind, ErrorStatus, Result};

use crate::provider::ProviderError;

// =============================================================================
// Core-specific error constructors
// =============================================================================

/// Create a ConfigInvalid error for a document that failed to parse
pub fn config_parse(path: impl Into<String>, reason: impl Into<String>) -> Error {
    let path = path.into();
    Error::config_invalid(format!("failed to parse {}: {}", path, reason.into()))
        .with_context("path", path)
}

/// Create a TemplateFailed error
pub fn template_failed(name: impl Into<String>, reason: impl Into<String>) -> Error {
    let name = name.into();
    Error::new(ErrorKind::TemplateFailed, reason).with_context("template", name)
}

/// Create an InterfaceQueryFailed error
pub fn interface_query_failed(reason: impl Into<String>) -> Error {
    Error::new(ErrorKind::InterfaceQueryFailed, reason)
}

/// Create a PermissionDenied error for the raw socket probe
pub fn raw_socket_denied(reason: impl Into<String>) -> Error {
    Error::new(ErrorKind::PermissionDenied, reason).with_operation("netif::probe_raw_socket")
}

/// Create an InvalidArgument error for an interface selection
pub fn invalid_selection(input: impl Into<String>) -> Error {
    let input = input.into();
    Error::invalid_argument(format!("invalid interface index '{}'", input))
        .with_context("input", input)
}

/// Create a ChannelClosed error
pub fn channel_closed(name: impl Into<String>) -> Error {
    let name = name.into();
    Error::new(ErrorKind::ChannelClosed, format!("channel '{}' closed", name))
        .with_context("channel", name)
}

/// Map a provider failure onto the unified error type
pub fn provider_error(provider: &str, err: ProviderError) -> Error {
    let kind = match &err {
        ProviderError::Network(_) => ErrorKind::NetworkFailed,
        ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
        ProviderError::AuthenticationFailed => ErrorKind::AuthenticationFailed,
        ProviderError::ModelNotFound(_) => ErrorKind::ConfigInvalid,
        ProviderError::Api { status, .. } if *status >= 500 => ErrorKind::ProviderUnavailable,
        _ => ErrorKind::InferenceFailed,
    };
    Error::new(kind, err.to_string()).with_context("provider", provider.to_string())
}
