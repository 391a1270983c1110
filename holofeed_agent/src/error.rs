//! Error types for configuration, listener setup and event delivery.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing value for {0}")]
    MissingValue(String),
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("unknown argument {0:?} (try --help)")]
    UnknownArgument(String),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Fatal errors raised by [`crate::server::Server::start`].
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to read listener address: {0}")]
    LocalAddr(#[source] io::Error),
}

impl ServerError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ServerError::Bind { source, .. } if source.kind() == io::ErrorKind::PermissionDenied)
    }
}

/// Why a payload did not reach a subscriber.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("subscriber stream has ended")]
    Disconnected,
    #[error("subscriber queue still full after {0:?}")]
    TimedOut(Duration),
}
