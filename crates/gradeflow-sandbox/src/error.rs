//! Sandbox error types.

use thiserror::Error;

/// Result type alias for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Errors that can occur while provisioning or tearing down a sandbox.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to connect to Docker daemon: {0}")]
    Connect(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("container error: {0}")]
    Container(String),

    #[error("no container named {0} in this session")]
    UnknownContainer(String),

    #[error("duplicate container name {0} in this session")]
    DuplicateContainer(String),

    #[error("cleanup left resources behind: {0}")]
    Cleanup(String),

    #[error("docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
