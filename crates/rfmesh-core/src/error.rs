//! Error types for the simulation library.
//!
//! Only programmer precondition violations surface as errors. RF and terrain
//! uncertainty is absorbed into approximate outputs (an unknown elevation is
//! a `None`, an unreachable link is `can_receive: false`), and protocol
//! outcomes such as hop-limit exhaustion or duplicate receipt are ordinary
//! routing decisions and counters, never `Err`.

use thiserror::Error;

/// Errors raised on invalid use of the simulation API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshSimError {
    /// A node with this id is already registered.
    #[error("node '{0}' is already registered")]
    DuplicateNode(String),

    /// Operation referenced a node id that is not registered.
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// `send` was called on a node with no routing strategy bound.
    #[error("node '{0}' has no routing strategy bound")]
    NoRoutingStrategy(String),

    /// A configuration value is outside its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MeshSimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MeshSimError::DuplicateNode("gw-01".into());
        assert!(err.to_string().contains("gw-01"));

        let err = MeshSimError::NoRoutingStrategy("n3".into());
        assert!(err.to_string().contains("routing strategy"));
    }
}
