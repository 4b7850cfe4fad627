#![forbid(unsafe_code)]

//! Error type shared by the tree, the platform observers and the controllers.

use thiserror::Error;

use crate::tree::NodeId;

pub type Result<T> = std::result::Result<T, ObserverError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserverError {
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("node {0} is not an element")]
    NotAnElement(NodeId),

    #[error("node {0} is not a text node")]
    NotText(NodeId),

    #[error("cannot insert {child} into {parent}: {reason}")]
    Hierarchy {
        parent: NodeId,
        child: NodeId,
        reason: &'static str,
    },

    #[error("invalid {kind} options: {reason}")]
    InvalidOptions { kind: &'static str, reason: String },

    #[error("{kind} observer failed for {target}: {reason}")]
    Platform {
        kind: &'static str,
        target: NodeId,
        reason: String,
    },
}

impl ObserverError {
    #[must_use]
    pub fn invalid_options(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOptions {
            kind,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn platform(kind: &'static str, target: NodeId, reason: impl Into<String>) -> Self {
        Self::Platform {
            kind,
            target,
            reason: reason.into(),
        }
    }

    /// Whether the error stems from caller-supplied configuration rather
    /// than from the platform.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownNode(_) | Self::InvalidOptions { .. } | Self::NotAnElement(_)
        )
    }
}
