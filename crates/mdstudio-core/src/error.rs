//! Error taxonomy shared by every MDStudio client component.

use thiserror::Error;

/// How a failure should be treated by retrying callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Programming error; never retried.
    Logic,
    /// The value is not available without waiting; retry asynchronously.
    Refreshing,
    /// The transport gave up waiting for a response.
    Timeout,
    /// The remote side rejected the call at application level.
    Application,
    /// The connection dropped or the call raised on the remote side.
    Transport,
    /// Anything else.
    Unclassified,
}

/// Errors raised by the client runtime.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Value was already settled")]
    AlreadySettled,
    #[error("Value was dropped before it was settled")]
    Abandoned,
    #[error("Blocking work may only be offloaded from the main scheduler")]
    NestedOffload,
    #[error("Claim {requested} is not allowed in a {context} context")]
    ClaimScope {
        context: &'static str,
        requested: String,
    },
    #[error("Cursor is refreshing, wait for it asynchronously")]
    CursorRefreshing,
    #[error("Remote call timed out: {0}")]
    Timeout(String),
    #[error("Remote application error {uri}: {message}")]
    Application { uri: String, message: String },
    #[error("Transport lost: {0}")]
    TransportLost(String),
    #[error("Remote call raised: {0}")]
    CallException(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Offloaded task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Failed(String),
}

impl Error {
    /// Build an unclassified failure from any displayable message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Classify this error for retry decisions.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::AlreadySettled | Self::Abandoned | Self::NestedOffload | Self::ClaimScope { .. } => {
                FailureKind::Logic
            }
            Self::CursorRefreshing => FailureKind::Refreshing,
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Application { .. } => FailureKind::Application,
            Self::TransportLost(_) | Self::CallException(_) => FailureKind::Transport,
            Self::MalformedResponse(_) | Self::Join(_) | Self::Json(_) | Self::Io(_) | Self::Failed(_) => {
                FailureKind::Unclassified
            }
        }
    }

    /// Whether this is a programming error rather than a runtime failure.
    #[must_use]
    pub const fn is_logic(&self) -> bool {
        matches!(self.kind(), FailureKind::Logic)
    }
}

/// Result alias for client runtime operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
