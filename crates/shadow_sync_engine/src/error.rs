//! Error types for the shadow sync engine.

use shadow_protocol::{ClientToken, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing the shadow.
///
/// Handlers return these instead of logging in place; the dispatcher decides
/// what is fatal with [`SyncError::is_fatal`].
#[derive(Error, Debug)]
pub enum SyncError {
    /// Response carried a token this session did not issue (or already consumed).
    #[error("ignoring {event} with unexpected token {token:?}")]
    StaleCorrelation {
        /// Event kind.
        event: &'static str,
        /// Token found in the event.
        token: Option<ClientToken>,
    },

    /// The service refused a request for a reason other than a missing document.
    #[error("{operation} request was rejected. code:{code} message:'{message}'")]
    Rejected {
        /// `get` or `update`.
        operation: &'static str,
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },

    /// A publish could not be handed to the transport.
    #[error("failed to publish {operation} request: {message}")]
    PublishFailure {
        /// `get` or `update`.
        operation: &'static str,
        /// Error message.
        message: String,
    },

    /// A subscription was not granted at startup.
    #[error("server rejected subscription to topic: {topic}")]
    SubscriptionRejected {
        /// Topic name.
        topic: String,
    },

    /// A subscription was not granted after the session was lost.
    #[error("server rejected resubscribe to topic: {topic}")]
    ResubscriptionRejected {
        /// Topic name.
        topic: String,
    },

    /// Resubscription could not be completed at all.
    #[error("resubscribe failed: {0}")]
    ResubscriptionFailed(String),

    /// Transport or network error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Inbound payload could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Inbound message on a topic nobody routes.
    #[error("message on unrouted topic: {0}")]
    UnknownTopic(String),

    /// A side-channel request is already waiting for its response.
    #[error("a side-channel request is already outstanding")]
    SideChannelBusy,

    /// No side-channel response arrived in time.
    #[error("side-channel response timed out")]
    SideChannelTimeout,

    /// The dispatch channel was closed.
    #[error("event channel closed")]
    ChannelClosed,

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a stale-correlation error.
    pub fn stale(event: &'static str, token: Option<ClientToken>) -> Self {
        Self::StaleCorrelation { event, token }
    }

    /// Returns true if the process must stop after this error.
    ///
    /// Only subscription failures and a closed event channel are fatal;
    /// everything else is logged and dispatch continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::SubscriptionRejected { .. }
                | SyncError::ResubscriptionRejected { .. }
                | SyncError::ResubscriptionFailed(_)
                | SyncError::ChannelClosed
        )
    }

    /// Returns true for responses that simply belong to someone else.
    pub fn is_stale(&self) -> bool {
        matches!(self, SyncError::StaleCorrelation { .. })
    }
}
