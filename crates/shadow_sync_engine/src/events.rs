//! Typed inbound events and routing of raw transport messages.

use crate::error::{SyncError, SyncResult};
use crate::transport::SubscriptionGrant;
use shadow_protocol::{AcceptedResponse, DeltaEvent, ErrorResponse, ShadowTopics, TopicKind};
use tokio::sync::mpsc;

/// Broker answer to a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    /// Connection accepted.
    Accepted,
    /// Protocol version not supported.
    UnacceptableProtocolVersion,
    /// Client identifier refused.
    IdentifierRejected,
    /// Broker unavailable.
    ServerUnavailable,
    /// Credentials refused.
    BadUsernameOrPassword,
    /// Client not authorized.
    NotAuthorized,
}

/// One inbound event; every transport callback maps to exactly one variant.
#[derive(Debug)]
pub enum ShadowEvent {
    /// `update/delta`.
    Delta(DeltaEvent),
    /// `get/accepted`.
    GetAccepted(AcceptedResponse),
    /// `get/rejected`.
    GetRejected(ErrorResponse),
    /// `update/accepted`.
    UpdateAccepted(AcceptedResponse),
    /// `update/rejected`.
    UpdateRejected(ErrorResponse),
    /// Initial connection (or reconnection) succeeded.
    ConnectionSuccess {
        /// Broker return code.
        return_code: ConnectReturnCode,
        /// Whether the broker kept the previous session.
        session_present: bool,
    },
    /// A connection attempt failed.
    ConnectionFailure {
        /// Failure description.
        error: String,
    },
    /// The connection dropped; the transport will retry.
    Interrupted {
        /// Failure description.
        error: String,
    },
    /// The connection came back after an interruption.
    Resumed {
        /// Broker return code.
        return_code: ConnectReturnCode,
        /// Whether the broker kept the previous session.
        session_present: bool,
    },
    /// The connection was closed on request.
    Closed,
    /// Raw payload on the side-channel topic.
    SideChannel(Vec<u8>),
    /// Outcome of a resubscription started after a lost session.
    ResubscribeCompleted(SyncResult<Vec<SubscriptionGrant>>),
}

impl ShadowEvent {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ShadowEvent::Delta(_) => "update/delta",
            ShadowEvent::GetAccepted(_) => "get/accepted",
            ShadowEvent::GetRejected(_) => "get/rejected",
            ShadowEvent::UpdateAccepted(_) => "update/accepted",
            ShadowEvent::UpdateRejected(_) => "update/rejected",
            ShadowEvent::ConnectionSuccess { .. } => "connection-success",
            ShadowEvent::ConnectionFailure { .. } => "connection-failure",
            ShadowEvent::Interrupted { .. } => "interrupted",
            ShadowEvent::Resumed { .. } => "resumed",
            ShadowEvent::Closed => "closed",
            ShadowEvent::SideChannel(_) => "side-channel",
            ShadowEvent::ResubscribeCompleted(_) => "resubscribe-completed",
        }
    }
}

/// Sending half of the dispatch channel.
pub type EventSender = mpsc::UnboundedSender<ShadowEvent>;

/// Sending half that does not keep the dispatch channel open.
pub type WeakEventSender = mpsc::WeakUnboundedSender<ShadowEvent>;

/// Receiving half of the dispatch channel.
pub type EventReceiver = mpsc::UnboundedReceiver<ShadowEvent>;

/// Decodes raw `(topic, payload)` messages into [`ShadowEvent`]s.
#[derive(Debug, Clone)]
pub struct EventRouter {
    topics: ShadowTopics,
    side_channel_topic: Option<String>,
}

impl EventRouter {
    /// Creates a router for one shadow and an optional side-channel topic.
    pub fn new(topics: ShadowTopics, side_channel_topic: Option<String>) -> Self {
        Self {
            topics,
            side_channel_topic,
        }
    }

    /// Decodes a message; fails on unrouted topics and malformed payloads.
    pub fn route(&self, topic: &str, payload: &[u8]) -> SyncResult<ShadowEvent> {
        if self.side_channel_topic.as_deref() == Some(topic) {
            return Ok(ShadowEvent::SideChannel(payload.to_vec()));
        }

        let event = match self.topics.classify(topic) {
            Some(TopicKind::Delta) => ShadowEvent::Delta(DeltaEvent::decode(payload)?),
            Some(TopicKind::GetAccepted) => {
                ShadowEvent::GetAccepted(AcceptedResponse::decode(payload)?)
            }
            Some(TopicKind::GetRejected) => ShadowEvent::GetRejected(ErrorResponse::decode(payload)?),
            Some(TopicKind::UpdateAccepted) => {
                ShadowEvent::UpdateAccepted(AcceptedResponse::decode(payload)?)
            }
            Some(TopicKind::UpdateRejected) => {
                ShadowEvent::UpdateRejected(ErrorResponse::decode(payload)?)
            }
            Some(TopicKind::Update) | Some(TopicKind::Get) | None => {
                return Err(SyncError::UnknownTopic(topic.to_string()))
            }
        };
        Ok(event)
    }
}

/// Where a transport implementation delivers inbound traffic.
#[derive(Debug, Clone)]
pub struct InboundSink {
    router: EventRouter,
    sender: EventSender,
}

impl InboundSink {
    /// Creates a sink.
    pub fn new(router: EventRouter, sender: EventSender) -> Self {
        Self { router, sender }
    }

    /// Decodes and forwards a raw message.
    pub fn deliver(&self, topic: &str, payload: &[u8]) -> SyncResult<()> {
        let event = self.router.route(topic, payload)?;
        self.send(event)
    }

    /// Forwards an already-typed event (connection lifecycle, completions).
    pub fn send(&self, event: ShadowEvent) -> SyncResult<()> {
        self.sender.send(event).map_err(|_| SyncError::ChannelClosed)
    }

    /// Returns the router.
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Returns a handle that does not keep the channel open.
    pub fn downgrade(&self) -> WeakEventSender {
        self.sender.downgrade()
    }
}
