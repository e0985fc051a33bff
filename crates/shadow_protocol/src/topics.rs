//! Topic scheme for a named device shadow.
//!
//! All shadow topics live under
//! `$aws/things/{thing}/shadow/name/{shadow}/`.

use serde::{Deserialize, Serialize};

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce,
    /// Delivered at least once; duplicates possible.
    AtLeastOnce,
}

impl QoS {
    /// Converts to the numeric level.
    pub fn to_code(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
        }
    }

    /// Converts from the numeric level.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            _ => None,
        }
    }
}

/// The kind of message carried on a shadow topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    /// Outbound update request.
    Update,
    /// Update was applied.
    UpdateAccepted,
    /// Update was refused.
    UpdateRejected,
    /// Outbound get request.
    Get,
    /// Current document.
    GetAccepted,
    /// Get was refused (e.g. no document).
    GetRejected,
    /// Unsolicited desired/reported difference.
    Delta,
}

impl TopicKind {
    /// Topic suffix after the shadow prefix.
    pub fn suffix(&self) -> &'static str {
        match self {
            TopicKind::Update => "update",
            TopicKind::UpdateAccepted => "update/accepted",
            TopicKind::UpdateRejected => "update/rejected",
            TopicKind::Get => "get",
            TopicKind::GetAccepted => "get/accepted",
            TopicKind::GetRejected => "get/rejected",
            TopicKind::Delta => "update/delta",
        }
    }

    /// The response topics a device must subscribe to.
    pub fn subscriptions() -> [TopicKind; 5] {
        [
            TopicKind::UpdateAccepted,
            TopicKind::UpdateRejected,
            TopicKind::GetAccepted,
            TopicKind::GetRejected,
            TopicKind::Delta,
        ]
    }
}

/// Derived topic names for one thing and one named shadow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTopics {
    thing_name: String,
    shadow_name: String,
    prefix: String,
}

impl ShadowTopics {
    /// Creates the topic scheme for a thing and shadow name.
    pub fn new(thing_name: impl Into<String>, shadow_name: impl Into<String>) -> Self {
        let thing_name = thing_name.into();
        let shadow_name = shadow_name.into();
        let prefix = format!("$aws/things/{thing_name}/shadow/name/{shadow_name}/");
        Self {
            thing_name,
            shadow_name,
            prefix,
        }
    }

    /// Returns the thing (document) name.
    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    /// Returns the shadow name.
    pub fn shadow_name(&self) -> &str {
        &self.shadow_name
    }

    /// Returns the full topic for a kind.
    pub fn topic(&self, kind: TopicKind) -> String {
        format!("{}{}", self.prefix, kind.suffix())
    }

    /// Classifies an inbound topic, if it belongs to this shadow.
    pub fn classify(&self, topic: &str) -> Option<TopicKind> {
        let suffix = topic.strip_prefix(&self.prefix)?;
        [
            TopicKind::Update,
            TopicKind::UpdateAccepted,
            TopicKind::UpdateRejected,
            TopicKind::Get,
            TopicKind::GetAccepted,
            TopicKind::GetRejected,
            TopicKind::Delta,
        ]
        .into_iter()
        .find(|kind| kind.suffix() == suffix)
    }
}
