//! Configuration for the shadow sync engine.

use shadow_protocol::{QoS, ShadowTopics, DEFAULT_ATTRIBUTES};
use std::time::Duration;

/// Configuration for shadow synchronization.
#[derive(Debug, Clone)]
pub struct ShadowConfig {
    /// Thing name (shadow document id).
    pub thing_name: String,
    /// Named shadow.
    pub shadow_name: String,
    /// Attributes tracked locally, all absent at startup.
    pub attributes: Vec<String>,
    /// QoS for shadow publishes and subscriptions.
    pub qos: QoS,
    /// Topic on which side-channel responses arrive.
    pub side_channel_topic: Option<String>,
    /// Default wait for a side-channel response (`None` waits forever).
    pub side_channel_timeout: Option<Duration>,
    /// Bound on waiting for disconnect at shutdown (`None` waits forever).
    pub shutdown_timeout: Option<Duration>,
}

impl ShadowConfig {
    /// Creates a new configuration for a thing and named shadow.
    pub fn new(thing_name: impl Into<String>, shadow_name: impl Into<String>) -> Self {
        Self {
            thing_name: thing_name.into(),
            shadow_name: shadow_name.into(),
            attributes: DEFAULT_ATTRIBUTES.iter().map(|s| s.to_string()).collect(),
            qos: QoS::AtLeastOnce,
            side_channel_topic: None,
            side_channel_timeout: None,
            shutdown_timeout: None,
        }
    }

    /// Sets the tracked attributes.
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the QoS.
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Routes messages on `topic` to the side channel.
    pub fn with_side_channel_topic(mut self, topic: impl Into<String>) -> Self {
        self.side_channel_topic = Some(topic.into());
        self
    }

    /// Sets the side-channel response timeout.
    pub fn with_side_channel_timeout(mut self, timeout: Duration) -> Self {
        self.side_channel_timeout = Some(timeout);
        self
    }

    /// Sets the shutdown disconnect timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Returns the topic scheme for this shadow.
    pub fn topics(&self) -> ShadowTopics {
        ShadowTopics::new(&self.thing_name, &self.shadow_name)
    }
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadow_protocol::TopicKind;

    #[test]
    fn shadow_config_builder() {
        let config = ShadowConfig::new("robonano-01", "daq_state")
            .with_attributes(["upload_enable"])
            .with_side_channel_topic("params/robonano-01")
            .with_shutdown_timeout(Duration::from_secs(10));

        assert_eq!(config.thing_name, "robonano-01");
        assert_eq!(config.attributes, vec!["upload_enable".to_string()]);
        assert_eq!(config.side_channel_topic.as_deref(), Some("params/robonano-01"));
        assert_eq!(config.shutdown_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.side_channel_timeout, None);
    }

    #[test]
    fn default_tracks_known_attributes() {
        let config = ShadowConfig::new("dev", "daq");
        assert_eq!(config.attributes.len(), 2);
        assert_eq!(config.qos, QoS::AtLeastOnce);
        assert_eq!(
            config.topics().topic(TopicKind::Get),
            "$aws/things/dev/shadow/name/daq/get"
        );
    }
}
