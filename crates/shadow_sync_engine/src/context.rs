//! Wiring of store, engine, lifecycle handler and dispatcher.

use crate::config::ShadowConfig;
use crate::dispatch::Dispatcher;
use crate::engine::ShadowSyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventRouter, InboundSink};
use crate::lifecycle::ConnectionLifecycle;
use crate::side_channel::SideChannel;
use crate::store::SharedStateStore;
use crate::transport::ShadowTransport;
use serde::Serialize;
use shadow_protocol::{state_from, AttributeValue, ClientToken, TopicKind, UPLOAD_ENABLE};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Everything one shadow session needs, passed around by reference.
///
/// The context owns the only strong [`InboundSink`] besides the ones handed
/// to the transport, so dropping it (see [`ShadowContext::shutdown`]) lets
/// the dispatcher finish once the transport lets go as well.
pub struct ShadowContext<T: ShadowTransport> {
    config: ShadowConfig,
    transport: Arc<T>,
    engine: Arc<ShadowSyncEngine<T>>,
    side_channel: Arc<SideChannel<T>>,
    inbound: InboundSink,
}

impl<T: ShadowTransport + 'static> ShadowContext<T> {
    /// Builds a context and the dispatcher that serves it.
    ///
    /// The dispatcher must be driven (usually `runtime.spawn(dispatcher.run())`)
    /// before any response can be handled.
    pub fn new(config: ShadowConfig, transport: Arc<T>, runtime: Handle) -> (Self, Dispatcher<T>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        let router = EventRouter::new(config.topics(), config.side_channel_topic.clone());
        let inbound = InboundSink::new(router, sender);

        let store = Arc::new(SharedStateStore::new(config.attributes.clone()));
        let engine = Arc::new(ShadowSyncEngine::new(
            config.clone(),
            store,
            Arc::clone(&transport),
            runtime.clone(),
        ));
        let side_channel = Arc::new(SideChannel::new(
            Arc::clone(&transport),
            runtime.clone(),
            config.qos,
            config.side_channel_timeout,
        ));
        let lifecycle = Arc::new(ConnectionLifecycle::new(
            Arc::clone(&transport),
            runtime,
            &inbound,
            Arc::clone(&side_channel),
        ));

        let dispatcher = Dispatcher::new(Arc::clone(&engine), lifecycle, receiver);
        let context = Self {
            config,
            transport,
            engine,
            side_channel,
            inbound,
        };
        (context, dispatcher)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Returns the engine.
    pub fn engine(&self) -> &Arc<ShadowSyncEngine<T>> {
        &self.engine
    }

    /// Returns the side channel.
    pub fn side_channel(&self) -> &Arc<SideChannel<T>> {
        &self.side_channel
    }

    /// Returns a sink for the transport to deliver inbound traffic into.
    pub fn inbound(&self) -> InboundSink {
        self.inbound.clone()
    }

    /// Subscribes to the shadow topics and requests the current document.
    ///
    /// Every subscription must be granted. Returns the token of the
    /// bootstrap get request.
    pub async fn start(&self) -> SyncResult<ClientToken> {
        let topics = self.config.topics();
        for kind in TopicKind::subscriptions() {
            self.subscribe(&topics.topic(kind)).await?;
        }
        if let Some(topic) = &self.config.side_channel_topic {
            self.subscribe(topic).await?;
        }

        info!("Requesting current shadow state...");
        self.engine.fetch().await
    }

    async fn subscribe(&self, topic: &str) -> SyncResult<()> {
        info!("Subscribing to {}", topic);
        match self.transport.subscribe(topic, self.config.qos).await? {
            Some(_) => Ok(()),
            None => Err(SyncError::SubscriptionRejected {
                topic: topic.to_string(),
            }),
        }
    }

    /// Publishes `payload` as JSON on `topic` without waiting for delivery.
    pub async fn publish_json<P: Serialize>(&self, topic: &str, payload: &P) -> SyncResult<()> {
        let body = serde_json::to_vec(payload).map_err(shadow_protocol::ProtocolError::from)?;
        self.transport.publish(topic, body, self.config.qos).await
    }

    /// Resets `upload_enable` to 0 and disconnects.
    ///
    /// The reset is best-effort: nothing waits for it to be accepted. The
    /// disconnect is bounded by the configured shutdown timeout.
    pub async fn shutdown(self) -> SyncResult<()> {
        info!("Resetting upload_enable before disconnecting");
        self.engine
            .local_change(&state_from([(UPLOAD_ENABLE, Some(AttributeValue::Integer(0)))]));

        let disconnect = self.transport.disconnect();
        let result = match self.config.shutdown_timeout {
            Some(limit) => bounded(limit, disconnect).await,
            None => disconnect.await,
        };
        match &result {
            Ok(()) => info!("Disconnected"),
            Err(e) => warn!("Disconnect did not complete: {}", e),
        }
        result
    }
}

async fn bounded<F>(limit: Duration, future: F) -> SyncResult<()>
where
    F: std::future::Future<Output = SyncResult<()>>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| SyncError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, TransportFuture};
    use shadow_protocol::{
        GetShadowRequest, QoS, UpdateShadowRequest, UpdateState, ADAPTERS_CONNECTED,
    };

    fn context(config: ShadowConfig) -> (ShadowContext<MockTransport>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let (context, _dispatcher) =
            ShadowContext::new(config, Arc::clone(&transport), Handle::current());
        (context, transport)
    }

    #[tokio::test]
    async fn start_subscribes_then_fetches() {
        let config = ShadowConfig::new("dev", "daq").with_side_channel_topic("params/dev");
        let (context, transport) = context(config);

        let token = context.start().await.unwrap();

        let subscriptions = transport.subscriptions();
        assert_eq!(subscriptions.len(), 6);
        assert_eq!(subscriptions[0], "$aws/things/dev/shadow/name/daq/update/accepted");
        assert_eq!(subscriptions[5], "params/dev");
        assert_eq!(transport.gets()[0].client_token, token);
        assert!(context.engine().store().lock().is_pending(&token));
    }

    #[tokio::test]
    async fn refused_subscription_aborts_start() {
        let (context, transport) = context(ShadowConfig::new("dev", "daq"));
        transport.refuse_topic("$aws/things/dev/shadow/name/daq/get/rejected");

        let result = context.start().await;

        assert!(matches!(result, Err(SyncError::SubscriptionRejected { .. })));
        assert!(transport.gets().is_empty());
    }

    #[tokio::test]
    async fn shutdown_resets_upload_and_disconnects() {
        let (context, transport) = context(ShadowConfig::new("dev", "daq"));
        context
            .engine()
            .local_change(&state_from([(UPLOAD_ENABLE, Some(AttributeValue::Integer(1)))]));

        context.shutdown().await.unwrap();

        let last = transport.last_update().unwrap();
        let expected = state_from([
            (ADAPTERS_CONNECTED, None),
            (UPLOAD_ENABLE, Some(AttributeValue::Integer(0))),
        ]);
        assert_eq!(last.state, UpdateState::mirror(expected));
        assert!(!transport.is_connected());
    }

    struct HangingTransport(MockTransport);

    impl ShadowTransport for HangingTransport {
        fn publish_update(&self, request: UpdateShadowRequest) -> TransportFuture<()> {
            self.0.publish_update(request)
        }

        fn publish_get(&self, request: GetShadowRequest) -> TransportFuture<()> {
            self.0.publish_get(request)
        }

        fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> TransportFuture<()> {
            self.0.publish(topic, payload, qos)
        }

        fn subscribe(&self, topic: &str, qos: QoS) -> TransportFuture<Option<QoS>> {
            self.0.subscribe(topic, qos)
        }

        fn resubscribe_existing(&self) -> TransportFuture<Vec<crate::SubscriptionGrant>> {
            self.0.resubscribe_existing()
        }

        fn disconnect(&self) -> TransportFuture<()> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn shutdown_gives_up_after_timeout() {
        let config = ShadowConfig::new("dev", "daq").with_shutdown_timeout(Duration::from_millis(20));
        let transport = Arc::new(HangingTransport(MockTransport::new()));
        let (context, _dispatcher) = ShadowContext::new(config, transport, Handle::current());

        let result = context.shutdown().await;
        assert!(matches!(result, Err(SyncError::Timeout)));
    }
}
