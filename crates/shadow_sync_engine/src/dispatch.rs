//! The dispatch context.
//!
//! Every inbound event is handled here, one at a time, in arrival order.
//! Handlers never block; publishes they start are spawned and complete on
//! their own.

use crate::engine::ShadowSyncEngine;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventReceiver, ShadowEvent};
use crate::lifecycle::ConnectionLifecycle;
use crate::transport::ShadowTransport;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drains the event channel and routes each event to its handler.
pub struct Dispatcher<T: ShadowTransport> {
    engine: Arc<ShadowSyncEngine<T>>,
    lifecycle: Arc<ConnectionLifecycle<T>>,
    events: EventReceiver,
}

impl<T: ShadowTransport + 'static> Dispatcher<T> {
    /// Creates a dispatcher over `events`.
    pub fn new(
        engine: Arc<ShadowSyncEngine<T>>,
        lifecycle: Arc<ConnectionLifecycle<T>>,
        events: EventReceiver,
    ) -> Self {
        Self {
            engine,
            lifecycle,
            events,
        }
    }

    /// Runs until every sender is gone or a fatal error occurs.
    ///
    /// A fatal error is returned; everything else is logged and dispatch
    /// continues with the next event.
    pub async fn run(mut self) -> SyncResult<()> {
        while let Some(event) = self.events.recv().await {
            let kind = event.kind();
            if let Err(err) = self.dispatch(event) {
                if err.is_fatal() {
                    error!("Stopping dispatch after {}: {}", kind, err);
                    return Err(err);
                }
                report(kind, &err);
            }
        }
        debug!("Event channel closed, dispatcher exiting");
        Ok(())
    }

    /// Handles one event.
    pub fn dispatch(&self, event: ShadowEvent) -> SyncResult<()> {
        match event {
            ShadowEvent::Delta(delta) => self.engine.on_delta(&delta),
            ShadowEvent::GetAccepted(response) => self.engine.on_get_accepted(&response),
            ShadowEvent::GetRejected(error) => self.engine.on_get_rejected(&error),
            ShadowEvent::UpdateAccepted(response) => self.engine.on_update_accepted(&response),
            ShadowEvent::UpdateRejected(error) => self.engine.on_update_rejected(&error),
            ShadowEvent::ConnectionSuccess {
                return_code,
                session_present,
            } => {
                self.lifecycle
                    .on_connection_success(return_code, session_present);
                Ok(())
            }
            ShadowEvent::ConnectionFailure { error } => {
                self.lifecycle.on_connection_failure(&error);
                Ok(())
            }
            ShadowEvent::Interrupted { error } => {
                self.lifecycle.on_interrupted(&error);
                Ok(())
            }
            ShadowEvent::Resumed {
                return_code,
                session_present,
            } => self.lifecycle.on_resumed(return_code, session_present),
            ShadowEvent::Closed => {
                self.lifecycle.on_connection_closed();
                Ok(())
            }
            ShadowEvent::SideChannel(payload) => self.lifecycle.on_side_channel_message(&payload),
            ShadowEvent::ResubscribeCompleted(outcome) => {
                self.lifecycle.on_resubscribe_completed(outcome)
            }
        }
    }
}

fn report(kind: &str, err: &SyncError) {
    match err {
        SyncError::StaleCorrelation { .. } => info!("{}", err),
        SyncError::Rejected { .. } | SyncError::PublishFailure { .. } => error!("{}", err),
        _ => warn!("Failed to handle {}: {}", kind, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShadowConfig;
    use crate::events::{ConnectReturnCode, EventRouter, InboundSink};
    use crate::side_channel::SideChannel;
    use crate::store::SharedStateStore;
    use crate::transport::MockTransport;
    use shadow_protocol::{ClientToken, ErrorResponse, QoS, ShadowTopics, TopicKind};
    use tokio::runtime::Handle;
    use tokio::sync::mpsc;

    fn setup() -> (Dispatcher<MockTransport>, InboundSink, Arc<MockTransport>) {
        let config = ShadowConfig::new("dev", "daq");
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(SharedStateStore::new(config.attributes.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = InboundSink::new(EventRouter::new(config.topics(), None), tx);
        let engine = Arc::new(ShadowSyncEngine::new(
            config,
            store,
            Arc::clone(&transport),
            Handle::current(),
        ));
        let side_channel = Arc::new(SideChannel::new(
            Arc::clone(&transport),
            Handle::current(),
            QoS::AtLeastOnce,
            None,
        ));
        let lifecycle = Arc::new(ConnectionLifecycle::new(
            Arc::clone(&transport),
            Handle::current(),
            &sink,
            side_channel,
        ));
        (Dispatcher::new(engine, lifecycle, rx), sink, transport)
    }

    #[tokio::test]
    async fn recoverable_errors_do_not_stop_dispatch() {
        let (dispatcher, sink, transport) = setup();
        let topics = ShadowTopics::new("dev", "daq");

        sink.send(ShadowEvent::UpdateRejected(ErrorResponse::new(
            400,
            "Bad",
            Some(ClientToken::new("unknown")),
        )))
        .unwrap();
        sink.deliver(
            &topics.topic(TopicKind::Delta),
            br#"{"state": {"upload_enable": 1}, "version": 3}"#,
        )
        .unwrap();
        drop(sink);

        dispatcher.run().await.unwrap();
        assert_eq!(transport.updates().len(), 1);
    }

    #[tokio::test]
    async fn lost_session_with_refused_topic_is_fatal() {
        let (dispatcher, sink, transport) = setup();
        transport.subscribe("a", QoS::AtLeastOnce).await.unwrap();
        transport.refuse_topic("a");

        sink.send(ShadowEvent::Interrupted {
            error: "keepalive timeout".into(),
        })
        .unwrap();
        sink.send(ShadowEvent::Resumed {
            return_code: ConnectReturnCode::Accepted,
            session_present: false,
        })
        .unwrap();

        let result = dispatcher.run().await;
        assert!(matches!(result, Err(SyncError::ResubscriptionRejected { .. })));
    }

    #[tokio::test]
    async fn resumed_session_keeps_running() {
        let (dispatcher, sink, _transport) = setup();

        sink.send(ShadowEvent::Resumed {
            return_code: ConnectReturnCode::Accepted,
            session_present: true,
        })
        .unwrap();
        sink.send(ShadowEvent::Closed).unwrap();
        drop(sink);

        dispatcher.run().await.unwrap();
    }
}
