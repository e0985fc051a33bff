//! Connection lifecycle handling.

use crate::error::{SyncError, SyncResult};
use crate::events::{ConnectReturnCode, InboundSink, ShadowEvent, WeakEventSender};
use crate::side_channel::SideChannel;
use crate::transport::{ShadowTransport, SubscriptionGrant};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Reacts to connect, interrupt, resume and close events.
///
/// The cache is never touched here: after an interruption the last known
/// values stay valid.
pub struct ConnectionLifecycle<T: ShadowTransport> {
    transport: Arc<T>,
    runtime: Handle,
    events: WeakEventSender,
    side_channel: Arc<SideChannel<T>>,
}

impl<T: ShadowTransport + 'static> ConnectionLifecycle<T> {
    /// Creates a lifecycle handler.
    ///
    /// Only a weak handle to `inbound` is kept, so the handler never keeps
    /// its own dispatcher alive.
    pub fn new(
        transport: Arc<T>,
        runtime: Handle,
        inbound: &InboundSink,
        side_channel: Arc<SideChannel<T>>,
    ) -> Self {
        Self {
            transport,
            runtime,
            events: inbound.downgrade(),
            side_channel,
        }
    }

    /// Connection established.
    pub fn on_connection_success(&self, return_code: ConnectReturnCode, session_present: bool) {
        info!(
            "Connection Successful with return code: {:?} session present: {}",
            return_code, session_present
        );
    }

    /// Connection attempt failed.
    pub fn on_connection_failure(&self, error: &str) {
        warn!("Connection failed with error code: {}", error);
    }

    /// Connection closed on request.
    pub fn on_connection_closed(&self) {
        info!("Connection closed");
    }

    /// Connection dropped.
    pub fn on_interrupted(&self, error: &str) {
        warn!("Connection interrupted. Error: {}", error);
    }

    /// Connection restored.
    ///
    /// When the broker dropped the session, every subscription is re-issued.
    /// This runs on the dispatch context, so the outcome comes back later as
    /// a [`ShadowEvent::ResubscribeCompleted`] instead of being awaited here.
    pub fn on_resumed(&self, return_code: ConnectReturnCode, session_present: bool) -> SyncResult<()> {
        info!(
            "Connection resumed. return_code: {:?} session_present: {}",
            return_code, session_present
        );

        if return_code != ConnectReturnCode::Accepted || session_present {
            return Ok(());
        }

        info!("Session did not persist. Resubscribing to existing topics...");
        let resubscribe = self.transport.resubscribe_existing();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let outcome = resubscribe.await;
            let delivered = events
                .upgrade()
                .map(|sender| sender.send(ShadowEvent::ResubscribeCompleted(outcome)).is_ok())
                .unwrap_or(false);
            if !delivered {
                warn!("Resubscribe finished after the dispatcher stopped");
            }
        });
        Ok(())
    }

    /// Checks the resubscription outcome; any refused topic is fatal.
    pub fn on_resubscribe_completed(
        &self,
        outcome: SyncResult<Vec<SubscriptionGrant>>,
    ) -> SyncResult<()> {
        let grants = outcome.map_err(|e| SyncError::ResubscriptionFailed(e.to_string()))?;
        if let Some(refused) = grants.iter().find(|grant| grant.qos.is_none()) {
            return Err(SyncError::ResubscriptionRejected {
                topic: refused.topic.clone(),
            });
        }
        info!("Resubscribed to {} topics", grants.len());
        Ok(())
    }

    /// Hands a side-channel message to the waiting request.
    pub fn on_side_channel_message(&self, payload: &[u8]) -> SyncResult<()> {
        self.side_channel.deliver(payload)
    }
}
