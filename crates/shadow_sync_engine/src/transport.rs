//! Transport layer abstraction for shadow synchronization.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use shadow_protocol::{GetShadowRequest, QoS, UpdateShadowRequest};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

/// Completion of an asynchronous transport operation.
pub type TransportFuture<T> = Pin<Box<dyn Future<Output = SyncResult<T>> + Send + 'static>>;

/// Wraps an already-known result as a [`TransportFuture`].
pub fn ready<T: Send + 'static>(result: SyncResult<T>) -> TransportFuture<T> {
    Box::pin(std::future::ready(result))
}

/// Outcome of one (re)subscription; `qos` is `None` when the broker refused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionGrant {
    /// Topic filter.
    pub topic: String,
    /// Granted QoS.
    pub qos: Option<QoS>,
}

impl SubscriptionGrant {
    /// Creates a grant.
    pub fn new(topic: impl Into<String>, qos: Option<QoS>) -> Self {
        Self {
            topic: topic.into(),
            qos,
        }
    }
}

/// A shadow transport publishes requests and manages subscriptions.
///
/// Connection establishment, TLS and wire framing belong to the
/// implementation. Inbound messages are not returned from these calls: the
/// implementation feeds them to the dispatcher as
/// [`ShadowEvent`](crate::ShadowEvent)s.
///
/// Operations return futures so they can complete on the transport's own
/// event loop. Calling them must not block.
pub trait ShadowTransport: Send + Sync {
    /// Publishes an update request for a named shadow.
    fn publish_update(&self, request: UpdateShadowRequest) -> TransportFuture<()>;

    /// Publishes a get request for a named shadow.
    fn publish_get(&self, request: GetShadowRequest) -> TransportFuture<()>;

    /// Publishes a raw payload on an arbitrary topic.
    fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> TransportFuture<()>;

    /// Subscribes to a topic; resolves to the granted QoS.
    fn subscribe(&self, topic: &str, qos: QoS) -> TransportFuture<Option<QoS>>;

    /// Re-issues every subscription made so far on this connection.
    fn resubscribe_existing(&self) -> TransportFuture<Vec<SubscriptionGrant>>;

    /// Disconnects; resolves once the broker confirmed.
    fn disconnect(&self) -> TransportFuture<()>;
}

/// A recording transport for testing.
///
/// Every call is recorded synchronously before the returned future resolves,
/// so tests can inspect publishes without awaiting them.
#[derive(Debug, Default)]
pub struct MockTransport {
    updates: Mutex<Vec<UpdateShadowRequest>>,
    gets: Mutex<Vec<GetShadowRequest>>,
    raw: Mutex<Vec<(String, Vec<u8>)>>,
    subscriptions: Mutex<Vec<String>>,
    refused: Mutex<HashSet<String>>,
    fail_publish: AtomicBool,
    connected: AtomicBool,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Makes every publish fail.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Makes the broker refuse `topic` on (re)subscription.
    pub fn refuse_topic(&self, topic: impl Into<String>) {
        self.refused.lock().insert(topic.into());
    }

    /// Returns the recorded update requests.
    pub fn updates(&self) -> Vec<UpdateShadowRequest> {
        self.updates.lock().clone()
    }

    /// Returns the most recent update request.
    pub fn last_update(&self) -> Option<UpdateShadowRequest> {
        self.updates.lock().last().cloned()
    }

    /// Returns the recorded get requests.
    pub fn gets(&self) -> Vec<GetShadowRequest> {
        self.gets.lock().clone()
    }

    /// Returns the recorded raw publishes.
    pub fn raw_publishes(&self) -> Vec<(String, Vec<u8>)> {
        self.raw.lock().clone()
    }

    /// Returns the subscribed topics.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    /// Returns true until `disconnect` is called.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish_result(&self) -> SyncResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            Err(SyncError::transport("mock publish failure"))
        } else {
            Ok(())
        }
    }

    fn grant(&self, topic: &str) -> Option<QoS> {
        if self.refused.lock().contains(topic) {
            None
        } else {
            Some(QoS::AtLeastOnce)
        }
    }
}

impl ShadowTransport for MockTransport {
    fn publish_update(&self, request: UpdateShadowRequest) -> TransportFuture<()> {
        self.updates.lock().push(request);
        ready(self.publish_result())
    }

    fn publish_get(&self, request: GetShadowRequest) -> TransportFuture<()> {
        self.gets.lock().push(request);
        ready(self.publish_result())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>, _qos: QoS) -> TransportFuture<()> {
        self.raw.lock().push((topic.to_string(), payload));
        ready(self.publish_result())
    }

    fn subscribe(&self, topic: &str, _qos: QoS) -> TransportFuture<Option<QoS>> {
        self.subscriptions.lock().push(topic.to_string());
        ready(Ok(self.grant(topic)))
    }

    fn resubscribe_existing(&self) -> TransportFuture<Vec<SubscriptionGrant>> {
        let grants = self
            .subscriptions
            .lock()
            .iter()
            .map(|topic| SubscriptionGrant::new(topic.clone(), self.grant(topic)))
            .collect();
        ready(Ok(grants))
    }

    fn disconnect(&self) -> TransportFuture<()> {
        self.connected.store(false, Ordering::SeqCst);
        ready(Ok(()))
    }
}
