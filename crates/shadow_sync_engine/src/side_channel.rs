//! Single-slot request/response exchange outside the shadow protocol.
//!
//! A caller publishes a request and blocks until the matching message
//! arrives on the response topic. Only one request may be outstanding at a
//! time; responses are not correlated, the next message simply wakes the
//! waiter.
//!
//! Waiting blocks the calling thread. Never call [`SideChannel::request`]
//! from the dispatch context or from inside an async task.

use crate::error::{SyncError, SyncResult};
use crate::transport::ShadowTransport;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use shadow_protocol::{ProtocolError, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::debug;

#[derive(Debug, Default)]
struct Slot {
    waiting: bool,
    response: Option<SyncResult<serde_json::Value>>,
}

#[derive(Debug, Default)]
struct Rendezvous {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Rendezvous {
    fn fill(&self, response: SyncResult<serde_json::Value>) -> bool {
        let mut slot = self.slot.lock();
        if !slot.waiting {
            return false;
        }
        slot.response = Some(response);
        self.ready.notify_one();
        true
    }
}

/// Side-channel rendezvous bound to a transport.
pub struct SideChannel<T: ShadowTransport> {
    transport: Arc<T>,
    runtime: Handle,
    qos: QoS,
    default_timeout: Option<Duration>,
    rendezvous: Arc<Rendezvous>,
}

impl<T: ShadowTransport + 'static> SideChannel<T> {
    /// Creates a side channel.
    pub fn new(
        transport: Arc<T>,
        runtime: Handle,
        qos: QoS,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            runtime,
            qos,
            default_timeout,
            rendezvous: Arc::new(Rendezvous::default()),
        }
    }

    /// Returns true while a request waits for its response.
    pub fn is_waiting(&self) -> bool {
        self.rendezvous.slot.lock().waiting
    }

    /// Publishes `payload` on `topic` and blocks until a response arrives.
    ///
    /// `timeout` overrides the configured default; with neither set the call
    /// waits forever.
    pub fn request<P: Serialize>(
        &self,
        topic: &str,
        payload: &P,
        timeout: Option<Duration>,
    ) -> SyncResult<serde_json::Value> {
        let body = serde_json::to_vec(payload).map_err(ProtocolError::from)?;

        {
            let mut slot = self.rendezvous.slot.lock();
            if slot.waiting {
                return Err(SyncError::SideChannelBusy);
            }
            slot.waiting = true;
            slot.response = None;
        }

        let publish = self.transport.publish(topic, body, self.qos);
        let rendezvous = Arc::clone(&self.rendezvous);
        self.runtime.spawn(async move {
            if let Err(e) = publish.await {
                rendezvous.fill(Err(SyncError::PublishFailure {
                    operation: "side-channel",
                    message: e.to_string(),
                }));
            }
        });

        let deadline = timeout.or(self.default_timeout).map(|t| Instant::now() + t);
        let mut slot = self.rendezvous.slot.lock();
        while slot.response.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.rendezvous.ready.wait_until(&mut slot, deadline).timed_out() {
                        break;
                    }
                }
                None => self.rendezvous.ready.wait(&mut slot),
            }
        }
        slot.waiting = false;
        slot.response.take().unwrap_or(Err(SyncError::SideChannelTimeout))
    }

    /// Decodes an inbound message and wakes the waiting request.
    ///
    /// A message with nobody waiting is dropped.
    pub fn deliver(&self, payload: &[u8]) -> SyncResult<()> {
        let value: serde_json::Value =
            serde_json::from_slice(payload).map_err(ProtocolError::from)?;
        if !self.rendezvous.fill(Ok(value)) {
            debug!("Dropping side-channel message, no request is waiting");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, SubscriptionGrant, TransportFuture};
    use serde_json::json;
    use shadow_protocol::{GetShadowRequest, UpdateShadowRequest};
    use std::sync::mpsc;
    use std::thread;

    fn channel<T: ShadowTransport + 'static>(transport: Arc<T>) -> Arc<SideChannel<T>> {
        Arc::new(SideChannel::new(
            transport,
            Handle::current(),
            QoS::AtLeastOnce,
            None,
        ))
    }

    /// Reports every raw publish, so a test knows a request is in flight.
    struct Announcing {
        inner: MockTransport,
        published: Mutex<mpsc::Sender<String>>,
    }

    impl Announcing {
        fn new() -> (Arc<Self>, mpsc::Receiver<String>) {
            let (tx, rx) = mpsc::channel();
            let transport = Self {
                inner: MockTransport::new(),
                published: Mutex::new(tx),
            };
            (Arc::new(transport), rx)
        }
    }

    impl ShadowTransport for Announcing {
        fn publish_update(&self, request: UpdateShadowRequest) -> TransportFuture<()> {
            self.inner.publish_update(request)
        }

        fn publish_get(&self, request: GetShadowRequest) -> TransportFuture<()> {
            self.inner.publish_get(request)
        }

        fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS) -> TransportFuture<()> {
            let publish = self.inner.publish(topic, payload, qos);
            let _ = self.published.lock().send(topic.to_string());
            publish
        }

        fn subscribe(&self, topic: &str, qos: QoS) -> TransportFuture<Option<QoS>> {
            self.inner.subscribe(topic, qos)
        }

        fn resubscribe_existing(&self) -> TransportFuture<Vec<SubscriptionGrant>> {
            self.inner.resubscribe_existing()
        }

        fn disconnect(&self) -> TransportFuture<()> {
            self.inner.disconnect()
        }
    }

    fn in_flight(published: &mpsc::Receiver<String>) -> String {
        published.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn response_wakes_the_waiter() {
        let (transport, published) = Announcing::new();
        let channel = channel(Arc::clone(&transport));

        let requester = Arc::clone(&channel);
        let handle = thread::spawn(move || {
            requester.request("ssm/params/dev", &json!({"nodeID": "n1"}), None)
        });

        assert_eq!(in_flight(&published), "ssm/params/dev");
        assert!(channel.is_waiting());
        channel
            .deliver(br#"{"Status": "connected"}"#)
            .unwrap();

        let response = handle.join().unwrap().unwrap();
        assert_eq!(response["Status"], "connected");
        assert!(!channel.is_waiting());
        assert_eq!(transport.inner.raw_publishes().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_request_is_busy() {
        let (transport, published) = Announcing::new();
        let channel = channel(transport);

        let requester = Arc::clone(&channel);
        let first = thread::spawn(move || {
            requester.request("req", &json!({}), Some(Duration::from_secs(5)))
        });
        in_flight(&published);

        let second = channel.request("req", &json!({}), Some(Duration::from_millis(10)));
        assert!(matches!(second, Err(SyncError::SideChannelBusy)));

        channel.deliver(b"{}").unwrap();
        assert!(first.join().unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn request_times_out() {
        let channel = channel(Arc::new(MockTransport::new()));

        let requester = Arc::clone(&channel);
        let result = thread::spawn(move || {
            requester.request("req", &json!({}), Some(Duration::from_millis(20)))
        })
        .join()
        .unwrap();

        assert!(matches!(result, Err(SyncError::SideChannelTimeout)));
        assert!(!channel.is_waiting());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn publish_failure_wakes_the_waiter() {
        let transport = Arc::new(MockTransport::new());
        transport.set_fail_publish(true);
        let channel = channel(transport);

        let requester = Arc::clone(&channel);
        let result = thread::spawn(move || requester.request("req", &json!({}), None))
            .join()
            .unwrap();

        assert!(matches!(result, Err(SyncError::PublishFailure { .. })));
    }

    #[tokio::test]
    async fn unsolicited_message_is_dropped() {
        let channel = channel(Arc::new(MockTransport::new()));
        channel.deliver(b"{\"Status\": \"late\"}").unwrap();
        assert!(!channel.is_waiting());
        assert!(channel.deliver(b"not json").is_err());
    }
}
