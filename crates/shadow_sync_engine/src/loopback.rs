//! In-process shadow service for testing and simulation.
//!
//! [`LoopbackCloud`] implements [`ShadowTransport`] by answering every
//! request itself: it keeps the `reported` and `desired` sections, merges
//! updates into them and feeds the responses back through an attached
//! [`InboundSink`], just like a broker delivering to the subscribed topics.

use crate::error::{SyncError, SyncResult};
use crate::events::{ConnectReturnCode, InboundSink, ShadowEvent};
use crate::transport::{ready, ShadowTransport, SubscriptionGrant, TransportFuture};
use parking_lot::Mutex;
use serde_json::Value;
use shadow_protocol::{
    AcceptedResponse, ClientToken, DeltaEvent, ErrorResponse, GetShadowRequest, ProtocolResult,
    QoS, SectionUpdate, ShadowDocumentState, ShadowTopics, StateMap, TopicKind,
    UpdateShadowRequest, NOT_FOUND,
};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Answers a side-channel request; `None` leaves it unanswered.
pub type SideChannelResponder = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

struct SideChannelRoute {
    request_topic: String,
    reply_topic: String,
    responder: SideChannelResponder,
}

#[derive(Default)]
struct CloudState {
    reported: Option<StateMap>,
    desired: Option<StateMap>,
    version: u64,
    sink: Option<InboundSink>,
    subscriptions: Vec<String>,
    refused: HashSet<String>,
    published: Vec<(String, Vec<u8>)>,
    disconnected: bool,
}

impl CloudState {
    fn has_document(&self) -> bool {
        self.reported.is_some() || self.desired.is_some()
    }

    fn delta(&self) -> Option<StateMap> {
        let desired = self.desired.as_ref()?;
        let delta: StateMap = desired
            .iter()
            .filter(|(key, value)| self.reported.as_ref().and_then(|r| r.get(*key)) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        (!delta.is_empty()).then_some(delta)
    }

    fn grant(&self, topic: &str) -> Option<QoS> {
        (!self.refused.contains(topic)).then_some(QoS::AtLeastOnce)
    }
}

/// Merges one update section into a stored section.
///
/// `null` values delete keys; an explicit `null` section deletes the section.
fn merge(section: &mut Option<StateMap>, update: &SectionUpdate) {
    match update {
        SectionUpdate::Absent => {}
        SectionUpdate::Clear => *section = None,
        SectionUpdate::Set(values) => {
            let stored = section.get_or_insert_with(StateMap::new);
            for (key, value) in values {
                match value {
                    Some(value) => {
                        stored.insert(key.clone(), Some(value.clone()));
                    }
                    None => {
                        stored.remove(key);
                    }
                }
            }
        }
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A shadow service and broker living in the same process.
pub struct LoopbackCloud {
    topics: ShadowTopics,
    state: Mutex<CloudState>,
    side_channel: Option<SideChannelRoute>,
}

impl LoopbackCloud {
    /// Creates a cloud with no document for one thing and named shadow.
    pub fn new(topics: ShadowTopics) -> Self {
        Self {
            topics,
            state: Mutex::new(CloudState::default()),
            side_channel: None,
        }
    }

    /// Starts with an existing document.
    pub fn with_document(self, reported: StateMap, desired: StateMap) -> Self {
        {
            let mut state = self.state.lock();
            merge(&mut state.reported, &SectionUpdate::Set(reported));
            merge(&mut state.desired, &SectionUpdate::Set(desired));
            state.version = 1;
        }
        self
    }

    /// Answers requests published on `request_topic` with `responder`,
    /// delivering the reply on `reply_topic`.
    pub fn with_side_channel<F>(
        mut self,
        request_topic: impl Into<String>,
        reply_topic: impl Into<String>,
        responder: F,
    ) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.side_channel = Some(SideChannelRoute {
            request_topic: request_topic.into(),
            reply_topic: reply_topic.into(),
            responder: Box::new(responder),
        });
        self
    }

    /// Connects the device side; responses are delivered into `sink`.
    pub fn attach(&self, sink: InboundSink) {
        let mut state = self.state.lock();
        state.disconnected = false;
        state.sink = Some(sink);
        Self::notify(
            &state,
            ShadowEvent::ConnectionSuccess {
                return_code: ConnectReturnCode::Accepted,
                session_present: false,
            },
        );
    }

    /// Returns the stored reported section.
    pub fn reported(&self) -> Option<StateMap> {
        self.state.lock().reported.clone()
    }

    /// Returns the stored desired section.
    pub fn desired(&self) -> Option<StateMap> {
        self.state.lock().desired.clone()
    }

    /// Returns the desired keys that differ from reported.
    pub fn delta(&self) -> Option<StateMap> {
        self.state.lock().delta()
    }

    /// Returns the document version.
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    /// Returns true if a document exists.
    pub fn has_document(&self) -> bool {
        self.state.lock().has_document()
    }

    /// Returns raw payloads published on `topic`.
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Returns true until the device disconnects.
    pub fn is_connected(&self) -> bool {
        let state = self.state.lock();
        state.sink.is_some() && !state.disconnected
    }

    /// Simulates an operator writing `desired` from the console.
    ///
    /// The device sees a cloud-origin `update/accepted` without a token,
    /// followed by a delta when desired now differs from reported.
    pub fn operator_update(&self, desired: StateMap) {
        let mut state = self.state.lock();
        merge(&mut state.desired, &SectionUpdate::Set(desired.clone()));
        state.version += 1;

        let accepted = AcceptedResponse {
            state: Some(ShadowDocumentState {
                desired: Some(desired),
                ..ShadowDocumentState::default()
            }),
            client_token: None,
            timestamp: Some(now()),
            version: Some(state.version),
        };
        self.emit(&state, TopicKind::UpdateAccepted, accepted.encode());
        self.emit_delta(&state, None);
    }

    /// Simulates a dropped connection that comes back without its session.
    pub fn drop_session(&self) {
        let state = self.state.lock();
        Self::notify(
            &state,
            ShadowEvent::Interrupted {
                error: "connection lost".to_string(),
            },
        );
        Self::notify(
            &state,
            ShadowEvent::Resumed {
                return_code: ConnectReturnCode::Accepted,
                session_present: false,
            },
        );
    }

    /// Refuses `topic` on any later (re)subscription.
    pub fn reject_topic(&self, topic: impl Into<String>) {
        self.state.lock().refused.insert(topic.into());
    }

    fn emit(&self, state: &CloudState, kind: TopicKind, payload: ProtocolResult<Vec<u8>>) {
        let Some(sink) = &state.sink else {
            debug!("No device attached, dropping {}", kind.suffix());
            return;
        };
        let result = payload
            .map_err(SyncError::from)
            .and_then(|bytes| sink.deliver(&self.topics.topic(kind), &bytes));
        if let Err(e) = result {
            warn!("Failed to deliver {}: {}", kind.suffix(), e);
        }
    }

    fn emit_delta(&self, state: &CloudState, client_token: Option<ClientToken>) {
        if let Some(delta) = state.delta() {
            let event = DeltaEvent {
                state: delta,
                client_token,
                timestamp: Some(now()),
                version: Some(state.version),
            };
            self.emit(state, TopicKind::Delta, event.encode());
        }
    }

    fn notify(state: &CloudState, event: ShadowEvent) {
        if let Some(sink) = &state.sink {
            if let Err(e) = sink.send(event) {
                warn!("Failed to deliver connection event: {}", e);
            }
        }
    }

    fn check_connected(state: &CloudState) -> SyncResult<()> {
        if state.disconnected {
            Err(SyncError::transport("not connected"))
        } else {
            Ok(())
        }
    }

    fn handle_update(&self, request: UpdateShadowRequest) -> SyncResult<()> {
        let mut state = self.state.lock();
        Self::check_connected(&state)?;

        merge(&mut state.reported, &request.state.reported);
        merge(&mut state.desired, &request.state.desired);
        state.version += 1;

        let accepted = AcceptedResponse {
            state: Some(ShadowDocumentState {
                reported: request.state.reported.values().cloned(),
                desired: request.state.desired.values().cloned(),
                delta: None,
            }),
            client_token: Some(request.client_token.clone()),
            timestamp: Some(now()),
            version: Some(state.version),
        };
        self.emit(&state, TopicKind::UpdateAccepted, accepted.encode());
        if request.state.desired.values().is_some() {
            self.emit_delta(&state, Some(request.client_token));
        }
        Ok(())
    }

    fn handle_get(&self, request: GetShadowRequest) -> SyncResult<()> {
        let state = self.state.lock();
        Self::check_connected(&state)?;

        if !state.has_document() {
            let message = format!("No shadow exists with name: '{}'", request.shadow_name);
            let rejected = ErrorResponse::new(NOT_FOUND, message, Some(request.client_token));
            self.emit(&state, TopicKind::GetRejected, rejected.encode());
            return Ok(());
        }

        let accepted = AcceptedResponse {
            state: Some(ShadowDocumentState {
                reported: state.reported.clone(),
                desired: state.desired.clone(),
                delta: state.delta(),
            }),
            client_token: Some(request.client_token),
            timestamp: Some(now()),
            version: Some(state.version),
        };
        self.emit(&state, TopicKind::GetAccepted, accepted.encode());
        Ok(())
    }

    fn handle_raw(&self, topic: &str, payload: Vec<u8>) -> SyncResult<()> {
        let state = {
            let mut state = self.state.lock();
            Self::check_connected(&state)?;
            state.published.push((topic.to_string(), payload.clone()));
            state
        };

        let Some(route) = self.side_channel.as_ref().filter(|r| r.request_topic == topic) else {
            return Ok(());
        };
        let request: Value = serde_json::from_slice(&payload)
            .map_err(shadow_protocol::ProtocolError::from)?;
        if let Some(reply) = (route.responder)(&request) {
            let bytes = serde_json::to_vec(&reply).map_err(shadow_protocol::ProtocolError::from)?;
            if let Some(sink) = &state.sink {
                sink.deliver(&route.reply_topic, &bytes)?;
            }
        }
        Ok(())
    }
}

impl ShadowTransport for LoopbackCloud {
    fn publish_update(&self, request: UpdateShadowRequest) -> TransportFuture<()> {
        ready(self.handle_update(request))
    }

    fn publish_get(&self, request: GetShadowRequest) -> TransportFuture<()> {
        ready(self.handle_get(request))
    }

    fn publish(&self, topic: &str, payload: Vec<u8>, _qos: QoS) -> TransportFuture<()> {
        ready(self.handle_raw(topic, payload))
    }

    fn subscribe(&self, topic: &str, _qos: QoS) -> TransportFuture<Option<QoS>> {
        let mut state = self.state.lock();
        state.subscriptions.push(topic.to_string());
        ready(Ok(state.grant(topic)))
    }

    fn resubscribe_existing(&self) -> TransportFuture<Vec<SubscriptionGrant>> {
        let state = self.state.lock();
        let grants = state
            .subscriptions
            .iter()
            .map(|topic| SubscriptionGrant::new(topic.clone(), state.grant(topic)))
            .collect();
        ready(Ok(grants))
    }

    fn disconnect(&self) -> TransportFuture<()> {
        let mut state = self.state.lock();
        Self::notify(&state, ShadowEvent::Closed);
        state.sink = None;
        state.disconnected = true;
        ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventReceiver, EventRouter};
    use shadow_protocol::{state_from, AttributeValue, UpdateState, UPLOAD_ENABLE};
    use tokio::sync::mpsc;

    fn attached() -> (LoopbackCloud, EventReceiver) {
        let topics = ShadowTopics::new("dev", "daq");
        let cloud = LoopbackCloud::new(topics.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        cloud.attach(InboundSink::new(EventRouter::new(topics, Some("params/dev".into())), tx));
        (cloud, rx)
    }

    fn next(rx: &mut EventReceiver) -> ShadowEvent {
        rx.try_recv().expect("event")
    }

    fn update(state: UpdateState, token: &str) -> UpdateShadowRequest {
        UpdateShadowRequest {
            thing_name: "dev".into(),
            shadow_name: "daq".into(),
            state,
            client_token: ClientToken::new(token),
        }
    }

    fn upload(value: i64) -> StateMap {
        state_from([(UPLOAD_ENABLE, Some(AttributeValue::Integer(value)))])
    }

    #[test]
    fn get_without_document_is_not_found() {
        let (cloud, mut rx) = attached();
        assert!(matches!(next(&mut rx), ShadowEvent::ConnectionSuccess { .. }));

        cloud.handle_get(GetShadowRequest {
            thing_name: "dev".into(),
            shadow_name: "daq".into(),
            client_token: ClientToken::new("g1"),
        })
        .unwrap();

        match next(&mut rx) {
            ShadowEvent::GetRejected(e) => {
                assert!(e.is_not_found());
                assert_eq!(e.client_token, Some(ClientToken::new("g1")));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn update_merges_and_null_keys_delete() {
        let (cloud, mut rx) = attached();
        next(&mut rx);

        let mut state = upload(1);
        state.insert("adapters_connected".into(), Some(AttributeValue::Bool(true)));
        cloud.handle_update(update(UpdateState::mirror(state), "u1")).unwrap();

        let mut state = upload(0);
        state.insert("adapters_connected".into(), None);
        cloud.handle_update(update(UpdateState::mirror(state), "u2")).unwrap();

        assert_eq!(cloud.reported(), Some(upload(0)));
        assert_eq!(cloud.desired(), Some(upload(0)));
        assert_eq!(cloud.version(), 2);
        assert!(cloud.delta().is_none());

        assert!(matches!(next(&mut rx), ShadowEvent::UpdateAccepted(_)));
        match next(&mut rx) {
            ShadowEvent::UpdateAccepted(response) => {
                assert_eq!(response.client_token, Some(ClientToken::new("u2")));
                assert_eq!(response.version, Some(2));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn operator_update_produces_delta() {
        let (cloud, mut rx) = attached();
        next(&mut rx);
        cloud.handle_update(update(UpdateState::mirror(upload(0)), "u1")).unwrap();
        next(&mut rx);

        cloud.operator_update(upload(1));

        match next(&mut rx) {
            ShadowEvent::UpdateAccepted(response) => {
                assert!(response.client_token.is_none());
                assert!(response.reported().is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match next(&mut rx) {
            ShadowEvent::Delta(delta) => assert_eq!(delta.state, upload(1)),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn clear_removes_document() {
        let (cloud, mut rx) = attached();
        next(&mut rx);
        cloud.handle_update(update(UpdateState::mirror(upload(1)), "u1")).unwrap();
        cloud.handle_update(update(UpdateState::clear(), "u2")).unwrap();

        assert!(!cloud.has_document());
        next(&mut rx);
        match next(&mut rx) {
            ShadowEvent::UpdateAccepted(response) => assert!(response.reported().is_none()),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn side_channel_requests_are_answered() {
        let topics = ShadowTopics::new("dev", "daq");
        let cloud = LoopbackCloud::new(topics.clone()).with_side_channel(
            "ssm/requests",
            "params/dev",
            |request| Some(serde_json::json!({ "echo": request["nodeID"] })),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        cloud.attach(InboundSink::new(EventRouter::new(topics, Some("params/dev".into())), tx));
        next(&mut rx);

        cloud.handle_raw("ssm/requests", br#"{"nodeID": "n1"}"#.to_vec()).unwrap();
        cloud.handle_raw("status/dev", b"{}".to_vec()).unwrap();

        match next(&mut rx) {
            ShadowEvent::SideChannel(payload) => {
                let value: Value = serde_json::from_slice(&payload).unwrap();
                assert_eq!(value["echo"], "n1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(cloud.published("status/dev").len(), 1);
    }

    #[test]
    fn disconnect_detaches_device() {
        let (cloud, mut rx) = attached();
        next(&mut rx);

        block_on(cloud.disconnect());

        assert!(matches!(next(&mut rx), ShadowEvent::Closed));
        assert!(!cloud.is_connected());
        assert!(cloud.handle_update(update(UpdateState::mirror(upload(1)), "u1")).is_err());
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
    }

    fn block_on(future: TransportFuture<()>) {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
            .unwrap();
    }
}
