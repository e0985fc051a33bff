//! Shadow request, response and event documents.

use crate::error::ProtocolResult;
use crate::token::ClientToken;
use crate::value::StateMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// HTTP-style code the shadow service uses for a missing document.
pub const NOT_FOUND: i32 = 404;

/// One section (`reported` or `desired`) of an update request.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SectionUpdate {
    /// Section not mentioned; the remote copy is left alone.
    #[default]
    Absent,
    /// Explicit `null`; the remote section is deleted.
    Clear,
    /// Attribute values to merge into the remote section.
    Set(StateMap),
}

impl SectionUpdate {
    /// Returns true if the section is not part of the request.
    pub fn is_absent(&self) -> bool {
        matches!(self, SectionUpdate::Absent)
    }

    /// Returns the attribute values, if any.
    pub fn values(&self) -> Option<&StateMap> {
        match self {
            SectionUpdate::Set(map) => Some(map),
            _ => None,
        }
    }
}

impl Serialize for SectionUpdate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SectionUpdate::Set(map) => map.serialize(serializer),
            SectionUpdate::Absent | SectionUpdate::Clear => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for SectionUpdate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<StateMap>::deserialize(deserializer)? {
            Some(map) => SectionUpdate::Set(map),
            None => SectionUpdate::Clear,
        })
    }
}

/// The `state` object of an update request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateState {
    /// Reported section.
    #[serde(default, skip_serializing_if = "SectionUpdate::is_absent")]
    pub reported: SectionUpdate,
    /// Desired section.
    #[serde(default, skip_serializing_if = "SectionUpdate::is_absent")]
    pub desired: SectionUpdate,
}

impl UpdateState {
    /// Reports `state` and sets it as desired, so no delta remains.
    pub fn mirror(state: StateMap) -> Self {
        Self {
            reported: SectionUpdate::Set(state.clone()),
            desired: SectionUpdate::Set(state),
        }
    }

    /// Deletes both sections of the remote document.
    pub fn clear() -> Self {
        Self {
            reported: SectionUpdate::Clear,
            desired: SectionUpdate::Clear,
        }
    }

    /// Returns true if this request deletes both sections.
    pub fn is_clear(&self) -> bool {
        matches!(
            (&self.reported, &self.desired),
            (SectionUpdate::Clear, SectionUpdate::Clear)
        )
    }
}

/// Update request for a named shadow.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateShadowRequest {
    /// Thing (document) name.
    pub thing_name: String,
    /// Shadow name.
    pub shadow_name: String,
    /// Requested state change.
    pub state: UpdateState,
    /// Correlation token.
    pub client_token: ClientToken,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePayload {
    state: UpdateState,
    client_token: ClientToken,
}

impl UpdateShadowRequest {
    /// Encodes the wire payload (`{state, clientToken}`).
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let payload = UpdatePayload {
            state: self.state.clone(),
            client_token: self.client_token.clone(),
        };
        Ok(serde_json::to_vec(&payload)?)
    }

    /// Decodes a wire payload published for the given shadow.
    pub fn decode(
        thing_name: impl Into<String>,
        shadow_name: impl Into<String>,
        bytes: &[u8],
    ) -> ProtocolResult<Self> {
        let payload: UpdatePayload = serde_json::from_slice(bytes)?;
        Ok(Self {
            thing_name: thing_name.into(),
            shadow_name: shadow_name.into(),
            state: payload.state,
            client_token: payload.client_token,
        })
    }
}

/// Get request for a named shadow.
#[derive(Debug, Clone, PartialEq)]
pub struct GetShadowRequest {
    /// Thing (document) name.
    pub thing_name: String,
    /// Shadow name.
    pub shadow_name: String,
    /// Correlation token.
    pub client_token: ClientToken,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetPayload {
    client_token: ClientToken,
}

impl GetShadowRequest {
    /// Encodes the wire payload (`{clientToken}`).
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let payload = GetPayload {
            client_token: self.client_token.clone(),
        };
        Ok(serde_json::to_vec(&payload)?)
    }

    /// Decodes a wire payload published for the given shadow.
    pub fn decode(
        thing_name: impl Into<String>,
        shadow_name: impl Into<String>,
        bytes: &[u8],
    ) -> ProtocolResult<Self> {
        let payload: GetPayload = serde_json::from_slice(bytes)?;
        Ok(Self {
            thing_name: thing_name.into(),
            shadow_name: shadow_name.into(),
            client_token: payload.client_token,
        })
    }
}

/// The `state` object of a shadow document as seen in responses.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShadowDocumentState {
    /// Reported section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported: Option<StateMap>,
    /// Desired section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<StateMap>,
    /// Desired keys that differ from reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<StateMap>,
}

/// Body of a `get/accepted` or `update/accepted` message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    /// Document state.
    #[serde(default)]
    pub state: Option<ShadowDocumentState>,
    /// Token of the request this answers, if it carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<ClientToken>,
    /// Service timestamp (epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Document version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl AcceptedResponse {
    /// Returns the reported section, if present.
    pub fn reported(&self) -> Option<&StateMap> {
        self.state.as_ref().and_then(|s| s.reported.as_ref())
    }

    /// Returns the delta section, if present.
    pub fn delta(&self) -> Option<&StateMap> {
        self.state.as_ref().and_then(|s| s.delta.as_ref())
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Body of an `update/delta` message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaEvent {
    /// Desired attributes that differ from reported.
    #[serde(default)]
    pub state: StateMap,
    /// Token of the update that caused the delta, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<ClientToken>,
    /// Service timestamp (epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Document version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl DeltaEvent {
    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Body of a `get/rejected` or `update/rejected` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Error code.
    pub code: i32,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Token of the rejected request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<ClientToken>,
    /// Service timestamp (epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ErrorResponse {
    /// Creates an error response.
    pub fn new(code: i32, message: impl Into<String>, client_token: Option<ClientToken>) -> Self {
        Self {
            code,
            message: message.into(),
            client_token,
            timestamp: None,
        }
    }

    /// Returns true if the shadow document does not exist.
    pub fn is_not_found(&self) -> bool {
        self.code == NOT_FOUND
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{AttributeValue, StateMap};

    fn request(state: UpdateState) -> UpdateShadowRequest {
        UpdateShadowRequest {
            thing_name: "dev".into(),
            shadow_name: "daq".into(),
            state,
            client_token: ClientToken::new("t1"),
        }
    }

    #[test]
    fn clear_request_sends_explicit_nulls() {
        let bytes = request(UpdateState::clear()).encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"state": {"reported": null, "desired": null}, "clientToken": "t1"})
        );
    }

    #[test]
    fn mirror_request_repeats_state_in_both_sections() {
        let mut state = StateMap::new();
        state.insert("upload_enable".into(), Some(AttributeValue::Integer(1)));
        state.insert("adapters_connected".into(), None);

        let bytes = request(UpdateState::mirror(state)).encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["state"]["reported"]["upload_enable"], 1);
        assert_eq!(json["state"]["desired"]["adapters_connected"], serde_json::Value::Null);
    }

    #[test]
    fn update_decode_distinguishes_absent_from_null() {
        let decoded = UpdateShadowRequest::decode(
            "dev",
            "daq",
            br#"{"state": {"reported": null}, "clientToken": "t9"}"#,
        )
        .unwrap();
        assert_eq!(decoded.state.reported, SectionUpdate::Clear);
        assert_eq!(decoded.state.desired, SectionUpdate::Absent);
        assert_eq!(decoded.client_token.as_str(), "t9");
    }

    #[test]
    fn accepted_response_with_null_reported() {
        let response = AcceptedResponse::decode(
            br#"{"state": {"reported": null, "desired": null}, "clientToken": "t1", "version": 4}"#,
        )
        .unwrap();
        assert!(response.state.is_some());
        assert!(response.reported().is_none());
        assert_eq!(response.version, Some(4));
    }

    #[test]
    fn delta_event_decodes_state_map() {
        let delta = DeltaEvent::decode(br#"{"state": {"upload_enable": 1}, "version": 7}"#).unwrap();
        assert_eq!(delta.state["upload_enable"], Some(AttributeValue::Integer(1)));
        assert!(delta.client_token.is_none());
    }

    #[test]
    fn error_response_not_found() {
        let error = ErrorResponse::decode(
            br#"{"code": 404, "message": "No shadow exists with name: 'daq'", "clientToken": "t2"}"#,
        )
        .unwrap();
        assert!(error.is_not_found());
        assert_eq!(error.client_token, Some(ClientToken::new("t2")));
        assert!(!ErrorResponse::new(400, "bad", None).is_not_found());
    }
}
