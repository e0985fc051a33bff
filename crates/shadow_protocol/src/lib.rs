//! # Shadow Protocol
//!
//! Wire types for device shadow synchronization.
//!
//! This crate provides:
//! - `AttributeValue` and `StateMap` for partial device state
//! - `ClientToken` for request/response correlation
//! - `ShadowTopics` for the named-shadow topic scheme
//! - Request, response and event documents with JSON codecs
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod token;
mod topics;
mod value;

pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    AcceptedResponse, DeltaEvent, ErrorResponse, GetShadowRequest, SectionUpdate,
    ShadowDocumentState, UpdateShadowRequest, UpdateState, NOT_FOUND,
};
pub use token::ClientToken;
pub use topics::{QoS, ShadowTopics, TopicKind};
pub use value::{
    default_state, state_from, translate_sentinel, AttributeValue, StateMap, ADAPTERS_CONNECTED,
    CLEAR_SHADOW, DEFAULT_ATTRIBUTES, NONE_SENTINEL, UPLOAD_ENABLE,
};
