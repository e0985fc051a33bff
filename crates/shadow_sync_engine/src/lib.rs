//! # Shadow Sync Engine
//!
//! Keeps a device's attribute cache in agreement with its remote shadow
//! document.
//!
//! This crate provides:
//! - `SharedStateStore`: the mutex-guarded attribute cache and pending tokens
//! - `ShadowSyncEngine`: delta, get and update handlers plus change publishing
//! - `ConnectionLifecycle`: interrupt, resume and resubscribe handling
//! - `SideChannel`: a blocking single-slot request/response exchange
//! - `Dispatcher` and `ShadowContext`: the serial dispatch context and wiring
//! - `ShadowTransport`: the transport abstraction, with `MockTransport` and
//!   the in-process `LoopbackCloud`
//!
//! ## Architecture
//!
//! The transport converts every inbound message into a [`ShadowEvent`] and
//! sends it into one channel. A single [`Dispatcher`] task drains that
//! channel, so handlers never run concurrently with each other. They do run
//! concurrently with local writers (the control loop), and both sides meet
//! at the store's lock.
//!
//! ## Key Invariants
//!
//! - Unchanged writes are never published
//! - Cloud-origin updates are adopted without being echoed back
//! - A response is acted upon only if its token is pending
//! - A delta that arrives before the bootstrap get response wins

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod dispatch;
mod engine;
mod error;
mod events;
mod lifecycle;
mod loopback;
mod side_channel;
mod store;
mod transport;

pub use config::ShadowConfig;
pub use context::ShadowContext;
pub use dispatch::Dispatcher;
pub use engine::{EngineStats, ShadowSyncEngine};
pub use error::{SyncError, SyncResult};
pub use events::{
    ConnectReturnCode, EventReceiver, EventRouter, EventSender, InboundSink, ShadowEvent,
    WeakEventSender,
};
pub use lifecycle::ConnectionLifecycle;
pub use loopback::{LoopbackCloud, SideChannelResponder};
pub use side_channel::SideChannel;
pub use store::{SharedStateStore, StoreGuard};
pub use transport::{ready, MockTransport, ShadowTransport, SubscriptionGrant, TransportFuture};
