//! # Shadow Agent
//!
//! Edge agent that lets an operator switch machine telemetry upload on and
//! off through a device shadow.
//!
//! This crate provides:
//! - `AgentConfig`: the JSON configuration file
//! - `ControlLoop`: uploads telemetry while `upload_enable` is 1
//! - `AdapterHostMonitor`: keeps the MTConnect adapter address current
//! - `Agent`: bootstrap, background threads and shutdown around a
//!   `ShadowContext`

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
mod agent;
mod config;
mod control;
mod error;
mod telemetry;

pub use adapter::{AdapterHostMonitor, HostCheck, LookupRequest};
pub use agent::Agent;
pub use config::{
    AdapterSettings, AgentConfig, AwsSettings, MtConnectAgentSettings, SsmSettings,
    TimeoutSettings, UploadSettings, DEFAULT_SHADOW_NAME,
};
pub use control::{ControlLoop, LoopExit, StopFlag};
pub use error::{AgentError, AgentResult};
pub use telemetry::{FileTelemetry, StaticTelemetry, TelemetrySource};
