//! The upload control loop.
//!
//! Runs on its own thread and polls the cached `upload_enable` value. While
//! it is 1, machine telemetry is published on the status topic at a fixed
//! interval; after a continuous upload window the loop switches uploading
//! off itself.

use crate::config::UploadSettings;
use crate::error::AgentResult;
use crate::telemetry::TelemetrySource;
use parking_lot::{Condvar, Mutex};
use shadow_protocol::{state_from, AttributeValue, QoS, UPLOAD_ENABLE};
use shadow_sync_engine::{ShadowSyncEngine, ShadowTransport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// A stop request shared by the agent's background threads.
#[derive(Debug, Default)]
pub struct StopFlag {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopFlag {
    /// Creates a flag that is not set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every sleeper.
    pub fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    /// Returns true once [`StopFlag::stop`] was called.
    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    /// Sleeps for `duration` unless stopped first. Returns true if stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wake.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Why the control loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The stop flag was set.
    Stopped,
    /// The telemetry source reported the machine unavailable.
    MachineUnavailable,
}

/// Uploads telemetry while the shadow asks for it.
pub struct ControlLoop<T: ShadowTransport> {
    engine: Arc<ShadowSyncEngine<T>>,
    transport: Arc<T>,
    runtime: Handle,
    status_topic: String,
    qos: QoS,
    settings: UploadSettings,
    stop: Arc<StopFlag>,
}

impl<T: ShadowTransport + 'static> ControlLoop<T> {
    /// Creates a control loop publishing on `status_topic`.
    pub fn new(
        engine: Arc<ShadowSyncEngine<T>>,
        transport: Arc<T>,
        runtime: Handle,
        status_topic: impl Into<String>,
        settings: UploadSettings,
        stop: Arc<StopFlag>,
    ) -> Self {
        Self {
            engine,
            transport,
            runtime,
            status_topic: status_topic.into(),
            qos: QoS::AtLeastOnce,
            settings,
            stop,
        }
    }

    fn upload_requested(&self) -> bool {
        self.engine
            .upload_enable()
            .and_then(|value| value.as_integer())
            == Some(1)
    }

    /// Runs until stopped or until the machine becomes unavailable.
    ///
    /// Blocks the calling thread.
    pub fn run<S: TelemetrySource>(&self, source: &mut S) -> AgentResult<LoopExit> {
        let mut window_start = Instant::now();
        loop {
            if self.stop.is_stopped() {
                return Ok(LoopExit::Stopped);
            }

            if !self.upload_requested() {
                if self.stop.sleep(self.settings.idle()) {
                    return Ok(LoopExit::Stopped);
                }
                window_start = Instant::now();
                continue;
            }

            let Some(document) = source.sample()? else {
                error!("Machine is not available, stopping upload");
                return Ok(LoopExit::MachineUnavailable);
            };
            self.upload(&document)?;

            if self.stop.sleep(self.settings.interval()) {
                return Ok(LoopExit::Stopped);
            }

            if window_start.elapsed() > self.settings.window() {
                info!(
                    "Upload window of {:?} elapsed, disabling upload",
                    self.settings.window()
                );
                self.engine
                    .local_change(&state_from([(UPLOAD_ENABLE, Some(AttributeValue::Integer(0)))]));
            }
        }
    }

    fn upload(&self, document: &serde_json::Value) -> AgentResult<()> {
        let payload = serde_json::to_vec(document)?;
        let publish = self.transport.publish(&self.status_topic, payload, self.qos);
        let topic = self.status_topic.clone();
        self.runtime.spawn(async move {
            match publish.await {
                Ok(()) => debug!("Published status on {}", topic),
                Err(e) => warn!("Failed to publish status on {}: {}", topic, e),
            }
        });
        Ok(())
    }
}
