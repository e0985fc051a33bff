//! Agent lifecycle: bootstrap, background work and shutdown.

use crate::adapter::AdapterHostMonitor;
use crate::config::AgentConfig;
use crate::control::{ControlLoop, LoopExit, StopFlag};
use crate::error::{AgentError, AgentResult};
use crate::telemetry::TelemetrySource;
use shadow_protocol::{state_from, AttributeValue, UPLOAD_ENABLE};
use shadow_sync_engine::{
    Dispatcher, InboundSink, ShadowContext, ShadowSyncEngine, ShadowTransport, SyncResult,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Upper bound on waiting for the response to the initial get.
const BOOTSTRAP_WAIT: Duration = Duration::from_secs(10);

/// One device agent bound to a transport.
///
/// Create it, hand [`Agent::inbound`] to the transport so inbound traffic
/// reaches the dispatcher, then call [`Agent::run`].
pub struct Agent<T: ShadowTransport> {
    config: AgentConfig,
    context: ShadowContext<T>,
    dispatcher: Dispatcher<T>,
    runtime: Handle,
}

impl<T: ShadowTransport + 'static> Agent<T> {
    /// Creates an agent.
    pub fn new(config: AgentConfig, transport: Arc<T>, runtime: Handle) -> Self {
        let (context, dispatcher) =
            ShadowContext::new(config.shadow_config(), transport, runtime.clone());
        Self {
            config,
            context,
            dispatcher,
            runtime,
        }
    }

    /// Returns the sink the transport delivers inbound traffic into.
    pub fn inbound(&self) -> InboundSink {
        self.context.inbound()
    }

    /// Returns the engine.
    pub fn engine(&self) -> &Arc<ShadowSyncEngine<T>> {
        self.context.engine()
    }

    /// Runs until `shutdown` resolves or something fails, then resets
    /// `upload_enable` and disconnects.
    ///
    /// Returns the first failure of startup or of the background work; the
    /// reset and disconnect happen either way.
    pub async fn run<S, F>(self, source: S, shutdown: F) -> AgentResult<()>
    where
        S: TelemetrySource + 'static,
        F: Future<Output = ()>,
    {
        let Agent {
            config,
            context,
            dispatcher,
            runtime,
        } = self;

        let dispatch = runtime.spawn(dispatcher.run());
        let stop = Arc::new(StopFlag::new());
        let outcome = serve(&config, &context, &runtime, dispatch, source, shutdown, &stop).await;

        stop.stop();
        if let Err(e) = context.shutdown().await {
            warn!("Shutdown did not complete cleanly: {}", e);
        }
        info!("Agent for {} stopped", config.aws.client_id);
        outcome
    }
}

async fn serve<T, S, F>(
    config: &AgentConfig,
    context: &ShadowContext<T>,
    runtime: &Handle,
    mut dispatch: JoinHandle<SyncResult<()>>,
    mut source: S,
    shutdown: F,
    stop: &Arc<StopFlag>,
) -> AgentResult<()>
where
    T: ShadowTransport + 'static,
    S: TelemetrySource + 'static,
    F: Future<Output = ()>,
{
    info!(
        "Connecting to {} with client ID '{}'...",
        config.aws.endpoint_url.as_deref().unwrap_or("loopback"),
        config.aws.client_id
    );
    let answered = context.engine().get_answered();
    context.start().await?;
    await_bootstrap(answered).await;

    let mut monitor = match AdapterHostMonitor::from_config(config, Arc::clone(context.side_channel())) {
        Some(monitor) => {
            let monitor = tokio::task::spawn_blocking(move || {
                monitor.check()?;
                Ok::<_, AgentError>(monitor)
            })
            .await??;
            let interval = config.adapter_check_interval();
            let stop = Arc::clone(stop);
            Some(tokio::task::spawn_blocking(move || monitor.run(interval, &stop)))
        }
        None => None,
    };

    let machine = config.adapter.machine_name.clone();
    if let Some(url) = config.agent.as_ref().and_then(|agent| agent.url.as_deref()) {
        info!("Monitoring {} through {}", machine, url);
    }
    context
        .engine()
        .local_change(&state_from([(UPLOAD_ENABLE, Some(AttributeValue::Integer(0)))]));
    let mut control = {
        let control = ControlLoop::new(
            Arc::clone(context.engine()),
            Arc::clone(context.transport()),
            runtime.clone(),
            config.status_topic(),
            config.upload.clone(),
            Arc::clone(stop),
        );
        tokio::task::spawn_blocking(move || match source.sample()? {
            Some(_) => control.run(&mut source),
            None => Ok(LoopExit::MachineUnavailable),
        })
    };

    let monitor_done = async {
        match monitor.as_mut() {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = shutdown => {
            info!("Shutdown requested");
            Ok(())
        }
        result = &mut control => match result?? {
            LoopExit::Stopped => Ok(()),
            LoopExit::MachineUnavailable => {
                error!("{} NOT AVAILABLE", machine);
                Err(AgentError::MachineUnavailable(machine))
            }
        },
        result = &mut dispatch => {
            result??;
            Err(AgentError::TaskFailed("dispatcher exited".into()))
        }
        result = monitor_done => {
            result??;
            Err(AgentError::TaskFailed("adapter monitor exited".into()))
        }
    }
}

/// Waits until the initial get was answered, so its outcome cannot overtake
/// the first local write.
async fn await_bootstrap(mut answered: watch::Receiver<bool>) {
    match tokio::time::timeout(BOOTSTRAP_WAIT, answered.wait_for(|done| *done)).await {
        Ok(Ok(_)) => {}
        Ok(Err(_)) => warn!("Engine dropped before the initial shadow get was answered"),
        Err(_) => warn!("No response to the initial shadow get, continuing"),
    }
}
