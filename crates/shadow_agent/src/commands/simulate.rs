//! Simulate command implementation.
//!
//! Runs a complete agent against [`LoopbackCloud`], applies the operator
//! writes given on the command line and prints where both sides ended up.

use serde::Serialize;
use serde_json::json;
use shadow_agent::adapter::read_host;
use shadow_agent::{Agent, AgentConfig, FileTelemetry, StaticTelemetry, TelemetrySource};
use shadow_protocol::{AttributeValue, StateMap};
use shadow_sync_engine::LoopbackCloud;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Options of the simulate command.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Operator writes as `key=value`.
    pub desired: Vec<String>,
    /// Run time after the operator write.
    pub duration: Duration,
    /// Address the simulated parameter service reports.
    pub adapter_ip: Option<String>,
    /// Telemetry file; a fixed document is uploaded without one.
    pub telemetry: Option<PathBuf>,
}

/// Final state of a simulation.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Device cache after shutdown.
    pub cache: StateMap,
    /// Reported section in the cloud.
    pub reported: Option<StateMap>,
    /// Desired section in the cloud.
    pub desired: Option<StateMap>,
    /// Cloud document version.
    pub version: u64,
    /// Telemetry documents uploaded.
    pub status_uploads: usize,
    /// Error that ended the run, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parses `key=value` operator writes.
pub fn parse_assignments(assignments: &[String]) -> Result<StateMap, String> {
    assignments
        .iter()
        .map(|assignment| {
            let (key, value) = assignment
                .split_once('=')
                .ok_or_else(|| format!("Expected KEY=VALUE, got '{}'", assignment))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("Empty key in '{}'", assignment));
            }
            Ok((
                key.to_string(),
                Some(AttributeValue::parse_literal(value.trim())),
            ))
        })
        .collect()
}

/// Runs the simulate command.
pub async fn run(
    config: AgentConfig,
    options: SimulateOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let desired = parse_assignments(&options.desired)?;
    let status_topic = config.status_topic();

    let mut cloud = LoopbackCloud::new(config.shadow_config().topics());
    if let (Some(request_topic), Some(agent)) = (config.ssm_request_topic(), config.agent.as_ref())
    {
        let address = match options.adapter_ip {
            Some(address) => address,
            None => read_host(&agent.cfg_file, &config.adapter.machine_name)?,
        };
        info!("Simulated parameter service reports adapter at {}", address);
        cloud = cloud.with_side_channel(request_topic, config.params_topic(), move |_| {
            Some(json!({
                "Status": "connected",
                "ssm_run_command": { "StandardOutputContent": format!("Host {}", address) }
            }))
        });
    }
    let cloud = Arc::new(cloud);

    let agent = Agent::new(config, Arc::clone(&cloud), Handle::current());
    cloud.attach(agent.inbound());
    let engine = Arc::clone(agent.engine());

    let source: Box<dyn TelemetrySource> = match options.telemetry {
        Some(path) => Box::new(FileTelemetry::new(path)),
        None => Box::new(StaticTelemetry::new(json!({
            "execution": "ACTIVE",
            "mode": "AUTOMATIC"
        }))),
    };

    let duration = options.duration;
    let operator = {
        let cloud = Arc::clone(&cloud);
        async move {
            for _ in 0..250 {
                if cloud.has_document() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            if !desired.is_empty() {
                info!("Operator writes {:?}", desired);
                cloud.operator_update(desired);
            }
            tokio::time::sleep(duration).await;
        }
    };

    let outcome = agent.run(source, operator).await;
    if let Err(e) = &outcome {
        warn!("Agent stopped with an error: {}", e);
    }

    let report = SimulationReport {
        cache: engine.store().snapshot(),
        reported: cloud.reported(),
        desired: cloud.desired(),
        version: cloud.version(),
        status_uploads: cloud.published(&status_topic).len(),
        error: outcome.err().map(|e| e.to_string()),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_parse_literals() {
        let parsed = parse_assignments(&[
            "upload_enable=1".to_string(),
            "adapters_connected = true".to_string(),
            "note=clear_shadow".to_string(),
        ])
        .unwrap();

        assert_eq!(parsed["upload_enable"], Some(AttributeValue::Integer(1)));
        assert_eq!(parsed["adapters_connected"], Some(AttributeValue::Bool(true)));
        assert_eq!(parsed["note"], Some(AttributeValue::Text("clear_shadow".into())));
    }

    #[test]
    fn malformed_assignments_are_rejected() {
        assert!(parse_assignments(&["upload_enable".to_string()]).is_err());
        assert!(parse_assignments(&["=1".to_string()]).is_err());
        assert!(parse_assignments(&[]).unwrap().is_empty());
    }
}
