//! Agent configuration file.
//!
//! The file is JSON. Only `aws.client_id` and `adapter.machine_name` are
//! required; every other section has defaults or is optional.

use crate::error::{AgentError, AgentResult};
use serde::Deserialize;
use shadow_sync_engine::ShadowConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default named shadow.
pub const DEFAULT_SHADOW_NAME: &str = "daq_state";

/// Connection identity.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsSettings {
    /// MQTT client id; also the thing name.
    pub client_id: String,
    /// Named shadow holding the upload control.
    #[serde(default = "default_shadow_name")]
    pub shadow_name: String,
    /// Broker endpoint, for logging.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_shadow_name() -> String {
    DEFAULT_SHADOW_NAME.to_string()
}

/// Parameter service reached over the side channel.
#[derive(Debug, Clone, Deserialize)]
pub struct SsmSettings {
    /// Request topic prefix; the client id is appended.
    pub topic_ssm_params: String,
    /// Managed node that runs the address lookup.
    #[serde(rename = "nodeID")]
    pub node_id: String,
    /// Lookup command name.
    pub execution_type: String,
}

/// The MTConnect agent whose adapter address is kept current.
#[derive(Debug, Clone, Deserialize)]
pub struct MtConnectAgentSettings {
    /// Agent configuration file containing the adapter `Host` line.
    pub cfg_file: PathBuf,
    /// Agent HTTP endpoint.
    #[serde(default)]
    pub url: Option<String>,
}

/// The monitored machine.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterSettings {
    /// Section name of the machine in the agent file.
    pub machine_name: String,
}

/// Telemetry upload pacing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Pause between two telemetry publishes.
    pub interval_ms: u64,
    /// Continuous upload time after which uploading is switched off.
    pub window_secs: u64,
    /// Pause between checks while not uploading.
    pub idle_ms: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            window_secs: 1800,
            idle_ms: 5000,
        }
    }
}

impl UploadSettings {
    /// Returns the publish interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Returns the upload window.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Returns the idle interval.
    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }
}

/// Optional bounds on blocking waits.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Side-channel response wait, in seconds. Unbounded when absent.
    pub side_channel_secs: Option<u64>,
    /// Disconnect wait at shutdown, in seconds. Unbounded when absent.
    pub shutdown_secs: Option<u64>,
}

/// Complete agent configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Connection identity.
    pub aws: AwsSettings,
    /// Parameter service; adapter monitoring is off without it.
    #[serde(default, rename = "SSM", alias = "ssm")]
    pub ssm: Option<SsmSettings>,
    /// MTConnect agent; adapter monitoring is off without it.
    #[serde(default)]
    pub agent: Option<MtConnectAgentSettings>,
    /// Monitored machine.
    pub adapter: AdapterSettings,
    /// Upload pacing.
    #[serde(default)]
    pub upload: UploadSettings,
    /// Wait bounds.
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    /// Seconds between two adapter address checks.
    #[serde(default = "default_adapter_check_secs")]
    pub adapter_check_interval_secs: u64,
}

fn default_adapter_check_secs() -> u64 {
    6 * 60 * 60
}

impl AgentConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> AgentResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parses and validates a configuration document.
    pub fn from_json(contents: &str) -> AgentResult<Self> {
        let config: Self = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AgentResult<()> {
        if self.aws.client_id.trim().is_empty() {
            return Err(AgentError::config("aws.client_id must not be empty"));
        }
        if self.aws.shadow_name.trim().is_empty() {
            return Err(AgentError::config("aws.shadow_name must not be empty"));
        }
        if self.adapter.machine_name.trim().is_empty() {
            return Err(AgentError::config("adapter.machine_name must not be empty"));
        }
        if self.upload.interval_ms == 0 || self.upload.idle_ms == 0 {
            return Err(AgentError::config("upload intervals must be positive"));
        }
        Ok(())
    }

    /// Topic for telemetry uploads.
    pub fn status_topic(&self) -> String {
        format!("status/{}", self.aws.client_id)
    }

    /// Topic on which side-channel responses arrive.
    pub fn params_topic(&self) -> String {
        format!("params/{}", self.aws.client_id)
    }

    /// Topic for adapter address requests, when the parameter service is set.
    pub fn ssm_request_topic(&self) -> Option<String> {
        self.ssm
            .as_ref()
            .map(|ssm| format!("{}/{}", ssm.topic_ssm_params, self.aws.client_id))
    }

    /// Returns true if the adapter address should be monitored.
    pub fn monitors_adapter(&self) -> bool {
        self.ssm.is_some() && self.agent.is_some()
    }

    /// Interval between adapter address checks.
    pub fn adapter_check_interval(&self) -> Duration {
        Duration::from_secs(self.adapter_check_interval_secs)
    }

    /// Builds the engine configuration.
    pub fn shadow_config(&self) -> ShadowConfig {
        let mut config = ShadowConfig::new(&self.aws.client_id, &self.aws.shadow_name)
            .with_side_channel_topic(self.params_topic());
        if let Some(secs) = self.timeouts.side_channel_secs {
            config = config.with_side_channel_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.timeouts.shutdown_secs {
            config = config.with_shutdown_timeout(Duration::from_secs(secs));
        }
        config
    }
}
