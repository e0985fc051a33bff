//! Adapter address monitoring.
//!
//! The MTConnect agent file names the adapter host of each machine:
//!
//! ```text
//! ROBONANO
//! {
//!     Host = 10.0.0.17
//!     Port = 7878
//! }
//! ```
//!
//! The monitor asks the parameter service, over the side channel, where the
//! adapter currently lives and rewrites the `Host` line when it moved.

use crate::config::AgentConfig;
use crate::control::StopFlag;
use crate::error::{AgentError, AgentResult};
use serde::Serialize;
use serde_json::Value;
use shadow_sync_engine::{ShadowTransport, SideChannel};
use std::fs::File;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Status the parameter service reports for a reachable adapter.
pub const ONLINE_STATUS: &str = "connected";

/// Finds the `Host` value in `machine`'s section of an agent file.
pub fn find_host(contents: &str, machine: &str) -> Option<String> {
    contents
        .lines()
        .skip_while(|line| line.trim() != machine)
        .find(|line| line.contains("Host"))
        .and_then(|line| line.rsplit('=').next())
        .map(|host| host.trim().to_string())
}

/// Reads the adapter host of `machine` from the agent file at `path`.
pub fn read_host(path: &Path, machine: &str) -> AgentResult<String> {
    let contents = std::fs::read_to_string(path)?;
    find_host(&contents, machine).ok_or_else(|| AgentError::HostNotFound {
        path: path.to_path_buf(),
        machine: machine.to_string(),
    })
}

/// Parses a dotted IPv4 address.
pub fn validate_address(address: &str, origin: &'static str) -> AgentResult<Ipv4Addr> {
    address
        .parse::<Ipv4Addr>()
        .map_err(|_| AgentError::InvalidAddress {
            origin,
            address: address.to_string(),
        })
}

/// Replaces the `Host` value in `machine`'s section, the line
/// [`find_host`] reads, if it currently equals `current`.
///
/// Every other line is kept byte for byte.
pub fn replace_host(
    contents: &str,
    machine: &str,
    current: &str,
    replacement: &str,
) -> Option<String> {
    let mut in_section = false;
    let mut replaced = false;
    let mut output = String::with_capacity(contents.len() + replacement.len());

    for line in contents.split_inclusive('\n') {
        if !in_section {
            in_section = line.trim() == machine;
        } else if !replaced && line.contains("Host") {
            let (key, value) = line.rsplit_once('=')?;
            if value.trim() != current {
                return None;
            }
            let leading = &value[..value.len() - value.trim_start().len()];
            let trailing = &value[value.trim_end().len()..];
            output.push_str(key);
            output.push('=');
            output.push_str(leading);
            output.push_str(replacement);
            output.push_str(trailing);
            replaced = true;
            continue;
        }
        output.push_str(line);
    }

    replaced.then_some(output)
}

/// Rewrites `machine`'s adapter host from `current` to `replacement`.
///
/// The new contents go to a temporary file that is renamed over `path`.
pub fn rewrite_host(
    path: &Path,
    machine: &str,
    current: &str,
    replacement: &str,
) -> AgentResult<()> {
    let contents = std::fs::read_to_string(path)?;
    let rewritten =
        replace_host(&contents, machine, current, replacement).ok_or_else(|| {
            AgentError::HostNotFound {
                path: path.to_path_buf(),
                machine: machine.to_string(),
            }
        })?;

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);
    {
        let mut file = File::create(&temp_path)?;
        file.write_all(rewritten.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Extracts the adapter address from a parameter service response.
///
/// The command output is `<label> <address>`; the second word is used.
pub fn parse_lookup_response(response: &Value) -> AgentResult<String> {
    let status = response
        .get("Status")
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::MalformedResponse("missing Status".into()))?;
    if status != ONLINE_STATUS {
        return Err(AgentError::AdapterOffline(status.to_string()));
    }

    response
        .pointer("/ssm_run_command/StandardOutputContent")
        .and_then(Value::as_str)
        .and_then(|output| output.split_whitespace().nth(1))
        .map(str::to_string)
        .ok_or_else(|| AgentError::MalformedResponse("no address in command output".into()))
}

/// Address lookup request sent to the parameter service.
#[derive(Debug, Clone, Serialize)]
pub struct LookupRequest {
    /// Managed node that runs the lookup.
    #[serde(rename = "nodeID")]
    pub node_id: String,
    /// Lookup command name.
    pub execution_type: String,
    /// Requesting client.
    pub client_id: String,
}

/// What a check found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCheck {
    /// The file already names the current address.
    Unchanged(Ipv4Addr),
    /// The file was rewritten.
    Updated {
        /// Address previously in the file.
        from: Ipv4Addr,
        /// Address now in the file.
        to: Ipv4Addr,
    },
}

/// Keeps the adapter `Host` line in the agent file current.
pub struct AdapterHostMonitor<T: ShadowTransport> {
    side_channel: Arc<SideChannel<T>>,
    request_topic: String,
    request: LookupRequest,
    cfg_file: PathBuf,
    machine: String,
    timeout: Option<Duration>,
}

impl<T: ShadowTransport + 'static> AdapterHostMonitor<T> {
    /// Creates a monitor.
    pub fn new(
        side_channel: Arc<SideChannel<T>>,
        request_topic: impl Into<String>,
        request: LookupRequest,
        cfg_file: impl Into<PathBuf>,
        machine: impl Into<String>,
    ) -> Self {
        Self {
            side_channel,
            request_topic: request_topic.into(),
            request,
            cfg_file: cfg_file.into(),
            machine: machine.into(),
            timeout: None,
        }
    }

    /// Builds a monitor from the agent configuration, if monitoring is set up.
    pub fn from_config(config: &AgentConfig, side_channel: Arc<SideChannel<T>>) -> Option<Self> {
        let ssm = config.ssm.as_ref()?;
        let agent = config.agent.as_ref()?;
        let request_topic = config.ssm_request_topic()?;
        let request = LookupRequest {
            node_id: ssm.node_id.clone(),
            execution_type: ssm.execution_type.clone(),
            client_id: config.aws.client_id.clone(),
        };
        let mut monitor = Self::new(
            side_channel,
            request_topic,
            request,
            &agent.cfg_file,
            &config.adapter.machine_name,
        );
        monitor.timeout = config.timeouts.side_channel_secs.map(Duration::from_secs);
        Some(monitor)
    }

    /// Compares the file against the parameter service and fixes the file.
    ///
    /// Blocks while waiting for the side channel; never call this from the
    /// dispatch context.
    pub fn check(&self) -> AgentResult<HostCheck> {
        let configured = read_host(&self.cfg_file, &self.machine)?;
        let response = self
            .side_channel
            .request(&self.request_topic, &self.request, self.timeout)?;
        let current = parse_lookup_response(&response)?;

        let from = validate_address(&configured, "agent configuration")?;
        let to = validate_address(&current, "parameter service")?;
        if from == to {
            info!("Adapter address matches ({})", from);
            return Ok(HostCheck::Unchanged(from));
        }

        rewrite_host(&self.cfg_file, &self.machine, &configured, &current)?;
        info!("Adapter address has been updated from {} to {}", from, to);
        Ok(HostCheck::Updated { from, to })
    }

    /// Checks every `interval` until stopped or until a check fails.
    pub fn run(&self, interval: Duration, stop: &StopFlag) -> AgentResult<()> {
        while !stop.sleep(interval) {
            if let Err(e) = self.check() {
                warn!("Adapter address check failed: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }
}
