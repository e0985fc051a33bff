//! Adapter-host command implementation.

use shadow_agent::adapter::{read_host, validate_address};
use shadow_agent::AgentConfig;

/// Runs the adapter-host command.
pub fn run(config: &AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    let agent = config
        .agent
        .as_ref()
        .ok_or("No MTConnect agent section in the configuration")?;
    let machine = &config.adapter.machine_name;
    let host = read_host(&agent.cfg_file, machine)?;

    match validate_address(&host, "agent configuration") {
        Ok(address) => println!("{}: {}", machine, address),
        Err(e) => {
            println!("{}: {} (invalid)", machine, host);
            return Err(e.into());
        }
    }
    Ok(())
}
