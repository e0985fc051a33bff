//! Topics command implementation.

use serde::Serialize;
use shadow_agent::AgentConfig;
use shadow_protocol::TopicKind;

/// One topic the agent uses.
#[derive(Debug, Serialize)]
pub struct TopicEntry {
    /// What the topic carries.
    pub role: &'static str,
    /// Full topic name.
    pub topic: String,
    /// True if the agent subscribes to it.
    pub subscribed: bool,
}

/// Lists every topic derived from `config`.
pub fn entries(config: &AgentConfig) -> Vec<TopicEntry> {
    let topics = config.shadow_config().topics();
    let mut entries = vec![
        TopicEntry {
            role: "update",
            topic: topics.topic(TopicKind::Update),
            subscribed: false,
        },
        TopicEntry {
            role: "get",
            topic: topics.topic(TopicKind::Get),
            subscribed: false,
        },
    ];
    entries.extend(TopicKind::subscriptions().into_iter().map(|kind| TopicEntry {
        role: kind.suffix(),
        topic: topics.topic(kind),
        subscribed: true,
    }));
    entries.push(TopicEntry {
        role: "status",
        topic: config.status_topic(),
        subscribed: false,
    });
    entries.push(TopicEntry {
        role: "params",
        topic: config.params_topic(),
        subscribed: true,
    });
    if let Some(topic) = config.ssm_request_topic() {
        entries.push(TopicEntry {
            role: "ssm request",
            topic,
            subscribed: false,
        });
    }
    entries
}

/// Runs the topics command.
pub fn run(config: &AgentConfig, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let entries = entries(config);
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        "text" => {
            println!("Topics for {}:", config.aws.client_id);
            for entry in &entries {
                let marker = if entry.subscribed { "sub" } else { "pub" };
                println!("  [{}] {:<16} {}", marker, entry.role, entry.topic);
            }
        }
        other => return Err(format!("Unknown format: {}", other).into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_shadow_and_agent_topics() {
        let config = AgentConfig::from_json(
            r#"{
                "aws": { "client_id": "robonano-01" },
                "SSM": { "topic_ssm_params": "ssm/params", "nodeID": "mi-0abc", "execution_type": "adapter_ip" },
                "adapter": { "machine_name": "ROBONANO" }
            }"#,
        )
        .unwrap();

        let entries = entries(&config);

        assert_eq!(entries.len(), 10);
        assert_eq!(entries.iter().filter(|e| e.subscribed).count(), 6);
        assert_eq!(
            entries[0].topic,
            "$aws/things/robonano-01/shadow/name/daq_state/update"
        );
        assert!(entries
            .iter()
            .any(|e| e.topic == "$aws/things/robonano-01/shadow/name/daq_state/update/delta"));
        assert_eq!(entries[9].topic, "ssm/params/robonano-01");
    }
}
