use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub flowdock: FlowdockConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FlowdockConfig {
    pub api_token: String,
    /// Nick the bot is registered under; also the mention handle users type.
    pub bot_name: String,
    pub organization: String,
    pub flows: Flows,
    #[serde(default)]
    pub thread_responses: ThreadResponses,
}

/// `flows = "main"` and `flows = ["main", "dev"]` are both accepted.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum Flows {
    One(String),
    Many(Vec<String>),
}

impl Flows {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Flows::One(flow) => vec![flow.clone()],
            Flows::Many(flows) => flows.clone(),
        }
    }
}

/// Whether public replies thread under the message they answer.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreadResponses {
    #[default]
    Enabled,
    Disabled,
}

impl ThreadResponses {
    pub fn is_enabled(self) -> bool {
        self == ThreadResponses::Enabled
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [flowdock]
            api_token = "46d96d3c91623d4cb6235bb94ac771fb"
            bot_name = "lita"
            organization = "lita-test"
            flows = ["test-flow", "other-flow"]
            thread_responses = "disabled"
            "#,
        )
        .unwrap();

        assert_eq!(config.flowdock.bot_name, "lita");
        assert_eq!(config.flowdock.flows.to_vec(), ["test-flow", "other-flow"]);
        assert!(!config.flowdock.thread_responses.is_enabled());
    }

    #[test]
    fn test_flows_accepts_a_single_string() {
        let config: Config = toml::from_str(
            r#"
            [flowdock]
            api_token = "t"
            bot_name = "lita"
            organization = "acme"
            flows = "main"
            "#,
        )
        .unwrap();

        assert_eq!(config.flowdock.flows.to_vec(), ["main"]);
    }

    #[test]
    fn test_thread_responses_defaults_to_enabled() {
        let config: Config = toml::from_str(
            r#"
            [flowdock]
            api_token = "t"
            bot_name = "lita"
            organization = "acme"
            flows = "main"
            "#,
        )
        .unwrap();

        assert!(config.flowdock.thread_responses.is_enabled());
    }

    #[test]
    fn test_missing_required_option_is_an_error() {
        let result: std::result::Result<Config, _> = toml::from_str(
            r#"
            [flowdock]
            bot_name = "lita"
            organization = "acme"
            flows = "main"
            "#,
        );
        assert!(result.is_err());
    }
}
