use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::types::error::{GroupChatError, GroupChatResult};

pub const ENV_MAX_ROUNDS: &str = "GROUP_CHAT_MAX_ROUNDS";
pub const ENV_RESULT_TIMEOUT_SECS: &str = "GROUP_CHAT_RESULT_TIMEOUT_SECS";
pub const ENV_LOG_LEVEL: &str = "GROUP_CHAT_LOG_LEVEL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantConfig {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub replies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanInTheLoopConfig {
    /// Ask for feedback right after this participant speaks.
    pub after_agent: String,
    pub approval_keyword: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupChatConfig {
    pub task: String,
    pub max_rounds: Option<u32>,
    pub result_timeout_secs: Option<u64>,
    pub log_level: String,
    pub participants: Vec<ParticipantConfig>,
    pub human_in_the_loop: Option<HumanInTheLoopConfig>,
}

impl Default for GroupChatConfig {
    fn default() -> Self {
        Self {
            task: "Create a slogan for a new electric SUV that is affordable and fun to drive.".to_string(),
            max_rounds: Some(5),
            result_timeout_secs: Some(60),
            log_level: "info".to_string(),
            participants: vec![
                ParticipantConfig {
                    name: "Writer".to_string(),
                    description: Some("A content writer.".to_string()),
                    replies: vec![
                        "Drive the future, charge the fun.".to_string(),
                        "Electrify every mile without emptying your wallet.".to_string(),
                    ],
                },
                ParticipantConfig {
                    name: "Reviewer".to_string(),
                    description: Some("A content reviewer.".to_string()),
                    replies: vec![
                        "Catchy, but mention affordability.".to_string(),
                        "Good. This one is ready.".to_string(),
                    ],
                },
            ],
            human_in_the_loop: None,
        }
    }
}

impl GroupChatConfig {
    /// Reads a YAML file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> GroupChatResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GroupChatError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> GroupChatResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| GroupChatError::Configuration(format!("invalid configuration: {e}")))
    }

    /// File (when given) or defaults, then `.env` and environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> GroupChatResult<Self> {
        dotenv::dotenv().ok();
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// `lookup` maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> GroupChatResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_ROUNDS) {
            self.max_rounds = if raw.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(parse_number(ENV_MAX_ROUNDS, &raw)?)
            };
        }
        if let Some(raw) = lookup(ENV_RESULT_TIMEOUT_SECS) {
            self.result_timeout_secs = Some(parse_number(ENV_RESULT_TIMEOUT_SECS, &raw)?);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> GroupChatResult<()> {
        if self.participants.is_empty() {
            return Err(GroupChatError::Configuration("no participants configured".to_string()));
        }
        for (i, participant) in self.participants.iter().enumerate() {
            if participant.description.as_deref().map_or(true, |d| d.trim().is_empty()) {
                return Err(GroupChatError::Configuration(format!(
                    "participant '{}' needs a description",
                    participant.name
                )));
            }
            if self.participants[..i].iter().any(|p| p.name == participant.name) {
                return Err(GroupChatError::Configuration(format!(
                    "duplicate participant '{}'",
                    participant.name
                )));
            }
        }
        if let Some(hitl) = &self.human_in_the_loop {
            if !self.participants.iter().any(|p| p.name == hitl.after_agent) {
                return Err(GroupChatError::Configuration(format!(
                    "human review follows unknown participant '{}'",
                    hitl.after_agent
                )));
            }
            if hitl.approval_keyword.trim().is_empty() {
                return Err(GroupChatError::Configuration("approval keyword is empty".to_string()));
            }
        }
        self.tracing_level()?;
        Ok(())
    }

    pub fn result_timeout(&self) -> Option<Duration> {
        self.result_timeout_secs.map(Duration::from_secs)
    }

    pub fn tracing_level(&self) -> GroupChatResult<Level> {
        self.log_level
            .parse()
            .map_err(|_| GroupChatError::Configuration(format!("unknown log level '{}'", self.log_level)))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> GroupChatResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| GroupChatError::Configuration(format!("{key} must be a non-negative integer, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = GroupChatConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tracing_level().unwrap(), Level::INFO);
        assert_eq!(config.result_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn loads_yaml_file_with_defaults_for_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "task: write a haiku\nmax_rounds: 2\nparticipants:\n  - name: Poet\n    description: writes poems\n    replies: [\"old pond\"]\nhuman_in_the_loop:\n  after_agent: Poet\n  approval_keyword: approve\n"
        )
        .unwrap();

        let config = GroupChatConfig::from_file(file.path()).unwrap();
        assert_eq!(config.task, "write a haiku");
        assert_eq!(config.max_rounds, Some(2));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.participants.len(), 1);
        assert_eq!(config.participants[0].replies, vec!["old pond".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = GroupChatConfig::from_file(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, GroupChatError::Configuration(_)));
    }

    #[test]
    fn environment_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_MAX_ROUNDS, "none"),
            (ENV_RESULT_TIMEOUT_SECS, "5"),
            (ENV_LOG_LEVEL, "debug"),
        ]);
        let mut config = GroupChatConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_rounds, None);
        assert_eq!(config.result_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.tracing_level().unwrap(), Level::DEBUG);

        let err = config
            .apply_overrides(|key| (key == ENV_MAX_ROUNDS).then(|| "-1".to_string()))
            .unwrap_err();
        assert!(matches!(err, GroupChatError::Configuration(_)));
    }

    #[test]
    fn validation_rejects_bad_settings() {
        let mut config = GroupChatConfig::default();
        config.human_in_the_loop = Some(HumanInTheLoopConfig {
            after_agent: "Editor".to_string(),
            approval_keyword: "approve".to_string(),
        });
        assert!(config.validate().is_err());

        let mut config = GroupChatConfig::default();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let config = GroupChatConfig {
            participants: Vec::new(),
            ..GroupChatConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = GroupChatConfig::default();
        config.participants[1].name = "Writer".to_string();
        assert!(config.validate().is_err());

        let mut config = GroupChatConfig::default();
        config.participants[0].description = None;
        assert!(config.validate().is_err());
    }
}
