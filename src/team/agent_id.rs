use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::error::{GroupChatError, GroupChatResult};

lazy_static! {
    static ref AGENT_TYPE_PATTERN: Regex = Regex::new(r"^[\w\-\.]+$").expect("valid agent type pattern");
    static ref TOPIC_TYPE_PATTERN: Regex = Regex::new(r"^[\w\-\.:=]+$").expect("valid topic type pattern");
}

pub const DEFAULT_KEY: &str = "default";

/// Logical actor type, the key a factory is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentType(String);

impl AgentType {
    pub fn new(name: impl Into<String>) -> GroupChatResult<Self> {
        let name = name.into();
        if !AGENT_TYPE_PATTERN.is_match(&name) {
            return Err(GroupChatError::InvalidIdentifier(format!(
                "agent type '{name}' must only contain alphanumeric characters, '_', '-' or '.'"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of one actor instance: `type/key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId {
    agent_type: AgentType,
    key: String,
}

impl AgentId {
    pub fn new(agent_type: AgentType, key: impl Into<String>) -> Self {
        Self {
            agent_type,
            key: key.into(),
        }
    }

    pub fn parse_parts(agent_type: &str, key: &str) -> GroupChatResult<Self> {
        Ok(Self::new(AgentType::new(agent_type)?, key))
    }

    pub fn agent_type(&self) -> &AgentType {
        &self.agent_type
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent_type, self.key)
    }
}

impl FromStr for AgentId {
    type Err = GroupChatError;

    fn from_str(agent_id: &str) -> Result<Self, Self::Err> {
        match agent_id.split_once('/') {
            Some((agent_type, key)) => Self::parse_parts(agent_type, key),
            None => Err(GroupChatError::InvalidIdentifier(format!(
                "invalid agent id '{agent_id}', expected 'type/key'"
            ))),
        }
    }
}

/// A broadcast channel address: `type/source`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicId {
    topic_type: String,
    source: String,
}

impl TopicId {
    pub fn new(topic_type: impl Into<String>, source: impl Into<String>) -> GroupChatResult<Self> {
        let topic_type = topic_type.into();
        if !TOPIC_TYPE_PATTERN.is_match(&topic_type) {
            return Err(GroupChatError::InvalidIdentifier(format!(
                "topic type '{topic_type}' must only contain alphanumeric characters, '_', '-', '.', ':' or '='"
            )));
        }
        Ok(Self {
            topic_type,
            source: source.into(),
        })
    }

    pub fn topic_type(&self) -> &str {
        &self.topic_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic_type, self.source)
    }
}

impl FromStr for TopicId {
    type Err = GroupChatError;

    fn from_str(topic_id: &str) -> Result<Self, Self::Err> {
        match topic_id.split_once('/') {
            Some((topic_type, source)) => Self::new(topic_type, source),
            None => Err(GroupChatError::InvalidIdentifier(format!(
                "invalid topic id '{topic_id}', expected 'type/source'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn agent_type_grammar() {
        assert!(AgentType::new("Writer_3f2a").is_ok());
        assert!(AgentType::new("group-chat.v1").is_ok());
        assert!(AgentType::new("has space").is_err());
        assert!(AgentType::new("slash/type").is_err());
        assert!(AgentType::new("").is_err());
    }

    #[test]
    fn agent_id_equality_and_hash_use_type_and_key() {
        let a = AgentId::parse_parts("Writer", "default").unwrap();
        let b: AgentId = "Writer/default".parse().unwrap();
        let c = AgentId::parse_parts("Writer", "other").unwrap();

        let set: HashSet<_> = [a.clone(), b.clone(), c.clone()].into_iter().collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(set.len(), 2);
        assert_eq!(a.to_string(), "Writer/default");
    }

    #[test]
    fn topic_id_allows_colon_and_equals() {
        let topic = TopicId::new("chat:room=1", "default").unwrap();
        assert_eq!(topic.to_string(), "chat:room=1/default");
        assert!(TopicId::new("bad topic", "default").is_err());
        assert!("no-separator".parse::<TopicId>().is_err());
    }
}
