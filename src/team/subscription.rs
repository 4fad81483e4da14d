use std::collections::HashMap;

use uuid::Uuid;

use crate::team::agent_id::{AgentId, AgentType, TopicId};
use crate::types::error::{GroupChatError, GroupChatResult};

/// Routes every topic whose type equals `topic_type` to `agent_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSubscription {
    id: String,
    topic_type: String,
    agent_type: AgentType,
}

impl TypeSubscription {
    pub fn new(topic_type: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic_type: topic_type.into(),
            agent_type,
        }
    }

    pub fn topic_type(&self) -> &str {
        &self.topic_type
    }

    pub fn agent_type(&self) -> &AgentType {
        &self.agent_type
    }
}

/// Routes every topic whose type starts with `topic_type_prefix` to `agent_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypePrefixSubscription {
    id: String,
    topic_type_prefix: String,
    agent_type: AgentType,
}

impl TypePrefixSubscription {
    pub fn new(topic_type_prefix: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic_type_prefix: topic_type_prefix.into(),
            agent_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscription {
    Type(TypeSubscription),
    TypePrefix(TypePrefixSubscription),
}

impl Subscription {
    pub fn id(&self) -> &str {
        match self {
            Subscription::Type(s) => &s.id,
            Subscription::TypePrefix(s) => &s.id,
        }
    }

    pub fn agent_type(&self) -> &AgentType {
        match self {
            Subscription::Type(s) => &s.agent_type,
            Subscription::TypePrefix(s) => &s.agent_type,
        }
    }

    pub fn is_match(&self, topic: &TopicId) -> bool {
        match self {
            Subscription::Type(s) => topic.topic_type() == s.topic_type,
            Subscription::TypePrefix(s) => topic.topic_type().starts_with(&s.topic_type_prefix),
        }
    }

    /// The recipient for `topic`: the subscribed agent type, keyed by the topic source.
    pub fn map_to_agent(&self, topic: &TopicId) -> GroupChatResult<AgentId> {
        if !self.is_match(topic) {
            return Err(GroupChatError::Runtime(format!(
                "topic {topic} does not match subscription {}",
                self.id()
            )));
        }
        Ok(AgentId::new(self.agent_type().clone(), topic.source()))
    }
}

impl From<TypeSubscription> for Subscription {
    fn from(s: TypeSubscription) -> Self {
        Subscription::Type(s)
    }
}

impl From<TypePrefixSubscription> for Subscription {
    fn from(s: TypePrefixSubscription) -> Self {
        Subscription::TypePrefix(s)
    }
}

/// Subscription table with a per-topic recipient cache.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subscriptions: Vec<Subscription>,
    subscribed_recipients: HashMap<TopicId, Vec<AgentId>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subscription(&mut self, subscription: Subscription) -> GroupChatResult<()> {
        if self.subscriptions.iter().any(|s| s.id() == subscription.id()) {
            return Err(GroupChatError::Runtime(format!(
                "subscription {} already exists",
                subscription.id()
            )));
        }
        self.subscriptions.push(subscription);
        self.subscribed_recipients.clear();
        Ok(())
    }

    pub fn remove_subscription(&mut self, id: &str) -> GroupChatResult<()> {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id() != id);
        if self.subscriptions.len() == before {
            return Err(GroupChatError::Runtime(format!("subscription {id} does not exist")));
        }
        self.subscribed_recipients.clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Recipients of `topic` in subscription order, without duplicates.
    pub fn get_subscribed_recipients(&mut self, topic: &TopicId) -> GroupChatResult<Vec<AgentId>> {
        if let Some(recipients) = self.subscribed_recipients.get(topic) {
            return Ok(recipients.clone());
        }

        let recipients = self.calculate_recipients(topic)?;
        self.subscribed_recipients.insert(topic.clone(), recipients.clone());
        Ok(recipients)
    }

    fn calculate_recipients(&self, topic: &TopicId) -> GroupChatResult<Vec<AgentId>> {
        let mut recipients: Vec<AgentId> = Vec::new();
        for subscription in self.subscriptions.iter().filter(|s| s.is_match(topic)) {
            let agent_id = subscription.map_to_agent(topic)?;
            if !recipients.contains(&agent_id) {
                recipients.push(agent_id);
            }
        }
        Ok(recipients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_type(name: &str) -> AgentType {
        AgentType::new(name).unwrap()
    }

    #[test]
    fn type_subscription_maps_topic_source_to_key() {
        let sub: Subscription = TypeSubscription::new("chat", agent_type("Writer")).into();
        let topic = TopicId::new("chat", "run-1").unwrap();
        let id = sub.map_to_agent(&topic).unwrap();
        assert_eq!(id.to_string(), "Writer/run-1");

        let other = TopicId::new("chatter", "run-1").unwrap();
        assert!(!sub.is_match(&other));
        assert!(sub.map_to_agent(&other).is_err());
    }

    #[test]
    fn prefix_subscription_matches_by_prefix() {
        let sub: Subscription = TypePrefixSubscription::new("chat", agent_type("Logger")).into();
        assert!(sub.is_match(&TopicId::new("chatter", "x").unwrap()));
        assert!(!sub.is_match(&TopicId::new("other", "x").unwrap()));
    }

    #[test]
    fn recipients_are_deduplicated_and_cache_is_invalidated() {
        let mut manager = SubscriptionManager::new();
        let topic = TopicId::new("chat", "default").unwrap();

        manager
            .add_subscription(TypeSubscription::new("chat", agent_type("Writer")).into())
            .unwrap();
        manager
            .add_subscription(TypePrefixSubscription::new("ch", agent_type("Writer")).into())
            .unwrap();
        assert_eq!(manager.get_subscribed_recipients(&topic).unwrap().len(), 1);

        let reviewer: Subscription = TypeSubscription::new("chat", agent_type("Reviewer")).into();
        let reviewer_id = reviewer.id().to_string();
        manager.add_subscription(reviewer).unwrap();
        let recipients = manager.get_subscribed_recipients(&topic).unwrap();
        assert_eq!(
            recipients.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
            vec!["Writer/default", "Reviewer/default"]
        );

        manager.remove_subscription(&reviewer_id).unwrap();
        assert_eq!(manager.get_subscribed_recipients(&topic).unwrap().len(), 1);
        assert!(manager.remove_subscription(&reviewer_id).is_err());
    }
}
