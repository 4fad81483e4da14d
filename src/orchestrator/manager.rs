use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::types::error::{GroupChatError, GroupChatResult};
use crate::types::message::{AuthorRole, ChatHistory, ChatMessageContent};

// === Decision results ===

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BooleanResult {
    pub result: bool,
    pub reason: String,
}

impl BooleanResult {
    pub fn new(result: bool, reason: impl Into<String>) -> Self {
        Self {
            result,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringResult {
    pub result: String,
    pub reason: String,
}

impl StringResult {
    pub fn new(result: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResult {
    pub result: ChatMessageContent,
    pub reason: String,
}

impl MessageResult {
    pub fn new(result: ChatMessageContent, reason: impl Into<String>) -> Self {
        Self {
            result,
            reason: reason.into(),
        }
    }
}

// === Participants ===

/// Participant name to description, in the order the members were supplied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantDescriptions {
    entries: Vec<(String, String)>,
}

impl ParticipantDescriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a participant. Returns false if the name is already present.
    pub fn insert(&mut self, name: impl Into<String>, description: impl Into<String>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.entries.push((name, description.into()));
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d.as_str()))
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, D: Into<String>> FromIterator<(N, D)> for ParticipantDescriptions {
    fn from_iter<T: IntoIterator<Item = (N, D)>>(iter: T) -> Self {
        let mut descriptions = Self::new();
        for (name, description) in iter {
            descriptions.insert(name, description);
        }
        descriptions
    }
}

// === Human in the loop ===

pub type HumanResponseFuture = BoxFuture<'static, anyhow::Result<ChatMessageContent>>;

/// Produces a human message from the current history, either synchronously or asynchronously.
#[derive(Clone)]
pub enum HumanResponseFunction {
    Sync(Arc<dyn Fn(ChatHistory) -> anyhow::Result<ChatMessageContent> + Send + Sync>),
    Async(Arc<dyn Fn(ChatHistory) -> HumanResponseFuture + Send + Sync>),
}

impl HumanResponseFunction {
    pub fn from_sync<F>(f: F) -> Self
    where
        F: Fn(ChatHistory) -> anyhow::Result<ChatMessageContent> + Send + Sync + 'static,
    {
        HumanResponseFunction::Sync(Arc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(ChatHistory) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ChatMessageContent>> + Send + 'static,
    {
        HumanResponseFunction::Async(Arc::new(move |history| -> HumanResponseFuture {
            Box::pin(f(history))
        }))
    }

    pub async fn call(&self, chat_history: ChatHistory) -> GroupChatResult<ChatMessageContent> {
        let response = match self {
            HumanResponseFunction::Sync(f) => f(chat_history),
            HumanResponseFunction::Async(f) => f(chat_history).await,
        };
        response.map_err(GroupChatError::human_response)
    }
}

impl fmt::Debug for HumanResponseFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HumanResponseFunction::Sync(_) => f.write_str("HumanResponseFunction::Sync"),
            HumanResponseFunction::Async(_) => f.write_str("HumanResponseFunction::Async"),
        }
    }
}

// === Manager contract ===

/// Decision points of a group chat, consulted by the manager actor after every
/// message in the order: user input, termination, next speaker.
///
/// Each method receives its own copy of the chat history. Mutating it has no
/// effect on the conversation.
#[async_trait]
pub trait GroupChatManager: Send + Sync {
    fn human_response_function(&self) -> Option<&HumanResponseFunction> {
        None
    }

    async fn should_request_user_input(&self, chat_history: ChatHistory) -> GroupChatResult<BooleanResult>;

    /// Must be called once per turn: implementations built on
    /// [`GroupChatManagerBase::should_terminate`] advance the round counter on
    /// every call.
    async fn should_terminate(&self, chat_history: ChatHistory) -> GroupChatResult<BooleanResult>;

    async fn select_next_agent(
        &self,
        chat_history: ChatHistory,
        participant_descriptions: &ParticipantDescriptions,
    ) -> GroupChatResult<StringResult>;

    async fn filter_results(&self, chat_history: ChatHistory) -> GroupChatResult<MessageResult>;
}

/// State and default termination rule shared by concrete managers.
#[derive(Debug, Default)]
pub struct GroupChatManagerBase {
    current_round: AtomicU32,
    max_rounds: Option<u32>,
    human_response_function: Option<HumanResponseFunction>,
}

impl GroupChatManagerBase {
    pub fn new(max_rounds: Option<u32>) -> Self {
        Self {
            current_round: AtomicU32::new(0),
            max_rounds,
            human_response_function: None,
        }
    }

    pub fn with_human_response_function(mut self, f: HumanResponseFunction) -> Self {
        self.human_response_function = Some(f);
        self
    }

    pub fn current_round(&self) -> u32 {
        self.current_round.load(Ordering::SeqCst)
    }

    pub fn max_rounds(&self) -> Option<u32> {
        self.max_rounds
    }

    pub fn human_response_function(&self) -> Option<&HumanResponseFunction> {
        self.human_response_function.as_ref()
    }

    /// Advances the round counter, then terminates iff it passed `max_rounds`.
    pub fn should_terminate(&self) -> BooleanResult {
        let round = self.current_round.fetch_add(1, Ordering::SeqCst) + 1;
        match self.max_rounds {
            Some(max_rounds) if round > max_rounds => BooleanResult::new(true, "Maximum rounds reached."),
            Some(_) => BooleanResult::new(false, "Not reached maximum rounds."),
            None => BooleanResult::new(false, "No maximum rounds set."),
        }
    }
}

// === Round robin ===

/// Cycles through participants in the order they were supplied.
#[derive(Debug, Default)]
pub struct RoundRobinGroupChatManager {
    base: GroupChatManagerBase,
    current_index: AtomicUsize,
}

impl RoundRobinGroupChatManager {
    pub fn new(max_rounds: Option<u32>) -> Self {
        Self {
            base: GroupChatManagerBase::new(max_rounds),
            current_index: AtomicUsize::new(0),
        }
    }

    pub fn with_human_response_function(mut self, f: HumanResponseFunction) -> Self {
        self.base = self.base.with_human_response_function(f);
        self
    }

    pub fn base(&self) -> &GroupChatManagerBase {
        &self.base
    }

    pub fn current_round(&self) -> u32 {
        self.base.current_round()
    }

    pub fn current_index(&self) -> usize {
        self.current_index.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupChatManager for RoundRobinGroupChatManager {
    fn human_response_function(&self) -> Option<&HumanResponseFunction> {
        self.base.human_response_function()
    }

    async fn should_request_user_input(&self, _chat_history: ChatHistory) -> GroupChatResult<BooleanResult> {
        Ok(BooleanResult::new(
            false,
            "The default round-robin group chat manager does not request user input.",
        ))
    }

    async fn should_terminate(&self, _chat_history: ChatHistory) -> GroupChatResult<BooleanResult> {
        Ok(self.base.should_terminate())
    }

    async fn select_next_agent(
        &self,
        _chat_history: ChatHistory,
        participant_descriptions: &ParticipantDescriptions,
    ) -> GroupChatResult<StringResult> {
        let count = participant_descriptions.len();
        if count == 0 {
            return Err(GroupChatError::Manager("no participants to select from".to_string()));
        }

        let previous = self
            .current_index
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i % count + 1) % count))
            .unwrap_or_else(|i| i);
        let next_agent = participant_descriptions
            .name_at(previous % count)
            .ok_or_else(|| GroupChatError::Manager("participant index out of range".to_string()))?;

        Ok(StringResult::new(next_agent, "Round-robin selection."))
    }

    async fn filter_results(&self, chat_history: ChatHistory) -> GroupChatResult<MessageResult> {
        let last = chat_history.into_messages().pop().ok_or_else(|| {
            GroupChatError::Protocol("cannot filter results of an empty chat history".to_string())
        })?;
        Ok(MessageResult::new(
            last,
            "The last message in the chat history is the result in the default round-robin group chat manager.",
        ))
    }
}

// === Human in the loop ===

/// Round robin that asks a human for feedback after a given agent speaks and
/// ends the chat once the human approves.
#[derive(Debug)]
pub struct HumanInTheLoopGroupChatManager {
    inner: RoundRobinGroupChatManager,
    review_after: String,
    approval_keyword: String,
}

impl HumanInTheLoopGroupChatManager {
    pub fn new(
        max_rounds: Option<u32>,
        review_after: impl Into<String>,
        approval_keyword: impl Into<String>,
        human_response_function: HumanResponseFunction,
    ) -> Self {
        Self {
            inner: RoundRobinGroupChatManager::new(max_rounds)
                .with_human_response_function(human_response_function),
            review_after: review_after.into(),
            approval_keyword: approval_keyword.into(),
        }
    }

    pub fn current_round(&self) -> u32 {
        self.inner.current_round()
    }

    fn is_approval(&self, message: &ChatMessageContent) -> bool {
        message.role == AuthorRole::User
            && message
                .content
                .to_lowercase()
                .contains(&self.approval_keyword.to_lowercase())
    }
}

#[async_trait]
impl GroupChatManager for HumanInTheLoopGroupChatManager {
    fn human_response_function(&self) -> Option<&HumanResponseFunction> {
        self.inner.human_response_function()
    }

    async fn should_request_user_input(&self, chat_history: ChatHistory) -> GroupChatResult<BooleanResult> {
        let last = chat_history
            .last()
            .ok_or_else(|| GroupChatError::Protocol("no agent has been selected yet".to_string()))?;

        if last.name.as_deref() == Some(self.review_after.as_str()) {
            return Ok(BooleanResult::new(
                true,
                format!("Requesting human feedback on the latest message from {}.", self.review_after),
            ));
        }
        Ok(BooleanResult::new(
            false,
            format!("The last message was not written by {}.", self.review_after),
        ))
    }

    async fn should_terminate(&self, chat_history: ChatHistory) -> GroupChatResult<BooleanResult> {
        let base = self.inner.should_terminate(chat_history.clone()).await?;
        if base.result {
            return Ok(base);
        }

        if chat_history.last().is_some_and(|m| self.is_approval(m)) {
            return Ok(BooleanResult::new(true, "The user approved the result."));
        }
        Ok(base)
    }

    async fn select_next_agent(
        &self,
        chat_history: ChatHistory,
        participant_descriptions: &ParticipantDescriptions,
    ) -> GroupChatResult<StringResult> {
        self.inner
            .select_next_agent(chat_history, participant_descriptions)
            .await
    }

    /// The reviewed agent's latest message, or the last message if it never spoke.
    async fn filter_results(&self, chat_history: ChatHistory) -> GroupChatResult<MessageResult> {
        let reviewed = chat_history
            .messages()
            .iter()
            .rev()
            .find(|m| m.name.as_deref() == Some(self.review_after.as_str()))
            .cloned();

        match reviewed {
            Some(message) => Ok(MessageResult::new(
                message,
                format!("The latest message from {} is the result.", self.review_after),
            )),
            None => self.inner.filter_results(chat_history).await,
        }
    }
}
