use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agents::agent::Agent;
use crate::orchestrator::manager::{GroupChatManager, ParticipantDescriptions};
use crate::orchestrator::manager_actor::{GroupChatManagerActor, MANAGER_ACTOR_NAME};
use crate::orchestrator::result::{OrchestrationResult, ResultCompleter};
use crate::team::agent_id::{AgentId, AgentType};
use crate::team::container::GroupChatAgentActor;
use crate::team::runtime::{Actor, ActorFactory, CoreRuntime};
use crate::team::subscription::{Subscription, TypeSubscription};
use crate::types::error::{GroupChatError, GroupChatResult};
use crate::types::event::{GroupChatStartMessage, StartBody};
use crate::types::message::ChatMessageContent;

/// Receives the filtered final message once the chat terminates.
pub type ResultCallback = Arc<dyn Fn(ChatMessageContent) -> BoxFuture<'static, ()> + Send + Sync>;
/// Sees every complete agent response before it is broadcast.
pub type AgentResponseCallback = Arc<dyn Fn(&ChatMessageContent) + Send + Sync>;
/// Sees every streamed chunk; the flag marks the last chunk of a response.
pub type StreamingAgentResponseCallback = Arc<dyn Fn(&ChatMessageContent, bool) + Send + Sync>;
pub type ExceptionCallback = Arc<dyn Fn(GroupChatError) + Send + Sync>;

/// A group chat among `members`, refereed by `manager`.
pub struct GroupChatOrchestration {
    members: Vec<Arc<dyn Agent>>,
    manager: Arc<dyn GroupChatManager>,
    participant_descriptions: ParticipantDescriptions,
    agent_response_callback: Option<AgentResponseCallback>,
    streaming_agent_response_callback: Option<StreamingAgentResponseCallback>,
}

impl GroupChatOrchestration {
    /// Fails if there are no members, a member has no description, or two members share a name.
    pub fn new(members: Vec<Arc<dyn Agent>>, manager: Arc<dyn GroupChatManager>) -> GroupChatResult<Self> {
        if members.is_empty() {
            return Err(GroupChatError::Configuration(
                "a group chat needs at least one member".to_string(),
            ));
        }

        let mut participant_descriptions = ParticipantDescriptions::new();
        for member in &members {
            let description = member.description().ok_or_else(|| {
                GroupChatError::Configuration(format!(
                    "agent '{}' must have a description",
                    member.name()
                ))
            })?;
            if !participant_descriptions.insert(member.name(), description) {
                return Err(GroupChatError::Configuration(format!(
                    "duplicate member name '{}'",
                    member.name()
                )));
            }
        }

        Ok(Self {
            members,
            manager,
            participant_descriptions,
            agent_response_callback: None,
            streaming_agent_response_callback: None,
        })
    }

    pub fn with_agent_response_callback(mut self, callback: AgentResponseCallback) -> Self {
        self.agent_response_callback = Some(callback);
        self
    }

    pub fn with_streaming_agent_response_callback(mut self, callback: StreamingAgentResponseCallback) -> Self {
        self.streaming_agent_response_callback = Some(callback);
        self
    }

    pub fn participant_descriptions(&self) -> &ParticipantDescriptions {
        &self.participant_descriptions
    }

    pub async fn invoke(
        &self,
        task: impl Into<StartBody>,
        runtime: Arc<dyn CoreRuntime>,
    ) -> GroupChatResult<OrchestrationResult> {
        self.invoke_with_token(task, runtime, CancellationToken::new()).await
    }

    /// Registers this run's actors on `runtime` and starts the chat in the background.
    pub async fn invoke_with_token(
        &self,
        task: impl Into<StartBody>,
        runtime: Arc<dyn CoreRuntime>,
        cancellation_token: CancellationToken,
    ) -> GroupChatResult<OrchestrationResult> {
        let start = GroupChatStartMessage::new(task);
        let internal_topic_type = Uuid::new_v4().simple().to_string();
        let handle = OrchestrationResult::new(cancellation_token.clone());
        let completer = handle.completer();

        let result_callback: ResultCallback = {
            let completer = completer.clone();
            Arc::new(move |message: ChatMessageContent| {
                completer.complete(Ok(message));
                async {}.boxed()
            })
        };
        let exception_callback: ExceptionCallback = {
            let completer = completer.clone();
            Arc::new(move |err: GroupChatError| {
                completer.complete(Err(err));
            })
        };

        let recipients = self
            .prepare(runtime.as_ref(), &internal_topic_type, result_callback, exception_callback)
            .await?;
        info!(
            topic = %internal_topic_type,
            members = self.members.len(),
            "group chat prepared"
        );

        tokio::spawn(start_run(start, runtime, recipients, cancellation_token, completer));

        Ok(handle)
    }

    async fn prepare(
        &self,
        runtime: &dyn CoreRuntime,
        internal_topic_type: &str,
        result_callback: ResultCallback,
        exception_callback: ExceptionCallback,
    ) -> GroupChatResult<RunRecipients> {
        let mut agents = Vec::with_capacity(self.members.len());
        let mut subscriptions = Vec::with_capacity(self.members.len() + 1);
        for member in &self.members {
            let agent_type = AgentType::new(format!("{}_{}", member.name(), internal_topic_type))?;
            let agent = member.clone();
            let topic = internal_topic_type.to_string();
            let on_response = self.agent_response_callback.clone();
            let on_chunk = self.streaming_agent_response_callback.clone();
            let on_error = exception_callback.clone();
            let factory: ActorFactory = Arc::new(move || -> Box<dyn Actor> {
                Box::new(
                    GroupChatAgentActor::new(agent.clone(), topic.clone())
                        .with_agent_response_callback(on_response.clone())
                        .with_streaming_agent_response_callback(on_chunk.clone())
                        .with_exception_callback(Some(on_error.clone())),
                )
            });
            let agent_type = runtime.register_factory(agent_type, factory).await?;
            let subscription: Subscription = TypeSubscription::new(internal_topic_type, agent_type.clone()).into();
            subscriptions.push(subscription.id().to_string());
            runtime.add_subscription(subscription).await?;
            agents.push(runtime.get(&agent_type, "default").await?);
        }

        let manager_type = AgentType::new(format!("{MANAGER_ACTOR_NAME}_{internal_topic_type}"))?;
        let manager = self.manager.clone();
        let topic = internal_topic_type.to_string();
        let descriptions = self.participant_descriptions.clone();
        let factory: ActorFactory = Arc::new(move || -> Box<dyn Actor> {
            Box::new(
                GroupChatManagerActor::new(manager.clone(), topic.clone(), descriptions.clone())
                    .with_result_callback(Some(result_callback.clone()))
                    .with_exception_callback(Some(exception_callback.clone())),
            )
        });
        let manager_type = runtime.register_factory(manager_type, factory).await?;
        let subscription: Subscription = TypeSubscription::new(internal_topic_type, manager_type.clone()).into();
        subscriptions.push(subscription.id().to_string());
        runtime.add_subscription(subscription).await?;
        let manager = runtime.get(&manager_type, "default").await?;

        Ok(RunRecipients {
            agents,
            manager,
            subscriptions,
        })
    }
}

struct RunRecipients {
    agents: Vec<AgentId>,
    manager: AgentId,
    subscriptions: Vec<String>,
}

/// Seeds every agent, then the manager, so no agent is asked to speak before
/// it has seen the task. Once the run has an outcome its topic is unsubscribed.
async fn start_run(
    start: GroupChatStartMessage,
    runtime: Arc<dyn CoreRuntime>,
    recipients: RunRecipients,
    cancellation_token: CancellationToken,
    completer: ResultCompleter,
) {
    let seeded = try_join_all(recipients.agents.into_iter().map(|agent| {
        runtime.send_message(
            Arc::new(start.clone()),
            agent,
            None,
            cancellation_token.clone(),
        )
    }))
    .await;

    let started = match seeded {
        Ok(_) => {
            runtime
                .send_message(Arc::new(start), recipients.manager, None, cancellation_token)
                .await
        }
        Err(err) => Err(err),
    };

    if let Err(err) = started {
        error!(error = %err, "group chat failed to start");
        completer.complete(Err(err));
    }

    completer.completed().await;
    for id in &recipients.subscriptions {
        if let Err(err) = runtime.remove_subscription(id).await {
            warn!(subscription = %id, error = %err, "failed to remove subscription");
        }
    }
    debug!(subscriptions = recipients.subscriptions.len(), "group chat unsubscribed");
}
