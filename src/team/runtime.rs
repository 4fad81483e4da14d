use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::team::agent_id::{AgentId, AgentType, TopicId};
use crate::team::context::{new_message_id, MessageContext};
use crate::team::routed::ActorBinding;
use crate::team::subscription::{Subscription, SubscriptionManager};
use crate::types::error::{GroupChatError, GroupChatResult};

/// Type-erased message payload. Broadcasts share one allocation between recipients.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// An independently scheduled unit that handles one message at a time.
#[async_trait]
pub trait Actor: Send {
    fn description(&self) -> &str;

    /// Called once by the runtime right after the factory builds the actor.
    fn bind(&mut self, _binding: ActorBinding) {}

    async fn on_message(
        &mut self,
        message: Payload,
        ctx: MessageContext,
    ) -> GroupChatResult<Option<Payload>>;
}

/// Zero-argument constructor registered under a logical actor type.
pub type ActorFactory = Arc<dyn Fn() -> Box<dyn Actor> + Send + Sync>;

/// The substrate actors run on.
///
/// Delivery to a single actor instance is serialized: a handler runs to
/// completion before the next message for that instance is handled.
#[async_trait]
pub trait CoreRuntime: Send + Sync {
    async fn register_factory(
        &self,
        agent_type: AgentType,
        factory: ActorFactory,
    ) -> GroupChatResult<AgentType>;

    /// Address of the `key` instance of `agent_type`. The instance itself is
    /// created lazily when the first message reaches it.
    async fn get(&self, agent_type: &AgentType, key: &str) -> GroupChatResult<AgentId>;

    /// Point-to-point delivery that waits for the handler's reply.
    async fn send_message(
        &self,
        message: Payload,
        recipient: AgentId,
        sender: Option<AgentId>,
        cancellation_token: CancellationToken,
    ) -> GroupChatResult<Option<Payload>>;

    /// Fire-and-forget delivery to every subscriber of `topic_id`, except the sender.
    async fn publish_message(
        &self,
        message: Payload,
        topic_id: TopicId,
        sender: Option<AgentId>,
        cancellation_token: CancellationToken,
    ) -> GroupChatResult<()>;

    async fn add_subscription(&self, subscription: Subscription) -> GroupChatResult<()>;

    async fn remove_subscription(&self, id: &str) -> GroupChatResult<()>;
}

type Reply = GroupChatResult<Option<Payload>>;

struct Envelope {
    message: Payload,
    ctx: MessageContext,
    reply_tx: Option<oneshot::Sender<Reply>>,
}

/// Counts messages that were enqueued but not yet handled.
#[derive(Default)]
struct IdleTracker {
    outstanding: AtomicUsize,
    idle: Notify,
}

impl IdleTracker {
    fn start(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Default)]
struct RuntimeInner {
    factories: Mutex<HashMap<AgentType, ActorFactory>>,
    instances: Mutex<HashMap<AgentId, async_channel::Sender<Envelope>>>,
    subscriptions: Mutex<SubscriptionManager>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Held while a message is fanned out so every fan-out is enqueued atomically.
    delivery: Mutex<()>,
    tracker: Arc<IdleTracker>,
    stopped: AtomicBool,
}

/// Single-process runtime: one mailbox and one worker task per actor instance.
#[derive(Clone, Default)]
pub struct InProcessRuntime {
    inner: Arc<RuntimeInner>,
}

impl InProcessRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_core(&self) -> Arc<dyn CoreRuntime> {
        Arc::new(self.clone())
    }

    /// Waits until every enqueued message has been handled.
    pub async fn wait_idle(&self) {
        self.inner.tracker.wait_idle().await;
    }

    /// Closes every mailbox and waits for the workers to drain them.
    pub async fn stop(&self) -> GroupChatResult<()> {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let senders: Vec<_> = self.inner.instances.lock()?.drain().map(|(_, tx)| tx).collect();
        for sender in senders {
            sender.close();
        }
        let workers: Vec<_> = std::mem::take(&mut *self.inner.workers.lock()?);
        for worker in workers {
            if let Err(err) = worker.await {
                error!(error = %err, "actor worker terminated abnormally");
            }
        }
        info!("runtime stopped");
        Ok(())
    }

    pub async fn stop_when_idle(&self) -> GroupChatResult<()> {
        self.wait_idle().await;
        self.stop().await
    }

    pub fn subscription_count(&self) -> GroupChatResult<usize> {
        Ok(self.inner.subscriptions.lock()?.len())
    }

    /// Mailbox of `id`, instantiating the actor on first use.
    fn mailbox(&self, id: &AgentId) -> GroupChatResult<async_channel::Sender<Envelope>> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(GroupChatError::Runtime("runtime is stopped".to_string()));
        }

        let mut instances = self.inner.instances.lock()?;
        if let Some(sender) = instances.get(id) {
            return Ok(sender.clone());
        }

        let factory = self
            .inner
            .factories
            .lock()?
            .get(id.agent_type())
            .cloned()
            .ok_or_else(|| GroupChatError::UnknownActorType(id.agent_type().to_string()))?;

        let mut actor = factory();
        actor.bind(ActorBinding::new(id.clone(), self.as_core()));

        let (sender, receiver) = async_channel::unbounded();
        let worker = tokio::spawn(run_mailbox(
            id.clone(),
            actor,
            receiver,
            self.inner.tracker.clone(),
        ));
        self.inner.workers.lock()?.push(worker);
        instances.insert(id.clone(), sender.clone());

        info!(actor = %id, "instantiated actor");
        Ok(sender)
    }

    fn recipients(&self, topic_id: &TopicId) -> GroupChatResult<Vec<AgentId>> {
        self.inner.subscriptions.lock()?.get_subscribed_recipients(topic_id)
    }

    /// Enqueues every envelope before any other delivery can interleave.
    fn enqueue(&self, deliveries: Vec<(AgentId, async_channel::Sender<Envelope>, Envelope)>) -> GroupChatResult<()> {
        let _delivery = self.inner.delivery.lock()?;
        for (recipient, mailbox, envelope) in deliveries {
            self.inner.tracker.start();
            if mailbox.try_send(envelope).is_err() {
                self.inner.tracker.finish();
                return Err(GroupChatError::Runtime(format!("mailbox of {recipient} is closed")));
            }
        }
        Ok(())
    }
}

async fn run_mailbox(
    id: AgentId,
    mut actor: Box<dyn Actor>,
    mailbox: async_channel::Receiver<Envelope>,
    tracker: Arc<IdleTracker>,
) {
    debug!(actor = %id, "mailbox worker started");
    while let Ok(Envelope { message, ctx, reply_tx }) = mailbox.recv().await {
        let message_id = ctx.message_id.clone();
        let result = if ctx.cancellation_token.is_cancelled() {
            Err(GroupChatError::Cancelled)
        } else {
            AssertUnwindSafe(actor.on_message(message, ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(GroupChatError::Runtime(format!("handler of {id} panicked")))
                })
        };

        match reply_tx {
            Some(reply_tx) => {
                if reply_tx.send(result).is_err() {
                    debug!(actor = %id, %message_id, "caller stopped waiting for the reply");
                }
            }
            None => {
                if let Err(err) = result {
                    error!(actor = %id, %message_id, error = %err, "message handler failed");
                }
            }
        }
        tracker.finish();
    }
    debug!(actor = %id, "mailbox worker exited");
}

#[async_trait]
impl CoreRuntime for InProcessRuntime {
    async fn register_factory(
        &self,
        agent_type: AgentType,
        factory: ActorFactory,
    ) -> GroupChatResult<AgentType> {
        let mut factories = self.inner.factories.lock()?;
        if factories.contains_key(&agent_type) {
            return Err(GroupChatError::DuplicateActorType(agent_type.to_string()));
        }
        factories.insert(agent_type.clone(), factory);
        debug!(agent_type = %agent_type, "registered actor factory");
        Ok(agent_type)
    }

    async fn get(&self, agent_type: &AgentType, key: &str) -> GroupChatResult<AgentId> {
        if !self.inner.factories.lock()?.contains_key(agent_type) {
            return Err(GroupChatError::UnknownActorType(agent_type.to_string()));
        }
        Ok(AgentId::new(agent_type.clone(), key))
    }

    async fn send_message(
        &self,
        message: Payload,
        recipient: AgentId,
        sender: Option<AgentId>,
        cancellation_token: CancellationToken,
    ) -> GroupChatResult<Option<Payload>> {
        if cancellation_token.is_cancelled() {
            return Err(GroupChatError::Cancelled);
        }

        let mailbox = self.mailbox(&recipient)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            message,
            ctx: MessageContext::rpc(sender, cancellation_token.clone()),
            reply_tx: Some(reply_tx),
        };
        self.enqueue(vec![(recipient.clone(), mailbox, envelope)])?;

        tokio::select! {
            reply = reply_rx => reply.map_err(|_| {
                GroupChatError::Runtime(format!("{recipient} dropped the reply"))
            })?,
            _ = cancellation_token.cancelled() => Err(GroupChatError::Cancelled),
        }
    }

    async fn publish_message(
        &self,
        message: Payload,
        topic_id: TopicId,
        sender: Option<AgentId>,
        cancellation_token: CancellationToken,
    ) -> GroupChatResult<()> {
        if cancellation_token.is_cancelled() {
            return Err(GroupChatError::Cancelled);
        }

        let recipients = self.recipients(&topic_id)?;
        if recipients.is_empty() {
            debug!(topic = %topic_id, "no subscribers for topic");
            return Ok(());
        }

        let message_id = new_message_id();
        let mut deliveries = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            if sender.as_ref() == Some(&recipient) {
                continue;
            }
            let mailbox = self.mailbox(&recipient)?;
            let envelope = Envelope {
                message: message.clone(),
                ctx: MessageContext::broadcast(
                    sender.clone(),
                    topic_id.clone(),
                    cancellation_token.clone(),
                    message_id.clone(),
                ),
                reply_tx: None,
            };
            deliveries.push((recipient, mailbox, envelope));
        }
        self.enqueue(deliveries)
    }

    async fn add_subscription(&self, subscription: Subscription) -> GroupChatResult<()> {
        debug!(subscription = %subscription.id(), agent_type = %subscription.agent_type(), "adding subscription");
        self.inner.subscriptions.lock()?.add_subscription(subscription)
    }

    async fn remove_subscription(&self, id: &str) -> GroupChatResult<()> {
        self.inner.subscriptions.lock()?.remove_subscription(id)
    }
}
