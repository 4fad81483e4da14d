use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::error::{GroupChatError, GroupChatResult};
use crate::types::message::ChatMessageContent;

type Outcome = Option<GroupChatResult<ChatMessageContent>>;

/// Write side of an [`OrchestrationResult`]. Only the first outcome sticks.
#[derive(Clone)]
pub struct ResultCompleter {
    tx: Arc<watch::Sender<Outcome>>,
}

impl ResultCompleter {
    /// Returns false if the run had already completed.
    pub fn complete(&self, outcome: GroupChatResult<ChatMessageContent>) -> bool {
        let mut outcome = Some(outcome);
        let accepted = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = outcome.take();
            true
        });
        if !accepted {
            debug!("orchestration already completed, dropping outcome");
        }
        accepted
    }

    pub fn is_done(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Resolves once an outcome has been recorded.
    pub async fn completed(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(Option::is_some).await.is_err() {
            debug!("result channel closed before completion");
        }
    }
}

/// Handle to a running group chat.
pub struct OrchestrationResult {
    rx: watch::Receiver<Outcome>,
    completer: ResultCompleter,
    cancellation_token: CancellationToken,
}

impl OrchestrationResult {
    pub fn new(cancellation_token: CancellationToken) -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            rx,
            completer: ResultCompleter { tx: Arc::new(tx) },
            cancellation_token,
        }
    }

    pub fn completer(&self) -> ResultCompleter {
        self.completer.clone()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Waits for the final message. `None` waits indefinitely.
    pub async fn get(&self, timeout: Option<Duration>) -> GroupChatResult<ChatMessageContent> {
        let mut rx = self.rx.clone();
        let wait = async move {
            let outcome = rx
                .wait_for(Option::is_some)
                .await
                .map_err(|_| GroupChatError::Runtime("result channel closed".to_string()))?;
            outcome
                .clone()
                .unwrap_or_else(|| Err(GroupChatError::Runtime("result missing".to_string())))
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| GroupChatError::Timeout)?,
            None => wait.await,
        }
    }

    pub fn is_done(&self) -> bool {
        self.completer.is_done()
    }

    /// Stops the run. Cancelling a finished run is an error.
    pub fn cancel(&self) -> GroupChatResult<()> {
        if !self.completer.complete(Err(GroupChatError::Cancelled)) {
            return Err(GroupChatError::Runtime(
                "cannot cancel an orchestration that has already completed".to_string(),
            ));
        }
        self.cancellation_token.cancel();
        Ok(())
    }
}
