//! Command-keyed message dispatch.
//!
//! The source of each command name is the remote server, so the set of
//! commands is open: subscriptions are keyed by string at runtime rather than
//! by a closed enum. Every decoded message additionally reaches the firehose
//! channel, which serves as the fallback for commands nobody subscribed to by
//! name.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::Error;
use crate::message::Message;

/// Capacity of each per-command channel and the firehose.
const CHANNEL_CAPACITY: usize = 256;

/// Lifecycle events emitted by a [`crate::Client`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A transport-level error occurred. The connection is torn down right
    /// after this event, so it is always followed by [`ClientEvent::Closed`]
    /// unless the connection never reached the open state.
    Error(Arc<Error>),
    /// The connection was closed, whether locally, by the remote end, or as
    /// error escalation. Emitted exactly once per open connection.
    Closed,
}

/// String-keyed registry of per-command broadcast channels.
#[derive(Debug)]
pub(crate) struct CommandRegistry {
    channels: DashMap<String, broadcast::Sender<Message>>,
    firehose: broadcast::Sender<Message>,
}

impl CommandRegistry {
    pub(crate) fn new() -> Self {
        let (firehose, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            channels: DashMap::new(),
            firehose,
        }
    }

    /// Subscribe to messages whose `cmd` equals `cmd`.
    pub(crate) fn subscribe(&self, cmd: &str) -> broadcast::Receiver<Message> {
        self.channels
            .entry(cmd.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop the channel registered under `cmd`.
    ///
    /// Outstanding receivers observe a closed channel; messages for `cmd`
    /// still reach the firehose.
    pub(crate) fn unsubscribe(&self, cmd: &str) {
        self.channels.remove(cmd);
    }

    /// Subscribe to every decoded message regardless of command.
    pub(crate) fn subscribe_all(&self) -> broadcast::Receiver<Message> {
        self.firehose.subscribe()
    }

    /// Route one decoded message to its command channel and the firehose.
    pub(crate) fn dispatch(&self, message: Message) {
        let cmd = message.cmd.clone();
        let delivered = self
            .channels
            .get(&cmd)
            .map(|tx| tx.send(message.clone()).is_ok());

        // A send with no receivers means every subscriber for this command
        // was dropped; prune the channel so the map does not grow unbounded
        // under a hostile command vocabulary.
        if delivered == Some(false) {
            self.channels.remove_if(&cmd, |_, tx| tx.receiver_count() == 0);
        }

        _ = self.firehose.send(message);
    }

    #[cfg(test)]
    pub(crate) fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
