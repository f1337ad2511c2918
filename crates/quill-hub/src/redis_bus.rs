//! Redis-backed edit bus.
//!
//! One pub/sub connection per process, owned by a dispatch task. Local
//! subscribers are multiplexed over it with per-channel refcounts: the
//! first local subscriber triggers SUBSCRIBE (acknowledged before
//! `subscribe` returns, so a caller never misses its own subsequent
//! publications), dropping the last one triggers UNSUBSCRIBE.

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use quill_types::{BusSubscription, CoreError, CoreResult, EditBus};
use redis::aio::{MultiplexedConnection, PubSub};
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

const SUBSCRIBER_BUFFER: usize = 256;
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(50);

enum BusCommand {
    Subscribe(String, oneshot::Sender<()>),
    Unsubscribe(String),
}

type ChannelMap = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>>;

/// Cross-process keyed pub/sub over Redis.
pub struct RedisBus {
    conn: MultiplexedConnection,
    commands: mpsc::UnboundedSender<BusCommand>,
    channels: ChannelMap,
}

impl RedisBus {
    /// Connect and spawn the dispatch task.
    pub async fn connect(redis_url: &str) -> CoreResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| CoreError::internal(format!("invalid redis URL: {e}")))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| CoreError::internal(format!("redis connection failed: {e}")))?;
        let pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| CoreError::internal(format!("redis pubsub failed: {e}")))?;

        let (commands, command_rx) = mpsc::unbounded_channel::<BusCommand>();
        let channels: ChannelMap = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(dispatch(pubsub, command_rx, Arc::clone(&channels)));

        Ok(Self {
            conn,
            commands,
            channels,
        })
    }
}

/// Owns the pub/sub connection: applies subscription commands between
/// message polls and routes incoming payloads to local subscribers.
async fn dispatch(
    mut pubsub: PubSub,
    mut command_rx: mpsc::UnboundedReceiver<BusCommand>,
    channels: ChannelMap,
) {
    loop {
        while let Ok(command) = command_rx.try_recv() {
            apply(&mut pubsub, command).await;
        }

        // Poll for one message; the bound keeps command latency low. The
        // connection buffers messages between polls, nothing is lost by
        // recreating the stream.
        let next = {
            let mut stream = pubsub.on_message();
            tokio::time::timeout(COMMAND_POLL_INTERVAL, stream.next()).await
        };

        match next {
            Ok(Some(message)) => {
                let channel = message.get_channel_name().to_string();
                let payload: Vec<u8> = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "unreadable bus payload");
                        continue;
                    }
                };

                let senders = {
                    let mut channels = channels.lock();
                    let Some(senders) = channels.get_mut(&channel) else {
                        continue;
                    };
                    senders.retain(|tx| !tx.is_closed());
                    senders.clone()
                };

                for tx in senders {
                    if tx.try_send(payload.clone()).is_err() {
                        warn!(channel = %channel, "dropping bus payload for stalled subscriber");
                    }
                }
            }
            Ok(None) => {
                debug!("pubsub stream ended");
                break;
            }
            Err(_) => {} // poll timeout, loop back for commands
        }
    }
}

async fn apply(pubsub: &mut PubSub, command: BusCommand) {
    match command {
        BusCommand::Subscribe(channel, ack) => {
            if let Err(e) = pubsub.subscribe(&channel).await {
                error!(channel = %channel, error = %e, "SUBSCRIBE failed");
            }
            let _ = ack.send(());
        }
        BusCommand::Unsubscribe(channel) => {
            if let Err(e) = pubsub.unsubscribe(&channel).await {
                error!(channel = %channel, error = %e, "UNSUBSCRIBE failed");
            }
        }
    }
}

#[async_trait]
impl EditBus for RedisBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| CoreError::internal(format!("bus publish failed: {e}")))
    }

    async fn subscribe(&self, channel: &str) -> CoreResult<BusSubscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        let first = {
            let mut channels = self.channels.lock();
            let senders = channels.entry(channel.to_string()).or_default();
            let first = senders.iter().all(|tx| tx.is_closed());
            senders.push(tx);
            first
        };

        if first {
            // Wait for the SUBSCRIBE to take effect so the caller observes
            // every publication made after this call returns.
            let (ack_tx, ack_rx) = oneshot::channel();
            self.commands
                .send(BusCommand::Subscribe(channel.to_string(), ack_tx))
                .map_err(|_| CoreError::internal("bus dispatch task gone"))?;
            ack_rx
                .await
                .map_err(|_| CoreError::internal("bus dispatch task gone"))?;
        }

        let guard = UnsubscribeGuard {
            channel: channel.to_string(),
            channels: Arc::clone(&self.channels),
            commands: self.commands.clone(),
        };
        Ok(BusSubscription::with_guard(rx, Box::new(guard)))
    }
}

/// Dropped together with its subscription: prunes the sender list and
/// releases the backend subscription when it was the last one.
struct UnsubscribeGuard {
    channel: String,
    channels: ChannelMap,
    commands: mpsc::UnboundedSender<BusCommand>,
}

impl Drop for UnsubscribeGuard {
    fn drop(&mut self) {
        let last = {
            let mut channels = self.channels.lock();
            if let Some(senders) = channels.get_mut(&self.channel) {
                senders.retain(|tx| !tx.is_closed());
                if senders.is_empty() {
                    channels.remove(&self.channel);
                    true
                } else {
                    false
                }
            } else {
                false
            }
        };

        if last {
            let _ = self
                .commands
                .send(BusCommand::Unsubscribe(self.channel.clone()));
        }
    }
}
