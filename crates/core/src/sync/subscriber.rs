//! Per-owner change subscriptions on the `audiences` and `leads` tables.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::events::StreamEvent;
use crate::constants::OWNER_COLUMN;
use crate::errors::{Error, Result};
use crate::remote::{ChangeChannel, ChangeStream, RowFilter, Table};

/// Receiver of decoded stream events.
#[async_trait]
pub trait StreamSink: Send + Sync + 'static {
    /// Hands over one event. Returns once the event has been applied; an
    /// error means the receiver is gone and the channel should stop.
    async fn deliver(&self, event: StreamEvent) -> Result<()>;

    /// Reports that a channel failed and will not deliver further events.
    async fn degraded(&self, table: Table, error: Error);
}

const SUBSCRIBED_TABLES: [Table; 2] = [Table::Audiences, Table::Leads];

/// Opens the two change channels for an owner.
#[derive(Clone)]
pub struct ChangeStreamSubscriber {
    stream: Arc<dyn ChangeStream>,
}

impl ChangeStreamSubscriber {
    pub fn new(stream: Arc<dyn ChangeStream>) -> Self {
        Self { stream }
    }

    /// Opens both channels for `owner_id` and pumps their events into `sink`.
    pub fn subscribe(&self, owner_id: &str, sink: Arc<dyn StreamSink>) -> SubscriptionHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let filter = RowFilter::eq(OWNER_COLUMN, owner_id);

        let tasks = SUBSCRIBED_TABLES
            .into_iter()
            .map(|table| {
                let pump = ChannelPump {
                    table,
                    filter: filter.clone(),
                    stream: Arc::clone(&self.stream),
                    sink: Arc::clone(&sink),
                    cancel: cancel_rx.clone(),
                };
                tokio::spawn(pump.run())
            })
            .collect();

        debug!("Change subscriptions started for owner {}", owner_id);
        SubscriptionHandle {
            cancel: cancel_tx,
            tasks,
        }
    }
}

struct ChannelPump {
    table: Table,
    filter: RowFilter,
    stream: Arc<dyn ChangeStream>,
    sink: Arc<dyn StreamSink>,
    cancel: watch::Receiver<bool>,
}

impl ChannelPump {
    async fn run(mut self) {
        let mut channel = tokio::select! {
            _ = wait_cancelled(&mut self.cancel) => return,
            opened = self.stream.subscribe(self.table, &self.filter) => match opened {
                Ok(channel) => channel,
                Err(e) => {
                    self.fail(format!("subscribe failed: {}", e)).await;
                    return;
                }
            },
        };
        info!("Subscribed to '{}' changes ({})", self.table, self.filter);

        self.pump(channel.as_mut()).await;
        channel.unsubscribe().await;
        debug!("Left '{}' channel", self.table);
    }

    async fn fail(&self, reason: String) {
        self.sink
            .degraded(self.table, Error::Subscription(reason))
            .await;
    }

    async fn pump(&mut self, channel: &mut dyn ChangeChannel) {
        loop {
            let next = tokio::select! {
                _ = wait_cancelled(&mut self.cancel) => return,
                next = channel.next_change() => next,
            };

            let raw = match next {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => {
                    self.fail(e.to_string()).await;
                    return;
                }
                None => {
                    let cancelled = *self.cancel.borrow();
                    if !cancelled {
                        self.fail("channel closed".to_string()).await;
                    }
                    return;
                }
            };

            let event = match StreamEvent::decode(self.table, raw) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Dropping malformed '{}' change: {}", self.table, e);
                    continue;
                }
            };

            if let Err(e) = self.sink.deliver(event).await {
                debug!("Stopping '{}' channel: {}", self.table, e);
                return;
            }
        }
    }
}

async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    // A dropped sender counts as cancellation.
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

/// Live subscription pair. Dropping the handle cancels it.
pub struct SubscriptionHandle {
    cancel: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Stops both channels. Safe to call any number of times.
    pub fn cancel(&self) {
        if !self.cancel.send_replace(true) {
            debug!("Cancelling change subscriptions");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Cancels and waits for both channels to be left.
    pub async fn shutdown(mut self) {
        self.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!("Change channel task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
