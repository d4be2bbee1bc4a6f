/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

use crate::consumer::engine::{
    Completion, ConsumerEngine, ConsumerEvent, ConsumerShared, ConsumerState, EventsRedeliverSink,
    MessageDispatcher,
};
use crate::consumer::unacked_tracker::UnackedMessageTracker;
use blazar_binary_protocol::{ConsumeHandler, LookupService, RpcClient};
use blazar_common::{BlazarError, ConsumerMessage, ConsumerOptions, Message, MessageId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Capacity of the internal event channel. Mutating operations queue here
/// briefly before the event loop picks them up.
const EVENTS_BUFFER: usize = 10;

/// A subscriber bound to one partition of a topic.
///
/// The consumer owns a consumer slot on the broker that serves the
/// partition: it grants flow permits, drains broker pushes into a bounded
/// delivery queue, tracks unacknowledged messages and reconnects with
/// backoff when the connection drops, preserving its consumer id and
/// subscription so the broker resumes the same cursor.
///
/// All mutating operations are serialized through an internal event loop;
/// the handle itself can be shared freely across tasks.
pub struct PartitionConsumer {
    shared: Arc<ConsumerShared>,
    messages: flume::Receiver<ConsumerMessage>,
    tracker: Option<Arc<UnackedMessageTracker>>,
    subscription: String,
}

impl PartitionConsumer {
    /// Subscribes to one partition and returns the live consumer.
    ///
    /// Resolves the partition's broker through `lookup`, performs the
    /// SUBSCRIBE handshake via `rpc` and issues the initial flow permits.
    /// Fails with [`BlazarError::SubscribeFailed`] when the broker rejects
    /// the subscription.
    pub async fn new(
        lookup: Arc<dyn LookupService>,
        rpc: Arc<dyn RpcClient>,
        topic: impl Into<String>,
        partition_idx: i32,
        options: ConsumerOptions,
    ) -> Result<Self, BlazarError> {
        let topic = topic.into();
        if options.subscription_name.is_empty() {
            return Err(BlazarError::InvalidArgument(
                "subscription name is required".into(),
            ));
        }
        let ConsumerOptions {
            subscription_name,
            name,
            subscription_type,
            initial_position,
            receiver_queue_size,
            ack_timeout,
            message_channel,
        } = options.with_defaults();

        let consumer_id = rpc.new_consumer_id();
        let (events_tx, events_rx) = flume::bounded(EVENTS_BUFFER);
        let (message_tx, message_rx) =
            message_channel.unwrap_or_else(|| flume::bounded(receiver_queue_size));
        let queue_capacity = message_rx.capacity().unwrap_or(receiver_queue_size);

        let shared = Arc::new(ConsumerShared {
            topic,
            consumer_id,
            partition_idx,
            queue_capacity,
            message_tx: Mutex::new(Some(message_tx)),
            overflow: Mutex::new(Vec::new()),
            events_tx,
            close_requested: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        let handler: Arc<dyn ConsumeHandler> =
            Arc::new(MessageDispatcher::new(Arc::clone(&shared)));

        let tracker = if subscription_type.is_shared() && !ack_timeout.is_zero() {
            let sink = Arc::new(EventsRedeliverSink::new(shared.events_tx.clone()));
            Some(Arc::new(UnackedMessageTracker::new(sink)))
        } else {
            None
        };

        let mut engine = ConsumerEngine {
            shared: Arc::clone(&shared),
            lookup,
            rpc,
            handler,
            subscription: subscription_name.clone(),
            consumer_name: name,
            sub_type: subscription_type.to_wire(),
            initial_position: initial_position.to_wire(),
            receiver_queue_size,
            tracker: tracker.clone(),
            state: ConsumerState::Init,
            cnx: None,
            events_rx,
        };
        engine.subscribe().await.map_err(|error| {
            error!(error = %error, "Failed to create consumer");
            error
        })?;

        if let Some(tracker) = &tracker {
            tracker.start(ack_timeout);
        }
        tokio::spawn(engine.run());

        Ok(Self {
            shared,
            messages: message_rx,
            tracker,
            subscription: subscription_name,
        })
    }

    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn consumer_id(&self) -> u64 {
        self.shared.consumer_id
    }

    /// Dequeues one message, registering it with the unacked tracker the
    /// moment it is handed to the application.
    ///
    /// Fails with [`BlazarError::Cancelled`] when `cancel` fires first and
    /// [`BlazarError::QueueClosed`] once the consumer is closed and the
    /// queue drained.
    pub async fn receive(&self, cancel: &CancellationToken) -> Result<Message, BlazarError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(BlazarError::Cancelled),
            received = self.messages.recv_async() => match received {
                Ok(consumer_message) => {
                    let message = consumer_message.message;
                    if let Some(tracker) = &self.tracker {
                        tracker.add(message.id());
                    }
                    Ok(message)
                }
                Err(_) => Err(BlazarError::QueueClosed),
            }
        }
    }

    /// Forwards messages from the delivery queue into `out` until `cancel`
    /// fires, keeping the broker's send window open by re-granting flow
    /// permits every `max(capacity / 2, 1)` forwarded messages.
    pub async fn receive_async(
        &self,
        cancel: &CancellationToken,
        out: flume::Sender<ConsumerMessage>,
    ) -> Result<(), BlazarError> {
        let high_water = (self.shared.queue_capacity / 2).max(1) as u32;

        // Request half the queue's capacity up front.
        self.flow(high_water).await?;
        let mut received_since_flow = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(BlazarError::Cancelled),
                received = self.messages.recv_async() => {
                    let consumer_message =
                        received.map_err(|_| BlazarError::QueueClosed)?;
                    let id = consumer_message.message.id();
                    out.send_async(consumer_message)
                        .await
                        .map_err(|_| BlazarError::QueueClosed)?;
                    if let Some(tracker) = &self.tracker {
                        tracker.add(id);
                    }
                    received_since_flow += 1;
                    if received_since_flow >= high_water {
                        self.flow(received_since_flow).await?;
                        received_since_flow = 0;
                    }
                }
            }
        }
    }

    /// Acknowledges one message. Fire-and-forget on the wire.
    pub async fn ack(&self, message: &Message) -> Result<(), BlazarError> {
        self.ack_id(message.id()).await
    }

    pub async fn ack_id(&self, id: MessageId) -> Result<(), BlazarError> {
        self.dispatch(|done| ConsumerEvent::Ack { id, done }).await
    }

    /// Acknowledges every message of this subscription up to and including
    /// the given one. Waits for the broker's confirmation.
    pub async fn ack_cumulative(&self, message: &Message) -> Result<(), BlazarError> {
        self.ack_cumulative_id(message.id()).await
    }

    pub async fn ack_cumulative_id(&self, id: MessageId) -> Result<(), BlazarError> {
        self.dispatch(|done| ConsumerEvent::AckCumulative { id, done })
            .await
    }

    /// Repositions the subscription cursor; on success the broker restarts
    /// delivery from the given position.
    pub async fn seek(&self, id: MessageId) -> Result<(), BlazarError> {
        self.dispatch(|done| ConsumerEvent::Seek { id, done }).await
    }

    /// Drops the subscription on the broker and stops ack tracking.
    pub async fn unsubscribe(&self) -> Result<(), BlazarError> {
        self.dispatch(|done| ConsumerEvent::Unsubscribe { done })
            .await
    }

    /// Asks the broker to re-push every message the delivery queue had to
    /// reject. No-op when nothing overflowed.
    pub async fn redeliver_unacknowledged(&self) -> Result<(), BlazarError> {
        self.dispatch(|done| ConsumerEvent::Redeliver { done })
            .await
    }

    /// Closes the consumer. Idempotent; concurrent calls produce a single
    /// CLOSE command on the wire and all of them return success.
    pub async fn close(&self) -> Result<(), BlazarError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.close_requested.store(true, Ordering::SeqCst);
        self.dispatch(|done| ConsumerEvent::Close { done }).await
    }

    async fn dispatch<F>(&self, event: F) -> Result<(), BlazarError>
    where
        F: FnOnce(Completion) -> ConsumerEvent,
    {
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .shared
            .events_tx
            .send_async(event(done_tx))
            .await
            .is_err()
        {
            // The event loop has terminated: the consumer is closed and
            // mutating operations are no-ops.
            return Ok(());
        }
        done_rx.await.unwrap_or(Ok(()))
    }

    async fn flow(&self, permits: u32) -> Result<(), BlazarError> {
        self.dispatch(|done| ConsumerEvent::Flow { permits, done })
            .await
    }
}

impl Drop for PartitionConsumer {
    fn drop(&mut self) {
        // Last-resort cleanup so an abandoned handle still releases its
        // consumer slot and lets the event loop terminate.
        if !self.shared.closed.load(Ordering::SeqCst) {
            self.shared.close_requested.store(true, Ordering::SeqCst);
            let (done_tx, _done_rx) = oneshot::channel();
            let _ = self
                .shared
                .events_tx
                .try_send(ConsumerEvent::Close { done: done_tx });
        }
    }
}
