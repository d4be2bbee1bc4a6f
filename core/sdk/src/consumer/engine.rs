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

use crate::consumer::backoff::Backoff;
use crate::consumer::unacked_tracker::{RedeliverOverflow, UnackedMessageTracker};
use async_trait::async_trait;
use blazar_binary_protocol::{
    parse_message, properties_to_map, Connection, ConsumeHandler, LookupService, RpcClient,
};
use blazar_common::pb::{self, BaseCommand, CommandMessage};
use blazar_common::{
    timestamp_from_unix_millis, BlazarError, ConsumerMessage, Message, MessageId,
};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Cap on ids carried by a single REDELIVER command; larger sets are split.
const MAX_REDELIVER_UNACKNOWLEDGED: usize = 1000;

pub(crate) type Completion = oneshot::Sender<Result<(), BlazarError>>;

/// Commands posted onto the consumer's event channel. The event loop is the
/// only place these are executed, which serializes every state mutation.
pub(crate) enum ConsumerEvent {
    Ack { id: MessageId, done: Completion },
    AckCumulative { id: MessageId, done: Completion },
    Seek { id: MessageId, done: Completion },
    Unsubscribe { done: Completion },
    /// Flush the overflow list back to the broker.
    Redeliver { done: Completion },
    /// Aged-out batch from the unacked tracker; fire-and-forget.
    RedeliverIds { ids: Vec<MessageId> },
    Flow { permits: u32, done: Completion },
    Close { done: Completion },
    ConnectionClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConsumerState {
    Init,
    Ready,
    Closing,
    Closed,
}

/// State shared between the consumer handle, the inbound dispatcher and the
/// event loop.
pub(crate) struct ConsumerShared {
    pub topic: String,
    pub consumer_id: u64,
    pub partition_idx: i32,
    pub queue_capacity: usize,
    /// Delivery queue sender; taken on close so pending receives observe
    /// the queue as closed rather than blocking forever.
    pub message_tx: Mutex<Option<flume::Sender<ConsumerMessage>>>,
    /// Broker-pushed ids the delivery queue rejected, each held at most
    /// once.
    pub overflow: Mutex<Vec<pb::MessageIdData>>,
    pub events_tx: flume::Sender<ConsumerEvent>,
    /// Raised by the handle before a Close event is posted, so the
    /// reconnection loop yields instead of retrying forever.
    pub close_requested: AtomicBool,
    pub closed: AtomicBool,
}

impl ConsumerShared {
    pub fn lock_overflow(&self) -> MutexGuard<'_, Vec<pb::MessageIdData>> {
        self.overflow
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_message_tx(&self) -> MutexGuard<'_, Option<flume::Sender<ConsumerMessage>>> {
        self.message_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The consume handler registered with the connection layer. Runs on the
/// connection's inbound dispatch task.
pub(crate) struct MessageDispatcher {
    shared: Arc<ConsumerShared>,
}

impl MessageDispatcher {
    pub fn new(shared: Arc<ConsumerShared>) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl ConsumeHandler for MessageDispatcher {
    async fn handle_message(
        &self,
        command: CommandMessage,
        headers_and_payload: Bytes,
    ) -> Result<(), BlazarError> {
        let shared = &self.shared;
        let wire_id = command.message_id.ok_or_else(|| {
            BlazarError::MalformedFrame("MESSAGE push without a message id".into())
        })?;

        // Local position: batch index comes from the wire id, partition
        // index from this consumer.
        let id = MessageId::new(
            wire_id.ledger_id as i64,
            wire_id.entry_id as i64,
            wire_id.batch_index,
            shared.partition_idx,
        );

        let parsed = parse_message(headers_and_payload)?;
        let properties = properties_to_map(&parsed.metadata.properties);
        let message = Message::new(
            timestamp_from_unix_millis(parsed.metadata.publish_time),
            timestamp_from_unix_millis(parsed.metadata.event_time),
            parsed.metadata.partition_key.clone(),
            parsed.payload,
            id,
            properties,
            shared.topic.clone(),
        );
        let consumer_message = ConsumerMessage {
            message,
            consumer_id: shared.consumer_id,
        };

        let Some(sender) = shared.lock_message_tx().clone() else {
            return Err(BlazarError::QueueClosed);
        };
        match sender.try_send(consumer_message) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Disconnected(_)) => Err(BlazarError::QueueClosed),
            Err(flume::TrySendError::Full(_)) => {
                // The broker may re-push an id before the application
                // drains the queue; keep each rejected id once.
                {
                    let mut overflow = shared.lock_overflow();
                    if !overflow.iter().any(|existing| *existing == wire_id) {
                        overflow.push(wire_id);
                    }
                }
                warn!(
                    topic = %shared.topic,
                    capacity = shared.queue_capacity,
                    "Consumer message queue is full"
                );
                Err(BlazarError::QueueFull {
                    topic: shared.topic.clone(),
                    capacity: shared.queue_capacity,
                })
            }
        }
    }

    fn connection_closed(&self) {
        let _ = self.shared.events_tx.try_send(ConsumerEvent::ConnectionClosed);
    }
}

/// Forwards aged-out tracker batches onto the event channel, so redelivery
/// runs on the event-loop task like every other mutation.
pub(crate) struct EventsRedeliverSink {
    events_tx: flume::Sender<ConsumerEvent>,
}

impl EventsRedeliverSink {
    pub fn new(events_tx: flume::Sender<ConsumerEvent>) -> Self {
        Self { events_tx }
    }
}

impl RedeliverOverflow for EventsRedeliverSink {
    fn redeliver_overflow(&self, ids: Vec<MessageId>) {
        // Best effort: when the channel is full or the consumer is gone the
        // batch is dropped and the broker's own timeout takes over.
        let _ = self.events_tx.try_send(ConsumerEvent::RedeliverIds { ids });
    }
}

/// The single-task state machine behind a [`PartitionConsumer`]. Owns the
/// connection handle and lifecycle state; nothing else touches them.
///
/// [`PartitionConsumer`]: crate::consumer::PartitionConsumer
pub(crate) struct ConsumerEngine {
    pub shared: Arc<ConsumerShared>,
    pub lookup: Arc<dyn LookupService>,
    pub rpc: Arc<dyn RpcClient>,
    pub handler: Arc<dyn ConsumeHandler>,
    pub subscription: String,
    pub consumer_name: Option<String>,
    pub sub_type: pb::SubType,
    pub initial_position: pb::InitialPositionKind,
    pub receiver_queue_size: usize,
    pub tracker: Option<Arc<UnackedMessageTracker>>,
    pub state: ConsumerState,
    pub cnx: Option<Arc<dyn Connection>>,
    pub events_rx: flume::Receiver<ConsumerEvent>,
}

impl ConsumerEngine {
    /// The initial subscribe handshake. On success the consumer is Ready,
    /// its handler registered and the first flow permits granted.
    pub async fn subscribe(&mut self) -> Result<(), BlazarError> {
        self.grab_cnx().await?;
        self.state = ConsumerState::Ready;
        info!(
            topic = %self.shared.topic,
            consumer_id = self.shared.consumer_id,
            name = self.consumer_name.as_deref().unwrap_or(""),
            "Created consumer"
        );
        Ok(())
    }

    /// Runs until the consumer is closed and the event channel drained, or
    /// every handle to it is gone.
    pub async fn run(mut self) {
        while let Ok(event) = self.events_rx.recv_async().await {
            match event {
                ConsumerEvent::Ack { id, done } => {
                    let _ = done.send(self.internal_ack(id).await);
                }
                ConsumerEvent::AckCumulative { id, done } => {
                    let _ = done.send(self.internal_ack_cumulative(id).await);
                }
                ConsumerEvent::Seek { id, done } => {
                    let _ = done.send(self.internal_seek(id).await);
                }
                ConsumerEvent::Unsubscribe { done } => {
                    let _ = done.send(self.internal_unsubscribe().await);
                }
                ConsumerEvent::Redeliver { done } => {
                    let _ = done.send(self.internal_redeliver().await);
                }
                ConsumerEvent::RedeliverIds { ids } => {
                    self.internal_redeliver_timed_out(ids).await;
                }
                ConsumerEvent::Flow { permits, done } => {
                    let _ = done.send(self.internal_flow_if_ready(permits).await);
                }
                ConsumerEvent::Close { done } => {
                    let _ = done.send(self.internal_close().await);
                }
                ConsumerEvent::ConnectionClosed => {
                    self.reconnect_to_broker().await;
                }
            }

            // Late events posted against a closed consumer are answered as
            // no-ops above; once the backlog drains the loop can end.
            if self.state == ConsumerState::Closed && self.events_rx.is_empty() {
                break;
            }
        }
        debug!(
            topic = %self.shared.topic,
            consumer_id = self.shared.consumer_id,
            "Consumer event loop terminated"
        );
    }

    /// The subscribe handshake: resolve the partition's broker, issue
    /// SUBSCRIBE, register the inbound handler and grant initial permits.
    /// Consumer id and subscription name never change across calls, so the
    /// broker resumes the same cursor after a reconnect.
    async fn grab_cnx(&mut self) -> Result<(), BlazarError> {
        let lookup_result = self
            .lookup
            .lookup(&self.shared.topic)
            .await
            .map_err(|error| {
                warn!(topic = %self.shared.topic, error = %error, "Failed to lookup topic");
                error
            })?;
        debug!(
            logical_addr = %lookup_result.logical_addr,
            physical_addr = %lookup_result.physical_addr,
            "Lookup result"
        );

        let request_id = self.rpc.new_request_id();
        let command = BaseCommand::subscribe(pb::CommandSubscribe {
            topic: self.shared.topic.clone(),
            subscription: self.subscription.clone(),
            sub_type: self.sub_type as i32,
            consumer_id: self.shared.consumer_id,
            request_id,
            consumer_name: self.consumer_name.clone().unwrap_or_default(),
            initial_position: self.initial_position as i32,
        });
        let result = self
            .rpc
            .request(
                &lookup_result.logical_addr,
                &lookup_result.physical_addr,
                request_id,
                command,
            )
            .await?;

        match result.response.kind() {
            Some(pb::CommandType::Success) => {
                if let Some(success) = &result.response.success {
                    if !success.consumer_name.is_empty() {
                        self.consumer_name = Some(success.consumer_name.clone());
                    }
                }
                result
                    .cnx
                    .add_consume_handler(self.shared.consumer_id, Arc::clone(&self.handler));
                self.cnx = Some(Arc::clone(&result.cnx));
                self.internal_flow(self.receiver_queue_size as u32).await?;
                Ok(())
            }
            Some(pb::CommandType::Error) => {
                let error = result.response.error.unwrap_or_default();
                Err(BlazarError::SubscribeFailed {
                    code: error.error,
                    message: error.message,
                })
            }
            _ => Err(BlazarError::UnexpectedResponse {
                command_type: result.response.command_type,
                request_id,
            }),
        }
    }

    async fn internal_ack(&self, id: MessageId) -> Result<(), BlazarError> {
        if self.state != ConsumerState::Ready {
            return Ok(());
        }
        let Some(cnx) = &self.cnx else {
            return Err(BlazarError::ConnectionLost);
        };

        let request_id = self.rpc.new_request_id();
        let command = BaseCommand::ack(pb::CommandAck {
            consumer_id: self.shared.consumer_id,
            ack_type: pb::AckType::Individual as i32,
            message_id: vec![id.to_wire()],
        });
        let result = self
            .rpc
            .request_on_cnx_no_wait(cnx.as_ref(), request_id, command)
            .await;
        if let Err(error) = &result {
            error!(error = %error, "Failed to ack message");
        }

        if let Some(tracker) = &self.tracker {
            tracker.remove(id);
        }
        result
    }

    async fn internal_ack_cumulative(&self, id: MessageId) -> Result<(), BlazarError> {
        if self.state != ConsumerState::Ready {
            return Ok(());
        }
        let Some(cnx) = &self.cnx else {
            return Err(BlazarError::ConnectionLost);
        };

        let request_id = self.rpc.new_request_id();
        let command = BaseCommand::ack(pb::CommandAck {
            consumer_id: self.shared.consumer_id,
            ack_type: pb::AckType::Cumulative as i32,
            message_id: vec![id.to_wire()],
        });
        let result = self
            .rpc
            .request_on_cnx(cnx.as_ref(), request_id, command)
            .await
            .map(|_| ());
        if let Err(error) = &result {
            error!(error = %error, "Failed to ack messages cumulatively");
        }

        if let Some(tracker) = &self.tracker {
            tracker.remove(id);
        }
        result
    }

    async fn internal_seek(&self, id: MessageId) -> Result<(), BlazarError> {
        if self.state != ConsumerState::Ready {
            return Ok(());
        }
        let Some(cnx) = &self.cnx else {
            return Err(BlazarError::ConnectionLost);
        };

        let request_id = self.rpc.new_request_id();
        let command = BaseCommand::seek(pb::CommandSeek {
            consumer_id: self.shared.consumer_id,
            request_id,
            message_id: Some(id.to_wire()),
        });
        self.rpc
            .request_on_cnx(cnx.as_ref(), request_id, command)
            .await
            .map(|_| ())
            .map_err(|error| {
                error!(error = %error, "Failed to seek consumer");
                error
            })
    }

    async fn internal_unsubscribe(&mut self) -> Result<(), BlazarError> {
        if self.state != ConsumerState::Ready {
            return Ok(());
        }
        let Some(cnx) = &self.cnx else {
            return Err(BlazarError::ConnectionLost);
        };

        let request_id = self.rpc.new_request_id();
        let command = BaseCommand::unsubscribe(pb::CommandUnsubscribe {
            consumer_id: self.shared.consumer_id,
            request_id,
        });
        self.rpc
            .request_on_cnx(cnx.as_ref(), request_id, command)
            .await
            .map_err(|error| {
                error!(error = %error, "Failed to unsubscribe consumer");
                error
            })?;

        cnx.delete_consume_handler(self.shared.consumer_id);
        if let Some(tracker) = &self.tracker {
            tracker.stop();
        }
        Ok(())
    }

    /// Flushes the overflow list back to the broker and clears the tracker.
    async fn internal_redeliver(&mut self) -> Result<(), BlazarError> {
        if self.state != ConsumerState::Ready {
            return Ok(());
        }

        let overflow = std::mem::take(&mut *self.shared.lock_overflow());
        if overflow.is_empty() {
            return Ok(());
        }
        debug!(count = overflow.len(), "Redelivering overflowed messages");

        let result = self.send_redeliver_chunks(&overflow).await;
        if let Some(tracker) = &self.tracker {
            tracker.clear();
        }
        result
    }

    /// Redelivery for ids whose ack timed out. Failures drop the batch; the
    /// broker redelivers on its own timeout.
    async fn internal_redeliver_timed_out(&mut self, ids: Vec<MessageId>) {
        if self.state != ConsumerState::Ready {
            return;
        }
        let wire_ids: Vec<pb::MessageIdData> = ids.iter().map(|id| id.to_wire()).collect();
        if let Err(error) = self.send_redeliver_chunks(&wire_ids).await {
            warn!(error = %error, "Dropping timed-out redelivery batch");
        }
    }

    async fn send_redeliver_chunks(
        &self,
        ids: &[pb::MessageIdData],
    ) -> Result<(), BlazarError> {
        let Some(cnx) = &self.cnx else {
            return Err(BlazarError::ConnectionLost);
        };

        let mut first_error = None;
        for chunk in ids.chunks(MAX_REDELIVER_UNACKNOWLEDGED) {
            // Fresh request id per chunk.
            let request_id = self.rpc.new_request_id();
            let command = BaseCommand::redeliver_unacknowledged_messages(
                pb::CommandRedeliverUnacknowledgedMessages {
                    consumer_id: self.shared.consumer_id,
                    message_ids: chunk.to_vec(),
                },
            );
            if let Err(error) = self
                .rpc
                .request_on_cnx(cnx.as_ref(), request_id, command)
                .await
            {
                error!(error = %error, "Failed to request redelivery");
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    async fn internal_flow_if_ready(&self, permits: u32) -> Result<(), BlazarError> {
        if self.state != ConsumerState::Ready {
            return Ok(());
        }
        self.internal_flow(permits).await
    }

    /// Grants the broker `permits` more pushes. Zero permits would stall
    /// the subscription silently, so it is rejected.
    async fn internal_flow(&self, permits: u32) -> Result<(), BlazarError> {
        if permits == 0 {
            return Err(BlazarError::InvalidArgument(
                "flow requires at least one permit".into(),
            ));
        }
        let Some(cnx) = &self.cnx else {
            return Err(BlazarError::ConnectionLost);
        };

        let request_id = self.rpc.new_request_id();
        let command = BaseCommand::flow(pb::CommandFlow {
            consumer_id: self.shared.consumer_id,
            message_permits: permits,
        });
        self.rpc
            .request_on_cnx_no_wait(cnx.as_ref(), request_id, command)
            .await
            .map_err(|error| {
                error!(error = %error, "Failed to send flow permits");
                error
            })
    }

    async fn internal_close(&mut self) -> Result<(), BlazarError> {
        if self.state != ConsumerState::Ready {
            return Ok(());
        }
        self.state = ConsumerState::Closing;
        info!(
            topic = %self.shared.topic,
            consumer_id = self.shared.consumer_id,
            "Closing consumer"
        );

        // Without a live connection there is no consumer slot left to
        // release; the broker dropped it with the connection.
        let result = match &self.cnx {
            Some(cnx) => {
                let request_id = self.rpc.new_request_id();
                let command = BaseCommand::close_consumer(pb::CommandCloseConsumer {
                    consumer_id: self.shared.consumer_id,
                    request_id,
                });
                self.rpc
                    .request_on_cnx(cnx.as_ref(), request_id, command)
                    .await
                    .map(|_| ())
            }
            None => Ok(()),
        };

        if let Some(cnx) = self.cnx.take() {
            cnx.delete_consume_handler(self.shared.consumer_id);
        }
        if let Some(tracker) = &self.tracker {
            tracker.stop();
        }

        // Close is terminal even when the broker could not be told: the
        // handler is unregistered and the delivery queue must unblock any
        // pending receives.
        self.state = ConsumerState::Closed;
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.lock_message_tx().take();

        match &result {
            Ok(()) => info!(
                topic = %self.shared.topic,
                consumer_id = self.shared.consumer_id,
                "Closed consumer"
            ),
            Err(error) => error!(error = %error, "Failed to close consumer cleanly"),
        }
        result
    }

    /// Re-runs the subscribe handshake until it succeeds or the consumer
    /// leaves the Ready state. Overflow and tracker contents survive; only
    /// the connection handle is replaced.
    async fn reconnect_to_broker(&mut self) {
        if self.state != ConsumerState::Ready {
            return;
        }
        warn!(
            topic = %self.shared.topic,
            consumer_id = self.shared.consumer_id,
            "Connection closed, reconnecting to broker"
        );
        self.cnx = None;

        let mut backoff = Backoff::new();
        loop {
            if self.state != ConsumerState::Ready
                || self.shared.close_requested.load(Ordering::SeqCst)
            {
                return;
            }
            match self.grab_cnx().await {
                Ok(()) => {
                    info!(
                        topic = %self.shared.topic,
                        consumer_id = self.shared.consumer_id,
                        "Reconnected consumer to broker"
                    );
                    return;
                }
                Err(error) => {
                    let delay = backoff.next();
                    warn!(
                        error = %error,
                        delay = ?delay,
                        "Reconnection failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
