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

//! Partition consumer scenarios against an in-memory broker.

use async_trait::async_trait;
use blazar::prelude::*;
use blazar_common::pb;
use bytes::{BufMut, Bytes, BytesMut};
use prost::Message as _;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct MockConnection {
    handlers: Mutex<HashMap<u64, Arc<dyn ConsumeHandler>>>,
}

impl Connection for MockConnection {
    fn add_consume_handler(&self, consumer_id: u64, handler: Arc<dyn ConsumeHandler>) {
        self.handlers.lock().unwrap().insert(consumer_id, handler);
    }

    fn delete_consume_handler(&self, consumer_id: u64) {
        self.handlers.lock().unwrap().remove(&consumer_id);
    }
}

/// Records every command the consumer sends and answers SUCCESS to all
/// correlated requests. Failure injection is per-call-countdown.
#[derive(Default)]
struct MockBroker {
    next_request_id: AtomicU64,
    next_consumer_id: AtomicU64,
    lookup_failures: AtomicUsize,
    subscribe_failures: AtomicUsize,
    garbage_subscribe_responses: AtomicUsize,
    connection: Arc<MockConnection>,
    subscribes: Mutex<Vec<pb::CommandSubscribe>>,
    flows: Mutex<Vec<pb::CommandFlow>>,
    acks: Mutex<Vec<pb::CommandAck>>,
    seeks: Mutex<Vec<pb::CommandSeek>>,
    unsubscribes: Mutex<Vec<pb::CommandUnsubscribe>>,
    redelivers: Mutex<Vec<pb::CommandRedeliverUnacknowledgedMessages>>,
    closes: Mutex<Vec<pb::CommandCloseConsumer>>,
}

impl MockBroker {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn handler(&self, consumer_id: u64) -> Arc<dyn ConsumeHandler> {
        self.connection
            .handlers
            .lock()
            .unwrap()
            .get(&consumer_id)
            .cloned()
            .expect("no consume handler registered")
    }

    fn has_handler(&self, consumer_id: u64) -> bool {
        self.connection
            .handlers
            .lock()
            .unwrap()
            .contains_key(&consumer_id)
    }

    fn record(&self, command: &pb::BaseCommand) {
        if let Some(subscribe) = &command.subscribe {
            self.subscribes.lock().unwrap().push(subscribe.clone());
        }
        if let Some(flow) = &command.flow {
            self.flows.lock().unwrap().push(flow.clone());
        }
        if let Some(ack) = &command.ack {
            self.acks.lock().unwrap().push(ack.clone());
        }
        if let Some(seek) = &command.seek {
            self.seeks.lock().unwrap().push(seek.clone());
        }
        if let Some(unsubscribe) = &command.unsubscribe {
            self.unsubscribes.lock().unwrap().push(unsubscribe.clone());
        }
        if let Some(redeliver) = &command.redeliver_unacknowledged_messages {
            self.redelivers.lock().unwrap().push(redeliver.clone());
        }
        if let Some(close) = &command.close_consumer {
            self.closes.lock().unwrap().push(close.clone());
        }
    }

    fn take_ticket(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[async_trait]
impl LookupService for MockBroker {
    async fn lookup(&self, topic: &str) -> Result<LookupResult, BlazarError> {
        if Self::take_ticket(&self.lookup_failures) {
            return Err(BlazarError::LookupFailed {
                topic: topic.to_string(),
                reason: "no brokers available".into(),
            });
        }
        Ok(LookupResult {
            logical_addr: "blazar://broker-1:6650".into(),
            physical_addr: "10.0.0.1:6650".into(),
        })
    }
}

#[async_trait]
impl RpcClient for MockBroker {
    fn new_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn new_consumer_id(&self) -> u64 {
        self.next_consumer_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn request(
        &self,
        _logical_addr: &str,
        _physical_addr: &str,
        request_id: u64,
        command: pb::BaseCommand,
    ) -> Result<RpcResult, BlazarError> {
        if Self::take_ticket(&self.garbage_subscribe_responses) {
            return Ok(RpcResult {
                response: pb::BaseCommand::message(pb::CommandMessage::default()),
                cnx: self.connection.clone(),
            });
        }
        if Self::take_ticket(&self.subscribe_failures) {
            return Ok(RpcResult {
                response: pb::BaseCommand::error(pb::CommandError {
                    request_id,
                    error: pb::ServerError::ServiceNotReady as i32,
                    message: "broker is not ready".into(),
                }),
                cnx: self.connection.clone(),
            });
        }
        self.record(&command);
        Ok(RpcResult {
            response: pb::BaseCommand::success(pb::CommandSuccess {
                request_id,
                consumer_name: String::new(),
            }),
            cnx: self.connection.clone(),
        })
    }

    async fn request_on_cnx(
        &self,
        _cnx: &dyn Connection,
        request_id: u64,
        command: pb::BaseCommand,
    ) -> Result<pb::BaseCommand, BlazarError> {
        self.record(&command);
        Ok(pb::BaseCommand::success(pb::CommandSuccess {
            request_id,
            consumer_name: String::new(),
        }))
    }

    async fn request_on_cnx_no_wait(
        &self,
        _cnx: &dyn Connection,
        _request_id: u64,
        command: pb::BaseCommand,
    ) -> Result<(), BlazarError> {
        self.record(&command);
        Ok(())
    }
}

fn wire_id(ledger: u64, entry: u64) -> pb::MessageIdData {
    pb::MessageIdData {
        ledger_id: ledger,
        entry_id: entry,
        partition: -1,
        batch_index: -1,
    }
}

fn frame(payload: &[u8]) -> Bytes {
    let metadata = pb::MessageMetadata {
        producer_name: "producer-1".into(),
        publish_time: 1_700_000_000_000,
        event_time: 1_700_000_000_250,
        partition_key: "key-1".into(),
        properties: vec![pb::KeyValue {
            key: "origin".into(),
            value: "test".into(),
        }],
        ..Default::default()
    };
    let metadata_bytes = metadata.encode_to_vec();
    let mut frame = BytesMut::with_capacity(4 + metadata_bytes.len() + payload.len());
    frame.put_u32(metadata_bytes.len() as u32);
    frame.put_slice(&metadata_bytes);
    frame.put_slice(payload);
    frame.freeze()
}

async fn push(
    handler: &Arc<dyn ConsumeHandler>,
    consumer_id: u64,
    ledger: u64,
    entry: u64,
    payload: &[u8],
) -> Result<(), BlazarError> {
    handler
        .handle_message(
            pb::CommandMessage {
                consumer_id,
                message_id: Some(wire_id(ledger, entry)),
                redelivery_count: 0,
            },
            frame(payload),
        )
        .await
}

async fn new_consumer(
    broker: &Arc<MockBroker>,
    topic: &str,
    partition_idx: i32,
    options: ConsumerOptions,
) -> Result<PartitionConsumer, BlazarError> {
    PartitionConsumer::new(
        broker.clone() as Arc<dyn LookupService>,
        broker.clone() as Arc<dyn RpcClient>,
        topic,
        partition_idx,
        options,
    )
    .await
}

#[tokio::test]
async fn subscribe_receive_ack() {
    let broker = MockBroker::new();
    let options = ConsumerOptions::builder("sub-orders")
        .with_receiver_queue_size(2)
        .build();
    let consumer = new_consumer(&broker, "orders-partition-0", 0, options)
        .await
        .unwrap();

    {
        let subscribes = broker.subscribes.lock().unwrap();
        assert_eq!(subscribes.len(), 1);
        assert_eq!(subscribes[0].subscription, "sub-orders");
        assert_eq!(subscribes[0].sub_type, pb::SubType::Exclusive as i32);
    }
    {
        let flows = broker.flows.lock().unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].message_permits, 2);
    }

    let handler = broker.handler(consumer.consumer_id());
    push(&handler, consumer.consumer_id(), 5, 1, b"one")
        .await
        .unwrap();
    push(&handler, consumer.consumer_id(), 5, 2, b"two")
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let first = consumer.receive(&cancel).await.unwrap();
    let second = consumer.receive(&cancel).await.unwrap();

    // In-order delivery, with the consumer's partition index substituted.
    assert_eq!(first.id(), MessageId::new(5, 1, -1, 0));
    assert_eq!(second.id(), MessageId::new(5, 2, -1, 0));
    assert_eq!(first.payload().as_ref(), b"one");
    assert_eq!(first.key(), "key-1");
    assert_eq!(
        first.properties().get("origin").map(String::as_str),
        Some("test")
    );

    consumer.ack(&first).await.unwrap();
    consumer.ack(&second).await.unwrap();

    let acks = broker.acks.lock().unwrap();
    assert_eq!(acks.len(), 2);
    for (ack, entry) in acks.iter().zip([1u64, 2]) {
        assert_eq!(ack.ack_type, pb::AckType::Individual as i32);
        assert_eq!(ack.message_id, vec![MessageId::new(5, entry as i64, -1, 0).to_wire()]);
    }
}

#[tokio::test]
async fn queue_full_pushes_overflow_once() {
    let broker = MockBroker::new();
    let options = ConsumerOptions::builder("sub-overflow")
        .with_receiver_queue_size(1)
        .build();
    let consumer = new_consumer(&broker, "orders-partition-1", 1, options)
        .await
        .unwrap();

    let handler = broker.handler(consumer.consumer_id());
    let consumer_id = consumer.consumer_id();

    push(&handler, consumer_id, 9, 1, b"fits").await.unwrap();
    for entry in [2u64, 3, 2, 3] {
        let rejected = push(&handler, consumer_id, 9, entry, b"spills").await;
        assert!(matches!(rejected, Err(BlazarError::QueueFull { .. })));
    }

    consumer.redeliver_unacknowledged().await.unwrap();
    {
        let redelivers = broker.redelivers.lock().unwrap();
        assert_eq!(redelivers.len(), 1);
        // The re-pushed duplicates must not appear twice.
        assert_eq!(redelivers[0].message_ids, vec![wire_id(9, 2), wire_id(9, 3)]);
    }

    // The overflow list was emptied; a second request is a no-op.
    consumer.redeliver_unacknowledged().await.unwrap();
    assert_eq!(broker.redelivers.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unacked_message_is_redelivered_after_timeout() {
    let broker = MockBroker::new();
    let options = ConsumerOptions::builder("sub-shared")
        .with_subscription_type(SubscriptionType::Shared)
        .with_ack_timeout(Duration::from_millis(200))
        .with_receiver_queue_size(10)
        .build();
    let consumer = new_consumer(&broker, "orders-partition-2", 2, options)
        .await
        .unwrap();

    let handler = broker.handler(consumer.consumer_id());
    push(&handler, consumer.consumer_id(), 3, 7, b"unacked")
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let message = consumer.receive(&cancel).await.unwrap();
    assert_eq!(message.id(), MessageId::new(3, 7, -1, 2));

    // No ack: by twice the timeout the id must have been redelivered.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let redelivers = broker.redelivers.lock().unwrap();
    assert!(!redelivers.is_empty(), "no redelivery was requested");
    assert_eq!(
        redelivers[0].message_ids,
        vec![MessageId::new(3, 7, -1, 2).to_wire()]
    );
}

#[tokio::test(start_paused = true)]
async fn acked_message_is_not_redelivered() {
    let broker = MockBroker::new();
    let options = ConsumerOptions::builder("sub-shared")
        .with_subscription_type(SubscriptionType::Shared)
        .with_ack_timeout(Duration::from_millis(200))
        .build();
    let consumer = new_consumer(&broker, "orders-partition-2", 2, options)
        .await
        .unwrap();

    let handler = broker.handler(consumer.consumer_id());
    push(&handler, consumer.consumer_id(), 3, 8, b"acked")
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let message = consumer.receive(&cancel).await.unwrap();
    consumer.ack(&message).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(broker.redelivers.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reconnect_preserves_identity_and_reflows() {
    let broker = MockBroker::new();
    let options = ConsumerOptions::builder("sub-reconnect")
        .with_receiver_queue_size(5)
        .build();
    let consumer = new_consumer(&broker, "orders-partition-3", 3, options)
        .await
        .unwrap();
    let consumer_id = consumer.consumer_id();

    // First reconnection attempt fails at lookup, forcing one backoff.
    broker.lookup_failures.store(1, Ordering::SeqCst);
    broker.handler(consumer_id).connection_closed();

    // The flow grant is the last step of the resubscribe handshake.
    for _ in 0..200 {
        if broker.flows.lock().unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let subscribes = broker.subscribes.lock().unwrap();
    assert_eq!(subscribes.len(), 2, "expected exactly one re-subscribe");
    assert_eq!(subscribes[0].consumer_id, subscribes[1].consumer_id);
    assert_eq!(subscribes[0].subscription, subscribes[1].subscription);

    // A fresh full-window flow accompanies the re-subscribe.
    let flows = broker.flows.lock().unwrap();
    assert_eq!(flows.len(), 2);
    assert_eq!(flows[1].message_permits, 5);
    assert!(broker.has_handler(consumer_id));
}

#[tokio::test]
async fn seek_sends_the_encoded_position() {
    let broker = MockBroker::new();
    let consumer = new_consumer(
        &broker,
        "orders-partition-4",
        4,
        ConsumerOptions::new("sub-seek"),
    )
    .await
    .unwrap();

    consumer.seek(MessageId::earliest()).await.unwrap();

    let seeks = broker.seeks.lock().unwrap();
    assert_eq!(seeks.len(), 1);
    assert_eq!(seeks[0].consumer_id, consumer.consumer_id());
    assert_eq!(seeks[0].message_id, Some(MessageId::earliest().to_wire()));
}

#[tokio::test]
async fn concurrent_close_sends_one_command() {
    let broker = MockBroker::new();
    let consumer = Arc::new(
        new_consumer(
            &broker,
            "orders-partition-5",
            5,
            ConsumerOptions::new("sub-close"),
        )
        .await
        .unwrap(),
    );

    let first = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.close().await }
    });
    let second = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        async move { consumer.close().await }
    });

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    consumer.close().await.unwrap();

    assert_eq!(broker.closes.lock().unwrap().len(), 1);
    assert!(!broker.has_handler(consumer.consumer_id()));

    // The delivery queue is observably closed, not deadlocked.
    let cancel = CancellationToken::new();
    assert!(matches!(
        consumer.receive(&cancel).await,
        Err(BlazarError::QueueClosed)
    ));
}

#[tokio::test]
async fn receive_async_accounts_flow_permits() {
    let broker = MockBroker::new();
    let options = ConsumerOptions::builder("sub-flow")
        .with_receiver_queue_size(4)
        .build();
    let consumer = Arc::new(
        new_consumer(&broker, "orders-partition-6", 6, options)
            .await
            .unwrap(),
    );

    let handler = broker.handler(consumer.consumer_id());
    for entry in 1..=4u64 {
        push(&handler, consumer.consumer_id(), 2, entry, b"m")
            .await
            .unwrap();
    }

    let (out_tx, out_rx) = flume::bounded(16);
    let cancel = CancellationToken::new();
    let forwarder = tokio::spawn({
        let consumer = Arc::clone(&consumer);
        let cancel = cancel.clone();
        async move { consumer.receive_async(&cancel, out_tx).await }
    });

    for _ in 0..4 {
        out_rx.recv_async().await.unwrap();
    }
    cancel.cancel();
    assert!(matches!(
        forwarder.await.unwrap(),
        Err(BlazarError::Cancelled)
    ));

    // Initial grant of capacity/2, then one refresh per high-water batch:
    // permits stay within `high` of the four forwarded messages.
    let flows = broker.flows.lock().unwrap();
    let permits: Vec<u32> = flows.iter().skip(1).map(|flow| flow.message_permits).collect();
    assert_eq!(permits, vec![2, 2, 2]);
}

#[tokio::test]
async fn subscription_settings_do_not_alias_across_consumers() {
    let broker = MockBroker::new();

    let shared_options = ConsumerOptions::builder("sub-shared")
        .with_subscription_type(SubscriptionType::Shared)
        .with_initial_position(InitialPosition::Earliest)
        .build();
    let exclusive_options = ConsumerOptions::builder("sub-exclusive")
        .with_subscription_type(SubscriptionType::Exclusive)
        .with_initial_position(InitialPosition::Latest)
        .build();

    let (shared, exclusive) = tokio::join!(
        new_consumer(&broker, "orders-partition-7", 7, shared_options),
        new_consumer(&broker, "orders-partition-8", 8, exclusive_options),
    );
    shared.unwrap();
    exclusive.unwrap();

    let subscribes = broker.subscribes.lock().unwrap();
    assert_eq!(subscribes.len(), 2);
    for subscribe in subscribes.iter() {
        match subscribe.subscription.as_str() {
            "sub-shared" => {
                assert_eq!(subscribe.sub_type, pb::SubType::Shared as i32);
                assert_eq!(
                    subscribe.initial_position,
                    pb::InitialPositionKind::Earliest as i32
                );
            }
            "sub-exclusive" => {
                assert_eq!(subscribe.sub_type, pb::SubType::Exclusive as i32);
                assert_eq!(
                    subscribe.initial_position,
                    pb::InitialPositionKind::Latest as i32
                );
            }
            other => panic!("unexpected subscription {other}"),
        }
    }
}

#[tokio::test]
async fn broker_error_fails_the_subscribe() {
    let broker = MockBroker::new();
    broker.subscribe_failures.store(1, Ordering::SeqCst);

    let result = new_consumer(
        &broker,
        "orders-partition-9",
        9,
        ConsumerOptions::new("sub-rejected"),
    )
    .await;

    match result {
        Err(BlazarError::SubscribeFailed { code, message }) => {
            assert_eq!(code, pb::ServerError::ServiceNotReady as i32);
            assert_eq!(message, "broker is not ready");
        }
        Err(other) => panic!("expected SubscribeFailed, got {other}"),
        Ok(_) => panic!("expected SubscribeFailed, got a live consumer"),
    }
}

#[tokio::test]
async fn unexpected_subscribe_response_is_an_error() {
    let broker = MockBroker::new();
    broker.garbage_subscribe_responses.store(1, Ordering::SeqCst);

    let result = new_consumer(
        &broker,
        "orders-partition-10",
        10,
        ConsumerOptions::new("sub-odd"),
    )
    .await;

    assert!(matches!(
        result,
        Err(BlazarError::UnexpectedResponse { .. })
    ));
}

#[tokio::test]
async fn unsubscribe_unregisters_the_handler() {
    let broker = MockBroker::new();
    let consumer = new_consumer(
        &broker,
        "orders-partition-11",
        11,
        ConsumerOptions::new("sub-bye"),
    )
    .await
    .unwrap();

    consumer.unsubscribe().await.unwrap();

    assert_eq!(broker.unsubscribes.lock().unwrap().len(), 1);
    assert!(!broker.has_handler(consumer.consumer_id()));
}

#[tokio::test]
async fn cancelled_receive_returns_cancelled() {
    let broker = MockBroker::new();
    let consumer = new_consumer(
        &broker,
        "orders-partition-12",
        12,
        ConsumerOptions::new("sub-cancel"),
    )
    .await
    .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        consumer.receive(&cancel).await,
        Err(BlazarError::Cancelled)
    ));
}

#[tokio::test]
async fn cumulative_ack_waits_and_reports() {
    let broker = MockBroker::new();
    let options = ConsumerOptions::builder("sub-cumulative")
        .with_subscription_type(SubscriptionType::Shared)
        .build();
    let consumer = new_consumer(&broker, "orders-partition-13", 13, options)
        .await
        .unwrap();

    let handler = broker.handler(consumer.consumer_id());
    push(&handler, consumer.consumer_id(), 6, 4, b"latest")
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let message = consumer.receive(&cancel).await.unwrap();
    consumer.ack_cumulative(&message).await.unwrap();

    let acks = broker.acks.lock().unwrap();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0].ack_type, pb::AckType::Cumulative as i32);
    assert_eq!(acks[0].message_id, vec![message.id().to_wire()]);
}
