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

use crate::pb;
use crate::types::message::ConsumerMessage;
use std::time::Duration;

pub const DEFAULT_RECEIVER_QUEUE_SIZE: usize = 1000;
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(30);

/// The bounded delivery queue between the connection layer and the
/// application. Multiple receive callers may drain the same queue.
pub type MessageChannel = (
    flume::Sender<ConsumerMessage>,
    flume::Receiver<ConsumerMessage>,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionType {
    #[default]
    Exclusive,
    Failover,
    Shared,
    KeyShared,
}

impl SubscriptionType {
    pub fn to_wire(self) -> pb::SubType {
        match self {
            SubscriptionType::Exclusive => pb::SubType::Exclusive,
            SubscriptionType::Failover => pb::SubType::Failover,
            SubscriptionType::Shared => pb::SubType::Shared,
            SubscriptionType::KeyShared => pb::SubType::KeyShared,
        }
    }

    /// Whether the broker may spread a subscription across consumers. Only
    /// these modes track ack timeouts client-side.
    pub fn is_shared(self) -> bool {
        matches!(self, SubscriptionType::Shared | SubscriptionType::KeyShared)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialPosition {
    #[default]
    Latest,
    Earliest,
}

impl InitialPosition {
    pub fn to_wire(self) -> pb::InitialPositionKind {
        match self {
            InitialPosition::Latest => pb::InitialPositionKind::Latest,
            InitialPosition::Earliest => pb::InitialPositionKind::Earliest,
        }
    }
}

/// Configuration for a partition consumer.
///
/// `subscription_name` is the only required option. All others fall back to
/// broker-friendly defaults when left at their zero values.
#[derive(Debug, Clone, Default)]
pub struct ConsumerOptions {
    pub subscription_name: String,
    /// Consumer name; the broker assigns one when absent.
    pub name: Option<String>,
    pub subscription_type: SubscriptionType,
    pub initial_position: InitialPosition,
    /// Capacity of the delivery queue; also the initial flow permit grant.
    pub receiver_queue_size: usize,
    /// How long a received message may stay unacknowledged before the
    /// client requests redelivery. Only honored for shared subscriptions.
    pub ack_timeout: Duration,
    /// Delivery queue to use instead of a freshly created one, so several
    /// partition consumers can feed a single reader.
    pub message_channel: Option<MessageChannel>,
}

impl ConsumerOptions {
    pub fn new(subscription_name: impl Into<String>) -> Self {
        Self {
            subscription_name: subscription_name.into(),
            ..Default::default()
        }
    }

    pub fn builder(subscription_name: impl Into<String>) -> ConsumerOptionsBuilder {
        ConsumerOptionsBuilder {
            options: Self::new(subscription_name),
        }
    }

    /// Replaces zero values with defaults, mirroring what the broker would
    /// otherwise assume.
    pub fn with_defaults(mut self) -> Self {
        if self.receiver_queue_size == 0 {
            self.receiver_queue_size = DEFAULT_RECEIVER_QUEUE_SIZE;
        }
        if self.ack_timeout.is_zero() {
            self.ack_timeout = DEFAULT_ACK_TIMEOUT;
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerOptionsBuilder {
    options: ConsumerOptions,
}

impl ConsumerOptionsBuilder {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    pub fn with_subscription_type(mut self, subscription_type: SubscriptionType) -> Self {
        self.options.subscription_type = subscription_type;
        self
    }

    pub fn with_initial_position(mut self, initial_position: InitialPosition) -> Self {
        self.options.initial_position = initial_position;
        self
    }

    pub fn with_receiver_queue_size(mut self, receiver_queue_size: usize) -> Self {
        self.options.receiver_queue_size = receiver_queue_size;
        self
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.options.ack_timeout = ack_timeout;
        self
    }

    pub fn with_message_channel(mut self, message_channel: MessageChannel) -> Self {
        self.options.message_channel = Some(message_channel);
        self
    }

    pub fn build(self) -> ConsumerOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_fall_back_to_defaults() {
        let options = ConsumerOptions::new("billing").with_defaults();
        assert_eq!(options.receiver_queue_size, DEFAULT_RECEIVER_QUEUE_SIZE);
        assert_eq!(options.ack_timeout, DEFAULT_ACK_TIMEOUT);
    }

    #[test]
    fn explicit_values_survive_defaulting() {
        let options = ConsumerOptions::builder("billing")
            .with_receiver_queue_size(5)
            .with_ack_timeout(Duration::from_millis(200))
            .build()
            .with_defaults();
        assert_eq!(options.receiver_queue_size, 5);
        assert_eq!(options.ack_timeout, Duration::from_millis(200));
    }

    #[test]
    fn shared_modes() {
        assert!(SubscriptionType::Shared.is_shared());
        assert!(SubscriptionType::KeyShared.is_shared());
        assert!(!SubscriptionType::Exclusive.is_shared());
        assert!(!SubscriptionType::Failover.is_shared());
    }
}
