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

//! Consumer-relevant subset of the Blazar broker command schema.
//!
//! Commands travel inside a [`BaseCommand`] envelope; the connection layer
//! owns framing and request-id correlation, so only the message bodies are
//! defined here. Field numbers are part of the wire contract and must not
//! change between releases.

/// Position of a single message within a partition.
///
/// `ledger_id`/`entry_id` are stored two's-complement so the `-1` sentinel
/// survives the uint64 encoding; `partition` and `batch_index` use `-1` for
/// "not partitioned" / "not batched".
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageIdData {
    #[prost(uint64, tag = "1")]
    pub ledger_id: u64,
    #[prost(uint64, tag = "2")]
    pub entry_id: u64,
    #[prost(int32, tag = "3")]
    pub partition: i32,
    #[prost(int32, tag = "4")]
    pub batch_index: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyValue {
    #[prost(string, tag = "1")]
    pub key: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub value: ::prost::alloc::string::String,
}

/// Metadata header preceding every payload pushed by the broker.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageMetadata {
    #[prost(string, tag = "1")]
    pub producer_name: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub sequence_id: u64,
    /// Publish time in unix milliseconds.
    #[prost(uint64, tag = "3")]
    pub publish_time: u64,
    #[prost(message, repeated, tag = "4")]
    pub properties: ::prost::alloc::vec::Vec<KeyValue>,
    #[prost(string, tag = "6")]
    pub partition_key: ::prost::alloc::string::String,
    /// Number of entries when the payload is a batch. Batch expansion is
    /// handled above this layer.
    #[prost(int32, tag = "11")]
    pub num_messages_in_batch: i32,
    /// Event time in unix milliseconds; zero when unset.
    #[prost(uint64, tag = "12")]
    pub event_time: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SubType {
    Exclusive = 0,
    Shared = 1,
    Failover = 2,
    KeyShared = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum InitialPositionKind {
    Latest = 0,
    Earliest = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandSubscribe {
    #[prost(string, tag = "1")]
    pub topic: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub subscription: ::prost::alloc::string::String,
    #[prost(enumeration = "SubType", tag = "3")]
    pub sub_type: i32,
    #[prost(uint64, tag = "4")]
    pub consumer_id: u64,
    #[prost(uint64, tag = "5")]
    pub request_id: u64,
    /// Empty when the broker should assign a name.
    #[prost(string, tag = "6")]
    pub consumer_name: ::prost::alloc::string::String,
    #[prost(enumeration = "InitialPositionKind", tag = "13")]
    pub initial_position: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandSuccess {
    #[prost(uint64, tag = "1")]
    pub request_id: u64,
    /// Broker-assigned consumer name, echoed back on subscribe.
    #[prost(string, tag = "2")]
    pub consumer_name: ::prost::alloc::string::String,
}

/// Broker error codes carried by [`CommandError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ServerError {
    UnknownError = 0,
    MetadataError = 1,
    PersistenceError = 2,
    AuthenticationError = 3,
    AuthorizationError = 4,
    ConsumerBusy = 5,
    ServiceNotReady = 6,
    TopicNotFound = 7,
    SubscriptionNotFound = 8,
    TooManyRequests = 9,
    TopicTerminated = 10,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandError {
    #[prost(uint64, tag = "1")]
    pub request_id: u64,
    #[prost(enumeration = "ServerError", tag = "2")]
    pub error: i32,
    #[prost(string, tag = "3")]
    pub message: ::prost::alloc::string::String,
}

/// Grants the broker permits to push more messages.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandFlow {
    #[prost(uint64, tag = "1")]
    pub consumer_id: u64,
    #[prost(uint32, tag = "2")]
    pub message_permits: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum AckType {
    Individual = 0,
    Cumulative = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandAck {
    #[prost(uint64, tag = "1")]
    pub consumer_id: u64,
    #[prost(enumeration = "AckType", tag = "2")]
    pub ack_type: i32,
    #[prost(message, repeated, tag = "3")]
    pub message_id: ::prost::alloc::vec::Vec<MessageIdData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandSeek {
    #[prost(uint64, tag = "1")]
    pub consumer_id: u64,
    #[prost(uint64, tag = "2")]
    pub request_id: u64,
    #[prost(message, optional, tag = "3")]
    pub message_id: ::core::option::Option<MessageIdData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandUnsubscribe {
    #[prost(uint64, tag = "1")]
    pub consumer_id: u64,
    #[prost(uint64, tag = "2")]
    pub request_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandRedeliverUnacknowledgedMessages {
    #[prost(uint64, tag = "1")]
    pub consumer_id: u64,
    /// Empty means "redeliver everything unacknowledged on this consumer".
    #[prost(message, repeated, tag = "2")]
    pub message_ids: ::prost::alloc::vec::Vec<MessageIdData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandCloseConsumer {
    #[prost(uint64, tag = "1")]
    pub consumer_id: u64,
    #[prost(uint64, tag = "2")]
    pub request_id: u64,
}

/// Broker push notifying the consumer of one inbound message. The metadata
/// and payload follow the envelope as a separate byte section.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommandMessage {
    #[prost(uint64, tag = "1")]
    pub consumer_id: u64,
    #[prost(message, optional, tag = "2")]
    pub message_id: ::core::option::Option<MessageIdData>,
    #[prost(uint32, tag = "3")]
    pub redelivery_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum CommandType {
    Subscribe = 1,
    Success = 2,
    Error = 3,
    Message = 4,
    Ack = 5,
    Flow = 6,
    Unsubscribe = 7,
    Seek = 8,
    RedeliverUnacknowledgedMessages = 9,
    CloseConsumer = 10,
}

/// Command envelope. Exactly one body field matching `command_type` is set.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BaseCommand {
    #[prost(enumeration = "CommandType", tag = "1")]
    pub command_type: i32,
    #[prost(message, optional, tag = "2")]
    pub subscribe: ::core::option::Option<CommandSubscribe>,
    #[prost(message, optional, tag = "3")]
    pub success: ::core::option::Option<CommandSuccess>,
    #[prost(message, optional, tag = "4")]
    pub error: ::core::option::Option<CommandError>,
    #[prost(message, optional, tag = "5")]
    pub message: ::core::option::Option<CommandMessage>,
    #[prost(message, optional, tag = "6")]
    pub ack: ::core::option::Option<CommandAck>,
    #[prost(message, optional, tag = "7")]
    pub flow: ::core::option::Option<CommandFlow>,
    #[prost(message, optional, tag = "8")]
    pub unsubscribe: ::core::option::Option<CommandUnsubscribe>,
    #[prost(message, optional, tag = "9")]
    pub seek: ::core::option::Option<CommandSeek>,
    #[prost(message, optional, tag = "10")]
    pub redeliver_unacknowledged_messages:
        ::core::option::Option<CommandRedeliverUnacknowledgedMessages>,
    #[prost(message, optional, tag = "11")]
    pub close_consumer: ::core::option::Option<CommandCloseConsumer>,
}

impl BaseCommand {
    pub fn subscribe(cmd: CommandSubscribe) -> Self {
        Self {
            command_type: CommandType::Subscribe as i32,
            subscribe: Some(cmd),
            ..Default::default()
        }
    }

    pub fn success(cmd: CommandSuccess) -> Self {
        Self {
            command_type: CommandType::Success as i32,
            success: Some(cmd),
            ..Default::default()
        }
    }

    pub fn error(cmd: CommandError) -> Self {
        Self {
            command_type: CommandType::Error as i32,
            error: Some(cmd),
            ..Default::default()
        }
    }

    pub fn message(cmd: CommandMessage) -> Self {
        Self {
            command_type: CommandType::Message as i32,
            message: Some(cmd),
            ..Default::default()
        }
    }

    pub fn ack(cmd: CommandAck) -> Self {
        Self {
            command_type: CommandType::Ack as i32,
            ack: Some(cmd),
            ..Default::default()
        }
    }

    pub fn flow(cmd: CommandFlow) -> Self {
        Self {
            command_type: CommandType::Flow as i32,
            flow: Some(cmd),
            ..Default::default()
        }
    }

    pub fn unsubscribe(cmd: CommandUnsubscribe) -> Self {
        Self {
            command_type: CommandType::Unsubscribe as i32,
            unsubscribe: Some(cmd),
            ..Default::default()
        }
    }

    pub fn seek(cmd: CommandSeek) -> Self {
        Self {
            command_type: CommandType::Seek as i32,
            seek: Some(cmd),
            ..Default::default()
        }
    }

    pub fn redeliver_unacknowledged_messages(
        cmd: CommandRedeliverUnacknowledgedMessages,
    ) -> Self {
        Self {
            command_type: CommandType::RedeliverUnacknowledgedMessages as i32,
            redeliver_unacknowledged_messages: Some(cmd),
            ..Default::default()
        }
    }

    pub fn close_consumer(cmd: CommandCloseConsumer) -> Self {
        Self {
            command_type: CommandType::CloseConsumer as i32,
            close_consumer: Some(cmd),
            ..Default::default()
        }
    }

    /// The envelope's command type, if it is one this client understands.
    pub fn kind(&self) -> Option<CommandType> {
        CommandType::try_from(self.command_type).ok()
    }
}
