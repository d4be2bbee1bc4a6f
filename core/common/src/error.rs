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

use thiserror::Error;

/// The error type for the Blazar client.
///
/// Consumer-facing operations return these directly; handler-level errors
/// (`QueueFull`) are surfaced to the connection layer for logging and are
/// never returned to the application.
#[derive(Debug, Error)]
pub enum BlazarError {
    /// Topic ownership lookup failed.
    #[error("Topic lookup failed for {topic}: {reason}")]
    LookupFailed { topic: String, reason: String },
    /// The broker rejected the SUBSCRIBE command.
    #[error("Subscribe failed with broker error {code}: {message}")]
    SubscribeFailed { code: i32, message: String },
    /// The broker answered a request with a command of the wrong type.
    #[error("Unexpected response of type {command_type} for request {request_id}")]
    UnexpectedResponse { command_type: i32, request_id: u64 },
    /// The delivery queue rejected an inbound message.
    #[error("Consumer message queue on topic {topic} is full (capacity = {capacity})")]
    QueueFull { topic: String, capacity: usize },
    /// The delivery queue has been closed.
    #[error("Receive queue closed")]
    QueueClosed,
    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,
    /// A byte string is not a valid message id encoding.
    #[error("Malformed message id: {0}")]
    MalformedId(String),
    /// An inbound frame could not be split into metadata and payload.
    #[error("Failed to parse message frame: {0}")]
    MalformedFrame(String),
    /// The broker connection dropped mid-operation.
    #[error("Connection lost")]
    ConnectionLost,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
