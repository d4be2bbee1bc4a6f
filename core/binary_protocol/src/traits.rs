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

//! Seams between the consumer state machine and the connection layer.
//!
//! The multiplexed connection layer frames command envelopes, correlates
//! request ids and dispatches inbound pushes to the registered consume
//! handler; the topic lookup service resolves which broker owns a
//! partition. The consumer only ever talks to these traits, which keeps it
//! testable against an in-memory broker.

use async_trait::async_trait;
use blazar_common::pb::{BaseCommand, CommandMessage};
use blazar_common::BlazarError;
use bytes::Bytes;
use std::sync::Arc;

/// Broker addresses for one topic partition. The logical address is the
/// advertised broker URL; the physical address is where the TCP connection
/// actually goes (they differ behind proxies).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupResult {
    pub logical_addr: String,
    pub physical_addr: String,
}

#[async_trait]
pub trait LookupService: Send + Sync {
    async fn lookup(&self, topic: &str) -> Result<LookupResult, BlazarError>;
}

/// One multiplexed broker connection. Consumers register themselves here to
/// receive inbound message pushes for their consumer id.
pub trait Connection: Send + Sync {
    fn add_consume_handler(&self, consumer_id: u64, handler: Arc<dyn ConsumeHandler>);
    fn delete_consume_handler(&self, consumer_id: u64);
}

/// Response to a correlated request together with the connection that
/// served it, so the caller can pin follow-up commands to the same broker.
pub struct RpcResult {
    pub response: BaseCommand,
    pub cnx: Arc<dyn Connection>,
}

#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Allocates a request id unique within this client.
    fn new_request_id(&self) -> u64;

    /// Allocates a consumer id unique within this client. Consumer ids are
    /// stable for the lifetime of a consumer, across reconnects.
    fn new_consumer_id(&self) -> u64;

    /// Sends a command to the broker that owns `physical_addr`, opening or
    /// reusing a connection, and awaits the correlated response.
    async fn request(
        &self,
        logical_addr: &str,
        physical_addr: &str,
        request_id: u64,
        command: BaseCommand,
    ) -> Result<RpcResult, BlazarError>;

    /// Sends a command on an established connection and awaits the
    /// correlated response.
    async fn request_on_cnx(
        &self,
        cnx: &dyn Connection,
        request_id: u64,
        command: BaseCommand,
    ) -> Result<BaseCommand, BlazarError>;

    /// Sends a command on an established connection without waiting for any
    /// response.
    async fn request_on_cnx_no_wait(
        &self,
        cnx: &dyn Connection,
        request_id: u64,
        command: BaseCommand,
    ) -> Result<(), BlazarError>;
}

/// Callbacks a consumer registers with the connection layer.
#[async_trait]
pub trait ConsumeHandler: Send + Sync {
    /// Invoked for every MESSAGE push addressed to this consumer id.
    /// `headers_and_payload` is the serialized metadata header followed by
    /// the raw payload.
    async fn handle_message(
        &self,
        command: CommandMessage,
        headers_and_payload: Bytes,
    ) -> Result<(), BlazarError>;

    /// Invoked once when the underlying connection drops.
    fn connection_closed(&self);
}
