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

//! Prelude module for the Blazar SDK.
//!
//! Re-exports the most common types and traits so applications can bring
//! the whole surface in with a single import:
//!
//! ```
//! use blazar::prelude::*;
//! ```

pub use crate::consumer::{PartitionConsumer, RedeliverOverflow, UnackedMessageTracker};

pub use blazar_binary_protocol::{
    parse_message, properties_to_map, Connection, ConsumeHandler, LookupResult, LookupService,
    ParsedMessage, RpcClient, RpcResult,
};
pub use blazar_common::{
    BlazarError, ConsumerMessage, ConsumerOptions, ConsumerOptionsBuilder, InitialPosition,
    Message, MessageChannel, MessageId, SubscriptionType, DEFAULT_ACK_TIMEOUT,
    DEFAULT_RECEIVER_QUEUE_SIZE,
};
