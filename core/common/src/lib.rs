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

mod error;
mod types;
mod utils;

pub mod pb;

// Errors
pub use error::BlazarError;
// Types
pub use types::consumer::{
    ConsumerOptions, ConsumerOptionsBuilder, InitialPosition, MessageChannel, SubscriptionType,
    DEFAULT_ACK_TIMEOUT, DEFAULT_RECEIVER_QUEUE_SIZE,
};
pub use types::message::{ConsumerMessage, Message};
pub use types::message_id::MessageId;
// Utils
pub use utils::timestamp::{timestamp_from_unix_millis, timestamp_to_unix_millis};
