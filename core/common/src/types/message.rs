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

use crate::types::message_id::MessageId;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::SystemTime;

/// A single message received from a broker. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Message {
    publish_time: SystemTime,
    event_time: SystemTime,
    key: String,
    payload: Bytes,
    id: MessageId,
    properties: HashMap<String, String>,
    topic: String,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        publish_time: SystemTime,
        event_time: SystemTime,
        key: String,
        payload: Bytes,
        id: MessageId,
        properties: HashMap<String, String>,
        topic: String,
    ) -> Self {
        Self {
            publish_time,
            event_time,
            key,
            payload,
            id,
            properties,
            topic,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn publish_time(&self) -> SystemTime {
        self.publish_time
    }

    pub fn event_time(&self) -> SystemTime {
        self.event_time
    }

    /// The partition key, empty when the producer did not set one.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// A message paired with the identity of the partition consumer that
/// received it, for readers draining several partitions into one channel.
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub message: Message,
    pub consumer_id: u64,
}
