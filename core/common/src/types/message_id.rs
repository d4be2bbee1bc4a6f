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

use crate::error::BlazarError;
use crate::pb;
use bytes::Bytes;
use prost::Message as _;
use std::fmt;

/// Position of a message: `(ledger, entry, batch index, partition index)`.
///
/// `batch_idx == -1` means the message is not part of a batch and
/// `partition_idx == -1` means the topic is not partitioned. Applications
/// that persist cursors rely on [`MessageId::to_bytes`] being stable
/// byte-for-byte across client versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    pub ledger_id: i64,
    pub entry_id: i64,
    pub batch_idx: i32,
    pub partition_idx: i32,
}

impl MessageId {
    pub fn new(ledger_id: i64, entry_id: i64, batch_idx: i32, partition_idx: i32) -> Self {
        Self {
            ledger_id,
            entry_id,
            batch_idx,
            partition_idx,
        }
    }

    /// The position before the first available message.
    pub fn earliest() -> Self {
        Self::new(-1, -1, -1, -1)
    }

    /// The position after the last published message.
    pub fn latest() -> Self {
        Self::new(i64::MAX, i64::MAX, -1, -1)
    }

    pub fn is_batched(&self) -> bool {
        self.batch_idx >= 0
    }

    /// The wire-form identifier, without going through the byte encoding.
    pub fn to_wire(&self) -> pb::MessageIdData {
        pb::MessageIdData {
            ledger_id: self.ledger_id as u64,
            entry_id: self.entry_id as u64,
            partition: self.partition_idx,
            batch_index: self.batch_idx,
        }
    }

    pub fn from_wire(wire: &pb::MessageIdData) -> Self {
        Self::new(
            wire.ledger_id as i64,
            wire.entry_id as i64,
            wire.batch_index,
            wire.partition,
        )
    }

    /// Canonical byte serialization: the protobuf encoding of the wire form.
    pub fn to_bytes(&self) -> Bytes {
        self.to_wire().encode_to_vec().into()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlazarError> {
        let wire = pb::MessageIdData::decode(bytes)
            .map_err(|error| BlazarError::MalformedId(error.to_string()))?;
        Ok(Self::from_wire(&wire))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.ledger_id, self.entry_id, self.batch_idx, self.partition_idx
        )
    }
}

impl From<&pb::MessageIdData> for MessageId {
    fn from(wire: &pb::MessageIdData) -> Self {
        Self::from_wire(wire)
    }
}

impl From<MessageId> for pb::MessageIdData {
    fn from(id: MessageId) -> Self {
        id.to_wire()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_round_trip() {
        let ids = [
            MessageId::new(0, 0, -1, -1),
            MessageId::new(1024, 77, 3, 12),
            MessageId::earliest(),
            MessageId::latest(),
        ];
        for id in ids {
            let restored = MessageId::from_bytes(&id.to_bytes()).unwrap();
            assert_eq!(restored, id);
        }
    }

    #[test]
    fn encoding_is_stable() {
        let id = MessageId::new(42, 7, -1, 3);
        assert_eq!(id.to_bytes(), id.to_bytes());
        assert_eq!(id.to_bytes(), MessageId::from_bytes(&id.to_bytes()).unwrap().to_bytes());
    }

    #[test]
    fn sentinels() {
        let earliest = MessageId::earliest();
        assert_eq!(earliest.ledger_id, -1);
        assert_eq!(earliest.entry_id, -1);
        assert_eq!(earliest.batch_idx, -1);
        assert_eq!(earliest.partition_idx, -1);

        let latest = MessageId::latest();
        assert_eq!(latest.ledger_id, i64::MAX);
        assert_eq!(latest.entry_id, i64::MAX);
        assert_eq!(latest.batch_idx, -1);
        assert_eq!(latest.partition_idx, -1);
    }

    #[test]
    fn wire_form_matches_byte_form() {
        use prost::Message as _;

        let id = MessageId::new(9, 18, 2, 1);
        let direct = id.to_wire().encode_to_vec();
        assert_eq!(direct.as_slice(), id.to_bytes().as_ref());
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        // Truncated varint: field 1 header followed by a continuation byte
        // with no terminator.
        let garbage = [0x08, 0xff];
        assert!(matches!(
            MessageId::from_bytes(&garbage),
            Err(BlazarError::MalformedId(_))
        ));
    }

    #[test]
    fn batch_flag() {
        assert!(MessageId::new(1, 1, 0, -1).is_batched());
        assert!(!MessageId::new(1, 1, -1, -1).is_batched());
    }
}
