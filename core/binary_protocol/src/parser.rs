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

use blazar_common::pb::{KeyValue, MessageMetadata};
use blazar_common::BlazarError;
use bytes::{Buf, Bytes};
use prost::Message as _;
use std::collections::HashMap;

const METADATA_LENGTH_BYTES: usize = 4;

/// A broker frame split into its metadata header and raw payload.
pub struct ParsedMessage {
    pub metadata: MessageMetadata,
    pub payload: Bytes,
}

/// Splits a `headers_and_payload` section into metadata and payload.
///
/// Layout: a 4-byte big-endian metadata length, the serialized
/// [`MessageMetadata`], then the payload taking up the rest of the frame.
pub fn parse_message(mut headers_and_payload: Bytes) -> Result<ParsedMessage, BlazarError> {
    if headers_and_payload.len() < METADATA_LENGTH_BYTES {
        return Err(BlazarError::MalformedFrame(format!(
            "frame of {} bytes is too short for a metadata length",
            headers_and_payload.len()
        )));
    }

    let metadata_length = headers_and_payload.get_u32() as usize;
    if headers_and_payload.len() < metadata_length {
        return Err(BlazarError::MalformedFrame(format!(
            "metadata length {} exceeds remaining frame of {} bytes",
            metadata_length,
            headers_and_payload.len()
        )));
    }

    let metadata_bytes = headers_and_payload.split_to(metadata_length);
    let metadata = MessageMetadata::decode(metadata_bytes)
        .map_err(|error| BlazarError::MalformedFrame(error.to_string()))?;

    Ok(ParsedMessage {
        metadata,
        payload: headers_and_payload,
    })
}

/// Flattens a metadata property list into a string map. Later entries win
/// on duplicate keys.
pub fn properties_to_map(properties: &[KeyValue]) -> HashMap<String, String> {
    properties
        .iter()
        .map(|property| (property.key.clone(), property.value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn frame(metadata: &MessageMetadata, payload: &[u8]) -> Bytes {
        let metadata_bytes = metadata.encode_to_vec();
        let mut frame = BytesMut::with_capacity(4 + metadata_bytes.len() + payload.len());
        frame.put_u32(metadata_bytes.len() as u32);
        frame.put_slice(&metadata_bytes);
        frame.put_slice(payload);
        frame.freeze()
    }

    #[test]
    fn splits_metadata_and_payload() {
        let metadata = MessageMetadata {
            producer_name: "producer-1".into(),
            publish_time: 1_700_000_000_000,
            event_time: 1_700_000_000_500,
            partition_key: "order-66".into(),
            properties: vec![KeyValue {
                key: "region".into(),
                value: "eu".into(),
            }],
            ..Default::default()
        };

        let parsed = parse_message(frame(&metadata, b"hello")).unwrap();
        assert_eq!(parsed.metadata, metadata);
        assert_eq!(parsed.payload.as_ref(), b"hello");
    }

    #[test]
    fn empty_payload_is_valid() {
        let parsed = parse_message(frame(&MessageMetadata::default(), b"")).unwrap();
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn short_frame_is_rejected() {
        assert!(matches!(
            parse_message(Bytes::from_static(&[0, 0])),
            Err(BlazarError::MalformedFrame(_))
        ));
    }

    #[test]
    fn truncated_metadata_is_rejected() {
        let mut bad = BytesMut::new();
        bad.put_u32(128);
        bad.put_slice(b"way too short");
        assert!(matches!(
            parse_message(bad.freeze()),
            Err(BlazarError::MalformedFrame(_))
        ));
    }

    #[test]
    fn later_duplicate_property_wins() {
        let properties = [
            KeyValue {
                key: "k".into(),
                value: "first".into(),
            },
            KeyValue {
                key: "k".into(),
                value: "second".into(),
            },
        ];
        let map = properties_to_map(&properties);
        assert_eq!(map.get("k").map(String::as_str), Some("second"));
    }
}
