//! Binary map-form encoding of [`CommentEvent`] (DAG-CBOR).

use anyhow::{anyhow, Result};

use super::CommentEvent;

pub fn encode(event: &CommentEvent) -> Result<Vec<u8>> {
    serde_ipld_dagcbor::to_vec(event).map_err(|e| anyhow!("Failed to encode comment event: {e}"))
}

pub fn decode(bytes: &[u8]) -> Result<CommentEvent> {
    serde_ipld_dagcbor::from_slice(bytes)
        .map_err(|e| anyhow!("Failed to decode comment event: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventType;
    use chrono::{TimeZone, Utc};

    fn sample() -> CommentEvent {
        CommentEvent {
            event_id: "tg-3-10-created".to_string(),
            team_id: 3,
            post_id: 5,
            kind: EventType::Created,
            comment_id: 10,
            occurred_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        }
    }

    #[test]
    fn test_encoding_is_a_map_with_named_fields() {
        let bytes = encode(&sample()).unwrap();
        // CBOR major type 5 (map) with 6 entries.
        assert_eq!(bytes[0], 0xA6);
        let text = String::from_utf8_lossy(&bytes);
        for field in ["event_id", "team_id", "post_id", "type", "comment_id", "occurred_at"] {
            assert!(text.contains(field), "missing {field}");
        }
        assert!(text.contains("created"));
    }

    #[test]
    fn test_decode_keeps_millisecond_precision() {
        let decoded = decode(&encode(&sample()).unwrap()).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(b"\xFF\x00garbage").is_err());
    }
}
