use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::RelayError;

/// A message received from the provider, normalized to a single canonical
/// shape regardless of which read endpoint produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    /// Originator id with any provider domain suffix stripped
    pub sender: String,
    /// Trimmed message body; never empty
    pub text: String,
    /// Sent by the relay's own account
    pub from_self: bool,
    /// Originated in a multi-party conversation
    pub from_group: bool,
    /// Stable dedup key, derived deterministically from the record
    pub event_id: String,
}

/// Normalize a raw provider payload into canonical events.
///
/// The provider returns one of three shapes depending on the endpoint:
/// a flat array of message records, an array of chat records each carrying
/// a `messages` array, or an array of chat records each carrying a single
/// `lastMessage` summary. A record that cannot be normalized is skipped;
/// it never fails the batch.
pub fn normalize_payload(payload: &Value) -> Vec<ChatEvent> {
    let Some(items) = payload.as_array() else {
        return Vec::new();
    };

    let mut events = Vec::new();
    for item in items {
        if let Some(messages) = item.get("messages").and_then(Value::as_array) {
            for record in messages {
                collect(&mut events, record, item);
            }
            continue;
        }
        if let Some(last) = item.get("lastMessage") {
            collect(&mut events, last, item);
            continue;
        }
        collect(&mut events, item, item);
    }
    events
}

/// Normalize a pushed webhook body: either the simple `{sender, text}`
/// shape, a single provider-native record, or a full payload array.
pub fn normalize_push(body: &Value) -> Vec<ChatEvent> {
    if body.is_array() {
        return normalize_payload(body);
    }

    let record = match (
        body.get("sender").and_then(Value::as_str),
        body.get("text").and_then(Value::as_str),
    ) {
        // Rewrite the simple push shape into a provider-style record so
        // both shapes flow through the same normalization.
        (Some(sender), Some(text)) => serde_json::json!({
            "phone": sender,
            "message": text,
            "messageId": body.get("messageId").cloned().unwrap_or(Value::Null),
            "momment": body.get("momment").cloned().unwrap_or(Value::Null),
        }),
        _ => body.clone(),
    };

    let mut events = Vec::new();
    collect(&mut events, &record, &record);
    events
}

fn collect(events: &mut Vec<ChatEvent>, record: &Value, chat: &Value) {
    match normalize_record(record, chat) {
        Ok(event) => events.push(event),
        Err(e) => debug!("skipping record: {}", e),
    }
}

fn normalize_record(record: &Value, chat: &Value) -> Result<ChatEvent, RelayError> {
    let text = extract_text(record)
        .ok_or_else(|| RelayError::MalformedRecord("no usable message text".into()))?;

    let raw_sender = record
        .get("phone")
        .and_then(Value::as_str)
        .or_else(|| chat.get("phone").and_then(Value::as_str))
        .ok_or_else(|| RelayError::MalformedRecord("no sender identifier".into()))?;

    let from_self = record
        .get("fromMe")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(ChatEvent {
        event_id: derive_event_id(record, strip_domain(raw_sender), &text),
        sender: strip_domain(raw_sender).to_string(),
        from_group: detect_group(record, chat, raw_sender),
        text,
        from_self,
    })
}

/// Message text lives in a flat `message` field or a nested `text.body`,
/// depending on the endpoint. Empty text invalidates the record.
fn extract_text(record: &Value) -> Option<String> {
    let raw = record
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| {
            record
                .get("text")
                .and_then(|t| t.get("body"))
                .and_then(Value::as_str)
        })?
        .trim();

    if raw.is_empty() {
        return None;
    }
    Some(raw.to_string())
}

/// Drop provider domain suffixes like `@c.us` or `@s.whatsapp.net`.
fn strip_domain(sender: &str) -> &str {
    sender.split('@').next().unwrap_or(sender)
}

fn detect_group(record: &Value, chat: &Value, raw_sender: &str) -> bool {
    let flagged = |v: &Value| v.get("isGroup").and_then(Value::as_bool).unwrap_or(false);
    flagged(record)
        || flagged(chat)
        || raw_sender.ends_with("@g.us")
        || raw_sender.to_lowercase().contains("group")
}

/// Dedup key: the provider message id when present, otherwise a hash of
/// (sender, text, coarse time bucket). Pure function of the record, so two
/// normalizations of the same underlying message always agree.
fn derive_event_id(record: &Value, sender: &str, text: &str) -> String {
    if let Some(id) = record
        .get("messageId")
        .and_then(Value::as_str)
        .or_else(|| record.get("id").and_then(Value::as_str))
    {
        return id.to_string();
    }

    let ts = record
        .get("momment")
        .and_then(Value::as_u64)
        .or_else(|| record.get("timestamp").and_then(Value::as_u64))
        .unwrap_or(0);

    sha256_hex(&format!("{}\n{}\n{}", sender, text, time_bucket(ts)))
}

// "momment" is reported in milliseconds, "timestamp" in unix seconds; both
// land in the same one-minute bucket for the same instant.
fn time_bucket(ts: u64) -> u64 {
    if ts >= 1_000_000_000_000 {
        ts / 60_000
    } else {
        ts / 60
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_flat_message_records() {
        let payload = json!([
            {"phone": "5511999@c.us", "message": "  Preciso de Zumo  ", "fromMe": false, "messageId": "m-1"}
        ]);

        let events = normalize_payload(&payload);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sender, "5511999");
        assert_eq!(events[0].text, "Preciso de Zumo");
        assert_eq!(events[0].event_id, "m-1");
        assert!(!events[0].from_self);
        assert!(!events[0].from_group);
    }

    #[test]
    fn normalizes_chat_records_with_embedded_messages() {
        let payload = json!([
            {
                "phone": "5511999",
                "messages": [
                    {"message": "zumo um", "messageId": "m-1"},
                    {"message": "zumo dois", "messageId": "m-2"}
                ]
            }
        ]);

        let events = normalize_payload(&payload);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sender, "5511999");
        assert_eq!(events[1].event_id, "m-2");
    }

    #[test]
    fn normalizes_chat_records_with_last_message_summary() {
        let payload = json!([
            {"phone": "5511999", "lastMessage": {"message": "zumo", "messageId": "m-9"}}
        ]);

        let events = normalize_payload(&payload);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "m-9");
        assert_eq!(events[0].text, "zumo");
    }

    #[test]
    fn same_message_yields_same_id_across_shapes() {
        let record = json!({"phone": "5511999", "message": "Preciso de Zumo", "messageId": "abc"});
        let flat = json!([record]);
        let nested = json!([{"phone": "5511999", "messages": [record]}]);
        let summary = json!([{"phone": "5511999", "lastMessage": record}]);

        let a = normalize_payload(&flat);
        let b = normalize_payload(&nested);
        let c = normalize_payload(&summary);
        assert_eq!(a[0].event_id, b[0].event_id);
        assert_eq!(b[0].event_id, c[0].event_id);
    }

    #[test]
    fn hash_fallback_is_deterministic_without_message_id() {
        let payload = json!([
            {"phone": "5511999@c.us", "message": "zumo", "momment": 1700000000123u64}
        ]);

        let first = normalize_payload(&payload);
        let second = normalize_payload(&payload);
        assert_eq!(first[0].event_id, second[0].event_id);
        assert_eq!(first[0].event_id.len(), 64);
    }

    #[test]
    fn millisecond_and_second_timestamps_agree_on_the_bucket() {
        let ms = json!([{"phone": "5511999", "message": "zumo", "momment": 1700000000000u64}]);
        let secs = json!([{"phone": "5511999", "message": "zumo", "timestamp": 1700000000u64}]);

        let a = normalize_payload(&ms);
        let b = normalize_payload(&secs);
        assert_eq!(a[0].event_id, b[0].event_id);
    }

    #[test]
    fn empty_text_invalidates_the_record() {
        let payload = json!([
            {"phone": "5511999", "message": "   "},
            {"phone": "5511999", "message": "zumo", "messageId": "m-1"}
        ]);

        let events = normalize_payload(&payload);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "m-1");
    }

    #[test]
    fn falls_back_to_nested_text_body() {
        let payload = json!([
            {"phone": "5511999", "text": {"body": "preciso de zumo"}, "messageId": "m-1"}
        ]);

        let events = normalize_payload(&payload);
        assert_eq!(events[0].text, "preciso de zumo");
    }

    #[test]
    fn malformed_record_does_not_abort_siblings() {
        let payload = json!([
            {"message": "no sender here"},
            {"phone": "5511999", "message": "zumo", "messageId": "m-1"},
            42
        ]);

        let events = normalize_payload(&payload);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "m-1");
    }

    #[test]
    fn strips_provider_domain_suffix() {
        let payload = json!([
            {"phone": "5511999@s.whatsapp.net", "message": "zumo", "messageId": "m-1"}
        ]);

        assert_eq!(normalize_payload(&payload)[0].sender, "5511999");
    }

    #[test]
    fn flags_self_and_group_origin() {
        let payload = json!([
            {"phone": "5511999", "message": "zumo", "fromMe": true, "messageId": "m-1"},
            {"phone": "556688-group@g.us", "message": "zumo", "messageId": "m-2"},
            {"phone": "5511999", "message": "zumo", "isGroup": true, "messageId": "m-3"}
        ]);

        let events = normalize_payload(&payload);
        assert!(events[0].from_self);
        assert!(events[1].from_group);
        assert!(events[2].from_group);
    }

    #[test]
    fn push_body_with_sender_and_text_is_accepted() {
        let events = normalize_push(&json!({"sender": "5511999", "text": "Preciso de Zumo"}));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sender, "5511999");
        assert_eq!(events[0].text, "Preciso de Zumo");
    }

    #[test]
    fn push_body_with_provider_record_is_accepted() {
        let events =
            normalize_push(&json!({"phone": "5511999@c.us", "message": "zumo", "fromMe": true}));
        assert_eq!(events.len(), 1);
        assert!(events[0].from_self);
    }

    #[test]
    fn malformed_push_body_yields_nothing() {
        assert!(normalize_push(&json!({"unrelated": true})).is_empty());
        assert!(normalize_push(&json!({"sender": "x", "text": "   "})).is_empty());
    }
}
