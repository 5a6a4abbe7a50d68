//! `verb|json` message helpers shared by every channel.

use serde_json::Value;

/// Join a verb and an optional JSON payload into one text message. An
/// absent or empty payload yields the bare verb: consumers distinguish
/// "no data" by the missing `|`, not by an empty JSON value.
pub fn join(data: &str, message: Option<&Value>) -> String {
    match message {
        Some(value) if !is_empty(value) => format!("{data}|{value}"),
        _ => data.to_string(),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::Bool(true) => false,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Split an inbound message into its verb and raw payload. Messages without
/// a `|` have an empty payload.
pub fn split(message: &str) -> (&str, &str) {
    match message.split_once('|') {
        Some((cmd, data)) => (cmd, data),
        None => (message, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_without_payload() {
        assert_eq!(join("Die", None), "Die");
    }

    #[test]
    fn join_with_object_payload() {
        let payload = json!({"uuid": "abc"});
        assert_eq!(join("AddSocket", Some(&payload)), "AddSocket|{\"uuid\":\"abc\"}");
    }

    #[test]
    fn join_with_string_payload_keeps_json_quotes() {
        let payload = Value::String("abc".to_string());
        assert_eq!(join("AddWebSocket", Some(&payload)), "AddWebSocket|\"abc\"");
    }

    #[test]
    fn empty_payload_sends_the_bare_verb() {
        assert_eq!(join("KeepProcess", Some(&json!([]))), "KeepProcess");
        assert_eq!(join("AddBreak", Some(&json!({}))), "AddBreak");
        assert_eq!(join("AddWebSocket", Some(&Value::String(String::new()))), "AddWebSocket");
        assert_eq!(join("KeepProcess", Some(&json!([3, 4]))), "KeepProcess|[3,4]");
    }

    #[test]
    fn split_on_first_pipe_only() {
        assert_eq!(split("Broadcast|Continue|now"), ("Broadcast", "Continue|now"));
        assert_eq!(split("ListSockets"), ("ListSockets", ""));
    }
}
