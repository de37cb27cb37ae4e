//! The replication micro-format.
//!
//! A serialized session is one line of JSON-shaped text with a fixed key
//! set and a single nested `attributes` object:
//!
//! ```text
//! {"id":"<id>","creationTime":"<ms>","lastAccessedTime":"<ms>","maxInactiveInterval":<n>,"attributes":{"k":"v",...}}
//! ```
//!
//! This is a hand-rolled grammar, not general JSON. Attribute values are
//! written via their string representation, so non-string values come back
//! as strings on the far side. Values containing unescaped commas, braces
//! or quotes are not representable; peers must agree not to send them.
//!
//! A replication request body prefixes the payload with an action line:
//!
//! ```text
//! ACTION=SAVE\n<serialized-session>
//! ACTION=DELETE\nsessionId=<id>
//! ```

use crate::session::{Session, DEFAULT_MAX_INACTIVE_INTERVAL};
use hearth_cluster::{HearthError, Result};
use serde_json::Value;
use std::collections::HashMap;

/// A decoded replication request.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationAction {
    Save(Session),
    Delete(String),
}

/// Serializes a session to the wire line.
pub fn encode_session(session: &Session) -> String {
    let mut out = String::new();
    out.push('{');
    out.push_str(&format!("\"id\":\"{}\",", session.id()));
    out.push_str(&format!("\"creationTime\":\"{}\",", session.creation_time()));
    out.push_str(&format!(
        "\"lastAccessedTime\":\"{}\",",
        session.last_accessed_time()
    ));
    out.push_str(&format!(
        "\"maxInactiveInterval\":{},",
        session.max_inactive_interval()
    ));
    out.push_str("\"attributes\":{");
    let mut first = true;
    for (key, value) in session.attributes() {
        if !first {
            out.push(',');
        }
        first = false;
        out.push_str(&format!("\"{}\":\"{}\"", key, value_text(value)));
    }
    out.push_str("}}");
    out
}

/// Parses the wire line back into a session.
pub fn decode_session(text: &str) -> Result<Session> {
    let inner = strip_braces(text.trim())?;

    let mut id = None;
    let mut creation_time = None;
    let mut last_accessed_time = None;
    let mut max_inactive_interval = DEFAULT_MAX_INACTIVE_INTERVAL;
    let mut attributes = HashMap::new();

    for pair in split_top_level(inner) {
        let (key, value) = split_pair(pair)?;
        match key {
            "id" => id = Some(unquote(value).to_string()),
            "creationTime" => creation_time = Some(parse_millis("creationTime", unquote(value))?),
            "lastAccessedTime" => {
                last_accessed_time = Some(parse_millis("lastAccessedTime", unquote(value))?)
            }
            "maxInactiveInterval" => {
                max_inactive_interval = value.parse().map_err(|_| {
                    HearthError::Parse(format!("invalid maxInactiveInterval: {}", value))
                })?
            }
            "attributes" => {
                let inner = strip_braces(value)?;
                for pair in split_top_level(inner) {
                    let (k, v) = split_pair(pair)?;
                    attributes.insert(k.to_string(), Value::String(unquote(v).to_string()));
                }
            }
            _ => {}
        }
    }

    let id = id.ok_or_else(|| HearthError::Parse("serialized session has no id".into()))?;
    if id.is_empty() {
        return Err(HearthError::Parse("serialized session has empty id".into()));
    }
    Ok(Session::from_wire(
        id,
        creation_time.unwrap_or(0),
        last_accessed_time.unwrap_or(0),
        max_inactive_interval,
        attributes,
    ))
}

/// Parses a full replication request body, action line included.
pub fn decode_body(body: &str) -> Result<ReplicationAction> {
    let mut lines = body.splitn(2, '\n');
    let action = lines.next().unwrap_or("").trim_end_matches('\r').trim();
    let rest = lines.next().unwrap_or("");
    match action {
        "ACTION=SAVE" => Ok(ReplicationAction::Save(decode_session(rest)?)),
        "ACTION=DELETE" => {
            let id = rest
                .trim()
                .strip_prefix("sessionId=")
                .ok_or_else(|| HearthError::Parse("DELETE body has no sessionId".into()))?;
            if id.is_empty() {
                return Err(HearthError::Parse("DELETE body has empty sessionId".into()));
            }
            Ok(ReplicationAction::Delete(id.to_string()))
        }
        other => Err(HearthError::Parse(format!(
            "unknown replication action: {}",
            other
        ))),
    }
}

/// Formats the request body broadcast on save.
pub fn save_body(session: &Session) -> String {
    format!("ACTION=SAVE\n{}", encode_session(session))
}

/// Formats the request body broadcast on delete.
pub fn delete_body(session_id: &str) -> String {
    format!("ACTION=DELETE\nsessionId={}", session_id)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn strip_braces(text: &str) -> Result<&str> {
    let text = text.trim();
    text.strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(|| HearthError::Parse(format!("expected braced object, got: {}", text)))
}

/// Splits on commas at brace depth zero. The only nesting in the grammar
/// is the `attributes` object.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}

/// Splits one `"key":value` pair. The key is always quoted.
fn split_pair(pair: &str) -> Result<(&str, &str)> {
    let rest = pair
        .trim()
        .strip_prefix('"')
        .ok_or_else(|| HearthError::Parse(format!("expected quoted key in: {}", pair)))?;
    let close = rest
        .find('"')
        .ok_or_else(|| HearthError::Parse(format!("unterminated key in: {}", pair)))?;
    let key = &rest[..close];
    let value = rest[close + 1..]
        .trim_start()
        .strip_prefix(':')
        .ok_or_else(|| HearthError::Parse(format!("expected colon in: {}", pair)))?
        .trim();
    Ok((key, value))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_millis(field: &str, text: &str) -> Result<u64> {
    text.parse()
        .map_err(|_| HearthError::Parse(format!("invalid {}: {}", field, text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_attributes_round_trip_exactly() {
        let mut session = Session::new("abc123");
        session.set_attribute("user", Value::String("alice".into()));
        session.set_attribute("theme", Value::String("dark".into()));

        let decoded = decode_session(&encode_session(&session)).unwrap();

        assert_eq!(decoded.id(), session.id());
        assert_eq!(decoded.last_accessed_time(), session.last_accessed_time());
        assert_eq!(
            decoded.max_inactive_interval(),
            session.max_inactive_interval()
        );
        assert_eq!(
            decoded.get_attribute("user"),
            Some(&Value::String("alice".into()))
        );
        assert_eq!(
            decoded.get_attribute("theme"),
            Some(&Value::String("dark".into()))
        );
    }

    #[test]
    fn test_non_string_attributes_come_back_as_strings() {
        let mut session = Session::new("abc123");
        session.set_attribute("count", Value::from(42));
        session.set_attribute("admin", Value::Bool(true));

        let decoded = decode_session(&encode_session(&session)).unwrap();

        // the format stringifies non-string values, by contract
        assert_eq!(
            decoded.get_attribute("count"),
            Some(&Value::String("42".into()))
        );
        assert_eq!(
            decoded.get_attribute("admin"),
            Some(&Value::String("true".into()))
        );
    }

    #[test]
    fn test_encode_shape() {
        let session = Session::new("s1");
        let line = encode_session(&session);
        assert!(line.starts_with("{\"id\":\"s1\",\"creationTime\":\""));
        assert!(line.contains("\"maxInactiveInterval\":1800,"));
        assert!(line.ends_with("\"attributes\":{}}"));
    }

    #[test]
    fn test_decode_empty_attributes() {
        let line = r#"{"id":"s1","creationTime":"10","lastAccessedTime":"20","maxInactiveInterval":60,"attributes":{}}"#;
        let session = decode_session(line).unwrap();
        assert_eq!(session.id(), "s1");
        assert_eq!(session.creation_time(), 10);
        assert_eq!(session.last_accessed_time(), 20);
        assert_eq!(session.max_inactive_interval(), 60);
        assert!(session.attributes().is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_session("not an object").is_err());
        assert!(decode_session("{\"creationTime\":\"10\"}").is_err());
        assert!(decode_session(
            r#"{"id":"s1","creationTime":"NaN","lastAccessedTime":"0","maxInactiveInterval":0,"attributes":{}}"#
        )
        .is_err());
    }

    #[test]
    fn test_decode_save_body() {
        let mut session = Session::new("s1");
        session.set_attribute("k", Value::String("v".into()));
        let body = save_body(&session);
        match decode_body(&body).unwrap() {
            ReplicationAction::Save(decoded) => {
                assert_eq!(decoded.id(), "s1");
                assert_eq!(decoded.get_attribute("k"), Some(&Value::String("v".into())));
            }
            other => panic!("expected Save, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_delete_body() {
        assert_eq!(
            decode_body("ACTION=DELETE\nsessionId=s9").unwrap(),
            ReplicationAction::Delete("s9".to_string())
        );
    }

    #[test]
    fn test_decode_body_rejects_malformed() {
        assert!(decode_body("").is_err());
        assert!(decode_body("ACTION=FROB\nwhatever").is_err());
        assert!(decode_body("ACTION=DELETE\n").is_err());
        assert!(decode_body("ACTION=DELETE\nsessionId=").is_err());
        assert!(decode_body("ACTION=SAVE\n{broken").is_err());
    }

    #[test]
    fn test_crlf_action_line() {
        assert_eq!(
            decode_body("ACTION=DELETE\r\nsessionId=s1").unwrap(),
            ReplicationAction::Delete("s1".to_string())
        );
    }
}
