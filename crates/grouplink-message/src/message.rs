use std::collections::BTreeMap;

use crate::value::Value;

/// A named unit of communication.
///
/// An empty `payload` means the message carries no extra information. The
/// name is only checked when the message is encoded, so a message with an
/// empty name can be built but never sent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    /// Identifies what the message is for.
    pub name: String,
    /// Extra information, keyed by unique strings.
    pub payload: BTreeMap<String, Value>,
}

impl Message {
    /// A message without payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: BTreeMap::new(),
        }
    }

    /// A message with an explicit payload map.
    pub fn with_payload(name: impl Into<String>, payload: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Add one payload entry, replacing any previous value for `key`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_entries() {
        let msg = Message::new("add-name")
            .with("name", "Ada")
            .with("age", 36i64)
            .with("name", "Grace");

        assert_eq!(msg.name, "add-name");
        assert_eq!(msg.payload.len(), 2);
        assert_eq!(msg.get("name").and_then(Value::as_str), Some("Grace"));
        assert!(msg.has_payload());
    }

    #[test]
    fn prebuilt_payload_is_kept() {
        let payload = BTreeMap::from([("flag".to_string(), Value::from(true))]);
        let msg = Message::with_payload("toggle", payload.clone());
        assert_eq!(msg.payload, payload);
    }

    #[test]
    fn bare_message_has_no_payload() {
        let msg = Message::new("ping");
        assert!(!msg.has_payload());
        assert_eq!(msg.get("anything"), None);
    }
}
