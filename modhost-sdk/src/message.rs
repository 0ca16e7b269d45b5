use bytes::Bytes;
use std::collections::HashMap;

/// Unit of data exchanged on the message bus.
///
/// A message is immutable once built. The bus wraps every published message
/// in an `Arc` and hands the same allocation to all receivers, so it lives
/// until the last receiver has finished with it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    properties: HashMap<String, String>,
    payload: Bytes,
}

impl Message {
    /// Create a message from a property map and a payload.
    pub fn new(properties: HashMap<String, String>, payload: impl Into<Bytes>) -> Self {
        Self {
            properties,
            payload: payload.into(),
        }
    }

    /// Start building a message property by property.
    #[inline]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    #[inline]
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    #[inline]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// True when the message has neither properties nor payload.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.payload.is_empty()
    }
}

/// Incremental [`Message`] construction.
///
/// Setting the same property twice keeps the last value, which preserves the
/// unique-key invariant of the property map.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    properties: HashMap<String, String>,
    payload: Bytes,
}

impl MessageBuilder {
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn properties<K, V>(mut self, iter: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.properties
            .extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn build(self) -> Message {
        Message {
            properties: self.properties,
            payload: self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_last_property_value() {
        let msg = Message::builder()
            .property("type", "temp")
            .property("type", "humidity")
            .payload(&b"40"[..])
            .build();

        assert_eq!(msg.properties().len(), 1);
        assert_eq!(msg.property("type"), Some("humidity"));
        assert_eq!(msg.payload().as_ref(), b"40");
    }

    #[test]
    fn test_empty_payload_is_allowed() {
        let msg = Message::builder().property("kind", "heartbeat").build();
        assert!(msg.payload().is_empty());
        assert!(!msg.is_empty());
        assert!(Message::default().is_empty());
    }

    #[test]
    fn test_clone_shares_payload_bytes() {
        let msg = Message::new(HashMap::new(), Bytes::from_static(b"21.5"));
        let copy = msg.clone();
        assert_eq!(msg, copy);
        assert_eq!(msg.payload().as_ptr(), copy.payload().as_ptr());
    }
}
