//! The unit of exchange between connected peers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Header key carried by the termination marker a client sends on close.
pub const CLOSE_HEADER: &str = "Close";

/// A message exchanged over a virtual connection.
///
/// Header keys are case-sensitive. The body may be empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    // ---
    /// String metadata, e.g. content type or application routing hints.
    pub header: HashMap<String, String>,

    /// Opaque payload bytes.
    pub body: Bytes,
}

impl Message {
    // ---
    /// Create a message from a header map and a body.
    pub fn new(header: HashMap<String, String>, body: impl Into<Bytes>) -> Self {
        Self {
            header,
            body: body.into(),
        }
    }

    /// Create a message with an empty header.
    pub fn from_body(body: impl Into<Bytes>) -> Self {
        Self {
            header: HashMap::new(),
            body: body.into(),
        }
    }

    /// Builder-style header insertion.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.header.insert(key.into(), value.into());
        self
    }

    /// Look up a header value.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.header.get(key).map(String::as_str)
    }

    /// The termination marker a dialing client publishes right before it
    /// tears down its subscription.
    pub fn close_marker() -> Self {
        Self::default().with_header(CLOSE_HEADER, "true")
    }

    /// True if this message carries the termination marker.
    pub fn is_close_marker(&self) -> bool {
        self.header(CLOSE_HEADER) == Some("true")
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_close_marker() {
        // ---
        let marker = Message::close_marker();
        assert!(marker.is_close_marker());
        assert!(marker.body.is_empty());

        let plain = Message::from_body("Close").with_header("close", "true");
        assert!(!plain.is_close_marker(), "header keys are case-sensitive");
    }

    #[test]
    fn test_header_lookup() {
        // ---
        let msg = Message::from_body("x").with_header("key", "value");
        assert_eq!(msg.header("key"), Some("value"));
        assert_eq!(msg.header("Key"), None);
    }
}
