//! Order tracking socket frame definitions
//!
//! The order tracker is a duplex connection, independent of the push
//! stream. Outbound frames subscribe/unsubscribe per-order topics;
//! inbound frames carry acks, live updates, and pong replies. Both
//! directions are JSON objects tagged by a `type` field.

use serde::{Deserialize, Serialize};

/// Client -> server frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerRequest {
    /// Start receiving updates for one order
    Subscribe { order_id: String },
    /// Stop receiving updates for one order
    Unsubscribe { order_id: String },
    /// Liveness probe
    Ping,
}

/// Server -> client frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// Connection acknowledged by the server
    Connected,
    /// Subscription acknowledged
    Subscribed { order_id: String },
    /// Live update for a subscribed order (status, courier position, ...)
    OrderUpdate {
        order_id: String,
        #[serde(default)]
        data: serde_json::Value,
    },
    /// Reply to [`TrackerRequest::Ping`]
    Pong,
    /// A frame kind this client version does not know about
    #[serde(other)]
    Unknown,
}

impl TrackerRequest {
    /// Serialize to the wire representation
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("tracker request serialization cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let frame = TrackerRequest::Subscribe {
            order_id: "ORD-1".to_string(),
        };
        let json: serde_json::Value = serde_json::from_str(&frame.to_json()).unwrap();

        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["order_id"], "ORD-1");

        let ping: serde_json::Value = serde_json::from_str(&TrackerRequest::Ping.to_json()).unwrap();
        assert_eq!(ping["type"], "ping");
    }

    #[test]
    fn test_event_parsing() {
        let event: TrackerEvent = serde_json::from_str(r#"{"type":"connected"}"#).unwrap();
        assert_eq!(event, TrackerEvent::Connected);

        let event: TrackerEvent = serde_json::from_str(
            r#"{"type":"order_update","order_id":"ORD-9","data":{"lat":51.5,"lng":-0.1}}"#,
        )
        .unwrap();
        match event {
            TrackerEvent::OrderUpdate { order_id, data } => {
                assert_eq!(order_id, "ORD-9");
                assert_eq!(data["lat"], 51.5);
            }
            other => panic!("Expected order_update, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_kind() {
        let event: TrackerEvent =
            serde_json::from_str(r#"{"type":"courier_shift","shift":"am"}"#).unwrap();
        assert_eq!(event, TrackerEvent::Unknown);
    }
}
