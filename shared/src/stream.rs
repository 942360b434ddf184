//! Push stream frame definitions
//!
//! The notification stream is a long-lived `text/event-stream` connection.
//! Two framing levels exist on the wire: the default (unnamed) message
//! channel carries JSON objects with a `type` discriminator, while named
//! event channels (`order_update`, `payment_update`, `promo`) carry their
//! own payload shape. [`StreamFrame::decode`] folds both levels into one
//! tagged union.

use serde::{Deserialize, Serialize};

use crate::notification::{NotificationKind, NotificationRecord};

// ==================== Frames ====================

/// One decoded frame from the push stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    /// Keep-alive; carries no state
    Ping,
    /// A server-assigned notification record
    Notification { notification: NotificationRecord },
    /// Authoritative unread counter overwrite
    UnreadCount { count: u32 },
    /// Order status change (named channel)
    OrderUpdate(OrderUpdate),
    /// Payment result (named channel)
    PaymentUpdate(PaymentUpdate),
    /// Promotion announcement (named channel)
    Promo(PromoEvent),
    /// A frame kind this client version does not know about
    #[serde(other)]
    Unknown,
}

impl StreamFrame {
    /// Decode a raw stream event into a frame
    ///
    /// `event` is the SSE event name (empty or `message` for the default
    /// channel); `data` is the JSON payload. Named channels are mapped to
    /// their payload shape, anything unrecognized becomes
    /// [`StreamFrame::Unknown`].
    pub fn decode(event: &str, data: &str) -> Result<Self, serde_json::Error> {
        match event {
            "" | "message" => serde_json::from_str(data),
            "order_update" => Ok(Self::OrderUpdate(serde_json::from_str(data)?)),
            "payment_update" => Ok(Self::PaymentUpdate(serde_json::from_str(data)?)),
            "promo" => Ok(Self::Promo(serde_json::from_str(data)?)),
            other => {
                tracing::debug!(event = other, "Unknown stream event channel");
                Ok(Self::Unknown)
            }
        }
    }
}

// ==================== Channel Payloads ====================

/// Order status change payload (`order_update` channel)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    /// Status tag (e.g. "preparing", "out_for_delivery", "delivered")
    pub status: String,
    /// Additional context, shape depends on `status`
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl OrderUpdate {
    /// Synthesize a notification record with a locally assigned id
    pub fn into_record(self, id: i64) -> NotificationRecord {
        let message = format!("Order {} is now {}", self.order_id, self.status);
        NotificationRecord::new(id, NotificationKind::Order, "Order update", message)
            .with_action_url(format!("/orders/{}", self.order_id))
            .with_data(serde_json::json!({
                "orderId": self.order_id,
                "status": self.status,
            }))
    }
}

/// Payment result payload (`payment_update` channel)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentUpdate {
    pub order_id: String,
    /// Result tag (e.g. "captured", "failed", "refunded")
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

impl PaymentUpdate {
    /// Synthesize a notification record with a locally assigned id
    pub fn into_record(self, id: i64) -> NotificationRecord {
        let message = format!("Payment for order {}: {}", self.order_id, self.status);
        NotificationRecord::new(id, NotificationKind::Payment, "Payment update", message)
            .with_action_url(format!("/orders/{}", self.order_id))
            .with_data(serde_json::json!({
                "orderId": self.order_id,
                "status": self.status,
                "amount": self.amount,
            }))
    }
}

/// Promotion announcement payload (`promo` channel)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoEvent {
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
}

impl PromoEvent {
    /// Synthesize a notification record with a locally assigned id
    pub fn into_record(self, id: i64) -> NotificationRecord {
        let record = NotificationRecord::new(id, NotificationKind::Promo, self.title, self.message);
        match self.action_url {
            Some(url) => record.with_action_url(url),
            None => record.with_action_url("/promotions"),
        }
    }
}
