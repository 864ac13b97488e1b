use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::entities::{OrderStatus, StockField};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a bounded channel and returns both ends.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when nobody is listening.
    pub async fn send_or_log(&self, event: Event) {
        let kind = event.kind();
        if let Err(e) = self.send(event).await {
            warn!(event = kind, error = %e, "Domain event dropped");
        }
    }
}

/// Domain events published after the corresponding transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Event {
    OrderCreated {
        order_id: i32,
        client_id: i32,
        total_amount: Decimal,
    },
    OrderStatusChanged {
        order_id: i32,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    StockAdjusted {
        product_id: i32,
        field: StockField,
        previous_value: i32,
        new_value: i32,
        reason: String,
    },
    ShipmentDispatched {
        shipment_id: i32,
        order_ids: Vec<i32>,
    },
    ShipmentFinished {
        shipment_id: i32,
        vehicle_id: i32,
        effective_km: i32,
        finished_at: DateTime<Utc>,
    },
    BillCreated {
        bill_id: i32,
        order_id: i32,
        total_amount: Decimal,
    },
    NotificationCreated {
        notification_id: i32,
        user_id: i32,
    },
    PurchaseOrderCreated {
        purchase_order_id: i32,
    },
    PurchaseOrderReceived {
        purchase_order_id: i32,
    },
    PurchaseOrderCancelled {
        purchase_order_id: i32,
    },
}

impl Event {
    /// Stable snake_case name of the event variant.
    pub fn kind(&self) -> &'static str {
        self.into()
    }
}

/// Drains the channel and logs every event until all senders are dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        crate::metrics::EVENTS_PROCESSED
            .with_label_values(&[event.kind()])
            .inc();

        match &event {
            Event::ShipmentFinished {
                shipment_id,
                effective_km,
                ..
            } => {
                info!(shipment_id, effective_km, "Shipment finished");
            }
            Event::BillCreated {
                bill_id, order_id, ..
            } => {
                info!(bill_id, order_id, "Bill created");
            }
            other => {
                debug!(event = other.kind(), payload = ?other, "Domain event");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_is_snake_case() {
        let event = Event::PurchaseOrderReceived {
            purchase_order_id: 3,
        };
        assert_eq!(event.kind(), "purchase_order_received");
    }

    #[tokio::test]
    async fn send_or_log_survives_a_closed_channel() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);
        sender
            .send_or_log(Event::PurchaseOrderCreated {
                purchase_order_id: 1,
            })
            .await;
        assert!(sender
            .send(Event::PurchaseOrderCreated {
                purchase_order_id: 1
            })
            .await
            .is_err());
    }
}
