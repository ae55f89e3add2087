use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// One lot drawn by a FEFO issue, as carried in `StockIssued`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotUsedInIssue {
    pub lot_id: Uuid,
    pub lot_number: String,
    pub quantity: Decimal,
    pub expiry_date: NaiveDate,
    pub location_id: Uuid,
}

/// Events emitted by the stock ledger. Published only after the mutating
/// transaction has committed; consumers deduplicate on the embedded
/// movement/reservation/lot identifiers, since delivery is at-least-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    StockReceived {
        material_id: Uuid,
        lot_id: Option<Uuid>,
        quantity: Decimal,
        location_id: Uuid,
        warehouse_id: Uuid,
        movement_number: String,
    },
    StockIssued {
        material_id: Uuid,
        quantity: Decimal,
        lots_used: Vec<LotUsedInIssue>,
        reference_type: String,
        reference_id: Option<Uuid>,
        movement_number: String,
    },
    StockTransferred {
        material_id: Uuid,
        lot_id: Option<Uuid>,
        quantity: Decimal,
        from_location_id: Uuid,
        to_location_id: Uuid,
        movement_number: String,
    },
    StockAdjusted {
        material_id: Uuid,
        lot_id: Option<Uuid>,
        location_id: Uuid,
        delta: Decimal,
        new_quantity: Decimal,
        reason: String,
        movement_number: String,
    },
    StockReserved {
        reservation_id: Uuid,
        material_id: Uuid,
        quantity: Decimal,
        reservation_type: String,
        reference_id: Uuid,
    },
    ReservationReleased {
        reservation_id: Uuid,
        material_id: Uuid,
        quantity: Decimal,
    },
    LowStockAlert {
        material_id: Uuid,
        current_quantity: Decimal,
        reorder_point: Decimal,
    },
    LotExpiringSoon {
        lot_id: Uuid,
        lot_number: String,
        material_id: Uuid,
        expiry_date: NaiveDate,
        days_until_expiry: i64,
        quantity: Decimal,
    },
    LotExpired {
        lot_id: Uuid,
        lot_number: String,
        material_id: Uuid,
        expiry_date: NaiveDate,
        days_until_expiry: i64,
        quantity: Decimal,
    },
}

impl Event {
    /// Short name used for log lines and transport routing keys.
    pub fn name(&self) -> &'static str {
        match self {
            Event::StockReceived { .. } => "stock.received",
            Event::StockIssued { .. } => "stock.issued",
            Event::StockTransferred { .. } => "stock.transferred",
            Event::StockAdjusted { .. } => "stock.adjusted",
            Event::StockReserved { .. } => "stock.reserved",
            Event::ReservationReleased { .. } => "stock.reservation_released",
            Event::LowStockAlert { .. } => "stock.low_stock_alert",
            Event::LotExpiringSoon { .. } => "lot.expiring_soon",
            Event::LotExpired { .. } => "lot.expired",
        }
    }
}

/// Cloneable handle for publishing events into the processing channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Convenience constructor returning the paired receiver, used by the
    /// binary and by tests that want to observe published events.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel, handing each event to the outbound transport.
/// The transport itself is an external collaborator; here each event is
/// logged as it leaves the ledger.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(event = event.name(), payload = ?event, "Publishing event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn sent_events_arrive_in_order() {
        let (sender, mut rx) = EventSender::channel(8);
        let material_id = Uuid::new_v4();
        sender
            .send(Event::LowStockAlert {
                material_id,
                current_quantity: dec!(4),
                reorder_point: dec!(100),
            })
            .await
            .unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.name(), "stock.low_stock_alert");
        match got {
            Event::LowStockAlert {
                material_id: m, ..
            } => assert_eq!(m, material_id),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn payloads_serialize_to_json() {
        let event = Event::StockReserved {
            reservation_id: Uuid::new_v4(),
            material_id: Uuid::new_v4(),
            quantity: dec!(30),
            reservation_type: "SALES_ORDER".into(),
            reference_id: Uuid::new_v4(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("reservation_id"));
    }
}
