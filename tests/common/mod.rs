#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use fleet_backoffice::config::{AppConfig, StoreBackend};
use fleet_backoffice::db::memory::{InMemoryStore, StoreState};
use fleet_backoffice::entities::{
    client, maintenance, maintenance_plan_item, order, order_item, payment_detail, payment_type,
    product, shipment, stock, user, vehicle, OrderStatus, ShipmentStatus, UserRole,
};
use fleet_backoffice::events::{Event, EventSender};
use fleet_backoffice::notifications::{NotificationError, OrderMailer};
use fleet_backoffice::services::billing::BillReport;
use fleet_backoffice::AppServices;

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

/// Builds a seeded store state. Ids are chosen by the caller.
#[derive(Default)]
pub struct StateBuilder {
    state: StoreState,
}

impl StateBuilder {
    pub fn new() -> Self {
        Self::default()
            .client(1, "ACME Logistics", "billing@acme.test")
            .payment_type(1, "Card")
    }

    pub fn client(mut self, id: i32, name: &str, email: &str) -> Self {
        self.state.clients.push(client::Model {
            id,
            name: name.into(),
            email: email.into(),
        });
        self
    }

    pub fn payment_type(mut self, id: i32, name: &str) -> Self {
        self.state.payment_types.push(payment_type::Model {
            id,
            name: name.into(),
        });
        self
    }

    /// A product with a stock row.
    pub fn product(mut self, id: i32, price: Decimal, available: i32, reserved: i32) -> Self {
        self.state.products.push(product::Model {
            id,
            name: format!("Product {}", id),
            price,
            created_at: at(2024, 1, 1),
        });
        self.state.stocks.push(stock::Model {
            id,
            product_id: id,
            quantity_ordered: 0,
            quantity_available: available,
            quantity_reserved: reserved,
        });
        self
    }

    pub fn vehicle(mut self, id: i32, plate: &str, km: i32) -> Self {
        self.state.vehicles.push(vehicle::Model {
            id,
            license_plate: plate.into(),
            km_traveled: km,
            created_at: at(2024, 1, 1),
        });
        self
    }

    pub fn shipment(mut self, id: i32, vehicle_id: i32, status: ShipmentStatus) -> Self {
        self.state.shipments.push(shipment::Model {
            id,
            vehicle_id,
            status_id: status,
            date: at(2024, 6, 1),
            finished_at: None,
            effective_km: None,
        });
        self
    }

    /// An order of client 1 with one line per `(product, quantity, unit price)`.
    pub fn order(
        mut self,
        id: i32,
        status: OrderStatus,
        shipment_id: Option<i32>,
        lines: &[(i32, i32, Decimal)],
    ) -> Self {
        let detail_id = self.state.payment_details.len() as i32 + 1;
        self.state.payment_details.push(payment_detail::Model {
            id: detail_id,
            payment_type_id: 1,
        });
        let mut total = Decimal::ZERO;
        for (product_id, quantity, unit_price) in lines {
            let subtotal = *unit_price * Decimal::from(*quantity);
            total += subtotal;
            let item_id = self.state.order_items.len() as i32 + 1;
            self.state.order_items.push(order_item::Model {
                id: item_id,
                order_id: id,
                product_id: *product_id,
                quantity: *quantity,
                unit_price: *unit_price,
                subtotal_price: subtotal,
            });
        }
        self.state.orders.push(order::Model {
            id,
            client_id: 1,
            order_status_id: status,
            total_amount: total,
            created_at: at(2024, 6, 1),
            shipment_id,
            payment_detail_id: detail_id,
            delivery_method_id: 1,
        });
        self
    }

    pub fn user(mut self, id: i32, role: UserRole) -> Self {
        self.state.users.push(user::Model {
            id,
            name: format!("User {}", id),
            email: format!("user{}@fleet.test", id),
            role,
        });
        self
    }

    pub fn plan_item(
        mut self,
        id: i32,
        vehicle_id: i32,
        task: &str,
        km_interval: Option<i32>,
        time_interval_months: Option<i32>,
    ) -> Self {
        self.state.maintenance_plan_items.push(maintenance_plan_item::Model {
            id,
            vehicle_id,
            task: task.into(),
            km_interval,
            time_interval_months,
        });
        self
    }

    pub fn maintenance(mut self, id: i32, plan_item_id: i32, km: i32, date: DateTime<Utc>) -> Self {
        let vehicle_id = self
            .state
            .maintenance_plan_items
            .iter()
            .find(|p| p.id == plan_item_id)
            .map(|p| p.vehicle_id)
            .unwrap_or(1);
        self.state.maintenances.push(maintenance::Model {
            id,
            vehicle_id,
            plan_item_id,
            km,
            date,
        });
        self
    }

    pub fn build(self) -> StoreState {
        self.state
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentEmail {
    StatusChange { order_id: i32, status: OrderStatus },
    Bill { order_id: i32, bill_id: i32, to: String },
}

/// Mailer that records what it sends and fails for chosen orders.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
    failing: Mutex<HashSet<i32>>,
}

impl RecordingMailer {
    pub fn fail_for(&self, order_id: i32) {
        self.failing.lock().unwrap().insert(order_id);
    }

    pub fn recover(&self, order_id: i32) {
        self.failing.lock().unwrap().remove(&order_id);
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }

    fn check(&self, order_id: i32) -> Result<(), NotificationError> {
        if self.failing.lock().unwrap().contains(&order_id) {
            return Err(NotificationError::Transport(format!(
                "SMTP unavailable for order {}",
                order_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderMailer for RecordingMailer {
    async fn send_order_status_change_email(
        &self,
        order: &order::Model,
        status: OrderStatus,
    ) -> Result<(), NotificationError> {
        self.check(order.id)?;
        self.sent.lock().unwrap().push(SentEmail::StatusChange {
            order_id: order.id,
            status,
        });
        Ok(())
    }

    async fn send_bill_by_email(
        &self,
        order: &order::Model,
        _status: OrderStatus,
        bill: &BillReport,
        client_email: &str,
    ) -> Result<(), NotificationError> {
        self.check(order.id)?;
        self.sent.lock().unwrap().push(SentEmail::Bill {
            order_id: order.id,
            bill_id: bill.bill_id,
            to: client_email.to_string(),
        });
        Ok(())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        store_backend: StoreBackend::Memory,
        environment: "test".into(),
        ..AppConfig::default()
    }
}

pub struct TestApp {
    pub store: InMemoryStore,
    pub services: AppServices,
    pub mailer: Arc<RecordingMailer>,
    events: Mutex<mpsc::Receiver<Event>>,
}

impl TestApp {
    pub fn new(state: StoreState) -> Self {
        let store = InMemoryStore::with_state(state);
        let mailer = Arc::new(RecordingMailer::default());
        let (event_sender, events) = EventSender::channel(4096);
        let services = AppServices::new(
            Arc::new(store.clone()),
            event_sender,
            mailer.clone(),
            &test_config(),
        );
        Self {
            store,
            services,
            mailer,
            events: Mutex::new(events),
        }
    }

    pub async fn state(&self) -> StoreState {
        self.store.snapshot().await
    }

    /// Events published so far, oldest first.
    pub fn drain_events(&self) -> Vec<Event> {
        let mut rx = self.events.lock().unwrap();
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}
