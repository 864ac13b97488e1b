//! In-memory store.
//!
//! Transactions are serialised: `begin` takes an owned lock on the whole
//! state and works on a copy, `commit` swaps the copy in, `rollback` (or
//! dropping the handle) discards it. This gives the same guarantees as row
//! locks taken with `SELECT ... FOR UPDATE`, at store granularity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

use crate::db::transaction::{Transaction, TxHandle, UnitOfWork};
use crate::entities::{
    bill, bill_item, client, maintenance, maintenance_plan_item, notification, order, order_item,
    payment_detail, payment_type, product, purchase_order, purchase_order_item, shipment, stock,
    stock_change, user, vehicle, vehicle_usage, workflow_step, OrderStatus, PurchaseOrderStatus,
    UserRole,
};
use crate::errors::ServiceError;
use crate::repositories::*;

/// Complete contents of the in-memory store, one vector per table.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub products: Vec<product::Model>,
    pub stocks: Vec<stock::Model>,
    pub stock_changes: Vec<stock_change::Model>,
    pub clients: Vec<client::Model>,
    pub payment_types: Vec<payment_type::Model>,
    pub payment_details: Vec<payment_detail::Model>,
    pub orders: Vec<order::Model>,
    pub order_items: Vec<order_item::Model>,
    pub shipments: Vec<shipment::Model>,
    pub vehicles: Vec<vehicle::Model>,
    pub vehicle_usages: Vec<vehicle_usage::Model>,
    pub bills: Vec<bill::Model>,
    pub bill_items: Vec<bill_item::Model>,
    pub notifications: Vec<notification::Model>,
    pub users: Vec<user::Model>,
    pub maintenance_plan_items: Vec<maintenance_plan_item::Model>,
    pub maintenances: Vec<maintenance::Model>,
    pub purchase_orders: Vec<purchase_order::Model>,
    pub purchase_order_items: Vec<purchase_order_item::Model>,
    pub workflow_steps: Vec<workflow_step::Model>,
}

impl StoreState {
    pub fn stock_of(&self, product_id: i32) -> Option<&stock::Model> {
        self.stocks.iter().find(|s| s.product_id == product_id)
    }

    pub fn order(&self, id: i32) -> Option<&order::Model> {
        self.orders.iter().find(|o| o.id == id)
    }

    pub fn shipment(&self, id: i32) -> Option<&shipment::Model> {
        self.shipments.iter().find(|s| s.id == id)
    }

    pub fn vehicle(&self, id: i32) -> Option<&vehicle::Model> {
        self.vehicles.iter().find(|v| v.id == id)
    }

    pub fn bills_for_order(&self, order_id: i32) -> Vec<&bill::Model> {
        self.bills.iter().filter(|b| b.order_id == order_id).collect()
    }
}

/// Next primary key for a table: one past the largest id in use.
fn next_id<T>(rows: &[T], id: impl Fn(&T) -> i32) -> i32 {
    rows.iter().map(id).max().unwrap_or(0) + 1
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<tokio::sync::Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: StoreState) -> Self {
        Self {
            state: Arc::new(tokio::sync::Mutex::new(state)),
        }
    }

    /// Copy of the committed state. Waits for any open transaction.
    pub async fn snapshot(&self) -> StoreState {
        self.state.lock().await.clone()
    }

    /// Applies `f` to the committed state outside of any transaction.
    pub async fn seed(&self, f: impl FnOnce(&mut StoreState)) {
        let mut guard = self.state.lock().await;
        f(&mut guard);
    }
}

#[async_trait]
impl UnitOfWork for InMemoryStore {
    async fn begin(&self) -> Result<TxHandle, ServiceError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Arc::new(MemoryTransaction {
            inner: Mutex::new(Some(OpenTransaction { guard, working })),
        }))
    }
}

struct OpenTransaction {
    guard: OwnedMutexGuard<StoreState>,
    working: StoreState,
}

pub struct MemoryTransaction {
    inner: Mutex<Option<OpenTransaction>>,
}

impl MemoryTransaction {
    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<R, ServiceError>,
    ) -> Result<R, ServiceError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ServiceError::InternalError("in-memory transaction poisoned".into()))?;
        let open = inner
            .as_mut()
            .ok_or_else(|| ServiceError::InternalError("transaction already closed".into()))?;
        f(&mut open.working)
    }

    fn close(&self) -> Result<Option<OpenTransaction>, ServiceError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ServiceError::InternalError("in-memory transaction poisoned".into()))?;
        Ok(inner.take())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(&self) -> Result<(), ServiceError> {
        let open = self
            .close()?
            .ok_or_else(|| ServiceError::InternalError("transaction already closed".into()))?;
        let OpenTransaction { mut guard, working } = open;
        *guard = working;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), ServiceError> {
        drop(self.close()?);
        Ok(())
    }
}

#[async_trait]
impl CatalogRepository for MemoryTransaction {
    async fn find_client(&self, id: i32) -> Result<Option<client::Model>, ServiceError> {
        self.with_state(|s| Ok(s.clients.iter().find(|c| c.id == id).cloned()))
    }

    async fn find_payment_type(
        &self,
        id: i32,
    ) -> Result<Option<payment_type::Model>, ServiceError> {
        self.with_state(|s| Ok(s.payment_types.iter().find(|p| p.id == id).cloned()))
    }

    async fn find_products_by_ids(&self, ids: &[i32]) -> Result<Vec<product::Model>, ServiceError> {
        self.with_state(|s| {
            Ok(s.products
                .iter()
                .filter(|p| ids.contains(&p.id))
                .cloned()
                .collect())
        })
    }
}

#[async_trait]
impl StockRepository for MemoryTransaction {
    async fn find_stock_for_update(
        &self,
        product_id: i32,
    ) -> Result<Option<stock::Model>, ServiceError> {
        self.with_state(|s| Ok(s.stock_of(product_id).cloned()))
    }

    async fn save_stock(&self, stock: &stock::Model) -> Result<(), ServiceError> {
        self.with_state(|s| {
            let row = s
                .stocks
                .iter_mut()
                .find(|row| row.id == stock.id)
                .ok_or_else(|| ServiceError::NotFound(format!("Stock {} not found", stock.id)))?;
            *row = stock.clone();
            Ok(())
        })
    }

    async fn append_stock_changes(&self, changes: Vec<NewStockChange>) -> Result<(), ServiceError> {
        self.with_state(|s| {
            for change in changes {
                let id = next_id(&s.stock_changes, |c| c.id);
                s.stock_changes.push(stock_change::Model {
                    id,
                    product_id: change.product_id,
                    changed_field: change.changed_field,
                    previous_value: change.previous_value,
                    new_value: change.new_value,
                    reason: change.reason,
                    created_at: change.created_at,
                });
            }
            Ok(())
        })
    }

    async fn list_stock_changes(
        &self,
        product_id: i32,
    ) -> Result<Vec<stock_change::Model>, ServiceError> {
        self.with_state(|s| {
            Ok(s.stock_changes
                .iter()
                .filter(|c| c.product_id == product_id)
                .cloned()
                .collect())
        })
    }
}

#[async_trait]
impl OrderRepository for MemoryTransaction {
    async fn create_payment_detail(
        &self,
        payment_type_id: i32,
    ) -> Result<payment_detail::Model, ServiceError> {
        self.with_state(|s| {
            let model = payment_detail::Model {
                id: next_id(&s.payment_details, |d| d.id),
                payment_type_id,
            };
            s.payment_details.push(model.clone());
            Ok(model)
        })
    }

    async fn find_payment_detail(
        &self,
        id: i32,
    ) -> Result<Option<payment_detail::Model>, ServiceError> {
        self.with_state(|s| Ok(s.payment_details.iter().find(|d| d.id == id).cloned()))
    }

    async fn create_order(&self, order: NewOrder) -> Result<order::Model, ServiceError> {
        self.with_state(|s| {
            let model = order::Model {
                id: next_id(&s.orders, |o| o.id),
                client_id: order.client_id,
                order_status_id: order.order_status_id,
                total_amount: order.total_amount,
                created_at: order.created_at,
                shipment_id: None,
                payment_detail_id: order.payment_detail_id,
                delivery_method_id: order.delivery_method_id,
            };
            s.orders.push(model.clone());
            Ok(model)
        })
    }

    async fn create_order_items(
        &self,
        items: Vec<NewOrderItem>,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        self.with_state(|s| {
            let mut created = Vec::with_capacity(items.len());
            for item in items {
                let model = order_item::Model {
                    id: next_id(&s.order_items, |i| i.id),
                    order_id: item.order_id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    subtotal_price: item.subtotal_price,
                };
                s.order_items.push(model.clone());
                created.push(model);
            }
            Ok(created)
        })
    }

    async fn find_order(&self, id: i32) -> Result<Option<order::Model>, ServiceError> {
        self.with_state(|s| Ok(s.order(id).cloned()))
    }

    async fn find_order_items(
        &self,
        order_id: i32,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        self.with_state(|s| {
            Ok(s.order_items
                .iter()
                .filter(|i| i.order_id == order_id)
                .cloned()
                .collect())
        })
    }

    async fn find_orders_by_shipment(
        &self,
        shipment_id: i32,
    ) -> Result<Vec<order::Model>, ServiceError> {
        self.with_state(|s| {
            let mut orders: Vec<_> = s
                .orders
                .iter()
                .filter(|o| o.shipment_id == Some(shipment_id))
                .cloned()
                .collect();
            orders.sort_by_key(|o| o.id);
            Ok(orders)
        })
    }

    async fn update_order(
        &self,
        order_id: i32,
        status: OrderStatus,
        shipment_id: Option<i32>,
    ) -> Result<order::Model, ServiceError> {
        self.with_state(|s| {
            let order = s
                .orders
                .iter_mut()
                .find(|o| o.id == order_id)
                .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
            order.order_status_id = status;
            order.shipment_id = shipment_id;
            Ok(order.clone())
        })
    }
}

#[async_trait]
impl ShipmentRepository for MemoryTransaction {
    async fn find_shipment(&self, id: i32) -> Result<Option<shipment::Model>, ServiceError> {
        self.with_state(|s| Ok(s.shipment(id).cloned()))
    }

    async fn save_shipment(&self, shipment: &shipment::Model) -> Result<(), ServiceError> {
        self.with_state(|s| {
            let row = s
                .shipments
                .iter_mut()
                .find(|row| row.id == shipment.id)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Shipment {} not found", shipment.id))
                })?;
            *row = shipment.clone();
            Ok(())
        })
    }
}

#[async_trait]
impl VehicleRepository for MemoryTransaction {
    async fn find_vehicle(&self, id: i32) -> Result<Option<vehicle::Model>, ServiceError> {
        self.with_state(|s| Ok(s.vehicle(id).cloned()))
    }

    async fn list_vehicles(&self) -> Result<Vec<vehicle::Model>, ServiceError> {
        self.with_state(|s| Ok(s.vehicles.clone()))
    }

    async fn update_vehicle_km(&self, id: i32, km_traveled: i32) -> Result<(), ServiceError> {
        self.with_state(|s| {
            let vehicle = s
                .vehicles
                .iter_mut()
                .find(|v| v.id == id)
                .ok_or_else(|| ServiceError::NotFound(format!("Vehicle {} not found", id)))?;
            vehicle.km_traveled = km_traveled;
            Ok(())
        })
    }

    async fn create_vehicle_usage(
        &self,
        usage: NewVehicleUsage,
    ) -> Result<vehicle_usage::Model, ServiceError> {
        self.with_state(|s| {
            let model = vehicle_usage::Model {
                id: next_id(&s.vehicle_usages, |u| u.id),
                vehicle_id: usage.vehicle_id,
                shipment_id: usage.shipment_id,
                previous_km: usage.previous_km,
                current_km: usage.current_km,
                km_traveled: usage.km_traveled,
                created_at: usage.created_at,
            };
            s.vehicle_usages.push(model.clone());
            Ok(model)
        })
    }
}

#[async_trait]
impl BillRepository for MemoryTransaction {
    async fn find_bill_by_order(&self, order_id: i32) -> Result<Option<bill::Model>, ServiceError> {
        self.with_state(|s| Ok(s.bills.iter().find(|b| b.order_id == order_id).cloned()))
    }

    async fn find_bill_items(&self, bill_id: i32) -> Result<Vec<bill_item::Model>, ServiceError> {
        self.with_state(|s| {
            Ok(s.bill_items
                .iter()
                .filter(|i| i.bill_id == bill_id)
                .cloned()
                .collect())
        })
    }

    async fn create_bill(&self, bill: NewBill) -> Result<bill::Model, ServiceError> {
        self.with_state(|s| {
            if s.bills.iter().any(|b| b.order_id == bill.order_id) {
                return Err(ServiceError::db_error(format!(
                    "unique constraint violated: bills.order_id = {}",
                    bill.order_id
                )));
            }
            let model = bill::Model {
                id: next_id(&s.bills, |b| b.id),
                order_id: bill.order_id,
                client_id: bill.client_id,
                subtotal: bill.subtotal,
                tax_amount: bill.tax_amount,
                total_amount: bill.total_amount,
                created_at: bill.created_at,
            };
            s.bills.push(model.clone());
            Ok(model)
        })
    }

    async fn create_bill_items(
        &self,
        items: Vec<NewBillItem>,
    ) -> Result<Vec<bill_item::Model>, ServiceError> {
        self.with_state(|s| {
            let mut created = Vec::with_capacity(items.len());
            for item in items {
                let model = bill_item::Model {
                    id: next_id(&s.bill_items, |i| i.id),
                    bill_id: item.bill_id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    subtotal_price: item.subtotal_price,
                };
                s.bill_items.push(model.clone());
                created.push(model);
            }
            Ok(created)
        })
    }
}

#[async_trait]
impl NotificationRepository for MemoryTransaction {
    async fn exists_unviewed_notification(
        &self,
        user_id: i32,
        message: &str,
    ) -> Result<bool, ServiceError> {
        self.with_state(|s| {
            Ok(s.notifications
                .iter()
                .any(|n| n.user_id == user_id && n.message == message && !n.viewed && !n.deleted))
        })
    }

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<notification::Model, ServiceError> {
        self.with_state(|s| {
            let model = notification::Model {
                id: next_id(&s.notifications, |n| n.id),
                user_id: notification.user_id,
                message: notification.message,
                viewed: false,
                deleted: false,
                created_at: notification.created_at,
            };
            s.notifications.push(model.clone());
            Ok(model)
        })
    }
}

#[async_trait]
impl UserRepository for MemoryTransaction {
    async fn find_users_by_role(&self, role: UserRole) -> Result<Vec<user::Model>, ServiceError> {
        self.with_state(|s| Ok(s.users.iter().filter(|u| u.role == role).cloned().collect()))
    }
}

#[async_trait]
impl MaintenancePlanItemRepository for MemoryTransaction {
    async fn list_plan_items(&self) -> Result<Vec<maintenance_plan_item::Model>, ServiceError> {
        self.with_state(|s| Ok(s.maintenance_plan_items.clone()))
    }

    async fn list_maintenances_for_plan_items(
        &self,
        plan_item_ids: &[i32],
    ) -> Result<Vec<maintenance::Model>, ServiceError> {
        self.with_state(|s| {
            Ok(s.maintenances
                .iter()
                .filter(|m| plan_item_ids.contains(&m.plan_item_id))
                .cloned()
                .collect())
        })
    }
}

#[async_trait]
impl PurchaseOrderRepository for MemoryTransaction {
    async fn create_purchase_order(
        &self,
        purchase_order: NewPurchaseOrder,
    ) -> Result<purchase_order::Model, ServiceError> {
        self.with_state(|s| {
            let model = purchase_order::Model {
                id: next_id(&s.purchase_orders, |p| p.id),
                supplier_name: purchase_order.supplier_name,
                status: PurchaseOrderStatus::Pending,
                total_amount: purchase_order.total_amount,
                created_at: purchase_order.created_at,
                received_at: None,
            };
            s.purchase_orders.push(model.clone());
            Ok(model)
        })
    }

    async fn create_purchase_order_items(
        &self,
        items: Vec<NewPurchaseOrderItem>,
    ) -> Result<Vec<purchase_order_item::Model>, ServiceError> {
        self.with_state(|s| {
            let mut created = Vec::with_capacity(items.len());
            for item in items {
                let model = purchase_order_item::Model {
                    id: next_id(&s.purchase_order_items, |i| i.id),
                    purchase_order_id: item.purchase_order_id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_cost: item.unit_cost,
                    subtotal_cost: item.subtotal_cost,
                };
                s.purchase_order_items.push(model.clone());
                created.push(model);
            }
            Ok(created)
        })
    }

    async fn find_purchase_order(
        &self,
        id: i32,
    ) -> Result<Option<purchase_order::Model>, ServiceError> {
        self.with_state(|s| Ok(s.purchase_orders.iter().find(|p| p.id == id).cloned()))
    }

    async fn find_purchase_order_items(
        &self,
        purchase_order_id: i32,
    ) -> Result<Vec<purchase_order_item::Model>, ServiceError> {
        self.with_state(|s| {
            Ok(s.purchase_order_items
                .iter()
                .filter(|i| i.purchase_order_id == purchase_order_id)
                .cloned()
                .collect())
        })
    }

    async fn update_purchase_order_status(
        &self,
        id: i32,
        status: PurchaseOrderStatus,
        received_at: Option<DateTime<Utc>>,
    ) -> Result<purchase_order::Model, ServiceError> {
        self.with_state(|s| {
            let po = s
                .purchase_orders
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Purchase order {} not found", id))
                })?;
            po.status = status;
            po.received_at = received_at;
            Ok(po.clone())
        })
    }
}

#[async_trait]
impl WorkflowStepRepository for MemoryTransaction {
    async fn find_workflow_step(
        &self,
        workflow: &str,
        run_key: &str,
        step: &str,
    ) -> Result<Option<workflow_step::Model>, ServiceError> {
        self.with_state(|s| {
            Ok(s.workflow_steps
                .iter()
                .find(|w| w.workflow == workflow && w.run_key == run_key && w.step == step)
                .cloned())
        })
    }

    async fn save_workflow_step(
        &self,
        step: NewWorkflowStep,
    ) -> Result<workflow_step::Model, ServiceError> {
        self.with_state(|s| {
            let model = workflow_step::Model {
                id: next_id(&s.workflow_steps, |w| w.id),
                workflow: step.workflow,
                run_key: step.run_key,
                step: step.step,
                output: step.output,
                completed_at: step.completed_at,
            };
            s.workflow_steps.push(model.clone());
            Ok(model)
        })
    }

    async fn last_completed_step(
        &self,
        workflow: &str,
        run_key: &str,
    ) -> Result<Option<workflow_step::Model>, ServiceError> {
        self.with_state(|s| {
            Ok(s.workflow_steps
                .iter()
                .filter(|w| w.workflow == workflow && w.run_key == run_key)
                .max_by_key(|w| w.id)
                .cloned())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_id_follows_the_largest_existing_key() {
        let rows = vec![3, 9, 4];
        assert_eq!(next_id(&rows, |r| *r), 10);
        assert_eq!(next_id::<i32>(&[], |r| *r), 1);
    }

    #[tokio::test]
    async fn dropped_handle_discards_work_and_releases_the_lock() {
        let store = InMemoryStore::new();
        {
            let tx = store.begin().await.expect("begin");
            tx.create_payment_detail(1).await.expect("insert");
        }
        let tx = store.begin().await.expect("second begin");
        assert!(tx.find_payment_detail(1).await.expect("lookup").is_none());
        tx.rollback().await.expect("rollback");
    }
}
