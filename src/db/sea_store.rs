//! SeaORM-backed store.
//!
//! One [`SeaOrmTransaction`] wraps one `DatabaseTransaction`. Stock rows are
//! read with `SELECT ... FOR UPDATE` so concurrent orders for the same product
//! serialise on the row lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ActiveValue::Set, ActiveValue::Unchanged,
    ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::debug;

use crate::db::transaction::{Transaction, TxHandle, UnitOfWork};
use crate::entities::{
    bill, bill_item, client, maintenance, maintenance_plan_item, notification, order, order_item,
    payment_detail, payment_type, product, purchase_order, purchase_order_item, shipment, stock,
    stock_change, user, vehicle, vehicle_usage, workflow_step, OrderStatus, PurchaseOrderStatus,
    UserRole,
};
use crate::errors::ServiceError;
use crate::repositories::*;

#[derive(Clone)]
pub struct SeaOrmUnitOfWork {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmUnitOfWork {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl UnitOfWork for SeaOrmUnitOfWork {
    async fn begin(&self) -> Result<TxHandle, ServiceError> {
        let txn = self.db.begin().await?;
        debug!("Database transaction started");
        Ok(Arc::new(SeaOrmTransaction {
            txn: RwLock::new(Some(txn)),
        }))
    }
}

pub struct SeaOrmTransaction {
    txn: RwLock<Option<DatabaseTransaction>>,
}

impl SeaOrmTransaction {
    async fn conn(&self) -> Result<RwLockReadGuard<'_, DatabaseTransaction>, ServiceError> {
        let guard = self.txn.read().await;
        RwLockReadGuard::try_map(guard, |txn| txn.as_ref())
            .map_err(|_| ServiceError::InternalError("transaction already closed".into()))
    }

    async fn take(&self) -> Result<DatabaseTransaction, ServiceError> {
        self.txn
            .write()
            .await
            .take()
            .ok_or_else(|| ServiceError::InternalError("transaction already closed".into()))
    }
}

#[async_trait]
impl Transaction for SeaOrmTransaction {
    async fn commit(&self) -> Result<(), ServiceError> {
        self.take().await?.commit().await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), ServiceError> {
        self.take().await?.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogRepository for SeaOrmTransaction {
    async fn find_client(&self, id: i32) -> Result<Option<client::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(client::Entity::find_by_id(id).one(&*conn).await?)
    }

    async fn find_payment_type(
        &self,
        id: i32,
    ) -> Result<Option<payment_type::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(payment_type::Entity::find_by_id(id).one(&*conn).await?)
    }

    async fn find_products_by_ids(&self, ids: &[i32]) -> Result<Vec<product::Model>, ServiceError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn().await?;
        Ok(product::Entity::find()
            .filter(product::Column::Id.is_in(ids.to_vec()))
            .all(&*conn)
            .await?)
    }
}

#[async_trait]
impl StockRepository for SeaOrmTransaction {
    async fn find_stock_for_update(
        &self,
        product_id: i32,
    ) -> Result<Option<stock::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(stock::Entity::find()
            .filter(stock::Column::ProductId.eq(product_id))
            .lock_exclusive()
            .one(&*conn)
            .await?)
    }

    async fn save_stock(&self, stock: &stock::Model) -> Result<(), ServiceError> {
        let conn = self.conn().await?;
        stock::ActiveModel {
            id: Unchanged(stock.id),
            product_id: Unchanged(stock.product_id),
            quantity_ordered: Set(stock.quantity_ordered),
            quantity_available: Set(stock.quantity_available),
            quantity_reserved: Set(stock.quantity_reserved),
        }
        .update(&*conn)
        .await?;
        Ok(())
    }

    async fn append_stock_changes(&self, changes: Vec<NewStockChange>) -> Result<(), ServiceError> {
        if changes.is_empty() {
            return Ok(());
        }
        let conn = self.conn().await?;
        let rows = changes.into_iter().map(|change| stock_change::ActiveModel {
            id: NotSet,
            product_id: Set(change.product_id),
            changed_field: Set(change.changed_field),
            previous_value: Set(change.previous_value),
            new_value: Set(change.new_value),
            reason: Set(change.reason),
            created_at: Set(change.created_at),
        });
        stock_change::Entity::insert_many(rows).exec(&*conn).await?;
        Ok(())
    }

    async fn list_stock_changes(
        &self,
        product_id: i32,
    ) -> Result<Vec<stock_change::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(stock_change::Entity::find()
            .filter(stock_change::Column::ProductId.eq(product_id))
            .order_by_asc(stock_change::Column::Id)
            .all(&*conn)
            .await?)
    }
}

#[async_trait]
impl OrderRepository for SeaOrmTransaction {
    async fn create_payment_detail(
        &self,
        payment_type_id: i32,
    ) -> Result<payment_detail::Model, ServiceError> {
        let conn = self.conn().await?;
        Ok(payment_detail::ActiveModel {
            payment_type_id: Set(payment_type_id),
            ..Default::default()
        }
        .insert(&*conn)
        .await?)
    }

    async fn find_payment_detail(
        &self,
        id: i32,
    ) -> Result<Option<payment_detail::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(payment_detail::Entity::find_by_id(id).one(&*conn).await?)
    }

    async fn create_order(&self, order: NewOrder) -> Result<order::Model, ServiceError> {
        let conn = self.conn().await?;
        Ok(order::ActiveModel {
            client_id: Set(order.client_id),
            order_status_id: Set(order.order_status_id),
            total_amount: Set(order.total_amount),
            created_at: Set(order.created_at),
            shipment_id: Set(None),
            payment_detail_id: Set(order.payment_detail_id),
            delivery_method_id: Set(order.delivery_method_id),
            ..Default::default()
        }
        .insert(&*conn)
        .await?)
    }

    async fn create_order_items(
        &self,
        items: Vec<NewOrderItem>,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        let conn = self.conn().await?;
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let model = order_item::ActiveModel {
                order_id: Set(item.order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                subtotal_price: Set(item.subtotal_price),
                ..Default::default()
            }
            .insert(&*conn)
            .await?;
            created.push(model);
        }
        Ok(created)
    }

    async fn find_order(&self, id: i32) -> Result<Option<order::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(order::Entity::find_by_id(id).one(&*conn).await?)
    }

    async fn find_order_items(
        &self,
        order_id: i32,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Id)
            .all(&*conn)
            .await?)
    }

    async fn find_orders_by_shipment(
        &self,
        shipment_id: i32,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(order::Entity::find()
            .filter(order::Column::ShipmentId.eq(shipment_id))
            .order_by_asc(order::Column::Id)
            .all(&*conn)
            .await?)
    }

    async fn update_order(
        &self,
        order_id: i32,
        status: OrderStatus,
        shipment_id: Option<i32>,
    ) -> Result<order::Model, ServiceError> {
        let conn = self.conn().await?;
        let existing = order::Entity::find_by_id(order_id)
            .one(&*conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let mut active: order::ActiveModel = existing.into();
        active.order_status_id = Set(status);
        active.shipment_id = Set(shipment_id);
        Ok(active.update(&*conn).await?)
    }
}

#[async_trait]
impl ShipmentRepository for SeaOrmTransaction {
    async fn find_shipment(&self, id: i32) -> Result<Option<shipment::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(shipment::Entity::find_by_id(id).one(&*conn).await?)
    }

    async fn save_shipment(&self, shipment: &shipment::Model) -> Result<(), ServiceError> {
        let conn = self.conn().await?;
        shipment::ActiveModel {
            id: Unchanged(shipment.id),
            vehicle_id: Set(shipment.vehicle_id),
            status_id: Set(shipment.status_id),
            date: Set(shipment.date),
            finished_at: Set(shipment.finished_at),
            effective_km: Set(shipment.effective_km),
        }
        .update(&*conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VehicleRepository for SeaOrmTransaction {
    async fn find_vehicle(&self, id: i32) -> Result<Option<vehicle::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(vehicle::Entity::find_by_id(id).one(&*conn).await?)
    }

    async fn list_vehicles(&self) -> Result<Vec<vehicle::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(vehicle::Entity::find()
            .order_by_asc(vehicle::Column::Id)
            .all(&*conn)
            .await?)
    }

    async fn update_vehicle_km(&self, id: i32, km_traveled: i32) -> Result<(), ServiceError> {
        let conn = self.conn().await?;
        let existing = vehicle::Entity::find_by_id(id)
            .one(&*conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Vehicle {} not found", id)))?;
        let mut active: vehicle::ActiveModel = existing.into();
        active.km_traveled = Set(km_traveled);
        active.update(&*conn).await?;
        Ok(())
    }

    async fn create_vehicle_usage(
        &self,
        usage: NewVehicleUsage,
    ) -> Result<vehicle_usage::Model, ServiceError> {
        let conn = self.conn().await?;
        Ok(vehicle_usage::ActiveModel {
            vehicle_id: Set(usage.vehicle_id),
            shipment_id: Set(usage.shipment_id),
            previous_km: Set(usage.previous_km),
            current_km: Set(usage.current_km),
            km_traveled: Set(usage.km_traveled),
            created_at: Set(usage.created_at),
            ..Default::default()
        }
        .insert(&*conn)
        .await?)
    }
}

#[async_trait]
impl BillRepository for SeaOrmTransaction {
    async fn find_bill_by_order(&self, order_id: i32) -> Result<Option<bill::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(bill::Entity::find()
            .filter(bill::Column::OrderId.eq(order_id))
            .one(&*conn)
            .await?)
    }

    async fn find_bill_items(&self, bill_id: i32) -> Result<Vec<bill_item::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(bill_item::Entity::find()
            .filter(bill_item::Column::BillId.eq(bill_id))
            .order_by_asc(bill_item::Column::Id)
            .all(&*conn)
            .await?)
    }

    async fn create_bill(&self, bill: NewBill) -> Result<bill::Model, ServiceError> {
        let conn = self.conn().await?;
        Ok(bill::ActiveModel {
            order_id: Set(bill.order_id),
            client_id: Set(bill.client_id),
            subtotal: Set(bill.subtotal),
            tax_amount: Set(bill.tax_amount),
            total_amount: Set(bill.total_amount),
            created_at: Set(bill.created_at),
            ..Default::default()
        }
        .insert(&*conn)
        .await?)
    }

    async fn create_bill_items(
        &self,
        items: Vec<NewBillItem>,
    ) -> Result<Vec<bill_item::Model>, ServiceError> {
        let conn = self.conn().await?;
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let model = bill_item::ActiveModel {
                bill_id: Set(item.bill_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                subtotal_price: Set(item.subtotal_price),
                ..Default::default()
            }
            .insert(&*conn)
            .await?;
            created.push(model);
        }
        Ok(created)
    }
}

#[async_trait]
impl NotificationRepository for SeaOrmTransaction {
    async fn exists_unviewed_notification(
        &self,
        user_id: i32,
        message: &str,
    ) -> Result<bool, ServiceError> {
        let conn = self.conn().await?;
        let count = notification::Entity::find()
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::Message.eq(message))
            .filter(notification::Column::Viewed.eq(false))
            .filter(notification::Column::Deleted.eq(false))
            .count(&*conn)
            .await?;
        Ok(count > 0)
    }

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<notification::Model, ServiceError> {
        let conn = self.conn().await?;
        Ok(notification::ActiveModel {
            user_id: Set(notification.user_id),
            message: Set(notification.message),
            viewed: Set(false),
            deleted: Set(false),
            created_at: Set(notification.created_at),
            ..Default::default()
        }
        .insert(&*conn)
        .await?)
    }
}

#[async_trait]
impl UserRepository for SeaOrmTransaction {
    async fn find_users_by_role(&self, role: UserRole) -> Result<Vec<user::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(user::Entity::find()
            .filter(user::Column::Role.eq(role))
            .order_by_asc(user::Column::Id)
            .all(&*conn)
            .await?)
    }
}

#[async_trait]
impl MaintenancePlanItemRepository for SeaOrmTransaction {
    async fn list_plan_items(&self) -> Result<Vec<maintenance_plan_item::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(maintenance_plan_item::Entity::find()
            .order_by_asc(maintenance_plan_item::Column::Id)
            .all(&*conn)
            .await?)
    }

    async fn list_maintenances_for_plan_items(
        &self,
        plan_item_ids: &[i32],
    ) -> Result<Vec<maintenance::Model>, ServiceError> {
        if plan_item_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn().await?;
        Ok(maintenance::Entity::find()
            .filter(maintenance::Column::PlanItemId.is_in(plan_item_ids.to_vec()))
            .all(&*conn)
            .await?)
    }
}

#[async_trait]
impl PurchaseOrderRepository for SeaOrmTransaction {
    async fn create_purchase_order(
        &self,
        purchase_order: NewPurchaseOrder,
    ) -> Result<purchase_order::Model, ServiceError> {
        let conn = self.conn().await?;
        Ok(purchase_order::ActiveModel {
            supplier_name: Set(purchase_order.supplier_name),
            status: Set(PurchaseOrderStatus::Pending),
            total_amount: Set(purchase_order.total_amount),
            created_at: Set(purchase_order.created_at),
            received_at: Set(None),
            ..Default::default()
        }
        .insert(&*conn)
        .await?)
    }

    async fn create_purchase_order_items(
        &self,
        items: Vec<NewPurchaseOrderItem>,
    ) -> Result<Vec<purchase_order_item::Model>, ServiceError> {
        let conn = self.conn().await?;
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let model = purchase_order_item::ActiveModel {
                purchase_order_id: Set(item.purchase_order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                unit_cost: Set(item.unit_cost),
                subtotal_cost: Set(item.subtotal_cost),
                ..Default::default()
            }
            .insert(&*conn)
            .await?;
            created.push(model);
        }
        Ok(created)
    }

    async fn find_purchase_order(
        &self,
        id: i32,
    ) -> Result<Option<purchase_order::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(purchase_order::Entity::find_by_id(id).one(&*conn).await?)
    }

    async fn find_purchase_order_items(
        &self,
        purchase_order_id: i32,
    ) -> Result<Vec<purchase_order_item::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(purchase_order_item::Entity::find()
            .filter(purchase_order_item::Column::PurchaseOrderId.eq(purchase_order_id))
            .order_by_asc(purchase_order_item::Column::Id)
            .all(&*conn)
            .await?)
    }

    async fn update_purchase_order_status(
        &self,
        id: i32,
        status: PurchaseOrderStatus,
        received_at: Option<DateTime<Utc>>,
    ) -> Result<purchase_order::Model, ServiceError> {
        let conn = self.conn().await?;
        let existing = purchase_order::Entity::find_by_id(id)
            .one(&*conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", id)))?;
        let mut active: purchase_order::ActiveModel = existing.into();
        active.status = Set(status);
        active.received_at = Set(received_at);
        Ok(active.update(&*conn).await?)
    }
}

#[async_trait]
impl WorkflowStepRepository for SeaOrmTransaction {
    async fn find_workflow_step(
        &self,
        workflow: &str,
        run_key: &str,
        step: &str,
    ) -> Result<Option<workflow_step::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(workflow_step::Entity::find()
            .filter(workflow_step::Column::Workflow.eq(workflow))
            .filter(workflow_step::Column::RunKey.eq(run_key))
            .filter(workflow_step::Column::Step.eq(step))
            .one(&*conn)
            .await?)
    }

    async fn save_workflow_step(
        &self,
        step: NewWorkflowStep,
    ) -> Result<workflow_step::Model, ServiceError> {
        let conn = self.conn().await?;
        Ok(workflow_step::ActiveModel {
            workflow: Set(step.workflow),
            run_key: Set(step.run_key),
            step: Set(step.step),
            output: Set(step.output),
            completed_at: Set(step.completed_at),
            ..Default::default()
        }
        .insert(&*conn)
        .await?)
    }

    async fn last_completed_step(
        &self,
        workflow: &str,
        run_key: &str,
    ) -> Result<Option<workflow_step::Model>, ServiceError> {
        let conn = self.conn().await?;
        Ok(workflow_step::Entity::find()
            .filter(workflow_step::Column::Workflow.eq(workflow))
            .filter(workflow_step::Column::RunKey.eq(run_key))
            .order_by_desc(workflow_step::Column::Id)
            .one(&*conn)
            .await?)
    }
}
