//! Narrow repository interfaces used by the back-office core.
//!
//! Every method runs against a transaction-scoped context (see
//! [`crate::db::transaction::Transaction`]); there is no implicit connection.
//! Both stores in [`crate::db`] implement all of these traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entities::{
    bill, bill_item, client, maintenance, maintenance_plan_item, notification, order, order_item,
    payment_detail, payment_type, product, purchase_order, purchase_order_item, shipment, stock,
    stock_change, user, vehicle, vehicle_usage, workflow_step, OrderStatus, PurchaseOrderStatus,
    StockField, UserRole,
};
use crate::errors::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub client_id: i32,
    pub order_status_id: OrderStatus,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub payment_detail_id: i32,
    pub delivery_method_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub order_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStockChange {
    pub product_id: i32,
    pub changed_field: StockField,
    pub previous_value: i32,
    pub new_value: i32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVehicleUsage {
    pub vehicle_id: i32,
    pub shipment_id: i32,
    pub previous_km: i32,
    pub current_km: i32,
    pub km_traveled: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBill {
    pub order_id: i32,
    pub client_id: i32,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBillItem {
    pub bill_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: i32,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub supplier_name: String,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPurchaseOrderItem {
    pub purchase_order_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub unit_cost: Decimal,
    pub subtotal_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWorkflowStep {
    pub workflow: String,
    pub run_key: String,
    pub step: String,
    pub output: String,
    pub completed_at: DateTime<Utc>,
}

/// Lookups for clients, payment types and products.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn find_client(&self, id: i32) -> Result<Option<client::Model>, ServiceError>;

    async fn find_payment_type(&self, id: i32)
        -> Result<Option<payment_type::Model>, ServiceError>;

    /// Batched existence check: returns the products that exist among `ids`.
    async fn find_products_by_ids(&self, ids: &[i32]) -> Result<Vec<product::Model>, ServiceError>;
}

#[async_trait]
pub trait StockRepository: Send + Sync {
    /// Reads the stock row of a product and locks it until the enclosing
    /// transaction ends.
    async fn find_stock_for_update(
        &self,
        product_id: i32,
    ) -> Result<Option<stock::Model>, ServiceError>;

    async fn save_stock(&self, stock: &stock::Model) -> Result<(), ServiceError>;

    async fn append_stock_changes(&self, changes: Vec<NewStockChange>) -> Result<(), ServiceError>;

    async fn list_stock_changes(
        &self,
        product_id: i32,
    ) -> Result<Vec<stock_change::Model>, ServiceError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create_payment_detail(
        &self,
        payment_type_id: i32,
    ) -> Result<payment_detail::Model, ServiceError>;

    async fn find_payment_detail(
        &self,
        id: i32,
    ) -> Result<Option<payment_detail::Model>, ServiceError>;

    async fn create_order(&self, order: NewOrder) -> Result<order::Model, ServiceError>;

    async fn create_order_items(
        &self,
        items: Vec<NewOrderItem>,
    ) -> Result<Vec<order_item::Model>, ServiceError>;

    async fn find_order(&self, id: i32) -> Result<Option<order::Model>, ServiceError>;

    async fn find_order_items(&self, order_id: i32) -> Result<Vec<order_item::Model>, ServiceError>;

    async fn find_orders_by_shipment(
        &self,
        shipment_id: i32,
    ) -> Result<Vec<order::Model>, ServiceError>;

    /// Sets both the status and the shipment assignment of an order.
    async fn update_order(
        &self,
        order_id: i32,
        status: OrderStatus,
        shipment_id: Option<i32>,
    ) -> Result<order::Model, ServiceError>;
}

#[async_trait]
pub trait ShipmentRepository: Send + Sync {
    async fn find_shipment(&self, id: i32) -> Result<Option<shipment::Model>, ServiceError>;

    async fn save_shipment(&self, shipment: &shipment::Model) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait VehicleRepository: Send + Sync {
    async fn find_vehicle(&self, id: i32) -> Result<Option<vehicle::Model>, ServiceError>;

    async fn list_vehicles(&self) -> Result<Vec<vehicle::Model>, ServiceError>;

    async fn update_vehicle_km(&self, id: i32, km_traveled: i32) -> Result<(), ServiceError>;

    async fn create_vehicle_usage(
        &self,
        usage: NewVehicleUsage,
    ) -> Result<vehicle_usage::Model, ServiceError>;
}

#[async_trait]
pub trait BillRepository: Send + Sync {
    async fn find_bill_by_order(&self, order_id: i32) -> Result<Option<bill::Model>, ServiceError>;

    async fn find_bill_items(&self, bill_id: i32) -> Result<Vec<bill_item::Model>, ServiceError>;

    async fn create_bill(&self, bill: NewBill) -> Result<bill::Model, ServiceError>;

    async fn create_bill_items(
        &self,
        items: Vec<NewBillItem>,
    ) -> Result<Vec<bill_item::Model>, ServiceError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// True when the user already has a notification with this exact message
    /// that is neither viewed nor deleted.
    async fn exists_unviewed_notification(
        &self,
        user_id: i32,
        message: &str,
    ) -> Result<bool, ServiceError>;

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<notification::Model, ServiceError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_users_by_role(&self, role: UserRole) -> Result<Vec<user::Model>, ServiceError>;
}

#[async_trait]
pub trait MaintenancePlanItemRepository: Send + Sync {
    async fn list_plan_items(&self) -> Result<Vec<maintenance_plan_item::Model>, ServiceError>;

    async fn list_maintenances_for_plan_items(
        &self,
        plan_item_ids: &[i32],
    ) -> Result<Vec<maintenance::Model>, ServiceError>;
}

#[async_trait]
pub trait PurchaseOrderRepository: Send + Sync {
    async fn create_purchase_order(
        &self,
        purchase_order: NewPurchaseOrder,
    ) -> Result<purchase_order::Model, ServiceError>;

    async fn create_purchase_order_items(
        &self,
        items: Vec<NewPurchaseOrderItem>,
    ) -> Result<Vec<purchase_order_item::Model>, ServiceError>;

    async fn find_purchase_order(
        &self,
        id: i32,
    ) -> Result<Option<purchase_order::Model>, ServiceError>;

    async fn find_purchase_order_items(
        &self,
        purchase_order_id: i32,
    ) -> Result<Vec<purchase_order_item::Model>, ServiceError>;

    async fn update_purchase_order_status(
        &self,
        id: i32,
        status: PurchaseOrderStatus,
        received_at: Option<DateTime<Utc>>,
    ) -> Result<purchase_order::Model, ServiceError>;
}

#[async_trait]
pub trait WorkflowStepRepository: Send + Sync {
    async fn find_workflow_step(
        &self,
        workflow: &str,
        run_key: &str,
        step: &str,
    ) -> Result<Option<workflow_step::Model>, ServiceError>;

    async fn save_workflow_step(
        &self,
        step: NewWorkflowStep,
    ) -> Result<workflow_step::Model, ServiceError>;

    /// The persisted cursor of a run: its most recently completed step.
    async fn last_completed_step(
        &self,
        workflow: &str,
        run_key: &str,
    ) -> Result<Option<workflow_step::Model>, ServiceError>;
}
