//! SeaORM entities for every record the back-office core reads or writes.

pub mod bill;
pub mod bill_item;
pub mod client;
pub mod maintenance;
pub mod maintenance_plan_item;
pub mod notification;
pub mod order;
pub mod order_item;
pub mod payment_detail;
pub mod payment_type;
pub mod product;
pub mod purchase_order;
pub mod purchase_order_item;
pub mod shipment;
pub mod stock;
pub mod stock_change;
pub mod user;
pub mod vehicle;
pub mod vehicle_usage;
pub mod workflow_step;

pub use order::OrderStatus;
pub use purchase_order::PurchaseOrderStatus;
pub use shipment::ShipmentStatus;
pub use stock_change::StockField;
pub use user::UserRole;
