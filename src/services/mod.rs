// Stock and orders
pub mod order_lifecycle;
pub mod stock_ledger;

// Shipping and billing
pub mod billing;
pub mod shipment_finish;

// Fleet maintenance
pub mod maintenance_notifications;

// Supplier side
pub mod purchase_orders;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::transaction::UnitOfWork;
use crate::events::EventSender;
use crate::notifications::OrderMailer;

use billing::BillingService;
use maintenance_notifications::MaintenanceNotificationService;
use order_lifecycle::OrderService;
use purchase_orders::PurchaseOrderService;
use shipment_finish::ShipmentService;

/// Service container holding every service over one unit of work.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub billing: Arc<BillingService>,
    pub shipments: Arc<ShipmentService>,
    pub maintenance: Arc<MaintenanceNotificationService>,
    pub purchase_orders: Arc<PurchaseOrderService>,
}

impl AppServices {
    pub fn new(
        uow: Arc<dyn UnitOfWork>,
        event_sender: EventSender,
        mailer: Arc<dyn OrderMailer>,
        config: &AppConfig,
    ) -> Self {
        let billing = BillingService::new(uow.clone(), event_sender.clone(), config.tax_rate);
        let maintenance = MaintenanceNotificationService::new(
            uow.clone(),
            event_sender.clone(),
            config.maintenance_tolerance_pct,
        );
        let shipments = ShipmentService::new(
            uow.clone(),
            event_sender.clone(),
            mailer,
            billing.clone(),
            maintenance.clone(),
        );

        Self {
            orders: Arc::new(OrderService::new(uow.clone(), event_sender.clone())),
            billing: Arc::new(billing),
            shipments: Arc::new(shipments),
            maintenance: Arc::new(maintenance),
            purchase_orders: Arc::new(PurchaseOrderService::new(uow, event_sender)),
        }
    }
}
