use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::Command;
use crate::entities::purchase_order;
use crate::errors::ServiceError;
use crate::services::purchase_orders::{CreatePurchaseOrderRequest, PurchaseOrderWithItems};
use crate::services::AppServices;

pub const CREATE_PURCHASE_ORDER: &str = "purchase_order.create";
pub const RECEIVE_PURCHASE_ORDER: &str = "purchase_order.receive";
pub const CANCEL_PURCHASE_ORDER: &str = "purchase_order.cancel";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreatePurchaseOrderCommand {
    pub request: CreatePurchaseOrderRequest,
}

#[async_trait]
impl Command for CreatePurchaseOrderCommand {
    type Result = PurchaseOrderWithItems;

    #[instrument(skip(self, services), fields(supplier = %self.request.supplier_name))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        services.purchase_orders.create(self.request.clone()).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivePurchaseOrderCommand {
    pub purchase_order_id: i32,
}

#[async_trait]
impl Command for ReceivePurchaseOrderCommand {
    type Result = purchase_order::Model;

    #[instrument(skip(services))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        services.purchase_orders.receive(self.purchase_order_id).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelPurchaseOrderCommand {
    pub purchase_order_id: i32,
}

#[async_trait]
impl Command for CancelPurchaseOrderCommand {
    type Result = purchase_order::Model;

    #[instrument(skip(services))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        services.purchase_orders.cancel(self.purchase_order_id).await
    }
}
