use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::Command;
use crate::entities::{order, OrderStatus};
use crate::errors::ServiceError;
use crate::services::order_lifecycle::{CreateOrderRequest, OrderWithItems};
use crate::services::AppServices;

pub const CREATE_ORDER: &str = "order.create";
pub const UPDATE_ORDER_STATUS: &str = "order.status.update";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CreateOrderCommand {
    pub request: CreateOrderRequest,
}

#[async_trait]
impl Command for CreateOrderCommand {
    type Result = OrderWithItems;

    #[instrument(skip(self, services), fields(client_id = self.request.client_id))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        services.orders.create_order(self.request.clone()).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOrderStatusCommand {
    pub order_id: i32,
    pub status: OrderStatus,
}

#[async_trait]
impl Command for UpdateOrderStatusCommand {
    type Result = order::Model;

    #[instrument(skip(services))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        services.orders.update_status(self.order_id, self.status).await
    }
}
