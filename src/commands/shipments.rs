use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::Command;
use crate::entities::shipment;
use crate::errors::ServiceError;
use crate::services::shipment_finish::{
    DispatchShipmentRequest, FinishShipmentCommand, FinishShipmentReport,
};
use crate::services::AppServices;

pub const DISPATCH_SHIPMENT: &str = "shipment.dispatch";
pub const FINISH_SHIPMENT: &str = "finish.shipment";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchShipmentCommand {
    pub request: DispatchShipmentRequest,
}

#[async_trait]
impl Command for DispatchShipmentCommand {
    type Result = shipment::Model;

    #[instrument(skip(self, services), fields(shipment_id = self.request.shipment_id))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        services.shipments.dispatch(self.request.clone()).await
    }
}

/// `finish.shipment` payload: shipment id, per-order statuses, odometer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinishShipment {
    pub command: FinishShipmentCommand,
}

#[async_trait]
impl Command for FinishShipment {
    type Result = FinishShipmentReport;

    #[instrument(skip(self, services), fields(shipment_id = self.command.shipment_id))]
    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError> {
        services.shipments.finish(self.command.clone()).await
    }
}
