use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use crate::errors::ServiceError;
use crate::services::AppServices;

pub mod maintenance;
pub mod orders;
pub mod purchase_orders;
pub mod shipments;

/// Command trait for implementing the Command Pattern
///
/// A command is a deserialised payload that knows which service operation
/// it stands for. Its result is serialised back to JSON by the registry.
#[async_trait]
pub trait Command: Send + Sync {
    /// The return type of the command when executed successfully
    type Result: Serialize + Send;

    async fn execute(&self, services: &AppServices) -> Result<Self::Result, ServiceError>;
}

type Handler = for<'a> fn(&'a AppServices, Value) -> BoxFuture<'a, Result<Value, ServiceError>>;

fn run<'a, C>(
    services: &'a AppServices,
    payload: Value,
) -> BoxFuture<'a, Result<Value, ServiceError>>
where
    C: Command + DeserializeOwned + 'static,
{
    Box::pin(async move {
        let command: C = serde_json::from_value(payload)
            .map_err(|e| ServiceError::BadRequest(format!("Malformed payload: {}", e)))?;
        let result = command.execute(services).await?;
        Ok(serde_json::to_value(result)?)
    })
}

/// Dispatch table from command name to typed handler.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    handlers: BTreeMap<&'static str, Handler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every back-office command.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register::<orders::CreateOrderCommand>(orders::CREATE_ORDER)
            .register::<orders::UpdateOrderStatusCommand>(orders::UPDATE_ORDER_STATUS)
            .register::<shipments::DispatchShipmentCommand>(shipments::DISPATCH_SHIPMENT)
            .register::<shipments::FinishShipment>(shipments::FINISH_SHIPMENT)
            .register::<maintenance::GenerateMaintenanceNotificationsCommand>(
                maintenance::GENERATE_MAINTENANCE_NOTIFICATIONS,
            )
            .register::<purchase_orders::CreatePurchaseOrderCommand>(
                purchase_orders::CREATE_PURCHASE_ORDER,
            )
            .register::<purchase_orders::ReceivePurchaseOrderCommand>(
                purchase_orders::RECEIVE_PURCHASE_ORDER,
            )
            .register::<purchase_orders::CancelPurchaseOrderCommand>(
                purchase_orders::CANCEL_PURCHASE_ORDER,
            );
        registry
    }

    /// Registers `C` under `name`, replacing any previous handler.
    pub fn register<C>(&mut self, name: &'static str) -> &mut Self
    where
        C: Command + DeserializeOwned + 'static,
    {
        if self.handlers.insert(name, run::<C>).is_some() {
            warn!(command = name, "Replacing registered command handler");
        }
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Deserialises `payload` into the command registered under `name` and
    /// runs it.
    #[instrument(skip(self, services, payload))]
    pub async fn dispatch(
        &self,
        services: &AppServices,
        name: &str,
        payload: Value,
    ) -> Result<Value, ServiceError> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| ServiceError::NotFound(format!("Unknown command: {}", name)))?;
        let result = handler(services, payload).await?;
        info!(command = name, "Command executed");
        Ok(result)
    }
}
