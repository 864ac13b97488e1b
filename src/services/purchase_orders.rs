use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use crate::db::transaction::{Transaction, UnitOfWork};
use crate::entities::{purchase_order, purchase_order_item, PurchaseOrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::{NewPurchaseOrder, NewPurchaseOrderItem};
use crate::services::stock_ledger::{self, StockDelta};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PurchaseOrderItemRequest {
    pub product_id: i32,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    pub unit_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CreatePurchaseOrderRequest {
    #[validate(length(min = 1, message = "Supplier name is required"))]
    pub supplier_name: String,
    pub items: Vec<PurchaseOrderItemRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderWithItems {
    pub purchase_order: purchase_order::Model,
    pub items: Vec<purchase_order_item::Model>,
}

/// Supplier purchase orders. Placing one raises `quantity_ordered`;
/// receiving moves those units to `quantity_available`; cancelling drops them.
#[derive(Clone)]
pub struct PurchaseOrderService {
    uow: Arc<dyn UnitOfWork>,
    event_sender: EventSender,
}

impl PurchaseOrderService {
    pub fn new(uow: Arc<dyn UnitOfWork>, event_sender: EventSender) -> Self {
        Self { uow, event_sender }
    }

    #[instrument(skip(self, request), fields(supplier = %request.supplier_name))]
    pub async fn create(
        &self,
        request: CreatePurchaseOrderRequest,
    ) -> Result<PurchaseOrderWithItems, ServiceError> {
        request.validate()?;
        if request.items.is_empty() {
            return Err(ServiceError::BadRequest(
                "Purchase order must contain at least one item".into(),
            ));
        }
        for item in &request.items {
            item.validate().map_err(|e| {
                ServiceError::BadRequest(format!(
                    "Invalid item for product {}: {}",
                    item.product_id, e
                ))
            })?;
            if item.unit_cost.is_sign_negative() {
                return Err(ServiceError::BadRequest(format!(
                    "Unit cost of product {} cannot be negative",
                    item.product_id
                )));
            }
        }

        let created = self
            .uow
            .execute(|tx| async move {
                let ids: Vec<i32> = request
                    .items
                    .iter()
                    .map(|i| i.product_id)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let found: HashSet<i32> = tx
                    .find_products_by_ids(&ids)
                    .await?
                    .into_iter()
                    .map(|p| p.id)
                    .collect();
                let missing: Vec<String> = ids
                    .iter()
                    .filter(|id| !found.contains(id))
                    .map(|id| id.to_string())
                    .collect();
                if !missing.is_empty() {
                    return Err(ServiceError::NotFound(format!(
                        "Products not found: {}",
                        missing.join(", ")
                    )));
                }

                let total_amount: Decimal = request
                    .items
                    .iter()
                    .map(|i| i.unit_cost * Decimal::from(i.quantity))
                    .sum();
                let purchase_order = tx
                    .create_purchase_order(NewPurchaseOrder {
                        supplier_name: request.supplier_name.clone(),
                        total_amount,
                        created_at: Utc::now(),
                    })
                    .await?;
                let items = tx
                    .create_purchase_order_items(
                        request
                            .items
                            .iter()
                            .map(|i| NewPurchaseOrderItem {
                                purchase_order_id: purchase_order.id,
                                product_id: i.product_id,
                                quantity: i.quantity,
                                unit_cost: i.unit_cost,
                                subtotal_cost: i.unit_cost * Decimal::from(i.quantity),
                            })
                            .collect(),
                    )
                    .await?;

                let reason = format!("Purchase order #{} placed", purchase_order.id);
                apply_to_items(&*tx, &items, StockDelta::expect, &reason).await?;
                Ok(PurchaseOrderWithItems {
                    purchase_order,
                    items,
                })
            })
            .await?;

        info!(purchase_order_id = created.purchase_order.id, "Purchase order created");
        self.event_sender
            .send_or_log(Event::PurchaseOrderCreated {
                purchase_order_id: created.purchase_order.id,
            })
            .await;
        Ok(created)
    }

    /// Goods arrived: ordered units become available.
    #[instrument(skip(self))]
    pub async fn receive(
        &self,
        purchase_order_id: i32,
    ) -> Result<purchase_order::Model, ServiceError> {
        let updated = self
            .close(purchase_order_id, PurchaseOrderStatus::Received, StockDelta::receive)
            .await?;
        self.event_sender
            .send_or_log(Event::PurchaseOrderReceived { purchase_order_id })
            .await;
        Ok(updated)
    }

    /// Goods will not arrive: ordered units are dropped.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        purchase_order_id: i32,
    ) -> Result<purchase_order::Model, ServiceError> {
        let updated = self
            .close(purchase_order_id, PurchaseOrderStatus::Cancelled, StockDelta::withdraw)
            .await?;
        self.event_sender
            .send_or_log(Event::PurchaseOrderCancelled { purchase_order_id })
            .await;
        Ok(updated)
    }

    async fn close(
        &self,
        purchase_order_id: i32,
        status: PurchaseOrderStatus,
        delta: fn(i32) -> StockDelta,
    ) -> Result<purchase_order::Model, ServiceError> {
        self.uow
            .execute(|tx| async move {
                let current = tx
                    .find_purchase_order(purchase_order_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!(
                            "Purchase order {} not found",
                            purchase_order_id
                        ))
                    })?;
                if current.status != PurchaseOrderStatus::Pending {
                    return Err(ServiceError::InvalidStatus(format!(
                        "Purchase order {} is {} and cannot become {}",
                        purchase_order_id, current.status, status
                    )));
                }

                let items = tx.find_purchase_order_items(purchase_order_id).await?;
                let reason = format!("Purchase order #{} {}", purchase_order_id, status);
                apply_to_items(&*tx, &items, delta, &reason).await?;

                let received_at = (status == PurchaseOrderStatus::Received).then(Utc::now);
                tx.update_purchase_order_status(purchase_order_id, status, received_at)
                    .await
            })
            .await
    }
}

async fn apply_to_items(
    tx: &dyn Transaction,
    items: &[purchase_order_item::Model],
    delta: fn(i32) -> StockDelta,
    reason: &str,
) -> Result<(), ServiceError> {
    for item in items {
        stock_ledger::apply_delta(tx, item.product_id, delta(item.quantity), reason).await?;
    }
    Ok(())
}
