use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::db::transaction::{Transaction, UnitOfWork};
use crate::entities::{order, order_item, OrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::{NewOrder, NewOrderItem};
use crate::services::stock_ledger::{self, StockDelta};

const DEFAULT_DELIVERY_METHOD_ID: i32 = 1;

fn default_delivery_method_id() -> i32 {
    DEFAULT_DELIVERY_METHOD_ID
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct OrderItemRequest {
    pub product_id: i32,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub client_id: i32,
    pub payment_type_id: i32,
    #[serde(default = "default_delivery_method_id")]
    pub delivery_method_id: i32,
    #[serde(default)]
    pub order_items: Vec<OrderItemRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub order_id: i32,
    pub status: OrderStatus,
}

/// A persisted order together with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Rejects transitions out of a terminal status. Every other pair is
/// allowed; a same-status pair is a no-op.
pub fn validate_transition(old: OrderStatus, new: OrderStatus) -> Result<(), ServiceError> {
    if old == new {
        return Ok(());
    }
    if old.is_terminal() {
        return Err(ServiceError::InvalidStatus(format!(
            "Order cannot move from {} to {}",
            old, new
        )));
    }
    Ok(())
}

/// Stock effect of one order line for a status change. `old == None` is the
/// creation of the order.
pub fn stock_delta_for(
    old: Option<OrderStatus>,
    new: OrderStatus,
    quantity: i32,
) -> Result<StockDelta, ServiceError> {
    match old {
        None if new == OrderStatus::Pending => Ok(StockDelta::reserve(quantity)),
        None => Err(ServiceError::InvalidStatus(format!(
            "Orders are created Pending, not {}",
            new
        ))),
        Some(old) => {
            validate_transition(old, new)?;
            if old == new {
                return Ok(StockDelta::ZERO);
            }
            Ok(match new {
                OrderStatus::Cancelled => StockDelta::release(quantity),
                OrderStatus::Finished => StockDelta::consume(quantity),
                OrderStatus::Pending | OrderStatus::Shipped => StockDelta::ZERO,
            })
        }
    }
}

/// Audit reason naming the order and the transition.
pub fn transition_reason(order_id: i32, old: Option<OrderStatus>, new: OrderStatus) -> String {
    match old {
        None => format!("Order #{} created ({})", order_id, new),
        Some(old) => format!("Order #{} {} -> {}", order_id, old, new),
    }
}

/// Applies the stock effect of moving `order` from `old` to `new` for every
/// line, in order, through `tx`. Returns the resulting stock events.
#[instrument(
    skip(tx, order, items),
    fields(order_id = order.id, payment_type_id = ?payment_type_id)
)]
pub async fn manage_stock_changes(
    tx: &dyn Transaction,
    order: &order::Model,
    items: &[order_item::Model],
    payment_type_id: Option<i32>,
    old: Option<OrderStatus>,
    new: OrderStatus,
) -> Result<Vec<Event>, ServiceError> {
    let reason = transition_reason(order.id, old, new);
    let mut events = Vec::new();
    for item in items {
        let delta = stock_delta_for(old, new, item.quantity)?;
        if delta.is_zero() {
            continue;
        }
        let mutation = stock_ledger::apply_delta(tx, item.product_id, delta, &reason).await?;
        events.extend(mutation.events(&reason));
    }
    Ok(events)
}

#[derive(Clone)]
pub struct OrderService {
    uow: Arc<dyn UnitOfWork>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(uow: Arc<dyn UnitOfWork>, event_sender: EventSender) -> Self {
        Self { uow, event_sender }
    }

    /// Creates an order, its lines and payment detail and reserves the stock,
    /// all in one transaction.
    #[instrument(
        skip(self, request),
        fields(client_id = request.client_id, lines = request.order_items.len())
    )]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderWithItems, ServiceError> {
        let (created, stock_events) = self
            .uow
            .execute(|tx| async move { create_order_in(&*tx, request).await })
            .await
            .map_err(|e| {
                warn!(error = %e, "Order creation failed");
                e
            })?;

        crate::metrics::ORDERS_CREATED.inc();
        info!(order_id = created.order.id, total = %created.order.total_amount, "Order created");

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: created.order.id,
                client_id: created.order.client_id,
                total_amount: created.order.total_amount,
            })
            .await;
        for event in stock_events {
            self.event_sender.send_or_log(event).await;
        }

        Ok(created)
    }

    /// Moves an order to `new_status`, applying the stock effect. Returning
    /// to Pending detaches the order from its shipment.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: i32,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let (order, old_status, stock_events) = self
            .uow
            .execute(|tx| async move {
                let current = tx
                    .find_order(order_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Order {} not found", order_id))
                    })?;
                let old_status = current.order_status_id;
                validate_transition(old_status, new_status)?;
                if old_status == new_status {
                    return Ok((current, old_status, Vec::new()));
                }

                let items = tx.find_order_items(order_id).await?;
                let payment_type_id = tx
                    .find_payment_detail(current.payment_detail_id)
                    .await?
                    .map(|detail| detail.payment_type_id);
                let stock_events = manage_stock_changes(
                    &*tx,
                    &current,
                    &items,
                    payment_type_id,
                    Some(old_status),
                    new_status,
                )
                .await?;

                let shipment_id = if new_status == OrderStatus::Pending {
                    None
                } else {
                    current.shipment_id
                };
                let updated = tx.update_order(order_id, new_status, shipment_id).await?;
                Ok((updated, old_status, stock_events))
            })
            .await?;

        if old_status != new_status {
            crate::metrics::ORDER_STATUS_CHANGES
                .with_label_values(&[old_status.as_str(), new_status.as_str()])
                .inc();
            info!(old = %old_status, new = %new_status, "Order status updated");
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status,
                    new_status,
                })
                .await;
            for event in stock_events {
                self.event_sender.send_or_log(event).await;
            }
        }

        Ok(order)
    }

    /// Loads an order with its lines.
    pub async fn get_order(&self, order_id: i32) -> Result<OrderWithItems, ServiceError> {
        self.uow
            .execute(|tx| async move {
                let order = tx
                    .find_order(order_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Order {} not found", order_id))
                    })?;
                let items = tx.find_order_items(order_id).await?;
                Ok(OrderWithItems { order, items })
            })
            .await
    }
}

async fn create_order_in(
    tx: &dyn Transaction,
    request: CreateOrderRequest,
) -> Result<(OrderWithItems, Vec<Event>), ServiceError> {
    tx.find_client(request.client_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Client {} not found", request.client_id)))?;
    tx.find_payment_type(request.payment_type_id)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!(
                "Payment type {} not found",
                request.payment_type_id
            ))
        })?;

    if request.order_items.is_empty() {
        return Err(ServiceError::BadRequest(
            "Order must contain at least one item".into(),
        ));
    }
    for item in &request.order_items {
        item.validate().map_err(|e| {
            ServiceError::BadRequest(format!("Invalid item for product {}: {}", item.product_id, e))
        })?;
    }

    let product_ids: BTreeSet<i32> = request.order_items.iter().map(|i| i.product_id).collect();
    let ids: Vec<i32> = product_ids.iter().copied().collect();
    let products: HashMap<i32, _> = tx
        .find_products_by_ids(&ids)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();
    let missing: Vec<String> = ids
        .iter()
        .filter(|id| !products.contains_key(id))
        .map(|id| id.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ServiceError::NotFound(format!(
            "Products not found: {}",
            missing.join(", ")
        )));
    }

    // Duplicate lines of the same product are checked against their sum.
    let mut requested: BTreeMap<i32, i32> = BTreeMap::new();
    for item in &request.order_items {
        let total = requested.entry(item.product_id).or_insert(0);
        *total = total.checked_add(item.quantity).ok_or_else(|| {
            ServiceError::BadRequest(format!("Quantity overflow for product {}", item.product_id))
        })?;
    }
    for (product_id, quantity) in &requested {
        let stock = tx
            .find_stock_for_update(*product_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Stock for product {} not found", product_id))
            })?;
        if stock.quantity_available < *quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "Product {}: requested {}, available {}",
                product_id, quantity, stock.quantity_available
            )));
        }
    }

    let mut lines = Vec::with_capacity(request.order_items.len());
    let mut total_amount = Decimal::ZERO;
    for item in &request.order_items {
        let unit_price = products[&item.product_id].price;
        let subtotal_price = unit_price * Decimal::from(item.quantity);
        total_amount += subtotal_price;
        lines.push((item.product_id, item.quantity, unit_price, subtotal_price));
    }

    let detail = tx.create_payment_detail(request.payment_type_id).await?;
    let order = tx
        .create_order(NewOrder {
            client_id: request.client_id,
            order_status_id: OrderStatus::Pending,
            total_amount,
            created_at: Utc::now(),
            payment_detail_id: detail.id,
            delivery_method_id: request.delivery_method_id,
        })
        .await?;
    let items = tx
        .create_order_items(
            lines
                .into_iter()
                .map(|(product_id, quantity, unit_price, subtotal_price)| NewOrderItem {
                    order_id: order.id,
                    product_id,
                    quantity,
                    unit_price,
                    subtotal_price,
                })
                .collect(),
        )
        .await?;

    let stock_events = manage_stock_changes(
        tx,
        &order,
        &items,
        Some(request.payment_type_id),
        None,
        OrderStatus::Pending,
    )
    .await?;

    Ok((OrderWithItems { order, items }, stock_events))
}
