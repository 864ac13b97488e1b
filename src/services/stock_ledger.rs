//! Stock ledger.
//!
//! The only writer of `stocks`. Each mutation is computed by the pure
//! [`compute`] function and persisted together with one `stock_changes` row
//! per field that actually moved.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::db::transaction::Transaction;
use crate::entities::{stock, StockField};
use crate::errors::ServiceError;
use crate::events::Event;
use crate::repositories::NewStockChange;

/// Signed change to the three stock quantities of a product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub available: i32,
    pub ordered: i32,
    pub reserved: i32,
}

impl StockDelta {
    pub const ZERO: StockDelta = StockDelta {
        available: 0,
        ordered: 0,
        reserved: 0,
    };

    /// Units move from available to reserved (order placed).
    pub fn reserve(quantity: i32) -> Self {
        Self {
            available: -quantity,
            reserved: quantity,
            ..Self::ZERO
        }
    }

    /// Units move back from reserved to available (order cancelled).
    pub fn release(quantity: i32) -> Self {
        Self {
            available: quantity,
            reserved: -quantity,
            ..Self::ZERO
        }
    }

    /// Reserved units leave the warehouse (order finished).
    pub fn consume(quantity: i32) -> Self {
        Self {
            reserved: -quantity,
            ..Self::ZERO
        }
    }

    /// Units expected from a supplier.
    pub fn expect(quantity: i32) -> Self {
        Self {
            ordered: quantity,
            ..Self::ZERO
        }
    }

    /// Expected units arrive and become available.
    pub fn receive(quantity: i32) -> Self {
        Self {
            available: quantity,
            ordered: -quantity,
            ..Self::ZERO
        }
    }

    /// Expected units will not arrive.
    pub fn withdraw(quantity: i32) -> Self {
        Self {
            ordered: -quantity,
            ..Self::ZERO
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

/// One field of a stock row that changed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: StockField,
    pub previous: i32,
    pub new: i32,
}

/// Result of applying a delta: the new row and the fields that moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMutation {
    pub stock: stock::Model,
    pub changes: Vec<FieldChange>,
}

impl StockMutation {
    /// One `StockAdjusted` event per changed field.
    pub fn events(&self, reason: &str) -> Vec<Event> {
        self.changes
            .iter()
            .map(|change| Event::StockAdjusted {
                product_id: self.stock.product_id,
                field: change.field,
                previous_value: change.previous,
                new_value: change.new,
                reason: reason.to_string(),
            })
            .collect()
    }
}

fn shift(field: StockField, current: i32, by: i32, product_id: i32) -> Result<i32, ServiceError> {
    let next = current.checked_add(by).ok_or_else(|| {
        ServiceError::BadRequest(format!(
            "Stock {} of product {} overflows when adjusted by {}",
            field, product_id, by
        ))
    })?;
    if next < 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "Product {}: {} is {} and cannot be reduced by {}",
            product_id, field, current, -by
        )));
    }
    Ok(next)
}

/// Applies `delta` to `current` without touching storage.
///
/// Fails with `InsufficientStock` when any quantity would become negative and
/// with `BadRequest` on overflow. Only fields with a non-zero delta appear in
/// the returned changes.
pub fn compute(current: &stock::Model, delta: StockDelta) -> Result<StockMutation, ServiceError> {
    let product_id = current.product_id;
    let mut next = current.clone();
    let mut changes = Vec::new();

    let fields = [
        (StockField::Available, current.quantity_available, delta.available),
        (StockField::Ordered, current.quantity_ordered, delta.ordered),
        (StockField::Reserved, current.quantity_reserved, delta.reserved),
    ];

    for (field, previous, by) in fields {
        if by == 0 {
            continue;
        }
        let new = shift(field, previous, by, product_id)?;
        match field {
            StockField::Available => next.quantity_available = new,
            StockField::Ordered => next.quantity_ordered = new,
            StockField::Reserved => next.quantity_reserved = new,
        }
        changes.push(FieldChange {
            field,
            previous,
            new,
        });
    }

    Ok(StockMutation {
        stock: next,
        changes,
    })
}

/// Reads the stock row of `product_id` under lock, applies `delta` and
/// appends the audit trail, all through `tx`.
#[instrument(skip(tx))]
pub async fn apply_delta(
    tx: &dyn Transaction,
    product_id: i32,
    delta: StockDelta,
    reason: &str,
) -> Result<StockMutation, ServiceError> {
    let current = tx
        .find_stock_for_update(product_id)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Stock for product {} not found", product_id))
        })?;

    if delta.is_zero() {
        return Ok(StockMutation {
            stock: current,
            changes: Vec::new(),
        });
    }

    let mutation = compute(&current, delta).map_err(|e| {
        warn!(error = %e, "Stock mutation rejected");
        crate::metrics::STOCK_FAILURES
            .with_label_values(&[e.code()])
            .inc();
        e
    })?;

    tx.save_stock(&mutation.stock).await?;

    let now = Utc::now();
    let audit = mutation
        .changes
        .iter()
        .map(|change| NewStockChange {
            product_id,
            changed_field: change.field,
            previous_value: change.previous,
            new_value: change.new,
            reason: reason.to_string(),
            created_at: now,
        })
        .collect();
    tx.append_stock_changes(audit).await?;

    debug!(changes = mutation.changes.len(), "Stock updated");
    Ok(mutation)
}
