use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::db::transaction::{Transaction, UnitOfWork};
use crate::entities::{bill, bill_item, client, order, OrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::{NewBill, NewBillItem};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillClient {
    pub id: i32,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillLine {
    pub product_id: i32,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

/// Everything a rendered bill shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillReport {
    pub bill_id: i32,
    pub order_id: i32,
    pub issued_at: DateTime<Utc>,
    pub client: BillClient,
    pub items: Vec<BillLine>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// Bill for an order and whether this call created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillOutcome {
    pub report: BillReport,
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// Tax is charged on top of the subtotal and rounded to cents.
pub fn compute_totals(
    subtotals: impl IntoIterator<Item = Decimal>,
    tax_rate: Decimal,
) -> BillTotals {
    let subtotal: Decimal = subtotals.into_iter().sum();
    let tax_amount = (subtotal * tax_rate).round_dp(2);
    BillTotals {
        subtotal,
        tax_amount,
        total: subtotal + tax_amount,
    }
}

#[derive(Clone)]
pub struct BillingService {
    uow: Arc<dyn UnitOfWork>,
    event_sender: EventSender,
    tax_rate: Decimal,
}

impl BillingService {
    pub fn new(uow: Arc<dyn UnitOfWork>, event_sender: EventSender, tax_rate: Decimal) -> Self {
        Self {
            uow,
            event_sender,
            tax_rate,
        }
    }

    /// Creates the bill of a finished order in its own transaction. An
    /// existing bill for the order is returned instead of a second one.
    #[instrument(skip(self))]
    pub async fn create_bill_for_order(&self, order_id: i32) -> Result<BillOutcome, ServiceError> {
        let tax_rate = self.tax_rate;
        let outcome = self
            .uow
            .execute(|tx| async move {
                if let Some(existing) = tx.find_bill_by_order(order_id).await? {
                    debug!(bill_id = existing.id, "Bill already exists, reusing it");
                    let report = load_report(&*tx, existing, tax_rate).await?;
                    return Ok(BillOutcome {
                        report,
                        created: false,
                    });
                }

                let order = tx
                    .find_order(order_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Order {} not found", order_id))
                    })?;
                if order.order_status_id != OrderStatus::Finished {
                    return Err(ServiceError::InvalidStatus(format!(
                        "Order {} is {} and cannot be billed",
                        order_id, order.order_status_id
                    )));
                }

                let items = tx.find_order_items(order_id).await?;
                let totals = compute_totals(items.iter().map(|i| i.subtotal_price), tax_rate);
                let bill = tx
                    .create_bill(NewBill {
                        order_id,
                        client_id: order.client_id,
                        subtotal: totals.subtotal,
                        tax_amount: totals.tax_amount,
                        total_amount: totals.total,
                        created_at: Utc::now(),
                    })
                    .await?;
                tx.create_bill_items(
                    items
                        .iter()
                        .map(|item| NewBillItem {
                            bill_id: bill.id,
                            product_id: item.product_id,
                            quantity: item.quantity,
                            unit_price: item.unit_price,
                            subtotal_price: item.subtotal_price,
                        })
                        .collect(),
                )
                .await?;

                let report = load_report(&*tx, bill, tax_rate).await?;
                Ok(BillOutcome {
                    report,
                    created: true,
                })
            })
            .await?;

        if outcome.created {
            info!(bill_id = outcome.report.bill_id, total = %outcome.report.total, "Bill created");
            self.event_sender
                .send_or_log(Event::BillCreated {
                    bill_id: outcome.report.bill_id,
                    order_id,
                    total_amount: outcome.report.total,
                })
                .await;
        }
        Ok(outcome)
    }

    /// Report of the existing bill of an order.
    pub async fn bill_report(&self, order_id: i32) -> Result<BillReport, ServiceError> {
        let tax_rate = self.tax_rate;
        self.uow
            .execute(|tx| async move {
                let bill = tx
                    .find_bill_by_order(order_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Bill for order {} not found", order_id))
                    })?;
                load_report(&*tx, bill, tax_rate).await
            })
            .await
    }

    /// The client who placed `order`.
    pub async fn client_for_order(
        &self,
        order: &order::Model,
    ) -> Result<client::Model, ServiceError> {
        let client_id = order.client_id;
        self.uow
            .execute(|tx| async move {
                tx.find_client(client_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("Client {} not found", client_id))
                    })
            })
            .await
    }
}

async fn load_report(
    tx: &dyn Transaction,
    bill: bill::Model,
    tax_rate: Decimal,
) -> Result<BillReport, ServiceError> {
    let items = tx.find_bill_items(bill.id).await?;
    let client = tx
        .find_client(bill.client_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Client {} not found", bill.client_id)))?;
    let ids: Vec<i32> = items.iter().map(|i| i.product_id).collect();
    let names: HashMap<i32, String> = tx
        .find_products_by_ids(&ids)
        .await?
        .into_iter()
        .map(|p| (p.id, p.name))
        .collect();

    Ok(build_report(&bill, &client, &items, &names, tax_rate))
}

fn build_report(
    bill: &bill::Model,
    client: &client::Model,
    items: &[bill_item::Model],
    product_names: &HashMap<i32, String>,
    tax_rate: Decimal,
) -> BillReport {
    BillReport {
        bill_id: bill.id,
        order_id: bill.order_id,
        issued_at: bill.created_at,
        client: BillClient {
            id: client.id,
            name: client.name.clone(),
            email: client.email.clone(),
        },
        items: items
            .iter()
            .map(|item| BillLine {
                product_id: item.product_id,
                product_name: product_names
                    .get(&item.product_id)
                    .cloned()
                    .unwrap_or_else(|| format!("Product #{}", item.product_id)),
                quantity: item.quantity,
                unit_price: item.unit_price,
                subtotal: item.subtotal_price,
            })
            .collect(),
        subtotal: bill.subtotal,
        tax_rate,
        tax_amount: bill.tax_amount,
        total: bill.total_amount,
    }
}
