//! Outbound order emails.
//!
//! Transport is external to the back-office core; the services only see the
//! [`OrderMailer`] seam. [`LoggingMailer`] is the default implementation and
//! records every email as a structured log event.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::entities::{order, OrderStatus};
use crate::services::billing::BillReport;

/// Email transport errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Email transport error: {0}")]
    Transport(String),
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrderMailer: Send + Sync {
    /// Tells the client that their order changed status.
    async fn send_order_status_change_email(
        &self,
        order: &order::Model,
        status: OrderStatus,
    ) -> Result<(), NotificationError>;

    /// Sends the bill of a finished order to the client.
    async fn send_bill_by_email(
        &self,
        order: &order::Model,
        status: OrderStatus,
        bill: &BillReport,
        client_email: &str,
    ) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, Default)]
pub struct LoggingMailer;

#[async_trait]
impl OrderMailer for LoggingMailer {
    #[instrument(skip(self, order), fields(order_id = order.id))]
    async fn send_order_status_change_email(
        &self,
        order: &order::Model,
        status: OrderStatus,
    ) -> Result<(), NotificationError> {
        info!(client_id = order.client_id, status = %status, "Order status email sent");
        Ok(())
    }

    #[instrument(skip(self, order, bill), fields(order_id = order.id, bill_id = bill.bill_id))]
    async fn send_bill_by_email(
        &self,
        order: &order::Model,
        status: OrderStatus,
        bill: &BillReport,
        client_email: &str,
    ) -> Result<(), NotificationError> {
        if client_email.trim().is_empty() || !client_email.contains('@') {
            return Err(NotificationError::InvalidRecipient(client_email.to_string()));
        }
        let payload = serde_json::to_string(bill)?;
        info!(
            to = client_email,
            status = %status,
            total = %bill.total,
            payload_bytes = payload.len(),
            "Bill email sent"
        );
        Ok(())
    }
}
