/*!
 * Unit of work
 *
 * A transaction handle exposes every repository trait. Work done through one
 * handle is committed or rolled back as a whole.
 */

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, warn};

use crate::errors::ServiceError;
use crate::repositories::{
    BillRepository, CatalogRepository, MaintenancePlanItemRepository, NotificationRepository,
    OrderRepository, PurchaseOrderRepository, ShipmentRepository, StockRepository, UserRepository,
    VehicleRepository, WorkflowStepRepository,
};

/// Transaction-scoped repository context.
///
/// `commit` and `rollback` take `&self` so the handle can be shared by the
/// concurrent sub-steps of one transactional block. Using a handle after it
/// has been committed or rolled back yields `ServiceError::InternalError`.
#[async_trait]
pub trait Transaction:
    CatalogRepository
    + StockRepository
    + OrderRepository
    + ShipmentRepository
    + VehicleRepository
    + BillRepository
    + NotificationRepository
    + UserRepository
    + MaintenancePlanItemRepository
    + PurchaseOrderRepository
    + WorkflowStepRepository
    + Send
    + Sync
{
    async fn commit(&self) -> Result<(), ServiceError>;

    async fn rollback(&self) -> Result<(), ServiceError>;
}

/// Shared handle passed to transactional closures.
pub type TxHandle = Arc<dyn Transaction>;

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> Result<TxHandle, ServiceError>;
}

/// Execute a function within a transaction
///
/// This helper ensures:
/// - Automatic rollback on error
/// - Automatic commit on success
/// - The error produced by `f` reaches the caller unchanged
///
/// # Example
///
/// ```rust,ignore
/// let order = with_transaction(uow, |tx| async move {
///     let order = tx.create_order(new_order).await?;
///     tx.create_order_items(items).await?;
///     Ok(order)
/// })
/// .await?;
/// ```
pub async fn with_transaction<T, F, Fut>(uow: &dyn UnitOfWork, f: F) -> Result<T, ServiceError>
where
    F: FnOnce(TxHandle) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let tx = uow.begin().await?;
    match f(tx.clone()).await {
        Ok(value) => {
            tx.commit().await.map_err(|e| {
                error!(error = %e, "Transaction commit failed");
                e
            })?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Transaction rollback failed");
            }
            Err(err)
        }
    }
}

impl<'u> dyn UnitOfWork + 'u {
    /// Method form of [`with_transaction`].
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(TxHandle) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        with_transaction(self, f).await
    }
}
