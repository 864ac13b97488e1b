//! Shipment dispatch and the shipment-finish workflow.
//!
//! Finishing a shipment runs as a [`WorkflowRun`] keyed by the run key of the
//! command, so a replayed command skips every step that already completed.
//! Without an explicit key the run key is derived from the payload, and an
//! explicit key reused with a different payload is rejected.
//!
//! 0. `accept-payload`: record the payload fingerprint for this run.
//! 1. `build-status-map`: validate the payload into `order id -> status`.
//! 2. `load-shipment-orders`: read the shipment and the orders it carries.
//! 3. `apply-shipment-transaction`: one transaction for statuses, stock,
//!    shipment, vehicle usage and odometer.
//! 4. per order applied by step 3, concurrently: status email, or bill plus
//!    bill email.
//! 5. `generate-maintenance-notifications`: once, failures only logged.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::db::transaction::{Transaction, UnitOfWork};
use crate::entities::{order, order_item, shipment, OrderStatus, ShipmentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::notifications::OrderMailer;
use crate::repositories::NewVehicleUsage;
use crate::services::billing::{BillReport, BillingService};
use crate::services::maintenance_notifications::{GenerationReport, MaintenanceNotificationService};
use crate::services::order_lifecycle::{manage_stock_changes, validate_transition, OrderWithItems};
use crate::workflows::WorkflowRun;

pub const FINISH_SHIPMENT_WORKFLOW: &str = "finish-shipment";

pub const STATUS_EMAIL_SENT: &str = "Status updated and email sent";
pub const BILL_CREATED_AND_SENT: &str = "Order finished, bill created, and email sent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusUpdate {
    pub order_id: i32,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishShipmentCommand {
    pub shipment_id: i32,
    pub orders: Vec<OrderStatusUpdate>,
    pub last_odometer: i32,
    pub odometer_reading: i32,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_key: Option<String>,
}

impl FinishShipmentCommand {
    /// Explicit run key, or one derived from the shipment and the payload
    /// fingerprint so that a changed payload starts a fresh run.
    pub fn run_key(&self) -> String {
        self.run_key.clone().unwrap_or_else(|| {
            format!("shipment-{}-{}", self.shipment_id, &self.fingerprint()[..16])
        })
    }

    /// Hex SHA-256 of the payload without its run key. Order lines are
    /// hashed by ascending order id.
    pub fn fingerprint(&self) -> String {
        let mut orders = self.orders.clone();
        orders.sort_by_key(|update| update.order_id);

        let mut hasher = Sha256::new();
        hasher.update(
            format!(
                "{}:{}:{}",
                self.shipment_id, self.last_odometer, self.odometer_reading
            )
            .as_bytes(),
        );
        if let Some(at) = self.finished_at {
            hasher.update(format!("@{}", at.to_rfc3339()).as_bytes());
        }
        for update in &orders {
            hasher.update(format!(";{}={}", update.order_id, update.status).as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchShipmentRequest {
    pub shipment_id: i32,
    pub order_ids: Vec<i32>,
}

/// Result of the side effects of one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub order_id: i32,
    pub message: String,
    pub succeeded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishShipmentReport {
    pub shipment_id: i32,
    /// True when the shipment was already Finished and nothing was written.
    pub already_applied: bool,
    pub effective_km: i32,
    pub outcomes: Vec<OrderOutcome>,
    pub maintenance: Option<GenerationReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LoadedShipment {
    shipment: shipment::Model,
    orders: Vec<OrderWithItems>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct AppliedTransition {
    order_id: i32,
    old_status: OrderStatus,
    new_status: OrderStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CoreOutcome {
    already_applied: bool,
    effective_km: i32,
    finished_at: DateTime<Utc>,
    transitions: Vec<AppliedTransition>,
}

/// Validates the payload into `order id -> new status`.
pub fn build_status_map(
    command: &FinishShipmentCommand,
) -> Result<BTreeMap<i32, OrderStatus>, ServiceError> {
    if command.odometer_reading < command.last_odometer {
        return Err(ServiceError::BadRequest(format!(
            "Odometer reading {} is below the last recorded {}",
            command.odometer_reading, command.last_odometer
        )));
    }
    let mut map = BTreeMap::new();
    for update in &command.orders {
        if map.insert(update.order_id, update.status).is_some() {
            return Err(ServiceError::BadRequest(format!(
                "Order {} appears more than once",
                update.order_id
            )));
        }
    }
    Ok(map)
}

#[derive(Clone)]
pub struct ShipmentService {
    uow: Arc<dyn UnitOfWork>,
    event_sender: EventSender,
    mailer: Arc<dyn OrderMailer>,
    billing: BillingService,
    maintenance: MaintenanceNotificationService,
}

impl ShipmentService {
    pub fn new(
        uow: Arc<dyn UnitOfWork>,
        event_sender: EventSender,
        mailer: Arc<dyn OrderMailer>,
        billing: BillingService,
        maintenance: MaintenanceNotificationService,
    ) -> Self {
        Self {
            uow,
            event_sender,
            mailer,
            billing,
            maintenance,
        }
    }

    /// Loads Pending orders onto a Pending shipment and moves both to Shipped.
    #[instrument(
        skip(self, request),
        fields(shipment_id = request.shipment_id, orders = request.order_ids.len())
    )]
    pub async fn dispatch(
        &self,
        request: DispatchShipmentRequest,
    ) -> Result<shipment::Model, ServiceError> {
        if request.order_ids.is_empty() {
            return Err(ServiceError::BadRequest(
                "A shipment needs at least one order".into(),
            ));
        }
        let unique: HashSet<i32> = request.order_ids.iter().copied().collect();
        if unique.len() != request.order_ids.len() {
            return Err(ServiceError::BadRequest(
                "Order ids must be unique".into(),
            ));
        }

        let shipment_id = request.shipment_id;
        let order_ids = request.order_ids.clone();
        let shipment = self
            .uow
            .execute(|tx| async move {
                let mut shipment = tx.find_shipment(shipment_id).await?.ok_or_else(|| {
                    ServiceError::NotFound(format!("Shipment {} not found", shipment_id))
                })?;
                if shipment.status_id != ShipmentStatus::Pending {
                    return Err(ServiceError::InvalidStatus(format!(
                        "Shipment {} is {} and cannot be dispatched",
                        shipment_id, shipment.status_id
                    )));
                }

                for order_id in &order_ids {
                    let order = tx.find_order(*order_id).await?.ok_or_else(|| {
                        ServiceError::NotFound(format!("Order {} not found", order_id))
                    })?;
                    if order.order_status_id != OrderStatus::Pending {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Order {} is {} and cannot be dispatched",
                            order_id, order.order_status_id
                        )));
                    }
                    if let Some(other) = order.shipment_id.filter(|s| *s != shipment_id) {
                        return Err(ServiceError::BadRequest(format!(
                            "Order {} is already assigned to shipment {}",
                            order_id, other
                        )));
                    }
                    let items = tx.find_order_items(*order_id).await?;
                    manage_stock_changes(
                        &*tx,
                        &order,
                        &items,
                        None,
                        Some(OrderStatus::Pending),
                        OrderStatus::Shipped,
                    )
                    .await?;
                    tx.update_order(*order_id, OrderStatus::Shipped, Some(shipment_id))
                        .await?;
                }

                shipment.status_id = ShipmentStatus::Shipped;
                tx.save_shipment(&shipment).await?;
                Ok(shipment)
            })
            .await?;

        info!("Shipment dispatched");
        self.event_sender
            .send_or_log(Event::ShipmentDispatched {
                shipment_id,
                order_ids: request.order_ids.clone(),
            })
            .await;
        for order_id in request.order_ids {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status: OrderStatus::Pending,
                    new_status: OrderStatus::Shipped,
                })
                .await;
        }
        Ok(shipment)
    }

    /// Runs the shipment-finish workflow and returns one outcome per order.
    #[instrument(
        skip(self, command),
        fields(shipment_id = command.shipment_id, orders = command.orders.len())
    )]
    pub async fn finish(
        &self,
        command: FinishShipmentCommand,
    ) -> Result<FinishShipmentReport, ServiceError> {
        let run = WorkflowRun::new(self.uow.clone(), FINISH_SHIPMENT_WORKFLOW, command.run_key());

        let fingerprint = command.fingerprint();
        let accepted: String = run
            .step("accept-payload", || async { Ok(fingerprint.clone()) })
            .await?;
        if accepted != fingerprint {
            return Err(ServiceError::BadRequest(format!(
                "Run key {} was already used for a different payload",
                run.run_key()
            )));
        }

        let status_map = run
            .step("build-status-map", || async { build_status_map(&command) })
            .await?;

        let loaded = run
            .step("load-shipment-orders", || {
                self.load_shipment_orders(command.shipment_id, &status_map)
            })
            .await?;

        let core = run
            .step("apply-shipment-transaction", || {
                self.apply_core(&command, &loaded, &status_map)
            })
            .await?;

        // Orders skipped inside the transaction get no side effects.
        let outcomes = join_all(core.transitions.iter().filter_map(|transition| {
            loaded
                .orders
                .iter()
                .find(|entry| entry.order.id == transition.order_id)
                .map(|entry| {
                    self.order_side_effects(
                        &run,
                        &entry.order,
                        command.shipment_id,
                        transition.new_status,
                    )
                })
        }))
        .await;

        let maintenance = match run
            .step("generate-maintenance-notifications", || {
                self.maintenance.generate(Utc::now())
            })
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Maintenance notification generation failed");
                None
            }
        };

        let failed = outcomes.iter().filter(|o| !o.succeeded).count();
        info!(
            already_applied = core.already_applied,
            failed,
            "Shipment finish workflow completed"
        );

        Ok(FinishShipmentReport {
            shipment_id: command.shipment_id,
            already_applied: core.already_applied,
            effective_km: core.effective_km,
            outcomes,
            maintenance,
        })
    }

    async fn load_shipment_orders(
        &self,
        shipment_id: i32,
        status_map: &BTreeMap<i32, OrderStatus>,
    ) -> Result<LoadedShipment, ServiceError> {
        let requested: Vec<i32> = status_map.keys().copied().collect();
        self.uow
            .execute(|tx| async move {
                let shipment = tx.find_shipment(shipment_id).await?.ok_or_else(|| {
                    ServiceError::NotFound(format!("Shipment {} not found", shipment_id))
                })?;
                if shipment.status_id == ShipmentStatus::Finished {
                    info!("Shipment already finished, no orders to load");
                    return Ok(LoadedShipment {
                        shipment,
                        orders: Vec::new(),
                    });
                }
                ensure_shipped(&shipment)?;
                let attached = tx.find_orders_by_shipment(shipment_id).await?;
                let attached_ids: HashSet<i32> = attached.iter().map(|o| o.id).collect();

                let foreign: Vec<String> = requested
                    .iter()
                    .filter(|id| !attached_ids.contains(id))
                    .map(|id| id.to_string())
                    .collect();
                if !foreign.is_empty() {
                    return Err(ServiceError::BadRequest(format!(
                        "Orders not assigned to shipment {}: {}",
                        shipment_id,
                        foreign.join(", ")
                    )));
                }

                let mut orders = Vec::new();
                for order in attached {
                    if !requested.contains(&order.id) {
                        warn!(
                            order_id = order.id,
                            "Order on shipment has no new status, leaving it untouched"
                        );
                        continue;
                    }
                    let items = tx.find_order_items(order.id).await?;
                    orders.push(OrderWithItems { order, items });
                }
                Ok(LoadedShipment { shipment, orders })
            })
            .await
    }

    async fn apply_core(
        &self,
        command: &FinishShipmentCommand,
        loaded: &LoadedShipment,
        status_map: &BTreeMap<i32, OrderStatus>,
    ) -> Result<CoreOutcome, ServiceError> {
        let shipment_id = command.shipment_id;
        let last_odometer = command.last_odometer;
        let odometer = command.odometer_reading;
        let finished_at = command.finished_at.unwrap_or_else(Utc::now);
        let effective_km = odometer.checked_sub(last_odometer).ok_or_else(|| {
            ServiceError::BadRequest("Odometer difference overflows".into())
        })?;
        let vehicle_id = loaded.shipment.vehicle_id;
        let entries: Vec<(order::Model, Vec<order_item::Model>, OrderStatus)> = loaded
            .orders
            .iter()
            .filter_map(|entry| {
                status_map
                    .get(&entry.order.id)
                    .map(|status| (entry.order.clone(), entry.items.clone(), *status))
            })
            .collect();

        let (outcome, stock_events) = self
            .uow
            .execute(|tx| async move {
                let mut shipment = tx.find_shipment(shipment_id).await?.ok_or_else(|| {
                    ServiceError::NotFound(format!("Shipment {} not found", shipment_id))
                })?;
                if shipment.status_id == ShipmentStatus::Finished {
                    info!("Shipment already finished, nothing to apply");
                    return Ok((
                        CoreOutcome {
                            already_applied: true,
                            effective_km: shipment.effective_km.unwrap_or(effective_km),
                            finished_at: shipment.finished_at.unwrap_or(finished_at),
                            transitions: Vec::new(),
                        },
                        Vec::new(),
                    ));
                }
                ensure_shipped(&shipment)?;
                tx.find_vehicle(vehicle_id).await?.ok_or_else(|| {
                    ServiceError::NotFound(format!("Vehicle {} not found", vehicle_id))
                })?;

                let plan = plan_transitions(&*tx, shipment_id, entries).await?;

                shipment.status_id = ShipmentStatus::Finished;
                shipment.finished_at = Some(finished_at);
                shipment.effective_km = Some(effective_km);

                let update_orders = async {
                    for step in &plan {
                        if step.order.order_status_id == step.new_status {
                            continue;
                        }
                        let assigned =
                            (step.new_status != OrderStatus::Pending).then_some(shipment_id);
                        tx.update_order(step.order.id, step.new_status, assigned).await?;
                    }
                    Ok::<_, ServiceError>(())
                };
                // Sequential: two orders may share a product row.
                let apply_stock = async {
                    let mut events = Vec::new();
                    for step in &plan {
                        events.extend(
                            manage_stock_changes(
                                &*tx,
                                &step.order,
                                &step.items,
                                step.payment_type_id,
                                Some(step.order.order_status_id),
                                step.new_status,
                            )
                            .await?,
                        );
                    }
                    Ok::<_, ServiceError>(events)
                };
                let finish_shipment = tx.save_shipment(&shipment);
                let record_usage = tx.create_vehicle_usage(NewVehicleUsage {
                    vehicle_id,
                    shipment_id,
                    previous_km: last_odometer,
                    current_km: odometer,
                    km_traveled: effective_km,
                    created_at: finished_at,
                });
                let update_odometer = tx.update_vehicle_km(vehicle_id, odometer);

                let ((), stock_events, (), _usage, ()) = futures::try_join!(
                    update_orders,
                    apply_stock,
                    finish_shipment,
                    record_usage,
                    update_odometer
                )?;

                let transitions = plan
                    .iter()
                    .map(|step| AppliedTransition {
                        order_id: step.order.id,
                        old_status: step.order.order_status_id,
                        new_status: step.new_status,
                    })
                    .collect();
                Ok((
                    CoreOutcome {
                        already_applied: false,
                        effective_km,
                        finished_at,
                        transitions,
                    },
                    stock_events,
                ))
            })
            .await?;

        if !outcome.already_applied {
            crate::metrics::SHIPMENTS_FINISHED.inc();
            info!(effective_km, "Shipment finished");
            for transition in outcome.transitions.iter().filter(|t| t.old_status != t.new_status) {
                self.event_sender
                    .send_or_log(Event::OrderStatusChanged {
                        order_id: transition.order_id,
                        old_status: transition.old_status,
                        new_status: transition.new_status,
                    })
                    .await;
            }
            for event in stock_events {
                self.event_sender.send_or_log(event).await;
            }
            self.event_sender
                .send_or_log(Event::ShipmentFinished {
                    shipment_id,
                    vehicle_id,
                    effective_km,
                    finished_at: outcome.finished_at,
                })
                .await;
        }
        Ok(outcome)
    }

    /// Side effects of one order after the shipment transaction. Never fails;
    /// a failure becomes an unsuccessful outcome for this order only.
    async fn order_side_effects(
        &self,
        run: &WorkflowRun,
        order: &order::Model,
        shipment_id: i32,
        status: OrderStatus,
    ) -> OrderOutcome {
        let mut current = order.clone();
        current.order_status_id = status;
        current.shipment_id = (status != OrderStatus::Pending).then_some(shipment_id);

        let (kind, result) = if status == OrderStatus::Finished {
            ("bill", self.bill_and_email(run, &current).await)
        } else {
            ("status_email", self.status_email(run, &current).await)
        };

        match result {
            Ok(message) => OrderOutcome {
                order_id: order.id,
                message,
                succeeded: true,
            },
            Err(e) => {
                crate::metrics::SIDE_EFFECT_FAILURES
                    .with_label_values(&[kind])
                    .inc();
                error!(order_id = order.id, error = %e, "Order side effect failed");
                OrderOutcome {
                    order_id: order.id,
                    message: format!("Side effects failed: {}", e),
                    succeeded: false,
                }
            }
        }
    }

    async fn status_email(
        &self,
        run: &WorkflowRun,
        order: &order::Model,
    ) -> Result<String, ServiceError> {
        run.step(&format!("order-{}-status-email", order.id), || async {
            self.mailer
                .send_order_status_change_email(order, order.order_status_id)
                .await?;
            Ok(STATUS_EMAIL_SENT.to_string())
        })
        .await
    }

    async fn bill_and_email(
        &self,
        run: &WorkflowRun,
        order: &order::Model,
    ) -> Result<String, ServiceError> {
        let report: BillReport = run
            .step(&format!("order-{}-bill", order.id), || async {
                Ok(self.billing.create_bill_for_order(order.id).await?.report)
            })
            .await?;

        run.step(&format!("order-{}-bill-email", order.id), || async {
            let client = self.billing.client_for_order(order).await?;
            self.mailer
                .send_bill_by_email(order, OrderStatus::Finished, &report, &client.email)
                .await?;
            Ok(BILL_CREATED_AND_SENT.to_string())
        })
        .await
    }
}

struct PlannedTransition {
    order: order::Model,
    items: Vec<order_item::Model>,
    payment_type_id: Option<i32>,
    new_status: OrderStatus,
}

fn ensure_shipped(shipment: &shipment::Model) -> Result<(), ServiceError> {
    if shipment.status_id != ShipmentStatus::Shipped {
        return Err(ServiceError::InvalidStatus(format!(
            "Shipment {} is {} and cannot be finished",
            shipment.id, shipment.status_id
        )));
    }
    Ok(())
}

/// Re-reads each order inside the transaction and checks its transition.
/// Orders no longer carried by `shipment_id` are left alone.
async fn plan_transitions(
    tx: &dyn Transaction,
    shipment_id: i32,
    entries: Vec<(order::Model, Vec<order_item::Model>, OrderStatus)>,
) -> Result<Vec<PlannedTransition>, ServiceError> {
    let mut plan = Vec::with_capacity(entries.len());
    for (order, items, new_status) in entries {
        let current = tx.find_order(order.id).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("Order {} not found", order.id))
        })?;
        if current.shipment_id != Some(shipment_id) {
            warn!(
                order_id = current.id,
                now_on = ?current.shipment_id,
                "Order left the shipment since it was loaded, skipping it"
            );
            continue;
        }
        validate_transition(current.order_status_id, new_status)?;
        let payment_type_id = tx
            .find_payment_detail(current.payment_detail_id)
            .await?
            .map(|detail| detail.payment_type_id);
        plan.push(PlannedTransition {
            order: current,
            items,
            payment_type_id,
            new_status,
        });
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{InMemoryStore, StoreState};
    use crate::entities::{payment_detail, vehicle};
    use crate::notifications::{MockOrderMailer, NotificationError};
    use assert_matches::assert_matches;
    use rust_decimal::Decimal;

    fn command(orders: Vec<OrderStatusUpdate>, last: i32, reading: i32) -> FinishShipmentCommand {
        FinishShipmentCommand {
            shipment_id: 3,
            orders,
            last_odometer: last,
            odometer_reading: reading,
            finished_at: None,
            run_key: None,
        }
    }

    #[test]
    fn status_map_rejects_duplicate_orders() {
        let update = OrderStatusUpdate {
            order_id: 1,
            status: OrderStatus::Finished,
        };
        let err = build_status_map(&command(vec![update, update], 0, 10)).unwrap_err();
        assert_matches!(err, ServiceError::BadRequest(_));
    }

    #[test]
    fn status_map_rejects_odometer_going_backwards() {
        let err = build_status_map(&command(vec![], 100, 99)).unwrap_err();
        assert_matches!(err, ServiceError::BadRequest(_));
    }

    #[test]
    fn status_map_survives_a_json_round_trip() {
        let map = build_status_map(&command(
            vec![
                OrderStatusUpdate {
                    order_id: 2,
                    status: OrderStatus::Pending,
                },
                OrderStatusUpdate {
                    order_id: 1,
                    status: OrderStatus::Finished,
                },
            ],
            0,
            0,
        ))
        .unwrap();
        let stored = serde_json::to_string(&map).unwrap();
        let restored: BTreeMap<i32, OrderStatus> = serde_json::from_str(&stored).unwrap();
        assert_eq!(restored, map);
    }

    #[test]
    fn default_run_key_follows_the_payload() {
        let finished = OrderStatusUpdate {
            order_id: 1,
            status: OrderStatus::Finished,
        };
        let pending = OrderStatusUpdate {
            order_id: 2,
            status: OrderStatus::Pending,
        };
        let key = command(vec![finished, pending], 0, 10).run_key();
        assert!(key.starts_with("shipment-3-"));
        assert_eq!(key, command(vec![pending, finished], 0, 10).run_key());
        assert_ne!(key, command(vec![finished, pending], 0, 11).run_key());

        let mut explicit = command(vec![finished], 0, 10);
        explicit.run_key = Some("manual".into());
        assert_eq!(explicit.run_key(), "manual");
        assert_eq!(explicit.fingerprint(), command(vec![finished], 0, 10).fingerprint());
    }

    fn seeded_store() -> InMemoryStore {
        let now = Utc::now();
        let mut state = StoreState::default();
        state.vehicles.push(vehicle::Model {
            id: 1,
            license_plate: "FL-001".into(),
            km_traveled: 10,
            created_at: now,
        });
        state.shipments.push(shipment::Model {
            id: 3,
            vehicle_id: 1,
            status_id: ShipmentStatus::Shipped,
            date: now,
            finished_at: None,
            effective_km: None,
        });
        state.payment_details.push(payment_detail::Model {
            id: 1,
            payment_type_id: 1,
        });
        state.orders.push(order::Model {
            id: 1,
            client_id: 1,
            order_status_id: OrderStatus::Shipped,
            total_amount: Decimal::ZERO,
            created_at: now,
            shipment_id: Some(3),
            payment_detail_id: 1,
            delivery_method_id: 1,
        });
        InMemoryStore::with_state(state)
    }

    fn service(store: &InMemoryStore, mailer: MockOrderMailer) -> ShipmentService {
        let uow: Arc<dyn UnitOfWork> = Arc::new(store.clone());
        let (events, _rx) = EventSender::channel(16);
        ShipmentService::new(
            uow.clone(),
            events.clone(),
            Arc::new(mailer),
            BillingService::new(uow.clone(), events.clone(), Decimal::new(21, 2)),
            MaintenanceNotificationService::new(uow, events, Decimal::from(5)),
        )
    }

    #[tokio::test]
    async fn mailer_failure_becomes_a_failed_outcome() {
        let store = seeded_store();
        let mut mailer = MockOrderMailer::new();
        mailer
            .expect_send_order_status_change_email()
            .withf(|order, status| order.id == 1 && *status == OrderStatus::Pending)
            .times(1)
            .returning(|_, _| Err(NotificationError::Transport("connection refused".into())));
        mailer.expect_send_bill_by_email().never();

        let report = service(&store, mailer)
            .finish(command(
                vec![OrderStatusUpdate {
                    order_id: 1,
                    status: OrderStatus::Pending,
                }],
                10,
                25,
            ))
            .await
            .unwrap();

        assert_eq!(report.effective_km, 15);
        assert_eq!(report.outcomes.len(), 1);
        assert!(!report.outcomes[0].succeeded);
        let state = store.snapshot().await;
        assert_eq!(state.vehicle(1).map(|v| v.km_traveled), Some(25));
        assert_eq!(state.order(1).map(|o| o.shipment_id), Some(None));
    }
}
