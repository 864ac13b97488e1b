//! Maintenance notification generator.
//!
//! [`plan_due_notifications`] decides, from a snapshot of vehicles, plan items
//! and maintenance history, which plan items are due. The service then fans
//! the resulting messages out to every admin, skipping admins who still have
//! the same message unread.

use chrono::{DateTime, Duration, Months, Utc};
use futures::future::join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::db::transaction::UnitOfWork;
use crate::entities::{maintenance, maintenance_plan_item, user, vehicle, UserRole};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::repositories::NewNotification;

const HOURS_PER_MONTH: i64 = 720;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceSnapshot {
    pub vehicles: Vec<vehicle::Model>,
    pub plan_items: Vec<maintenance_plan_item::Model>,
    pub maintenances: Vec<maintenance::Model>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueNotification {
    pub plan_item_id: i32,
    pub vehicle_id: i32,
    pub next_km: Option<i32>,
    pub next_date: Option<DateTime<Utc>>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub created: usize,
    pub skipped_duplicates: usize,
    pub failed: usize,
}

/// Km at which an item with `km_interval` becomes due, if it is due at
/// `vehicle_km`.
fn km_due(vehicle_km: i32, last_km: i32, km_interval: i32, tolerance_pct: Decimal) -> (i32, bool) {
    let next_km = last_km.saturating_add(km_interval);
    let early = Decimal::from(km_interval) * tolerance_pct / Decimal::ONE_HUNDRED;
    let due = Decimal::from(vehicle_km) >= Decimal::from(next_km) - early;
    (next_km, due)
}

/// Date at which an item with `months` becomes due, if it is due at `now`.
/// One month of tolerance is 30 days.
fn time_due(
    now: DateTime<Utc>,
    last_date: DateTime<Utc>,
    months: i32,
    tolerance_pct: Decimal,
) -> Option<(DateTime<Utc>, bool)> {
    let next_date = last_date.checked_add_months(Months::new(u32::try_from(months).ok()?))?;
    let early_secs = (Decimal::from(months) * Decimal::from(HOURS_PER_MONTH * 3600) * tolerance_pct
        / Decimal::ONE_HUNDRED)
        .trunc()
        .to_i64()?;
    let due = now >= next_date - Duration::seconds(early_secs);
    Some((next_date, due))
}

/// Names the next km and/or the next date; callers pass at least one.
fn message_for(
    vehicle: &vehicle::Model,
    task: &str,
    next_km: Option<i32>,
    next_date: Option<DateTime<Utc>>,
) -> String {
    let when: Vec<String> = next_km
        .map(|km| format!("at {} km", km))
        .into_iter()
        .chain(next_date.map(|date| format!("on {}", date.format("%Y-%m-%d"))))
        .collect();
    format!(
        "Vehicle {}: maintenance \"{}\" is due {}",
        vehicle.license_plate,
        task,
        when.join(" or ")
    )
}

/// Plan items that are due at `now`, each with a message that only depends
/// on the plan and the maintenance history.
pub fn plan_due_notifications(
    snapshot: &MaintenanceSnapshot,
    now: DateTime<Utc>,
    tolerance_pct: Decimal,
) -> Vec<DueNotification> {
    let vehicles: HashMap<i32, &vehicle::Model> =
        snapshot.vehicles.iter().map(|v| (v.id, v)).collect();

    let mut latest: HashMap<i32, &maintenance::Model> = HashMap::new();
    for record in &snapshot.maintenances {
        let entry = latest.entry(record.plan_item_id).or_insert(record);
        if (record.date, record.id) > (entry.date, entry.id) {
            *entry = record;
        }
    }

    let mut due = Vec::new();
    for item in &snapshot.plan_items {
        let Some(vehicle) = vehicles.get(&item.vehicle_id) else {
            warn!(
                plan_item_id = item.id,
                vehicle_id = item.vehicle_id,
                "Plan item references an unknown vehicle"
            );
            continue;
        };
        let last = latest.get(&item.id);
        let last_km = last.map(|m| m.km).unwrap_or(0);
        let last_date = last.map(|m| m.date).unwrap_or(vehicle.created_at);

        let km = item
            .km_interval
            .filter(|interval| *interval > 0)
            .map(|interval| km_due(vehicle.km_traveled, last_km, interval, tolerance_pct));
        let time = item
            .time_interval_months
            .filter(|months| *months > 0)
            .and_then(|months| time_due(now, last_date, months, tolerance_pct));

        let km_triggered = km.map(|(_, d)| d).unwrap_or(false);
        let time_triggered = time.map(|(_, d)| d).unwrap_or(false);
        if !km_triggered && !time_triggered {
            continue;
        }

        let next_km = km.map(|(k, _)| k);
        let next_date = time.map(|(d, _)| d);
        due.push(DueNotification {
            plan_item_id: item.id,
            vehicle_id: vehicle.id,
            next_km,
            next_date,
            message: message_for(vehicle, &item.task, next_km, next_date),
        });
    }
    due
}

enum Delivery {
    Created(i32),
    Duplicate,
}

#[derive(Clone)]
pub struct MaintenanceNotificationService {
    uow: Arc<dyn UnitOfWork>,
    event_sender: EventSender,
    tolerance_pct: Decimal,
}

impl MaintenanceNotificationService {
    pub fn new(
        uow: Arc<dyn UnitOfWork>,
        event_sender: EventSender,
        tolerance_pct: Decimal,
    ) -> Self {
        Self {
            uow,
            event_sender,
            tolerance_pct,
        }
    }

    /// Reads everything the evaluation needs plus the admin recipients.
    pub async fn load_snapshot(
        &self,
    ) -> Result<(MaintenanceSnapshot, Vec<user::Model>), ServiceError> {
        self.uow
            .execute(|tx| async move {
                let plan_items = tx.list_plan_items().await?;
                let ids: Vec<i32> = plan_items.iter().map(|p| p.id).collect();
                let maintenances = tx.list_maintenances_for_plan_items(&ids).await?;
                let vehicles = tx.list_vehicles().await?;
                let admins = tx.find_users_by_role(UserRole::Admin).await?;
                Ok((
                    MaintenanceSnapshot {
                        vehicles,
                        plan_items,
                        maintenances,
                    },
                    admins,
                ))
            })
            .await
    }

    /// Evaluates the plan at `now` and notifies every admin of each due item.
    #[instrument(skip(self))]
    pub async fn generate(&self, now: DateTime<Utc>) -> Result<GenerationReport, ServiceError> {
        let (snapshot, admins) = self.load_snapshot().await?;
        let due = plan_due_notifications(&snapshot, now, self.tolerance_pct);
        if due.is_empty() || admins.is_empty() {
            debug!(due = due.len(), admins = admins.len(), "Nothing to notify");
            return Ok(GenerationReport::default());
        }

        let per_admin =
            join_all(admins.iter().map(|admin| self.notify_admin(admin.id, &due, now))).await;

        let mut report = GenerationReport::default();
        for admin_report in per_admin {
            report.created += admin_report.created;
            report.skipped_duplicates += admin_report.skipped_duplicates;
            report.failed += admin_report.failed;
        }
        info!(
            created = report.created,
            skipped = report.skipped_duplicates,
            failed = report.failed,
            "Maintenance notifications generated"
        );
        Ok(report)
    }

    async fn notify_admin(
        &self,
        user_id: i32,
        due: &[DueNotification],
        now: DateTime<Utc>,
    ) -> GenerationReport {
        let mut report = GenerationReport::default();
        for item in due {
            match self.deliver(user_id, &item.message, now).await {
                Ok(Delivery::Created(notification_id)) => {
                    report.created += 1;
                    crate::metrics::NOTIFICATIONS_CREATED.inc();
                    self.event_sender
                        .send_or_log(Event::NotificationCreated {
                            notification_id,
                            user_id,
                        })
                        .await;
                }
                Ok(Delivery::Duplicate) => report.skipped_duplicates += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        user_id,
                        plan_item_id = item.plan_item_id,
                        error = %e,
                        "Failed to create maintenance notification"
                    );
                }
            }
        }
        report
    }

    async fn deliver(
        &self,
        user_id: i32,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Delivery, ServiceError> {
        let message = message.to_string();
        self.uow
            .execute(|tx| async move {
                if tx.exists_unviewed_notification(user_id, &message).await? {
                    return Ok(Delivery::Duplicate);
                }
                let created = tx
                    .create_notification(NewNotification {
                        user_id,
                        message,
                        created_at: now,
                    })
                    .await?;
                Ok(Delivery::Created(created.id))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn van(km: i32) -> vehicle::Model {
        vehicle::Model {
            id: 1,
            license_plate: "AB-123".into(),
            km_traveled: km,
            created_at: at(2024, 1, 1),
        }
    }

    fn item(km_interval: Option<i32>, months: Option<i32>) -> maintenance_plan_item::Model {
        maintenance_plan_item::Model {
            id: 5,
            vehicle_id: 1,
            task: "Oil change".into(),
            km_interval,
            time_interval_months: months,
        }
    }

    fn snapshot(km: i32, plan: maintenance_plan_item::Model) -> MaintenanceSnapshot {
        MaintenanceSnapshot {
            vehicles: vec![van(km)],
            plan_items: vec![plan],
            maintenances: vec![],
        }
    }

    #[test]
    fn km_threshold_includes_tolerance() {
        // next 10_000, 5% of 10_000 = 500 early
        let due = plan_due_notifications(
            &snapshot(9_500, item(Some(10_000), None)),
            at(2024, 1, 2),
            dec!(5),
        );
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].next_km, Some(10_000));
        assert_eq!(due[0].message, "Vehicle AB-123: maintenance \"Oil change\" is due at 10000 km");

        let not_yet = plan_due_notifications(
            &snapshot(9_499, item(Some(10_000), None)),
            at(2024, 1, 2),
            dec!(5),
        );
        assert!(not_yet.is_empty());
    }

    #[test]
    fn km_counts_from_latest_maintenance() {
        let mut snap = snapshot(14_000, item(Some(10_000), None));
        snap.maintenances = vec![
            maintenance::Model {
                id: 1,
                vehicle_id: 1,
                plan_item_id: 5,
                km: 2_000,
                date: at(2024, 2, 1),
            },
            maintenance::Model {
                id: 2,
                vehicle_id: 1,
                plan_item_id: 5,
                km: 9_000,
                date: at(2024, 6, 1),
            },
        ];
        assert!(plan_due_notifications(&snap, at(2024, 7, 1), dec!(5)).is_empty());

        snap.vehicles[0].km_traveled = 18_500;
        let due = plan_due_notifications(&snap, at(2024, 7, 1), dec!(5));
        assert_eq!(due[0].next_km, Some(19_000));
    }

    #[test]
    fn time_threshold_uses_thirty_day_months() {
        // 12 months from 2024-01-01 is 2025-01-01; 5% of 12 * 720h = 432h = 18 days early
        let plan = item(None, Some(12));
        let due = plan_due_notifications(&snapshot(0, plan.clone()), at(2024, 12, 14), dec!(5));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].next_date, Some(at(2025, 1, 1)));
        assert_eq!(
            due[0].message,
            "Vehicle AB-123: maintenance \"Oil change\" is due on 2025-01-01"
        );

        assert!(plan_due_notifications(&snapshot(0, plan), at(2024, 12, 13), dec!(5)).is_empty());
    }

    #[test]
    fn message_mentions_both_limits_when_both_are_defined() {
        let due = plan_due_notifications(
            &snapshot(9_800, item(Some(10_000), Some(12))),
            at(2024, 3, 1),
            dec!(5),
        );
        assert_eq!(
            due[0].message,
            "Vehicle AB-123: maintenance \"Oil change\" is due at 10000 km or on 2025-01-01"
        );
    }

    #[test]
    fn message_is_stable_across_runs() {
        let snap = snapshot(9_900, item(Some(10_000), Some(12)));
        let first = plan_due_notifications(&snap, at(2024, 3, 1), dec!(5));
        let later = plan_due_notifications(&snap, at(2024, 4, 1), dec!(5));
        assert_eq!(first[0].message, later[0].message);
    }

    #[test]
    fn items_without_intervals_are_never_due() {
        let snap = snapshot(1_000_000, item(None, None));
        assert!(plan_due_notifications(&snap, at(2030, 1, 1), dec!(5)).is_empty());
    }
}
