mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;

use common::{at, SentEmail, StateBuilder, TestApp};
use fleet_backoffice::db::memory::StoreState;
use fleet_backoffice::entities::{OrderStatus, ShipmentStatus, UserRole};
use fleet_backoffice::errors::ServiceError;
use fleet_backoffice::events::Event;
use fleet_backoffice::services::shipment_finish::{
    DispatchShipmentRequest, FinishShipmentCommand, OrderStatusUpdate, BILL_CREATED_AND_SENT,
    STATUS_EMAIL_SENT,
};

const SHIPMENT: i32 = 3;
const VEHICLE: i32 = 7;
const ORDER_X: i32 = 10;
const ORDER_Y: i32 = 11;

/// Shipment 3 on vehicle 7 carries X (2 units) and Y (4 units) of product 1.
fn two_order_shipment() -> StateBuilder {
    StateBuilder::new()
        .product(1, dec!(5.00), 10, 6)
        .vehicle(VEHICLE, "FL-001", 1000)
        .shipment(SHIPMENT, VEHICLE, ShipmentStatus::Shipped)
        .order(ORDER_X, OrderStatus::Shipped, Some(SHIPMENT), &[(1, 2, dec!(5.00))])
        .order(ORDER_Y, OrderStatus::Shipped, Some(SHIPMENT), &[(1, 4, dec!(5.00))])
        .user(100, UserRole::Admin)
}

/// Same shipment, but product 1 only has 1 unit reserved, so finishing X
/// (2 units) cannot consume its reservation.
fn short_reservation_shipment() -> StateBuilder {
    StateBuilder::new()
        .product(1, dec!(5.00), 10, 1)
        .vehicle(VEHICLE, "FL-001", 1000)
        .shipment(SHIPMENT, VEHICLE, ShipmentStatus::Shipped)
        .order(ORDER_X, OrderStatus::Shipped, Some(SHIPMENT), &[(1, 2, dec!(5.00))])
        .order(ORDER_Y, OrderStatus::Shipped, Some(SHIPMENT), &[(1, 4, dec!(5.00))])
}

fn finish_command() -> FinishShipmentCommand {
    FinishShipmentCommand {
        shipment_id: SHIPMENT,
        orders: vec![
            OrderStatusUpdate {
                order_id: ORDER_X,
                status: OrderStatus::Finished,
            },
            OrderStatusUpdate {
                order_id: ORDER_Y,
                status: OrderStatus::Pending,
            },
        ],
        last_odometer: 1000,
        odometer_reading: 1150,
        finished_at: Some(at(2024, 6, 2)),
        run_key: None,
    }
}

fn assert_untouched(before: &StoreState, after: &StoreState) {
    assert_eq!(after.orders, before.orders);
    assert_eq!(after.stocks, before.stocks);
    assert_eq!(after.shipments, before.shipments);
    assert_eq!(after.vehicles, before.vehicles);
    assert!(after.vehicle_usages.is_empty());
    assert!(after.stock_changes.is_empty());
    assert!(after.bills.is_empty());
}

fn update(order_id: i32, status: OrderStatus) -> OrderStatusUpdate {
    OrderStatusUpdate { order_id, status }
}

#[tokio::test]
async fn finishing_applies_every_order_and_the_vehicle_usage() {
    let app = TestApp::new(two_order_shipment().build());

    let report = app.services.shipments.finish(finish_command()).await.unwrap();

    assert!(!report.already_applied);
    assert_eq!(report.effective_km, 150);
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].order_id, ORDER_X);
    assert_eq!(report.outcomes[0].message, BILL_CREATED_AND_SENT);
    assert_eq!(report.outcomes[1].order_id, ORDER_Y);
    assert_eq!(report.outcomes[1].message, STATUS_EMAIL_SENT);
    assert!(report.outcomes.iter().all(|o| o.succeeded));

    let state = app.state().await;
    let stock = state.stock_of(1).unwrap();
    assert_eq!((stock.quantity_available, stock.quantity_reserved), (10, 4));

    let x = state.order(ORDER_X).unwrap();
    assert_eq!(x.order_status_id, OrderStatus::Finished);
    assert_eq!(x.shipment_id, Some(SHIPMENT));
    let y = state.order(ORDER_Y).unwrap();
    assert_eq!(y.order_status_id, OrderStatus::Pending);
    assert_eq!(y.shipment_id, None);

    let shipment = state.shipment(SHIPMENT).unwrap();
    assert_eq!(shipment.status_id, ShipmentStatus::Finished);
    assert_eq!(shipment.effective_km, Some(150));
    assert_eq!(shipment.finished_at, Some(at(2024, 6, 2)));

    assert_eq!(state.vehicle(VEHICLE).unwrap().km_traveled, 1150);
    assert_eq!(state.vehicle_usages.len(), 1);
    let usage = &state.vehicle_usages[0];
    assert_eq!((usage.previous_km, usage.current_km, usage.km_traveled), (1000, 1150, 150));

    let bills = state.bills_for_order(ORDER_X);
    assert_eq!(bills.len(), 1);
    assert_eq!(bills[0].subtotal, dec!(10.00));
    assert_eq!(bills[0].tax_amount, dec!(2.10));
    assert_eq!(bills[0].total_amount, dec!(12.10));
    assert!(state.bills_for_order(ORDER_Y).is_empty());

    let bill = app.services.billing.bill_report(ORDER_X).await.unwrap();
    assert_eq!(bill.client.email, "billing@acme.test");
    assert_eq!(bill.items.len(), 1);
    assert_eq!(bill.items[0].product_name, "Product 1");
    assert_eq!(bill.tax_rate, dec!(0.21));
    assert_eq!(bill.total, dec!(12.10));

    let sent = app.mailer.sent();
    assert!(sent.contains(&SentEmail::StatusChange {
        order_id: ORDER_Y,
        status: OrderStatus::Pending,
    }));
    assert!(sent.contains(&SentEmail::Bill {
        order_id: ORDER_X,
        bill_id: bills[0].id,
        to: "billing@acme.test".into(),
    }));

    let events = app.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::ShipmentFinished { shipment_id: SHIPMENT, effective_km: 150, .. }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::BillCreated { order_id: ORDER_X, .. })));
}

#[tokio::test]
async fn a_rejected_transition_rolls_back_the_whole_shipment() {
    let app = TestApp::new(
        two_order_shipment()
            .order(12, OrderStatus::Cancelled, Some(SHIPMENT), &[(1, 1, dec!(5.00))])
            .build(),
    );
    let before = app.state().await;

    let mut command = finish_command();
    command.orders.push(OrderStatusUpdate {
        order_id: 12,
        status: OrderStatus::Finished,
    });
    let err = app.services.shipments.finish(command).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(_));

    assert_untouched(&before, &app.state().await);
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn a_failing_email_only_affects_its_own_order() {
    let app = TestApp::new(two_order_shipment().build());
    app.mailer.fail_for(ORDER_Y);

    let report = app.services.shipments.finish(finish_command()).await.unwrap();

    let x = &report.outcomes[0];
    assert!(x.succeeded);
    assert_eq!(x.message, BILL_CREATED_AND_SENT);
    let y = &report.outcomes[1];
    assert!(!y.succeeded);
    assert!(y.message.starts_with("Side effects failed"));

    let state = app.state().await;
    assert_eq!(state.shipment(SHIPMENT).unwrap().status_id, ShipmentStatus::Finished);
    assert_eq!(state.order(ORDER_Y).unwrap().order_status_id, OrderStatus::Pending);
}

#[tokio::test]
async fn replaying_a_finished_run_does_not_bill_twice() {
    let app = TestApp::new(two_order_shipment().build());

    let first = app.services.shipments.finish(finish_command()).await.unwrap();
    let sent_after_first = app.mailer.sent().len();
    let second = app.services.shipments.finish(finish_command()).await.unwrap();

    assert_eq!(first, second);
    let state = app.state().await;
    assert_eq!(state.bills.len(), 1);
    assert_eq!(state.vehicle_usages.len(), 1);
    assert_eq!(app.mailer.sent().len(), sent_after_first);
}

#[tokio::test]
async fn replay_retries_only_the_failed_side_effect() {
    let app = TestApp::new(two_order_shipment().build());
    app.mailer.fail_for(ORDER_X);

    let first = app.services.shipments.finish(finish_command()).await.unwrap();
    assert!(!first.outcomes[0].succeeded);
    assert_eq!(app.state().await.bills.len(), 1);

    app.mailer.recover(ORDER_X);
    let second = app.services.shipments.finish(finish_command()).await.unwrap();
    assert!(second.outcomes[0].succeeded);
    assert_eq!(second.outcomes[0].message, BILL_CREATED_AND_SENT);

    let state = app.state().await;
    assert_eq!(state.bills.len(), 1);
    let bill_emails = app
        .mailer
        .sent()
        .into_iter()
        .filter(|e| matches!(e, SentEmail::Bill { .. }))
        .count();
    assert_eq!(bill_emails, 1);
    // Y's status email went out in the first run only
    let status_emails = app
        .mailer
        .sent()
        .into_iter()
        .filter(|e| matches!(e, SentEmail::StatusChange { .. }))
        .count();
    assert_eq!(status_emails, 1);
}

#[tokio::test]
async fn a_new_run_on_a_finished_shipment_writes_nothing() {
    let app = TestApp::new(two_order_shipment().build());
    app.services.shipments.finish(finish_command()).await.unwrap();
    let before = app.state().await;
    let sent_before = app.mailer.sent().len();

    let mut again = finish_command();
    again.run_key = Some("manual-retry".into());
    let report = app.services.shipments.finish(again).await.unwrap();

    assert!(report.already_applied);
    assert_eq!(report.effective_km, 150);
    assert!(report.outcomes.is_empty());
    let after = app.state().await;
    assert_eq!(after.orders, before.orders);
    assert_eq!(after.stocks, before.stocks);
    assert_eq!(after.vehicle_usages, before.vehicle_usages);
    assert_eq!(after.bills, before.bills);
    assert_eq!(app.mailer.sent().len(), sent_before);
}

#[tokio::test]
async fn inconsistent_payloads_are_rejected() {
    let app = TestApp::new(
        two_order_shipment()
            .order(20, OrderStatus::Shipped, None, &[(1, 1, dec!(5.00))])
            .build(),
    );
    let before = app.state().await;

    let mut backwards = finish_command();
    backwards.odometer_reading = 900;
    backwards.run_key = Some("backwards".into());
    assert_matches!(
        app.services.shipments.finish(backwards).await,
        Err(ServiceError::BadRequest(_))
    );

    let mut foreign = finish_command();
    foreign.orders.push(OrderStatusUpdate {
        order_id: 20,
        status: OrderStatus::Finished,
    });
    foreign.run_key = Some("foreign".into());
    assert_matches!(
        app.services.shipments.finish(foreign).await,
        Err(ServiceError::BadRequest(msg)) if msg.contains("20")
    );

    assert_untouched(&before, &app.state().await);
}

#[tokio::test]
async fn finishing_notifies_admins_of_due_maintenance() {
    let app = TestApp::new(
        two_order_shipment()
            .user(101, UserRole::Operator)
            .plan_item(1, VEHICLE, "Oil change", Some(1200), None)
            .build(),
    );

    let report = app.services.shipments.finish(finish_command()).await.unwrap();

    let maintenance = report.maintenance.unwrap();
    assert_eq!(maintenance.created, 1);
    let state = app.state().await;
    assert_eq!(state.notifications.len(), 1);
    assert_eq!(state.notifications[0].user_id, 100);
    assert_eq!(
        state.notifications[0].message,
        "Vehicle FL-001: maintenance \"Oil change\" is due at 1200 km"
    );
}

#[tokio::test]
async fn dispatch_ships_pending_orders_without_touching_stock() {
    let app = TestApp::new(
        StateBuilder::new()
            .product(1, dec!(5.00), 8, 2)
            .vehicle(VEHICLE, "FL-001", 0)
            .shipment(4, VEHICLE, ShipmentStatus::Pending)
            .order(30, OrderStatus::Pending, None, &[(1, 2, dec!(5.00))])
            .order(31, OrderStatus::Finished, None, &[(1, 1, dec!(5.00))])
            .build(),
    );

    let rejected = app
        .services
        .shipments
        .dispatch(DispatchShipmentRequest {
            shipment_id: 4,
            order_ids: vec![30, 31],
        })
        .await;
    assert_matches!(rejected, Err(ServiceError::InvalidStatus(_)));
    assert_eq!(app.state().await.order(30).unwrap().shipment_id, None);

    let shipment = app
        .services
        .shipments
        .dispatch(DispatchShipmentRequest {
            shipment_id: 4,
            order_ids: vec![30],
        })
        .await
        .unwrap();
    assert_eq!(shipment.status_id, ShipmentStatus::Shipped);

    let state = app.state().await;
    let order = state.order(30).unwrap();
    assert_eq!(order.order_status_id, OrderStatus::Shipped);
    assert_eq!(order.shipment_id, Some(4));
    let stock = state.stock_of(1).unwrap();
    assert_eq!((stock.quantity_available, stock.quantity_reserved), (8, 2));
    assert!(state.stock_changes.is_empty());
}

#[tokio::test]
async fn a_stock_failure_rolls_back_the_whole_shipment() {
    let app = TestApp::new(short_reservation_shipment().build());
    let before = app.state().await;

    let err = app.services.shipments.finish(finish_command()).await.unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    let after = app.state().await;
    assert_untouched(&before, &after);
    assert_eq!(after.shipment(SHIPMENT).unwrap().status_id, ShipmentStatus::Shipped);
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn a_corrected_payload_is_applied_after_a_rejected_one() {
    let app = TestApp::new(
        two_order_shipment()
            .order(12, OrderStatus::Cancelled, Some(SHIPMENT), &[(1, 1, dec!(5.00))])
            .build(),
    );

    let mut rejected = finish_command();
    rejected.orders.push(update(12, OrderStatus::Finished));
    assert_matches!(
        app.services.shipments.finish(rejected).await,
        Err(ServiceError::InvalidStatus(_))
    );

    let mut corrected = finish_command();
    corrected.orders.push(update(12, OrderStatus::Cancelled));
    let report = app.services.shipments.finish(corrected).await.unwrap();

    assert!(!report.already_applied);
    assert_eq!(report.outcomes.len(), 3);
    let state = app.state().await;
    assert_eq!(state.shipment(SHIPMENT).unwrap().status_id, ShipmentStatus::Finished);
    assert_eq!(state.order(ORDER_X).unwrap().order_status_id, OrderStatus::Finished);
    assert_eq!(state.order(12).unwrap().order_status_id, OrderStatus::Cancelled);
}

#[tokio::test]
async fn resending_after_a_stock_failure_uses_the_new_statuses() {
    let app = TestApp::new(short_reservation_shipment().build());
    assert_matches!(
        app.services.shipments.finish(finish_command()).await,
        Err(ServiceError::InsufficientStock(_))
    );

    let mut resent = finish_command();
    resent.orders[0] = update(ORDER_X, OrderStatus::Pending);
    let report = app.services.shipments.finish(resent).await.unwrap();

    assert!(report.outcomes.iter().all(|o| o.message == STATUS_EMAIL_SENT));
    let state = app.state().await;
    let x = state.order(ORDER_X).unwrap();
    assert_eq!((x.order_status_id, x.shipment_id), (OrderStatus::Pending, None));
    assert_eq!(state.shipment(SHIPMENT).unwrap().status_id, ShipmentStatus::Finished);
    assert!(state.bills.is_empty());
}

#[tokio::test]
async fn replay_leaves_orders_that_moved_to_another_shipment() {
    let app = TestApp::new(
        short_reservation_shipment()
            .shipment(4, VEHICLE, ShipmentStatus::Pending)
            .build(),
    );
    assert_matches!(
        app.services.shipments.finish(finish_command()).await,
        Err(ServiceError::InsufficientStock(_))
    );

    app.services
        .orders
        .update_status(ORDER_X, OrderStatus::Pending)
        .await
        .unwrap();
    app.services
        .shipments
        .dispatch(DispatchShipmentRequest {
            shipment_id: 4,
            order_ids: vec![ORDER_X],
        })
        .await
        .unwrap();

    let report = app.services.shipments.finish(finish_command()).await.unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].order_id, ORDER_Y);
    let state = app.state().await;
    let x = state.order(ORDER_X).unwrap();
    assert_eq!((x.order_status_id, x.shipment_id), (OrderStatus::Shipped, Some(4)));
    assert_eq!(state.shipment(4).unwrap().status_id, ShipmentStatus::Shipped);
    assert_eq!(state.shipment(SHIPMENT).unwrap().status_id, ShipmentStatus::Finished);
    assert!(state.bills.is_empty());
    assert!(!app
        .mailer
        .sent()
        .iter()
        .any(|e| matches!(e, SentEmail::StatusChange { order_id: ORDER_X, .. })));
}

#[tokio::test]
async fn an_explicit_run_key_cannot_be_reused_for_another_payload() {
    let app = TestApp::new(short_reservation_shipment().build());
    let mut first = finish_command();
    first.run_key = Some("driver-app-77".into());
    assert_matches!(
        app.services.shipments.finish(first.clone()).await,
        Err(ServiceError::InsufficientStock(_))
    );

    let mut changed = first;
    changed.orders[0] = update(ORDER_X, OrderStatus::Pending);
    assert_matches!(
        app.services.shipments.finish(changed).await,
        Err(ServiceError::BadRequest(msg)) if msg.contains("driver-app-77")
    );
    assert_eq!(
        app.state().await.shipment(SHIPMENT).unwrap().status_id,
        ShipmentStatus::Shipped
    );
}

#[tokio::test]
async fn a_shipment_that_never_left_cannot_be_finished() {
    let app = TestApp::new(
        StateBuilder::new()
            .product(1, dec!(5.00), 10, 6)
            .vehicle(VEHICLE, "FL-001", 1000)
            .shipment(SHIPMENT, VEHICLE, ShipmentStatus::Pending)
            .order(ORDER_X, OrderStatus::Shipped, Some(SHIPMENT), &[(1, 2, dec!(5.00))])
            .order(ORDER_Y, OrderStatus::Shipped, Some(SHIPMENT), &[(1, 4, dec!(5.00))])
            .build(),
    );
    let before = app.state().await;

    let err = app.services.shipments.finish(finish_command()).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidStatus(_));
    assert_untouched(&before, &app.state().await);
}
