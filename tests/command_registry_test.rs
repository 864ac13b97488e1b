mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use serde_json::json;

use common::{StateBuilder, TestApp};
use fleet_backoffice::entities::{OrderStatus, ShipmentStatus, UserRole};
use fleet_backoffice::errors::ServiceError;
use fleet_backoffice::CommandRegistry;

#[tokio::test]
async fn orders_flow_through_named_commands() {
    let app = TestApp::new(
        StateBuilder::new()
            .product(1, dec!(2.00), 10, 0)
            .vehicle(1, "FL-001", 500)
            .shipment(1, 1, ShipmentStatus::Pending)
            .user(100, UserRole::Admin)
            .build(),
    );
    let registry = CommandRegistry::with_defaults();

    let created = registry
        .dispatch(
            &app.services,
            "order.create",
            json!({
                "client_id": 1,
                "payment_type_id": 1,
                "order_items": [{ "product_id": 1, "quantity": 3 }]
            }),
        )
        .await
        .unwrap();
    let order_id = created["order"]["id"].as_i64().unwrap();
    assert_eq!(created["order"]["delivery_method_id"], json!(1));

    registry
        .dispatch(
            &app.services,
            "shipment.dispatch",
            json!({ "shipment_id": 1, "order_ids": [order_id] }),
        )
        .await
        .unwrap();

    let report = registry
        .dispatch(
            &app.services,
            "finish.shipment",
            json!({
                "shipment_id": 1,
                "orders": [{ "order_id": order_id, "status": "Finished" }],
                "last_odometer": 500,
                "odometer_reading": 620
            }),
        )
        .await
        .unwrap();
    assert_eq!(report["effective_km"], json!(120));
    assert_eq!(report["outcomes"][0]["succeeded"], json!(true));

    let state = app.state().await;
    assert_eq!(state.order(order_id as i32).unwrap().order_status_id, OrderStatus::Finished);
    let stock = state.stock_of(1).unwrap();
    assert_eq!((stock.quantity_available, stock.quantity_reserved), (7, 0));
    assert_eq!(state.bills.len(), 1);
}

#[tokio::test]
async fn purchase_orders_and_maintenance_are_dispatchable() {
    let app = TestApp::new(StateBuilder::new().product(1, dec!(2.00), 0, 0).build());
    let registry = CommandRegistry::with_defaults();

    let created = registry
        .dispatch(
            &app.services,
            "purchase_order.create",
            json!({
                "supplier_name": "Parts & Co",
                "items": [{ "product_id": 1, "quantity": 4, "unit_cost": "1.25" }]
            }),
        )
        .await
        .unwrap();
    let id = created["purchase_order"]["id"].clone();
    registry
        .dispatch(&app.services, "purchase_order.receive", json!({ "purchase_order_id": id }))
        .await
        .unwrap();
    assert_eq!(app.state().await.stock_of(1).unwrap().quantity_available, 4);

    let report = registry
        .dispatch(&app.services, "generate.maintenance.notifications", json!({}))
        .await
        .unwrap();
    assert_eq!(report["created"], json!(0));
}

#[tokio::test]
async fn unknown_commands_and_bad_payloads_are_rejected() {
    let app = TestApp::new(StateBuilder::new().build());
    let registry = CommandRegistry::with_defaults();

    let unknown = registry
        .dispatch(&app.services, "order.delete", json!({}))
        .await;
    assert_matches!(unknown, Err(ServiceError::NotFound(_)));

    let malformed = registry
        .dispatch(&app.services, "order.status.update", json!({ "order_id": "x" }))
        .await;
    assert_matches!(malformed, Err(ServiceError::BadRequest(_)));
}
