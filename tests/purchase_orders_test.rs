mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;

use common::{StateBuilder, TestApp};
use fleet_backoffice::entities::PurchaseOrderStatus;
use fleet_backoffice::errors::ServiceError;
use fleet_backoffice::services::purchase_orders::{
    CreatePurchaseOrderRequest, PurchaseOrderItemRequest,
};

fn restock(quantity: i32) -> CreatePurchaseOrderRequest {
    CreatePurchaseOrderRequest {
        supplier_name: "Parts & Co".into(),
        items: vec![PurchaseOrderItemRequest {
            product_id: 1,
            quantity,
            unit_cost: dec!(2.50),
        }],
    }
}

#[tokio::test]
async fn receiving_moves_ordered_units_to_available() {
    let app = TestApp::new(StateBuilder::new().product(1, dec!(4), 3, 1).build());

    let created = app.services.purchase_orders.create(restock(10)).await.unwrap();
    assert_eq!(created.purchase_order.status, PurchaseOrderStatus::Pending);
    assert_eq!(created.purchase_order.total_amount, dec!(25.00));
    let stock = app.state().await.stock_of(1).cloned().unwrap();
    assert_eq!((stock.quantity_ordered, stock.quantity_available), (10, 3));

    let received = app
        .services
        .purchase_orders
        .receive(created.purchase_order.id)
        .await
        .unwrap();
    assert_eq!(received.status, PurchaseOrderStatus::Received);
    assert!(received.received_at.is_some());

    let stock = app.state().await.stock_of(1).cloned().unwrap();
    assert_eq!(
        (stock.quantity_ordered, stock.quantity_available, stock.quantity_reserved),
        (0, 13, 1)
    );
}

#[tokio::test]
async fn cancelling_drops_the_expected_units() {
    let app = TestApp::new(StateBuilder::new().product(1, dec!(4), 3, 0).build());
    let created = app.services.purchase_orders.create(restock(5)).await.unwrap();

    app.services
        .purchase_orders
        .cancel(created.purchase_order.id)
        .await
        .unwrap();

    let stock = app.state().await.stock_of(1).cloned().unwrap();
    assert_eq!((stock.quantity_ordered, stock.quantity_available), (0, 3));

    let again = app
        .services
        .purchase_orders
        .receive(created.purchase_order.id)
        .await;
    assert_matches!(again, Err(ServiceError::InvalidStatus(_)));
}

#[tokio::test]
async fn invalid_purchase_orders_are_rejected() {
    let app = TestApp::new(StateBuilder::new().product(1, dec!(4), 3, 0).build());

    let unnamed = CreatePurchaseOrderRequest {
        supplier_name: String::new(),
        ..restock(1)
    };
    assert_matches!(
        app.services.purchase_orders.create(unnamed).await,
        Err(ServiceError::ValidationError(_))
    );

    assert_matches!(
        app.services.purchase_orders.create(restock(0)).await,
        Err(ServiceError::BadRequest(_))
    );

    let mut unknown = restock(1);
    unknown.items[0].product_id = 9;
    assert_matches!(
        app.services.purchase_orders.create(unknown).await,
        Err(ServiceError::NotFound(_))
    );

    assert_matches!(
        app.services.purchase_orders.receive(77).await,
        Err(ServiceError::NotFound(_))
    );
    assert!(app.state().await.purchase_orders.is_empty());
}
