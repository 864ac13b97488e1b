use std::sync::Arc;

use chrono::Utc;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};

use fleet_backoffice::config::AppConfig;
use fleet_backoffice::db::{self, SeaOrmUnitOfWork};
use fleet_backoffice::entities::{client, payment_type, product, stock, OrderStatus};
use fleet_backoffice::events::EventSender;
use fleet_backoffice::notifications::LoggingMailer;
use fleet_backoffice::services::order_lifecycle::{CreateOrderRequest, OrderItemRequest};
use fleet_backoffice::AppServices;

// Ignored by default: needs the sqlite driver at runtime.
// Run with: cargo test -- --ignored sea_orm_store
#[tokio::test]
#[ignore]
async fn sea_orm_store_creates_and_cancels_orders() {
    // One connection, otherwise every pooled connection gets its own memory db.
    let cfg = AppConfig {
        database_url: "sqlite::memory:".into(),
        db_max_connections: 1,
        db_min_connections: 1,
        ..AppConfig::default()
    };
    let pool = db::connect(&cfg).await.expect("db connect");
    db::run_migrations(&pool).await.expect("migrations");
    let uow = Arc::new(SeaOrmUnitOfWork::new(Arc::new(pool)));
    let conn = uow.connection();

    client::ActiveModel {
        id: Set(1),
        name: Set("ACME".into()),
        email: Set("billing@acme.test".into()),
    }
    .insert(conn)
    .await
    .unwrap();
    payment_type::ActiveModel {
        id: Set(1),
        name: Set("Card".into()),
    }
    .insert(conn)
    .await
    .unwrap();
    product::ActiveModel {
        id: Set(1),
        name: Set("Pallet".into()),
        price: Set(dec!(9.99)),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await
    .unwrap();
    stock::ActiveModel {
        id: Set(1),
        product_id: Set(1),
        quantity_ordered: Set(0),
        quantity_available: Set(5),
        quantity_reserved: Set(0),
    }
    .insert(conn)
    .await
    .unwrap();

    let (events, _rx) = EventSender::channel(64);
    let services = AppServices::new(uow, events, Arc::new(LoggingMailer), &cfg);

    let created = services
        .orders
        .create_order(CreateOrderRequest {
            client_id: 1,
            payment_type_id: 1,
            delivery_method_id: 1,
            order_items: vec![OrderItemRequest {
                product_id: 1,
                quantity: 2,
            }],
        })
        .await
        .expect("order created");
    assert_eq!(created.order.total_amount, dec!(19.98));

    let over = services
        .orders
        .create_order(CreateOrderRequest {
            client_id: 1,
            payment_type_id: 1,
            delivery_method_id: 1,
            order_items: vec![OrderItemRequest {
                product_id: 1,
                quantity: 4,
            }],
        })
        .await;
    assert!(over.is_err());

    let cancelled = services
        .orders
        .update_status(created.order.id, OrderStatus::Cancelled)
        .await
        .expect("order cancelled");
    assert_eq!(cancelled.order_status_id, OrderStatus::Cancelled);
}
