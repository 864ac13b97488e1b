use sea_orm::{EntityTrait, Schema};
use sea_orm_migration::prelude::*;

use crate::entities::{
    bill, bill_item, client, maintenance, maintenance_plan_item, notification, order, order_item,
    payment_detail, payment_type, product, purchase_order, purchase_order_item, shipment, stock,
    stock_change, user, vehicle, vehicle_usage, workflow_step,
};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_backoffice_tables::Migration),
            Box::new(m20240101_000002_create_backoffice_indexes::Migration),
        ]
    }
}

async fn create_from_entity<E>(manager: &SchemaManager<'_>, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    let schema = Schema::new(manager.get_database_backend());
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    manager.create_table(stmt).await
}

async fn drop_entity<E>(manager: &SchemaManager<'_>, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    manager
        .drop_table(Table::drop().table(entity).if_exists().to_owned())
        .await
}

mod m20240101_000001_create_backoffice_tables {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_backoffice_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Parents before children so foreign keys resolve.
            create_from_entity(manager, client::Entity).await?;
            create_from_entity(manager, payment_type::Entity).await?;
            create_from_entity(manager, payment_detail::Entity).await?;
            create_from_entity(manager, product::Entity).await?;
            create_from_entity(manager, stock::Entity).await?;
            create_from_entity(manager, stock_change::Entity).await?;
            create_from_entity(manager, vehicle::Entity).await?;
            create_from_entity(manager, shipment::Entity).await?;
            create_from_entity(manager, order::Entity).await?;
            create_from_entity(manager, order_item::Entity).await?;
            create_from_entity(manager, vehicle_usage::Entity).await?;
            create_from_entity(manager, bill::Entity).await?;
            create_from_entity(manager, bill_item::Entity).await?;
            create_from_entity(manager, user::Entity).await?;
            create_from_entity(manager, notification::Entity).await?;
            create_from_entity(manager, maintenance_plan_item::Entity).await?;
            create_from_entity(manager, maintenance::Entity).await?;
            create_from_entity(manager, purchase_order::Entity).await?;
            create_from_entity(manager, purchase_order_item::Entity).await?;
            create_from_entity(manager, workflow_step::Entity).await?;
            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            drop_entity(manager, workflow_step::Entity).await?;
            drop_entity(manager, purchase_order_item::Entity).await?;
            drop_entity(manager, purchase_order::Entity).await?;
            drop_entity(manager, maintenance::Entity).await?;
            drop_entity(manager, maintenance_plan_item::Entity).await?;
            drop_entity(manager, notification::Entity).await?;
            drop_entity(manager, user::Entity).await?;
            drop_entity(manager, bill_item::Entity).await?;
            drop_entity(manager, bill::Entity).await?;
            drop_entity(manager, vehicle_usage::Entity).await?;
            drop_entity(manager, order_item::Entity).await?;
            drop_entity(manager, order::Entity).await?;
            drop_entity(manager, shipment::Entity).await?;
            drop_entity(manager, vehicle::Entity).await?;
            drop_entity(manager, stock_change::Entity).await?;
            drop_entity(manager, stock::Entity).await?;
            drop_entity(manager, product::Entity).await?;
            drop_entity(manager, payment_detail::Entity).await?;
            drop_entity(manager, payment_type::Entity).await?;
            drop_entity(manager, client::Entity).await?;
            Ok(())
        }
    }
}

mod m20240101_000002_create_backoffice_indexes {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_backoffice_indexes"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_shipment_id")
                        .table(order::Entity)
                        .col(order::Column::ShipmentId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_changes_product_id")
                        .table(stock_change::Entity)
                        .col(stock_change::Column::ProductId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_notifications_user_viewed")
                        .table(notification::Entity)
                        .col(notification::Column::UserId)
                        .col(notification::Column::Viewed)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("idx_workflow_steps_run_step")
                        .table(workflow_step::Entity)
                        .col(workflow_step::Column::Workflow)
                        .col(workflow_step::Column::RunKey)
                        .col(workflow_step::Column::Step)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            for name in [
                "idx_workflow_steps_run_step",
                "idx_notifications_user_viewed",
                "idx_stock_changes_product_id",
                "idx_orders_shipment_id",
            ] {
                manager
                    .drop_index(Index::drop().name(name).if_exists().to_owned())
                    .await?;
            }
            Ok(())
        }
    }
}
