use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Quantity column touched by a stock mutation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum StockField {
    #[sea_orm(string_value = "quantity_available")]
    Available,
    #[sea_orm(string_value = "quantity_ordered")]
    Ordered,
    #[sea_orm(string_value = "quantity_reserved")]
    Reserved,
}

impl StockField {
    pub fn as_str(self) -> &'static str {
        match self {
            StockField::Available => "quantity_available",
            StockField::Ordered => "quantity_ordered",
            StockField::Reserved => "quantity_reserved",
        }
    }
}

impl std::fmt::Display for StockField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit entry, one per changed field per stock mutation.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_changes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub product_id: i32,
    pub changed_field: StockField,
    pub previous_value: i32,
    pub new_value: i32,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
